//! Reference builder plug-ins (spec §6.1 "Builder Plug-in ABI").
//!
//! Only the plug-ins needed to exercise the engine end-to-end live here:
//! `generic` (an arbitrary shell command), `apt` (package/repository
//! metadata targets), `docker-image` (a container image target), and
//! `alias` (a phony grouping target). Full language toolchains (C++, Go,
//! Python, proto, ...) are external collaborators (spec §6) and are not
//! implemented by this crate.

pub mod alias;
pub mod apt;
pub mod docker_image;
pub mod generic;

use ybt_core::registry::{RegisterError, Registry};

/// Register every reference plug-in this crate ships with `registry`.
pub fn register_all(registry: &mut Registry) -> Result<(), RegisterError> {
    generic::register(registry)?;
    apt::register(registry)?;
    docker_image::register(registry)?;
    alias::register(registry)?;
    Ok(())
}
