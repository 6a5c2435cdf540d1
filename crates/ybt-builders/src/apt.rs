//! The `apt` builders: `AptPackage` and `AptRepository` targets. Grounded
//! on `examples/original_source/yabt/builders/apt.py` -- these targets
//! never actually build anything themselves; the build function just
//! records intent (the real fetch-and-cache step belongs to a package
//! manager integration this crate does not implement), and a
//! manipulate-target hook tags the target the way `apt_package_manipulate_target`
//! and `apt_repository_manipulate_target` do, so downstream builders can
//! find "apt-installable" targets by tag.

use async_trait::async_trait;
use ybt_core::registry::{ArgSpec, BuilderPlugin, RegisterError, Registry};
use ybt_core::scheduler::{BuildContext, BuildError};
use ybt_core::spec::{tags, PropType, PropValue, TargetSpec};

pub const PACKAGE_NAME: &str = "apt-package";
pub const REPOSITORY_NAME: &str = "apt-repository";

const DEFAULT_KEYSERVER: &str = "hkp://keyserver.ubuntu.com:80";

struct AptPackageBuilder;

#[async_trait]
impl BuilderPlugin for AptPackageBuilder {
    async fn build(&self, _ctx: &BuildContext, target: &mut TargetSpec) -> Result<(), BuildError> {
        let package = target.props.get("package").and_then(PropValue::as_str).unwrap_or_default();
        tracing::info!(target = %target.name, %package, "fetch and cache apt package");
        Ok(())
    }
}

struct AptRepositoryBuilder;

#[async_trait]
impl BuilderPlugin for AptRepositoryBuilder {
    async fn build(&self, _ctx: &BuildContext, _target: &mut TargetSpec) -> Result<(), BuildError> {
        Ok(())
    }
}

pub fn register(registry: &mut Registry) -> Result<(), RegisterError> {
    registry.register_builder(
        PACKAGE_NAME,
        vec![
            ArgSpec { name: "deps".to_string(), prop_type: PropType::TargetRefList, default: Some(PropValue::TargetRefList(Vec::new())) },
            ArgSpec { name: "package".to_string(), prop_type: PropType::Str, default: None },
            ArgSpec { name: "version".to_string(), prop_type: PropType::Str, default: Some(PropValue::Str(String::new())) },
            ArgSpec { name: "repository".to_string(), prop_type: PropType::Str, default: Some(PropValue::Str(String::new())) },
            ArgSpec { name: "repo_key".to_string(), prop_type: PropType::Str, default: Some(PropValue::Str(String::new())) },
            ArgSpec {
                name: "repo_keyserver".to_string(),
                prop_type: PropType::Str,
                default: Some(PropValue::Str(DEFAULT_KEYSERVER.to_string())),
            },
        ],
        true,
        Box::new(AptPackageBuilder),
        "declares an apt package dependency",
    )?;
    registry.register_hook(PACKAGE_NAME, Box::new(manipulate_apt_package))?;

    registry.register_builder(
        REPOSITORY_NAME,
        vec![
            ArgSpec { name: "deps".to_string(), prop_type: PropType::TargetRefList, default: Some(PropValue::TargetRefList(Vec::new())) },
            ArgSpec { name: "source".to_string(), prop_type: PropType::Str, default: None },
            ArgSpec { name: "key".to_string(), prop_type: PropType::Str, default: Some(PropValue::Str(String::new())) },
            ArgSpec {
                name: "keyserver".to_string(),
                prop_type: PropType::Str,
                default: Some(PropValue::Str(DEFAULT_KEYSERVER.to_string())),
            },
        ],
        true,
        Box::new(AptRepositoryBuilder),
        "declares an apt source line and signing key",
    )?;
    registry.register_hook(REPOSITORY_NAME, Box::new(|target: &mut TargetSpec| {
        target.tags.insert(tags::APT_INSTALLABLE.to_string());
        target.tags.insert("apt-repository".to_string());
    }))?;

    Ok(())
}

fn manipulate_apt_package(target: &mut TargetSpec) {
    target.tags.insert(tags::APT_INSTALLABLE.to_string());
    let repository = target.props.get("repository").and_then(PropValue::as_str).unwrap_or_default();
    if !repository.is_empty() {
        target.tags.insert("apt-repository".to_string());
    }
}
