//! The `generic` builder: runs an arbitrary shell command in the target's
//! build environment. Grounded on
//! `examples/original_source/yabt/builders/extcommand.py`'s `ExtCommand`
//! builder (`register_build_func` calling `build_context.run_in_buildenv`),
//! simplified to drop the `in_buildenv` image-selection prop, which belongs
//! to a full container-build pipeline this crate does not implement.

use async_trait::async_trait;
use ybt_core::registry::{ArgSpec, BuilderPlugin, RegisterError, Registry};
use ybt_core::scheduler::{BuildContext, BuildError};
use ybt_core::spec::{PropType, PropValue, TargetSpec};

pub const NAME: &str = "generic";

pub struct GenericBuilder;

#[async_trait]
impl BuilderPlugin for GenericBuilder {
    async fn build(&self, ctx: &BuildContext, target: &mut TargetSpec) -> Result<(), BuildError> {
        let cmd = target
            .props
            .get("cmd")
            .and_then(PropValue::as_str)
            .unwrap_or_default()
            .to_string();
        tracing::info!(target = %target.name, %cmd, "running generic command");
        ctx.run_in_buildenv(&cmd).await
    }
}

pub fn register(registry: &mut Registry) -> Result<(), RegisterError> {
    registry.register_builder(
        NAME,
        vec![
            ArgSpec {
                name: "deps".to_string(),
                prop_type: PropType::TargetRefList,
                default: Some(PropValue::TargetRefList(Vec::new())),
            },
            ArgSpec { name: "cmd".to_string(), prop_type: PropType::Str, default: None },
            ArgSpec {
                name: "env".to_string(),
                prop_type: PropType::StringList,
                default: Some(PropValue::StringList(Vec::new())),
            },
        ],
        true,
        Box::new(GenericBuilder),
        "runs `cmd` as a shell command in the target's build environment",
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn registers_with_expected_signature() {
        let mut registry = Registry::new();
        register(&mut registry).unwrap();
        let sig = registry.signature(NAME).unwrap();
        assert!(sig.slot("cmd").is_some());
        assert!(sig.slot("deps").is_some());
        assert!(registry.is_cachable(NAME));
    }
}
