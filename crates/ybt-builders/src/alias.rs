//! The `alias` builder: a phony target that groups other targets under one
//! name and builds nothing itself. Grounded on
//! `examples/original_source/yabt/builders/alias.py::AliasBuilder`, which
//! force-prefixes the target's own name with `@` so it is pruned from the
//! graph once crawling is done (spec §3 invariant 5) while its deps survive.

use async_trait::async_trait;
use ybt_core::registry::{ArgSpec, BuilderPlugin, RegisterError, Registry};
use ybt_core::scheduler::{BuildContext, BuildError};
use ybt_core::spec::{PropType, PropValue, TargetSpec};

pub const NAME: &str = "alias";

struct AliasBuilder;

#[async_trait]
impl BuilderPlugin for AliasBuilder {
    async fn build(&self, _ctx: &BuildContext, _target: &mut TargetSpec) -> Result<(), BuildError> {
        Ok(())
    }
}

pub fn register(registry: &mut Registry) -> Result<(), RegisterError> {
    registry.register_builder(
        NAME,
        vec![ArgSpec {
            name: "deps".to_string(),
            prop_type: PropType::TargetRefList,
            default: Some(PropValue::TargetRefList(Vec::new())),
        }],
        false,
        Box::new(AliasBuilder),
        "groups deps under one phony name",
    )?;
    registry.register_hook(NAME, Box::new(force_phony_name))?;
    Ok(())
}

fn force_phony_name(target: &mut TargetSpec) {
    if !target.name.is_phony() {
        target.name = ybt_core::QualifiedName::new(target.name.module(), format!("@{}", target.name.local()));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn forces_phony_prefix() {
        let mut t = TargetSpec::new(ybt_core::QualifiedName::new("mod", "grp"), NAME);
        force_phony_name(&mut t);
        assert!(t.name.is_phony());
        assert_eq!(t.name.local(), "@grp");
    }

    #[test]
    fn leaves_already_phony_name_alone() {
        let mut t = TargetSpec::new(ybt_core::QualifiedName::new("mod", "@grp"), NAME);
        force_phony_name(&mut t);
        assert_eq!(t.name.local(), "@grp");
    }

    #[test]
    fn not_cachable() {
        let mut registry = Registry::new();
        register(&mut registry).unwrap();
        assert!(!registry.is_cachable(NAME));
    }
}
