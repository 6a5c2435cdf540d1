//! The `docker-image` builder: builds a container image from a base image
//! plus staged `app`/`binary` artifacts of its deps. Grounded on
//! `examples/original_source/yabt/builders/dockerapp.py`
//! (`register_app_builder_sig`, `build_app_docker_and_bin`) and on the
//! teacher's own image-building flow in `tools/buildsys/src/builder.rs`
//! (stage a build context directory, then run `docker build` via
//! `tokio::process::Command`).

use async_trait::async_trait;
use ybt_core::artifact::ArtifactKind;
use ybt_core::registry::{ArgSpec, BuilderPlugin, RegisterError, Registry};
use ybt_core::scheduler::{BuildContext, BuildError};
use ybt_core::spec::{PropType, PropValue, TargetSpec};

pub const NAME: &str = "docker-image";

struct DockerImageBuilder;

#[async_trait]
impl BuilderPlugin for DockerImageBuilder {
    async fn build(&self, ctx: &BuildContext, target: &mut TargetSpec) -> Result<(), BuildError> {
        let image_tag = target
            .props
            .get("image_tag")
            .and_then(PropValue::as_str)
            .unwrap_or("latest")
            .to_string();
        let image_name = target
            .props
            .get("image_name")
            .and_then(PropValue::as_str)
            .map(str::to_string)
            .unwrap_or_else(|| target.name.local().to_string());

        let stage_dir = ctx.workspace_dir.join("image-root");
        target
            .artifacts
            .link_for_image(&ctx.project_root, &stage_dir)
            .map_err(|source| BuildError::Artifact { source })?;

        tracing::info!(target = %target.name, image = %image_name, tag = %image_tag, "building docker image");
        ctx.run_in_buildenv(&format!(
            "docker build -t {image_name}:{image_tag} {}",
            stage_dir.display()
        ))
        .await?;

        target
            .artifacts
            .add(ArtifactKind::Image, stage_dir, format!("{image_name}:{image_tag}"))
            .map_err(|source| BuildError::Artifact { source })?;
        Ok(())
    }
}

pub fn register(registry: &mut Registry) -> Result<(), RegisterError> {
    registry.register_builder(
        NAME,
        vec![
            ArgSpec { name: "deps".to_string(), prop_type: PropType::TargetRefList, default: Some(PropValue::TargetRefList(Vec::new())) },
            ArgSpec { name: "base_image".to_string(), prop_type: PropType::TargetRef, default: None },
            ArgSpec { name: "image_name".to_string(), prop_type: PropType::Str, default: Some(PropValue::Str(String::new())) },
            ArgSpec {
                name: "image_tag".to_string(),
                prop_type: PropType::Str,
                default: Some(PropValue::Str("latest".to_string())),
            },
            ArgSpec {
                name: "work_dir".to_string(),
                prop_type: PropType::Str,
                default: Some(PropValue::Str("/usr/src/app".to_string())),
            },
        ],
        true,
        Box::new(DockerImageBuilder),
        "builds a container image from a base image plus its deps' staged artifacts",
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
        assert!(sig.slot("base_image").is_some());
        assert_eq!(sig.slot("image_tag").unwrap().default.as_ref().unwrap().as_str(), Some("latest"));
    }
}
