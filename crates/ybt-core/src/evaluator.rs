//! Build-file evaluator (spec §4.2).
//!
//! Build files are declarative TOML, one `[[target]]` array-of-tables entry
//! per target call, in the same spirit as the teacher's own manifests
//! (`Twoliter.toml`, `Cargo.toml` `[package.metadata.build-*]` tables
//! parsed in `buildsys-config/src/lib.rs`): no arbitrary code execution, a
//! fixed schema, parsed once per file with `toml::from_str`. A `builder`
//! key names the plug-in; an optional `args` array supplies positional
//! values in signature order; every other key is a keyword argument.
//!
//! Grounded on `examples/original_source/yabt/buildfile_parser.py`
//! (`process_build_file`, which walks a build file's statements and calls
//! `extractor` once per builder invocation) -- reshaped from "exec a Python
//! file" into "parse a TOML document", per `SPEC_FULL.md`'s Design Notes.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use snafu::{ResultExt, Snafu};
use tracing::instrument;

use crate::registry::{self, Call, RawValue, Registry};
use crate::spec::TargetSpec;

#[derive(Debug, Snafu)]
pub enum Error {
    #[snafu(display("failed to read build file '{}': {source}", path.display()))]
    ReadFile { path: PathBuf, source: std::io::Error },

    #[snafu(display("failed to parse build file '{}': {source}", path.display()))]
    ParseToml { path: PathBuf, source: toml::de::Error },

    #[snafu(display("build file '{}' entry {index} is missing a 'builder' key", path.display()))]
    MissingBuilderKey { path: PathBuf, index: usize },

    #[snafu(display("build file '{}' entry {index} ('{builder_name}'): {source}", path.display()))]
    Extract {
        path: PathBuf,
        index: usize,
        builder_name: String,
        source: registry::ExtractError,
    },
}

pub type Result<T> = std::result::Result<T, Error>;

/// Parse and extract every target call in one build file.
/// `current_module` is the slash-separated module path the file lives at
/// (empty string for the project root).
#[instrument(level = "trace", skip(registry), fields(path = %path.display()))]
pub fn evaluate_file(registry: &Registry, path: &Path, current_module: &str) -> Result<Vec<TargetSpec>> {
    let text = std::fs::read_to_string(path).context(ReadFileSnafu { path: path.to_path_buf() })?;
    let doc: BuildFile = toml::from_str(&text).context(ParseTomlSnafu { path: path.to_path_buf() })?;

    let mut targets = Vec::with_capacity(doc.target.len());
    for (index, mut fields) in doc.target.into_iter().enumerate() {
        let builder_name = match fields.remove("builder") {
            Some(toml::Value::String(s)) => s,
            _ => return MissingBuilderKeySnafu { path: path.to_path_buf(), index }.fail(),
        };

        let positional = match fields.remove("args") {
            Some(toml::Value::Array(items)) => items.into_iter().map(toml_to_raw).collect(),
            _ => Vec::new(),
        };
        let keyword: BTreeMap<String, RawValue> =
            fields.into_iter().map(|(k, v)| (k, toml_to_raw(v))).collect();

        let call = Call { positional, keyword };
        let target = registry::extract(registry, &builder_name, current_module, call).context(ExtractSnafu {
            path: path.to_path_buf(),
            index,
            builder_name,
        })?;
        targets.push(target);
    }
    Ok(targets)
}

#[derive(Debug, serde::Deserialize)]
struct BuildFile {
    #[serde(default)]
    target: Vec<BTreeMap<String, toml::Value>>,
}

fn toml_to_raw(value: toml::Value) -> RawValue {
    match value {
        toml::Value::String(s) => RawValue::Str(s),
        toml::Value::Integer(i) => RawValue::Number(i as f64),
        toml::Value::Float(f) => RawValue::Number(f),
        toml::Value::Boolean(b) => RawValue::Bool(b),
        toml::Value::Array(items) => RawValue::List(items.into_iter().map(toml_to_raw).collect()),
        toml::Value::Table(map) => {
            RawValue::Mapping(map.into_iter().map(|(k, v)| (k, toml_to_raw(v))).collect())
        }
        toml::Value::Datetime(dt) => RawValue::Str(dt.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::{ArgSpec, BuilderPlugin};
    use crate::spec::PropType;
    use async_trait::async_trait;

    struct NoopPlugin;

    #[async_trait]
    impl BuilderPlugin for NoopPlugin {
        async fn build(
            &self,
            _ctx: &crate::scheduler::BuildContext,
            _target: &mut TargetSpec,
        ) -> std::result::Result<(), crate::scheduler::BuildError> {
            Ok(())
        }
    }

    fn registry() -> Registry {
        let mut r = Registry::new();
        r.register_builder(
            "generic",
            vec![
                ArgSpec { name: "deps".into(), prop_type: PropType::TargetRefList, default: Some(crate::spec::PropValue::TargetRefList(vec![])) },
                ArgSpec { name: "cmd".into(), prop_type: PropType::Str, default: None },
            ],
            true,
            Box::new(NoopPlugin),
            "runs a shell command",
        )
        .unwrap();
        r
    }

    #[test]
    fn evaluates_a_simple_build_file() {
        let registry = registry();
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("BUILD.toml");
        std::fs::write(
            &path,
            r#"
            [[target]]
            builder = "generic"
            name = "foo"
            cmd = "echo hi"
            deps = [":bar"]

            [[target]]
            builder = "generic"
            name = "bar"
            cmd = "echo bye"
            "#,
        )
        .unwrap();

        let targets = evaluate_file(&registry, &path, "mod").unwrap();
        assert_eq!(targets.len(), 2);
        assert_eq!(targets[0].name.local(), "foo");
        assert_eq!(targets[0].deps[0].local(), "bar");
    }

    #[test]
    fn missing_builder_key_is_an_error() {
        let registry = registry();
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("BUILD.toml");
        std::fs::write(&path, "[[target]]\nname = \"foo\"\n").unwrap();
        let err = evaluate_file(&registry, &path, "mod").unwrap_err();
        assert!(matches!(err, Error::MissingBuilderKey { .. }));
    }
}
