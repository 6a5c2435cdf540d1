//! Seeded crawler (spec §4.4).
//!
//! Grounded exactly on
//! `examples/original_source/yabt/graph.py::populate_targets_graph`: load
//! the project root build file, expand CLI seed selectors (or the default
//! target), repeatedly parse whatever build files the seeds' dependency
//! closure touches, prune anything left unreachable (plus anything tagged
//! `prune-me`), and hand the survivors to [`crate::graph::TargetGraph`].

use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::path::Path;

use snafu::{ensure, OptionExt, ResultExt, Snafu};
use tracing::instrument;

use crate::evaluator;
use crate::graph::TargetGraph;
use crate::name::{self, QualifiedName, Resolved};
use crate::registry::Registry;
use crate::spec::tags;

#[derive(Debug, Snafu)]
pub enum Error {
    #[snafu(display("{source}"))]
    Name { source: name::Error },

    #[snafu(display("{source}"))]
    Evaluate { source: evaluator::Error },

    #[snafu(display("target '{name}' is declared more than once"))]
    DuplicateTarget { name: String },

    #[snafu(display("don't know how to make '{name}'"))]
    UnknownTarget { name: String },

    #[snafu(display("no default target found, and no target selector specified"))]
    NoDefaultTarget,

    #[snafu(display("failed to walk project tree: {source}"))]
    WalkDir { source: walkdir::Error },
}

pub type Result<T> = std::result::Result<T, Error>;

/// Discover every build module under `project_root` (a build module is any
/// directory containing a file named `build_file_name`), mirroring
/// `generate_build_modules('.', conf)`.
fn discover_build_modules(project_root: &Path, build_file_name: &str) -> Result<Vec<String>> {
    let mut modules = Vec::new();
    for entry in walkdir::WalkDir::new(project_root) {
        let entry = entry.context(WalkDirSnafu)?;
        if entry.file_type().is_file() && entry.file_name() == build_file_name {
            let dir = entry.path().parent().unwrap_or(project_root);
            let rel = dir.strip_prefix(project_root).unwrap_or(dir);
            modules.push(rel.to_string_lossy().replace('\\', "/"));
        }
    }
    modules.sort();
    Ok(modules)
}

struct Crawler<'a> {
    registry: &'a Registry,
    project_root: &'a Path,
    build_file_name: &'a str,
    targets: BTreeMap<QualifiedName, crate::spec::TargetSpec>,
    targets_by_module: BTreeMap<String, Vec<QualifiedName>>,
    loaded_modules: BTreeSet<String>,
}

impl<'a> Crawler<'a> {
    fn build_file_path(&self, module: &str) -> std::path::PathBuf {
        if module.is_empty() {
            self.project_root.join(self.build_file_name)
        } else {
            self.project_root.join(module).join(self.build_file_name)
        }
    }

    fn load_module(&mut self, module: &str) -> Result<()> {
        if !self.loaded_modules.insert(module.to_string()) {
            return Ok(());
        }
        let path = self.build_file_path(module);
        if !path.is_file() {
            return Ok(());
        }
        let parsed = evaluator::evaluate_file(self.registry, &path, module).context(EvaluateSnafu)?;
        let mut names = Vec::with_capacity(parsed.len());
        for target in parsed {
            ensure!(
                !self.targets.contains_key(&target.name),
                DuplicateTargetSnafu { name: target.name.to_string() }
            );
            names.push(target.name.clone());
            self.targets.insert(target.name.clone(), target);
        }
        self.targets_by_module.insert(module.to_string(), names);
        Ok(())
    }
}

/// Crawl the project from `seed_selectors` (CLI target arguments), or from
/// the default target if none are given, and return the pruned target
/// graph (spec §4.4).
#[instrument(level = "trace", skip(registry), fields(project_root = %project_root.display()))]
pub fn crawl(
    registry: &Registry,
    project_root: &Path,
    build_file_name: &str,
    rel_work_dir: &str,
    seed_selectors: &[String],
    default_target_name: &str,
) -> Result<TargetGraph> {
    let mut crawler = Crawler {
        registry,
        project_root,
        build_file_name,
        targets: BTreeMap::new(),
        targets_by_module: BTreeMap::new(),
        loaded_modules: BTreeSet::new(),
    };

    crawler.load_module("")?;

    let mut targets_to_prune: BTreeSet<QualifiedName> = crawler.targets.keys().cloned().collect();

    let initial_seeds: VecDeque<Resolved> = if seed_selectors.is_empty() {
        let default = QualifiedName::new("", default_target_name);
        ensure!(crawler.targets.contains_key(&default), NoDefaultTargetSnafu);
        VecDeque::from([Resolved::Name(default)])
    } else {
        let mut out = VecDeque::new();
        for selector in seed_selectors {
            out.push_back(name::resolve_seed(selector, rel_work_dir).context(NameSnafu)?);
        }
        out
    };

    let mut queue = initial_seeds;
    let mut seeds_used_for_extending: BTreeSet<QualifiedName> = BTreeSet::new();

    while let Some(seed) = queue.pop_front() {
        match seed {
            Resolved::RecursiveWildcard => {
                for module in discover_build_modules(project_root, build_file_name)? {
                    queue.push_back(Resolved::ModuleWildcard(module));
                }
            }
            Resolved::ModuleWildcard(module) => {
                crawler.load_module(&module)?;
                if let Some(names) = crawler.targets_by_module.get(&module).cloned() {
                    for dep_name in &names {
                        targets_to_prune.remove(dep_name);
                        if let Some(target) = crawler.targets.get(dep_name) {
                            for dep in &target.deps {
                                queue.push_back(Resolved::Name(dep.clone()));
                            }
                        }
                    }
                }
            }
            Resolved::Name(target_name) => {
                if !crawler.targets.contains_key(&target_name) {
                    crawler.load_module(target_name.module())?;
                    ensure!(
                        crawler.targets.contains_key(&target_name),
                        UnknownTargetSnafu { name: target_name.to_string() }
                    );
                }
                targets_to_prune.remove(&target_name);
                if seeds_used_for_extending.insert(target_name.clone()) {
                    let deps = crawler.targets[&target_name].deps.clone();
                    for dep in deps {
                        queue.push_back(Resolved::Name(dep));
                    }
                }
            }
        }
    }

    for (name, target) in &crawler.targets {
        if target.tags.contains(tags::PRUNE_ME) {
            targets_to_prune.insert(name.clone());
        }
    }
    for name in &targets_to_prune {
        crawler.targets.remove(name);
    }

    // Phony (`@`-leading) targets never reach the executor (spec §3
    // invariant 5, §4.4 step 4(c)): an `alias` target groups its deps under
    // one name purely for crawling purposes, then disappears.
    crawler.targets.retain(|name, _| !name.is_phony());

    Ok(TargetGraph::build(crawler.targets))
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
            _target: &mut crate::spec::TargetSpec,
        ) -> std::result::Result<(), crate::scheduler::BuildError> {
            Ok(())
        }
    }

    fn registry() -> Registry {
        let mut r = Registry::new();
        r.register_builder(
            "generic",
            vec![
                ArgSpec {
                    name: "deps".into(),
                    prop_type: PropType::TargetRefList,
                    default: Some(crate::spec::PropValue::TargetRefList(vec![])),
                },
                ArgSpec { name: "cmd".into(), prop_type: PropType::Str, default: None },
            ],
            true,
            Box::new(NoopPlugin),
            "runs a shell command",
        )
        .unwrap();
        r
    }

    fn write(path: &Path, contents: &str) {
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(path, contents).unwrap();
    }

    #[test]
    fn crawls_from_default_target_and_prunes_unreached() {
        let dir = tempfile::tempdir().unwrap();
        write(
            &dir.path().join("BUILD.toml"),
            r#"
            [[target]]
            builder = "generic"
            name = "all"
            cmd = "true"
            deps = [":used"]

            [[target]]
            builder = "generic"
            name = "used"
            cmd = "true"

            [[target]]
            builder = "generic"
            name = "unused"
            cmd = "true"
            "#,
        );

        let registry = registry();
        let graph = crawl(&registry, dir.path(), "BUILD.toml", "", &[], "all").unwrap();
        assert!(graph.contains(&QualifiedName::new("", "all")));
        assert!(graph.contains(&QualifiedName::new("", "used")));
        assert!(!graph.contains(&QualifiedName::new("", "unused")));
    }

    #[test]
    fn phony_alias_target_is_pruned_from_the_final_graph() {
        let dir = tempfile::tempdir().unwrap();
        write(
            &dir.path().join("BUILD.toml"),
            r#"
            [[target]]
            builder = "generic"
            name = "all"
            cmd = "true"
            deps = [":@grp"]

            [[target]]
            builder = "generic"
            name = "@grp"
            cmd = "true"
            deps = [":leaf"]

            [[target]]
            builder = "generic"
            name = "leaf"
            cmd = "true"
            "#,
        );

        let registry = registry();
        let graph = crawl(&registry, dir.path(), "BUILD.toml", "", &[], "all").unwrap();
        assert!(graph.contains(&QualifiedName::new("", "all")));
        assert!(graph.contains(&QualifiedName::new("", "leaf")));
        assert!(!graph.contains(&QualifiedName::new("", "@grp")), "phony target must not reach the graph");
    }

    #[test]
    fn unknown_seed_target_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        write(&dir.path().join("BUILD.toml"), "");
        let registry = registry();
        let err = crawl(&registry, dir.path(), "BUILD.toml", "", &[":nope".to_string()], "all").unwrap_err();
        assert!(matches!(err, Error::UnknownTarget { .. }));
    }
}
