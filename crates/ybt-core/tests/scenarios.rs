//! End-to-end scenario tests exercising the crawler, graph, scheduler, and
//! local cache together, modeled on the worked examples in the original
//! specification (simple build+cache, local-edit invalidation, and
//! fail-and-continue scheduling).

use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;

use ybt_core::artifact::ArtifactKind;
use ybt_core::cache::local::LocalCache;
use ybt_core::registry::{ArgSpec, BuilderPlugin, Registry};
use ybt_core::scheduler::{BuildContext, BuildError, Outcome, Scheduler};
use ybt_core::spec::{PropType, PropValue, TargetSpec};
use ybt_core::test_support::scratch_project;

/// A builder that "compiles" its declared `src` file by copying it into the
/// target's workspace dir and recording the result as an `App` artifact.
/// Counts invocations so tests can assert a cache hit never re-ran it.
struct CountingBuilder {
    invocations: Arc<AtomicUsize>,
}

#[async_trait]
impl BuilderPlugin for CountingBuilder {
    async fn build(&self, ctx: &BuildContext, target: &mut TargetSpec) -> Result<(), BuildError> {
        self.invocations.fetch_add(1, Ordering::SeqCst);
        let src = match target.props.get("src") {
            Some(PropValue::FilePath(p)) => p.clone(),
            _ => PathBuf::new(),
        };
        let out = ctx.workspace_dir.join("output");
        std::fs::create_dir_all(&ctx.workspace_dir).unwrap();
        let contents = std::fs::read(ctx.project_root.join(&src)).unwrap_or_default();
        std::fs::write(&out, contents).unwrap();
        let rel = out.strip_prefix(&ctx.project_root).unwrap_or(&out).to_path_buf();
        target
            .artifacts
            .add(ArtifactKind::App, rel.clone(), rel)
            .map_err(|source| BuildError::Artifact { source })?;
        Ok(())
    }
}

/// A builder whose failure is controlled by a `should_fail` bool prop, used
/// to exercise failure isolation.
struct MaybeFailBuilder;

#[async_trait]
impl BuilderPlugin for MaybeFailBuilder {
    async fn build(&self, _ctx: &BuildContext, target: &mut TargetSpec) -> Result<(), BuildError> {
        let should_fail = target.props.get("should_fail").and_then(PropValue::as_bool).unwrap_or(false);
        if should_fail {
            return Err(BuildError::BuilderFailed {
                builder_name: "maybe-fail".to_string(),
                target: target.name.to_string(),
                reason: "told to fail".to_string(),
            });
        }
        Ok(())
    }
}

fn registry_with_counting_builder() -> (Registry, Arc<AtomicUsize>) {
    let invocations = Arc::new(AtomicUsize::new(0));
    let mut registry = Registry::new();
    registry
        .register_builder(
            "counting",
            vec![
                ArgSpec {
                    name: "deps".to_string(),
                    prop_type: PropType::TargetRefList,
                    default: Some(PropValue::TargetRefList(Vec::new())),
                },
                ArgSpec { name: "src".to_string(), prop_type: PropType::FilePath, default: None },
            ],
            true,
            Box::new(CountingBuilder { invocations: invocations.clone() }),
            "copies its src file into the workspace",
        )
        .unwrap();
    (registry, invocations)
}

fn registry_with_maybe_fail_builder() -> Registry {
    let mut registry = Registry::new();
    registry
        .register_builder(
            "maybe-fail",
            vec![
                ArgSpec {
                    name: "deps".to_string(),
                    prop_type: PropType::TargetRefList,
                    default: Some(PropValue::TargetRefList(Vec::new())),
                },
                ArgSpec {
                    name: "should_fail".to_string(),
                    prop_type: PropType::Bool,
                    default: Some(PropValue::Bool(false)),
                },
            ],
            false,
            Box::new(MaybeFailBuilder),
            "fails if told to",
        )
        .unwrap();
    registry
}

fn ctx_for(project_root: &std::path::Path, local_cache: &Arc<LocalCache>) -> impl Fn(&ybt_core::QualifiedName) -> BuildContext {
    let project_root = project_root.to_path_buf();
    let local_cache = local_cache.clone();
    move |name| {
        let safe_name = name.to_string().replace([':', '/'], "_");
        let workspace_dir = project_root.join(".ybt/work").join(safe_name);
        let _ = std::fs::create_dir_all(&workspace_dir);
        BuildContext {
            project_root: project_root.clone(),
            workspace_dir,
            local_cache: local_cache.clone(),
            global_cache: None,
        }
    }
}

/// S1 — simple build+cache: first run builds and caches; second run with
/// unchanged sources hits the cache with zero builder invocations.
#[tokio::test]
async fn s1_unchanged_sources_are_cache_hits_on_second_run() {
    let (registry, invocations) = registry_with_counting_builder();
    let project = scratch_project(&[
        (
            "BUILD.toml",
            r#"
            [[target]]
            builder = "counting"
            name = "lib"
            src = "lib.txt"

            [[target]]
            builder = "counting"
            name = "app"
            src = "app.txt"
            deps = [":lib"]
            "#,
        ),
        ("lib.txt", "library source"),
        ("app.txt", "app source"),
    ]);
    let root = project.root();

    let mut graph = ybt_core::crawler::crawl(&registry, &root, "BUILD.toml", "", &[], "app").unwrap();
    let local_cache = Arc::new(LocalCache::new(root.join(".ybt/cache")));
    let scheduler = Scheduler::new(&registry);

    let outcomes = scheduler.run(&mut graph, ctx_for(&root, &local_cache)).await.unwrap();
    assert_eq!(invocations.load(Ordering::SeqCst), 2);
    assert!(matches!(outcomes[&ybt_core::QualifiedName::new("", "lib")], Outcome::Built));
    assert!(matches!(outcomes[&ybt_core::QualifiedName::new("", "app")], Outcome::Built));

    // Second run: re-crawl (fresh graph, as a real CLI invocation would) and
    // run again with the same sources untouched.
    let mut graph2 = ybt_core::crawler::crawl(&registry, &root, "BUILD.toml", "", &[], "app").unwrap();
    let outcomes2 = scheduler.run(&mut graph2, ctx_for(&root, &local_cache)).await.unwrap();
    assert_eq!(invocations.load(Ordering::SeqCst), 2, "builder must not run again on a cache hit");
    assert!(matches!(outcomes2[&ybt_core::QualifiedName::new("", "lib")], Outcome::CacheHit));
    assert!(matches!(outcomes2[&ybt_core::QualifiedName::new("", "app")], Outcome::CacheHit));
}

/// S2 (simplified) — editing a leaf's source invalidates it and everything
/// that depends on it, while an unrelated sibling target stays cached.
#[tokio::test]
async fn s2_editing_a_source_invalidates_only_its_dependents() {
    let (registry, invocations) = registry_with_counting_builder();
    let project = scratch_project(&[
        (
            "BUILD.toml",
            r#"
            [[target]]
            builder = "counting"
            name = "lib-a"
            src = "a.txt"

            [[target]]
            builder = "counting"
            name = "app"
            src = "app.txt"
            deps = [":lib-a"]

            [[target]]
            builder = "counting"
            name = "sibling"
            src = "sibling.txt"
            "#,
        ),
        ("a.txt", "original"),
        ("app.txt", "app source"),
        ("sibling.txt", "unrelated"),
    ]);
    let root = project.root();
    let local_cache = Arc::new(LocalCache::new(root.join(".ybt/cache")));
    let scheduler = Scheduler::new(&registry);

    // `app` only reaches `lib-a`; crawl `sibling` explicitly too so it is
    // present in every run.
    let mut graph_all = ybt_core::crawler::crawl(
        &registry,
        &root,
        "BUILD.toml",
        "",
        &[":app".to_string(), ":sibling".to_string()],
        "app",
    )
    .unwrap();
    scheduler.run(&mut graph_all, ctx_for(&root, &local_cache)).await.unwrap();
    assert_eq!(invocations.load(Ordering::SeqCst), 3);

    std::fs::write(root.join("a.txt"), "edited").unwrap();

    let mut graph2 = ybt_core::crawler::crawl(
        &registry,
        &root,
        "BUILD.toml",
        "",
        &[":app".to_string(), ":sibling".to_string()],
        "app",
    )
    .unwrap();
    let outcomes2 = scheduler.run(&mut graph2, ctx_for(&root, &local_cache)).await.unwrap();

    assert!(matches!(outcomes2[&ybt_core::QualifiedName::new("", "lib-a")], Outcome::Built));
    assert!(matches!(outcomes2[&ybt_core::QualifiedName::new("", "app")], Outcome::Built));
    assert!(matches!(outcomes2[&ybt_core::QualifiedName::new("", "sibling")], Outcome::CacheHit));
    assert_eq!(invocations.load(Ordering::SeqCst), 5, "only lib-a and app should have rebuilt");
}

fn fail_continue_project() -> ybt_core::test_support::ScratchProject {
    scratch_project(&[(
        "BUILD.toml",
        r#"
        [[target]]
        builder = "maybe-fail"
        name = "a"
        should_fail = true

        [[target]]
        builder = "maybe-fail"
        name = "c"
        deps = [":a"]

        [[target]]
        builder = "maybe-fail"
        name = "b"

        [[target]]
        builder = "maybe-fail"
        name = "d"
        deps = [":b"]

        [[target]]
        builder = "maybe-fail"
        name = "all"
        deps = [":c", ":d"]
        "#,
    )])
}

/// S4 — fail+continue: with `A -> C` and `B -> D` (arrows meaning "is a dep
/// of"), `A` fails. With `continue_after_fail` set, `C` is skipped as
/// poisoned, but the independent `B`/`D` branch still builds to completion.
#[tokio::test]
async fn s4_continue_after_fail_isolates_only_its_own_dependents() {
    let registry = registry_with_maybe_fail_builder();
    let project = fail_continue_project();
    let root = project.root();
    let local_cache = Arc::new(LocalCache::new(root.join(".ybt/cache")));
    let scheduler = Scheduler::new(&registry).with_continue_after_fail(true);

    let mut graph = ybt_core::crawler::crawl(&registry, &root, "BUILD.toml", "", &[], "all").unwrap();
    let outcomes = scheduler.run(&mut graph, ctx_for(&root, &local_cache)).await.unwrap();

    assert!(matches!(outcomes[&ybt_core::QualifiedName::new("", "a")], Outcome::Failed(_)));
    assert!(matches!(outcomes[&ybt_core::QualifiedName::new("", "c")], Outcome::Skipped { .. }));
    assert!(matches!(outcomes[&ybt_core::QualifiedName::new("", "b")], Outcome::Built));
    assert!(matches!(outcomes[&ybt_core::QualifiedName::new("", "d")], Outcome::Built));
    assert!(matches!(outcomes[&ybt_core::QualifiedName::new("", "all")], Outcome::Skipped { .. }));
}

/// S4b — without `continue_after_fail` (the default), `A`'s failure aborts
/// the whole run immediately: no other target is even attempted.
#[tokio::test]
async fn s4b_failure_aborts_the_run_by_default() {
    let registry = registry_with_maybe_fail_builder();
    let project = fail_continue_project();
    let root = project.root();
    let local_cache = Arc::new(LocalCache::new(root.join(".ybt/cache")));
    let scheduler = Scheduler::new(&registry);

    let mut graph = ybt_core::crawler::crawl(&registry, &root, "BUILD.toml", "", &[], "all").unwrap();
    let outcomes = scheduler.run(&mut graph, ctx_for(&root, &local_cache)).await.unwrap();

    assert!(matches!(outcomes[&ybt_core::QualifiedName::new("", "a")], Outcome::Failed(_)));
    assert_eq!(outcomes.len(), 1, "no other target should have been attempted: {outcomes:?}");
}

/// S6 — ambiguous name: a bare, colon-less dep string is rejected rather
/// than silently guessed at.
#[test]
fn s6_bare_dep_name_is_ambiguous() {
    let registry = registry_with_maybe_fail_builder();
    let project = scratch_project(&[(
        "BUILD.toml",
        r#"
        [[target]]
        builder = "maybe-fail"
        name = "users"

        [[target]]
        builder = "maybe-fail"
        name = "all"
        deps = ["users"]
        "#,
    )]);
    let root = project.root();
    let err = ybt_core::crawler::crawl(&registry, &root, "BUILD.toml", "", &[], "all").unwrap_err();
    let message = err.to_string();
    assert!(message.contains("users"), "error should reference the offending string: {message}");
}
