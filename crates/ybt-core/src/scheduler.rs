//! Ordered, scheduled execution with failure isolation (spec §4.11).
//!
//! The teacher schedules builds with a bounded `tokio` worker pool
//! (`twoliter/src/cmd/build.rs`, `twoliter/src/docker/image.rs`'s pull/build
//! calls), but the spec's concurrency model is deliberately simpler: a single
//! cooperative task walks the stable reverse-topological order one target at
//! a time, suspending only at external I/O (builder subprocess, cache
//! read/write). We keep the teacher's `tokio::process::Command` plumbing
//! (`tools/buildsys/src/builder.rs` runs docker via
//! `tokio::process::Command` and awaits its status) for the one real
//! suspension point a generic builder needs: `run_in_buildenv`.

use std::collections::{BTreeMap, BTreeSet};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use snafu::{ResultExt, Snafu};
use tracing::{debug, info, instrument, warn};

use crate::cache::local::LocalCache;
use crate::cache::GlobalCache;
use crate::fingerprint::{self, CacheKeys};
use crate::graph::TargetGraph;
use crate::name::QualifiedName;
use crate::registry::Registry;
use crate::spec::PropValue;

#[derive(Debug, Snafu)]
pub enum BuildError {
    #[snafu(display("builder '{builder_name}' failed for target '{target}': {reason}"))]
    BuilderFailed {
        builder_name: String,
        target: String,
        reason: String,
    },

    #[snafu(display("failed to spawn build command '{cmd}': {source}"))]
    Spawn { cmd: String, source: std::io::Error },

    #[snafu(display("build command '{cmd}' exited with status {status}"))]
    NonZeroExit { cmd: String, status: i32 },

    #[snafu(display("local cache error: {source}"))]
    Cache { source: crate::cache::local::Error },

    #[snafu(display("artifact error: {source}"))]
    Artifact { source: crate::artifact::Error },

    #[snafu(display("failed to fingerprint target: {source}"))]
    Fingerprint { source: crate::fingerprint::Error },
}

pub type Result<T> = std::result::Result<T, BuildError>;

/// The per-build surface a plug-in's `build` function receives (spec §6.1
/// "build_context"). Carries enough of the project to stage deps' artifacts
/// and run build commands, but intentionally does not expose the whole
/// target graph -- a builder only ever sees its own target and its direct
/// deps' already-built artifacts.
pub struct BuildContext {
    pub project_root: PathBuf,
    pub workspace_dir: PathBuf,
    pub local_cache: Arc<LocalCache>,
    pub global_cache: Option<Arc<dyn GlobalCache>>,
}

impl BuildContext {
    /// Run a command inside the target's scratch workspace dir (spec §6.1:
    /// "run_in_buildenv(cmd) -- runs a command... in the target's build
    /// environment"), mirroring `buildsys`'s pattern of awaiting a
    /// `tokio::process::Command` and mapping a non-zero exit to a typed
    /// error rather than panicking.
    #[instrument(level = "trace", skip(self), fields(workspace = %self.workspace_dir.display()))]
    pub async fn run_in_buildenv(&self, cmd: &str) -> Result<()> {
        let status = tokio::process::Command::new("sh")
            .arg("-c")
            .arg(cmd)
            .current_dir(&self.workspace_dir)
            .status()
            .await
            .context(SpawnSnafu { cmd: cmd.to_string() })?;
        if !status.success() {
            return NonZeroExitSnafu {
                cmd: cmd.to_string(),
                status: status.code().unwrap_or(-1),
            }
            .fail();
        }
        Ok(())
    }
}

/// The outcome of attempting to realize one target (spec §4.11).
#[derive(Debug, Clone)]
pub enum Outcome {
    /// Restored from the local or global cache; the builder never ran.
    CacheHit,
    /// Already present in a cached base image; neither the builder nor the
    /// cache was consulted (spec §4.10, §4.11 step 1).
    Prebuilt,
    /// The builder ran and produced artifacts.
    Built,
    /// Not attempted because a dependency failed or was itself skipped
    /// (spec §4.11 "failure isolation": a target's failure only poisons its
    /// transitive dependents, independent branches still build -- this only
    /// applies when `continue_after_fail` is set).
    Skipped { because: QualifiedName },
    Failed(String),
}

/// Execute every target in `graph` in stable reverse-topological order
/// (spec §4.11).
pub struct Scheduler<'a> {
    registry: &'a Registry,
    continue_after_fail: bool,
    prebuilt: BTreeSet<QualifiedName>,
}

impl<'a> Scheduler<'a> {
    pub fn new(registry: &'a Registry) -> Self {
        Self { registry, continue_after_fail: false, prebuilt: BTreeSet::new() }
    }

    /// Keep scheduling independent branches after a builder failure instead
    /// of aborting the whole run (spec §4.11 step 6, §5 Cancellation, §7
    /// `BuilderFailed`: "fatal unless `continue_after_fail`").
    pub fn with_continue_after_fail(mut self, continue_after_fail: bool) -> Self {
        self.continue_after_fail = continue_after_fail;
        self
    }

    /// Targets already satisfied by a cached base image (spec §4.10); the
    /// scheduler skips them entirely rather than hashing or building them.
    pub fn with_prebuilt_targets(mut self, prebuilt: BTreeSet<QualifiedName>) -> Self {
        self.prebuilt = prebuilt;
        self
    }

    #[instrument(level = "trace", skip_all)]
    pub async fn run(
        &self,
        graph: &mut TargetGraph,
        ctx_for: impl Fn(&QualifiedName) -> BuildContext,
    ) -> std::result::Result<BTreeMap<QualifiedName, Outcome>, crate::graph::Error> {
        let order = graph.stable_reverse_topological_sort()?;
        let mut outcomes: BTreeMap<QualifiedName, Outcome> = BTreeMap::new();
        let mut combined_hashes: BTreeMap<QualifiedName, String> = BTreeMap::new();

        for name in order {
            let deps: Vec<QualifiedName> = graph.deps_of(&name).to_vec();
            let poisoning_dep = deps.iter().find(|dep| {
                matches!(outcomes.get(*dep), Some(Outcome::Failed(_)) | Some(Outcome::Skipped { .. }))
            });
            if let Some(dep) = poisoning_dep {
                warn!(target = %name, because = %dep, "skipping target: dependency did not build");
                outcomes.insert(name, Outcome::Skipped { because: dep.clone() });
                continue;
            }

            if self.prebuilt.contains(&name) {
                debug!(target = %name, "skipping target: already contained in a cached base image");
                outcomes.insert(name, Outcome::Prebuilt);
                continue;
            }

            let builder_name = graph.get(&name).map(|t| t.builder_name.clone()).unwrap_or_default();
            let Some(plugin) = self.registry.plugin(&builder_name) else {
                let reason = format!("unknown builder '{builder_name}'");
                outcomes.insert(name, Outcome::Failed(reason));
                if !self.continue_after_fail {
                    return Ok(outcomes);
                }
                continue;
            };

            let ctx = ctx_for(&name);
            let cachable = self.registry.is_cachable(&builder_name);

            // Compute this target's cache key ahead of invoking the builder
            // (spec §4.6/§4.8): digest its declared source files, fold in its
            // already-computed deps' combined hashes, and check the local
            // cache before ever running the plug-in.
            let (self_hash, combined) = match compute_hashes(graph, &name, &ctx.project_root, &combined_hashes) {
                Ok(h) => h,
                Err(e) => {
                    warn!(target = %name, error = %e, "failed to fingerprint target");
                    outcomes.insert(name.clone(), Outcome::Failed(e.to_string()));
                    if !self.continue_after_fail {
                        return Ok(outcomes);
                    }
                    continue;
                }
            };
            combined_hashes.insert(name.clone(), combined.clone());

            if cachable && ctx.local_cache.contains(&combined) {
                match ctx.local_cache.restore_artifacts(&combined, &ctx.project_root) {
                    Ok(restored) => {
                        debug!(target = %name, combined_hash = %combined, "local cache hit");
                        ctx.local_cache.touch(&combined).ok();
                        if let Some(target) = graph.get_mut(&name) {
                            target.artifacts = restored;
                            target.cache_keys = Some(CacheKeys { self_hash, combined_hash: combined });
                        }
                        outcomes.insert(name, Outcome::CacheHit);
                        continue;
                    }
                    Err(e) => {
                        warn!(target = %name, error = %e, "cache entry present but could not be restored, rebuilding");
                    }
                }
            }

            // Local miss: consult the global tier before ever invoking the
            // builder (spec §4.9 "Scheduler consults the global cache on a
            // local miss; on hit it populates the local cache").
            if cachable {
                if let Some(global) = ctx.global_cache.as_ref() {
                    match global.get(&combined).await {
                        Ok(Some(bundle)) => match ctx.local_cache.populate_from_bundle(&combined, &bundle) {
                            Ok(()) => match ctx.local_cache.restore_artifacts(&combined, &ctx.project_root) {
                                Ok(restored) => {
                                    debug!(target = %name, combined_hash = %combined, "global cache hit");
                                    if let Some(target) = graph.get_mut(&name) {
                                        target.artifacts = restored;
                                        target.cache_keys = Some(CacheKeys { self_hash, combined_hash: combined });
                                    }
                                    outcomes.insert(name, Outcome::CacheHit);
                                    continue;
                                }
                                Err(e) => {
                                    warn!(target = %name, error = %e, "failed to restore artifacts mirrored from the global cache, rebuilding");
                                }
                            },
                            Err(e) => {
                                warn!(target = %name, error = %e, "failed to populate local cache from global cache, rebuilding");
                            }
                        },
                        Ok(None) => {}
                        Err(e) => {
                            warn!(target = %name, error = %e, "global cache unavailable, building");
                        }
                    }
                }
            }

            let Some(target) = graph.get_mut(&name) else { continue };
            info!(target = %name, builder = %builder_name, "building");
            let started = Instant::now();
            match plugin.build(&ctx, target).await {
                Ok(()) => {
                    let build_time_secs = started.elapsed().as_secs_f64();
                    target.cache_keys = Some(CacheKeys { self_hash, combined_hash: combined.clone() });
                    if cachable {
                        let project_root = ctx.project_root.clone();
                        // `Image` artifacts name a docker image ref, not a
                        // path under the project root -- they are tracked by
                        // the prebuilt-image classifier, not hard-linked into
                        // the filesystem cache.
                        let artifact_files: Vec<(crate::artifact::ArtifactKind, PathBuf, PathBuf)> = target
                            .artifacts
                            .all()
                            .iter()
                            .filter(|(kind, _)| **kind != crate::artifact::ArtifactKind::Image)
                            .flat_map(|(kind, map)| {
                                let project_root = project_root.clone();
                                map.iter().map(move |(dst, src)| {
                                    (kind.clone(), dst.clone(), project_root.join(src))
                                })
                            })
                            .collect();
                        if let Err(e) =
                            ctx.local_cache.put(&combined, &target.canonical_json(), &artifact_files, build_time_secs)
                        {
                            warn!(target = %name, error = %e, "failed to write local cache entry");
                        } else if let Some(global) = ctx.global_cache.as_ref() {
                            match ctx.local_cache.bundle(&combined) {
                                Ok(Some(bundle)) => {
                                    crate::cache::global::best_effort_upload(global.as_ref(), &combined, &bundle)
                                        .await;
                                }
                                Ok(None) => {}
                                Err(e) => warn!(target = %name, error = %e, "failed to package cache entry for upload"),
                            }
                        }
                    }
                    outcomes.insert(name, Outcome::Built);
                }
                Err(e) => {
                    warn!(target = %name, error = %e, "build failed");
                    outcomes.insert(name.clone(), Outcome::Failed(e.to_string()));
                    if !self.continue_after_fail {
                        return Ok(outcomes);
                    }
                }
            }
        }

        Ok(outcomes)
    }
}

/// Digest a target's declared source files (any `FilePath`/`FilePathList`
/// prop value, resolved against the project root) and fold them into its
/// self hash and combined hash (spec §4.6). Deps are assumed already present
/// in `combined_hashes`, which holds since we walk in stable reverse-
/// topological order.
#[instrument(level = "trace", skip_all, fields(target = %name))]
fn compute_hashes(
    graph: &TargetGraph,
    name: &QualifiedName,
    project_root: &std::path::Path,
    combined_hashes: &BTreeMap<QualifiedName, String>,
) -> Result<(String, String)> {
    let target = graph.get(name).expect("target present in graph during scheduling");

    let mut source_digests = Vec::new();
    for value in target.props.values() {
        match value {
            PropValue::FilePath(p) => {
                source_digests.push(fingerprint::digest_path(&project_root.join(p)).context(FingerprintSnafu)?);
            }
            PropValue::FilePathList(paths) => {
                for p in paths {
                    source_digests
                        .push(fingerprint::digest_path(&project_root.join(p)).context(FingerprintSnafu)?);
                }
            }
            _ => {}
        }
    }

    let self_hash = fingerprint::self_hash(target, &source_digests);
    let dep_hashes: Vec<String> = target
        .deps
        .iter()
        .map(|dep| {
            combined_hashes
                .get(dep)
                .cloned()
                .unwrap_or_else(|| "sha256:unknown".to_string())
        })
        .collect();
    let combined = fingerprint::combined_hash(&self_hash, dep_hashes);
    Ok((self_hash, combined))
}
