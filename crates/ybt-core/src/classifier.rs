//! Image-Cache Classifier (spec §4.10).
//!
//! Grounded exactly on
//! `examples/original_source/yabt/caching.py::get_prebuilt_targets`: for
//! every `Image` target, deps-of-cached-base-images go into `contained`,
//! deps-needed-by-images-being-built-but-absent-from-their-base-image go
//! into `required`, and the final pre-built set is `contained - required`.
//! `CachedDescendants` (here [`crate::graph::CachedDescendants`]) backs the
//! per-target descendant lookups so a target with many image consumers only
//! has its descendant set computed once.

use std::collections::BTreeSet;

use crate::artifact::ArtifactKind;
use crate::graph::{CachedDescendants, TargetGraph};
use crate::name::QualifiedName;

/// Whether a target's base image is already present in some image cache, and
/// if so, under what tag. This is the one piece of state the classifier
/// cannot compute itself -- it depends on a registry or local docker daemon,
/// both external collaborators (spec §6) -- so it is injected.
pub trait BaseImageLookup {
    fn is_base_image_cached(&self, image_target: &QualifiedName) -> bool;
}

/// Compute the pre-built set: targets that can be skipped during build
/// because they are already contained in a cached base image, and are not
/// separately required by an image that still needs to be built fresh
/// (spec §4.10).
pub fn get_prebuilt_targets(graph: &TargetGraph, lookup: &dyn BaseImageLookup) -> BTreeSet<QualifiedName> {
    let mut contained: BTreeSet<QualifiedName> = BTreeSet::new();
    let mut required: BTreeSet<QualifiedName> = BTreeSet::new();
    let cached_descendants = CachedDescendants::new();

    for (name, target) in graph.targets() {
        if target.artifacts.get(ArtifactKind::Image).is_none() && target.builder_name != "docker-image" {
            continue;
        }

        let image_deps = match cached_descendants.get(graph, name) {
            Ok(set) => set,
            Err(_) => continue,
        };

        if lookup.is_base_image_cached(name) {
            contained.extend(image_deps);
        } else if let Some(base_image) = target.buildenv.as_ref().or_else(|| base_image_dep(target)) {
            let base_deps = cached_descendants.get(graph, base_image).unwrap_or_default();
            required.extend(image_deps.difference(&base_deps).cloned());
        } else {
            required.extend(image_deps);
        }
    }

    contained.difference(&required).cloned().collect()
}

fn base_image_dep(target: &crate::spec::TargetSpec) -> Option<&QualifiedName> {
    match target.props.get("base_image") {
        Some(crate::spec::PropValue::TargetRef(name)) => Some(name),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::spec::{PropValue, TargetSpec};
    use std::collections::BTreeMap;

    struct FakeLookup {
        cached: BTreeSet<QualifiedName>,
    }

    impl BaseImageLookup for FakeLookup {
        fn is_base_image_cached(&self, image_target: &QualifiedName) -> bool {
            self.cached.contains(image_target)
        }
    }

    fn n(local: &str) -> QualifiedName {
        QualifiedName::new("", local)
    }

    fn image_target(local: &str, base: Option<&str>, deps: &[&str]) -> TargetSpec {
        let mut t = TargetSpec::new(n(local), "docker-image");
        if let Some(b) = base {
            t.props.insert("base_image".into(), PropValue::TargetRef(n(b)));
        }
        for d in deps {
            t.push_dep(n(d));
        }
        t
    }

    fn leaf(local: &str) -> TargetSpec {
        TargetSpec::new(n(local), "generic")
    }

    #[test]
    fn contained_minus_required() {
        let mut targets = BTreeMap::new();
        targets.insert(n("base"), image_target("base", None, &["libc", "openssl"]));
        targets.insert(n("app"), image_target("app", Some("base"), &["libc", "openssl", "myapp"]));
        targets.insert(n("libc"), leaf("libc"));
        targets.insert(n("openssl"), leaf("openssl"));
        targets.insert(n("myapp"), leaf("myapp"));
        let graph = TargetGraph::build(targets);

        let mut cached = BTreeSet::new();
        cached.insert(n("base"));
        let lookup = FakeLookup { cached };

        let prebuilt = get_prebuilt_targets(&graph, &lookup);
        assert!(prebuilt.contains(&n("libc")));
        assert!(prebuilt.contains(&n("openssl")));
        assert!(!prebuilt.contains(&n("myapp")));
    }
}
