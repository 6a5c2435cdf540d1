//! Target-name resolution (spec §4.1).
//!
//! Grounded on `examples/original_source/yabt/target_utils.py`
//! (`norm_name`, `expand_target_selector`, `split`) and on the upward
//! project-root search in `twoliter/src/project/mod.rs::Project::find_and_load`.

use std::fmt;
use std::path::{Component, Path, PathBuf};

use snafu::{OptionExt, ResultExt, Snafu};

/// A fully qualified target name: `build_module:local_name`.
///
/// `build_module` is a slash-separated path relative to the project root
/// (empty string means the root module). `local_name` starting with `@`
/// marks a phony target (spec §3).
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, serde::Serialize, serde::Deserialize)]
pub struct QualifiedName {
    module: String,
    local: String,
}

impl QualifiedName {
    pub fn new(module: impl Into<String>, local: impl Into<String>) -> Self {
        Self {
            module: module.into(),
            local: local.into(),
        }
    }

    pub fn module(&self) -> &str {
        &self.module
    }

    pub fn local(&self) -> &str {
        &self.local
    }

    /// Phony targets (local name leading with `@`) are pruned after crawling
    /// (spec §3 invariant 5, §4.4 step 4c).
    pub fn is_phony(&self) -> bool {
        self.local.starts_with('@')
    }
}

impl fmt::Display for QualifiedName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.module, self.local)
    }
}

/// A resolved reference: either a concrete target name, or a wildcard over
/// a build module (`<module>:*`) or the whole tree (`**:*`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolved {
    Name(QualifiedName),
    ModuleWildcard(String),
    RecursiveWildcard,
}

#[derive(Debug, Snafu)]
pub enum Error {
    #[snafu(display("target reference '{reference}' is ambiguous: must be colon-qualified"))]
    AmbiguousName { reference: String },

    #[snafu(display("reference '{reference}' escapes the project sandbox"))]
    EscapesSandbox { reference: String },
}

pub type Result<T> = std::result::Result<T, Error>;

/// Normalize POSIX-style relative path components (`.`, `..`) against a base
/// module path, without touching the filesystem. Returns `None` if the
/// result would climb above the project root.
fn normalize_relative(base_module: &str, rel: &str) -> Option<String> {
    let mut stack: Vec<&str> = if base_module.is_empty() {
        Vec::new()
    } else {
        base_module.split('/').collect()
    };
    for part in rel.split('/') {
        match part {
            "" | "." => {}
            ".." => {
                stack.pop()?;
            }
            other => stack.push(other),
        }
    }
    Some(stack.join("/"))
}

/// Normalize an absolute `//path` reference against the project root,
/// rejecting anything that escapes it.
fn normalize_absolute(path: &str) -> Option<String> {
    let p = Path::new(path);
    let mut out = Vec::new();
    for comp in p.components() {
        match comp {
            Component::Normal(part) => out.push(part.to_string_lossy().into_owned()),
            Component::CurDir => {}
            Component::ParentDir => {
                out.pop()?;
            }
            Component::RootDir | Component::Prefix(_) => {}
        }
    }
    Some(out.join("/"))
}

/// Resolve a reference string against a containing build module.
///
/// Rules (spec §4.1):
/// - `:x` -> `<current_module>:x`
/// - `./x:y`, `../x:y` -> POSIX-normalized against the current module
/// - `//p:x` -> absolute from the project root
/// - `@p:x` -> accepted alias for `//p:x` (supplemented from
///   `yabt/target_utils.py::expand_target_selector`'s `@` prefix)
/// - `x` (no colon, and not a wildcard) -> `AmbiguousName`
/// - `**:*` -> recursive wildcard
/// - `<module>:*` or a bare module path -> module wildcard
pub fn resolve(reference: &str, current_module: &str) -> Result<Resolved> {
    if reference == "**:*" {
        return Ok(Resolved::RecursiveWildcard);
    }

    if let Some(rest) = reference.strip_prefix("//") {
        return resolve_absolute(rest, reference);
    }
    if let Some(rest) = reference.strip_prefix('@') {
        let rest = rest.trim_start_matches('/');
        return resolve_absolute(rest, reference);
    }

    if let Some(rest) = reference.strip_prefix(':') {
        return Ok(finish(current_module.to_string(), rest));
    }

    if reference.starts_with("./") || reference.starts_with("../") {
        let (path_part, local_part) = split_colon(reference, reference)?;
        let normalized = normalize_relative(current_module, path_part)
            .context(EscapesSandboxSnafu { reference })?;
        return Ok(finish(normalized, local_part));
    }

    if let Some(colon) = reference.find(':') {
        let (path_part, local_part) = (&reference[..colon], &reference[colon + 1..]);
        if path_part.is_empty() {
            return Ok(finish(current_module.to_string(), local_part));
        }
        let normalized = normalize_relative(current_module, path_part)
            .context(EscapesSandboxSnafu { reference })?;
        return Ok(finish(normalized, local_part));
    }

    // No colon: either a bare module path (wildcard shorthand, spec §9 open
    // question: "a bare module path is treated as `<module>:*`") or a truly
    // unqualified name, which is fatal per spec §4.1 / §7 `AmbiguousName`.
    //
    // We can only distinguish these at the crawler layer (it knows whether a
    // build module exists at that path); the resolver itself treats any bare,
    // non-wildcard string as ambiguous, matching the spec's literal rule that
    // `x` (no colon) fails.
    AmbiguousNameSnafu { reference }.fail()
}

fn resolve_absolute(rest: &str, original: &str) -> Result<Resolved> {
    let (path_part, local_part) = split_colon(rest, original)?;
    let normalized =
        normalize_absolute(path_part).context(EscapesSandboxSnafu { reference: original })?;
    Ok(finish(normalized, local_part))
}

fn split_colon<'a>(s: &'a str, original: &str) -> Result<(&'a str, &'a str)> {
    match s.find(':') {
        Some(idx) => Ok((&s[..idx], &s[idx + 1..])),
        None => AmbiguousNameSnafu {
            reference: original.to_string(),
        }
        .fail(),
    }
}

fn finish(module: String, local: &str) -> Resolved {
    if local == "*" {
        Resolved::ModuleWildcard(module)
    } else {
        Resolved::Name(QualifiedName::new(module, local))
    }
}

/// Resolve a CLI seed selector given the project-root-relative working
/// directory (spec §4.1 "for CLI seeds").
pub fn resolve_seed(reference: &str, rel_work_dir: &str) -> Result<Resolved> {
    resolve(reference, rel_work_dir)
}

/// Treat a bare, non-colon-qualified, non-wildcard path as a module wildcard
/// selector, for crawler use only (spec §9 open question: bare module path
/// seeds are treated as `<module>:*`). This bypasses the `AmbiguousName`
/// rule of [`resolve`], which is reserved for dependency references inside
/// build files (spec §4.1's "x (no colon) -- fails").
pub fn resolve_bare_module_as_wildcard(path: &str, rel_work_dir: &str) -> Result<String> {
    if path.is_empty() {
        return Ok(rel_work_dir.to_string());
    }
    normalize_relative(rel_work_dir, path).context(EscapesSandboxSnafu {
        reference: path.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn colon_only_uses_current_module() {
        assert_eq!(
            resolve(":foo", "lib/bar").unwrap(),
            Resolved::Name(QualifiedName::new("lib/bar", "foo"))
        );
    }

    #[test]
    fn relative_parent_reference() {
        assert_eq!(
            resolve("../baz:boom", "lib/bar").unwrap(),
            Resolved::Name(QualifiedName::new("lib/baz", "boom"))
        );
    }

    #[test]
    fn absolute_from_root() {
        assert_eq!(
            resolve("//root:x", "lib/bar").unwrap(),
            Resolved::Name(QualifiedName::new("root", "x"))
        );
    }

    #[test]
    fn at_alias_for_project_root() {
        assert_eq!(
            resolve("@root:x", "lib/bar").unwrap(),
            resolve("//root:x", "lib/bar").unwrap(),
        );
    }

    #[test]
    fn bare_name_is_ambiguous() {
        let err = resolve("users", "lib").unwrap_err();
        assert!(matches!(err, Error::AmbiguousName { .. }));
    }

    #[test]
    fn escapes_sandbox_is_rejected() {
        let err = resolve("../../../etc:passwd", "a/b").unwrap_err();
        assert!(matches!(err, Error::EscapesSandbox { .. }));
    }

    #[test]
    fn recursive_wildcard() {
        assert_eq!(resolve("**:*", "anything").unwrap(), Resolved::RecursiveWildcard);
    }

    #[test]
    fn module_wildcard() {
        assert_eq!(
            resolve("sub:*", "root").unwrap(),
            Resolved::ModuleWildcard("sub".to_string())
        );
    }
}
