//! Builder Registry & Extractor (spec §4.3).
//!
//! Grounded on `examples/original_source/yabt/extend.py` (`Builder.sig`,
//! `Builder.register_sig`, the `Plugin` registry of builders + hooks) and
//! `examples/original_source/yabt/target_extraction.py` (`args_to_props`,
//! `handle_typed_args`, `extractor`). The registry itself is an immutable
//! table populated before the first build-file evaluation and passed by
//! reference (spec §9 "Hooks and global plug-in state": "Avoid process-global
//! singletons"), the way the teacher passes `&Project`/`&Lock` by reference
//! rather than relying on statics.

use std::collections::BTreeMap;
use std::fmt;

use async_trait::async_trait;
use snafu::{ensure, Snafu};
use tracing::instrument;

use crate::name::{self, QualifiedName};
use crate::spec::{PropType, PropValue, TargetSpec};

/// One slot in a builder signature (spec §4.3: "an ordered list of
/// `(property_name, property_type, default?)`").
#[derive(Debug, Clone)]
pub struct ArgSpec {
    pub name: String,
    pub prop_type: PropType,
    pub default: Option<PropValue>,
}

/// An ordered builder signature. The first slot is always `name`
/// (TargetName, no default); once a default appears, every subsequent slot
/// must also have one (spec §4.3).
#[derive(Debug, Clone)]
pub struct Signature {
    slots: Vec<ArgSpec>,
}

#[derive(Debug, Snafu)]
pub enum SignatureError {
    #[snafu(display("builder signature's first parameter must be 'name'"))]
    MissingNameFirst,

    #[snafu(display("'deps' must be declared as TargetRefList"))]
    DepsWrongType,

    #[snafu(display("non-default argument '{name}' follows a default argument"))]
    NonDefaultAfterDefault { name: String },

    #[snafu(display("duplicate parameter name '{name}' in builder signature"))]
    DuplicateParam { name: String },
}

impl Signature {
    /// Build a signature from caller-supplied slots (excluding `name`, which
    /// is always prepended). Mirrors `Builder.register_sig` in extend.py.
    pub fn new(slots: Vec<ArgSpec>) -> std::result::Result<Self, SignatureError> {
        let mut all = vec![ArgSpec {
            name: "name".to_string(),
            prop_type: PropType::TargetName,
            default: None,
        }];
        all.extend(slots);

        let mut seen = std::collections::BTreeSet::new();
        let mut saw_default = false;
        for slot in &all {
            if !seen.insert(slot.name.clone()) {
                return DuplicateParamSnafu { name: slot.name.clone() }.fail();
            }
            if slot.name == "deps" && slot.prop_type != PropType::TargetRefList {
                return DepsWrongTypeSnafu.fail();
            }
            if slot.default.is_some() {
                saw_default = true;
            } else if saw_default {
                return NonDefaultAfterDefaultSnafu { name: slot.name.clone() }.fail();
            }
        }
        Ok(Self { slots: all })
    }

    pub fn slot(&self, name: &str) -> Option<&ArgSpec> {
        self.slots.iter().find(|s| s.name == name)
    }

    pub fn slots(&self) -> &[ArgSpec] {
        &self.slots
    }

    fn min_positional_args(&self) -> usize {
        self.slots.iter().take_while(|s| s.default.is_none()).count()
    }
}

/// A raw, untyped value as produced by the build-file evaluator, prior to
/// coercion against a signature slot's declared [`PropType`].
#[derive(Debug, Clone)]
pub enum RawValue {
    Str(String),
    Number(f64),
    Bool(bool),
    List(Vec<RawValue>),
    Mapping(BTreeMap<String, RawValue>),
}

/// A single builder invocation as parsed out of a build file: an ordered
/// list of positional values, and a map of keyword values (spec §4.2 /
/// §4.3). Evaluator output, extractor input.
#[derive(Debug, Clone, Default)]
pub struct Call {
    pub positional: Vec<RawValue>,
    pub keyword: BTreeMap<String, RawValue>,
}

/// A post-extraction target rewrite hook (spec §4.3, §6.1
/// `register_manipulate_target_hook`).
pub type ManipulateHook = Box<dyn Fn(&mut TargetSpec) + Send + Sync>;

/// The build function a plug-in attaches to a builder name (spec §6.1:
/// `fn(build_context, target_spec) -> void`, "may add artifacts and invoke
/// `build_context.run_in_buildenv(...)`").
#[async_trait]
pub trait BuilderPlugin: Send + Sync {
    async fn build(
        &self,
        ctx: &crate::scheduler::BuildContext,
        target: &mut TargetSpec,
    ) -> std::result::Result<(), crate::scheduler::BuildError>;
}

/// A single policy rejection (spec §7 `PolicyViolation`). `target` names the
/// offending target; `reason` is surfaced verbatim in the aggregated error.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Violation {
    pub target: QualifiedName,
    pub reason: String,
}

/// A check run over the frozen target graph before scheduling (spec §1
/// "policy checkers", §7 `PolicyViolation`; grounded on `policy.py`'s
/// registered policy checkers). Concrete policies stay out of scope -- this
/// is the seam a caller registers one against.
pub trait Policy: Send + Sync {
    fn check(&self, graph: &crate::graph::TargetGraph) -> Vec<Violation>;
}

struct Entry {
    signature: Signature,
    cachable: bool,
    plugin: Box<dyn BuilderPlugin>,
    hooks: Vec<ManipulateHook>,
}

impl fmt::Debug for Entry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Entry")
            .field("signature", &self.signature)
            .field("cachable", &self.cachable)
            .field("hooks", &self.hooks.len())
            .finish()
    }
}

/// The immutable-once-built table of builder name -> {signature, build
/// function, hooks} (spec §2 "Builder Registry").
#[derive(Default)]
pub struct Registry {
    entries: BTreeMap<String, Entry>,
    docstrings: BTreeMap<String, String>,
    policies: Vec<Box<dyn Policy>>,
}

impl fmt::Debug for Registry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Registry").field("builders", &self.entries.keys().collect::<Vec<_>>()).finish()
    }
}

#[derive(Debug, Snafu)]
pub enum RegisterError {
    #[snafu(display("builder '{name}' already has a registered signature"))]
    DuplicateSignature { name: String },

    #[snafu(display("builder '{name}' already has a registered build function"))]
    DuplicateBuildFunc { name: String },

    #[snafu(display("cannot attach a build function to unknown builder '{name}'"))]
    UnknownBuilder { name: String },

    #[snafu(display("invalid signature for builder '{name}': {source}"))]
    InvalidSignature { name: String, source: SignatureError },
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// `register_builder_sig(name, signature, cachable=true)` (spec §6.1).
    pub fn register_builder(
        &mut self,
        name: impl Into<String>,
        slots: Vec<ArgSpec>,
        cachable: bool,
        plugin: Box<dyn BuilderPlugin>,
        docstring: impl Into<String>,
    ) -> std::result::Result<(), RegisterError> {
        let name = name.into();
        ensure!(!self.entries.contains_key(&name), DuplicateSignatureSnafu { name: name.clone() });
        let signature = Signature::new(slots).context(InvalidSignatureSnafu { name: name.clone() })?;
        self.docstrings.insert(name.clone(), docstring.into());
        self.entries.insert(
            name,
            Entry {
                signature,
                cachable,
                plugin,
                hooks: Vec::new(),
            },
        );
        Ok(())
    }

    /// `register_manipulate_target_hook(name)(fn)` (spec §6.1).
    pub fn register_hook(&mut self, name: &str, hook: ManipulateHook) -> std::result::Result<(), RegisterError> {
        let entry = self
            .entries
            .get_mut(name)
            .context(UnknownBuilderSnafu { name: name.to_string() })?;
        entry.hooks.push(hook);
        Ok(())
    }

    pub fn signature(&self, name: &str) -> Option<&Signature> {
        self.entries.get(name).map(|e| &e.signature)
    }

    pub fn is_cachable(&self, name: &str) -> bool {
        self.entries.get(name).map(|e| e.cachable).unwrap_or(false)
    }

    pub fn plugin(&self, name: &str) -> Option<&dyn BuilderPlugin> {
        self.entries.get(name).map(|e| e.plugin.as_ref())
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }

    pub fn docstring(&self, name: &str) -> Option<&str> {
        self.docstrings.get(name).map(String::as_str)
    }

    fn hooks_for(&self, name: &str) -> &[ManipulateHook] {
        self.entries.get(name).map(|e| e.hooks.as_slice()).unwrap_or(&[])
    }

    /// Register a policy checker (spec §1 "policy checkers... treated as
    /// hooks"). Run in registration order by [`Self::run_policies`].
    pub fn register_policy(&mut self, policy: Box<dyn Policy>) {
        self.policies.push(policy);
    }

    /// Run every registered policy over the frozen graph, aggregating all
    /// violations across all of them (spec §7: "raise `PolicyViolation`
    /// aggregated across all violators").
    #[instrument(level = "trace", skip_all)]
    pub fn run_policies(&self, graph: &crate::graph::TargetGraph) -> Vec<Violation> {
        self.policies.iter().flat_map(|policy| policy.check(graph)).collect()
    }
}

use snafu::{OptionExt, ResultExt};

#[derive(Debug, Snafu)]
pub enum ExtractError {
    #[snafu(display("unknown builder '{builder_name}'"))]
    UnknownBuilder { builder_name: String },

    #[snafu(display(
        "{builder_name}() takes {min}..={max} positional arguments, but {given} were given"
    ))]
    TooManyArgs {
        builder_name: String,
        min: usize,
        max: usize,
        given: usize,
    },

    #[snafu(display("{builder_name}() got an unexpected keyword argument '{arg}'"))]
    UnknownKwarg { builder_name: String, arg: String },

    #[snafu(display("{builder_name}() got multiple values for argument '{arg}'"))]
    DuplicateArg { builder_name: String, arg: String },

    #[snafu(display("{builder_name}() missing required argument(s): {args}"))]
    MissingRequired { builder_name: String, args: String },

    #[snafu(display("argument '{arg}' on {builder_name}(): {reason}"))]
    TypeMismatch {
        builder_name: String,
        arg: String,
        reason: String,
    },

    #[snafu(display("argument '{arg}' on {builder_name}(): {source}"))]
    BadTargetRef {
        builder_name: String,
        arg: String,
        source: name::Error,
    },
}

pub type ExtractResult<T> = std::result::Result<T, ExtractError>;

/// Extract a [`TargetSpec`] from a raw builder [`Call`], per the builder's
/// registered [`Signature`] (spec §4.3). `current_module` is the build
/// module the call appears in, used to normalize target-ref and file-path
/// props. Hooks are invoked after typed coercion, in registration order.
#[instrument(level = "trace", skip(registry, call), fields(builder_name = %builder_name))]
pub fn extract(
    registry: &Registry,
    builder_name: &str,
    current_module: &str,
    call: Call,
) -> ExtractResult<TargetSpec> {
    let signature = registry
        .signature(builder_name)
        .context(UnknownBuilderSnafu { builder_name: builder_name.to_string() })?;

    ensure!(
        call.positional.len() <= signature.slots().len(),
        TooManyArgsSnafu {
            builder_name: builder_name.to_string(),
            min: signature.min_positional_args(),
            max: signature.slots().len(),
            given: call.positional.len(),
        }
    );

    let mut raw: BTreeMap<String, RawValue> = BTreeMap::new();
    for (slot, value) in signature.slots().iter().zip(call.positional.into_iter()) {
        raw.insert(slot.name.clone(), value);
    }
    for (arg, value) in call.keyword {
        ensure!(
            signature.slot(&arg).is_some(),
            UnknownKwargSnafu { builder_name: builder_name.to_string(), arg: arg.clone() }
        );
        ensure!(
            !raw.contains_key(&arg),
            DuplicateArgSnafu { builder_name: builder_name.to_string(), arg: arg.clone() }
        );
        raw.insert(arg, value);
    }

    let mut missing = Vec::new();
    for slot in signature.slots() {
        if !raw.contains_key(&slot.name) {
            match &slot.default {
                Some(_) => {}
                None => missing.push(slot.name.clone()),
            }
        }
    }
    ensure!(
        missing.is_empty(),
        MissingRequiredSnafu {
            builder_name: builder_name.to_string(),
            args: missing.join(", "),
        }
    );

    // Coerce each slot, falling back to its default when absent.
    let mut props: BTreeMap<String, PropValue> = BTreeMap::new();
    for slot in signature.slots() {
        let value = match raw.remove(&slot.name) {
            Some(v) => coerce(builder_name, &slot.name, slot.prop_type, v, current_module)?,
            None => slot.default.clone().expect("checked above"),
        };
        props.insert(slot.name.clone(), value);
    }

    let name_value = props.remove("name").expect("name is always a slot");
    let name = match name_value {
        PropValue::TargetName(n) => n,
        _ => unreachable!("name slot is always coerced to TargetName"),
    };
    let deps = match props.remove("deps") {
        Some(PropValue::TargetRefList(list)) => list,
        Some(_) => unreachable!("deps slot is always coerced to TargetRefList"),
        None => Vec::new(),
    };

    let mut target = TargetSpec::new(name, builder_name);
    for dep in deps {
        target.push_dep(dep);
    }
    target.props = props;

    for hook in registry.hooks_for(builder_name) {
        hook(&mut target);
    }

    Ok(target)
}

fn coerce(
    builder_name: &str,
    arg: &str,
    prop_type: PropType,
    value: RawValue,
    current_module: &str,
) -> ExtractResult<PropValue> {
    match prop_type {
        PropType::Str => match value {
            RawValue::Str(s) => Ok(PropValue::Str(s)),
            _ => mismatch(builder_name, arg, "expected a string"),
        },
        PropType::Number => match value {
            RawValue::Number(n) => Ok(PropValue::Number(n)),
            _ => mismatch(builder_name, arg, "expected a number"),
        },
        PropType::Bool => match value {
            RawValue::Bool(b) => Ok(PropValue::Bool(b)),
            _ => mismatch(builder_name, arg, "expected a boolean"),
        },
        PropType::RawList => Ok(PropValue::RawList(listify(value).into_iter().map(RawValue::into_untyped).collect())),
        PropType::StringList => {
            let items = listify(value);
            let mut out = Vec::with_capacity(items.len());
            for item in items {
                match item {
                    RawValue::Str(s) => out.push(s),
                    _ => return mismatch(builder_name, arg, "expected a list of strings"),
                }
            }
            Ok(PropValue::StringList(out))
        }
        PropType::TargetName => match value {
            RawValue::Str(s) => Ok(PropValue::TargetName(QualifiedName::new(current_module, s))),
            _ => mismatch(builder_name, arg, "expected a target name string"),
        },
        PropType::TargetRef => match value {
            RawValue::Str(s) => {
                let resolved = name::resolve(&s, current_module)
                    .context(BadTargetRefSnafu { builder_name: builder_name.to_string(), arg: arg.to_string() })?;
                match resolved {
                    name::Resolved::Name(n) => Ok(PropValue::TargetRef(n)),
                    _ => mismatch(builder_name, arg, "expected a concrete target reference, not a wildcard"),
                }
            }
            _ => mismatch(builder_name, arg, "expected a target reference string"),
        },
        PropType::TargetRefList => {
            let items = listify(value);
            let mut out = Vec::with_capacity(items.len());
            for item in items {
                match item {
                    RawValue::Str(s) => {
                        let resolved = name::resolve(&s, current_module).context(BadTargetRefSnafu {
                            builder_name: builder_name.to_string(),
                            arg: arg.to_string(),
                        })?;
                        match resolved {
                            name::Resolved::Name(n) => out.push(n),
                            _ => return mismatch(builder_name, arg, "expected concrete target references, not wildcards"),
                        }
                    }
                    _ => return mismatch(builder_name, arg, "expected a list of target reference strings"),
                }
            }
            Ok(PropValue::TargetRefList(out))
        }
        PropType::FilePath => match value {
            RawValue::Str(s) => Ok(PropValue::FilePath(normalize_file_path(&s, current_module))),
            _ => mismatch(builder_name, arg, "expected a file path string"),
        },
        PropType::FilePathList => {
            let items = listify(value);
            let mut out = Vec::with_capacity(items.len());
            for item in items {
                match item {
                    RawValue::Str(s) => out.push(normalize_file_path(&s, current_module)),
                    _ => return mismatch(builder_name, arg, "expected a list of file path strings"),
                }
            }
            Ok(PropValue::FilePathList(out))
        }
        PropType::Untyped => Ok(value.into_untyped()),
    }
}

fn mismatch<T>(builder_name: &str, arg: &str, reason: &str) -> ExtractResult<T> {
    TypeMismatchSnafu {
        builder_name: builder_name.to_string(),
        arg: arg.to_string(),
        reason: reason.to_string(),
    }
    .fail()
}

/// List coercion: a single value becomes a singleton list (spec §4.3: "list
/// coercion (single value -> singleton)"), mirroring `listify()` from
/// `ostrich.utils.collections` as used throughout `target_extraction.py`.
fn listify(value: RawValue) -> Vec<RawValue> {
    match value {
        RawValue::List(items) => items,
        other => vec![other],
    }
}

/// File-path normalization (spec §4.3): `//`-prefixed paths are
/// project-root-anchored, others are build-module-anchored.
fn normalize_file_path(raw: &str, current_module: &str) -> std::path::PathBuf {
    if let Some(rest) = raw.strip_prefix("//") {
        std::path::PathBuf::from(rest)
    } else if current_module.is_empty() {
        std::path::PathBuf::from(raw)
    } else {
        std::path::Path::new(current_module).join(raw)
    }
}

impl RawValue {
    fn into_untyped(self) -> PropValue {
        match self {
            RawValue::Str(s) => PropValue::Str(s),
            RawValue::Number(n) => PropValue::Number(n),
            RawValue::Bool(b) => PropValue::Bool(b),
            RawValue::List(items) => PropValue::RawList(items.into_iter().map(RawValue::into_untyped).collect()),
            RawValue::Mapping(map) => {
                PropValue::Mapping(map.into_iter().map(|(k, v)| (k, v.into_untyped())).collect())
            }
        }
    }
}
