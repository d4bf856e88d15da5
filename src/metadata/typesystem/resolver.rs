//! Resolution of symbolic type references against the live type universe.
//!
//! Metadata names and runtime names differ in two places: generic instances are written
//! ``List`1<System.Int32>`` in metadata and ``List`1[System.Int32]`` at runtime, and nested
//! types are written `Outer/Inner` in metadata and `Outer+Inner` at runtime. The
//! [`SymbolResolver`] normalizes to the runtime dialect before every lookup and caches every
//! successful resolution under the normalized name.
//!
//! Lookup order is fixed: built-in types of the [`RuntimeEnvironment`], then the types declared by
//! the target module, then each dependency in declaration order. The first match wins.

use std::{
    path::{Path, PathBuf},
    sync::Arc,
};

use dashmap::DashMap;
use log::{debug, info, warn};

use crate::{
    metadata::{
        typesystem::{
            LiveAssembly, LiveMember, LiveType, LiveTypeBuilder, LiveTypeRc, MemberKind,
            RuntimeEnvironment, CORLIB_NAME,
        },
        MethodDef, MethodRef, Module, TypeDef, TypeRef,
    },
    Error::{self, RecursionLimit, TypeResolution},
    Result,
};

/// Maximum nesting depth of generic instantiations
const MAX_RECURSION_DEPTH: usize = 100;

/// File extensions probed for dependencies, in order
const DEPENDENCY_EXTENSIONS: [&str; 2] = ["dll", "exe"];

/// The live counterpart of a method definition.
#[derive(Debug, Clone)]
pub struct ResolvedMember {
    /// The resolved declaring type
    pub declaring_type: LiveTypeRc,
    /// The matching member of the declaring type
    pub member: LiveMember,
}

/// Resolves symbolic references of one module to live type descriptors.
///
/// Created once per weaving run; all dependencies are loaded at construction, so a resolver that
/// exists always has a consistent type universe.
///
/// # Examples
///
/// ```rust
/// use cilweave::metadata::{typesystem::{Domain, SymbolResolver}, Module, TypeDef, TypeRef};
/// use std::sync::Arc;
///
/// let module = Module::new("App").with_type(TypeDef::new("App", "Calculator"));
/// let resolver = SymbolResolver::new(&module, Arc::new(Domain::new()), &[])?;
///
/// let int = resolver.resolve(&TypeRef::new("System.Int32"), true)?;
/// assert!(int.is_some());
/// assert!(resolver.resolve(&TypeRef::new("App.Calculator"), false)?.is_some());
/// assert!(resolver.resolve(&TypeRef::new("App.Missing"), false)?.is_none());
/// # Ok::<(), cilweave::Error>(())
/// ```
pub struct SymbolResolver {
    env: Arc<dyn RuntimeEnvironment>,
    target: LiveAssembly,
    dependencies: Vec<Arc<LiveAssembly>>,
    cache: DashMap<String, LiveTypeRc>,
}

impl SymbolResolver {
    /// Create a resolver for `module`, loading every referenced assembly.
    ///
    /// The core library is skipped. Every other reference is taken from the environment if it is
    /// already loaded, otherwise `<name>.dll` and then `<name>.exe` are probed in the module's own
    /// directory followed by each of `search_directories`.
    ///
    /// # Errors
    /// Returns [`Error::DependencyNotFound`] naming the first reference that cannot be located.
    pub fn new(
        module: &Module,
        env: Arc<dyn RuntimeEnvironment>,
        search_directories: &[PathBuf],
    ) -> Result<Self> {
        let mut directories = Vec::with_capacity(search_directories.len() + 1);
        if let Some(dir) = module.directory() {
            directories.push(dir.to_path_buf());
        }
        for dir in search_directories {
            if !directories.contains(dir) {
                directories.push(dir.clone());
            }
        }

        let mut dependencies = Vec::with_capacity(module.references.len());
        for name in &module.references {
            if name.eq_ignore_ascii_case(CORLIB_NAME) || name == env.corlib_name() {
                continue;
            }
            dependencies.push(Self::load_dependency(env.as_ref(), name, &directories)?);
        }

        let resolver = SymbolResolver {
            env,
            target: LiveAssembly::new(module.name.clone()),
            dependencies,
            cache: DashMap::new(),
        };
        resolver.materialize(module);
        Ok(resolver)
    }

    /// Translate a metadata-dialect name to the runtime dialect.
    #[must_use]
    pub fn normalize(name: &str) -> String {
        name.replace('<', "[").replace('>', "]").replace('/', "+")
    }

    /// Translate a runtime-dialect name to the metadata dialect.
    #[must_use]
    pub fn denormalize(name: &str) -> String {
        name.replace('[', "<").replace(']', ">").replace('+', "/")
    }

    /// Resolve `reference`, including closed generic instances in either dialect.
    ///
    /// ## Arguments
    /// * 'reference'    - The symbolic reference
    /// * 'fail_on_miss' - Turn a miss into [`Error::TypeResolution`] instead of `None`
    ///
    /// # Errors
    /// Returns [`Error::TypeResolution`] on a strict miss and [`Error::RecursionLimit`] for
    /// generic arguments nested too deeply.
    pub fn resolve(&self, reference: &TypeRef, fail_on_miss: bool) -> Result<Option<LiveTypeRc>> {
        self.resolve_with_depth(reference, fail_on_miss, 0)
    }

    /// Resolve a closed generic instance: its element, then each argument recursively.
    ///
    /// Non-generic references are resolved as by [`SymbolResolver::resolve`].
    ///
    /// # Errors
    /// Same as [`SymbolResolver::resolve`]; additionally an argument count that does not match
    /// the definition's arity is a [`Error::TypeResolution`].
    pub fn resolve_generic(
        &self,
        reference: &TypeRef,
        fail_on_miss: bool,
    ) -> Result<Option<LiveTypeRc>> {
        self.resolve_with_depth(reference, fail_on_miss, 0)
    }

    /// Find the live member corresponding to `method` declared by `declaring`.
    ///
    /// Returns `None` when the declaring type or a matching member is absent. Parameter types are
    /// resolved strictly since a member cannot be matched without them.
    ///
    /// # Errors
    /// Returns [`Error::TypeResolution`] if a parameter type cannot be resolved.
    pub fn resolve_method(
        &self,
        method: &MethodDef,
        declaring: &TypeDef,
    ) -> Result<Option<ResolvedMember>> {
        let Some(declaring_type) = self.resolve(&declaring.as_type_ref(), false)? else {
            return Ok(None);
        };

        let mut parameters = Vec::with_capacity(method.parameters.len());
        for parameter in &method.parameters {
            let resolved = self.resolve(&parameter.parameter_type, true)?.ok_or_else(|| {
                TypeResolution(Self::normalize(parameter.parameter_type.full_name()))
            })?;
            parameters.push(resolved.full_name.clone());
        }

        let kind = if method.is_constructor() {
            MemberKind::Constructor
        } else {
            MemberKind::Method
        };
        let member = declaring_type
            .members
            .iter()
            .find(|m| {
                m.name == method.name
                    && m.kind == kind
                    && m.is_static == method.is_static
                    && m.parameters == parameters
            })
            .cloned();

        Ok(member.map(|member| ResolvedMember {
            declaring_type,
            member,
        }))
    }

    /// Produce the reference used as the operand of a call to `member` of `declaring`.
    #[must_use]
    pub fn import_member(&self, declaring: &LiveType, member: &LiveMember) -> MethodRef {
        MethodRef {
            declaring_type: Self::import_type(declaring),
            name: member.name.clone(),
            parameters: member
                .parameters
                .iter()
                .map(|p| parse_type_name(p, Self::denormalize))
                .collect(),
            return_type: parse_type_name(&member.return_type, Self::denormalize),
            has_this: !member.is_static,
        }
    }

    /// Produce the symbolic reference of a live type.
    #[must_use]
    pub fn import_type(live_type: &LiveType) -> TypeRef {
        if let Some(element) = &live_type.element_type {
            let modifier = &live_type.full_name[element.full_name.len()..];
            return TypeRef::new(format!("{}{}", Self::import_type(element).full_name(), modifier));
        }
        match &live_type.generic_definition {
            Some(definition) => TypeRef::generic(
                Self::import_type(definition),
                live_type
                    .generic_arguments
                    .iter()
                    .map(|arg| Self::import_type(arg))
                    .collect(),
            ),
            None => TypeRef::new(Self::denormalize(&live_type.full_name)),
        }
    }

    /// The target module's live view.
    #[must_use]
    pub fn target(&self) -> &LiveAssembly {
        &self.target
    }

    /// Loaded dependencies in declaration order.
    #[must_use]
    pub fn dependencies(&self) -> &[Arc<LiveAssembly>] {
        &self.dependencies
    }

    /// Number of cached resolutions.
    #[must_use]
    pub fn cached_count(&self) -> usize {
        self.cache.len()
    }

    fn resolve_with_depth(
        &self,
        reference: &TypeRef,
        fail_on_miss: bool,
        depth: usize,
    ) -> Result<Option<LiveTypeRc>> {
        if depth >= MAX_RECURSION_DEPTH {
            return Err(RecursionLimit(MAX_RECURSION_DEPTH));
        }

        let key = Self::normalize(reference.full_name());
        if let Some(hit) = self.cache.get(&key) {
            debug!("Resolved {} from cache", key);
            return Ok(Some(hit.value().clone()));
        }

        let resolved = if reference.is_generic_instance() {
            self.close_generic(reference, fail_on_miss, depth)?
        } else if let Some((element, modifier)) = split_modifier(&key) {
            self.close_modifier(element, modifier, fail_on_miss, depth)?
        } else if key.ends_with(']') {
            let parsed = parse_type_name(&key, |name| name.to_string());
            if parsed.is_generic_instance() {
                self.close_generic(&parsed, fail_on_miss, depth)?
            } else {
                self.lookup(&key)
            }
        } else {
            self.lookup(&key)
        };

        match resolved {
            Some(live_type) => Ok(Some(self.cache.entry(key).or_insert(live_type).clone())),
            None if fail_on_miss => Err(TypeResolution(key)),
            None => {
                debug!("Type {} could not be resolved", key);
                Ok(None)
            }
        }
    }

    fn close_generic(
        &self,
        reference: &TypeRef,
        fail_on_miss: bool,
        depth: usize,
    ) -> Result<Option<LiveTypeRc>> {
        let Some(element) = reference.element_type() else {
            return Ok(None);
        };
        let Some(definition) = self.resolve_with_depth(element, fail_on_miss, depth + 1)? else {
            return Ok(None);
        };

        let mut arguments = Vec::with_capacity(reference.generic_arguments().len());
        for argument in reference.generic_arguments() {
            match self.resolve_with_depth(argument, fail_on_miss, depth + 1)? {
                Some(resolved) => arguments.push(resolved),
                None => return Ok(None),
            }
        }

        LiveType::make_generic(&definition, arguments).map(Some)
    }

    fn close_modifier(
        &self,
        element: &str,
        modifier: &str,
        fail_on_miss: bool,
        depth: usize,
    ) -> Result<Option<LiveTypeRc>> {
        let Some(element) =
            self.resolve_with_depth(&TypeRef::new(element), fail_on_miss, depth + 1)?
        else {
            return Ok(None);
        };

        let base = if modifier.starts_with('[') {
            self.lookup("System.Array")
        } else {
            None
        };
        Ok(Some(LiveType::make_modified(&element, modifier, base)))
    }

    fn lookup(&self, key: &str) -> Option<LiveTypeRc> {
        self.env
            .builtin_type(key)
            .or_else(|| self.target.get(key))
            .or_else(|| self.dependencies.iter().find_map(|dep| dep.get(key)))
    }

    fn load_dependency(
        env: &dyn RuntimeEnvironment,
        name: &str,
        directories: &[PathBuf],
    ) -> Result<Arc<LiveAssembly>> {
        if let Some(assembly) = env.loaded_assembly(name) {
            debug!("Dependency {} already loaded", name);
            return Ok(assembly);
        }

        for candidate in probe_paths(name, directories) {
            if !candidate.is_file() {
                continue;
            }
            match env.load_from(&candidate) {
                Ok(assembly) => {
                    info!("Loaded dependency {} from {}", name, candidate.display());
                    return Ok(assembly);
                }
                Err(e) => warn!("Failed to load {}: {}", candidate.display(), e),
            }
        }

        Err(Error::DependencyNotFound {
            name: name.to_string(),
        })
    }

    /// Build the live view of the module's own types.
    ///
    /// Types are added once their base type resolves, so bases declared later in the module are
    /// handled. Types whose base never resolves are added without one.
    fn materialize(&self, module: &Module) {
        let mut pending: Vec<&TypeDef> = module.types.iter().collect();
        while !pending.is_empty() {
            let before = pending.len();
            pending.retain(|type_def| match self.base_of(type_def) {
                Some(base) => {
                    self.target.add_type(self.live_view(type_def, base));
                    false
                }
                None => true,
            });

            if pending.len() == before {
                for type_def in pending {
                    warn!(
                        "Base type of {} could not be resolved, attribute inheritance is limited",
                        type_def.full_name()
                    );
                    self.target.add_type(self.live_view(type_def, None));
                }
                break;
            }
        }
    }

    fn base_of(&self, type_def: &TypeDef) -> Option<Option<LiveTypeRc>> {
        match &type_def.base_type {
            None => Some(None),
            Some(base) => self.resolve(base, false).ok().flatten().map(Some),
        }
    }

    fn live_view(&self, type_def: &TypeDef, base: Option<LiveTypeRc>) -> LiveTypeRc {
        let builder = match &type_def.declaring_type {
            Some(outer) => {
                LiveTypeBuilder::new("", Self::normalize(&type_def.name))
                    .nested_in(&Self::normalize(outer))
            }
            None => LiveTypeBuilder::new(type_def.namespace.as_str(), type_def.name.as_str()),
        };

        let mut builder = builder
            .assembly(&self.target.name)
            .base_opt(base)
            .generic_arity(generic_arity(&type_def.name));
        for attribute in &type_def.custom_attributes {
            builder = builder.attribute(&Self::normalize(attribute.full_name()), true);
        }

        for method in &type_def.methods {
            let mut member = LiveMember {
                name: method.name.clone(),
                kind: if method.is_constructor() {
                    MemberKind::Constructor
                } else {
                    MemberKind::Method
                },
                is_static: method.is_static,
                is_virtual: method.is_virtual,
                parameters: method
                    .parameters
                    .iter()
                    .map(|p| Self::normalize(p.parameter_type.full_name()))
                    .collect(),
                return_type: Self::normalize(method.return_type.full_name()),
                attributes: Vec::new(),
            };
            for attribute in &method.custom_attributes {
                member = member.with_attribute(&Self::normalize(attribute.full_name()), true);
            }
            builder = builder.member(member);
        }

        builder.build()
    }
}

fn probe_paths<'a>(name: &'a str, directories: &'a [PathBuf]) -> impl Iterator<Item = PathBuf> + 'a {
    directories.iter().flat_map(move |dir| {
        DEPENDENCY_EXTENSIONS
            .iter()
            .map(move |extension| Path::new(dir).join(format!("{name}.{extension}")))
    })
}

fn generic_arity(name: &str) -> usize {
    name.rsplit_once('`')
        .and_then(|(_, arity)| arity.parse().ok())
        .unwrap_or(0)
}

/// Split an array, by-ref or pointer name into its element and the trailing modifier.
fn split_modifier(name: &str) -> Option<(&str, &str)> {
    if name.ends_with('&') || name.ends_with('*') {
        let split = name.len() - 1;
        return (split > 0).then(|| (&name[..split], &name[split..]));
    }

    let open = name.strip_suffix(']')?.rfind('[')?;
    let rank = &name[open + 1..name.len() - 1];
    if open == 0 || !rank.chars().all(|c| c == ',') {
        return None;
    }
    Some((&name[..open], &name[open..]))
}

/// Split a bracketed generic name into its element and top-level arguments.
fn split_generic(name: &str) -> Option<(&str, Vec<&str>)> {
    let open = name.find('[')?;
    let element = &name[..open];
    if !element.contains('`') || !name.ends_with(']') {
        return None;
    }

    let inner = &name[open + 1..name.len() - 1];
    let mut arguments = Vec::new();
    let mut depth = 0_usize;
    let mut start = 0;
    for (index, ch) in inner.char_indices() {
        match ch {
            '[' => depth += 1,
            ']' => depth = depth.checked_sub(1)?,
            ',' if depth == 0 => {
                arguments.push(inner[start..index].trim());
                start = index + 1;
            }
            _ => {}
        }
    }
    if depth != 0 {
        return None;
    }
    arguments.push(inner[start..].trim());
    if arguments.iter().any(|arg| arg.is_empty()) {
        return None;
    }
    Some((element, arguments))
}

/// Parse a runtime-dialect name into a [`TypeRef`], mapping every leaf name through `map`.
fn parse_type_name(name: &str, map: fn(&str) -> String) -> TypeRef {
    if let Some((element, modifier)) = split_modifier(name) {
        return TypeRef::new(format!("{}{}", parse_type_name(element, map).full_name(), modifier));
    }
    match split_generic(name) {
        Some((element, arguments)) => TypeRef::generic(
            TypeRef::new(map(element)),
            arguments
                .into_iter()
                .map(|arg| parse_type_name(arg, map))
                .collect(),
        ),
        None => TypeRef::new(map(name)),
    }
}
