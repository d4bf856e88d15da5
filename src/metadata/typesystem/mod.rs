//! The live type universe.
//!
//! Static metadata only records the attributes applied directly to a type or method. Whether an
//! attribute is visible on a method also depends on its base types and on the virtual members it
//! overrides, so eligibility checks run against [`LiveType`] descriptors: resolved types linked to
//! their base chain, their members and their attributes with usage information.
//!
//! # Key Components
//!
//! - [`LiveType`] / [`LiveMember`] / [`LiveAttribute`] - Resolved type descriptors
//! - [`LiveAssembly`] - A named, concurrently readable set of live types
//! - [`LiveTypeBuilder`] - Fluent construction of descriptors
//! - [`RuntimeEnvironment`] / [`Domain`] - Where built-in types and dependencies come from
//! - [`SymbolResolver`] - Maps [`crate::metadata::TypeRef`]s onto live descriptors
//!
//! # Thread Safety
//!
//! Descriptors are immutable once built and shared through [`LiveTypeRc`]. Assemblies and the
//! resolver cache use [`dashmap::DashMap`], so policy evaluation can run on many threads.

mod builder;
mod environment;
mod resolver;

use std::{fmt, sync::Arc};

use dashmap::DashMap;

pub use builder::LiveTypeBuilder;
pub use environment::{Domain, RuntimeEnvironment, CORLIB_NAME};
pub use resolver::{ResolvedMember, SymbolResolver};

use crate::Result;

/// A reference-counted live type descriptor.
pub type LiveTypeRc = Arc<LiveType>;

/// An attribute as seen by the live type system.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LiveAttribute {
    /// Runtime-dialect full name of the attribute class
    pub type_name: String,
    /// Whether derived types and overriding members observe the attribute
    pub inherited: bool,
}

/// Member kind of a [`LiveMember`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MemberKind {
    /// Instance or type constructor
    Constructor,
    /// Ordinary method
    Method,
}

/// A constructor or method of a live type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LiveMember {
    /// Member name; `.ctor` / `.cctor` for constructors
    pub name: String,
    /// Constructor or method
    pub kind: MemberKind,
    /// Whether the member is static
    pub is_static: bool,
    /// Whether the member is virtual
    pub is_virtual: bool,
    /// Runtime-dialect full names of the parameter types
    pub parameters: Vec<String>,
    /// Runtime-dialect full name of the return type
    pub return_type: String,
    /// Attributes applied directly to the member
    pub attributes: Vec<LiveAttribute>,
}

impl LiveMember {
    /// An instance constructor taking `parameters`.
    #[must_use]
    pub fn constructor(parameters: &[&str]) -> Self {
        LiveMember {
            name: ".ctor".to_string(),
            kind: MemberKind::Constructor,
            is_static: false,
            is_virtual: false,
            parameters: parameters.iter().map(ToString::to_string).collect(),
            return_type: crate::metadata::VOID_TYPE.to_string(),
            attributes: Vec::new(),
        }
    }

    /// An instance method.
    #[must_use]
    pub fn method(name: &str, parameters: &[&str], return_type: &str) -> Self {
        LiveMember {
            name: name.to_string(),
            kind: MemberKind::Method,
            is_static: false,
            is_virtual: false,
            parameters: parameters.iter().map(ToString::to_string).collect(),
            return_type: return_type.to_string(),
            attributes: Vec::new(),
        }
    }

    /// Mark the member static.
    #[must_use]
    pub fn with_static(mut self) -> Self {
        self.is_static = true;
        self
    }

    /// Mark the member virtual.
    #[must_use]
    pub fn with_virtual(mut self) -> Self {
        self.is_virtual = true;
        self
    }

    /// Apply an attribute.
    #[must_use]
    pub fn with_attribute(mut self, type_name: &str, inherited: bool) -> Self {
        self.attributes.push(LiveAttribute {
            type_name: type_name.to_string(),
            inherited,
        });
        self
    }

    /// Whether the member returns `System.Void`.
    #[must_use]
    pub fn is_void(&self) -> bool {
        self.return_type == crate::metadata::VOID_TYPE
    }

    /// Whether the member has the same name, kind, staticness and parameter list as `other`.
    #[must_use]
    pub fn same_signature(&self, other: &LiveMember) -> bool {
        self.name == other.name
            && self.kind == other.kind
            && self.is_static == other.is_static
            && self.parameters == other.parameters
    }

    fn carries(&self, attribute: &str, inherited_only: bool) -> bool {
        self.attributes
            .iter()
            .any(|a| a.type_name == attribute && (!inherited_only || a.inherited))
    }
}

impl fmt::Display for LiveMember {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}{} {}({})",
            if self.is_static { "static " } else { "" },
            self.return_type,
            self.name,
            self.parameters.join(", ")
        )
    }
}

/// A resolved type descriptor.
///
/// Closed generic instances carry their definition and arguments and share the definition's
/// members and base type.
#[derive(Debug, Clone)]
pub struct LiveType {
    /// Namespace of the type
    pub namespace: String,
    /// Simple name of the type
    pub name: String,
    /// Runtime-dialect full name, e.g. ``System.Collections.Generic.List`1[System.Int32]``
    pub full_name: String,
    /// Simple name of the defining assembly
    pub assembly: String,
    /// Base class, if any
    pub base: Option<LiveTypeRc>,
    /// Attributes applied directly to the type
    pub attributes: Vec<LiveAttribute>,
    /// Constructors and methods declared by the type
    pub members: Vec<LiveMember>,
    /// Number of generic parameters of an open definition
    pub generic_arity: usize,
    /// The open definition of a closed generic instance
    pub generic_definition: Option<LiveTypeRc>,
    /// The type arguments of a closed generic instance
    pub generic_arguments: Vec<LiveTypeRc>,
    /// The element of an array, by-ref or pointer type
    pub element_type: Option<LiveTypeRc>,
}

impl LiveType {
    /// Close the open generic `definition` over `arguments`.
    ///
    /// # Errors
    /// Returns [`crate::Error::TypeResolution`] if the argument count does not match the arity.
    pub fn make_generic(definition: &LiveTypeRc, arguments: Vec<LiveTypeRc>) -> Result<LiveTypeRc> {
        if definition.generic_arity == 0 || definition.generic_arity != arguments.len() {
            return Err(crate::Error::TypeResolution(format!(
                "{} cannot be closed over {} arguments",
                definition.full_name,
                arguments.len()
            )));
        }

        let names = arguments
            .iter()
            .map(|arg| arg.full_name.as_str())
            .collect::<Vec<_>>()
            .join(",");

        Ok(Arc::new(LiveType {
            namespace: definition.namespace.clone(),
            name: definition.name.clone(),
            full_name: format!("{}[{}]", definition.full_name, names),
            assembly: definition.assembly.clone(),
            base: definition.base.clone(),
            attributes: definition.attributes.clone(),
            members: definition.members.clone(),
            generic_arity: 0,
            generic_definition: Some(definition.clone()),
            generic_arguments: arguments,
            element_type: None,
        }))
    }

    /// Derive an array, by-ref or pointer type from `element`.
    ///
    /// ## Arguments
    /// * 'element'  - The element type
    /// * 'modifier' - Runtime-dialect suffix: `[]`, `[,]`, `&` or `*`
    /// * 'base'     - Base class of the derived type, `System.Array` for arrays
    #[must_use]
    pub fn make_modified(element: &LiveTypeRc, modifier: &str, base: Option<LiveTypeRc>) -> LiveTypeRc {
        Arc::new(LiveType {
            namespace: element.namespace.clone(),
            name: format!("{}{}", element.name, modifier),
            full_name: format!("{}{}", element.full_name, modifier),
            assembly: element.assembly.clone(),
            base,
            attributes: Vec::new(),
            members: Vec::new(),
            generic_arity: 0,
            generic_definition: None,
            generic_arguments: Vec::new(),
            element_type: Some(element.clone()),
        })
    }

    /// Whether this is a closed generic instance.
    #[must_use]
    pub fn is_generic_instance(&self) -> bool {
        self.generic_definition.is_some()
    }

    /// Iterate this type and its base types, nearest first.
    pub fn base_chain(&self) -> impl Iterator<Item = &LiveType> {
        std::iter::successors(Some(self), |t| t.base.as_deref())
    }

    /// Whether this type is `ancestor` or derives from it.
    #[must_use]
    pub fn is_subclass_of(&self, ancestor: &str) -> bool {
        self.base_chain().any(|t| t.full_name == ancestor)
    }

    /// Whether `attribute` applies to this type.
    ///
    /// With `inherit`, attributes of base types count when their usage marks them inherited.
    #[must_use]
    pub fn has_attribute(&self, attribute: &str, inherit: bool) -> bool {
        if self.attributes.iter().any(|a| a.type_name == attribute) {
            return true;
        }
        inherit
            && self
                .base_chain()
                .skip(1)
                .any(|t| t.attributes.iter().any(|a| a.type_name == attribute && a.inherited))
    }

    /// Whether `attribute` applies to `member` of this type.
    ///
    /// With `inherit`, a virtual member also observes inherited attributes of the members it
    /// overrides in base types.
    #[must_use]
    pub fn member_has_attribute(&self, member: &LiveMember, attribute: &str, inherit: bool) -> bool {
        if member.carries(attribute, false) {
            return true;
        }
        if !inherit || !member.is_virtual {
            return false;
        }
        self.base_chain()
            .skip(1)
            .filter_map(|t| {
                t.members
                    .iter()
                    .find(|m| m.is_virtual && m.same_signature(member))
            })
            .any(|m| m.carries(attribute, true))
    }

    /// Find a member by name, staticness and parameter type names.
    #[must_use]
    pub fn find_member(&self, name: &str, is_static: bool, parameters: &[&str]) -> Option<&LiveMember> {
        self.members.iter().find(|m| {
            m.name == name
                && m.is_static == is_static
                && m.parameters.len() == parameters.len()
                && m.parameters.iter().zip(parameters).all(|(a, b)| a == b)
        })
    }

    /// Find an instance constructor by parameter type names.
    #[must_use]
    pub fn find_constructor(&self, parameters: &[&str]) -> Option<&LiveMember> {
        self.members.iter().find(|m| {
            m.kind == MemberKind::Constructor
                && !m.is_static
                && m.parameters.len() == parameters.len()
                && m.parameters.iter().zip(parameters).all(|(a, b)| a == b)
        })
    }

    /// Members named `name`.
    pub fn members_named<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a LiveMember> + 'a {
        self.members.iter().filter(move |m| m.name == name)
    }
}

impl fmt::Display for LiveType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.full_name)
    }
}

/// A named set of live types.
#[derive(Debug)]
pub struct LiveAssembly {
    /// Simple assembly name
    pub name: String,
    types: DashMap<String, LiveTypeRc>,
}

impl LiveAssembly {
    /// An empty assembly.
    pub fn new(name: impl Into<String>) -> Self {
        LiveAssembly {
            name: name.into(),
            types: DashMap::new(),
        }
    }

    /// Register a type under its runtime-dialect full name.
    pub fn add_type(&self, live_type: LiveTypeRc) {
        self.types.insert(live_type.full_name.clone(), live_type);
    }

    /// Look up a type by runtime-dialect full name.
    #[must_use]
    pub fn get(&self, full_name: &str) -> Option<LiveTypeRc> {
        self.types.get(full_name).map(|entry| entry.value().clone())
    }

    /// Number of registered types.
    #[must_use]
    pub fn type_count(&self) -> usize {
        self.types.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MARKER: &str = "App.MarkerAttribute";
    const SEALED_MARKER: &str = "App.SealedMarkerAttribute";

    fn hierarchy() -> (LiveTypeRc, LiveTypeRc) {
        let base = LiveTypeBuilder::new("App", "Base")
            .attribute(MARKER, true)
            .attribute(SEALED_MARKER, false)
            .member(
                LiveMember::method("Run", &[], "System.Void")
                    .with_virtual()
                    .with_attribute(MARKER, true)
                    .with_attribute(SEALED_MARKER, false),
            )
            .build();
        let derived = LiveTypeBuilder::new("App", "Derived")
            .base(&base)
            .member(LiveMember::method("Run", &[], "System.Void").with_virtual())
            .member(LiveMember::method("Other", &[], "System.Void"))
            .build();
        (base, derived)
    }

    #[test]
    fn test_type_attribute_inheritance() {
        let (_, derived) = hierarchy();
        assert!(derived.has_attribute(MARKER, true));
        assert!(!derived.has_attribute(MARKER, false));
        assert!(!derived.has_attribute(SEALED_MARKER, true));
    }

    #[test]
    fn test_member_attribute_inheritance() {
        let (_, derived) = hierarchy();
        let run = derived.find_member("Run", false, &[]).cloned();
        let other = derived.find_member("Other", false, &[]).cloned();

        let run = run.expect("Run");
        assert!(derived.member_has_attribute(&run, MARKER, true));
        assert!(!derived.member_has_attribute(&run, MARKER, false));
        assert!(!derived.member_has_attribute(&run, SEALED_MARKER, true));
        assert!(!derived.member_has_attribute(&other.expect("Other"), MARKER, true));
    }

    #[test]
    fn test_make_generic() {
        let int = LiveTypeBuilder::new("System", "Int32").build();
        let list = LiveTypeBuilder::new("System.Collections.Generic", "List`1")
            .generic_arity(1)
            .member(LiveMember::constructor(&[]))
            .build();

        let closed = LiveType::make_generic(&list, vec![int.clone()]).expect("closed");
        assert_eq!(closed.full_name, "System.Collections.Generic.List`1[System.Int32]");
        assert!(closed.is_generic_instance());
        assert!(closed.find_constructor(&[]).is_some());
        assert!(LiveType::make_generic(&list, vec![int.clone(), int]).is_err());
    }

    #[test]
    fn test_assembly_registry() {
        let assembly = LiveAssembly::new("Lib");
        assembly.add_type(LiveTypeBuilder::new("Lib", "Widget").assembly("Lib").build());

        assert_eq!(assembly.type_count(), 1);
        assert!(assembly.get("Lib.Widget").is_some());
        assert!(assembly.get("Lib.Gadget").is_none());
    }
}
