//! Builder for live type descriptors.
//!
//! This module provides the [`LiveTypeBuilder`] struct, which offers a fluent API for constructing
//! [`LiveType`] descriptors. The seeded core library of [`crate::Domain`], dependency images
//! registered by hosts and the resolver's view of the target module are all built with it.
//!
//! # Example
//!
//! ```rust
//! use cilweave::metadata::typesystem::{LiveMember, LiveTypeBuilder};
//!
//! let exception = LiveTypeBuilder::new("System", "Exception").build();
//! let custom = LiveTypeBuilder::new("App", "ValidationException")
//!     .assembly("App")
//!     .base(&exception)
//!     .member(LiveMember::constructor(&["System.String"]))
//!     .build();
//!
//! assert_eq!(custom.full_name, "App.ValidationException");
//! assert!(custom.is_subclass_of("System.Exception"));
//! ```

use std::sync::Arc;

use crate::metadata::typesystem::{LiveAttribute, LiveMember, LiveType, LiveTypeRc};

/// Provides a fluent API for building live type descriptors
pub struct LiveTypeBuilder {
    namespace: String,
    name: String,
    declaring_type: Option<String>,
    assembly: String,
    base: Option<LiveTypeRc>,
    attributes: Vec<LiveAttribute>,
    members: Vec<LiveMember>,
    generic_arity: usize,
}

impl LiveTypeBuilder {
    /// Start a top-level type
    ///
    /// ## Arguments
    /// * 'namespace' - Namespace, may be empty
    /// * 'name' - Simple name, including the generic arity suffix for definitions
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        LiveTypeBuilder {
            namespace: namespace.into(),
            name: name.into(),
            declaring_type: None,
            assembly: String::new(),
            base: None,
            attributes: Vec::new(),
            members: Vec::new(),
            generic_arity: 0,
        }
    }

    /// Nest the type inside `declaring_type` (runtime-dialect full name)
    #[must_use]
    pub fn nested_in(mut self, declaring_type: &str) -> Self {
        self.declaring_type = Some(declaring_type.to_string());
        self
    }

    /// Set the defining assembly name
    #[must_use]
    pub fn assembly(mut self, name: &str) -> Self {
        self.assembly = name.to_string();
        self
    }

    /// Set the base class
    #[must_use]
    pub fn base(mut self, base: &LiveTypeRc) -> Self {
        self.base = Some(base.clone());
        self
    }

    /// Set the base class if there is one
    #[must_use]
    pub fn base_opt(mut self, base: Option<LiveTypeRc>) -> Self {
        self.base = base;
        self
    }

    /// Apply an attribute
    ///
    /// ## Arguments
    /// * 'type_name' - Runtime-dialect full name of the attribute class
    /// * 'inherited' - Whether derived types observe it
    #[must_use]
    pub fn attribute(mut self, type_name: &str, inherited: bool) -> Self {
        self.attributes.push(LiveAttribute {
            type_name: type_name.to_string(),
            inherited,
        });
        self
    }

    /// Add a constructor or method
    #[must_use]
    pub fn member(mut self, member: LiveMember) -> Self {
        self.members.push(member);
        self
    }

    /// Declare the number of generic parameters
    #[must_use]
    pub fn generic_arity(mut self, arity: usize) -> Self {
        self.generic_arity = arity;
        self
    }

    /// Finish the descriptor
    #[must_use]
    pub fn build(self) -> LiveTypeRc {
        let full_name = match (&self.declaring_type, self.namespace.is_empty()) {
            (Some(outer), _) => format!("{}+{}", outer, self.name),
            (None, true) => self.name.clone(),
            (None, false) => format!("{}.{}", self.namespace, self.name),
        };

        Arc::new(LiveType {
            namespace: self.namespace,
            name: self.name,
            full_name,
            assembly: self.assembly,
            base: self.base,
            attributes: self.attributes,
            members: self.members,
            generic_arity: self.generic_arity,
            generic_definition: None,
            generic_arguments: Vec::new(),
            element_type: None,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_nested_name() {
        let inner = LiveTypeBuilder::new("", "Cache")
            .nested_in("App.Calculator")
            .build();
        assert_eq!(inner.full_name, "App.Calculator+Cache");
    }

    #[test]
    fn test_global_name() {
        let synthesized = LiveTypeBuilder::new("", "<>c").build();
        assert_eq!(synthesized.full_name, "<>c");
        assert!(synthesized.base.is_none());
    }
}
