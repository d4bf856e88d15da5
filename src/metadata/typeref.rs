//! Symbolic type and member references as recorded in module metadata.
//!
//! A [`TypeRef`] is the static, name-based description of a type: it is what a method signature,
//! a local variable slot or a catch clause points at before anything has been resolved. Names use
//! the metadata dialect, i.e. `Outer/Inner` for nested types and `List`1<System.Int32>` for generic
//! instances. Translating to the runtime dialect is the job of [`crate::SymbolResolver`].
//!
//! [`MethodRef`] is the imported form of a member, used as the operand of `call`, `callvirt` and
//! `newobj` instructions emitted by the weaver.

use std::fmt;

/// Full name of the distinguished void type.
pub const VOID_TYPE: &str = "System.Void";

/// A symbolic, unresolved type reference.
///
/// References are produced by the module loader and never mutated afterwards; resolution creates
/// separate [`crate::metadata::typesystem::LiveType`] descriptors.
///
/// # Examples
///
/// ```rust
/// use cilweave::metadata::TypeRef;
///
/// let list = TypeRef::generic(
///     TypeRef::new("System.Collections.Generic.List`1"),
///     vec![TypeRef::new("System.Int32")],
/// );
/// assert!(list.is_generic_instance());
/// assert_eq!(list.full_name(), "System.Collections.Generic.List`1<System.Int32>");
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TypeRef {
    full_name: String,
    generic: Option<GenericInstance>,
}

/// The element type and arguments of a generic instance reference.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct GenericInstance {
    /// The open generic definition, e.g. ``System.Collections.Generic.List`1``
    pub element: Box<TypeRef>,
    /// The type arguments in declaration order; each may itself be a generic instance
    pub arguments: Vec<TypeRef>,
}

impl TypeRef {
    /// Create a reference to a non-generic type (or an open generic definition).
    ///
    /// ## Arguments
    /// * 'full_name' - Metadata-dialect full name, e.g. `System.Int32` or `Outer/Inner`
    pub fn new(full_name: impl Into<String>) -> Self {
        TypeRef {
            full_name: full_name.into(),
            generic: None,
        }
    }

    /// Create a reference to a closed generic instance.
    ///
    /// The full name is derived the way metadata readers print it:
    /// ``Element<Arg1,Arg2>``.
    pub fn generic(element: TypeRef, arguments: Vec<TypeRef>) -> Self {
        let args = arguments
            .iter()
            .map(TypeRef::full_name)
            .collect::<Vec<_>>()
            .join(",");
        TypeRef {
            full_name: format!("{}<{}>", element.full_name, args),
            generic: Some(GenericInstance {
                element: Box::new(element),
                arguments,
            }),
        }
    }

    /// Reference to `System.Void`.
    #[must_use]
    pub fn void() -> Self {
        TypeRef::new(VOID_TYPE)
    }

    /// Metadata-dialect full name.
    #[must_use]
    pub fn full_name(&self) -> &str {
        &self.full_name
    }

    /// Whether this reference is a closed generic instance.
    #[must_use]
    pub fn is_generic_instance(&self) -> bool {
        self.generic.is_some()
    }

    /// The open generic element of a generic instance.
    #[must_use]
    pub fn element_type(&self) -> Option<&TypeRef> {
        self.generic.as_ref().map(|g| g.element.as_ref())
    }

    /// The type arguments of a generic instance; empty otherwise.
    #[must_use]
    pub fn generic_arguments(&self) -> &[TypeRef] {
        self.generic
            .as_ref()
            .map_or(&[][..], |g| g.arguments.as_slice())
    }

    /// Whether this reference names `System.Void`.
    #[must_use]
    pub fn is_void(&self) -> bool {
        self.full_name == VOID_TYPE
    }

    /// The namespace portion of the name (empty for global and nested types).
    #[must_use]
    pub fn namespace(&self) -> &str {
        let base = self.element_type().map_or(self.full_name.as_str(), |e| e.full_name());
        if base.contains('/') {
            return "";
        }
        base.rfind('.').map_or("", |idx| &base[..idx])
    }
}

impl fmt::Display for TypeRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.full_name)
    }
}

/// An imported member reference, the operand of call-like instructions.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct MethodRef {
    /// The type declaring the member
    pub declaring_type: TypeRef,
    /// Member name; `.ctor` for instance constructors
    pub name: String,
    /// Parameter types, excluding the implicit `this`
    pub parameters: Vec<TypeRef>,
    /// Return type; `System.Void` for constructors
    pub return_type: TypeRef,
    /// Whether the member takes an implicit `this` argument
    pub has_this: bool,
}

impl MethodRef {
    /// Number of values a call to this member pops from the evaluation stack.
    #[must_use]
    pub fn stack_arguments(&self) -> usize {
        self.parameters.len() + usize::from(self.has_this)
    }

    /// Whether this is an instance constructor reference.
    #[must_use]
    pub fn is_constructor(&self) -> bool {
        self.name == ".ctor"
    }
}

impl fmt::Display for MethodRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let params = self
            .parameters
            .iter()
            .map(TypeRef::full_name)
            .collect::<Vec<_>>()
            .join(",");
        write!(
            f,
            "{} {}::{}({})",
            self.return_type, self.declaring_type, self.name, params
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_nested_generic_name() {
        let inner = TypeRef::generic(
            TypeRef::new("System.Nullable`1"),
            vec![TypeRef::new("System.Int32")],
        );
        let dict = TypeRef::generic(
            TypeRef::new("System.Collections.Generic.Dictionary`2"),
            vec![TypeRef::new("System.String"), inner],
        );

        assert_eq!(
            dict.full_name(),
            "System.Collections.Generic.Dictionary`2<System.String,System.Nullable`1<System.Int32>>"
        );
        assert_eq!(dict.generic_arguments().len(), 2);
        assert!(dict.generic_arguments()[1].is_generic_instance());
        assert_eq!(dict.namespace(), "System.Collections.Generic");
    }

    #[test]
    fn test_namespace() {
        assert_eq!(TypeRef::new("App.Services.Calculator").namespace(), "App.Services");
        assert_eq!(TypeRef::new("<>c__DisplayClass0").namespace(), "");
        assert_eq!(TypeRef::new("App.Outer/Inner").namespace(), "");
        assert!(TypeRef::void().is_void());
        assert!(TypeRef::void().generic_arguments().is_empty());
    }
}
