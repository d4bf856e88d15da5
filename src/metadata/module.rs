//! The in-memory module model the weaver operates on.
//!
//! A [`Module`] is produced by the loading collaborator before weaving starts. Its structure
//! (types, methods, attributes) is never changed by this crate; only [`MethodDef::body`] is
//! rewritten in place.

use std::path::{Path, PathBuf};

use crate::metadata::{method::MethodBody, TypeRef};

/// A custom attribute applied to a type or method, as recorded in metadata.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CustomAttribute {
    /// The attribute class
    pub attribute_type: TypeRef,
}

impl CustomAttribute {
    /// Attribute of the class named `full_name`.
    pub fn new(full_name: impl Into<String>) -> Self {
        CustomAttribute {
            attribute_type: TypeRef::new(full_name),
        }
    }

    /// Full name of the attribute class.
    #[must_use]
    pub fn full_name(&self) -> &str {
        self.attribute_type.full_name()
    }
}

/// A named method parameter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Parameter {
    /// Declared name
    pub name: String,
    /// Declared type
    pub parameter_type: TypeRef,
}

/// A method definition.
///
/// Methods without a body (abstract, extern, interface members) are inert for weaving.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MethodDef {
    /// Method name; `.ctor` / `.cctor` for constructors
    pub name: String,
    /// Declared return type
    pub return_type: TypeRef,
    /// Whether the method is static
    pub is_static: bool,
    /// Whether the method is virtual
    pub is_virtual: bool,
    /// Parameters in declaration order, excluding `this`
    pub parameters: Vec<Parameter>,
    /// Attributes applied directly to this method
    pub custom_attributes: Vec<CustomAttribute>,
    /// The IL body, if any
    pub body: Option<MethodBody>,
}

impl MethodDef {
    /// An instance method without parameters, attributes or body.
    pub fn new(name: impl Into<String>, return_type: TypeRef) -> Self {
        MethodDef {
            name: name.into(),
            return_type,
            is_static: false,
            is_virtual: false,
            parameters: Vec::new(),
            custom_attributes: Vec::new(),
            body: None,
        }
    }

    /// An instance constructor without parameters.
    #[must_use]
    pub fn constructor() -> Self {
        MethodDef::new(".ctor", TypeRef::void())
    }

    /// Mark the method static.
    #[must_use]
    pub fn with_static(mut self) -> Self {
        self.is_static = true;
        self
    }

    /// Mark the method virtual.
    #[must_use]
    pub fn with_virtual(mut self) -> Self {
        self.is_virtual = true;
        self
    }

    /// Append a parameter.
    #[must_use]
    pub fn with_parameter(mut self, name: &str, parameter_type: TypeRef) -> Self {
        self.parameters.push(Parameter {
            name: name.to_string(),
            parameter_type,
        });
        self
    }

    /// Apply an attribute.
    #[must_use]
    pub fn with_attribute(mut self, full_name: &str) -> Self {
        self.custom_attributes.push(CustomAttribute::new(full_name));
        self
    }

    /// Attach a body.
    #[must_use]
    pub fn with_body(mut self, body: MethodBody) -> Self {
        self.body = Some(body);
        self
    }

    /// Whether this is an instance or type constructor.
    #[must_use]
    pub fn is_constructor(&self) -> bool {
        self.name == ".ctor" || self.name == ".cctor"
    }

    /// Whether the method returns `System.Void`.
    #[must_use]
    pub fn is_void(&self) -> bool {
        self.return_type.is_void()
    }

    /// Whether the method has an IL body.
    #[must_use]
    pub fn has_body(&self) -> bool {
        self.body.is_some()
    }

    /// Whether an attribute named `full_name` is applied directly to this method.
    #[must_use]
    pub fn has_custom_attribute(&self, full_name: &str) -> bool {
        self.custom_attributes
            .iter()
            .any(|attr| attr.full_name() == full_name)
    }
}

/// A type definition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TypeDef {
    /// Namespace; empty for compiler-generated and nested types
    pub namespace: String,
    /// Simple name
    pub name: String,
    /// Full name of the enclosing type, for nested types
    pub declaring_type: Option<String>,
    /// Base class, if any
    pub base_type: Option<TypeRef>,
    /// Attributes applied directly to this type
    pub custom_attributes: Vec<CustomAttribute>,
    /// Methods in declaration order
    pub methods: Vec<MethodDef>,
}

impl TypeDef {
    /// A top-level type.
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        TypeDef {
            namespace: namespace.into(),
            name: name.into(),
            declaring_type: None,
            base_type: None,
            custom_attributes: Vec::new(),
            methods: Vec::new(),
        }
    }

    /// A type nested in `declaring_type`; nested types carry no namespace of their own.
    pub fn nested(declaring_type: impl Into<String>, name: impl Into<String>) -> Self {
        TypeDef {
            declaring_type: Some(declaring_type.into()),
            ..TypeDef::new("", name)
        }
    }

    /// Set the base class.
    #[must_use]
    pub fn with_base(mut self, base_type: TypeRef) -> Self {
        self.base_type = Some(base_type);
        self
    }

    /// Apply an attribute.
    #[must_use]
    pub fn with_attribute(mut self, full_name: &str) -> Self {
        self.custom_attributes.push(CustomAttribute::new(full_name));
        self
    }

    /// Append a method.
    #[must_use]
    pub fn with_method(mut self, method: MethodDef) -> Self {
        self.methods.push(method);
        self
    }

    /// Metadata-dialect full name (`Ns.Name`, `Outer/Inner` or just `Name`).
    #[must_use]
    pub fn full_name(&self) -> String {
        match (&self.declaring_type, self.namespace.is_empty()) {
            (Some(outer), _) => format!("{}/{}", outer, self.name),
            (None, true) => self.name.clone(),
            (None, false) => format!("{}.{}", self.namespace, self.name),
        }
    }

    /// Symbolic reference to this type.
    #[must_use]
    pub fn as_type_ref(&self) -> TypeRef {
        TypeRef::new(self.full_name())
    }

    /// Whether this type has no namespace, which marks compiler-synthesized and nested types.
    #[must_use]
    pub fn is_anonymous(&self) -> bool {
        self.namespace.is_empty()
    }

    /// Whether an attribute named `full_name` is applied directly to this type.
    #[must_use]
    pub fn has_custom_attribute(&self, full_name: &str) -> bool {
        self.custom_attributes
            .iter()
            .any(|attr| attr.full_name() == full_name)
    }
}

/// A compiled module under weaving.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Module {
    /// Simple assembly name, e.g. `App`
    pub name: String,
    /// Location of the module file, if it was read from disk
    pub path: Option<PathBuf>,
    /// Simple names of referenced assemblies in declaration order
    pub references: Vec<String>,
    /// Types in declaration order
    pub types: Vec<TypeDef>,
}

impl Module {
    /// An empty module named `name`.
    pub fn new(name: impl Into<String>) -> Self {
        Module {
            name: name.into(),
            ..Default::default()
        }
    }

    /// Record the file the module was read from.
    #[must_use]
    pub fn with_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.path = Some(path.into());
        self
    }

    /// Declare an assembly reference.
    #[must_use]
    pub fn with_reference(mut self, name: &str) -> Self {
        self.references.push(name.to_string());
        self
    }

    /// Append a type.
    #[must_use]
    pub fn with_type(mut self, type_def: TypeDef) -> Self {
        self.types.push(type_def);
        self
    }

    /// Directory containing the module file, if known.
    #[must_use]
    pub fn directory(&self) -> Option<&Path> {
        self.path.as_deref().and_then(Path::parent)
    }

    /// Find a type by metadata-dialect full name.
    #[must_use]
    pub fn find_type(&self, full_name: &str) -> Option<&TypeDef> {
        self.types.iter().find(|t| t.full_name() == full_name)
    }

    /// Find a method by declaring type full name and method name.
    #[must_use]
    pub fn find_method(&self, type_name: &str, method_name: &str) -> Option<&MethodDef> {
        self.find_type(type_name)
            .and_then(|t| t.methods.iter().find(|m| m.name == method_name))
    }

    /// Mutable variant of [`Module::find_method`].
    pub fn find_method_mut(&mut self, type_name: &str, method_name: &str) -> Option<&mut MethodDef> {
        self.types
            .iter_mut()
            .find(|t| t.full_name() == type_name)
            .and_then(|t| t.methods.iter_mut().find(|m| m.name == method_name))
    }

    /// Total number of methods across all types.
    #[must_use]
    pub fn method_count(&self) -> usize {
        self.types.iter().map(|t| t.methods.len()).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_type_names() {
        let top = TypeDef::new("App.Services", "Calculator");
        let nested = TypeDef::nested("App.Services.Calculator", "Cache");
        let synthesized = TypeDef::new("", "<>f__AnonymousType0`2");

        assert_eq!(top.full_name(), "App.Services.Calculator");
        assert_eq!(nested.full_name(), "App.Services.Calculator/Cache");
        assert_eq!(synthesized.full_name(), "<>f__AnonymousType0`2");
        assert!(!top.is_anonymous());
        assert!(nested.is_anonymous());
        assert!(synthesized.is_anonymous());
    }

    #[test]
    fn test_module_lookup() {
        let mut module = Module::new("App")
            .with_path("/bin/App.dll")
            .with_reference("mscorlib")
            .with_type(
                TypeDef::new("App", "Program")
                    .with_method(MethodDef::new("Main", TypeRef::void()).with_static())
                    .with_method(MethodDef::constructor()),
            );

        assert_eq!(module.directory(), Some(Path::new("/bin")));
        assert_eq!(module.method_count(), 2);
        assert!(module.find_method("App.Program", "Main").is_some_and(|m| m.is_static));
        assert!(module
            .find_method("App.Program", ".ctor")
            .is_some_and(MethodDef::is_constructor));
        assert!(module.find_method_mut("App.Program", "Missing").is_none());
    }
}
