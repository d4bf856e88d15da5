//! Metadata model of the module under weaving.
//!
//! This module contains the static, name-based view of a compiled module (types, methods,
//! attributes and editable IL bodies) together with the live type universe those names are
//! resolved against.
//!
//! # Key Components
//!
//! - [`TypeRef`] / [`MethodRef`] - Symbolic references as they appear in metadata
//! - [`Module`] / [`TypeDef`] / [`MethodDef`] - The module being rewritten
//! - [`method`] - Instructions, method bodies, exception regions
//! - [`typesystem`] - Live type descriptors, runtime environments and the symbol resolver
//!
//! # Examples
//!
//! ```rust
//! use cilweave::metadata::{method::MethodBodyBuilder, MethodDef, Module, TypeDef, TypeRef};
//!
//! let body = MethodBodyBuilder::new().ldarg(0).ldarg(1).op(cilweave::metadata::method::OpCode::Add).ret().build()?;
//! let module = Module::new("App").with_type(
//!     TypeDef::new("App", "Calculator").with_method(
//!         MethodDef::new("Add", TypeRef::new("System.Int32"))
//!             .with_static()
//!             .with_parameter("a", TypeRef::new("System.Int32"))
//!             .with_parameter("b", TypeRef::new("System.Int32"))
//!             .with_body(body),
//!     ),
//! );
//! assert_eq!(module.method_count(), 1);
//! # Ok::<(), cilweave::Error>(())
//! ```

/// Editable method bodies
pub mod method;
/// Module, type and method definitions
mod module;
/// Symbolic type and member references
mod typeref;
/// Live type universe and symbol resolution
pub mod typesystem;

pub use module::{CustomAttribute, MethodDef, Module, Parameter, TypeDef};
pub use typeref::{GenericInstance, MethodRef, TypeRef, VOID_TYPE};
