//! Post-compilation instrumentation of method bodies.
//!
//! This module decides which methods receive which cross-cutting behavior and rewrites their
//! bodies accordingly.
//!
//! # Key Components
//!
//! - [`PolicyResolver`] / [`Concern`] - Attribute-driven eligibility, honoring inheritance
//! - [`MethodWeaver`] - Catch, rethrow and measure wrappers for a single body
//! - [`AssemblyWeaver`] / [`WeaveReport`] - A whole-module run and its outcome
//! - [`WeaveConfig`] - Which concerns run, with which handler and profiler types
//!
//! # Usage
//!
//! ```rust
//! use cilweave::metadata::method::{MethodBodyBuilder, OpCode};
//! use cilweave::metadata::{MethodDef, Module, TypeDef, TypeRef};
//! use cilweave::weaver::{AssemblyWeaver, Concern, WeaveConfig, WeaveOutcome};
//! use cilweave::{Domain, LiveAssembly, LiveMember, LiveTypeBuilder};
//! use std::sync::Arc;
//!
//! // The handler library the woven code will call.
//! let handlers = LiveAssembly::new("CilWeave.Handlers");
//! handlers.add_type(
//!     LiveTypeBuilder::new("CilWeave.Handlers", "TestContextExceptionLogger")
//!         .member(LiveMember::constructor(&[]))
//!         .member(LiveMember::method(
//!             "Handle",
//!             &["System.Exception", "System.Object", "System.Reflection.MethodBase"],
//!             "System.Void",
//!         ))
//!         .build(),
//! );
//! let domain = Domain::new();
//! domain.add_loaded(Arc::new(handlers));
//!
//! let body = MethodBodyBuilder::new().op(OpCode::Nop).ret().build()?;
//! let service = TypeDef::new("App", "Service")
//!     .with_attribute(Concern::Logging.enable_attribute())
//!     .with_method(MethodDef::new("Run", TypeRef::void()).with_body(body));
//! let mut module = Module::new("App")
//!     .with_reference("CilWeave.Handlers")
//!     .with_type(service);
//!
//! let weaver = AssemblyWeaver::new(WeaveConfig::logging_only(), Arc::new(domain));
//! let report = weaver.weave(&mut module)?;
//! assert_eq!(report.woven_count(), 1);
//! assert!(matches!(report.outcome("App.Service", "Run"), Some(WeaveOutcome::Woven(_))));
//! # Ok::<(), cilweave::Error>(())
//! ```

mod assembly;
mod config;
mod method;
mod policy;

pub use assembly::{
    AssemblyWeaver, MethodReport, ModuleSerializer, SkipReason, WeaveOutcome, WeaveReport,
};
pub use config::{
    LoggingMode, WeaveConfig, DEFAULT_EXCEPTION_TYPE, DEFAULT_HANDLER_TYPE, DEFAULT_PROFILER_TYPE,
    TEST_METHOD_ATTRIBUTE,
};
pub use method::{MethodWeaver, HANDLE_METHOD, METHOD_BASE_TYPE, START_METHOD, STOP_METHOD};
pub use policy::{
    Concern, PolicyResolver, DISABLE_LOGGING_ATTRIBUTE, DISABLE_PROFILING_ATTRIBUTE,
    ENABLE_LOGGING_ATTRIBUTE, ENABLE_PROFILING_ATTRIBUTE,
};
