// Copyright 2025 Johann Kempter
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.
//
// SPDX-License-Identifier: Apache-2.0

#![doc(html_no_source)]
#![deny(missing_docs)]
#![deny(unsafe_code)]

//! # cilweave
//!
//! Post-compilation instrumentation of .NET CIL method bodies.
//!
//! `cilweave` takes an already compiled module, decides per method which cross-cutting
//! behaviors apply, and rewrites the method bodies to carry them:
//!
//! - **Exception logging** - the body is wrapped in a catch region whose handler passes the
//!   exception, the receiver and the current method to a handler type, then either returns or
//!   re-raises
//! - **Profiling** - a profiler built from the current method is started before the body and
//!   stopped in a finally region, with every return routed through a single exit
//!
//! Whether a method is eligible is controlled by enable/disable marker attributes on the method
//! or its type. Markers are evaluated against a live view of the type universe, so attributes
//! inherited from base types and from overridden members count.
//!
//! ## Quick Start
//!
//! ```rust
//! use cilweave::prelude::*;
//! use std::sync::Arc;
//!
//! // The profiler library woven code calls into.
//! let handlers = LiveAssembly::new("CilWeave.Handlers");
//! handlers.add_type(
//!     LiveTypeBuilder::new("CilWeave.Handlers", "PerformanceLogger")
//!         .member(LiveMember::constructor(&["System.Reflection.MethodBase"]))
//!         .member(LiveMember::method("Start", &[], "System.Void"))
//!         .member(LiveMember::method("Stop", &[], "System.Void"))
//!         .build(),
//! );
//! let domain = Domain::new();
//! domain.add_loaded(Arc::new(handlers));
//!
//! let body = MethodBodyBuilder::new().ldarg(0).ldarg(1).op(OpCode::Add).ret().build()?;
//! let add = MethodDef::new("Add", TypeRef::new("System.Int32"))
//!     .with_static()
//!     .with_parameter("a", TypeRef::new("System.Int32"))
//!     .with_parameter("b", TypeRef::new("System.Int32"))
//!     .with_attribute(Concern::Profiling.enable_attribute())
//!     .with_body(body);
//! let mut module = Module::new("App")
//!     .with_reference("CilWeave.Handlers")
//!     .with_type(TypeDef::new("App", "Calculator").with_method(add));
//!
//! let report = AssemblyWeaver::new(WeaveConfig::profiling_only(), Arc::new(domain))
//!     .weave(&mut module)?;
//! assert_eq!(report.woven_count(), 1);
//!
//! let woven = module.find_method("App.Calculator", "Add").and_then(|m| m.body.as_ref());
//! assert!(woven.is_some_and(|b| b.exception_handlers[0].is_finally()));
//! # Ok::<(), cilweave::Error>(())
//! ```
//!
//! ## Architecture
//!
//! - [`metadata`] - The editable module model: types, methods, instruction arenas, regions, and
//!   the live type universe used for attribute lookup
//! - [`weaver`] - Policy evaluation and the body rewrites
//! - [`emulation`] - An interpreter used to check woven bodies by running them
//! - [`Error`] and [`Result`] - Error handling
//!
//! Reading and writing binary images is not part of this crate. A loader produces a
//! [`metadata::Module`] and registers dependency images with a [`metadata::typesystem::Domain`];
//! a [`weaver::ModuleSerializer`] writes the woven module back.
//!
//! ## Logging
//!
//! The crate logs through the [`log`] facade and never installs a logger itself. Dependency loads
//! and woven methods are reported at `info`, per-method failures and policy fallbacks at `warn`,
//! cache and weaving details at `debug`.
//!
//! ## Error Handling
//!
//! All operations return [`Result<T, Error>`](Result):
//!
//! ```rust,no_run
//! use cilweave::{metadata::Module, weaver::{AssemblyWeaver, WeaveConfig}, Domain, Error};
//! use std::sync::Arc;
//!
//! # fn example(mut module: Module) {
//! let weaver = AssemblyWeaver::new(WeaveConfig::default(), Arc::new(Domain::new()));
//! match weaver.weave(&mut module) {
//!     Ok(report) => println!("{} methods woven", report.woven_count()),
//!     Err(Error::DependencyNotFound { name }) => println!("Missing dependency {}", name),
//!     Err(e) => println!("Other error: {}", e),
//! }
//! # }
//! ```

#[macro_use]
pub(crate) mod error;

/// Shared functionality which is used in unit-tests
#[cfg(test)]
pub(crate) mod test;

/// Convenient re-exports of the most commonly used types and traits.
///
/// # Example
///
/// ```rust
/// use cilweave::prelude::*;
///
/// let config = WeaveConfig::all().with_logging_mode(LoggingMode::Catch);
/// assert!(config.enable_profiling);
/// ```
pub mod prelude;

/// The module model and the live type universe
///
/// # Key Components
///
/// ## Module Model
/// - [`metadata::Module`], [`metadata::TypeDef`], [`metadata::MethodDef`] - What is woven
/// - [`metadata::TypeRef`], [`metadata::MethodRef`] - Symbolic references
///
/// ## Method Bodies
/// - [`metadata::method::MethodBody`] - Instruction arena with stable ids and regions
/// - [`metadata::method::MethodBodyBuilder`] - Label-based body assembly
///
/// ## Type System
/// - [`metadata::typesystem::SymbolResolver`] - Symbolic to live type resolution
/// - [`metadata::typesystem::Domain`] - In-memory runtime environment
pub mod metadata;

/// Eligibility decisions and body rewrites
pub mod weaver;

/// Verification interpreter for method bodies
pub mod emulation;

/// `cilweave` Result type
///
/// A type alias for [`std::result::Result<T, Error>`] where the error type is always [`Error`].
pub type Result<T> = std::result::Result<T, Error>;

/// `cilweave` Error type
///
/// The main error type for all operations in this crate.
pub use error::Error;

/// The in-memory runtime environment and its descriptors.
pub use metadata::typesystem::{
    Domain, LiveAssembly, LiveMember, LiveType, LiveTypeBuilder, RuntimeEnvironment,
};

/// Resolution of symbolic references onto the live type universe.
pub use metadata::typesystem::SymbolResolver;
