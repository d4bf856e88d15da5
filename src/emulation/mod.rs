//! CIL emulation for verifying woven method bodies.
//!
//! Weaving rewrites control flow: returns are routed through a common exit, protected regions
//! are wrapped around the original code and handlers call into external types. This module runs
//! a body, woven or not, so those rewrites can be checked by behavior rather than by shape.
//!
//! # Key Components
//!
//! - [`Interpreter`] - Step-bounded execution with try/catch/finally semantics
//! - [`EmulationLimits`] - Step budget of a run
//! - [`EmValue`] / [`ObjectRef`] - Runtime values
//! - [`Host`] - Calls, object construction and type tests leaving the method
//! - [`RecordingHost`] - A host recording every call, optionally raising from chosen members
//!
//! # Usage Examples
//!
//! ```rust
//! use cilweave::emulation::{Completion, EmulationLimits, Interpreter, RecordingHost};
//! use cilweave::metadata::{method::{MethodBodyBuilder, OpCode}, MethodDef, TypeRef};
//!
//! let body = MethodBodyBuilder::new().op(OpCode::Nop).ret().build()?;
//! let method = MethodDef::new("Run", TypeRef::void()).with_body(body);
//!
//! let mut host = RecordingHost::new();
//! let mut interpreter = Interpreter::new(EmulationLimits::default());
//! let this = host.allocate("App.Service");
//!
//! assert_eq!(
//!     interpreter.execute(&method, Some(this), Vec::new(), &mut host)?,
//!     Completion::Returned(None)
//! );
//! # Ok::<(), cilweave::Error>(())
//! ```

mod host;
mod interpreter;
mod value;

pub use host::{Host, HostCall, RecordingHost};
pub use interpreter::{Completion, EmulationLimits, Interpreter};
pub use value::{EmValue, ObjectRef};
