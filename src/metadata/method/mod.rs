//! Editable CIL method bodies.
//!
//! This module holds everything the weaver needs to rewrite one method: the instruction
//! representation, the arena-backed [`MethodBody`], exception-handler regions and a label-based
//! [`MethodBodyBuilder`] for assembling bodies.
//!
//! # Key Components
//!
//! - [`Instruction`] / [`OpCode`] / [`Operand`] - Instructions with id-based branch targets
//! - [`MethodBody`] - Instruction arena, program order, variable slots and regions
//! - [`ExceptionHandler`] - Catch and finally regions bounded by instruction ids
//! - [`MethodBodyBuilder`] - Fluent assembly with named labels

mod body;
mod builder;
mod exceptions;
mod instruction;

pub use body::{MethodBody, Variable};
pub use builder::MethodBodyBuilder;
pub use exceptions::{ExceptionHandler, ExceptionHandlerFlags};
pub use instruction::{FlowType, Instruction, InstructionId, OpCode, Operand};
