//! # cilweave Prelude
//!
//! This module provides a convenient prelude for the most commonly used types and traits
//! from the cilweave library. Import this module to get quick access to the essential
//! types for weaving a module.

// ================================================================================================
// Core Types and Error Handling
// ================================================================================================

/// The main error type for all cilweave operations
pub use crate::Error;

/// The result type used throughout cilweave
pub use crate::Result;

// ================================================================================================
// Module Model
// ================================================================================================

/// Types, methods and attributes of the module under weaving
pub use crate::metadata::{CustomAttribute, MethodDef, Module, Parameter, TypeDef};

/// Symbolic references
pub use crate::metadata::{MethodRef, TypeRef};

// ================================================================================================
// Method Bodies
// ================================================================================================

/// Instructions and editable bodies
pub use crate::metadata::method::{
    ExceptionHandler, ExceptionHandlerFlags, Instruction, InstructionId, MethodBody,
    MethodBodyBuilder, OpCode, Operand,
};

// ================================================================================================
// Type System
// ================================================================================================

/// The live type universe
pub use crate::metadata::typesystem::{
    Domain, LiveAssembly, LiveMember, LiveType, LiveTypeBuilder, LiveTypeRc, RuntimeEnvironment,
    SymbolResolver,
};

// ================================================================================================
// Weaving
// ================================================================================================

/// Policy, rewrites and whole-module runs
pub use crate::weaver::{
    AssemblyWeaver, Concern, LoggingMode, MethodWeaver, ModuleSerializer, PolicyResolver,
    WeaveConfig, WeaveOutcome, WeaveReport,
};

// ================================================================================================
// Emulation
// ================================================================================================

/// Verification interpreter
pub use crate::emulation::{
    Completion, EmValue, EmulationLimits, Host, Interpreter, RecordingHost,
};
