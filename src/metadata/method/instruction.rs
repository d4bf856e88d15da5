//! CIL instruction representation for editable method bodies.
//!
//! Instructions live in an arena owned by their [`crate::metadata::method::MethodBody`] and are
//! addressed through stable [`InstructionId`] handles. Branch and `leave` operands as well as
//! exception-handler boundaries are ids, never owning pointers, so rewriting the body (inserting
//! around an instruction, replacing it in place) never invalidates other references.
//!
//! # Key Components
//!
//! - [`OpCode`] - The subset of CIL opcodes the weaver emits and the verification interpreter runs
//! - [`Operand`] - Type-safe operand representation
//! - [`FlowType`] - Control flow behavior classification
//! - [`Instruction`] - Opcode plus operand

use std::fmt;

use strum::{Display, EnumIter, IntoStaticStr};

use crate::metadata::{MethodRef, TypeRef};

/// Stable handle of an instruction inside one method body arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct InstructionId(pub(crate) u32);

impl InstructionId {
    /// Arena slot of this instruction.
    #[must_use]
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for InstructionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "IL_{:04}", self.0)
    }
}

/// CIL opcodes understood by this crate.
///
/// Long and short encodings (`ldarg.0`, `ldarg.s`, `ldarg`) collapse into one variant with an
/// explicit operand; choosing the encoding is left to the serializer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, IntoStaticStr, EnumIter)]
pub enum OpCode {
    /// Do nothing
    #[strum(serialize = "nop")]
    Nop,
    /// Load argument onto the stack
    #[strum(serialize = "ldarg")]
    Ldarg,
    /// Load local variable onto the stack
    #[strum(serialize = "ldloc")]
    Ldloc,
    /// Pop value into a local variable
    #[strum(serialize = "stloc")]
    Stloc,
    /// Push a null reference
    #[strum(serialize = "ldnull")]
    Ldnull,
    /// Push a 32-bit integer constant
    #[strum(serialize = "ldc.i4")]
    LdcI4,
    /// Push a string literal
    #[strum(serialize = "ldstr")]
    Ldstr,
    /// Duplicate the top of the stack
    #[strum(serialize = "dup")]
    Dup,
    /// Discard the top of the stack
    #[strum(serialize = "pop")]
    Pop,
    /// Integer addition
    #[strum(serialize = "add")]
    Add,
    /// Integer subtraction
    #[strum(serialize = "sub")]
    Sub,
    /// Integer multiplication
    #[strum(serialize = "mul")]
    Mul,
    /// Compare equal
    #[strum(serialize = "ceq")]
    Ceq,
    /// Compare less than
    #[strum(serialize = "clt")]
    Clt,
    /// Compare greater than
    #[strum(serialize = "cgt")]
    Cgt,
    /// Unconditional branch
    #[strum(serialize = "br")]
    Br,
    /// Branch if non-zero / non-null
    #[strum(serialize = "brtrue")]
    Brtrue,
    /// Branch if zero / null
    #[strum(serialize = "brfalse")]
    Brfalse,
    /// Static or non-virtual call
    #[strum(serialize = "call")]
    Call,
    /// Virtual call
    #[strum(serialize = "callvirt")]
    Callvirt,
    /// Allocate and construct an object
    #[strum(serialize = "newobj")]
    Newobj,
    /// Return from the method
    #[strum(serialize = "ret")]
    Ret,
    /// Raise the exception on top of the stack
    #[strum(serialize = "throw")]
    Throw,
    /// Re-raise the exception currently being handled
    #[strum(serialize = "rethrow")]
    Rethrow,
    /// Exit a protected region, running enclosed finally handlers
    #[strum(serialize = "leave")]
    Leave,
    /// End of a finally handler
    #[strum(serialize = "endfinally")]
    Endfinally,
}

/// How an instruction affects control flow.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlowType {
    /// Normal execution continues to next instruction
    Sequential,
    /// Conditional branch to another location
    ConditionalBranch,
    /// Always branches to another location (unconditional jump)
    UnconditionalBranch,
    /// Call to another method
    Call,
    /// Returns from current method
    Return,
    /// Exception throwing
    Throw,
    /// End of finally block
    EndFinally,
    /// Leave protected region (try/catch/finally)
    Leave,
}

impl OpCode {
    /// Control flow classification of this opcode.
    #[must_use]
    pub fn flow_type(self) -> FlowType {
        match self {
            OpCode::Br => FlowType::UnconditionalBranch,
            OpCode::Brtrue | OpCode::Brfalse => FlowType::ConditionalBranch,
            OpCode::Call | OpCode::Callvirt | OpCode::Newobj => FlowType::Call,
            OpCode::Ret => FlowType::Return,
            OpCode::Throw | OpCode::Rethrow => FlowType::Throw,
            OpCode::Endfinally => FlowType::EndFinally,
            OpCode::Leave => FlowType::Leave,
            _ => FlowType::Sequential,
        }
    }
}

/// Operand of an instruction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Operand {
    /// No operand present
    None,
    /// 32-bit integer constant
    Int32(i32),
    /// String literal
    String(String),
    /// Method argument index (`this` is argument 0 for instance methods)
    Argument(u16),
    /// Local variable slot index
    Local(u16),
    /// Branch or leave target
    Target(InstructionId),
    /// Member reference for call-like instructions
    Method(MethodRef),
    /// Type reference
    Type(TypeRef),
}

/// A single instruction: opcode plus operand.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Instruction {
    /// The opcode
    pub opcode: OpCode,
    /// The operand data for this instruction
    pub operand: Operand,
}

impl Instruction {
    /// An instruction without operand.
    #[must_use]
    pub fn new(opcode: OpCode) -> Self {
        Instruction {
            opcode,
            operand: Operand::None,
        }
    }

    /// An instruction with the given operand.
    #[must_use]
    pub fn with_operand(opcode: OpCode, operand: Operand) -> Self {
        Instruction { opcode, operand }
    }

    /// `ldarg index`
    #[must_use]
    pub fn ldarg(index: u16) -> Self {
        Self::with_operand(OpCode::Ldarg, Operand::Argument(index))
    }

    /// `ldloc index`
    #[must_use]
    pub fn ldloc(index: u16) -> Self {
        Self::with_operand(OpCode::Ldloc, Operand::Local(index))
    }

    /// `stloc index`
    #[must_use]
    pub fn stloc(index: u16) -> Self {
        Self::with_operand(OpCode::Stloc, Operand::Local(index))
    }

    /// `ldc.i4 value`
    #[must_use]
    pub fn ldc_i4(value: i32) -> Self {
        Self::with_operand(OpCode::LdcI4, Operand::Int32(value))
    }

    /// `leave target`
    #[must_use]
    pub fn leave(target: InstructionId) -> Self {
        Self::with_operand(OpCode::Leave, Operand::Target(target))
    }

    /// A call-like instruction (`call`, `callvirt`, `newobj`) to `method`.
    #[must_use]
    pub fn invoke(opcode: OpCode, method: MethodRef) -> Self {
        Self::with_operand(opcode, Operand::Method(method))
    }

    /// The branch or leave target, if this instruction has one.
    #[must_use]
    pub fn target(&self) -> Option<InstructionId> {
        match self.operand {
            Operand::Target(id) => Some(id),
            _ => None,
        }
    }

    /// Check if this instruction is a branch instruction.
    #[must_use]
    pub fn is_branch(&self) -> bool {
        matches!(
            self.opcode.flow_type(),
            FlowType::ConditionalBranch | FlowType::UnconditionalBranch
        )
    }

    /// Check if this instruction ends a basic block.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(
            self.opcode.flow_type(),
            FlowType::ConditionalBranch
                | FlowType::UnconditionalBranch
                | FlowType::Return
                | FlowType::Throw
                | FlowType::Leave
                | FlowType::EndFinally
        )
    }
}

impl fmt::Display for Instruction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mnemonic: &'static str = self.opcode.into();
        match &self.operand {
            Operand::None => write!(f, "{mnemonic}"),
            Operand::Int32(v) => write!(f, "{mnemonic} {v}"),
            Operand::String(s) => write!(f, "{mnemonic} \"{s}\""),
            Operand::Argument(a) => write!(f, "{mnemonic} A_{a}"),
            Operand::Local(l) => write!(f, "{mnemonic} V_{l}"),
            Operand::Target(t) => write!(f, "{mnemonic} {t}"),
            Operand::Method(m) => write!(f, "{mnemonic} {m}"),
            Operand::Type(t) => write!(f, "{mnemonic} {t}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use strum::IntoEnumIterator;

    use super::*;

    #[test]
    fn test_flow_classification() {
        assert_eq!(OpCode::Leave.flow_type(), FlowType::Leave);
        assert_eq!(OpCode::Rethrow.flow_type(), FlowType::Throw);
        assert_eq!(OpCode::Newobj.flow_type(), FlowType::Call);
        assert!(Instruction::leave(InstructionId(3)).is_terminal());
        assert!(!Instruction::leave(InstructionId(3)).is_branch());
        assert!(Instruction::with_operand(OpCode::Brtrue, Operand::Target(InstructionId(0))).is_branch());
        assert!(!Instruction::ldarg(0).is_terminal());
    }

    #[test]
    fn test_mnemonics_unique() {
        let mut seen = std::collections::HashSet::new();
        for opcode in OpCode::iter() {
            let mnemonic: &'static str = opcode.into();
            assert!(seen.insert(mnemonic), "duplicate mnemonic {mnemonic}");
        }
        assert_eq!(OpCode::LdcI4.to_string(), "ldc.i4");
        assert_eq!(Instruction::ldloc(2).to_string(), "ldloc V_2");
    }
}
