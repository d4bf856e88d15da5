//! Editable CIL method bodies.
//!
//! A [`MethodBody`] stores its instructions in an append-only arena and keeps program order as a
//! separate list of [`InstructionId`]s. Everything that points at an instruction (branch and leave
//! operands, exception-handler boundaries) stores an id, so splicing new code into the body is a
//! matter of editing the order list and, where needed, rewriting a single arena slot in place.
//!
//! # Examples
//!
//! ```rust
//! use cilweave::metadata::method::{Instruction, MethodBody, OpCode};
//!
//! let mut body = MethodBody::new();
//! let ret = body.append(Instruction::new(OpCode::Ret));
//! let load = body.insert_before(ret, Instruction::ldc_i4(42))?;
//!
//! assert_eq!(body.first(), Some(load));
//! assert_eq!(body.position(ret), Some(1));
//! body.validate()?;
//! # Ok::<(), cilweave::Error>(())
//! ```

use std::collections::HashMap;

use crate::{
    metadata::{
        method::{ExceptionHandler, Instruction, InstructionId, OpCode},
        TypeRef,
    },
    Result,
};

/// A local variable slot of a method body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Variable {
    /// Stable slot index, used as the `ldloc`/`stloc` operand
    pub index: u16,
    /// Declared type of the slot
    pub variable_type: TypeRef,
}

/// Describes one method that has been compiled to CIL bytecode, in editable form.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MethodBody {
    arena: Vec<Instruction>,
    order: Vec<InstructionId>,
    variables: Vec<Variable>,
    /// A list of exception handlers this method has
    pub exception_handlers: Vec<ExceptionHandler>,
    /// Maximum number of items on the operand stack
    pub max_stack: usize,
    /// Flag, indicating to call default constructor on all local variables
    pub init_locals: bool,
}

impl MethodBody {
    /// An empty body.
    #[must_use]
    pub fn new() -> Self {
        MethodBody {
            max_stack: 8,
            init_locals: true,
            ..Default::default()
        }
    }

    /// Allocate `instruction` in the arena without placing it in program order.
    ///
    /// Used to obtain an id for a forward `leave`/branch target before the target is emitted;
    /// the id must later be placed with [`MethodBody::push`] or it fails [`MethodBody::validate`].
    pub fn create(&mut self, instruction: Instruction) -> InstructionId {
        let id = InstructionId(self.arena.len() as u32);
        self.arena.push(instruction);
        id
    }

    /// Place a previously created instruction at the end of the body.
    ///
    /// # Errors
    /// Returns [`crate::Error::Malformed`] if `id` is unknown or already placed.
    pub fn push(&mut self, id: InstructionId) -> Result<()> {
        if id.index() >= self.arena.len() {
            return Err(malformed_error!("Instruction {} does not exist", id));
        }
        if self.order.contains(&id) {
            return Err(malformed_error!("Instruction {} is already placed", id));
        }
        self.order.push(id);
        Ok(())
    }

    /// Create `instruction` and place it at the end of the body.
    pub fn append(&mut self, instruction: Instruction) -> InstructionId {
        let id = self.create(instruction);
        self.order.push(id);
        id
    }

    /// Create `instruction` and place it immediately before `anchor`.
    ///
    /// # Errors
    /// Returns [`crate::Error::Malformed`] if `anchor` is not placed in this body.
    pub fn insert_before(
        &mut self,
        anchor: InstructionId,
        instruction: Instruction,
    ) -> Result<InstructionId> {
        let position = self.placed_position(anchor)?;
        let id = self.create(instruction);
        self.order.insert(position, id);
        Ok(id)
    }

    /// Create `instruction` and place it immediately after `anchor`.
    ///
    /// # Errors
    /// Returns [`crate::Error::Malformed`] if `anchor` is not placed in this body.
    pub fn insert_after(
        &mut self,
        anchor: InstructionId,
        instruction: Instruction,
    ) -> Result<InstructionId> {
        let position = self.placed_position(anchor)?;
        let id = self.create(instruction);
        self.order.insert(position + 1, id);
        Ok(id)
    }

    /// Overwrite the instruction stored at `id`.
    ///
    /// Every branch operand and region boundary naming `id` now refers to the new instruction.
    ///
    /// # Errors
    /// Returns [`crate::Error::Malformed`] if `id` does not exist.
    pub fn replace(&mut self, id: InstructionId, instruction: Instruction) -> Result<()> {
        match self.arena.get_mut(id.index()) {
            Some(slot) => {
                *slot = instruction;
                Ok(())
            }
            None => Err(malformed_error!("Instruction {} does not exist", id)),
        }
    }

    /// First instruction in program order.
    #[must_use]
    pub fn first(&self) -> Option<InstructionId> {
        self.order.first().copied()
    }

    /// Last instruction in program order.
    #[must_use]
    pub fn last(&self) -> Option<InstructionId> {
        self.order.last().copied()
    }

    /// Program-order position of `id`, if placed.
    #[must_use]
    pub fn position(&self, id: InstructionId) -> Option<usize> {
        self.order.iter().position(|placed| *placed == id)
    }

    /// The instruction stored at `id`.
    #[must_use]
    pub fn get(&self, id: InstructionId) -> Option<&Instruction> {
        self.arena.get(id.index())
    }

    /// Placed instruction ids in program order.
    #[must_use]
    pub fn ids(&self) -> &[InstructionId] {
        &self.order
    }

    /// Placed instructions in program order.
    pub fn instructions(&self) -> impl Iterator<Item = (InstructionId, &Instruction)> + '_ {
        self.order.iter().map(|id| (*id, &self.arena[id.index()]))
    }

    /// Number of placed instructions.
    #[must_use]
    pub fn len(&self) -> usize {
        self.order.len()
    }

    /// Whether no instruction is placed.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    /// Ids of every placed `ret` instruction, in program order.
    #[must_use]
    pub fn returns(&self) -> Vec<InstructionId> {
        self.instructions()
            .filter(|(_, instruction)| instruction.opcode == OpCode::Ret)
            .map(|(id, _)| id)
            .collect()
    }

    /// Append a local variable slot and return its index.
    ///
    /// # Errors
    /// Returns [`crate::Error::Malformed`] once the 16-bit slot space is exhausted.
    pub fn add_variable(&mut self, variable_type: TypeRef) -> Result<u16> {
        let index = u16::try_from(self.variables.len())
            .map_err(|_| malformed_error!("Too many local variables"))?;
        self.variables.push(Variable {
            index,
            variable_type,
        });
        Ok(index)
    }

    /// Local variable slots, ordered by index.
    #[must_use]
    pub fn variables(&self) -> &[Variable] {
        &self.variables
    }

    /// Check the structural invariants of this body.
    ///
    /// - every placed id exists and is placed once
    /// - every branch or leave target is placed
    /// - every region boundary is placed, with `try_start < try_end` and
    ///   `handler_start < handler_end` in program order
    /// - protected and handler ranges of different regions are disjoint or nested
    ///
    /// # Errors
    /// Returns [`crate::Error::Malformed`] describing the first violation found.
    pub fn validate(&self) -> Result<()> {
        let mut positions = HashMap::with_capacity(self.order.len());
        for (position, id) in self.order.iter().enumerate() {
            if id.index() >= self.arena.len() {
                return Err(malformed_error!("Placed instruction {} does not exist", id));
            }
            if positions.insert(*id, position).is_some() {
                return Err(malformed_error!("Instruction {} is placed twice", id));
            }
        }

        for (id, instruction) in self.instructions() {
            if let Some(target) = instruction.target() {
                if !positions.contains_key(&target) {
                    return Err(malformed_error!(
                        "{} at {} targets unplaced instruction {}",
                        instruction.opcode,
                        id,
                        target
                    ));
                }
            }
        }

        let mut ranges = Vec::with_capacity(self.exception_handlers.len() * 2);
        for (index, handler) in self.exception_handlers.iter().enumerate() {
            let mut bounds = [0_usize; 4];
            for (slot, boundary) in bounds.iter_mut().zip(handler.boundaries()) {
                *slot = *positions.get(&boundary).ok_or_else(|| {
                    malformed_error!(
                        "Exception handler {} references unplaced instruction {}",
                        index,
                        boundary
                    )
                })?;
            }
            let [try_start, try_end, handler_start, handler_end] = bounds;
            if try_start >= try_end || handler_start >= handler_end {
                return Err(malformed_error!(
                    "Exception handler {} has inverted boundaries",
                    index
                ));
            }
            if try_start < handler_end && handler_start < try_end {
                return Err(malformed_error!(
                    "Exception handler {} overlaps its own protected range",
                    index
                ));
            }
            ranges.push((index, try_start, try_end));
            ranges.push((index, handler_start, handler_end));
        }

        for (i, &(owner_a, start_a, end_a)) in ranges.iter().enumerate() {
            for &(owner_b, start_b, end_b) in &ranges[i + 1..] {
                if owner_a == owner_b {
                    continue;
                }
                let disjoint = end_a <= start_b || end_b <= start_a;
                let nested = (start_a <= start_b && end_b <= end_a)
                    || (start_b <= start_a && end_a <= end_b);
                if !disjoint && !nested {
                    return Err(malformed_error!(
                        "Exception handlers {} and {} partially overlap",
                        owner_a,
                        owner_b
                    ));
                }
            }
        }

        Ok(())
    }

    fn placed_position(&self, anchor: InstructionId) -> Result<usize> {
        self.position(anchor)
            .ok_or_else(|| malformed_error!("Anchor {} is not placed in this body", anchor))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metadata::method::Operand;

    #[test]
    fn test_insert_and_order() -> Result<()> {
        let mut body = MethodBody::new();
        let ret = body.append(Instruction::new(OpCode::Ret));
        let add = body.insert_before(ret, Instruction::new(OpCode::Add))?;
        let a = body.insert_before(add, Instruction::ldarg(0))?;
        let b = body.insert_after(a, Instruction::ldarg(1))?;

        assert_eq!(body.ids(), &[a, b, add, ret]);
        assert_eq!(body.first(), Some(a));
        assert_eq!(body.last(), Some(ret));
        assert_eq!(body.returns(), vec![ret]);
        body.validate()
    }

    #[test]
    fn test_replace_keeps_references() -> Result<()> {
        let mut body = MethodBody::new();
        let cond = body.append(Instruction::ldarg(0));
        let branch = body.create(Instruction::new(OpCode::Nop));
        body.push(branch)?;
        let ret = body.append(Instruction::new(OpCode::Ret));
        body.replace(
            branch,
            Instruction::with_operand(OpCode::Brtrue, Operand::Target(ret)),
        )?;
        body.replace(ret, Instruction::new(OpCode::Nop))?;

        assert_eq!(body.get(branch).and_then(Instruction::target), Some(ret));
        assert_eq!(body.get(ret).map(|i| i.opcode), Some(OpCode::Nop));
        assert_eq!(body.position(cond), Some(0));
        Ok(())
    }

    #[test]
    fn test_push_rejects_unknown_and_duplicate() {
        let mut body = MethodBody::new();
        let ret = body.append(Instruction::new(OpCode::Ret));
        assert!(body.push(ret).is_err());
        assert!(body.push(InstructionId(99)).is_err());
        assert!(body
            .insert_after(InstructionId(42), Instruction::new(OpCode::Nop))
            .is_err());
    }

    #[test]
    fn test_validate_unplaced_target() {
        let mut body = MethodBody::new();
        let dangling = body.create(Instruction::new(OpCode::Ret));
        body.append(Instruction::leave(dangling));
        assert!(body.validate().is_err());
    }

    #[test]
    fn test_validate_partial_overlap() -> Result<()> {
        let mut body = MethodBody::new();
        let ids: Vec<_> = (0..8)
            .map(|_| body.append(Instruction::new(OpCode::Nop)))
            .collect();
        body.exception_handlers
            .push(ExceptionHandler::finally(ids[0], ids[3], ids[5]));
        body.validate()?;

        body.exception_handlers.push(ExceptionHandler::finally(ids[2], ids[4], ids[6]));
        assert!(body.validate().is_err());
        Ok(())
    }

    #[test]
    fn test_validate_nested_regions() -> Result<()> {
        let mut body = MethodBody::new();
        let ids: Vec<_> = (0..8)
            .map(|_| body.append(Instruction::new(OpCode::Nop)))
            .collect();
        body.exception_handlers.push(ExceptionHandler::catch(
            ids[1],
            ids[3],
            ids[4],
            TypeRef::new("System.Exception"),
        ));
        body.exception_handlers
            .push(ExceptionHandler::finally(ids[0], ids[6], ids[7]));
        body.validate()
    }

    #[test]
    fn test_variables() -> Result<()> {
        let mut body = MethodBody::new();
        assert_eq!(body.add_variable(TypeRef::new("System.Int32"))?, 0);
        assert_eq!(body.add_variable(TypeRef::new("System.String"))?, 1);
        assert_eq!(body.variables()[1].variable_type.full_name(), "System.String");
        Ok(())
    }
}
