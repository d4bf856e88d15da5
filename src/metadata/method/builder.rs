//! Label-based assembly of [`MethodBody`] instances.
//!
//! [`MethodBodyBuilder`] is how the module loader and tests construct bodies without juggling
//! instruction ids: branch targets and region boundaries are given as label names, which are
//! bound to the next emitted instruction and resolved when the body is built.

use std::collections::HashMap;

use crate::{
    metadata::{
        method::{
            ExceptionHandler, ExceptionHandlerFlags, Instruction, InstructionId, MethodBody,
            OpCode, Operand,
        },
        MethodRef, TypeRef,
    },
    Result,
};

enum Emitted {
    Plain(Instruction),
    Branch(OpCode, String),
}

struct PendingHandler {
    flags: ExceptionHandlerFlags,
    try_start: String,
    try_end: String,
    handler_start: String,
    handler_end: String,
    catch_type: Option<TypeRef>,
}

/// Builder for creating method bodies.
///
/// # Examples
///
/// ```rust
/// use cilweave::metadata::method::{MethodBodyBuilder, OpCode};
/// use cilweave::metadata::TypeRef;
///
/// // static int Max(int a, int b) => a > b ? a : b;
/// let body = MethodBodyBuilder::new()
///     .local(TypeRef::new("System.Int32"))
///     .ldarg(0)
///     .ldarg(1)
///     .op(OpCode::Cgt)
///     .branch(OpCode::Brfalse, "second")
///     .ldarg(0)
///     .ret()
///     .label("second")
///     .ldarg(1)
///     .ret()
///     .build()?;
///
/// assert_eq!(body.returns().len(), 2);
/// # Ok::<(), cilweave::Error>(())
/// ```
pub struct MethodBodyBuilder {
    max_stack: Option<usize>,
    init_locals: bool,
    locals: Vec<TypeRef>,
    code: Vec<Emitted>,
    labels: HashMap<String, usize>,
    pending_labels: Vec<String>,
    handlers: Vec<PendingHandler>,
}

impl Default for MethodBodyBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl MethodBodyBuilder {
    /// Create a new empty builder.
    #[must_use]
    pub fn new() -> Self {
        MethodBodyBuilder {
            max_stack: None,
            init_locals: true,
            locals: Vec::new(),
            code: Vec::new(),
            labels: HashMap::new(),
            pending_labels: Vec::new(),
            handlers: Vec::new(),
        }
    }

    /// Set the maximum stack depth; defaults to 8.
    #[must_use]
    pub fn max_stack(mut self, stack_size: usize) -> Self {
        self.max_stack = Some(stack_size);
        self
    }

    /// Set whether locals are zero-initialized.
    #[must_use]
    pub fn init_locals(mut self, init: bool) -> Self {
        self.init_locals = init;
        self
    }

    /// Declare the next local variable slot.
    #[must_use]
    pub fn local(mut self, local_type: TypeRef) -> Self {
        self.locals.push(local_type);
        self
    }

    /// Bind `name` to the next emitted instruction.
    #[must_use]
    pub fn label(mut self, name: &str) -> Self {
        self.pending_labels.push(name.to_string());
        self
    }

    /// Emit an arbitrary instruction.
    #[must_use]
    pub fn emit(mut self, instruction: Instruction) -> Self {
        let position = self.code.len();
        for label in self.pending_labels.drain(..) {
            self.labels.insert(label, position);
        }
        self.code.push(Emitted::Plain(instruction));
        self
    }

    /// Emit an instruction without operand.
    #[must_use]
    pub fn op(self, opcode: OpCode) -> Self {
        self.emit(Instruction::new(opcode))
    }

    /// Emit a branch or `leave` to `label`.
    #[must_use]
    pub fn branch(mut self, opcode: OpCode, label: &str) -> Self {
        let position = self.code.len();
        for pending in self.pending_labels.drain(..) {
            self.labels.insert(pending, position);
        }
        self.code.push(Emitted::Branch(opcode, label.to_string()));
        self
    }

    /// `ldarg index`
    #[must_use]
    pub fn ldarg(self, index: u16) -> Self {
        self.emit(Instruction::ldarg(index))
    }

    /// `ldloc index`
    #[must_use]
    pub fn ldloc(self, index: u16) -> Self {
        self.emit(Instruction::ldloc(index))
    }

    /// `stloc index`
    #[must_use]
    pub fn stloc(self, index: u16) -> Self {
        self.emit(Instruction::stloc(index))
    }

    /// `ldc.i4 value`
    #[must_use]
    pub fn ldc_i4(self, value: i32) -> Self {
        self.emit(Instruction::ldc_i4(value))
    }

    /// `call method`
    #[must_use]
    pub fn call(self, method: MethodRef) -> Self {
        self.emit(Instruction::invoke(OpCode::Call, method))
    }

    /// `callvirt method`
    #[must_use]
    pub fn callvirt(self, method: MethodRef) -> Self {
        self.emit(Instruction::invoke(OpCode::Callvirt, method))
    }

    /// `newobj ctor`
    #[must_use]
    pub fn newobj(self, ctor: MethodRef) -> Self {
        self.emit(Instruction::invoke(OpCode::Newobj, ctor))
    }

    /// `leave label`
    #[must_use]
    pub fn leave(self, label: &str) -> Self {
        self.branch(OpCode::Leave, label)
    }

    /// `ret`
    #[must_use]
    pub fn ret(self) -> Self {
        self.op(OpCode::Ret)
    }

    /// Add a typed catch region; boundaries are labels, ends exclusive.
    #[must_use]
    pub fn catch_handler(
        mut self,
        try_start: &str,
        handler_start: &str,
        handler_end: &str,
        exception_type: TypeRef,
    ) -> Self {
        self.handlers.push(PendingHandler {
            flags: ExceptionHandlerFlags::EXCEPTION,
            try_start: try_start.to_string(),
            try_end: handler_start.to_string(),
            handler_start: handler_start.to_string(),
            handler_end: handler_end.to_string(),
            catch_type: Some(exception_type),
        });
        self
    }

    /// Add a finally region; boundaries are labels, ends exclusive.
    #[must_use]
    pub fn finally_handler(mut self, try_start: &str, handler_start: &str, handler_end: &str) -> Self {
        self.handlers.push(PendingHandler {
            flags: ExceptionHandlerFlags::FINALLY,
            try_start: try_start.to_string(),
            try_end: handler_start.to_string(),
            handler_start: handler_start.to_string(),
            handler_end: handler_end.to_string(),
            catch_type: None,
        });
        self
    }

    /// Resolve labels and produce the body.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::Malformed`] if:
    /// - a label is referenced but never bound, or bound past the last instruction
    /// - the resulting body fails [`MethodBody::validate`]
    pub fn build(self) -> Result<MethodBody> {
        let MethodBodyBuilder {
            max_stack,
            init_locals,
            locals,
            code,
            labels,
            pending_labels,
            handlers,
        } = self;

        if let Some(dangling) = pending_labels.first() {
            return Err(malformed_error!(
                "Label '{}' is not followed by an instruction",
                dangling
            ));
        }

        let lookup = |label: &str| -> Result<InstructionId> {
            labels
                .get(label)
                .map(|position| InstructionId(*position as u32))
                .ok_or_else(|| malformed_error!("Label '{}' is not defined", label))
        };

        let mut body = MethodBody::new();
        body.init_locals = init_locals;
        if let Some(max_stack) = max_stack {
            body.max_stack = max_stack;
        }
        for local in locals {
            body.add_variable(local)?;
        }

        // Arena slots are allocated in emission order, so a label's position is its id.
        for emitted in code {
            let instruction = match emitted {
                Emitted::Plain(instruction) => instruction,
                Emitted::Branch(opcode, label) => {
                    Instruction::with_operand(opcode, Operand::Target(lookup(&label)?))
                }
            };
            body.append(instruction);
        }

        for pending in handlers {
            body.exception_handlers.push(ExceptionHandler {
                flags: pending.flags,
                try_start: lookup(&pending.try_start)?,
                try_end: lookup(&pending.try_end)?,
                handler_start: lookup(&pending.handler_start)?,
                handler_end: lookup(&pending.handler_end)?,
                catch_type: pending.catch_type,
            });
        }

        body.validate()?;
        Ok(body)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_labels_resolve() -> Result<()> {
        let body = MethodBodyBuilder::new()
            .ldarg(0)
            .branch(OpCode::Brtrue, "done")
            .op(OpCode::Nop)
            .label("done")
            .ret()
            .build()?;

        let ids = body.ids().to_vec();
        assert_eq!(body.get(ids[1]).and_then(Instruction::target), Some(ids[3]));
        Ok(())
    }

    #[test]
    fn test_handler_labels() -> Result<()> {
        let body = MethodBodyBuilder::new()
            .label("try")
            .op(OpCode::Nop)
            .leave("end")
            .label("handler")
            .op(OpCode::Pop)
            .leave("end")
            .label("end")
            .ret()
            .catch_handler("try", "handler", "end", TypeRef::new("System.Exception"))
            .build()?;

        let handler = &body.exception_handlers[0];
        assert!(handler.is_catch());
        assert_eq!(body.position(handler.handler_start), Some(2));
        assert_eq!(body.position(handler.handler_end), Some(4));
        Ok(())
    }

    #[test]
    fn test_undefined_label() {
        assert!(MethodBodyBuilder::new().leave("nowhere").ret().build().is_err());
        assert!(MethodBodyBuilder::new().ret().label("tail").build().is_err());
    }
}
