//! Step-bounded execution of a single method body.
//!
//! The [`Interpreter`] runs the instructions of one [`MethodDef`] against a [`Host`], with the
//! exception-handling semantics of the runtime:
//!
//! - a raised exception is matched against catch regions protecting the raising instruction,
//!   innermost first; finally regions passed on the way run before the catch handler is entered
//! - `leave` runs every finally region it exits, innermost first, then continues at its target
//! - `rethrow` re-raises the exception of the innermost catch handler executing it
//! - an exception no region catches ends execution with [`Completion::Threw`]

use std::ops::Range;

use log::debug;

use crate::{
    emulation::{EmValue, Host},
    metadata::{
        method::{InstructionId, MethodBody, OpCode, Operand},
        MethodDef, TypeRef,
    },
    Error, Result,
};

/// Execution limits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EmulationLimits {
    /// Maximum number of instructions executed before [`Error::StepLimit`] is returned
    pub max_steps: u64,
}

impl Default for EmulationLimits {
    fn default() -> Self {
        EmulationLimits { max_steps: 10_000 }
    }
}

/// How a method or host call finished.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Completion {
    /// Normal return, with the return value of non-void methods
    Returned(Option<EmValue>),
    /// An exception escaped
    Threw(EmValue),
}

#[derive(Debug)]
struct Region {
    is_catch: bool,
    protected: Range<usize>,
    handler: Range<usize>,
    catch_type: Option<TypeRef>,
}

#[derive(Debug)]
enum Pending {
    /// Finally handlers still to run for a `leave`, innermost first, then the target
    Leave { rest: Vec<usize>, target: usize },
    /// An exception raised at `origin`, handler search resumes after region `next`
    Unwind {
        exception: EmValue,
        origin: usize,
        next: usize,
    },
}

/// Frame state of one execution.
struct Frame<'b> {
    body: &'b MethodBody,
    regions: Vec<Region>,
    arguments: Vec<EmValue>,
    locals: Vec<EmValue>,
    stack: Vec<EmValue>,
    pending: Vec<Pending>,
    caught: Vec<Option<EmValue>>,
    pc: usize,
}

enum Flow {
    Next,
    Jump(usize),
    Done(Completion),
}

/// Interpreter for woven and unwoven method bodies.
///
/// # Examples
///
/// ```rust
/// use cilweave::emulation::{Completion, EmValue, EmulationLimits, Interpreter, RecordingHost};
/// use cilweave::metadata::{method::{MethodBodyBuilder, OpCode}, MethodDef, TypeRef};
///
/// let body = MethodBodyBuilder::new().ldarg(0).ldarg(1).op(OpCode::Add).ret().build()?;
/// let add = MethodDef::new("Add", TypeRef::new("System.Int32"))
///     .with_static()
///     .with_parameter("a", TypeRef::new("System.Int32"))
///     .with_parameter("b", TypeRef::new("System.Int32"))
///     .with_body(body);
///
/// let mut interpreter = Interpreter::new(EmulationLimits::default());
/// let mut host = RecordingHost::new();
/// let result = interpreter.execute(&add, None, vec![EmValue::I32(2), EmValue::I32(3)], &mut host)?;
///
/// assert_eq!(result, Completion::Returned(Some(EmValue::I32(5))));
/// assert_eq!(interpreter.trace().len(), 4);
/// # Ok::<(), cilweave::Error>(())
/// ```
pub struct Interpreter {
    limits: EmulationLimits,
    steps: u64,
    trace: Vec<OpCode>,
}

impl Interpreter {
    /// Creates a new interpreter with the given execution limits.
    #[must_use]
    pub fn new(limits: EmulationLimits) -> Self {
        Interpreter {
            limits,
            steps: 0,
            trace: Vec::new(),
        }
    }

    /// Returns a reference to the execution limits.
    #[must_use]
    pub fn limits(&self) -> &EmulationLimits {
        &self.limits
    }

    /// Opcodes executed by the last run, in order.
    #[must_use]
    pub fn trace(&self) -> &[OpCode] {
        &self.trace
    }

    /// Number of instructions executed by the last run.
    #[must_use]
    pub fn steps(&self) -> u64 {
        self.steps
    }

    /// Run `method` to completion.
    ///
    /// ## Arguments
    /// * 'method' - The method, which must have a body
    /// * 'this'   - Receiver of instance methods, becomes argument 0
    /// * 'args'   - Declared arguments
    /// * 'host'   - Answers calls, constructions and type tests
    ///
    /// # Errors
    /// Returns [`Error::Emulation`] for invalid code (stack underflow, unplaced targets, falling
    /// off the end) and [`Error::StepLimit`] when the step budget is exhausted.
    pub fn execute(
        &mut self,
        method: &MethodDef,
        this: Option<EmValue>,
        args: Vec<EmValue>,
        host: &mut dyn Host,
    ) -> Result<Completion> {
        let body = method
            .body
            .as_ref()
            .ok_or_else(|| Error::Emulation(format!("{} has no body", method.name)))?;

        self.steps = 0;
        self.trace.clear();

        let regions = body
            .exception_handlers
            .iter()
            .map(|h| -> Result<Region> {
                Ok(Region {
                    is_catch: h.is_catch(),
                    protected: position(body, h.try_start)?..position(body, h.try_end)?,
                    handler: position(body, h.handler_start)?..position(body, h.handler_end)?,
                    catch_type: h.catch_type.clone(),
                })
            })
            .collect::<Result<Vec<_>>>()?;

        let mut frame = Frame {
            body,
            caught: vec![None; regions.len()],
            regions,
            arguments: this.into_iter().chain(args).collect(),
            locals: body
                .variables()
                .iter()
                .map(|v| EmValue::default_for(&v.variable_type))
                .collect(),
            stack: Vec::new(),
            pending: Vec::new(),
            pc: 0,
        };

        loop {
            if self.steps >= self.limits.max_steps {
                return Err(Error::StepLimit(self.limits.max_steps));
            }
            self.steps += 1;

            let id = *body.ids().get(frame.pc).ok_or_else(|| {
                Error::Emulation(format!("{} ran past its last instruction", method.name))
            })?;
            let flow = self.step(&mut frame, id, method, host)?;
            match flow {
                Flow::Next => frame.pc += 1,
                Flow::Jump(pc) => frame.pc = pc,
                Flow::Done(completion) => {
                    debug!("{} finished after {} steps", method.name, self.steps);
                    return Ok(completion);
                }
            }
        }
    }

    fn step(
        &mut self,
        frame: &mut Frame<'_>,
        id: InstructionId,
        method: &MethodDef,
        host: &mut dyn Host,
    ) -> Result<Flow> {
        let body = frame.body;
        let instruction = body
            .get(id)
            .ok_or_else(|| Error::Emulation(format!("{id} does not exist")))?;
        self.trace.push(instruction.opcode);

        let flow = match (instruction.opcode, &instruction.operand) {
            (OpCode::Nop, _) => Flow::Next,
            (OpCode::Ldarg, Operand::Argument(index)) => {
                let value = slot(&frame.arguments, *index, "argument")?.clone();
                frame.stack.push(value);
                Flow::Next
            }
            (OpCode::Ldloc, Operand::Local(index)) => {
                let value = slot(&frame.locals, *index, "local")?.clone();
                frame.stack.push(value);
                Flow::Next
            }
            (OpCode::Stloc, Operand::Local(index)) => {
                let value = frame.pop()?;
                let target = frame
                    .locals
                    .get_mut(usize::from(*index))
                    .ok_or_else(|| Error::Emulation(format!("local {index} does not exist")))?;
                *target = value;
                Flow::Next
            }
            (OpCode::Ldnull, _) => {
                frame.stack.push(EmValue::Null);
                Flow::Next
            }
            (OpCode::LdcI4, Operand::Int32(value)) => {
                frame.stack.push(EmValue::I32(*value));
                Flow::Next
            }
            (OpCode::Ldstr, Operand::String(value)) => {
                frame.stack.push(EmValue::Str(value.clone()));
                Flow::Next
            }
            (OpCode::Dup, _) => {
                let value = frame.pop()?;
                frame.stack.push(value.clone());
                frame.stack.push(value);
                Flow::Next
            }
            (OpCode::Pop, _) => {
                frame.pop()?;
                Flow::Next
            }
            (OpCode::Add | OpCode::Sub | OpCode::Mul, _) => {
                let right = frame.pop()?;
                let left = frame.pop()?;
                frame
                    .stack
                    .push(arithmetic(instruction.opcode, &left, &right)?);
                Flow::Next
            }
            (OpCode::Ceq | OpCode::Clt | OpCode::Cgt, _) => {
                let right = frame.pop()?;
                let left = frame.pop()?;
                frame
                    .stack
                    .push(compare(instruction.opcode, &left, &right)?);
                Flow::Next
            }
            (OpCode::Br, Operand::Target(target)) => Flow::Jump(position(body, *target)?),
            (OpCode::Brtrue | OpCode::Brfalse, Operand::Target(target)) => {
                let taken = frame.pop()?.is_true() == (instruction.opcode == OpCode::Brtrue);
                if taken {
                    Flow::Jump(position(body, *target)?)
                } else {
                    Flow::Next
                }
            }
            (OpCode::Call | OpCode::Callvirt, Operand::Method(callee)) => {
                let args = frame.pop_n(callee.parameters.len())?;
                let this = if callee.has_this {
                    Some(frame.pop()?)
                } else {
                    None
                };
                match host.call(callee, this, args)? {
                    Completion::Returned(value) => {
                        if let Some(value) = value.filter(|_| !callee.return_type.is_void()) {
                            frame.stack.push(value);
                        }
                        Flow::Next
                    }
                    Completion::Threw(exception) => frame.raise(exception, host)?,
                }
            }
            (OpCode::Newobj, Operand::Method(ctor)) => {
                let args = frame.pop_n(ctor.parameters.len())?;
                match host.new_object(ctor, args)? {
                    Completion::Returned(Some(object)) => {
                        frame.stack.push(object);
                        Flow::Next
                    }
                    Completion::Returned(None) => {
                        return Err(Error::Emulation(format!("{ctor} produced no object")))
                    }
                    Completion::Threw(exception) => frame.raise(exception, host)?,
                }
            }
            (OpCode::Ret, _) => {
                let value = if method.is_void() {
                    None
                } else {
                    Some(frame.pop()?)
                };
                Flow::Done(Completion::Returned(value))
            }
            (OpCode::Throw, _) => match frame.pop()? {
                EmValue::Null => {
                    return Err(Error::Emulation(format!("{id} throws null")));
                }
                exception => frame.raise(exception, host)?,
            },
            (OpCode::Rethrow, _) => {
                let exception = frame.current_exception().ok_or_else(|| {
                    Error::Emulation(format!("{id} rethrows outside a catch handler"))
                })?;
                frame.raise(exception, host)?
            }
            (OpCode::Leave, Operand::Target(target)) => {
                let target = position(body, *target)?;
                frame.leave(target)
            }
            (OpCode::Endfinally, _) => frame.end_finally(host)?,
            (opcode, operand) => {
                return Err(Error::Emulation(format!(
                    "{id}: {opcode} cannot take operand {operand:?}"
                )))
            }
        };
        Ok(flow)
    }
}

impl Frame<'_> {
    fn pop(&mut self) -> Result<EmValue> {
        self.stack
            .pop()
            .ok_or_else(|| Error::Emulation(format!("stack underflow at {}", self.pc)))
    }

    fn pop_n(&mut self, count: usize) -> Result<Vec<EmValue>> {
        if self.stack.len() < count {
            return Err(Error::Emulation(format!("stack underflow at {}", self.pc)));
        }
        Ok(self.stack.split_off(self.stack.len() - count))
    }

    /// Exception of the innermost catch handler containing the current instruction.
    fn current_exception(&self) -> Option<EmValue> {
        self.regions
            .iter()
            .zip(&self.caught)
            .find(|(region, _)| region.is_catch && region.handler.contains(&self.pc))
            .and_then(|(_, caught)| caught.clone())
    }

    fn raise(&mut self, exception: EmValue, host: &dyn Host) -> Result<Flow> {
        debug!("Exception {} raised at {}", exception, self.pc);
        Ok(self.unwind(exception, self.pc, 0, host))
    }

    /// Search regions from `next` on for one protecting `origin`.
    fn unwind(&mut self, exception: EmValue, origin: usize, next: usize, host: &dyn Host) -> Flow {
        self.stack.clear();
        for index in next..self.regions.len() {
            let region = &self.regions[index];
            if !region.protected.contains(&origin) {
                continue;
            }

            if region.is_catch {
                let matches = region
                    .catch_type
                    .as_ref()
                    .is_some_and(|t| host.is_instance(&exception, t));
                if matches {
                    let handler = region.handler.start;
                    self.caught[index] = Some(exception.clone());
                    self.stack.push(exception);
                    return Flow::Jump(handler);
                }
            } else {
                let handler = region.handler.start;
                self.pending.push(Pending::Unwind {
                    exception,
                    origin,
                    next: index + 1,
                });
                return Flow::Jump(handler);
            }
        }
        Flow::Done(Completion::Threw(exception))
    }

    fn leave(&mut self, target: usize) -> Flow {
        self.stack.clear();
        let pc = self.pc;
        let mut finallies: Vec<usize> = self
            .regions
            .iter()
            .enumerate()
            .filter(|(_, r)| {
                !r.is_catch && r.protected.contains(&pc) && !r.protected.contains(&target)
            })
            .map(|(index, _)| index)
            .collect();

        if finallies.is_empty() {
            return Flow::Jump(target);
        }
        let first = finallies.remove(0);
        self.pending.push(Pending::Leave {
            rest: finallies,
            target,
        });
        Flow::Jump(self.regions[first].handler.start)
    }

    fn end_finally(&mut self, host: &dyn Host) -> Result<Flow> {
        self.stack.clear();
        match self.pending.pop() {
            Some(Pending::Leave { mut rest, target }) => {
                if rest.is_empty() {
                    return Ok(Flow::Jump(target));
                }
                let next = rest.remove(0);
                let handler = self.regions[next].handler.start;
                self.pending.push(Pending::Leave { rest, target });
                Ok(Flow::Jump(handler))
            }
            Some(Pending::Unwind {
                exception,
                origin,
                next,
            }) => Ok(self.unwind(exception, origin, next, host)),
            None => Err(Error::Emulation(format!(
                "endfinally at {} outside a finally handler",
                self.pc
            ))),
        }
    }
}

fn position(body: &MethodBody, id: InstructionId) -> Result<usize> {
    body.position(id)
        .ok_or_else(|| Error::Emulation(format!("{id} is not placed")))
}

fn slot<'a>(values: &'a [EmValue], index: u16, kind: &str) -> Result<&'a EmValue> {
    values
        .get(usize::from(index))
        .ok_or_else(|| Error::Emulation(format!("{kind} {index} does not exist")))
}

fn arithmetic(opcode: OpCode, left: &EmValue, right: &EmValue) -> Result<EmValue> {
    match (left, right) {
        (EmValue::I32(a), EmValue::I32(b)) => Ok(EmValue::I32(match opcode {
            OpCode::Add => a.wrapping_add(*b),
            OpCode::Sub => a.wrapping_sub(*b),
            _ => a.wrapping_mul(*b),
        })),
        (EmValue::I64(a), EmValue::I64(b)) => Ok(EmValue::I64(match opcode {
            OpCode::Add => a.wrapping_add(*b),
            OpCode::Sub => a.wrapping_sub(*b),
            _ => a.wrapping_mul(*b),
        })),
        _ => Err(Error::Emulation(format!(
            "{opcode} is undefined for {left} and {right}"
        ))),
    }
}

fn compare(opcode: OpCode, left: &EmValue, right: &EmValue) -> Result<EmValue> {
    let ordering = match (left, right) {
        (EmValue::I32(a), EmValue::I32(b)) => a.cmp(b),
        (EmValue::I64(a), EmValue::I64(b)) => a.cmp(b),
        _ if opcode == OpCode::Ceq => return Ok(EmValue::from_bool(left == right)),
        _ => {
            return Err(Error::Emulation(format!(
                "{opcode} is undefined for {left} and {right}"
            )))
        }
    };
    Ok(EmValue::from_bool(match opcode {
        OpCode::Ceq => ordering.is_eq(),
        OpCode::Clt => ordering.is_lt(),
        _ => ordering.is_gt(),
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        emulation::RecordingHost,
        metadata::{method::MethodBodyBuilder, MethodRef},
    };

    const INVALID_OPERATION: &str = "System.InvalidOperationException";

    fn run(method: &MethodDef, args: Vec<EmValue>, host: &mut RecordingHost) -> Result<Completion> {
        Interpreter::new(EmulationLimits::default()).execute(method, None, args, host)
    }

    fn fail() -> MethodRef {
        MethodRef {
            declaring_type: TypeRef::new("App.Helpers"),
            name: "Fail".to_string(),
            parameters: Vec::new(),
            return_type: TypeRef::void(),
            has_this: false,
        }
    }

    fn helper(name: &str) -> MethodRef {
        MethodRef {
            name: name.to_string(),
            ..fail()
        }
    }

    #[test]
    fn test_branches() -> Result<()> {
        let body = MethodBodyBuilder::new()
            .ldarg(0)
            .ldc_i4(10)
            .op(OpCode::Clt)
            .branch(OpCode::Brfalse, "big")
            .ldc_i4(1)
            .ret()
            .label("big")
            .ldc_i4(2)
            .ret()
            .build()?;
        let method = MethodDef::new("Classify", TypeRef::new("System.Int32"))
            .with_static()
            .with_body(body);

        let mut host = RecordingHost::new();
        assert_eq!(
            run(&method, vec![EmValue::I32(3)], &mut host)?,
            Completion::Returned(Some(EmValue::I32(1)))
        );
        assert_eq!(
            run(&method, vec![EmValue::I32(30)], &mut host)?,
            Completion::Returned(Some(EmValue::I32(2)))
        );
        Ok(())
    }

    #[test]
    fn test_locals_and_arguments() -> Result<()> {
        let body = MethodBodyBuilder::new()
            .local(TypeRef::new("System.Int32"))
            .ldloc(0)
            .ldarg(0)
            .op(OpCode::Add)
            .stloc(0)
            .ldloc(0)
            .ret()
            .build()?;
        let method = MethodDef::new("Echo", TypeRef::new("System.Int32"))
            .with_static()
            .with_body(body);

        let mut host = RecordingHost::new();
        assert_eq!(
            run(&method, vec![EmValue::I32(9)], &mut host)?,
            Completion::Returned(Some(EmValue::I32(9)))
        );

        // Reading an argument that was never passed is invalid code.
        let result = run(&method, Vec::new(), &mut host);
        assert!(matches!(result, Err(Error::Emulation(m)) if m == "argument 0 does not exist"));
        Ok(())
    }

    #[test]
    fn test_catch_matching() -> Result<()> {
        let body = MethodBodyBuilder::new()
            .label("try")
            .call(fail())
            .leave("done")
            .label("handler")
            .op(OpCode::Pop)
            .call(helper("Caught"))
            .leave("done")
            .label("done")
            .ret()
            .catch_handler("try", "handler", "done", TypeRef::new("System.ArgumentException"))
            .build()?;
        let method = MethodDef::new("Guarded", TypeRef::void())
            .with_static()
            .with_body(body);

        let mut host =
            RecordingHost::new().raise_from("App.Helpers", "Fail", "System.ArgumentException");
        assert_eq!(run(&method, Vec::new(), &mut host)?, Completion::Returned(None));
        assert_eq!(host.count("Caught"), 1);

        // A non-matching exception escapes the region.
        let mut host = RecordingHost::new().raise_from("App.Helpers", "Fail", INVALID_OPERATION);
        let result = run(&method, Vec::new(), &mut host)?;
        assert!(matches!(
            result,
            Completion::Threw(EmValue::Object(o)) if o.type_name == INVALID_OPERATION
        ));
        assert_eq!(host.count("Caught"), 0);
        Ok(())
    }

    #[test]
    fn test_finally_runs_on_leave_and_unwind() -> Result<()> {
        let body = MethodBodyBuilder::new()
            .label("try")
            .call(fail())
            .leave("done")
            .label("finally")
            .call(helper("Cleanup"))
            .op(OpCode::Endfinally)
            .label("done")
            .ret()
            .finally_handler("try", "finally", "done")
            .build()?;
        let method = MethodDef::new("Protected", TypeRef::void())
            .with_static()
            .with_body(body);

        let mut host = RecordingHost::new();
        assert_eq!(run(&method, Vec::new(), &mut host)?, Completion::Returned(None));
        assert_eq!(host.call_names(), vec!["Fail", "Cleanup"]);

        let mut host = RecordingHost::new().raise_from("App.Helpers", "Fail", INVALID_OPERATION);
        assert!(matches!(run(&method, Vec::new(), &mut host)?, Completion::Threw(_)));
        assert_eq!(host.call_names(), vec!["Fail", "Cleanup"]);
        Ok(())
    }

    #[test]
    fn test_rethrow_outside_handler_is_an_error() -> Result<()> {
        let body = MethodBodyBuilder::new().op(OpCode::Rethrow).build()?;
        let method = MethodDef::new("Broken", TypeRef::void()).with_static().with_body(body);
        let result = run(&method, Vec::new(), &mut RecordingHost::new());
        assert!(matches!(result, Err(Error::Emulation(_))));
        Ok(())
    }

    #[test]
    fn test_step_limit() -> Result<()> {
        let body = MethodBodyBuilder::new()
            .label("loop")
            .branch(OpCode::Br, "loop")
            .build()?;
        let method = MethodDef::new("Spin", TypeRef::void()).with_static().with_body(body);

        let mut interpreter = Interpreter::new(EmulationLimits { max_steps: 50 });
        let result = interpreter.execute(&method, None, Vec::new(), &mut RecordingHost::new());
        assert!(matches!(result, Err(Error::StepLimit(50))));
        assert_eq!(interpreter.steps(), 50);
        Ok(())
    }
}
