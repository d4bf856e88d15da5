//! Instrumentation of a single method body.
//!
//! [`MethodWeaver`] wraps the body of one [`MethodDef`] in a new exception-handler region:
//!
//! - [`MethodWeaver::wrap_catch`] appends a catch handler that calls `Handle` and returns
//! - [`MethodWeaver::wrap_rethrow`] does the same but re-raises the exception afterwards
//! - [`MethodWeaver::wrap_measure`] constructs a profiler, calls `Start` up front and `Stop` in a
//!   finally handler, routing every `ret` through a single exit
//!
//! Every member the injected code calls is resolved before the body is touched, and edits are
//! made on a copy that replaces the body only once it validates. A failed weave therefore leaves
//! the method exactly as it was.
//!
//! Applying the same operation twice nests a second region around the first; the result runs,
//! but its shape is not something callers should depend on.
//!
//! # Layouts
//!
//! ```text
//! wrap_catch / wrap_rethrow            wrap_measure
//!
//!   <original body>          try         call     MethodBase::GetCurrentMethod
//! H: stloc    ex             handler     newobj   Profiler(MethodBase)
//!    newobj   Handler()                  stloc    prof
//!    ldloc    ex                         ldloc    prof
//!    ldnull | ldarg.0                    callvirt Start
//!    call     GetCurrentMethod        F: <original body, ret -> [stloc ret;] leave X>   try
//!    callvirt Handle                  P: ldloc    prof                                 finally
//!   [rethrow]                            callvirt Stop
//!    leave    E                          endfinally
//! E: [ldloc ret]                      X: [ldloc ret]
//!    ret                                 ret
//! ```

use log::{debug, info};

use crate::{
    metadata::{
        method::{ExceptionHandler, Instruction, InstructionId, MethodBody, OpCode},
        typesystem::{LiveTypeRc, MemberKind, SymbolResolver},
        MethodDef, MethodRef, TypeRef,
    },
    Error, Result,
};

/// Full name of the reflective method handle type.
pub const METHOD_BASE_TYPE: &str = "System.Reflection.MethodBase";

/// Name of the handler entry point.
pub const HANDLE_METHOD: &str = "Handle";

/// Name of the profiler's start hook.
pub const START_METHOD: &str = "Start";

/// Name of the profiler's stop hook.
pub const STOP_METHOD: &str = "Stop";

const GET_CURRENT_METHOD: &str = "GetCurrentMethod";

/// Peak evaluation stack depth of the catch handler: handler, exception, instance, method.
const HANDLER_STACK_DEPTH: usize = 4;

/// Peak evaluation stack depth of the profiler prologue and finally handler.
const MEASURE_STACK_DEPTH: usize = 2;

struct HandlerMembers {
    ctor: MethodRef,
    handle: MethodRef,
    current_method: MethodRef,
}

struct ProfilerMembers {
    ctor: MethodRef,
    start: MethodRef,
    stop: MethodRef,
    current_method: MethodRef,
}

/// Rewrites the body of one method.
///
/// # Examples
///
/// ```rust,no_run
/// use cilweave::metadata::{typesystem::{Domain, SymbolResolver}, Module, TypeRef};
/// use cilweave::weaver::MethodWeaver;
/// use std::sync::Arc;
///
/// # fn example(mut module: Module) -> cilweave::Result<()> {
/// let resolver = SymbolResolver::new(&module, Arc::new(Domain::new()), &[])?;
/// let method = module.find_method_mut("App.Calculator", "Add").expect("method");
///
/// MethodWeaver::new(&resolver, method)
///     .wrap_rethrow(
///         &TypeRef::new("System.Exception"),
///         &TypeRef::new("App.Logging.ExceptionLogger"),
///     )?
///     .wrap_measure(&TypeRef::new("App.Logging.Stopwatch"))?;
/// # Ok(())
/// # }
/// ```
pub struct MethodWeaver<'a> {
    resolver: &'a SymbolResolver,
    method: &'a mut MethodDef,
}

impl<'a> MethodWeaver<'a> {
    /// Prepare to rewrite `method`.
    pub fn new(resolver: &'a SymbolResolver, method: &'a mut MethodDef) -> Self {
        MethodWeaver { resolver, method }
    }

    /// The method being rewritten.
    #[must_use]
    pub fn method(&self) -> &MethodDef {
        self.method
    }

    /// Intercept `exception` escaping the body, call `handler.Handle` and return normally.
    ///
    /// Non-void methods then return the default value of their return type.
    ///
    /// # Errors
    /// Returns [`Error::TypeResolution`] if `handler` cannot be resolved,
    /// [`Error::MemberResolution`] if it lacks a parameterless constructor or a
    /// `void Handle(exception, instance, method)` member, and [`Error::Malformed`] if the body is
    /// empty or invalid. The body is unchanged on error.
    pub fn wrap_catch(&mut self, exception: &TypeRef, handler: &TypeRef) -> Result<&mut Self> {
        self.wrap_handler(exception, handler, false)
    }

    /// Intercept `exception` escaping the body, call `handler.Handle` and re-raise it.
    ///
    /// # Errors
    /// Same as [`MethodWeaver::wrap_catch`].
    pub fn wrap_rethrow(&mut self, exception: &TypeRef, handler: &TypeRef) -> Result<&mut Self> {
        self.wrap_handler(exception, handler, true)
    }

    /// Call `profiler.Start()` before the body and `profiler.Stop()` after it on every path.
    ///
    /// The profiler is constructed from the current method handle. Return values and exceptions
    /// propagate unchanged.
    ///
    /// # Errors
    /// Returns [`Error::TypeResolution`] if `profiler` cannot be resolved,
    /// [`Error::MemberResolution`] if it lacks a `(MethodBase)` constructor or zero-argument
    /// `void Start()` / `void Stop()` members, and [`Error::Malformed`] if the body is empty, has
    /// no `ret`, or is invalid. The body is unchanged on error.
    pub fn wrap_measure(&mut self, profiler: &TypeRef) -> Result<&mut Self> {
        let Some(body) = self.method.body.as_ref() else {
            debug!("{} has no body, nothing to measure", self.method.name);
            return Ok(self);
        };

        let members = self.profiler_members(profiler)?;
        let staged = self.stage_measure(body.clone(), profiler, &members)?;

        self.method.body = Some(staged);
        info!("Wove profiling into {}", self.method.name);
        Ok(self)
    }

    fn wrap_handler(
        &mut self,
        exception: &TypeRef,
        handler: &TypeRef,
        rethrow: bool,
    ) -> Result<&mut Self> {
        let Some(body) = self.method.body.as_ref() else {
            debug!("{} has no body, nothing to wrap", self.method.name);
            return Ok(self);
        };

        let members = self.handler_members(handler)?;
        let staged = self.stage_handler(body.clone(), exception, &members, rethrow)?;

        self.method.body = Some(staged);
        info!(
            "Wove exception {} into {}",
            if rethrow { "rethrow" } else { "catch" },
            self.method.name
        );
        Ok(self)
    }

    fn stage_handler(
        &self,
        mut body: MethodBody,
        exception: &TypeRef,
        members: &HandlerMembers,
        rethrow: bool,
    ) -> Result<MethodBody> {
        let first = first_instruction(&body, &self.method.name)?;
        let return_slot = self.return_slot(&mut body)?;
        let exception_slot = body.add_variable(exception.clone())?;

        let handler_start = body.append(Instruction::stloc(exception_slot));
        body.append(Instruction::invoke(OpCode::Newobj, members.ctor.clone()));
        body.append(Instruction::ldloc(exception_slot));
        body.append(self.load_instance());
        body.append(Instruction::invoke(
            OpCode::Call,
            members.current_method.clone(),
        ));
        body.append(Instruction::invoke(OpCode::Callvirt, members.handle.clone()));
        if rethrow {
            body.append(Instruction::new(OpCode::Rethrow));
        }

        let exit = append_exit(&mut body, return_slot)?;
        body.exception_handlers.push(ExceptionHandler::catch(
            first,
            handler_start,
            exit,
            exception.clone(),
        ));
        cover_header(&mut body, HANDLER_STACK_DEPTH);

        body.validate()?;
        Ok(body)
    }

    fn stage_measure(
        &self,
        mut body: MethodBody,
        profiler: &TypeRef,
        members: &ProfilerMembers,
    ) -> Result<MethodBody> {
        let first = first_instruction(&body, &self.method.name)?;
        let returns = body.returns();
        if returns.is_empty() {
            return Err(malformed_error!(
                "{} has no return instruction to route through the profiler",
                self.method.name
            ));
        }

        let return_slot = self.return_slot(&mut body)?;
        let profiler_slot = body.add_variable(profiler.clone())?;

        for instruction in [
            Instruction::invoke(OpCode::Call, members.current_method.clone()),
            Instruction::invoke(OpCode::Newobj, members.ctor.clone()),
            Instruction::stloc(profiler_slot),
            Instruction::ldloc(profiler_slot),
            Instruction::invoke(OpCode::Callvirt, members.start.clone()),
        ] {
            body.insert_before(first, instruction)?;
        }

        let finally_start = body.create(Instruction::ldloc(profiler_slot));
        let exit = body.create(match return_slot {
            Some(slot) => Instruction::ldloc(slot),
            None => Instruction::new(OpCode::Ret),
        });

        // The ret slot itself becomes the head of its replacement, so branches and region
        // boundaries that named it stay attached.
        for ret in returns {
            match return_slot {
                Some(slot) => {
                    body.replace(ret, Instruction::stloc(slot))?;
                    body.insert_after(ret, Instruction::leave(exit))?;
                }
                None => body.replace(ret, Instruction::leave(exit))?,
            }
            debug!("Routed {} of {} through the profiler", ret, self.method.name);
        }

        body.push(finally_start)?;
        body.append(Instruction::invoke(OpCode::Callvirt, members.stop.clone()));
        body.append(Instruction::new(OpCode::Endfinally));
        body.push(exit)?;
        if return_slot.is_some() {
            body.append(Instruction::new(OpCode::Ret));
        }

        body.exception_handlers
            .push(ExceptionHandler::finally(first, finally_start, exit));
        cover_header(&mut body, MEASURE_STACK_DEPTH);

        body.validate()?;
        Ok(body)
    }

    fn return_slot(&self, body: &mut MethodBody) -> Result<Option<u16>> {
        if self.method.is_void() {
            Ok(None)
        } else {
            body.add_variable(self.method.return_type.clone()).map(Some)
        }
    }

    fn load_instance(&self) -> Instruction {
        if self.method.is_static {
            Instruction::new(OpCode::Ldnull)
        } else {
            Instruction::ldarg(0)
        }
    }

    fn handler_members(&self, handler: &TypeRef) -> Result<HandlerMembers> {
        let live = self.resolve_strict(handler)?;

        let ctor = live
            .find_constructor(&[])
            .ok_or_else(|| missing_member(&live, "parameterless constructor"))?;
        let handle = live
            .base_chain()
            .flat_map(|t| t.members_named(HANDLE_METHOD))
            .find(|m| {
                m.kind == MemberKind::Method
                    && !m.is_static
                    && m.parameters.len() == 3
                    && m.is_void()
            })
            .ok_or_else(|| missing_member(&live, "void Handle(exception, instance, method)"))?;

        Ok(HandlerMembers {
            ctor: self.resolver.import_member(&live, ctor),
            handle: self.resolver.import_member(&live, handle),
            current_method: self.current_method()?,
        })
    }

    fn profiler_members(&self, profiler: &TypeRef) -> Result<ProfilerMembers> {
        let live = self.resolve_strict(profiler)?;

        let ctor = live
            .find_constructor(&[METHOD_BASE_TYPE])
            .ok_or_else(|| missing_member(&live, "constructor(System.Reflection.MethodBase)"))?;
        let hook = |name: &str| {
            live.base_chain()
                .find_map(|t| t.find_member(name, false, &[]).filter(|m| m.is_void()))
                .map(|member| self.resolver.import_member(&live, member))
                .ok_or_else(|| missing_member(&live, &format!("void {name}()")))
        };

        Ok(ProfilerMembers {
            ctor: self.resolver.import_member(&live, ctor),
            start: hook(START_METHOD)?,
            stop: hook(STOP_METHOD)?,
            current_method: self.current_method()?,
        })
    }

    fn current_method(&self) -> Result<MethodRef> {
        let method_base = self.resolve_strict(&TypeRef::new(METHOD_BASE_TYPE))?;
        let member = method_base
            .find_member(GET_CURRENT_METHOD, true, &[])
            .ok_or_else(|| missing_member(&method_base, "static GetCurrentMethod()"))?;
        Ok(self.resolver.import_member(&method_base, member))
    }

    fn resolve_strict(&self, reference: &TypeRef) -> Result<LiveTypeRc> {
        self.resolver
            .resolve(reference, true)?
            .ok_or_else(|| Error::TypeResolution(SymbolResolver::normalize(reference.full_name())))
    }
}

/// Grow the header so the injected code verifies: the catch path reads the return slot without
/// storing it first, which requires zero-initialized locals.
fn cover_header(body: &mut MethodBody, stack_depth: usize) {
    body.max_stack = body.max_stack.max(stack_depth);
    body.init_locals = true;
}

fn first_instruction(body: &MethodBody, method: &str) -> Result<InstructionId> {
    body.first()
        .ok_or_else(|| malformed_error!("{} has an empty body", method))
}

/// Append `leave E; E: [ldloc ret]; ret` and return `E`.
fn append_exit(body: &mut MethodBody, return_slot: Option<u16>) -> Result<InstructionId> {
    let exit = body.create(match return_slot {
        Some(slot) => Instruction::ldloc(slot),
        None => Instruction::new(OpCode::Ret),
    });
    body.append(Instruction::leave(exit));
    body.push(exit)?;
    if return_slot.is_some() {
        body.append(Instruction::new(OpCode::Ret));
    }
    Ok(exit)
}

fn missing_member(live: &LiveTypeRc, member: &str) -> Error {
    Error::MemberResolution {
        type_name: live.full_name.clone(),
        member: member.to_string(),
    }
}
