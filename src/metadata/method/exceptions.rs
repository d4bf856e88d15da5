//! Exception-handler regions of editable method bodies.
//!
//! Region boundaries are [`InstructionId`]s into the owning body's arena. Ends are exclusive:
//! `try_end` is the first instruction after the protected range, which for the regions the weaver
//! emits is also `handler_start`.

use bitflags::bitflags;

use crate::metadata::{method::InstructionId, TypeRef};

bitflags! {
    /// Exception handler flags defining the type of exception handling clause.
    ///
    /// These flags determine how the exception handler processes exceptions and
    /// control flow within try/catch/finally blocks.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct ExceptionHandlerFlags: u16 {
        /// A typed exception clause; `catch_type` names the exception kind.
        const EXCEPTION = 0x0000;

        /// An exception filter and handler clause.
        const FILTER = 0x0001;

        /// A finally clause, run on both normal and exceptional exit.
        const FINALLY = 0x0002;

        /// A fault clause (finally that executes only on exception).
        const FAULT = 0x0004;
    }
}

/// One try/handler region of a method body.
///
/// # Layout
///
/// ```text
/// try_start ... (try_end)          protected range
/// handler_start ... (handler_end)  catch or finally handler
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExceptionHandler {
    /// Flags describing the type of exception handler (catch, filter, finally, fault).
    pub flags: ExceptionHandlerFlags,
    /// First protected instruction.
    pub try_start: InstructionId,
    /// First instruction after the protected range.
    pub try_end: InstructionId,
    /// First handler instruction.
    pub handler_start: InstructionId,
    /// First instruction after the handler.
    pub handler_end: InstructionId,
    /// If flags == EXCEPTION, then this type will handle the exception.
    pub catch_type: Option<TypeRef>,
}

impl ExceptionHandler {
    /// A typed catch region.
    #[must_use]
    pub fn catch(
        try_start: InstructionId,
        handler_start: InstructionId,
        handler_end: InstructionId,
        catch_type: TypeRef,
    ) -> Self {
        ExceptionHandler {
            flags: ExceptionHandlerFlags::EXCEPTION,
            try_start,
            try_end: handler_start,
            handler_start,
            handler_end,
            catch_type: Some(catch_type),
        }
    }

    /// A finally region.
    #[must_use]
    pub fn finally(
        try_start: InstructionId,
        handler_start: InstructionId,
        handler_end: InstructionId,
    ) -> Self {
        ExceptionHandler {
            flags: ExceptionHandlerFlags::FINALLY,
            try_start,
            try_end: handler_start,
            handler_start,
            handler_end,
            catch_type: None,
        }
    }

    /// Whether this is a typed catch clause.
    ///
    /// `EXCEPTION` is the zero flag, so this compares instead of testing bits.
    #[must_use]
    pub fn is_catch(&self) -> bool {
        self.flags == ExceptionHandlerFlags::EXCEPTION
    }

    /// Whether this is a finally clause.
    #[must_use]
    pub fn is_finally(&self) -> bool {
        self.flags.contains(ExceptionHandlerFlags::FINALLY)
    }

    /// Every boundary id of this region.
    #[must_use]
    pub fn boundaries(&self) -> [InstructionId; 4] {
        [
            self.try_start,
            self.try_end,
            self.handler_start,
            self.handler_end,
        ]
    }

}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_predicates() {
        let catch = ExceptionHandler::catch(
            InstructionId(0),
            InstructionId(4),
            InstructionId(9),
            TypeRef::new("System.Exception"),
        );
        assert!(catch.is_catch());
        assert!(!catch.is_finally());
        assert_eq!(catch.try_end, catch.handler_start);

        let finally = ExceptionHandler::finally(InstructionId(0), InstructionId(4), InstructionId(7));
        assert!(finally.is_finally());
        assert!(!finally.is_catch());
        assert!(finally.catch_type.is_none());
    }
}
