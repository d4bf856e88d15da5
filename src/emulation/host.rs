//! The world outside the emulated method.
//!
//! Woven code calls into handler and profiler types, the reflection API and arbitrary callees of
//! the original body. The interpreter delegates every one of those calls to a [`Host`].
//! [`RecordingHost`] answers them with inert objects and remembers every call, which is what the
//! end-to-end checks of woven bodies assert against.

use std::collections::HashMap;

use log::debug;

use crate::{
    emulation::{Completion, EmValue, ObjectRef},
    metadata::{MethodRef, TypeRef},
    Result,
};

/// Services the interpreter needs from its environment.
pub trait Host {
    /// Construct an instance of the constructor's declaring type.
    ///
    /// Returns [`Completion::Returned`] with the new object or [`Completion::Threw`] if the
    /// constructor raised.
    ///
    /// # Errors
    /// Returns [`crate::Error::Emulation`] if the host cannot model the call.
    fn new_object(&mut self, ctor: &MethodRef, args: Vec<EmValue>) -> Result<Completion>;

    /// Invoke `method` with an optional receiver.
    ///
    /// # Errors
    /// Returns [`crate::Error::Emulation`] if the host cannot model the call.
    fn call(
        &mut self,
        method: &MethodRef,
        this: Option<EmValue>,
        args: Vec<EmValue>,
    ) -> Result<Completion>;

    /// Whether `value` is an instance of `type_ref` or a type derived from it.
    fn is_instance(&self, value: &EmValue, type_ref: &TypeRef) -> bool;
}

/// One call observed by a [`RecordingHost`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostCall {
    /// Full name of the declaring type
    pub type_name: String,
    /// Member name, `.ctor` for constructions
    pub method: String,
    /// Receiver, for instance calls
    pub this: Option<EmValue>,
    /// Arguments in declaration order
    pub args: Vec<EmValue>,
}

/// A [`Host`] that records calls and returns default values.
///
/// # Examples
///
/// ```rust
/// use cilweave::emulation::{Host, RecordingHost, EmValue};
/// use cilweave::metadata::TypeRef;
///
/// let mut host = RecordingHost::new().with_base("App.ValidationException", "System.Exception");
/// let error = host.allocate("App.ValidationException");
///
/// assert!(host.is_instance(&error, &TypeRef::new("System.Exception")));
/// assert!(!host.is_instance(&EmValue::Null, &TypeRef::new("System.Object")));
/// ```
#[derive(Debug)]
pub struct RecordingHost {
    calls: Vec<HostCall>,
    bases: HashMap<String, String>,
    raises: HashMap<(String, String), String>,
    next_id: u32,
}

impl Default for RecordingHost {
    fn default() -> Self {
        Self::new()
    }
}

impl RecordingHost {
    /// A host knowing the core exception hierarchy.
    #[must_use]
    pub fn new() -> Self {
        let mut host = RecordingHost {
            calls: Vec::new(),
            bases: HashMap::new(),
            raises: HashMap::new(),
            next_id: 1,
        };
        for (derived, base) in [
            ("System.Exception", "System.Object"),
            ("System.SystemException", "System.Exception"),
            ("System.InvalidOperationException", "System.SystemException"),
            ("System.ArgumentException", "System.SystemException"),
            ("System.NullReferenceException", "System.SystemException"),
            ("System.NotSupportedException", "System.SystemException"),
            ("System.Reflection.MethodBase", "System.Reflection.MemberInfo"),
            ("System.Reflection.MemberInfo", "System.Object"),
        ] {
            host.bases.insert(derived.to_string(), base.to_string());
        }
        host
    }

    /// Declare the base class of `type_name`.
    #[must_use]
    pub fn with_base(mut self, type_name: &str, base: &str) -> Self {
        self.bases.insert(type_name.to_string(), base.to_string());
        self
    }

    /// Make every call to `type_name::method` raise a new `exception_type`.
    #[must_use]
    pub fn raise_from(mut self, type_name: &str, method: &str, exception_type: &str) -> Self {
        self.raises.insert(
            (type_name.to_string(), method.to_string()),
            exception_type.to_string(),
        );
        self
    }

    /// Create an object of `type_name` without recording a call.
    pub fn allocate(&mut self, type_name: &str) -> EmValue {
        let id = self.next_id;
        self.next_id += 1;
        EmValue::Object(ObjectRef {
            id,
            type_name: type_name.to_string(),
        })
    }

    /// Every call observed so far, in order.
    #[must_use]
    pub fn calls(&self) -> &[HostCall] {
        &self.calls
    }

    /// Names of the called members, in order.
    #[must_use]
    pub fn call_names(&self) -> Vec<&str> {
        self.calls.iter().map(|c| c.method.as_str()).collect()
    }

    /// Number of calls to a member named `method`.
    #[must_use]
    pub fn count(&self, method: &str) -> usize {
        self.calls.iter().filter(|c| c.method == method).count()
    }

    fn record(&mut self, method: &MethodRef, this: Option<EmValue>, args: Vec<EmValue>) {
        debug!("Host call {}", method);
        self.calls.push(HostCall {
            type_name: method.declaring_type.full_name().to_string(),
            method: method.name.clone(),
            this,
            args,
        });
    }

    fn raised_by(&mut self, method: &MethodRef) -> Option<EmValue> {
        let key = (
            method.declaring_type.full_name().to_string(),
            method.name.clone(),
        );
        let exception_type = self.raises.get(&key)?.clone();
        Some(self.allocate(&exception_type))
    }
}

impl Host for RecordingHost {
    fn new_object(&mut self, ctor: &MethodRef, args: Vec<EmValue>) -> Result<Completion> {
        self.record(ctor, None, args);
        if let Some(exception) = self.raised_by(ctor) {
            return Ok(Completion::Threw(exception));
        }
        let object = self.allocate(ctor.declaring_type.full_name());
        Ok(Completion::Returned(Some(object)))
    }

    fn call(
        &mut self,
        method: &MethodRef,
        this: Option<EmValue>,
        args: Vec<EmValue>,
    ) -> Result<Completion> {
        self.record(method, this, args);
        if let Some(exception) = self.raised_by(method) {
            return Ok(Completion::Threw(exception));
        }
        if method.return_type.is_void() {
            return Ok(Completion::Returned(None));
        }

        let value = match EmValue::default_for(&method.return_type) {
            // Reference-typed results are modeled as fresh objects of the declared type.
            EmValue::Null => self.allocate(method.return_type.full_name()),
            value => value,
        };
        Ok(Completion::Returned(Some(value)))
    }

    fn is_instance(&self, value: &EmValue, type_ref: &TypeRef) -> bool {
        let mut current = match value {
            EmValue::Object(obj) => obj.type_name.as_str(),
            EmValue::Str(_) => "System.String",
            EmValue::Null | EmValue::I32(_) | EmValue::I64(_) => return false,
        };
        loop {
            if current == type_ref.full_name() || type_ref.full_name() == "System.Object" {
                return true;
            }
            match self.bases.get(current) {
                Some(base) => current = base.as_str(),
                None => return false,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn method(type_name: &str, name: &str, ret: &str) -> MethodRef {
        MethodRef {
            declaring_type: TypeRef::new(type_name),
            name: name.to_string(),
            parameters: Vec::new(),
            return_type: TypeRef::new(ret),
            has_this: true,
        }
    }

    #[test]
    fn test_records_calls() -> Result<()> {
        let mut host = RecordingHost::new();
        let start = method("App.Profiler", "Start", "System.Void");
        let this = host.allocate("App.Profiler");

        let result = host.call(&start, Some(this.clone()), Vec::new())?;
        assert_eq!(result, Completion::Returned(None));
        assert_eq!(host.call_names(), vec!["Start"]);
        assert_eq!(host.calls()[0].this, Some(this));
        Ok(())
    }

    #[test]
    fn test_raise_from() -> Result<()> {
        let mut host = RecordingHost::new().raise_from(
            "App.Handler",
            "Handle",
            "System.InvalidOperationException",
        );
        let handle = method("App.Handler", "Handle", "System.Void");

        let Completion::Threw(exception) = host.call(&handle, None, Vec::new())? else {
            panic!("Handle should raise");
        };
        assert!(host.is_instance(&exception, &TypeRef::new("System.Exception")));
        assert!(!host.is_instance(&exception, &TypeRef::new("System.ArgumentException")));
        assert_eq!(host.count("Handle"), 1);
        Ok(())
    }

    #[test]
    fn test_default_results() -> Result<()> {
        let mut host = RecordingHost::new();
        let count = method("App.Store", "Count", "System.Int32");
        let current = method(
            "System.Reflection.MethodBase",
            "GetCurrentMethod",
            "System.Reflection.MethodBase",
        );

        assert_eq!(
            host.call(&count, None, Vec::new())?,
            Completion::Returned(Some(EmValue::I32(0)))
        );
        let Completion::Returned(Some(value)) = host.call(&current, None, Vec::new())? else {
            panic!("GetCurrentMethod should return");
        };
        assert!(host.is_instance(&value, &TypeRef::new("System.Reflection.MemberInfo")));
        Ok(())
    }
}
