//! Runtime values of the verification interpreter.

use std::fmt;

use crate::metadata::TypeRef;

/// Reference to an object created by a [`crate::emulation::Host`].
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ObjectRef {
    /// Host-assigned identity
    pub id: u32,
    /// Full name of the object's runtime type
    pub type_name: String,
}

/// A value on the evaluation stack, in an argument or in a local slot.
///
/// | CIL Type | EmValue Variant |
/// |----------|-----------------|
/// | `bool`, `int8` .. `int32` | [`EmValue::I32`] |
/// | `int64` | [`EmValue::I64`] |
/// | `string` literal | [`EmValue::Str`] |
/// | Object reference | [`EmValue::Object`] |
/// | `null` | [`EmValue::Null`] |
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EmValue {
    /// Null reference
    Null,
    /// 32-bit integer, also used for booleans
    I32(i32),
    /// 64-bit integer
    I64(i64),
    /// String value
    Str(String),
    /// Host object
    Object(ObjectRef),
}

impl EmValue {
    /// The zero value a slot of `type_ref` holds before its first store.
    #[must_use]
    pub fn default_for(type_ref: &TypeRef) -> Self {
        match type_ref.full_name() {
            "System.Boolean" | "System.Char" | "System.SByte" | "System.Byte" | "System.Int16"
            | "System.UInt16" | "System.Int32" | "System.UInt32" => EmValue::I32(0),
            "System.Int64" | "System.UInt64" => EmValue::I64(0),
            _ => EmValue::Null,
        }
    }

    /// Truthiness as tested by `brtrue` / `brfalse`.
    #[must_use]
    pub fn is_true(&self) -> bool {
        match self {
            EmValue::Null => false,
            EmValue::I32(v) => *v != 0,
            EmValue::I64(v) => *v != 0,
            EmValue::Str(_) | EmValue::Object(_) => true,
        }
    }

    /// The object reference, if this is one.
    #[must_use]
    pub fn as_object(&self) -> Option<&ObjectRef> {
        match self {
            EmValue::Object(obj) => Some(obj),
            _ => None,
        }
    }

    /// Boolean as pushed by comparison instructions.
    #[must_use]
    pub fn from_bool(value: bool) -> Self {
        EmValue::I32(i32::from(value))
    }
}

impl fmt::Display for EmValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EmValue::Null => f.write_str("null"),
            EmValue::I32(v) => write!(f, "{v}"),
            EmValue::I64(v) => write!(f, "{v}L"),
            EmValue::Str(s) => write!(f, "\"{s}\""),
            EmValue::Object(obj) => write!(f, "{}#{}", obj.type_name, obj.id),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        assert_eq!(EmValue::default_for(&TypeRef::new("System.Int32")), EmValue::I32(0));
        assert_eq!(EmValue::default_for(&TypeRef::new("System.Int64")), EmValue::I64(0));
        assert_eq!(EmValue::default_for(&TypeRef::new("System.String")), EmValue::Null);
    }

    #[test]
    fn test_truthiness() {
        assert!(!EmValue::Null.is_true());
        assert!(!EmValue::from_bool(false).is_true());
        assert!(EmValue::I64(-1).is_true());
        assert!(EmValue::Object(ObjectRef {
            id: 1,
            type_name: "System.Object".into()
        })
        .is_true());
    }
}
