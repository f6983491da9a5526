use std::fmt;

/// A logical value recognised by one of the [super::Packer] variants.
///
/// This is the one dynamically-tagged type the codec layer needs: metadata
/// picks a [super::Packer] at runtime (it was persisted as a string
/// identifier), so the value flowing through `pack`/`unpack` has to be able
/// to hold any of the domains that registry can produce.
#[derive(Clone, Debug, PartialEq)]
pub enum Value {
    Uint32(u32),
    Uint16(u16),
    Uint8(u8),
    Int32(i32),
    Int16(i16),
    Float(f32),
    Str(String),
    Obj(rmpv::Value),
    Revision(u32),
}

impl Value {
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Str(s) => Some(s.as_str()),
            _ => None,
        }
    }

    pub fn as_u32(&self) -> Option<u32> {
        match self {
            Value::Uint32(v) => Some(*v),
            Value::Revision(v) => Some(*v),
            _ => None,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Value::Uint32(v) => write!(f, "{}", v),
            Value::Uint16(v) => write!(f, "{}", v),
            Value::Uint8(v) => write!(f, "{}", v),
            Value::Int32(v) => write!(f, "{}", v),
            Value::Int16(v) => write!(f, "{}", v),
            Value::Float(v) => write!(f, "{}", v),
            Value::Str(v) => write!(f, "{:?}", v),
            Value::Obj(v) => write!(f, "{}", v),
            Value::Revision(v) => write!(f, "#{}", v),
        }
    }
}

impl From<u32> for Value {
    fn from(v: u32) -> Value {
        Value::Uint32(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Value {
        Value::Str(v.to_string())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Value {
        Value::Str(v)
    }
}

impl From<rmpv::Value> for Value {
    fn from(v: rmpv::Value) -> Value {
        Value::Obj(v)
    }
}
