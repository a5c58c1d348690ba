//! Module for the typed value model shared by the codec, the binder, and
//! service implementations.
use std::any::{Any, TypeId};
use std::borrow::Cow;
use std::fmt;
use std::rc::Rc;

/// Identifies a class of host objects that can cross the protocol boundary.
///
/// Identity is the concrete Rust type, so a handle minted by one service can
/// be consumed by a procedure of another service as long as both name the
/// same type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClassId {
    name: &'static str,
    type_id: TypeId,
}

impl ClassId {
    /// Creates the class identity for `T` under the given protocol name.
    pub fn of<T: 'static>(name: &'static str) -> ClassId {
        ClassId {
            name,
            type_id: TypeId::of::<T>(),
        }
    }

    /// Gets the protocol-visible class name.
    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Returns whether the given object is an instance of this class.
    pub fn matches(&self, object: &Rc<dyn Any>) -> bool {
        Any::type_id(&**object) == self.type_id
    }
}

/// Describes an enumeration type: its name and the declared numeric values.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnumDescriptor {
    /// The protocol-visible enumeration name.
    pub name: Cow<'static, str>,
    /// The declared member values.
    pub values: Cow<'static, [i32]>,
}

impl EnumDescriptor {
    /// Creates a descriptor from a name and the declared member values.
    pub fn new(
        name: impl Into<Cow<'static, str>>,
        values: impl Into<Cow<'static, [i32]>>,
    ) -> EnumDescriptor {
        EnumDescriptor {
            name: name.into(),
            values: values.into(),
        }
    }
}

/// Describes the type of a parameter or return value.
#[derive(Debug, Clone, PartialEq)]
pub enum TypeDescriptor {
    /// Signed 32-bit integer.
    Int32,
    /// Signed 64-bit integer.
    Int64,
    /// Unsigned 32-bit integer.
    UInt32,
    /// Unsigned 64-bit integer.
    UInt64,
    /// 32-bit floating point.
    Float,
    /// 64-bit floating point.
    Double,
    /// Boolean.
    Bool,
    /// UTF-8 string.
    String,
    /// Raw byte string.
    Bytes,
    /// An enumeration backed by a signed 32-bit integer.
    Enum(EnumDescriptor),
    /// An opaque protobuf message, identified by its schema name.
    Message(Cow<'static, str>),
    /// An ordered collection of one element type.
    List(Box<TypeDescriptor>),
    /// An unordered collection of unique elements.
    Set(Box<TypeDescriptor>),
    /// A keyed collection with unique keys.
    Dictionary(Box<TypeDescriptor>, Box<TypeDescriptor>),
    /// A fixed-arity heterogeneous collection.
    Tuple(Vec<TypeDescriptor>),
    /// A reference to a host object of the given class.
    Object(ClassId),
    /// No value.
    Void,
}

impl fmt::Display for TypeDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            TypeDescriptor::Int32 => f.write_str("int32"),
            TypeDescriptor::Int64 => f.write_str("int64"),
            TypeDescriptor::UInt32 => f.write_str("uint32"),
            TypeDescriptor::UInt64 => f.write_str("uint64"),
            TypeDescriptor::Float => f.write_str("float"),
            TypeDescriptor::Double => f.write_str("double"),
            TypeDescriptor::Bool => f.write_str("bool"),
            TypeDescriptor::String => f.write_str("string"),
            TypeDescriptor::Bytes => f.write_str("bytes"),
            TypeDescriptor::Enum(e) => write!(f, "enum({})", e.name),
            TypeDescriptor::Message(name) => write!(f, "message({})", name),
            TypeDescriptor::List(elem) => write!(f, "list({})", elem),
            TypeDescriptor::Set(elem) => write!(f, "set({})", elem),
            TypeDescriptor::Dictionary(key, value) => write!(f, "dictionary({}, {})", key, value),
            TypeDescriptor::Tuple(elems) => {
                f.write_str("tuple(")?;
                for (i, elem) in elems.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{}", elem)?;
                }
                f.write_str(")")
            }
            TypeDescriptor::Object(class) => write!(f, "class({})", class.name),
            TypeDescriptor::Void => f.write_str("void"),
        }
    }
}

/// A live reference to a host object: the wire handle plus the object itself.
#[derive(Clone)]
pub struct ObjectRef {
    /// The non-zero handle the object is known by on the wire.
    pub handle: u64,
    pub(crate) object: Rc<dyn Any>,
}

impl ObjectRef {
    pub(crate) fn new(handle: u64, object: Rc<dyn Any>) -> ObjectRef {
        ObjectRef { handle, object }
    }

    /// Attempts to view the referenced object as a `T`.
    pub fn downcast<T: 'static>(&self) -> Option<Rc<T>> {
        Rc::downcast::<T>(self.object.clone()).ok()
    }
}

// Equality is handle identity; the store guarantees handle <-> object is a
// bijection.
impl PartialEq for ObjectRef {
    fn eq(&self, other: &ObjectRef) -> bool {
        self.handle == other.handle
    }
}

impl fmt::Debug for ObjectRef {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("ObjectRef")
            .field("handle", &self.handle)
            .finish()
    }
}

/// A decoded runtime value.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    /// Signed 32-bit integer.
    Int32(i32),
    /// Signed 64-bit integer.
    Int64(i64),
    /// Unsigned 32-bit integer.
    UInt32(u32),
    /// Unsigned 64-bit integer.
    UInt64(u64),
    /// 32-bit floating point.
    Float(f32),
    /// 64-bit floating point.
    Double(f64),
    /// Boolean.
    Bool(bool),
    /// UTF-8 string.
    String(String),
    /// Raw byte string.
    Bytes(Vec<u8>),
    /// A member of an enumeration.
    Enum(i32),
    /// An opaque protobuf message payload.
    Message(Vec<u8>),
    /// A list of values.
    List(Vec<Value>),
    /// A set of unique values.
    Set(Vec<Value>),
    /// A dictionary of key/value pairs with unique keys.
    Dictionary(Vec<(Value, Value)>),
    /// A fixed-arity tuple of values.
    Tuple(Vec<Value>),
    /// An object reference; `None` is the null reference.
    Object(Option<ObjectRef>),
}

impl Value {
    /// The null object reference.
    pub fn null() -> Value {
        Value::Object(None)
    }

    /// Gets the value as a signed 32-bit integer.
    pub fn as_i32(&self) -> Option<i32> {
        match self {
            Value::Int32(v) | Value::Enum(v) => Some(*v),
            _ => None,
        }
    }

    /// Gets the value as a signed 64-bit integer.
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Int64(v) => Some(*v),
            _ => None,
        }
    }

    /// Gets the value as an unsigned 32-bit integer.
    pub fn as_u32(&self) -> Option<u32> {
        match self {
            Value::UInt32(v) => Some(*v),
            _ => None,
        }
    }

    /// Gets the value as an unsigned 64-bit integer.
    pub fn as_u64(&self) -> Option<u64> {
        match self {
            Value::UInt64(v) => Some(*v),
            _ => None,
        }
    }

    /// Gets the value as a 32-bit float.
    pub fn as_f32(&self) -> Option<f32> {
        match self {
            Value::Float(v) => Some(*v),
            _ => None,
        }
    }

    /// Gets the value as a 64-bit float.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Double(v) => Some(*v),
            _ => None,
        }
    }

    /// Gets the value as a boolean.
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(v) => Some(*v),
            _ => None,
        }
    }

    /// Gets the value as a string slice.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    /// Gets the value as a byte slice.
    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            Value::Bytes(b) | Value::Message(b) => Some(b),
            _ => None,
        }
    }

    /// Gets a live object reference, if the value is a non-null object.
    pub fn as_object(&self) -> Option<&ObjectRef> {
        match self {
            Value::Object(Some(r)) => Some(r),
            _ => None,
        }
    }

    /// Returns whether the value is the null object reference.
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Object(None))
    }

    /// Gets the referenced host object as a `T`.
    pub fn instance<T: 'static>(&self) -> Option<Rc<T>> {
        self.as_object().and_then(ObjectRef::downcast)
    }

    /// Gets a short name for the value's variant, for diagnostics.
    pub fn kind(&self) -> &'static str {
        match self {
            Value::Int32(_) => "int32",
            Value::Int64(_) => "int64",
            Value::UInt32(_) => "uint32",
            Value::UInt64(_) => "uint64",
            Value::Float(_) => "float",
            Value::Double(_) => "double",
            Value::Bool(_) => "bool",
            Value::String(_) => "string",
            Value::Bytes(_) => "bytes",
            Value::Enum(_) => "enum",
            Value::Message(_) => "message",
            Value::List(_) => "list",
            Value::Set(_) => "set",
            Value::Dictionary(_) => "dictionary",
            Value::Tuple(_) => "tuple",
            Value::Object(_) => "object",
        }
    }
}
