//! Runtime value representation for the SCOM VM.
//!
//! Every register, operand-stack slot, and external-call argument holds a
//! [`RuntimeValue`]. Pointers remember which instance (and which kind of
//! memory) they point into, so a value can never be reinterpreted as an
//! address in some other instance's memory.

use std::fmt;
use std::num::NonZeroU32;

use serde::{Deserialize, Serialize};

/// Identifies an execution instance within a runtime. Never reused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct InstanceId(pub u32);

impl fmt::Display for InstanceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identifies a registered native function.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct NativeId(pub u32);

/// Reference to an object in the managed pool. Zero is reserved for null.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ObjectHandle(NonZeroU32);

impl ObjectHandle {
    /// Wrap a raw handle number; `None` for zero.
    pub fn new(raw: u32) -> Option<Self> {
        NonZeroU32::new(raw).map(Self)
    }

    /// The raw handle number.
    pub fn get(self) -> u32 {
        self.0.get()
    }
}

/// A byte offset into one instance's memory.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Pointer {
    /// Owning instance.
    pub instance: InstanceId,
    /// Byte offset from the start of the region.
    pub offset: i32,
}

impl Pointer {
    pub fn new(instance: InstanceId, offset: i32) -> Self {
        Self { instance, offset }
    }

    /// Checked pointer arithmetic. `None` on overflow.
    pub fn offset_by(self, delta: i32) -> Option<Self> {
        Some(Self {
            instance: self.instance,
            offset: self.offset.checked_add(delta)?,
        })
    }
}

/// A tagged runtime value.
///
/// Kinds are never confused: an integer never becomes an address and a
/// pointer never participates in scalar arithmetic except through
/// [`RuntimeValue::offset_by`].
#[derive(Debug, Clone, Copy, Default)]
pub enum RuntimeValue {
    /// Uninitialized or destroyed.
    #[default]
    Invalid,
    /// 32-bit integer. `Int(0)` doubles as the null reference.
    Int(i32),
    /// 32-bit float.
    Float(f32),
    /// Address into an instance's operand stack.
    StackPtr(Pointer),
    /// Address into an instance's global data.
    GlobalPtr(Pointer),
    /// Read-only view into the string pool of an instance's image.
    StringLit(Pointer),
    /// Reference to a managed object, plus a byte offset into its data.
    Object { handle: ObjectHandle, offset: i32 },
    /// A function in some instance's code.
    ScriptFunc { instance: InstanceId, address: u32 },
    /// A registered native function.
    NativeFunc(NativeId),
}

// Floats compare by bit pattern so that RuntimeValue can implement Eq.
impl PartialEq for RuntimeValue {
    fn eq(&self, other: &Self) -> bool {
        use RuntimeValue::*;
        match (self, other) {
            (Invalid, Invalid) => true,
            (Int(a), Int(b)) => a == b,
            (Float(a), Float(b)) => a.to_bits() == b.to_bits(),
            (StackPtr(a), StackPtr(b)) => a == b,
            (GlobalPtr(a), GlobalPtr(b)) => a == b,
            (StringLit(a), StringLit(b)) => a == b,
            (
                Object {
                    handle: h1,
                    offset: o1,
                },
                Object {
                    handle: h2,
                    offset: o2,
                },
            ) => h1 == h2 && o1 == o2,
            (
                ScriptFunc {
                    instance: i1,
                    address: a1,
                },
                ScriptFunc {
                    instance: i2,
                    address: a2,
                },
            ) => i1 == i2 && a1 == a2,
            (NativeFunc(a), NativeFunc(b)) => a == b,
            _ => false,
        }
    }
}

impl Eq for RuntimeValue {}

impl RuntimeValue {
    /// The null reference.
    pub const NULL: RuntimeValue = RuntimeValue::Int(0);

    /// Short name of this value's kind, for diagnostics.
    pub fn kind_name(&self) -> &'static str {
        match self {
            RuntimeValue::Invalid => "invalid",
            RuntimeValue::Int(_) => "int",
            RuntimeValue::Float(_) => "float",
            RuntimeValue::StackPtr(_) => "stack pointer",
            RuntimeValue::GlobalPtr(_) => "global pointer",
            RuntimeValue::StringLit(_) => "string literal",
            RuntimeValue::Object { .. } => "object",
            RuntimeValue::ScriptFunc { .. } => "script function",
            RuntimeValue::NativeFunc(_) => "native function",
        }
    }

    /// True for `Int(0)`.
    pub fn is_null(&self) -> bool {
        matches!(self, RuntimeValue::Int(0))
    }

    /// True for kinds that address memory.
    pub fn is_pointer(&self) -> bool {
        matches!(
            self,
            RuntimeValue::StackPtr(_)
                | RuntimeValue::GlobalPtr(_)
                | RuntimeValue::StringLit(_)
                | RuntimeValue::Object { .. }
        )
    }

    /// The integer payload. Only `Int` qualifies.
    pub fn as_int(&self) -> Option<i32> {
        match self {
            RuntimeValue::Int(v) => Some(*v),
            _ => None,
        }
    }

    /// The float payload. An `Int` is reinterpreted as float bits, which is
    /// how compiled code materializes float constants.
    pub fn as_float(&self) -> Option<f32> {
        match self {
            RuntimeValue::Float(v) => Some(*v),
            RuntimeValue::Int(bits) => Some(f32::from_bits(*bits as u32)),
            _ => None,
        }
    }

    /// The raw 32-bit pattern of a scalar.
    pub fn scalar_bits(&self) -> Option<i32> {
        match self {
            RuntimeValue::Int(v) => Some(*v),
            RuntimeValue::Float(v) => Some(v.to_bits() as i32),
            _ => None,
        }
    }

    /// Truth value used by conditional jumps and logical operators.
    /// `None` for `Invalid`, which has no truth value.
    pub fn truthy(&self) -> Option<bool> {
        match self {
            RuntimeValue::Invalid => None,
            RuntimeValue::Int(v) => Some(*v != 0),
            RuntimeValue::Float(v) => Some(*v != 0.0),
            _ => Some(true),
        }
    }

    /// Checked pointer arithmetic. `None` for non-pointers and on overflow.
    pub fn offset_by(&self, delta: i32) -> Option<RuntimeValue> {
        match *self {
            RuntimeValue::StackPtr(p) => p.offset_by(delta).map(RuntimeValue::StackPtr),
            RuntimeValue::GlobalPtr(p) => p.offset_by(delta).map(RuntimeValue::GlobalPtr),
            RuntimeValue::StringLit(p) => p.offset_by(delta).map(RuntimeValue::StringLit),
            RuntimeValue::Object { handle, offset } => Some(RuntimeValue::Object {
                handle,
                offset: offset.checked_add(delta)?,
            }),
            _ => None,
        }
    }

    /// Equality as seen by script comparisons: scalars compare by bit
    /// pattern regardless of int/float kind, everything else by identity.
    pub fn script_eq(&self, other: &RuntimeValue) -> bool {
        match (self.scalar_bits(), other.scalar_bits()) {
            (Some(a), Some(b)) => a == b,
            (None, None) => !matches!(self, RuntimeValue::Invalid) && self == other,
            _ => false,
        }
    }

    /// The managed object this value refers to, if any.
    pub fn object_handle(&self) -> Option<ObjectHandle> {
        match self {
            RuntimeValue::Object { handle, .. } => Some(*handle),
            _ => None,
        }
    }
}

impl From<i32> for RuntimeValue {
    fn from(v: i32) -> Self {
        RuntimeValue::Int(v)
    }
}

impl From<f32> for RuntimeValue {
    fn from(v: f32) -> Self {
        RuntimeValue::Float(v)
    }
}

impl fmt::Display for RuntimeValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RuntimeValue::Invalid => write!(f, "<invalid>"),
            RuntimeValue::Int(v) => write!(f, "{v}"),
            RuntimeValue::Float(v) => write!(f, "{v:?}"),
            RuntimeValue::StackPtr(p) => write!(f, "stack#{}+{}", p.instance.0, p.offset),
            RuntimeValue::GlobalPtr(p) => write!(f, "data#{}+{}", p.instance.0, p.offset),
            RuntimeValue::StringLit(p) => write!(f, "str#{}+{}", p.instance.0, p.offset),
            RuntimeValue::Object { handle, offset } => {
                write!(f, "object#{}+{}", handle.get(), offset)
            }
            RuntimeValue::ScriptFunc { instance, address } => {
                write!(f, "func#{}@{}", instance.0, address)
            }
            RuntimeValue::NativeFunc(id) => write!(f, "native#{}", id.0),
        }
    }
}
