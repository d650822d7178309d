//! The native call bridge.
//!
//! Host functions are registered with a signature string. Each code
//! names the expected kind of one parameter:
//!
//! | Code | Accepts |
//! |------|---------|
//! | `i`  | int |
//! | `f`  | float, or int bits |
//! | `o`  | live object or null |
//! | `O`  | live object |
//! | `s`  | string or null |
//! | `S`  | string |
//!
//! A trailing `...` accepts any number of extra arguments. Strings may be
//! string literals, managed strings, or pointers to a NUL-terminated
//! buffer in global data, the stack, or an object.

use std::collections::HashMap;
use std::fmt;

use scom_common::{NativeId, ObjectHandle, RuntimeValue};
use tracing::trace;

use crate::error::{Fault, LinkError, NativeCallError};
use crate::machine::Runtime;
use crate::pool::{ManagedObject, ManagedPool};

/// Expected kind of one native parameter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParamType {
    Int,
    Float,
    Object { nullable: bool },
    Str { nullable: bool },
}

impl ParamType {
    fn from_code(c: char) -> Option<Self> {
        match c {
            'i' => Some(ParamType::Int),
            'f' => Some(ParamType::Float),
            'o' => Some(ParamType::Object { nullable: true }),
            'O' => Some(ParamType::Object { nullable: false }),
            's' => Some(ParamType::Str { nullable: true }),
            'S' => Some(ParamType::Str { nullable: false }),
            _ => None,
        }
    }

    fn expected(&self) -> &'static str {
        match self {
            ParamType::Int => "int",
            ParamType::Float => "float",
            ParamType::Object { nullable: true } => "object or null",
            ParamType::Object { nullable: false } => "object",
            ParamType::Str { nullable: true } => "string or null",
            ParamType::Str { nullable: false } => "string",
        }
    }
}

/// A parsed signature.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Signature {
    pub params: Vec<ParamType>,
    pub variadic: bool,
}

impl Signature {
    /// Parse a signature string such as `"is..."`. `None` if it contains
    /// an unknown code.
    pub fn parse(text: &str) -> Option<Self> {
        let (codes, variadic) = match text.strip_suffix("...") {
            Some(rest) => (rest, true),
            None => (text, false),
        };
        let params = codes
            .chars()
            .map(ParamType::from_code)
            .collect::<Option<Vec<_>>>()?;
        Some(Self { params, variadic })
    }
}

/// A coerced native argument.
#[derive(Debug, Clone, PartialEq)]
pub enum NativeArg {
    Int(i32),
    Float(f32),
    Object(Option<ObjectHandle>),
    Str(Option<String>),
    /// A variadic extra that could not be read as a string.
    Value(RuntimeValue),
}

impl NativeArg {
    pub fn as_int(&self) -> Option<i32> {
        match self {
            NativeArg::Int(v) | NativeArg::Value(RuntimeValue::Int(v)) => Some(*v),
            _ => None,
        }
    }

    pub fn as_float(&self) -> Option<f32> {
        match self {
            NativeArg::Float(v) | NativeArg::Value(RuntimeValue::Float(v)) => Some(*v),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            NativeArg::Str(Some(s)) => Some(s),
            _ => None,
        }
    }

    pub fn as_object(&self) -> Option<ObjectHandle> {
        match self {
            NativeArg::Object(h) => *h,
            _ => None,
        }
    }
}

impl fmt::Display for NativeArg {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NativeArg::Int(v) => write!(f, "{v}"),
            NativeArg::Float(v) => write!(f, "{v}"),
            NativeArg::Object(Some(h)) => write!(f, "obj#{}", h.get()),
            NativeArg::Object(None) | NativeArg::Str(None) => write!(f, "null"),
            NativeArg::Str(Some(s)) => write!(f, "{s}"),
            NativeArg::Value(v) => write!(f, "{v}"),
        }
    }
}

/// What a native handler can reach.
pub struct NativeContext<'a> {
    pub pool: &'a mut ManagedPool,
    /// The object a method was called on.
    pub receiver: Option<ObjectHandle>,
}

/// A host function. An `Err` message becomes a [`NativeCallError::Failed`].
pub type NativeHandler =
    Box<dyn Fn(&mut NativeContext<'_>, &[NativeArg]) -> Result<RuntimeValue, String>>;

struct NativeEntry {
    name: String,
    signature: Signature,
    receiver_type: Option<String>,
    handler: NativeHandler,
}

/// Registered host functions, indexed by [`NativeId`].
#[derive(Default)]
pub struct NativeRegistry {
    entries: Vec<NativeEntry>,
    by_name: HashMap<String, NativeId>,
}

impl fmt::Debug for NativeRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list()
            .entries(self.entries.iter().map(|e| &e.name))
            .finish()
    }
}

impl NativeRegistry {
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn lookup(&self, name: &str) -> Option<NativeId> {
        self.by_name.get(name).copied()
    }

    pub fn name(&self, id: NativeId) -> Option<&str> {
        self.entries.get(id.0 as usize).map(|e| e.name.as_str())
    }

    pub fn signature(&self, id: NativeId) -> Option<&Signature> {
        self.entries.get(id.0 as usize).map(|e| &e.signature)
    }

    fn add(
        &mut self,
        name: &str,
        signature: Signature,
        receiver_type: Option<&str>,
        handler: NativeHandler,
    ) -> Result<NativeId, LinkError> {
        if self.by_name.contains_key(name) {
            return Err(LinkError::NameTaken {
                name: name.to_string(),
            });
        }
        let id = NativeId(self.entries.len() as u32);
        self.entries.push(NativeEntry {
            name: name.to_string(),
            signature,
            receiver_type: receiver_type.map(str::to_string),
            handler,
        });
        self.by_name.insert(name.to_string(), id);
        Ok(id)
    }
}

impl Runtime {
    /// Register a host function and publish it in the import registry.
    ///
    /// `receiver_type` makes it a method: calls must come through CALLOBJ
    /// with an object whose pool type tag matches.
    pub fn register_native<F>(
        &mut self,
        name: &str,
        signature: &str,
        receiver_type: Option<&str>,
        handler: F,
    ) -> Result<NativeId, LinkError>
    where
        F: Fn(&mut NativeContext<'_>, &[NativeArg]) -> Result<RuntimeValue, String> + 'static,
    {
        let parsed = Signature::parse(signature).ok_or_else(|| LinkError::InvalidSignature {
            name: name.to_string(),
            signature: signature.to_string(),
        })?;
        if self.registry.get(name).is_some() {
            return Err(LinkError::NameTaken {
                name: name.to_string(),
            });
        }
        let id = self
            .natives
            .add(name, parsed, receiver_type, Box::new(handler))?;
        self.registry
            .register(name, crate::registry::ImportTarget::Native(id), None);
        Ok(id)
    }

    pub fn natives(&self) -> &NativeRegistry {
        &self.natives
    }

    /// Coerce `args` (first parameter first) and invoke a native.
    pub(crate) fn call_native(
        &mut self,
        id: NativeId,
        args: &[RuntimeValue],
        receiver: Option<RuntimeValue>,
    ) -> Result<RuntimeValue, Fault> {
        let entry = self
            .natives
            .entries
            .get(id.0 as usize)
            .ok_or(Fault::NotAnAddress {
                found: "unregistered native function",
            })?;
        let function = entry.name.clone();
        trace!(function = %function, argc = args.len(), "native call");

        let sig = &entry.signature;
        if args.len() < sig.params.len() || (!sig.variadic && args.len() > sig.params.len()) {
            return Err(NativeCallError::Arity {
                function,
                expected: sig.params.len(),
                found: args.len(),
            }
            .into());
        }

        let receiver = match (&entry.receiver_type, receiver) {
            (Some(expected), Some(RuntimeValue::Object { handle, .. })) => {
                let found = self.pool.type_name(handle).ok_or(Fault::DeadObject(handle.get()))?;
                if found != expected {
                    return Err(NativeCallError::WrongReceiver {
                        function,
                        expected: expected.clone(),
                        found: found.to_string(),
                    }
                    .into());
                }
                Some(handle)
            }
            (Some(_), _) => return Err(NativeCallError::MissingReceiver { function }.into()),
            (None, r) => r.and_then(|v| v.object_handle()),
        };

        let mut coerced = Vec::with_capacity(args.len());
        for (i, &value) in args.iter().enumerate() {
            let arg = match sig.params.get(i) {
                Some(&param) => self.coerce(&function, i + 1, param, value)?,
                None => match self.read_string(value) {
                    Ok(Some(s)) if value.is_pointer() => NativeArg::Str(Some(s)),
                    _ => NativeArg::Value(value),
                },
            };
            coerced.push(arg);
        }

        let handler = &self.natives.entries[id.0 as usize].handler;
        let mut ctx = NativeContext {
            pool: &mut self.pool,
            receiver,
        };
        handler(&mut ctx, &coerced)
            .map_err(|message| NativeCallError::Failed { function, message }.into())
    }

    fn coerce(
        &self,
        function: &str,
        index: usize,
        param: ParamType,
        value: RuntimeValue,
    ) -> Result<NativeArg, Fault> {
        let mismatch = || {
            Fault::from(NativeCallError::TypeMismatch {
                function: function.to_string(),
                index,
                expected: param.expected(),
                found: value.kind_name(),
            })
        };
        match param {
            ParamType::Int => value.as_int().map(NativeArg::Int).ok_or_else(mismatch),
            ParamType::Float => value.as_float().map(NativeArg::Float).ok_or_else(mismatch),
            ParamType::Object { nullable } => match value {
                RuntimeValue::Int(0) if nullable => Ok(NativeArg::Object(None)),
                RuntimeValue::Object { handle, .. } => {
                    self.pool.get(handle)?;
                    Ok(NativeArg::Object(Some(handle)))
                }
                _ => Err(mismatch()),
            },
            ParamType::Str { nullable } => match value {
                RuntimeValue::Int(0) if nullable => Ok(NativeArg::Str(None)),
                RuntimeValue::Object { handle, .. } => {
                    if let ManagedObject::Host { .. } = self.pool.get(handle)? {
                        return Err(mismatch());
                    }
                    Ok(NativeArg::Str(self.read_string(value)?))
                }
                v if v.is_pointer() => Ok(NativeArg::Str(self.read_string(v)?)),
                _ => Err(mismatch()),
            },
        }
    }
}
