//! Link-time and run-time errors for the SCOM VM.
//!
//! Link errors surface when an instance is created, restored, or
//! destroyed. Faults abort the current top-level call; the interpreter
//! wraps them in a [`RuntimeError`] that records where execution stopped.

use std::fmt;

use scom_common::{DecodeError, InstanceId};
use thiserror::Error;

/// Errors raised while creating, restoring, or destroying an instance.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LinkError {
    /// A mandatory import has no provider in the registry.
    #[error("unresolved import '{name}'")]
    UnresolvedImport { name: String },

    /// The instance does not exist or has been destroyed.
    #[error("instance {0} is not live")]
    DeadInstance(InstanceId),

    /// The instance is executing and cannot be destroyed.
    #[error("instance {0} is running")]
    InstanceBusy(InstanceId),

    /// A fork was requested from an instance of a different module.
    #[error("fork source instance {0} runs a different module")]
    ImageMismatch(InstanceId),

    /// The snapshot was taken from a different module.
    #[error("snapshot belongs to a different module")]
    DigestMismatch,

    /// The snapshot's data segment has the wrong size.
    #[error("snapshot data is {found} bytes, module expects {expected}")]
    DataLengthMismatch { expected: usize, found: usize },

    /// The snapshot records an object reference at an unusable offset.
    #[error("snapshot object slot at offset {offset} is outside the data segment")]
    SnapshotOffset { offset: u32 },

    /// The snapshot refers to an object that no longer exists.
    #[error("snapshot object slot at offset {offset} refers to dead object {handle}")]
    StaleObject { offset: u32, handle: u32 },

    /// A native signature contains an unknown code.
    #[error("native '{name}': invalid signature '{signature}'")]
    InvalidSignature { name: String, signature: String },

    /// The name is already registered.
    #[error("'{name}' is already registered")]
    NameTaken { name: String },
}

/// Arithmetic failures.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ArithmeticError {
    #[error("integer division by zero")]
    DivisionByZero,

    #[error("float division by zero")]
    FloatDivisionByZero,
}

/// Failures at the native call boundary. Parameter indices are 1-based.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum NativeCallError {
    /// Too few arguments, or extra arguments to a non-variadic function.
    #[error("{function}: expected {expected} arguments, got {found}")]
    Arity {
        function: String,
        expected: usize,
        found: usize,
    },

    /// An argument cannot be coerced to its declared type.
    #[error("{function}: parameter {index} expects {expected}, got {found}")]
    TypeMismatch {
        function: String,
        index: usize,
        expected: &'static str,
        found: &'static str,
    },

    /// A method was called on an object of the wrong type.
    #[error("{function}: receiver is {found}, expected {expected}")]
    WrongReceiver {
        function: String,
        expected: String,
        found: String,
    },

    /// A method was called without an object.
    #[error("{function}: method called without a receiver")]
    MissingReceiver { function: String },

    /// The handler reported an error.
    #[error("{function}: {message}")]
    Failed { function: String, message: String },
}

/// An invariant violation during interpretation.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Fault {
    /// The instruction could not be decoded.
    #[error(transparent)]
    Decode(#[from] DecodeError),

    /// A register argument is not a valid register index.
    #[error("parameter {param}: {word} is not a register")]
    InvalidRegister { param: usize, word: i32 },

    /// A literal argument carries a fixup.
    #[error("parameter {param}: literal expected, found {kind} reference")]
    UnexpectedFixup { param: usize, kind: &'static str },

    /// An operand has the wrong kind for the operation.
    #[error("parameter {param}: expected {expected}, found {found}")]
    KindMismatch {
        param: usize,
        expected: &'static str,
        found: &'static str,
    },

    /// A register read implicitly by an opcode holds the wrong kind.
    #[error("register {register}: expected {expected}, found {found}")]
    RegisterKind {
        register: &'static str,
        expected: &'static str,
        found: &'static str,
    },

    /// A memory operation on something that is not an address.
    #[error("{found} is not an address")]
    NotAnAddress { found: &'static str },

    /// The stack pointer may only move through ADD and SUB.
    #[error("direct write to the stack pointer")]
    StackPointerWrite,

    #[error("operand stack overflow (limit {limit} slots)")]
    StackOverflow { limit: usize },

    #[error("operand stack underflow")]
    StackUnderflow,

    #[error("external stack overflow (limit {limit})")]
    ExternalStackOverflow { limit: usize },

    #[error("external stack underflow: {requested} requested, {available} staged")]
    ExternalStackUnderflow { requested: usize, available: usize },

    /// A stack slot was read in a state that does not hold a value.
    #[error("stack corruption at offset {offset}: {detail}")]
    StackCorruption { offset: usize, detail: &'static str },

    #[error("call depth limit {limit} exceeded")]
    RecursionLimit { limit: usize },

    #[error("null pointer dereference")]
    NullPointer,

    #[error("{region} access at offset {offset} out of bounds (length {len})")]
    OutOfBounds {
        region: &'static str,
        offset: i64,
        len: usize,
    },

    /// Pointer arithmetic overflowed.
    #[error("pointer offset overflow")]
    PointerOverflow,

    /// A slot holding a pointer or object reference was accessed as a
    /// scalar or partially.
    #[error("pointer slot at offset {offset} accessed as scalar")]
    PointerSlotAccess { offset: u32 },

    /// A pointer value was stored into memory that can only hold scalars.
    #[error("cannot store {found} in scalar memory")]
    PointerToScalarMemory { found: &'static str },

    /// A slot read as an object reference holds something else.
    #[error("slot at offset {offset} does not hold an object reference")]
    NotAnObject { offset: i64 },

    /// A pointer into one data segment was stored into another.
    #[error("pointer into another instance's data")]
    ForeignPointer,

    #[error("write to read-only string literal")]
    ReadOnly,

    #[error("object {0} does not exist")]
    DeadObject(u32),

    #[error("instance {0} is not live")]
    DeadInstance(InstanceId),

    #[error("instance {0} is already running")]
    InstanceBusy(InstanceId),

    #[error("unresolved import '{name}'")]
    UnresolvedImport { name: String },

    #[error("no exported function '{name}'")]
    NoSuchExport { name: String },

    #[error("jump target {target} outside code")]
    InvalidJump { target: i64 },

    #[error("invalid size {size}")]
    InvalidSize { size: i64 },

    #[error("loop iteration limit {limit} exceeded")]
    InfiniteLoop { limit: u32 },

    #[error(transparent)]
    Arithmetic(#[from] ArithmeticError),

    #[error(transparent)]
    Native(#[from] NativeCallError),
}

/// Where a fault happened.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FaultContext {
    /// Section containing the faulting instruction, if the module has one.
    pub section: Option<String>,
    /// Most recent LINENUM value.
    pub line: i32,
    /// Code word offset of the faulting instruction.
    pub pc: usize,
    /// Mnemonic of the faulting instruction.
    pub opcode: &'static str,
    /// Decoded arguments, formatted.
    pub args: Vec<String>,
}

impl fmt::Display for FaultContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "in {}", self.opcode)?;
        if !self.args.is_empty() {
            write!(f, " {}", self.args.join(", "))?;
        }
        write!(f, " at ")?;
        if let Some(section) = &self.section {
            write!(f, "{section}:")?;
        }
        write!(f, "line {} (pc {})", self.line, self.pc)
    }
}

/// A fault plus the location it was raised at.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{fault}{}", context_suffix(.context))]
pub struct RuntimeError {
    pub fault: Fault,
    pub context: Option<FaultContext>,
}

fn context_suffix(context: &Option<FaultContext>) -> String {
    match context {
        Some(c) => format!(" ({c})"),
        None => String::new(),
    }
}

impl From<Fault> for RuntimeError {
    fn from(fault: Fault) -> Self {
        Self {
            fault,
            context: None,
        }
    }
}

impl From<NativeCallError> for RuntimeError {
    fn from(e: NativeCallError) -> Self {
        Fault::from(e).into()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fault_display_formats() {
        assert_eq!(
            Fault::Arithmetic(ArithmeticError::DivisionByZero).to_string(),
            "integer division by zero"
        );
        assert_eq!(
            Fault::StackCorruption {
                offset: 8,
                detail: "read of uninitialized slot"
            }
            .to_string(),
            "stack corruption at offset 8: read of uninitialized slot"
        );
        assert_eq!(
            Fault::DeadInstance(InstanceId(3)).to_string(),
            "instance 3 is not live"
        );
    }

    #[test]
    fn native_error_cites_parameter() {
        let e = NativeCallError::TypeMismatch {
            function: "Wait".into(),
            index: 2,
            expected: "int",
            found: "string literal",
        };
        assert_eq!(e.to_string(), "Wait: parameter 2 expects int, got string literal");
    }

    #[test]
    fn runtime_error_names_instruction_and_line() {
        let err = RuntimeError {
            fault: Fault::NullPointer,
            context: Some(FaultContext {
                section: Some("room1.asc".into()),
                line: 17,
                pc: 42,
                opcode: "MEMREAD",
                args: vec!["ax".into()],
            }),
        };
        assert_eq!(
            err.to_string(),
            "null pointer dereference (in MEMREAD ax at room1.asc:line 17 (pc 42))"
        );
    }

    #[test]
    fn runtime_error_without_context() {
        let err: RuntimeError = Fault::NoSuchExport { name: "Foo".into() }.into();
        assert_eq!(err.to_string(), "no exported function 'Foo'");
    }
}
