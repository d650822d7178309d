//! Verification errors for the SCOM verifier.
//!
//! Every error carries the word offset (`at`) of the instruction it refers
//! to, or the export it refers to. The verifier collects ALL errors, not
//! just the first.

use scom_common::DecodeError;
use thiserror::Error;

/// Errors found during static verification of a module's code.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum VerifyError {
    // --- Structural ---
    /// The code stream cannot be decoded past this point.
    #[error("undecodable code at word {at}: {source}")]
    Undecodable { at: usize, source: DecodeError },

    /// A register argument does not name a register.
    #[error("instruction at {at}: parameter {param} ({word}) is not a register")]
    InvalidRegister { at: usize, param: usize, word: i32 },

    /// A literal-only argument carries a fixup.
    #[error("instruction at {at}: parameter {param} must be a literal, found {kind} reference")]
    UnexpectedFixup {
        at: usize,
        param: usize,
        kind: &'static str,
    },

    /// The instruction writes the stack pointer other than through ADD/SUB.
    #[error("instruction at {at} writes the stack pointer")]
    StackPointerWrite { at: usize },

    /// A function reference does not point at an instruction boundary.
    #[error("instruction at {at}: function reference {target} is not an instruction start")]
    MisalignedFunction { at: usize, target: i32 },

    /// A function export does not point at an instruction boundary.
    #[error("export '{name}' at {address} is not an instruction start")]
    MisalignedExport { name: String, address: u32 },

    // --- Control flow ---
    /// A jump lands outside the code or inside another instruction.
    #[error("jump at {at} to {target} does not land on an instruction")]
    BadJumpTarget { at: usize, target: i64 },

    /// Execution can run off the end of the code.
    #[error("code ends without RET or JMP (last instruction at {at})")]
    FallsOffEnd { at: usize },

    // --- Limits ---
    /// The code stream exceeds the size limit.
    #[error("code too large: {words} words (max {max})")]
    CodeTooLarge { words: usize, max: usize },

    /// The module declares too many imports.
    #[error("too many imports: {count} (max {max})")]
    TooManyImports { count: usize, max: usize },

    /// A literal argument is outside the range its opcode accepts.
    #[error("{opcode} at {at}: literal {value} out of range ({allowed})")]
    LiteralOutOfRange {
        at: usize,
        opcode: &'static str,
        value: i32,
        allowed: &'static str,
    },
}

impl VerifyError {
    /// Word offset of the offending instruction, if the error has one.
    pub fn at(&self) -> Option<usize> {
        match self {
            VerifyError::Undecodable { at, .. }
            | VerifyError::InvalidRegister { at, .. }
            | VerifyError::UnexpectedFixup { at, .. }
            | VerifyError::StackPointerWrite { at }
            | VerifyError::MisalignedFunction { at, .. }
            | VerifyError::BadJumpTarget { at, .. }
            | VerifyError::FallsOffEnd { at }
            | VerifyError::LiteralOutOfRange { at, .. } => Some(*at),
            VerifyError::MisalignedExport { .. }
            | VerifyError::CodeTooLarge { .. }
            | VerifyError::TooManyImports { .. } => None,
        }
    }
}
