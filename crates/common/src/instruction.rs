//! Instruction decoding from a SCOM code stream.
//!
//! Code is a flat sequence of 32-bit words. An instruction occupies
//! `1 + arity` consecutive words:
//! ```text
//! word 0:      opcode (never carries a fixup)
//! word 1..=n:  arguments, each paired with the fixup kind of its word
//! ```
//! Argument words keep their raw payload; resolving a fixed-up payload
//! into a runtime value is the interpreter's job.

use std::fmt;

use crate::error::DecodeError;
use crate::fixup::FixupKind;
use crate::opcode::{reg, ArgKind, Opcode};

/// Maximum number of argument words any opcode takes.
pub const MAX_ARGS: usize = 3;

/// One argument word and its fixup classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Operand {
    /// Raw payload of the code word.
    pub word: i32,
    /// How the payload is to be interpreted.
    pub fixup: FixupKind,
}

impl Operand {
    /// A literal operand with no fixup.
    pub fn literal(word: i32) -> Self {
        Self {
            word,
            fixup: FixupKind::None,
        }
    }

    /// The register index, if this operand names a valid register.
    pub fn register(&self) -> Option<usize> {
        if self.fixup.is_reference() {
            return None;
        }
        usize::try_from(self.word)
            .ok()
            .filter(|&r| r < crate::opcode::NUM_REGISTERS)
    }
}

impl fmt::Display for Operand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.fixup {
            FixupKind::None => write!(f, "{}", self.word),
            kind => write!(f, "{}:{}", kind.name(), self.word),
        }
    }
}

/// A decoded instruction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Instruction {
    /// The operation to perform.
    pub opcode: Opcode,
    /// Word offset of the opcode word.
    pub at: usize,
    operands: [Operand; MAX_ARGS],
}

impl Instruction {
    /// Decode the instruction whose opcode word sits at `at`.
    ///
    /// `fixups` must be parallel to `code`. Only the word layout is checked
    /// here; whether each argument suits its declared kind is left to the
    /// verifier and the interpreter.
    pub fn decode(code: &[i32], fixups: &[FixupKind], at: usize) -> Result<Self, DecodeError> {
        let word = *code.get(at).ok_or(DecodeError::PcOutOfRange {
            at,
            len: code.len(),
        })?;
        if fixups.get(at).is_some_and(|k| k.is_reference()) {
            return Err(DecodeError::FixupOnOpcode { at });
        }
        let opcode = Opcode::decode(word, at)?;
        let arity = opcode.arity();
        if at + arity >= code.len() {
            return Err(DecodeError::Truncated {
                at,
                opcode: opcode.mnemonic(),
            });
        }

        let mut operands = [Operand::default(); MAX_ARGS];
        for (i, operand) in operands.iter_mut().take(arity).enumerate() {
            let pos = at + 1 + i;
            *operand = Operand {
                word: code[pos],
                fixup: fixups.get(pos).copied().unwrap_or_default(),
            };
        }

        Ok(Self {
            opcode,
            at,
            operands,
        })
    }

    /// The decoded argument words, one per declared argument.
    pub fn args(&self) -> &[Operand] {
        &self.operands[..self.opcode.arity()]
    }

    /// Argument `i`. Panics if `i` is not below the arity.
    pub fn arg(&self, i: usize) -> Operand {
        self.args()[i]
    }

    /// Number of words this instruction occupies.
    pub fn width(&self) -> usize {
        1 + self.opcode.arity()
    }

    /// Word offset of the following instruction.
    pub fn next(&self) -> usize {
        self.at + self.width()
    }

    /// Absolute target of a relative jump, or `None` for other opcodes
    /// and for targets before the start of the code.
    pub fn jump_target(&self) -> Option<usize> {
        if !self.opcode.is_jump() {
            return None;
        }
        let target = self.next() as i64 + self.arg(0).word as i64;
        usize::try_from(target).ok()
    }
}

impl fmt::Display for Instruction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.opcode.mnemonic())?;
        for (i, (operand, kind)) in self.args().iter().zip(self.opcode.args()).enumerate() {
            f.write_str(if i == 0 { " " } else { ", " })?;
            match (kind, operand.register()) {
                (ArgKind::Reg, Some(r)) => f.write_str(reg::NAMES[r])?,
                _ => write!(f, "{operand}")?,
            }
        }
        Ok(())
    }
}
