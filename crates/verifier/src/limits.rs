//! Limits checking for SCOM modules.
//!
//! Enforces size limits on the module and range limits on the literal
//! arguments whose meaning is a size or a count.

use crate::error::VerifyError;
use scom_common::{BytecodeImage, Instruction, Opcode};

/// Maximum code size in words.
pub const MAX_CODE_WORDS: usize = 1 << 20;

/// Maximum number of imports.
pub const MAX_IMPORTS: usize = 65_536;

/// Maximum staged arguments named by NUMFUNCARGS or SUBREALSTACK.
pub const MAX_EXTERNAL_ARGS: i32 = 256;

/// Maximum byte size of a user object.
pub const MAX_OBJECT_SIZE: i32 = 1 << 24;

/// Run the limits check.
pub fn check_limits(image: &BytecodeImage, instrs: &[Instruction]) -> Vec<VerifyError> {
    let mut errors = Vec::new();

    let words = image.code().len();
    if words > MAX_CODE_WORDS {
        errors.push(VerifyError::CodeTooLarge {
            words,
            max: MAX_CODE_WORDS,
        });
    }
    let count = image.imports().len();
    if count > MAX_IMPORTS {
        errors.push(VerifyError::TooManyImports {
            count,
            max: MAX_IMPORTS,
        });
    }

    for instr in instrs {
        if let Some((value, allowed)) = out_of_range(instr) {
            errors.push(VerifyError::LiteralOutOfRange {
                at: instr.at,
                opcode: instr.opcode.mnemonic(),
                value,
                allowed,
            });
        }
    }

    errors
}

/// The offending literal of `instr` and the range it must lie in.
fn out_of_range(instr: &Instruction) -> Option<(i32, &'static str)> {
    let lit = |i: usize| instr.arg(i).word;
    match instr.opcode {
        Opcode::WriteLit if !matches!(lit(0), 1 | 2 | 4) => Some((lit(0), "1, 2 or 4")),
        Opcode::NumFuncArgs | Opcode::SubRealStack
            if !(0..=MAX_EXTERNAL_ARGS).contains(&lit(0)) =>
        {
            Some((lit(0), "0 to 256"))
        }
        Opcode::ZeroMemory | Opcode::LoadSpOffs if lit(0) < 0 => Some((lit(0), "non-negative")),
        Opcode::CheckBounds if lit(1) <= 0 => Some((lit(1), "positive")),
        Opcode::NewUserObject if !(0..=MAX_OBJECT_SIZE).contains(&lit(1)) => {
            Some((lit(1), "0 to 16777216"))
        }
        Opcode::NewArray => {
            let (elem, managed) = (lit(1), lit(2));
            if managed != 0 && elem != 4 {
                Some((elem, "4 for managed elements"))
            } else if elem <= 0 {
                Some((elem, "positive"))
            } else {
                None
            }
        }
        _ => None,
    }
}
