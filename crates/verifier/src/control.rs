//! Control-flow checks for SCOM code.
//!
//! Every jump must land on the first word of an instruction, and the last
//! instruction must not let execution run past the end of the code.

use crate::error::VerifyError;
use crate::structural::CodeMap;
use scom_common::Opcode;

/// Run the control-flow check.
pub fn check_control(map: &CodeMap) -> Vec<VerifyError> {
    let mut errors = Vec::new();

    for instr in &map.instructions {
        if !instr.opcode.is_jump() {
            continue;
        }
        let target = instr.next() as i64 + instr.arg(0).word as i64;
        let lands = instr.jump_target().is_some_and(|t| map.is_start(t));
        if !lands {
            errors.push(VerifyError::BadJumpTarget {
                at: instr.at,
                target,
            });
        }
    }

    if let Some(last) = map.instructions.last() {
        if !matches!(last.opcode, Opcode::Ret | Opcode::Jmp) {
            errors.push(VerifyError::FallsOffEnd { at: last.at });
        }
    }

    errors
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::structural::check_structural;
    use scom_common::{reg, BytecodeImage, ImageParts};

    fn map(code: Vec<i32>) -> CodeMap {
        let image = BytecodeImage::from_parts(ImageParts {
            code,
            ..ImageParts::default()
        })
        .unwrap();
        check_structural(&image).0
    }

    #[test]
    fn backward_loop_is_fine() {
        // 0: LITTOREG ax, 3   3: SUB ax, 1   6: JNZ -5   8: RET
        let m = map(vec![
            Opcode::LitToReg as i32,
            reg::AX as i32,
            3,
            Opcode::Sub as i32,
            reg::AX as i32,
            1,
            Opcode::Jnz as i32,
            -5,
            Opcode::Ret as i32,
        ]);
        assert!(check_control(&m).is_empty());
    }

    #[test]
    fn jump_into_operand() {
        // 0: JMP 1 lands on word 3, inside the LITTOREG at 2.
        let m = map(vec![
            Opcode::Jmp as i32,
            1,
            Opcode::LitToReg as i32,
            reg::AX as i32,
            0,
            Opcode::Ret as i32,
        ]);
        assert_eq!(
            check_control(&m),
            vec![VerifyError::BadJumpTarget { at: 0, target: 3 }]
        );
    }

    #[test]
    fn jump_before_start() {
        let m = map(vec![Opcode::Jz as i32, -10, Opcode::Ret as i32]);
        assert_eq!(
            check_control(&m),
            vec![VerifyError::BadJumpTarget { at: 0, target: -8 }]
        );
    }

    #[test]
    fn code_must_end_in_ret_or_jmp() {
        let m = map(vec![Opcode::Ret as i32, Opcode::PushReg as i32, reg::AX as i32]);
        assert_eq!(check_control(&m), vec![VerifyError::FallsOffEnd { at: 1 }]);
    }
}
