//! Structural validation pass for SCOM code.
//!
//! Walks the code stream from word 0, decoding one instruction after
//! another, and checks each argument against its declared kind. Builds
//! the [`CodeMap`] used by later passes.

use crate::error::VerifyError;
use scom_common::{reg, ArgKind, BytecodeImage, ExportKind, FixupKind, Instruction, Opcode};

/// Instruction boundaries discovered during structural analysis.
#[derive(Debug, Clone, Default)]
pub struct CodeMap {
    /// Every decoded instruction, in code order.
    pub instructions: Vec<Instruction>,
    /// Whether decoding stopped early (callers should skip later passes).
    pub fatal: bool,
}

impl CodeMap {
    /// True if an instruction starts at word `pc`.
    pub fn is_start(&self, pc: usize) -> bool {
        self.instructions
            .binary_search_by_key(&pc, |i| i.at)
            .is_ok()
    }
}

/// Run the structural validation pass.
///
/// Returns the CodeMap and any errors found.
pub fn check_structural(image: &BytecodeImage) -> (CodeMap, Vec<VerifyError>) {
    let mut errors = Vec::new();
    let mut map = CodeMap::default();
    let code = image.code();

    let mut pc = 0;
    while pc < code.len() {
        match Instruction::decode(code, image.code_fixups(), pc) {
            Ok(instr) => {
                check_operands(&instr, &mut errors);
                map.instructions.push(instr);
                pc = instr.next();
            }
            Err(source) => {
                // Boundaries after an undecodable word are unknown.
                errors.push(VerifyError::Undecodable { at: pc, source });
                map.fatal = true;
                break;
            }
        }
    }

    if !map.fatal {
        // Function references must name the start of an instruction.
        for instr in &map.instructions {
            for operand in instr.args() {
                if operand.fixup == FixupKind::Function && !map.is_start(operand.word as usize) {
                    errors.push(VerifyError::MisalignedFunction {
                        at: instr.at,
                        target: operand.word,
                    });
                }
            }
        }
        for export in image.exports() {
            if export.kind == ExportKind::Function && !map.is_start(export.address as usize) {
                errors.push(VerifyError::MisalignedExport {
                    name: export.name.clone(),
                    address: export.address,
                });
            }
        }
    }

    (map, errors)
}

/// Check each argument of `instr` against the kind its opcode declares.
fn check_operands(instr: &Instruction, errors: &mut Vec<VerifyError>) {
    let at = instr.at;
    for (i, (operand, kind)) in instr.args().iter().zip(instr.opcode.args()).enumerate() {
        let param = i + 1;
        match kind {
            ArgKind::Reg if operand.register().is_none() => {
                errors.push(VerifyError::InvalidRegister {
                    at,
                    param,
                    word: operand.word,
                });
            }
            ArgKind::Lit if operand.fixup.is_reference() => {
                errors.push(VerifyError::UnexpectedFixup {
                    at,
                    param,
                    kind: operand.fixup.name(),
                });
            }
            _ => {}
        }
    }

    if let Some(param) = written_register(instr.opcode) {
        if instr.arg(param).register() == Some(reg::SP) {
            errors.push(VerifyError::StackPointerWrite { at });
        }
    }
}

/// Index of the argument naming the register an opcode overwrites.
/// ADD and SUB are left out: they are how the stack pointer moves.
fn written_register(opcode: Opcode) -> Option<usize> {
    match opcode {
        Opcode::RegToReg => Some(1),
        Opcode::Mul
        | Opcode::LitToReg
        | Opcode::MemRead
        | Opcode::MemReadB
        | Opcode::MemReadW
        | Opcode::MemReadPtr
        | Opcode::MulReg
        | Opcode::DivReg
        | Opcode::AddReg
        | Opcode::SubReg
        | Opcode::BitAnd
        | Opcode::BitOr
        | Opcode::IsEqual
        | Opcode::NotEqual
        | Opcode::Greater
        | Opcode::LessThan
        | Opcode::Gte
        | Opcode::Lte
        | Opcode::And
        | Opcode::Or
        | Opcode::PopReg
        | Opcode::ModReg
        | Opcode::XorReg
        | Opcode::NotReg
        | Opcode::ShiftLeft
        | Opcode::ShiftRight
        | Opcode::FAdd
        | Opcode::FSub
        | Opcode::FMulReg
        | Opcode::FDivReg
        | Opcode::FAddReg
        | Opcode::FSubReg
        | Opcode::FGreater
        | Opcode::FLessThan
        | Opcode::FGte
        | Opcode::FLte
        | Opcode::CreateString
        | Opcode::StringsEqual
        | Opcode::StringsNotEq
        | Opcode::NewArray
        | Opcode::NewUserObject => Some(0),
        _ => None,
    }
}
