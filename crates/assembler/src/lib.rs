//! SCOM assembler: text ↔ module translation.
//!
//! The assembler is a mechanical translation. No optimization, no macros.
//!
//! # Usage
//!
//! ```
//! use scom_assembler::{assemble, disassemble};
//!
//! let text = ".export Main = L0\nL0:\nLITTOREG ax, 42\nRET\n";
//! let image = assemble(text).unwrap();
//! assert_eq!(image.code().len(), 4);
//! assert_eq!(disassemble(&image), text);
//! ```
//!
//! # Syntax
//!
//! ```text
//! ; comment
//! .data 8                  ; global data size in bytes, zero filled
//! .int 0 42                ; little-endian word at a data offset
//! .ptr 4 0                 ; pointer slot at data offset 4, pointing at 0
//! .string hello "Hello\n"  ; NUL-terminated string pool entry
//! .import Display
//! .export Main             ; function export at the next instruction
//! main:
//!     LITTOREG mar, data:0
//!     LITTOREG ax, str:hello
//!     LITTOREG cx, import:Display
//!     JZ main              ; jump operands take labels
//!     RET
//! ```
//!
//! Other directives: `.byte`, `.ascii` (no terminator), `.export Name = label`,
//! `.export_data`, `.section`, `.version` and `.word` (one raw code word).
//!
//! # Roundtrip Guarantee
//!
//! `assemble(&disassemble(image)) == image` holds for every valid module,
//! including code that does not decode. The disassembler outputs canonical
//! text; the assembler also accepts non-canonical input (hex, lowercase
//! mnemonics, indentation, named strings).

pub mod error;

mod builder;
mod disassembler;
mod lexer;
mod parser;

pub use disassembler::disassemble;
pub use error::AsmError;

use builder::ModuleBuilder;
use lexer::tokenize_line;
use parser::parse_line;
use scom_common::BytecodeImage;

/// Assemble text into a validated module.
///
/// Returns the first error encountered. Fix one error at a time.
pub fn assemble(text: &str) -> Result<BytecodeImage, AsmError> {
    let mut builder = ModuleBuilder::new();

    for (idx, line) in text.lines().enumerate() {
        let line_num = idx + 1;
        let tokens = tokenize_line(line, line_num)?;
        builder.push(parse_line(&tokens, line_num)?, line_num)?;
    }

    builder.finish()
}

#[cfg(test)]
mod tests {
    use super::*;
    use scom_common::{reg, Export, FixupKind, Opcode};

    #[test]
    fn assemble_minimal() {
        let image = assemble("LITTOREG ax, 42\nRET\n").unwrap();
        assert_eq!(
            image.code(),
            &[Opcode::LitToReg as i32, reg::AX as i32, 42, Opcode::Ret as i32]
        );
        assert!(image.code_fixups().iter().all(|k| *k == FixupKind::None));
    }

    #[test]
    fn disassemble_minimal() {
        let image = assemble("LITTOREG ax, 42\nRET\n").unwrap();
        assert_eq!(disassemble(&image), "LITTOREG ax, 42\nRET\n");
    }

    #[test]
    fn roundtrip_assemble_then_disassemble_then_assemble() {
        let text = "\
.data 8
.string greeting \"Hello\"
.import Display
.export Greet
    LITTOREG ax, str:greeting
    PUSHREAL ax
    LITTOREG cx, import:Display
    NUMFUNCARGS 1
    CALLEXT cx
    SUBREALSTACK 1
    RET
";
        let first = assemble(text).unwrap();
        let canonical = disassemble(&first);
        let second = assemble(&canonical).unwrap();
        assert_eq!(first, second);
        assert_eq!(disassemble(&second), canonical);
    }

    #[test]
    fn assemble_with_comments_and_blanks() {
        let text = "\
; This is a comment
LITTOREG ax, 42  ; load

RET
";
        let image = assemble(text).unwrap();
        assert_eq!(image.code().len(), 4);
    }

    #[test]
    fn decimal_and_hex_produce_same_result() {
        let hex = assemble("LITTOREG ax, 0x2a\nRET\n").unwrap();
        let dec = assemble("LITTOREG ax, 42\nRET\n").unwrap();
        assert_eq!(hex, dec);
    }

    #[test]
    fn case_insensitive_mnemonics_and_registers() {
        let lower = assemble("littoreg ax, 1\nret\n").unwrap();
        let upper = assemble("LITTOREG AX, 1\nRET\n").unwrap();
        assert_eq!(lower, upper);
    }

    #[test]
    fn exports_resolve() {
        let image = assemble(".export Main\nRET\n.export Helper\nRET\n").unwrap();
        assert_eq!(
            image.exports(),
            &[Export::function("Main", 0), Export::function("Helper", 1)]
        );
    }

    #[test]
    fn error_unknown_opcode() {
        let err = assemble("FOOBAR\n").unwrap_err();
        assert!(matches!(err, AsmError::UnknownOpcode { line: 1, .. }));
    }

    #[test]
    fn error_missing_argument() {
        let err = assemble("PUSHREG\n").unwrap_err();
        assert!(matches!(err, AsmError::MissingArgument { line: 1, .. }));
    }

    #[test]
    fn error_invalid_number() {
        let err = assemble("JMP 0xZZZZ\n").unwrap_err();
        assert!(matches!(err, AsmError::InvalidNumber { line: 1, .. }));
    }

    #[test]
    fn error_reports_correct_line() {
        let text = "RET\nFOOBAR\n";
        let err = assemble(text).unwrap_err();
        assert!(matches!(err, AsmError::UnknownOpcode { line: 2, .. }));
    }

    #[test]
    fn error_from_module_validation() {
        // Import index past the end of the import table.
        let err = assemble("LITTOREG cx, import:3\nRET\n").unwrap_err();
        assert!(matches!(err, AsmError::Image(_)));
    }
}

#[cfg(test)]
mod proptests {
    use super::*;
    use proptest::prelude::*;
    use scom_common::opcode::ALL_OPCODES;
    use scom_common::{ImageParts, Opcode};

    /// Code words drawn mostly from real opcodes and small operands, so
    /// that decoding succeeds often but not always.
    fn arb_word() -> impl Strategy<Value = i32> {
        prop_oneof![
            (0..ALL_OPCODES.len()).prop_map(|i| ALL_OPCODES[i] as i32),
            -8i32..16,
            any::<i32>(),
        ]
    }

    proptest! {
        /// Any module built from random code and data disassembles to text
        /// that reassembles to the same module.
        #[test]
        fn disassembly_reassembles(
            code in prop::collection::vec(arb_word(), 0..40),
            data in prop::collection::vec(any::<u8>(), 0..24),
            strings in prop::collection::vec(any::<u8>(), 0..16),
        ) {
            let image = BytecodeImage::from_parts(ImageParts {
                global_data: data,
                code,
                strings,
                ..ImageParts::default()
            }).unwrap();
            let text = disassemble(&image);
            let reassembled = assemble(&text);
            prop_assert_eq!(reassembled.as_ref(), Ok(&image), "{}", text);
        }

        /// Every opcode with register operands survives the roundtrip.
        #[test]
        fn instructions_roundtrip(index in 0..ALL_OPCODES.len(), a in 0i32..8, b in -100i32..100) {
            let opcode: Opcode = ALL_OPCODES[index];
            let mut code = vec![opcode as i32];
            for (i, _) in opcode.args().iter().enumerate() {
                code.push(if i == 0 { a } else { b });
            }
            code.push(Opcode::Ret as i32);
            let image = BytecodeImage::from_parts(ImageParts {
                code,
                ..ImageParts::default()
            }).unwrap();
            prop_assert_eq!(assemble(&disassemble(&image)), Ok(image));
        }
    }
}
