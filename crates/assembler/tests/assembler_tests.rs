//! Integration tests for the SCOM assembler.
//!
//! Tests cover:
//! - Small script modules (assemble, verify, run)
//! - Roundtrip properties (disassemble → assemble, assemble → disassemble → assemble)
//! - Error cases (unknown opcode, missing args, undefined names, etc.)
//! - Modules the verifier rejects still assemble

use std::rc::Rc;

use scom_assembler::{assemble, disassemble, AsmError};
use scom_common::{BytecodeImage, ExportKind, RuntimeValue};
use scom_verifier::VerifyError;
use scom_vm::{ArithmeticError, Fault, Runtime};

// ---- Test helpers ----

/// Assemble text and check it passes verification.
fn assemble_verified(text: &str) -> Rc<BytecodeImage> {
    let image = assemble(text).unwrap_or_else(|err| panic!("assembly failed: {err}"));
    scom_verifier::verify(&image).unwrap_or_else(|errors| {
        panic!("Verification failed: {errors:?}");
    });
    Rc::new(image)
}

/// Assemble, verify, instantiate, and call one export.
fn run(text: &str, export: &str, args: &[RuntimeValue]) -> RuntimeValue {
    let mut rt = Runtime::default();
    let id = rt.instantiate(assemble_verified(text)).unwrap();
    rt.call(id, export, args).unwrap_or_else(|err| {
        panic!("Execution failed: {err}");
    })
}

fn int(v: i32) -> RuntimeValue {
    RuntimeValue::Int(v)
}

const ANSWER: &str = "\
.export Answer
    LITTOREG ax, 42
    RET
";

const SUM: &str = "\
; Sum of 1..=n
.export Sum$1
    LOADSPOFFS 8
    MEMREAD ax          ; n
    LITTOREG bx, 0
top:
    ADDREG bx, ax
    SUB ax, 1
    JNZ top
    REGTOREG bx, ax
    RET
";

const COUNTER: &str = "\
.data 8
.int 4 7
.export_data Counter 4
.export Bump
    LITTOREG mar, data:4
    MEMREAD ax
    ADD ax, 1
    MEMWRITE ax
    RET
";

const LOCAL_CALL: &str = "\
.export Twice
    LITTOREG bx, func:double
    LITTOREG ax, 21
    CALL bx
    RET
double:
    ADDREG ax, ax
    RET
";

const GREET: &str = "\
.string hello \"Hello\"
.import Shout
.export Greet
    LITTOREG ax, str:hello
    PUSHREAL ax
    LITTOREG cx, import:Shout
    NUMFUNCARGS 1
    CALLEXT cx
    SUBREALSTACK 1
    RET
";

const ALL: [&str; 5] = [ANSWER, SUM, COUNTER, LOCAL_CALL, GREET];

// ============================================================
// Programs: assemble, verify, run
// ============================================================

#[test]
fn constant_return() {
    assert_eq!(run(ANSWER, "Answer", &[]), int(42));
}

#[test]
fn loop_with_label() {
    assert_eq!(run(SUM, "Sum", &[int(5)]), int(15));
    assert_eq!(run(SUM, "Sum$1", &[int(1)]), int(1));
}

#[test]
fn global_data_and_data_export() {
    let image = assemble_verified(COUNTER);
    let counter = image.export("Counter").unwrap();
    assert_eq!(counter.kind, ExportKind::Data);
    assert_eq!(counter.address, 4);

    let mut rt = Runtime::default();
    let id = rt.instantiate(image).unwrap();
    assert_eq!(rt.call(id, "Bump", &[]), Ok(int(8)));
    assert_eq!(rt.call(id, "Bump", &[]), Ok(int(9)));
    assert_eq!(rt.read_global(id, 4), Ok(int(9)));
}

#[test]
fn local_function_reference() {
    assert_eq!(run(LOCAL_CALL, "Twice", &[]), int(42));
}

#[test]
fn native_call_with_string_literal() {
    let mut rt = Runtime::default();
    rt.register_native("Shout", "S", None, |_, args| {
        Ok(int(args[0].as_str().map_or(0, |s| s.len() as i32)))
    })
    .unwrap();
    let id = rt.instantiate(assemble_verified(GREET)).unwrap();
    assert_eq!(rt.call(id, "Greet", &[]), Ok(int(5)));
    assert_eq!(rt.stack_height(id), Ok(0));
}

#[test]
fn fault_reports_source_line() {
    let text = "\
.export f
    LINENUM 12
    LITTOREG ax, 1
    LITTOREG bx, 0
    MODREG ax, bx
    RET
";
    let mut rt = Runtime::default();
    let id = rt.instantiate(assemble_verified(text)).unwrap();
    let err = rt.call(id, "f", &[]).unwrap_err();
    assert_eq!(err.fault, Fault::Arithmetic(ArithmeticError::DivisionByZero));
    assert_eq!(err.context.as_ref().map(|c| c.line), Some(12));
    assert!(err.to_string().contains("MODREG ax, bx"));
}

#[test]
fn float_literals_are_bit_patterns() {
    let text = "\
.export f
    LITTOREG ax, 1.5
    LITTOREG bx, 2.25
    FADDREG ax, bx
    RET
";
    let value = run(text, "f", &[]);
    assert_eq!(value.as_float(), Some(3.75));
}

// ============================================================
// Roundtrip
// ============================================================

#[test]
fn roundtrip_disassemble_then_assemble_all_programs() {
    for text in ALL {
        let image = assemble(text).unwrap();
        let reassembled = assemble(&disassemble(&image)).unwrap();
        assert_eq!(image, reassembled, "roundtrip failed for:\n{text}");
        assert_eq!(image.digest(), reassembled.digest());
    }
}

#[test]
fn canonical_text_is_a_fixed_point() {
    for text in ALL {
        let canonical = disassemble(&assemble(text).unwrap());
        assert_eq!(disassemble(&assemble(&canonical).unwrap()), canonical);
    }
}

#[test]
fn canonical_form_of_loop() {
    let canonical = disassemble(&assemble(SUM).unwrap());
    assert_eq!(
        canonical,
        "\
.export Sum$1 = L0
L0:
LOADSPOFFS 8
MEMREAD ax
LITTOREG bx, 0
L7:
ADDREG bx, ax
SUB ax, 1
JNZ L7
REGTOREG bx, ax
RET
"
    );
}

#[test]
fn canonical_form_names_strings_and_imports() {
    let canonical = disassemble(&assemble(GREET).unwrap());
    assert!(canonical.starts_with(".string s0 \"Hello\"\n.import Shout\n.export Greet = L0\n"));
    assert!(canonical.contains("LITTOREG ax, str:s0\n"));
    assert!(canonical.contains("LITTOREG cx, import:Shout\n"));
}

#[test]
fn binary_encoding_roundtrip() {
    for text in ALL {
        let image = assemble(text).unwrap();
        let decoded = BytecodeImage::decode(&image.encode()).unwrap();
        assert_eq!(image, decoded);
    }
}

#[test]
fn quoted_names_roundtrip() {
    let text = "\
.import \"Character::Say^2\"
.import \"with space\"
.export \"odd name\"
    LITTOREG cx, import:\"with space\"
    RET
.section \"room, west\" 0
";
    let image = assemble(text).unwrap();
    assert_eq!(image.imports()[1], "with space");
    assert_eq!(image.sections()[0].name, "room, west");
    let canonical = disassemble(&image);
    assert!(canonical.contains("import:\"with space\""));
    assert_eq!(assemble(&canonical).unwrap(), image);
}

#[test]
fn duplicate_import_names_use_indices() {
    let text = "\
.import Say
.import Say
.export f
    LITTOREG cx, import:1
    RET
";
    let image = assemble(text).unwrap();
    let canonical = disassemble(&image);
    assert!(canonical.contains("LITTOREG cx, import:1\n"), "{canonical}");
    assert_eq!(assemble(&canonical).unwrap(), image);
}

// ============================================================
// Error cases
// ============================================================

#[test]
fn error_unknown_opcode_with_line() {
    let err = assemble("RET\nRET\nFROBNICATE ax\n").unwrap_err();
    assert_eq!(
        err,
        AsmError::UnknownOpcode {
            line: 3,
            token: "FROBNICATE".to_string()
        }
    );
}

#[test]
fn error_missing_argument_littoreg() {
    let err = assemble("LITTOREG ax\n").unwrap_err();
    assert_eq!(
        err,
        AsmError::MissingArgument {
            line: 1,
            opcode: "LITTOREG",
            expected: 2
        }
    );
}

#[test]
fn error_missing_argument_newarray() {
    let err = assemble("NEWARRAY ax, 4\n").unwrap_err();
    assert!(matches!(
        err,
        AsmError::MissingArgument {
            opcode: "NEWARRAY",
            expected: 3,
            ..
        }
    ));
}

#[test]
fn error_invalid_number_overflow() {
    let err = assemble("LITTOREG ax, 99999999999999999999999\n").unwrap_err();
    assert!(matches!(err, AsmError::InvalidNumber { line: 1, .. }));
}

#[test]
fn error_unexpected_token_extra_arg() {
    let err = assemble("RET ax\n").unwrap_err();
    assert!(matches!(err, AsmError::UnexpectedToken { line: 1, .. }));
}

#[test]
fn error_unknown_register() {
    let err = assemble("PUSHREG ex\n").unwrap_err();
    assert!(matches!(err, AsmError::UnknownRegister { line: 1, .. }));
}

#[test]
fn error_undefined_label_reports_use_site() {
    let err = assemble("RET\nJMP missing\nRET\n").unwrap_err();
    assert_eq!(
        err,
        AsmError::UndefinedLabel {
            line: 2,
            label: "missing".to_string()
        }
    );
}

#[test]
fn error_data_write_without_size() {
    let err = assemble(".int 0 1\n").unwrap_err();
    assert!(matches!(err, AsmError::DataOutOfRange { size: 0, .. }));
}

#[test]
fn error_bad_pointer_slot_value() {
    // The slot points past the end of the data.
    let err = assemble(".data 4\n.ptr 0 9\n").unwrap_err();
    assert!(matches!(err, AsmError::Image(_)));
}

// ============================================================
// Assembler vs verifier
// ============================================================

#[test]
fn verifier_rejects_what_assembler_accepts() {
    // JMP 1 lands inside the LITTOREG operands; no RET at the end.
    let image = assemble("JMP 1\nLITTOREG ax, 0\nPUSHREG ax\n").unwrap();
    let errors = scom_verifier::verify(&image).unwrap_err();
    assert!(errors.contains(&VerifyError::BadJumpTarget { at: 0, target: 3 }));
    assert!(errors.contains(&VerifyError::FallsOffEnd { at: 5 }));
}

#[test]
fn raw_words_survive_but_do_not_verify() {
    let image = assemble(".word 500\nRET\n").unwrap();
    assert_eq!(disassemble(&image), ".word 500\nRET\n");
    let errors = scom_verifier::verify(&image).unwrap_err();
    assert!(matches!(errors[0], VerifyError::Undecodable { at: 0, .. }));
}
