//! Error types for the SCOM assembler.

use scom_common::FormatError;
use thiserror::Error;

/// Errors produced during assembly of text to a module.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AsmError {
    /// An unrecognized opcode mnemonic was encountered.
    #[error("line {line}: unknown opcode '{token}'")]
    UnknownOpcode { line: usize, token: String },

    /// An unrecognized directive was encountered.
    #[error("line {line}: unknown directive '{token}'")]
    UnknownDirective { line: usize, token: String },

    /// A register operand does not name a register.
    #[error("line {line}: unknown register '{token}'")]
    UnknownRegister { line: usize, token: String },

    /// An opcode or directive did not have enough arguments.
    #[error("line {line}: {opcode} expects {expected} argument(s)")]
    MissingArgument {
        line: usize,
        opcode: &'static str,
        expected: usize,
    },

    /// A numeric literal could not be parsed or is out of range.
    #[error("line {line}: invalid number '{token}'")]
    InvalidNumber { line: usize, token: String },

    /// A token appeared where it was not expected.
    #[error("line {line}: unexpected token '{token}'")]
    UnexpectedToken { line: usize, token: String },

    /// A quoted string has no closing quote.
    #[error("line {line}: unterminated string")]
    UnterminatedString { line: usize },

    /// A backslash escape inside a quoted string is not recognized.
    #[error("line {line}: invalid escape '{escape}'")]
    InvalidEscape { line: usize, escape: String },

    /// A quoted name is not valid UTF-8.
    #[error("line {line}: name is not valid UTF-8")]
    InvalidName { line: usize },

    /// A label was defined twice.
    #[error("line {line}: duplicate label '{label}'")]
    DuplicateLabel { line: usize, label: String },

    /// A string was declared twice under the same name.
    #[error("line {line}: duplicate string '{name}'")]
    DuplicateString { line: usize, name: String },

    /// A label is referenced but never defined.
    #[error("line {line}: undefined label '{label}'")]
    UndefinedLabel { line: usize, label: String },

    /// A string or import is referenced by a name that was never declared.
    #[error("line {line}: undefined {kind} '{name}'")]
    UndefinedName {
        line: usize,
        kind: &'static str,
        name: String,
    },

    /// A global data write falls outside the declared data size.
    #[error("line {line}: data write of {len} byte(s) at {offset} exceeds data size {size}")]
    DataOutOfRange {
        line: usize,
        offset: usize,
        len: usize,
        size: usize,
    },

    /// The assembled parts do not form a valid module.
    #[error("invalid module: {0}")]
    Image(#[from] FormatError),
}

impl AsmError {
    /// Source line the error points at, if it has one.
    pub fn line(&self) -> Option<usize> {
        match self {
            AsmError::UnknownOpcode { line, .. }
            | AsmError::UnknownDirective { line, .. }
            | AsmError::UnknownRegister { line, .. }
            | AsmError::MissingArgument { line, .. }
            | AsmError::InvalidNumber { line, .. }
            | AsmError::UnexpectedToken { line, .. }
            | AsmError::UnterminatedString { line }
            | AsmError::InvalidEscape { line, .. }
            | AsmError::InvalidName { line }
            | AsmError::DuplicateLabel { line, .. }
            | AsmError::DuplicateString { line, .. }
            | AsmError::UndefinedLabel { line, .. }
            | AsmError::UndefinedName { line, .. }
            | AsmError::DataOutOfRange { line, .. } => Some(*line),
            AsmError::Image(_) => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display_unknown_opcode() {
        let e = AsmError::UnknownOpcode {
            line: 3,
            token: "FOO".to_string(),
        };
        assert_eq!(e.to_string(), "line 3: unknown opcode 'FOO'");
    }

    #[test]
    fn error_display_missing_argument() {
        let e = AsmError::MissingArgument {
            line: 7,
            opcode: "LITTOREG",
            expected: 2,
        };
        assert_eq!(e.to_string(), "line 7: LITTOREG expects 2 argument(s)");
    }

    #[test]
    fn error_display_invalid_number() {
        let e = AsmError::InvalidNumber {
            line: 2,
            token: "0xZZZZ".to_string(),
        };
        assert_eq!(e.to_string(), "line 2: invalid number '0xZZZZ'");
    }

    #[test]
    fn error_display_undefined_name() {
        let e = AsmError::UndefinedName {
            line: 4,
            kind: "import",
            name: "Display".to_string(),
        };
        assert_eq!(e.to_string(), "line 4: undefined import 'Display'");
    }

    #[test]
    fn error_display_data_out_of_range() {
        let e = AsmError::DataOutOfRange {
            line: 1,
            offset: 6,
            len: 4,
            size: 8,
        };
        assert_eq!(
            e.to_string(),
            "line 1: data write of 4 byte(s) at 6 exceeds data size 8"
        );
    }

    #[test]
    fn image_errors_have_no_line() {
        let e = AsmError::from(FormatError::ExportOutOfRange {
            name: "main".to_string(),
            address: 0,
        });
        assert_eq!(e.line(), None);
        assert_eq!(e.to_string(), "invalid module: export 'main': address 0 out of range");
        assert_eq!(AsmError::UnterminatedString { line: 9 }.line(), Some(9));
    }
}
