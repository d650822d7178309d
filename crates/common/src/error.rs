//! Load and decode errors for SCOM modules.

use thiserror::Error;

/// Errors raised while parsing or validating a compiled module.
///
/// A module that fails with any of these is never handed to the VM.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FormatError {
    /// The first four bytes are not `SCOM`.
    #[error("bad magic signature: {0:02x?}")]
    BadMagic([u8; 4]),

    /// The format version is newer than this loader understands.
    #[error("unsupported format version {found} (maximum {max})")]
    UnsupportedVersion { found: u32, max: u32 },

    /// The stream ended in the middle of a field.
    #[error("truncated module: needed {needed} bytes at offset {offset}")]
    Truncated { offset: usize, needed: usize },

    /// The trailing end signature is missing or wrong.
    #[error("bad end signature: {0:#010x}")]
    BadEndSignature(u32),

    /// A fixup kind byte outside the known range.
    #[error("fixup {index}: unknown kind {kind}")]
    UnknownFixupKind { index: usize, kind: u8 },

    /// A fixup points past the end of the region it indexes.
    #[error("fixup {index}: target {target} out of range (region length {len})")]
    FixupOutOfRange { index: usize, target: u32, len: usize },

    /// Two fixups classify the same word.
    #[error("fixup {index}: word {target} already has a fixup")]
    DuplicateFixup { index: usize, target: u32 },

    /// A fixup's payload falls outside the region it refers to.
    #[error("fixup {index}: payload {payload} outside {region} (length {len})")]
    PayloadOutOfRange {
        index: usize,
        region: &'static str,
        payload: i32,
        len: usize,
    },

    /// An export address carries an unknown kind in its top byte.
    #[error("export '{name}': unknown kind {kind}")]
    UnknownExportKind { name: String, kind: u8 },

    /// An export address points outside its region.
    #[error("export '{name}': address {address} out of range")]
    ExportOutOfRange { name: String, address: u32 },

    /// A name (import, export, or section) is not valid UTF-8.
    #[error("invalid name at offset {offset}")]
    InvalidName { offset: usize },

    /// A region is too large to be addressed by 24-bit export addresses.
    #[error("{region} too large: {len}")]
    RegionTooLarge { region: &'static str, len: usize },
}

/// Errors raised while decoding one instruction from a code stream.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DecodeError {
    /// The opcode word does not name a known opcode.
    #[error("unknown opcode {opcode} at {at}")]
    UnknownOpcode { at: usize, opcode: i32 },

    /// The opcode word itself carries a fixup.
    #[error("opcode word at {at} carries a fixup")]
    FixupOnOpcode { at: usize },

    /// The instruction's arguments run past the end of the code.
    #[error("{opcode} at {at} is truncated")]
    Truncated { at: usize, opcode: &'static str },

    /// The program counter is outside the code.
    #[error("program counter {at} outside code (length {len})")]
    PcOutOfRange { at: usize, len: usize },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_bad_magic() {
        assert_eq!(
            FormatError::BadMagic(*b"NOPE").to_string(),
            "bad magic signature: [4e, 4f, 50, 45]"
        );
    }

    #[test]
    fn display_unsupported_version() {
        assert_eq!(
            FormatError::UnsupportedVersion { found: 120, max: 89 }.to_string(),
            "unsupported format version 120 (maximum 89)"
        );
    }

    #[test]
    fn display_duplicate_fixup() {
        assert_eq!(
            FormatError::DuplicateFixup { index: 3, target: 7 }.to_string(),
            "fixup 3: word 7 already has a fixup"
        );
    }

    #[test]
    fn display_payload_out_of_range() {
        let e = FormatError::PayloadOutOfRange {
            index: 0,
            region: "strings",
            payload: 40,
            len: 12,
        };
        assert_eq!(e.to_string(), "fixup 0: payload 40 outside strings (length 12)");
    }

    #[test]
    fn display_unknown_opcode() {
        assert_eq!(
            DecodeError::UnknownOpcode { at: 4, opcode: 999 }.to_string(),
            "unknown opcode 999 at 4"
        );
    }
}
