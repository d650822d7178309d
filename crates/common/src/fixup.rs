//! Fixup kinds: how a code word's payload is interpreted.

use crate::error::FormatError;

/// Classifies a code word as a literal or a typed reference.
///
/// Every code word carries exactly one kind. Words without a fixup are
/// `None` and are always treated as literals or register indices.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum FixupKind {
    /// Plain literal or register index.
    #[default]
    None = 0,
    /// Offset into the instance's global data.
    GlobalData = 1,
    /// Offset into this module's code (a local function).
    Function = 2,
    /// Offset into the string pool.
    String = 3,
    /// Index into the import table.
    Import = 4,
    /// Marks a global data slot holding a pointer. Never stored per code word;
    /// these entries populate the image's global fixup offsets instead.
    DataData = 5,
    /// Offset into the operand stack.
    Stack = 6,
}

/// All fixup kinds, in definition order.
pub const ALL_FIXUP_KINDS: [FixupKind; 7] = [
    FixupKind::None,
    FixupKind::GlobalData,
    FixupKind::Function,
    FixupKind::String,
    FixupKind::Import,
    FixupKind::DataData,
    FixupKind::Stack,
];

impl FixupKind {
    /// Decode a fixup table kind byte. `index` is the table entry, for errors.
    ///
    /// Kind 0 is not valid in the table: unfixed words simply have no entry.
    pub fn from_table_byte(byte: u8, index: usize) -> Result<Self, FormatError> {
        match byte {
            1 => Ok(FixupKind::GlobalData),
            2 => Ok(FixupKind::Function),
            3 => Ok(FixupKind::String),
            4 => Ok(FixupKind::Import),
            5 => Ok(FixupKind::DataData),
            6 => Ok(FixupKind::Stack),
            kind => Err(FormatError::UnknownFixupKind { index, kind }),
        }
    }

    /// Short name used in listings and assembly text.
    pub fn name(&self) -> &'static str {
        match self {
            FixupKind::None => "none",
            FixupKind::GlobalData => "data",
            FixupKind::Function => "func",
            FixupKind::String => "str",
            FixupKind::Import => "import",
            FixupKind::DataData => "dataptr",
            FixupKind::Stack => "stack",
        }
    }

    /// True for kinds that turn a word into a reference.
    pub fn is_reference(&self) -> bool {
        !matches!(self, FixupKind::None)
    }
}
