//! The SCOM bytecode image: the validated, immutable form of one compiled
//! module.
//!
//! Binary layout (all integers little-endian u32 unless noted):
//! ```text
//! "SCOM"  version
//! data_len  code_words  strings_len
//! data[data_len]  code[code_words]  strings[strings_len]
//! fixup_count  kinds[fixup_count] (u8)  indices[fixup_count]
//! import_count  { name }*
//! export_count  { name  address }*      address = kind << 24 | offset
//! section_count { name  offset }*       only when version >= 83
//! 0xBEEFCAFE
//! ```
//! A name is a u32 byte length followed by UTF-8 bytes.

use crate::error::{DecodeError, FormatError};
use crate::fixup::FixupKind;
use crate::instruction::Instruction;

/// Leading signature of every module.
pub const MAGIC: [u8; 4] = *b"SCOM";
/// Newest format version this loader understands.
pub const CURRENT_VERSION: u32 = 89;
/// First version that carries a section table.
pub const SECTIONS_MIN_VERSION: u32 = 83;
/// Trailing signature of every module.
pub const END_SIGNATURE: u32 = 0xBEEF_CAFE;
/// Largest offset an export address can encode.
pub const MAX_ADDRESS: u32 = 0x00FF_FFFF;

/// What an export refers to. Stored in the top byte of its address.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ExportKind {
    /// A word offset into the code.
    Function = 1,
    /// A byte offset into the global data.
    Data = 2,
}

impl ExportKind {
    pub fn name(&self) -> &'static str {
        match self {
            ExportKind::Function => "function",
            ExportKind::Data => "data",
        }
    }
}

/// A named entry point published by a module.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Export {
    pub name: String,
    pub kind: ExportKind,
    /// Code word offset for functions, data byte offset for data.
    pub address: u32,
}

impl Export {
    pub fn function(name: impl Into<String>, address: u32) -> Self {
        Self {
            name: name.into(),
            kind: ExportKind::Function,
            address,
        }
    }

    pub fn data(name: impl Into<String>, address: u32) -> Self {
        Self {
            name: name.into(),
            kind: ExportKind::Data,
            address,
        }
    }

    fn packed_address(&self) -> u32 {
        ((self.kind as u32) << 24) | (self.address & MAX_ADDRESS)
    }
}

/// A named code range, used only to label diagnostics.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Section {
    pub name: String,
    /// Code word offset where the section begins.
    pub offset: u32,
}

/// One raw fixup table entry.
///
/// For kind 5 (data-data) `index` is a global data byte offset; for every
/// other kind it is a code word index.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Fixup {
    pub kind: u8,
    pub index: u32,
}

impl Fixup {
    pub fn new(kind: FixupKind, index: u32) -> Self {
        Self {
            kind: kind as u8,
            index,
        }
    }
}

/// Unvalidated module contents, as produced by an assembler or compiler.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageParts {
    pub version: u32,
    pub global_data: Vec<u8>,
    pub code: Vec<i32>,
    pub strings: Vec<u8>,
    pub fixups: Vec<Fixup>,
    pub imports: Vec<String>,
    pub exports: Vec<Export>,
    pub sections: Vec<Section>,
}

impl Default for ImageParts {
    fn default() -> Self {
        Self {
            version: CURRENT_VERSION,
            global_data: Vec::new(),
            code: Vec::new(),
            strings: Vec::new(),
            fixups: Vec::new(),
            imports: Vec::new(),
            exports: Vec::new(),
            sections: Vec::new(),
        }
    }
}

/// A validated, immutable module.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BytecodeImage {
    version: u32,
    global_data: Vec<u8>,
    code: Vec<i32>,
    code_fixups: Vec<FixupKind>,
    strings: Vec<u8>,
    global_fixups: Vec<u32>,
    imports: Vec<String>,
    exports: Vec<Export>,
    sections: Vec<Section>,
    digest: [u8; 32],
}

impl BytecodeImage {
    /// Validate module contents.
    ///
    /// Sections are dropped for versions that predate the section table.
    pub fn from_parts(parts: ImageParts) -> Result<Self, FormatError> {
        let ImageParts {
            version,
            global_data,
            code,
            strings,
            fixups,
            imports,
            exports,
            mut sections,
        } = parts;

        if version > CURRENT_VERSION {
            return Err(FormatError::UnsupportedVersion {
                found: version,
                max: CURRENT_VERSION,
            });
        }
        check_region("global data", global_data.len())?;
        check_region("code", code.len())?;
        if version < SECTIONS_MIN_VERSION {
            sections.clear();
        }

        let mut code_fixups = vec![FixupKind::None; code.len()];
        let mut global_fixups = Vec::new();

        for (index, fixup) in fixups.iter().enumerate() {
            let kind = FixupKind::from_table_byte(fixup.kind, index)?;
            let target = fixup.index;

            if kind == FixupKind::DataData {
                let offset = target as usize;
                if offset.checked_add(4).is_none_or(|end| end > global_data.len()) {
                    return Err(FormatError::FixupOutOfRange {
                        index,
                        target,
                        len: global_data.len(),
                    });
                }
                if global_fixups.contains(&target) {
                    return Err(FormatError::DuplicateFixup { index, target });
                }
                let stored = read_i32(&global_data, offset);
                if stored < 0 || stored as usize > global_data.len() {
                    return Err(FormatError::PayloadOutOfRange {
                        index,
                        region: "global data",
                        payload: stored,
                        len: global_data.len(),
                    });
                }
                global_fixups.push(target);
                continue;
            }

            let slot = code_fixups
                .get_mut(target as usize)
                .ok_or(FormatError::FixupOutOfRange {
                    index,
                    target,
                    len: code.len(),
                })?;
            if slot.is_reference() {
                return Err(FormatError::DuplicateFixup { index, target });
            }
            *slot = kind;

            let payload = code[target as usize];
            let bound = match kind {
                FixupKind::GlobalData => Some(("global data", global_data.len())),
                FixupKind::String => Some(("strings", strings.len())),
                FixupKind::Import => Some(("imports", imports.len())),
                FixupKind::Function => Some(("code", code.len())),
                _ => None,
            };
            if let Some((region, len)) = bound {
                if payload < 0 || payload as usize >= len {
                    return Err(FormatError::PayloadOutOfRange {
                        index,
                        region,
                        payload,
                        len,
                    });
                }
            }
        }
        global_fixups.sort_unstable();

        for export in &exports {
            let limit = match export.kind {
                ExportKind::Function => code.len(),
                ExportKind::Data => global_data.len(),
            };
            if export.address > MAX_ADDRESS || export.address as usize >= limit {
                return Err(FormatError::ExportOutOfRange {
                    name: export.name.clone(),
                    address: export.address,
                });
            }
        }
        sections.sort_by_key(|s| s.offset);

        let mut image = Self {
            version,
            global_data,
            code,
            code_fixups,
            strings,
            global_fixups,
            imports,
            exports,
            sections,
            digest: [0; 32],
        };
        image.digest = *blake3::hash(&image.encode()).as_bytes();
        Ok(image)
    }

    /// Parse and validate a binary module.
    pub fn decode(bytes: &[u8]) -> Result<Self, FormatError> {
        let mut r = Reader::new(bytes);

        let m = r.bytes(4)?;
        let magic = [m[0], m[1], m[2], m[3]];
        if magic != MAGIC {
            return Err(FormatError::BadMagic(magic));
        }
        let version = r.u32()?;
        if version > CURRENT_VERSION {
            return Err(FormatError::UnsupportedVersion {
                found: version,
                max: CURRENT_VERSION,
            });
        }

        let data_len = r.u32()? as usize;
        let code_words = r.u32()? as usize;
        let strings_len = r.u32()? as usize;

        let global_data = r.bytes(data_len)?.to_vec();
        let code_bytes = r.bytes(code_words.checked_mul(4).ok_or(FormatError::Truncated {
            offset: r.pos,
            needed: usize::MAX,
        })?)?;
        let code = code_bytes
            .chunks_exact(4)
            .map(|c| i32::from_le_bytes([c[0], c[1], c[2], c[3]]))
            .collect();
        let strings = r.bytes(strings_len)?.to_vec();

        let fixup_count = r.u32()? as usize;
        let kinds = r.bytes(fixup_count)?.to_vec();
        let mut fixups = Vec::with_capacity(fixup_count.min(r.remaining() / 4));
        for kind in kinds {
            fixups.push(Fixup {
                kind,
                index: r.u32()?,
            });
        }

        let import_count = r.u32()? as usize;
        let mut imports = Vec::with_capacity(import_count.min(r.remaining() / 4));
        for _ in 0..import_count {
            imports.push(r.name()?);
        }

        let export_count = r.u32()? as usize;
        let mut exports = Vec::with_capacity(export_count.min(r.remaining() / 8));
        for _ in 0..export_count {
            let name = r.name()?;
            let packed = r.u32()?;
            let kind = match (packed >> 24) as u8 {
                1 => ExportKind::Function,
                2 => ExportKind::Data,
                kind => return Err(FormatError::UnknownExportKind { name, kind }),
            };
            exports.push(Export {
                name,
                kind,
                address: packed & MAX_ADDRESS,
            });
        }

        let mut sections = Vec::new();
        if version >= SECTIONS_MIN_VERSION {
            let section_count = r.u32()? as usize;
            for _ in 0..section_count {
                let name = r.name()?;
                let offset = r.u32()?;
                sections.push(Section { name, offset });
            }
        }

        let end = r.u32()?;
        if end != END_SIGNATURE {
            return Err(FormatError::BadEndSignature(end));
        }

        Self::from_parts(ImageParts {
            version,
            global_data,
            code,
            strings,
            fixups,
            imports,
            exports,
            sections,
        })
    }

    /// Serialize to the binary layout. Code fixups are emitted in word
    /// order, followed by the global pointer slots.
    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(64 + self.global_data.len() + self.code.len() * 5);
        out.extend_from_slice(&MAGIC);
        put_u32(&mut out, self.version);
        put_u32(&mut out, self.global_data.len() as u32);
        put_u32(&mut out, self.code.len() as u32);
        put_u32(&mut out, self.strings.len() as u32);
        out.extend_from_slice(&self.global_data);
        for word in &self.code {
            out.extend_from_slice(&word.to_le_bytes());
        }
        out.extend_from_slice(&self.strings);

        let fixups = self.fixup_table();
        put_u32(&mut out, fixups.len() as u32);
        out.extend(fixups.iter().map(|f| f.kind));
        for fixup in &fixups {
            put_u32(&mut out, fixup.index);
        }

        put_u32(&mut out, self.imports.len() as u32);
        for name in &self.imports {
            put_name(&mut out, name);
        }

        put_u32(&mut out, self.exports.len() as u32);
        for export in &self.exports {
            put_name(&mut out, &export.name);
            put_u32(&mut out, export.packed_address());
        }

        if self.version >= SECTIONS_MIN_VERSION {
            put_u32(&mut out, self.sections.len() as u32);
            for section in &self.sections {
                put_name(&mut out, &section.name);
                put_u32(&mut out, section.offset);
            }
        }

        put_u32(&mut out, END_SIGNATURE);
        out
    }

    /// The fixup table in canonical order.
    pub fn fixup_table(&self) -> Vec<Fixup> {
        let code = self
            .code_fixups
            .iter()
            .enumerate()
            .filter(|(_, k)| k.is_reference())
            .map(|(i, &k)| Fixup::new(k, i as u32));
        let data = self
            .global_fixups
            .iter()
            .map(|&offset| Fixup::new(FixupKind::DataData, offset));
        code.chain(data).collect()
    }

    pub fn version(&self) -> u32 {
        self.version
    }

    /// Initial contents of the global data segment.
    pub fn global_data(&self) -> &[u8] {
        &self.global_data
    }

    pub fn code(&self) -> &[i32] {
        &self.code
    }

    /// Per-word fixup kinds, parallel to [`BytecodeImage::code`].
    pub fn code_fixups(&self) -> &[FixupKind] {
        &self.code_fixups
    }

    pub fn strings(&self) -> &[u8] {
        &self.strings
    }

    /// Sorted global data offsets that hold pointers.
    pub fn global_fixups(&self) -> &[u32] {
        &self.global_fixups
    }

    /// True if the 4-byte global slot at `offset` holds a pointer.
    pub fn is_global_fixup(&self, offset: u32) -> bool {
        self.global_fixups.binary_search(&offset).is_ok()
    }

    /// The pointer slot overlapping byte `offset`, if any.
    pub fn global_fixup_covering(&self, offset: u32) -> Option<u32> {
        let idx = match self.global_fixups.binary_search(&offset) {
            Ok(i) => return Some(self.global_fixups[i]),
            Err(0) => return None,
            Err(i) => i - 1,
        };
        let start = self.global_fixups[idx];
        (offset < start + 4).then_some(start)
    }

    pub fn imports(&self) -> &[String] {
        &self.imports
    }

    pub fn exports(&self) -> &[Export] {
        &self.exports
    }

    /// Look up an export by exact name.
    pub fn export(&self, name: &str) -> Option<&Export> {
        self.exports.iter().find(|e| e.name == name)
    }

    pub fn sections(&self) -> &[Section] {
        &self.sections
    }

    /// Name of the section containing code word `pc`.
    pub fn section_at(&self, pc: usize) -> Option<&str> {
        self.sections
            .iter()
            .rev()
            .find(|s| s.offset as usize <= pc)
            .map(|s| s.name.as_str())
    }

    /// Bytes of the string pool from `offset` up to (not including) the
    /// next NUL, or to the end of the pool.
    pub fn string_at(&self, offset: usize) -> Option<&[u8]> {
        let tail = self.strings.get(offset..)?;
        let end = tail.iter().position(|&b| b == 0).unwrap_or(tail.len());
        Some(&tail[..end])
    }

    /// blake3 hash of the canonical encoding.
    pub fn digest(&self) -> &[u8; 32] {
        &self.digest
    }

    /// Hex form of the first eight digest bytes, for logs.
    pub fn short_digest(&self) -> String {
        self.digest[..8].iter().map(|b| format!("{b:02x}")).collect()
    }

    /// Decode the instruction at code word `pc`.
    pub fn instruction_at(&self, pc: usize) -> Result<Instruction, DecodeError> {
        Instruction::decode(&self.code, &self.code_fixups, pc)
    }
}

fn check_region(region: &'static str, len: usize) -> Result<(), FormatError> {
    if len > MAX_ADDRESS as usize + 1 {
        return Err(FormatError::RegionTooLarge { region, len });
    }
    Ok(())
}

fn read_i32(bytes: &[u8], offset: usize) -> i32 {
    i32::from_le_bytes([
        bytes[offset],
        bytes[offset + 1],
        bytes[offset + 2],
        bytes[offset + 3],
    ])
}

fn put_u32(out: &mut Vec<u8>, v: u32) {
    out.extend_from_slice(&v.to_le_bytes());
}

fn put_name(out: &mut Vec<u8>, name: &str) {
    put_u32(out, name.len() as u32);
    out.extend_from_slice(name.as_bytes());
}

/// Bounds-checked cursor over the module bytes.
struct Reader<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn new(bytes: &'a [u8]) -> Self {
        Self { bytes, pos: 0 }
    }

    fn remaining(&self) -> usize {
        self.bytes.len() - self.pos
    }

    fn bytes(&mut self, n: usize) -> Result<&'a [u8], FormatError> {
        if n > self.remaining() {
            return Err(FormatError::Truncated {
                offset: self.pos,
                needed: n,
            });
        }
        let slice = &self.bytes[self.pos..self.pos + n];
        self.pos += n;
        Ok(slice)
    }

    fn u32(&mut self) -> Result<u32, FormatError> {
        let b = self.bytes(4)?;
        Ok(u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
    }

    fn name(&mut self) -> Result<String, FormatError> {
        let len = self.u32()? as usize;
        let offset = self.pos;
        let raw = self.bytes(len)?;
        String::from_utf8(raw.to_vec()).map_err(|_| FormatError::InvalidName { offset })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::opcode::{reg, Opcode};

    fn answer_parts() -> ImageParts {
        ImageParts {
            global_data: vec![0; 8],
            code: vec![Opcode::LitToReg as i32, reg::AX as i32, 42, Opcode::Ret as i32],
            exports: vec![Export::function("Answer$0", 0), Export::data("counter", 4)],
            sections: vec![Section {
                name: "main.asc".into(),
                offset: 0,
            }],
            ..ImageParts::default()
        }
    }

    #[test]
    fn encode_decode_roundtrip() {
        let image = BytecodeImage::from_parts(answer_parts()).unwrap();
        let decoded = BytecodeImage::decode(&image.encode()).unwrap();
        assert_eq!(image, decoded);
    }

    #[test]
    fn exports_roundtrip_exactly() {
        let image = BytecodeImage::from_parts(answer_parts()).unwrap();
        let decoded = BytecodeImage::decode(&image.encode()).unwrap();
        assert_eq!(
            decoded.exports(),
            &[Export::function("Answer$0", 0), Export::data("counter", 4)]
        );
    }

    #[test]
    fn bad_magic() {
        let mut bytes = BytecodeImage::from_parts(answer_parts()).unwrap().encode();
        bytes[0] = b'X';
        assert_eq!(
            BytecodeImage::decode(&bytes),
            Err(FormatError::BadMagic(*b"XCOM"))
        );
    }

    #[test]
    fn newer_version_rejected() {
        let mut bytes = BytecodeImage::from_parts(answer_parts()).unwrap().encode();
        bytes[4..8].copy_from_slice(&90u32.to_le_bytes());
        assert_eq!(
            BytecodeImage::decode(&bytes),
            Err(FormatError::UnsupportedVersion { found: 90, max: 89 })
        );
    }

    #[test]
    fn old_version_has_no_sections() {
        let parts = ImageParts {
            version: 82,
            ..answer_parts()
        };
        let image = BytecodeImage::from_parts(parts).unwrap();
        assert!(image.sections().is_empty());
        let decoded = BytecodeImage::decode(&image.encode()).unwrap();
        assert_eq!(decoded.version(), 82);
    }

    #[test]
    fn bad_end_signature() {
        let mut bytes = BytecodeImage::from_parts(answer_parts()).unwrap().encode();
        let n = bytes.len();
        bytes[n - 4..].copy_from_slice(&0u32.to_le_bytes());
        assert_eq!(
            BytecodeImage::decode(&bytes),
            Err(FormatError::BadEndSignature(0))
        );
    }

    #[test]
    fn truncated_stream() {
        let bytes = BytecodeImage::from_parts(answer_parts()).unwrap().encode();
        for cut in [0, 3, 10, 30, bytes.len() - 1] {
            assert!(
                matches!(
                    BytecodeImage::decode(&bytes[..cut]),
                    Err(FormatError::Truncated { .. } | FormatError::BadMagic(_))
                ),
                "cut at {cut}"
            );
        }
    }

    #[test]
    fn huge_declared_lengths_do_not_allocate() {
        let mut bytes = Vec::new();
        bytes.extend_from_slice(&MAGIC);
        bytes.extend_from_slice(&CURRENT_VERSION.to_le_bytes());
        bytes.extend_from_slice(&u32::MAX.to_le_bytes());
        assert!(matches!(
            BytecodeImage::decode(&bytes),
            Err(FormatError::Truncated { .. })
        ));
    }

    #[test]
    fn unknown_fixup_kind() {
        let mut parts = answer_parts();
        parts.fixups.push(Fixup { kind: 9, index: 2 });
        assert_eq!(
            BytecodeImage::from_parts(parts),
            Err(FormatError::UnknownFixupKind { index: 0, kind: 9 })
        );
    }

    #[test]
    fn fixup_index_out_of_range() {
        let mut parts = answer_parts();
        parts.fixups.push(Fixup::new(FixupKind::GlobalData, 10));
        assert_eq!(
            BytecodeImage::from_parts(parts),
            Err(FormatError::FixupOutOfRange {
                index: 0,
                target: 10,
                len: 4
            })
        );
    }

    #[test]
    fn duplicate_fixup() {
        let mut parts = answer_parts();
        parts.code[2] = 0;
        parts.fixups.push(Fixup::new(FixupKind::GlobalData, 2));
        parts.fixups.push(Fixup::new(FixupKind::Stack, 2));
        assert_eq!(
            BytecodeImage::from_parts(parts),
            Err(FormatError::DuplicateFixup { index: 1, target: 2 })
        );
    }

    #[test]
    fn string_payload_out_of_range() {
        let mut parts = answer_parts();
        parts.strings = b"hi\0".to_vec();
        parts.fixups.push(Fixup::new(FixupKind::String, 2));
        assert_eq!(
            BytecodeImage::from_parts(parts),
            Err(FormatError::PayloadOutOfRange {
                index: 0,
                region: "strings",
                payload: 42,
                len: 3
            })
        );
    }

    #[test]
    fn import_payload_out_of_range() {
        let mut parts = answer_parts();
        parts.code[2] = 0;
        parts.fixups.push(Fixup::new(FixupKind::Import, 2));
        assert!(matches!(
            BytecodeImage::from_parts(parts),
            Err(FormatError::PayloadOutOfRange {
                region: "imports",
                ..
            })
        ));
    }

    #[test]
    fn data_data_fixups_populate_global_fixups() {
        let mut parts = answer_parts();
        parts.global_data[0..4].copy_from_slice(&4i32.to_le_bytes());
        parts.fixups.push(Fixup::new(FixupKind::DataData, 0));
        let image = BytecodeImage::from_parts(parts).unwrap();
        assert_eq!(image.global_fixups(), &[0]);
        assert!(image.code_fixups().iter().all(|k| !k.is_reference()));
        assert!(image.is_global_fixup(0));
        assert_eq!(image.global_fixup_covering(2), Some(0));
        assert_eq!(image.global_fixup_covering(4), None);
    }

    #[test]
    fn data_data_slot_must_fit() {
        let mut parts = answer_parts();
        parts.fixups.push(Fixup::new(FixupKind::DataData, 6));
        assert!(matches!(
            BytecodeImage::from_parts(parts),
            Err(FormatError::FixupOutOfRange { target: 6, .. })
        ));
    }

    #[test]
    fn export_out_of_range() {
        let mut parts = answer_parts();
        parts.exports.push(Export::function("Far", 100));
        assert_eq!(
            BytecodeImage::from_parts(parts),
            Err(FormatError::ExportOutOfRange {
                name: "Far".into(),
                address: 100
            })
        );
    }

    #[test]
    fn unknown_export_kind() {
        let image = BytecodeImage::from_parts(answer_parts()).unwrap();
        let mut bytes = image.encode();
        // First export's packed address follows "Answer$0".
        let pos = bytes
            .windows(8)
            .position(|w| w == b"Answer$0")
            .unwrap()
            + 8;
        bytes[pos + 3] = 7;
        assert_eq!(
            BytecodeImage::decode(&bytes),
            Err(FormatError::UnknownExportKind {
                name: "Answer$0".into(),
                kind: 7
            })
        );
    }

    #[test]
    fn invalid_utf8_name() {
        let mut parts = answer_parts();
        parts.imports.push("Display".into());
        let mut bytes = BytecodeImage::from_parts(parts).unwrap().encode();
        let pos = bytes.windows(7).position(|w| w == b"Display").unwrap();
        bytes[pos] = 0xFF;
        assert!(matches!(
            BytecodeImage::decode(&bytes),
            Err(FormatError::InvalidName { .. })
        ));
    }

    #[test]
    fn digest_is_stable_and_content_sensitive() {
        let a = BytecodeImage::from_parts(answer_parts()).unwrap();
        let b = BytecodeImage::decode(&a.encode()).unwrap();
        assert_eq!(a.digest(), b.digest());

        let mut parts = answer_parts();
        parts.code[2] = 43;
        let c = BytecodeImage::from_parts(parts).unwrap();
        assert_ne!(a.digest(), c.digest());
        assert_eq!(a.short_digest().len(), 16);
    }

    #[test]
    fn string_at_stops_at_nul() {
        let mut parts = answer_parts();
        parts.strings = b"hello\0world\0".to_vec();
        let image = BytecodeImage::from_parts(parts).unwrap();
        assert_eq!(image.string_at(0), Some(&b"hello"[..]));
        assert_eq!(image.string_at(6), Some(&b"world"[..]));
        assert_eq!(image.string_at(40), None);
    }

    #[test]
    fn section_lookup() {
        let mut parts = answer_parts();
        parts.sections.push(Section {
            name: "second".into(),
            offset: 3,
        });
        let image = BytecodeImage::from_parts(parts).unwrap();
        assert_eq!(image.section_at(0), Some("main.asc"));
        assert_eq!(image.section_at(3), Some("second"));
    }
}
