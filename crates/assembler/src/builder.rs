//! Module builder: lays parsed statements out into image parts.
//!
//! Code, data and tables are emitted in source order. Labels, string
//! names and import names may be used before they are declared; those
//! words are patched once the whole text has been read.

use std::collections::HashMap;

use crate::error::AsmError;
use crate::parser::{Arg, Directive, Line, Location, Statement};
use scom_common::image::MAX_ADDRESS;
use scom_common::{BytecodeImage, Export, ExportKind, Fixup, FixupKind, ImageParts, Section};

/// A code word whose value depends on a name.
#[derive(Debug)]
struct Patch {
    pos: usize,
    line: usize,
    name: String,
    kind: PatchKind,
}

#[derive(Debug, Clone, Copy)]
enum PatchKind {
    /// Label offset relative to the end of the instruction.
    Relative { next: usize },
    Label,
    String,
    Import,
}

#[derive(Debug)]
struct PendingExport {
    line: usize,
    name: String,
    kind: ExportKind,
    location: Location,
}

#[derive(Debug, Default)]
pub(crate) struct ModuleBuilder {
    parts: ImageParts,
    labels: HashMap<String, usize>,
    strings: HashMap<String, usize>,
    patches: Vec<Patch>,
    exports: Vec<PendingExport>,
}

impl ModuleBuilder {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Add one parsed line.
    pub(crate) fn push(&mut self, line: Line, line_num: usize) -> Result<(), AsmError> {
        if let Some(label) = line.label {
            if self.labels.contains_key(&label) {
                return Err(AsmError::DuplicateLabel {
                    line: line_num,
                    label,
                });
            }
            self.labels.insert(label, self.parts.code.len());
        }

        match line.body {
            None => {}
            Some(Statement::Instruction { opcode, args }) => {
                let next = self.parts.code.len() + 1 + args.len();
                self.parts.code.push(opcode as i32);
                for arg in args {
                    self.emit(arg, next, line_num);
                }
            }
            Some(Statement::Directive(directive)) => self.directive(directive, line_num)?,
        }
        Ok(())
    }

    fn emit(&mut self, arg: Arg, next: usize, line_num: usize) {
        let pos = self.parts.code.len();
        let (word, fixup, patch) = match arg {
            Arg::Word(word, fixup) => (word, fixup, None),
            Arg::Relative(name) => (0, FixupKind::None, Some((name, PatchKind::Relative { next }))),
            Arg::Symbol(fixup, name) => {
                let kind = match fixup {
                    FixupKind::String => PatchKind::String,
                    FixupKind::Import => PatchKind::Import,
                    _ => PatchKind::Label,
                };
                (0, fixup, Some((name, kind)))
            }
        };

        self.parts.code.push(word);
        if fixup.is_reference() {
            self.parts.fixups.push(Fixup::new(fixup, pos as u32));
        }
        if let Some((name, kind)) = patch {
            self.patches.push(Patch {
                pos,
                line: line_num,
                name,
                kind,
            });
        }
    }

    fn directive(&mut self, directive: Directive, line_num: usize) -> Result<(), AsmError> {
        match directive {
            Directive::Version(version) => self.parts.version = version,
            Directive::Data(size) => {
                if size > MAX_ADDRESS + 1 {
                    return Err(AsmError::InvalidNumber {
                        line: line_num,
                        token: size.to_string(),
                    });
                }
                self.parts.global_data.resize(size as usize, 0);
            }
            Directive::Int { offset, value } => {
                self.write_data(offset, &value.to_le_bytes(), line_num)?;
            }
            Directive::Byte { offset, values } => self.write_data(offset, &values, line_num)?,
            Directive::Ptr { offset, target } => {
                self.write_data(offset, &target.to_le_bytes(), line_num)?;
                self.parts.fixups.push(Fixup::new(FixupKind::DataData, offset));
            }
            Directive::String {
                name,
                bytes,
                terminated,
            } => {
                if self.strings.contains_key(&name) {
                    return Err(AsmError::DuplicateString {
                        line: line_num,
                        name,
                    });
                }
                self.strings.insert(name, self.parts.strings.len());
                self.parts.strings.extend_from_slice(&bytes);
                if terminated {
                    self.parts.strings.push(0);
                }
            }
            Directive::Import(name) => self.parts.imports.push(name),
            Directive::Export { name, location } => {
                let location = match location {
                    Location::Here => Location::At(self.parts.code.len() as u32),
                    other => other,
                };
                self.exports.push(PendingExport {
                    line: line_num,
                    name,
                    kind: ExportKind::Function,
                    location,
                });
            }
            Directive::ExportData { name, offset } => self.exports.push(PendingExport {
                line: line_num,
                name,
                kind: ExportKind::Data,
                location: Location::At(offset),
            }),
            Directive::Section { name, offset } => {
                let offset = offset.unwrap_or(self.parts.code.len() as u32);
                self.parts.sections.push(Section { name, offset });
            }
            Directive::Word(arg) => {
                let next = self.parts.code.len() + 1;
                self.emit(arg, next, line_num);
            }
        }
        Ok(())
    }

    fn write_data(&mut self, offset: u32, bytes: &[u8], line_num: usize) -> Result<(), AsmError> {
        let size = self.parts.global_data.len();
        let start = offset as usize;
        match self.parts.global_data.get_mut(start..start + bytes.len()) {
            Some(slot) => {
                slot.copy_from_slice(bytes);
                Ok(())
            }
            None => Err(AsmError::DataOutOfRange {
                line: line_num,
                offset: start,
                len: bytes.len(),
                size,
            }),
        }
    }

    fn label(&self, name: &str, line_num: usize) -> Result<usize, AsmError> {
        self.labels
            .get(name)
            .copied()
            .ok_or_else(|| AsmError::UndefinedLabel {
                line: line_num,
                label: name.to_string(),
            })
    }

    fn resolve(&self, patch: &Patch) -> Result<i32, AsmError> {
        let undefined = |kind| AsmError::UndefinedName {
            line: patch.line,
            kind,
            name: patch.name.clone(),
        };
        let value = match patch.kind {
            PatchKind::Relative { next } => {
                return Ok(self.label(&patch.name, patch.line)? as i32 - next as i32)
            }
            PatchKind::Label => self.label(&patch.name, patch.line)?,
            PatchKind::String => *self
                .strings
                .get(&patch.name)
                .ok_or_else(|| undefined("string"))?,
            PatchKind::Import => self
                .parts
                .imports
                .iter()
                .position(|name| *name == patch.name)
                .ok_or_else(|| undefined("import"))?,
        };
        Ok(value as i32)
    }

    /// Resolve names and validate the result as a module.
    pub(crate) fn finish(mut self) -> Result<BytecodeImage, AsmError> {
        for patch in &self.patches {
            let value = self.resolve(patch)?;
            self.parts.code[patch.pos] = value;
        }

        for export in &self.exports {
            let address = match &export.location {
                Location::At(address) => *address,
                Location::Label(label) => self.label(label, export.line)? as u32,
                Location::Here => self.parts.code.len() as u32,
            };
            self.parts.exports.push(Export {
                name: export.name.clone(),
                kind: export.kind,
                address,
            });
        }

        Ok(BytecodeImage::from_parts(self.parts)?)
    }
}
