//! Disassembler: module → canonical assembly text.
//!
//! Output order is fixed: version (only if not current), data, strings,
//! imports, exports, sections, then code. One item per line, no
//! indentation, no comments, no blank lines. Labels are named `L<offset>`
//! and placed only where something refers to them. Words that do not
//! decode as an instruction are emitted as `.word`.

use std::collections::{BTreeSet, HashMap};

use crate::lexer::{escape, quote_name};
use scom_common::image::CURRENT_VERSION;
use scom_common::{reg, ArgKind, BytecodeImage, ExportKind, FixupKind, Instruction, Operand};

/// One line of the code listing.
enum Item {
    Instr(Instruction),
    /// A raw word at the given offset.
    Word(usize),
}

impl Item {
    fn at(&self) -> usize {
        match self {
            Item::Instr(instr) => instr.at,
            Item::Word(at) => *at,
        }
    }
}

struct Listing<'a> {
    image: &'a BytecodeImage,
    items: Vec<Item>,
    labels: BTreeSet<usize>,
    /// String pool segments: (start, end, NUL-terminated).
    segments: Vec<(usize, usize, bool)>,
    segment_names: HashMap<usize, usize>,
}

impl<'a> Listing<'a> {
    fn new(image: &'a BytecodeImage) -> Self {
        let code = image.code();
        let mut items = Vec::new();
        let mut pc = 0;
        while pc < code.len() {
            match image.instruction_at(pc) {
                Ok(instr) => {
                    pc = instr.next();
                    items.push(Item::Instr(instr));
                }
                Err(_) => {
                    items.push(Item::Word(pc));
                    pc += 1;
                }
            }
        }

        let starts: BTreeSet<usize> = items.iter().map(Item::at).collect();
        let mut labels = BTreeSet::new();
        let mut mark =
            |target: Option<usize>| labels.extend(target.filter(|t| starts.contains(t)));
        for item in &items {
            match item {
                Item::Instr(instr) => {
                    if instr.opcode.is_jump() && instr.arg(0).fixup == FixupKind::None {
                        mark(instr.jump_target());
                    }
                    for operand in instr.args() {
                        mark(function_target(operand));
                    }
                }
                Item::Word(at) => mark(function_target(&word_operand(image, *at))),
            }
        }
        for export in image.exports() {
            if export.kind == ExportKind::Function {
                mark(Some(export.address as usize));
            }
        }

        let mut segments = Vec::new();
        let pool = image.strings();
        let mut start = 0;
        while start < pool.len() {
            match pool[start..].iter().position(|&b| b == 0) {
                Some(len) => {
                    segments.push((start, start + len, true));
                    start += len + 1;
                }
                None => {
                    segments.push((start, pool.len(), false));
                    start = pool.len();
                }
            }
        }
        let segment_names = segments
            .iter()
            .enumerate()
            .map(|(i, &(start, _, _))| (start, i))
            .collect();

        Self {
            image,
            items,
            labels,
            segments,
            segment_names,
        }
    }

    fn label(&self, at: usize) -> Option<String> {
        self.labels.contains(&at).then(|| format!("L{at}"))
    }

    fn operand(&self, operand: Operand, kind: ArgKind) -> String {
        match operand.fixup {
            FixupKind::None if kind == ArgKind::Reg => match operand.register() {
                Some(r) => reg::NAMES[r].to_string(),
                None => operand.word.to_string(),
            },
            FixupKind::None => operand.word.to_string(),
            FixupKind::Function => match self.label(operand.word as usize) {
                Some(label) => format!("func:{label}"),
                None => format!("func:{}", operand.word),
            },
            FixupKind::String => match self.segment_names.get(&(operand.word as usize)) {
                Some(i) => format!("str:s{i}"),
                None => format!("str:{}", operand.word),
            },
            FixupKind::Import => {
                let imports = self.image.imports();
                let index = operand.word as usize;
                match imports.get(index) {
                    // By name only when the name finds this same entry.
                    Some(name) if imports.iter().position(|n| n == name) == Some(index) => {
                        format!("import:{}", quote_name(name))
                    }
                    _ => format!("import:{}", operand.word),
                }
            }
            other => format!("{}:{}", other.name(), operand.word),
        }
    }

    fn instruction(&self, instr: &Instruction) -> String {
        let args: Vec<String> = instr
            .args()
            .iter()
            .zip(instr.opcode.args())
            .map(|(&operand, &kind)| {
                if instr.opcode.is_jump() && operand.fixup == FixupKind::None {
                    if let Some(label) = instr.jump_target().and_then(|t| self.label(t)) {
                        return label;
                    }
                }
                self.operand(operand, kind)
            })
            .collect();
        if args.is_empty() {
            instr.opcode.mnemonic().to_string()
        } else {
            format!("{} {}", instr.opcode.mnemonic(), args.join(", "))
        }
    }

    fn header(&self, lines: &mut Vec<String>) {
        let image = self.image;
        if image.version() != CURRENT_VERSION {
            lines.push(format!(".version {}", image.version()));
        }

        let data = image.global_data();
        if !data.is_empty() {
            lines.push(format!(".data {}", data.len()));
        }
        let mut covered = vec![false; data.len()];
        for &slot in image.global_fixups() {
            for byte in covered.iter_mut().skip(slot as usize).take(4) {
                *byte = true;
            }
        }
        // Pointer slots may overlap; each is written from the final bytes.
        let mut i = 0;
        while i < data.len() {
            if image.is_global_fixup(i as u32) {
                lines.push(format!(".ptr {i} {}", read_u32(data, i)));
                i += 1;
            } else if covered[i] {
                i += 1;
            } else if i + 4 <= data.len() && !covered[i..i + 4].contains(&true) {
                let value = read_u32(data, i) as i32;
                if value != 0 {
                    lines.push(format!(".int {i} {value}"));
                }
                i += 4;
            } else {
                if data[i] != 0 {
                    lines.push(format!(".byte {i} {}", data[i]));
                }
                i += 1;
            }
        }

        let pool = image.strings();
        for (n, &(start, end, terminated)) in self.segments.iter().enumerate() {
            let directive = if terminated { ".string" } else { ".ascii" };
            lines.push(format!("{directive} s{n} \"{}\"", escape(&pool[start..end])));
        }

        for name in image.imports() {
            lines.push(format!(".import {}", quote_name(name)));
        }

        for export in image.exports() {
            let name = quote_name(&export.name);
            match export.kind {
                ExportKind::Function => {
                    let target = self
                        .label(export.address as usize)
                        .unwrap_or_else(|| export.address.to_string());
                    lines.push(format!(".export {name} = {target}"));
                }
                ExportKind::Data => lines.push(format!(".export_data {name} {}", export.address)),
            }
        }

        for section in image.sections() {
            lines.push(format!(".section {} {}", quote_name(&section.name), section.offset));
        }
    }

    fn render(&self) -> String {
        let mut lines = Vec::new();
        self.header(&mut lines);

        for item in &self.items {
            if let Some(label) = self.label(item.at()) {
                lines.push(format!("{label}:"));
            }
            match item {
                Item::Instr(instr) => lines.push(self.instruction(instr)),
                Item::Word(at) => {
                    let operand = word_operand(self.image, *at);
                    lines.push(format!(".word {}", self.operand(operand, ArgKind::Any)));
                }
            }
        }

        let mut out = lines.join("\n");
        if !out.is_empty() {
            out.push('\n');
        }
        out
    }
}

/// The code offset a function-reference operand points at.
fn function_target(operand: &Operand) -> Option<usize> {
    (operand.fixup == FixupKind::Function).then_some(operand.word as usize)
}

fn word_operand(image: &BytecodeImage, at: usize) -> Operand {
    Operand {
        word: image.code()[at],
        fixup: image.code_fixups()[at],
    }
}

fn read_u32(data: &[u8], at: usize) -> u32 {
    u32::from_le_bytes([data[at], data[at + 1], data[at + 2], data[at + 3]])
}

/// Disassemble a module into canonical assembly text.
///
/// The output is guaranteed to reassemble to an identical module
/// (`assemble(&disassemble(image)) == image`).
pub fn disassemble(image: &BytecodeImage) -> String {
    Listing::new(image).render()
}

#[cfg(test)]
mod tests {
    use super::*;
    use scom_common::{Export, Fixup, ImageParts, Opcode, Section};

    fn image(parts: ImageParts) -> BytecodeImage {
        BytecodeImage::from_parts(parts).unwrap()
    }

    #[test]
    fn empty_module() {
        assert_eq!(disassemble(&image(ImageParts::default())), "");
    }

    #[test]
    fn registers_and_literals() {
        let img = image(ImageParts {
            code: vec![Opcode::LitToReg as i32, reg::AX as i32, 42, Opcode::Ret as i32],
            ..ImageParts::default()
        });
        assert_eq!(disassemble(&img), "LITTOREG ax, 42\nRET\n");
    }

    #[test]
    fn jumps_get_labels() {
        // 0: SUB ax, 1   3: JNZ -5   5: RET
        let img = image(ImageParts {
            code: vec![
                Opcode::Sub as i32,
                reg::AX as i32,
                1,
                Opcode::Jnz as i32,
                -5,
                Opcode::Ret as i32,
            ],
            ..ImageParts::default()
        });
        assert_eq!(disassemble(&img), "L0:\nSUB ax, 1\nJNZ L0\nRET\n");
    }

    #[test]
    fn jump_into_an_operand_stays_numeric() {
        let img = image(ImageParts {
            code: vec![
                Opcode::Jmp as i32,
                1,
                Opcode::LitToReg as i32,
                reg::AX as i32,
                0,
                Opcode::Ret as i32,
            ],
            ..ImageParts::default()
        });
        assert_eq!(disassemble(&img), "JMP 1\nLITTOREG ax, 0\nRET\n");
    }

    #[test]
    fn undecodable_words() {
        let img = image(ImageParts {
            code: vec![999, Opcode::Ret as i32],
            ..ImageParts::default()
        });
        assert_eq!(disassemble(&img), ".word 999\nRET\n");
    }

    #[test]
    fn header_sections() {
        let img = image(ImageParts {
            global_data: vec![7, 0, 0, 0, 0, 0, 0, 0, 4, 0, 0, 0, 0, 9],
            code: vec![
                Opcode::LitToReg as i32,
                reg::CX as i32,
                1,
                Opcode::LitToReg as i32,
                reg::AX as i32,
                4,
                Opcode::Ret as i32,
            ],
            strings: b"hi\0there".to_vec(),
            fixups: vec![
                Fixup::new(FixupKind::Import, 2),
                Fixup::new(FixupKind::String, 5),
                Fixup::new(FixupKind::DataData, 8),
            ],
            imports: vec!["Display".into(), "Character::Say^2".into()],
            exports: vec![Export::function("Main", 0), Export::data("Score", 0)],
            sections: vec![Section {
                name: "room 1".into(),
                offset: 3,
            }],
            ..ImageParts::default()
        });
        let expected = "\
.data 14
.int 0 7
.ptr 8 4
.byte 13 9
.string s0 \"hi\"
.ascii s1 \"there\"
.import Display
.import Character::Say^2
.export Main = L0
.export_data Score 0
.section \"room 1\" 3
L0:
LITTOREG cx, import:Character::Say^2
LITTOREG ax, str:4
RET
";
        assert_eq!(disassemble(&img), expected);
    }

    #[test]
    fn old_version_is_written_out() {
        let img = image(ImageParts {
            version: 80,
            code: vec![Opcode::Ret as i32],
            ..ImageParts::default()
        });
        assert_eq!(disassemble(&img), ".version 80\nRET\n");
    }
}
