//! Parser for SCOM assembly tokens → statements.
//!
//! Each line holds an optional label followed by an optional instruction
//! or directive. Instruction operands are checked against the kinds their
//! opcode declares; names are left for the builder to resolve.

use crate::error::AsmError;
use crate::lexer::{utf8_name, Target, Token};
use scom_common::opcode::ALL_OPCODES;
use scom_common::{reg, ArgKind, FixupKind, Opcode};

/// One parsed source line.
#[derive(Debug, Default)]
pub(crate) struct Line {
    pub label: Option<String>,
    pub body: Option<Statement>,
}

#[derive(Debug, PartialEq)]
pub(crate) enum Statement {
    Instruction { opcode: Opcode, args: Vec<Arg> },
    Directive(Directive),
}

/// An argument word as written, before names are resolved.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Arg {
    /// A complete word and its fixup kind.
    Word(i32, FixupKind),
    /// A label, encoded relative to the end of the instruction.
    Relative(String),
    /// A label, string or import name, encoded as its offset or index.
    Symbol(FixupKind, String),
}

/// Where a function export points.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Location {
    /// The next emitted code word.
    Here,
    At(u32),
    Label(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Directive {
    Version(u32),
    Data(u32),
    Int { offset: u32, value: i32 },
    Byte { offset: u32, values: Vec<u8> },
    Ptr { offset: u32, target: u32 },
    String { name: String, bytes: Vec<u8>, terminated: bool },
    Import(String),
    Export { name: String, location: Location },
    ExportData { name: String, offset: u32 },
    Section { name: String, offset: Option<u32> },
    Word(Arg),
}

fn lookup_opcode(mnemonic: &str) -> Option<Opcode> {
    ALL_OPCODES
        .iter()
        .find(|op| op.mnemonic().eq_ignore_ascii_case(mnemonic))
        .copied()
}

fn lookup_register(name: &str) -> Option<usize> {
    reg::NAMES.iter().position(|r| r.eq_ignore_ascii_case(name))
}

/// Parse the tokens of a single line.
pub(crate) fn parse_line(tokens: &[Token], line_num: usize) -> Result<Line, AsmError> {
    let mut line = Line::default();
    let mut rest = tokens;

    if let Some(Token::Label(name)) = rest.first() {
        line.label = Some(name.clone());
        rest = &rest[1..];
    }

    line.body = match rest.first() {
        None => None,
        Some(Token::Ident(mnemonic)) => {
            let opcode = lookup_opcode(mnemonic).ok_or_else(|| AsmError::UnknownOpcode {
                line: line_num,
                token: mnemonic.clone(),
            })?;
            Some(parse_instruction(opcode, &rest[1..], line_num)?)
        }
        Some(Token::Directive(name)) => Some(Statement::Directive(parse_directive(
            name,
            &rest[1..],
            line_num,
        )?)),
        Some(other) => return Err(unexpected(other, line_num)),
    };

    Ok(line)
}

fn unexpected(token: &Token, line_num: usize) -> AsmError {
    AsmError::UnexpectedToken {
        line: line_num,
        token: token.to_string(),
    }
}

fn expect_end(rest: &[Token], line_num: usize) -> Result<(), AsmError> {
    match rest.first() {
        Some(token) => Err(unexpected(token, line_num)),
        None => Ok(()),
    }
}

/// Fit a literal into a code word. Values up to `u32::MAX` wrap.
fn to_word(n: i64, line_num: usize) -> Result<i32, AsmError> {
    if (i32::MIN as i64..=u32::MAX as i64).contains(&n) {
        Ok(n as u32 as i32)
    } else {
        Err(AsmError::InvalidNumber {
            line: line_num,
            token: n.to_string(),
        })
    }
}

fn parse_instruction(opcode: Opcode, tokens: &[Token], line_num: usize) -> Result<Statement, AsmError> {
    let missing = || AsmError::MissingArgument {
        line: line_num,
        opcode: opcode.mnemonic(),
        expected: opcode.arity(),
    };

    let mut rest = tokens;
    let mut args = Vec::with_capacity(opcode.arity());
    for (i, &kind) in opcode.args().iter().enumerate() {
        if i > 0 {
            match rest.first() {
                Some(Token::Comma) => rest = &rest[1..],
                Some(token) => return Err(unexpected(token, line_num)),
                None => return Err(missing()),
            }
        }
        let token = rest.first().ok_or_else(missing)?;
        args.push(parse_operand(token, kind, opcode.is_jump(), line_num)?);
        rest = &rest[1..];
    }
    expect_end(rest, line_num)?;

    Ok(Statement::Instruction { opcode, args })
}

fn parse_operand(token: &Token, kind: ArgKind, jump: bool, line_num: usize) -> Result<Arg, AsmError> {
    match token {
        Token::Ident(label) if jump => Ok(Arg::Relative(label.clone())),
        Token::Ident(name) if kind == ArgKind::Reg => lookup_register(name)
            .map(|r| Arg::Word(r as i32, FixupKind::None))
            .ok_or_else(|| AsmError::UnknownRegister {
                line: line_num,
                token: name.clone(),
            }),
        Token::Number(n) => Ok(Arg::Word(to_word(*n, line_num)?, FixupKind::None)),
        Token::Float(bits) if kind != ArgKind::Reg => Ok(Arg::Word(*bits as i32, FixupKind::None)),
        Token::Ref(fixup, target) => reference(*fixup, target, line_num),
        other => Err(unexpected(other, line_num)),
    }
}

fn reference(fixup: FixupKind, target: &Target, line_num: usize) -> Result<Arg, AsmError> {
    match (fixup, target) {
        (_, Target::Offset(n)) => Ok(Arg::Word(to_word(*n, line_num)?, fixup)),
        (FixupKind::Function | FixupKind::String | FixupKind::Import, Target::Name(name)) => {
            Ok(Arg::Symbol(fixup, name.clone()))
        }
        _ => Err(unexpected(&Token::Ref(fixup, target.clone()), line_num)),
    }
}

/// Cursor over a directive's arguments.
struct Args<'a> {
    tokens: &'a [Token],
    line: usize,
    directive: &'static str,
    expected: usize,
}

impl<'a> Args<'a> {
    fn new(tokens: &'a [Token], line: usize, directive: &'static str, expected: usize) -> Self {
        Self {
            tokens,
            line,
            directive,
            expected,
        }
    }

    fn peek(&self) -> Option<&'a Token> {
        self.tokens.first()
    }

    fn next(&mut self) -> Result<&'a Token, AsmError> {
        let (first, rest) = self
            .tokens
            .split_first()
            .ok_or(AsmError::MissingArgument {
                line: self.line,
                opcode: self.directive,
                expected: self.expected,
            })?;
        self.tokens = rest;
        Ok(first)
    }

    fn offset(&mut self) -> Result<u32, AsmError> {
        match self.next()? {
            Token::Number(n) => u32::try_from(*n).map_err(|_| AsmError::InvalidNumber {
                line: self.line,
                token: n.to_string(),
            }),
            other => Err(unexpected(other, self.line)),
        }
    }

    fn word(&mut self) -> Result<i32, AsmError> {
        match self.next()? {
            Token::Number(n) => to_word(*n, self.line),
            Token::Float(bits) => Ok(*bits as i32),
            other => Err(unexpected(other, self.line)),
        }
    }

    fn byte(&mut self) -> Result<u8, AsmError> {
        match self.next()? {
            Token::Number(n) => u8::try_from(*n).map_err(|_| AsmError::InvalidNumber {
                line: self.line,
                token: n.to_string(),
            }),
            other => Err(unexpected(other, self.line)),
        }
    }

    /// A bare or quoted name.
    fn name(&mut self) -> Result<String, AsmError> {
        match self.next()? {
            Token::Ident(name) => Ok(name.clone()),
            Token::Str(bytes) => utf8_name(bytes.clone(), self.line),
            other => Err(unexpected(other, self.line)),
        }
    }

    fn string(&mut self) -> Result<Vec<u8>, AsmError> {
        match self.next()? {
            Token::Str(bytes) => Ok(bytes.clone()),
            other => Err(unexpected(other, self.line)),
        }
    }

    fn end(self) -> Result<(), AsmError> {
        expect_end(self.tokens, self.line)
    }
}

fn parse_directive(name: &str, tokens: &[Token], line_num: usize) -> Result<Directive, AsmError> {
    let directive = match name {
        "version" => {
            let mut args = Args::new(tokens, line_num, ".version", 1);
            let version = args.offset()?;
            args.end()?;
            Directive::Version(version)
        }
        "data" => {
            let mut args = Args::new(tokens, line_num, ".data", 1);
            let size = args.offset()?;
            args.end()?;
            Directive::Data(size)
        }
        "int" => {
            let mut args = Args::new(tokens, line_num, ".int", 2);
            let offset = args.offset()?;
            let value = args.word()?;
            args.end()?;
            Directive::Int { offset, value }
        }
        "byte" => {
            let mut args = Args::new(tokens, line_num, ".byte", 2);
            let offset = args.offset()?;
            let mut values = vec![args.byte()?];
            while args.peek().is_some() {
                values.push(args.byte()?);
            }
            Directive::Byte { offset, values }
        }
        "ptr" => {
            let mut args = Args::new(tokens, line_num, ".ptr", 2);
            let offset = args.offset()?;
            let target = args.offset()?;
            args.end()?;
            Directive::Ptr { offset, target }
        }
        "string" | "ascii" => {
            let label = if name == "string" { ".string" } else { ".ascii" };
            let mut args = Args::new(tokens, line_num, label, 2);
            let name = args.name()?;
            let bytes = args.string()?;
            args.end()?;
            Directive::String {
                name,
                bytes,
                terminated: label == ".string",
            }
        }
        "import" => {
            let mut args = Args::new(tokens, line_num, ".import", 1);
            let name = args.name()?;
            args.end()?;
            Directive::Import(name)
        }
        "export" => {
            let mut args = Args::new(tokens, line_num, ".export", 1);
            let name = args.name()?;
            let location = match args.peek() {
                None => Location::Here,
                Some(Token::Equals) => {
                    args.next()?;
                    match args.next()? {
                        Token::Ident(label) => Location::Label(label.clone()),
                        Token::Number(n) => Location::At(u32::try_from(*n).map_err(|_| {
                            AsmError::InvalidNumber {
                                line: line_num,
                                token: n.to_string(),
                            }
                        })?),
                        other => return Err(unexpected(other, line_num)),
                    }
                }
                Some(other) => return Err(unexpected(other, line_num)),
            };
            args.end()?;
            Directive::Export { name, location }
        }
        "export_data" => {
            let mut args = Args::new(tokens, line_num, ".export_data", 2);
            let name = args.name()?;
            let offset = args.offset()?;
            args.end()?;
            Directive::ExportData { name, offset }
        }
        "section" => {
            let mut args = Args::new(tokens, line_num, ".section", 1);
            let name = args.name()?;
            let offset = match args.peek() {
                Some(_) => Some(args.offset()?),
                None => None,
            };
            args.end()?;
            Directive::Section { name, offset }
        }
        "word" => {
            let mut args = Args::new(tokens, line_num, ".word", 1);
            let arg = parse_operand(args.next()?, ArgKind::Any, false, line_num)?;
            args.end()?;
            Directive::Word(arg)
        }
        other => {
            return Err(AsmError::UnknownDirective {
                line: line_num,
                token: format!(".{other}"),
            })
        }
    };
    Ok(directive)
}
