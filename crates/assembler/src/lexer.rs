//! Tokenizer for SCOM assembly text.

use std::fmt;
use std::iter::Peekable;
use std::str::CharIndices;

use crate::error::AsmError;
use scom_common::FixupKind;

/// A single token from an assembly line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Token {
    /// A bare name: mnemonic, register, label reference or symbol.
    Ident(String),
    /// A label definition (`name:`).
    Label(String),
    /// A directive (`.name`), lowercased, without the dot.
    Directive(String),
    /// An integer literal (decimal or hex, optionally signed).
    Number(i64),
    /// A float literal, held as its f32 bit pattern.
    Float(u32),
    /// A quoted string with escapes resolved.
    Str(Vec<u8>),
    /// A fixed-up reference (`kind:target`).
    Ref(FixupKind, Target),
    Comma,
    Equals,
}

/// What a reference token points at.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Target {
    Offset(i64),
    Name(String),
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Token::Ident(s) => write!(f, "{s}"),
            Token::Label(s) => write!(f, "{s}:"),
            Token::Directive(s) => write!(f, ".{s}"),
            Token::Number(n) => write!(f, "{n}"),
            Token::Float(bits) => write!(f, "{}", f32::from_bits(*bits)),
            Token::Str(bytes) => write!(f, "\"{}\"", escape(bytes)),
            Token::Ref(kind, Target::Offset(n)) => write!(f, "{}:{n}", kind.name()),
            Token::Ref(kind, Target::Name(s)) => write!(f, "{}:{s}", kind.name()),
            Token::Comma => write!(f, ","),
            Token::Equals => write!(f, "="),
        }
    }
}

/// Fixup kinds that may be written as a `kind:` operand prefix.
///
/// Data pointer slots are declared with `.ptr`, never inline.
fn reference_kind(prefix: &str) -> Option<FixupKind> {
    match prefix {
        "data" => Some(FixupKind::GlobalData),
        "func" => Some(FixupKind::Function),
        "str" => Some(FixupKind::String),
        "import" => Some(FixupKind::Import),
        "stack" => Some(FixupKind::Stack),
        _ => None,
    }
}

type Chars<'a> = Peekable<CharIndices<'a>>;

/// Tokenize a single line of assembly text.
///
/// Returns an empty Vec for blank lines and comment-only lines.
/// Comments start with `;` outside a quoted string and extend to end of line.
pub(crate) fn tokenize_line(line: &str, line_num: usize) -> Result<Vec<Token>, AsmError> {
    let mut tokens = Vec::new();
    let mut chars = line.char_indices().peekable();

    while let Some(&(start, c)) = chars.peek() {
        match c {
            ';' => break,
            c if c.is_whitespace() => {
                chars.next();
            }
            ',' => {
                chars.next();
                tokens.push(Token::Comma);
            }
            '=' => {
                chars.next();
                tokens.push(Token::Equals);
            }
            '"' => {
                chars.next();
                tokens.push(Token::Str(read_string(&mut chars, line_num)?));
            }
            _ => {
                let mut end = line.len();
                while let Some(&(i, c)) = chars.peek() {
                    if is_delimiter(c) {
                        end = i;
                        break;
                    }
                    chars.next();
                }
                tokens.push(classify(&line[start..end], &mut chars, line_num)?);
            }
        }
    }

    Ok(tokens)
}

fn is_delimiter(c: char) -> bool {
    c.is_whitespace() || matches!(c, ',' | ';' | '"' | '=')
}

fn classify(word: &str, chars: &mut Chars<'_>, line_num: usize) -> Result<Token, AsmError> {
    if let Some(name) = word.strip_prefix('.') {
        if name.starts_with(|c: char| c.is_ascii_alphabetic()) {
            return Ok(Token::Directive(name.to_ascii_lowercase()));
        }
    }

    if let Some((prefix, rest)) = word.split_once(':') {
        if let Some(kind) = reference_kind(prefix) {
            let target = if rest.is_empty() {
                if chars.peek().is_some_and(|&(_, c)| c == '"') {
                    chars.next();
                    Target::Name(utf8_name(read_string(chars, line_num)?, line_num)?)
                } else {
                    return Err(AsmError::UnexpectedToken {
                        line: line_num,
                        token: word.to_string(),
                    });
                }
            } else if starts_numeric(rest) {
                match parse_number(rest, line_num)? {
                    Token::Number(n) => Target::Offset(n),
                    _ => {
                        return Err(AsmError::InvalidNumber {
                            line: line_num,
                            token: word.to_string(),
                        })
                    }
                }
            } else {
                Target::Name(rest.to_string())
            };
            return Ok(Token::Ref(kind, target));
        }
    }

    if let Some(name) = word.strip_suffix(':') {
        if !name.is_empty() {
            return Ok(Token::Label(name.to_string()));
        }
    }

    if starts_numeric(word) {
        return parse_number(word, line_num);
    }

    Ok(Token::Ident(word.to_string()))
}

fn starts_numeric(word: &str) -> bool {
    let digits = word
        .strip_prefix('-')
        .or_else(|| word.strip_prefix('+'))
        .unwrap_or(word);
    digits.starts_with(|c: char| c.is_ascii_digit())
}

fn parse_number(word: &str, line_num: usize) -> Result<Token, AsmError> {
    let invalid = || AsmError::InvalidNumber {
        line: line_num,
        token: word.to_string(),
    };

    let (negative, digits) = match word.strip_prefix('-') {
        Some(rest) => (true, rest),
        None => (false, word.strip_prefix('+').unwrap_or(word)),
    };

    let magnitude = if let Some(hex) = digits
        .strip_prefix("0x")
        .or_else(|| digits.strip_prefix("0X"))
    {
        if hex.is_empty() || !hex.bytes().all(|b| b.is_ascii_hexdigit()) {
            return Err(invalid());
        }
        i64::from_str_radix(hex, 16).map_err(|_| invalid())?
    } else if digits.contains('.') {
        let value: f32 = word.parse().map_err(|_| invalid())?;
        return Ok(Token::Float(value.to_bits()));
    } else {
        if !digits.bytes().all(|b| b.is_ascii_digit()) {
            return Err(invalid());
        }
        digits.parse::<i64>().map_err(|_| invalid())?
    };

    Ok(Token::Number(if negative { -magnitude } else { magnitude }))
}

fn read_string(chars: &mut Chars<'_>, line_num: usize) -> Result<Vec<u8>, AsmError> {
    let mut out = Vec::new();
    while let Some((_, c)) = chars.next() {
        match c {
            '"' => return Ok(out),
            '\\' => {
                let byte = match chars.next().map(|(_, c)| c) {
                    Some('n') => b'\n',
                    Some('t') => b'\t',
                    Some('r') => b'\r',
                    Some('0') => 0,
                    Some('\\') => b'\\',
                    Some('"') => b'"',
                    Some('x') => {
                        let hex: String = (0..2)
                            .filter_map(|_| chars.next().map(|(_, c)| c))
                            .collect();
                        match u8::from_str_radix(&hex, 16) {
                            Ok(b) if hex.len() == 2 && hex.bytes().all(|h| h.is_ascii_hexdigit()) => b,
                            _ => {
                                return Err(AsmError::InvalidEscape {
                                    line: line_num,
                                    escape: format!("\\x{hex}"),
                                })
                            }
                        }
                    }
                    other => {
                        return Err(AsmError::InvalidEscape {
                            line: line_num,
                            escape: format!("\\{}", other.map(String::from).unwrap_or_default()),
                        })
                    }
                };
                out.push(byte);
            }
            c => {
                let mut buf = [0u8; 4];
                out.extend_from_slice(c.encode_utf8(&mut buf).as_bytes());
            }
        }
    }
    Err(AsmError::UnterminatedString { line: line_num })
}

/// Convert quoted bytes to a name.
pub(crate) fn utf8_name(bytes: Vec<u8>, line_num: usize) -> Result<String, AsmError> {
    String::from_utf8(bytes).map_err(|_| AsmError::InvalidName { line: line_num })
}

/// Escape bytes for a quoted string.
pub(crate) fn escape(bytes: &[u8]) -> String {
    let mut out = String::with_capacity(bytes.len());
    for &b in bytes {
        match b {
            b'"' => out.push_str("\\\""),
            b'\\' => out.push_str("\\\\"),
            b'\n' => out.push_str("\\n"),
            b'\t' => out.push_str("\\t"),
            b'\r' => out.push_str("\\r"),
            0x20..=0x7e => out.push(b as char),
            _ => out.push_str(&format!("\\x{b:02x}")),
        }
    }
    out
}

/// True if `name` reads back as a single [`Token::Ident`].
pub(crate) fn is_plain_name(name: &str) -> bool {
    let Some(first) = name.chars().next() else {
        return false;
    };
    if first == '.' || starts_numeric(name) || name.ends_with(':') {
        return false;
    }
    if name.chars().any(|c| is_delimiter(c) || c.is_control()) {
        return false;
    }
    match name.split_once(':') {
        Some((prefix, _)) => reference_kind(prefix).is_none(),
        None => true,
    }
}

/// A name as it should be written in assembly text: bare if possible,
/// quoted otherwise.
pub(crate) fn quote_name(name: &str) -> String {
    if is_plain_name(name) {
        name.to_string()
    } else {
        format!("\"{}\"", escape(name.as_bytes()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ident(s: &str) -> Token {
        Token::Ident(s.to_string())
    }

    #[test]
    fn empty_line() {
        assert_eq!(tokenize_line("", 1).unwrap(), vec![]);
    }

    #[test]
    fn whitespace_only() {
        assert_eq!(tokenize_line("   \t  ", 1).unwrap(), vec![]);
    }

    #[test]
    fn comment_only() {
        assert_eq!(tokenize_line("; this is a comment", 1).unwrap(), vec![]);
    }

    #[test]
    fn instruction_with_operands() {
        assert_eq!(
            tokenize_line("LITTOREG ax, 42 ; load", 1).unwrap(),
            vec![ident("LITTOREG"), ident("ax"), Token::Comma, Token::Number(42)]
        );
    }

    #[test]
    fn mnemonic_case_is_kept() {
        assert_eq!(tokenize_line("ret", 1).unwrap(), vec![ident("ret")]);
    }

    #[test]
    fn label_and_instruction() {
        assert_eq!(
            tokenize_line("loop: JNZ loop", 1).unwrap(),
            vec![Token::Label("loop".into()), ident("JNZ"), ident("loop")]
        );
    }

    #[test]
    fn directive_is_lowercased() {
        assert_eq!(
            tokenize_line(".DATA 16", 1).unwrap(),
            vec![Token::Directive("data".into()), Token::Number(16)]
        );
    }

    #[test]
    fn numbers() {
        assert_eq!(
            tokenize_line("-5 0x1F +7 0XbeefCAFE", 1).unwrap(),
            vec![
                Token::Number(-5),
                Token::Number(0x1f),
                Token::Number(7),
                Token::Number(0xbeef_cafe),
            ]
        );
    }

    #[test]
    fn float_literal_is_bit_pattern() {
        assert_eq!(
            tokenize_line("1.5 -0.25", 1).unwrap(),
            vec![
                Token::Float(1.5f32.to_bits()),
                Token::Float((-0.25f32).to_bits())
            ]
        );
    }

    #[test]
    fn references() {
        assert_eq!(
            tokenize_line("data:8, str:greeting, func:main, import:1, stack:-4", 1).unwrap(),
            vec![
                Token::Ref(FixupKind::GlobalData, Target::Offset(8)),
                Token::Comma,
                Token::Ref(FixupKind::String, Target::Name("greeting".into())),
                Token::Comma,
                Token::Ref(FixupKind::Function, Target::Name("main".into())),
                Token::Comma,
                Token::Ref(FixupKind::Import, Target::Offset(1)),
                Token::Comma,
                Token::Ref(FixupKind::Stack, Target::Offset(-4)),
            ]
        );
    }

    #[test]
    fn quoted_import_reference() {
        assert_eq!(
            tokenize_line("import:\"Character::Say^2\"", 1).unwrap(),
            vec![Token::Ref(
                FixupKind::Import,
                Target::Name("Character::Say^2".into())
            )]
        );
    }

    #[test]
    fn scoped_name_is_an_ident() {
        assert_eq!(
            tokenize_line(".import Character::Say^2", 1).unwrap(),
            vec![Token::Directive("import".into()), ident("Character::Say^2")]
        );
    }

    #[test]
    fn string_with_escapes_and_semicolon() {
        assert_eq!(
            tokenize_line(r#".string s "a;b\n\"q\"\x7f" ; trailing"#, 1).unwrap(),
            vec![
                Token::Directive("string".into()),
                ident("s"),
                Token::Str(b"a;b\n\"q\"\x7f".to_vec()),
            ]
        );
    }

    #[test]
    fn non_ascii_string_is_utf8() {
        assert_eq!(
            tokenize_line("\"é\"", 1).unwrap(),
            vec![Token::Str("é".as_bytes().to_vec())]
        );
    }

    #[test]
    fn equals_is_a_token() {
        assert_eq!(
            tokenize_line(".export Foo$0=L12", 1).unwrap(),
            vec![
                Token::Directive("export".into()),
                ident("Foo$0"),
                Token::Equals,
                ident("L12"),
            ]
        );
    }

    #[test]
    fn invalid_hex_number() {
        let err = tokenize_line("LITTOREG ax, 0xZZZZ", 3).unwrap_err();
        assert_eq!(
            err,
            AsmError::InvalidNumber {
                line: 3,
                token: "0xZZZZ".to_string()
            }
        );
    }

    #[test]
    fn invalid_decimal_number() {
        let err = tokenize_line("JMP 12abc", 5).unwrap_err();
        assert_eq!(
            err,
            AsmError::InvalidNumber {
                line: 5,
                token: "12abc".to_string()
            }
        );
    }

    #[test]
    fn unterminated_string() {
        let err = tokenize_line(".string s \"open", 2).unwrap_err();
        assert_eq!(err, AsmError::UnterminatedString { line: 2 });
    }

    #[test]
    fn bad_escape() {
        let err = tokenize_line(r#""\q""#, 4).unwrap_err();
        assert_eq!(
            err,
            AsmError::InvalidEscape {
                line: 4,
                escape: "\\q".to_string()
            }
        );
    }

    #[test]
    fn empty_reference_target() {
        let err = tokenize_line("LITTOREG ax, data:", 1).unwrap_err();
        assert!(matches!(err, AsmError::UnexpectedToken { line: 1, .. }));
    }

    #[test]
    fn plain_names() {
        assert!(is_plain_name("Display"));
        assert!(is_plain_name("Foo$0"));
        assert!(is_plain_name("Character::Say^2"));
        assert!(!is_plain_name(""));
        assert!(!is_plain_name("has space"));
        assert!(!is_plain_name("9lives"));
        assert!(!is_plain_name("str:x"));
        assert!(!is_plain_name(".hidden"));
        assert!(!is_plain_name("ends:"));
        assert_eq!(quote_name("a b"), "\"a b\"");
    }

    #[test]
    fn escape_roundtrips_through_tokenizer() {
        let bytes = b"tab\there \"quoted\" \\ \x01\xff".to_vec();
        let text = format!("\"{}\"", escape(&bytes));
        assert_eq!(tokenize_line(&text, 1).unwrap(), vec![Token::Str(bytes)]);
    }
}
