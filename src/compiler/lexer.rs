use std::fmt;

use super::error::CompileError;
use super::token::{Constant, Keyword, Operator, OPERATOR_SYMBOLS};
use crate::program::datatype::DataType;
use crate::util::quote_string;

/// A token as read from a single source line.
#[derive(Debug, Clone, PartialEq)]
pub enum ParserToken {
    Keyword(Keyword),
    VarType(DataType),
    Operator(Operator),
    Label(String),
    Constant(Constant),
    StringLiteral(String),
    Identifier(String),
    /// Payload of a `//#` line.
    Pragma(String),
}

impl fmt::Display for ParserToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ParserToken::Keyword(k) => f.write_str(k.text()),
            ParserToken::VarType(t) => f.write_str(t.name()),
            ParserToken::Operator(op) => f.write_str(op.symbol()),
            ParserToken::Label(name) => write!(f, "@{name}"),
            ParserToken::Constant(c) => write!(f, "{c}"),
            ParserToken::StringLiteral(s) => f.write_str(&quote_string(s)),
            ParserToken::Identifier(name) => f.write_str(name),
            ParserToken::Pragma(payload) => write!(f, "//# {payload}"),
        }
    }
}

/// Split one line into tokens. Blank and comment-only lines give no tokens.
pub fn split_line_into_tokens(line: &str, line_number: u32) -> Result<Vec<ParserToken>, CompileError> {
    let trimmed = line.trim();
    if let Some(payload) = trimmed.strip_prefix("//#") {
        return Ok(vec![ParserToken::Pragma(payload.trim().to_string())]);
    }
    let mut lexer = Lexer::new(line, line_number);
    lexer.tokenize()?;
    Ok(lexer.tokens)
}

fn is_identifier_start(ch: u8) -> bool {
    ch.is_ascii_alphabetic() || ch == b'_'
}

fn is_identifier_char(ch: u8) -> bool {
    ch.is_ascii_alphanumeric() || ch == b'_' || ch == b'.'
}

struct Lexer<'a> {
    source: &'a str,
    bytes: &'a [u8],
    pos: usize,
    line_number: u32,
    tokens: Vec<ParserToken>,
}

impl<'a> Lexer<'a> {
    fn new(source: &'a str, line_number: u32) -> Self {
        Self {
            source,
            bytes: source.as_bytes(),
            pos: 0,
            line_number,
            tokens: Vec::new(),
        }
    }

    fn error(&self, message: impl Into<String>) -> CompileError {
        CompileError::lexical(message, self.line_number)
    }

    fn peek(&self) -> Option<u8> {
        self.bytes.get(self.pos).copied()
    }

    fn peek_at(&self, offset: usize) -> Option<u8> {
        self.bytes.get(self.pos + offset).copied()
    }

    fn tokenize(&mut self) -> Result<(), CompileError> {
        while let Some(ch) = self.peek() {
            match ch {
                b' ' | b'\t' | b'\r' | b'\n' => self.pos += 1,
                b'/' if self.peek_at(1) == Some(b'/') => break,
                b'{' => {
                    self.pos += 1;
                    self.tokens.push(ParserToken::Keyword(Keyword::BlockBegin));
                }
                b'}' => {
                    self.pos += 1;
                    self.tokens.push(ParserToken::Keyword(Keyword::BlockEnd));
                }
                b'"' => self.lex_string()?,
                b'@' => self.lex_label()?,
                b'0'..=b'9' => self.lex_number()?,
                ch if is_identifier_start(ch) => self.lex_word(),
                _ => self.lex_operator()?,
            }
        }
        Ok(())
    }

    fn lex_operator(&mut self) -> Result<(), CompileError> {
        let rest = &self.source[self.pos..];
        let (symbol, op) = OPERATOR_SYMBOLS
            .iter()
            .find(|(symbol, _)| rest.starts_with(*symbol))
            .ok_or_else(|| {
                let ch = rest.chars().next().unwrap_or('?');
                self.error(format!("Unexpected character '{ch}'"))
            })?;
        self.pos += symbol.len();
        self.tokens.push(ParserToken::Operator(*op));
        Ok(())
    }

    fn scan_identifier(&mut self) -> &'a str {
        let start = self.pos;
        while self.peek().is_some_and(is_identifier_char) {
            self.pos += 1;
        }
        &self.source[start..self.pos]
    }

    fn lex_word(&mut self) {
        let word = self.scan_identifier();
        let token = if let Some(keyword) = Keyword::from_word(word) {
            ParserToken::Keyword(keyword)
        } else if let Some(data_type) = DataType::from_name(word) {
            ParserToken::VarType(data_type)
        } else if word == "true" || word == "false" {
            ParserToken::Constant(Constant::new(u64::from(word == "true"), DataType::Bool))
        } else {
            ParserToken::Identifier(word.to_string())
        };
        self.tokens.push(token);
    }

    fn lex_label(&mut self) -> Result<(), CompileError> {
        self.pos += 1; // '@'
        if !self.peek().is_some_and(is_identifier_start) {
            return Err(self.error("Expected label name after '@'"));
        }
        let name = self.scan_identifier();
        self.tokens.push(ParserToken::Label(name.to_string()));
        Ok(())
    }

    fn lex_string(&mut self) -> Result<(), CompileError> {
        self.pos += 1; // opening quote
        let mut text = String::new();
        let mut chars = self.source[self.pos..].char_indices();
        loop {
            let Some((offset, ch)) = chars.next() else {
                return Err(self.error("Unterminated string literal"));
            };
            match ch {
                '"' => {
                    self.pos += offset + 1;
                    break;
                }
                '\\' => {
                    let escaped = match chars.next() {
                        Some((_, 'n')) => '\n',
                        Some((_, 'r')) => '\r',
                        Some((_, 't')) => '\t',
                        Some((_, '0')) => '\0',
                        Some((_, '\\')) => '\\',
                        Some((_, '"')) => '"',
                        Some((_, other)) => {
                            return Err(self.error(format!("Unknown escape sequence '\\{other}'")));
                        }
                        None => return Err(self.error("Unterminated string literal")),
                    };
                    text.push(escaped);
                }
                ch => text.push(ch),
            }
        }
        self.tokens.push(ParserToken::StringLiteral(text));
        Ok(())
    }

    fn lex_number(&mut self) -> Result<(), CompileError> {
        let start = self.pos;
        let radix = match (self.peek(), self.peek_at(1)) {
            (Some(b'0'), Some(b'x' | b'X')) => 16,
            (Some(b'0'), Some(b'b' | b'B')) => 2,
            _ => 10,
        };

        let constant = if radix == 10 {
            self.lex_decimal()?
        } else {
            self.pos += 2;
            let digits_start = self.pos;
            while self.peek().is_some_and(|c| c.is_ascii_hexdigit()) {
                self.pos += 1;
            }
            let digits = &self.source[digits_start..self.pos];
            let value = u64::from_str_radix(digits, radix)
                .map_err(|_| self.error(format!("Invalid number literal '{}'", &self.source[start..self.pos])))?;
            integer_constant(value)
        };

        if self.peek().is_some_and(is_identifier_char) {
            while self.peek().is_some_and(is_identifier_char) {
                self.pos += 1;
            }
            return Err(self.error(format!("Invalid number literal '{}'", &self.source[start..self.pos])));
        }
        self.tokens.push(ParserToken::Constant(constant));
        Ok(())
    }

    fn lex_decimal(&mut self) -> Result<Constant, CompileError> {
        let start = self.pos;
        let mut is_float = false;
        self.skip_digits();
        if self.peek() == Some(b'.') && self.peek_at(1).is_some_and(|c| c.is_ascii_digit()) {
            is_float = true;
            self.pos += 1;
            self.skip_digits();
        }
        if matches!(self.peek(), Some(b'e' | b'E')) {
            let sign = usize::from(matches!(self.peek_at(1), Some(b'+' | b'-')));
            if self.peek_at(1 + sign).is_some_and(|c| c.is_ascii_digit()) {
                is_float = true;
                self.pos += 1 + sign;
                self.skip_digits();
            }
        }
        let text = &self.source[start..self.pos];
        let float_suffix = self.peek() == Some(b'f');
        if float_suffix {
            self.pos += 1;
        }

        if is_float || float_suffix {
            let value: f64 = text
                .parse()
                .map_err(|_| self.error(format!("Invalid number literal '{text}'")))?;
            let data_type = if float_suffix { DataType::Float } else { DataType::Double };
            Ok(Constant::new(value.to_bits(), data_type))
        } else {
            let value: u64 = text
                .parse()
                .map_err(|_| self.error(format!("Number literal '{text}' is too large")))?;
            Ok(integer_constant(value))
        }
    }

    fn skip_digits(&mut self) {
        while self.peek().is_some_and(|c| c.is_ascii_digit()) {
            self.pos += 1;
        }
    }
}

/// Integer literals take the narrowest of s32, u32, s64, u64 that holds them.
fn integer_constant(value: u64) -> Constant {
    let data_type = if value <= i32::MAX as u64 {
        DataType::S32
    } else if value <= u64::from(u32::MAX) {
        DataType::U32
    } else if value <= i64::MAX as u64 {
        DataType::S64
    } else {
        DataType::U64
    };
    Constant::new(value, data_type)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn tok(s: &str) -> Vec<ParserToken> {
        split_line_into_tokens(s, 0).unwrap()
    }

    fn int(value: u64, data_type: DataType) -> ParserToken {
        ParserToken::Constant(Constant::new(value, data_type))
    }

    #[test]
    fn statement_tokens() {
        let tokens = tok("u8 x = D0.u8 + 0x10; // trailing comment");
        assert_eq!(
            tokens,
            vec![
                ParserToken::VarType(DataType::U8),
                ParserToken::Identifier("x".into()),
                ParserToken::Operator(Operator::Assign),
                ParserToken::Identifier("D0.u8".into()),
                ParserToken::Operator(Operator::Plus),
                int(16, DataType::S32),
                ParserToken::Operator(Operator::Semicolon),
            ]
        );
    }

    #[test]
    fn longest_operator_wins() {
        let tokens = tok("a <<= b >> c && !d");
        assert_eq!(tokens[1], ParserToken::Operator(Operator::AssignShiftLeft));
        assert_eq!(tokens[3], ParserToken::Operator(Operator::ShiftRight));
        assert_eq!(tokens[5], ParserToken::Operator(Operator::LogicalAnd));
        assert_eq!(tokens[6], ParserToken::Operator(Operator::LogicalNot));
    }

    #[test]
    fn integer_constants_take_narrowest_type() {
        assert_eq!(tok("2147483647"), vec![int(0x7fff_ffff, DataType::S32)]);
        assert_eq!(tok("0xffffffff"), vec![int(0xffff_ffff, DataType::U32)]);
        assert_eq!(tok("0x100000000"), vec![int(0x1_0000_0000, DataType::S64)]);
        assert_eq!(tok("0xffffffffffffffff"), vec![int(u64::MAX, DataType::U64)]);
        assert_eq!(tok("0b101"), vec![int(5, DataType::S32)]);
    }

    #[test]
    fn float_constants() {
        assert_eq!(tok("1.5"), vec![ParserToken::Constant(Constant::new(1.5f64.to_bits(), DataType::Double))]);
        assert_eq!(tok("0.25f"), vec![ParserToken::Constant(Constant::new(0.25f64.to_bits(), DataType::Float))]);
    }

    #[test]
    fn keywords_types_and_labels() {
        let tokens = tok("if while int uint true @loop { }");
        assert_eq!(
            tokens,
            vec![
                ParserToken::Keyword(Keyword::If),
                ParserToken::Keyword(Keyword::While),
                ParserToken::VarType(DataType::S32),
                ParserToken::VarType(DataType::U32),
                int(1, DataType::Bool),
                ParserToken::Label("loop".into()),
                ParserToken::Keyword(Keyword::BlockBegin),
                ParserToken::Keyword(Keyword::BlockEnd),
            ]
        );
    }

    #[test]
    fn string_escapes() {
        assert_eq!(tok(r#""a\tb\"c\\""#), vec![ParserToken::StringLiteral("a\tb\"c\\".into())]);
        assert!(split_line_into_tokens("\"open", 3).is_err());
        assert!(split_line_into_tokens(r#""bad \q""#, 3).is_err());
    }

    #[test]
    fn pragma_and_comment_lines() {
        assert_eq!(tok("  //# address-hook(0x1234)  "), vec![ParserToken::Pragma("address-hook(0x1234)".into())]);
        assert!(tok("// just a comment").is_empty());
        assert!(tok("   ").is_empty());
    }

    #[test]
    fn malformed_input_reports_line() {
        let err = split_line_into_tokens("x = 12ab", 41).unwrap_err();
        assert_eq!(err.line_number, 41);
        assert!(split_line_into_tokens("x = $", 0).is_err());
        assert!(split_line_into_tokens("jump @", 0).is_err());
        assert!(split_line_into_tokens("99999999999999999999", 0).is_err());
    }

    #[test]
    fn display_round_trips() {
        let lines = [
            "function u32 Add ( s32 a , uint b )",
            "return a + b * 3 - 0x10 ;",
            "x <<= ( y >> 2 ) | ~ z ^ 5 % 2",
            "if ( !done && count != 4294967295 || big >= 18446744073709551615 )",
            "@start : jump @start",
            "u8 [ 0xffff0000 ] = \"line\\n\\\"quoted\\\"\" ? 1.5 : 0.1f",
            "global bool flag = false",
            "x ++ -- += -= *= /= %= &= |= >>=",
            "System.rand ( ) ; call 0x200",
            "{",
            "}",
        ];
        for line in lines {
            let tokens = tok(line);
            let rendered: Vec<String> = tokens.iter().map(ToString::to_string).collect();
            assert_eq!(tok(&rendered.join(" ")), tokens, "round trip of `{line}`");
        }

        let pragma = tok("//#   inline");
        assert_eq!(tok(&pragma[0].to_string()), pragma);
    }
}
