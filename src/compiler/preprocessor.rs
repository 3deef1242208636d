//! Per-file preprocessing: `#if` / `#elif` / `#else` / `#endif` blocks and
//! whole-word substitution of preprocessor definitions.
//!
//! Errors from this stage carry the 1-based line number within the file.

use std::collections::BTreeMap;

use super::error::CompileError;
use super::lexer::{split_line_into_tokens, ParserToken};
use super::token::Operator;

/// Rewrite `lines` in place. Directive lines and lines in inactive branches
/// become empty so the file keeps its line numbering.
pub fn preprocess(lines: &mut [String], definitions: &BTreeMap<String, i64>) -> Result<(), CompileError> {
    let mut frames: Vec<Frame> = Vec::new();

    for (index, line) in lines.iter_mut().enumerate() {
        let line_number = u32::try_from(index + 1).unwrap_or(u32::MAX);
        let active = frames.last().map_or(true, |f| f.active);

        let Some(directive) = line.trim_start().strip_prefix('#') else {
            if !active {
                line.clear();
            } else if !definitions.is_empty() {
                *line = substitute_definitions(line, definitions);
            }
            continue;
        };

        let (name, argument) = directive
            .trim()
            .split_once(char::is_whitespace)
            .map_or((directive.trim(), ""), |(n, a)| (n, a.trim()));
        match name {
            "if" => {
                let condition = active && evaluate(argument, definitions, line_number)? != 0;
                frames.push(Frame {
                    parent_active: active,
                    active: condition,
                    taken: condition,
                    seen_else: false,
                    opened_at: line_number,
                });
            }
            "elif" => {
                let frame = open_frame(&mut frames, "#elif", line_number)?;
                if frame.seen_else {
                    return Err(CompileError::structural("#elif after #else", line_number));
                }
                frame.active = if frame.parent_active && !frame.taken {
                    evaluate(argument, definitions, line_number)? != 0
                } else {
                    false
                };
                frame.taken |= frame.active;
            }
            "else" => {
                let frame = open_frame(&mut frames, "#else", line_number)?;
                if frame.seen_else {
                    return Err(CompileError::structural("#else appears twice", line_number));
                }
                frame.active = frame.parent_active && !frame.taken;
                frame.taken = true;
                frame.seen_else = true;
            }
            "endif" => {
                if frames.pop().is_none() {
                    return Err(CompileError::structural("#endif without #if", line_number));
                }
            }
            other => {
                return Err(CompileError::structural(
                    format!("Unknown preprocessor directive '#{other}'"),
                    line_number,
                ));
            }
        }
        line.clear();
    }

    match frames.last() {
        Some(frame) => Err(CompileError::structural("Missing #endif", frame.opened_at)),
        None => Ok(()),
    }
}

struct Frame {
    parent_active: bool,
    active: bool,
    /// Some branch of this block was already selected.
    taken: bool,
    seen_else: bool,
    opened_at: u32,
}

fn open_frame<'a>(frames: &'a mut [Frame], directive: &str, line_number: u32) -> Result<&'a mut Frame, CompileError> {
    frames
        .last_mut()
        .ok_or_else(|| CompileError::structural(format!("{directive} without #if"), line_number))
}

// ── Substitution ──

/// Replace whole-word definition names outside string literals and comments.
fn substitute_definitions(line: &str, definitions: &BTreeMap<String, i64>) -> String {
    let mut out = String::with_capacity(line.len());
    let mut chars = line.char_indices().peekable();

    while let Some((start, ch)) = chars.next() {
        if ch == '"' {
            out.push(ch);
            while let Some((_, c)) = chars.next() {
                out.push(c);
                if c == '\\' {
                    if let Some((_, escaped)) = chars.next() {
                        out.push(escaped);
                    }
                } else if c == '"' {
                    break;
                }
            }
        } else if ch == '/' && line[start..].starts_with("//") {
            out.push_str(&line[start..]);
            break;
        } else if ch.is_ascii_alphanumeric() || ch == '_' {
            let mut end = start + ch.len_utf8();
            while let Some(&(i, c)) = chars.peek() {
                if !(c.is_ascii_alphanumeric() || c == '_' || c == '.') {
                    break;
                }
                end = i + c.len_utf8();
                chars.next();
            }
            let word = &line[start..end];
            match definitions.get(word) {
                Some(value) if !ch.is_ascii_digit() => out.push_str(&value.to_string()),
                _ => out.push_str(word),
            }
        } else {
            out.push(ch);
        }
    }
    out
}

// ── Condition evaluation ──

#[derive(Clone, Copy)]
enum Item {
    Value(i64),
    Operator(Operator),
}

fn evaluate(expression: &str, definitions: &BTreeMap<String, i64>, line_number: u32) -> Result<i64, CompileError> {
    let mut items = Vec::new();
    for token in split_line_into_tokens(expression, line_number)? {
        items.push(match token {
            ParserToken::Constant(c) if c.data_type.is_integral() => {
                Item::Value(i64::try_from(c.data_type.integer_value(c.value)).unwrap_or(i64::MAX))
            }
            ParserToken::Identifier(name) => Item::Value(definitions.get(&name).copied().unwrap_or(0)),
            ParserToken::Operator(op) => Item::Operator(op),
            other => {
                return Err(CompileError::structural(
                    format!("Unexpected '{other}' in preprocessor condition"),
                    line_number,
                ));
            }
        });
    }
    if items.is_empty() {
        return Err(CompileError::structural("Missing preprocessor condition", line_number));
    }

    let mut evaluator = Evaluator {
        items,
        pos: 0,
        line_number,
    };
    let value = evaluator.binary(u8::MAX)?;
    if evaluator.pos < evaluator.items.len() {
        return Err(CompileError::structural("Malformed preprocessor condition", line_number));
    }
    Ok(value)
}

struct Evaluator {
    items: Vec<Item>,
    pos: usize,
    line_number: u32,
}

impl Evaluator {
    fn peek_operator(&self) -> Option<Operator> {
        match self.items.get(self.pos) {
            Some(Item::Operator(op)) => Some(*op),
            _ => None,
        }
    }

    fn error(&self) -> CompileError {
        CompileError::structural("Malformed preprocessor condition", self.line_number)
    }

    /// Left-associative binary operators up to `max_priority`.
    fn binary(&mut self, max_priority: u8) -> Result<i64, CompileError> {
        let mut left = self.unary()?;
        while let Some(op) = self.peek_operator() {
            let Some(priority) = op.priority().filter(|&p| p <= max_priority) else {
                break;
            };
            if op.is_assignment() || op == Operator::QuestionMark {
                return Err(self.error());
            }
            self.pos += 1;
            let right = self.binary(priority - 1)?;
            left = self.apply(op, left, right)?;
        }
        Ok(left)
    }

    fn unary(&mut self) -> Result<i64, CompileError> {
        let item = *self.items.get(self.pos).ok_or_else(|| self.error())?;
        self.pos += 1;
        match item {
            Item::Value(value) => Ok(value),
            Item::Operator(Operator::Minus) => Ok(self.unary()?.wrapping_neg()),
            Item::Operator(Operator::LogicalNot) => Ok(i64::from(self.unary()? == 0)),
            Item::Operator(Operator::BitNot) => Ok(!self.unary()?),
            Item::Operator(Operator::ParenthesisLeft) => {
                let value = self.binary(u8::MAX)?;
                if self.peek_operator() != Some(Operator::ParenthesisRight) {
                    return Err(self.error());
                }
                self.pos += 1;
                Ok(value)
            }
            Item::Operator(_) => Err(self.error()),
        }
    }

    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    fn apply(&self, op: Operator, left: i64, right: i64) -> Result<i64, CompileError> {
        let shift = (right & 63) as u32;
        Ok(match op {
            Operator::Plus => left.wrapping_add(right),
            Operator::Minus => left.wrapping_sub(right),
            Operator::Multiply => left.wrapping_mul(right),
            Operator::Divide | Operator::Modulo => {
                if right == 0 {
                    return Err(CompileError::type_error(
                        "Division by zero in preprocessor condition",
                        self.line_number,
                    ));
                }
                if op == Operator::Divide {
                    left.wrapping_div(right)
                } else {
                    left.wrapping_rem(right)
                }
            }
            Operator::ShiftLeft => left.wrapping_shl(shift),
            Operator::ShiftRight => left.wrapping_shr(shift),
            Operator::BitAnd => left & right,
            Operator::BitOr => left | right,
            Operator::BitXor => left ^ right,
            Operator::LogicalAnd => i64::from(left != 0 && right != 0),
            Operator::LogicalOr => i64::from(left != 0 || right != 0),
            Operator::CompareEqual => i64::from(left == right),
            Operator::CompareNotEqual => i64::from(left != right),
            Operator::CompareLess => i64::from(left < right),
            Operator::CompareLessOrEqual => i64::from(left <= right),
            Operator::CompareGreater => i64::from(left > right),
            Operator::CompareGreaterOrEqual => i64::from(left >= right),
            _ => return Err(self.error()),
        })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn run(src: &str, defs: &[(&str, i64)]) -> Result<Vec<String>, CompileError> {
        let mut lines: Vec<String> = src.lines().map(str::to_string).collect();
        let definitions = defs.iter().map(|(k, v)| ((*k).to_string(), *v)).collect();
        preprocess(&mut lines, &definitions)?;
        Ok(lines)
    }

    #[test]
    fn selects_one_branch_and_keeps_line_count() {
        let src = "#if PLATFORM == 2\na\n#elif PLATFORM == 3\nb\n#else\nc\n#endif\nd";
        let lines = run(src, &[("PLATFORM", 3)]).unwrap();
        assert_eq!(lines, vec!["", "", "", "b", "", "", "", "d"]);

        let lines = run(src, &[]).unwrap();
        assert_eq!(lines[5], "c");
        assert_eq!(lines[3], "");
    }

    #[test]
    fn nested_blocks_inside_false_branch_stay_off() {
        let src = "#if 0\n#if 1\nx\n#else\ny\n#endif\n#endif";
        let lines = run(src, &[]).unwrap();
        assert!(lines.iter().all(String::is_empty));
    }

    #[test]
    fn expression_operators() {
        let src = "#if !(A > 1) || (B & 4) && -B < ~0\nyes\n#endif";
        assert_eq!(run(src, &[("A", 5), ("B", 6)]).unwrap()[1], "yes");
        assert_eq!(run("#if 1 + 2 * 3 == 7\nyes\n#endif", &[]).unwrap()[1], "yes");
    }

    #[test]
    fn substitutes_whole_words_outside_strings_and_comments() {
        let lines = run("x = SIZE + SIZEX \"SIZE\" // SIZE", &[("SIZE", 8)]).unwrap();
        assert_eq!(lines[0], "x = 8 + SIZEX \"SIZE\" // SIZE");
    }

    #[test]
    fn malformed_nesting_reports_file_line() {
        let err = run("a\n#endif", &[]).unwrap_err();
        assert_eq!(err.line_number, 2);
        assert!(run("#if 1\n#else\n#else\n#endif", &[]).is_err());
        assert!(run("#if 1\n#else\n#elif 1\n#endif", &[]).is_err());
        assert_eq!(run("x\n#if 1\ny", &[]).unwrap_err().line_number, 2);
        assert!(run("#include foo", &[]).is_err());
        assert!(run("#if\n#endif", &[]).is_err());
    }
}
