use super::error::CompileError;
use super::lexer::{split_line_into_tokens, ParserToken};
use super::node::{Node, NodeKind};
use super::token::{Constant, Keyword, Token, TokenList};
use crate::program::datatype::DataType;
use crate::program::module::Module;

/// Turn the flattened source lines into a tree of blocks whose leaves are
/// pragma and undefined (not yet classified) nodes. Line numbers are the
/// 0-based indices into `lines`.
pub fn build_nodes(lines: &[String], module: &mut Module) -> Result<Node, CompileError> {
    // Each open block with the line it started on.
    let mut stack: Vec<(Vec<Node>, u32)> = vec![(Vec::new(), 0)];

    for (index, line) in lines.iter().enumerate() {
        let line_number = u32::try_from(index).unwrap_or(u32::MAX);
        let parser_tokens = split_line_into_tokens(line, line_number)?;
        if parser_tokens.is_empty() {
            continue;
        }

        let has_block_keyword = parser_tokens.iter().any(|t| {
            matches!(t, ParserToken::Keyword(Keyword::BlockBegin | Keyword::BlockEnd))
        });
        if has_block_keyword {
            if parser_tokens.len() != 1 {
                return Err(CompileError::structural(
                    "Curly braces must be on a line of their own",
                    line_number,
                ));
            }
            if matches!(parser_tokens.first(), Some(ParserToken::Keyword(Keyword::BlockBegin))) {
                stack.push((Vec::new(), line_number));
            } else {
                if stack.len() <= 1 {
                    return Err(CompileError::structural("Closed too many blocks", line_number));
                }
                if let Some((children, start)) = stack.pop() {
                    push_node(&mut stack, Node::new(NodeKind::Block(children), start));
                }
            }
            continue;
        }

        if let [ParserToken::Pragma(payload)] = parser_tokens.as_slice() {
            push_node(&mut stack, Node::new(NodeKind::Pragma(payload.clone()), line_number));
            continue;
        }

        let tokens: TokenList = parser_tokens
            .into_iter()
            .map(|token| convert_token(token, module))
            .collect();
        push_node(&mut stack, Node::new(NodeKind::Undefined(tokens), line_number));
    }

    if stack.len() > 1 {
        let line = stack.last().map_or(0, |(_, start)| *start);
        return Err(CompileError::structural("More blocks opened than closed", line));
    }
    let (children, _) = stack.pop().unwrap_or_default();
    Ok(Node::new(NodeKind::Block(children), 0))
}

fn push_node(stack: &mut [(Vec<Node>, u32)], node: Node) {
    if let Some((children, _)) = stack.last_mut() {
        children.push(node);
    }
}

/// String literals are interned right away and replaced by their hash.
fn convert_token(token: ParserToken, module: &mut Module) -> Token {
    match token {
        ParserToken::Keyword(k) => Token::Keyword(k),
        ParserToken::VarType(t) => Token::VarType(t),
        ParserToken::Operator(op) => Token::Operator(op),
        ParserToken::Label(name) => Token::Label(name),
        ParserToken::Constant(c) => Token::Constant(c),
        ParserToken::StringLiteral(text) => {
            let hash = module.add_string_literal(&text);
            Token::Constant(Constant::new(hash, DataType::U64))
        }
        ParserToken::Identifier(name) => Token::Identifier(name),
        // Pragma tokens only come alone on their line.
        ParserToken::Pragma(payload) => Token::Identifier(payload),
    }
}
