//! Turns the undefined nodes of a function body into control-flow nodes,
//! pulling following siblings in as bodies of `if`, `else`, `while` and `for`.

use std::iter::Peekable;
use std::vec::IntoIter;

use super::error::CompileError;
use super::node::{ExternalKind, Node, NodeKind};
use super::scope::ScopeContext;
use super::token::{Keyword, Operator, StatementToken, Token, TokenList};
use super::token_processing::{implicit_convert, process_tokens, to_condition};
use crate::program::datatype::DataType;
use crate::program::globals_lookup::GlobalsLookup;

type Siblings = Peekable<IntoIter<Node>>;

/// What statements of one function are checked against.
#[derive(Clone, Copy)]
pub struct ShapingContext<'a> {
    pub lookup: GlobalsLookup<'a>,
    pub return_type: DataType,
    pub external_address_type: DataType,
}

/// Shape a function body. The body opens a scope inside the parameters' one,
/// so its locals may shadow parameters.
pub fn shape_function_body(
    body: Vec<Node>,
    context: &ShapingContext<'_>,
    scope: &mut ScopeContext,
) -> Result<Vec<Node>, CompileError> {
    let mut body_scope = scope.begin_scope();
    shape_nodes(body, context, &mut body_scope)
}

fn shape_nodes(nodes: Vec<Node>, context: &ShapingContext<'_>, scope: &mut ScopeContext) -> Result<Vec<Node>, CompileError> {
    let mut siblings = nodes.into_iter().peekable();
    let mut out = Vec::new();
    while let Some(node) = siblings.next() {
        if let Some(shaped) = shape_node(node, &mut siblings, context, scope)? {
            out.push(shaped);
        }
    }
    Ok(out)
}

/// Pragmas inside function bodies carry no meaning and are dropped.
fn shape_node(
    node: Node,
    siblings: &mut Siblings,
    context: &ShapingContext<'_>,
    scope: &mut ScopeContext,
) -> Result<Option<Node>, CompileError> {
    let line = node.line_number;
    match node.kind {
        NodeKind::Block(children) => {
            let mut inner = scope.begin_scope();
            let shaped = shape_nodes(children, context, &mut inner)?;
            Ok(Some(Node::new(NodeKind::Block(shaped), line)))
        }
        NodeKind::Pragma(_) => Ok(None),
        NodeKind::Undefined(tokens) => classify(tokens, line, siblings, context, scope).map(Some),
        NodeKind::Function { .. } => Err(CompileError::structural("Functions cannot be nested", line)),
        other => Ok(Some(Node::new(other, line))),
    }
}

fn is_else(node: &Node) -> bool {
    matches!(&node.kind, NodeKind::Undefined(tokens) if tokens.first().is_some_and(|t| t.is_keyword(Keyword::Else)))
}

/// The statement or block following a control keyword, in its own scope.
fn next_body(
    keyword: &str,
    line: u32,
    siblings: &mut Siblings,
    context: &ShapingContext<'_>,
    scope: &mut ScopeContext,
) -> Result<Node, CompileError> {
    while let Some(node) = siblings.next_if(|n| !is_else(n)) {
        let mut inner = scope.begin_scope();
        if let Some(shaped) = shape_node(node, siblings, context, &mut inner)? {
            return Ok(shaped);
        }
    }
    Err(CompileError::structural(
        format!("Expected a statement or block after '{keyword}'"),
        line,
    ))
}

fn classify(
    mut tokens: TokenList,
    line: u32,
    siblings: &mut Siblings,
    context: &ShapingContext<'_>,
    scope: &mut ScopeContext,
) -> Result<Node, CompileError> {
    if tokens.last().is_some_and(|t| t.is_operator(Operator::Semicolon)) {
        tokens.pop();
    }
    let keyword = match tokens.first() {
        Some(Token::Keyword(k)) => Some(*k),
        _ => None,
    };
    let arguments = if keyword.is_some() { tokens.split_off(1) } else { Vec::new() };

    let kind = match keyword {
        Some(Keyword::If) => {
            let condition = parse_condition(arguments, "if", line, context, scope)?;
            let then_branch = next_body("if", line, siblings, context, scope)?;
            let else_branch = match siblings.next_if(is_else) {
                Some(Node {
                    kind: NodeKind::Undefined(mut else_tokens),
                    line_number: else_line,
                }) => {
                    let remaining = else_tokens.split_off(1);
                    let branch = if remaining.is_empty() {
                        next_body("else", else_line, siblings, context, scope)?
                    } else {
                        let mut inner = scope.begin_scope();
                        classify(remaining, else_line, siblings, context, &mut inner)?
                    };
                    Some(Box::new(branch))
                }
                _ => None,
            };
            NodeKind::If {
                condition,
                then_branch: Box::new(then_branch),
                else_branch,
            }
        }
        Some(Keyword::Else) => {
            return Err(CompileError::structural("'else' without matching 'if'", line));
        }
        Some(Keyword::While) => {
            let condition = parse_condition(arguments, "while", line, context, scope)?;
            let body = next_body("while", line, siblings, context, scope)?;
            NodeKind::While {
                condition,
                body: Box::new(body),
            }
        }
        Some(Keyword::For) => shape_for(arguments, line, siblings, context, scope)?,
        Some(Keyword::Return) => {
            if arguments.is_empty() {
                if context.return_type != DataType::Void {
                    return Err(CompileError::type_error(
                        format!("Function must return a value of type '{}'", context.return_type),
                        line,
                    ));
                }
                NodeKind::Return(None)
            } else {
                if context.return_type == DataType::Void {
                    return Err(CompileError::type_error("A void function cannot return a value", line));
                }
                let value = process_tokens(arguments, line, Some(context.return_type), context.lookup, scope)?;
                NodeKind::Return(Some(value))
            }
        }
        Some(keyword @ (Keyword::Break | Keyword::Continue)) => {
            if !arguments.is_empty() {
                return Err(CompileError::structural(
                    format!("Unexpected tokens after '{}'", keyword.text()),
                    line,
                ));
            }
            if keyword == Keyword::Break {
                NodeKind::Break
            } else {
                NodeKind::Continue
            }
        }
        Some(Keyword::Jump) => match arguments.as_slice() {
            [Token::Label(label)] => NodeKind::Jump(label.clone()),
            _ => external(ExternalKind::Jump, arguments, line, context, scope)?,
        },
        Some(Keyword::Call) => external(ExternalKind::Call, arguments, line, context, scope)?,
        Some(keyword) => {
            return Err(CompileError::structural(
                format!("'{}' is not allowed inside a function", keyword.text()),
                line,
            ));
        }
        None => match tokens.as_slice() {
            [Token::Label(label), Token::Operator(Operator::Colon)] => NodeKind::Label(label.clone()),
            _ => NodeKind::Statement(process_tokens(tokens, line, None, context.lookup, scope)?),
        },
    };
    Ok(Node::new(kind, line))
}

fn parse_condition(
    tokens: TokenList,
    keyword: &str,
    line: u32,
    context: &ShapingContext<'_>,
    scope: &mut ScopeContext,
) -> Result<StatementToken, CompileError> {
    if !tokens.first().is_some_and(|t| t.is_operator(Operator::ParenthesisLeft)) {
        return Err(CompileError::structural(format!("Expected '(' after '{keyword}'"), line));
    }
    let condition = process_tokens(tokens, line, None, context.lookup, scope)?;
    to_condition(condition, line)
}

fn external(
    kind: ExternalKind,
    tokens: TokenList,
    line: u32,
    context: &ShapingContext<'_>,
    scope: &mut ScopeContext,
) -> Result<NodeKind, CompileError> {
    if tokens.is_empty() {
        return Err(CompileError::structural("Expected a target address", line));
    }
    let target = process_tokens(tokens, line, None, context.lookup, scope)?;
    if !target.data_type.is_integer() {
        return Err(CompileError::type_error(
            format!("Target address must be an integer, not '{}'", target.data_type),
            line,
        ));
    }
    let target = implicit_convert(target, context.external_address_type, line)?;
    Ok(NodeKind::External { kind, target })
}

/// `for (init; condition; iteration)`: the header's scope also covers the body.
fn shape_for(
    tokens: TokenList,
    line: u32,
    siblings: &mut Siblings,
    context: &ShapingContext<'_>,
    scope: &mut ScopeContext,
) -> Result<NodeKind, CompileError> {
    let wrapped = tokens.first().is_some_and(|t| t.is_operator(Operator::ParenthesisLeft))
        && tokens.last().is_some_and(|t| t.is_operator(Operator::ParenthesisRight));
    if !wrapped || tokens.len() < 2 {
        return Err(CompileError::structural("Expected '( ... )' after 'for'", line));
    }
    let inner = tokens.get(1..tokens.len() - 1).map(<[Token]>::to_vec).unwrap_or_default();

    let mut clauses: Vec<TokenList> = vec![Vec::new()];
    let mut depth = 0usize;
    for token in inner {
        match token {
            Token::Operator(Operator::ParenthesisLeft | Operator::BracketLeft) => depth += 1,
            Token::Operator(Operator::ParenthesisRight | Operator::BracketRight) => depth = depth.saturating_sub(1),
            _ => {}
        }
        if depth == 0 && token.is_operator(Operator::Semicolon) {
            clauses.push(Vec::new());
        } else if let Some(clause) = clauses.last_mut() {
            clause.push(token);
        }
    }
    let [initial, condition, iteration]: [TokenList; 3] = clauses.try_into().map_err(|_| {
        CompileError::structural("Expected exactly two semicolons in 'for' loop header", line)
    })?;

    let mut header_scope = scope.begin_scope();
    let initial = optional_clause(initial, line, context, &mut header_scope)?;
    let condition = match optional_clause(condition, line, context, &mut header_scope)? {
        Some(condition) => Some(to_condition(condition, line)?),
        None => None,
    };
    let iteration = optional_clause(iteration, line, context, &mut header_scope)?;
    let body = next_body("for", line, siblings, context, &mut header_scope)?;

    Ok(NodeKind::For {
        initial,
        condition,
        iteration,
        body: Box::new(body),
    })
}

fn optional_clause(
    tokens: TokenList,
    line: u32,
    context: &ShapingContext<'_>,
    scope: &mut ScopeContext,
) -> Result<Option<StatementToken>, CompileError> {
    if tokens.is_empty() {
        return Ok(None);
    }
    process_tokens(tokens, line, None, context.lookup, scope).map(Some)
}
