//! Reduces the token list of one statement to a typed expression tree.
//!
//! Defines are expanded first, then brackets are grouped and reduced
//! innermost first. Within one level, variable definitions, function calls,
//! memory accesses, casts and identifiers become statement tokens, and the
//! remaining operator sequence is folded by precedence climbing.

use std::iter::Peekable;
use std::vec::IntoIter;

use super::error::CompileError;
use super::scope::ScopeContext;
use super::token::{
    Constant, GroupKind, Operator, StatementKind, StatementToken, Token, TokenList, UnaryKind, CONDITIONAL_PRIORITY,
};
use crate::program::datatype::{cast_value, DataType};
use crate::program::function::{FunctionRef, VariableRef};
use crate::program::globals_lookup::GlobalsLookup;
use crate::program::opcode::BinaryOperation;

/// Nesting limit for define expansion.
pub const MAX_DEFINE_DEPTH: usize = 32;

/// Lowest-binding priority; a full expression is parsed up to this level.
const ASSIGNMENT_PRIORITY: u8 = 14;

/// Rewrite a statement's tokens into one typed statement. With an
/// `expected_type`, the result is implicitly converted to it.
pub fn process_tokens(
    tokens: TokenList,
    line_number: u32,
    expected_type: Option<DataType>,
    lookup: GlobalsLookup<'_>,
    scope: &mut ScopeContext,
) -> Result<StatementToken, CompileError> {
    let mut processor = TokenProcessor {
        lookup,
        scope,
        line_number,
    };
    let expanded = processor.expand_defines(tokens, &mut Vec::new())?;
    let grouped = group_parentheses(expanded, line_number)?;
    if grouped.is_empty() {
        return Err(CompileError::structural("Expected an expression", line_number));
    }
    let statement = processor.reduce_to_statement(grouped)?;
    match expected_type {
        Some(data_type) => implicit_convert(statement, data_type, line_number),
        None => Ok(statement),
    }
}

struct TokenProcessor<'a, 's> {
    lookup: GlobalsLookup<'a>,
    scope: &'s mut ScopeContext,
    line_number: u32,
}

impl TokenProcessor<'_, '_> {
    // ── Defines ──

    fn expand_defines(&self, tokens: TokenList, chain: &mut Vec<String>) -> Result<TokenList, CompileError> {
        let mut out = Vec::with_capacity(tokens.len());
        for token in tokens {
            let name = match token {
                Token::Identifier(name) => name,
                other => {
                    out.push(other);
                    continue;
                }
            };
            let Some(define) = self.lookup.define(&name) else {
                out.push(Token::Identifier(name));
                continue;
            };
            if chain.contains(&name) {
                return Err(CompileError::resolution(
                    format!("Define '{name}' refers to itself through '{}'", chain.join(" -> ")),
                    self.line_number,
                ));
            }
            if chain.len() >= MAX_DEFINE_DEPTH {
                return Err(CompileError::resolution(
                    format!("Define '{name}' nests deeper than {MAX_DEFINE_DEPTH} levels"),
                    self.line_number,
                ));
            }
            chain.push(name);
            let mut content = self.expand_defines(define.content.clone(), chain)?;
            chain.pop();

            if let (Some(data_type), [Token::Constant(c)]) = (define.data_type, content.as_slice()) {
                if !c.data_type.constant_fits(c.value, data_type) {
                    return Err(CompileError::type_error(
                        format!("Value of define '{}' does not fit type '{data_type}'", define.name),
                        self.line_number,
                    ));
                }
                let value = cast_value(c.value, c.data_type, data_type);
                content = vec![Token::Constant(Constant::new(value, data_type))];
            }
            out.extend(content);
        }
        Ok(out)
    }

    // ── Groups and operands ──

    /// Reduce the content of a bracket group. Results: nothing, a lone type
    /// (for `(type) operand` casts), one statement, or an argument list.
    fn reduce_group(&mut self, tokens: TokenList) -> Result<TokenList, CompileError> {
        if tokens.is_empty() {
            return Ok(tokens);
        }
        if tokens.iter().any(|t| t.is_operator(Operator::Comma)) {
            let mut parts = Vec::new();
            let mut current = Vec::new();
            for token in tokens {
                if token.is_operator(Operator::Comma) {
                    parts.push(std::mem::take(&mut current));
                } else {
                    current.push(token);
                }
            }
            parts.push(current);

            let mut arguments = Vec::with_capacity(parts.len());
            for part in parts {
                if part.is_empty() {
                    return Err(CompileError::structural("Empty argument in list", self.line_number));
                }
                arguments.push(vec![Token::Statement(self.reduce_to_statement(part)?)]);
            }
            return Ok(vec![Token::CommaSeparated(arguments)]);
        }
        if matches!(tokens.as_slice(), [Token::VarType(_)]) {
            return Ok(tokens);
        }
        Ok(vec![Token::Statement(self.reduce_to_statement(tokens)?)])
    }

    fn reduce_to_statement(&mut self, tokens: TokenList) -> Result<StatementToken, CompileError> {
        let operands = self.reduce_operands(tokens)?;
        let mut parser = ExpressionParser {
            tokens: operands.into_iter().peekable(),
            line_number: self.line_number,
        };
        let statement = parser.parse_binary(ASSIGNMENT_PRIORITY)?;
        if let Some(extra) = parser.tokens.next() {
            return Err(CompileError::structural(
                format!("Unexpected {} after expression", describe(&extra)),
                self.line_number,
            ));
        }
        Ok(statement)
    }

    fn reduce_operands(&mut self, tokens: TokenList) -> Result<TokenList, CompileError> {
        let mut inner_reduced = Vec::with_capacity(tokens.len());
        for token in tokens {
            match token {
                Token::Parenthesis(kind, inner) => inner_reduced.push(Token::Parenthesis(kind, self.reduce_group(inner)?)),
                other => inner_reduced.push(other),
            }
        }

        let line = self.line_number;
        let mut out = Vec::with_capacity(inner_reduced.len());
        let mut iter = inner_reduced.into_iter().peekable();
        while let Some(token) = iter.next() {
            match token {
                Token::VarType(data_type) => {
                    if let Some(Token::Identifier(name)) = iter.next_if(|t| matches!(t, Token::Identifier(_))) {
                        out.push(Token::Statement(self.define_variable(&name, data_type)?));
                    } else if let Some(Token::Parenthesis(kind, inner)) =
                        iter.next_if(|t| matches!(t, Token::Parenthesis(..)))
                    {
                        let operand = single_statement(inner, line)?;
                        let statement = match kind {
                            GroupKind::Square => memory_access(operand, data_type, line)?,
                            GroupKind::Round => explicit_cast(operand, data_type, line)?,
                        };
                        out.push(Token::Statement(statement));
                    } else {
                        out.push(Token::VarType(data_type));
                    }
                }
                Token::Identifier(name) => {
                    if let Some(Token::Parenthesis(_, inner)) =
                        iter.next_if(|t| matches!(t, Token::Parenthesis(GroupKind::Round, _)))
                    {
                        let arguments = argument_list(inner, line)?;
                        out.push(Token::Statement(self.resolve_call(&name, arguments)?));
                    } else {
                        out.push(Token::Statement(self.resolve_identifier(&name)?));
                    }
                }
                Token::Parenthesis(GroupKind::Square, inner) => {
                    let address = single_statement(inner, line)?;
                    out.push(Token::Statement(memory_access(address, DataType::U32, line)?));
                }
                Token::Parenthesis(GroupKind::Round, mut inner) => match (inner.pop(), inner.is_empty()) {
                    (Some(Token::Statement(statement)), true) => out.push(Token::Statement(statement)),
                    // `(type)` stays a group; the operator pass reads it as a prefix cast.
                    (Some(Token::VarType(t)), true) => {
                        out.push(Token::Parenthesis(GroupKind::Round, vec![Token::VarType(t)]));
                    }
                    (None, _) => return Err(CompileError::structural("Empty parentheses", line)),
                    _ => return Err(CompileError::structural("Unexpected argument list", line)),
                },
                Token::Constant(c) => out.push(Token::Statement(StatementToken::constant(c.value, c.data_type))),
                other => out.push(other),
            }
        }
        Ok(out)
    }

    // ── Resolution ──

    fn define_variable(&mut self, name: &str, data_type: DataType) -> Result<StatementToken, CompileError> {
        if data_type == DataType::Void {
            return Err(CompileError::type_error(
                format!("Variable '{name}' cannot be void"),
                self.line_number,
            ));
        }
        let id = self.scope.declare(name, data_type, self.line_number)?;
        Ok(StatementToken {
            kind: StatementKind::Variable(VariableRef::Local(id)),
            data_type,
        })
    }

    /// Locals, then globals, then zero-argument script functions, then
    /// native variables, then zero-argument native functions.
    fn resolve_identifier(&self, name: &str) -> Result<StatementToken, CompileError> {
        let variable = |var: VariableRef, data_type: DataType| StatementToken {
            kind: StatementKind::Variable(var),
            data_type,
        };
        if let Some((id, data_type)) = self.scope.lookup(name) {
            return Ok(variable(VariableRef::Local(id), data_type));
        }
        if let Some((id, global)) = self.lookup.global(name) {
            return Ok(variable(VariableRef::Global(id), global.data_type));
        }

        let overloads = self.lookup.overloads(name);
        let zero_argument = |native: bool| {
            overloads
                .iter()
                .filter(|f| matches!(f, FunctionRef::Native(_)) == native)
                .find_map(|f| {
                    self.lookup
                        .signature(*f)
                        .filter(|sig| sig.parameters.is_empty())
                        .map(|sig| StatementToken {
                            kind: StatementKind::FunctionCall {
                                function: *f,
                                arguments: Vec::new(),
                            },
                            data_type: sig.return_type,
                        })
                })
        };

        if let Some(call) = zero_argument(false) {
            return Ok(call);
        }
        if let Some((id, native)) = self.lookup.native_variable(name) {
            return Ok(variable(VariableRef::External(id), native.data_type));
        }
        zero_argument(true).ok_or_else(|| {
            CompileError::resolution(format!("Unknown identifier '{name}'"), self.line_number)
        })
    }

    /// Exact parameter match first (several exact matches is ambiguous),
    /// otherwise the first overload in registration order that accepts every
    /// argument by implicit conversion.
    fn resolve_call(&self, name: &str, arguments: Vec<StatementToken>) -> Result<StatementToken, CompileError> {
        let line = self.line_number;
        let candidates: Vec<_> = self
            .lookup
            .overloads(name)
            .into_iter()
            .filter_map(|f| self.lookup.signature(f).map(|sig| (f, sig)))
            .collect();
        if candidates.is_empty() {
            return Err(CompileError::resolution(format!("Unknown function '{name}'"), line));
        }

        let exact: Vec<_> = candidates
            .iter()
            .filter(|(_, sig)| {
                sig.parameters.len() == arguments.len()
                    && sig.parameters.iter().zip(&arguments).all(|(p, a)| p.data_type == a.data_type)
            })
            .collect();
        if exact.len() > 1 {
            return Err(CompileError::resolution(
                format!("Ambiguous call to '{name}': {} and {}", exact[0].1, exact[1].1),
                line,
            ));
        }

        let chosen = exact.first().copied().or_else(|| {
            candidates.iter().find(|(_, sig)| {
                sig.parameters.len() == arguments.len()
                    && sig.parameters.iter().zip(&arguments).all(|(p, a)| accepts(a, p.data_type))
            })
        });
        let Some((function, signature)) = chosen else {
            let types: Vec<&str> = arguments.iter().map(|a| a.data_type.name()).collect();
            return Err(CompileError::type_error(
                format!("No overload of '{name}' accepts ({})", types.join(", ")),
                line,
            ));
        };

        let arguments = arguments
            .into_iter()
            .zip(signature.parameters)
            .map(|(argument, parameter)| implicit_convert(argument, parameter.data_type, line))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(StatementToken {
            kind: StatementKind::FunctionCall {
                function: *function,
                arguments,
            },
            data_type: signature.return_type,
        })
    }
}

/// Nest `( )` and `[ ]` into group tokens.
fn group_parentheses(tokens: TokenList, line_number: u32) -> Result<TokenList, CompileError> {
    let mut stack: Vec<(GroupKind, TokenList)> = Vec::new();
    let mut current = Vec::new();
    for token in tokens {
        let open = match token {
            Token::Operator(Operator::ParenthesisLeft) => Some(GroupKind::Round),
            Token::Operator(Operator::BracketLeft) => Some(GroupKind::Square),
            _ => None,
        };
        if let Some(kind) = open {
            stack.push((kind, std::mem::take(&mut current)));
            continue;
        }
        let close = match token {
            Token::Operator(Operator::ParenthesisRight) => Some(GroupKind::Round),
            Token::Operator(Operator::BracketRight) => Some(GroupKind::Square),
            _ => None,
        };
        match close {
            Some(kind) => match stack.pop() {
                Some((open_kind, outer)) if open_kind == kind => {
                    let inner = std::mem::replace(&mut current, outer);
                    current.push(Token::Parenthesis(kind, inner));
                }
                _ => return Err(CompileError::structural("Unbalanced parentheses", line_number)),
            },
            None => current.push(token),
        }
    }
    if !stack.is_empty() {
        return Err(CompileError::structural("Unbalanced parentheses", line_number));
    }
    Ok(current)
}

fn single_statement(mut tokens: TokenList, line_number: u32) -> Result<StatementToken, CompileError> {
    match (tokens.pop(), tokens.is_empty()) {
        (Some(Token::Statement(statement)), true) => Ok(statement),
        _ => Err(CompileError::structural("Expected a single expression in brackets", line_number)),
    }
}

fn argument_list(mut tokens: TokenList, line_number: u32) -> Result<Vec<StatementToken>, CompileError> {
    match tokens.pop() {
        None => Ok(Vec::new()),
        Some(Token::Statement(statement)) if tokens.is_empty() => Ok(vec![statement]),
        Some(Token::CommaSeparated(parts)) if tokens.is_empty() => {
            parts.into_iter().map(|part| single_statement(part, line_number)).collect()
        }
        Some(_) => Err(CompileError::structural("Invalid argument list", line_number)),
    }
}

fn describe(token: &Token) -> String {
    match token {
        Token::Keyword(k) => format!("'{}'", k.text()),
        Token::VarType(t) => format!("type '{t}'"),
        Token::Operator(op) => format!("operator '{op}'"),
        Token::Label(name) => format!("label '@{name}'"),
        Token::Constant(c) => format!("constant '{c}'"),
        Token::Identifier(name) => format!("'{name}'"),
        Token::Parenthesis(..) => "parentheses".to_string(),
        Token::CommaSeparated(_) => "argument list".to_string(),
        Token::Statement(_) => "expression".to_string(),
    }
}

// ── Operators ──

struct ExpressionParser {
    tokens: Peekable<IntoIter<Token>>,
    line_number: u32,
}

impl ExpressionParser {
    /// Precedence climbing; operators with a priority above `max_priority`
    /// are left for the caller.
    fn parse_binary(&mut self, max_priority: u8) -> Result<StatementToken, CompileError> {
        let mut left = self.parse_unary()?;
        loop {
            let Some(Token::Operator(op)) = self.tokens.peek() else {
                break;
            };
            let op = *op;
            let Some(priority) = op.priority() else {
                break;
            };
            if priority > max_priority {
                break;
            }
            self.tokens.next();

            if op == Operator::QuestionMark {
                let if_true = self.parse_binary(CONDITIONAL_PRIORITY)?;
                if !self.tokens.next().is_some_and(|t| t.is_operator(Operator::Colon)) {
                    return Err(CompileError::structural("Expected ':' in conditional expression", self.line_number));
                }
                let if_false = self.parse_binary(CONDITIONAL_PRIORITY)?;
                left = build_conditional(left, if_true, if_false, self.line_number)?;
            } else {
                let next_max = if op.is_right_associative() { priority } else { priority - 1 };
                let right = self.parse_binary(next_max)?;
                left = build_binary(op, left, right, self.line_number)?;
            }
        }
        Ok(left)
    }

    fn parse_unary(&mut self) -> Result<StatementToken, CompileError> {
        let line = self.line_number;
        match self.tokens.next() {
            Some(Token::Operator(op)) => {
                let kind = match op {
                    Operator::Minus => UnaryKind::Negate,
                    Operator::LogicalNot => UnaryKind::Not,
                    Operator::BitNot => UnaryKind::BitNot,
                    Operator::Increment => UnaryKind::PreIncrement,
                    Operator::Decrement => UnaryKind::PreDecrement,
                    Operator::Plus => {
                        let operand = self.parse_unary()?;
                        return require_numeric(operand, "+", line);
                    }
                    other => {
                        return Err(CompileError::structural(format!("Unexpected operator '{other}'"), line));
                    }
                };
                let operand = self.parse_unary()?;
                build_unary(kind, operand, line)
            }
            Some(Token::Parenthesis(GroupKind::Round, inner)) => match inner.as_slice() {
                [Token::VarType(data_type)] => {
                    let operand = self.parse_unary()?;
                    explicit_cast(operand, *data_type, line)
                }
                _ => Err(CompileError::structural("Unexpected parentheses", line)),
            },
            Some(Token::Statement(statement)) => self.parse_postfix(statement),
            Some(other) => Err(CompileError::structural(format!("Unexpected {}", describe(&other)), line)),
            None => Err(CompileError::structural("Expected an expression", line)),
        }
    }

    fn parse_postfix(&mut self, mut statement: StatementToken) -> Result<StatementToken, CompileError> {
        while let Some(Token::Operator(op)) =
            self.tokens.next_if(|t| t.is_operator(Operator::Increment) || t.is_operator(Operator::Decrement))
        {
            let kind = if op == Operator::Increment {
                UnaryKind::PostIncrement
            } else {
                UnaryKind::PostDecrement
            };
            statement = build_unary(kind, statement, self.line_number)?;
        }
        Ok(statement)
    }
}

// ── Typing ──

fn accepts(argument: &StatementToken, target: DataType) -> bool {
    argument.data_type.can_implicitly_convert_to(target)
        || argument
            .as_constant()
            .is_some_and(|value| argument.data_type.constant_fits(value, target))
}

/// Widening conversion, or a constant retyped when its value fits.
pub fn implicit_convert(
    statement: StatementToken,
    target: DataType,
    line_number: u32,
) -> Result<StatementToken, CompileError> {
    let from = statement.data_type;
    if from == target {
        return Ok(statement);
    }
    if let Some(value) = statement.as_constant() {
        if target != DataType::Void && from.constant_fits(value, target) {
            return Ok(StatementToken::constant(cast_value(value, from, target), target));
        }
    }
    if from.can_implicitly_convert_to(target) {
        return Ok(cast(statement, target));
    }
    Err(CompileError::type_error(
        format!("Cannot implicitly convert from '{from}' to '{target}'"),
        line_number,
    ))
}

pub fn explicit_cast(statement: StatementToken, target: DataType, line_number: u32) -> Result<StatementToken, CompileError> {
    let from = statement.data_type;
    if from == DataType::Void || target == DataType::Void {
        return Err(CompileError::type_error(
            format!("Cannot cast from '{from}' to '{target}'"),
            line_number,
        ));
    }
    if from == target {
        return Ok(statement);
    }
    if let Some(value) = statement.as_constant() {
        return Ok(StatementToken::constant(cast_value(value, from, target), target));
    }
    Ok(cast(statement, target))
}

/// Any number is a valid condition; it becomes a bool.
pub fn to_condition(statement: StatementToken, line_number: u32) -> Result<StatementToken, CompileError> {
    if !statement.data_type.is_numeric() {
        return Err(CompileError::type_error(
            format!("Cannot use '{}' as a condition", statement.data_type),
            line_number,
        ));
    }
    explicit_cast(statement, DataType::Bool, line_number)
}

fn cast(statement: StatementToken, target: DataType) -> StatementToken {
    StatementToken {
        kind: StatementKind::Cast {
            operand: Box::new(statement),
        },
        data_type: target,
    }
}

fn require_numeric(statement: StatementToken, op: &str, line_number: u32) -> Result<StatementToken, CompileError> {
    if statement.data_type.is_numeric() {
        Ok(statement)
    } else {
        Err(CompileError::type_error(
            format!("Operator '{op}' cannot be applied to '{}'", statement.data_type),
            line_number,
        ))
    }
}

fn memory_access(address: StatementToken, data_type: DataType, line_number: u32) -> Result<StatementToken, CompileError> {
    if data_type == DataType::Void {
        return Err(CompileError::type_error("Memory access cannot be void", line_number));
    }
    if !address.data_type.is_integer() {
        return Err(CompileError::type_error(
            format!("Memory address must be an integer, not '{}'", address.data_type),
            line_number,
        ));
    }
    Ok(StatementToken {
        kind: StatementKind::MemoryAccess {
            address: Box::new(address),
        },
        data_type,
    })
}

/// Bring both operands to a common type. A constant operand first adopts the
/// other operand's type when its value fits.
fn unify(
    left: StatementToken,
    right: StatementToken,
    op: &str,
    line_number: u32,
) -> Result<(StatementToken, StatementToken, DataType), CompileError> {
    let adopt = |constant: StatementToken, other: &StatementToken| match constant.as_constant() {
        Some(value) if other.as_constant().is_none() && constant.data_type.constant_fits(value, other.data_type) => {
            StatementToken::constant(cast_value(value, constant.data_type, other.data_type), other.data_type)
        }
        _ => constant,
    };
    let left = adopt(left, &right);
    let right = adopt(right, &left);

    let common = DataType::common_type(left.data_type, right.data_type).ok_or_else(|| {
        CompileError::type_error(
            format!(
                "Operator '{op}' cannot be applied to '{}' and '{}'",
                left.data_type, right.data_type
            ),
            line_number,
        )
    })?;
    let left = implicit_convert(left, common, line_number)?;
    let right = implicit_convert(right, common, line_number)?;
    Ok((left, right, common))
}

fn needs_integers(operation: BinaryOperation) -> bool {
    matches!(
        operation,
        BinaryOperation::Modulo
            | BinaryOperation::ShiftLeft
            | BinaryOperation::ShiftRight
            | BinaryOperation::BitAnd
            | BinaryOperation::BitOr
            | BinaryOperation::BitXor
    )
}

fn build_binary(
    op: Operator,
    left: StatementToken,
    right: StatementToken,
    line_number: u32,
) -> Result<StatementToken, CompileError> {
    if op.is_assignment() {
        return build_assignment(op, left, right, line_number);
    }
    let Some(operation) = op.binary_operation() else {
        return Err(CompileError::structural(format!("Unexpected operator '{op}'"), line_number));
    };

    if matches!(operation, BinaryOperation::LogicalAnd | BinaryOperation::LogicalOr) {
        let left = to_condition(left, line_number)?;
        let right = to_condition(right, line_number)?;
        return Ok(binary(op, left, right, DataType::Bool));
    }

    let (left, right, common) = unify(left, right, op.symbol(), line_number)?;
    if needs_integers(operation) && !common.is_integral() {
        return Err(CompileError::type_error(
            format!("Operator '{op}' needs integer operands, not '{common}'"),
            line_number,
        ));
    }
    let data_type = if operation.is_comparison() { DataType::Bool } else { common };
    Ok(binary(op, left, right, data_type))
}

fn build_assignment(
    op: Operator,
    target: StatementToken,
    value: StatementToken,
    line_number: u32,
) -> Result<StatementToken, CompileError> {
    if !target.is_lvalue() {
        return Err(CompileError::type_error(
            format!("Left side of '{op}' must be a variable or memory access"),
            line_number,
        ));
    }
    let data_type = target.data_type;
    if let Some(operation) = op.compound_operation() {
        if needs_integers(operation) && !data_type.is_integral() {
            return Err(CompileError::type_error(
                format!("Operator '{op}' needs an integer target, not '{data_type}'"),
                line_number,
            ));
        }
    }
    let value = implicit_convert(value, data_type, line_number)?;
    Ok(binary(op, target, value, data_type))
}

fn binary(op: Operator, left: StatementToken, right: StatementToken, data_type: DataType) -> StatementToken {
    StatementToken {
        kind: StatementKind::Binary {
            op,
            left: Box::new(left),
            right: Box::new(right),
        },
        data_type,
    }
}

fn build_conditional(
    condition: StatementToken,
    if_true: StatementToken,
    if_false: StatementToken,
    line_number: u32,
) -> Result<StatementToken, CompileError> {
    let condition = to_condition(condition, line_number)?;
    let (if_true, if_false, data_type) = unify(if_true, if_false, "?:", line_number)?;
    Ok(StatementToken {
        kind: StatementKind::Conditional {
            condition: Box::new(condition),
            if_true: Box::new(if_true),
            if_false: Box::new(if_false),
        },
        data_type,
    })
}

#[allow(clippy::cast_sign_loss)]
fn build_unary(kind: UnaryKind, operand: StatementToken, line_number: u32) -> Result<StatementToken, CompileError> {
    let data_type = operand.data_type;
    let unary = |operand: StatementToken, data_type: DataType| StatementToken {
        kind: StatementKind::Unary {
            op: kind,
            operand: Box::new(operand),
        },
        data_type,
    };

    match kind {
        UnaryKind::Negate => {
            if !data_type.is_numeric() || data_type == DataType::Bool {
                return Err(CompileError::type_error(format!("Cannot negate '{data_type}'"), line_number));
            }
            let Some(value) = operand.as_constant() else {
                return Ok(unary(operand, data_type));
            };
            if data_type.is_float() {
                return Ok(StatementToken::constant((-f64::from_bits(value)).to_bits(), data_type));
            }
            let negated = -data_type.integer_value(value);
            let folded = if let Ok(v) = i32::try_from(negated) {
                StatementToken::constant(i64::from(v) as u64, DataType::S32)
            } else if let Ok(v) = i64::try_from(negated) {
                StatementToken::constant(v as u64, DataType::S64)
            } else {
                return Err(CompileError::type_error("Negated constant is out of range", line_number));
            };
            Ok(folded)
        }
        UnaryKind::Not => {
            let operand = to_condition(operand, line_number)?;
            match operand.as_constant() {
                Some(value) => Ok(StatementToken::constant(u64::from(value == 0), DataType::Bool)),
                None => Ok(unary(operand, DataType::Bool)),
            }
        }
        UnaryKind::BitNot => {
            if !data_type.is_integer() {
                return Err(CompileError::type_error(
                    format!("Operator '~' needs an integer operand, not '{data_type}'"),
                    line_number,
                ));
            }
            match operand.as_constant() {
                Some(value) => Ok(StatementToken::constant(!value, data_type)),
                None => Ok(unary(operand, data_type)),
            }
        }
        UnaryKind::PreIncrement | UnaryKind::PreDecrement | UnaryKind::PostIncrement | UnaryKind::PostDecrement => {
            if !operand.is_lvalue() || !data_type.is_numeric() || data_type == DataType::Bool {
                return Err(CompileError::type_error(
                    "Increment and decrement need a numeric variable or memory access",
                    line_number,
                ));
            }
            Ok(unary(operand, data_type))
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::panic)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::compiler::error::ErrorKind;
    use crate::compiler::node::NodeKind;
    use crate::compiler::node_builder::build_nodes;
    use crate::program::bindings::NativeBindings;
    use crate::program::function::{GlobalId, LocalId, Parameter, ScriptFunction};
    use crate::program::module::{Define, GlobalVariable, Module};

    fn tokens(module: &mut Module, line: &str) -> TokenList {
        let root = build_nodes(&[line.to_string()], module).unwrap();
        let NodeKind::Block(mut children) = root.kind else {
            panic!("expected root block");
        };
        match children.pop().map(|n| n.kind) {
            Some(NodeKind::Undefined(tokens)) => tokens,
            other => panic!("expected undefined node, got {other:?}"),
        }
    }

    fn process(module: &mut Module, natives: &NativeBindings, scope: &mut ScopeContext, line: &str) -> Result<StatementToken, CompileError> {
        let list = tokens(module, line);
        process_tokens(list, 0, None, GlobalsLookup::new(module, natives), scope)
    }

    fn constant_of(statement: &StatementToken) -> (u64, DataType) {
        (statement.as_constant().unwrap(), statement.data_type)
    }

    fn binary_parts(statement: &StatementToken) -> (Operator, &StatementToken, &StatementToken) {
        match &statement.kind {
            StatementKind::Binary { op, left, right } => (*op, left, right),
            other => panic!("expected binary, got {other:?}"),
        }
    }

    #[test]
    fn multiplication_binds_tighter_than_addition() {
        let mut module = Module::new();
        let natives = NativeBindings::new();
        let mut scope = ScopeContext::new(Vec::new());

        let st = process(&mut module, &natives, &mut scope, "1 + 2 * 3").unwrap();
        let (op, left, right) = binary_parts(&st);
        assert_eq!(op, Operator::Plus);
        assert_eq!(constant_of(left), (1, DataType::S32));
        assert_eq!(binary_parts(right).0, Operator::Multiply);

        let st = process(&mut module, &natives, &mut scope, "(1 + 2) * 3").unwrap();
        let (op, left, _) = binary_parts(&st);
        assert_eq!(op, Operator::Multiply);
        assert_eq!(binary_parts(left).0, Operator::Plus);
    }

    #[test]
    fn subtraction_is_left_associative_and_assignment_right() {
        let mut module = Module::new();
        let natives = NativeBindings::new();
        let mut scope = ScopeContext::new(Vec::new());

        let st = process(&mut module, &natives, &mut scope, "10 - 4 - 3").unwrap();
        let (_, left, right) = binary_parts(&st);
        assert_eq!(binary_parts(left).0, Operator::Minus);
        assert_eq!(constant_of(right), (3, DataType::S32));

        let st = process(&mut module, &natives, &mut scope, "u8 a = u8 b = 7").unwrap();
        let (op, left, right) = binary_parts(&st);
        assert_eq!(op, Operator::Assign);
        assert_eq!(left.kind, StatementKind::Variable(VariableRef::Local(LocalId(0))));
        assert_eq!(binary_parts(right).0, Operator::Assign);
        assert_eq!(st.data_type, DataType::U8);
    }

    #[test]
    fn constants_adapt_to_the_other_operand() {
        let mut module = Module::new();
        let natives = NativeBindings::new();
        let mut scope = ScopeContext::new(Vec::new());
        scope.declare("x", DataType::U8, 0).unwrap();

        let st = process(&mut module, &natives, &mut scope, "x + 1").unwrap();
        assert_eq!(st.data_type, DataType::U8);
        let st = process(&mut module, &natives, &mut scope, "x + 1000").unwrap();
        assert_eq!(st.data_type, DataType::S32);
        let st = process(&mut module, &natives, &mut scope, "x < 3").unwrap();
        assert_eq!(st.data_type, DataType::Bool);
        assert!(process(&mut module, &natives, &mut scope, "x = 300").is_err());
    }

    #[test]
    fn identifiers_resolve_innermost_first() {
        let mut module = Module::new();
        module
            .add_global_variable(GlobalVariable {
                name: "value".into(),
                data_type: DataType::U16,
                initial_value: 0,
            })
            .unwrap();
        let natives = NativeBindings::new();
        let mut scope = ScopeContext::new(Vec::new());

        let st = process(&mut module, &natives, &mut scope, "value").unwrap();
        assert_eq!(st.kind, StatementKind::Variable(VariableRef::Global(GlobalId(0))));

        let mut inner = scope.begin_scope();
        process(&mut module, &natives, &mut inner, "u64 value = 1").unwrap();
        let st = process(&mut module, &natives, &mut inner, "value").unwrap();
        assert_eq!(st.data_type, DataType::U64);
        assert!(matches!(st.kind, StatementKind::Variable(VariableRef::Local(_))));

        let err = process(&mut module, &natives, &mut inner, "missing + 1").unwrap_err();
        assert_eq!(err.kind, ErrorKind::Resolution);
    }

    #[test]
    fn native_variables_and_zero_argument_functions() {
        let mut module = Module::new();
        let mut natives = NativeBindings::new();
        struct Fixed;
        impl crate::program::bindings::VariableAccessor for Fixed {
            fn get(&self) -> u64 {
                4
            }
            fn set(&self, _: u64) {}
        }
        natives.register_variable("D0.u8", DataType::U8, Arc::new(Fixed)).unwrap();
        natives
            .register_function("System.rand", Vec::new(), DataType::U32, Arc::new(|_| 4))
            .unwrap();
        let mut scope = ScopeContext::new(Vec::new());

        let st = process(&mut module, &natives, &mut scope, "D0.u8 + System.rand").unwrap();
        let (_, left, right) = binary_parts(&st);
        assert!(matches!(&left.kind, StatementKind::Cast { operand } if matches!(operand.kind, StatementKind::Variable(VariableRef::External(_)))));
        assert!(matches!(right.kind, StatementKind::FunctionCall { .. }));
        assert_eq!(st.data_type, DataType::U32);
    }

    #[test]
    fn overloads_prefer_exact_then_registration_order() {
        let mut module = Module::new();
        let wide = module
            .add_script_function(ScriptFunction::new("f", DataType::U32, vec![Parameter::new(DataType::U32, "v")]))
            .unwrap();
        let narrow = module
            .add_script_function(ScriptFunction::new("f", DataType::U8, vec![Parameter::new(DataType::U8, "v")]))
            .unwrap();
        let natives = NativeBindings::new();
        let mut scope = ScopeContext::new(Vec::new());
        scope.declare("b", DataType::U8, 0).unwrap();
        scope.declare("h", DataType::U16, 0).unwrap();

        let call_target = |st: &StatementToken| match &st.kind {
            StatementKind::FunctionCall { function, .. } => *function,
            other => panic!("expected call, got {other:?}"),
        };

        let st = process(&mut module, &natives, &mut scope, "f(b)").unwrap();
        assert_eq!(call_target(&st), FunctionRef::Script(narrow));
        let st = process(&mut module, &natives, &mut scope, "f(h)").unwrap();
        assert_eq!(call_target(&st), FunctionRef::Script(wide));
        // A constant fits both; the first registered wins.
        let st = process(&mut module, &natives, &mut scope, "f(7)").unwrap();
        assert_eq!(call_target(&st), FunctionRef::Script(wide));

        let err = process(&mut module, &natives, &mut scope, "f(1.5)").unwrap_err();
        assert_eq!(err.kind, ErrorKind::Type);
        let err = process(&mut module, &natives, &mut scope, "g(1)").unwrap_err();
        assert_eq!(err.kind, ErrorKind::Resolution);
    }

    #[test]
    fn exact_match_in_script_and_native_is_ambiguous() {
        let mut module = Module::new();
        module
            .add_script_function(ScriptFunction::new("put", DataType::Void, vec![Parameter::new(DataType::U8, "v")]))
            .unwrap();
        let mut natives = NativeBindings::new();
        natives
            .register_function("put", vec![Parameter::new(DataType::U8, "v")], DataType::Void, Arc::new(|_| 0))
            .unwrap();
        let mut scope = ScopeContext::new(Vec::new());
        scope.declare("b", DataType::U8, 0).unwrap();
        let err = process(&mut module, &natives, &mut scope, "put(b)").unwrap_err();
        assert!(err.message.contains("Ambiguous"));
    }

    #[test]
    fn memory_accesses_and_casts() {
        let mut module = Module::new();
        let natives = NativeBindings::new();
        let mut scope = ScopeContext::new(Vec::new());

        let st = process(&mut module, &natives, &mut scope, "[0xffff0000]").unwrap();
        assert_eq!(st.data_type, DataType::U32);
        assert!(st.is_lvalue());
        let st = process(&mut module, &natives, &mut scope, "u8[0x1000 + 4] = 5").unwrap();
        assert_eq!(st.data_type, DataType::U8);

        let st = process(&mut module, &natives, &mut scope, "u8(0x1234)").unwrap();
        assert_eq!(constant_of(&st), (0x34, DataType::U8));
        let st = process(&mut module, &natives, &mut scope, "(s8) 255").unwrap();
        assert_eq!(DataType::S8.integer_value(st.as_constant().unwrap()), -1);
        assert!(process(&mut module, &natives, &mut scope, "[1.5]").is_err());
    }

    #[test]
    fn defines_expand_and_cycles_fail() {
        let mut module = Module::new();
        let body = tokens(&mut module, "1 + 2");
        module
            .add_define(Define {
                name: "THREE".into(),
                data_type: None,
                content: body,
            })
            .unwrap();
        for (name, value) in [("BYTE", "0x2c"), ("WIDE", "300")] {
            let content = tokens(&mut module, value);
            module
                .add_define(Define {
                    name: name.into(),
                    data_type: Some(DataType::U8),
                    content,
                })
                .unwrap();
        }
        for (name, other) in [("A", "B"), ("B", "A")] {
            let content = tokens(&mut module, &format!("{other} + 1"));
            module
                .add_define(Define {
                    name: name.into(),
                    data_type: None,
                    content,
                })
                .unwrap();
        }
        let natives = NativeBindings::new();
        let mut scope = ScopeContext::new(Vec::new());

        let st = process(&mut module, &natives, &mut scope, "THREE * 2").unwrap();
        // Verbatim substitution: 1 + 2 * 2.
        assert_eq!(binary_parts(&st).0, Operator::Plus);
        let st = process(&mut module, &natives, &mut scope, "BYTE").unwrap();
        assert_eq!(constant_of(&st), (44, DataType::U8));
        let err = process(&mut module, &natives, &mut scope, "WIDE + 1").unwrap_err();
        assert_eq!(err.kind, ErrorKind::Type);

        let err = process(&mut module, &natives, &mut scope, "A").unwrap_err();
        assert_eq!(err.kind, ErrorKind::Resolution);
    }

    #[test]
    fn structural_errors() {
        let mut module = Module::new();
        let natives = NativeBindings::new();
        let mut scope = ScopeContext::new(Vec::new());
        for line in ["(1 + 2", "1 + 2)", "1 2", "(1, 2)", "3 = 4", "u8 x u8 y", "x ? 1"] {
            assert!(process(&mut module, &natives, &mut scope, line).is_err(), "`{line}` should fail");
        }
        // Declaring the same name twice in one scope.
        process(&mut module, &natives, &mut scope, "s32 once").unwrap();
        assert!(process(&mut module, &natives, &mut scope, "s32 once").is_err());
    }

    #[test]
    fn integer_operators_reject_floats() {
        let mut module = Module::new();
        let natives = NativeBindings::new();
        let mut scope = ScopeContext::new(Vec::new());
        scope.declare("d", DataType::Double, 0).unwrap();
        scope.declare("n", DataType::U32, 0).unwrap();

        for line in ["d & n", "d % 2", "n << d", "~d", "d |= 1", "d >>= n"] {
            let err = process(&mut module, &natives, &mut scope, line).unwrap_err();
            assert_eq!(err.kind, ErrorKind::Type, "`{line}`");
        }
        assert!(process(&mut module, &natives, &mut scope, "n % 3 & ~n << 1").is_ok());
    }

    #[test]
    fn calls_need_a_matching_argument_count() {
        let mut module = Module::new();
        module
            .add_script_function(ScriptFunction::new(
                "pair",
                DataType::U8,
                vec![Parameter::new(DataType::U8, "a"), Parameter::new(DataType::U8, "b")],
            ))
            .unwrap();
        let natives = NativeBindings::new();
        let mut scope = ScopeContext::new(Vec::new());

        assert!(process(&mut module, &natives, &mut scope, "pair(1, 2)").is_ok());
        for line in ["pair(1)", "pair(1, 2, 3)", "pair()"] {
            let err = process(&mut module, &natives, &mut scope, line).unwrap_err();
            assert_eq!(err.kind, ErrorKind::Type, "`{line}`");
        }
    }

    #[test]
    fn conditional_and_logical_types() {
        let mut module = Module::new();
        let natives = NativeBindings::new();
        let mut scope = ScopeContext::new(Vec::new());
        scope.declare("x", DataType::U16, 0).unwrap();

        let st = process(&mut module, &natives, &mut scope, "x > 2 ? x : 1").unwrap();
        assert!(matches!(st.kind, StatementKind::Conditional { .. }));
        assert_eq!(st.data_type, DataType::U16);
        let st = process(&mut module, &natives, &mut scope, "x && !x || 0").unwrap();
        assert_eq!(st.data_type, DataType::Bool);
        let st = process(&mut module, &natives, &mut scope, "-5").unwrap();
        assert_eq!(DataType::S32.integer_value(st.as_constant().unwrap()), -5);
    }
}
