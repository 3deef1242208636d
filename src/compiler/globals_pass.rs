//! First pass over the top level: registers functions, globals and defines
//! in the module before any function body is compiled.

use super::error::CompileError;
use super::line_numbers::LineNumberTable;
use super::node::{Node, NodeKind};
use super::token::{Keyword, Operator, Token};
use crate::program::datatype::{cast_value, DataType};
use crate::program::function::{Parameter, ScriptFunction};
use crate::program::module::{Define, GlobalVariable, Module};

/// Scan the root block's direct children. Function headers are merged with
/// their body block into one function node; globals and defines are
/// registered and removed. Anything else stays for later.
pub fn process_global_definitions(
    root: &mut Vec<Node>,
    module: &mut Module,
    line_numbers: &LineNumberTable,
) -> Result<(), CompileError> {
    let nodes = std::mem::take(root);
    let mut out = Vec::with_capacity(nodes.len());
    let mut pending_pragmas: Vec<String> = Vec::new();
    let mut iter = nodes.into_iter();

    while let Some(node) = iter.next() {
        let line = node.line_number;
        let tokens = match node.kind {
            NodeKind::Pragma(payload) => {
                pending_pragmas.push(payload);
                continue;
            }
            NodeKind::Undefined(tokens) => tokens,
            other => {
                pending_pragmas.clear();
                out.push(Node::new(other, line));
                continue;
            }
        };

        let keyword = match tokens.first() {
            Some(Token::Keyword(k)) => Some(*k),
            _ => None,
        };
        match keyword {
            Some(Keyword::Function) => {
                let mut function = parse_function_header(&tokens, line)?;
                let body = match iter.next() {
                    Some(Node {
                        kind: NodeKind::Block(children),
                        ..
                    }) => children,
                    _ => {
                        return Err(CompileError::structural(
                            format!("Function '{}' must be followed by a block", function.name),
                            line,
                        ));
                    }
                };

                let (original_line, filename) = line_numbers.translate_line_number(line);
                function.source_filename = filename.to_string();
                function.source_base_line_offset = (line + 1).saturating_sub(original_line);
                function.pragmas = std::mem::take(&mut pending_pragmas);
                for parameter in function.parameters.clone() {
                    function.add_local_variable(parameter.identifier, parameter.data_type, line);
                }

                let id = module
                    .add_script_function(function)
                    .map_err(|e| CompileError::resolution(e.to_string(), line))?;
                out.push(Node::new(NodeKind::Function { function: id, body }, line));
            }
            Some(Keyword::Global) => {
                pending_pragmas.clear();
                let global = parse_global(&tokens, line)?;
                module
                    .add_global_variable(global)
                    .map_err(|e| CompileError::resolution(e.to_string(), line))?;
            }
            Some(Keyword::Define) => {
                pending_pragmas.clear();
                let define = parse_define(tokens, line)?;
                module
                    .add_define(define)
                    .map_err(|e| CompileError::resolution(e.to_string(), line))?;
            }
            _ => {
                pending_pragmas.clear();
                out.push(Node::new(NodeKind::Undefined(tokens), line));
            }
        }
    }

    *root = out;
    Ok(())
}

/// `function <type> <name> ( [<type> <ident> {, <type> <ident>}] )`
fn parse_function_header(tokens: &[Token], line: u32) -> Result<ScriptFunction, CompileError> {
    let mut iter = tokens.iter().skip(1).peekable();
    let Some(Token::VarType(return_type)) = iter.next() else {
        return Err(CompileError::structural("Expected return type after 'function'", line));
    };
    let Some(Token::Identifier(name)) = iter.next() else {
        return Err(CompileError::structural("Expected function name", line));
    };
    if !iter.next().is_some_and(|t| t.is_operator(Operator::ParenthesisLeft)) {
        return Err(CompileError::structural(format!("Expected '(' after function name '{name}'"), line));
    }

    let mut parameters: Vec<Parameter> = Vec::new();
    if iter.next_if(|t| t.is_operator(Operator::ParenthesisRight)).is_none() {
        loop {
            let Some(Token::VarType(data_type)) = iter.next() else {
                return Err(CompileError::structural(
                    format!("Expected parameter type in header of '{name}'"),
                    line,
                ));
            };
            if *data_type == DataType::Void {
                return Err(CompileError::type_error("Parameters cannot be void", line));
            }
            let Some(Token::Identifier(identifier)) = iter.next() else {
                return Err(CompileError::structural(
                    format!("Expected parameter name in header of '{name}'"),
                    line,
                ));
            };
            if parameters.iter().any(|p| p.identifier == *identifier) {
                return Err(CompileError::resolution(
                    format!("Duplicate parameter name '{identifier}' in '{name}'"),
                    line,
                ));
            }
            parameters.push(Parameter::new(*data_type, identifier.clone()));

            match iter.next() {
                Some(t) if t.is_operator(Operator::Comma) => {}
                Some(t) if t.is_operator(Operator::ParenthesisRight) => break,
                _ => {
                    return Err(CompileError::structural(
                        format!("Expected ',' or ')' in header of '{name}'"),
                        line,
                    ));
                }
            }
        }
    }
    if iter.next().is_some() {
        return Err(CompileError::structural(
            format!("Unexpected tokens after header of '{name}'"),
            line,
        ));
    }
    Ok(ScriptFunction::new(name.clone(), *return_type, parameters))
}

/// `global <type> <ident> [= [-]<constant>]`
#[allow(clippy::cast_sign_loss)]
fn parse_global(tokens: &[Token], line: u32) -> Result<GlobalVariable, CompileError> {
    let (data_type, name, initializer) = match tokens {
        [_, Token::VarType(t), Token::Identifier(name), rest @ ..] => (*t, name.clone(), rest),
        _ => return Err(CompileError::structural("Expected 'global <type> <name>'", line)),
    };
    if data_type == DataType::Void {
        return Err(CompileError::type_error(format!("Global '{name}' cannot be void"), line));
    }

    let (negative, constant) = match initializer {
        [] => {
            return Ok(GlobalVariable {
                name,
                data_type,
                initial_value: 0,
            });
        }
        [Token::Operator(Operator::Assign), Token::Constant(c)] => (false, *c),
        [Token::Operator(Operator::Assign), Token::Operator(Operator::Minus), Token::Constant(c)] => (true, *c),
        _ => {
            return Err(CompileError::structural(
                format!("Global '{name}' can only be initialized with a constant"),
                line,
            ));
        }
    };

    let (mut value, mut from) = (constant.value, constant.data_type);
    if negative {
        if from.is_float() {
            value = (-f64::from_bits(value)).to_bits();
        } else {
            let negated = i64::try_from(-from.integer_value(value))
                .map_err(|_| CompileError::type_error("Negated constant is out of range", line))?;
            value = negated as u64;
            from = DataType::S64;
        }
    }
    if !from.constant_fits(value, data_type) {
        return Err(CompileError::type_error(
            format!("Initial value of global '{name}' does not fit type '{data_type}'"),
            line,
        ));
    }
    Ok(GlobalVariable {
        name,
        data_type,
        initial_value: cast_value(value, from, data_type),
    })
}

/// `define [<type>] <ident> = <tokens...>`
fn parse_define(tokens: Vec<Token>, line: u32) -> Result<Define, CompileError> {
    let mut iter = tokens.into_iter().skip(1).peekable();
    let data_type = match iter.next_if(|t| matches!(t, Token::VarType(_))) {
        Some(Token::VarType(t)) => Some(t),
        _ => None,
    };
    let Some(Token::Identifier(name)) = iter.next() else {
        return Err(CompileError::structural("Expected define name", line));
    };
    if !iter.next().is_some_and(|t| t.is_operator(Operator::Assign)) {
        return Err(CompileError::structural(format!("Expected '=' after define '{name}'"), line));
    }
    let content: Vec<Token> = iter.collect();
    if content.is_empty() {
        return Err(CompileError::structural(format!("Define '{name}' has no content"), line));
    }
    if let (Some(data_type), [Token::Constant(c)]) = (data_type, content.as_slice()) {
        if !c.data_type.constant_fits(c.value, data_type) {
            return Err(CompileError::type_error(
                format!("Value of define '{name}' does not fit type '{data_type}'"),
                line,
            ));
        }
    }
    Ok(Define {
        name,
        data_type,
        content,
    })
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::panic)]
mod tests {
    use super::*;
    use crate::compiler::error::ErrorKind;
    use crate::compiler::node_builder::build_nodes;

    fn run(src: &str) -> Result<(Vec<Node>, Module), CompileError> {
        let lines: Vec<String> = src.lines().map(str::to_string).collect();
        let mut module = Module::new();
        let root = build_nodes(&lines, &mut module)?;
        let NodeKind::Block(mut children) = root.kind else {
            panic!("expected root block");
        };
        let mut table = LineNumberTable::new();
        table.push(0, "test.lemon", 0);
        process_global_definitions(&mut children, &mut module, &table)?;
        Ok((children, module))
    }

    #[test]
    fn function_header_and_body_merge() {
        let src = "//# inline\nfunction s32 Add(s32 a, int b)\n{\n\treturn a + b\n}";
        let (nodes, module) = run(src).unwrap();
        assert_eq!(nodes.len(), 1);
        let NodeKind::Function { function, body } = &nodes[0].kind else {
            panic!("expected function node");
        };
        assert_eq!(body.len(), 1);

        let add = module.function(*function).unwrap();
        assert_eq!(add.name, "Add");
        assert_eq!(add.return_type, DataType::S32);
        assert_eq!(add.parameters.len(), 2);
        assert_eq!(add.locals.len(), 2);
        assert_eq!(add.locals[1].name, "b");
        assert_eq!(add.pragmas, vec!["inline".to_string()]);
        assert_eq!(add.source_filename, "test.lemon");
    }

    #[test]
    fn header_errors() {
        for src in [
            "function void f(u8 a,)\n{\n}",
            "function void f(u8 a, u8 a)\n{\n}",
            "function void f(void a)\n{\n}",
            "function f()\n{\n}",
            "function void f()",
            "function void f()\nx = 1",
        ] {
            assert!(run(src).is_err(), "`{src}` should fail");
        }
    }

    #[test]
    fn overloads_and_duplicates() {
        let ok = "function void f(u8 a)\n{\n}\nfunction void f(u16 a)\n{\n}";
        let (_, module) = run(ok).unwrap();
        assert_eq!(module.function_overloads("f").len(), 2);

        let dup = "function void f(u8 a)\n{\n}\nfunction u8 f(u8 b)\n{\n}";
        assert_eq!(run(dup).unwrap_err().kind, ErrorKind::Resolution);
    }

    #[test]
    fn globals_and_defines() {
        let src = "global u8 small = 200\nglobal s16 neg = -5\nglobal u32 plain\ndefine u8 LIMIT = 250\ndefine STEP = 2 * 4";
        let (nodes, module) = run(src).unwrap();
        assert!(nodes.is_empty());
        assert_eq!(module.global_by_name("small").unwrap().1.initial_value, 200);
        let neg = module.global_by_name("neg").unwrap().1;
        assert_eq!(DataType::S16.integer_value(neg.initial_value), -5);
        assert_eq!(module.global_by_name("plain").unwrap().1.initial_value, 0);
        assert_eq!(module.define("LIMIT").unwrap().data_type, Some(DataType::U8));
        assert_eq!(module.define("STEP").unwrap().content.len(), 3);
    }

    #[test]
    fn global_errors() {
        assert_eq!(run("global u8 g = 256").unwrap_err().kind, ErrorKind::Type);
        assert_eq!(run("global u8 g = -1").unwrap_err().kind, ErrorKind::Type);
        assert_eq!(run("global u8 g\nglobal u16 g").unwrap_err().kind, ErrorKind::Resolution);
        assert_eq!(run("define X = 1\ndefine X = 2").unwrap_err().kind, ErrorKind::Resolution);
        assert_eq!(run("define u8 LIMIT = 300").unwrap_err().kind, ErrorKind::Type);
        assert!(run("global u8 g = 1 + 1").is_err());
    }

    #[test]
    fn stray_statements_stay_for_later() {
        let (nodes, _) = run("x = 1\nfunction void f()\n{\n}").unwrap();
        assert_eq!(nodes.len(), 2);
        assert!(matches!(nodes[0].kind, NodeKind::Undefined(_)));
    }
}
