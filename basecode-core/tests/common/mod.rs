#![allow(dead_code)]

//! AST construction helpers shared by the integration tests; programs are
//! built the way the parser would deliver them.

use basecode_ast::{AstBuilder, AstNode, Operator, Span};

pub fn s() -> Span {
    basecode_ast::span(0, 0)
}

pub fn sym(b: &mut AstBuilder, name: &str) -> AstNode {
    b.symbol_node(&[name], s())
}

pub fn tyid(b: &mut AstBuilder, name: &str) -> AstNode {
    let symbol = sym(b, name);
    b.type_identifier_node(symbol, s())
}

pub fn ptr_tyid(b: &mut AstBuilder, name: &str) -> AstNode {
    let base = tyid(b, name);
    b.pointer_type_node(base, s())
}

pub fn int(b: &mut AstBuilder, value: u64) -> AstNode {
    b.integer_literal_node(value, s())
}

pub fn module(b: &mut AstBuilder, statements: Vec<AstNode>) -> AstNode {
    let mut m = b.module_node(s());
    m.children = statements;
    m
}

pub fn block(b: &mut AstBuilder, statements: Vec<AstNode>) -> AstNode {
    let mut blk = b.block_node(s());
    blk.children = statements;
    blk
}

/// `name [: ty] [:= | :: init]`
pub fn decl(
    b: &mut AstBuilder,
    name: &str,
    ty: Option<&str>,
    init: Option<AstNode>,
    constant: bool,
) -> AstNode {
    let symbol = sym(b, name);
    let type_id = ty.map(|t| tyid(b, t));
    b.declaration_node(symbol, type_id, init, constant, s())
}

pub fn assign(b: &mut AstBuilder, name: &str, value: AstNode) -> AstNode {
    let target = sym(b, name);
    b.assignment_node(target, value, s())
}

pub fn binop(b: &mut AstBuilder, lhs: AstNode, op: Operator, rhs: AstNode) -> AstNode {
    b.binary_operator_node(lhs, op, rhs)
}

pub fn member(b: &mut AstBuilder, base: &str, field: &str) -> AstNode {
    let base = sym(b, base);
    let field = sym(b, field);
    b.binary_operator_node(base, Operator::MemberAccess, field)
}

pub fn call(b: &mut AstBuilder, name: &str, args: Vec<AstNode>) -> AstNode {
    let callee = sym(b, name);
    let list = b.argument_list_node(args, s());
    b.proc_call_node(callee, list, s())
}

/// `name :: proc(params): ret { body }`
pub fn proc_decl(
    b: &mut AstBuilder,
    name: &str,
    params: Vec<(&str, &str)>,
    ret: Option<&str>,
    body: Vec<AstNode>,
) -> AstNode {
    let params: Vec<AstNode> = params
        .into_iter()
        .map(|(p, t)| decl(b, p, Some(t), None, false))
        .collect();
    let params = b.parameter_list_node(params, s());
    let returns = ret.map(|t| {
        let ty = tyid(b, t);
        b.return_parameter_list_node(vec![ty], s())
    });
    let body = block(b, body);
    let proc = b.proc_expression_node(params, returns, Some(body), s());
    decl(b, name, None, Some(proc), true)
}

/// `struct_name :: struct { fields }`
pub fn struct_decl(b: &mut AstBuilder, name: &str, fields: Vec<(&str, &str)>) -> AstNode {
    let fields: Vec<AstNode> = fields
        .into_iter()
        .map(|(f, t)| decl(b, f, Some(t), None, false))
        .collect();
    let list = b.parameter_list_node(fields, s());
    let body = b.struct_node(list, s());
    decl(b, name, None, Some(body), true)
}
