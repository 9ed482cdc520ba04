#![forbid(unsafe_code)]

//! Folds the AST into the element graph. One routine per node kind; each
//! recursively evaluates children in the correct scope and attaches
//! pending comments and attributes to the next produced element.

use basecode_ast::{AstKind, AstNode, Operator, Token};

use crate::builder::BuildContext;
use crate::element::{BinaryOp, ElementId, ElementPayload, IntrinsicKind, UnaryOp};
use crate::error::ErrorCode;
use crate::scope::{ScopeId, ScopeKind};
use crate::session::Session;
use crate::symbols::QualifiedSymbol;
use crate::types::{CompositeKind, FieldMap, TypeField, TypeId, TypeKind};

pub struct EvalContext {
    pub scope: ScopeId,
    pub module: Option<ElementId>,
    pub pending_comments: Vec<String>,
    pub pending_attributes: Vec<ElementId>,
    pub with_bases: Vec<ElementId>,
}

impl EvalContext {
    fn build(&self, node: &AstNode) -> BuildContext {
        BuildContext::new(self.module, Some(self.scope), node.span)
    }
}

/// Entry point: one program element anchoring a module per AST root.
pub fn evaluate_program(session: &mut Session, modules: &[AstNode]) -> Option<ElementId> {
    let span = modules
        .first()
        .map(|m| m.span)
        .unwrap_or_else(|| basecode_ast::span(0, 0));
    let program = session.elements.make_program(span);

    for module_node in modules {
        let mut ctx = EvalContext {
            scope: session.scopes.root(),
            module: None,
            pending_comments: Vec::new(),
            pending_attributes: Vec::new(),
            with_bases: Vec::new(),
        };
        if let Some(module) = evaluate_module(session, &mut ctx, module_node) {
            if let ElementPayload::Program { modules } =
                &mut session.elements.expect_mut(program).payload
            {
                modules.push(module);
            }
        }
    }

    // partial graphs from failed evaluations are discarded by the caller
    if !session.result.is_failed() {
        if let Err(orphans) = session.elements.validate_ownership(program) {
            panic!(
                "element ownership violated: {} orphan element(s), first id {}",
                orphans.len(),
                orphans[0].0
            );
        }
    }

    Some(program)
}

fn evaluate_module(
    session: &mut Session,
    ctx: &mut EvalContext,
    node: &AstNode,
) -> Option<ElementId> {
    let name = node
        .token
        .as_name()
        .map(str::to_string)
        .unwrap_or_else(|| session.options.default_module_name.clone());

    let scope = session
        .scopes
        .push_scope(Some(ctx.scope), ScopeKind::Module, None);
    let block = session
        .elements
        .make_block(BuildContext::new(None, Some(scope), node.span), scope);
    let module = session.elements.make_module(
        BuildContext::new(None, Some(ctx.scope), node.span),
        &name,
        block,
    );
    session.elements.expect_mut(block).module = Some(module);
    session.scopes.scope_mut(scope).element = Some(block);
    session.scopes.scope_mut(scope).module = Some(module);

    let mut inner = EvalContext {
        scope,
        module: Some(module),
        pending_comments: Vec::new(),
        pending_attributes: Vec::new(),
        with_bases: Vec::new(),
    };
    evaluate_block_children(session, &mut inner, block, &node.children);
    Some(module)
}

/// Shared statement loop for module bodies and nested blocks: comments
/// accumulate, labels attach to the next statement, everything else
/// becomes a statement element.
fn evaluate_block_children(
    session: &mut Session,
    ctx: &mut EvalContext,
    block: ElementId,
    children: &[AstNode],
) {
    let mut labels: Vec<String> = Vec::new();
    for child in children {
        if child.is_comment() {
            if let Token::Str(text) = &child.token {
                ctx.pending_comments.push(text.clone());
            }
            continue;
        }
        if child.kind == AstKind::Label {
            if let Some(name) = child.token.as_name() {
                labels.push(name.to_string());
                session
                    .scopes
                    .scope_mut(ctx.scope)
                    .labels
                    .insert(name.to_string());
            }
            continue;
        }

        let inner = if child.kind == AstKind::Statement {
            child.lhs.as_deref()
        } else {
            Some(child)
        };
        let expression = inner.and_then(|n| evaluate_node(session, ctx, n));
        let statement =
            session
                .elements
                .make_statement(ctx.build(child), expression, std::mem::take(&mut labels));
        if let ElementPayload::Block { statements, .. } =
            &mut session.elements.expect_mut(block).payload
        {
            statements.push(statement);
        }
    }
}

pub fn evaluate_node(
    session: &mut Session,
    ctx: &mut EvalContext,
    node: &AstNode,
) -> Option<ElementId> {
    let element = dispatch(session, ctx, node)?;

    if !ctx.pending_comments.is_empty() {
        let comments = std::mem::take(&mut ctx.pending_comments);
        session.elements.expect_mut(element).comments = comments;
    }
    if !ctx.pending_attributes.is_empty() {
        let attributes = std::mem::take(&mut ctx.pending_attributes);
        session.elements.expect_mut(element).attributes = attributes;
    }
    for attr in &node.attributes {
        let value = attr
            .lhs
            .as_deref()
            .and_then(|v| evaluate_node(session, ctx, v));
        let name = attr.token.as_name().unwrap_or_default();
        let attribute = session
            .elements
            .make_attribute(ctx.build(attr), name, value);
        session.elements.expect_mut(element).attributes.push(attribute);
    }

    Some(element)
}

fn dispatch(session: &mut Session, ctx: &mut EvalContext, node: &AstNode) -> Option<ElementId> {
    match node.kind {
        AstKind::Module => evaluate_module(session, ctx, node),
        AstKind::Block => Some(evaluate_block(session, ctx, node, ScopeKind::Block, false)),
        AstKind::Statement => {
            let inner = node.lhs.as_deref()?;
            evaluate_node(session, ctx, inner)
        }
        AstKind::Expression => {
            let root = evaluate_node(session, ctx, node.lhs.as_deref()?)?;
            Some(session.elements.make_expression(ctx.build(node), root))
        }
        AstKind::Namespace => evaluate_namespace(session, ctx, node),
        AstKind::Declaration => evaluate_declaration(session, ctx, node),
        AstKind::Assignment => {
            let lhs = evaluate_node(session, ctx, node.lhs.as_deref()?)?;
            let rhs = evaluate_node(session, ctx, node.rhs.as_deref()?)?;
            Some(session.elements.make_binary_operator(
                ctx.build(node),
                BinaryOp::Assignment,
                lhs,
                rhs,
            ))
        }
        AstKind::BinaryOperator => evaluate_binary_operator(session, ctx, node),
        AstKind::UnaryOperator => {
            let op = unary_op(node.token.as_operator()?)?;
            let rhs = evaluate_node(session, ctx, node.rhs.as_deref()?)?;
            Some(session.elements.make_unary_operator(ctx.build(node), op, rhs))
        }
        AstKind::If | AstKind::ElseIf => evaluate_if(session, ctx, node),
        AstKind::Else => node
            .children
            .first()
            .and_then(|body| evaluate_node(session, ctx, body)),
        AstKind::While => {
            let predicate = evaluate_node(session, ctx, node.lhs.as_deref()?)?;
            let body = evaluate_node(session, ctx, node.children.first()?)?;
            Some(session.elements.make_while(ctx.build(node), predicate, body))
        }
        AstKind::ForIn => evaluate_for(session, ctx, node),
        AstKind::Switch => evaluate_switch(session, ctx, node),
        AstKind::Case => {
            let expression = node
                .lhs
                .as_deref()
                .and_then(|e| evaluate_node(session, ctx, e));
            let body = evaluate_node(session, ctx, node.children.first()?)?;
            Some(session.elements.make_case(ctx.build(node), expression, body))
        }
        AstKind::Break => Some(session.elements.make_break(
            ctx.build(node),
            node.token.as_name().map(str::to_string),
        )),
        AstKind::Continue => Some(session.elements.make_continue(
            ctx.build(node),
            node.token.as_name().map(str::to_string),
        )),
        AstKind::Return => {
            let expression = node
                .lhs
                .as_deref()
                .and_then(|e| evaluate_node(session, ctx, e));
            Some(session.elements.make_return(ctx.build(node), expression))
        }
        AstKind::Defer => {
            let expression = evaluate_node(session, ctx, node.lhs.as_deref()?)?;
            let defer = session.elements.make_defer(ctx.build(node), expression);
            session.scopes.scope_mut(ctx.scope).defers.push(defer);
            Some(defer)
        }
        AstKind::With => {
            let expression = evaluate_node(session, ctx, node.lhs.as_deref()?)?;
            ctx.with_bases.push(expression);
            let body = node
                .children
                .first()
                .and_then(|b| evaluate_node(session, ctx, b));
            ctx.with_bases.pop();
            let body = body?;
            Some(session.elements.make_with(ctx.build(node), expression, body))
        }
        AstKind::Fallthrough => Some(session.elements.make_fallthrough(ctx.build(node))),
        AstKind::Label => {
            let name = node.token.as_name()?;
            Some(session.elements.make_label(ctx.build(node), name))
        }
        AstKind::Cast => {
            let target = resolve_type_node(session, node.lhs.as_deref()?)?;
            let expression = evaluate_node(session, ctx, node.rhs.as_deref()?)?;
            Some(session.elements.make_cast(ctx.build(node), target, expression))
        }
        AstKind::Transmute => {
            let target = resolve_type_node(session, node.lhs.as_deref()?)?;
            let expression = evaluate_node(session, ctx, node.rhs.as_deref()?)?;
            Some(
                session
                    .elements
                    .make_transmute(ctx.build(node), target, expression),
            )
        }
        AstKind::ProcCall => evaluate_proc_call(session, ctx, node),
        AstKind::ArgumentList => {
            let arguments = node
                .children
                .iter()
                .filter_map(|a| evaluate_node(session, ctx, a))
                .collect();
            Some(session.elements.make_argument_list(ctx.build(node), arguments))
        }
        AstKind::ArgumentPair => {
            let value = evaluate_node(session, ctx, node.rhs.as_deref()?)?;
            Some(session.elements.make_argument_pair(
                ctx.build(node),
                node.token.as_name().map(str::to_string),
                value,
            ))
        }
        AstKind::Subscript => {
            let lhs = evaluate_node(session, ctx, node.lhs.as_deref()?)?;
            let rhs = evaluate_node(session, ctx, node.rhs.as_deref()?)?;
            Some(session.elements.make_binary_operator(
                ctx.build(node),
                BinaryOp::Subscript,
                lhs,
                rhs,
            ))
        }
        AstKind::Symbol => {
            let symbol = symbol_from_node(node);
            // a bare type name used as an expression denotes the type
            if let Some(ty) = session.types.find_symbol(&symbol) {
                session.types.mark_used(ty);
                return Some(session.elements.make_type_reference(ctx.build(node), ty));
            }
            Some(make_reference(session, ctx, node, symbol))
        }
        AstKind::Import => {
            let symbol = symbol_from_node(node.lhs.as_deref()?);
            Some(session.elements.make_import(ctx.build(node), symbol, None))
        }
        AstKind::Directive => {
            let expression = node
                .lhs
                .as_deref()
                .and_then(|e| evaluate_node(session, ctx, e));
            let name = node.token.as_name().unwrap_or_default();
            Some(session.elements.make_directive(ctx.build(node), name, expression))
        }
        AstKind::Attribute => {
            let value = node
                .lhs
                .as_deref()
                .and_then(|e| evaluate_node(session, ctx, e));
            let name = node.token.as_name().unwrap_or_default();
            Some(session.elements.make_attribute(ctx.build(node), name, value))
        }
        AstKind::RawBlock => {
            let source = match &node.token {
                Token::Str(s) => s.as_str(),
                _ => "",
            };
            Some(session.elements.make_raw_block(ctx.build(node), source))
        }
        AstKind::ModuleExpression => Some(session.elements.make_module_reference(
            ctx.build(node),
            None,
        )),
        AstKind::NilLiteral => Some(session.elements.make_nil_literal(ctx.build(node))),
        AstKind::UninitializedLiteral => {
            Some(session.elements.make_uninitialized_literal(ctx.build(node)))
        }
        AstKind::NumberLiteral => match &node.token {
            Token::Integer { value, negative } => Some(
                session
                    .elements
                    .make_integer_literal(ctx.build(node), *value, *negative),
            ),
            Token::Float(value) => Some(session.elements.make_float_literal(ctx.build(node), *value)),
            _ => None,
        },
        AstKind::StringLiteral => match &node.token {
            Token::Str(value) => Some(session.elements.make_string_literal(ctx.build(node), value)),
            _ => None,
        },
        AstKind::BooleanLiteral => match &node.token {
            Token::Boolean(value) => Some(
                session
                    .elements
                    .make_boolean_literal(ctx.build(node), *value),
            ),
            _ => None,
        },
        AstKind::CharacterLiteral => match &node.token {
            Token::Rune(value) => Some(
                session
                    .elements
                    .make_character_literal(ctx.build(node), *value),
            ),
            _ => None,
        },
        AstKind::LineComment | AstKind::BlockComment => None,
        AstKind::ProcExpression
        | AstKind::StructExpression
        | AstKind::UnionExpression
        | AstKind::EnumExpression => {
            // only meaningful as a declaration initializer
            session.error(
                ErrorCode::X000,
                format!("unsupported construct outside declaration: {}", node.name()),
                node.span,
            );
            None
        }
        AstKind::ParameterList | AstKind::ReturnParameterList | AstKind::TypeIdentifier
        | AstKind::SymbolPart => None,
    }
}

fn evaluate_block(
    session: &mut Session,
    ctx: &mut EvalContext,
    node: &AstNode,
    kind: ScopeKind,
    stack_frame: bool,
) -> ElementId {
    let scope = session.scopes.push_scope(Some(ctx.scope), kind, ctx.module);
    session.scopes.scope_mut(scope).stack_frame = stack_frame;
    let block = session
        .elements
        .make_block(BuildContext::new(ctx.module, Some(scope), node.span), scope);
    session.scopes.scope_mut(scope).element = Some(block);

    let mut inner = EvalContext {
        scope,
        module: ctx.module,
        pending_comments: std::mem::take(&mut ctx.pending_comments),
        pending_attributes: Vec::new(),
        with_bases: std::mem::take(&mut ctx.with_bases),
    };
    evaluate_block_children(session, &mut inner, block, &node.children);
    ctx.with_bases = inner.with_bases;
    block
}

fn evaluate_namespace(
    session: &mut Session,
    ctx: &mut EvalContext,
    node: &AstNode,
) -> Option<ElementId> {
    let name = node.token.as_name()?.to_string();
    let scope = session.scopes.push_scope(
        Some(ctx.scope),
        ScopeKind::Namespace(name.clone()),
        ctx.module,
    );
    let block = session
        .elements
        .make_block(BuildContext::new(ctx.module, Some(scope), node.span), scope);
    session.scopes.scope_mut(scope).element = Some(block);

    let mut inner = EvalContext {
        scope,
        module: ctx.module,
        pending_comments: Vec::new(),
        pending_attributes: Vec::new(),
        with_bases: Vec::new(),
    };
    evaluate_block_children(session, &mut inner, block, &node.children);

    Some(session.elements.make_namespace(ctx.build(node), &name, block))
}

fn evaluate_if(session: &mut Session, ctx: &mut EvalContext, node: &AstNode) -> Option<ElementId> {
    let predicate = evaluate_node(session, ctx, node.lhs.as_deref()?)?;
    let true_branch = evaluate_node(session, ctx, node.children.first()?)?;
    let false_branch = node
        .rhs
        .as_deref()
        .and_then(|chain| evaluate_node(session, ctx, chain));
    Some(
        session
            .elements
            .make_if(ctx.build(node), predicate, true_branch, false_branch),
    )
}

fn evaluate_switch(
    session: &mut Session,
    ctx: &mut EvalContext,
    node: &AstNode,
) -> Option<ElementId> {
    let scrutinee = evaluate_node(session, ctx, node.lhs.as_deref()?)?;
    let cases: Vec<ElementId> = node
        .children
        .iter()
        .filter_map(|case| evaluate_node(session, ctx, case))
        .collect();
    Some(session.elements.make_switch(ctx.build(node), scrutinee, cases))
}

/// `for x in range(start, stop, step, dir, kind)`: the range intrinsic is
/// decomposed here; the comparison and step operators are synthesized by
/// the emitter.
fn evaluate_for(session: &mut Session, ctx: &mut EvalContext, node: &AstNode) -> Option<ElementId> {
    let range = node.rhs.as_deref()?;
    let args: &[AstNode] = match range.kind {
        AstKind::ProcCall => {
            let callee = range.lhs.as_deref()?;
            let name = symbol_from_node(callee);
            if name.name != "range" || name.is_qualified() {
                session.error(
                    ErrorCode::X000,
                    "for loops iterate over range(...) only",
                    range.span,
                );
                return None;
            }
            range.rhs.as_deref().map(|list| list.children.as_slice())?
        }
        _ => {
            session.error(
                ErrorCode::X000,
                "for loops iterate over range(...) only",
                range.span,
            );
            return None;
        }
    };
    if args.len() < 2 || args.len() > 5 {
        session.error(
            ErrorCode::P091,
            format!(
                "wrong number of arguments for intrinsic 'range': expected 2 to 5, found {}",
                args.len()
            ),
            range.span,
        );
        return None;
    }

    let start = evaluate_node(session, ctx, &args[0])?;
    let stop = evaluate_node(session, ctx, &args[1])?;
    let step = match args.get(2) {
        Some(step) => evaluate_node(session, ctx, step)?,
        None => session
            .elements
            .make_integer_literal(ctx.build(range), 1, false),
    };
    let dir = args
        .get(3)
        .and_then(|n| match n.token {
            Token::Integer { value, .. } => Some(value as u8),
            _ => None,
        })
        .unwrap_or(0);
    let kind = args
        .get(4)
        .and_then(|n| match n.token {
            Token::Integer { value, .. } => Some(value as u8),
            _ => None,
        })
        .unwrap_or(1);

    // induction variable owns `start` through its initializer
    let symbol = symbol_from_node(node.lhs.as_deref()?);
    let initializer = session.elements.make_initializer(ctx.build(node), start);
    let identifier =
        session
            .elements
            .make_identifier(ctx.build(node), symbol.clone(), None, Some(initializer), false);
    session.scopes.add_unknown_type(identifier);
    let induction = session.elements.make_declaration(ctx.build(node), identifier);
    session
        .scopes
        .scope_mut(ctx.scope)
        .declare(&symbol.name, identifier);

    let body = evaluate_node(session, ctx, node.children.first()?)?;
    Some(session.elements.make_for(
        ctx.build(node),
        induction,
        start,
        stop,
        step,
        dir,
        kind,
        body,
    ))
}

fn evaluate_binary_operator(
    session: &mut Session,
    ctx: &mut EvalContext,
    node: &AstNode,
) -> Option<ElementId> {
    let op = binary_op(node.token.as_operator()?)?;

    // `with` supplies the base of a bare member access
    let lhs = match node.lhs.as_deref() {
        Some(lhs) => evaluate_node(session, ctx, lhs)?,
        None if op == BinaryOp::MemberAccess => {
            let Some(base) = ctx.with_bases.last().copied() else {
                session.error(
                    ErrorCode::P081,
                    "member access without a base requires an enclosing 'with'",
                    node.span,
                );
                return None;
            };
            clone_reference(session, ctx, node, base)?
        }
        None => return None,
    };
    // member names resolve against the base's field map, not the scope
    let rhs = if op == BinaryOp::MemberAccess {
        let member_node = node.rhs.as_deref()?;
        let member = symbol_from_node(member_node);
        session
            .elements
            .make_symbol_element(ctx.build(member_node), member)
    } else {
        evaluate_node(session, ctx, node.rhs.as_deref()?)?
    };
    Some(session.elements.make_binary_operator(ctx.build(node), op, lhs, rhs))
}

/// References the same declaration as `base` from a fresh element, so the
/// synthesized member access owns its own lhs.
fn clone_reference(
    session: &mut Session,
    ctx: &mut EvalContext,
    node: &AstNode,
    base: ElementId,
) -> Option<ElementId> {
    let root = match &session.elements.get(base)?.payload {
        ElementPayload::Expression { root } => *root,
        _ => base,
    };
    match &session.elements.get(root)?.payload {
        ElementPayload::IdentifierReference { symbol, identifier } => {
            let symbol = symbol.clone();
            let identifier = *identifier;
            let reference =
                session
                    .elements
                    .make_identifier_reference(ctx.build(node), symbol, identifier);
            if identifier.is_none() {
                session.scopes.add_unresolved_reference(reference);
            }
            Some(reference)
        }
        _ => {
            session.error(
                ErrorCode::X000,
                "'with' expression must be an identifier",
                node.span,
            );
            None
        }
    }
}

fn evaluate_proc_call(
    session: &mut Session,
    ctx: &mut EvalContext,
    node: &AstNode,
) -> Option<ElementId> {
    let callee = node.lhs.as_deref()?;
    let args_node = node.rhs.as_deref()?;
    let symbol = symbol_from_node(callee);

    // intrinsics are recognised by name and checked for arity here
    if !symbol.is_qualified() {
        if let Some(kind) = IntrinsicKind::from_name(&symbol.name) {
            let (min, max) = kind.arity();
            let found = args_node.children.len();
            if found < min || found > max {
                let expected = if min == max {
                    format!("{min}")
                } else {
                    format!("{min} to {max}")
                };
                session.error(
                    ErrorCode::P091,
                    format!(
                        "wrong number of arguments for intrinsic '{}': expected {expected}, found {found}",
                        kind.name()
                    ),
                    node.span,
                );
                return None;
            }
            let arguments = evaluate_node(session, ctx, args_node)?;
            return Some(session.elements.make_intrinsic(ctx.build(node), kind, arguments));
        }
    }

    let reference = make_reference(session, ctx, callee, symbol);
    let arguments = evaluate_node(session, ctx, args_node)?;
    Some(
        session
            .elements
            .make_procedure_call(ctx.build(node), reference, arguments),
    )
}

fn make_reference(
    session: &mut Session,
    ctx: &mut EvalContext,
    node: &AstNode,
    symbol: QualifiedSymbol,
) -> ElementId {
    let resolved = session
        .find_identifiers(ctx.scope, &symbol)
        .first()
        .copied();
    let reference =
        session
            .elements
            .make_identifier_reference(ctx.build(node), symbol, resolved);
    if resolved.is_none() {
        session.scopes.add_unresolved_reference(reference);
    }
    reference
}

fn evaluate_declaration(
    session: &mut Session,
    ctx: &mut EvalContext,
    node: &AstNode,
) -> Option<ElementId> {
    let symbol_node = node.lhs.as_deref()?;
    let symbol = symbol_from_node(symbol_node).with_span(symbol_node.span);

    let declared_type = symbol_node
        .rhs
        .as_deref()
        .and_then(|t| resolve_type_node(session, t));

    let mut constant = node.is_constant;
    let initializer = match node.rhs.as_deref() {
        Some(init) => match init.kind {
            AstKind::ProcExpression => {
                constant = true;
                return evaluate_proc_declaration(session, ctx, node, symbol, init);
            }
            AstKind::StructExpression | AstKind::UnionExpression | AstKind::EnumExpression => {
                constant = true;
                return evaluate_composite_declaration(session, ctx, node, symbol, init);
            }
            AstKind::Namespace => {
                constant = true;
                let namespace = evaluate_namespace(session, ctx, init)?;
                Some(session.elements.make_initializer(ctx.build(init), namespace))
            }
            _ => {
                let expression = evaluate_node(session, ctx, init)?;
                Some(session.elements.make_initializer(ctx.build(init), expression))
            }
        },
        None => None,
    };

    let identifier = session.elements.make_identifier(
        ctx.build(node),
        symbol.clone(),
        declared_type,
        initializer,
        constant,
    );
    match declared_type {
        Some(ty) => session.types.mark_used(ty),
        None => {
            if let Some(type_symbol) = symbol_node.rhs.as_deref().and_then(type_symbol_of) {
                session.elements.set_declared_type_symbol(identifier, type_symbol);
            }
            session.scopes.add_unknown_type(identifier);
        }
    }
    session
        .scopes
        .scope_mut(ctx.scope)
        .declare(&symbol.name, identifier);

    Some(session.elements.make_declaration(ctx.build(node), identifier))
}

/// `name :: proc(params) [: returns] [{ body } | #foreign]`
fn evaluate_proc_declaration(
    session: &mut Session,
    ctx: &mut EvalContext,
    node: &AstNode,
    symbol: QualifiedSymbol,
    proc_node: &AstNode,
) -> Option<ElementId> {
    let params_node = proc_node.lhs.as_deref()?;
    let foreign = proc_node.is_foreign
        || node.is_foreign
        || node.attributes.iter().any(|a| a.token.as_name() == Some("foreign"));
    let variadic = params_node.children.iter().any(|p| p.is_spread);

    // body scope carries the stack frame; parameters are declared into it
    let body_scope = session
        .scopes
        .push_scope(Some(ctx.scope), ScopeKind::Procedure, ctx.module);
    session.scopes.scope_mut(body_scope).stack_frame = true;

    let mut parameters = FieldMap::new();
    let mut parameter_ids = Vec::new();
    for (index, param) in params_node.children.iter().enumerate() {
        if param.is_spread {
            continue;
        }
        let param_symbol_node = param.lhs.as_deref()?;
        let param_symbol = symbol_from_node(param_symbol_node);
        let Some(param_type) = param_symbol_node
            .rhs
            .as_deref()
            .and_then(|t| resolve_type_node(session, t))
        else {
            session.error(
                ErrorCode::P081,
                format!("unresolved parameter type for '{}'", param_symbol.name),
                param.span,
            );
            continue;
        };
        session.types.mark_used(param_type);

        let param_ctx = BuildContext::new(ctx.module, Some(body_scope), param.span);
        let identifier = session.elements.make_identifier(
            param_ctx,
            param_symbol.clone(),
            Some(param_type),
            None,
            false,
        );
        session
            .scopes
            .scope_mut(body_scope)
            .declare(&param_symbol.name, identifier);
        parameter_ids.push(identifier);

        parameters.push(TypeField {
            name: param_symbol.name.clone(),
            ty: param_type,
            offset: (index as u32) * 8,
            size: session.types.decl(param_type).size as u32,
            declaration: Some(identifier),
        });
    }

    let mut returns = FieldMap::new();
    if let Some(returns_node) = proc_node.rhs.as_deref() {
        for (index, ret) in returns_node.children.iter().enumerate() {
            let Some(ret_type) = resolve_type_node(session, ret) else {
                session.error(ErrorCode::P081, "unresolved return type", ret.span);
                continue;
            };
            session.types.mark_used(ret_type);
            returns.push(TypeField {
                name: format!("_ret{index}"),
                ty: ret_type,
                offset: (index as u32) * 8,
                size: session.types.decl(ret_type).size as u32,
                declaration: None,
            });
        }
    }

    let proc_type = session
        .types
        .make_procedure(parameters, returns, foreign, variadic);
    session.types.mark_used(proc_type);

    let initializer_expr = if foreign {
        // no body: the parameter identifiers ride on the type reference
        session.elements.make_composite_type_reference(
            ctx.build(proc_node),
            proc_type,
            parameter_ids,
        )
    } else {
        let body_node = proc_node.children.first()?;
        let block = session.elements.make_block(
            BuildContext::new(ctx.module, Some(body_scope), body_node.span),
            body_scope,
        );
        session.scopes.scope_mut(body_scope).element = Some(block);
        let mut inner = EvalContext {
            scope: body_scope,
            module: ctx.module,
            pending_comments: Vec::new(),
            pending_attributes: Vec::new(),
            with_bases: Vec::new(),
        };
        evaluate_block_children(session, &mut inner, block, &body_node.children);
        session
            .elements
            .make_procedure_instance(ctx.build(proc_node), proc_type, block, parameter_ids)
    };

    let initializer = session
        .elements
        .make_initializer(ctx.build(proc_node), initializer_expr);
    let identifier = session.elements.make_identifier(
        ctx.build(node),
        symbol.clone(),
        Some(proc_type),
        Some(initializer),
        true,
    );
    if foreign {
        // the native descriptor keys on the declaring identifier
        session.ffi.register(identifier, &symbol.name, variadic);
    }
    session
        .scopes
        .scope_mut(ctx.scope)
        .declare(&symbol.name, identifier);

    Some(session.elements.make_declaration(ctx.build(node), identifier))
}

/// `name :: struct|union|enum { fields }` declares a composite type whose
/// layout is computed exactly once, after every field resolved.
fn evaluate_composite_declaration(
    session: &mut Session,
    ctx: &mut EvalContext,
    node: &AstNode,
    symbol: QualifiedSymbol,
    composite_node: &AstNode,
) -> Option<ElementId> {
    let composite = match composite_node.kind {
        AstKind::StructExpression => CompositeKind::Struct,
        AstKind::UnionExpression => CompositeKind::Union,
        _ => CompositeKind::Enum,
    };
    let packed = composite_node
        .attributes
        .iter()
        .any(|a| a.token.as_name() == Some("packed"));

    let type_id = session
        .types
        .make_composite(symbol.clone(), composite, packed);

    let mut fields = FieldMap::new();
    let fields_node = composite_node.children.first()?;
    let mut enum_value = 0u64;
    for field_node in &fields_node.children {
        if field_node.is_comment() {
            continue;
        }
        let field_symbol_node = field_node.lhs.as_deref()?;
        let field_symbol = symbol_from_node(field_symbol_node);

        let field_type = match composite {
            CompositeKind::Enum => session.types.find("u32").unwrap(),
            _ => match field_symbol_node
                .rhs
                .as_deref()
                .and_then(|t| resolve_type_node(session, t))
            {
                Some(ty) => ty,
                None => {
                    session.error(
                        ErrorCode::P081,
                        format!("unresolved field type for '{}'", field_symbol.name),
                        field_node.span,
                    );
                    continue;
                }
            },
        };
        session.types.mark_used(field_type);

        let field_init = match field_node.rhs.as_deref() {
            Some(init) => {
                let expression = evaluate_node(session, ctx, init)?;
                Some(session.elements.make_initializer(ctx.build(init), expression))
            }
            None if composite == CompositeKind::Enum => {
                let literal = session.elements.make_integer_literal(
                    ctx.build(field_node),
                    enum_value,
                    false,
                );
                Some(session.elements.make_initializer(ctx.build(field_node), literal))
            }
            None => None,
        };
        enum_value += 1;

        let identifier = session.elements.make_identifier(
            ctx.build(field_node),
            field_symbol.clone(),
            Some(field_type),
            field_init,
            false,
        );
        let field_element = session.elements.make_field(ctx.build(field_node), identifier);

        fields.push(TypeField {
            name: field_symbol.name.clone(),
            ty: field_type,
            offset: 0,
            size: session.types.decl(field_type).size as u32,
            declaration: Some(field_element),
        });
    }
    session.types.finalize_composite(type_id, fields);
    session.types.mark_used(type_id);

    // the composite's field elements live under the type reference
    let field_elements: Vec<ElementId> = match &session.types.decl(type_id).kind {
        TypeKind::Composite { fields, .. } => fields.iter().filter_map(|f| f.declaration).collect(),
        _ => Vec::new(),
    };
    let type_ref = session.elements.make_composite_type_reference(
        ctx.build(composite_node),
        type_id,
        field_elements,
    );
    let initializer = session
        .elements
        .make_initializer(ctx.build(composite_node), type_ref);
    let identifier = session.elements.make_identifier(
        ctx.build(node),
        symbol.clone(),
        Some(session.types.find("type").unwrap()),
        Some(initializer),
        true,
    );
    session
        .scopes
        .scope_mut(ctx.scope)
        .declare(&symbol.name, identifier);

    Some(session.elements.make_declaration(ctx.build(node), identifier))
}

fn resolve_type_node(session: &mut Session, node: &AstNode) -> Option<TypeId> {
    let symbol_node = node.lhs.as_deref()?;
    let symbol = symbol_from_node(symbol_node);
    let base = session.types.find_symbol(&symbol)?;
    if node.is_pointer {
        return Some(session.types.pointer_to(base));
    }
    if node.is_array {
        let length = node.children.first().and_then(|n| match n.token {
            Token::Integer { value, .. } => Some(value as usize),
            _ => None,
        })?;
        return Some(session.types.array_of(base, length));
    }
    Some(base)
}

/// Declared type name of a type-identifier node, for deferred resolution.
fn type_symbol_of(node: &AstNode) -> Option<QualifiedSymbol> {
    node.lhs.as_deref().map(symbol_from_node)
}

fn symbol_from_node(node: &AstNode) -> QualifiedSymbol {
    match node.kind {
        AstKind::Symbol => {
            let parts: Vec<String> = node
                .children
                .iter()
                .filter_map(|p| p.token.as_name().map(str::to_string))
                .collect();
            match parts.split_last() {
                Some((name, namespaces)) => {
                    QualifiedSymbol::qualified(namespaces.to_vec(), name.clone())
                }
                None => QualifiedSymbol::new(node.token.as_name().unwrap_or_default()),
            }
        }
        _ => QualifiedSymbol::new(node.token.as_name().unwrap_or_default()),
    }
}

fn unary_op(op: Operator) -> Option<UnaryOp> {
    Some(match op {
        Operator::Negate => UnaryOp::Negate,
        Operator::BinaryNot => UnaryOp::BinaryNot,
        Operator::LogicalNot => UnaryOp::LogicalNot,
        Operator::PointerDereference => UnaryOp::PointerDereference,
        _ => return None,
    })
}

fn binary_op(op: Operator) -> Option<BinaryOp> {
    Some(match op {
        Operator::Add => BinaryOp::Add,
        Operator::Subtract => BinaryOp::Subtract,
        Operator::Multiply => BinaryOp::Multiply,
        Operator::Divide => BinaryOp::Divide,
        Operator::Modulo => BinaryOp::Modulo,
        Operator::Exponent => BinaryOp::Exponent,
        Operator::Equals => BinaryOp::Equals,
        Operator::NotEquals => BinaryOp::NotEquals,
        Operator::LessThan => BinaryOp::LessThan,
        Operator::LessThanOrEqual => BinaryOp::LessThanOrEqual,
        Operator::GreaterThan => BinaryOp::GreaterThan,
        Operator::GreaterThanOrEqual => BinaryOp::GreaterThanOrEqual,
        Operator::LogicalAnd => BinaryOp::LogicalAnd,
        Operator::LogicalOr => BinaryOp::LogicalOr,
        Operator::BinaryAnd => BinaryOp::BinaryAnd,
        Operator::BinaryOr => BinaryOp::BinaryOr,
        Operator::BinaryXor => BinaryOp::BinaryXor,
        Operator::ShiftLeft => BinaryOp::ShiftLeft,
        Operator::ShiftRight => BinaryOp::ShiftRight,
        Operator::RotateLeft => BinaryOp::RotateLeft,
        Operator::RotateRight => BinaryOp::RotateRight,
        Operator::MemberAccess => BinaryOp::MemberAccess,
        Operator::Subscript => BinaryOp::Subscript,
        Operator::Assignment => BinaryOp::Assignment,
        _ => None?,
    })
}
