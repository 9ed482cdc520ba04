#![forbid(unsafe_code)]

//! Type inference and checking. Inference is rule-based per element kind
//! and re-run to a fixpoint by `resolve_pending` until no unknown
//! identifier or type remains.

use crate::element::{BinaryOp, ElementId, ElementKind, ElementPayload, IntrinsicKind, UnaryOp};
use crate::error::ErrorCode;
use crate::session::Session;
use crate::types::{TypeId, TypeKind};

/// Infers the type of `id`, filling the element's inferred-type slot on
/// success. Returns `None` when inference must wait for another pass.
pub fn infer_type(session: &mut Session, id: ElementId) -> Option<TypeId> {
    if let Some(cached) = session.elements.get(id)?.inferred {
        return Some(cached);
    }
    let payload = session.elements.get(id)?.payload.clone();

    let inferred = match payload {
        ElementPayload::IntegerLiteral { value, negative } => {
            Some(session.types.narrow_integer(value, negative))
        }
        ElementPayload::FloatLiteral { value } => Some(session.types.narrow_float(value)),
        ElementPayload::StringLiteral { .. } => session.types.find("string"),
        ElementPayload::BooleanLiteral { .. } => Some(session.types.bool_type()),
        ElementPayload::CharacterLiteral { .. } => session.types.find("rune"),
        ElementPayload::NilLiteral => {
            let void = session.types.void();
            Some(session.types.pointer_to(void))
        }
        ElementPayload::UninitializedLiteral => None,
        ElementPayload::TypeLiteral { .. } | ElementPayload::TypeReference { .. } => {
            session.types.find("type")
        }
        ElementPayload::ModuleReference { .. } => session.types.find("module"),
        ElementPayload::Expression { root } => infer_type(session, root),
        ElementPayload::Initializer { expression } => infer_type(session, expression),
        ElementPayload::Declaration { identifier } => infer_type(session, identifier),
        ElementPayload::ArgumentPair { value, .. } => infer_type(session, value),
        ElementPayload::Identifier {
            type_ref,
            type_symbol,
            initializer,
            ..
        } => {
            let resolved = type_ref
                .or_else(|| {
                    type_symbol
                        .as_ref()
                        .and_then(|sym| session.types.find_symbol(sym))
                })
                .or_else(|| initializer.and_then(|init| infer_type(session, init)));
            if let Some(resolved) = resolved {
                if type_ref.is_none() {
                    if let ElementPayload::Identifier { type_ref, .. } =
                        &mut session.elements.expect_mut(id).payload
                    {
                        *type_ref = Some(resolved);
                    }
                }
            }
            resolved
        }
        ElementPayload::IdentifierReference { identifier, .. } => {
            identifier.and_then(|decl| infer_type(session, decl))
        }
        ElementPayload::UnaryOperator { op, rhs } => match op {
            UnaryOp::LogicalNot => Some(session.types.bool_type()),
            UnaryOp::Negate | UnaryOp::BinaryNot => infer_type(session, rhs),
            UnaryOp::PointerDereference => {
                let base = infer_type(session, rhs)?;
                match session.types.decl(base).kind {
                    TypeKind::Pointer { base } => Some(base),
                    _ => None,
                }
            }
        },
        ElementPayload::BinaryOperator { op, lhs, rhs } => {
            if op.is_relational() || op.is_logical() {
                Some(session.types.bool_type())
            } else if op == BinaryOp::MemberAccess {
                infer_member_access(session, lhs, rhs)
            } else if op == BinaryOp::Subscript {
                let base = infer_type(session, lhs)?;
                match session.types.decl(base).kind {
                    TypeKind::Array { base, .. } => Some(base),
                    TypeKind::Pointer { base } => Some(base),
                    _ => None,
                }
            } else {
                // arithmetic and assignment both take the lhs type
                infer_type(session, lhs)
            }
        }
        ElementPayload::Cast { target, .. } | ElementPayload::Transmute { target, .. } => {
            Some(target)
        }
        ElementPayload::ProcedureCall {
            reference,
            proc_type,
            ..
        } => {
            let proc_type = proc_type.or_else(|| {
                let declared = match &session.elements.get(reference)?.payload {
                    ElementPayload::IdentifierReference {
                        identifier: Some(identifier),
                        ..
                    } => session.identifier_type(*identifier),
                    _ => None,
                }?;
                session.types.decl(declared).is_procedure().then_some(declared)
            })?;
            match &session.types.decl(proc_type).kind {
                TypeKind::Procedure { returns, .. } => match returns.iter().next() {
                    Some(ret) => Some(ret.ty),
                    None => Some(session.types.void()),
                },
                _ => None,
            }
        }
        ElementPayload::ProcedureInstance { proc_type, .. } => Some(proc_type),
        ElementPayload::Intrinsic { kind, arguments } => match kind {
            IntrinsicKind::SizeOf => session.types.find("u32"),
            IntrinsicKind::TypeOf => session.types.find("type"),
            IntrinsicKind::AddressOf => {
                let operand = first_argument(session, arguments)?;
                let base = infer_type(session, operand)?;
                Some(session.types.pointer_to(base))
            }
            IntrinsicKind::Alloc => {
                let void = session.types.void();
                Some(session.types.pointer_to(void))
            }
            IntrinsicKind::Free | IntrinsicKind::Fill | IntrinsicKind::Copy => {
                Some(session.types.void())
            }
            IntrinsicKind::Range => None,
        },
        _ => None,
    };

    if let Some(ty) = inferred {
        session.elements.expect_mut(id).inferred = Some(ty);
        session.types.mark_used(ty);
    }
    inferred
}

/// Field type of the composite base, dereferencing a pointer once if
/// necessary.
fn infer_member_access(session: &mut Session, lhs: ElementId, rhs: ElementId) -> Option<TypeId> {
    let base = infer_type(session, lhs)?;
    let base = match session.types.decl(base).kind {
        TypeKind::Pointer { base } => base,
        _ => base,
    };
    let member = member_name(session, rhs)?;
    let decl = session.types.decl(base);
    let field = decl.fields()?.find(&member)?;
    Some(field.ty)
}

pub(crate) fn member_name(session: &Session, id: ElementId) -> Option<String> {
    match &session.elements.get(id)?.payload {
        ElementPayload::IdentifierReference { symbol, .. } => Some(symbol.name.clone()),
        ElementPayload::SymbolElement { symbol } => Some(symbol.name.clone()),
        ElementPayload::Expression { root } => member_name(session, *root),
        _ => None,
    }
}

pub(crate) fn first_argument(session: &Session, arguments: ElementId) -> Option<ElementId> {
    match &session.elements.get(arguments)?.payload {
        ElementPayload::ArgumentList { arguments } => arguments.first().copied(),
        _ => None,
    }
}

pub(crate) fn argument_ids(session: &Session, arguments: ElementId) -> Vec<ElementId> {
    match session.elements.get(arguments).map(|e| &e.payload) {
        Some(ElementPayload::ArgumentList { arguments }) => arguments.clone(),
        _ => Vec::new(),
    }
}

/// Runs the two resolution queues to a fixpoint. Each pass must strictly
/// shrink the pending set; a pass with no progress reports the first
/// unresolved entry of each queue and stops.
pub fn resolve_pending(session: &mut Session) {
    loop {
        let before = session.scopes.pending();
        if before == 0 {
            return;
        }

        let references = std::mem::take(&mut session.scopes.unresolved_references);
        for reference in references {
            if !try_resolve_reference(session, reference) {
                session.scopes.unresolved_references.push(reference);
            }
        }

        let identifiers = std::mem::take(&mut session.scopes.unknown_types);
        for identifier in identifiers {
            if infer_type(session, identifier).is_none() {
                session.scopes.unknown_types.push(identifier);
            }
        }

        let after = session.scopes.pending();
        if after == 0 {
            return;
        }
        if after >= before {
            report_stalled(session);
            return;
        }
    }
}

fn try_resolve_reference(session: &mut Session, reference: ElementId) -> bool {
    let Some(element) = session.elements.get(reference) else {
        // the referencing element was folded away; nothing left to resolve
        return true;
    };
    let scope = element.parent_scope;
    let ElementPayload::IdentifierReference {
        symbol,
        identifier: None,
    } = &element.payload
    else {
        return true;
    };
    let symbol = symbol.clone();
    let Some(scope) = scope else {
        return false;
    };
    let candidates = session.find_identifiers(scope, &symbol);
    let Some(first) = candidates.first().copied() else {
        return false;
    };
    if let ElementPayload::IdentifierReference { identifier, .. } =
        &mut session.elements.expect_mut(reference).payload
    {
        *identifier = Some(first);
    }
    true
}

fn report_stalled(session: &mut Session) {
    if let Some(first) = session.scopes.unresolved_references.first().copied() {
        let element = session.elements.expect(first);
        let (name, span) = match &element.payload {
            ElementPayload::IdentifierReference { symbol, .. } => {
                (symbol.fully_qualified(), element.span)
            }
            _ => (element.label_name(), element.span),
        };
        session.error(ErrorCode::P081, format!("unknown identifier '{name}'"), span);
    }
    if let Some(first) = session.scopes.unknown_types.first().copied() {
        let element = session.elements.expect(first);
        let (name, span) = match &element.payload {
            ElementPayload::Identifier { symbol, .. } => (symbol.fully_qualified(), element.span),
            _ => (element.label_name(), element.span),
        };
        session.error(
            ErrorCode::C076,
            format!("unable to infer type for '{name}'"),
            span,
        );
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum OverloadError {
    NoMatch,
    Ambiguous,
}

/// Selects the procedure overload whose parameters accept the argument
/// types. Candidates needing no implicit widening win; remaining ties are
/// an ambiguity.
pub fn resolve_overload(
    session: &Session,
    candidates: &[ElementId],
    argument_types: &[TypeId],
) -> Result<ElementId, OverloadError> {
    let mut exact = Vec::new();
    let mut widening = Vec::new();

    for candidate in candidates {
        let Some(declared) = session.identifier_type(*candidate) else {
            continue;
        };
        let TypeKind::Procedure {
            parameters,
            variadic,
            ..
        } = &session.types.decl(declared).kind
        else {
            continue;
        };
        let arity_ok = if *variadic {
            argument_types.len() >= parameters.len()
        } else {
            argument_types.len() == parameters.len()
        };
        if !arity_ok {
            continue;
        }
        let mut all_accept = true;
        let mut all_exact = true;
        for (param, arg) in parameters.iter().zip(argument_types.iter()) {
            if param.ty != *arg {
                all_exact = false;
            }
            if !session.types.accepts(param.ty, *arg) {
                all_accept = false;
                break;
            }
        }
        if !all_accept {
            continue;
        }
        if all_exact {
            exact.push(*candidate);
        } else {
            widening.push(*candidate);
        }
    }

    match (exact.len(), widening.len()) {
        (1, _) => Ok(exact[0]),
        (0, 1) => Ok(widening[0]),
        (0, 0) => Err(OverloadError::NoMatch),
        _ => Err(OverloadError::Ambiguous),
    }
}

/// The post-resolution checking pass: binds calls to overloads and
/// validates assignments, casts, transmutes, and dereferences. Siblings
/// keep being checked after an error so diagnostics accumulate.
pub fn type_check(session: &mut Session) {
    bind_procedure_calls(session);
    if session.result.is_failed() {
        return;
    }
    check_operators(session);
    check_casts(session);
    check_declarations(session);
}

fn bind_procedure_calls(session: &mut Session) {
    for call in session.elements.find_by_kind(ElementKind::ProcedureCall) {
        let (reference, arguments) = match &session.elements.expect(call).payload {
            ElementPayload::ProcedureCall {
                reference,
                arguments,
                ..
            } => (*reference, *arguments),
            _ => continue,
        };
        let span = session.elements.expect(call).span;

        let (symbol, scope) = match &session.elements.expect(reference).payload {
            ElementPayload::IdentifierReference { symbol, .. } => (
                symbol.clone(),
                session.elements.expect(reference).parent_scope,
            ),
            _ => continue,
        };
        let Some(scope) = scope else { continue };

        let mut argument_types = Vec::new();
        for argument in argument_ids(session, arguments) {
            match infer_type(session, argument) {
                Some(ty) => argument_types.push(ty),
                None => {
                    argument_types.clear();
                    break;
                }
            }
        }

        let candidates = session.find_identifiers(scope, &symbol);
        if candidates.is_empty() {
            session.error(
                ErrorCode::P081,
                format!("unknown identifier '{}'", symbol.fully_qualified()),
                span,
            );
            continue;
        }

        let selected = match resolve_overload(session, &candidates, &argument_types) {
            Ok(selected) => selected,
            Err(OverloadError::Ambiguous) => {
                session.error(
                    ErrorCode::C077,
                    format!(
                        "ambiguous call to '{}': multiple overloads accept these arguments",
                        symbol.fully_qualified()
                    ),
                    span,
                );
                continue;
            }
            Err(OverloadError::NoMatch) => {
                session.error(
                    ErrorCode::P081,
                    format!(
                        "no matching overload for '{}'",
                        symbol.fully_qualified()
                    ),
                    span,
                );
                continue;
            }
        };

        let proc_type = session.identifier_type(selected);
        let instance = procedure_instance_of(session, selected);
        if let ElementPayload::ProcedureCall {
            proc_type: slot_type,
            instance: slot_instance,
            reference: _,
            arguments: _,
        } = &mut session.elements.expect_mut(call).payload
        {
            *slot_type = proc_type;
            *slot_instance = instance;
        }
        if let ElementPayload::IdentifierReference { identifier, .. } =
            &mut session.elements.expect_mut(reference).payload
        {
            *identifier = Some(selected);
        }
    }
}

/// The instance element a declaring identifier's initializer carries, for
/// non-foreign procedures.
pub(crate) fn procedure_instance_of(
    session: &Session,
    identifier: ElementId,
) -> Option<ElementId> {
    let ElementPayload::Identifier {
        initializer: Some(initializer),
        ..
    } = &session.elements.get(identifier)?.payload
    else {
        return None;
    };
    let ElementPayload::Initializer { expression } = &session.elements.get(*initializer)?.payload
    else {
        return None;
    };
    match &session.elements.get(*expression)?.payload {
        ElementPayload::ProcedureInstance { .. } => Some(*expression),
        _ => None,
    }
}

fn check_operators(session: &mut Session) {
    for id in session.elements.find_by_kind(ElementKind::BinaryOperator) {
        let (op, lhs, rhs) = match &session.elements.expect(id).payload {
            ElementPayload::BinaryOperator { op, lhs, rhs } => (*op, *lhs, *rhs),
            _ => continue,
        };
        let span = session.elements.expect(id).span;
        if op != BinaryOp::Assignment {
            continue;
        }
        let (Some(target), Some(value)) =
            (infer_type(session, lhs), infer_type(session, rhs))
        else {
            continue;
        };
        let target_composite = session.types.decl(target).is_composite();
        let value_composite = session.types.decl(value).is_composite();
        if target_composite != value_composite {
            session.error(
                ErrorCode::C074,
                format!(
                    "cannot assign '{}' to '{}': composite and scalar storage never mix",
                    session.types.decl(value).name(),
                    session.types.decl(target).name()
                ),
                span,
            );
            continue;
        }
        if !session.types.accepts(target, value) {
            session.error(
                ErrorCode::C074,
                format!(
                    "cannot assign '{}' to '{}'",
                    session.types.decl(value).name(),
                    session.types.decl(target).name()
                ),
                span,
            );
        }
    }

    for id in session.elements.find_by_kind(ElementKind::UnaryOperator) {
        let (op, rhs) = match &session.elements.expect(id).payload {
            ElementPayload::UnaryOperator { op, rhs } => (*op, *rhs),
            _ => continue,
        };
        if op != UnaryOp::PointerDereference {
            continue;
        }
        let span = session.elements.expect(id).span;
        if let Some(ty) = infer_type(session, rhs) {
            if !session.types.decl(ty).is_pointer() {
                session.error(
                    ErrorCode::C075,
                    format!(
                        "cannot dereference non-pointer type '{}'",
                        session.types.decl(ty).name()
                    ),
                    span,
                );
            }
        }
    }
}

fn check_casts(session: &mut Session) {
    for id in session.elements.find_by_kind(ElementKind::Cast) {
        let (target, expression) = match &session.elements.expect(id).payload {
            ElementPayload::Cast { target, expression } => (*target, *expression),
            _ => continue,
        };
        let span = session.elements.expect(id).span;
        let Some(source) = infer_type(session, expression) else {
            continue;
        };
        if session.types.cast_mode(source, target).is_none() {
            session.error(
                ErrorCode::C073,
                format!(
                    "cannot cast from '{}' to '{}': both sides need a number class",
                    session.types.decl(source).name(),
                    session.types.decl(target).name()
                ),
                span,
            );
        }
    }

    for id in session.elements.find_by_kind(ElementKind::Transmute) {
        let (target, expression) = match &session.elements.expect(id).payload {
            ElementPayload::Transmute { target, expression } => (*target, *expression),
            _ => continue,
        };
        let span = session.elements.expect(id).span;
        let Some(source) = infer_type(session, expression) else {
            continue;
        };
        if !session.types.transmute_allowed(source, target) {
            session.error(
                ErrorCode::C073,
                format!(
                    "cannot transmute from '{}' to '{}': sizes and number classes must line up",
                    session.types.decl(source).name(),
                    session.types.decl(target).name()
                ),
                span,
            );
        }
    }
}

fn check_declarations(session: &mut Session) {
    for id in session.elements.find_by_kind(ElementKind::Identifier) {
        let (type_ref, initializer) = match &session.elements.expect(id).payload {
            ElementPayload::Identifier {
                type_ref,
                initializer,
                ..
            } => (*type_ref, *initializer),
            _ => continue,
        };
        let span = session.elements.expect(id).span;
        let (Some(declared), Some(initializer)) = (type_ref, initializer) else {
            continue;
        };
        let Some(value) = infer_type(session, initializer) else {
            continue;
        };
        if session.types.decl(value).kind == TypeKind::TypeInfo
            || session.types.decl(declared).is_procedure()
        {
            continue;
        }
        if !session.types.accepts(declared, value) {
            session.error(
                ErrorCode::C074,
                format!(
                    "cannot initialize '{}' with '{}'",
                    session.types.decl(declared).name(),
                    session.types.decl(value).name()
                ),
                span,
            );
        }
    }
}
