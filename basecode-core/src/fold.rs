#![forbid(unsafe_code)]

//! Constant folding: rewrites `size_of`/`type_of` intrinsics and pure
//! arithmetic over literal operands in place. Folding an already-folded
//! tree is a no-op, which the round-trip tests rely on.

use crate::element::{BinaryOp, ElementId, ElementKind, ElementPayload, IntrinsicKind, UnaryOp};
use crate::sema;
use crate::session::Session;

pub fn fold_constants(session: &mut Session) {
    fold_intrinsics(session);
    if session.result.is_failed() {
        return;
    }

    // literal arithmetic cascades bottom-up; iterate until quiet
    loop {
        let mut changed = false;
        for id in session.elements.find_by_kind(ElementKind::UnaryOperator) {
            changed |= fold_unary(session, id);
        }
        for id in session.elements.find_by_kind(ElementKind::BinaryOperator) {
            changed |= fold_binary(session, id);
        }
        if !changed {
            break;
        }
    }
}

fn fold_intrinsics(session: &mut Session) {
    for id in session.elements.find_by_kind(ElementKind::Intrinsic) {
        let (kind, arguments) = match &session.elements.expect(id).payload {
            ElementPayload::Intrinsic { kind, arguments } => (*kind, *arguments),
            _ => continue,
        };
        match kind {
            IntrinsicKind::SizeOf => {
                let Some(operand) = sema::first_argument(session, arguments) else {
                    continue;
                };
                let Some(ty) = operand_type(session, operand) else {
                    continue;
                };
                let size = session.types.decl(ty).size as u64;
                replace_with(session, id, ElementPayload::IntegerLiteral {
                    value: size,
                    negative: false,
                });
            }
            IntrinsicKind::TypeOf => {
                let Some(operand) = sema::first_argument(session, arguments) else {
                    continue;
                };
                let Some(ty) = operand_type(session, operand) else {
                    continue;
                };
                replace_with(session, id, ElementPayload::TypeLiteral { ty });
            }
            _ => {}
        }
    }
}

/// The type an intrinsic operand denotes: a type reference names it
/// directly, anything else contributes its inferred type.
fn operand_type(
    session: &mut Session,
    operand: ElementId,
) -> Option<crate::types::TypeId> {
    let root = match &session.elements.get(operand)?.payload {
        ElementPayload::Expression { root } => *root,
        _ => operand,
    };
    match &session.elements.get(root)?.payload {
        ElementPayload::TypeReference { referenced, .. } => Some(*referenced),
        _ => sema::infer_type(session, operand),
    }
}

/// Swaps the payload of `id` for a literal and drops the now-unowned
/// operand subtrees from the map.
fn replace_with(session: &mut Session, id: ElementId, literal: ElementPayload) {
    let old_children = session.elements.expect(id).owned_children();
    let element = session.elements.expect_mut(id);
    element.payload = literal;
    element.inferred = None;
    let keep: Vec<ElementId> = element.owned_children();
    for child in old_children {
        if !keep.contains(&child) {
            session.elements.remove(child);
        }
    }
}

fn fold_unary(session: &mut Session, id: ElementId) -> bool {
    let (op, rhs) = match session.elements.get(id).map(|e| &e.payload) {
        Some(ElementPayload::UnaryOperator { op, rhs }) => (*op, *rhs),
        _ => return false,
    };
    match op {
        UnaryOp::Negate => {
            if let Some(ElementPayload::IntegerLiteral { value, negative }) =
                literal_payload(session, rhs)
            {
                replace_with(session, id, ElementPayload::IntegerLiteral {
                    value,
                    negative: !negative,
                });
                return true;
            }
            if let Some(ElementPayload::FloatLiteral { value }) = literal_payload(session, rhs) {
                replace_with(session, id, ElementPayload::FloatLiteral { value: -value });
                return true;
            }
            false
        }
        UnaryOp::LogicalNot => {
            if let Some(value) = session.elements.as_bool(rhs) {
                replace_with(session, id, ElementPayload::BooleanLiteral { value: !value });
                return true;
            }
            false
        }
        UnaryOp::BinaryNot => {
            if let Some(ElementPayload::IntegerLiteral {
                value,
                negative: false,
            }) = literal_payload(session, rhs)
            {
                replace_with(session, id, ElementPayload::IntegerLiteral {
                    value: !value,
                    negative: false,
                });
                return true;
            }
            false
        }
        UnaryOp::PointerDereference => false,
    }
}

fn literal_payload(session: &Session, id: ElementId) -> Option<ElementPayload> {
    let element = session.elements.get(id)?;
    match &element.payload {
        ElementPayload::Expression { root } => literal_payload(session, *root),
        ElementPayload::IntegerLiteral { .. }
        | ElementPayload::FloatLiteral { .. }
        | ElementPayload::BooleanLiteral { .. } => Some(element.payload.clone()),
        _ => None,
    }
}

fn fold_binary(session: &mut Session, id: ElementId) -> bool {
    let (op, lhs, rhs) = match session.elements.get(id).map(|e| &e.payload) {
        Some(ElementPayload::BinaryOperator { op, lhs, rhs }) => (*op, *lhs, *rhs),
        _ => return false,
    };
    if !op.is_arithmetic() && !op.is_relational() {
        return false;
    }

    if let (Some(a), Some(b)) = (
        session.elements.as_signed_integer(lhs),
        session.elements.as_signed_integer(rhs),
    ) {
        if op.is_relational() {
            let value = match op {
                BinaryOp::Equals => a == b,
                BinaryOp::NotEquals => a != b,
                BinaryOp::LessThan => a < b,
                BinaryOp::LessThanOrEqual => a <= b,
                BinaryOp::GreaterThan => a > b,
                BinaryOp::GreaterThanOrEqual => a >= b,
                _ => unreachable!(),
            };
            replace_with(session, id, ElementPayload::BooleanLiteral { value });
            return true;
        }
        let folded = match op {
            BinaryOp::Add => a.checked_add(b),
            BinaryOp::Subtract => a.checked_sub(b),
            BinaryOp::Multiply => a.checked_mul(b),
            BinaryOp::Divide => (b != 0).then(|| a / b),
            BinaryOp::Modulo => (b != 0).then(|| a % b),
            BinaryOp::Exponent => u32::try_from(b).ok().and_then(|e| a.checked_pow(e)),
            BinaryOp::BinaryAnd => Some(a & b),
            BinaryOp::BinaryOr => Some(a | b),
            BinaryOp::BinaryXor => Some(a ^ b),
            BinaryOp::ShiftLeft => Some(((a as u64) << (b as u32 % 64)) as i64),
            BinaryOp::ShiftRight => Some(((a as u64) >> (b as u32 % 64)) as i64),
            BinaryOp::RotateLeft => Some((a as u64).rotate_left(b as u32 % 64) as i64),
            BinaryOp::RotateRight => Some((a as u64).rotate_right(b as u32 % 64) as i64),
            _ => None,
        };
        let Some(folded) = folded else {
            return false;
        };
        replace_with(session, id, ElementPayload::IntegerLiteral {
            value: folded.unsigned_abs(),
            negative: folded < 0,
        });
        return true;
    }

    if let (Some(a), Some(b)) = (
        session.elements.as_float(lhs),
        session.elements.as_float(rhs),
    ) {
        if op.is_relational() {
            let value = match op {
                BinaryOp::Equals => a == b,
                BinaryOp::NotEquals => a != b,
                BinaryOp::LessThan => a < b,
                BinaryOp::LessThanOrEqual => a <= b,
                BinaryOp::GreaterThan => a > b,
                BinaryOp::GreaterThanOrEqual => a >= b,
                _ => unreachable!(),
            };
            replace_with(session, id, ElementPayload::BooleanLiteral { value });
            return true;
        }
        let folded = match op {
            BinaryOp::Add => Some(a + b),
            BinaryOp::Subtract => Some(a - b),
            BinaryOp::Multiply => Some(a * b),
            BinaryOp::Divide => (b != 0.0).then(|| a / b),
            BinaryOp::Modulo => (b != 0.0).then(|| a % b),
            BinaryOp::Exponent => Some(a.powf(b)),
            _ => None,
        };
        let Some(folded) = folded else {
            return false;
        };
        replace_with(session, id, ElementPayload::FloatLiteral { value: folded });
        return true;
    }

    false
}
