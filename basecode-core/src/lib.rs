#![forbid(unsafe_code)]

mod builder;
mod element;
mod emit;
mod error;
mod evaluator;
mod fold;
mod interner;
mod scope;
mod sema;
mod session;
mod symbols;
mod types;
mod variables;

pub use builder::BuildContext;
pub use element::{
    BinaryOp, Element, ElementId, ElementKind, ElementMap, ElementPayload, IntrinsicKind, UnaryOp,
};
pub use emit::emit_program;
pub use error::{CompileFailure, CompileResult, ErrorCode, ResultMessage, Severity};
pub use evaluator::evaluate_program;
pub use fold::fold_constants;
pub use interner::{escape, StringInterner};
pub use scope::{Scope, ScopeId, ScopeKind, ScopeManager};
pub use sema::{infer_type, resolve_overload, resolve_pending, type_check, OverloadError};
pub use session::{FfiRegistry, ForeignFunction, Session, SessionOptions};
pub use symbols::QualifiedSymbol;
pub use types::{
    AccessModel, CastMode, CompositeKind, FieldMap, NumberClass, TypeDecl, TypeField, TypeId,
    TypeKind, TypeRegistry,
};
pub use variables::{plan, Variable, VariablePlan, VariablePlanner};
