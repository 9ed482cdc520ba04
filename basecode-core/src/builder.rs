#![forbid(unsafe_code)]

use basecode_ast::Span;

use crate::element::{
    BinaryOp, Element, ElementId, ElementMap, ElementPayload, IntrinsicKind, UnaryOp,
};
use crate::scope::ScopeId;
use crate::symbols::QualifiedSymbol;
use crate::types::TypeId;

/// Placement of a new element: owning module, parent scope, source span.
#[derive(Clone, Copy, Debug)]
pub struct BuildContext {
    pub module: Option<ElementId>,
    pub scope: Option<ScopeId>,
    pub span: Span,
}

impl BuildContext {
    pub fn new(module: Option<ElementId>, scope: Option<ScopeId>, span: Span) -> Self {
        Self {
            module,
            scope,
            span,
        }
    }
}

/// The construction surface over the element map: one constructor per
/// element kind. Each stamps a fresh id and the placement fields.
impl ElementMap {
    pub fn make(&mut self, ctx: BuildContext, payload: ElementPayload) -> ElementId {
        let id = self.allocate_id();
        self.insert(Element {
            id,
            module: ctx.module,
            parent_scope: ctx.scope,
            span: ctx.span,
            attributes: Vec::new(),
            comments: Vec::new(),
            payload,
            non_owning: false,
            inferred: None,
        })
    }

    /// Synthetic helpers (e.g. loop induction operators) that the emitter
    /// removes again after use.
    pub fn make_non_owning(&mut self, ctx: BuildContext, payload: ElementPayload) -> ElementId {
        let id = self.make(ctx, payload);
        self.expect_mut(id).non_owning = true;
        id
    }

    pub fn make_program(&mut self, span: Span) -> ElementId {
        self.make(
            BuildContext::new(None, None, span),
            ElementPayload::Program {
                modules: Vec::new(),
            },
        )
    }

    pub fn make_module(&mut self, ctx: BuildContext, name: &str, block: ElementId) -> ElementId {
        self.make(
            ctx,
            ElementPayload::Module {
                name: name.to_string(),
                block,
            },
        )
    }

    pub fn make_namespace(&mut self, ctx: BuildContext, name: &str, block: ElementId) -> ElementId {
        self.make(
            ctx,
            ElementPayload::Namespace {
                name: name.to_string(),
                block,
            },
        )
    }

    pub fn make_block(&mut self, ctx: BuildContext, scope: ScopeId) -> ElementId {
        self.make(
            ctx,
            ElementPayload::Block {
                scope,
                statements: Vec::new(),
            },
        )
    }

    pub fn make_statement(
        &mut self,
        ctx: BuildContext,
        expression: Option<ElementId>,
        labels: Vec<String>,
    ) -> ElementId {
        self.make(ctx, ElementPayload::Statement { expression, labels })
    }

    pub fn make_expression(&mut self, ctx: BuildContext, root: ElementId) -> ElementId {
        self.make(ctx, ElementPayload::Expression { root })
    }

    pub fn make_declaration(&mut self, ctx: BuildContext, identifier: ElementId) -> ElementId {
        self.make(ctx, ElementPayload::Declaration { identifier })
    }

    pub fn make_identifier(
        &mut self,
        ctx: BuildContext,
        symbol: QualifiedSymbol,
        type_ref: Option<TypeId>,
        initializer: Option<ElementId>,
        constant: bool,
    ) -> ElementId {
        self.make(
            ctx,
            ElementPayload::Identifier {
                symbol,
                type_ref,
                type_symbol: None,
                initializer,
                constant,
            },
        )
    }

    /// Records the declared type name on an identifier whose type could
    /// not be resolved at evaluation time.
    pub fn set_declared_type_symbol(&mut self, identifier: ElementId, symbol: QualifiedSymbol) {
        if let ElementPayload::Identifier { type_symbol, .. } =
            &mut self.expect_mut(identifier).payload
        {
            *type_symbol = Some(symbol);
        }
    }

    pub fn make_identifier_reference(
        &mut self,
        ctx: BuildContext,
        symbol: QualifiedSymbol,
        identifier: Option<ElementId>,
    ) -> ElementId {
        self.make(
            ctx,
            ElementPayload::IdentifierReference { symbol, identifier },
        )
    }

    pub fn make_initializer(&mut self, ctx: BuildContext, expression: ElementId) -> ElementId {
        self.make(ctx, ElementPayload::Initializer { expression })
    }

    pub fn make_integer_literal(
        &mut self,
        ctx: BuildContext,
        value: u64,
        negative: bool,
    ) -> ElementId {
        self.make(ctx, ElementPayload::IntegerLiteral { value, negative })
    }

    pub fn make_float_literal(&mut self, ctx: BuildContext, value: f64) -> ElementId {
        self.make(ctx, ElementPayload::FloatLiteral { value })
    }

    pub fn make_string_literal(&mut self, ctx: BuildContext, value: &str) -> ElementId {
        self.make(
            ctx,
            ElementPayload::StringLiteral {
                value: value.to_string(),
            },
        )
    }

    pub fn make_boolean_literal(&mut self, ctx: BuildContext, value: bool) -> ElementId {
        self.make(ctx, ElementPayload::BooleanLiteral { value })
    }

    pub fn make_character_literal(&mut self, ctx: BuildContext, value: char) -> ElementId {
        self.make(ctx, ElementPayload::CharacterLiteral { value })
    }

    pub fn make_nil_literal(&mut self, ctx: BuildContext) -> ElementId {
        self.make(ctx, ElementPayload::NilLiteral)
    }

    pub fn make_uninitialized_literal(&mut self, ctx: BuildContext) -> ElementId {
        self.make(ctx, ElementPayload::UninitializedLiteral)
    }

    pub fn make_type_literal(&mut self, ctx: BuildContext, ty: TypeId) -> ElementId {
        self.make(ctx, ElementPayload::TypeLiteral { ty })
    }

    pub fn make_unary_operator(
        &mut self,
        ctx: BuildContext,
        op: UnaryOp,
        rhs: ElementId,
    ) -> ElementId {
        self.make(ctx, ElementPayload::UnaryOperator { op, rhs })
    }

    pub fn make_binary_operator(
        &mut self,
        ctx: BuildContext,
        op: BinaryOp,
        lhs: ElementId,
        rhs: ElementId,
    ) -> ElementId {
        self.make(ctx, ElementPayload::BinaryOperator { op, lhs, rhs })
    }

    pub fn make_if(
        &mut self,
        ctx: BuildContext,
        predicate: ElementId,
        true_branch: ElementId,
        false_branch: Option<ElementId>,
    ) -> ElementId {
        self.make(
            ctx,
            ElementPayload::If {
                predicate,
                true_branch,
                false_branch,
            },
        )
    }

    pub fn make_while(
        &mut self,
        ctx: BuildContext,
        predicate: ElementId,
        body: ElementId,
    ) -> ElementId {
        self.make(ctx, ElementPayload::While { predicate, body })
    }

    #[allow(clippy::too_many_arguments)]
    pub fn make_for(
        &mut self,
        ctx: BuildContext,
        induction: ElementId,
        start: ElementId,
        stop: ElementId,
        step: ElementId,
        dir: u8,
        kind: u8,
        body: ElementId,
    ) -> ElementId {
        self.make(
            ctx,
            ElementPayload::For {
                induction,
                start,
                stop,
                step,
                dir,
                kind,
                body,
            },
        )
    }

    pub fn make_switch(
        &mut self,
        ctx: BuildContext,
        scrutinee: ElementId,
        cases: Vec<ElementId>,
    ) -> ElementId {
        self.make(ctx, ElementPayload::Switch { scrutinee, cases })
    }

    pub fn make_case(
        &mut self,
        ctx: BuildContext,
        expression: Option<ElementId>,
        body: ElementId,
    ) -> ElementId {
        self.make(ctx, ElementPayload::Case { expression, body })
    }

    pub fn make_break(&mut self, ctx: BuildContext, label: Option<String>) -> ElementId {
        self.make(ctx, ElementPayload::Break { label })
    }

    pub fn make_continue(&mut self, ctx: BuildContext, label: Option<String>) -> ElementId {
        self.make(ctx, ElementPayload::Continue { label })
    }

    pub fn make_return(&mut self, ctx: BuildContext, expression: Option<ElementId>) -> ElementId {
        self.make(ctx, ElementPayload::Return { expression })
    }

    pub fn make_defer(&mut self, ctx: BuildContext, expression: ElementId) -> ElementId {
        self.make(ctx, ElementPayload::Defer { expression })
    }

    pub fn make_with(
        &mut self,
        ctx: BuildContext,
        expression: ElementId,
        body: ElementId,
    ) -> ElementId {
        self.make(ctx, ElementPayload::With { expression, body })
    }

    pub fn make_fallthrough(&mut self, ctx: BuildContext) -> ElementId {
        self.make(ctx, ElementPayload::Fallthrough)
    }

    pub fn make_label(&mut self, ctx: BuildContext, name: &str) -> ElementId {
        self.make(
            ctx,
            ElementPayload::Label {
                name: name.to_string(),
            },
        )
    }

    pub fn make_label_reference(&mut self, ctx: BuildContext, name: &str) -> ElementId {
        self.make(
            ctx,
            ElementPayload::LabelReference {
                name: name.to_string(),
            },
        )
    }

    pub fn make_assembly_label(&mut self, ctx: BuildContext, name: &str) -> ElementId {
        self.make(
            ctx,
            ElementPayload::AssemblyLabel {
                name: name.to_string(),
            },
        )
    }

    pub fn make_module_reference(
        &mut self,
        ctx: BuildContext,
        module: Option<ElementId>,
    ) -> ElementId {
        self.make(ctx, ElementPayload::ModuleReference { module })
    }

    pub fn make_raw_block(&mut self, ctx: BuildContext, source: &str) -> ElementId {
        self.make(
            ctx,
            ElementPayload::RawBlock {
                source: source.to_string(),
            },
        )
    }

    pub fn make_import(
        &mut self,
        ctx: BuildContext,
        symbol: QualifiedSymbol,
        module_reference: Option<ElementId>,
    ) -> ElementId {
        self.make(
            ctx,
            ElementPayload::Import {
                symbol,
                module_reference,
            },
        )
    }

    pub fn make_cast(&mut self, ctx: BuildContext, target: TypeId, expression: ElementId) -> ElementId {
        self.make(ctx, ElementPayload::Cast { target, expression })
    }

    pub fn make_transmute(
        &mut self,
        ctx: BuildContext,
        target: TypeId,
        expression: ElementId,
    ) -> ElementId {
        self.make(ctx, ElementPayload::Transmute { target, expression })
    }

    pub fn make_intrinsic(
        &mut self,
        ctx: BuildContext,
        kind: IntrinsicKind,
        arguments: ElementId,
    ) -> ElementId {
        self.make(ctx, ElementPayload::Intrinsic { kind, arguments })
    }

    pub fn make_argument_list(&mut self, ctx: BuildContext, arguments: Vec<ElementId>) -> ElementId {
        self.make(ctx, ElementPayload::ArgumentList { arguments })
    }

    pub fn make_argument_pair(
        &mut self,
        ctx: BuildContext,
        name: Option<String>,
        value: ElementId,
    ) -> ElementId {
        self.make(ctx, ElementPayload::ArgumentPair { name, value })
    }

    pub fn make_field(&mut self, ctx: BuildContext, identifier: ElementId) -> ElementId {
        self.make(ctx, ElementPayload::Field { identifier })
    }

    pub fn make_attribute(
        &mut self,
        ctx: BuildContext,
        name: &str,
        value: Option<ElementId>,
    ) -> ElementId {
        self.make(
            ctx,
            ElementPayload::Attribute {
                name: name.to_string(),
                value,
            },
        )
    }

    pub fn make_directive(
        &mut self,
        ctx: BuildContext,
        name: &str,
        expression: Option<ElementId>,
    ) -> ElementId {
        self.make(
            ctx,
            ElementPayload::Directive {
                name: name.to_string(),
                expression,
            },
        )
    }

    pub fn make_type_reference(&mut self, ctx: BuildContext, referenced: TypeId) -> ElementId {
        self.make(
            ctx,
            ElementPayload::TypeReference {
                referenced,
                fields: Vec::new(),
            },
        )
    }

    /// Type reference owning the field elements of a composite
    /// declaration.
    pub fn make_composite_type_reference(
        &mut self,
        ctx: BuildContext,
        referenced: TypeId,
        fields: Vec<ElementId>,
    ) -> ElementId {
        self.make(ctx, ElementPayload::TypeReference { referenced, fields })
    }

    pub fn make_procedure_instance(
        &mut self,
        ctx: BuildContext,
        proc_type: TypeId,
        scope: ElementId,
        parameters: Vec<ElementId>,
    ) -> ElementId {
        self.make(
            ctx,
            ElementPayload::ProcedureInstance {
                proc_type,
                scope,
                parameters,
            },
        )
    }

    pub fn make_procedure_call(
        &mut self,
        ctx: BuildContext,
        reference: ElementId,
        arguments: ElementId,
    ) -> ElementId {
        self.make(
            ctx,
            ElementPayload::ProcedureCall {
                reference,
                arguments,
                proc_type: None,
                instance: None,
            },
        )
    }

    pub fn make_symbol_element(&mut self, ctx: BuildContext, symbol: QualifiedSymbol) -> ElementId {
        self.make(ctx, ElementPayload::SymbolElement { symbol })
    }
}
