#![forbid(unsafe_code)]

use std::collections::BTreeMap;

use basecode_ast::Span;

use crate::scope::ScopeId;
use crate::symbols::QualifiedSymbol;
use crate::types::TypeId;

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ElementId(pub u32);

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum UnaryOp {
    Negate,
    BinaryNot,
    LogicalNot,
    PointerDereference,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BinaryOp {
    Add,
    Subtract,
    Multiply,
    Divide,
    Modulo,
    Exponent,
    Equals,
    NotEquals,
    LessThan,
    LessThanOrEqual,
    GreaterThan,
    GreaterThanOrEqual,
    LogicalAnd,
    LogicalOr,
    BinaryAnd,
    BinaryOr,
    BinaryXor,
    ShiftLeft,
    ShiftRight,
    RotateLeft,
    RotateRight,
    MemberAccess,
    Subscript,
    Assignment,
}

impl BinaryOp {
    pub fn is_arithmetic(self) -> bool {
        matches!(
            self,
            BinaryOp::Add
                | BinaryOp::Subtract
                | BinaryOp::Multiply
                | BinaryOp::Divide
                | BinaryOp::Modulo
                | BinaryOp::Exponent
                | BinaryOp::BinaryAnd
                | BinaryOp::BinaryOr
                | BinaryOp::BinaryXor
                | BinaryOp::ShiftLeft
                | BinaryOp::ShiftRight
                | BinaryOp::RotateLeft
                | BinaryOp::RotateRight
        )
    }

    pub fn is_relational(self) -> bool {
        matches!(
            self,
            BinaryOp::Equals
                | BinaryOp::NotEquals
                | BinaryOp::LessThan
                | BinaryOp::LessThanOrEqual
                | BinaryOp::GreaterThan
                | BinaryOp::GreaterThanOrEqual
        )
    }

    pub fn is_logical(self) -> bool {
        matches!(self, BinaryOp::LogicalAnd | BinaryOp::LogicalOr)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum IntrinsicKind {
    SizeOf,
    AddressOf,
    TypeOf,
    Alloc,
    Free,
    Fill,
    Copy,
    Range,
}

impl IntrinsicKind {
    pub fn from_name(name: &str) -> Option<Self> {
        Some(match name {
            "size_of" => IntrinsicKind::SizeOf,
            "address_of" => IntrinsicKind::AddressOf,
            "type_of" => IntrinsicKind::TypeOf,
            "alloc" => IntrinsicKind::Alloc,
            "free" => IntrinsicKind::Free,
            "fill" => IntrinsicKind::Fill,
            "copy" => IntrinsicKind::Copy,
            "range" => IntrinsicKind::Range,
            _ => return None,
        })
    }

    pub fn name(self) -> &'static str {
        match self {
            IntrinsicKind::SizeOf => "size_of",
            IntrinsicKind::AddressOf => "address_of",
            IntrinsicKind::TypeOf => "type_of",
            IntrinsicKind::Alloc => "alloc",
            IntrinsicKind::Free => "free",
            IntrinsicKind::Fill => "fill",
            IntrinsicKind::Copy => "copy",
            IntrinsicKind::Range => "range",
        }
    }

    /// Inclusive argument-count bounds validated at evaluation time.
    pub fn arity(self) -> (usize, usize) {
        match self {
            IntrinsicKind::SizeOf
            | IntrinsicKind::AddressOf
            | IntrinsicKind::TypeOf
            | IntrinsicKind::Alloc
            | IntrinsicKind::Free => (1, 1),
            IntrinsicKind::Fill | IntrinsicKind::Copy => (3, 3),
            IntrinsicKind::Range => (2, 5),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ElementKind {
    Program,
    Module,
    Namespace,
    Block,
    Statement,
    Expression,
    Declaration,
    Identifier,
    IdentifierReference,
    Initializer,
    IntegerLiteral,
    FloatLiteral,
    StringLiteral,
    BooleanLiteral,
    CharacterLiteral,
    NilLiteral,
    UninitializedLiteral,
    TypeLiteral,
    UnaryOperator,
    BinaryOperator,
    If,
    While,
    For,
    Switch,
    Case,
    Break,
    Continue,
    Return,
    Defer,
    With,
    Fallthrough,
    Label,
    LabelReference,
    AssemblyLabel,
    ModuleReference,
    RawBlock,
    Import,
    Cast,
    Transmute,
    Intrinsic,
    ArgumentList,
    ArgumentPair,
    Field,
    Attribute,
    Directive,
    TypeReference,
    ProcedureInstance,
    ProcedureCall,
    SymbolElement,
}

impl ElementKind {
    pub fn name(self) -> &'static str {
        match self {
            ElementKind::Program => "program",
            ElementKind::Module => "module",
            ElementKind::Namespace => "namespace",
            ElementKind::Block => "block",
            ElementKind::Statement => "statement",
            ElementKind::Expression => "expression",
            ElementKind::Declaration => "declaration",
            ElementKind::Identifier => "identifier",
            ElementKind::IdentifierReference => "identifier_reference",
            ElementKind::Initializer => "initializer",
            ElementKind::IntegerLiteral => "integer_literal",
            ElementKind::FloatLiteral => "float_literal",
            ElementKind::StringLiteral => "string_literal",
            ElementKind::BooleanLiteral => "boolean_literal",
            ElementKind::CharacterLiteral => "character_literal",
            ElementKind::NilLiteral => "nil_literal",
            ElementKind::UninitializedLiteral => "uninitialized_literal",
            ElementKind::TypeLiteral => "type_literal",
            ElementKind::UnaryOperator => "unary_operator",
            ElementKind::BinaryOperator => "binary_operator",
            ElementKind::If => "if",
            ElementKind::While => "while",
            ElementKind::For => "for",
            ElementKind::Switch => "switch",
            ElementKind::Case => "case",
            ElementKind::Break => "break",
            ElementKind::Continue => "continue",
            ElementKind::Return => "return",
            ElementKind::Defer => "defer",
            ElementKind::With => "with",
            ElementKind::Fallthrough => "fallthrough",
            ElementKind::Label => "label",
            ElementKind::LabelReference => "label_reference",
            ElementKind::AssemblyLabel => "assembly_label",
            ElementKind::ModuleReference => "module_reference",
            ElementKind::RawBlock => "raw_block",
            ElementKind::Import => "import",
            ElementKind::Cast => "cast",
            ElementKind::Transmute => "transmute",
            ElementKind::Intrinsic => "intrinsic",
            ElementKind::ArgumentList => "argument_list",
            ElementKind::ArgumentPair => "argument_pair",
            ElementKind::Field => "field",
            ElementKind::Attribute => "attribute",
            ElementKind::Directive => "directive",
            ElementKind::TypeReference => "type_reference",
            ElementKind::ProcedureInstance => "proc_instance",
            ElementKind::ProcedureCall => "proc_call",
            ElementKind::SymbolElement => "symbol",
        }
    }
}

/// Kind-specific payload. Cross-references are element ids, never direct
/// handles; ownership flows strictly from the map.
#[derive(Clone, Debug)]
pub enum ElementPayload {
    Program {
        modules: Vec<ElementId>,
    },
    Module {
        name: String,
        block: ElementId,
    },
    Namespace {
        name: String,
        block: ElementId,
    },
    Block {
        scope: ScopeId,
        statements: Vec<ElementId>,
    },
    Statement {
        expression: Option<ElementId>,
        labels: Vec<String>,
    },
    Expression {
        root: ElementId,
    },
    Declaration {
        identifier: ElementId,
    },
    Identifier {
        symbol: QualifiedSymbol,
        type_ref: Option<TypeId>,
        /// Declared type name, kept for late resolution when the type was
        /// not registered yet at evaluation time.
        type_symbol: Option<QualifiedSymbol>,
        initializer: Option<ElementId>,
        constant: bool,
    },
    IdentifierReference {
        symbol: QualifiedSymbol,
        identifier: Option<ElementId>,
    },
    Initializer {
        expression: ElementId,
    },
    IntegerLiteral {
        value: u64,
        negative: bool,
    },
    FloatLiteral {
        value: f64,
    },
    StringLiteral {
        value: String,
    },
    BooleanLiteral {
        value: bool,
    },
    CharacterLiteral {
        value: char,
    },
    NilLiteral,
    UninitializedLiteral,
    TypeLiteral {
        ty: TypeId,
    },
    UnaryOperator {
        op: UnaryOp,
        rhs: ElementId,
    },
    BinaryOperator {
        op: BinaryOp,
        lhs: ElementId,
        rhs: ElementId,
    },
    If {
        predicate: ElementId,
        true_branch: ElementId,
        false_branch: Option<ElementId>,
    },
    While {
        predicate: ElementId,
        body: ElementId,
    },
    For {
        induction: ElementId,
        start: ElementId,
        stop: ElementId,
        step: ElementId,
        dir: u8,
        kind: u8,
        body: ElementId,
    },
    Switch {
        scrutinee: ElementId,
        cases: Vec<ElementId>,
    },
    Case {
        expression: Option<ElementId>,
        body: ElementId,
    },
    Break {
        label: Option<String>,
    },
    Continue {
        label: Option<String>,
    },
    Return {
        expression: Option<ElementId>,
    },
    Defer {
        expression: ElementId,
    },
    With {
        expression: ElementId,
        body: ElementId,
    },
    Fallthrough,
    Label {
        name: String,
    },
    LabelReference {
        name: String,
    },
    AssemblyLabel {
        name: String,
    },
    ModuleReference {
        module: Option<ElementId>,
    },
    RawBlock {
        source: String,
    },
    Import {
        symbol: QualifiedSymbol,
        module_reference: Option<ElementId>,
    },
    Cast {
        target: TypeId,
        expression: ElementId,
    },
    Transmute {
        target: TypeId,
        expression: ElementId,
    },
    Intrinsic {
        kind: IntrinsicKind,
        arguments: ElementId,
    },
    ArgumentList {
        arguments: Vec<ElementId>,
    },
    ArgumentPair {
        name: Option<String>,
        value: ElementId,
    },
    Field {
        identifier: ElementId,
    },
    Attribute {
        name: String,
        value: Option<ElementId>,
    },
    Directive {
        name: String,
        expression: Option<ElementId>,
    },
    TypeReference {
        referenced: TypeId,
        /// Field elements of a composite type declaration; owned here so
        /// the ownership forest reaches them.
        fields: Vec<ElementId>,
    },
    ProcedureInstance {
        proc_type: TypeId,
        scope: ElementId,
        /// Parameter identifier elements, owned here so the ownership
        /// forest reaches them.
        parameters: Vec<ElementId>,
    },
    ProcedureCall {
        reference: ElementId,
        arguments: ElementId,
        proc_type: Option<TypeId>,
        instance: Option<ElementId>,
    },
    SymbolElement {
        symbol: QualifiedSymbol,
    },
}

impl ElementPayload {
    pub fn kind(&self) -> ElementKind {
        match self {
            ElementPayload::Program { .. } => ElementKind::Program,
            ElementPayload::Module { .. } => ElementKind::Module,
            ElementPayload::Namespace { .. } => ElementKind::Namespace,
            ElementPayload::Block { .. } => ElementKind::Block,
            ElementPayload::Statement { .. } => ElementKind::Statement,
            ElementPayload::Expression { .. } => ElementKind::Expression,
            ElementPayload::Declaration { .. } => ElementKind::Declaration,
            ElementPayload::Identifier { .. } => ElementKind::Identifier,
            ElementPayload::IdentifierReference { .. } => ElementKind::IdentifierReference,
            ElementPayload::Initializer { .. } => ElementKind::Initializer,
            ElementPayload::IntegerLiteral { .. } => ElementKind::IntegerLiteral,
            ElementPayload::FloatLiteral { .. } => ElementKind::FloatLiteral,
            ElementPayload::StringLiteral { .. } => ElementKind::StringLiteral,
            ElementPayload::BooleanLiteral { .. } => ElementKind::BooleanLiteral,
            ElementPayload::CharacterLiteral { .. } => ElementKind::CharacterLiteral,
            ElementPayload::NilLiteral => ElementKind::NilLiteral,
            ElementPayload::UninitializedLiteral => ElementKind::UninitializedLiteral,
            ElementPayload::TypeLiteral { .. } => ElementKind::TypeLiteral,
            ElementPayload::UnaryOperator { .. } => ElementKind::UnaryOperator,
            ElementPayload::BinaryOperator { .. } => ElementKind::BinaryOperator,
            ElementPayload::If { .. } => ElementKind::If,
            ElementPayload::While { .. } => ElementKind::While,
            ElementPayload::For { .. } => ElementKind::For,
            ElementPayload::Switch { .. } => ElementKind::Switch,
            ElementPayload::Case { .. } => ElementKind::Case,
            ElementPayload::Break { .. } => ElementKind::Break,
            ElementPayload::Continue { .. } => ElementKind::Continue,
            ElementPayload::Return { .. } => ElementKind::Return,
            ElementPayload::Defer { .. } => ElementKind::Defer,
            ElementPayload::With { .. } => ElementKind::With,
            ElementPayload::Fallthrough => ElementKind::Fallthrough,
            ElementPayload::Label { .. } => ElementKind::Label,
            ElementPayload::LabelReference { .. } => ElementKind::LabelReference,
            ElementPayload::AssemblyLabel { .. } => ElementKind::AssemblyLabel,
            ElementPayload::ModuleReference { .. } => ElementKind::ModuleReference,
            ElementPayload::RawBlock { .. } => ElementKind::RawBlock,
            ElementPayload::Import { .. } => ElementKind::Import,
            ElementPayload::Cast { .. } => ElementKind::Cast,
            ElementPayload::Transmute { .. } => ElementKind::Transmute,
            ElementPayload::Intrinsic { .. } => ElementKind::Intrinsic,
            ElementPayload::ArgumentList { .. } => ElementKind::ArgumentList,
            ElementPayload::ArgumentPair { .. } => ElementKind::ArgumentPair,
            ElementPayload::Field { .. } => ElementKind::Field,
            ElementPayload::Attribute { .. } => ElementKind::Attribute,
            ElementPayload::Directive { .. } => ElementKind::Directive,
            ElementPayload::TypeReference { .. } => ElementKind::TypeReference,
            ElementPayload::ProcedureInstance { .. } => ElementKind::ProcedureInstance,
            ElementPayload::ProcedureCall { .. } => ElementKind::ProcedureCall,
            ElementPayload::SymbolElement { .. } => ElementKind::SymbolElement,
        }
    }
}

#[derive(Clone, Debug)]
pub struct Element {
    pub id: ElementId,
    pub module: Option<ElementId>,
    pub parent_scope: Option<ScopeId>,
    pub span: Span,
    pub attributes: Vec<ElementId>,
    pub comments: Vec<String>,
    pub payload: ElementPayload,
    /// Synthetic helpers the emitter creates and removes again; exempt
    /// from ownership validation.
    pub non_owning: bool,
    /// Inferred-type slot, filled by the resolution fixpoint.
    pub inferred: Option<TypeId>,
}

impl Element {
    pub fn kind(&self) -> ElementKind {
        self.payload.kind()
    }

    /// Machine label stem, e.g. `if_12`, `proc_call_7`.
    pub fn label_name(&self) -> String {
        format!("{}_{}", self.kind().name(), self.id.0)
    }

    /// Ids this element owns, in declaration order. The owned-children
    /// relation forms a forest anchored at the program element.
    pub fn owned_children(&self) -> Vec<ElementId> {
        let mut out = self.attributes.clone();
        match &self.payload {
            ElementPayload::Program { modules } => out.extend(modules),
            ElementPayload::Module { block, .. } => out.push(*block),
            ElementPayload::Namespace { block, .. } => out.push(*block),
            ElementPayload::Block { statements, .. } => out.extend(statements),
            ElementPayload::Statement { expression, .. } => out.extend(*expression),
            ElementPayload::Expression { root } => out.push(*root),
            ElementPayload::Declaration { identifier } => out.push(*identifier),
            ElementPayload::Identifier { initializer, .. } => out.extend(*initializer),
            ElementPayload::Initializer { expression } => out.push(*expression),
            ElementPayload::UnaryOperator { rhs, .. } => out.push(*rhs),
            ElementPayload::BinaryOperator { lhs, rhs, .. } => {
                out.push(*lhs);
                out.push(*rhs);
            }
            ElementPayload::If {
                predicate,
                true_branch,
                false_branch,
            } => {
                out.push(*predicate);
                out.push(*true_branch);
                out.extend(*false_branch);
            }
            ElementPayload::While { predicate, body } => {
                out.push(*predicate);
                out.push(*body);
            }
            ElementPayload::For {
                induction,
                stop,
                step,
                body,
                ..
            } => {
                // `start` is owned through the induction declaration's
                // initializer, not listed again here.
                out.push(*induction);
                out.push(*stop);
                out.push(*step);
                out.push(*body);
            }
            ElementPayload::Switch { scrutinee, cases } => {
                out.push(*scrutinee);
                out.extend(cases);
            }
            ElementPayload::Case { expression, body } => {
                out.extend(*expression);
                out.push(*body);
            }
            ElementPayload::Return { expression } => out.extend(*expression),
            ElementPayload::Defer { expression } => out.push(*expression),
            ElementPayload::With { expression, body } => {
                out.push(*expression);
                out.push(*body);
            }
            ElementPayload::Cast { expression, .. }
            | ElementPayload::Transmute { expression, .. } => out.push(*expression),
            ElementPayload::Intrinsic { arguments, .. } => out.push(*arguments),
            ElementPayload::ArgumentList { arguments } => out.extend(arguments),
            ElementPayload::ArgumentPair { value, .. } => out.push(*value),
            ElementPayload::Field { identifier } => out.push(*identifier),
            ElementPayload::Attribute { value, .. } => out.extend(*value),
            ElementPayload::Directive { expression, .. } => out.extend(*expression),
            ElementPayload::ProcedureInstance {
                scope, parameters, ..
            } => {
                out.extend(parameters);
                out.push(*scope);
            }
            ElementPayload::ProcedureCall {
                reference,
                arguments,
                ..
            } => {
                out.push(*reference);
                out.push(*arguments);
            }
            ElementPayload::TypeReference { fields, .. } => out.extend(fields),
            ElementPayload::Import { .. }
            | ElementPayload::ModuleReference { .. }
            | ElementPayload::IdentifierReference { .. }
            | ElementPayload::IntegerLiteral { .. }
            | ElementPayload::FloatLiteral { .. }
            | ElementPayload::StringLiteral { .. }
            | ElementPayload::BooleanLiteral { .. }
            | ElementPayload::CharacterLiteral { .. }
            | ElementPayload::NilLiteral
            | ElementPayload::UninitializedLiteral
            | ElementPayload::TypeLiteral { .. }
            | ElementPayload::Break { .. }
            | ElementPayload::Continue { .. }
            | ElementPayload::Fallthrough
            | ElementPayload::Label { .. }
            | ElementPayload::LabelReference { .. }
            | ElementPayload::AssemblyLabel { .. }
            | ElementPayload::RawBlock { .. }
            | ElementPayload::SymbolElement { .. } => {}
        }
        out
    }
}

/// Arena-like store of semantic nodes addressed by stable ids; the single
/// owner of every element's lifetime.
#[derive(Debug, Default)]
pub struct ElementMap {
    items: BTreeMap<ElementId, Element>,
    next_id: u32,
}

impl ElementMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn allocate_id(&mut self) -> ElementId {
        let id = ElementId(self.next_id);
        self.next_id += 1;
        id
    }

    pub(crate) fn insert(&mut self, element: Element) -> ElementId {
        let id = element.id;
        self.items.insert(id, element);
        id
    }

    pub fn get(&self, id: ElementId) -> Option<&Element> {
        self.items.get(&id)
    }

    pub fn get_mut(&mut self, id: ElementId) -> Option<&mut Element> {
        self.items.get_mut(&id)
    }

    /// Lookup that must succeed; a missing id here is a programming error,
    /// not a diagnostic.
    pub fn expect(&self, id: ElementId) -> &Element {
        self.items
            .get(&id)
            .unwrap_or_else(|| panic!("element map: unknown id {}", id.0))
    }

    pub fn expect_mut(&mut self, id: ElementId) -> &mut Element {
        self.items
            .get_mut(&id)
            .unwrap_or_else(|| panic!("element map: unknown id {}", id.0))
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Ids of every element of `kind`, in id order (stable across runs).
    pub fn find_by_kind(&self, kind: ElementKind) -> Vec<ElementId> {
        self.items
            .values()
            .filter(|e| e.kind() == kind)
            .map(|e| e.id)
            .collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Element> {
        self.items.values()
    }

    /// Detaches `id` and every element it owns, recursively.
    pub fn remove(&mut self, id: ElementId) {
        let Some(element) = self.items.remove(&id) else {
            return;
        };
        for child in element.owned_children() {
            self.remove(child);
        }
    }

    /// Removal for synthetic helpers: descends only into children that
    /// are themselves non-owning, leaving borrowed subtrees in place.
    pub fn remove_non_owning(&mut self, id: ElementId) {
        let Some(element) = self.items.get(&id) else {
            return;
        };
        assert!(
            element.non_owning,
            "remove_non_owning on owned element {}",
            id.0
        );
        let children = element.owned_children();
        self.items.remove(&id);
        for child in children {
            if self.items.get(&child).map(|c| c.non_owning).unwrap_or(false) {
                self.remove_non_owning(child);
            }
        }
    }

    /// True when the element folds to a compile-time constant.
    pub fn is_constant(&self, id: ElementId) -> bool {
        let Some(element) = self.get(id) else {
            return false;
        };
        match &element.payload {
            ElementPayload::IntegerLiteral { .. }
            | ElementPayload::FloatLiteral { .. }
            | ElementPayload::StringLiteral { .. }
            | ElementPayload::BooleanLiteral { .. }
            | ElementPayload::CharacterLiteral { .. }
            | ElementPayload::NilLiteral
            | ElementPayload::TypeLiteral { .. } => true,
            ElementPayload::Expression { root } => self.is_constant(*root),
            ElementPayload::Initializer { expression } => self.is_constant(*expression),
            ElementPayload::Identifier {
                constant,
                initializer,
                ..
            } => *constant && initializer.map(|i| self.is_constant(i)).unwrap_or(false),
            ElementPayload::IdentifierReference { identifier, .. } => identifier
                .map(|i| self.is_constant(i))
                .unwrap_or(false),
            ElementPayload::UnaryOperator { rhs, .. } => self.is_constant(*rhs),
            ElementPayload::BinaryOperator { op, lhs, rhs } => {
                (op.is_arithmetic() || op.is_relational())
                    && self.is_constant(*lhs)
                    && self.is_constant(*rhs)
            }
            _ => false,
        }
    }

    pub fn as_integer(&self, id: ElementId) -> Option<u64> {
        match &self.get(id)?.payload {
            ElementPayload::IntegerLiteral {
                value,
                negative: false,
            } => Some(*value),
            ElementPayload::BooleanLiteral { value } => Some(u64::from(*value)),
            ElementPayload::CharacterLiteral { value } => Some(*value as u64),
            ElementPayload::Expression { root } => self.as_integer(*root),
            ElementPayload::Initializer { expression } => self.as_integer(*expression),
            ElementPayload::Identifier {
                initializer: Some(init),
                constant: true,
                ..
            } => self.as_integer(*init),
            ElementPayload::IdentifierReference {
                identifier: Some(identifier),
                ..
            } => self.as_integer(*identifier),
            _ => None,
        }
    }

    pub fn as_signed_integer(&self, id: ElementId) -> Option<i64> {
        match &self.get(id)?.payload {
            ElementPayload::IntegerLiteral { value, negative } => {
                let magnitude = i64::try_from(*value).ok()?;
                Some(if *negative { -magnitude } else { magnitude })
            }
            ElementPayload::Expression { root } => self.as_signed_integer(*root),
            ElementPayload::Initializer { expression } => self.as_signed_integer(*expression),
            _ => None,
        }
    }

    pub fn as_float(&self, id: ElementId) -> Option<f64> {
        match &self.get(id)?.payload {
            ElementPayload::FloatLiteral { value } => Some(*value),
            ElementPayload::Expression { root } => self.as_float(*root),
            ElementPayload::Initializer { expression } => self.as_float(*expression),
            ElementPayload::Identifier {
                initializer: Some(init),
                constant: true,
                ..
            } => self.as_float(*init),
            _ => None,
        }
    }

    pub fn as_string(&self, id: ElementId) -> Option<&str> {
        match &self.get(id)?.payload {
            ElementPayload::StringLiteral { value } => Some(value.as_str()),
            ElementPayload::Expression { root } => self.as_string(*root),
            ElementPayload::Initializer { expression } => self.as_string(*expression),
            _ => None,
        }
    }

    pub fn as_bool(&self, id: ElementId) -> Option<bool> {
        match &self.get(id)?.payload {
            ElementPayload::BooleanLiteral { value } => Some(*value),
            ElementPayload::Expression { root } => self.as_bool(*root),
            ElementPayload::Initializer { expression } => self.as_bool(*expression),
            _ => None,
        }
    }

    /// Every live element must be reachable from the program root through
    /// owned-children edges; returns the orphans otherwise.
    pub fn validate_ownership(&self, root: ElementId) -> Result<(), Vec<ElementId>> {
        let mut reached = std::collections::BTreeSet::new();
        let mut stack = vec![root];
        while let Some(id) = stack.pop() {
            if !reached.insert(id) {
                continue;
            }
            if let Some(element) = self.get(id) {
                stack.extend(element.owned_children());
            }
        }
        let orphans: Vec<ElementId> = self
            .items
            .values()
            .filter(|e| !e.non_owning && !reached.contains(&e.id))
            .map(|e| e.id)
            .collect();
        if orphans.is_empty() {
            Ok(())
        } else {
            Err(orphans)
        }
    }
}
