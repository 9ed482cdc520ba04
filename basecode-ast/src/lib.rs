#![forbid(unsafe_code)]

use miette::SourceSpan;

pub type Span = SourceSpan;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Spanned<T> {
    pub span: Span,
    pub node: T,
}

impl<T> Spanned<T> {
    pub fn new(span: Span, node: T) -> Self {
        Self { span, node }
    }

    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> Spanned<U> {
        Spanned {
            span: self.span,
            node: f(self.node),
        }
    }
}

pub fn span(start: usize, len: usize) -> Span {
    SourceSpan::new(start.into(), len)
}

pub fn span_between(start: usize, end: usize) -> Span {
    debug_assert!(end >= start);
    span(start, end - start)
}

/// The node kinds a conforming parser may deliver. The compiler core
/// consumes this tree immutably; nothing here survives past evaluation.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum AstKind {
    Module,
    Namespace,
    Block,
    Statement,
    Expression,
    If,
    ElseIf,
    Else,
    While,
    ForIn,
    Switch,
    Case,
    Break,
    Continue,
    Return,
    Defer,
    With,
    Fallthrough,
    Label,
    Declaration,
    Assignment,
    BinaryOperator,
    UnaryOperator,
    Cast,
    Transmute,
    ProcExpression,
    ProcCall,
    ParameterList,
    ArgumentList,
    ArgumentPair,
    ReturnParameterList,
    TypeIdentifier,
    StructExpression,
    UnionExpression,
    EnumExpression,
    Subscript,
    Symbol,
    SymbolPart,
    Import,
    Directive,
    Attribute,
    RawBlock,
    ModuleExpression,
    NilLiteral,
    UninitializedLiteral,
    NumberLiteral,
    StringLiteral,
    BooleanLiteral,
    CharacterLiteral,
    LineComment,
    BlockComment,
}

impl AstKind {
    pub fn name(self) -> &'static str {
        match self {
            AstKind::Module => "module",
            AstKind::Namespace => "namespace",
            AstKind::Block => "block",
            AstKind::Statement => "statement",
            AstKind::Expression => "expression",
            AstKind::If => "if",
            AstKind::ElseIf => "else_if",
            AstKind::Else => "else",
            AstKind::While => "while",
            AstKind::ForIn => "for_in",
            AstKind::Switch => "switch",
            AstKind::Case => "case",
            AstKind::Break => "break",
            AstKind::Continue => "continue",
            AstKind::Return => "return",
            AstKind::Defer => "defer",
            AstKind::With => "with",
            AstKind::Fallthrough => "fallthrough",
            AstKind::Label => "label",
            AstKind::Declaration => "declaration",
            AstKind::Assignment => "assignment",
            AstKind::BinaryOperator => "binary_operator",
            AstKind::UnaryOperator => "unary_operator",
            AstKind::Cast => "cast",
            AstKind::Transmute => "transmute",
            AstKind::ProcExpression => "proc_expression",
            AstKind::ProcCall => "proc_call",
            AstKind::ParameterList => "parameter_list",
            AstKind::ArgumentList => "argument_list",
            AstKind::ArgumentPair => "argument_pair",
            AstKind::ReturnParameterList => "return_parameter_list",
            AstKind::TypeIdentifier => "type_identifier",
            AstKind::StructExpression => "struct_expression",
            AstKind::UnionExpression => "union_expression",
            AstKind::EnumExpression => "enum_expression",
            AstKind::Subscript => "subscript",
            AstKind::Symbol => "symbol",
            AstKind::SymbolPart => "symbol_part",
            AstKind::Import => "import",
            AstKind::Directive => "directive",
            AstKind::Attribute => "attribute",
            AstKind::RawBlock => "raw_block",
            AstKind::ModuleExpression => "module_expression",
            AstKind::NilLiteral => "nil_literal",
            AstKind::UninitializedLiteral => "uninitialized_literal",
            AstKind::NumberLiteral => "number_literal",
            AstKind::StringLiteral => "string_literal",
            AstKind::BooleanLiteral => "boolean_literal",
            AstKind::CharacterLiteral => "character_literal",
            AstKind::LineComment => "line_comment",
            AstKind::BlockComment => "block_comment",
        }
    }
}

/// Operators as the parser classifies them; the core maps these onto its
/// own operator elements during evaluation.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Operator {
    // unary
    Negate,
    BinaryNot,
    LogicalNot,
    PointerDereference,
    // binary
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

/// Token payload attached to literal and identifier nodes.
#[derive(Clone, Debug, PartialEq)]
pub enum Token {
    None,
    Name(String),
    Integer { value: u64, negative: bool },
    Float(f64),
    Str(String),
    Boolean(bool),
    Rune(char),
    Operator(Operator),
}

impl Token {
    pub fn as_name(&self) -> Option<&str> {
        match self {
            Token::Name(s) => Some(s.as_str()),
            _ => None,
        }
    }

    pub fn as_operator(&self) -> Option<Operator> {
        match self {
            Token::Operator(op) => Some(*op),
            _ => None,
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct AstNode {
    pub id: u32,
    pub kind: AstKind,
    pub token: Token,
    pub span: Span,
    pub lhs: Option<Box<AstNode>>,
    pub rhs: Option<Box<AstNode>>,
    pub children: Vec<AstNode>,
    pub attributes: Vec<AstNode>,
    pub is_pointer: bool,
    pub is_array: bool,
    pub is_spread: bool,
    pub is_constant: bool,
    pub is_foreign: bool,
}

impl AstNode {
    pub fn is_comment(&self) -> bool {
        matches!(self.kind, AstKind::LineComment | AstKind::BlockComment)
    }

    pub fn is_attribute(&self) -> bool {
        self.kind == AstKind::Attribute
    }

    pub fn is_qualified_symbol(&self) -> bool {
        self.kind == AstKind::Symbol && self.children.len() > 1
    }

    pub fn has_type_identifier(&self) -> bool {
        matches!(&self.rhs, Some(rhs) if rhs.kind == AstKind::TypeIdentifier)
    }

    pub fn name(&self) -> &'static str {
        self.kind.name()
    }
}

/// Stamps ids and fills the common fields so tests and the parser build
/// trees the same way. One constructor per node kind, mirroring what the
/// grammar can produce.
#[derive(Debug, Default)]
pub struct AstBuilder {
    next_id: u32,
}

impl AstBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    fn node(&mut self, kind: AstKind, token: Token, span: Span) -> AstNode {
        let id = self.next_id;
        self.next_id += 1;
        AstNode {
            id,
            kind,
            token,
            span,
            lhs: None,
            rhs: None,
            children: Vec::new(),
            attributes: Vec::new(),
            is_pointer: false,
            is_array: false,
            is_spread: false,
            is_constant: false,
            is_foreign: false,
        }
    }

    pub fn module_node(&mut self, span: Span) -> AstNode {
        self.node(AstKind::Module, Token::None, span)
    }

    pub fn namespace_node(&mut self, name: &str, span: Span) -> AstNode {
        self.node(AstKind::Namespace, Token::Name(name.to_string()), span)
    }

    pub fn block_node(&mut self, span: Span) -> AstNode {
        self.node(AstKind::Block, Token::None, span)
    }

    pub fn statement_node(&mut self, expr: AstNode) -> AstNode {
        let mut n = self.node(AstKind::Statement, Token::None, expr.span);
        n.lhs = Some(Box::new(expr));
        n
    }

    pub fn expression_node(&mut self, root: AstNode) -> AstNode {
        let mut n = self.node(AstKind::Expression, Token::None, root.span);
        n.lhs = Some(Box::new(root));
        n
    }

    /// `name [: type] [:= init]`; `constant` distinguishes `::` bindings.
    pub fn declaration_node(
        &mut self,
        symbol: AstNode,
        type_id: Option<AstNode>,
        init: Option<AstNode>,
        constant: bool,
        span: Span,
    ) -> AstNode {
        let mut n = self.node(AstKind::Declaration, Token::None, span);
        let mut sym = symbol;
        if let Some(t) = type_id {
            sym.rhs = Some(Box::new(t));
        }
        n.lhs = Some(Box::new(sym));
        n.rhs = init.map(Box::new);
        n.is_constant = constant;
        n
    }

    pub fn assignment_node(&mut self, target: AstNode, value: AstNode, span: Span) -> AstNode {
        let mut n = self.node(AstKind::Assignment, Token::None, span);
        n.lhs = Some(Box::new(target));
        n.rhs = Some(Box::new(value));
        n
    }

    pub fn symbol_node(&mut self, parts: &[&str], span: Span) -> AstNode {
        let mut n = self.node(AstKind::Symbol, Token::None, span);
        for part in parts {
            let p = self.node(AstKind::SymbolPart, Token::Name((*part).to_string()), span);
            n.children.push(p);
        }
        n
    }

    pub fn type_identifier_node(&mut self, symbol: AstNode, span: Span) -> AstNode {
        let mut n = self.node(AstKind::TypeIdentifier, Token::None, span);
        n.lhs = Some(Box::new(symbol));
        n
    }

    pub fn pointer_type_node(&mut self, mut base: AstNode, span: Span) -> AstNode {
        base.is_pointer = true;
        let mut n = self.node(AstKind::TypeIdentifier, Token::None, span);
        n.is_pointer = true;
        n.lhs = base.lhs.take().or(Some(Box::new(base)));
        n
    }

    pub fn array_type_node(&mut self, symbol: AstNode, length: AstNode, span: Span) -> AstNode {
        let mut n = self.node(AstKind::TypeIdentifier, Token::None, span);
        n.is_array = true;
        n.lhs = Some(Box::new(symbol));
        n.children.push(length);
        n
    }

    pub fn binary_operator_node(&mut self, lhs: AstNode, op: Operator, rhs: AstNode) -> AstNode {
        let span = lhs.span;
        let mut n = self.node(AstKind::BinaryOperator, Token::Operator(op), span);
        n.lhs = Some(Box::new(lhs));
        n.rhs = Some(Box::new(rhs));
        n
    }

    pub fn unary_operator_node(&mut self, op: Operator, rhs: AstNode, span: Span) -> AstNode {
        let mut n = self.node(AstKind::UnaryOperator, Token::Operator(op), span);
        n.rhs = Some(Box::new(rhs));
        n
    }

    /// Member access with no explicit base; `with` supplies the base.
    pub fn implicit_member_node(&mut self, member: AstNode, span: Span) -> AstNode {
        let mut n = self.node(
            AstKind::BinaryOperator,
            Token::Operator(Operator::MemberAccess),
            span,
        );
        n.rhs = Some(Box::new(member));
        n
    }

    /// `else_branch` is the next `ElseIf` or `Else` node in the chain.
    pub fn if_node(
        &mut self,
        predicate: AstNode,
        body: AstNode,
        else_branch: Option<AstNode>,
        span: Span,
    ) -> AstNode {
        let mut n = self.node(AstKind::If, Token::None, span);
        n.lhs = Some(Box::new(predicate));
        n.rhs = else_branch.map(Box::new);
        n.children.push(body);
        n
    }

    pub fn else_if_node(
        &mut self,
        predicate: AstNode,
        body: AstNode,
        else_branch: Option<AstNode>,
        span: Span,
    ) -> AstNode {
        let mut n = self.node(AstKind::ElseIf, Token::None, span);
        n.lhs = Some(Box::new(predicate));
        n.rhs = else_branch.map(Box::new);
        n.children.push(body);
        n
    }

    pub fn else_node(&mut self, body: AstNode, span: Span) -> AstNode {
        let mut n = self.node(AstKind::Else, Token::None, span);
        n.children.push(body);
        n
    }

    pub fn while_node(&mut self, predicate: AstNode, body: AstNode, span: Span) -> AstNode {
        let mut n = self.node(AstKind::While, Token::None, span);
        n.lhs = Some(Box::new(predicate));
        n.children.push(body);
        n
    }

    /// `for <induction> in <range-call> { body }`
    pub fn for_in_node(
        &mut self,
        induction: AstNode,
        range: AstNode,
        body: AstNode,
        span: Span,
    ) -> AstNode {
        let mut n = self.node(AstKind::ForIn, Token::None, span);
        n.lhs = Some(Box::new(induction));
        n.rhs = Some(Box::new(range));
        n.children.push(body);
        n
    }

    pub fn switch_node(&mut self, scrutinee: AstNode, cases: Vec<AstNode>, span: Span) -> AstNode {
        let mut n = self.node(AstKind::Switch, Token::None, span);
        n.lhs = Some(Box::new(scrutinee));
        n.children = cases;
        n
    }

    /// A `case` with no expression is the default case.
    pub fn case_node(&mut self, expr: Option<AstNode>, body: AstNode, span: Span) -> AstNode {
        let mut n = self.node(AstKind::Case, Token::None, span);
        n.lhs = expr.map(Box::new);
        n.children.push(body);
        n
    }

    pub fn break_node(&mut self, label: Option<&str>, span: Span) -> AstNode {
        let token = match label {
            Some(l) => Token::Name(l.to_string()),
            None => Token::None,
        };
        self.node(AstKind::Break, token, span)
    }

    pub fn continue_node(&mut self, label: Option<&str>, span: Span) -> AstNode {
        let token = match label {
            Some(l) => Token::Name(l.to_string()),
            None => Token::None,
        };
        self.node(AstKind::Continue, token, span)
    }

    pub fn return_node(&mut self, expr: Option<AstNode>, span: Span) -> AstNode {
        let mut n = self.node(AstKind::Return, Token::None, span);
        n.lhs = expr.map(Box::new);
        n
    }

    pub fn defer_node(&mut self, expr: AstNode, span: Span) -> AstNode {
        let mut n = self.node(AstKind::Defer, Token::None, span);
        n.lhs = Some(Box::new(expr));
        n
    }

    pub fn with_node(&mut self, expr: AstNode, body: AstNode, span: Span) -> AstNode {
        let mut n = self.node(AstKind::With, Token::None, span);
        n.lhs = Some(Box::new(expr));
        n.children.push(body);
        n
    }

    pub fn fallthrough_node(&mut self, span: Span) -> AstNode {
        self.node(AstKind::Fallthrough, Token::None, span)
    }

    pub fn label_node(&mut self, name: &str, span: Span) -> AstNode {
        self.node(AstKind::Label, Token::Name(name.to_string()), span)
    }

    pub fn cast_node(&mut self, type_id: AstNode, expr: AstNode, span: Span) -> AstNode {
        let mut n = self.node(AstKind::Cast, Token::None, span);
        n.lhs = Some(Box::new(type_id));
        n.rhs = Some(Box::new(expr));
        n
    }

    pub fn transmute_node(&mut self, type_id: AstNode, expr: AstNode, span: Span) -> AstNode {
        let mut n = self.node(AstKind::Transmute, Token::None, span);
        n.lhs = Some(Box::new(type_id));
        n.rhs = Some(Box::new(expr));
        n
    }

    /// `proc(params): returns { body }`; `body` is absent for foreign procs.
    pub fn proc_expression_node(
        &mut self,
        params: AstNode,
        returns: Option<AstNode>,
        body: Option<AstNode>,
        span: Span,
    ) -> AstNode {
        let mut n = self.node(AstKind::ProcExpression, Token::None, span);
        n.lhs = Some(Box::new(params));
        n.rhs = returns.map(Box::new);
        if let Some(b) = body {
            n.children.push(b);
        }
        n
    }

    pub fn proc_call_node(&mut self, reference: AstNode, args: AstNode, span: Span) -> AstNode {
        let mut n = self.node(AstKind::ProcCall, Token::None, span);
        n.lhs = Some(Box::new(reference));
        n.rhs = Some(Box::new(args));
        n
    }

    pub fn parameter_list_node(&mut self, params: Vec<AstNode>, span: Span) -> AstNode {
        let mut n = self.node(AstKind::ParameterList, Token::None, span);
        n.children = params;
        n
    }

    /// The `...` marker in a variadic parameter list.
    pub fn spread_parameter_node(&mut self, span: Span) -> AstNode {
        let mut n = self.node(AstKind::Declaration, Token::None, span);
        n.is_spread = true;
        n
    }

    pub fn return_parameter_list_node(&mut self, params: Vec<AstNode>, span: Span) -> AstNode {
        let mut n = self.node(AstKind::ReturnParameterList, Token::None, span);
        n.children = params;
        n
    }

    pub fn argument_list_node(&mut self, args: Vec<AstNode>, span: Span) -> AstNode {
        let mut n = self.node(AstKind::ArgumentList, Token::None, span);
        n.children = args;
        n
    }

    pub fn argument_pair_node(&mut self, name: &str, value: AstNode, span: Span) -> AstNode {
        let mut n = self.node(AstKind::ArgumentPair, Token::Name(name.to_string()), span);
        n.rhs = Some(Box::new(value));
        n
    }

    pub fn struct_node(&mut self, fields: AstNode, span: Span) -> AstNode {
        let mut n = self.node(AstKind::StructExpression, Token::None, span);
        n.children.push(fields);
        n
    }

    pub fn union_node(&mut self, fields: AstNode, span: Span) -> AstNode {
        let mut n = self.node(AstKind::UnionExpression, Token::None, span);
        n.children.push(fields);
        n
    }

    pub fn enum_node(&mut self, fields: AstNode, span: Span) -> AstNode {
        let mut n = self.node(AstKind::EnumExpression, Token::None, span);
        n.children.push(fields);
        n
    }

    pub fn subscript_node(&mut self, base: AstNode, index: AstNode, span: Span) -> AstNode {
        let mut n = self.node(AstKind::Subscript, Token::None, span);
        n.lhs = Some(Box::new(base));
        n.rhs = Some(Box::new(index));
        n
    }

    pub fn import_node(&mut self, symbol: AstNode, span: Span) -> AstNode {
        let mut n = self.node(AstKind::Import, Token::None, span);
        n.lhs = Some(Box::new(symbol));
        n
    }

    pub fn directive_node(&mut self, name: &str, expr: Option<AstNode>, span: Span) -> AstNode {
        let mut n = self.node(AstKind::Directive, Token::Name(name.to_string()), span);
        n.lhs = expr.map(Box::new);
        n
    }

    pub fn attribute_node(&mut self, name: &str, expr: Option<AstNode>, span: Span) -> AstNode {
        let mut n = self.node(AstKind::Attribute, Token::Name(name.to_string()), span);
        n.lhs = expr.map(Box::new);
        n
    }

    pub fn raw_block_node(&mut self, source: &str, span: Span) -> AstNode {
        self.node(AstKind::RawBlock, Token::Str(source.to_string()), span)
    }

    pub fn module_expression_node(&mut self, path: AstNode, span: Span) -> AstNode {
        let mut n = self.node(AstKind::ModuleExpression, Token::None, span);
        n.lhs = Some(Box::new(path));
        n
    }

    pub fn nil_literal_node(&mut self, span: Span) -> AstNode {
        self.node(AstKind::NilLiteral, Token::None, span)
    }

    pub fn uninitialized_literal_node(&mut self, span: Span) -> AstNode {
        self.node(AstKind::UninitializedLiteral, Token::None, span)
    }

    pub fn integer_literal_node(&mut self, value: u64, span: Span) -> AstNode {
        self.node(
            AstKind::NumberLiteral,
            Token::Integer {
                value,
                negative: false,
            },
            span,
        )
    }

    pub fn negative_integer_literal_node(&mut self, value: u64, span: Span) -> AstNode {
        self.node(
            AstKind::NumberLiteral,
            Token::Integer {
                value,
                negative: true,
            },
            span,
        )
    }

    pub fn float_literal_node(&mut self, value: f64, span: Span) -> AstNode {
        self.node(AstKind::NumberLiteral, Token::Float(value), span)
    }

    pub fn string_literal_node(&mut self, value: &str, span: Span) -> AstNode {
        self.node(AstKind::StringLiteral, Token::Str(value.to_string()), span)
    }

    pub fn boolean_literal_node(&mut self, value: bool, span: Span) -> AstNode {
        self.node(AstKind::BooleanLiteral, Token::Boolean(value), span)
    }

    pub fn character_literal_node(&mut self, value: char, span: Span) -> AstNode {
        self.node(AstKind::CharacterLiteral, Token::Rune(value), span)
    }

    pub fn line_comment_node(&mut self, text: &str, span: Span) -> AstNode {
        self.node(AstKind::LineComment, Token::Str(text.to_string()), span)
    }

    pub fn block_comment_node(&mut self, text: &str, span: Span) -> AstNode {
        self.node(AstKind::BlockComment, Token::Str(text.to_string()), span)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builder_stamps_unique_ids() {
        let mut b = AstBuilder::new();
        let a = b.module_node(span(0, 0));
        let c = b.block_node(span(0, 0));
        assert_ne!(a.id, c.id);
    }

    #[test]
    fn qualified_symbols_need_multiple_parts() {
        let mut b = AstBuilder::new();
        let single = b.symbol_node(&["x"], span(0, 1));
        let dotted = b.symbol_node(&["core", "str", "len"], span(0, 12));
        assert!(!single.is_qualified_symbol());
        assert!(dotted.is_qualified_symbol());
    }

    #[test]
    fn span_between_computes_length() {
        let s = span_between(4, 10);
        assert_eq!(s.offset(), 4);
        assert_eq!(s.len(), 6);
    }
}
