#![forbid(unsafe_code)]

use std::fmt;
use std::hash::{Hash, Hasher};

use basecode_ast::Span;

/// Namespace path plus leaf name; the sole lookup key into scopes.
/// Equality and hashing are structural over the components only — the
/// optional source location never participates.
#[derive(Clone, Debug)]
pub struct QualifiedSymbol {
    pub namespaces: Vec<String>,
    pub name: String,
    pub span: Option<Span>,
}

impl QualifiedSymbol {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            namespaces: Vec::new(),
            name: name.into(),
            span: None,
        }
    }

    pub fn qualified(namespaces: Vec<String>, name: impl Into<String>) -> Self {
        Self {
            namespaces,
            name: name.into(),
            span: None,
        }
    }

    pub fn with_span(mut self, span: Span) -> Self {
        self.span = Some(span);
        self
    }

    pub fn is_qualified(&self) -> bool {
        !self.namespaces.is_empty()
    }

    /// Dotted display form, e.g. `core.str.len`.
    pub fn fully_qualified(&self) -> String {
        if self.namespaces.is_empty() {
            return self.name.clone();
        }
        let mut out = self.namespaces.join(".");
        out.push('.');
        out.push_str(&self.name);
        out
    }

    /// Emitted label form, e.g. `core_str_len`.
    pub fn label_name(&self) -> String {
        if self.namespaces.is_empty() {
            return self.name.clone();
        }
        let mut out = self.namespaces.join("_");
        out.push('_');
        out.push_str(&self.name);
        out
    }
}

impl PartialEq for QualifiedSymbol {
    fn eq(&self, other: &Self) -> bool {
        self.name == other.name && self.namespaces == other.namespaces
    }
}

impl Eq for QualifiedSymbol {}

impl Hash for QualifiedSymbol {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.namespaces.hash(state);
        self.name.hash(state);
    }
}

impl fmt::Display for QualifiedSymbol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.fully_qualified())
    }
}
