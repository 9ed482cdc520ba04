#![forbid(unsafe_code)]

use std::collections::{BTreeMap, BTreeSet};

use crate::element::ElementId;

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ScopeId(pub u32);

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ScopeKind {
    Module,
    Namespace(String),
    Block,
    Procedure,
}

/// One lexical container of declarations. Declarations are a multimap so
/// overloaded procedure symbols can share a name.
#[derive(Debug)]
pub struct Scope {
    pub id: ScopeId,
    pub parent: Option<ScopeId>,
    pub kind: ScopeKind,
    /// The block element this scope belongs to.
    pub element: Option<ElementId>,
    pub module: Option<ElementId>,
    declarations: BTreeMap<String, Vec<ElementId>>,
    pub children: Vec<ScopeId>,
    /// Deferred expressions in AST order; fired in reverse at emit time.
    pub defers: Vec<ElementId>,
    pub stack_frame: bool,
    pub labels: BTreeSet<String>,
}

impl Scope {
    pub fn declare(&mut self, name: &str, element: ElementId) {
        self.declarations
            .entry(name.to_string())
            .or_default()
            .push(element);
    }

    pub fn local(&self, name: &str) -> &[ElementId] {
        self.declarations
            .get(name)
            .map(|v| v.as_slice())
            .unwrap_or(&[])
    }

    pub fn declarations(&self) -> impl Iterator<Item = (&str, &[ElementId])> {
        self.declarations
            .iter()
            .map(|(name, ids)| (name.as_str(), ids.as_slice()))
    }

    pub fn declaration_order(&self) -> Vec<ElementId> {
        let mut out: Vec<ElementId> = self.declarations.values().flatten().copied().collect();
        out.sort();
        out
    }
}

/// The scope tree plus the two deferred-resolution work queues the
/// fixpoint drains.
#[derive(Debug)]
pub struct ScopeManager {
    scopes: Vec<Scope>,
    /// Identifiers declared without a type, awaiting inference.
    pub unknown_types: Vec<ElementId>,
    /// Identifier references that did not resolve at evaluation time.
    pub unresolved_references: Vec<ElementId>,
}

impl Default for ScopeManager {
    fn default() -> Self {
        Self::new()
    }
}

impl ScopeManager {
    pub fn new() -> Self {
        let mut manager = Self {
            scopes: Vec::new(),
            unknown_types: Vec::new(),
            unresolved_references: Vec::new(),
        };
        manager.push_scope(None, ScopeKind::Module, None);
        manager
    }

    pub fn root(&self) -> ScopeId {
        ScopeId(0)
    }

    pub fn push_scope(
        &mut self,
        parent: Option<ScopeId>,
        kind: ScopeKind,
        module: Option<ElementId>,
    ) -> ScopeId {
        let id = ScopeId(self.scopes.len() as u32);
        self.scopes.push(Scope {
            id,
            parent,
            kind,
            element: None,
            module,
            declarations: BTreeMap::new(),
            children: Vec::new(),
            defers: Vec::new(),
            stack_frame: false,
            labels: BTreeSet::new(),
        });
        if let Some(parent) = parent {
            self.scopes[parent.0 as usize].children.push(id);
        }
        id
    }

    pub fn scope(&self, id: ScopeId) -> &Scope {
        &self.scopes[id.0 as usize]
    }

    pub fn scope_mut(&mut self, id: ScopeId) -> &mut Scope {
        &mut self.scopes[id.0 as usize]
    }

    pub fn len(&self) -> usize {
        self.scopes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.scopes.is_empty()
    }

    /// Walks parent links to the root; the chain is acyclic by
    /// construction, so this terminates in at most tree-depth steps.
    pub fn ancestors(&self, from: ScopeId) -> Vec<ScopeId> {
        let mut out = vec![from];
        let mut current = from;
        while let Some(parent) = self.scope(current).parent {
            out.push(parent);
            current = parent;
        }
        out
    }

    /// True when `scope` sits inside a stack frame (a procedure body).
    pub fn within_local_scope(&self, scope: ScopeId) -> bool {
        self.ancestors(scope)
            .iter()
            .any(|id| self.scope(*id).stack_frame)
    }

    /// Nearest enclosing scope that carries a stack frame.
    pub fn enclosing_frame(&self, scope: ScopeId) -> Option<ScopeId> {
        self.ancestors(scope)
            .into_iter()
            .find(|id| self.scope(*id).stack_frame)
    }

    /// Finds all declarations of `name` visible from `from`, walking up
    /// the parent chain. The nearest scope wins; overloads within one
    /// scope are all returned.
    pub fn find_name(&self, from: ScopeId, name: &str) -> Vec<ElementId> {
        for id in self.ancestors(from) {
            let matches = self.scope(id).local(name);
            if !matches.is_empty() {
                return matches.to_vec();
            }
        }
        Vec::new()
    }

    /// Qualified lookup: resolve the namespace path first, then the leaf
    /// inside the namespace's scope (no walk-up past the path).
    pub fn find_qualified(
        &self,
        from: ScopeId,
        namespaces: &[String],
        name: &str,
        namespace_scope: impl Fn(ElementId) -> Option<ScopeId>,
    ) -> Vec<ElementId> {
        if namespaces.is_empty() {
            return self.find_name(from, name);
        }
        let mut current = from;
        for (index, component) in namespaces.iter().enumerate() {
            let candidates = if index == 0 {
                self.find_name(current, component)
            } else {
                self.scope(current).local(component).to_vec()
            };
            let Some(scope) = candidates.iter().find_map(|id| namespace_scope(*id)) else {
                return Vec::new();
            };
            current = scope;
        }
        self.scope(current).local(name).to_vec()
    }

    pub fn add_unknown_type(&mut self, identifier: ElementId) {
        if !self.unknown_types.contains(&identifier) {
            self.unknown_types.push(identifier);
        }
    }

    pub fn add_unresolved_reference(&mut self, reference: ElementId) {
        if !self.unresolved_references.contains(&reference) {
            self.unresolved_references.push(reference);
        }
    }

    pub fn pending(&self) -> usize {
        self.unknown_types.len() + self.unresolved_references.len()
    }
}
