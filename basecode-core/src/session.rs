#![forbid(unsafe_code)]

use std::collections::BTreeMap;

use basecode_ast::{AstNode, Span};
use basecode_vm::Assembler;

use crate::element::{ElementId, ElementMap, ElementPayload};
use crate::emit;
use crate::error::{CompileFailure, CompileResult, ErrorCode};
use crate::evaluator;
use crate::fold;
use crate::interner::StringInterner;
use crate::scope::{ScopeId, ScopeManager};
use crate::sema;
use crate::symbols::QualifiedSymbol;
use crate::types::{TypeId, TypeRegistry};
use crate::variables::{self, VariablePlanner};

#[derive(Clone, Debug)]
pub struct SessionOptions {
    /// Emit comment directives into the listing.
    pub listing_comments: bool,
    /// Module name used when an AST module carries none.
    pub default_module_name: String,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            listing_comments: true,
            default_module_name: "module".to_string(),
        }
    }
}

/// A native function the VM's FFI layer will service. The descriptor is
/// looked up by address at call-emission time; variadic functions record
/// the argument types of every call site under a fresh signature id.
#[derive(Debug)]
pub struct ForeignFunction {
    pub element: ElementId,
    pub symbol: String,
    pub address: u64,
    pub variadic: bool,
    pub call_site_signatures: BTreeMap<u32, Vec<TypeId>>,
}

#[derive(Debug, Default)]
pub struct FfiRegistry {
    functions: BTreeMap<u64, ForeignFunction>,
    by_element: BTreeMap<ElementId, u64>,
    next_address: u64,
    next_signature: u32,
}

impl FfiRegistry {
    pub fn register(&mut self, element: ElementId, symbol: &str, variadic: bool) -> u64 {
        if let Some(address) = self.by_element.get(&element) {
            return *address;
        }
        // addresses are tokens, not memory; start above the null page
        let address = 0x1000 + self.next_address * 8;
        self.next_address += 1;
        self.functions.insert(
            address,
            ForeignFunction {
                element,
                symbol: symbol.to_string(),
                address,
                variadic,
                call_site_signatures: BTreeMap::new(),
            },
        );
        self.by_element.insert(element, address);
        address
    }

    pub fn address_for(&self, element: ElementId) -> Option<u64> {
        self.by_element.get(&element).copied()
    }

    pub fn function(&self, address: u64) -> Option<&ForeignFunction> {
        self.functions.get(&address)
    }

    pub fn record_call_site(&mut self, address: u64, argument_types: Vec<TypeId>) -> Option<u32> {
        let function = self.functions.get_mut(&address)?;
        let signature_id = self.next_signature;
        self.next_signature += 1;
        function
            .call_site_signatures
            .insert(signature_id, argument_types);
        Some(signature_id)
    }
}

/// Owns all state shared across phases: the element map, scope tree, type
/// registry, interned strings, and the diagnostic sink. Phases run
/// sequentially; at most one component mutates the shared state at a time.
pub struct Session {
    pub options: SessionOptions,
    pub elements: ElementMap,
    pub scopes: ScopeManager,
    pub types: TypeRegistry,
    pub interner: StringInterner,
    pub result: CompileResult,
    pub ffi: FfiRegistry,
    pub program: Option<ElementId>,
}

impl Session {
    pub fn new(options: SessionOptions) -> Self {
        Self {
            options,
            elements: ElementMap::new(),
            scopes: ScopeManager::new(),
            types: TypeRegistry::new(),
            interner: StringInterner::new(),
            result: CompileResult::new(),
            ffi: FfiRegistry::default(),
            program: None,
        }
    }

    pub fn error(&mut self, code: ErrorCode, message: impl Into<String>, span: Span) {
        self.result.error(code, message, span);
    }

    /// Resolves a qualified symbol to identifier declarations visible
    /// from `scope`.
    pub fn find_identifiers(&self, scope: ScopeId, symbol: &QualifiedSymbol) -> Vec<ElementId> {
        self.scopes
            .find_qualified(scope, &symbol.namespaces, &symbol.name, |declaration| {
                self.namespace_scope_of(declaration)
            })
    }

    /// The block scope a namespace declaration opens, if `declaration`
    /// is one.
    fn namespace_scope_of(&self, declaration: ElementId) -> Option<ScopeId> {
        let element = self.elements.get(declaration)?;
        let ElementPayload::Identifier {
            initializer: Some(initializer),
            ..
        } = &element.payload
        else {
            return None;
        };
        let init = self.elements.get(*initializer)?;
        let ElementPayload::Initializer { expression } = &init.payload else {
            return None;
        };
        let expr = self.elements.get(*expression)?;
        let ElementPayload::Namespace { block, .. } = &expr.payload else {
            return None;
        };
        let block = self.elements.get(*block)?;
        match &block.payload {
            ElementPayload::Block { scope, .. } => Some(*scope),
            _ => None,
        }
    }

    pub fn identifier_type(&self, identifier: ElementId) -> Option<TypeId> {
        match &self.elements.get(identifier)?.payload {
            ElementPayload::Identifier { type_ref, .. } => *type_ref,
            _ => None,
        }
    }

    /// Front half of the pipeline: AST folding, resolution fixpoint,
    /// constant folding, type check. Sibling diagnostics accumulate, but
    /// any error skips the remaining phases.
    pub fn compile(&mut self, modules: &[AstNode]) -> Result<(), CompileFailure> {
        let program = evaluator::evaluate_program(self, modules);
        self.program = program;

        if !self.result.is_failed() {
            sema::resolve_pending(self);
        }
        if !self.result.is_failed() {
            fold::fold_constants(self);
        }
        if !self.result.is_failed() {
            sema::type_check(self);
        }

        match self.result.take_failure() {
            Some(failure) => Err(failure),
            None => Ok(()),
        }
    }

    /// Back half: plan variables, emit, validate the CFG, and hand the
    /// listing to the caller. Nothing is flushed before this point.
    pub fn finalize(&mut self) -> Result<Assembler, CompileFailure> {
        let planner = variables::plan(self);
        if self.result.is_failed() {
            return Err(self.result.take_failure().unwrap());
        }

        let assembler = emit::emit_program(self, &planner);
        match assembler {
            Some(assembler) if !self.result.is_failed() => {
                if let Err(errors) = assembler.validate() {
                    panic!("emitted control-flow graph failed validation: {errors:?}");
                }
                Ok(assembler)
            }
            _ => Err(self
                .result
                .take_failure()
                .unwrap_or(CompileFailure {
                    count: 0,
                    related: Vec::new(),
                })),
        }
    }

    /// Convenience for tests and tooling: compile and emit in one step.
    pub fn run(&mut self, modules: &[AstNode]) -> Result<Assembler, CompileFailure> {
        self.compile(modules)?;
        self.finalize()
    }

    pub fn plan_variables(&mut self) -> VariablePlanner {
        variables::plan(self)
    }
}
