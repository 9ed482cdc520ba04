#![forbid(unsafe_code)]

//! The planning view of every declaration: which section a module-level
//! variable lands in, which frame offset a procedure local gets, and the
//! label the emitter will use. Rebuilding the plan from scratch is
//! deterministic: same labels, same offsets.

use std::collections::{BTreeMap, BTreeSet};

use basecode_vm::{OpSize, Register, RegisterAllocator, RegisterClass, Section};

use crate::element::{ElementId, ElementKind, ElementPayload};
use crate::scope::{ScopeId, ScopeKind};
use crate::session::Session;
use crate::types::{AccessModel, NumberClass, TypeId, TypeKind};

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct VariablePlan {
    pub element: ElementId,
    pub section: Option<Section>,
    pub label: String,
    pub frame_offset: Option<i64>,
    pub size: usize,
}

#[derive(Debug, Default)]
pub struct VariablePlanner {
    plans: BTreeMap<ElementId, VariablePlan>,
    by_section: BTreeMap<Section, Vec<ElementId>>,
}

impl VariablePlanner {
    pub fn plan(&self, element: ElementId) -> Option<&VariablePlan> {
        self.plans.get(&element)
    }

    /// Section members in insertion order.
    pub fn section(&self, section: Section) -> &[ElementId] {
        self.by_section
            .get(&section)
            .map(|v| v.as_slice())
            .unwrap_or(&[])
    }

    pub fn plans(&self) -> impl Iterator<Item = &VariablePlan> {
        self.plans.values()
    }

    fn put(&mut self, plan: VariablePlan) {
        if let Some(section) = plan.section {
            self.by_section
                .entry(section)
                .or_default()
                .push(plan.element);
        }
        self.plans.insert(plan.element, plan);
    }
}

/// Builds the plan: module-level identifiers bucket into sections by
/// constness and initialisation; procedure locals get frame offsets.
pub fn plan(session: &mut Session) -> VariablePlanner {
    let mut planner = VariablePlanner::default();
    let field_identifiers = collect_field_identifiers(session);

    for id in session.elements.find_by_kind(ElementKind::Identifier) {
        let element = session.elements.expect(id);
        let Some(scope) = element.parent_scope else {
            continue;
        };
        if session.scopes.within_local_scope(scope) {
            continue;
        }
        if field_identifiers.contains(&id) {
            continue;
        }
        let ElementPayload::Identifier {
            symbol,
            type_ref,
            initializer,
            constant,
        .. } = &element.payload
        else {
            continue;
        };
        let Some(type_ref) = *type_ref else {
            continue;
        };
        if !is_storage_type(session, type_ref) {
            continue;
        }
        if let Some(init) = initializer {
            if initializer_declares_type(session, *init) {
                continue;
            }
        }

        let uninitialized = match initializer {
            None => true,
            Some(init) => is_uninitialized(session, *init),
        };
        let decl = session.types.decl(type_ref);
        let section = if *constant {
            Section::RoData
        } else if uninitialized && decl.is_composite() {
            Section::Bss
        } else {
            Section::Data
        };

        // only top-of-module declarations keep their bare name; block
        // scopes may shadow, so those labels carry the element id
        let label = match session.scopes.scope(scope).kind {
            ScopeKind::Module | ScopeKind::Namespace(_) => symbol.label_name(),
            _ => format!("{}_{}", symbol.label_name(), id.0),
        };

        planner.put(VariablePlan {
            element: id,
            section: Some(section),
            label,
            frame_offset: None,
            size: decl.size,
        });
    }

    plan_frames(session, &mut planner);
    planner
}

/// Frame layout per procedure: parameters above the saved frame pointer
/// and return address, locals below, one 8-byte slot each.
fn plan_frames(session: &mut Session, planner: &mut VariablePlanner) {
    for instance in session.elements.find_by_kind(ElementKind::ProcedureInstance) {
        let (proc_type, scope_block) = match &session.elements.expect(instance).payload {
            ElementPayload::ProcedureInstance {
                proc_type, scope, ..
            } => (*proc_type, *scope),
            _ => continue,
        };

        let mut param_identifiers = BTreeSet::new();
        if let TypeKind::Procedure { parameters, .. } = &session.types.decl(proc_type).kind {
            for (index, param) in parameters.iter().enumerate() {
                let Some(declaration) = param.declaration else {
                    continue;
                };
                param_identifiers.insert(declaration);
                let symbol = match &session.elements.expect(declaration).payload {
                    ElementPayload::Identifier { symbol, .. } => symbol.label_name(),
                    _ => continue,
                };
                planner.put(VariablePlan {
                    element: declaration,
                    section: None,
                    label: symbol,
                    // saved FP at 0, return address at 8, return slot at 16
                    frame_offset: Some(24 + (index as i64) * 8),
                    size: session.types.decl(param.ty).size,
                });
            }
        }

        let Some(scope) = block_scope(session, scope_block) else {
            continue;
        };
        let mut next_local = 0i64;
        for identifier in frame_declarations(session, scope) {
            if param_identifiers.contains(&identifier) {
                continue;
            }
            let (symbol, ty) = match &session.elements.expect(identifier).payload {
                ElementPayload::Identifier {
                    symbol, type_ref, ..
                } => (symbol.label_name(), *type_ref),
                _ => continue,
            };
            // locals in nested blocks may shadow; suffix those with ids
            let label = if session.elements.expect(identifier).parent_scope == Some(scope) {
                symbol
            } else {
                format!("{symbol}_{}", identifier.0)
            };
            let size = ty
                .map(|ty| session.types.decl(ty).size)
                .unwrap_or(8);
            let slots = size.div_ceil(8).max(1) as i64;
            next_local -= slots * 8;
            planner.put(VariablePlan {
                element: identifier,
                section: None,
                label,
                frame_offset: Some(next_local),
                size,
            });
        }
    }
}

fn block_scope(session: &Session, block: ElementId) -> Option<ScopeId> {
    match &session.elements.get(block)?.payload {
        ElementPayload::Block { scope, .. } => Some(*scope),
        _ => None,
    }
}

/// Identifiers declared anywhere inside a frame's scope tree, in
/// declaration order by element id.
fn frame_declarations(session: &Session, scope: ScopeId) -> Vec<ElementId> {
    let mut out = Vec::new();
    let mut stack = vec![scope];
    while let Some(current) = stack.pop() {
        let scope = session.scopes.scope(current);
        out.extend(scope.declaration_order());
        for child in &scope.children {
            // nested frames plan separately
            if !session.scopes.scope(*child).stack_frame {
                stack.push(*child);
            }
        }
    }
    out.sort();
    out.dedup();
    out
}

fn collect_field_identifiers(session: &Session) -> BTreeSet<ElementId> {
    let mut out = BTreeSet::new();
    for field in session.elements.find_by_kind(ElementKind::Field) {
        if let ElementPayload::Field { identifier } = &session.elements.expect(field).payload {
            out.insert(*identifier);
        }
    }
    out
}

fn is_storage_type(session: &Session, ty: TypeId) -> bool {
    !matches!(
        session.types.decl(ty).kind,
        TypeKind::Procedure { .. }
            | TypeKind::Namespace
            | TypeKind::Module
            | TypeKind::TypeInfo
            | TypeKind::Generic
            | TypeKind::Family
            | TypeKind::Unknown
    )
}

fn initializer_declares_type(session: &Session, initializer: ElementId) -> bool {
    let Some(element) = session.elements.get(initializer) else {
        return false;
    };
    let ElementPayload::Initializer { expression } = &element.payload else {
        return false;
    };
    matches!(
        session.elements.get(*expression).map(|e| e.kind()),
        Some(
            ElementKind::TypeReference
                | ElementKind::ProcedureInstance
                | ElementKind::Namespace
                | ElementKind::ModuleReference
        )
    )
}

fn is_uninitialized(session: &Session, initializer: ElementId) -> bool {
    let Some(element) = session.elements.get(initializer) else {
        return true;
    };
    match &element.payload {
        ElementPayload::Initializer { expression } => matches!(
            session.elements.get(*expression).map(|e| e.kind()),
            Some(ElementKind::UninitializedLiteral)
        ),
        _ => false,
    }
}

const ACTIVATED: u8 = 0b0000_0001;
const READ: u8 = 0b0000_0010;
const WRITTEN: u8 = 0b0000_0100;
const ADDRESSED: u8 = 0b0000_1000;
const COPIED: u8 = 0b0001_0000;

/// Runtime view of one variable during emission: a value register and an
/// address register, bracketed by activate/deactivate.
#[derive(Debug)]
pub struct Variable {
    pub element: ElementId,
    pub value: Register,
    pub address: Register,
    flags: u8,
}

impl Variable {
    /// Reserves both registers; failure mid-sequence is fatal at the call
    /// site, so this only reports it.
    pub fn activate(
        allocator: &mut RegisterAllocator,
        element: ElementId,
        class: RegisterClass,
        size: OpSize,
    ) -> Option<Variable> {
        let address = allocator.allocate(RegisterClass::Integer, OpSize::Qword)?;
        let Some(value) = allocator.allocate(class, size) else {
            allocator.release(address);
            return None;
        };
        Some(Variable {
            element,
            value,
            address,
            flags: ACTIVATED,
        })
    }

    pub fn deactivate(self, allocator: &mut RegisterAllocator) {
        allocator.release(self.value);
        allocator.release(self.address);
    }

    pub fn is_activated(&self) -> bool {
        self.flags & ACTIVATED != 0
    }

    pub fn mark_read(&mut self) {
        self.flags |= READ;
        self.flags &= !WRITTEN;
    }

    pub fn mark_written(&mut self) {
        self.flags |= WRITTEN;
        self.flags &= !READ;
    }

    pub fn mark_addressed(&mut self) {
        self.flags |= ADDRESSED;
    }

    pub fn mark_copied(&mut self) {
        self.flags |= COPIED;
    }

    pub fn is_read(&self) -> bool {
        self.flags & READ != 0
    }

    pub fn is_written(&self) -> bool {
        self.flags & WRITTEN != 0
    }

    pub fn is_addressed(&self) -> bool {
        self.flags & ADDRESSED != 0
    }

    pub fn is_copied(&self) -> bool {
        self.flags & COPIED != 0
    }
}

/// Register class a type's values travel in.
pub fn register_class(session: &Session, ty: TypeId) -> RegisterClass {
    match session.types.decl(ty).number_class {
        NumberClass::FloatingPoint => RegisterClass::FloatingPoint,
        _ => RegisterClass::Integer,
    }
}

/// Operand size for values of `ty`: value-model types use their byte
/// size, pointer-model types travel as addresses.
pub fn value_size(session: &Session, ty: TypeId) -> OpSize {
    let decl = session.types.decl(ty);
    match decl.access_model {
        AccessModel::Value => OpSize::for_byte_size(decl.size),
        AccessModel::Pointer => OpSize::Qword,
    }
}
