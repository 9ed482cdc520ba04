#![forbid(unsafe_code)]

//! Lowers the element graph into a control-flow graph of labelled basic
//! blocks. The pipeline runs bootstrap, type table, interned strings,
//! section tables, reachable procedure bodies, `_start`, the initializer,
//! the implicit module blocks, the finalizer, and `_end`, in that order.
//!
//! Blocks are created lazily, in execution order, so the physical block
//! sequence matches fall-through flow; explicit jumps cover every other
//! transfer.

use std::collections::{BTreeMap, BTreeSet};

use basecode_vm::{
    Assembler, BlockId, DataValue, NamedRefKind, OpCode, OpSize, Operand, RegisterAllocator,
    RegisterClass, Section,
};

use crate::builder::BuildContext;
use crate::element::{BinaryOp, ElementId, ElementKind, ElementPayload, IntrinsicKind, UnaryOp};
use crate::error::ErrorCode;
use crate::interner::{self, StringInterner};
use crate::scope::ScopeId;
use crate::sema;
use crate::session::Session;
use crate::types::{CastMode, CompositeKind, TypeId, TypeKind};
use crate::variables::{self, Variable, VariablePlanner};

const INSTRUCTION_ALIGNMENT: u8 = 8;
/// Saved frame pointer at 0, return address at 8, return slot at 16.
const RETURN_SLOT_OFFSET: i64 = 16;

/// Record pushed while lowering a loop or switch; `break`/`continue`
/// resolve against the top of this stack.
#[derive(Clone, Debug)]
struct FlowControl {
    label: Option<String>,
    exit_label: String,
    continue_label: Option<String>,
}

/// Per-procedure emission state.
struct Frame {
    /// Scalar named locals in declaration order; pushed around calls.
    scalars: Vec<String>,
}

#[derive(Clone, Debug)]
struct EmitValue {
    operand: Operand,
    size: OpSize,
    class: RegisterClass,
}

pub fn emit_program(session: &mut Session, plan: &VariablePlanner) -> Option<Assembler> {
    let mut emitter = Emitter::new(session, plan);
    emitter.emit()?;
    emitter.resolve_pending_edges();
    Some(emitter.asm)
}

struct Emitter<'a> {
    s: &'a mut Session,
    plan: &'a VariablePlanner,
    asm: Assembler,
    current: Option<BlockId>,
    flow: Vec<FlowControl>,
    defer_stack: Vec<Vec<ElementId>>,
    frame: Option<Frame>,
    temp_counter: u32,
    /// Expressions may emit more than once (deferred expressions fire on
    /// every exit path), so expression-level labels carry a sequence.
    label_seq: u32,
    registers: RegisterAllocator,
    pending_edges: Vec<(BlockId, String)>,
    /// proc instance element -> emitted label
    instance_labels: BTreeMap<ElementId, String>,
}

impl<'a> Emitter<'a> {
    fn new(session: &'a mut Session, plan: &'a VariablePlanner) -> Self {
        let mut instance_labels = BTreeMap::new();
        for id in session.elements.find_by_kind(ElementKind::Identifier) {
            if let Some(instance) = sema::procedure_instance_of(session, id) {
                if let ElementPayload::Identifier { symbol, .. } =
                    &session.elements.expect(id).payload
                {
                    instance_labels.insert(instance, symbol.label_name());
                }
            }
        }
        Self {
            s: session,
            plan,
            asm: Assembler::new(),
            current: None,
            flow: Vec::new(),
            defer_stack: Vec::new(),
            frame: None,
            temp_counter: 0,
            label_seq: 0,
            registers: RegisterAllocator::new(),
            pending_edges: Vec::new(),
            instance_labels,
        }
    }

    fn emit(&mut self) -> Option<()> {
        self.intern_string_literals();
        if self.s.result.is_failed() {
            return None;
        }

        self.emit_bootstrap_block();
        self.emit_type_table();
        self.emit_interned_string_table()?;
        self.emit_section_tables();
        self.emit_procedures();

        let start = self.emit_start_block();
        let (init_head, init_tail) = self.emit_initializer_block();
        self.asm.add_edge(start, init_head);

        let mut tail = init_tail;
        for block in self.implicit_blocks() {
            let (head, new_tail) = self.emit_implicit_block(block);
            self.asm.add_edge(tail, head);
            tail = new_tail;
        }

        let finalizer = self.emit_finalizer_block();
        self.asm.add_edge(tail, finalizer);
        let end = self.emit_end_block();
        self.asm.add_edge(finalizer, end);

        if self.s.result.is_failed() {
            None
        } else {
            Some(())
        }
    }

    // ------------------------------------------------------------------
    // plumbing

    fn cur(&mut self) -> &mut basecode_vm::BasicBlock {
        let id = self.current.expect("emitter has no current block");
        self.asm.block_mut(id)
    }

    fn new_text_block(&mut self, label: &str) -> BlockId {
        let id = self.asm.make_basic_block(label);
        self.asm.block_mut(id).section(Section::Text);
        id
    }

    fn set_current(&mut self, id: BlockId) {
        self.current = Some(id);
    }

    fn current_terminated(&self) -> bool {
        match self.current {
            Some(id) => self.asm.block(id).is_terminated(),
            None => true,
        }
    }

    /// Continues emission in a fresh block reached by fall-through from
    /// the current one.
    fn continue_in(&mut self, label: &str) -> BlockId {
        let block = self.new_text_block(label);
        if let Some(from) = self.current {
            if !self.asm.block(from).is_terminated() {
                self.asm.add_edge(from, block);
            }
        }
        self.set_current(block);
        block
    }

    fn jump_to_label(&mut self, label: &str) {
        let from = self.current.expect("emitter has no current block");
        let target = self.asm.label_ref(label);
        self.asm.block_mut(from).jump_direct(target);
        self.pending_edges.push((from, label.to_string()));
    }

    fn branch_edge_from_current(&mut self, label: &str) {
        if let Some(from) = self.current {
            self.pending_edges.push((from, label.to_string()));
        }
    }

    fn resolve_pending_edges(&mut self) {
        let mut by_label: BTreeMap<String, BlockId> = BTreeMap::new();
        for block in self.asm.blocks() {
            for label in block.labels() {
                by_label.entry(label.to_string()).or_insert(block.id);
            }
        }
        let edges = std::mem::take(&mut self.pending_edges);
        for (from, label) in edges {
            if let Some(target) = by_label.get(&label) {
                self.asm.add_edge(from, *target);
            }
        }
    }

    /// Deterministic per-scope temporaries: `t0, t1, ...`, declared in
    /// the block that first uses them. Register accounting brackets every
    /// temporary with an activate/deactivate pair.
    fn temp_value(&mut self, class: RegisterClass, size: OpSize) -> Operand {
        let name = format!("t{}", self.temp_counter);
        self.temp_counter += 1;
        self.cur().local(class, &name);
        match Variable::activate(&mut self.registers, ElementId(0), class, size) {
            Some(variable) => variable.deactivate(&mut self.registers),
            None => {
                self.s.result.error(
                    ErrorCode::X000,
                    "register exhaustion while emitting expression",
                    basecode_ast::span(0, 0),
                );
            }
        }
        let id = self.asm.make_named_ref(NamedRefKind::Local, &name);
        Operand::Named(id)
    }

    fn local_operand(&mut self, name: &str) -> Operand {
        let id = self.asm.make_named_ref(NamedRefKind::Local, name);
        Operand::Named(id)
    }

    /// Label stem for expression-level lowering that may run more than
    /// once for the same element.
    fn unique_stem(&mut self, element: ElementId) -> String {
        let seq = self.label_seq;
        self.label_seq += 1;
        format!("{}_{seq}", self.s.elements.expect(element).label_name())
    }

    /// Adjusts an address register by a signed byte offset; frame slots
    /// sit below the frame pointer.
    fn adjust_by_offset(&mut self, address: &Operand, offset: i64) {
        if offset == 0 {
            return;
        }
        let op = if offset < 0 { OpCode::Sub } else { OpCode::Add };
        self.cur().op(
            op,
            OpSize::Qword,
            vec![
                address.clone(),
                address.clone(),
                Operand::qword(offset.unsigned_abs()),
            ],
        );
    }

    fn label_operand(&mut self, name: &str) -> Operand {
        self.asm.label_ref(name)
    }

    fn comment(&mut self, text: &str) {
        if self.s.options.listing_comments {
            self.cur().comment(text);
        }
    }

    fn type_of(&mut self, id: ElementId) -> Option<TypeId> {
        sema::infer_type(self.s, id)
    }

    fn size_of_type(&self, ty: TypeId) -> OpSize {
        variables::value_size(self.s, ty)
    }

    fn class_of_type(&self, ty: TypeId) -> RegisterClass {
        variables::register_class(self.s, ty)
    }

    fn initializer_is_uninitialized(&self, initializer: ElementId) -> bool {
        matches!(
            self.s.elements.get(initializer).map(|e| &e.payload),
            Some(ElementPayload::Initializer { expression })
                if matches!(
                    self.s.elements.get(*expression).map(|e| e.kind()),
                    Some(ElementKind::UninitializedLiteral)
                )
        )
    }

    // ------------------------------------------------------------------
    // pipeline stages

    /// Every reachable string literal is interned, except those living
    /// under attributes, directives, or module references.
    fn intern_string_literals(&mut self) {
        let mut excluded = BTreeSet::new();
        for kind in [
            ElementKind::Attribute,
            ElementKind::Directive,
            ElementKind::ModuleReference,
        ] {
            for id in self.s.elements.find_by_kind(kind) {
                collect_subtree(self.s, id, &mut excluded);
            }
        }
        for id in self.s.elements.find_by_kind(ElementKind::StringLiteral) {
            if excluded.contains(&id) {
                continue;
            }
            let value = match &self.s.elements.expect(id).payload {
                ElementPayload::StringLiteral { value } => value.clone(),
                _ => continue,
            };
            self.s.interner.intern(id, &value);
        }
    }

    fn emit_bootstrap_block(&mut self) {
        let block = self.new_text_block("_bootstrap");
        let target = self.asm.label_ref("_start");
        self.asm.block_mut(block).jump_direct(target);
        self.pending_edges.push((block, "_start".to_string()));
    }

    /// One record per used type: the name as a length-prefixed string,
    /// then the `_ti_array` table of `{len, len, ^name_data}` entries.
    fn emit_type_table(&mut self) {
        let block = self.asm.make_basic_block("");
        self.asm.block_mut(block).section(Section::RoData);

        let used: Vec<TypeId> = self.s.types.used_types().collect();
        for ty in &used {
            let decl = self.s.types.decl(*ty);
            let label = decl.name_literal_label();
            let data_label = decl.name_literal_data_label();
            let name = decl.name();
            let b = self.asm.block_mut(block);
            b.blank_line();
            b.align(4);
            b.string(&label, &data_label, &name);
        }

        {
            let b = self.asm.block_mut(block);
            b.blank_line();
            b.align(8);
            b.label("_ti_array");
            b.qwords(vec![DataValue::Int(used.len() as u64)]);
        }

        let comments = self.s.options.listing_comments;
        for ty in &used {
            let decl = self.s.types.decl(*ty);
            let info_label = decl.info_label();
            let name = decl.name();
            let name_len = name.len() as u32;
            let data_label = decl.name_literal_data_label();
            let data_ref = self.asm.make_named_ref(NamedRefKind::Label, &data_label);
            let b = self.asm.block_mut(block);
            b.blank_line();
            if comments {
                b.comment(&format!("type: {name}"));
            }
            b.label(&info_label);
            b.dwords(vec![name_len]);
            b.dwords(vec![name_len]);
            b.qwords(vec![DataValue::Ref(data_ref)]);
        }
    }

    fn emit_interned_string_table(&mut self) -> Option<()> {
        let block = self.asm.make_basic_block("");
        let comments = self.s.options.listing_comments;
        {
            let b = self.asm.block_mut(block);
            b.section(Section::RoData);
            if comments {
                b.comment("interned string literals");
            }
        }

        let entries: Vec<(u32, String)> = self
            .s
            .interner
            .iter()
            .map(|(id, value)| (id, value.to_string()))
            .collect();
        for (intern_id, raw) in entries {
            let escaped = match interner::escape(&raw) {
                Ok(escaped) => escaped,
                Err(sequence) => {
                    self.s.result.error(
                        ErrorCode::X000,
                        format!("invalid escape sequence: {sequence}"),
                        basecode_ast::span(0, 0),
                    );
                    return None;
                }
            };
            let b = self.asm.block_mut(block);
            b.blank_line();
            b.align(4);
            if comments {
                b.comment(&format!("\"{raw}\""));
            }
            b.string(
                &StringInterner::entry_label(intern_id),
                &StringInterner::data_label(intern_id),
                &escaped,
            );
        }
        Some(())
    }

    /// Module-level variables grouped by section, in insertion order. No
    /// variable appears in more than one section.
    fn emit_section_tables(&mut self) {
        for section in [Section::RoData, Section::Data, Section::Bss] {
            let members: Vec<ElementId> = self.plan.section(section).to_vec();
            if members.is_empty() {
                continue;
            }
            let block = self.asm.make_basic_block("");
            self.asm.block_mut(block).section(section);
            for var in members {
                self.emit_section_variable(block, var);
            }
        }
    }

    fn emit_section_variable(&mut self, block: BlockId, var: ElementId) {
        let Some(plan) = self.plan.plan(var) else {
            return;
        };
        let label = plan.label.clone();
        let Some(ty) = self.s.identifier_type(var) else {
            return;
        };
        let decl = self.s.types.decl(ty);
        let alignment = decl.alignment.max(1) as u8;
        let size = decl.size;
        let type_name = decl.name();
        let is_composite = decl.is_composite();

        let initializer = match &self.s.elements.expect(var).payload {
            ElementPayload::Identifier { initializer, .. } => *initializer,
            _ => None,
        };
        let baked = initializer.and_then(|init| {
            self.s
                .elements
                .as_integer(init)
                .or_else(|| self.s.elements.as_signed_integer(init).map(|v| v as u64))
                .or_else(|| {
                    self.s.elements.as_float(init).map(|v| match size {
                        4 => (v as f32).to_bits() as u64,
                        _ => v.to_bits(),
                    })
                })
                .or_else(|| self.s.elements.as_bool(init).map(u64::from))
        });
        let comments = self.s.options.listing_comments;

        let b = self.asm.block_mut(block);
        b.blank_line();
        if alignment > 1 {
            b.align(alignment);
        }
        if comments {
            b.comment(&format!("identifier type: {type_name}"));
        }
        b.label(&label);

        if is_composite {
            b.reserve_byte(size.max(1));
            return;
        }
        match (baked, size) {
            (Some(v), 1) => b.bytes(vec![v as u8]),
            (Some(v), 2) => b.words(vec![v as u16]),
            (Some(v), 4) => b.dwords(vec![v as u32]),
            (Some(v), _) => b.qwords(vec![DataValue::Int(v)]),
            (None, 1) => b.reserve_byte(1),
            (None, 2) => b.reserve_word(1),
            (None, 4) => b.reserve_dword(1),
            (None, _) => b.reserve_qword(1),
        }
    }

    // ------------------------------------------------------------------
    // procedures

    /// Call-graph walk from module-level call sites; only reachable
    /// instances get bodies, in order of first discovery.
    fn reachable_instances(&self) -> Vec<ElementId> {
        let mut order = Vec::new();
        let mut seen = BTreeSet::new();
        let mut queue = Vec::new();

        for call in self.s.elements.find_by_kind(ElementKind::ProcedureCall) {
            let element = self.s.elements.expect(call);
            let local = element
                .parent_scope
                .map(|scope| self.s.scopes.within_local_scope(scope))
                .unwrap_or(false);
            if local {
                continue;
            }
            if let ElementPayload::ProcedureCall {
                instance: Some(instance),
                ..
            } = &element.payload
            {
                queue.push(*instance);
            }
        }

        let mut index = 0;
        while index < queue.len() {
            let instance = queue[index];
            index += 1;
            if !seen.insert(instance) {
                continue;
            }
            order.push(instance);

            let mut subtree = BTreeSet::new();
            collect_subtree(self.s, instance, &mut subtree);
            for id in subtree {
                if let Some(element) = self.s.elements.get(id) {
                    if let ElementPayload::ProcedureCall {
                        instance: Some(callee),
                        ..
                    } = &element.payload
                    {
                        queue.push(*callee);
                    }
                }
            }
        }
        order
    }

    fn emit_procedures(&mut self) {
        for instance in self.reachable_instances() {
            self.emit_procedure(instance);
        }
    }

    /// Frame declarations of one procedure: `(label, offset, type,
    /// is_parameter)` in layout order.
    fn frame_declarations(
        &self,
        proc_type: TypeId,
        scope_block: ElementId,
    ) -> Vec<(String, i64, TypeId, bool)> {
        let mut out: Vec<(String, i64, TypeId, bool)> = Vec::new();
        if let TypeKind::Procedure { parameters, .. } = &self.s.types.decl(proc_type).kind {
            for param in parameters.iter() {
                let Some(declaration) = param.declaration else {
                    continue;
                };
                if let Some(plan) = self.plan.plan(declaration) {
                    out.push((
                        plan.label.clone(),
                        plan.frame_offset.unwrap_or(0),
                        param.ty,
                        true,
                    ));
                }
            }
        }

        let frame_scope = block_frame_scope(self.s, scope_block);
        for plan in self.plan.plans() {
            if plan.frame_offset.is_none() || plan.section.is_some() {
                continue;
            }
            if out.iter().any(|(label, _, _, is_param)| *is_param && *label == plan.label) {
                continue;
            }
            let element = self.s.elements.expect(plan.element);
            let in_frame = element
                .parent_scope
                .map(|scope| self.s.scopes.enclosing_frame(scope) == frame_scope)
                .unwrap_or(false)
                && frame_scope.is_some();
            if !in_frame {
                continue;
            }
            let Some(ty) = self.s.identifier_type(plan.element) else {
                continue;
            };
            out.push((plan.label.clone(), plan.frame_offset.unwrap_or(0), ty, false));
        }
        out
    }

    fn emit_procedure(&mut self, instance: ElementId) {
        let (proc_type, scope_block) = match &self.s.elements.expect(instance).payload {
            ElementPayload::ProcedureInstance {
                proc_type, scope, ..
            } => (*proc_type, *scope),
            _ => return,
        };
        let label = self
            .instance_labels
            .get(&instance)
            .cloned()
            .unwrap_or_else(|| self.s.elements.expect(instance).label_name());

        let block = self.asm.make_basic_block("");
        {
            let b = self.asm.block_mut(block);
            b.section(Section::Text);
            b.blank_line();
            b.align(INSTRUCTION_ALIGNMENT);
            b.label(&label);
        }
        self.set_current(block);
        self.temp_counter = 0;

        // prologue: save caller frame, adopt our own
        self.comment(&format!("proc: {label}"));
        self.cur().push_op(OpSize::Qword, Operand::Fp);
        self.cur().move_op(OpSize::Qword, Operand::Fp, Operand::Sp);

        let declarations = self.frame_declarations(proc_type, scope_block);
        let mut scalars = Vec::new();
        let mut local_bytes = 0i64;
        for (name, offset, ty, is_param) in &declarations {
            let class = self.class_of_type(*ty);
            let size = self.size_of_type(*ty);
            let composite = self.s.types.decl(*ty).is_composite();
            let byte_size = self.s.types.decl(*ty).size;
            self.cur().local(class, name);
            self.cur().frame_offset(name, *offset);
            if !composite {
                scalars.push(name.clone());
            }
            if *is_param && !composite {
                let operand = self.local_operand(name);
                self.cur().load(size, operand, Operand::Fp, *offset);
            }
            if !is_param {
                local_bytes += ((byte_size as i64 + 7) / 8).max(1) * 8;
            }
        }
        if local_bytes > 0 {
            self.cur().op(
                OpCode::Sub,
                OpSize::Qword,
                vec![Operand::Sp, Operand::Sp, Operand::qword(local_bytes as u64)],
            );
        }

        self.frame = Some(Frame { scalars });
        self.emit_scope_block(scope_block);

        if !self.current_terminated() {
            self.emit_frame_teardown();
            self.cur().rts();
        }
        self.frame = None;
        self.current = None;
    }

    fn emit_frame_teardown(&mut self) {
        self.cur().move_op(OpSize::Qword, Operand::Sp, Operand::Fp);
        self.cur().pop_op(OpSize::Qword, Operand::Fp);
    }

    // ------------------------------------------------------------------
    // program skeleton blocks

    fn emit_start_block(&mut self) -> BlockId {
        let block = self.asm.make_basic_block("");
        let b = self.asm.block_mut(block);
        b.section(Section::Text);
        b.blank_line();
        b.align(INSTRUCTION_ALIGNMENT);
        b.label("_start");
        b.move_op(OpSize::Qword, Operand::Fp, Operand::Sp);
        block
    }

    /// Runtime initialisation of module variables whose values cannot be
    /// baked into the image. Returns `(head, tail)` for edge chaining.
    fn emit_initializer_block(&mut self) -> (BlockId, BlockId) {
        let block = self.asm.make_basic_block("");
        {
            let b = self.asm.block_mut(block);
            b.section(Section::Text);
            b.blank_line();
            b.align(INSTRUCTION_ALIGNMENT);
            b.label("_initializer");
        }
        self.set_current(block);
        self.temp_counter = 0;

        let mut to_init = Vec::new();
        for section in [Section::RoData, Section::Data, Section::Bss] {
            for var in self.plan.section(section) {
                let Some(ty) = self.s.identifier_type(*var) else {
                    continue;
                };
                let decl_is_composite = self.s.types.decl(ty).is_composite();
                let (constant, initializer) = match &self.s.elements.expect(*var).payload {
                    ElementPayload::Identifier {
                        constant,
                        initializer,
                        ..
                    } => (*constant, *initializer),
                    _ => continue,
                };
                if constant && !decl_is_composite {
                    continue;
                }
                let Some(initializer) = initializer else {
                    continue;
                };
                if self.initializer_is_uninitialized(initializer) {
                    continue;
                }
                // scalar literals were baked into the section image
                if !decl_is_composite && self.s.elements.is_constant(initializer) {
                    continue;
                }
                to_init.push(*var);
            }
        }

        for var in to_init {
            self.emit_variable_initializer(var);
        }
        let tail = self.current.unwrap_or(block);
        self.current = None;
        (block, tail)
    }

    /// Decomposes one variable's initialisation: scalars store their
    /// value, struct fields walk in declaration order with running
    /// aligned offsets, union storage stays untouched, enums store the
    /// backing primitive.
    fn emit_variable_initializer(&mut self, var: ElementId) {
        let Some(plan) = self.plan.plan(var) else {
            return;
        };
        let label = plan.label.clone();
        let Some(ty) = self.s.identifier_type(var) else {
            return;
        };

        let symbol_name = match &self.s.elements.expect(var).payload {
            ElementPayload::Identifier { symbol, .. } => symbol.fully_qualified(),
            _ => label.clone(),
        };
        let type_name = self.s.types.decl(ty).name();
        self.comment(&format!("initializer: {symbol_name}: {type_name}"));

        let base = self.temp_value(RegisterClass::Integer, OpSize::Qword);
        let address = self.label_operand(&label);
        self.cur().move_op(OpSize::Qword, base.clone(), address);

        self.emit_initializer_fields(var, ty, base, 0);
    }

    fn emit_initializer_fields(&mut self, var: ElementId, ty: TypeId, base: Operand, offset: i64) {
        let kind = self.s.types.decl(ty).kind.clone();
        match kind {
            TypeKind::Composite { composite, fields } => match composite {
                CompositeKind::Union => {
                    // intentional no-op: the writer owns union storage
                }
                CompositeKind::Enum => {
                    self.emit_primitive_initializer(var, ty, base, offset);
                }
                CompositeKind::Struct => {
                    for field in fields.iter() {
                        let field_var = field
                            .declaration
                            .and_then(|d| match &self.s.elements.get(d)?.payload {
                                ElementPayload::Field { identifier } => Some(*identifier),
                                _ => None,
                            })
                            .unwrap_or(var);
                        self.emit_initializer_fields(
                            field_var,
                            field.ty,
                            base.clone(),
                            offset + field.offset as i64,
                        );
                    }
                }
            },
            _ => self.emit_primitive_initializer(var, ty, base, offset),
        }
    }

    fn emit_primitive_initializer(&mut self, var: ElementId, ty: TypeId, base: Operand, offset: i64) {
        let size = OpSize::for_byte_size(self.s.types.decl(ty).size);
        let initializer = match self.s.elements.get(var).map(|e| &e.payload) {
            Some(ElementPayload::Identifier { initializer, .. }) => *initializer,
            _ => None,
        };
        let value = match initializer {
            Some(init) if self.initializer_is_uninitialized(init) => return,
            Some(init) => match self.emit_expression_of_initializer(init) {
                Some(value) => value.operand,
                None => Operand::imm(0, size),
            },
            None => Operand::imm(0, size),
        };
        self.cur().store(size, base, value, offset);
    }

    fn emit_expression_of_initializer(&mut self, initializer: ElementId) -> Option<EmitValue> {
        let expression = match &self.s.elements.get(initializer)?.payload {
            ElementPayload::Initializer { expression } => *expression,
            _ => initializer,
        };
        self.emit_expression(expression)
    }

    /// Composite module variables get their addresses staged for
    /// teardown, mirroring the initializer walk.
    fn emit_finalizer_block(&mut self) -> BlockId {
        let block = self.asm.make_basic_block("");
        {
            let b = self.asm.block_mut(block);
            b.section(Section::Text);
            b.blank_line();
            b.align(INSTRUCTION_ALIGNMENT);
            b.label("_finalizer");
        }
        self.set_current(block);
        self.temp_counter = 0;

        let mut to_finalize = Vec::new();
        for section in [Section::RoData, Section::Data, Section::Bss] {
            for var in self.plan.section(section) {
                let Some(ty) = self.s.identifier_type(*var) else {
                    continue;
                };
                if self.s.types.decl(ty).is_composite() {
                    to_finalize.push((*var, ty));
                }
            }
        }
        for (var, ty) in to_finalize {
            let Some(plan) = self.plan.plan(var) else {
                continue;
            };
            let label = plan.label.clone();
            let type_name = self.s.types.decl(ty).name();
            let class = self.class_of_type(ty);
            self.comment(&format!("finalizer: {label}: {type_name}"));
            let staged = self.temp_value(class, OpSize::Qword);
            let address = self.label_operand(&label);
            self.cur().move_op(OpSize::Qword, staged, address);
        }
        self.current = None;
        block
    }

    fn emit_end_block(&mut self) -> BlockId {
        let block = self.asm.make_basic_block("");
        let b = self.asm.block_mut(block);
        b.section(Section::Text);
        b.blank_line();
        b.align(INSTRUCTION_ALIGNMENT);
        b.label("_end");
        b.exit();
        block
    }

    /// Module top-level scopes, in program order (imported modules were
    /// appended to the program before their importers).
    fn implicit_blocks(&mut self) -> Vec<ElementId> {
        let Some(program) = self.s.program else {
            return Vec::new();
        };
        let modules = match &self.s.elements.expect(program).payload {
            ElementPayload::Program { modules } => modules.clone(),
            _ => Vec::new(),
        };
        let mut blocks = Vec::new();
        for module in modules {
            if let ElementPayload::Module { block, .. } = &self.s.elements.expect(module).payload {
                blocks.push(*block);
            }
        }
        blocks
    }

    fn emit_implicit_block(&mut self, block_element: ElementId) -> (BlockId, BlockId) {
        let label = self.s.elements.expect(block_element).label_name();
        let module_name = self
            .s
            .elements
            .expect(block_element)
            .module
            .and_then(|m| match &self.s.elements.get(m)?.payload {
                ElementPayload::Module { name, .. } => Some(name.clone()),
                _ => None,
            });

        let block = self.asm.make_basic_block("");
        {
            let b = self.asm.block_mut(block);
            b.section(Section::Text);
            b.blank_line();
        }
        self.set_current(block);
        self.temp_counter = 0;
        if let Some(name) = module_name {
            self.comment(&format!("module: {name}"));
        }
        self.cur().label(&label);

        self.emit_scope_block(block_element);
        let tail = self.current.unwrap_or(block);
        self.current = None;
        (block, tail)
    }

    // ------------------------------------------------------------------
    // statements

    fn emit_scope_block(&mut self, block_element: ElementId) {
        let (scope, statements) = match &self.s.elements.expect(block_element).payload {
            ElementPayload::Block { scope, statements } => (*scope, statements.clone()),
            _ => return,
        };
        let defers = self.s.scopes.scope(scope).defers.clone();
        self.defer_stack.push(defers);

        for statement in statements {
            if self.current_terminated() {
                break;
            }
            self.emit_statement(statement);
            if self.s.result.is_failed() {
                break;
            }
        }

        let defers = self.defer_stack.pop().unwrap_or_default();
        if !self.current_terminated() {
            for defer in defers.iter().rev() {
                self.emit_deferred(*defer);
            }
        }
    }

    fn emit_deferred(&mut self, defer: ElementId) {
        if let ElementPayload::Defer { expression } = &self.s.elements.expect(defer).payload {
            let expression = *expression;
            self.emit_expression(expression);
        }
    }

    fn emit_statement(&mut self, statement: ElementId) {
        let (expression, labels) = match &self.s.elements.expect(statement).payload {
            ElementPayload::Statement { expression, labels } => (*expression, labels.clone()),
            _ => (Some(statement), Vec::new()),
        };
        let Some(expression) = expression else {
            return;
        };
        let root = self.unwrap_expression(expression);
        let label = labels.first().cloned();

        match self.s.elements.expect(root).kind() {
            ElementKind::Declaration => self.emit_declaration_statement(root),
            ElementKind::If => self.emit_if(root),
            ElementKind::While => self.emit_while(root, label),
            ElementKind::For => self.emit_for(root, label),
            ElementKind::Switch => self.emit_switch(root, label),
            ElementKind::Break => self.emit_break(root),
            ElementKind::Continue => self.emit_continue(root),
            ElementKind::Return => self.emit_return(root),
            ElementKind::Defer => {} // fired on scope exit
            ElementKind::Block => self.emit_scope_block(root),
            ElementKind::With => {
                if let ElementPayload::With { body, .. } = &self.s.elements.expect(root).payload {
                    let body = *body;
                    self.emit_scope_block(body);
                }
            }
            ElementKind::Import
            | ElementKind::Namespace
            | ElementKind::RawBlock
            | ElementKind::Directive
            | ElementKind::Attribute
            | ElementKind::Label => {}
            _ => {
                self.emit_expression(root);
            }
        }
    }

    fn unwrap_expression(&self, id: ElementId) -> ElementId {
        match &self.s.elements.expect(id).payload {
            ElementPayload::Expression { root } => self.unwrap_expression(*root),
            _ => id,
        }
    }

    /// Local declarations initialise their frame slot in place; module
    /// declarations were handled by the section tables and the
    /// `_initializer` block.
    fn emit_declaration_statement(&mut self, declaration: ElementId) {
        if self.frame.is_none() {
            return;
        }
        let identifier = match &self.s.elements.expect(declaration).payload {
            ElementPayload::Declaration { identifier } => *identifier,
            _ => return,
        };
        self.emit_identifier_init(identifier);
    }

    fn emit_identifier_init(&mut self, identifier: ElementId) {
        let initializer = match &self.s.elements.expect(identifier).payload {
            ElementPayload::Identifier { initializer, .. } => *initializer,
            _ => None,
        };
        let Some(initializer) = initializer else {
            return;
        };
        if self.initializer_is_uninitialized(initializer) {
            return;
        }
        // type declarations carry no storage
        if matches!(
            self.s.elements.get(initializer).map(|e| &e.payload),
            Some(ElementPayload::Initializer { expression })
                if matches!(
                    self.s.elements.get(*expression).map(|e| e.kind()),
                    Some(
                        ElementKind::TypeReference
                            | ElementKind::ProcedureInstance
                            | ElementKind::Namespace
                            | ElementKind::ModuleReference
                    )
                )
        ) {
            return;
        }

        let ty = self.s.identifier_type(identifier);
        let composite = ty
            .map(|ty| self.s.types.decl(ty).is_composite())
            .unwrap_or(false);
        let Some(value) = self.emit_expression_of_initializer(initializer) else {
            return;
        };
        if composite {
            let Some(plan) = self.plan.plan(identifier) else {
                return;
            };
            let size = ty.map(|ty| self.s.types.decl(ty).size).unwrap_or(8);
            let destination = if let (Some(offset), None) = (plan.frame_offset, plan.section) {
                let address = self.temp_value(RegisterClass::Integer, OpSize::Qword);
                self.cur().move_op(OpSize::Qword, address.clone(), Operand::Fp);
                self.adjust_by_offset(&address, offset);
                address
            } else {
                let label = plan.label.clone();
                let address = self.temp_value(RegisterClass::Integer, OpSize::Qword);
                let label_operand = self.label_operand(&label);
                self.cur().move_op(OpSize::Qword, address.clone(), label_operand);
                address
            };
            self.cur().op(
                OpCode::Copy,
                OpSize::Byte,
                vec![destination, value.operand, Operand::qword(size as u64)],
            );
        } else {
            self.store_to_identifier(identifier, value);
        }
    }

    // ------------------------------------------------------------------
    // control flow lowering

    /// predicate -> true -> false -> exit, branch-if-zero to the false
    /// label, jump from the true block to the exit label unless already
    /// terminated.
    fn emit_if(&mut self, element: ElementId) {
        let (predicate, true_branch, false_branch) = match &self.s.elements.expect(element).payload
        {
            ElementPayload::If {
                predicate,
                true_branch,
                false_branch,
            } => (*predicate, *true_branch, *false_branch),
            _ => return,
        };
        let stem = self.s.elements.expect(element).label_name();
        let true_label = format!("{stem}_true");
        let false_label = format!("{stem}_false");
        let exit_label = format!("{stem}_exit");

        self.continue_in(&format!("{stem}_entry"));
        if let Some(value) = self.emit_expression(predicate) {
            let target = self.label_operand(&false_label);
            self.cur().bz(value.size, value.operand, target);
        }
        self.branch_edge_from_current(&false_label);

        self.continue_in(&true_label);
        self.emit_scope_block(true_branch);
        if !self.current_terminated() {
            self.jump_to_label(&exit_label);
        }

        let false_block = self.new_text_block(&false_label);
        self.set_current(false_block);
        if let Some(false_branch) = false_branch {
            match self.s.elements.expect(false_branch).kind() {
                ElementKind::If => self.emit_if(false_branch),
                _ => self.emit_scope_block(false_branch),
            }
        }

        self.continue_in(&exit_label);
    }

    fn emit_while(&mut self, element: ElementId, label: Option<String>) {
        let (predicate, body) = match &self.s.elements.expect(element).payload {
            ElementPayload::While { predicate, body } => (*predicate, *body),
            _ => return,
        };
        let stem = self.s.elements.expect(element).label_name();
        let predicate_label = format!("{stem}_predicate");
        let body_label = format!("{stem}_body");
        let exit_label = format!("{stem}_exit");

        self.continue_in(&predicate_label);
        if let Some(value) = self.emit_expression(predicate) {
            let target = self.label_operand(&exit_label);
            self.cur().bz(value.size, value.operand, target);
        }
        self.branch_edge_from_current(&exit_label);

        self.flow.push(FlowControl {
            label,
            exit_label: exit_label.clone(),
            continue_label: Some(predicate_label.clone()),
        });
        self.continue_in(&body_label);
        self.emit_scope_block(body);
        self.flow.pop();
        if !self.current_terminated() {
            // back-edge
            self.jump_to_label(&predicate_label);
        }

        let exit = self.new_text_block(&exit_label);
        self.set_current(exit);
    }

    /// Desugared at emit time: synthetic comparison and step operators
    /// are created non-owning and removed once the loop is lowered, so
    /// the element map ends the exact size it started.
    fn emit_for(&mut self, element: ElementId, label: Option<String>) {
        let (induction, stop, step, dir, kind, body) =
            match &self.s.elements.expect(element).payload {
                ElementPayload::For {
                    induction,
                    stop,
                    step,
                    dir,
                    kind,
                    body,
                    ..
                } => (*induction, *stop, *step, *dir, *kind, *body),
                _ => return,
            };
        let identifier = match &self.s.elements.expect(induction).payload {
            ElementPayload::Declaration { identifier } => *identifier,
            _ => return,
        };
        let (symbol, span) = match &self.s.elements.expect(identifier).payload {
            ElementPayload::Identifier { symbol, .. } => {
                (symbol.clone(), self.s.elements.expect(identifier).span)
            }
            _ => return,
        };
        let scope = self.s.elements.expect(element).parent_scope;
        let module = self.s.elements.expect(element).module;

        // induction := start
        self.emit_identifier_init(identifier);

        let ctx = BuildContext::new(module, scope, span);
        let compare_op = match (dir, kind) {
            (0, 1) => BinaryOp::LessThan,
            (0, _) => BinaryOp::LessThanOrEqual,
            (_, 1) => BinaryOp::GreaterThan,
            _ => BinaryOp::GreaterThanOrEqual,
        };
        let step_op = if dir == 0 {
            BinaryOp::Add
        } else {
            BinaryOp::Subtract
        };

        let before = self.s.elements.len();
        let compare_lhs = self.s.elements.make_non_owning(
            ctx,
            ElementPayload::IdentifierReference {
                symbol: symbol.clone(),
                identifier: Some(identifier),
            },
        );
        let compare = self.s.elements.make_non_owning(
            ctx,
            ElementPayload::BinaryOperator {
                op: compare_op,
                lhs: compare_lhs,
                rhs: stop,
            },
        );
        let step_lhs = self.s.elements.make_non_owning(
            ctx,
            ElementPayload::IdentifierReference {
                symbol,
                identifier: Some(identifier),
            },
        );
        let advance = self.s.elements.make_non_owning(
            ctx,
            ElementPayload::BinaryOperator {
                op: step_op,
                lhs: step_lhs,
                rhs: step,
            },
        );

        let stem = self.s.elements.expect(element).label_name();
        let predicate_label = format!("{stem}_predicate");
        let body_label = format!("{stem}_body");
        let step_label = format!("{stem}_step");
        let exit_label = format!("{stem}_exit");

        self.continue_in(&predicate_label);
        if let Some(value) = self.emit_expression(compare) {
            let target = self.label_operand(&exit_label);
            self.cur().bz(value.size, value.operand, target);
        }
        self.branch_edge_from_current(&exit_label);

        self.flow.push(FlowControl {
            label,
            exit_label: exit_label.clone(),
            continue_label: Some(step_label.clone()),
        });
        self.continue_in(&body_label);
        self.emit_scope_block(body);
        self.flow.pop();

        self.continue_in(&step_label);
        if let Some(value) = self.emit_expression(advance) {
            self.store_to_identifier(identifier, value);
        }
        if !self.current_terminated() {
            self.jump_to_label(&predicate_label);
        }

        let exit = self.new_text_block(&exit_label);
        self.set_current(exit);

        // the synthetic helpers leave the map exactly as they found it
        self.s.elements.remove_non_owning(compare);
        self.s.elements.remove_non_owning(advance);
        debug_assert_eq!(self.s.elements.len(), before);
    }

    fn emit_switch(&mut self, element: ElementId, label: Option<String>) {
        let (scrutinee, cases) = match &self.s.elements.expect(element).payload {
            ElementPayload::Switch { scrutinee, cases } => (*scrutinee, cases.clone()),
            _ => return,
        };
        let stem = self.s.elements.expect(element).label_name();
        let exit_label = format!("{stem}_exit");

        self.continue_in(&format!("{stem}_entry"));
        let Some(scrutinee_value) = self.emit_expression(scrutinee) else {
            return;
        };

        self.flow.push(FlowControl {
            label,
            exit_label: exit_label.clone(),
            continue_label: None,
        });

        struct CaseLabels {
            entry: Option<String>,
            body: String,
        }
        let mut labels = Vec::new();
        for case in &cases {
            let case_stem = self.s.elements.expect(*case).label_name();
            let has_predicate = matches!(
                &self.s.elements.expect(*case).payload,
                ElementPayload::Case {
                    expression: Some(_),
                    ..
                }
            );
            labels.push(CaseLabels {
                entry: has_predicate.then(|| format!("{case_stem}_entry")),
                body: format!("{case_stem}_body"),
            });
        }

        for (index, case) in cases.iter().enumerate() {
            let (expression, body) = match &self.s.elements.expect(*case).payload {
                ElementPayload::Case { expression, body } => (*expression, *body),
                _ => continue,
            };
            // mismatches branch to the next case, or out of the switch
            let next_label = labels
                .get(index + 1)
                .map(|l| l.entry.clone().unwrap_or_else(|| l.body.clone()))
                .unwrap_or_else(|| exit_label.clone());

            if let Some(entry_label) = labels[index].entry.clone() {
                self.continue_in(&entry_label);
                if let Some(expression) = expression {
                    let Some(case_value) = self.emit_expression(expression) else {
                        continue;
                    };
                    let matched = self.temp_value(RegisterClass::Integer, OpSize::Byte);
                    self.cur().cmp(
                        scrutinee_value.size,
                        scrutinee_value.operand.clone(),
                        case_value.operand,
                    );
                    self.cur().setcc(OpCode::Setz, matched.clone());
                    let target = self.label_operand(&next_label);
                    self.cur().bz(OpSize::Byte, matched, target);
                    self.branch_edge_from_current(&next_label);
                }
            }

            self.continue_in(&labels[index].body.clone());
            let fell_through = self.case_ends_with_fallthrough(body);
            self.emit_scope_block(body);
            if !self.current_terminated() {
                if fell_through {
                    let next_body = labels
                        .get(index + 1)
                        .map(|l| l.body.clone())
                        .unwrap_or_else(|| exit_label.clone());
                    self.jump_to_label(&next_body);
                } else {
                    self.jump_to_label(&exit_label);
                }
            }
        }

        self.flow.pop();
        let exit = self.new_text_block(&exit_label);
        self.set_current(exit);
    }

    fn case_ends_with_fallthrough(&self, body: ElementId) -> bool {
        let ElementPayload::Block { statements, .. } = &self.s.elements.expect(body).payload else {
            return false;
        };
        let Some(last) = statements.last() else {
            return false;
        };
        match &self.s.elements.expect(*last).payload {
            ElementPayload::Statement {
                expression: Some(expression),
                ..
            } => {
                self.s
                    .elements
                    .expect(self.unwrap_expression(*expression))
                    .kind()
                    == ElementKind::Fallthrough
            }
            _ => false,
        }
    }

    fn emit_break(&mut self, element: ElementId) {
        let label = match &self.s.elements.expect(element).payload {
            ElementPayload::Break { label } => label.clone(),
            _ => None,
        };
        let span = self.s.elements.expect(element).span;
        let target = self
            .flow
            .iter()
            .rev()
            .find(|record| match &label {
                Some(wanted) => record.label.as_deref() == Some(wanted.as_str()),
                None => true,
            })
            .map(|record| record.exit_label.clone());
        match target {
            Some(target) => self.jump_to_label(&target),
            None => self
                .s
                .result
                .error(ErrorCode::P082, "no valid exit label on stack", span),
        }
    }

    fn emit_continue(&mut self, element: ElementId) {
        let label = match &self.s.elements.expect(element).payload {
            ElementPayload::Continue { label } => label.clone(),
            _ => None,
        };
        let span = self.s.elements.expect(element).span;
        let target = self
            .flow
            .iter()
            .rev()
            .filter(|record| record.continue_label.is_some())
            .find(|record| match &label {
                Some(wanted) => record.label.as_deref() == Some(wanted.as_str()),
                None => true,
            })
            .and_then(|record| record.continue_label.clone());
        match target {
            Some(target) => self.jump_to_label(&target),
            None => self
                .s
                .result
                .error(ErrorCode::P082, "no valid continue label on stack", span),
        }
    }

    /// Stores the return value into the frame's return slot, unwinds the
    /// frame, and issues the return instruction. Deferred expressions of
    /// every open scope fire first.
    fn emit_return(&mut self, element: ElementId) {
        let expression = match &self.s.elements.expect(element).payload {
            ElementPayload::Return { expression } => *expression,
            _ => None,
        };

        let defers: Vec<ElementId> = self
            .defer_stack
            .iter()
            .rev()
            .flat_map(|level| level.iter().rev().copied())
            .collect();
        for defer in defers {
            self.emit_deferred(defer);
        }

        if let Some(expression) = expression {
            if let Some(value) = self.emit_expression(expression) {
                self.cur()
                    .store(value.size, Operand::Fp, value.operand, RETURN_SLOT_OFFSET);
            }
        }
        self.emit_frame_teardown();
        self.cur().rts();
    }

    // ------------------------------------------------------------------
    // expressions

    fn emit_expression(&mut self, id: ElementId) -> Option<EmitValue> {
        let payload = self.s.elements.get(id)?.payload.clone();
        match payload {
            ElementPayload::Expression { root }
            | ElementPayload::Initializer { expression: root } => self.emit_expression(root),
            ElementPayload::IntegerLiteral { value, negative } => {
                let ty = self.type_of(id);
                let size = ty.map(|t| self.size_of_type(t)).unwrap_or(OpSize::Qword);
                let bits = if negative {
                    (-(value as i64)) as u64
                } else {
                    value
                };
                Some(EmitValue {
                    operand: Operand::imm(bits, size),
                    size,
                    class: RegisterClass::Integer,
                })
            }
            ElementPayload::FloatLiteral { value } => {
                let ty = self.type_of(id);
                let size = ty.map(|t| self.size_of_type(t)).unwrap_or(OpSize::Qword);
                Some(EmitValue {
                    operand: Operand::Float { value, size },
                    size,
                    class: RegisterClass::FloatingPoint,
                })
            }
            ElementPayload::BooleanLiteral { value } => Some(EmitValue {
                operand: Operand::imm(u64::from(value), OpSize::Byte),
                size: OpSize::Byte,
                class: RegisterClass::Integer,
            }),
            ElementPayload::CharacterLiteral { value } => Some(EmitValue {
                operand: Operand::imm(value as u64, OpSize::Dword),
                size: OpSize::Dword,
                class: RegisterClass::Integer,
            }),
            ElementPayload::NilLiteral => Some(EmitValue {
                operand: Operand::qword(0),
                size: OpSize::Qword,
                class: RegisterClass::Integer,
            }),
            ElementPayload::StringLiteral { .. } => {
                let data_label = self.s.interner.element_data_label(id)?;
                let operand = self.label_operand(&data_label);
                Some(EmitValue {
                    operand,
                    size: OpSize::Qword,
                    class: RegisterClass::Integer,
                })
            }
            ElementPayload::TypeLiteral { ty } => {
                let label = self.s.types.decl(ty).info_label();
                let operand = self.label_operand(&label);
                Some(EmitValue {
                    operand,
                    size: OpSize::Qword,
                    class: RegisterClass::Integer,
                })
            }
            ElementPayload::IdentifierReference { identifier, .. } => {
                self.emit_identifier_value(identifier?)
            }
            ElementPayload::UnaryOperator { op, rhs } => self.emit_unary(op, rhs),
            ElementPayload::BinaryOperator { op, lhs, rhs } => self.emit_binary(id, op, lhs, rhs),
            ElementPayload::Cast { target, expression } => self.emit_cast(target, expression),
            ElementPayload::Transmute { target, expression } => {
                let value = self.emit_expression(expression)?;
                let size = OpSize::for_byte_size(self.s.types.decl(target).size);
                let class = self.class_of_type(target);
                let out = self.temp_value(class, size);
                self.cur().move_op(size, out.clone(), value.operand);
                Some(EmitValue {
                    operand: out,
                    size,
                    class,
                })
            }
            ElementPayload::Intrinsic { kind, arguments } => self.emit_intrinsic(kind, arguments),
            ElementPayload::ProcedureCall { .. } => self.emit_proc_call(id),
            ElementPayload::AssemblyLabel { name } | ElementPayload::LabelReference { name } => {
                let operand = self.label_operand(&name);
                Some(EmitValue {
                    operand,
                    size: OpSize::Qword,
                    class: RegisterClass::Integer,
                })
            }
            _ => None,
        }
    }

    /// Scalars load into their local or through their label; composites
    /// yield their address.
    fn emit_identifier_value(&mut self, identifier: ElementId) -> Option<EmitValue> {
        let ty = self.s.identifier_type(identifier)?;
        let size = self.size_of_type(ty);
        let class = self.class_of_type(ty);
        let composite = self.s.types.decl(ty).is_composite();
        let plan = self.plan.plan(identifier)?.clone();

        if plan.frame_offset.is_some() && plan.section.is_none() {
            if composite {
                let offset = plan.frame_offset.unwrap();
                let address = self.temp_value(RegisterClass::Integer, OpSize::Qword);
                self.cur()
                    .move_op(OpSize::Qword, address.clone(), Operand::Fp);
                self.adjust_by_offset(&address, offset);
                return Some(EmitValue {
                    operand: address,
                    size: OpSize::Qword,
                    class: RegisterClass::Integer,
                });
            }
            let operand = self.local_operand(&plan.label);
            return Some(EmitValue {
                operand,
                size,
                class,
            });
        }

        // module storage, addressed through its label
        let label = plan.label.clone();
        let address = self.temp_value(RegisterClass::Integer, OpSize::Qword);
        let label_operand = self.label_operand(&label);
        self.cur()
            .move_op(OpSize::Qword, address.clone(), label_operand);
        if composite {
            return Some(EmitValue {
                operand: address,
                size: OpSize::Qword,
                class: RegisterClass::Integer,
            });
        }
        self.comment(&format!("load global value: {label}"));
        let value = self.temp_value(class, size);
        if size != OpSize::Qword {
            self.cur().clr(OpSize::Qword, value.clone());
        }
        self.cur().load(size, value.clone(), address, 0);
        Some(EmitValue {
            operand: value,
            size,
            class,
        })
    }

    fn emit_unary(&mut self, op: UnaryOp, rhs: ElementId) -> Option<EmitValue> {
        match op {
            UnaryOp::Negate => {
                let value = self.emit_expression(rhs)?;
                let out = self.temp_value(value.class, value.size);
                self.cur()
                    .op(OpCode::Neg, value.size, vec![out.clone(), value.operand]);
                Some(EmitValue {
                    operand: out,
                    size: value.size,
                    class: value.class,
                })
            }
            UnaryOp::BinaryNot => {
                let value = self.emit_expression(rhs)?;
                let out = self.temp_value(value.class, value.size);
                self.cur()
                    .op(OpCode::Not, value.size, vec![out.clone(), value.operand]);
                Some(EmitValue {
                    operand: out,
                    size: value.size,
                    class: value.class,
                })
            }
            UnaryOp::LogicalNot => {
                let value = self.emit_expression(rhs)?;
                let out = self.temp_value(RegisterClass::Integer, OpSize::Byte);
                self.cur()
                    .cmp(value.size, value.operand, Operand::imm(0, value.size));
                self.cur().setcc(OpCode::Setz, out.clone());
                Some(EmitValue {
                    operand: out,
                    size: OpSize::Byte,
                    class: RegisterClass::Integer,
                })
            }
            UnaryOp::PointerDereference => {
                let pointee = self
                    .type_of(rhs)
                    .and_then(|ty| match self.s.types.decl(ty).kind {
                        TypeKind::Pointer { base } => Some(base),
                        _ => None,
                    });
                let pointer = self.emit_expression(rhs)?;
                let size = pointee
                    .map(|ty| self.size_of_type(ty))
                    .unwrap_or(OpSize::Qword);
                let class = pointee
                    .map(|ty| self.class_of_type(ty))
                    .unwrap_or(RegisterClass::Integer);
                let out = self.temp_value(class, size);
                self.cur().load(size, out.clone(), pointer.operand, 0);
                Some(EmitValue {
                    operand: out,
                    size,
                    class,
                })
            }
        }
    }

    fn emit_binary(
        &mut self,
        id: ElementId,
        op: BinaryOp,
        lhs: ElementId,
        rhs: ElementId,
    ) -> Option<EmitValue> {
        if op == BinaryOp::Assignment {
            return self.emit_assignment(id, lhs, rhs);
        }
        if op == BinaryOp::MemberAccess {
            return self.emit_member_value(lhs, rhs);
        }
        if op == BinaryOp::Subscript {
            let (base, offset, element_ty) = self.emit_subscript_address(lhs, rhs)?;
            let size = self.size_of_type(element_ty);
            let class = self.class_of_type(element_ty);
            let out = self.temp_value(class, size);
            self.cur().load(size, out.clone(), base, offset);
            return Some(EmitValue {
                operand: out,
                size,
                class,
            });
        }
        if op.is_logical() {
            return self.emit_logical(id, op, lhs, rhs);
        }
        if op.is_relational() {
            return self.emit_relational(op, lhs, rhs);
        }

        // arithmetic: one instruction, sized by the left operand
        let left = self.emit_expression(lhs)?;
        let right = self.emit_expression(rhs)?;
        let opcode = match op {
            BinaryOp::Add => OpCode::Add,
            BinaryOp::Subtract => OpCode::Sub,
            BinaryOp::Multiply => OpCode::Mul,
            BinaryOp::Divide => OpCode::Div,
            BinaryOp::Modulo => OpCode::Mod,
            BinaryOp::Exponent => OpCode::Pow,
            BinaryOp::BinaryAnd => OpCode::And,
            BinaryOp::BinaryOr => OpCode::Or,
            BinaryOp::BinaryXor => OpCode::Xor,
            BinaryOp::ShiftLeft => OpCode::Shl,
            BinaryOp::ShiftRight => OpCode::Shr,
            BinaryOp::RotateLeft => OpCode::Rol,
            BinaryOp::RotateRight => OpCode::Ror,
            _ => return None,
        };
        let out = self.temp_value(left.class, left.size);
        self.cur().op(
            opcode,
            left.size,
            vec![out.clone(), left.operand, right.operand],
        );
        Some(EmitValue {
            operand: out,
            size: left.size,
            class: left.class,
        })
    }

    /// Signed comparisons come from the left operand's type.
    fn emit_relational(
        &mut self,
        op: BinaryOp,
        lhs: ElementId,
        rhs: ElementId,
    ) -> Option<EmitValue> {
        let signed = self
            .type_of(lhs)
            .map(|ty| self.s.types.decl(ty).is_signed())
            .unwrap_or(false);
        let left = self.emit_expression(lhs)?;
        let right = self.emit_expression(rhs)?;
        let setcc = match (op, signed) {
            (BinaryOp::Equals, _) => OpCode::Setz,
            (BinaryOp::NotEquals, _) => OpCode::Setnz,
            (BinaryOp::LessThan, true) => OpCode::Setl,
            (BinaryOp::LessThan, false) => OpCode::Setb,
            (BinaryOp::LessThanOrEqual, true) => OpCode::Setle,
            (BinaryOp::LessThanOrEqual, false) => OpCode::Setbe,
            (BinaryOp::GreaterThan, true) => OpCode::Setg,
            (BinaryOp::GreaterThan, false) => OpCode::Seta,
            (BinaryOp::GreaterThanOrEqual, true) => OpCode::Setge,
            (BinaryOp::GreaterThanOrEqual, false) => OpCode::Setae,
            _ => return None,
        };
        let out = self.temp_value(RegisterClass::Integer, OpSize::Byte);
        self.cur().cmp(left.size, left.operand, right.operand);
        self.cur().setcc(setcc, out.clone());
        Some(EmitValue {
            operand: out,
            size: OpSize::Byte,
            class: RegisterClass::Integer,
        })
    }

    /// Short-circuit: the left value lands in the result register, a
    /// conditional branch targets the exit label, then the right side
    /// evaluates into the same register.
    fn emit_logical(
        &mut self,
        id: ElementId,
        op: BinaryOp,
        lhs: ElementId,
        rhs: ElementId,
    ) -> Option<EmitValue> {
        let stem = self.unique_stem(id);
        let exit_label = format!("{stem}_exit");
        let out = self.temp_value(RegisterClass::Integer, OpSize::Byte);

        let left = self.emit_expression(lhs)?;
        self.cur().move_op(OpSize::Byte, out.clone(), left.operand);
        let target = self.label_operand(&exit_label);
        match op {
            BinaryOp::LogicalAnd => self.cur().bz(OpSize::Byte, out.clone(), target),
            _ => self.cur().bnz(OpSize::Byte, out.clone(), target),
        }

        let right = self.emit_expression(rhs)?;
        self.cur().move_op(OpSize::Byte, out.clone(), right.operand);
        self.cur().label(&exit_label);

        Some(EmitValue {
            operand: out,
            size: OpSize::Byte,
            class: RegisterClass::Integer,
        })
    }

    /// Member access as an rvalue: scalars load through the address pair,
    /// composites hand back the computed address.
    fn emit_member_value(&mut self, lhs: ElementId, rhs: ElementId) -> Option<EmitValue> {
        let (base, offset, field_ty) = self.emit_member_address(lhs, rhs)?;
        let composite = self.s.types.decl(field_ty).is_composite();
        if composite {
            let out = self.temp_value(RegisterClass::Integer, OpSize::Qword);
            self.cur().move_op(OpSize::Qword, out.clone(), base);
            self.adjust_by_offset(&out, offset);
            return Some(EmitValue {
                operand: out,
                size: OpSize::Qword,
                class: RegisterClass::Integer,
            });
        }
        let size = OpSize::for_byte_size(self.s.types.decl(field_ty).size);
        let class = self.class_of_type(field_ty);
        let out = self.temp_value(class, size);
        self.cur().load(size, out.clone(), base, offset);
        Some(EmitValue {
            operand: out,
            size,
            class,
        })
    }

    /// `(base_address, byte_offset)` for a member chain; dereferences a
    /// pointer base once. The pair is consumed by assignment without
    /// materialising a temporary.
    fn emit_member_address(
        &mut self,
        lhs: ElementId,
        rhs: ElementId,
    ) -> Option<(Operand, i64, TypeId)> {
        let (base, base_offset, base_ty) = self.emit_address(lhs)?;
        let (struct_ty, base, base_offset) = match self.s.types.decl(base_ty).kind {
            TypeKind::Pointer { base: pointee } => {
                let loaded = self.temp_value(RegisterClass::Integer, OpSize::Qword);
                self.cur()
                    .load(OpSize::Qword, loaded.clone(), base, base_offset);
                (pointee, loaded, 0)
            }
            _ => (base_ty, base, base_offset),
        };
        let member = sema::member_name(self.s, rhs)?;
        let field = self.s.types.decl(struct_ty).fields()?.find(&member)?;
        Some((base, base_offset + field.offset as i64, field.ty))
    }

    fn emit_subscript_address(
        &mut self,
        lhs: ElementId,
        rhs: ElementId,
    ) -> Option<(Operand, i64, TypeId)> {
        let (base, offset, base_ty) = self.emit_address(lhs)?;
        let element_ty = match self.s.types.decl(base_ty).kind {
            TypeKind::Array { base, .. } => base,
            TypeKind::Pointer { base } => base,
            _ => return None,
        };
        let element_size = self.s.types.decl(element_ty).size.max(1);
        let index = self.emit_expression(rhs)?;
        let scaled = self.temp_value(RegisterClass::Integer, OpSize::Qword);
        self.cur().op(
            OpCode::Mul,
            OpSize::Qword,
            vec![
                scaled.clone(),
                index.operand,
                Operand::qword(element_size as u64),
            ],
        );
        let address = self.temp_value(RegisterClass::Integer, OpSize::Qword);
        self.cur().move_op(OpSize::Qword, address.clone(), base);
        self.cur().op(
            OpCode::Add,
            OpSize::Qword,
            vec![address.clone(), address.clone(), scaled],
        );
        Some((address, offset, element_ty))
    }

    /// Address of an lvalue: `(base_operand, byte_offset, type)`.
    fn emit_address(&mut self, id: ElementId) -> Option<(Operand, i64, TypeId)> {
        let payload = self.s.elements.get(id)?.payload.clone();
        match payload {
            ElementPayload::Expression { root } => self.emit_address(root),
            ElementPayload::IdentifierReference { identifier, .. } => {
                let identifier = identifier?;
                let ty = self.s.identifier_type(identifier)?;
                let plan = self.plan.plan(identifier)?.clone();
                if let (Some(offset), None) = (plan.frame_offset, plan.section) {
                    return Some((Operand::Fp, offset, ty));
                }
                let label = plan.label.clone();
                self.comment(&format!("load global address: {label}"));
                let address = self.temp_value(RegisterClass::Integer, OpSize::Qword);
                let label_operand = self.label_operand(&label);
                self.cur()
                    .move_op(OpSize::Qword, address.clone(), label_operand);
                Some((address, 0, ty))
            }
            ElementPayload::BinaryOperator {
                op: BinaryOp::MemberAccess,
                lhs,
                rhs,
            } => self.emit_member_address(lhs, rhs),
            ElementPayload::BinaryOperator {
                op: BinaryOp::Subscript,
                lhs,
                rhs,
            } => self.emit_subscript_address(lhs, rhs),
            ElementPayload::UnaryOperator {
                op: UnaryOp::PointerDereference,
                rhs,
            } => {
                let pointee = self
                    .type_of(rhs)
                    .and_then(|ty| match self.s.types.decl(ty).kind {
                        TypeKind::Pointer { base } => Some(base),
                        _ => None,
                    })?;
                let pointer = self.emit_expression(rhs)?;
                Some((pointer.operand, 0, pointee))
            }
            _ => None,
        }
    }

    /// The lhs produces an address, the rhs a value. Composite-to-
    /// composite assignments byte-copy; mixing composite and scalar was
    /// rejected by the checker before emission.
    fn emit_assignment(
        &mut self,
        id: ElementId,
        lhs: ElementId,
        rhs: ElementId,
    ) -> Option<EmitValue> {
        let span = self.s.elements.expect(id).span;

        // direct writes to scalar frame locals skip the address dance
        if let Some(identifier) = self.scalar_local_target(lhs) {
            let value = self.emit_expression(rhs)?;
            self.store_to_identifier(identifier, value.clone());
            return Some(value);
        }

        let (base, offset, target_ty) = match self.emit_address(lhs) {
            Some(address) => address,
            None => {
                self.s.result.error(
                    ErrorCode::X000,
                    "assignment target does not produce an address",
                    span,
                );
                return None;
            }
        };
        let target_composite = self.s.types.decl(target_ty).is_composite();
        let target_bytes = self.s.types.decl(target_ty).size;
        let value = self.emit_expression(rhs)?;

        if target_composite {
            let destination = if offset != 0 {
                let adjusted = self.temp_value(RegisterClass::Integer, OpSize::Qword);
                self.cur().move_op(OpSize::Qword, adjusted.clone(), base);
                self.adjust_by_offset(&adjusted, offset);
                adjusted
            } else {
                base
            };
            self.cur().op(
                OpCode::Copy,
                OpSize::Byte,
                vec![
                    destination,
                    value.operand.clone(),
                    Operand::qword(target_bytes as u64),
                ],
            );
            return Some(value);
        }

        let size = OpSize::for_byte_size(target_bytes);
        self.cur().store(size, base, value.operand.clone(), offset);
        Some(value)
    }

    fn scalar_local_target(&self, lhs: ElementId) -> Option<ElementId> {
        let root = self.unwrap_expression(lhs);
        let identifier = match &self.s.elements.get(root)?.payload {
            ElementPayload::IdentifierReference {
                identifier: Some(identifier),
                ..
            } => *identifier,
            _ => return None,
        };
        let plan = self.plan.plan(identifier)?;
        if plan.section.is_some() || plan.frame_offset.is_none() {
            return None;
        }
        let ty = self.s.identifier_type(identifier)?;
        (!self.s.types.decl(ty).is_composite()).then_some(identifier)
    }

    fn store_to_identifier(&mut self, identifier: ElementId, value: EmitValue) {
        let Some(plan) = self.plan.plan(identifier).cloned() else {
            return;
        };
        if plan.section.is_none() && plan.frame_offset.is_some() {
            let local = self.local_operand(&plan.label);
            self.cur().move_op(value.size, local, value.operand);
            return;
        }
        let address = self.temp_value(RegisterClass::Integer, OpSize::Qword);
        let label_operand = self.label_operand(&plan.label);
        self.cur()
            .move_op(OpSize::Qword, address.clone(), label_operand);
        self.cur().store(value.size, address, value.operand, 0);
    }

    fn emit_cast(&mut self, target: TypeId, expression: ElementId) -> Option<EmitValue> {
        let source_ty = self.type_of(expression)?;
        let value = self.emit_expression(expression)?;
        let mode = self.s.types.cast_mode(source_ty, target)?;
        let target_size = OpSize::for_byte_size(self.s.types.decl(target).size);
        let class = self.class_of_type(target);
        match mode {
            CastMode::Noop => Some(EmitValue {
                operand: value.operand,
                size: target_size,
                class,
            }),
            CastMode::Truncate => {
                let out = self.temp_value(class, target_size);
                self.cur().move_op(target_size, out.clone(), value.operand);
                Some(EmitValue {
                    operand: out,
                    size: target_size,
                    class,
                })
            }
            CastMode::SignExtend => {
                let out = self.temp_value(class, target_size);
                self.cur().moves(target_size, out.clone(), value.operand);
                Some(EmitValue {
                    operand: out,
                    size: target_size,
                    class,
                })
            }
            CastMode::ZeroExtend => {
                let out = self.temp_value(class, target_size);
                self.cur().movez(target_size, out.clone(), value.operand);
                Some(EmitValue {
                    operand: out,
                    size: target_size,
                    class,
                })
            }
            CastMode::FloatTruncate
            | CastMode::FloatExtend
            | CastMode::IntegerToFloat
            | CastMode::FloatToInteger => {
                let out = self.temp_value(class, target_size);
                self.cur()
                    .convert(target_size, out.clone(), value.size, value.operand);
                Some(EmitValue {
                    operand: out,
                    size: target_size,
                    class,
                })
            }
        }
    }

    fn emit_intrinsic(&mut self, kind: IntrinsicKind, arguments: ElementId) -> Option<EmitValue> {
        let args = sema::argument_ids(self.s, arguments);
        match kind {
            IntrinsicKind::AddressOf => {
                // the operand's address, without dereferencing
                let operand = *args.first()?;
                let (base, offset, _) = self.emit_address(operand)?;
                let out = self.temp_value(RegisterClass::Integer, OpSize::Qword);
                self.cur().move_op(OpSize::Qword, out.clone(), base);
                self.adjust_by_offset(&out, offset);
                Some(EmitValue {
                    operand: out,
                    size: OpSize::Qword,
                    class: RegisterClass::Integer,
                })
            }
            IntrinsicKind::Alloc => {
                let size = self.emit_expression(*args.first()?)?;
                let out = self.temp_value(RegisterClass::Integer, OpSize::Qword);
                self.cur()
                    .op(OpCode::Alloc, OpSize::Qword, vec![out.clone(), size.operand]);
                Some(EmitValue {
                    operand: out,
                    size: OpSize::Qword,
                    class: RegisterClass::Integer,
                })
            }
            IntrinsicKind::Free => {
                let pointer = self.emit_expression(*args.first()?)?;
                self.cur()
                    .op(OpCode::Free, OpSize::Qword, vec![pointer.operand]);
                None
            }
            IntrinsicKind::Fill => {
                let base = self.emit_expression(*args.first()?)?;
                let value = self.emit_expression(*args.get(1)?)?;
                let length = self.emit_expression(*args.get(2)?)?;
                self.cur().op(
                    OpCode::Fill,
                    OpSize::Byte,
                    vec![base.operand, value.operand, length.operand],
                );
                None
            }
            IntrinsicKind::Copy => {
                let destination = self.emit_expression(*args.first()?)?;
                let source = self.emit_expression(*args.get(1)?)?;
                let length = self.emit_expression(*args.get(2)?)?;
                self.cur().op(
                    OpCode::Copy,
                    OpSize::Byte,
                    vec![destination.operand, source.operand, length.operand],
                );
                None
            }
            // size_of and type_of were folded before emission
            IntrinsicKind::SizeOf | IntrinsicKind::TypeOf | IntrinsicKind::Range => None,
        }
    }

    // ------------------------------------------------------------------
    // procedure calls

    /// Three sub-blocks: prologue (spill live locals, push arguments
    /// right-to-left, carve the return slot), invoke, epilogue (collect
    /// the return value, pop arguments and live locals).
    fn emit_proc_call(&mut self, call: ElementId) -> Option<EmitValue> {
        let (reference, arguments, proc_type, instance) =
            match &self.s.elements.expect(call).payload {
                ElementPayload::ProcedureCall {
                    reference,
                    arguments,
                    proc_type,
                    instance,
                } => (*reference, *arguments, *proc_type, *instance),
                _ => return None,
            };
        let span = self.s.elements.expect(call).span;
        let proc_type = proc_type?;
        let (foreign, has_return, return_ty) = match &self.s.types.decl(proc_type).kind {
            TypeKind::Procedure {
                foreign, returns, ..
            } => (
                *foreign,
                !returns.is_empty(),
                returns.iter().next().map(|f| f.ty),
            ),
            _ => return None,
        };
        let stem = self.unique_stem(call);
        let args = sema::argument_ids(self.s, arguments);
        let live: Vec<String> = self
            .frame
            .as_ref()
            .map(|f| f.scalars.clone())
            .unwrap_or_default();

        // prologue
        self.continue_in(&format!("{stem}_prologue"));
        if !foreign {
            for name in &live {
                let local = self.local_operand(name);
                self.cur().push_op(OpSize::Qword, local);
            }
        }

        let mut argument_types = Vec::new();
        for arg in args.iter() {
            if let Some(ty) = self.type_of(*arg) {
                argument_types.push(ty);
            }
        }

        let mut argument_bytes = 0u64;
        for arg in args.iter().rev() {
            let ty = self.type_of(*arg);
            let composite = ty
                .map(|ty| self.s.types.decl(ty).is_composite())
                .unwrap_or(false);
            let value = self.emit_expression(*arg)?;
            if composite {
                // composite arguments round up to 8 and byte-copy via SP
                let size = ty.map(|ty| self.s.types.decl(ty).size).unwrap_or(8);
                let rounded = size.div_ceil(8) * 8;
                self.cur().op(
                    OpCode::Sub,
                    OpSize::Qword,
                    vec![Operand::Sp, Operand::Sp, Operand::qword(rounded as u64)],
                );
                self.cur().op(
                    OpCode::Copy,
                    OpSize::Byte,
                    vec![Operand::Sp, value.operand, Operand::qword(size as u64)],
                );
                argument_bytes += rounded as u64;
            } else {
                self.cur().push_op(value.size, value.operand);
                argument_bytes += 8;
            }
        }
        if has_return {
            self.cur().op(
                OpCode::Sub,
                OpSize::Qword,
                vec![Operand::Sp, Operand::Sp, Operand::qword(8)],
            );
        }

        // invoke
        self.continue_in(&format!("{stem}_invoke"));
        if foreign {
            let callee = match &self.s.elements.expect(reference).payload {
                ElementPayload::IdentifierReference {
                    identifier: Some(identifier),
                    ..
                } => *identifier,
                _ => return None,
            };
            let Some(address) = self.s.ffi.address_for(callee) else {
                self.s
                    .result
                    .error(ErrorCode::X000, "unknown foreign address for call", span);
                return None;
            };
            let variadic = self
                .s
                .ffi
                .function(address)
                .map(|f| f.variadic)
                .unwrap_or(false);
            let signature = if variadic {
                // call-site argument types recorded under a fresh id
                self.s
                    .ffi
                    .record_call_site(address, argument_types)
                    .map(|id| Operand::imm(id as u64, OpSize::Dword))
            } else {
                None
            };
            self.cur().call_foreign(Operand::qword(address), signature);
        } else {
            let label = instance.and_then(|i| self.instance_labels.get(&i).cloned())?;
            let target = self.label_operand(&label);
            self.cur().call(target);
        }

        // epilogue
        self.continue_in(&format!("{stem}_epilogue"));
        let mut result = None;
        if has_return {
            let size = return_ty
                .map(|ty| self.size_of_type(ty))
                .unwrap_or(OpSize::Qword);
            let class = return_ty
                .map(|ty| self.class_of_type(ty))
                .unwrap_or(RegisterClass::Integer);
            let out = self.temp_value(class, size);
            self.cur().pop_op(size, out.clone());
            result = Some(EmitValue {
                operand: out,
                size,
                class,
            });
        }
        if argument_bytes > 0 {
            self.cur().op(
                OpCode::Add,
                OpSize::Qword,
                vec![Operand::Sp, Operand::Sp, Operand::qword(argument_bytes)],
            );
        }
        if !foreign {
            for name in live.iter().rev() {
                let local = self.local_operand(name);
                self.cur().pop_op(OpSize::Qword, local);
            }
        }

        result.or(Some(EmitValue {
            operand: Operand::qword(0),
            size: OpSize::Qword,
            class: RegisterClass::Integer,
        }))
    }
}

fn block_frame_scope(session: &Session, block: ElementId) -> Option<ScopeId> {
    match &session.elements.get(block)?.payload {
        ElementPayload::Block { scope, .. } => session.scopes.enclosing_frame(*scope),
        _ => None,
    }
}

fn collect_subtree(session: &Session, root: ElementId, out: &mut BTreeSet<ElementId>) {
    let mut stack = vec![root];
    while let Some(id) = stack.pop() {
        if !out.insert(id) {
            continue;
        }
        if let Some(element) = session.elements.get(id) {
            stack.extend(element.owned_children());
        }
    }
}
