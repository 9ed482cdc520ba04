#![forbid(unsafe_code)]

use std::collections::{BTreeSet, HashMap};

use crate::element::ElementId;
use crate::symbols::QualifiedSymbol;

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TypeId(pub u32);

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum NumberClass {
    Integer,
    FloatingPoint,
    None,
}

/// Whether a value of the type is carried by contained bytes or addressed
/// by reference.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AccessModel {
    Value,
    Pointer,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CompositeKind {
    Struct,
    Union,
    Enum,
}

/// Ordered field layout of a composite, tuple, or procedure signature.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct FieldMap {
    fields: Vec<TypeField>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct TypeField {
    pub name: String,
    pub ty: TypeId,
    pub offset: u32,
    pub size: u32,
    pub declaration: Option<ElementId>,
}

impl FieldMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, field: TypeField) {
        self.fields.push(field);
    }

    pub fn find(&self, name: &str) -> Option<&TypeField> {
        self.fields.iter().find(|f| f.name == name)
    }

    pub fn iter(&self) -> impl Iterator<Item = &TypeField> {
        self.fields.iter()
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum TypeKind {
    Unknown,
    Any,
    /// The `type` meta type produced by `type_of`.
    TypeInfo,
    Module,
    Namespace,
    Generic,
    Family,
    Bool,
    Rune,
    Numeric {
        min: i64,
        max: u64,
        signed: bool,
    },
    Pointer {
        base: TypeId,
    },
    Array {
        base: TypeId,
        length: usize,
    },
    Tuple {
        fields: FieldMap,
    },
    Composite {
        composite: CompositeKind,
        fields: FieldMap,
    },
    Procedure {
        parameters: FieldMap,
        returns: FieldMap,
        foreign: bool,
        variadic: bool,
    },
}

#[derive(Clone, Debug)]
pub struct TypeDecl {
    pub id: TypeId,
    pub symbol: QualifiedSymbol,
    pub size: usize,
    pub alignment: usize,
    pub packed: bool,
    pub number_class: NumberClass,
    pub access_model: AccessModel,
    pub kind: TypeKind,
    layout_final: bool,
}

impl TypeDecl {
    pub fn name(&self) -> String {
        self.symbol.fully_qualified()
    }

    pub fn is_composite(&self) -> bool {
        matches!(
            self.kind,
            TypeKind::Composite { .. } | TypeKind::Tuple { .. } | TypeKind::Array { .. }
        )
    }

    pub fn is_pointer(&self) -> bool {
        matches!(self.kind, TypeKind::Pointer { .. })
    }

    pub fn is_procedure(&self) -> bool {
        matches!(self.kind, TypeKind::Procedure { .. })
    }

    pub fn is_signed(&self) -> bool {
        matches!(self.kind, TypeKind::Numeric { signed: true, .. })
    }

    pub fn fields(&self) -> Option<&FieldMap> {
        match &self.kind {
            TypeKind::Composite { fields, .. } | TypeKind::Tuple { fields } => Some(fields),
            _ => None,
        }
    }

    /// Label of this type's record in the type-info table. Synthesized
    /// names carry punctuation, so labels keep word characters only.
    pub fn info_label(&self) -> String {
        format!("_ti_{}", sanitize_label(&self.symbol.label_name()))
    }

    pub fn name_literal_label(&self) -> String {
        format!("_ti_name_lit_{}", self.id.0)
    }

    pub fn name_literal_data_label(&self) -> String {
        format!("_ti_name_lit_{}_data", self.id.0)
    }
}

/// How a numeric cast lowers; the emitter selects the instruction from
/// this alone.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CastMode {
    Noop,
    Truncate,
    SignExtend,
    ZeroExtend,
    FloatTruncate,
    FloatExtend,
    IntegerToFloat,
    FloatToInteger,
}

struct NumericProperties {
    name: &'static str,
    min: i64,
    max: u64,
    size: usize,
    signed: bool,
    class: NumberClass,
}

const NUMERIC_PROPERTIES: &[NumericProperties] = &[
    NumericProperties { name: "u0", min: 0, max: 0, size: 0, signed: false, class: NumberClass::Integer },
    NumericProperties { name: "u8", min: 0, max: u8::MAX as u64, size: 1, signed: false, class: NumberClass::Integer },
    NumericProperties { name: "u16", min: 0, max: u16::MAX as u64, size: 2, signed: false, class: NumberClass::Integer },
    NumericProperties { name: "u32", min: 0, max: u32::MAX as u64, size: 4, signed: false, class: NumberClass::Integer },
    NumericProperties { name: "u64", min: 0, max: u64::MAX, size: 8, signed: false, class: NumberClass::Integer },
    NumericProperties { name: "s8", min: i8::MIN as i64, max: i8::MAX as u64, size: 1, signed: true, class: NumberClass::Integer },
    NumericProperties { name: "s16", min: i16::MIN as i64, max: i16::MAX as u64, size: 2, signed: true, class: NumberClass::Integer },
    NumericProperties { name: "s32", min: i32::MIN as i64, max: i32::MAX as u64, size: 4, signed: true, class: NumberClass::Integer },
    NumericProperties { name: "s64", min: i64::MIN, max: i64::MAX as u64, size: 8, signed: true, class: NumberClass::Integer },
    NumericProperties { name: "f32", min: 0, max: u32::MAX as u64, size: 4, signed: true, class: NumberClass::FloatingPoint },
    NumericProperties { name: "f64", min: 0, max: u64::MAX, size: 8, signed: true, class: NumberClass::FloatingPoint },
];

/// Holds every built-in and user-declared type; synthesized pointer and
/// array types are interned here so equal shapes share one id.
#[derive(Debug)]
pub struct TypeRegistry {
    types: Vec<TypeDecl>,
    by_name: HashMap<String, TypeId>,
    pointer_cache: HashMap<TypeId, TypeId>,
    array_cache: HashMap<(TypeId, usize), TypeId>,
    used: BTreeSet<TypeId>,
}

impl Default for TypeRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl TypeRegistry {
    pub fn new() -> Self {
        let mut registry = Self {
            types: Vec::new(),
            by_name: HashMap::new(),
            pointer_cache: HashMap::new(),
            array_cache: HashMap::new(),
            used: BTreeSet::new(),
        };
        registry.initialize_core_types();
        registry
    }

    fn initialize_core_types(&mut self) {
        for props in NUMERIC_PROPERTIES {
            self.add(TypeDecl {
                id: TypeId(0),
                symbol: QualifiedSymbol::new(props.name),
                size: props.size,
                alignment: props.size.max(1),
                packed: false,
                number_class: props.class,
                access_model: AccessModel::Value,
                kind: TypeKind::Numeric {
                    min: props.min,
                    max: props.max,
                    signed: props.signed,
                },
                layout_final: true,
            });
        }

        self.add(TypeDecl {
            id: TypeId(0),
            symbol: QualifiedSymbol::new("bool"),
            size: 1,
            alignment: 1,
            packed: false,
            number_class: NumberClass::Integer,
            access_model: AccessModel::Value,
            kind: TypeKind::Bool,
            layout_final: true,
        });

        self.add(TypeDecl {
            id: TypeId(0),
            symbol: QualifiedSymbol::new("rune"),
            size: 4,
            alignment: 4,
            packed: false,
            number_class: NumberClass::Integer,
            access_model: AccessModel::Value,
            kind: TypeKind::Rune,
            layout_final: true,
        });

        for (name, kind) in [
            ("type", TypeKind::TypeInfo),
            ("any", TypeKind::Any),
            ("module", TypeKind::Module),
        ] {
            self.add(TypeDecl {
                id: TypeId(0),
                symbol: QualifiedSymbol::new(name),
                size: 8,
                alignment: 8,
                packed: false,
                number_class: NumberClass::None,
                access_model: AccessModel::Value,
                kind,
                layout_final: true,
            });
        }

        self.add(TypeDecl {
            id: TypeId(0),
            symbol: QualifiedSymbol::new("unknown"),
            size: 0,
            alignment: 1,
            packed: false,
            number_class: NumberClass::None,
            access_model: AccessModel::Value,
            kind: TypeKind::Unknown,
            layout_final: true,
        });

        // string is a composite view over (length, capacity, data).
        let u32_id = self.find("u32").unwrap();
        let u8_id = self.find("u8").unwrap();
        let data_ptr = self.pointer_to(u8_id);
        let mut fields = FieldMap::new();
        fields.push(TypeField { name: "length".into(), ty: u32_id, offset: 0, size: 4, declaration: None });
        fields.push(TypeField { name: "capacity".into(), ty: u32_id, offset: 4, size: 4, declaration: None });
        fields.push(TypeField { name: "data".into(), ty: data_ptr, offset: 8, size: 8, declaration: None });
        self.add(TypeDecl {
            id: TypeId(0),
            symbol: QualifiedSymbol::new("string"),
            size: 16,
            alignment: 8,
            packed: false,
            number_class: NumberClass::None,
            access_model: AccessModel::Pointer,
            kind: TypeKind::Composite {
                composite: CompositeKind::Struct,
                fields,
            },
            layout_final: true,
        });
    }

    fn add(&mut self, mut decl: TypeDecl) -> TypeId {
        let id = TypeId(self.types.len() as u32);
        decl.id = id;
        self.by_name.insert(decl.symbol.fully_qualified(), id);
        self.types.push(decl);
        id
    }

    pub fn decl(&self, id: TypeId) -> &TypeDecl {
        &self.types[id.0 as usize]
    }

    pub fn find(&self, name: &str) -> Option<TypeId> {
        self.by_name.get(name).copied()
    }

    pub fn find_symbol(&self, symbol: &QualifiedSymbol) -> Option<TypeId> {
        self.by_name.get(&symbol.fully_qualified()).copied()
    }

    pub fn unknown(&self) -> TypeId {
        self.find("unknown").unwrap()
    }

    pub fn void(&self) -> TypeId {
        self.find("u0").unwrap()
    }

    pub fn bool_type(&self) -> TypeId {
        self.find("bool").unwrap()
    }

    pub fn len(&self) -> usize {
        self.types.len()
    }

    /// Interned pointer synthesis: one id per base type.
    pub fn pointer_to(&mut self, base: TypeId) -> TypeId {
        if let Some(existing) = self.pointer_cache.get(&base) {
            return *existing;
        }
        let name = format!("^{}", self.decl(base).name());
        let id = self.add(TypeDecl {
            id: TypeId(0),
            symbol: QualifiedSymbol::new(name),
            size: 8,
            alignment: 8,
            packed: false,
            number_class: NumberClass::Integer,
            access_model: AccessModel::Value,
            kind: TypeKind::Pointer { base },
            layout_final: true,
        });
        self.pointer_cache.insert(base, id);
        id
    }

    /// Interned array synthesis: one id per base type and length.
    pub fn array_of(&mut self, base: TypeId, length: usize) -> TypeId {
        if let Some(existing) = self.array_cache.get(&(base, length)) {
            return *existing;
        }
        let base_decl = self.decl(base);
        let name = format!("{}[{length}]", base_decl.name());
        let size = base_decl.size * length;
        let alignment = base_decl.alignment;
        let id = self.add(TypeDecl {
            id: TypeId(0),
            symbol: QualifiedSymbol::new(name),
            size,
            alignment,
            packed: false,
            number_class: NumberClass::None,
            access_model: AccessModel::Pointer,
            kind: TypeKind::Array { base, length },
            layout_final: true,
        });
        self.array_cache.insert((base, length), id);
        id
    }

    pub fn make_tuple(&mut self, fields: FieldMap) -> TypeId {
        let names: Vec<String> = fields
            .iter()
            .map(|f| self.decl(f.ty).name())
            .collect();
        let name = format!("({})", names.join(","));
        if let Some(existing) = self.find(&name) {
            return existing;
        }
        let (size, alignment) = layout_struct(self, &fields, false);
        let mut laid_out = FieldMap::new();
        let mut offset = 0u32;
        for field in fields.iter() {
            let field_align = self.decl(field.ty).alignment.max(1) as u32;
            offset = align_up(offset, field_align);
            laid_out.push(TypeField {
                offset,
                ..field.clone()
            });
            offset += field.size;
        }
        self.add(TypeDecl {
            id: TypeId(0),
            symbol: QualifiedSymbol::new(name),
            size,
            alignment,
            packed: false,
            number_class: NumberClass::None,
            access_model: AccessModel::Pointer,
            kind: TypeKind::Tuple { fields: laid_out },
            layout_final: true,
        })
    }

    pub fn make_procedure(
        &mut self,
        parameters: FieldMap,
        returns: FieldMap,
        foreign: bool,
        variadic: bool,
    ) -> TypeId {
        let params: Vec<String> = parameters.iter().map(|f| self.decl(f.ty).name()).collect();
        let rets: Vec<String> = returns.iter().map(|f| self.decl(f.ty).name()).collect();
        let name = format!(
            "proc({}):({}){}",
            params.join(","),
            rets.join(","),
            if foreign { "#foreign" } else { "" }
        );
        self.add(TypeDecl {
            id: TypeId(0),
            symbol: QualifiedSymbol::new(name),
            size: 8,
            alignment: 8,
            packed: false,
            number_class: NumberClass::None,
            access_model: AccessModel::Value,
            kind: TypeKind::Procedure {
                parameters,
                returns,
                foreign,
                variadic,
            },
            layout_final: true,
        })
    }

    /// Declares a composite whose fields arrive later; its layout stays
    /// open until `finalize_composite` runs.
    pub fn make_composite(
        &mut self,
        symbol: QualifiedSymbol,
        composite: CompositeKind,
        packed: bool,
    ) -> TypeId {
        self.add(TypeDecl {
            id: TypeId(0),
            symbol,
            size: 0,
            alignment: 1,
            packed,
            number_class: NumberClass::None,
            access_model: match composite {
                CompositeKind::Enum => AccessModel::Value,
                _ => AccessModel::Pointer,
            },
            kind: TypeKind::Composite {
                composite,
                fields: FieldMap::new(),
            },
            layout_final: false,
        })
    }

    /// Computes size and alignment exactly once, after all fields resolved.
    pub fn finalize_composite(&mut self, id: TypeId, fields: FieldMap) {
        assert!(
            !self.types[id.0 as usize].layout_final,
            "composite layout computed twice: {}",
            self.decl(id).name()
        );
        let decl = &self.types[id.0 as usize];
        let composite = match &decl.kind {
            TypeKind::Composite { composite, .. } => *composite,
            _ => panic!("finalize_composite on non-composite {}", decl.name()),
        };
        let packed = decl.packed;

        let (size, alignment, laid_out, number_class) = match composite {
            CompositeKind::Struct => {
                let mut laid_out = FieldMap::new();
                let mut offset = 0u32;
                let mut alignment = 1usize;
                for field in fields.iter() {
                    let field_align = if packed {
                        1
                    } else {
                        self.decl(field.ty).alignment.max(1)
                    };
                    alignment = alignment.max(field_align);
                    offset = align_up(offset, field_align as u32);
                    laid_out.push(TypeField {
                        offset,
                        ..field.clone()
                    });
                    offset += field.size;
                }
                let size = align_up(offset, alignment as u32) as usize;
                (size, alignment, laid_out, NumberClass::None)
            }
            CompositeKind::Union => {
                let mut laid_out = FieldMap::new();
                let mut size = 0usize;
                let mut alignment = 1usize;
                for field in fields.iter() {
                    alignment = alignment.max(self.decl(field.ty).alignment.max(1));
                    size = size.max(field.size as usize);
                    laid_out.push(TypeField {
                        offset: 0,
                        ..field.clone()
                    });
                }
                (size, alignment, laid_out, NumberClass::None)
            }
            CompositeKind::Enum => {
                // backing primitive
                (4, 4, fields.clone(), NumberClass::Integer)
            }
        };

        let decl = &mut self.types[id.0 as usize];
        decl.size = size;
        decl.alignment = alignment;
        decl.number_class = number_class;
        decl.kind = TypeKind::Composite {
            composite,
            fields: laid_out,
        };
        decl.layout_final = true;
    }

    fn is_void(&self, id: TypeId) -> bool {
        matches!(self.decl(id).kind, TypeKind::Numeric { .. }) && self.decl(id).size == 0
    }

    pub fn mark_used(&mut self, id: TypeId) {
        if !matches!(
            self.decl(id).kind,
            TypeKind::Unknown | TypeKind::Generic | TypeKind::Family
        ) {
            self.used.insert(id);
        }
    }

    pub fn used_types(&self) -> impl Iterator<Item = TypeId> + '_ {
        self.used.iter().copied()
    }

    pub fn used_count(&self) -> usize {
        self.used.len()
    }

    /// `a accepts b`: may a storage location of type `a` take a value of
    /// type `b` without an explicit cast.
    pub fn accepts(&self, a: TypeId, b: TypeId) -> bool {
        if a == b {
            return true;
        }
        let lhs = self.decl(a);
        let rhs = self.decl(b);
        match (&lhs.kind, &rhs.kind) {
            (TypeKind::Any, _) => true,
            (TypeKind::Unknown, _) | (_, TypeKind::Unknown) => false,
            (
                TypeKind::Numeric { min: a_min, max: a_max, .. },
                TypeKind::Numeric { min: b_min, max: b_max, .. },
            ) => match (lhs.number_class, rhs.number_class) {
                (NumberClass::Integer, NumberClass::Integer) => {
                    *b_min >= *a_min && *b_max <= *a_max
                }
                (NumberClass::FloatingPoint, NumberClass::FloatingPoint) => {
                    rhs.size <= lhs.size
                }
                _ => false,
            },
            (TypeKind::Pointer { base: a_base }, TypeKind::Pointer { base: b_base }) => {
                // ^u0 is the wildcard pointer, on either side (nil is ^u0)
                if self.is_void(*a_base) || self.is_void(*b_base) {
                    return true;
                }
                self.accepts(*a_base, *b_base)
            }
            // string literals decay to their character data
            (TypeKind::Pointer { base }, TypeKind::Composite { .. })
                if rhs.symbol.name == "string"
                    && matches!(self.decl(*base).kind, TypeKind::Numeric { .. })
                    && self.decl(*base).size == 1 =>
            {
                true
            }
            (
                TypeKind::Procedure {
                    parameters: a_params,
                    returns: a_rets,
                    foreign: a_foreign,
                    ..
                },
                TypeKind::Procedure {
                    parameters: b_params,
                    returns: b_rets,
                    foreign: b_foreign,
                    ..
                },
            ) => {
                if a_foreign != b_foreign
                    || a_params.len() != b_params.len()
                    || a_rets.len() != b_rets.len()
                {
                    return false;
                }
                a_params
                    .iter()
                    .zip(b_params.iter())
                    .all(|(x, y)| self.accepts(x.ty, y.ty))
                    && a_rets
                        .iter()
                        .zip(b_rets.iter())
                        .all(|(x, y)| self.accepts(x.ty, y.ty))
            }
            // composites match by identity only, handled by a == b above
            _ => false,
        }
    }

    /// Numeric cast lowering mode; `None` when either side lacks a number
    /// class (the `C073` case).
    pub fn cast_mode(&self, from: TypeId, to: TypeId) -> Option<CastMode> {
        let src = self.decl(from);
        let dst = self.decl(to);
        // pointer casts move qwords around untouched
        if src.is_pointer() || dst.is_pointer() {
            return Some(CastMode::Noop);
        }
        match (src.number_class, dst.number_class) {
            (NumberClass::Integer, NumberClass::Integer) => {
                if src.size == dst.size {
                    Some(CastMode::Noop)
                } else if src.size > dst.size {
                    Some(CastMode::Truncate)
                } else if src.is_signed() {
                    Some(CastMode::SignExtend)
                } else {
                    Some(CastMode::ZeroExtend)
                }
            }
            (NumberClass::FloatingPoint, NumberClass::FloatingPoint) => {
                if src.size >= dst.size {
                    Some(CastMode::FloatTruncate)
                } else {
                    Some(CastMode::FloatExtend)
                }
            }
            (NumberClass::Integer, NumberClass::FloatingPoint) => Some(CastMode::IntegerToFloat),
            (NumberClass::FloatingPoint, NumberClass::Integer) => Some(CastMode::FloatToInteger),
            _ => None,
        }
    }

    /// Bit reinterpretation needs identical sizes and number classes on
    /// both sides.
    pub fn transmute_allowed(&self, from: TypeId, to: TypeId) -> bool {
        let src = self.decl(from);
        let dst = self.decl(to);
        src.size == dst.size
            && src.number_class != NumberClass::None
            && dst.number_class != NumberClass::None
    }

    /// Narrows an integer literal to the smallest built-in whose range
    /// contains it, preferring unsigned for non-negative values.
    pub fn narrow_integer(&self, value: u64, negative: bool) -> TypeId {
        let name = if negative {
            let magnitude = value as i128;
            if -magnitude >= i8::MIN as i128 {
                "s8"
            } else if -magnitude >= i16::MIN as i128 {
                "s16"
            } else if -magnitude >= i32::MIN as i128 {
                "s32"
            } else {
                "s64"
            }
        } else if value <= u8::MAX as u64 {
            "u8"
        } else if value <= u16::MAX as u64 {
            "u16"
        } else if value <= u32::MAX as u64 {
            "u32"
        } else {
            "u64"
        };
        self.find(name).unwrap()
    }

    pub fn narrow_float(&self, value: f64) -> TypeId {
        let name = if (value as f32) as f64 == value {
            "f32"
        } else {
            "f64"
        };
        self.find(name).unwrap()
    }
}

fn sanitize_label(name: &str) -> String {
    name.chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '_' { c } else { '_' })
        .collect()
}

fn align_up(value: u32, alignment: u32) -> u32 {
    debug_assert!(alignment > 0);
    value.div_ceil(alignment) * alignment
}

fn layout_struct(registry: &TypeRegistry, fields: &FieldMap, packed: bool) -> (usize, usize) {
    let mut offset = 0u32;
    let mut alignment = 1usize;
    for field in fields.iter() {
        let field_align = if packed {
            1
        } else {
            registry.decl(field.ty).alignment.max(1)
        };
        alignment = alignment.max(field_align);
        offset = align_up(offset, field_align as u32);
        offset += field.size;
    }
    (align_up(offset, alignment as u32) as usize, alignment)
}
