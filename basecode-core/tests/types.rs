use basecode_core::{
    CastMode, CompositeKind, FieldMap, QualifiedSymbol, TypeField, TypeRegistry,
};

fn field(registry: &TypeRegistry, name: &str, ty: &str) -> TypeField {
    let ty = registry.find(ty).unwrap();
    TypeField {
        name: name.to_string(),
        ty,
        offset: 0,
        size: registry.decl(ty).size as u32,
        declaration: None,
    }
}

#[test]
fn pointer_and_array_types_are_interned() {
    let mut registry = TypeRegistry::new();
    let u32_id = registry.find("u32").unwrap();

    let first = registry.pointer_to(u32_id);
    let second = registry.pointer_to(u32_id);
    assert_eq!(first, second);
    assert_eq!(registry.decl(first).name(), "^u32");

    let a = registry.array_of(u32_id, 4);
    let b = registry.array_of(u32_id, 4);
    let c = registry.array_of(u32_id, 8);
    assert_eq!(a, b);
    assert_ne!(a, c);
    assert_eq!(registry.decl(a).size, 16);
}

#[test]
fn integer_narrowing_prefers_unsigned() {
    let registry = TypeRegistry::new();
    let name = |value, negative| {
        let id = registry.narrow_integer(value, negative);
        registry.decl(id).name()
    };
    assert_eq!(name(0, false), "u8");
    assert_eq!(name(255, false), "u8");
    assert_eq!(name(256, false), "u16");
    assert_eq!(name(70_000, false), "u32");
    assert_eq!(name(1 << 40, false), "u64");
    assert_eq!(name(5, true), "s8");
    assert_eq!(name(40_000, true), "s32");
}

#[test]
fn float_narrowing_round_trips_through_f32() {
    let registry = TypeRegistry::new();
    let f32_id = registry.narrow_float(1.5);
    assert_eq!(registry.decl(f32_id).name(), "f32");
    let f64_id = registry.narrow_float(std::f64::consts::PI);
    assert_eq!(registry.decl(f64_id).name(), "f64");
}

#[test]
fn numeric_accepts_is_sign_and_range_aware() {
    let registry = TypeRegistry::new();
    let ty = |name: &str| registry.find(name).unwrap();

    assert!(registry.accepts(ty("u32"), ty("u8")));
    assert!(!registry.accepts(ty("u8"), ty("u32")));
    assert!(!registry.accepts(ty("u32"), ty("s8")));
    assert!(registry.accepts(ty("s64"), ty("u32")));
    assert!(registry.accepts(ty("s32"), ty("s16")));
    assert!(registry.accepts(ty("f64"), ty("f32")));
    assert!(!registry.accepts(ty("f32"), ty("f64")));
    // cross-class is never implicit
    assert!(!registry.accepts(ty("u64"), ty("f32")));
    assert!(!registry.accepts(ty("f64"), ty("u8")));
    // any takes everything, unknown takes nothing
    assert!(registry.accepts(ty("any"), ty("string")));
    assert!(!registry.accepts(ty("unknown"), ty("u8")));
    assert!(!registry.accepts(ty("u8"), ty("unknown")));
}

#[test]
fn void_pointer_is_the_wildcard() {
    let mut registry = TypeRegistry::new();
    let point = registry.make_composite(
        QualifiedSymbol::new("point"),
        CompositeKind::Struct,
        false,
    );
    let mut fields = FieldMap::new();
    fields.push(field(&registry, "x", "s32"));
    fields.push(field(&registry, "y", "s32"));
    registry.finalize_composite(point, fields);

    let void = registry.find("u0").unwrap();
    let u32_id = registry.find("u32").unwrap();
    let void_ptr = registry.pointer_to(void);
    let point_ptr = registry.pointer_to(point);
    let u32_ptr = registry.pointer_to(u32_id);

    assert!(registry.accepts(void_ptr, point_ptr));
    assert!(registry.accepts(void_ptr, u32_ptr));
    // nil is typed ^u0 and lands anywhere
    assert!(registry.accepts(point_ptr, void_ptr));
    assert!(!registry.accepts(point_ptr, u32_ptr));
    // raw integers never convert implicitly
    assert!(!registry.accepts(u32_ptr, registry.find("u64").unwrap()));
}

#[test]
fn struct_layout_respects_alignment() {
    let mut registry = TypeRegistry::new();
    let mixed = registry.make_composite(
        QualifiedSymbol::new("mixed"),
        CompositeKind::Struct,
        false,
    );
    let mut fields = FieldMap::new();
    fields.push(field(&registry, "flag", "u8"));
    fields.push(field(&registry, "count", "u32"));
    fields.push(field(&registry, "total", "u64"));
    registry.finalize_composite(mixed, fields);

    let decl = registry.decl(mixed);
    let offsets: Vec<u32> = decl.fields().unwrap().iter().map(|f| f.offset).collect();
    assert_eq!(offsets, vec![0, 4, 8]);
    assert_eq!(decl.size, 16);
    assert_eq!(decl.alignment, 8);
}

#[test]
fn packed_struct_drops_padding() {
    let mut registry = TypeRegistry::new();
    let packed = registry.make_composite(
        QualifiedSymbol::new("wire"),
        CompositeKind::Struct,
        true,
    );
    let mut fields = FieldMap::new();
    fields.push(field(&registry, "tag", "u8"));
    fields.push(field(&registry, "value", "u32"));
    registry.finalize_composite(packed, fields);

    let decl = registry.decl(packed);
    let offsets: Vec<u32> = decl.fields().unwrap().iter().map(|f| f.offset).collect();
    assert_eq!(offsets, vec![0, 1]);
    assert_eq!(decl.size, 5);
}

#[test]
fn union_layout_overlays_fields() {
    let mut registry = TypeRegistry::new();
    let raw = registry.make_composite(
        QualifiedSymbol::new("raw"),
        CompositeKind::Union,
        false,
    );
    let mut fields = FieldMap::new();
    fields.push(field(&registry, "word", "u64"));
    fields.push(field(&registry, "single", "f32"));
    registry.finalize_composite(raw, fields);

    let decl = registry.decl(raw);
    assert_eq!(decl.size, 8);
    assert!(decl.fields().unwrap().iter().all(|f| f.offset == 0));
}

#[test]
#[should_panic(expected = "computed twice")]
fn composite_layout_is_computed_exactly_once() {
    let mut registry = TypeRegistry::new();
    let once = registry.make_composite(
        QualifiedSymbol::new("once"),
        CompositeKind::Struct,
        false,
    );
    let mut fields = FieldMap::new();
    fields.push(field(&registry, "x", "u32"));
    registry.finalize_composite(once, fields.clone());
    registry.finalize_composite(once, fields);
}

#[test]
fn cast_mode_table() {
    let registry = TypeRegistry::new();
    let ty = |name: &str| registry.find(name).unwrap();
    let mode = |a, b| registry.cast_mode(ty(a), ty(b));

    assert_eq!(mode("u32", "u32"), Some(CastMode::Noop));
    assert_eq!(mode("u64", "u16"), Some(CastMode::Truncate));
    assert_eq!(mode("s16", "s64"), Some(CastMode::SignExtend));
    assert_eq!(mode("u16", "u64"), Some(CastMode::ZeroExtend));
    assert_eq!(mode("f64", "f32"), Some(CastMode::FloatTruncate));
    assert_eq!(mode("f32", "f64"), Some(CastMode::FloatExtend));
    assert_eq!(mode("u32", "f64"), Some(CastMode::IntegerToFloat));
    assert_eq!(mode("f32", "s32"), Some(CastMode::FloatToInteger));
    // no number class on either side: rejected
    assert_eq!(mode("string", "u32"), None);
}

#[test]
fn transmute_needs_matching_size_and_number_class() {
    let registry = TypeRegistry::new();
    let ty = |name: &str| registry.find(name).unwrap();

    assert!(registry.transmute_allowed(ty("f32"), ty("u32")));
    assert!(registry.transmute_allowed(ty("u64"), ty("f64")));
    assert!(!registry.transmute_allowed(ty("f64"), ty("u32")));
    assert!(!registry.transmute_allowed(ty("string"), ty("u64")));
}
