use wir_lang::{
    Config,
    module::{
        GLOBAL_ALLOC_FN, HEAP_ALLOC_FN, Module, data_seg::DATA_SEG_MAGIC,
        typeinfo::TYPE_HEADER_SIZE,
    },
    types::{Field, TypeKind},
    utils::error::Error,
};
use wir_test::*;

fn type_info_module() -> Module {
    Module::new(Config {
        emit_type_info: true,
        ..Default::default()
    })
}

#[test]
fn itabs_of_shapes() {
    init_logger();
    let mut m = Module::default();
    let s = shapes_module(&mut m);
    m.mark_concrete_type_used(s.circle).unwrap();
    m.mark_concrete_type_used(s.square).unwrap();
    m.mark_interface_used(s.shape).unwrap();
    m.mark_interface_used(s.named).unwrap();
    let desc = m.finalize().unwrap();

    let circle_shape = read_itab(&desc, 0, 0, 1).unwrap();
    assert_eq!(circle_shape.concrete_hash, 1);
    assert_eq!(circle_shape.interface_hash, -1);
    assert_eq!(
        desc.table[circle_shape.fn_indices[0] as usize],
        "main.Circle.Area"
    );
    let circle_named = read_itab(&desc, 0, 1, 1).unwrap();
    assert_eq!(
        desc.table[circle_named.fn_indices[0] as usize],
        "main.Circle.Name"
    );
    let square_shape = read_itab(&desc, 1, 0, 1).unwrap();
    assert_eq!(square_shape.concrete_hash, 2);
    assert_eq!(
        desc.table[square_shape.fn_indices[0] as usize],
        "main.Square.Area"
    );
    assert!(read_itab(&desc, 1, 1, 1).is_none());
    // methods that no itab needs stay out of the table
    assert!(!desc.table.iter().any(|n| n == "main.Square.Name"));
}

#[test]
fn unused_types_get_no_itab_or_descriptor() {
    init_logger();
    let mut m = type_info_module();
    let s = shapes_module(&mut m);
    m.mark_concrete_type_used(s.square).unwrap();
    m.mark_interface_used(s.shape).unwrap();
    let desc = m.finalize().unwrap();
    assert_eq!(desc.global_init(wir_lang::module::CONCRETE_TYPE_COUNT_GLOBAL), Some(1));
    assert_eq!(desc.global_init(wir_lang::module::INTERFACE_COUNT_GLOBAL), Some(1));
    assert!(!desc.table.iter().any(|n| n.starts_with("main.Circle")));
    let text = String::from_utf8_lossy(&desc.data);
    assert!(text.contains("main.Square"));
    assert!(!text.contains("main.Circle"));
    assert!(!text.contains("main.Named"));
}

#[test]
fn struct_descriptor_round_trip() {
    init_logger();
    let mut m = type_info_module();
    let p = m.types().primitives();
    let (s, _) = m.types_mut().gen_struct("main.Sample").unwrap();
    let bytes = m.types_mut().gen_slice(p.u8);
    for f in [
        Field::new("flag", p.u8),
        Field::new("value", p.f64),
        Field::new("payload", bytes),
        Field::new("label", p.string),
    ] {
        m.types_mut().append_struct_field(s, f).unwrap();
    }
    let size = m.types().size(s);
    m.mark_concrete_type_used(s).unwrap();
    let addr = m.build_type_info(s).unwrap();
    let field_addrs = [p.u8, p.f64, bytes, p.string].map(|t| m.types().type_info_addr(t));
    let desc = m.finalize().unwrap();

    let info = read_struct_info(&desc.data, addr);
    assert_eq!(
        info.header,
        TypeHeader {
            size,
            hash: 1,
            kind: TypeKind::Struct as u8,
            align: 8,
            flag: 0,
            name: "main.Sample".to_string(),
        }
    );
    let names = info.fields.iter().map(|(n, _)| n.as_str()).collect::<Vec<_>>();
    assert_eq!(names, vec!["flag", "value", "payload", "label"]);
    for ((_, field_ty), expected) in info.fields.iter().zip(field_addrs) {
        assert_ne!(expected, 0);
        assert_eq!(*field_ty, expected);
    }
    let payload = read_header(&desc.data, info.fields[2].1);
    assert_eq!(payload.kind, TypeKind::Slice as u8);
    assert_eq!(payload.name, "[]u8");
    let elem = read_u32(&desc.data, info.fields[2].1 + TYPE_HEADER_SIZE);
    assert_eq!(read_header(&desc.data, elem).name, "u8");
}

#[test]
fn interning_is_idempotent_across_the_module() {
    init_logger();
    let mut m = Module::default();
    let s = shapes_module(&mut m);
    assert_eq!(m.types().find("&main.Circle"), Some(s.circle));
    // registries are per module
    assert_eq!(Module::default().types().find("&main.Circle"), None);

    let p = m.types().primitives();
    let a = m.types_mut().gen_array(p.i16, 4);
    assert_eq!(m.types_mut().gen_array(p.i16, 4), a);
    let table_index = m.intern_call_table_entry("main.Circle.Area");
    assert_eq!(m.intern_call_table_entry("main.Circle.Area"), table_index);
    let sig = wir_lang::sig!([p.i32] => []);
    assert_eq!(
        m.intern_function_signature(&sig),
        m.intern_function_signature(&sig)
    );
    m.mark_concrete_type_used(s.circle).unwrap();
    m.mark_concrete_type_used(s.circle).unwrap();
    assert_eq!(m.used_concrete_types().len(), 1);
    let desc = m.finalize().unwrap();
    assert_eq!(desc.func_types.len(), 2);
}

#[test]
fn data_segment_invariants() {
    init_logger();
    let mut m = type_info_module();
    let s = shapes_module(&mut m);
    m.mark_concrete_type_used(s.circle).unwrap();
    m.mark_interface_used(s.named).unwrap();
    let reserved = m.data_seg_mut().reserve(4, 4);
    let res = Module::finalize(m);
    assert_eq!(res, Err(Error::UnpatchedReservation(vec![reserved])));

    let mut m = type_info_module();
    let s = shapes_module(&mut m);
    m.mark_concrete_type_used(s.circle).unwrap();
    m.mark_interface_used(s.named).unwrap();
    let desc = m.finalize().unwrap();
    assert!(desc.data.starts_with(DATA_SEG_MAGIC));
    assert_eq!(desc.data_len(), desc.data.len());
    let itab = read_itab(&desc, 0, 0, 1).unwrap();
    assert_eq!(itab.interface_hash, -1);
}

#[test]
fn startup_allocates_managed_globals() {
    init_logger();
    let mut m = Module::default();
    let s = shapes_module(&mut m);
    let p = m.types().primitives();
    m.declare_global("$main.unit", s.circle, true, None).unwrap();
    m.declare_global("$main.count", p.i32, false, None).unwrap();
    let desc = m.finalize().unwrap();
    let alloc = desc.funcs.iter().find(|f| f.name == GLOBAL_ALLOC_FN).unwrap();
    let text = alloc
        .insts
        .iter()
        .map(|i| i.to_string())
        .collect::<Vec<_>>();
    assert_eq!(
        text,
        vec![
            "i32.const 8".to_string(),
            format!("call {HEAP_ALLOC_FN}"),
            "global.set $main.unit.data".to_string(),
        ]
    );
}
