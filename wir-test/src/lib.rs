//! Shared helpers for the wir regression tests.
//!
//! The decoders here read the data segment byte by byte and do not go through
//! any layout code of `wir_lang`, so round trips check the emitted format
//! rather than the code that wrote it.

use wir_lang::{
    module::{Module, description::ModuleDescription},
    method, sig,
    types::{Field, TypeId},
};

/// Route `log` output of the library to stderr. Safe to call from every test.
pub fn init_logger() {
    let _ = colog::default_builder()
        .filter_level(log::LevelFilter::Trace)
        .is_test(true)
        .try_init();
}

pub fn read_u32(data: &[u8], addr: u32) -> u32 {
    let a = addr as usize;
    u32::from_le_bytes([data[a], data[a + 1], data[a + 2], data[a + 3]])
}
pub fn read_i32(data: &[u8], addr: u32) -> i32 {
    read_u32(data, addr) as i32
}

/// Contents of a string value `[block, data, len]` stored at `addr`.
pub fn read_string(data: &[u8], addr: u32) -> String {
    let ptr = read_u32(data, addr + 4) as usize;
    let len = read_u32(data, addr + 8) as usize;
    String::from_utf8_lossy(&data[ptr..ptr + len]).into_owned()
}

#[derive(Debug, Clone, PartialEq)]
pub struct TypeHeader {
    pub size: u32,
    pub hash: i32,
    pub kind: u8,
    pub align: u8,
    pub flag: u16,
    pub name: String,
}

pub fn read_header(data: &[u8], addr: u32) -> TypeHeader {
    let a = addr as usize;
    TypeHeader {
        size: read_u32(data, addr),
        hash: read_i32(data, addr + 4),
        kind: data[a + 8],
        align: data[a + 9],
        flag: u16::from_le_bytes([data[a + 10], data[a + 11]]),
        name: read_string(data, addr + 12),
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct StructInfo {
    pub header: TypeHeader,
    /// Field name and descriptor address of the field type.
    pub fields: Vec<(String, u32)>,
}

pub fn read_struct_info(data: &[u8], addr: u32) -> StructInfo {
    let count = read_u32(data, addr + 24);
    let fields = (0..count)
        .map(|i| {
            let field = addr + 28 + 16 * i;
            (read_string(data, field), read_u32(data, field + 12))
        })
        .collect();
    StructInfo {
        header: read_header(data, addr),
        fields,
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Itab {
    pub concrete_hash: i32,
    pub interface_hash: i32,
    pub fn_indices: Vec<u32>,
}

/// Itab of the pair at `(row, col)` of the published index, `None` for a 0
/// entry. `methods` is the method count of the interface at `col`.
pub fn read_itab(desc: &ModuleDescription, row: u32, col: u32, methods: u32) -> Option<Itab> {
    let base = desc.global_init(wir_lang::module::ITABS_PTR_GLOBAL)?;
    let ifaces = desc.global_init(wir_lang::module::INTERFACE_COUNT_GLOBAL)?;
    let addr = read_u32(&desc.data, base + 4 * (row * ifaces + col));
    (addr != 0).then(|| Itab {
        concrete_hash: read_i32(&desc.data, addr),
        interface_hash: read_i32(&desc.data, addr + 4),
        fn_indices: (0..methods)
            .map(|k| read_u32(&desc.data, addr + 8 + 4 * k))
            .collect(),
    })
}

/// Type ids of the shapes fixture.
pub struct Shapes {
    pub circle: TypeId,
    pub square: TypeId,
    pub shape: TypeId,
    pub named: TypeId,
}

/// A module with two concrete types and two interfaces:
///
/// * `&main.Circle` has `Area() f64` and `Name() string`
/// * `&main.Square` has `Area() f64`
/// * `main.Shape` wants `Area() f64`, `main.Named` wants `Name() string`
///
/// Nothing is marked as used.
pub fn shapes_module(module: &mut Module) -> Shapes {
    let types = module.types_mut();
    let p = types.primitives();
    let area = sig!([] => [p.f64]);
    let name = sig!([] => [p.string]);

    let (circle_s, _) = types.gen_struct("main.Circle").unwrap();
    types
        .append_struct_field(circle_s, Field::new("radius", p.f64))
        .unwrap();
    let circle = types.gen_ref(circle_s);
    types
        .add_ref_method(circle, method!("Area", area.clone(), "main.Circle.Area"))
        .unwrap();
    types
        .add_ref_method(circle, method!("Name", name.clone(), "main.Circle.Name"))
        .unwrap();

    let (square_s, _) = types.gen_struct("main.Square").unwrap();
    types
        .append_struct_field(square_s, Field::new("side", p.f64))
        .unwrap();
    let square = types.gen_ref(square_s);
    types
        .add_ref_method(square, method!("Area", area.clone(), "main.Square.Area"))
        .unwrap();

    let (shape, _) = types.gen_interface("main.Shape").unwrap();
    types
        .add_interface_method(shape, method!("Area", area))
        .unwrap();
    let (named, _) = types.gen_interface("main.Named").unwrap();
    types
        .add_interface_method(named, method!("Name", name))
        .unwrap();

    Shapes {
        circle,
        square,
        shape,
        named,
    }
}
