//! Storage layout of value types in linear memory.
//!
//! A value decomposes into *leaves*: the primitive machine slots it is passed
//! around in. Each leaf knows its byte offset inside the value and the width
//! it is loaded/stored with, so the same list drives argument lowering,
//! global expansion, typed memory access and destructor synthesis.
//!
//! Fixed runtime headers (all words are 32 bit):
//! ```text
//! string    : [block, data, len]
//! ref       : [block, data]
//! slice     : [block, data, len, cap]
//! closure   : [fn_index, data.block, data.data]
//! interface : [data.block, data.data, itab]
//! ```

use wasm_encoder::ValType;

use super::{TypeId, TypeRegistry, ValueType};

/// Width and signedness of a leaf in memory.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum MemKind {
    I8,
    U8,
    I16,
    U16,
    I32,
    I64,
    F32,
    F64,
}

impl MemKind {
    /// Machine slot the leaf occupies once loaded.
    pub fn val_type(self) -> ValType {
        match self {
            MemKind::I8 | MemKind::U8 | MemKind::I16 | MemKind::U16 | MemKind::I32 => ValType::I32,
            MemKind::I64 => ValType::I64,
            MemKind::F32 => ValType::F32,
            MemKind::F64 => ValType::F64,
        }
    }
    pub fn width(self) -> u32 {
        match self {
            MemKind::I8 | MemKind::U8 => 1,
            MemKind::I16 | MemKind::U16 => 2,
            MemKind::I32 | MemKind::F32 => 4,
            MemKind::I64 | MemKind::F64 => 8,
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct Leaf {
    /// Path from the value root, e.g. `.data` or `.items.2.len`. Empty for scalars.
    pub path: String,
    pub offset: u32,
    pub mem: MemKind,
    /// The leaf is a managed block pointer that must be released on free.
    pub is_block: bool,
}

pub fn align_up(n: u32, align: u32) -> u32 {
    if align <= 1 { n } else { n.div_ceil(align) * align }
}

const STRING_WORDS: &[(&str, bool)] = &[(".block", true), (".data", false), (".len", false)];
const REF_WORDS: &[(&str, bool)] = &[(".block", true), (".data", false)];
const SLICE_WORDS: &[(&str, bool)] = &[
    (".block", true),
    (".data", false),
    (".len", false),
    (".cap", false),
];
const CLOSURE_WORDS: &[(&str, bool)] = &[
    (".fn_index", false),
    (".data.block", true),
    (".data.data", false),
];
const INTERFACE_WORDS: &[(&str, bool)] = &[
    (".data.block", true),
    (".data.data", false),
    (".itab", false),
];

impl TypeRegistry {
    fn scalar_mem(&self, id: TypeId) -> Option<MemKind> {
        match self.get(id) {
            ValueType::I8 => Some(MemKind::I8),
            ValueType::U8 => Some(MemKind::U8),
            ValueType::I16 => Some(MemKind::I16),
            ValueType::U16 => Some(MemKind::U16),
            ValueType::Rune
            | ValueType::I32
            | ValueType::U32
            | ValueType::Ptr(_)
            | ValueType::Block(_) => Some(MemKind::I32),
            ValueType::I64 | ValueType::U64 => Some(MemKind::I64),
            ValueType::F32 => Some(MemKind::F32),
            ValueType::F64 => Some(MemKind::F64),
            _ => None,
        }
    }

    fn fixed_words(&self, id: TypeId) -> Option<&'static [(&'static str, bool)]> {
        match self.get(id) {
            ValueType::String => Some(STRING_WORDS),
            ValueType::Ref { .. } => Some(REF_WORDS),
            ValueType::Slice(_) => Some(SLICE_WORDS),
            ValueType::Closure(_) => Some(CLOSURE_WORDS),
            ValueType::Interface { .. } => Some(INTERFACE_WORDS),
            _ => None,
        }
    }

    fn members(&self, id: TypeId) -> Vec<(String, TypeId)> {
        match self.get(id) {
            ValueType::Struct { fields, .. } => fields
                .iter()
                .map(|f| (format!(".{}", f.name), f.ty))
                .collect(),
            ValueType::Tuple(elems) => elems
                .iter()
                .enumerate()
                .map(|(i, t)| (format!(".{i}"), *t))
                .collect(),
            _ => vec![],
        }
    }

    /// Byte offsets of the members of a struct or tuple.
    pub fn member_offsets(&self, id: TypeId) -> Vec<u32> {
        let mut end = 0;
        self.members(id)
            .iter()
            .map(|(_, t)| {
                let offset = align_up(end, self.align(*t));
                end = offset + self.size(*t);
                offset
            })
            .collect()
    }

    fn stride(&self, id: TypeId) -> u32 {
        align_up(self.size(id), self.align(id))
    }

    pub fn size(&self, id: TypeId) -> u32 {
        if let Some(mem) = self.scalar_mem(id) {
            return mem.width();
        }
        if let Some(words) = self.fixed_words(id) {
            return 4 * words.len() as u32;
        }
        match self.get(id) {
            ValueType::Array { base, capacity } => self.stride(*base) * capacity,
            ValueType::Struct { .. } | ValueType::Tuple(_) => {
                let members = self.members(id);
                let end = self
                    .member_offsets(id)
                    .iter()
                    .zip(members.iter())
                    .map(|(offset, (_, t))| offset + self.size(*t))
                    .max()
                    .unwrap_or(0);
                align_up(end, self.align(id))
            }
            _ => 0,
        }
    }

    pub fn align(&self, id: TypeId) -> u32 {
        if let Some(mem) = self.scalar_mem(id) {
            return mem.width();
        }
        if self.fixed_words(id).is_some() {
            return 4;
        }
        match self.get(id) {
            ValueType::Array { base, .. } => self.align(*base),
            ValueType::Struct { .. } | ValueType::Tuple(_) => self
                .members(id)
                .iter()
                .map(|(_, t)| self.align(*t))
                .max()
                .unwrap_or(1),
            _ => 1,
        }
    }

    fn push_leaves(&self, id: TypeId, prefix: &str, base: u32, out: &mut Vec<Leaf>) {
        if let Some(mem) = self.scalar_mem(id) {
            out.push(Leaf {
                path: prefix.to_string(),
                offset: base,
                mem,
                is_block: matches!(self.get(id), ValueType::Block(_)),
            });
            return;
        }
        if let Some(words) = self.fixed_words(id) {
            out.extend(words.iter().enumerate().map(|(i, (path, is_block))| Leaf {
                path: format!("{prefix}{path}"),
                offset: base + 4 * i as u32,
                mem: MemKind::I32,
                is_block: *is_block,
            }));
            return;
        }
        match self.get(id) {
            ValueType::Array { base: elem, capacity } => {
                let stride = self.stride(*elem);
                for i in 0..*capacity {
                    self.push_leaves(*elem, &format!("{prefix}.{i}"), base + i * stride, out);
                }
            }
            ValueType::Struct { .. } | ValueType::Tuple(_) => {
                let offsets = self.member_offsets(id);
                for ((path, t), offset) in self.members(id).iter().zip(offsets) {
                    self.push_leaves(*t, &format!("{prefix}{path}"), base + offset, out);
                }
            }
            _ => {}
        }
    }

    pub fn leaves(&self, id: TypeId) -> Vec<Leaf> {
        let mut out = vec![];
        self.push_leaves(id, "", 0, &mut out);
        out
    }

    /// Primitive machine slots the type is lowered to.
    pub fn raw(&self, id: TypeId) -> Vec<ValType> {
        self.leaves(id).iter().map(|l| l.mem.val_type()).collect()
    }

    /// Offsets of every managed block pointer inside a value of this type.
    pub fn managed_offsets(&self, id: TypeId) -> Vec<u32> {
        self.leaves(id)
            .iter()
            .filter(|l| l.is_block)
            .map(|l| l.offset)
            .collect()
    }
}
