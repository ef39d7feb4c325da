//! The closed algebra of value types known to the backend.
//!
//! Every type lives in a [`TypeRegistry`] and is referred to by a [`TypeId`].
//! The canonical name of a type is its identity: asking the registry for a
//! pointer (array, slice, ...) over the same base twice hands back the same
//! id, so ids can be compared directly once they come from one registry.

use std::{collections::HashMap, fmt};

use slotmap::SlotMap;

use crate::{
    format_vec,
    utils::error::{Error, Result},
};

pub mod builder;
pub mod layout;

slotmap::new_key_type! {
    pub struct TypeId;
}

/// Discriminant written into the `kind` byte of a type descriptor.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(u8)]
pub enum TypeKind {
    Void = 0,
    Rune,
    I8,
    U8,
    I16,
    U16,
    I32,
    U32,
    I64,
    U64,
    F32,
    F64,
    String,
    Ptr,
    Block,
    Array,
    Slice,
    Ref,
    Closure,
    Tuple,
    Struct,
    Interface,
}

/// Parameter and result types of a function.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct FnSig {
    pub params: Vec<TypeId>,
    pub results: Vec<TypeId>,
}

impl FnSig {
    pub fn new(params: Vec<TypeId>, results: Vec<TypeId>) -> Self {
        Self { params, results }
    }
}

/// A method attached to a `Ref` (with the function implementing it) or
/// declared by an `Interface` (without one).
#[derive(Clone, Debug, PartialEq)]
pub struct Method {
    pub name: String,
    pub sig: FnSig,
    pub full_fn_name: Option<String>,
}

impl Method {
    pub fn new(name: impl Into<String>, sig: FnSig, full_fn_name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            sig,
            full_fn_name: Some(full_fn_name.into()),
        }
    }
    pub fn abstract_method(name: impl Into<String>, sig: FnSig) -> Self {
        Self {
            name: name.into(),
            sig,
            full_fn_name: None,
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct Field {
    pub name: String,
    pub ty: TypeId,
}

impl Field {
    pub fn new(name: impl Into<String>, ty: TypeId) -> Self {
        Self {
            name: name.into(),
            ty,
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum ValueType {
    Void,
    Rune,
    I8,
    U8,
    I16,
    U16,
    I32,
    U32,
    I64,
    U64,
    F32,
    F64,
    String,
    /// Unmanaged pointer into linear memory.
    Ptr(TypeId),
    /// Pointer to a heap block holding values of the base type.
    Block(TypeId),
    Array {
        base: TypeId,
        capacity: u32,
    },
    Slice(TypeId),
    /// Managed pointer: a block plus a data pointer, with the method set of
    /// the pointee.
    Ref {
        base: TypeId,
        methods: Vec<Method>,
    },
    Closure(FnSig),
    Tuple(Vec<TypeId>),
    Struct {
        name: String,
        fields: Vec<Field>,
    },
    Interface {
        name: String,
        methods: Vec<Method>,
    },
}

impl ValueType {
    pub fn kind(&self) -> TypeKind {
        match self {
            ValueType::Void => TypeKind::Void,
            ValueType::Rune => TypeKind::Rune,
            ValueType::I8 => TypeKind::I8,
            ValueType::U8 => TypeKind::U8,
            ValueType::I16 => TypeKind::I16,
            ValueType::U16 => TypeKind::U16,
            ValueType::I32 => TypeKind::I32,
            ValueType::U32 => TypeKind::U32,
            ValueType::I64 => TypeKind::I64,
            ValueType::U64 => TypeKind::U64,
            ValueType::F32 => TypeKind::F32,
            ValueType::F64 => TypeKind::F64,
            ValueType::String => TypeKind::String,
            ValueType::Ptr(_) => TypeKind::Ptr,
            ValueType::Block(_) => TypeKind::Block,
            ValueType::Array { .. } => TypeKind::Array,
            ValueType::Slice(_) => TypeKind::Slice,
            ValueType::Ref { .. } => TypeKind::Ref,
            ValueType::Closure(_) => TypeKind::Closure,
            ValueType::Tuple(_) => TypeKind::Tuple,
            ValueType::Struct { .. } => TypeKind::Struct,
            ValueType::Interface { .. } => TypeKind::Interface,
        }
    }
}

struct TypeEntry {
    name: String,
    ty: ValueType,
    /// 0: unused, n > 0: n-th used concrete type, n < 0: (-n)-th used interface.
    hash: i32,
    /// Address of the runtime descriptor, 0 until laid out.
    info_addr: u32,
    /// Call-table index of the destructor, 0 until synthesised.
    on_free: u32,
}

/// Ids of the scalar types every registry starts with.
#[derive(Clone, Copy, Debug)]
pub struct Primitives {
    pub void: TypeId,
    pub rune: TypeId,
    pub i8: TypeId,
    pub u8: TypeId,
    pub i16: TypeId,
    pub u16: TypeId,
    pub i32: TypeId,
    pub u32: TypeId,
    /// Linear-memory address; same type as `u32`.
    pub uptr: TypeId,
    pub i64: TypeId,
    pub u64: TypeId,
    pub f32: TypeId,
    pub f64: TypeId,
    pub string: TypeId,
}

pub struct TypeRegistry {
    storage: SlotMap<TypeId, TypeEntry>,
    by_name: HashMap<String, TypeId>,
    prim: Primitives,
}

impl Default for TypeRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl TypeRegistry {
    pub fn new() -> Self {
        let mut storage = SlotMap::with_key();
        let mut by_name = HashMap::new();
        let mut add = |name: &str, ty: ValueType| {
            let id = storage.insert(TypeEntry {
                name: name.to_string(),
                ty,
                hash: 0,
                info_addr: 0,
                on_free: 0,
            });
            by_name.insert(name.to_string(), id);
            id
        };
        let u32 = add("u32", ValueType::U32);
        let prim = Primitives {
            void: add("void", ValueType::Void),
            rune: add("rune", ValueType::Rune),
            i8: add("i8", ValueType::I8),
            u8: add("u8", ValueType::U8),
            i16: add("i16", ValueType::I16),
            u16: add("u16", ValueType::U16),
            i32: add("i32", ValueType::I32),
            u32,
            uptr: u32,
            i64: add("i64", ValueType::I64),
            u64: add("u64", ValueType::U64),
            f32: add("f32", ValueType::F32),
            f64: add("f64", ValueType::F64),
            string: add("string", ValueType::String),
        };
        Self {
            storage,
            by_name,
            prim,
        }
    }

    pub fn primitives(&self) -> Primitives {
        self.prim
    }

    fn entry(&self, id: TypeId) -> &TypeEntry {
        &self.storage[id]
    }
    fn entry_mut(&mut self, id: TypeId) -> &mut TypeEntry {
        &mut self.storage[id]
    }

    /// Register a new type under `name`. Registering a name twice is an
    /// internal error; use the `gen_*` constructors to get-or-create.
    pub fn add_value_type(&mut self, name: impl Into<String>, ty: ValueType) -> Result<TypeId> {
        let name = name.into();
        if self.by_name.contains_key(&name) {
            return Err(Error::DuplicateType(name));
        }
        let id = self.storage.insert(TypeEntry {
            name: name.clone(),
            ty,
            hash: 0,
            info_addr: 0,
            on_free: 0,
        });
        log::trace!("registered value type `{name}`");
        self.by_name.insert(name, id);
        Ok(id)
    }

    pub fn find(&self, name: &str) -> Option<TypeId> {
        self.by_name.get(name).copied()
    }

    fn find_or_add(&mut self, name: String, ty: ValueType) -> TypeId {
        match self.by_name.get(&name) {
            Some(id) => *id,
            None => {
                let id = self.storage.insert(TypeEntry {
                    name: name.clone(),
                    ty,
                    hash: 0,
                    info_addr: 0,
                    on_free: 0,
                });
                self.by_name.insert(name, id);
                id
            }
        }
    }

    pub fn gen_ptr(&mut self, base: TypeId) -> TypeId {
        let name = format!("*{}", self.name(base));
        self.find_or_add(name, ValueType::Ptr(base))
    }
    pub fn gen_block(&mut self, base: TypeId) -> TypeId {
        let name = format!("block<{}>", self.name(base));
        self.find_or_add(name, ValueType::Block(base))
    }
    pub fn gen_array(&mut self, base: TypeId, capacity: u32) -> TypeId {
        let name = format!("[{capacity}]{}", self.name(base));
        self.find_or_add(name, ValueType::Array { base, capacity })
    }
    pub fn gen_slice(&mut self, base: TypeId) -> TypeId {
        let name = format!("[]{}", self.name(base));
        self.find_or_add(name, ValueType::Slice(base))
    }
    pub fn gen_ref(&mut self, base: TypeId) -> TypeId {
        let name = format!("&{}", self.name(base));
        self.find_or_add(
            name,
            ValueType::Ref {
                base,
                methods: vec![],
            },
        )
    }
    pub fn gen_tuple(&mut self, elems: Vec<TypeId>) -> TypeId {
        let names = elems.iter().map(|t| self.name(*t)).collect::<Vec<_>>();
        let name = format!("({})", format_vec!(names, ","));
        self.find_or_add(name, ValueType::Tuple(elems))
    }
    pub fn gen_closure(&mut self, sig: FnSig) -> TypeId {
        let name = format!("fn{}", self.sig_name(&sig));
        self.find_or_add(name, ValueType::Closure(sig))
    }

    /// Get or create the named struct. The flag tells whether it already
    /// existed, in which case its fields must not be appended again.
    pub fn gen_struct(&mut self, name: &str) -> Result<(TypeId, bool)> {
        match self.find(name) {
            Some(id) if matches!(self.get(id), ValueType::Struct { .. }) => Ok((id, true)),
            Some(_) => Err(Error::WrongVariant {
                name: name.to_string(),
                expected: "a struct",
            }),
            None => {
                let ty = ValueType::Struct {
                    name: name.to_string(),
                    fields: vec![],
                };
                Ok((self.add_value_type(name, ty)?, false))
            }
        }
    }
    pub fn append_struct_field(&mut self, id: TypeId, field: Field) -> Result<()> {
        let entry = self.entry_mut(id);
        match &mut entry.ty {
            ValueType::Struct { fields, .. } => {
                fields.push(field);
                Ok(())
            }
            _ => Err(Error::WrongVariant {
                name: entry.name.clone(),
                expected: "a struct",
            }),
        }
    }

    pub fn gen_interface(&mut self, name: &str) -> Result<(TypeId, bool)> {
        match self.find(name) {
            Some(id) if self.is_interface(id) => Ok((id, true)),
            Some(_) => Err(Error::WrongVariant {
                name: name.to_string(),
                expected: "an interface",
            }),
            None => {
                let ty = ValueType::Interface {
                    name: name.to_string(),
                    methods: vec![],
                };
                Ok((self.add_value_type(name, ty)?, false))
            }
        }
    }
    pub fn add_interface_method(&mut self, id: TypeId, method: Method) -> Result<()> {
        let entry = self.entry_mut(id);
        match &mut entry.ty {
            ValueType::Interface { methods, .. } => push_method(
                &entry.name,
                methods,
                Method {
                    full_fn_name: None,
                    ..method
                },
            ),
            _ => Err(Error::WrongVariant {
                name: entry.name.clone(),
                expected: "an interface",
            }),
        }
    }
    /// Attach an implemented method to a managed pointer type.
    pub fn add_ref_method(&mut self, id: TypeId, method: Method) -> Result<()> {
        let entry = self.entry_mut(id);
        if method.full_fn_name.is_none() {
            return Err(Error::MissingMethodTarget {
                ty: entry.name.clone(),
                method: method.name,
            });
        }
        match &mut entry.ty {
            ValueType::Ref { methods, .. } => push_method(&entry.name, methods, method),
            _ => Err(Error::WrongVariant {
                name: entry.name.clone(),
                expected: "a ref",
            }),
        }
    }

    pub fn get(&self, id: TypeId) -> &ValueType {
        &self.entry(id).ty
    }
    pub fn name(&self, id: TypeId) -> &str {
        &self.entry(id).name
    }
    pub fn kind(&self, id: TypeId) -> TypeKind {
        self.get(id).kind()
    }
    pub fn is_interface(&self, id: TypeId) -> bool {
        matches!(self.get(id), ValueType::Interface { .. })
    }

    /// Canonical string form of a signature, used as its dedup key.
    pub fn sig_name(&self, sig: &FnSig) -> String {
        let params = sig.params.iter().map(|t| self.name(*t)).collect::<Vec<_>>();
        let results = sig.results.iter().map(|t| self.name(*t)).collect::<Vec<_>>();
        format!(
            "({})->({})",
            format_vec!(params, ","),
            format_vec!(results, ",")
        )
    }

    /// Structural equality. Named types (structs, interfaces) are equal iff
    /// their names are, which also keeps recursive types from looping.
    pub fn equal(&self, a: TypeId, b: TypeId) -> bool {
        if a == b {
            return true;
        }
        match (self.get(a), self.get(b)) {
            (ValueType::Ptr(x), ValueType::Ptr(y))
            | (ValueType::Block(x), ValueType::Block(y))
            | (ValueType::Slice(x), ValueType::Slice(y))
            | (ValueType::Ref { base: x, .. }, ValueType::Ref { base: y, .. }) => {
                self.equal(*x, *y)
            }
            (
                ValueType::Array {
                    base: x,
                    capacity: cx,
                },
                ValueType::Array {
                    base: y,
                    capacity: cy,
                },
            ) => cx == cy && self.equal(*x, *y),
            (ValueType::Tuple(xs), ValueType::Tuple(ys)) => self.all_equal(xs, ys),
            (ValueType::Closure(x), ValueType::Closure(y)) => self.sig_equal(x, y),
            (ValueType::Struct { name: x, .. }, ValueType::Struct { name: y, .. })
            | (ValueType::Interface { name: x, .. }, ValueType::Interface { name: y, .. }) => {
                x == y
            }
            (x, y) => x.kind() == y.kind() && x.kind() < TypeKind::Ptr,
        }
    }
    fn all_equal(&self, xs: &[TypeId], ys: &[TypeId]) -> bool {
        xs.len() == ys.len() && xs.iter().zip(ys).all(|(x, y)| self.equal(*x, *y))
    }
    pub fn sig_equal(&self, a: &FnSig, b: &FnSig) -> bool {
        self.all_equal(&a.params, &b.params) && self.all_equal(&a.results, &b.results)
    }

    pub fn methods(&self, id: TypeId) -> &[Method] {
        match self.get(id) {
            ValueType::Ref { methods, .. } | ValueType::Interface { methods, .. } => methods,
            _ => &[],
        }
    }
    pub fn num_methods(&self, id: TypeId) -> usize {
        self.methods(id).len()
    }
    pub fn method(&self, id: TypeId, i: usize) -> Option<&Method> {
        self.methods(id).get(i)
    }

    pub fn hash(&self, id: TypeId) -> i32 {
        self.entry(id).hash
    }
    /// Assign the usage hash. Callers check `hash(id) == 0` first; a second
    /// assignment is an internal error.
    pub fn set_hash(&mut self, id: TypeId, hash: i32) -> Result<()> {
        let entry = self.entry_mut(id);
        if entry.hash != 0 {
            return Err(Error::HashAlreadySet(entry.name.clone()));
        }
        entry.hash = hash;
        Ok(())
    }

    pub fn on_free(&self, id: TypeId) -> u32 {
        self.entry(id).on_free
    }
    pub(crate) fn set_on_free(&mut self, id: TypeId, index: u32) {
        self.entry_mut(id).on_free = index;
    }
    pub fn type_info_addr(&self, id: TypeId) -> u32 {
        self.entry(id).info_addr
    }
    pub(crate) fn set_type_info_addr(&mut self, id: TypeId, addr: u32) {
        self.entry_mut(id).info_addr = addr;
    }

    /// All registered types in registration order.
    pub fn iter(&self) -> impl Iterator<Item = (TypeId, &str)> {
        self.storage.iter().map(|(id, e)| (id, e.name.as_str()))
    }
    pub fn len(&self) -> usize {
        self.storage.len()
    }
    pub fn is_empty(&self) -> bool {
        self.storage.is_empty()
    }
}

impl fmt::Display for TypeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{self:?}")
    }
}

/// Method names are unique per type. Declaring the same method again is a
/// no-op.
fn push_method(ty: &str, methods: &mut Vec<Method>, method: Method) -> Result<()> {
    match methods.iter().find(|m| m.name == method.name) {
        Some(m) if *m == method => Ok(()),
        Some(_) => Err(Error::DuplicateMethod {
            ty: ty.to_string(),
            method: method.name,
        }),
        None => {
            methods.push(method);
            Ok(())
        }
    }
}
