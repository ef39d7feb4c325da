//! The module: all program-wide state of one compilation.
//!
//! Upstream lowering registers types, signatures, functions and globals here.
//! Once lowering is complete, [`Module::finalize`] lays out the dispatch
//! tables and type descriptors into the data segment and converts everything
//! into a [`ModuleDescription`] for the writer. `finalize` takes the module
//! by value, so it cannot run twice.

use std::collections::HashMap;

use wasm_encoder::ValType;

use crate::{
    Config,
    inst::Inst,
    interner::{Interner, Symbol},
    types::{FnSig, TypeId, TypeRegistry, ValueType, layout::MemKind},
    utils::error::{Error, Result},
};

pub mod data_seg;
pub mod description;
pub mod itab;
pub mod typeinfo;

use data_seg::DataSeg;
use description::{ConstGlobalDesc, FuncDesc, FuncType, GlobalDesc, ModuleDescription};

/// Base address of the flat itab index array.
pub const ITABS_PTR_GLOBAL: &str = "$wir.runtime.itabs_ptr";
/// Number of used interfaces (row length of the itab array).
pub const INTERFACE_COUNT_GLOBAL: &str = "$wir.runtime.interface_count";
/// Number of used concrete types (row count of the itab array).
pub const CONCRETE_TYPE_COUNT_GLOBAL: &str = "$wir.runtime.concrete_type_count";
/// Heap allocation hook: `(size: i32) -> (data: i32)`.
pub const HEAP_ALLOC_FN: &str = "$wir.runtime.heap_alloc";
/// Block release hook called by destructors: `(block: i32) -> ()`.
pub const BLOCK_RELEASE_FN: &str = "$wir.runtime.block_release";
/// Startup routine allocating the storage of managed-pointer globals.
pub const GLOBAL_ALLOC_FN: &str = "$wir.global_alloc";
/// Function type shared by all destructors: `(addr: i32) -> ()`.
pub const ON_FREE_TYPE: &str = "$onFree";
/// Types of the runtime support package get no reflection records.
pub const RUNTIME_TYPE_PREFIX: &str = "runtime.";

/// Opaque identity of a source-level value, supplied by the upstream pass.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct SourceValue(pub u64);

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct GlobalId(usize);

#[derive(Clone, Debug, PartialEq)]
pub struct Global {
    pub name: String,
    pub ty: TypeId,
    /// Managed pointer whose storage is allocated at startup.
    pub is_pointer: bool,
    pub init: Option<String>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct ConstGlobal {
    pub name: String,
    pub ty: ValType,
    pub init: String,
}

#[derive(Clone, Debug, PartialEq)]
pub struct Import {
    pub module: String,
    pub name: String,
    pub internal_name: String,
    pub params: Vec<ValType>,
    pub results: Vec<ValType>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct Function {
    pub internal_name: String,
    pub sig: FnSig,
    pub insts: Vec<Inst>,
}

impl Function {
    pub fn new(internal_name: impl Into<String>, sig: FnSig, insts: Vec<Inst>) -> Self {
        Self {
            internal_name: internal_name.into(),
            sig,
            insts,
        }
    }
}

pub struct Module {
    config: Config,
    types: TypeRegistry,
    used_concrete_types: Vec<TypeId>,
    used_interfaces: Vec<TypeId>,

    imports: Vec<Import>,

    fn_sigs: Vec<(String, FnSig)>,
    fn_sigs_by_key: HashMap<String, usize>,

    names: Interner,
    funcs: Vec<Function>,
    funcs_by_name: HashMap<Symbol, usize>,

    table: Vec<Symbol>,
    table_map: HashMap<Symbol, u32>,

    globals: Vec<Global>,
    globals_by_value: HashMap<SourceValue, usize>,
    globals_by_name: HashMap<String, usize>,
    const_globals: Vec<ConstGlobal>,

    data_seg: DataSeg,
    /// Interned string contents in the data segment.
    string_addrs: HashMap<String, u32>,
    /// Descriptor addresses of function types, keyed by signature string.
    fn_type_addrs: HashMap<String, u32>,

    base_text: String,
}

impl Default for Module {
    fn default() -> Self {
        Self::new(Config::default())
    }
}

impl Module {
    pub fn new(config: Config) -> Self {
        let mut names = Interner::new();
        // slot 0 of the call table stays invalid
        let invalid = names.intern("");
        let mut module = Self {
            config,
            types: TypeRegistry::new(),
            used_concrete_types: vec![],
            used_interfaces: vec![],
            imports: vec![],
            fn_sigs: vec![],
            fn_sigs_by_key: HashMap::new(),
            names,
            funcs: vec![],
            funcs_by_name: HashMap::new(),
            table: vec![invalid],
            table_map: HashMap::new(),
            globals: vec![],
            globals_by_value: HashMap::new(),
            globals_by_name: HashMap::new(),
            const_globals: vec![],
            data_seg: DataSeg::new(),
            string_addrs: HashMap::new(),
            fn_type_addrs: HashMap::new(),
            base_text: String::new(),
        };
        let i32 = module.types.primitives().i32;
        for name in [
            ITABS_PTR_GLOBAL,
            INTERFACE_COUNT_GLOBAL,
            CONCRETE_TYPE_COUNT_GLOBAL,
        ] {
            module.push_global(name, i32, false);
        }
        module
    }

    pub fn config(&self) -> &Config {
        &self.config
    }
    pub fn types(&self) -> &TypeRegistry {
        &self.types
    }
    pub fn types_mut(&mut self) -> &mut TypeRegistry {
        &mut self.types
    }
    pub fn data_seg(&self) -> &DataSeg {
        &self.data_seg
    }
    pub fn data_seg_mut(&mut self) -> &mut DataSeg {
        &mut self.data_seg
    }
    pub fn set_base_text(&mut self, text: impl Into<String>) {
        self.base_text = text.into();
    }

    pub fn mark_concrete_type_used(&mut self, ty: TypeId) -> Result<()> {
        if self.types.is_interface(ty) {
            return Err(Error::WrongVariant {
                name: self.types.name(ty).to_string(),
                expected: "a concrete type",
            });
        }
        if self.types.hash(ty) != 0 {
            return Ok(());
        }
        self.used_concrete_types.push(ty);
        self.types
            .set_hash(ty, self.used_concrete_types.len() as i32)
    }
    pub fn mark_interface_used(&mut self, ty: TypeId) -> Result<()> {
        if !self.types.is_interface(ty) {
            return Err(Error::WrongVariant {
                name: self.types.name(ty).to_string(),
                expected: "an interface",
            });
        }
        if self.types.hash(ty) != 0 {
            return Ok(());
        }
        self.used_interfaces.push(ty);
        self.types
            .set_hash(ty, -(self.used_interfaces.len() as i32))
    }
    pub fn used_concrete_types(&self) -> &[TypeId] {
        &self.used_concrete_types
    }
    pub fn used_interfaces(&self) -> &[TypeId] {
        &self.used_interfaces
    }

    pub fn add_import_func(
        &mut self,
        module: impl Into<String>,
        name: impl Into<String>,
        internal_name: impl Into<String>,
        sig: &FnSig,
    ) {
        let (params, results) = self.lower_sig(sig);
        self.imports.push(Import {
            module: module.into(),
            name: name.into(),
            internal_name: internal_name.into(),
            params,
            results,
        });
    }

    fn lower_sig(&self, sig: &FnSig) -> (Vec<ValType>, Vec<ValType>) {
        let lower = |ts: &[TypeId]| -> Vec<ValType> {
            ts.iter().flat_map(|t| self.types.raw(*t)).collect()
        };
        (lower(&sig.params), lower(&sig.results))
    }

    pub fn find_function_signature(&self, sig: &FnSig) -> Option<&str> {
        self.fn_sigs_by_key
            .get(&self.types.sig_name(sig))
            .map(|i| self.fn_sigs[*i].0.as_str())
    }
    /// Register a signature for indirect calls and return its type label.
    /// Structurally equal signatures share one label.
    pub fn intern_function_signature(&mut self, sig: &FnSig) -> String {
        let key = self.types.sig_name(sig);
        if let Some(i) = self.fn_sigs_by_key.get(&key) {
            return self.fn_sigs[*i].0.clone();
        }
        let label = format!("$sig{}", self.fn_sigs.len() + 1);
        log::trace!("signature {key} -> {label}");
        self.fn_sigs.push((label.clone(), sig.clone()));
        self.fn_sigs_by_key.insert(key, self.fn_sigs.len() - 1);
        label
    }

    pub fn find_call_table_entry(&self, name: &str) -> u32 {
        self.names
            .get(name)
            .and_then(|sym| self.table_map.get(&sym))
            .copied()
            .unwrap_or(0)
    }
    /// Intern a function into the indirect call table. Never returns 0.
    pub fn intern_call_table_entry(&mut self, name: &str) -> u32 {
        let sym = self.names.intern(name);
        if let Some(i) = self.table_map.get(&sym) {
            return *i;
        }
        let i = self.table.len() as u32;
        self.table.push(sym);
        self.table_map.insert(sym, i);
        i
    }

    pub fn find_function(&self, name: &str) -> Option<&Function> {
        self.names
            .get(name)
            .and_then(|sym| self.funcs_by_name.get(&sym))
            .map(|i| &self.funcs[*i])
    }
    /// Add a function body. A second function with the same internal name is ignored.
    pub fn add_function(&mut self, func: Function) {
        let sym = self.names.intern(&func.internal_name);
        if self.funcs_by_name.contains_key(&sym) {
            return;
        }
        self.funcs_by_name.insert(sym, self.funcs.len());
        self.funcs.push(func);
    }

    fn push_global(&mut self, name: &str, ty: TypeId, is_pointer: bool) -> usize {
        let i = self.globals.len();
        self.globals.push(Global {
            name: name.to_string(),
            ty,
            is_pointer,
            init: None,
        });
        self.globals_by_name.insert(name.to_string(), i);
        i
    }

    /// Declare a global slot. When `source` is given, the slot can later be
    /// found from that value; each source value backs at most one global.
    pub fn declare_global(
        &mut self,
        name: &str,
        ty: TypeId,
        is_pointer: bool,
        source: Option<SourceValue>,
    ) -> Result<GlobalId> {
        if self.globals_by_name.contains_key(name) {
            return Err(Error::DuplicateGlobal(name.to_string()));
        }
        if is_pointer && !matches!(self.types.get(ty), ValueType::Ref { .. }) {
            return Err(Error::WrongVariant {
                name: self.types.name(ty).to_string(),
                expected: "a ref",
            });
        }
        if let Some(v) = source {
            if let Some(i) = self.globals_by_value.get(&v) {
                return Err(Error::DuplicateGlobalBinding(self.globals[*i].name.clone()));
            }
        }
        let i = self.push_global(name, ty, is_pointer);
        if let Some(v) = source {
            self.globals_by_value.insert(v, i);
        }
        Ok(GlobalId(i))
    }
    pub fn global(&self, id: GlobalId) -> &Global {
        &self.globals[id.0]
    }
    pub fn globals(&self) -> &[Global] {
        &self.globals
    }
    pub fn find_global_by_name(&self, name: &str) -> Option<GlobalId> {
        self.globals_by_name.get(name).copied().map(GlobalId)
    }
    pub fn find_global_by_value(&self, v: SourceValue) -> Option<GlobalId> {
        self.globals_by_value.get(&v).copied().map(GlobalId)
    }
    pub fn set_global_initializer(&mut self, name: &str, literal: impl Into<String>) -> Result<()> {
        let i = *self
            .globals_by_name
            .get(name)
            .ok_or_else(|| Error::GlobalNotFound(name.to_string()))?;
        self.globals[i].init = Some(literal.into());
        Ok(())
    }

    /// Add an immutable global of a single-slot type.
    pub fn add_const_global(
        &mut self,
        name: impl Into<String>,
        init: impl Into<String>,
        ty: TypeId,
    ) -> Result<()> {
        let raw = self.types.raw(ty);
        let [slot] = raw.as_slice() else {
            return Err(Error::SlotCountMismatch {
                ty: self.types.name(ty).to_string(),
                expected: 1,
                actual: raw.len(),
            });
        };
        self.const_globals.push(ConstGlobal {
            name: name.into(),
            ty: *slot,
            init: init.into(),
        });
        Ok(())
    }

    /// Call-table index of the destructor releasing every managed block held
    /// by a value of `ty`, synthesising it on first request. 0 when a value
    /// of `ty` holds nothing to release.
    pub fn on_free(&mut self, ty: TypeId) -> u32 {
        let cached = self.types.on_free(ty);
        if cached != 0 {
            return cached;
        }
        let offsets = self.types.managed_offsets(ty);
        if offsets.is_empty() {
            return 0;
        }
        let name = format!("${}.$onFree", self.types.name(ty));
        let insts = offsets
            .into_iter()
            .flat_map(|offset| {
                [
                    Inst::LocalGet(0),
                    Inst::Load {
                        mem: MemKind::I32,
                        offset,
                    },
                    Inst::Call(BLOCK_RELEASE_FN.to_string()),
                ]
            })
            .collect();
        let addr = self.types.primitives().uptr;
        self.add_function(Function::new(&name, FnSig::new(vec![addr], vec![]), insts));
        let index = self.intern_call_table_entry(&name);
        self.types.set_on_free(ty, index);
        log::trace!("destructor {name} at table index {index}");
        index
    }

    /// Startup routine: allocate the pointee of every managed-pointer global
    /// and store the data address into the global's `.data` slot.
    fn gen_global_alloc(&self) -> Function {
        let insts = self
            .globals
            .iter()
            .filter(|g| g.is_pointer)
            .filter_map(|g| match self.types.get(g.ty) {
                ValueType::Ref { base, .. } => Some((g, *base)),
                _ => None,
            })
            .flat_map(|(g, base)| {
                [
                    Inst::I32Const(self.types.size(base) as i32),
                    Inst::Call(HEAP_ALLOC_FN.to_string()),
                    Inst::GlobalSet(format!("{}.data", g.name)),
                ]
            })
            .collect();
        Function::new(GLOBAL_ALLOC_FN, FnSig::default(), insts)
    }

    fn describe_function(&self, f: &Function) -> FuncDesc {
        let (params, results) = self.lower_sig(&f.sig);
        FuncDesc {
            name: f.internal_name.clone(),
            params,
            results,
            insts: f.insts.clone(),
        }
    }

    /// Lay out dispatch tables and type descriptors, then hand over the
    /// finished module. Dispatch tables must come first: they add call-table
    /// entries and set the runtime globals read by the startup code.
    pub fn finalize(mut self) -> Result<ModuleDescription> {
        log::debug!(
            "finalizing module: {} concrete types, {} interfaces used",
            self.used_concrete_types.len(),
            self.used_interfaces.len()
        );
        self.build_itab()?;
        self.build_types_info()?;

        let uptr = self.types.primitives().uptr;
        let mut func_types = vec![FuncType {
            name: ON_FREE_TYPE.to_string(),
            params: self.types.raw(uptr),
            results: vec![],
        }];
        func_types.extend(self.fn_sigs.iter().map(|(label, sig)| {
            let (params, results) = self.lower_sig(sig);
            FuncType {
                name: label.clone(),
                params,
                results,
            }
        }));

        let table = self
            .table
            .iter()
            .map(|sym| self.names.resolve(*sym).to_string())
            .collect();

        let mut funcs = vec![self.describe_function(&self.gen_global_alloc())];
        funcs.extend(self.funcs.iter().map(|f| self.describe_function(f)));

        let globals = self
            .globals
            .iter()
            .flat_map(|g| {
                let init = g.init.clone().unwrap_or_else(|| "0".to_string());
                self.types
                    .leaves(g.ty)
                    .into_iter()
                    .map(move |leaf| GlobalDesc {
                        name: format!("{}{}", g.name, leaf.path),
                        ty: leaf.mem.val_type(),
                        init: init.clone(),
                    })
            })
            .collect();
        let const_globals = self
            .const_globals
            .iter()
            .map(|g| ConstGlobalDesc {
                name: g.name.clone(),
                ty: g.ty,
                init: g.init.clone(),
            })
            .collect();

        let desc = ModuleDescription {
            base_text: self.base_text,
            imports: self.imports,
            func_types,
            table,
            funcs,
            globals,
            const_globals,
            data: self.data_seg.finish()?,
        };
        log::debug!(
            "module finalized: {} bytes of data, {} table entries",
            desc.data.len(),
            desc.table.len()
        );
        Ok(desc)
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::sig;

    #[test]
    fn signature_interning_is_idempotent() {
        crate::utils::init_test_logger();
        let mut m = Module::default();
        let p = m.types().primitives();
        let a = m.intern_function_signature(&sig!([p.i32, p.i32] => [p.i32]));
        let b = m.intern_function_signature(&sig!([p.i32, p.i32] => [p.i32]));
        let c = m.intern_function_signature(&sig!([p.i32] => [p.i32]));
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(
            m.find_function_signature(&sig!([p.i32] => [p.i32])),
            Some(c.as_str())
        );
        assert!(m.find_function_signature(&sig!([] => [])).is_none());
    }

    #[test]
    fn call_table_reserves_slot_zero() {
        crate::utils::init_test_logger();
        let mut m = Module::default();
        assert_eq!(m.find_call_table_entry("main.f"), 0);
        let f = m.intern_call_table_entry("main.f");
        let g = m.intern_call_table_entry("main.g");
        assert_eq!(f, 1);
        assert_eq!(g, 2);
        assert_eq!(m.intern_call_table_entry("main.f"), f);
        assert_eq!(m.find_call_table_entry("main.g"), g);
    }

    #[test]
    fn functions_are_keyed_by_internal_name() {
        crate::utils::init_test_logger();
        let mut m = Module::default();
        m.add_function(Function::new("main.f", FnSig::default(), vec![]));
        m.add_function(Function::new(
            "main.f",
            FnSig::default(),
            vec![Inst::Opaque("unreachable".to_string())],
        ));
        assert!(m.find_function("main.f").unwrap().insts.is_empty());
        assert!(m.find_function("main.g").is_none());
    }

    #[test]
    fn globals_and_bindings() {
        crate::utils::init_test_logger();
        let mut m = Module::default();
        let p = m.types().primitives();
        let g = m
            .declare_global("main.counter", p.i32, false, Some(SourceValue(7)))
            .unwrap();
        assert_eq!(m.find_global_by_value(SourceValue(7)), Some(g));
        assert_eq!(m.find_global_by_name("main.counter"), Some(g));
        assert_eq!(
            m.declare_global("main.other", p.i32, false, Some(SourceValue(7))),
            Err(Error::DuplicateGlobalBinding("main.counter".to_string()))
        );
        assert_eq!(
            m.declare_global("main.counter", p.i32, false, None),
            Err(Error::DuplicateGlobal("main.counter".to_string()))
        );
        assert!(m.find_global_by_name("main.other").is_none());
    }

    #[test]
    fn initializer_requires_declaration() {
        crate::utils::init_test_logger();
        let mut m = Module::default();
        let p = m.types().primitives();
        assert_eq!(
            m.set_global_initializer("main.x", "1"),
            Err(Error::GlobalNotFound("main.x".to_string()))
        );
        let x = m.declare_global("main.x", p.i64, false, None).unwrap();
        m.set_global_initializer("main.x", "1").unwrap();
        assert_eq!(m.global(x).init.as_deref(), Some("1"));
    }

    #[test]
    fn pointer_globals_must_be_refs() {
        crate::utils::init_test_logger();
        let mut m = Module::default();
        let p = m.types().primitives();
        let res = m.declare_global("main.p", p.i32, true, None);
        assert!(matches!(res, Err(Error::WrongVariant { .. })));
    }

    #[test]
    fn const_global_needs_single_slot() {
        crate::utils::init_test_logger();
        let mut m = Module::default();
        let p = m.types().primitives();
        m.add_const_global("$heap_base", "1024", p.i32).unwrap();
        let res = m.add_const_global("$s", "0", p.string);
        assert!(matches!(
            res,
            Err(Error::SlotCountMismatch { expected: 1, actual: 3, .. })
        ));
    }

    #[test]
    fn interface_and_concrete_lists_are_disjoint() {
        crate::utils::init_test_logger();
        let mut m = Module::default();
        let p = m.types().primitives();
        let (i, _) = m.types_mut().gen_interface("main.I").unwrap();
        assert!(m.mark_concrete_type_used(i).is_err());
        assert!(m.mark_interface_used(p.i32).is_err());
        m.mark_interface_used(i).unwrap();
        m.mark_interface_used(i).unwrap();
        m.mark_concrete_type_used(p.i32).unwrap();
        m.mark_concrete_type_used(p.f64).unwrap();
        assert_eq!(m.used_interfaces(), &[i]);
        assert_eq!(m.used_concrete_types(), &[p.i32, p.f64]);
        assert_eq!(m.types().hash(i), -1);
        assert_eq!(m.types().hash(p.f64), 2);
    }

    #[test]
    fn on_free_for_managed_content() {
        crate::utils::init_test_logger();
        let mut m = Module::default();
        let p = m.types().primitives();
        assert_eq!(m.on_free(p.i32), 0);
        let sl = m.types_mut().gen_slice(p.u8);
        let t = m.types_mut().gen_tuple(vec![p.i32, sl]);
        let idx = m.on_free(t);
        assert_ne!(idx, 0);
        assert_eq!(m.on_free(t), idx);
        let f = m.find_function("$(i32,[]u8).$onFree").unwrap();
        assert_eq!(
            f.insts,
            vec![
                Inst::LocalGet(0),
                Inst::Load {
                    mem: MemKind::I32,
                    offset: 4
                },
                Inst::Call(BLOCK_RELEASE_FN.to_string()),
            ]
        );
    }

    #[test]
    fn finalize_emits_startup_allocation() {
        crate::utils::init_test_logger();
        let mut m = Module::default();
        let p = m.types().primitives();
        let (s, _) = m.types_mut().gen_struct("main.Config").unwrap();
        m.types_mut()
            .append_struct_field(s, crate::types::Field::new("rate", p.f64))
            .unwrap();
        let r = m.types_mut().gen_ref(s);
        m.declare_global("main.config", r, true, None).unwrap();
        let desc = m.finalize().unwrap();
        let alloc = &desc.funcs[0];
        assert_eq!(alloc.name, GLOBAL_ALLOC_FN);
        assert_eq!(
            alloc.insts,
            vec![
                Inst::I32Const(8),
                Inst::Call(HEAP_ALLOC_FN.to_string()),
                Inst::GlobalSet("main.config.data".to_string()),
            ]
        );
        assert!(desc.find_global("main.config.block").is_some());
        assert_eq!(desc.func_types[0].name, ON_FREE_TYPE);
        assert_eq!(desc.table[0], "");
    }
}
