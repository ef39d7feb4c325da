//! The finished module as handed to the text writer.
//!
//! The writer consumes the public fields. `Display` renders a wat-like dump
//! for debugging and tests only. Names are printed verbatim, so internal
//! names carry their own `$` sigil.

use std::fmt;

use wasm_encoder::ValType;

use super::Import;
use crate::{format_vec, inst::Inst};

pub fn val_type_name(t: ValType) -> &'static str {
    match t {
        ValType::I32 => "i32",
        ValType::I64 => "i64",
        ValType::F32 => "f32",
        ValType::F64 => "f64",
        ValType::V128 => "v128",
        ValType::Ref(_) => "ref",
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct FuncType {
    pub name: String,
    pub params: Vec<ValType>,
    pub results: Vec<ValType>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct FuncDesc {
    pub name: String,
    pub params: Vec<ValType>,
    pub results: Vec<ValType>,
    pub insts: Vec<Inst>,
}

/// One machine slot of a mutable global.
#[derive(Clone, Debug, PartialEq)]
pub struct GlobalDesc {
    pub name: String,
    pub ty: ValType,
    pub init: String,
}

#[derive(Clone, Debug, PartialEq)]
pub struct ConstGlobalDesc {
    pub name: String,
    pub ty: ValType,
    pub init: String,
}

#[derive(Clone, Debug, PartialEq)]
pub struct ModuleDescription {
    /// Hand-written prelude emitted verbatim before the generated parts.
    pub base_text: String,
    pub imports: Vec<Import>,
    pub func_types: Vec<FuncType>,
    /// Indirect call table; entry 0 is the invalid function.
    pub table: Vec<String>,
    pub funcs: Vec<FuncDesc>,
    pub globals: Vec<GlobalDesc>,
    pub const_globals: Vec<ConstGlobalDesc>,
    pub data: Vec<u8>,
}

impl ModuleDescription {
    pub fn find_global(&self, name: &str) -> Option<&GlobalDesc> {
        self.globals.iter().find(|g| g.name == name)
    }
    /// Initial value of a global with a numeric initializer.
    pub fn global_init(&self, name: &str) -> Option<u32> {
        self.find_global(name).and_then(|g| g.init.parse().ok())
    }
    pub fn data_len(&self) -> usize {
        self.data.len()
    }
}

fn write_params(f: &mut fmt::Formatter<'_>, params: &[ValType], results: &[ValType]) -> fmt::Result {
    if !params.is_empty() {
        let ps = params.iter().map(|t| val_type_name(*t)).collect::<Vec<_>>();
        write!(f, " (param {})", format_vec!(ps, " "))?;
    }
    if !results.is_empty() {
        let rs = results.iter().map(|t| val_type_name(*t)).collect::<Vec<_>>();
        write!(f, " (result {})", format_vec!(rs, " "))?;
    }
    Ok(())
}

/// Debug dump; not the module text format.
impl fmt::Display for ModuleDescription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "(module")?;
        if !self.base_text.is_empty() {
            writeln!(f, "{}", self.base_text)?;
        }
        for i in &self.imports {
            write!(f, "(import \"{}\" \"{}\" (func {}", i.module, i.name, i.internal_name)?;
            write_params(f, &i.params, &i.results)?;
            writeln!(f, "))")?;
        }
        for t in &self.func_types {
            write!(f, "(type {} (func", t.name)?;
            write_params(f, &t.params, &t.results)?;
            writeln!(f, "))")?;
        }
        writeln!(f, "(table {} funcref)", self.table.len())?;
        // slot 0 stays null
        if self.table.len() > 1 {
            writeln!(f, "(elem (i32.const 1) {})", format_vec!(self.table[1..], " "))?;
        }
        for g in &self.globals {
            let ty = val_type_name(g.ty);
            writeln!(f, "(global {} (mut {ty}) ({ty}.const {}))", g.name, g.init)?;
        }
        for g in &self.const_globals {
            let ty = val_type_name(g.ty);
            writeln!(f, "(global {} {ty} ({ty}.const {}))", g.name, g.init)?;
        }
        for func in &self.funcs {
            write!(f, "(func {}", func.name)?;
            write_params(f, &func.params, &func.results)?;
            writeln!(f)?;
            for inst in &func.insts {
                writeln!(f, "  {inst}")?;
            }
            writeln!(f, ")")?;
        }
        let escaped = self
            .data
            .iter()
            .map(|b| format!("\\{b:02x}"))
            .collect::<String>();
        writeln!(f, "(data (i32.const 0) \"{escaped}\")")?;
        write!(f, ")")
    }
}
