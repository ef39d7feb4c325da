//! Module-assembly layer of **wir**, a backend lowering a statically typed
//! program into a module for a stack byte-code machine with linear memory.
//!
//! The crate owns the value-type algebra ([`types`]), the data segment and
//! the [`Module`](module::Module) that collects globals, signatures, the
//! indirect call table and function bodies. Finalizing a module lays out
//! interface dispatch tables and runtime type descriptors and yields a
//! [`ModuleDescription`](module::description::ModuleDescription) for the
//! downstream writer.

pub mod inst;
pub mod interner;
pub mod module;
pub mod types;
pub mod utils;

pub use log;

/// Options of module assembly.
#[derive(Debug, Clone, Copy)]
pub struct Config {
    /// Emit runtime type descriptors of every used type while finalizing.
    pub emit_type_info: bool,
    /// Alignment of itab and descriptor records in the data segment.
    pub record_align: u32,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            emit_type_info: false,
            record_align: 8,
        }
    }
}
