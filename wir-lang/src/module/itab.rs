//! Interface dispatch tables.
//!
//! For every pair of used concrete type and used interface, an itab record is
//! emitted when the concrete type implements all methods of the interface:
//!
//! ```text
//! itab   : [dhash: i32, ihash: i32, fn_0: u32, .., fn_{n-1}: u32]
//! itabs  : [addr(c_1, i_1), .., addr(c_1, i_m), addr(c_2, i_1), ..]
//! ```
//!
//! `fn_k` is the call-table index implementing the k-th interface method.
//! The index array is row-major over concrete types, a 0 entry meaning the
//! pair does not fit. Its base address and dimensions are published through
//! the runtime globals, so the runtime finds the itab of `(c, i)` at
//! `itabs[(hash(c) - 1) * interface_count + (-hash(i) - 1)]`.

use itertools::iproduct;

use super::{
    CONCRETE_TYPE_COUNT_GLOBAL, INTERFACE_COUNT_GLOBAL, ITABS_PTR_GLOBAL, Module,
    data_seg::RecordBuf,
};
use crate::{types::TypeId, utils::error::Result};

pub const ITAB_HEADER_SIZE: u32 = 8;

impl Module {
    /// Functions implementing each method of `iface` on `concrete`, in the
    /// interface's method order. `None` if any method is missing or differs
    /// in signature.
    fn match_methods(&self, concrete: TypeId, iface: TypeId) -> Option<Vec<String>> {
        let types = self.types();
        let provided = types.methods(concrete);
        types
            .methods(iface)
            .iter()
            .map(|wanted| {
                provided
                    .iter()
                    .find(|m| m.name == wanted.name && types.sig_equal(&m.sig, &wanted.sig))
                    .and_then(|m| m.full_fn_name.clone())
            })
            .collect()
    }

    /// Whether `concrete` implements every method of `iface`.
    pub fn implements(&self, concrete: TypeId, iface: TypeId) -> bool {
        self.match_methods(concrete, iface).is_some()
    }

    pub(super) fn build_itab(&mut self) -> Result<()> {
        let concretes = self.used_concrete_types.clone();
        let ifaces = self.used_interfaces.clone();
        let align = self.config.record_align;
        if concretes.is_empty() && !ifaces.is_empty() {
            log::warn!("{} interfaces used without any concrete type", ifaces.len());
        }

        let mut index = RecordBuf::new();
        for (c, i) in iproduct!(concretes.iter().copied(), ifaces.iter().copied()) {
            let addr = match self.match_methods(c, i) {
                Some(targets) => {
                    let mut record = RecordBuf::new();
                    record.i32(self.types.hash(c)).i32(self.types.hash(i));
                    for target in targets {
                        let fn_index = self.intern_call_table_entry(&target);
                        record.u32(fn_index);
                    }
                    let addr = self.data_seg.append(record.as_slice(), align);
                    log::trace!(
                        "itab {} as {} at {addr}",
                        self.types.name(c),
                        self.types.name(i)
                    );
                    addr
                }
                None => 0,
            };
            index.u32(addr);
        }
        let itabs_ptr = self.data_seg.append(index.as_slice(), align);
        log::debug!(
            "itab index at {itabs_ptr}: {} x {}",
            concretes.len(),
            ifaces.len()
        );

        self.set_global_initializer(ITABS_PTR_GLOBAL, itabs_ptr.to_string())?;
        self.set_global_initializer(INTERFACE_COUNT_GLOBAL, ifaces.len().to_string())?;
        self.set_global_initializer(CONCRETE_TYPE_COUNT_GLOBAL, concretes.len().to_string())
    }
}
