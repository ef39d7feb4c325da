//! Runtime type descriptors in the data segment.
//!
//! All words are little-endian u32 unless noted. A string value is the
//! runtime string header `[block = 0, data, len]`.
//!
//! ```text
//! header    : [size, hash: i32, kind: u8, align: u8, flag: u16, name: string]   24 bytes
//! array     : header ++ [elem, cap]
//! slice     : header ++ [elem]
//! ref       : header ++ [elem, uncommon]
//! uncommon  : [method_count] ++ method*      method = [name: string, fn_type, fn_index]
//! struct    : header ++ [field_count] ++ field*      field = [name: string, type]
//! interface : header ++ [method_count] ++ imethod*   imethod = [name: string, fn_type]
//! fn type   : [param_count, result_count] ++ param* ++ result*
//! ```
//!
//! Other kinds get the bare header. Descriptors are memoised per type, so
//! each one is written once. Records that may be reached again while their
//! children are laid out (struct, ref, interface) are reserved first and
//! patched at the end, which makes recursive types terminate.

use super::{Module, RUNTIME_TYPE_PREFIX, data_seg::RecordBuf};
use crate::{
    types::{FnSig, TypeId, ValueType},
    utils::error::Result,
};

pub const TYPE_HEADER_SIZE: u32 = 24;
pub const STRING_VALUE_SIZE: u32 = 12;
pub const ARRAY_INFO_SIZE: u32 = TYPE_HEADER_SIZE + 8;
pub const SLICE_INFO_SIZE: u32 = TYPE_HEADER_SIZE + 4;
pub const REF_INFO_SIZE: u32 = TYPE_HEADER_SIZE + 8;
pub const STRUCT_INFO_SIZE: u32 = TYPE_HEADER_SIZE + 4;
pub const STRUCT_FIELD_SIZE: u32 = STRING_VALUE_SIZE + 4;
pub const INTERFACE_INFO_SIZE: u32 = TYPE_HEADER_SIZE + 4;
pub const IMETHOD_SIZE: u32 = STRING_VALUE_SIZE + 4;
pub const UNCOMMON_HEADER_SIZE: u32 = 4;
pub const METHOD_SIZE: u32 = STRING_VALUE_SIZE + 8;

impl Module {
    /// Write a string value, placing the bytes in the data segment once per
    /// distinct content. The empty string has a null data pointer.
    fn push_string_value(&mut self, s: &str, buf: &mut RecordBuf) {
        let addr = if s.is_empty() {
            0
        } else if let Some(addr) = self.string_addrs.get(s) {
            *addr
        } else {
            let addr = self.data_seg.append(s.as_bytes(), 1);
            self.string_addrs.insert(s.to_string(), addr);
            addr
        };
        buf.u32(0).u32(addr).u32(s.len() as u32);
    }

    fn type_header(&mut self, id: TypeId) -> RecordBuf {
        let name = self.types.name(id).to_string();
        let mut buf = RecordBuf::new();
        buf.u32(self.types.size(id))
            .i32(self.types.hash(id))
            .u8(self.types.kind(id) as u8)
            .u8(self.types.align(id) as u8)
            .u16(0);
        self.push_string_value(&name, &mut buf);
        buf
    }

    fn reserve_info(&mut self, id: TypeId, size: u32) -> u32 {
        let addr = self.data_seg.reserve(size, self.config.record_align);
        self.types.set_type_info_addr(id, addr);
        addr
    }

    fn append_info(&mut self, id: TypeId, buf: &RecordBuf) -> u32 {
        let addr = self.data_seg.append(buf.as_slice(), self.config.record_align);
        self.types.set_type_info_addr(id, addr);
        addr
    }

    /// Address of the descriptor of `id`, writing it (and everything it
    /// refers to) on first request.
    pub fn build_type_info(&mut self, id: TypeId) -> Result<u32> {
        let memo = self.types.type_info_addr(id);
        if memo != 0 {
            return Ok(memo);
        }
        let ty = self.types.get(id).clone();
        let addr = match ty {
            ValueType::Array { base, capacity } => {
                let elem = self.build_type_info(base)?;
                // the element may have led back here
                let memo = self.types.type_info_addr(id);
                if memo != 0 {
                    return Ok(memo);
                }
                let mut buf = self.type_header(id);
                buf.u32(elem).u32(capacity);
                self.append_info(id, &buf)
            }
            ValueType::Slice(base) => {
                let elem = self.build_type_info(base)?;
                let memo = self.types.type_info_addr(id);
                if memo != 0 {
                    return Ok(memo);
                }
                let mut buf = self.type_header(id);
                buf.u32(elem);
                self.append_info(id, &buf)
            }
            ValueType::Ref { base, methods } => {
                let addr = self.reserve_info(id, REF_INFO_SIZE);
                let mut buf = self.type_header(id);
                let elem = self.build_type_info(base)?;
                let uncommon = if methods.is_empty() {
                    0
                } else {
                    let mut uc = RecordBuf::new();
                    uc.u32(methods.len() as u32);
                    for m in &methods {
                        let fn_type = self.build_fn_type_info(&m.sig)?;
                        let fn_index = match &m.full_fn_name {
                            Some(f) => self.intern_call_table_entry(f),
                            None => 0,
                        };
                        self.push_string_value(&m.name, &mut uc);
                        uc.u32(fn_type).u32(fn_index);
                    }
                    self.data_seg.append(uc.as_slice(), self.config.record_align)
                };
                buf.u32(elem).u32(uncommon);
                self.data_seg.patch(addr, buf.as_slice())?;
                addr
            }
            ValueType::Struct { fields, .. } => {
                let size = STRUCT_INFO_SIZE + STRUCT_FIELD_SIZE * fields.len() as u32;
                let addr = self.reserve_info(id, size);
                let mut buf = self.type_header(id);
                buf.u32(fields.len() as u32);
                for f in &fields {
                    self.push_string_value(&f.name, &mut buf);
                    let field_ty = self.build_type_info(f.ty)?;
                    buf.u32(field_ty);
                }
                self.data_seg.patch(addr, buf.as_slice())?;
                addr
            }
            ValueType::Interface { methods, .. } => {
                let size = INTERFACE_INFO_SIZE + IMETHOD_SIZE * methods.len() as u32;
                let addr = self.reserve_info(id, size);
                let mut buf = self.type_header(id);
                buf.u32(methods.len() as u32);
                for m in &methods {
                    self.push_string_value(&m.name, &mut buf);
                    let fn_type = self.build_fn_type_info(&m.sig)?;
                    buf.u32(fn_type);
                }
                self.data_seg.patch(addr, buf.as_slice())?;
                addr
            }
            _ => {
                let buf = self.type_header(id);
                self.append_info(id, &buf)
            }
        };
        log::trace!("type info of {} at {addr}", self.types.name(id));
        Ok(addr)
    }

    /// Address of the descriptor of a function type. Structurally equal
    /// signatures share one descriptor.
    pub fn build_fn_type_info(&mut self, sig: &FnSig) -> Result<u32> {
        let key = self.types.sig_name(sig);
        if let Some(addr) = self.fn_type_addrs.get(&key) {
            return Ok(*addr);
        }
        let mut buf = RecordBuf::new();
        buf.u32(sig.params.len() as u32)
            .u32(sig.results.len() as u32);
        for t in sig.params.iter().chain(&sig.results) {
            let addr = self.build_type_info(*t)?;
            buf.u32(addr);
        }
        if let Some(addr) = self.fn_type_addrs.get(&key) {
            return Ok(*addr);
        }
        let addr = self.data_seg.append(buf.as_slice(), self.config.record_align);
        self.fn_type_addrs.insert(key, addr);
        Ok(addr)
    }

    /// Descriptors of all used types, concrete types first. Skipped unless
    /// enabled in the config.
    pub(super) fn build_types_info(&mut self) -> Result<()> {
        if !self.config.emit_type_info {
            log::debug!("type info emission disabled");
            return Ok(());
        }
        let used = self
            .used_concrete_types
            .iter()
            .chain(&self.used_interfaces)
            .copied()
            .collect::<Vec<_>>();
        for id in used {
            if self.types.name(id).starts_with(RUNTIME_TYPE_PREFIX) {
                continue;
            }
            self.build_type_info(id)?;
        }
        Ok(())
    }
}
