//! Instructions carried in function bodies.
//!
//! Bodies produced upstream are opaque to this layer and travel as
//! [`Inst::Opaque`]. The remaining variants are the few instructions the
//! module itself synthesises (startup allocation, destructors) plus typed
//! memory access through pointers.

use std::fmt;

use crate::{
    types::{TypeId, TypeRegistry, ValueType, layout::MemKind},
    utils::error::{Error, Result},
};

#[derive(Clone, Debug, PartialEq)]
pub enum Inst {
    I32Const(i32),
    I64Const(i64),
    LocalGet(u32),
    GlobalGet(String),
    GlobalSet(String),
    Call(String),
    Load { mem: MemKind, offset: u32 },
    Store { mem: MemKind, offset: u32 },
    Opaque(String),
}

impl fmt::Display for Inst {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Inst::I32Const(v) => write!(f, "i32.const {v}"),
            Inst::I64Const(v) => write!(f, "i64.const {v}"),
            Inst::LocalGet(i) => write!(f, "local.get {i}"),
            Inst::GlobalGet(g) => write!(f, "global.get {g}"),
            Inst::GlobalSet(g) => write!(f, "global.set {g}"),
            Inst::Call(func) => write!(f, "call {func}"),
            Inst::Load { mem, offset } => {
                let op = match mem {
                    MemKind::I8 => "i32.load8_s",
                    MemKind::U8 => "i32.load8_u",
                    MemKind::I16 => "i32.load16_s",
                    MemKind::U16 => "i32.load16_u",
                    MemKind::I32 => "i32.load",
                    MemKind::I64 => "i64.load",
                    MemKind::F32 => "f32.load",
                    MemKind::F64 => "f64.load",
                };
                write!(f, "{op} offset={offset} align={}", mem.width())
            }
            Inst::Store { mem, offset } => {
                let op = match mem {
                    MemKind::I8 | MemKind::U8 => "i32.store8",
                    MemKind::I16 | MemKind::U16 => "i32.store16",
                    MemKind::I32 => "i32.store",
                    MemKind::I64 => "i64.store",
                    MemKind::F32 => "f32.store",
                    MemKind::F64 => "f64.store",
                };
                write!(f, "{op} offset={offset} align={}", mem.width())
            }
            Inst::Opaque(text) => write!(f, "{text}"),
        }
    }
}

impl TypeRegistry {
    fn check_pointee(&self, ptr: TypeId, value_ty: TypeId) -> Result<()> {
        match self.get(ptr) {
            ValueType::Ptr(base) if self.equal(*base, value_ty) => Ok(()),
            ValueType::Ptr(base) => Err(Error::TypeMismatch {
                expected: self.name(*base).to_string(),
                actual: self.name(value_ty).to_string(),
            }),
            _ => Err(Error::WrongVariant {
                name: self.name(ptr).to_string(),
                expected: "a pointer",
            }),
        }
    }

    /// Load a `value_ty` through the address pushed by `addr`, one leaf at a
    /// time. `ptr` must be a pointer to exactly `value_ty`.
    pub fn emit_load_from_addr(
        &self,
        value_ty: TypeId,
        ptr: TypeId,
        addr: &[Inst],
        offset: u32,
    ) -> Result<Vec<Inst>> {
        self.check_pointee(ptr, value_ty)?;
        Ok(self
            .leaves(value_ty)
            .into_iter()
            .flat_map(move |leaf| {
                addr.iter().cloned().chain([Inst::Load {
                    mem: leaf.mem,
                    offset: offset + leaf.offset,
                }])
            })
            .collect())
    }

    /// Store a `value_ty` through `addr`. `value` holds the instructions
    /// pushing each raw slot of the value, in leaf order.
    pub fn emit_store_to_addr(
        &self,
        value_ty: TypeId,
        value: &[Vec<Inst>],
        ptr: TypeId,
        addr: &[Inst],
        offset: u32,
    ) -> Result<Vec<Inst>> {
        self.check_pointee(ptr, value_ty)?;
        let leaves = self.leaves(value_ty);
        if leaves.len() != value.len() {
            return Err(Error::SlotCountMismatch {
                ty: self.name(value_ty).to_string(),
                expected: leaves.len(),
                actual: value.len(),
            });
        }
        Ok(leaves
            .into_iter()
            .zip(value)
            .flat_map(move |(leaf, slot)| {
                addr.iter()
                    .cloned()
                    .chain(slot.iter().cloned())
                    .chain([Inst::Store {
                        mem: leaf.mem,
                        offset: offset + leaf.offset,
                    }])
            })
            .collect())
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn load_uses_leaf_width() {
        let mut reg = TypeRegistry::new();
        let p = reg.primitives();
        let ptr = reg.gen_ptr(p.i8);
        let addr = [Inst::GlobalGet("$p".to_string())];
        let insts = reg.emit_load_from_addr(p.i8, ptr, &addr, 4).unwrap();
        assert_eq!(
            insts,
            vec![
                Inst::GlobalGet("$p".to_string()),
                Inst::Load {
                    mem: MemKind::I8,
                    offset: 4
                }
            ]
        );
        assert_eq!(insts[1].to_string(), "i32.load8_s offset=4 align=1");
    }

    #[test]
    fn load_composite_through_pointer() {
        let mut reg = TypeRegistry::new();
        let p = reg.primitives();
        let r = reg.gen_ref(p.f64);
        let ptr = reg.gen_ptr(r);
        let insts = reg
            .emit_load_from_addr(r, ptr, &[Inst::LocalGet(0)], 0)
            .unwrap();
        assert_eq!(insts.len(), 4);
        assert_eq!(
            insts[3],
            Inst::Load {
                mem: MemKind::I32,
                offset: 4
            }
        );
    }

    #[test]
    fn mismatched_pointee_is_fatal() {
        let mut reg = TypeRegistry::new();
        let p = reg.primitives();
        let ptr = reg.gen_ptr(p.i32);
        let res = reg.emit_load_from_addr(p.f32, ptr, &[], 0);
        assert_eq!(
            res,
            Err(Error::TypeMismatch {
                expected: "i32".to_string(),
                actual: "f32".to_string()
            })
        );
        let res = reg.emit_load_from_addr(p.i32, p.i32, &[], 0);
        assert!(matches!(res, Err(Error::WrongVariant { .. })));
    }

    #[test]
    fn store_checks_slot_count() {
        let mut reg = TypeRegistry::new();
        let p = reg.primitives();
        let ptr = reg.gen_ptr(p.string);
        let value = vec![vec![Inst::I32Const(0)], vec![Inst::I32Const(16)]];
        let res = reg.emit_store_to_addr(p.string, &value, ptr, &[Inst::LocalGet(1)], 0);
        assert!(matches!(
            res,
            Err(Error::SlotCountMismatch {
                expected: 3,
                actual: 2,
                ..
            })
        ));
        let ptr16 = reg.gen_ptr(p.u16);
        let insts = reg
            .emit_store_to_addr(p.u16, &[vec![Inst::I32Const(7)]], ptr16, &[Inst::LocalGet(1)], 2)
            .unwrap();
        assert_eq!(insts.len(), 3);
        assert_eq!(insts[2].to_string(), "i32.store16 offset=2 align=2");
    }
}
