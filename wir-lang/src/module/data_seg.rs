//! The data segment: a flat byte arena holding all binary runtime metadata.
//!
//! Content is appended and never moved. When a record depends on children
//! that are laid out later, its span is reserved first and patched once, with
//! exactly the reserved number of bytes. Address 0 is never handed out: the
//! segment starts with an 8-byte marker so that 0 can serve as null.

use std::collections::BTreeMap;

use crate::{
    types::layout::align_up,
    utils::error::{Error, Result},
};

pub const DATA_SEG_MAGIC: &[u8; 8] = b"$$wirds$";

#[derive(Debug, Clone)]
pub struct DataSeg {
    data: Vec<u8>,
    /// Reserved spans not patched yet: address -> size.
    pending: BTreeMap<u32, u32>,
}

impl Default for DataSeg {
    fn default() -> Self {
        Self::new()
    }
}

impl DataSeg {
    pub fn new() -> Self {
        let mut seg = Self {
            data: Vec::new(),
            pending: BTreeMap::new(),
        };
        seg.append(DATA_SEG_MAGIC, 8);
        seg
    }

    fn pad_to(&mut self, align: u32) -> u32 {
        let start = align_up(self.len(), align);
        self.data.resize(start as usize, 0);
        start
    }

    /// Append `bytes` at the next multiple of `align` and return their address.
    pub fn append(&mut self, bytes: &[u8], align: u32) -> u32 {
        let addr = self.pad_to(align);
        self.data.extend_from_slice(bytes);
        addr
    }

    /// Reserve `size` zeroed bytes to be filled later by [`patch`](Self::patch).
    pub fn reserve(&mut self, size: u32, align: u32) -> u32 {
        let addr = self.pad_to(align);
        self.data.resize((addr + size) as usize, 0);
        self.pending.insert(addr, size);
        addr
    }

    /// Fill a reserved span. The length must match the reservation exactly.
    pub fn patch(&mut self, addr: u32, bytes: &[u8]) -> Result<()> {
        let size = *self
            .pending
            .get(&addr)
            .ok_or(Error::UnreservedPatch(addr))?;
        if bytes.len() as u32 != size {
            return Err(Error::PatchSizeMismatch {
                addr,
                expected: size,
                actual: bytes.len() as u32,
            });
        }
        let start = addr as usize;
        self.data[start..start + bytes.len()].copy_from_slice(bytes);
        self.pending.remove(&addr);
        Ok(())
    }

    pub fn is_pending(&self, addr: u32) -> bool {
        self.pending.contains_key(&addr)
    }
    pub fn pending_addrs(&self) -> Vec<u32> {
        self.pending.keys().copied().collect()
    }

    pub fn len(&self) -> u32 {
        self.data.len() as u32
    }
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }

    /// Hand out the final bytes; fails if some reservation was never patched.
    pub fn finish(self) -> Result<Vec<u8>> {
        if self.pending.is_empty() {
            Ok(self.data)
        } else {
            Err(Error::UnpatchedReservation(self.pending_addrs()))
        }
    }
}

/// Little-endian record builder for descriptor and itab layouts.
#[derive(Debug, Clone, Default)]
pub struct RecordBuf(Vec<u8>);

impl RecordBuf {
    pub fn new() -> Self {
        Self::default()
    }
    pub fn u8(&mut self, v: u8) -> &mut Self {
        self.0.push(v);
        self
    }
    pub fn u16(&mut self, v: u16) -> &mut Self {
        self.0.extend_from_slice(&v.to_le_bytes());
        self
    }
    pub fn u32(&mut self, v: u32) -> &mut Self {
        self.0.extend_from_slice(&v.to_le_bytes());
        self
    }
    pub fn i32(&mut self, v: i32) -> &mut Self {
        self.0.extend_from_slice(&v.to_le_bytes());
        self
    }
    pub fn bytes(&mut self, v: &[u8]) -> &mut Self {
        self.0.extend_from_slice(v);
        self
    }
    pub fn len(&self) -> usize {
        self.0.len()
    }
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
    pub fn as_slice(&self) -> &[u8] {
        &self.0
    }
    pub fn into_vec(self) -> Vec<u8> {
        self.0
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn starts_with_marker() {
        crate::utils::init_test_logger();
        let seg = DataSeg::new();
        assert_eq!(seg.len(), 8);
        assert_eq!(&seg.as_bytes()[..8], DATA_SEG_MAGIC);
    }

    #[test]
    fn first_allocation_is_not_null() {
        crate::utils::init_test_logger();
        let mut seg = DataSeg::new();
        let a = seg.append(&[1], 1);
        assert!(a >= 8);
        let mut seg = DataSeg::new();
        let r = seg.reserve(4, 1);
        assert!(r >= 8);
    }

    #[test]
    fn append_aligns() {
        crate::utils::init_test_logger();
        let mut seg = DataSeg::new();
        seg.append(&[1, 2, 3], 1);
        let a = seg.append(&[9; 5], 8);
        assert_eq!(a % 8, 0);
        assert_eq!(a, 16);
        let b = seg.append(&[7], 4);
        assert_eq!(b, 24);
        // padding bytes are zero
        assert_eq!(&seg.as_bytes()[11..16], &[0; 5]);
    }

    #[test]
    fn patch_is_local() {
        crate::utils::init_test_logger();
        let mut seg = DataSeg::new();
        let before = seg.append(&[0xAA; 4], 4);
        let slot = seg.reserve(8, 8);
        let after = seg.append(&[0xBB; 4], 4);
        seg.patch(slot, &[1, 2, 3, 4, 5, 6, 7, 8]).unwrap();
        let bytes = seg.as_bytes();
        assert_eq!(&bytes[before as usize..before as usize + 4], &[0xAA; 4]);
        assert_eq!(&bytes[slot as usize..slot as usize + 8], &[1, 2, 3, 4, 5, 6, 7, 8]);
        assert_eq!(&bytes[after as usize..after as usize + 4], &[0xBB; 4]);
    }

    #[test]
    fn patch_length_must_match() {
        crate::utils::init_test_logger();
        let mut seg = DataSeg::new();
        let slot = seg.reserve(8, 8);
        assert_eq!(
            seg.patch(slot, &[0; 4]),
            Err(Error::PatchSizeMismatch {
                addr: slot,
                expected: 8,
                actual: 4
            })
        );
        assert!(seg.is_pending(slot));
        assert_eq!(seg.patch(slot + 1, &[0; 8]), Err(Error::UnreservedPatch(slot + 1)));
    }

    #[test]
    fn unpatched_reservation_blocks_finish() {
        crate::utils::init_test_logger();
        let mut seg = DataSeg::new();
        let slot = seg.reserve(4, 4);
        assert_eq!(
            seg.clone().finish(),
            Err(Error::UnpatchedReservation(vec![slot]))
        );
        seg.patch(slot, &[1; 4]).unwrap();
        assert_eq!(seg.finish().map(|d| d.len()), Ok(12));
    }

    #[test]
    fn record_buf_is_little_endian() {
        crate::utils::init_test_logger();
        let mut buf = RecordBuf::new();
        buf.u32(0x0102_0304).i32(-1).u8(7).u16(0x0a0b);
        assert_eq!(
            buf.as_slice(),
            &[4, 3, 2, 1, 0xff, 0xff, 0xff, 0xff, 7, 0x0b, 0x0a]
        );
    }
}
