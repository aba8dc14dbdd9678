//! Fixed, versioned, little-endian wire types for forest exchange paths.
//!
//! Every payload starts with a [`WireHdr`] followed by a [`WireCount`] and that many records.
//! Received buffers carry no alignment guarantee, so records are decoded with
//! `pod_read_unaligned` rather than slice casts.

use crate::mesh_error::MeshError;
use crate::topology::cell_key::CellKey;
use bytemuck::{Pod, Zeroable};
use std::mem::{align_of, size_of};

/// Bump when the layout or semantics change in incompatible ways.
pub const WIRE_VERSION: u16 = 1;

/// Payload kinds carried in [`WireHdr::kind`].
pub mod kind {
    pub const GHOST_CANDIDATES: u16 = 1;
    pub const STATUSES: u16 = 2;
    pub const MIGRATION: u16 = 3;
    pub const SPLITS: u16 = 4;
    pub const MARKERS: u16 = 5;
    pub const COUNTS: u16 = 6;
}

/// All multi-byte integers in these structs are **little-endian** on the wire.
/// We store them pre-LE with `.to_le()` and decode with `.from_le()`.

#[repr(C)]
#[derive(Copy, Clone, Debug, Pod, Zeroable)]
pub struct WireHdr {
    pub version_le: u16,
    pub kind_le: u16,
    pub reserved_le: u32, // keep zero
}

impl WireHdr {
    pub fn new(kind: u16) -> Self {
        Self {
            version_le: WIRE_VERSION.to_le(),
            kind_le: kind.to_le(),
            reserved_le: 0,
        }
    }
    pub fn kind(&self) -> u16 {
        u16::from_le(self.kind_le)
    }
    pub fn version(&self) -> u16 {
        u16::from_le(self.version_le)
    }
}

#[repr(C)]
#[derive(Copy, Clone, Debug, Pod, Zeroable)]
pub struct WireCount {
    pub n_le: u32, // count of following records
}

impl WireCount {
    pub fn new(n: usize) -> Self {
        Self {
            n_le: (n as u32).to_le(),
        }
    }
    pub fn get(&self) -> usize {
        u32::from_le(self.n_le) as usize
    }
}

/// A plain u64 on the wire (counts, split indices, Morton words).
#[repr(C)]
#[derive(Copy, Clone, Debug, Pod, Zeroable)]
pub struct WireU64 {
    pub v_le: u64,
}

impl WireU64 {
    pub fn of(v: u64) -> Self {
        Self { v_le: v.to_le() }
    }
    pub fn get(&self) -> u64 {
        u64::from_le(self.v_le)
    }
}

/// A cell key plus a small status word. Unused coordinate slots are zero.
#[repr(C)]
#[derive(Copy, Clone, Debug, Pod, Zeroable)]
pub struct WireCell {
    pub level_le: u32,
    pub coords_le: [u32; 3],
    pub status_le: u32,
}

impl WireCell {
    pub const SIZE: usize = 20;

    pub fn new<const D: usize>(key: &CellKey<D>, status: u32) -> Self {
        let mut coords_le = [0u32; 3];
        for (slot, c) in coords_le.iter_mut().zip(key.coords.iter()) {
            *slot = c.to_le();
        }
        Self {
            level_le: u32::from(key.level).to_le(),
            coords_le,
            status_le: status.to_le(),
        }
    }

    pub fn key<const D: usize>(&self) -> Result<CellKey<D>, MeshError> {
        if D > 3 {
            return Err(MeshError::Wire(format!("dimension {D} does not fit a cell record")));
        }
        let level = u32::from_le(self.level_le);
        let level = u8::try_from(level)
            .map_err(|_| MeshError::Wire(format!("cell level {level} out of range")))?;
        let mut coords = [0u32; D];
        for (axis, c) in coords.iter_mut().enumerate() {
            *c = u32::from_le(self.coords_le[axis]);
        }
        Ok(CellKey { level, coords })
    }

    pub fn status(&self) -> u32 {
        u32::from_le(self.status_le)
    }
}

/// A cell key tagged with its global leaf index (split windows).
#[repr(C)]
#[derive(Copy, Clone, Debug, Pod, Zeroable)]
pub struct WireIndexedCell {
    pub index_le: u64,
    pub cell: WireCell,
    pub _pad: u32,
}

impl WireIndexedCell {
    pub fn new<const D: usize>(index: u64, key: &CellKey<D>) -> Self {
        Self {
            index_le: index.to_le(),
            cell: WireCell::new(key, 0),
            _pad: 0,
        }
    }

    pub fn index(&self) -> u64 {
        u64::from_le(self.index_le)
    }
}

const _: () = {
    assert!(size_of::<WireHdr>() == 8);
    assert!(size_of::<WireCount>() == 4);
    assert!(size_of::<WireU64>() == 8);
    assert!(size_of::<WireCell>() == WireCell::SIZE);
    assert!(align_of::<WireCell>() == 4);
    assert!(size_of::<WireIndexedCell>() == 32);
};

/// Builder for one outgoing payload: header, count, records.
#[derive(Debug)]
pub struct WireWriter<T: Pod> {
    kind: u16,
    records: Vec<T>,
}

impl<T: Pod> WireWriter<T> {
    pub fn new(kind: u16) -> Self {
        Self {
            kind,
            records: Vec::new(),
        }
    }

    pub fn push(&mut self, record: T) {
        self.records.push(record);
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn finish(self) -> Vec<u8> {
        let hdr = WireHdr::new(self.kind);
        let count = WireCount::new(self.records.len());
        let mut out = Vec::with_capacity(
            size_of::<WireHdr>() + size_of::<WireCount>() + self.records.len() * size_of::<T>(),
        );
        out.extend_from_slice(bytemuck::bytes_of(&hdr));
        out.extend_from_slice(bytemuck::bytes_of(&count));
        out.extend_from_slice(bytemuck::cast_slice(&self.records));
        out
    }
}

impl<T: Pod> Extend<T> for WireWriter<T> {
    fn extend<I: IntoIterator<Item = T>>(&mut self, iter: I) {
        self.records.extend(iter);
    }
}

/// Decoder for a payload produced by [`WireWriter`].
pub struct WireReader;

impl WireReader {
    /// Check header and length, then decode all records.
    pub fn read<T: Pod>(bytes: &[u8], expected_kind: u16) -> Result<Vec<T>, MeshError> {
        let hdr_len = size_of::<WireHdr>();
        let cnt_len = size_of::<WireCount>();
        if bytes.len() < hdr_len + cnt_len {
            return Err(MeshError::Wire(format!(
                "payload of {} bytes is shorter than its header",
                bytes.len()
            )));
        }
        let hdr: WireHdr = bytemuck::pod_read_unaligned(&bytes[..hdr_len]);
        if hdr.version() != WIRE_VERSION {
            return Err(MeshError::Wire(format!(
                "wire version {} (expected {WIRE_VERSION})",
                hdr.version()
            )));
        }
        if hdr.kind() != expected_kind {
            return Err(MeshError::Wire(format!(
                "payload kind {} (expected {expected_kind})",
                hdr.kind()
            )));
        }
        let count: WireCount = bytemuck::pod_read_unaligned(&bytes[hdr_len..hdr_len + cnt_len]);
        let n = count.get();
        let body = &bytes[hdr_len + cnt_len..];
        let rec = size_of::<T>();
        expect_exact_len(body.len(), n * rec).map_err(MeshError::Wire)?;
        Ok(body
            .chunks_exact(rec)
            .map(bytemuck::pod_read_unaligned::<T>)
            .collect())
    }
}

pub fn expect_exact_len(actual: usize, expected: usize) -> Result<(), String> {
    if actual == expected {
        Ok(())
    } else {
        Err(format!("expected {expected} bytes, got {actual}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn version_guard() {
        let hdr = WireHdr::new(kind::STATUSES);
        assert_eq!(hdr.version(), WIRE_VERSION);
        assert_eq!(hdr.kind(), kind::STATUSES);
    }

    #[test]
    fn cell_record_keeps_key() {
        let key = CellKey::<3> {
            level: 7,
            coords: [1, 100, 127],
        };
        let rec = WireCell::new(&key, 2);
        assert_eq!(rec.key::<3>().unwrap(), key);
        assert_eq!(rec.status(), 2);
    }

    #[test]
    fn reader_accepts_unaligned_buffers() {
        let mut w = WireWriter::new(kind::COUNTS);
        w.push(WireU64::of(42));
        w.push(WireU64::of(7));
        let bytes = w.finish();
        // Shift by one byte to break alignment.
        let mut shifted = vec![0u8];
        shifted.extend_from_slice(&bytes);
        let vals: Vec<WireU64> = WireReader::read(&shifted[1..], kind::COUNTS).unwrap();
        assert_eq!(vals.iter().map(WireU64::get).collect::<Vec<_>>(), vec![42, 7]);
    }

    #[test]
    fn reader_rejects_wrong_kind_and_truncation() {
        let mut w = WireWriter::new(kind::COUNTS);
        w.push(WireU64::of(1));
        let bytes = w.finish();
        assert!(matches!(
            WireReader::read::<WireU64>(&bytes, kind::SPLITS),
            Err(MeshError::Wire(_))
        ));
        assert!(matches!(
            WireReader::read::<WireU64>(&bytes[..bytes.len() - 1], kind::COUNTS),
            Err(MeshError::Wire(_))
        ));
    }
}
