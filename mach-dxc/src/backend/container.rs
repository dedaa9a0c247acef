//! DXBC container layout.
//!
//! A container is a fixed header, a table of part offsets and the parts themselves, each a
//! fourcc and a byte size followed by the part data padded to four bytes. All fields are
//! little-endian.

use bytemuck::{Pod, Zeroable};
use std::mem::size_of;

pub const DXBC_MAGIC: [u8; 4] = *b"DXBC";

pub const FEATURE_INFO: [u8; 4] = *b"SFI0";
pub const INPUT_SIGNATURE: [u8; 4] = *b"ISG1";
pub const OUTPUT_SIGNATURE: [u8; 4] = *b"OSG1";
pub const STATISTICS: [u8; 4] = *b"STAT";
pub const DEBUG_NAME: [u8; 4] = *b"ILDN";
pub const PROGRAM: [u8; 4] = *b"DXIL";

#[repr(C)]
#[derive(Debug, Copy, Clone, Pod, Zeroable)]
pub struct ContainerHeader {
    pub magic: [u8; 4],
    pub digest: [u32; 4],
    pub major_version: u16,
    pub minor_version: u16,
    pub container_size: u32,
    pub part_count: u32,
}

#[repr(C)]
#[derive(Debug, Copy, Clone, Pod, Zeroable)]
pub struct PartHeader {
    pub fourcc: [u8; 4],
    pub part_size: u32,
}

/// Collects parts in order and writes the signed container.
#[derive(Debug, Default)]
pub struct ContainerBuilder {
    parts: Vec<([u8; 4], Vec<u8>)>,
}

impl ContainerBuilder {
    pub fn new() -> Self {
        ContainerBuilder::default()
    }

    pub fn add_part(&mut self, fourcc: [u8; 4], data: Vec<u8>) -> &mut Self {
        self.parts.push((fourcc, data));
        self
    }

    pub fn part_count(&self) -> usize {
        self.parts.len()
    }

    /// Lays out the container and fills in its digest.
    pub fn finish(self) -> Vec<u8> {
        let table_end = size_of::<ContainerHeader>() + size_of::<u32>() * self.parts.len();
        let mut offsets = Vec::with_capacity(self.parts.len());
        let mut end = table_end;
        for (_, data) in &self.parts {
            offsets.push(end as u32);
            end += size_of::<PartHeader>() + data.len().next_multiple_of(4);
        }

        let header = ContainerHeader {
            magic: DXBC_MAGIC,
            digest: [0; 4],
            major_version: 1u16.to_le(),
            minor_version: 0,
            container_size: (end as u32).to_le(),
            part_count: (self.parts.len() as u32).to_le(),
        };

        let mut blob = Vec::with_capacity(end);
        blob.extend_from_slice(bytemuck::bytes_of(&header));
        for offset in offsets {
            blob.extend_from_slice(&offset.to_le_bytes());
        }
        for (fourcc, data) in self.parts {
            let padded = data.len().next_multiple_of(4);
            let part = PartHeader {
                fourcc,
                part_size: (padded as u32).to_le(),
            };
            blob.extend_from_slice(bytemuck::bytes_of(&part));
            blob.extend_from_slice(&data);
            blob.resize(blob.len() + padded - data.len(), 0);
        }

        mach_siegbert_vogt_dxcsa::sign_in_place(&mut blob);
        blob
    }
}

/// A part borrowed from a container.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct Part<'a> {
    pub fourcc: [u8; 4],
    pub data: &'a [u8],
}

/// Splits a container into its parts, or `None` if the layout is malformed.
pub fn parts(blob: &[u8]) -> Option<Vec<Part<'_>>> {
    let header: ContainerHeader =
        bytemuck::pod_read_unaligned(blob.get(..size_of::<ContainerHeader>())?);
    if header.magic != DXBC_MAGIC || u32::from_le(header.container_size) as usize != blob.len() {
        return None;
    }

    let count = u32::from_le(header.part_count) as usize;
    let table = blob.get(size_of::<ContainerHeader>()..)?.get(..count * size_of::<u32>())?;
    table
        .chunks_exact(size_of::<u32>())
        .map(|offset| {
            let offset = u32::from_le_bytes(offset.try_into().ok()?) as usize;
            let data_start = offset + size_of::<PartHeader>();
            let part: PartHeader = bytemuck::pod_read_unaligned(blob.get(offset..data_start)?);
            let size = u32::from_le(part.part_size) as usize;
            Some(Part {
                fourcc: part.fourcc,
                data: blob.get(data_start..data_start + size)?,
            })
        })
        .collect()
}

/// Data of the first part with `fourcc`.
pub fn find_part(blob: &[u8], fourcc: [u8; 4]) -> Option<&[u8]> {
    parts(blob)?
        .into_iter()
        .find(|part| part.fourcc == fourcc)
        .map(|part| part.data)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn header_layout() {
        assert_eq!(size_of::<ContainerHeader>(), 32);
        assert_eq!(size_of::<PartHeader>(), 8);
    }

    #[test]
    fn parts_round_trip_with_padding() {
        let mut builder = ContainerBuilder::new();
        builder
            .add_part(FEATURE_INFO, vec![1, 0, 0, 0, 0, 0, 0, 0])
            .add_part(DEBUG_NAME, b"abc".to_vec());
        let blob = builder.finish();

        assert_eq!(&blob[..4], b"DXBC");
        assert!(mach_siegbert_vogt_dxcsa::verify(&blob));
        assert_eq!(blob.len(), 32 + 8 + 16 + 12);

        let parts = parts(&blob).expect("well-formed container");
        assert_eq!(parts.len(), 2);
        assert_eq!(parts[1].fourcc, DEBUG_NAME);
        assert_eq!(parts[1].data, b"abc\0");
        assert_eq!(find_part(&blob, FEATURE_INFO), Some(&[1, 0, 0, 0, 0, 0, 0, 0][..]));
        assert_eq!(find_part(&blob, PROGRAM), None);
    }

    #[test]
    fn rejects_truncated_containers() {
        let mut builder = ContainerBuilder::new();
        builder.add_part(PROGRAM, vec![0; 24]);
        let blob = builder.finish();
        assert!(parts(&blob[..blob.len() - 4]).is_none());
        assert!(parts(b"DXBC").is_none());
    }
}
