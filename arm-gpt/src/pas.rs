// Copyright The Rusted Firmware-A Contributors.
//
// SPDX-License-Identifier: MIT OR Apache-2.0

use crate::{GptError, descriptors::Gpi};

const ATTR_GPI_MASK: u32 = 0xf;
const ATTR_MAP_TYPE_SHIFT: u32 = 4;
const ATTR_MAP_TYPE_MASK: u32 = 0x3;
const ATTR_MAP_TYPE_BLOCK: u32 = 0x1;
const ATTR_MAP_TYPE_GRANULE: u32 = 0x2;

/// How a PAS region is represented in the GPT.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Mapping {
    /// Whole L0 regions, described directly by L0 block descriptors.
    Block,
    /// Individual granules, described by L1 tables.
    Granule,
}

/// A Protected Address Space region: a range of physical memory and the GPI it is assigned to.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct PasRegion {
    /// The physical base address of the region.
    pub base_pa: u64,
    /// The size of the region in bytes.
    pub size: u64,
    /// The GPI to assign to every granule of the region.
    pub gpi: Gpi,
    /// Whether the region is block or granule mapped.
    pub mapping: Mapping,
}

impl PasRegion {
    /// Creates a region that is mapped with L0 block descriptors.
    pub const fn block(base_pa: u64, size: u64, gpi: Gpi) -> Self {
        Self {
            base_pa,
            size,
            gpi,
            mapping: Mapping::Block,
        }
    }

    /// Creates a region that is mapped granule by granule in L1 tables.
    pub const fn granule(base_pa: u64, size: u64, gpi: Gpi) -> Self {
        Self {
            base_pa,
            size,
            gpi,
            mapping: Mapping::Granule,
        }
    }

    /// Creates a region from the packed attribute encoding used by platform PAS tables, with the
    /// GPI in bits [3:0] and the mapping type in bits [5:4].
    pub fn from_attrs(base_pa: u64, size: u64, attrs: u32) -> Result<Self, GptError> {
        let gpi = Gpi::try_from((attrs & ATTR_GPI_MASK) as u8)
            .map_err(|_| GptError::InvalidAttributes(attrs))?;
        let mapping = match (attrs >> ATTR_MAP_TYPE_SHIFT) & ATTR_MAP_TYPE_MASK {
            ATTR_MAP_TYPE_BLOCK => Mapping::Block,
            ATTR_MAP_TYPE_GRANULE => Mapping::Granule,
            _ => return Err(GptError::InvalidAttributes(attrs)),
        };
        Ok(Self {
            base_pa,
            size,
            gpi,
            mapping,
        })
    }

    /// Returns the packed attribute encoding of the region.
    pub fn attrs(&self) -> u32 {
        let map_type = match self.mapping {
            Mapping::Block => ATTR_MAP_TYPE_BLOCK,
            Mapping::Granule => ATTR_MAP_TYPE_GRANULE,
        };
        (map_type << ATTR_MAP_TYPE_SHIFT) | u32::from(u8::from(self.gpi))
    }

    /// Returns the first address after the region, or `None` if that overflows.
    pub const fn end(&self) -> Option<u64> {
        self.base_pa.checked_add(self.size)
    }

    pub(crate) fn overlaps(&self, other: &PasRegion) -> bool {
        overlaps(self.base_pa, self.size, other.base_pa, other.size)
    }
}

/// Returns whether the ranges `[base_1, base_1 + size_1)` and `[base_2, base_2 + size_2)` overlap.
pub(crate) fn overlaps(base_1: u64, size_1: u64, base_2: u64, size_2: u64) -> bool {
    base_1.saturating_add(size_1) > base_2 && base_2.saturating_add(size_2) > base_1
}
