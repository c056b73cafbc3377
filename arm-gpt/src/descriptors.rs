// Copyright The Rusted Firmware-A Contributors.
//
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Encodings of GPT descriptors and of the configuration values that size the tables.

use num_enum::{IntoPrimitive, TryFromPrimitive};

/// Each L0 GPT entry covers 1GB of physical address space (GPCCR_EL3.L0GPTSZ == 0).
pub(crate) const L0_REGION_SHIFT: u32 = 30;

/// The L0 table must be aligned to at least 4KB, or to its size if that is larger.
pub(crate) const L0_MIN_ALIGNMENT: usize = 1 << 12;

const L0_TYPE_MASK: u64 = 0xf;
const L0_TYPE_BLOCK: u64 = 0x1;
const L0_TYPE_TABLE: u64 = 0x3;
const L0_BLOCK_GPI_SHIFT: u32 = 4;
/// Bits [51:12] of a table descriptor hold the address of the L1 table.
const L0_TABLE_ADDRESS_MASK: u64 = 0x000f_ffff_ffff_f000;

const GPI_MASK: u64 = 0xf;
const GPI_BITS: u32 = 4;
const GPIS_PER_L1_ENTRY: u32 = 16;

/// Granule Protection Information: the physical address space a granule is assigned to.
#[derive(Clone, Copy, Debug, Eq, IntoPrimitive, PartialEq, TryFromPrimitive)]
#[repr(u8)]
pub enum Gpi {
    /// No accesses are permitted.
    NoAccess = 0x0,
    /// Accessible from the Secure physical address space.
    Secure = 0x8,
    /// Accessible from the Non-secure physical address space.
    NonSecure = 0x9,
    /// Accessible from the Root physical address space.
    Root = 0xa,
    /// Accessible from the Realm physical address space.
    Realm = 0xb,
    /// Accessible from any physical address space.
    Any = 0xf,
}

impl Gpi {
    /// Returns an L1 entry with all 16 granules set to this GPI.
    pub(crate) const fn replicated(self) -> u64 {
        (self as u64) * 0x1111_1111_1111_1111
    }
}

/// Protected Physical Address Size, as encoded in GPCCR_EL3.PPS.
#[derive(Clone, Copy, Debug, Eq, IntoPrimitive, PartialEq, TryFromPrimitive)]
#[repr(u8)]
pub enum Pps {
    /// 4GB.
    Size4GB = 0b000,
    /// 64GB.
    Size64GB = 0b001,
    /// 1TB.
    Size1TB = 0b010,
    /// 4TB.
    Size4TB = 0b011,
    /// 16TB.
    Size16TB = 0b100,
    /// 256TB.
    Size256TB = 0b101,
    /// 4PB.
    Size4PB = 0b110,
}

impl Pps {
    /// Returns the width in bits of the protected physical address space.
    pub const fn width(self) -> u32 {
        match self {
            Self::Size4GB => 32,
            Self::Size64GB => 36,
            Self::Size1TB => 40,
            Self::Size4TB => 42,
            Self::Size16TB => 44,
            Self::Size256TB => 48,
            Self::Size4PB => 52,
        }
    }

    /// Returns the number of entries in the L0 table.
    pub const fn l0_entry_count(self) -> usize {
        1 << (self.width() - L0_REGION_SHIFT)
    }

    /// Returns the size in bytes of the L0 table.
    pub const fn l0_table_size(self) -> usize {
        self.l0_entry_count() * size_of::<u64>()
    }

    /// Returns the alignment required for the L0 table.
    pub const fn l0_alignment(self) -> usize {
        let size = self.l0_table_size();
        if size > L0_MIN_ALIGNMENT {
            size
        } else {
            L0_MIN_ALIGNMENT
        }
    }
}

/// Physical Granule Size, as encoded in GPCCR_EL3.PGS.
#[derive(Clone, Copy, Debug, Eq, IntoPrimitive, PartialEq, TryFromPrimitive)]
#[repr(u8)]
pub enum Pgs {
    /// 4KB granules.
    Size4KB = 0b00,
    /// 64KB granules.
    Size64KB = 0b01,
    /// 16KB granules.
    Size16KB = 0b10,
}

impl Pgs {
    /// Returns log2 of the granule size.
    pub const fn shift(self) -> u32 {
        match self {
            Self::Size4KB => 12,
            Self::Size64KB => 16,
            Self::Size16KB => 14,
        }
    }

    /// Returns the number of entries in each L1 table.
    pub const fn l1_entry_count(self) -> usize {
        1 << (L0_REGION_SHIFT - self.shift() - GPIS_PER_L1_ENTRY.trailing_zeros())
    }

    /// Returns the size in bytes of each L1 table, which is also its required alignment.
    pub const fn l1_table_size(self) -> usize {
        self.l1_entry_count() * size_of::<u64>()
    }
}

/// Address arithmetic for a fully configured GPT.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub(crate) struct Geometry {
    pub pps: Pps,
    pub pgs: Pgs,
}

impl Geometry {
    pub const fn new(pps: Pps, pgs: Pgs) -> Self {
        Self { pps, pgs }
    }

    pub const fn pps_size(&self) -> u64 {
        1 << self.pps.width()
    }

    pub const fn granule_size(&self) -> u64 {
        1 << self.pgs.shift()
    }

    pub const fn l0_index(&self, pa: u64) -> usize {
        (pa >> L0_REGION_SHIFT) as usize
    }

    pub const fn l1_index(&self, pa: u64) -> usize {
        (pa >> (self.pgs.shift() + GPIS_PER_L1_ENTRY.trailing_zeros())) as usize
            & (self.pgs.l1_entry_count() - 1)
    }

    /// Position of the given granule's GPI within its L1 entry.
    pub const fn gpi_shift(&self, pa: u64) -> u32 {
        ((pa >> self.pgs.shift()) & (GPIS_PER_L1_ENTRY as u64 - 1)) as u32 * GPI_BITS
    }
}

/// Returns the first physical address covered by the given L0 entry.
pub(crate) const fn l0_region_base(l0_index: usize) -> u64 {
    (l0_index as u64) << L0_REGION_SHIFT
}

pub(crate) const fn l0_region_size() -> u64 {
    1 << L0_REGION_SHIFT
}

/// A decoded L0 GPT descriptor.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub(crate) enum L0Descriptor {
    /// The whole L0 region has the given GPI.
    Block(Gpi),
    /// The L0 region is described by the L1 table at the given physical address.
    Table(u64),
    /// Anything else.
    Invalid,
}

impl L0Descriptor {
    pub fn decode(raw: u64) -> Self {
        match raw & L0_TYPE_MASK {
            L0_TYPE_BLOCK => Gpi::try_from(((raw >> L0_BLOCK_GPI_SHIFT) & GPI_MASK) as u8)
                .map_or(Self::Invalid, Self::Block),
            L0_TYPE_TABLE => Self::Table(raw & L0_TABLE_ADDRESS_MASK),
            _ => Self::Invalid,
        }
    }

    pub const fn block(gpi: Gpi) -> u64 {
        ((gpi as u64) << L0_BLOCK_GPI_SHIFT) | L0_TYPE_BLOCK
    }

    pub const fn table(l1_address: u64) -> u64 {
        (l1_address & L0_TABLE_ADDRESS_MASK) | L0_TYPE_TABLE
    }
}

/// Returns the mask covering GPI fields `first..=last` of an L1 entry.
pub(crate) const fn gpi_field_mask(first_shift: u32, last_shift: u32) -> u64 {
    let width = last_shift - first_shift + GPI_BITS;
    if width == u64::BITS {
        u64::MAX
    } else {
        ((1 << width) - 1) << first_shift
    }
}

/// Extracts the GPI at `shift` from an L1 entry.
pub(crate) const fn gpi_field(entry: u64, shift: u32) -> u8 {
    ((entry >> shift) & GPI_MASK) as u8
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn table_sizes() {
        assert_eq!(Pps::Size4GB.l0_entry_count(), 4);
        assert_eq!(Pps::Size4GB.l0_alignment(), 4096);
        assert_eq!(Pps::Size4PB.l0_table_size(), 1 << 25);
        assert_eq!(Pps::Size4PB.l0_alignment(), 1 << 25);
        assert_eq!(Pgs::Size4KB.l1_entry_count(), 16384);
        assert_eq!(Pgs::Size16KB.l1_entry_count(), 4096);
        assert_eq!(Pgs::Size64KB.l1_table_size(), 8192);
    }

    #[test]
    fn l0_descriptors() {
        assert_eq!(L0Descriptor::block(Gpi::Any), 0xf1);
        assert_eq!(
            L0Descriptor::decode(L0Descriptor::block(Gpi::Realm)),
            L0Descriptor::Block(Gpi::Realm)
        );
        assert_eq!(
            L0Descriptor::decode(L0Descriptor::table(0x8000_2000)),
            L0Descriptor::Table(0x8000_2000)
        );
        // A block descriptor with a reserved GPI encoding.
        assert_eq!(L0Descriptor::decode(0x11), L0Descriptor::Invalid);
        assert_eq!(L0Descriptor::decode(0), L0Descriptor::Invalid);
    }

    #[test]
    fn l1_indexing() {
        let geometry = Geometry::new(Pps::Size4GB, Pgs::Size4KB);
        let pa = 0x4012_3000;
        assert_eq!(geometry.l0_index(pa), 1);
        assert_eq!(geometry.l1_index(pa), 0x12);
        assert_eq!(geometry.gpi_shift(pa), 3 * 4);
    }

    #[test]
    fn field_masks() {
        assert_eq!(gpi_field_mask(0, 60), u64::MAX);
        assert_eq!(gpi_field_mask(4, 8), 0xff0);
        assert_eq!(gpi_field(Gpi::Realm.replicated(), 28), 0xb);
    }
}
