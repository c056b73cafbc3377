// Copyright The Rusted Firmware-A Contributors.
//
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Granule Protection Table management for the Arm Realm Management Extension.
//!
//! The GPT assigns every granule of physical memory to a physical address space (Secure,
//! Non-secure, Root or Realm). It has two levels: each L0 entry covers 1GB and either assigns the
//! whole region with a block descriptor or points to an L1 table, in which every 64-bit entry
//! holds the 4-bit GPIs of 16 consecutive granules.
//!
//! A [`Gpt`] moves through the states in [`GptState`]. Tables are built at cold boot with
//! [`Gpt::init_l0_tables`] and [`Gpt::init_pas_l1_tables`], checks are turned on with
//! [`Gpt::enable`], and from then on the tables only change through [`Gpt::delegate_pas`] and
//! [`Gpt::undelegate_pas`]. A later boot stage can pick up tables built by an earlier one with
//! [`Gpt::runtime_init`].

#![cfg_attr(not(test), no_std)]

mod descriptors;
mod maintenance;
mod pas;

pub use descriptors::{Gpi, Pgs, Pps};
pub use pas::{Mapping, PasRegion};

use arm_sysregs::{
    Cacheability, GpccrEl3, GptbrEl3, Shareability, read_gpccr_el3, read_gptbr_el3,
    write_gpccr_el3, write_gptbr_el3,
};
use core::{
    slice,
    sync::atomic::{AtomicU8, AtomicU64, Ordering},
};
use descriptors::{
    Geometry, L0Descriptor, gpi_field, gpi_field_mask, l0_region_base, l0_region_size,
};
use log::{debug, error, info, trace};
use num_enum::{IntoPrimitive, TryFromPrimitive};
use spin::mutex::{SpinMutex, SpinMutexGuard};
use maintenance::{clean_dcache_range, dsb_ish, dsb_ishst, dsb_sy, isb, tlbi_paallos, tlbi_rpaos};
use thiserror::Error;

/// Number of locks protecting the L1 tables. L0 region `n` is protected by lock
/// `n % LOCK_STRIPES`.
const LOCK_STRIPES: usize = 16;

/// GPTBR_EL3.BADDR holds bits [51:12] of the L0 table address.
const GPTBR_BADDR_SHIFT: u32 = 12;

/// An error from building, enabling or updating the GPT.
#[derive(Clone, Copy, Debug, Eq, Error, PartialEq)]
pub enum GptError {
    /// The memory given for a table is not suitably aligned.
    #[error("GPT memory is misaligned")]
    InvalidAlignment,
    /// The memory given for the tables is too small.
    #[error("not enough memory for the GPT")]
    OutOfMemory,
    /// `init_l0_tables` has already been called.
    #[error("L0 tables already initialised")]
    AlreadyInitialized,
    /// `init_l0_tables` has not been called yet.
    #[error("L0 tables not initialised")]
    NotInitialized,
    /// No PAS regions have been provisioned yet.
    #[error("PAS regions not provisioned")]
    NotProvisioned,
    /// Granule protection checks are not enabled.
    #[error("granule protection checks not enabled")]
    NotEnabled,
    /// The tables can't be rebuilt while granule protection checks are enabled.
    #[error("tables in use by enabled granule protection checks")]
    TablesInUse,
    /// GPCCR_EL3 holds a reserved PPS or PGS encoding.
    #[error("invalid GPT configuration")]
    InvalidConfig,
    /// The granule size differs from the one the existing L1 tables were built with.
    #[error("granule size differs from existing L1 tables")]
    GranuleSizeMismatch,
    /// No PAS regions were given.
    #[error("no PAS regions given")]
    NoRegions,
    /// The PAS region with the given index is empty.
    #[error("PAS[{0}] is empty")]
    PasEmpty(usize),
    /// The address range of the PAS region with the given index overflows.
    #[error("address overflow in PAS[{0}]")]
    PasOverflow(usize),
    /// The PAS region with the given index extends beyond the protected physical address space.
    #[error("PAS[{0}] is outside the protected physical address space")]
    PasOutOfRange(usize),
    /// The PAS region with the given index is not aligned to its mapping granularity.
    #[error("PAS[{0}] is not aligned to its mapping granularity")]
    PasUnaligned(usize),
    /// Two PAS regions overlap.
    #[error("PAS[{0}] overlaps with PAS[{1}]")]
    PasOverlap(usize, usize),
    /// The PAS region with the given index overlaps an L0 region provisioned by an earlier call.
    #[error("PAS[{0}] overlaps with a previously provisioned L0 region")]
    PasAlreadyMapped(usize),
    /// Packed PAS attributes with a reserved GPI or mapping type.
    #[error("invalid PAS attributes {0:#x}")]
    InvalidAttributes(u32),
    /// A transition request is not aligned to the granule size, or is empty.
    #[error("transition range is not granule aligned")]
    Unaligned,
    /// A transition request covers memory that can't be transitioned granule by granule.
    #[error("transition range is invalid")]
    InvalidRange,
    /// The caller does not own every granule in the range.
    #[error("transition not permitted")]
    NotPermitted,
}

/// The lifecycle state of a [`Gpt`].
#[derive(Clone, Copy, Debug, Eq, IntoPrimitive, PartialEq, TryFromPrimitive)]
#[repr(u8)]
pub enum GptState {
    /// Nothing has been set up.
    Uninitialized,
    /// The L0 table exists and every entry is `GPI_ANY`.
    L0Built,
    /// PAS regions have been written to the tables.
    L1Provisioned,
    /// Granule protection checks are enabled.
    Enabled,
    /// Granule protection checks have been disabled again.
    Disabled,
}

/// The security state of the caller of a granule transition, as established by the SMC dispatcher.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum SecurityState {
    /// Secure world.
    Secure,
    /// Normal world.
    NonSecure,
    /// Realm world.
    Realm,
}

impl SecurityState {
    /// Returns the GPI of granules this security state may give away, if any.
    fn owned_gpi(self) -> Option<Gpi> {
        match self {
            Self::Secure => Some(Gpi::Secure),
            Self::Realm => Some(Gpi::Realm),
            Self::NonSecure => None,
        }
    }
}

/// A Granule Protection Table, built in memory borrowed for `'a`.
pub struct Gpt<'a> {
    state: AtomicU8,
    pps: Pps,
    pgs: Option<Pgs>,
    l0: &'a [AtomicU64],
    locks: [SpinMutex<()>; LOCK_STRIPES],
}

impl Default for Gpt<'_> {
    fn default() -> Self {
        Self::new()
    }
}

impl<'a> Gpt<'a> {
    /// Creates a GPT in the `Uninitialized` state.
    pub const fn new() -> Self {
        Self {
            state: AtomicU8::new(GptState::Uninitialized as u8),
            pps: Pps::Size4GB,
            pgs: None,
            l0: &[],
            locks: [const { SpinMutex::new(()) }; LOCK_STRIPES],
        }
    }

    /// Returns the current lifecycle state.
    pub fn state(&self) -> GptState {
        GptState::try_from(self.state.load(Ordering::Acquire)).unwrap_or(GptState::Uninitialized)
    }

    fn set_state(&self, state: GptState) {
        self.state.store(state.into(), Ordering::Release);
    }

    /// Builds the L0 table in `l0_mem` for a protected physical address space of size `pps`, with
    /// every entry set to `GPI_ANY`.
    ///
    /// `l0_mem` must be aligned to the larger of 4KB and the L0 table size, and hold at least
    /// [`Pps::l0_entry_count`] entries. This may only be called once.
    pub fn init_l0_tables(&mut self, pps: Pps, l0_mem: &'a [AtomicU64]) -> Result<(), GptError> {
        if self.state() != GptState::Uninitialized {
            error!("GPT: L0 tables already initialised");
            return Err(GptError::AlreadyInitialized);
        }

        let base = l0_mem.as_ptr() as usize;
        if base == 0 || base % pps.l0_alignment() != 0 {
            error!(
                "GPT: L0 base {base:#x} is not aligned to {:#x}",
                pps.l0_alignment()
            );
            return Err(GptError::InvalidAlignment);
        }
        if l0_mem.len() < pps.l0_entry_count() {
            error!(
                "GPT: L0 memory holds {} entries, {} needed",
                l0_mem.len(),
                pps.l0_entry_count()
            );
            return Err(GptError::OutOfMemory);
        }

        let l0 = &l0_mem[..pps.l0_entry_count()];
        for entry in l0 {
            entry.store(L0Descriptor::block(Gpi::Any), Ordering::Relaxed);
        }
        clean_dcache_range(base, pps.l0_table_size());

        self.pps = pps;
        self.l0 = l0;
        self.set_state(GptState::L0Built);
        info!("GPT: L0 table at {base:#x}, PPS {pps:?}");
        Ok(())
    }

    /// Writes the given PAS regions to the tables, carving L1 tables out of `l1_mem` as needed.
    ///
    /// Every region is validated before anything is written, so on error the tables are
    /// unchanged. Regions must not overlap each other or any L0 region provisioned by an earlier
    /// call. `l1_mem` must be aligned to [`Pgs::l1_table_size`].
    pub fn init_pas_l1_tables(
        &mut self,
        pgs: Pgs,
        l1_mem: &'a [AtomicU64],
        regions: &[PasRegion],
    ) -> Result<(), GptError> {
        match self.state() {
            GptState::Uninitialized => return Err(GptError::NotInitialized),
            GptState::Enabled => return Err(GptError::TablesInUse),
            GptState::L0Built | GptState::L1Provisioned | GptState::Disabled => {}
        }
        if self.pgs.is_some_and(|existing| existing != pgs) {
            return Err(GptError::GranuleSizeMismatch);
        }
        if regions.is_empty() {
            return Err(GptError::NoRegions);
        }

        let geometry = Geometry::new(self.pps, pgs);
        let l1_count = self.validate_pas_regions(&geometry, regions)?;
        let l1_tables = validate_l1_memory(pgs, l1_mem, l1_count)?;

        let mut free_tables = l1_tables.chunks_exact(pgs.l1_entry_count());
        for region in regions {
            match region.mapping {
                Mapping::Block => self.map_block(&geometry, region),
                Mapping::Granule => self.map_granules(&geometry, region, &mut free_tables)?,
            }
        }

        clean_dcache_range(self.l0.as_ptr() as usize, self.pps.l0_table_size());
        if !l1_tables.is_empty() {
            clean_dcache_range(l1_tables.as_ptr() as usize, size_of_val(l1_tables));
        }
        dsb_ishst();
        tlbi_paallos();
        dsb_sy();
        isb();

        self.pgs = Some(pgs);
        if self.state() == GptState::L0Built {
            self.set_state(GptState::L1Provisioned);
        }
        info!(
            "GPT: {} PAS regions provisioned with {l1_count} L1 tables, PGS {pgs:?}",
            regions.len()
        );
        Ok(())
    }

    /// Checks every region and returns the number of new L1 tables needed to map them.
    fn validate_pas_regions(
        &self,
        geometry: &Geometry,
        regions: &[PasRegion],
    ) -> Result<usize, GptError> {
        let mut l1_count = 0;

        for (index, region) in regions.iter().enumerate() {
            let end = region.end().ok_or(GptError::PasOverflow(index))?;
            if region.size == 0 {
                return Err(GptError::PasEmpty(index));
            }
            if end > geometry.pps_size() {
                return Err(GptError::PasOutOfRange(index));
            }

            if let Some(other) = regions[index + 1..]
                .iter()
                .position(|other| region.overlaps(other))
            {
                error!("GPT: PAS[{index}] overlaps with PAS[{}]", index + 1 + other);
                return Err(GptError::PasOverlap(index, index + 1 + other));
            }

            let first_l0 = geometry.l0_index(region.base_pa);
            let last_l0 = geometry.l0_index(end - 1);
            if let Some(l0_index) = (first_l0..=last_l0).find(|&l0_index| {
                L0Descriptor::decode(self.l0[l0_index].load(Ordering::Relaxed))
                    != L0Descriptor::Block(Gpi::Any)
            }) {
                error!("GPT: PAS[{index}] overlaps with previously provisioned L0[{l0_index}]");
                return Err(GptError::PasAlreadyMapped(index));
            }

            let alignment = match region.mapping {
                Mapping::Block => l0_region_size(),
                Mapping::Granule => geometry.granule_size(),
            };
            if region.base_pa % alignment != 0 || region.size % alignment != 0 {
                error!("GPT: PAS[{index}] is not aligned to {alignment:#x}");
                return Err(GptError::PasUnaligned(index));
            }

            if region.mapping == Mapping::Granule {
                // L0 regions shared with an earlier granule region use the same L1 table.
                l1_count += (first_l0..=last_l0)
                    .filter(|&l0_index| {
                        !regions[..index].iter().any(|earlier| {
                            earlier.mapping == Mapping::Granule
                                && pas::overlaps(
                                    l0_region_base(l0_index),
                                    l0_region_size(),
                                    earlier.base_pa,
                                    earlier.size,
                                )
                        })
                    })
                    .count();
            }
        }

        Ok(l1_count)
    }

    fn map_block(&self, geometry: &Geometry, region: &PasRegion) {
        let first_l0 = geometry.l0_index(region.base_pa);
        let last_l0 = geometry.l0_index(region.base_pa + region.size - 1);
        for entry in &self.l0[first_l0..=last_l0] {
            entry.store(L0Descriptor::block(region.gpi), Ordering::Relaxed);
        }
        debug!(
            "GPT: L0[{first_l0}..={last_l0}] mapped as block with GPI {:?}",
            region.gpi
        );
    }

    fn map_granules(
        &self,
        geometry: &Geometry,
        region: &PasRegion,
        free_tables: &mut impl Iterator<Item = &'a [AtomicU64]>,
    ) -> Result<(), GptError> {
        let end = region.base_pa + region.size;
        let first_l0 = geometry.l0_index(region.base_pa);
        let last_l0 = geometry.l0_index(end - 1);

        for l0_index in first_l0..=last_l0 {
            let table = match L0Descriptor::decode(self.l0[l0_index].load(Ordering::Relaxed)) {
                // SAFETY: Table descriptors are only written below, pointing into `l1_mem` which
                // lives for `'a`.
                L0Descriptor::Table(address) => unsafe { l1_table(address, geometry.pgs) },
                _ => {
                    let table = free_tables.next().ok_or(GptError::OutOfMemory)?;
                    for entry in table {
                        entry.store(Gpi::Any.replicated(), Ordering::Relaxed);
                    }
                    self.l0[l0_index].store(
                        L0Descriptor::table(table.as_ptr() as u64),
                        Ordering::Relaxed,
                    );
                    debug!("GPT: L0[{l0_index}] -> L1 table at {:p}", table.as_ptr());
                    table
                }
            };

            let start = region.base_pa.max(l0_region_base(l0_index));
            let stop = end.min(l0_region_base(l0_index) + l0_region_size());
            write_gpis(
                table,
                geometry,
                start,
                stop - geometry.granule_size(),
                region.gpi,
            );
        }
        Ok(())
    }

    /// Enables granule protection checks on the calling core.
    ///
    /// This may be called again, on any core, once the tables are provisioned.
    pub fn enable(&self) -> Result<(), GptError> {
        let pgs = match self.state() {
            GptState::L1Provisioned | GptState::Enabled | GptState::Disabled => {
                self.pgs.ok_or(GptError::NotProvisioned)?
            }
            GptState::Uninitialized | GptState::L0Built => {
                error!("GPT: cannot enable before PAS regions are provisioned");
                return Err(GptError::NotProvisioned);
            }
        };

        tlbi_paallos();
        dsb_sy();
        // SAFETY: The L0 table and every L1 table it points to were fully built by
        // `init_l0_tables` and `init_pas_l1_tables`, and live for `'a`.
        unsafe {
            write_gptbr_el3(gptbr_value(self.l0.as_ptr() as u64));
            write_gpccr_el3(gpccr_value(self.pps, pgs) | GpccrEl3::GPC);
        }
        isb();
        tlbi_paallos();
        dsb_sy();
        isb();

        self.set_state(GptState::Enabled);
        info!("GPT: granule protection checks enabled");
        Ok(())
    }

    /// Disables granule protection checks on the calling core. The tables are left intact.
    pub fn disable(&self) -> Result<(), GptError> {
        if !matches!(self.state(), GptState::Enabled | GptState::Disabled) {
            return Err(GptError::NotEnabled);
        }
        // SAFETY: Clearing GPC turns checks off, which doesn't depend on the tables.
        unsafe {
            write_gpccr_el3(read_gpccr_el3() - GpccrEl3::GPC);
        }
        dsb_sy();
        isb();
        self.set_state(GptState::Disabled);
        info!("GPT: granule protection checks disabled");
        Ok(())
    }

    /// Returns the GPI of the granule containing `pa`.
    pub fn gpi_of(&self, pa: u64) -> Result<Gpi, GptError> {
        if self.state() == GptState::Uninitialized {
            return Err(GptError::NotInitialized);
        }
        if pa >= 1_u64 << self.pps.width() {
            return Err(GptError::InvalidRange);
        }
        match L0Descriptor::decode(self.l0[(pa >> descriptors::L0_REGION_SHIFT) as usize].load(
            Ordering::Acquire,
        )) {
            L0Descriptor::Block(gpi) => Ok(gpi),
            L0Descriptor::Table(address) => {
                let geometry = Geometry::new(self.pps, self.pgs.ok_or(GptError::NotProvisioned)?);
                // SAFETY: Table descriptors only ever point to valid L1 tables that live for `'a`.
                let table = unsafe { l1_table(address, geometry.pgs) };
                read_gpi(table, &geometry, pa)
            }
            L0Descriptor::Invalid => Err(GptError::InvalidConfig),
        }
    }

    /// Transitions every granule in `[base, base + size)` from Non-secure to the caller's own
    /// physical address space.
    pub fn delegate_pas(
        &self,
        base: u64,
        size: u64,
        caller: SecurityState,
    ) -> Result<(), GptError> {
        let target = caller.owned_gpi().ok_or(GptError::NotPermitted)?;
        self.transition_pas(base, size, caller, target)
    }

    /// Transitions every granule in `[base, base + size)` from the caller's own physical address
    /// space back to Non-secure.
    pub fn undelegate_pas(
        &self,
        base: u64,
        size: u64,
        caller: SecurityState,
    ) -> Result<(), GptError> {
        self.transition_pas(base, size, caller, Gpi::NonSecure)
    }

    /// Moves every granule in the range to `target`, or none of them.
    fn transition_pas(
        &self,
        base: u64,
        size: u64,
        caller: SecurityState,
        target: Gpi,
    ) -> Result<(), GptError> {
        let pgs = match self.state() {
            GptState::L1Provisioned | GptState::Enabled | GptState::Disabled => {
                self.pgs.ok_or(GptError::NotProvisioned)?
            }
            GptState::Uninitialized | GptState::L0Built => return Err(GptError::NotProvisioned),
        };
        let geometry = Geometry::new(self.pps, pgs);
        let granule = geometry.granule_size();

        if base % granule != 0 || size % granule != 0 || size == 0 {
            debug!("GPT: unaligned transition request {base:#x}+{size:#x}");
            return Err(GptError::Unaligned);
        }
        let end = base.checked_add(size).ok_or(GptError::InvalidRange)?;
        if end > geometry.pps_size() {
            debug!("GPT: transition request {base:#x}+{size:#x} beyond PPS");
            return Err(GptError::InvalidRange);
        }

        let first_l0 = geometry.l0_index(base);
        let last_l0 = geometry.l0_index(end - 1);
        // L0 descriptors don't change once provisioned, so they can be read without a lock.
        for l0_index in first_l0..=last_l0 {
            if !matches!(
                L0Descriptor::decode(self.l0[l0_index].load(Ordering::Acquire)),
                L0Descriptor::Table(_)
            ) {
                debug!("GPT: {base:#x}+{size:#x} is not covered by L1 tables");
                return Err(GptError::InvalidRange);
            }
        }

        let guards = self.lock_l0_regions(first_l0, last_l0);

        let mut pa = base;
        while pa < end {
            let current = self.gpi_of(pa)?;
            if !transition_allowed(caller, current, target) {
                debug!("GPT: {caller:?} may not move granule {pa:#x} from {current:?} to {target:?}");
                return Err(GptError::NotPermitted);
            }
            pa += granule;
        }

        for l0_index in first_l0..=last_l0 {
            let L0Descriptor::Table(address) =
                L0Descriptor::decode(self.l0[l0_index].load(Ordering::Relaxed))
            else {
                return Err(GptError::InvalidRange);
            };
            // SAFETY: Table descriptors only ever point to valid L1 tables that live for `'a`.
            let table = unsafe { l1_table(address, pgs) };
            let start = base.max(l0_region_base(l0_index));
            let stop = end.min(l0_region_base(l0_index) + l0_region_size());
            write_gpis(table, &geometry, start, stop - granule, target);
        }

        // Make the new descriptors visible to the GPC before anyone else can take the locks.
        dsb_ishst();
        drop(guards);

        let mut pa = base;
        while pa < end {
            tlbi_rpaos(pa, pgs);
            pa += granule;
        }
        dsb_ish();

        trace!("GPT: {base:#x}+{size:#x} -> {target:?} for {caller:?}");
        Ok(())
    }

    /// Takes the locks for L0 regions `first..=last`, in ascending order.
    fn lock_l0_regions(
        &self,
        first: usize,
        last: usize,
    ) -> [Option<SpinMutexGuard<'_, ()>>; LOCK_STRIPES] {
        let all = last - first + 1 >= LOCK_STRIPES;
        let mut guards = core::array::from_fn(|_| None);
        for (stripe, lock) in self.locks.iter().enumerate() {
            if all || (first..=last).any(|l0_index| l0_index % LOCK_STRIPES == stripe) {
                guards[stripe] = Some(lock.lock());
            }
        }
        guards
    }
}

impl Gpt<'static> {
    /// Picks up the tables that an earlier boot stage built and enabled, from GPTBR_EL3 and
    /// GPCCR_EL3.
    ///
    /// # Safety
    ///
    /// If granule protection checks are enabled, GPTBR_EL3 must point to an L0 table built by this
    /// library, which together with its L1 tables stays valid and mapped for the rest of the
    /// program and is not accessed other than through the returned `Gpt`.
    pub unsafe fn runtime_init() -> Result<Self, GptError> {
        let gpccr = read_gpccr_el3();
        if !gpccr.contains(GpccrEl3::GPC) {
            error!("GPT: granule protection checks are not enabled");
            return Err(GptError::NotEnabled);
        }
        let pps = Pps::try_from(gpccr.pps()).map_err(|_| GptError::InvalidConfig)?;
        let pgs = Pgs::try_from(gpccr.pgs()).map_err(|_| GptError::InvalidConfig)?;
        let base = read_gptbr_el3().baddr() << GPTBR_BADDR_SHIFT;

        // SAFETY: The caller promises that GPTBR_EL3 points to a valid L0 table, which has
        // `l0_entry_count` entries for the configured PPS.
        let l0 = unsafe { slice::from_raw_parts(base as *const AtomicU64, pps.l0_entry_count()) };

        info!("GPT: runtime configuration L0 {base:#x}, PPS {pps:?}, PGS {pgs:?}");
        Ok(Self {
            state: AtomicU8::new(GptState::Enabled as u8),
            pps,
            pgs: Some(pgs),
            l0,
            locks: [const { SpinMutex::new(()) }; LOCK_STRIPES],
        })
    }
}

/// Returns whether `caller` may move a granule from `current` to `target`.
///
/// Secure and Realm callers may only move granules between their own PAS and Non-secure.
/// Returns the GPCCR_EL3 walk configuration for the given PPS and PGS, with checks disabled. Table
/// walks are inner shareable and write-back cacheable.
fn gpccr_value(pps: Pps, pgs: Pgs) -> GpccrEl3 {
    GpccrEl3::empty()
        .with_pps(pps.into())
        .with_pgs(pgs.into())
        .with_sh(Shareability::Inner)
        .with_orgn(Cacheability::WriteBackAllocate)
        .with_irgn(Cacheability::WriteBackAllocate)
}

/// Returns the GPTBR_EL3 value pointing at an L0 table at the given physical address.
fn gptbr_value(l0_base: u64) -> GptbrEl3 {
    GptbrEl3::empty().with_baddr(l0_base >> GPTBR_BADDR_SHIFT)
}

fn transition_allowed(caller: SecurityState, current: Gpi, target: Gpi) -> bool {
    let Some(owned) = caller.owned_gpi() else {
        return false;
    };
    current != target
        && (target == owned || target == Gpi::NonSecure)
        && (current == owned || current == Gpi::NonSecure)
}

/// Returns the L1 table at the given physical address.
///
/// # Safety
///
/// `address` must be the address of an L1 table for granule size `pgs` which is valid for `'a`.
unsafe fn l1_table<'a>(address: u64, pgs: Pgs) -> &'a [AtomicU64] {
    // SAFETY: The caller promises that `address` points to a valid L1 table.
    unsafe { slice::from_raw_parts(address as usize as *const AtomicU64, pgs.l1_entry_count()) }
}

/// Checks that `l1_mem` can hold `count` L1 tables, and returns the part of it that will be used.
fn validate_l1_memory(
    pgs: Pgs,
    l1_mem: &[AtomicU64],
    count: usize,
) -> Result<&[AtomicU64], GptError> {
    if count == 0 {
        return Ok(&l1_mem[..0]);
    }
    let base = l1_mem.as_ptr() as usize;
    if base % pgs.l1_table_size() != 0 {
        error!(
            "GPT: L1 base {base:#x} is not aligned to {:#x}",
            pgs.l1_table_size()
        );
        return Err(GptError::InvalidAlignment);
    }
    let entries = count
        .checked_mul(pgs.l1_entry_count())
        .ok_or(GptError::OutOfMemory)?;
    if l1_mem.len() < entries {
        error!(
            "GPT: {count} L1 tables needed, memory holds {}",
            l1_mem.len() / pgs.l1_entry_count()
        );
        return Err(GptError::OutOfMemory);
    }
    Ok(&l1_mem[..entries])
}

fn read_gpi(table: &[AtomicU64], geometry: &Geometry, pa: u64) -> Result<Gpi, GptError> {
    let entry = table[geometry.l1_index(pa)].load(Ordering::Acquire);
    Gpi::try_from(gpi_field(entry, geometry.gpi_shift(pa))).map_err(|_| GptError::InvalidConfig)
}

/// Sets the GPI of every granule from `first` to `last` inclusive, which must lie in the L0 region
/// described by `table`.
fn write_gpis(table: &[AtomicU64], geometry: &Geometry, first: u64, last: u64, gpi: Gpi) {
    let first_index = geometry.l1_index(first);
    let last_index = geometry.l1_index(last);
    for (index, entry) in table
        .iter()
        .enumerate()
        .take(last_index + 1)
        .skip(first_index)
    {
        let low = if index == first_index {
            geometry.gpi_shift(first)
        } else {
            0
        };
        let high = if index == last_index {
            geometry.gpi_shift(last)
        } else {
            u64::BITS - 4
        };
        let mask = gpi_field_mask(low, high);
        let old = entry.load(Ordering::Relaxed);
        entry.store((old & !mask) | (gpi.replicated() & mask), Ordering::Relaxed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use arm_sysregs::fake::SYSREGS;
    use maintenance::TLBI_RPAOS_COUNT;
    use std::sync::Mutex;

    const GB: u64 = 1 << 30;
    const MB: u64 = 1 << 20;
    const GRANULE_64K: u64 = 1 << 16;

    /// Serialises tests which use the fake GPCCR_EL3 and GPTBR_EL3.
    static SYSREG_LOCK: Mutex<()> = Mutex::new(());

    #[repr(C, align(4096))]
    struct L0Memory([AtomicU64; 512]);

    /// Room for four L1 tables with 64KB granules.
    #[repr(C, align(8192))]
    struct L1Memory([AtomicU64; 4 * 1024]);

    /// Room for one L1 table with 4KB granules.
    #[repr(C, align(131072))]
    struct L1Memory4K([AtomicU64; 16384]);

    fn l0_memory() -> Box<L0Memory> {
        Box::new(L0Memory([const { AtomicU64::new(0) }; 512]))
    }

    fn l1_memory() -> Box<L1Memory> {
        Box::new(L1Memory([const { AtomicU64::new(0) }; 4 * 1024]))
    }

    fn snapshot(memory: &[AtomicU64]) -> Vec<u64> {
        memory.iter().map(|entry| entry.load(Ordering::Relaxed)).collect()
    }

    /// Regions used by most tests: 4GB PPS, 64KB granules.
    const REGIONS: [PasRegion; 4] = [
        PasRegion::block(0, GB, Gpi::NonSecure),
        PasRegion::granule(GB, 2 * MB, Gpi::Secure),
        PasRegion::granule(GB + 2 * MB, 2 * MB, Gpi::NonSecure),
        PasRegion::granule(2 * GB, 64 * MB, Gpi::NonSecure),
    ];

    fn provisioned<'a>(l0: &'a L0Memory, l1: &'a L1Memory) -> Gpt<'a> {
        let mut gpt = Gpt::new();
        gpt.init_l0_tables(Pps::Size4GB, &l0.0).unwrap();
        gpt.init_pas_l1_tables(Pgs::Size64KB, &l1.0, &REGIONS).unwrap();
        gpt
    }

    #[test]
    fn l0_tables_start_as_any() {
        let l0 = l0_memory();
        let mut gpt = Gpt::new();
        assert_eq!(gpt.state(), GptState::Uninitialized);
        assert_eq!(gpt.gpi_of(0), Err(GptError::NotInitialized));

        gpt.init_l0_tables(Pps::Size4GB, &l0.0).unwrap();
        assert_eq!(gpt.state(), GptState::L0Built);
        assert_eq!(snapshot(&l0.0[..4]), vec![0xf1; 4]);
        // Entries beyond the table are untouched.
        assert_eq!(l0.0[4].load(Ordering::Relaxed), 0);
        assert_eq!(gpt.gpi_of(0x1234_5000), Ok(Gpi::Any));
        assert_eq!(gpt.gpi_of(4 * GB), Err(GptError::InvalidRange));
    }

    #[test]
    fn l0_tables_only_once() {
        let l0 = l0_memory();
        let mut gpt = Gpt::new();
        gpt.init_l0_tables(Pps::Size4GB, &l0.0).unwrap();
        assert_eq!(
            gpt.init_l0_tables(Pps::Size4GB, &l0.0),
            Err(GptError::AlreadyInitialized)
        );
    }

    #[test]
    fn l0_memory_misaligned() {
        let l0 = l0_memory();
        let mut gpt = Gpt::new();
        assert_eq!(
            gpt.init_l0_tables(Pps::Size4GB, &l0.0[1..]),
            Err(GptError::InvalidAlignment)
        );
        assert_eq!(gpt.state(), GptState::Uninitialized);
    }

    #[test]
    fn l0_memory_too_small() {
        #[repr(C, align(8192))]
        struct SmallL0([AtomicU64; 512]);
        let l0 = Box::new(SmallL0([const { AtomicU64::new(0) }; 512]));
        let mut gpt = Gpt::new();
        // A 1TB PPS needs 1024 L0 entries.
        assert_eq!(
            gpt.init_l0_tables(Pps::Size1TB, &l0.0),
            Err(GptError::OutOfMemory)
        );
        assert_eq!(snapshot(&l0.0), vec![0; 512]);
    }

    #[test]
    fn pas_before_l0() {
        let l1 = l1_memory();
        let mut gpt = Gpt::new();
        assert_eq!(
            gpt.init_pas_l1_tables(Pgs::Size64KB, &l1.0, &REGIONS),
            Err(GptError::NotInitialized)
        );
    }

    #[test]
    fn block_and_granule_regions() {
        let l0 = l0_memory();
        let l1 = l1_memory();
        let gpt = provisioned(&l0, &l1);
        assert_eq!(gpt.state(), GptState::L1Provisioned);

        assert_eq!(gpt.gpi_of(0), Ok(Gpi::NonSecure));
        assert_eq!(gpt.gpi_of(GB - GRANULE_64K), Ok(Gpi::NonSecure));
        assert_eq!(gpt.gpi_of(GB), Ok(Gpi::Secure));
        assert_eq!(gpt.gpi_of(GB + 2 * MB - GRANULE_64K), Ok(Gpi::Secure));
        assert_eq!(gpt.gpi_of(GB + 2 * MB), Ok(Gpi::NonSecure));
        assert_eq!(gpt.gpi_of(GB + 4 * MB), Ok(Gpi::Any));
        assert_eq!(gpt.gpi_of(2 * GB + 64 * MB - GRANULE_64K), Ok(Gpi::NonSecure));
        assert_eq!(gpt.gpi_of(2 * GB + 64 * MB), Ok(Gpi::Any));
        assert_eq!(gpt.gpi_of(3 * GB), Ok(Gpi::Any));

        // Two L1 tables were used, in order.
        assert_eq!(
            L0Descriptor::decode(l0.0[1].load(Ordering::Relaxed)),
            L0Descriptor::Table(l1.0.as_ptr() as u64)
        );
        assert_eq!(
            L0Descriptor::decode(l0.0[2].load(Ordering::Relaxed)),
            L0Descriptor::Table(l1.0[1024..].as_ptr() as u64)
        );
        assert_eq!(l1.0[2048].load(Ordering::Relaxed), 0);
    }

    #[test]
    fn small_granules() {
        let l0 = l0_memory();
        let l1 = Box::new(L1Memory4K([const { AtomicU64::new(0) }; 16384]));
        let mut gpt = Gpt::new();
        gpt.init_l0_tables(Pps::Size4GB, &l0.0).unwrap();
        gpt.init_pas_l1_tables(
            Pgs::Size4KB,
            &l1.0,
            &[
                PasRegion::granule(0x4000_3000, 0x2000, Gpi::Realm),
                PasRegion::granule(0x4000_5000, 0x1_0000, Gpi::Root),
            ],
        )
        .unwrap();

        assert_eq!(gpt.gpi_of(0x4000_2000), Ok(Gpi::Any));
        assert_eq!(gpt.gpi_of(0x4000_3000), Ok(Gpi::Realm));
        assert_eq!(gpt.gpi_of(0x4000_4fff), Ok(Gpi::Realm));
        assert_eq!(gpt.gpi_of(0x4000_5000), Ok(Gpi::Root));
        assert_eq!(gpt.gpi_of(0x4001_4000), Ok(Gpi::Root));
        assert_eq!(gpt.gpi_of(0x4001_5000), Ok(Gpi::Any));
        assert_eq!(l1.0[0].load(Ordering::Relaxed), 0xaaaa_aaaa_aaab_bfff);
    }

    #[test]
    fn overlapping_regions_rejected() {
        let l0 = l0_memory();
        let l1 = l1_memory();
        let mut gpt = Gpt::new();
        gpt.init_l0_tables(Pps::Size4GB, &l0.0).unwrap();
        let before = snapshot(&l0.0);

        assert_eq!(
            gpt.init_pas_l1_tables(
                Pgs::Size64KB,
                &l1.0,
                &[
                    PasRegion::granule(GB, 2 * MB, Gpi::Secure),
                    PasRegion::granule(2 * GB, MB, Gpi::Realm),
                    PasRegion::granule(GB + MB, 2 * MB, Gpi::NonSecure),
                ],
            ),
            Err(GptError::PasOverlap(0, 2))
        );
        assert_eq!(snapshot(&l0.0), before);
        assert_eq!(snapshot(&l1.0), vec![0; 4 * 1024]);
        assert_eq!(gpt.state(), GptState::L0Built);
    }

    #[test]
    fn l1_memory_exhausted() {
        let l0 = l0_memory();
        let l1 = l1_memory();
        let mut gpt = Gpt::new();
        gpt.init_l0_tables(Pps::Size4GB, &l0.0).unwrap();
        let before = snapshot(&l0.0);

        // Needs two L1 tables, but only one fits.
        assert_eq!(
            gpt.init_pas_l1_tables(
                Pgs::Size64KB,
                &l1.0[..1024],
                &[
                    PasRegion::granule(0, MB, Gpi::Secure),
                    PasRegion::granule(GB, MB, Gpi::Secure),
                ],
            ),
            Err(GptError::OutOfMemory)
        );
        assert_eq!(snapshot(&l0.0), before);
        assert_eq!(snapshot(&l1.0), vec![0; 4 * 1024]);
    }

    #[test]
    fn shared_l0_region_needs_one_table() {
        let l0 = l0_memory();
        let l1 = l1_memory();
        let mut gpt = Gpt::new();
        gpt.init_l0_tables(Pps::Size4GB, &l0.0).unwrap();
        gpt.init_pas_l1_tables(
            Pgs::Size64KB,
            &l1.0[..1024],
            &[
                PasRegion::granule(0, MB, Gpi::Secure),
                PasRegion::granule(MB, MB, Gpi::Realm),
                PasRegion::granule(512 * MB, MB, Gpi::NonSecure),
            ],
        )
        .unwrap();
        assert_eq!(gpt.gpi_of(MB), Ok(Gpi::Realm));
        assert_eq!(gpt.gpi_of(512 * MB), Ok(Gpi::NonSecure));
    }

    #[test]
    fn invalid_regions() {
        let l0 = l0_memory();
        let l1 = l1_memory();
        let mut gpt = Gpt::new();
        gpt.init_l0_tables(Pps::Size4GB, &l0.0).unwrap();

        let cases = [
            (
                PasRegion::block(GB, MB, Gpi::Secure),
                GptError::PasUnaligned(0),
            ),
            (
                PasRegion::granule(GB + 0x1000, GRANULE_64K, Gpi::Secure),
                GptError::PasUnaligned(0),
            ),
            (
                PasRegion::granule(4 * GB - GRANULE_64K, 2 * GRANULE_64K, Gpi::Secure),
                GptError::PasOutOfRange(0),
            ),
            (
                PasRegion::granule(u64::MAX - 0xffff, GRANULE_64K * 2, Gpi::Secure),
                GptError::PasOverflow(0),
            ),
            (PasRegion::granule(GB, 0, Gpi::Secure), GptError::PasEmpty(0)),
        ];
        for (region, expected) in cases {
            assert_eq!(
                gpt.init_pas_l1_tables(Pgs::Size64KB, &l1.0, &[region]),
                Err(expected),
                "{region:?}"
            );
        }
        assert_eq!(
            gpt.init_pas_l1_tables(Pgs::Size64KB, &l1.0, &[]),
            Err(GptError::NoRegions)
        );
        assert_eq!(
            gpt.init_pas_l1_tables(
                Pgs::Size64KB,
                &l1.0[1..],
                &[PasRegion::granule(0, MB, Gpi::Secure)]
            ),
            Err(GptError::InvalidAlignment)
        );
    }

    #[test]
    fn second_call_cannot_remap() {
        let l0 = l0_memory();
        let l1 = l1_memory();
        let mut gpt = provisioned(&l0, &l1);
        let (_, spare) = l1.0.split_at(2048);

        assert_eq!(
            gpt.init_pas_l1_tables(
                Pgs::Size64KB,
                spare,
                &[PasRegion::granule(GB + 8 * MB, MB, Gpi::Realm)]
            ),
            Err(GptError::PasAlreadyMapped(0))
        );
        assert_eq!(
            gpt.init_pas_l1_tables(
                Pgs::Size4KB,
                spare,
                &[PasRegion::granule(3 * GB, MB, Gpi::Realm)]
            ),
            Err(GptError::GranuleSizeMismatch)
        );

        gpt.init_pas_l1_tables(
            Pgs::Size64KB,
            spare,
            &[PasRegion::granule(3 * GB, MB, Gpi::Realm)],
        )
        .unwrap();
        assert_eq!(gpt.gpi_of(3 * GB), Ok(Gpi::Realm));
        assert_eq!(gpt.gpi_of(GB), Ok(Gpi::Secure));
    }

    #[test]
    fn enable_and_runtime_init() {
        let _lock = SYSREG_LOCK.lock().unwrap();
        SYSREGS.lock().unwrap().reset();

        let l0 = l0_memory();
        let l1 = l1_memory();
        let mut gpt = Gpt::new();
        // SAFETY: Checks are not enabled, so nothing is read from GPTBR_EL3.
        assert_eq!(
            unsafe { Gpt::runtime_init() }.err(),
            Some(GptError::NotEnabled)
        );
        assert_eq!(gpt.enable(), Err(GptError::NotProvisioned));
        gpt.init_l0_tables(Pps::Size4GB, &l0.0).unwrap();
        assert_eq!(gpt.enable(), Err(GptError::NotProvisioned));
        gpt.init_pas_l1_tables(Pgs::Size64KB, &l1.0, &REGIONS).unwrap();

        gpt.enable().unwrap();
        assert_eq!(gpt.state(), GptState::Enabled);
        {
            let regs = SYSREGS.lock().unwrap();
            assert_eq!(regs.gptbr_el3, gptbr_value(l0.0.as_ptr() as u64));
            assert_eq!(regs.gptbr_el3.baddr() << 12, l0.0.as_ptr() as u64);
            assert!(regs.gpccr_el3.contains(GpccrEl3::GPC));
            assert_eq!(regs.gpccr_el3.pps(), u8::from(Pps::Size4GB));
            assert_eq!(regs.gpccr_el3.pgs(), u8::from(Pgs::Size64KB));
        }
        // Enabling again, e.g. on another core, is fine.
        gpt.enable().unwrap();
        assert_eq!(
            gpt.init_pas_l1_tables(Pgs::Size64KB, &l1.0, &REGIONS),
            Err(GptError::TablesInUse)
        );

        // SAFETY: The tables were built above, and outlive the runtime `Gpt` which is only used
        // within this test.
        let runtime = unsafe { Gpt::runtime_init() }.unwrap();
        assert_eq!(runtime.state(), GptState::Enabled);
        assert_eq!(runtime.gpi_of(GB), Ok(Gpi::Secure));
        runtime
            .delegate_pas(2 * GB, GRANULE_64K, SecurityState::Realm)
            .unwrap();
        assert_eq!(gpt.gpi_of(2 * GB), Ok(Gpi::Realm));
        drop(runtime);

        gpt.disable().unwrap();
        assert_eq!(gpt.state(), GptState::Disabled);
        assert!(!SYSREGS.lock().unwrap().gpccr_el3.contains(GpccrEl3::GPC));
        // SAFETY: Checks are disabled, so nothing is read from GPTBR_EL3.
        assert_eq!(
            unsafe { Gpt::runtime_init() }.err(),
            Some(GptError::NotEnabled)
        );
        gpt.enable().unwrap();
        SYSREGS.lock().unwrap().reset();
    }

    #[test]
    fn gpccr_configuration() {
        let gpccr = gpccr_value(Pps::Size1TB, Pgs::Size16KB);
        assert_eq!(gpccr.bits(), 0x0000_b502);
        assert_eq!(gpccr.pps(), u8::from(Pps::Size1TB));
        assert_eq!(gpccr.pgs(), u8::from(Pgs::Size16KB));
        assert!(!gpccr.contains(GpccrEl3::GPC));
    }

    #[test]
    fn gptbr_base_address() {
        let gptbr = gptbr_value(0x8_1234_5000);
        assert_eq!(gptbr.bits(), 0x81_2345);
        assert_eq!(gptbr.baddr() << GPTBR_BADDR_SHIFT, 0x8_1234_5000);
    }

    #[test]
    fn disable_before_enable() {
        let l0 = l0_memory();
        let l1 = l1_memory();
        let gpt = provisioned(&l0, &l1);
        assert_eq!(gpt.disable(), Err(GptError::NotEnabled));
    }

    #[test]
    fn delegate_round_trip() {
        let _lock = SYSREG_LOCK.lock().unwrap();
        let l0 = l0_memory();
        let l1 = l1_memory();
        let gpt = provisioned(&l0, &l1);
        let base = 2 * GB + 4 * MB;
        let size = 3 * GRANULE_64K;

        for caller in [SecurityState::Realm, SecurityState::Secure] {
            let tlbis = TLBI_RPAOS_COUNT.load(Ordering::Relaxed);
            gpt.delegate_pas(base, size, caller).unwrap();
            assert!(TLBI_RPAOS_COUNT.load(Ordering::Relaxed) >= tlbis + 3);
            let owned = caller.owned_gpi().unwrap();
            for granule in 0..3 {
                assert_eq!(gpt.gpi_of(base + granule * GRANULE_64K), Ok(owned));
            }
            assert_eq!(gpt.gpi_of(base + size), Ok(Gpi::NonSecure));

            gpt.undelegate_pas(base, size, caller).unwrap();
            for granule in 0..3 {
                assert_eq!(
                    gpt.gpi_of(base + granule * GRANULE_64K),
                    Ok(Gpi::NonSecure)
                );
            }
        }
    }

    #[test]
    fn delegate_is_all_or_nothing() {
        let l0 = l0_memory();
        let l1 = l1_memory();
        let mut gpt = Gpt::new();
        gpt.init_l0_tables(Pps::Size4GB, &l0.0).unwrap();
        let base = GB;
        // The third of five granules is Secure, the rest Non-secure.
        gpt.init_pas_l1_tables(
            Pgs::Size64KB,
            &l1.0,
            &[
                PasRegion::granule(base, 2 * GRANULE_64K, Gpi::NonSecure),
                PasRegion::granule(base + 2 * GRANULE_64K, GRANULE_64K, Gpi::Secure),
                PasRegion::granule(base + 3 * GRANULE_64K, 2 * GRANULE_64K, Gpi::NonSecure),
            ],
        )
        .unwrap();
        let before = snapshot(&l1.0);

        assert_eq!(
            gpt.delegate_pas(base, 5 * GRANULE_64K, SecurityState::Realm),
            Err(GptError::NotPermitted)
        );
        let expected = [
            Gpi::NonSecure,
            Gpi::NonSecure,
            Gpi::Secure,
            Gpi::NonSecure,
            Gpi::NonSecure,
        ];
        for (granule, gpi) in expected.into_iter().enumerate() {
            assert_eq!(gpt.gpi_of(base + granule as u64 * GRANULE_64K), Ok(gpi));
        }
        assert_eq!(snapshot(&l1.0), before);
    }

    #[test]
    fn delegate_across_l0_regions() {
        let l0 = l0_memory();
        let l1 = l1_memory();
        let mut gpt = Gpt::new();
        gpt.init_l0_tables(Pps::Size4GB, &l0.0).unwrap();
        gpt.init_pas_l1_tables(
            Pgs::Size64KB,
            &l1.0,
            &[
                PasRegion::granule(2 * GB - MB, MB, Gpi::NonSecure),
                PasRegion::granule(2 * GB, MB, Gpi::NonSecure),
            ],
        )
        .unwrap();

        let base = 2 * GB - 2 * GRANULE_64K;
        gpt.delegate_pas(base, 4 * GRANULE_64K, SecurityState::Secure)
            .unwrap();
        assert_eq!(gpt.gpi_of(base - GRANULE_64K), Ok(Gpi::NonSecure));
        assert_eq!(gpt.gpi_of(2 * GB - GRANULE_64K), Ok(Gpi::Secure));
        assert_eq!(gpt.gpi_of(2 * GB + GRANULE_64K), Ok(Gpi::Secure));
        assert_eq!(gpt.gpi_of(2 * GB + 2 * GRANULE_64K), Ok(Gpi::NonSecure));

        // Running off the end of the provisioned granules fails without changing anything.
        assert_eq!(
            gpt.undelegate_pas(base, MB, SecurityState::Secure),
            Err(GptError::NotPermitted)
        );
        assert_eq!(gpt.gpi_of(base), Ok(Gpi::Secure));
    }

    #[test]
    fn transition_policy() {
        let l0 = l0_memory();
        let l1 = l1_memory();
        let gpt = provisioned(&l0, &l1);

        // Normal world can't transition anything.
        assert_eq!(
            gpt.delegate_pas(GB + 2 * MB, GRANULE_64K, SecurityState::NonSecure),
            Err(GptError::NotPermitted)
        );
        assert_eq!(
            gpt.undelegate_pas(GB + 2 * MB, GRANULE_64K, SecurityState::NonSecure),
            Err(GptError::NotPermitted)
        );
        // Realm can't take Secure memory, or give it back.
        assert_eq!(
            gpt.delegate_pas(GB, GRANULE_64K, SecurityState::Realm),
            Err(GptError::NotPermitted)
        );
        assert_eq!(
            gpt.undelegate_pas(GB, GRANULE_64K, SecurityState::Realm),
            Err(GptError::NotPermitted)
        );
        // Non-secure memory can't be undelegated.
        assert_eq!(
            gpt.undelegate_pas(GB + 2 * MB, GRANULE_64K, SecurityState::Secure),
            Err(GptError::NotPermitted)
        );
        // Delegating twice fails the second time.
        gpt.delegate_pas(GB + 2 * MB, GRANULE_64K, SecurityState::Realm)
            .unwrap();
        assert_eq!(
            gpt.delegate_pas(GB + 2 * MB, GRANULE_64K, SecurityState::Realm),
            Err(GptError::NotPermitted)
        );
        // GPI_ANY granules belong to nobody.
        assert_eq!(
            gpt.delegate_pas(GB + 4 * MB, GRANULE_64K, SecurityState::Realm),
            Err(GptError::NotPermitted)
        );
    }

    #[test]
    fn transition_arguments() {
        let l0 = l0_memory();
        let l1 = l1_memory();
        let gpt = provisioned(&l0, &l1);

        for (base, size) in [
            (GB + 0x1000, GRANULE_64K),
            (GB, GRANULE_64K + 0x1000),
            (GB, 0),
        ] {
            assert_eq!(
                gpt.delegate_pas(base, size, SecurityState::Realm),
                Err(GptError::Unaligned)
            );
        }
        assert_eq!(
            gpt.delegate_pas(4 * GB - GRANULE_64K, 2 * GRANULE_64K, SecurityState::Realm),
            Err(GptError::InvalidRange)
        );
        assert_eq!(
            gpt.delegate_pas(
                u64::MAX - GRANULE_64K + 1,
                2 * GRANULE_64K,
                SecurityState::Realm
            ),
            Err(GptError::InvalidRange)
        );
        // Block mapped memory can't be transitioned.
        assert_eq!(
            gpt.delegate_pas(0, GRANULE_64K, SecurityState::Realm),
            Err(GptError::InvalidRange)
        );

        let l0 = l0_memory();
        let mut unprovisioned = Gpt::new();
        unprovisioned.init_l0_tables(Pps::Size4GB, &l0.0).unwrap();
        assert_eq!(
            unprovisioned.delegate_pas(GB, 0x1000, SecurityState::Realm),
            Err(GptError::NotProvisioned)
        );
    }

    #[test]
    fn concurrent_disjoint_delegates() {
        let l0 = l0_memory();
        let l1 = l1_memory();
        let gpt = provisioned(&l0, &l1);
        let base = 2 * GB;

        std::thread::scope(|scope| {
            for thread in 0..4 {
                let gpt = &gpt;
                scope.spawn(move || {
                    for granule in 0..16 {
                        let pa = base + (thread * 16 + granule) * GRANULE_64K;
                        gpt.delegate_pas(pa, GRANULE_64K, SecurityState::Realm)
                            .unwrap();
                    }
                });
            }
        });

        for granule in 0..64 {
            assert_eq!(gpt.gpi_of(base + granule * GRANULE_64K), Ok(Gpi::Realm));
        }
        assert_eq!(gpt.gpi_of(base + 64 * GRANULE_64K), Ok(Gpi::NonSecure));
    }
}
