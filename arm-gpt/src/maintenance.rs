// Copyright The Rusted Firmware-A Contributors.
//
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Barriers, GPT TLB invalidation and cache maintenance. These do nothing in unit tests or with the
//! `fakes` feature, apart from counting invalidations.

use crate::Pgs;
#[cfg(all(target_arch = "aarch64", not(any(test, feature = "fakes"))))]
use core::arch::asm;
#[cfg(test)]
use core::sync::atomic::{AtomicUsize, Ordering};

/// Number of `TLBI RPAOS` operations issued.
#[cfg(test)]
pub static TLBI_RPAOS_COUNT: AtomicUsize = AtomicUsize::new(0);

/// Data synchronisation barrier, full system.
pub fn dsb_sy() {
    // SAFETY: `dsb` does not violate safe Rust guarantees.
    #[cfg(all(target_arch = "aarch64", not(any(test, feature = "fakes"))))]
    unsafe {
        asm!("dsb sy", options(nostack));
    }
}

/// Data synchronisation barrier, inner shareable.
pub fn dsb_ish() {
    // SAFETY: `dsb` does not violate safe Rust guarantees.
    #[cfg(all(target_arch = "aarch64", not(any(test, feature = "fakes"))))]
    unsafe {
        asm!("dsb ish", options(nostack));
    }
}

/// Data synchronisation barrier for stores, inner shareable.
pub fn dsb_ishst() {
    // SAFETY: `dsb` does not violate safe Rust guarantees.
    #[cfg(all(target_arch = "aarch64", not(any(test, feature = "fakes"))))]
    unsafe {
        asm!("dsb ishst", options(nostack));
    }
}

/// Instruction synchronisation barrier.
pub fn isb() {
    // SAFETY: `isb` does not violate safe Rust guarantees.
    #[cfg(all(target_arch = "aarch64", not(any(test, feature = "fakes"))))]
    unsafe {
        asm!("isb", options(nostack));
    }
}

/// Invalidates all cached GPT information for the outer shareable domain.
pub fn tlbi_paallos() {
    // SAFETY: TLB invalidation does not violate safe Rust guarantees.
    #[cfg(all(target_arch = "aarch64", not(any(test, feature = "fakes"))))]
    unsafe {
        asm!("sys #6, c8, c1, #4", options(nostack));
    }
}

/// Invalidates cached GPT information for the granule at `pa`, outer shareable.
pub fn tlbi_rpaos(pa: u64, pgs: Pgs) {
    let operand = rpaos_operand(pa, pgs);
    // SAFETY: TLB invalidation does not violate safe Rust guarantees.
    #[cfg(all(target_arch = "aarch64", not(any(test, feature = "fakes"))))]
    unsafe {
        asm!("sys #6, c8, c4, #3, {operand}", operand = in(reg) operand, options(nostack));
    }
    #[cfg(not(all(target_arch = "aarch64", not(any(test, feature = "fakes")))))]
    let _ = operand;
    #[cfg(test)]
    TLBI_RPAOS_COUNT.fetch_add(1, Ordering::Relaxed);
}

/// Returns the operand for a `TLBI RPAOS` covering the granule at `pa`.
const fn rpaos_operand(pa: u64, pgs: Pgs) -> u64 {
    const SIZE_SHIFT: u32 = 44;
    let size = match pgs {
        Pgs::Size4KB => 0b0000,
        Pgs::Size16KB => 0b0001,
        Pgs::Size64KB => 0b0010,
    };
    ((pa >> 12) & 0xff_ffff_ffff) | size << SIZE_SHIFT
}

/// Cleans and invalidates the data cache lines covering `[start, start + size)` to the point of
/// coherency.
#[cfg_attr(
    not(all(target_arch = "aarch64", not(any(test, feature = "fakes")))),
    allow(unused_variables)
)]
pub fn clean_dcache_range(start: usize, size: usize) {
    #[cfg(all(target_arch = "aarch64", not(any(test, feature = "fakes"))))]
    {
        // DminLine is log2 of the smallest data cache line size, in words.
        let line_size = 4 << arm_sysregs::read_ctr_el0().dminline();
        let mut address = start & !(line_size - 1);
        while address < start + size {
            // SAFETY: Cache maintenance by address does not change memory contents.
            unsafe {
                asm!("dc civac, {address}", address = in(reg) address, options(nostack));
            }
            address += line_size;
        }
    }
    dsb_sy();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rpaos() {
        assert_eq!(rpaos_operand(0x8000_3000, Pgs::Size4KB), 0x8_0003);
        assert_eq!(
            rpaos_operand(0x8001_0000, Pgs::Size64KB),
            0x8_0010 | 0b0010 << 44
        );
    }
}
