// Copyright The Rusted Firmware-A Contributors.
//
// SPDX-License-Identifier: BSD-3-Clause

//! Barriers and cache maintenance. These are no-ops when not running on AArch64, so that the
//! callers can be unit tested on the host.

#[cfg(all(target_arch = "aarch64", not(test)))]
use arm_sysregs::read_ctr_el0;
#[cfg(target_arch = "aarch64")]
use core::arch::asm;

/// Issues a full system data synchronization barrier (`dsb sy`).
pub fn dsb_sy() {
    // SAFETY: `dsb` does not violate safe Rust guarantees.
    #[cfg(target_arch = "aarch64")]
    unsafe {
        asm!("dsb sy", options(nostack));
    }
}

/// Issues an instruction synchronization barrier (`isb`) instruction.
#[cfg_attr(any(test, not(target_arch = "aarch64")), allow(unused))]
pub fn isb() {
    // SAFETY: `isb` does not violate safe Rust guarantees.
    #[cfg(target_arch = "aarch64")]
    unsafe {
        asm!("isb", options(nostack));
    }
}

/// Waits for an interrupt (`wfi`).
#[cfg_attr(test, allow(unused))]
pub fn wfi() {
    // SAFETY: `wfi` does not violate safe Rust guarantees.
    #[cfg(target_arch = "aarch64")]
    unsafe {
        asm!("wfi", options(nomem, nostack, preserves_flags));
    }
}

/// Cleans and invalidates the data cache lines covering `[start, start + size)` to the point of
/// coherency, so that a loaded image is visible to the next stage whatever its cache state.
#[cfg_attr(any(test, not(target_arch = "aarch64")), allow(unused_variables))]
pub fn clean_dcache_range(start: usize, size: usize) {
    #[cfg(all(target_arch = "aarch64", not(test)))]
    {
        // DminLine is log2 of the smallest data cache line size, in words.
        let line_size = 4 << read_ctr_el0().dminline();
        let mut address = start & !(line_size - 1);
        while address < start + size {
            // SAFETY: Cleaning and invalidating by address doesn't change memory contents.
            unsafe {
                asm!("dc civac, {address}", address = in(reg) address, options(nostack));
            }
            address += line_size;
        }
    }
    dsb_sy();
}

/// Enters the image described by `ep_info` with an exception return from EL3, passing its
/// arguments in `x0`-`x7`.
///
/// # Safety
///
/// `ep_info` must describe a valid, fully loaded image, and any data it needs must have been
/// cleaned to the point of coherency.
#[cfg(target_arch = "aarch64")]
#[cfg_attr(test, allow(unused))]
pub unsafe fn enter_image(ep_info: &crate::image_load::EntryPointInfo) -> ! {
    let args = &ep_info.args;
    dsb_sy();
    isb();
    // SAFETY: The caller guarantees that the entry point is a valid image, which takes over from
    // here and never returns.
    unsafe {
        asm!(
            "msr spsr_el3, {spsr}",
            "msr elr_el3, {pc}",
            "isb",
            "eret",
            spsr = in(reg) ep_info.spsr,
            pc = in(reg) ep_info.pc,
            in("x0") args[0],
            in("x1") args[1],
            in("x2") args[2],
            in("x3") args[3],
            in("x4") args[4],
            in("x5") args[5],
            in("x6") args[6],
            in("x7") args[7],
            options(noreturn),
        );
    }
}
