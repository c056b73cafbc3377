// Copyright The Rusted Firmware-A Contributors.
//
// SPDX-License-Identifier: BSD-3-Clause

//! RF-A BL2: loads and authenticates the later boot stages, sets up granule protection and hands
//! over to BL31.

#![cfg_attr(not(test), no_main)]
#![cfg_attr(not(test), no_std)]

mod aarch64;
mod auth;
mod error;
mod image_load;
mod io;
mod logger;
mod platform;
// The granule transition service is only called from BL31, which provides the SMC loop.
#[cfg(feature = "rme")]
#[cfg_attr(not(test), allow(dead_code))]
mod services;
#[cfg(feature = "rme")]
#[cfg_attr(not(test), allow(dead_code))]
mod smccc;

use crate::{
    auth::{crypto::SoftwareCrypto, csf::CsfAuthenticator},
    image_load::{EntryPointInfo, ImageLoader},
    io::IoStorage,
    platform::{Platform, PlatformImpl},
};
#[cfg(feature = "rme")]
use arm_gpt::{Gpt, GptError};
use log::{error, info};

/// Loads every image the platform lists and, with RME, provisions and enables the GPT. Returns the
/// entry point of the image to run next.
fn bl2_load() -> EntryPointInfo {
    PlatformImpl::init();

    info!("Rust BL2 starting");

    let mut storage = IoStorage::<
        { <PlatformImpl as Platform>::MAX_IO_DEVICES },
        { <PlatformImpl as Platform>::MAX_IO_HANDLES },
    >::new();
    let load_platform = match PlatformImpl::load_platform(&mut storage) {
        Ok(load_platform) => load_platform,
        Err(e) => {
            error!("BL2: failed to set up image storage: {e}");
            PlatformImpl::error_handler(e)
        }
    };
    let mut images =
        PlatformImpl::image_descriptors().expect("image descriptors already taken");

    let authenticator = CsfAuthenticator::new(
        PlatformImpl::fuses(),
        SoftwareCrypto,
        PlatformImpl::auth_policy(),
    );
    let ep_info =
        ImageLoader::new(&mut storage, load_platform, authenticator).load_images(&mut images);
    info!("BL2: all images loaded");

    // The GPT is only enabled once nothing else needs to be written to memory outside the Root PAS.
    #[cfg(feature = "rme")]
    if let Err(e) = init_gpt() {
        error!("BL2: failed to set up the GPT: {e}");
        PlatformImpl::error_handler(e.into());
    }

    ep_info
}

/// Builds the GPT from the platform's PAS regions and enables granule protection checks.
///
/// Later stages take over the tables with `Gpt::runtime_init`.
#[cfg(feature = "rme")]
fn init_gpt() -> Result<(), GptError> {
    let memory = PlatformImpl::gpt_memory().expect("GPT memory already taken");
    let mut gpt = Gpt::new();
    gpt.init_l0_tables(PlatformImpl::GPT_PPS, memory.l0)?;
    gpt.init_pas_l1_tables(
        PlatformImpl::GPT_PGS,
        memory.l1,
        PlatformImpl::PAS_REGIONS,
    )?;
    gpt.enable()
}

#[cfg_attr(test, allow(unused))]
extern "C" fn bl2_main() -> ! {
    let ep_info = bl2_load();
    PlatformImpl::run_next_image(&ep_info)
}

#[cfg(all(target_arch = "aarch64", not(test)))]
mod asm {
    use super::bl2_main;

    /// This macro wraps a naked_asm block with `bti`, or any other universal
    /// prologue we'd still like added.
    ///
    /// Use this over `core::arch::naked_asm` by default, otherwise you may
    /// need to ensure that e.g. `bti` landing pads are in place yourself.
    macro_rules! naked_asm {
        ($($inner:tt)*) => {
           ::core::arch::naked_asm!("bti c", $($inner)*)
        }
    }

    /// The cold boot entrypoint, entered from BL1 at EL3 with the MMU and caches off.
    ///
    /// Zeroes `.bss`, sets up the stack and calls `bl2_main`.
    #[unsafe(naked)]
    #[unsafe(no_mangle)]
    #[unsafe(link_section = ".text.bl2_entrypoint")]
    unsafe extern "C" fn bl2_entrypoint() -> ! {
        naked_asm!(
            "adrp	x0, __BSS_START__",
            "add	x0, x0, :lo12:__BSS_START__",
            "adrp	x1, __BSS_END__",
            "add	x1, x1, :lo12:__BSS_END__",
        "0:",
            "cmp	x0, x1",
            "b.hs	1f",
            "stp	xzr, xzr, [x0], #16",
            "b	0b",
        "1:",
            "adrp	x0, __STACK_END__",
            "add	x0, x0, :lo12:__STACK_END__",
            "mov	sp, x0",
            "b	{bl2_main}",
            bl2_main = sym bl2_main,
        );
    }
}
