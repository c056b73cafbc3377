// Copyright The Rusted Firmware-A Contributors.
//
// SPDX-License-Identifier: BSD-3-Clause

macro_rules! select_platform {
    (platform = $condition:literal, $mod:ident::$plat_impl:ident) => {
        #[cfg(platform = $condition)]
        mod $mod;

        #[cfg(platform = $condition)]
        pub use $mod::$plat_impl as PlatformImpl;
    };
    (test, $mod:ident::$plat_impl:ident) => {
        #[cfg(test)]
        pub mod $mod;

        #[cfg(test)]
        pub use $mod::$plat_impl as PlatformImpl;
    };
}

select_platform!(platform = "fvp", fvp::Fvp);
select_platform!(platform = "qemu", qemu::Qemu);
select_platform!(test, test::TestPlatform);

use crate::{
    auth::{AuthPolicy, Fuses},
    error::BootError,
    image_load::{EntryPointInfo, LoadList, LoadPlatform},
    io::IoStorage,
    logger::LogSink,
};
#[cfg(feature = "rme")]
use arm_gpt::{PasRegion, Pgs, Pps};
#[cfg(feature = "rme")]
use core::sync::atomic::AtomicU64;

/// Type alias for convenience, to avoid having to use the complicated type name everywhere.
pub type LogSinkImpl = <PlatformImpl as Platform>::LogSinkImpl;

/// Memory for the Granule Protection Tables: the L0 table and the pool of L1 tables.
#[cfg(feature = "rme")]
pub struct GptMemory {
    /// The L0 table.
    pub l0: &'static [AtomicU64],
    /// Storage for L1 tables.
    pub l1: &'static [AtomicU64],
}

/// The hooks implemented by all platforms.
pub trait Platform {
    /// The maximum number of IO devices which can be registered at once.
    const MAX_IO_DEVICES: usize;

    /// The maximum number of IO entities which can be open at once.
    const MAX_IO_HANDLES: usize;

    /// The size of the protected physical address space.
    #[cfg(feature = "rme")]
    const GPT_PPS: Pps;

    /// The granule size for the L1 tables.
    #[cfg(feature = "rme")]
    const GPT_PGS: Pgs;

    /// The physical address space of every region of memory, as written to the GPT during boot.
    #[cfg(feature = "rme")]
    const PAS_REGIONS: &'static [PasRegion];

    /// Platform dependent LogSink implementation type for Logger.
    type LogSinkImpl: LogSink;

    /// Access to the fuses holding the root of trust.
    type FusesImpl: Fuses + 'static;

    /// Platform hooks for image loading.
    type LoadPlatformImpl: LoadPlatform;

    /// Initialises the logger and anything else the platform needs.
    ///
    /// Any logs sent before this is called will be ignored.
    fn init();

    /// Returns the fuses.
    fn fuses() -> &'static Self::FusesImpl;

    /// Returns the policy to authenticate images with.
    fn auth_policy() -> AuthPolicy {
        AuthPolicy::default()
    }

    /// Registers the devices images are loaded from, and returns the hooks for loading them.
    fn load_platform<'d, const DEVICES: usize, const HANDLES: usize>(
        storage: &mut IoStorage<'d, DEVICES, HANDLES>,
    ) -> Result<Self::LoadPlatformImpl, BootError>;

    /// Returns the list of images to load. The function should only be called once, when it
    /// returns `Some`. All subsequent calls must return `None`.
    fn image_descriptors() -> Option<LoadList<'static>>;

    /// Returns the memory for the GPT. The function should only be called once, when it returns
    /// `Some`. All subsequent calls must return `None`.
    #[cfg(feature = "rme")]
    fn gpt_memory() -> Option<GptMemory>;

    /// Jumps to the next image. Any cache maintenance for the image has already been done.
    fn run_next_image(ep_info: &EntryPointInfo) -> !;

    /// Handles a fatal boot error, e.g. by resetting the system.
    fn error_handler(error: BootError) -> !;
}
