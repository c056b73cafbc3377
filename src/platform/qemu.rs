// Copyright The Rusted Firmware-A Contributors.
//
// SPDX-License-Identifier: BSD-3-Clause

#[cfg(feature = "rme")]
use super::GptMemory;
use super::Platform;
use crate::{
    aarch64::{clean_dcache_range, enter_image, wfi},
    auth::StaticFuses,
    error::BootError,
    image_load::{
        BL31_IMAGE_ID, BL32_IMAGE_ID, BL33_IMAGE_ID, BlParams, EntryPointInfo, ImageAttributes,
        ImageDescriptor, LoadList, LoadPlatform, NextImage, PARAM_VERSION_2,
    },
    io::{
        DeviceHandle, IoError, IoSpec, IoStorage,
        fip::{BL31_UUID, BL32_UUID, BL33_UUID, FipDevice},
        memmap::MemmapDevice,
    },
    logger::{self, LockedWriter, LogSink, get_log_sink},
};
#[cfg(feature = "rme")]
use arm_gpt::{Gpi, PasRegion, Pgs, Pps};
use arm_pl011_uart::{PL011Registers, Uart, UniqueMmioPointer};
use arrayvec::ArrayVec;
#[cfg(feature = "rme")]
use core::sync::atomic::AtomicU64;
use core::{
    mem::size_of,
    ptr::NonNull,
    slice,
    sync::atomic::{AtomicBool, Ordering},
};
use log::{error, info};
use spin::{
    Once,
    mutex::{SpinMutex, SpinMutexGuard},
};

/// Base address of the secure world PL011 UART, aka. UART1.
const UART1_BASE: usize = 0x0904_0000;
const PL011_BASE_ADDRESS: *mut PL011Registers = UART1_BASE as _;

/// The FIP lives in flash0, after the space reserved for BL1.
const FIP_BASE: usize = 0x0004_0000;
const FIP_SIZE: usize = 0x0040_0000;

const BL31_BASE: usize = 0x0e09_0000;
const BL31_SIZE: usize = 0x0007_0000;
const BL32_BASE: usize = 0x0e10_0000;
const BL32_SIZE: usize = 0x00f0_0000;
const BL33_BASE: usize = 0x6000_0000;
const BL33_SIZE: usize = 0x0400_0000;

/// EL3h with all exceptions masked.
const SPSR_EL3H: u64 = 0x3cd;
/// EL1h with all exceptions masked.
const SPSR_EL1H: u64 = 0x3c5;
/// EL2h with all exceptions masked.
const SPSR_EL2H: u64 = 0x3c9;

#[cfg(feature = "rme")]
const GB: u64 = 1 << 30;
#[cfg(feature = "rme")]
const SEC_SRAM_BASE: u64 = 0x0e00_0000;

// Generated by build.rs from the `ROTPK_HASH` environment variable.
const ROTPK_HASH: [u8; 32] = include!(concat!(env!("OUT_DIR"), "/rotpk_hash.rs"));

/// QEMU has no fuses, so the root of trust is fixed at build time.
static FUSES: StaticFuses = StaticFuses {
    revoked: 0,
    reference_hash: ROTPK_HASH,
    production: false,
};

static FLASH: Once<MemmapDevice<'static>> = Once::new();
static FIP: Once<FipDevice<'static, MemmapDevice<'static>>> = Once::new();

static BL_PARAMS: SpinMutex<BlParams> = SpinMutex::new(BlParams {
    version: PARAM_VERSION_2,
    images: ArrayVec::new_const(),
});

static DESCRIPTORS_TAKEN: AtomicBool = AtomicBool::new(false);
#[cfg(feature = "rme")]
static GPT_MEMORY_TAKEN: AtomicBool = AtomicBool::new(false);

#[cfg(feature = "rme")]
#[repr(C, align(4096))]
struct L0Memory([AtomicU64; 4]);

/// One L1 table with 64KB granules, for the first GB.
#[cfg(feature = "rme")]
#[repr(C, align(8192))]
struct L1Memory([AtomicU64; 1024]);

#[cfg(feature = "rme")]
static GPT_L0: L0Memory = L0Memory([const { AtomicU64::new(0) }; 4]);
#[cfg(feature = "rme")]
static GPT_L1: L1Memory = L1Memory([const { AtomicU64::new(0) }; 1024]);

/// The aarch64 'virt' machine of the QEMU emulator.
pub struct Qemu;

impl Platform for Qemu {
    const MAX_IO_DEVICES: usize = 1;
    const MAX_IO_HANDLES: usize = 2;

    #[cfg(feature = "rme")]
    const GPT_PPS: Pps = Pps::Size4GB;
    #[cfg(feature = "rme")]
    const GPT_PGS: Pgs = Pgs::Size64KB;
    #[cfg(feature = "rme")]
    const PAS_REGIONS: &'static [PasRegion] = &[
        PasRegion::granule(0, SEC_SRAM_BASE, Gpi::Any),
        // BL1, BL2 and BL31, and the GPT itself.
        PasRegion::granule(SEC_SRAM_BASE, BL32_BASE as u64 - SEC_SRAM_BASE, Gpi::Root),
        PasRegion::granule(BL32_BASE as u64, BL32_SIZE as u64, Gpi::Secure),
        PasRegion::granule(
            (BL32_BASE + BL32_SIZE) as u64,
            GB - (BL32_BASE + BL32_SIZE) as u64,
            Gpi::Any,
        ),
        PasRegion::block(GB, 3 * GB, Gpi::NonSecure),
    ];

    type LogSinkImpl = LockedWriter<Uart<'static>>;
    type FusesImpl = StaticFuses;
    type LoadPlatformImpl = QemuLoadPlatform;

    fn init() {
        // SAFETY: `PL011_BASE_ADDRESS` is the base address of a PL011 device, and nothing else
        // accesses that address range. The MMU is off so the address is used as is.
        let uart_pointer =
            unsafe { UniqueMmioPointer::new(NonNull::new(PL011_BASE_ADDRESS).unwrap()) };
        logger::init(LockedWriter::new(Uart::new(uart_pointer)))
            .expect("Failed to initialise logger");
    }

    fn fuses() -> &'static StaticFuses {
        &FUSES
    }

    fn load_platform<'d, const DEVICES: usize, const HANDLES: usize>(
        storage: &mut IoStorage<'d, DEVICES, HANDLES>,
    ) -> Result<QemuLoadPlatform, BootError> {
        let flash = FLASH.call_once(|| {
            // SAFETY: The FIP region of flash0 is only accessed through this device.
            MemmapDevice::new(unsafe { slice::from_raw_parts_mut(FIP_BASE as *mut u8, FIP_SIZE) })
        });
        let fip = FIP.call_once(|| {
            FipDevice::new(
                flash,
                IoSpec::Block {
                    offset: 0,
                    length: FIP_SIZE as u64,
                },
            )
        });
        let fip = storage.register_device(fip)?;
        Ok(QemuLoadPlatform::new(fip))
    }

    fn image_descriptors() -> Option<LoadList<'static>> {
        if DESCRIPTORS_TAKEN.swap(true, Ordering::AcqRel) {
            return None;
        }
        let mut descriptors = ArrayVec::new();
        // SAFETY: The load regions are reserved for these images and don't overlap BL2 or each
        // other. The guard above means only one reference to each is ever created.
        unsafe {
            descriptors.push(ImageDescriptor::new(
                BL31_IMAGE_ID,
                ImageAttributes::EXECUTABLE | ImageAttributes::PLAT_SETUP_REQUIRED,
                load_region(BL31_BASE, BL31_SIZE),
                Some(BL32_IMAGE_ID),
            ));
            descriptors.push(ImageDescriptor::new(
                BL32_IMAGE_ID,
                ImageAttributes::EXECUTABLE,
                load_region(BL32_BASE, BL32_SIZE),
                Some(BL33_IMAGE_ID),
            ));
            descriptors.push(ImageDescriptor::new(
                BL33_IMAGE_ID,
                ImageAttributes::EXECUTABLE,
                load_region(BL33_BASE, BL33_SIZE),
                None,
            ));
        }
        Some(LoadList {
            version: PARAM_VERSION_2,
            head: BL31_IMAGE_ID,
            descriptors,
        })
    }

    #[cfg(feature = "rme")]
    fn gpt_memory() -> Option<GptMemory> {
        if GPT_MEMORY_TAKEN.swap(true, Ordering::AcqRel) {
            return None;
        }
        Some(GptMemory {
            l0: &GPT_L0.0,
            l1: &GPT_L1.0,
        })
    }

    fn run_next_image(ep_info: &EntryPointInfo) -> ! {
        info!("BL2: entering next image at {:#x}", ep_info.pc);
        if let Some(sink) = get_log_sink() {
            sink.flush();
        }
        // SAFETY: Every image has been loaded, authenticated and cleaned to the point of
        // coherency by the loader.
        unsafe { enter_image(ep_info) }
    }

    fn error_handler(error: BootError) -> ! {
        error!("BL2: boot failed ({:?}): {error}", error.kind());
        if let Some(sink) = get_log_sink() {
            sink.flush();
        }
        loop {
            wfi();
        }
    }
}

/// Returns the memory an image is loaded into.
///
/// # Safety
///
/// The region must be valid RAM that nothing else uses, and no other reference to it may exist.
unsafe fn load_region(base: usize, size: usize) -> &'static mut [u8] {
    // SAFETY: The caller guarantees that the region is valid and unaliased.
    unsafe { slice::from_raw_parts_mut(base as *mut u8, size) }
}

/// Loads BL31, BL32 and BL33 from the FIP in flash, and hands over to BL31.
pub struct QemuLoadPlatform {
    fip: DeviceHandle,
    params: SpinMutexGuard<'static, BlParams>,
}

impl QemuLoadPlatform {
    fn new(fip: DeviceHandle) -> Self {
        let mut params = BL_PARAMS.lock();
        params.images.clear();
        for (image_id, spsr) in [
            (BL31_IMAGE_ID, SPSR_EL3H),
            (BL32_IMAGE_ID, SPSR_EL1H),
            (BL33_IMAGE_ID, SPSR_EL2H),
        ] {
            params.images.push(NextImage {
                image_id,
                ep_info: EntryPointInfo {
                    spsr,
                    ..Default::default()
                },
            });
        }
        Self { fip, params }
    }
}

impl LoadPlatform for QemuLoadPlatform {
    fn setup(&mut self) {}

    fn image_source(&self, image_id: u32) -> Result<(DeviceHandle, IoSpec<'static>), BootError> {
        let uuid = match image_id {
            BL31_IMAGE_ID => BL31_UUID,
            BL32_IMAGE_ID => BL32_UUID,
            BL33_IMAGE_ID => BL33_UUID,
            _ => return Err(IoError::NotFound.into()),
        };
        Ok((self.fip, IoSpec::Uuid(uuid)))
    }

    fn post_load(&mut self, image: &ImageDescriptor) -> Result<(), BootError> {
        let entry = self
            .params
            .images
            .iter_mut()
            .find(|next| next.image_id == image.image_id)
            .ok_or(IoError::NotFound)?;
        let payload = image.payload.clone().unwrap_or(0..0);
        entry.ep_info.pc = image.destination[payload].as_ptr() as u64;
        Ok(())
    }

    fn next_bl_params(&mut self) -> Option<&mut BlParams> {
        Some(&mut *self.params)
    }

    fn flush_next_bl_params(&self) {
        clean_dcache_range(
            &*self.params as *const BlParams as usize,
            size_of::<BlParams>(),
        );
    }

    fn error_handler(&self, error: BootError) -> ! {
        Qemu::error_handler(error)
    }
}
