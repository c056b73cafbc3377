// Copyright The Rusted Firmware-A Contributors.
//
// SPDX-License-Identifier: BSD-3-Clause

#[cfg(feature = "rme")]
use super::GptMemory;
use super::Platform;
#[cfg(feature = "semihosting")]
use crate::io::semihosting::{ArmSemihosting, OpenMode, SemihostingDevice};
#[cfg(not(feature = "semihosting"))]
use crate::io::{
    fip::{BL31_UUID, BL32_UUID, BL33_UUID, FipDevice},
    memmap::MemmapDevice,
};
use crate::{
    aarch64::{clean_dcache_range, enter_image, wfi},
    auth::StaticFuses,
    error::BootError,
    image_load::{
        BL31_IMAGE_ID, BL32_IMAGE_ID, BL33_IMAGE_ID, BlParams, EntryPointInfo, ImageAttributes,
        ImageDescriptor, LoadList, LoadPlatform, NextImage, PARAM_VERSION_2,
    },
    io::{DeviceHandle, IoError, IoSpec, IoStorage},
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
#[cfg(not(feature = "semihosting"))]
use spin::Once;
use spin::mutex::{SpinMutex, SpinMutexGuard};

// Base address of the primary PL011 UART.
const PL011_BASE_ADDRESS: *mut PL011Registers = 0x1C09_0000 as _;

#[cfg(not(feature = "semihosting"))]
const V2M_FLASH0_BASE: usize = 0x0800_0000;
#[cfg(not(feature = "semihosting"))]
const V2M_FLASH0_SIZE: usize = 0x0400_0000;

const ARM_TRUSTED_SRAM_BASE: usize = 0x0400_0000;
const ARM_TRUSTED_SRAM_SIZE: usize = 0x0008_0000;

const BL31_BASE: usize = 0x0400_3000;
const BL31_SIZE: usize = 0x0005_d000;
/// Secure DRAM, shared by BL32 and its manifests.
const BL32_BASE: usize = 0x0600_0000;
const BL32_SIZE: usize = 0x0200_0000;
const BL33_BASE: usize = 0x8800_0000;
const BL33_SIZE: usize = 0x0400_0000;

/// EL3h with all exceptions masked.
const SPSR_EL3H: u64 = 0x3cd;
/// EL2h with all exceptions masked.
const SPSR_EL2H: u64 = 0x3c9;

#[cfg(feature = "rme")]
const GB: u64 = 1 << 30;
/// Memory for the Realm Management Monitor, at the top of the first DRAM bank.
#[cfg(feature = "rme")]
const REALM_DRAM_BASE: u64 = 0xfdc0_0000;

// Generated by build.rs from the `ROTPK_HASH` environment variable.
const ROTPK_HASH: [u8; 32] = include!(concat!(env!("OUT_DIR"), "/rotpk_hash.rs"));

/// The FVP models no fuses, so the root of trust is fixed at build time.
static FUSES: StaticFuses = StaticFuses {
    revoked: 0,
    reference_hash: ROTPK_HASH,
    production: false,
};

#[cfg(not(feature = "semihosting"))]
static FLASH: Once<MemmapDevice<'static>> = Once::new();
#[cfg(not(feature = "semihosting"))]
static FIP: Once<FipDevice<'static, MemmapDevice<'static>>> = Once::new();

#[cfg(feature = "semihosting")]
static HOST: SemihostingDevice<ArmSemihosting> =
    SemihostingDevice::new(ArmSemihosting, OpenMode::Read);

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

/// Two L1 tables with 64KB granules: one for the first GB and one for the last.
#[cfg(feature = "rme")]
#[repr(C, align(8192))]
struct L1Memory([AtomicU64; 2048]);

#[cfg(feature = "rme")]
static GPT_L0: L0Memory = L0Memory([const { AtomicU64::new(0) }; 4]);
#[cfg(feature = "rme")]
static GPT_L1: L1Memory = L1Memory([const { AtomicU64::new(0) }; 2048]);

/// The Arm Fixed Virtual Platform, Base RevC model.
pub struct Fvp;

impl Platform for Fvp {
    const MAX_IO_DEVICES: usize = 1;
    const MAX_IO_HANDLES: usize = 4;

    #[cfg(feature = "rme")]
    const GPT_PPS: Pps = Pps::Size4GB;
    #[cfg(feature = "rme")]
    const GPT_PGS: Pgs = Pgs::Size64KB;
    #[cfg(feature = "rme")]
    const PAS_REGIONS: &'static [PasRegion] = &[
        PasRegion::granule(0, ARM_TRUSTED_SRAM_BASE as u64, Gpi::Any),
        PasRegion::granule(
            ARM_TRUSTED_SRAM_BASE as u64,
            ARM_TRUSTED_SRAM_SIZE as u64,
            Gpi::Root,
        ),
        PasRegion::granule(
            (ARM_TRUSTED_SRAM_BASE + ARM_TRUSTED_SRAM_SIZE) as u64,
            (BL32_BASE - ARM_TRUSTED_SRAM_BASE - ARM_TRUSTED_SRAM_SIZE) as u64,
            Gpi::Any,
        ),
        PasRegion::granule(BL32_BASE as u64, BL32_SIZE as u64, Gpi::Secure),
        PasRegion::granule(
            (BL32_BASE + BL32_SIZE) as u64,
            GB - (BL32_BASE + BL32_SIZE) as u64,
            Gpi::Any,
        ),
        // Peripherals.
        PasRegion::block(GB, GB, Gpi::Any),
        PasRegion::block(2 * GB, GB, Gpi::NonSecure),
        PasRegion::granule(3 * GB, REALM_DRAM_BASE - 3 * GB, Gpi::NonSecure),
        PasRegion::granule(REALM_DRAM_BASE, 4 * GB - REALM_DRAM_BASE, Gpi::Realm),
    ];

    type LogSinkImpl = LockedWriter<Uart<'static>>;
    type FusesImpl = StaticFuses;
    type LoadPlatformImpl = FvpLoadPlatform;

    fn init() {
        // SAFETY: `PL011_BASE_ADDRESS` is the base address of a PL011 device, and nothing else
        // accesses that address range.
        let uart_pointer =
            unsafe { UniqueMmioPointer::new(NonNull::new(PL011_BASE_ADDRESS).unwrap()) };
        logger::init(LockedWriter::new(Uart::new(uart_pointer)))
            .expect("Failed to initialise logger");
    }

    fn fuses() -> &'static StaticFuses {
        &FUSES
    }

    #[cfg(not(feature = "semihosting"))]
    fn load_platform<'d, const DEVICES: usize, const HANDLES: usize>(
        storage: &mut IoStorage<'d, DEVICES, HANDLES>,
    ) -> Result<FvpLoadPlatform, BootError> {
        let flash = FLASH.call_once(|| {
            // SAFETY: NOR flash 0 is only accessed through this device.
            MemmapDevice::new(unsafe {
                slice::from_raw_parts_mut(V2M_FLASH0_BASE as *mut u8, V2M_FLASH0_SIZE)
            })
        });
        let fip = FIP.call_once(|| {
            FipDevice::new(
                flash,
                IoSpec::Block {
                    offset: 0,
                    length: V2M_FLASH0_SIZE as u64,
                },
            )
        });
        let device = storage.register_device(fip)?;
        Ok(FvpLoadPlatform::new(device))
    }

    #[cfg(feature = "semihosting")]
    fn load_platform<'d, const DEVICES: usize, const HANDLES: usize>(
        storage: &mut IoStorage<'d, DEVICES, HANDLES>,
    ) -> Result<FvpLoadPlatform, BootError> {
        let device = storage.register_device(&HOST)?;
        info!("BL2: loading images from the semihosting host");
        Ok(FvpLoadPlatform::new(device))
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

/// Loads BL31, BL32 and BL33, either from the FIP in NOR flash or from files on the semihosting
/// host, and hands over to BL31.
pub struct FvpLoadPlatform {
    device: DeviceHandle,
    params: SpinMutexGuard<'static, BlParams>,
}

impl FvpLoadPlatform {
    fn new(device: DeviceHandle) -> Self {
        let mut params = BL_PARAMS.lock();
        params.images.clear();
        for (image_id, spsr) in [
            (BL31_IMAGE_ID, SPSR_EL3H),
            (BL32_IMAGE_ID, SPSR_EL2H),
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
        Self { device, params }
    }
}

impl LoadPlatform for FvpLoadPlatform {
    fn setup(&mut self) {}

    #[cfg(not(feature = "semihosting"))]
    fn image_source(&self, image_id: u32) -> Result<(DeviceHandle, IoSpec<'static>), BootError> {
        let uuid = match image_id {
            BL31_IMAGE_ID => BL31_UUID,
            BL32_IMAGE_ID => BL32_UUID,
            BL33_IMAGE_ID => BL33_UUID,
            _ => return Err(IoError::NotFound.into()),
        };
        Ok((self.device, IoSpec::Uuid(uuid)))
    }

    #[cfg(feature = "semihosting")]
    fn image_source(&self, image_id: u32) -> Result<(DeviceHandle, IoSpec<'static>), BootError> {
        let path = match image_id {
            BL31_IMAGE_ID => "bl31.bin",
            BL32_IMAGE_ID => "bl32.bin",
            BL33_IMAGE_ID => "bl33.bin",
            _ => return Err(IoError::NotFound.into()),
        };
        Ok((self.device, IoSpec::Path(path)))
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
        Fvp::error_handler(error)
    }
}
