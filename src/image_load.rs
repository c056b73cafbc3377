// Copyright The Rusted Firmware-A Contributors.
//
// SPDX-License-Identifier: BSD-3-Clause

//! Loads and authenticates the images listed by the platform, then returns the entry point of the
//! next stage.
//!
//! Any error stops the boot: the platform error handler is called and never returns, so the caller
//! only ever sees an entry point once every image has been loaded and accepted.

use crate::{
    auth::{Authenticator, SignatureAlgorithm},
    error::{BootError, ErrorKind},
    io::{DeviceHandle, EntityHandle, IoError, IoSpec, IoStorage},
};
use arrayvec::ArrayVec;
use bitflags::bitflags;
use core::ops::Range;
use log::{error, info, warn};
use thiserror::Error;

/// Image ID of BL31, the EL3 runtime firmware.
pub const BL31_IMAGE_ID: u32 = 3;
/// Image ID of BL32, the secure payload.
pub const BL32_IMAGE_ID: u32 = 4;
/// Image ID of BL33, the non-trusted firmware.
pub const BL33_IMAGE_ID: u32 = 5;
/// Image ID of the trusted key certificate.
pub const TRUSTED_KEY_CERT_ID: u32 = 7;

/// Version of the descriptor list and parameter block layouts understood by this loader.
pub const PARAM_VERSION_2: u8 = 2;

/// Maximum number of images a platform can ask to load.
pub const MAX_LOAD_IMAGES: usize = 8;

/// Maximum number of images in the parameter block passed to the next stage.
pub const MAX_NEXT_IMAGES: usize = 4;

bitflags! {
    /// Attributes of an image descriptor.
    #[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
    pub struct ImageAttributes: u32 {
        /// The image was put in place by an earlier stage, so only the hooks run.
        const SKIP_LOADING = 1 << 0;
        /// Platform setup must have run before this image is loaded.
        const PLAT_SETUP_REQUIRED = 1 << 1;
        /// The image will be executed.
        const EXECUTABLE = 1 << 2;
    }
}

/// An error found by the loader itself rather than by the IO or authentication layers.
#[derive(Clone, Copy, Debug, Eq, Error, PartialEq)]
pub enum LoadError {
    /// The descriptor list or parameter block has a version older than [`PARAM_VERSION_2`].
    #[error("unsupported descriptor version {0}")]
    UnsupportedVersion(u8),
    /// A descriptor links to an image ID which isn't in the list.
    #[error("image {0} is not in the descriptor list")]
    UnknownImage(u32),
    /// Following the links visits more descriptors than the list holds.
    #[error("descriptor list contains a loop")]
    CyclicList,
    /// The image on the device is empty.
    #[error("image {image_id} is empty")]
    EmptyImage {
        /// The image.
        image_id: u32,
    },
    /// The image doesn't fit in its destination.
    #[error("image {image_id} is {size:#x} bytes, more than the maximum {max:#x}")]
    TooLarge {
        /// The image.
        image_id: u32,
        /// Size of the image on the device, or a lower bound if the device can't report it.
        size: usize,
        /// Size of the destination.
        max: usize,
    },
    /// The device returned fewer bytes than the image size.
    #[error("short read of image {image_id}")]
    ShortRead {
        /// The image.
        image_id: u32,
    },
    /// The image was signed with a weaker algorithm than the policy allows.
    #[error("image {image_id} signed with {algorithm:?}")]
    WeakAlgorithm {
        /// The image.
        image_id: u32,
        /// The algorithm it was signed with.
        algorithm: SignatureAlgorithm,
    },
    /// The platform has no parameters for the next stage.
    #[error("no entry point for the next image")]
    NoNextParams,
}

impl LoadError {
    /// Returns the class of the error.
    pub fn kind(self) -> ErrorKind {
        match self {
            Self::WeakAlgorithm { .. } => ErrorKind::TrustViolation,
            Self::UnsupportedVersion(_)
            | Self::UnknownImage(_)
            | Self::CyclicList
            | Self::EmptyImage { .. }
            | Self::TooLarge { .. }
            | Self::ShortRead { .. }
            | Self::NoNextParams => ErrorKind::MalformedInput,
        }
    }
}

/// One image to load.
#[derive(Debug)]
pub struct ImageDescriptor<'m> {
    /// Unique ID of the image within this stage.
    pub image_id: u32,
    /// How to treat the image.
    pub attributes: ImageAttributes,
    /// Memory the image is loaded into. Its length is the maximum image size.
    pub destination: &'m mut [u8],
    /// Size of the loaded image, set by the loader.
    pub image_size: usize,
    /// Where the authenticated payload lies within `destination`, set by the loader.
    pub payload: Option<Range<usize>>,
    /// The image to load after this one, if any.
    pub next_load_id: Option<u32>,
}

impl<'m> ImageDescriptor<'m> {
    /// Creates a descriptor for an image not yet loaded.
    pub fn new(
        image_id: u32,
        attributes: ImageAttributes,
        destination: &'m mut [u8],
        next_load_id: Option<u32>,
    ) -> Self {
        Self {
            image_id,
            attributes,
            destination,
            image_size: 0,
            payload: None,
            next_load_id,
        }
    }
}

/// The platform's list of images to load, in the order given by the `next_load_id` links starting
/// from `head`.
#[derive(Debug)]
pub struct LoadList<'m> {
    /// Layout version, at least [`PARAM_VERSION_2`].
    pub version: u8,
    /// ID of the first image to load.
    pub head: u32,
    /// The descriptors.
    pub descriptors: ArrayVec<ImageDescriptor<'m>, MAX_LOAD_IMAGES>,
}

/// Where and how to enter an image.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct EntryPointInfo {
    /// The entry point address.
    pub pc: u64,
    /// The SPSR value to enter with.
    pub spsr: u64,
    /// Boot arguments to pass in `x0`-`x7`.
    pub args: [u64; 8],
}

/// An image that the next stage will run.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct NextImage {
    /// The image.
    pub image_id: u32,
    /// How to enter it.
    pub ep_info: EntryPointInfo,
}

/// Parameters passed to the next stage. The first entry is the image to run next.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct BlParams {
    /// Layout version, at least [`PARAM_VERSION_2`].
    pub version: u8,
    /// The images, in handoff order.
    pub images: ArrayVec<NextImage, MAX_NEXT_IMAGES>,
}

/// Platform hooks called by the loader.
pub trait LoadPlatform {
    /// Does the platform setup required by images with [`ImageAttributes::PLAT_SETUP_REQUIRED`].
    /// This is called at most once.
    fn setup(&mut self);

    /// Returns the device and spec from which to load the given image.
    fn image_source(&self, image_id: u32) -> Result<(DeviceHandle, IoSpec<'static>), BootError>;

    /// Called before each image is loaded, even if loading is skipped.
    fn pre_load(&mut self, _image: &ImageDescriptor) -> Result<(), BootError> {
        Ok(())
    }

    /// Called after each image has been loaded and authenticated, or after its loading was
    /// skipped.
    fn post_load(&mut self, _image: &ImageDescriptor) -> Result<(), BootError> {
        Ok(())
    }

    /// Returns the parameters to pass to the next stage.
    fn next_bl_params(&mut self) -> Option<&mut BlParams>;

    /// Writes the next stage parameters back to memory, ready for the handoff.
    fn flush_next_bl_params(&self) {}

    /// Handles a fatal boot error, e.g. by resetting the system.
    fn error_handler(&self, error: BootError) -> !;
}

/// Drives loading of the images described by a [`LoadList`].
pub struct ImageLoader<'s, 'd, P: LoadPlatform, A: Authenticator, const D: usize, const H: usize> {
    storage: &'s mut IoStorage<'d, D, H>,
    platform: P,
    authenticator: A,
    setup_done: bool,
}

impl<'s, 'd, P: LoadPlatform, A: Authenticator, const D: usize, const H: usize>
    ImageLoader<'s, 'd, P, A, D, H>
{
    /// Creates a loader reading from `storage`.
    pub fn new(storage: &'s mut IoStorage<'d, D, H>, platform: P, authenticator: A) -> Self {
        Self {
            storage,
            platform,
            authenticator,
            setup_done: false,
        }
    }

    /// Returns the platform hooks.
    pub fn platform(&self) -> &P {
        &self.platform
    }

    /// Loads and authenticates every image in `list`, in order, and returns the entry point of the
    /// next image to run.
    ///
    /// This only returns once every image has been accepted. On any error the platform error
    /// handler is called.
    pub fn load_images(&mut self, list: &mut LoadList) -> EntryPointInfo {
        match self.try_load_images(list) {
            Ok(ep_info) => ep_info,
            Err(e) => self.platform.error_handler(e),
        }
    }

    fn try_load_images(&mut self, list: &mut LoadList) -> Result<EntryPointInfo, BootError> {
        if list.version < PARAM_VERSION_2 {
            error!("BL2: descriptor list version {} not supported", list.version);
            return Err(LoadError::UnsupportedVersion(list.version).into());
        }

        let mut next = Some(list.head);
        let mut visited = 0;
        let descriptor_count = list.descriptors.len();
        while let Some(image_id) = next {
            let image = list
                .descriptors
                .iter_mut()
                .find(|image| image.image_id == image_id)
                .ok_or(LoadError::UnknownImage(image_id))?;
            if visited == descriptor_count {
                error!("BL2: descriptor list contains a loop");
                return Err(LoadError::CyclicList.into());
            }
            visited += 1;

            if let Err(e) = self.load_next(image) {
                error!("BL2: failed to load image id {image_id}: {e}");
                return Err(e);
            }
            next = image.next_load_id;
        }

        self.next_entry_point()
    }

    /// Runs the hooks for one image, and loads it unless loading is skipped.
    fn load_next(&mut self, image: &mut ImageDescriptor) -> Result<(), BootError> {
        if image.attributes.contains(ImageAttributes::PLAT_SETUP_REQUIRED) {
            if self.setup_done {
                warn!("BL2: platform setup already done");
            } else {
                info!("BL2: doing platform setup");
                self.platform.setup();
                self.setup_done = true;
            }
        }

        self.platform.pre_load(image)?;
        if !image.attributes.contains(ImageAttributes::SKIP_LOADING) {
            info!("BL2: loading image id {}", image.image_id);
            self.load_auth_image(image)?;
        }
        self.platform.post_load(image)
    }

    fn load_auth_image(&mut self, image: &mut ImageDescriptor) -> Result<(), BootError> {
        let (device, spec) = self.platform.image_source(image.image_id)?;
        let entity = self.storage.open(device, &spec)?;
        let read = self.read_image(&entity, image);
        let closed = self.storage.close(entity);
        let size = read?;
        closed?;
        image.image_size = size;

        let loaded = &image.destination[..size];
        let verified = self.authenticator.authenticate(loaded)?;
        let minimum = self.authenticator.policy().minimum_algorithm;
        if verified.algorithm < minimum {
            error!(
                "BL2: image id {} signed with {:?}, {minimum:?} required",
                image.image_id, verified.algorithm
            );
            return Err(LoadError::WeakAlgorithm {
                image_id: image.image_id,
                algorithm: verified.algorithm,
            }
            .into());
        }
        let offset = verified.payload.as_ptr() as usize - loaded.as_ptr() as usize;
        image.payload = Some(offset..offset + verified.payload.len());

        crate::aarch64::clean_dcache_range(loaded.as_ptr() as usize, size);
        info!(
            "BL2: image id {} loaded at {:#x}, {size:#x} bytes",
            image.image_id,
            loaded.as_ptr() as usize
        );
        Ok(())
    }

    /// Reads the whole of an open entity into the image's destination, returning its size.
    ///
    /// If the device can't report the size, the entity is read until the device returns no more
    /// data, which must happen within the destination.
    fn read_image(
        &mut self,
        entity: &EntityHandle,
        image: &mut ImageDescriptor,
    ) -> Result<usize, BootError> {
        let image_id = image.image_id;
        let max = image.destination.len();
        let (size, exact) = match self.storage.size(entity) {
            Ok(size) => (size, true),
            Err(IoError::NotSupported) => (max, false),
            Err(e) => return Err(e.into()),
        };
        if size == 0 {
            return Err(LoadError::EmptyImage { image_id }.into());
        }
        if size > max {
            return Err(LoadError::TooLarge { image_id, size, max }.into());
        }

        let buffer = &mut image.destination[..size];
        let mut done = 0;
        let mut at_end = false;
        while done < size {
            match self.storage.read(entity, &mut buffer[done..])? {
                0 => {
                    at_end = true;
                    break;
                }
                read => done += read,
            }
        }
        if done == 0 || (exact && done != size) {
            return Err(LoadError::ShortRead { image_id }.into());
        }
        if !exact && !at_end {
            // The destination is full, so the image must end here for it to fit.
            let mut extra = [0; 1];
            let read = self.storage.read(entity, &mut extra)?;
            if read != 0 {
                return Err(LoadError::TooLarge {
                    image_id,
                    size: max + read,
                    max,
                }
                .into());
            }
        }
        Ok(done)
    }

    /// Finds the entry point of the next image, filling in the default first argument.
    fn next_entry_point(&mut self) -> Result<EntryPointInfo, BootError> {
        let params = self
            .platform
            .next_bl_params()
            .ok_or(LoadError::NoNextParams)?;
        if params.version < PARAM_VERSION_2 {
            return Err(LoadError::UnsupportedVersion(params.version).into());
        }
        let address = &*params as *const BlParams as u64;
        let head = params.images.first_mut().ok_or(LoadError::NoNextParams)?;
        // The next stage expects the parameter block in x0 unless told otherwise.
        if head.ep_info.args[0] == 0 {
            head.ep_info.args[0] = address;
        }
        let ep_info = head.ep_info.clone();

        self.platform.flush_next_bl_params();
        Ok(ep_info)
    }
}
