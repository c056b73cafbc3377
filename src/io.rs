// Copyright The Rusted Firmware-A Contributors.
//
// SPDX-License-Identifier: BSD-3-Clause

//! Handle based access to the storage devices that images are loaded from.
//!
//! Devices are registered with an [`IoStorage`], which then hands out [`EntityHandle`]s for open
//! files from a fixed-size pool. Nothing here allocates.

pub mod block;
pub mod fip;
pub mod memmap;
pub mod semihosting;

use crate::error::ErrorKind;
use arrayvec::ArrayVec;
use log::{debug, warn};
use thiserror::Error;
use uuid::Uuid;

/// An error from an IO device or from the handle pool.
#[derive(Clone, Copy, Debug, Eq, Error, PartialEq)]
pub enum IoError {
    /// The requested file or entry doesn't exist.
    #[error("not found")]
    NotFound,
    /// The device table or handle pool is full.
    #[error("resources exhausted")]
    ResourcesExhausted,
    /// The device has already been registered.
    #[error("device already registered")]
    AlreadyRegistered,
    /// The device doesn't implement the operation.
    #[error("operation not supported")]
    NotSupported,
    /// An argument was out of range for the device or entity.
    #[error("invalid arguments")]
    InvalidArgs,
    /// The device only supports one open entity at a time, and one is already open.
    #[error("device busy")]
    Busy,
    /// The data on the device is not in the expected format.
    #[error("bad image format")]
    BadFormat,
    /// The device didn't become ready in time.
    #[error("device timed out")]
    Timeout,
    /// The device reported an error.
    #[error("device error")]
    DeviceFault,
}

impl IoError {
    /// Returns the class of the error.
    pub fn kind(self) -> ErrorKind {
        match self {
            Self::ResourcesExhausted => ErrorKind::ResourceExhausted,
            Self::Timeout | Self::DeviceFault => ErrorKind::HardwareTimeout,
            Self::NotFound
            | Self::AlreadyRegistered
            | Self::NotSupported
            | Self::InvalidArgs
            | Self::Busy
            | Self::BadFormat => ErrorKind::MalformedInput,
        }
    }
}

/// The kind of backing store a device provides.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum DeviceType {
    /// Memory-mapped storage such as NOR flash.
    Memmap,
    /// A raw block device.
    Block,
    /// A Firmware Image Package on another device.
    Fip,
    /// Files on a debug host.
    Semihosting,
}

/// Identifies what to open on a device.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum IoSpec<'a> {
    /// A byte range of a memory-mapped or block device.
    Block {
        /// Offset of the range from the start of the device.
        offset: u64,
        /// Length of the range in bytes.
        length: u64,
    },
    /// An entry in a Firmware Image Package.
    Uuid(Uuid),
    /// A file on the debug host.
    Path(&'a str),
}

/// Where a seek offset is measured from.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum SeekMode {
    /// From the start of the entity.
    Set,
    /// From the current position.
    Cur,
    /// From the end of the entity.
    End,
}

/// Device specific state of an open entity.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct EntityState {
    /// Offset of the start of the entity on its device.
    pub base: u64,
    /// Length of the entity in bytes.
    pub length: u64,
    /// Current position relative to `base`.
    pub position: u64,
    /// A device specific value, e.g. a host file handle.
    pub token: usize,
}

impl EntityState {
    /// Returns the state of a newly opened entity covering `length` bytes from `base`.
    pub const fn new(base: u64, length: u64) -> Self {
        Self {
            base,
            length,
            position: 0,
            token: 0,
        }
    }

    /// Moves the position, which must stay within `0..=length`.
    pub fn seek(&mut self, mode: SeekMode, offset: i64) -> Result<(), IoError> {
        let origin = match mode {
            SeekMode::Set => 0,
            SeekMode::Cur => self.position,
            SeekMode::End => self.length,
        };
        let position = origin
            .checked_add_signed(offset)
            .filter(|&position| position <= self.length)
            .ok_or(IoError::InvalidArgs)?;
        self.position = position;
        Ok(())
    }

    /// Returns how many bytes are left before the end of the entity.
    pub fn remaining(&self) -> u64 {
        self.length - self.position
    }

    /// Returns how many bytes a transfer of `requested` bytes can move from the current position.
    pub fn transfer_length(&self, requested: usize) -> usize {
        usize::try_from(self.remaining()).map_or(requested, |remaining| remaining.min(requested))
    }
}

/// A storage device.
///
/// Devices use interior mutability for any state shared between their entities, so that a single
/// device can be registered once and used through shared references.
pub trait IoDevice {
    /// Returns what kind of device this is.
    fn device_type(&self) -> DeviceType;

    /// Opens the entity described by `spec`.
    fn open(&self, spec: &IoSpec) -> Result<EntityState, IoError>;

    /// Moves the position of the given entity.
    fn seek(&self, _entity: &mut EntityState, _mode: SeekMode, _offset: i64) -> Result<(), IoError> {
        Err(IoError::NotSupported)
    }

    /// Returns the size of the given entity in bytes.
    fn size(&self, _entity: &EntityState) -> Result<usize, IoError> {
        Err(IoError::NotSupported)
    }

    /// Reads from the current position into `buffer`, returning the number of bytes read.
    fn read(&self, entity: &mut EntityState, buffer: &mut [u8]) -> Result<usize, IoError>;

    /// Writes `buffer` at the current position, returning the number of bytes written.
    fn write(&self, _entity: &mut EntityState, _buffer: &[u8]) -> Result<usize, IoError> {
        Err(IoError::NotSupported)
    }

    /// Releases any device resources held by the entity.
    fn close(&self, _entity: &mut EntityState) -> Result<(), IoError> {
        Ok(())
    }
}

/// Identifies a device registered with an [`IoStorage`].
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct DeviceHandle(usize);

/// An open entity. This must be passed to [`IoStorage::close`] to free its slot.
#[derive(Debug, Eq, PartialEq)]
pub struct EntityHandle {
    slot: usize,
}

#[derive(Clone, Copy, Debug)]
struct Entity {
    device: usize,
    state: EntityState,
}

/// A registry of up to `DEVICES` devices, with a pool of up to `HANDLES` open entities.
pub struct IoStorage<'a, const DEVICES: usize, const HANDLES: usize> {
    devices: ArrayVec<&'a dyn IoDevice, DEVICES>,
    entities: [Option<Entity>; HANDLES],
    /// Bit `n` is set if slot `n` of `entities` is free.
    free: u32,
}

impl<'a, const DEVICES: usize, const HANDLES: usize> Default for IoStorage<'a, DEVICES, HANDLES> {
    fn default() -> Self {
        Self::new()
    }
}

impl<'a, const DEVICES: usize, const HANDLES: usize> IoStorage<'a, DEVICES, HANDLES> {
    /// Creates an empty registry with every pool slot free.
    pub const fn new() -> Self {
        const { assert!(HANDLES > 0 && HANDLES <= u32::BITS as usize) };
        Self {
            devices: ArrayVec::new_const(),
            entities: [None; HANDLES],
            free: u32::MAX >> (u32::BITS as usize - HANDLES),
        }
    }

    /// Adds a device to the registry.
    pub fn register_device(&mut self, device: &'a dyn IoDevice) -> Result<DeviceHandle, IoError> {
        if self
            .devices
            .iter()
            .any(|registered| core::ptr::addr_eq(*registered, device))
        {
            return Err(IoError::AlreadyRegistered);
        }
        self.devices
            .try_push(device)
            .map_err(|_| IoError::ResourcesExhausted)?;
        debug!(
            "IO: registered {:?} device {}",
            device.device_type(),
            self.devices.len() - 1
        );
        Ok(DeviceHandle(self.devices.len() - 1))
    }

    /// Opens an entity on the given device.
    pub fn open(&mut self, device: DeviceHandle, spec: &IoSpec) -> Result<EntityHandle, IoError> {
        let dev = *self.devices.get(device.0).ok_or(IoError::InvalidArgs)?;
        if self.free == 0 {
            warn!("IO: no free entity slots");
            return Err(IoError::ResourcesExhausted);
        }
        let slot = self.free.trailing_zeros() as usize;

        let state = dev.open(spec)?;
        self.entities[slot] = Some(Entity {
            device: device.0,
            state,
        });
        self.free &= !(1 << slot);
        Ok(EntityHandle { slot })
    }

    fn entity(&mut self, handle: &EntityHandle) -> Result<(&'a dyn IoDevice, &mut EntityState), IoError> {
        let entity = self.entities[handle.slot]
            .as_mut()
            .ok_or(IoError::InvalidArgs)?;
        Ok((self.devices[entity.device], &mut entity.state))
    }

    /// Moves the position of an open entity.
    pub fn seek(&mut self, handle: &EntityHandle, mode: SeekMode, offset: i64) -> Result<(), IoError> {
        let (device, state) = self.entity(handle)?;
        device.seek(state, mode, offset)
    }

    /// Returns the size of an open entity.
    pub fn size(&mut self, handle: &EntityHandle) -> Result<usize, IoError> {
        let (device, state) = self.entity(handle)?;
        device.size(state)
    }

    /// Reads from an open entity into `buffer`, returning the number of bytes read.
    pub fn read(&mut self, handle: &EntityHandle, buffer: &mut [u8]) -> Result<usize, IoError> {
        let (device, state) = self.entity(handle)?;
        device.read(state, buffer)
    }

    /// Writes `buffer` to an open entity, returning the number of bytes written.
    pub fn write(&mut self, handle: &EntityHandle, buffer: &[u8]) -> Result<usize, IoError> {
        let (device, state) = self.entity(handle)?;
        device.write(state, buffer)
    }

    /// Closes an entity. Its pool slot is freed even if the device reports an error.
    pub fn close(&mut self, handle: EntityHandle) -> Result<(), IoError> {
        let result = match self.entities[handle.slot].take() {
            Some(mut entity) => self.devices[entity.device].close(&mut entity.state),
            None => Err(IoError::InvalidArgs),
        };
        self.free |= 1 << handle.slot;
        result
    }

    /// Returns the number of open entities.
    pub fn open_count(&self) -> usize {
        HANDLES - self.free.count_ones() as usize
    }
}
