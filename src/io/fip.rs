// Copyright The Rusted Firmware-A Contributors.
//
// SPDX-License-Identifier: BSD-3-Clause

//! Firmware Image Package reader.
//!
//! A FIP starts with a table of contents: a 16 byte header followed by 40 byte entries, each
//! giving the UUID, offset and size of one image, terminated by an entry with the nil UUID.

use super::{DeviceType, EntityState, IoDevice, IoError, IoSpec, SeekMode};
use log::{debug, error};
use spin::mutex::SpinMutex;
use uuid::Uuid;
use zerocopy::{FromBytes, Immutable, KnownLayout, little_endian::U32, little_endian::U64};

/// Value of the `name` field of the ToC header.
pub const TOC_HEADER_NAME: u32 = 0xaa64_0001;

/// BL31, the EL3 runtime firmware.
pub const BL31_UUID: Uuid = Uuid::from_bytes([
    0x47, 0xd4, 0x08, 0x6d, 0x4c, 0xfe, 0x98, 0x46, 0x9b, 0x95, 0x29, 0x50, 0xcb, 0xbd, 0x5a, 0x00,
]);
/// BL32, the secure payload.
pub const BL32_UUID: Uuid = Uuid::from_bytes([
    0x05, 0xd0, 0xe1, 0x89, 0x53, 0xdc, 0x13, 0x47, 0x8d, 0x2b, 0x50, 0x0a, 0x4b, 0x7a, 0x3e, 0x38,
]);
/// BL33, the non-trusted firmware.
pub const BL33_UUID: Uuid = Uuid::from_bytes([
    0xd6, 0xd0, 0xee, 0xa7, 0xfc, 0xea, 0xd5, 0x4b, 0x97, 0x82, 0x99, 0x34, 0xf2, 0x34, 0xb6, 0xe4,
]);
/// The trusted key certificate.
pub const TRUSTED_KEY_CERT_UUID: Uuid = Uuid::from_bytes([
    0x82, 0x7e, 0xe8, 0x90, 0xf8, 0x60, 0xe4, 0x11, 0xa1, 0xb4, 0x77, 0x7a, 0x21, 0xb4, 0xf9, 0x4c,
]);

#[derive(Clone, Copy, Debug, FromBytes, Immutable, KnownLayout)]
#[repr(C)]
struct TocHeader {
    name: U32,
    serial_number: U32,
    flags: U64,
}

#[derive(Clone, Copy, Debug, FromBytes, Immutable, KnownLayout)]
#[repr(C)]
struct TocEntry {
    uuid: [u8; 16],
    offset_address: U64,
    size: U64,
    flags: U64,
}

/// The backing entity of the currently open image.
struct OpenFile {
    backing: EntityState,
}

/// Reads images out of a FIP stored on another device.
///
/// Only one image can be open at a time.
pub struct FipDevice<'d, D: IoDevice + ?Sized> {
    backing: &'d D,
    backing_spec: IoSpec<'d>,
    current: SpinMutex<Option<OpenFile>>,
}

impl<'d, D: IoDevice + ?Sized> FipDevice<'d, D> {
    /// Creates a FIP reader for the package found at `backing_spec` on `backing`.
    pub const fn new(backing: &'d D, backing_spec: IoSpec<'d>) -> Self {
        Self {
            backing,
            backing_spec,
            current: SpinMutex::new(None),
        }
    }

    fn read_exact(&self, entity: &mut EntityState, buffer: &mut [u8]) -> Result<(), IoError> {
        let mut done = 0;
        while done < buffer.len() {
            match self.backing.read(entity, &mut buffer[done..])? {
                0 => return Err(IoError::BadFormat),
                read => done += read,
            }
        }
        Ok(())
    }

    /// Scans the table of contents for `uuid`, returning its offset and size within the package.
    fn find_entry(&self, backing: &mut EntityState, uuid: &Uuid) -> Result<(u64, u64), IoError> {
        let mut header = [0; size_of::<TocHeader>()];
        self.read_exact(backing, &mut header)?;
        let header = TocHeader::read_from_bytes(&header).map_err(|_| IoError::BadFormat)?;
        if header.name.get() != TOC_HEADER_NAME {
            error!("FIP: bad ToC header name {:#x}", header.name.get());
            return Err(IoError::BadFormat);
        }

        loop {
            let mut entry = [0; size_of::<TocEntry>()];
            self.read_exact(backing, &mut entry)?;
            let entry = TocEntry::read_from_bytes(&entry).map_err(|_| IoError::BadFormat)?;
            let entry_uuid = Uuid::from_bytes(entry.uuid);
            if entry_uuid.is_nil() {
                return Err(IoError::NotFound);
            }
            if entry_uuid == *uuid {
                let offset = entry.offset_address.get();
                let size = entry.size.get();
                match offset.checked_add(size) {
                    Some(end) if end <= backing.length => return Ok((offset, size)),
                    _ => {
                        error!("FIP: entry {uuid} at {offset:#x}+{size:#x} is out of bounds");
                        return Err(IoError::BadFormat);
                    }
                }
            }
        }
    }
}

impl<D: IoDevice + ?Sized> IoDevice for FipDevice<'_, D> {
    fn device_type(&self) -> DeviceType {
        DeviceType::Fip
    }

    fn open(&self, spec: &IoSpec) -> Result<EntityState, IoError> {
        let IoSpec::Uuid(uuid) = spec else {
            return Err(IoError::InvalidArgs);
        };
        let mut current = self.current.lock();
        if current.is_some() {
            return Err(IoError::Busy);
        }

        let mut backing = self.backing.open(&self.backing_spec)?;
        match self.find_entry(&mut backing, uuid) {
            Ok((offset, size)) => {
                debug!("FIP: found {uuid} at {offset:#x}, {size:#x} bytes");
                *current = Some(OpenFile { backing });
                Ok(EntityState::new(offset, size))
            }
            Err(e) => {
                // The lookup already failed, so a close error adds nothing.
                let _ = self.backing.close(&mut backing);
                Err(e)
            }
        }
    }

    fn seek(&self, entity: &mut EntityState, mode: SeekMode, offset: i64) -> Result<(), IoError> {
        entity.seek(mode, offset)
    }

    fn size(&self, entity: &EntityState) -> Result<usize, IoError> {
        usize::try_from(entity.length).map_err(|_| IoError::InvalidArgs)
    }

    fn read(&self, entity: &mut EntityState, buffer: &mut [u8]) -> Result<usize, IoError> {
        let mut current = self.current.lock();
        let file = current.as_mut().ok_or(IoError::InvalidArgs)?;
        let length = entity.transfer_length(buffer.len());
        let position = entity.base + entity.position;
        self.backing.seek(
            &mut file.backing,
            SeekMode::Set,
            i64::try_from(position).map_err(|_| IoError::InvalidArgs)?,
        )?;
        let mut done = 0;
        while done < length {
            match self.backing.read(&mut file.backing, &mut buffer[done..length])? {
                0 => break,
                read => done += read,
            }
        }
        entity.position += done as u64;
        Ok(done)
    }

    fn close(&self, _entity: &mut EntityState) -> Result<(), IoError> {
        match self.current.lock().take() {
            Some(mut file) => self.backing.close(&mut file.backing),
            None => Err(IoError::InvalidArgs),
        }
    }
}
