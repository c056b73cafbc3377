// Copyright The Rusted Firmware-A Contributors.
//
// SPDX-License-Identifier: BSD-3-Clause

//! Memory-mapped storage, such as NOR flash mapped into the physical address space.

use super::{DeviceType, EntityState, IoDevice, IoError, IoSpec, SeekMode};
use spin::mutex::SpinMutex;

struct MemmapState<'m> {
    memory: &'m mut [u8],
    in_use: bool,
}

/// A device backed by a region of memory. Only one entity can be open at a time.
pub struct MemmapDevice<'m> {
    state: SpinMutex<MemmapState<'m>>,
}

impl<'m> MemmapDevice<'m> {
    /// Creates a device for the given memory region.
    pub fn new(memory: &'m mut [u8]) -> Self {
        Self {
            state: SpinMutex::new(MemmapState {
                memory,
                in_use: false,
            }),
        }
    }
}

impl IoDevice for MemmapDevice<'_> {
    fn device_type(&self) -> DeviceType {
        DeviceType::Memmap
    }

    fn open(&self, spec: &IoSpec) -> Result<EntityState, IoError> {
        let &IoSpec::Block { offset, length } = spec else {
            return Err(IoError::InvalidArgs);
        };
        let mut state = self.state.lock();
        if state.in_use {
            return Err(IoError::Busy);
        }
        let end = offset.checked_add(length).ok_or(IoError::InvalidArgs)?;
        if end > state.memory.len() as u64 {
            return Err(IoError::InvalidArgs);
        }
        state.in_use = true;
        Ok(EntityState::new(offset, length))
    }

    fn seek(&self, entity: &mut EntityState, mode: SeekMode, offset: i64) -> Result<(), IoError> {
        entity.seek(mode, offset)
    }

    fn size(&self, entity: &EntityState) -> Result<usize, IoError> {
        usize::try_from(entity.length).map_err(|_| IoError::InvalidArgs)
    }

    fn read(&self, entity: &mut EntityState, buffer: &mut [u8]) -> Result<usize, IoError> {
        let state = self.state.lock();
        let length = entity.transfer_length(buffer.len());
        let start = (entity.base + entity.position) as usize;
        buffer[..length].copy_from_slice(&state.memory[start..start + length]);
        entity.position += length as u64;
        Ok(length)
    }

    fn write(&self, entity: &mut EntityState, buffer: &[u8]) -> Result<usize, IoError> {
        let mut state = self.state.lock();
        let length = entity.transfer_length(buffer.len());
        let start = (entity.base + entity.position) as usize;
        state.memory[start..start + length].copy_from_slice(&buffer[..length]);
        entity.position += length as u64;
        Ok(length)
    }

    fn close(&self, _entity: &mut EntityState) -> Result<(), IoError> {
        self.state.lock().in_use = false;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::IoStorage;

    #[test]
    fn read_write_seek() {
        let mut flash: Vec<u8> = (0..=255).collect();
        let device = MemmapDevice::new(&mut flash);
        let mut storage = IoStorage::<1, 2>::new();
        let handle = storage.register_device(&device).unwrap();

        let entity = storage
            .open(
                handle,
                &IoSpec::Block {
                    offset: 0x10,
                    length: 0x20,
                },
            )
            .unwrap();
        assert_eq!(storage.size(&entity), Ok(0x20));

        let mut buffer = [0; 4];
        assert_eq!(storage.read(&entity, &mut buffer), Ok(4));
        assert_eq!(buffer, [0x10, 0x11, 0x12, 0x13]);

        storage.seek(&entity, SeekMode::End, -2).unwrap();
        assert_eq!(storage.read(&entity, &mut buffer), Ok(2));
        assert_eq!(buffer[..2], [0x2e, 0x2f]);
        assert_eq!(storage.read(&entity, &mut buffer), Ok(0));

        storage.seek(&entity, SeekMode::Set, 1).unwrap();
        assert_eq!(storage.write(&entity, &[0xaa, 0xbb]), Ok(2));
        storage.seek(&entity, SeekMode::Cur, -3).unwrap();
        assert_eq!(storage.read(&entity, &mut buffer), Ok(4));
        assert_eq!(buffer, [0x10, 0xaa, 0xbb, 0x13]);
        assert_eq!(
            storage.seek(&entity, SeekMode::Set, 0x21),
            Err(IoError::InvalidArgs)
        );

        storage.close(entity).unwrap();
        drop(storage);
        assert_eq!(flash[0x11..0x13], [0xaa, 0xbb]);
    }

    #[test]
    fn exclusive_and_bounded() {
        let mut flash = [0u8; 0x100];
        let device = MemmapDevice::new(&mut flash);
        let mut storage = IoStorage::<1, 2>::new();
        let handle = storage.register_device(&device).unwrap();

        assert_eq!(
            storage.open(
                handle,
                &IoSpec::Block {
                    offset: 0xf0,
                    length: 0x20
                }
            ),
            Err(IoError::InvalidArgs)
        );
        assert_eq!(
            storage.open(
                handle,
                &IoSpec::Block {
                    offset: u64::MAX,
                    length: 2
                }
            ),
            Err(IoError::InvalidArgs)
        );
        assert_eq!(
            storage.open(handle, &IoSpec::Path("bl2.bin")),
            Err(IoError::InvalidArgs)
        );

        let spec = IoSpec::Block {
            offset: 0,
            length: 0x100,
        };
        let entity = storage.open(handle, &spec).unwrap();
        assert_eq!(storage.open(handle, &spec), Err(IoError::Busy));
        storage.close(entity).unwrap();
        storage.open(handle, &spec).unwrap();
    }
}
