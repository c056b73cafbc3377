// Copyright The Rusted Firmware-A Contributors.
//
// SPDX-License-Identifier: BSD-3-Clause

//! Raw block devices such as eMMC or SD cards.

use super::{DeviceType, EntityState, IoDevice, IoError, IoSpec, SeekMode};
use log::error;
use spin::mutex::SpinMutex;

/// Block level access to a device, implemented by the driver for the underlying controller.
pub trait BlockOps {
    /// Reads whole blocks starting at `lba` into `buffer`, whose length is a multiple of the block
    /// size. Returns the number of bytes read.
    fn read_blocks(&self, lba: u64, buffer: &mut [u8]) -> Result<usize, IoError>;

    /// Writes whole blocks starting at `lba` from `buffer`, whose length is a multiple of the block
    /// size. Returns the number of bytes written.
    fn write_blocks(&self, _lba: u64, _buffer: &[u8]) -> Result<usize, IoError> {
        Err(IoError::NotSupported)
    }
}

struct BlockState<const BLOCK_SIZE: usize> {
    in_use: bool,
    bounce: [u8; BLOCK_SIZE],
}

/// A byte addressed view of a block device with `BLOCK_SIZE` byte blocks.
///
/// Transfers which don't start or end on a block boundary go through a one block bounce buffer.
/// Only one entity can be open at a time.
pub struct BlockDevice<O: BlockOps, const BLOCK_SIZE: usize> {
    ops: O,
    state: SpinMutex<BlockState<BLOCK_SIZE>>,
}

impl<O: BlockOps, const BLOCK_SIZE: usize> BlockDevice<O, BLOCK_SIZE> {
    /// Creates a new block device using the given driver.
    pub const fn new(ops: O) -> Self {
        const { assert!(BLOCK_SIZE.is_power_of_two()) };
        Self {
            ops,
            state: SpinMutex::new(BlockState {
                in_use: false,
                bounce: [0; BLOCK_SIZE],
            }),
        }
    }

    fn read_block(&self, lba: u64, block: &mut [u8; BLOCK_SIZE]) -> Result<(), IoError> {
        let read = self.ops.read_blocks(lba, block)?;
        if read != BLOCK_SIZE {
            error!("Block: short read of LBA {lba:#x}");
            return Err(IoError::DeviceFault);
        }
        Ok(())
    }
}

/// Splits a device offset into a block address and an offset within the block.
fn split_offset<const BLOCK_SIZE: usize>(offset: u64) -> (u64, usize) {
    (
        offset / BLOCK_SIZE as u64,
        (offset % BLOCK_SIZE as u64) as usize,
    )
}

impl<O: BlockOps, const BLOCK_SIZE: usize> IoDevice for BlockDevice<O, BLOCK_SIZE> {
    fn device_type(&self) -> DeviceType {
        DeviceType::Block
    }

    fn open(&self, spec: &IoSpec) -> Result<EntityState, IoError> {
        let &IoSpec::Block { offset, length } = spec else {
            return Err(IoError::InvalidArgs);
        };
        offset.checked_add(length).ok_or(IoError::InvalidArgs)?;
        let mut state = self.state.lock();
        if state.in_use {
            return Err(IoError::Busy);
        }
        state.in_use = true;
        Ok(EntityState::new(offset, length))
    }

    fn seek(&self, entity: &mut EntityState, mode: SeekMode, offset: i64) -> Result<(), IoError> {
        match mode {
            SeekMode::Set | SeekMode::Cur => entity.seek(mode, offset),
            SeekMode::End => Err(IoError::InvalidArgs),
        }
    }

    fn read(&self, entity: &mut EntityState, buffer: &mut [u8]) -> Result<usize, IoError> {
        let mut state = self.state.lock();
        let length = entity.transfer_length(buffer.len());
        let mut done = 0;

        while done < length {
            let (lba, skip) = split_offset::<BLOCK_SIZE>(entity.base + entity.position);
            let rest = length - done;
            let chunk = if skip == 0 && rest >= BLOCK_SIZE {
                let chunk = rest - rest % BLOCK_SIZE;
                if self.ops.read_blocks(lba, &mut buffer[done..done + chunk])? != chunk {
                    error!("Block: short read of {chunk:#x} bytes at LBA {lba:#x}");
                    return Err(IoError::DeviceFault);
                }
                chunk
            } else {
                self.read_block(lba, &mut state.bounce)?;
                let chunk = rest.min(BLOCK_SIZE - skip);
                buffer[done..done + chunk].copy_from_slice(&state.bounce[skip..skip + chunk]);
                chunk
            };
            done += chunk;
            entity.position += chunk as u64;
        }
        Ok(done)
    }

    fn write(&self, entity: &mut EntityState, buffer: &[u8]) -> Result<usize, IoError> {
        let mut state = self.state.lock();
        let length = entity.transfer_length(buffer.len());
        let mut done = 0;

        while done < length {
            let (lba, skip) = split_offset::<BLOCK_SIZE>(entity.base + entity.position);
            let rest = length - done;
            let chunk = if skip == 0 && rest >= BLOCK_SIZE {
                let chunk = rest - rest % BLOCK_SIZE;
                if self.ops.write_blocks(lba, &buffer[done..done + chunk])? != chunk {
                    return Err(IoError::DeviceFault);
                }
                chunk
            } else {
                // Read-modify-write the partial block.
                self.read_block(lba, &mut state.bounce)?;
                let chunk = rest.min(BLOCK_SIZE - skip);
                state.bounce[skip..skip + chunk].copy_from_slice(&buffer[done..done + chunk]);
                if self.ops.write_blocks(lba, &state.bounce)? != BLOCK_SIZE {
                    return Err(IoError::DeviceFault);
                }
                chunk
            };
            done += chunk;
            entity.position += chunk as u64;
        }
        Ok(done)
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
    use std::cell::{Cell, RefCell};

    const BLOCK: usize = 16;

    struct RamBlocks {
        data: RefCell<Vec<u8>>,
        reads: Cell<usize>,
    }

    impl RamBlocks {
        fn new(blocks: usize) -> Self {
            Self {
                data: RefCell::new((0..blocks * BLOCK).map(|i| i as u8).collect()),
                reads: Cell::new(0),
            }
        }
    }

    impl BlockOps for &RamBlocks {
        fn read_blocks(&self, lba: u64, buffer: &mut [u8]) -> Result<usize, IoError> {
            assert_eq!(buffer.len() % BLOCK, 0);
            self.reads.set(self.reads.get() + 1);
            let start = lba as usize * BLOCK;
            let data = self.data.borrow();
            let end = data.len().min(start + buffer.len());
            buffer[..end - start].copy_from_slice(&data[start..end]);
            Ok(end - start)
        }

        fn write_blocks(&self, lba: u64, buffer: &[u8]) -> Result<usize, IoError> {
            assert_eq!(buffer.len() % BLOCK, 0);
            let start = lba as usize * BLOCK;
            self.data.borrow_mut()[start..start + buffer.len()].copy_from_slice(buffer);
            Ok(buffer.len())
        }
    }

    #[test]
    fn unaligned_read() {
        let blocks = RamBlocks::new(8);
        let device = BlockDevice::<_, BLOCK>::new(&blocks);
        let mut storage = IoStorage::<1, 1>::new();
        let handle = storage.register_device(&device).unwrap();
        let entity = storage
            .open(
                handle,
                &IoSpec::Block {
                    offset: 5,
                    length: 100,
                },
            )
            .unwrap();

        let mut buffer = [0; 40];
        assert_eq!(storage.read(&entity, &mut buffer), Ok(40));
        assert_eq!(buffer[0], 5);
        assert_eq!(buffer[39], 44);
        // Head through the bounce buffer, one whole block directly, tail through the bounce buffer.
        assert_eq!(blocks.reads.get(), 3);

        storage.seek(&entity, SeekMode::Set, 90).unwrap();
        assert_eq!(storage.read(&entity, &mut buffer), Ok(10));
        assert_eq!(buffer[..10], (95..105).collect::<Vec<u8>>()[..]);
    }

    #[test]
    fn unaligned_write() {
        let blocks = RamBlocks::new(4);
        let device = BlockDevice::<_, BLOCK>::new(&blocks);
        let mut storage = IoStorage::<1, 1>::new();
        let handle = storage.register_device(&device).unwrap();
        let entity = storage
            .open(
                handle,
                &IoSpec::Block {
                    offset: 14,
                    length: 20,
                },
            )
            .unwrap();

        assert_eq!(storage.write(&entity, &[0xee; 20]), Ok(20));
        storage.close(entity).unwrap();
        let data = blocks.data.borrow();
        assert_eq!(data[13], 13);
        assert!(data[14..34].iter().all(|&byte| byte == 0xee));
        assert_eq!(data[34], 34);
    }

    #[test]
    fn limits() {
        let blocks = RamBlocks::new(4);
        let device = BlockDevice::<_, BLOCK>::new(&blocks);
        let mut storage = IoStorage::<1, 2>::new();
        let handle = storage.register_device(&device).unwrap();
        let spec = IoSpec::Block {
            offset: 0,
            length: 64,
        };
        let entity = storage.open(handle, &spec).unwrap();

        assert_eq!(storage.open(handle, &spec), Err(IoError::Busy));
        assert_eq!(storage.size(&entity), Err(IoError::NotSupported));
        assert_eq!(
            storage.seek(&entity, SeekMode::End, 0),
            Err(IoError::InvalidArgs)
        );
        storage.seek(&entity, SeekMode::Cur, 16).unwrap();
        let mut buffer = [0; 4];
        storage.read(&entity, &mut buffer).unwrap();
        assert_eq!(buffer, [16, 17, 18, 19]);
    }

    #[test]
    fn short_device_read() {
        let blocks = RamBlocks::new(2);
        let device = BlockDevice::<_, BLOCK>::new(&blocks);
        let mut storage = IoStorage::<1, 1>::new();
        let handle = storage.register_device(&device).unwrap();
        // The entity claims to extend past the end of the device.
        let entity = storage
            .open(
                handle,
                &IoSpec::Block {
                    offset: 0,
                    length: 64,
                },
            )
            .unwrap();
        let mut buffer = [0; 64];
        assert_eq!(
            storage.read(&entity, &mut buffer),
            Err(IoError::DeviceFault)
        );
    }
}
