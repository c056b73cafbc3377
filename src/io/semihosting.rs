// Copyright The Rusted Firmware-A Contributors.
//
// SPDX-License-Identifier: BSD-3-Clause

//! Files on a debug host, accessed with the Arm semihosting calls.
//! See https://github.com/ARM-software/abi-aa/blob/main/semihosting/semihosting.rst.

use super::{DeviceType, EntityState, IoDevice, IoError, IoSpec, SeekMode};
use log::warn;

/// `SYS_OPEN` mode in which to open host files.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
#[repr(u64)]
pub enum OpenMode {
    /// `"rb"`
    Read = 1,
    /// `"r+b"`
    ReadWrite = 3,
}

/// The file operations of the semihosting interface.
pub trait HostCalls {
    /// Opens the file at `path`, returning its host handle.
    fn open(&self, path: &str, mode: OpenMode) -> Result<usize, IoError>;

    /// Returns the length of the file in bytes.
    fn flen(&self, handle: usize) -> Result<u64, IoError>;

    /// Moves the host file position to `position` bytes from the start of the file.
    fn seek(&self, handle: usize, position: u64) -> Result<(), IoError>;

    /// Reads from the host file position into `buffer`, returning the number of bytes read.
    fn read(&self, handle: usize, buffer: &mut [u8]) -> Result<usize, IoError>;

    /// Writes `buffer` at the host file position, returning the number of bytes written.
    fn write(&self, handle: usize, buffer: &[u8]) -> Result<usize, IoError>;

    /// Closes the file.
    fn close(&self, handle: usize) -> Result<(), IoError>;
}

/// A device giving access to files on the debug host by path.
///
/// Each entity has its own host handle, so any number of files may be open at once.
pub struct SemihostingDevice<H: HostCalls> {
    host: H,
    mode: OpenMode,
}

impl<H: HostCalls> SemihostingDevice<H> {
    /// Creates a device which opens host files in the given mode.
    pub const fn new(host: H, mode: OpenMode) -> Self {
        Self { host, mode }
    }
}

impl<H: HostCalls> IoDevice for SemihostingDevice<H> {
    fn device_type(&self) -> DeviceType {
        DeviceType::Semihosting
    }

    fn open(&self, spec: &IoSpec) -> Result<EntityState, IoError> {
        let IoSpec::Path(path) = spec else {
            return Err(IoError::InvalidArgs);
        };
        let handle = self.host.open(path, self.mode)?;
        let length = match self.host.flen(handle) {
            Ok(length) => length,
            Err(e) => {
                if self.host.close(handle).is_err() {
                    warn!("Semihosting: failed to close {path}");
                }
                return Err(e);
            }
        };
        let mut entity = EntityState::new(0, length);
        entity.token = handle;
        Ok(entity)
    }

    fn seek(&self, entity: &mut EntityState, mode: SeekMode, offset: i64) -> Result<(), IoError> {
        let mut moved = *entity;
        moved.seek(mode, offset)?;
        self.host.seek(entity.token, moved.position)?;
        *entity = moved;
        Ok(())
    }

    fn size(&self, entity: &EntityState) -> Result<usize, IoError> {
        usize::try_from(entity.length).map_err(|_| IoError::InvalidArgs)
    }

    fn read(&self, entity: &mut EntityState, buffer: &mut [u8]) -> Result<usize, IoError> {
        let length = entity.transfer_length(buffer.len());
        let read = self.host.read(entity.token, &mut buffer[..length])?;
        entity.position += read as u64;
        Ok(read)
    }

    fn write(&self, entity: &mut EntityState, buffer: &[u8]) -> Result<usize, IoError> {
        if self.mode == OpenMode::Read {
            return Err(IoError::NotSupported);
        }
        let length = entity.transfer_length(buffer.len());
        let written = self.host.write(entity.token, &buffer[..length])?;
        entity.position += written as u64;
        Ok(written)
    }

    fn close(&self, entity: &mut EntityState) -> Result<(), IoError> {
        self.host.close(entity.token)
    }
}

#[cfg(all(target_arch = "aarch64", not(test)))]
pub use self::arm::ArmSemihosting;

#[cfg(all(target_arch = "aarch64", not(test)))]
mod arm {
    use super::{HostCalls, IoError, OpenMode};
    use arrayvec::ArrayVec;
    use core::arch::asm;

    /// Longest host path, including the NUL terminator.
    const MAX_PATH: usize = 256;

    /// `SYS_*` operation codes used for file access.
    #[derive(Copy, Clone, Debug, Eq, PartialEq)]
    #[repr(u32)]
    enum Operation {
        Open = 0x01,
        Close = 0x02,
        Write = 0x05,
        Read = 0x06,
        Seek = 0x0A,
        Flen = 0x0C,
    }

    /// Makes a semihosting call with the given operation code and parameter block.
    ///
    /// # Safety
    ///
    /// `parameters` must be the argument block expected by `operation`, and any pointers it
    /// contains must be valid for the access the operation makes.
    unsafe fn semihosting_call(operation: Operation, parameters: &[u64]) -> i64 {
        let result: u64;
        // SAFETY: The caller guarantees that the parameter block is valid for `operation`.
        unsafe {
            asm!(
                "hlt #0xf000",
                in("w0") operation as u32,
                inout("x1") parameters.as_ptr() => _,
                lateout("x0") result,
                options(nostack)
            );
        }
        result as i64
    }

    /// Semihosting calls made with `hlt #0xf000`, trapped by the debugger or model.
    pub struct ArmSemihosting;

    impl HostCalls for ArmSemihosting {
        fn open(&self, path: &str, mode: OpenMode) -> Result<usize, IoError> {
            let mut terminated = ArrayVec::<u8, MAX_PATH>::new();
            terminated
                .try_extend_from_slice(path.as_bytes())
                .map_err(|_| IoError::InvalidArgs)?;
            terminated.try_push(0).map_err(|_| IoError::InvalidArgs)?;
            let parameters = [
                terminated.as_ptr() as u64,
                mode as u64,
                path.len() as u64,
            ];
            // SAFETY: `terminated` is a NUL terminated string of the given length, which outlives
            // the call.
            let handle = unsafe { semihosting_call(Operation::Open, &parameters) };
            usize::try_from(handle).map_err(|_| IoError::NotFound)
        }

        fn flen(&self, handle: usize) -> Result<u64, IoError> {
            // SAFETY: `SYS_FLEN` takes just the handle.
            let length = unsafe { semihosting_call(Operation::Flen, &[handle as u64]) };
            u64::try_from(length).map_err(|_| IoError::DeviceFault)
        }

        fn seek(&self, handle: usize, position: u64) -> Result<(), IoError> {
            // SAFETY: `SYS_SEEK` takes the handle and an absolute position.
            match unsafe { semihosting_call(Operation::Seek, &[handle as u64, position]) } {
                0 => Ok(()),
                _ => Err(IoError::DeviceFault),
            }
        }

        fn read(&self, handle: usize, buffer: &mut [u8]) -> Result<usize, IoError> {
            let parameters = [
                handle as u64,
                buffer.as_mut_ptr() as u64,
                buffer.len() as u64,
            ];
            // SAFETY: The buffer is valid for writes of its length for the duration of the call.
            let not_read = unsafe { semihosting_call(Operation::Read, &parameters) };
            usize::try_from(not_read)
                .ok()
                .and_then(|not_read| buffer.len().checked_sub(not_read))
                .ok_or(IoError::DeviceFault)
        }

        fn write(&self, handle: usize, buffer: &[u8]) -> Result<usize, IoError> {
            let parameters = [handle as u64, buffer.as_ptr() as u64, buffer.len() as u64];
            // SAFETY: The buffer is valid for reads of its length for the duration of the call.
            let not_written = unsafe { semihosting_call(Operation::Write, &parameters) };
            usize::try_from(not_written)
                .ok()
                .and_then(|not_written| buffer.len().checked_sub(not_written))
                .ok_or(IoError::DeviceFault)
        }

        fn close(&self, handle: usize) -> Result<(), IoError> {
            // SAFETY: `SYS_CLOSE` takes just the handle.
            match unsafe { semihosting_call(Operation::Close, &[handle as u64]) } {
                0 => Ok(()),
                _ => Err(IoError::DeviceFault),
            }
        }
    }
}
