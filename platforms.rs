// Copyright The Rusted Firmware-A Contributors.
//
// SPDX-License-Identifier: BSD-3-Clause

mod fvp;
mod qemu;

use fvp::FvpBuilder;
use qemu::QemuBuilder;
use std::{error::Error, path::Path};

pub const PLATFORMS: [&str; 2] = [QemuBuilder::PLAT_NAME, FvpBuilder::PLAT_NAME];

type BuildResult = Result<(), Box<dyn Error>>;

pub trait Builder {
    /// Base address of the BL2 binary.
    ///
    /// This is passed to the linker script through the `BL2_BASE` symbol.
    fn bl2_base(&self) -> u64;

    /// Maximum size of the BL2 binary, including its stack and zero-initialised data.
    ///
    /// This is passed to the linker script through the `BL2_SIZE` symbol.
    fn bl2_size(&self) -> u64;

    /// Size of the stack of the boot core.
    ///
    /// This is passed to the linker script through the `BL2_STACK_SIZE` symbol.
    fn bl2_stack_size(&self) -> u64 {
        0x4000
    }

    /// Sets up platform-specific build configuration.
    fn configure_build(&self) -> BuildResult {
        Ok(())
    }
}

pub fn get_builder(platform: &str) -> Result<Box<dyn Builder>, Box<dyn Error>> {
    match platform {
        FvpBuilder::PLAT_NAME => Ok(Box::new(FvpBuilder)),
        QemuBuilder::PLAT_NAME => Ok(Box::new(QemuBuilder)),
        _ => Err(format!(
            "Unexpected platform name {platform:?}. Supported platforms: {PLATFORMS:?}"
        )
        .into()),
    }
}

pub fn add_linker_script(path: &Path) {
    println!("cargo:rustc-link-arg=-T{}", path.display());
    println!("cargo:rerun-if-changed={}", path.display());
}

pub fn define_linker_symbol(name: &str, value: u64) {
    println!("cargo:rustc-link-arg=--defsym={name}={value}");
}
