// Copyright The Rusted Firmware-A Contributors.
//
// SPDX-License-Identifier: BSD-3-Clause

use super::Builder;

pub struct QemuBuilder;

impl QemuBuilder {
    pub const PLAT_NAME: &str = "qemu";

    const BL2_BASE: u64 = 0x0e06_0000;
    const BL2_SIZE: u64 = 0x0003_0000;
}

impl Builder for QemuBuilder {
    fn bl2_base(&self) -> u64 {
        Self::BL2_BASE
    }

    fn bl2_size(&self) -> u64 {
        Self::BL2_SIZE
    }
}
