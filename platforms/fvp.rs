// Copyright The Rusted Firmware-A Contributors.
//
// SPDX-License-Identifier: BSD-3-Clause

use super::{BuildResult, Builder};

pub struct FvpBuilder;

impl FvpBuilder {
    pub const PLAT_NAME: &str = "fvp";

    const BL2_BASE: u64 = 0x0406_0000;
    const BL2_SIZE: u64 = 0x0002_0000;
}

impl Builder for FvpBuilder {
    fn bl2_base(&self) -> u64 {
        Self::BL2_BASE
    }

    fn bl2_size(&self) -> u64 {
        Self::BL2_SIZE
    }

    fn configure_build(&self) -> BuildResult {
        if std::env::var("CARGO_FEATURE_RME").is_err() {
            println!("cargo:warning=FVP BL2 built without RME, the GPT will not be set up");
        }
        Ok(())
    }
}
