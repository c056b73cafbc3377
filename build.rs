// Copyright The Rusted Firmware-A Contributors.
//
// SPDX-License-Identifier: BSD-3-Clause

//! Build script for RF-A BL2.

mod platforms;

use platforms::{Builder, PLATFORMS, add_linker_script, define_linker_symbol, get_builder};
use std::{env, error::Error, fs, path::Path};

fn setup_linker(builder: &dyn Builder) {
    define_linker_symbol("BL2_BASE", builder.bl2_base());
    define_linker_symbol("BL2_SIZE", builder.bl2_size());
    define_linker_symbol("BL2_STACK_SIZE", builder.bl2_stack_size());

    add_linker_script(Path::new("bl2.ld"));
}

/// Parses a SHA-256 hash given as 64 hex digits.
fn parse_hash(hex: &str) -> Result<[u8; 32], Box<dyn Error>> {
    let hex = hex.trim();
    if hex.len() != 64 {
        return Err(format!("ROTPK_HASH must be 64 hex digits, got {}", hex.len()).into());
    }
    let mut hash = [0; 32];
    for (byte, digits) in hash.iter_mut().zip(hex.as_bytes().chunks(2)) {
        *byte = u8::from_str_radix(std::str::from_utf8(digits)?, 16)?;
    }
    Ok(hash)
}

/// Writes the hash of the root of trust public key table to `$OUT_DIR/rotpk_hash.rs`, as an array
/// expression for the platform to `include!`.
fn generate_rotpk_hash() -> Result<(), Box<dyn Error>> {
    println!("cargo:rerun-if-env-changed=ROTPK_HASH");
    let hash = match env::var("ROTPK_HASH") {
        Ok(hex) => parse_hash(&hex)?,
        Err(_) => {
            println!("cargo:warning=ROTPK_HASH not set, no image will authenticate");
            [0; 32]
        }
    };
    let out_dir = env::var("OUT_DIR")?;
    fs::write(Path::new(&out_dir).join("rotpk_hash.rs"), format!("{hash:?}"))?;
    Ok(())
}

fn main() {
    println!(
        "cargo::rustc-check-cfg=cfg(platform, values(\"{}\"))",
        PLATFORMS.join("\", \""),
    );

    if env::var("CARGO_CFG_TARGET_OS").unwrap() == "none" {
        let platform = env::var("CARGO_CFG_PLATFORM").expect("Missing platform name");

        let platform_builder = get_builder(&platform).unwrap();

        platform_builder.configure_build().unwrap();

        generate_rotpk_hash().unwrap();

        setup_linker(&*platform_builder);
    }
}
