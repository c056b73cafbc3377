// Copyright The Rusted Firmware-A Contributors.
//
// SPDX-License-Identifier: BSD-3-Clause

//! Granule Transition Service Interface, used by the Realm Management Monitor and the SPMC to move
//! granules between their own physical address space and Non-secure.

use crate::{
    services::{Service, World, owns},
    smccc::{FunctionId, OwningEntityNumber, SUCCESS, SmcReturn},
};
use arm_gpt::{Gpt, GptError};
use log::{trace, warn};

/// Moves granules from Non-secure to the caller's physical address space.
pub const GTSI_DELEGATE: u32 = 0xC400_01B0;
/// Moves granules from the caller's physical address space back to Non-secure.
pub const GTSI_UNDELEGATE: u32 = 0xC400_01B1;

/// The address range is misaligned or not covered by granule tables.
pub const E_BAD_ADDR: i32 = -2;
/// A granule in the range isn't in a physical address space the caller may move it from.
pub const E_BAD_PAS: i32 = -3;
/// The request is invalid, e.g. the caller claimed to be a different world.
pub const E_INVAL: i32 = -5;

/// Handles granule transition calls against a GPT.
pub struct Gtsi<'g> {
    gpt: &'g Gpt<'g>,
}

impl<'g> Gtsi<'g> {
    /// Creates the service for the given GPT.
    pub fn new(gpt: &'g Gpt<'g>) -> Self {
        Self { gpt }
    }

    /// Handles a call from `world`, with the base address in `x1`, the size in `x2` and the
    /// security state the caller claims to be in `x3`.
    fn handle_smc(&self, regs: &[u64; 18], world: World) -> SmcReturn {
        let mut function = FunctionId(regs[0] as u32);
        function.clear_sve_hint();
        let (base, size, claimed) = (regs[1], regs[2], regs[3]);

        // Never trust the claim, only the world the call trapped from.
        let claim_matches = u32::try_from(claimed)
            .ok()
            .and_then(|claimed| World::try_from(claimed).ok())
            .is_some_and(|claimed| claimed == world);
        if !claim_matches {
            warn!("GTSI: {world:?} caller claimed security state {claimed:#x}");
            return E_INVAL.into();
        }

        let result = match function.0 {
            GTSI_DELEGATE => self.gpt.delegate_pas(base, size, world.into()),
            GTSI_UNDELEGATE => self.gpt.undelegate_pas(base, size, world.into()),
            _ => return E_INVAL.into(),
        };
        match result {
            Ok(()) => {
                trace!("GTSI: {function} {base:#x}+{size:#x} from {world:?} done");
                SUCCESS.into()
            }
            Err(e) => {
                trace!("GTSI: {function} {base:#x}+{size:#x} from {world:?} failed: {e}");
                error_code(e).into()
            }
        }
    }
}

/// Returns the status code to report to the caller for a failed transition.
fn error_code(error: GptError) -> i32 {
    match error {
        GptError::Unaligned | GptError::InvalidRange => E_BAD_ADDR,
        GptError::NotPermitted => E_BAD_PAS,
        _ => E_INVAL,
    }
}

impl Service for Gtsi<'_> {
    owns! {OwningEntityNumber::STANDARD_SECURE, 0x01B0..=0x01B1}

    fn handle_non_secure_smc(&self, regs: &[u64; 18]) -> SmcReturn {
        self.handle_smc(regs, World::NonSecure)
    }

    fn handle_secure_smc(&self, regs: &[u64; 18]) -> SmcReturn {
        self.handle_smc(regs, World::Secure)
    }

    fn handle_realm_smc(&self, regs: &[u64; 18]) -> SmcReturn {
        self.handle_smc(regs, World::Realm)
    }
}
