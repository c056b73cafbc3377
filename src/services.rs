// Copyright The Rusted Firmware-A Contributors.
//
// SPDX-License-Identifier: BSD-3-Clause

//! SMC services provided by this stage.

pub mod gtsi;

use crate::smccc::{FunctionId, NOT_SUPPORTED, SmcReturn};
use arm_gpt::{Gpt, SecurityState};
use num_enum::{IntoPrimitive, TryFromPrimitive};

/// Helper macro to define the range of SMC function ID values covered by a service
#[macro_export]
macro_rules! owns {
    // service handles the entire Owning Entity Number (OEN)
    ($owning_entity:expr) => {
        #[inline(always)]
        fn owns(&self, function: $crate::smccc::FunctionId) -> bool {
            function.oen() == $owning_entity
                && matches!(
                    function.call_type(),
                    $crate::smccc::SmcccCallType::Fast32 | $crate::smccc::SmcccCallType::Fast64
                )
        }
    };
    // service handles a sub-range of the OEN
    // range refers to the lower 16 bits [15:0] of the SMC FunctionId
    ($owning_entity:expr, $range:expr) => {
        #[inline(always)]
        fn owns(&self, function: $crate::smccc::FunctionId) -> bool {
            function.oen() == $owning_entity
                && $range.contains(&function.number())
                && matches!(
                    function.call_type(),
                    $crate::smccc::SmcccCallType::Fast32 | $crate::smccc::SmcccCallType::Fast64
                )
        }
    };
}
pub(crate) use owns;

/// The security state a call came from, as established by the exception context that trapped it.
#[derive(Clone, Copy, Debug, Eq, IntoPrimitive, PartialEq, TryFromPrimitive)]
#[repr(u32)]
pub enum World {
    /// Secure world.
    Secure = 0,
    /// Normal world.
    NonSecure = 1,
    /// Realm world.
    Realm = 2,
}

impl From<World> for SecurityState {
    fn from(world: World) -> Self {
        match world {
            World::Secure => Self::Secure,
            World::NonSecure => Self::NonSecure,
            World::Realm => Self::Realm,
        }
    }
}

/// A service which handles some range of SMC calls.
///
/// According to SMCCC v1.3+ the implementation must disregard the SVE hint bit in the function ID
/// and consider it to be 0 for the purpose of function identification.
pub trait Service {
    /// Returns whether this service is intended to handle the given function ID.
    fn owns(&self, function: FunctionId) -> bool;

    /// Handles the given SMC call from Normal World.
    fn handle_non_secure_smc(&self, _regs: &[u64; 18]) -> SmcReturn {
        NOT_SUPPORTED.into()
    }

    /// Handles the given SMC call from Secure World.
    fn handle_secure_smc(&self, _regs: &[u64; 18]) -> SmcReturn {
        NOT_SUPPORTED.into()
    }

    /// Handles the given SMC call from Realm World.
    fn handle_realm_smc(&self, _regs: &[u64; 18]) -> SmcReturn {
        NOT_SUPPORTED.into()
    }
}

/// Contains an instance of all of the services this stage implements.
pub struct Services<'g> {
    /// The granule transition service.
    pub gtsi: gtsi::Gtsi<'g>,
}

impl<'g> Services<'g> {
    /// Creates the services, with granule transitions applied to the given GPT.
    pub fn new(gpt: &'g Gpt<'g>) -> Self {
        Self {
            gtsi: gtsi::Gtsi::new(gpt),
        }
    }

    /// Dispatches an SMC trapped from `world` to the service which owns its function ID.
    pub fn handle_smc(&self, regs: &[u64; 18], world: World) -> SmcReturn {
        let mut function = FunctionId(regs[0] as u32);
        function.clear_sve_hint();

        if !function.valid() {
            return NOT_SUPPORTED.into();
        }

        let service: &dyn Service = if self.gtsi.owns(function) {
            &self.gtsi
        } else {
            return NOT_SUPPORTED.into();
        };

        match world {
            World::NonSecure => service.handle_non_secure_smc(regs),
            World::Secure => service.handle_secure_smc(regs),
            World::Realm => service.handle_realm_smc(regs),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::gtsi::GTSI_DELEGATE;

    /// The point of this isn't to test every individual SMC call, just that the common code in
    /// `handle_smc` works. Individual SMC calls are tested directly within their modules.
    #[test]
    fn dispatch() {
        let gpt = Gpt::new();
        let services = Services::new(&gpt);
        let mut regs = [0u64; 18];

        regs[0] = 0xC400_0000;
        assert_eq!(
            services.handle_smc(&regs, World::Realm).values(),
            [NOT_SUPPORTED as u64]
        );

        // Reserved bits set.
        regs[0] = (GTSI_DELEGATE | 1 << 17).into();
        assert_eq!(
            services.handle_smc(&regs, World::Realm).values(),
            [NOT_SUPPORTED as u64]
        );

        // The SVE hint bit doesn't change which service is picked. The GPT isn't provisioned, so
        // the call fails inside the service.
        regs[0] = (GTSI_DELEGATE | 1 << 16).into();
        regs[3] = u32::from(World::Realm).into();
        assert_ne!(
            services.handle_smc(&regs, World::Realm).values(),
            [NOT_SUPPORTED as u64]
        );
    }

    #[test]
    fn world_encoding() {
        assert_eq!(World::try_from(2).ok(), Some(World::Realm));
        assert!(World::try_from(3).is_err());
        assert_eq!(SecurityState::from(World::Secure), SecurityState::Secure);
    }
}
