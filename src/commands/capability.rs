// SPDX-FileCopyrightText: © 2025 Phala Network <dstack@phala.network>
//
// SPDX-License-Identifier: Apache-2.0

//! Capability queries

use crate::constants::{Handle, TpmCap, TpmCc};
use crate::errors::{Error, Result};
use crate::marshal::{CommandBuffer, Unmarshal};
use crate::resources::Session;
use crate::tpm::{CommandArgs, TpmContext};
use crate::types::{TpmsCapabilityData, TpmuCapabilities};

impl TpmContext {
    /// TPM2_GetCapability: one page of capability data, plus whether more
    /// values remain beyond it.
    pub fn get_capability(
        &mut self,
        capability: TpmCap,
        property: u32,
        property_count: u32,
        sessions: &[&Session],
    ) -> Result<(bool, TpmsCapabilityData)> {
        let mut cp = CommandBuffer::new();
        cp.put_u32(capability as u32);
        cp.put_u32(property);
        cp.put_u32(property_count);
        let mut args = CommandArgs::new(&[], cp.into_vec());
        args.extra_sessions = sessions;
        self.run_command(TpmCc::GetCapability, args)?.parse(|buf| {
            let more_data = buf.get_bool()?;
            let data = TpmsCapabilityData::unmarshal(buf)?;
            Ok((more_data, data))
        })
    }

    /// The active handles of one type, starting from `first` (use
    /// [`Handle::base_of`] for a whole handle range).
    pub fn get_capability_handles(
        &mut self,
        first: Handle,
        property_count: u32,
    ) -> Result<Vec<Handle>> {
        let (_, data) = self.get_capability(TpmCap::Handles, first.0, property_count, &[])?;
        match data.data {
            TpmuCapabilities::Handles(handles) => Ok(handles),
            _ => Err(Error::InvalidResponse {
                command: TpmCc::GetCapability,
                reason: "capability data of unexpected type".to_string(),
            }),
        }
    }
}
