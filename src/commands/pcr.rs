// SPDX-FileCopyrightText: © 2025 Phala Network <dstack@phala.network>
//
// SPDX-License-Identifier: Apache-2.0

//! PCR commands

use tracing::debug;

use crate::constants::{TpmAlgId, TpmCc};
use crate::errors::{Error, Result};
use crate::marshal::{CommandBuffer, Marshal, Unmarshal};
use crate::resources::{ResourceContext, Session};
use crate::tpm::{CommandArgs, HandleArg, TpmContext};
use crate::types::{TpmlDigest, TpmlDigestValues, TpmlPcrSelection};

impl TpmContext {
    /// TPM2_PCR_Extend: extends one digest per bank into the PCR behind
    /// `pcr_context`.
    pub fn pcr_extend(
        &mut self,
        pcr_context: &ResourceContext,
        digests: &TpmlDigestValues,
        auth_session: Option<&Session>,
        sessions: &[&Session],
    ) -> Result<()> {
        let mut cp = CommandBuffer::new();
        digests.marshal(&mut cp)?;
        let handles = [HandleArg::Auth(pcr_context, auth_session)];
        let mut args = CommandArgs::new(&handles, cp.into_vec());
        args.extra_sessions = sessions;
        self.run_command(TpmCc::PcrExtend, args)?.no_params()?;
        debug!("extended PCR {}", pcr_context.handle());
        Ok(())
    }

    /// TPM2_PCR_Event: hashes `event_data` in every enabled bank and
    /// extends the results; returns the per-bank digests.
    pub fn pcr_event(
        &mut self,
        pcr_context: &ResourceContext,
        event_data: &[u8],
        auth_session: Option<&Session>,
        sessions: &[&Session],
    ) -> Result<TpmlDigestValues> {
        let mut cp = CommandBuffer::new();
        cp.put_sized_buffer(event_data)?;
        let handles = [HandleArg::Auth(pcr_context, auth_session)];
        let mut args = CommandArgs::new(&handles, cp.into_vec());
        args.extra_sessions = sessions;
        args.first_param_sized = true;
        self.run_command(TpmCc::PcrEvent, args)?
            .parse(|buf| TpmlDigestValues::unmarshal(buf))
    }

    /// TPM2_PCR_Read: the update counter, the selection the TPM actually
    /// read, and the digests in selection order.
    pub fn pcr_read(
        &mut self,
        selection: &TpmlPcrSelection,
        sessions: &[&Session],
    ) -> Result<(u32, TpmlPcrSelection, Vec<Vec<u8>>)> {
        let mut cp = CommandBuffer::new();
        selection.marshal(&mut cp)?;
        let mut args = CommandArgs::new(&[], cp.into_vec());
        args.extra_sessions = sessions;
        self.run_command(TpmCc::PcrRead, args)?.parse(|buf| {
            let update_counter = buf.get_u32()?;
            let selection_out = TpmlPcrSelection::unmarshal(buf)?;
            let digests = TpmlDigest::unmarshal(buf)?;
            Ok((update_counter, selection_out, digests.digests))
        })
    }

    /// Reads a single PCR from one bank.
    pub fn pcr_read_single(&mut self, pcr: u32, hash_alg: TpmAlgId) -> Result<Vec<u8>> {
        let selection = TpmlPcrSelection::single(hash_alg, &[pcr]);
        let (_, selection_out, digests) = self.pcr_read(&selection, &[])?;

        let mut index = 0;
        for sel in &selection_out.selections {
            for selected in sel.selected() {
                if sel.hash == hash_alg && selected == pcr {
                    return digests.get(index).cloned().ok_or_else(|| {
                        Error::InvalidResponse {
                            command: TpmCc::PcrRead,
                            reason: "fewer digests than selected PCRs".to_string(),
                        }
                    });
                }
                index += 1;
            }
        }
        Err(Error::InvalidResponse {
            command: TpmCc::PcrRead,
            reason: format!("PCR {pcr} missing from response selection"),
        })
    }
}
