//! CMDU dispatch
//!
//! Every received CMDU goes through [`Controller::handle_cmdu`]: same-vendor
//! envelopes are routed by action, everything else by 1905.1 message type, and
//! the tasks then see the message as well.

use mesh_core::errors::VendorMessageError;
use mesh_core::protocol::tlv::VendorSpecificTlv;
use mesh_core::protocol::vendor::{is_foreign, Action, INTEL_OUI};
use mesh_core::protocol::{Cmdu, MessageType, VendorBody, VendorMessage};
use mesh_core::{MacAddress, MeshError, Result};
use tracing::{debug, warn};

use super::Controller;
use crate::tasks::TaskEnv;

/// Offset of the big-endian id in a vendor header
const VENDOR_ID_OFFSET: usize = 3;

impl Controller {
    /// Handle one decoded CMDU; returns false when its handler failed
    pub fn handle_cmdu(&mut self, src: MacAddress, cmdu: &Cmdu) -> bool {
        let Some(message_type) = cmdu.message_type() else {
            debug!(
                src = %src,
                message_type = format_args!("0x{:04x}", cmdu.header.message_type),
                "ignoring unknown message type"
            );
            return true;
        };

        let result = if message_type == MessageType::VendorSpecific {
            self.handle_vendor_cmdu(src, cmdu)
        } else {
            self.handle_ieee1905(src, message_type, cmdu)
        };

        let now = self.now();
        self.db.update_last_seen(&src, now);
        let mut env = TaskEnv {
            db: &mut self.db,
            outbox: &mut self.outbox,
            config: &self.config,
        };
        self.tasks.handle_ieee1905_msg(&mut env, src, cmdu);

        match result {
            Ok(()) => true,
            Err(e) => {
                warn!(src = %src, ?message_type, mid = cmdu.message_id(), error = %e, "message handling failed");
                false
            }
        }
    }

    fn handle_vendor_cmdu(&mut self, src: MacAddress, cmdu: &Cmdu) -> Result<()> {
        let message = match VendorMessage::from_cmdu(cmdu) {
            Ok(Some(message)) => message,
            Ok(None) => {
                debug!(src = %src, "vendor specific message from another vendor");
                return Ok(());
            }
            Err(e) if is_foreign(&e) => return Ok(()),
            Err(MeshError::Vendor(VendorMessageError::UnknownAction { action })) => {
                let header = Self::raw_vendor_payload(cmdu)
                    .map(|payload| hex::encode(&payload[..payload.len().min(VENDOR_ID_OFFSET + 2)]))
                    .unwrap_or_default();
                debug!(src = %src, action, header = %header, "ignoring unknown vendor action");
                return Ok(());
            }
            Err(e) => return self.handle_undecodable_vendor(src, cmdu, e),
        };

        match message.body.clone() {
            VendorBody::Control(control) => self.handle_control(src, &message, control),
            VendorBody::Cli(cli) => self.handle_cli(src, &message, cli),
            VendorBody::Bml(bml) => self.handle_bml(src, &message, bml),
        }
    }

    /// A same-vendor envelope whose body did not decode
    ///
    /// Unknown CONTROL ops are ignored. CLI and BML requests always get a
    /// negative reply carrying the request id, read from the raw header.
    fn handle_undecodable_vendor(&mut self, src: MacAddress, cmdu: &Cmdu, err: MeshError) -> Result<()> {
        let Some(payload) = Self::raw_vendor_payload(cmdu) else {
            return Err(err);
        };
        let action = payload.first().copied().and_then(Action::from_u8);
        let action_op = payload.get(1).copied().unwrap_or(0);
        let unknown_op = matches!(err, MeshError::Vendor(VendorMessageError::UnknownActionOp { .. }));
        match action {
            Some(Action::Control) if unknown_op => {
                debug!(src = %src, action_op, "ignoring unknown CONTROL op");
                Ok(())
            }
            Some(action @ (Action::Cli | Action::Bml)) => {
                let id = Self::raw_vendor_id(cmdu).unwrap_or(0);
                debug!(src = %src, ?action, action_op, id, error = %err, "rejecting undecodable northbound request");
                self.reject_northbound(src, action, action_op, id, unknown_op)
            }
            _ => Err(err),
        }
    }

    fn raw_vendor_payload(cmdu: &Cmdu) -> Option<Vec<u8>> {
        let tlvs = cmdu.get_all::<VendorSpecificTlv>().ok()?;
        tlvs.into_iter().find(|tlv| tlv.oui == INTEL_OUI).map(|tlv| tlv.payload)
    }

    /// Id field of the first same-vendor TLV, read without decoding the body
    fn raw_vendor_id(cmdu: &Cmdu) -> Option<u16> {
        let payload = Self::raw_vendor_payload(cmdu)?;
        let bytes = payload.get(VENDOR_ID_OFFSET..VENDOR_ID_OFFSET + 2)?;
        Some(u16::from_be_bytes([bytes[0], bytes[1]]))
    }
}
