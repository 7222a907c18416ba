//! Outbound CMDU path
//!
//! The controller never touches sockets. Every message leaves through a
//! [`CmduSender`], injected at construction; [`Outbox`] adds message id allocation
//! on top of it and is the only handle tasks and handlers use to transmit.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use mesh_core::protocol::{Cmdu, MessageType, VendorMessage};
use mesh_core::{MacAddress, MeshError, Result};
use tracing::{debug, warn};

// ----------------------------------------------------------------------------
// Sender Trait
// ----------------------------------------------------------------------------

/// Transport towards the broker
pub trait CmduSender: Send {
    /// Hand a fully built CMDU to the transport
    fn send_cmdu(&mut self, dst: MacAddress, cmdu: &Cmdu) -> Result<()>;
}

// ----------------------------------------------------------------------------
// Recording Sender
// ----------------------------------------------------------------------------

/// A CMDU captured by [`RecordingSender`]
#[derive(Debug, Clone, PartialEq)]
pub struct SentCmdu {
    pub dst: MacAddress,
    pub cmdu: Cmdu,
}

impl SentCmdu {
    /// Same-vendor payload of this CMDU, if any
    pub fn vendor(&self) -> Option<VendorMessage> {
        VendorMessage::from_cmdu(&self.cmdu).ok().flatten()
    }
}

/// Sender that keeps every CMDU in memory
///
/// Clones share the same log, so a test can keep one clone while the controller
/// owns the other.
#[derive(Debug, Clone, Default)]
pub struct RecordingSender {
    sent: Arc<Mutex<Vec<SentCmdu>>>,
    offline: Arc<AtomicBool>,
}

impl RecordingSender {
    pub fn new() -> Self {
        Self::default()
    }

    fn log(&self) -> MutexGuard<'_, Vec<SentCmdu>> {
        match self.sent.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// Everything sent so far
    pub fn sent(&self) -> Vec<SentCmdu> {
        self.log().clone()
    }

    /// Drain the log
    pub fn take(&self) -> Vec<SentCmdu> {
        core::mem::take(&mut *self.log())
    }

    pub fn clear(&self) {
        self.log().clear();
    }

    /// While offline every send fails and nothing is recorded
    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    pub fn len(&self) -> usize {
        self.log().len()
    }

    pub fn is_empty(&self) -> bool {
        self.log().is_empty()
    }

    /// Sent CMDUs of one message type
    pub fn of_type(&self, message_type: MessageType) -> Vec<SentCmdu> {
        self.log()
            .iter()
            .filter(|sent| sent.cmdu.message_type() == Some(message_type))
            .cloned()
            .collect()
    }

    /// Decoded same-vendor messages with their destination
    pub fn vendor_messages(&self) -> Vec<(MacAddress, VendorMessage)> {
        self.log()
            .iter()
            .filter_map(|sent| sent.vendor().map(|message| (sent.dst, message)))
            .collect()
    }
}

impl CmduSender for RecordingSender {
    fn send_cmdu(&mut self, dst: MacAddress, cmdu: &Cmdu) -> Result<()> {
        if self.offline.load(Ordering::SeqCst) {
            return Err(MeshError::transport("recording sender is offline"));
        }
        // Round-trip through the codec so only well-formed frames are recorded
        let bytes = cmdu.encode()?;
        let cmdu = Cmdu::decode(&bytes)?;
        self.log().push(SentCmdu { dst, cmdu });
        Ok(())
    }
}

// ----------------------------------------------------------------------------
// Outbox
// ----------------------------------------------------------------------------

/// Message id allocator in front of the injected sender
pub struct Outbox {
    sender: Box<dyn CmduSender>,
    next_mid: u16,
}

impl Outbox {
    pub fn new(sender: Box<dyn CmduSender>) -> Self {
        Self {
            sender,
            next_mid: 0,
        }
    }

    /// Fresh non-zero message id
    pub fn next_message_id(&mut self) -> u16 {
        self.next_mid = self.next_mid.wrapping_add(1);
        if self.next_mid == 0 {
            self.next_mid = 1;
        }
        self.next_mid
    }

    pub fn send(&mut self, dst: MacAddress, cmdu: &Cmdu) -> Result<()> {
        debug!(
            dst = %dst,
            message_type = format_args!("0x{:04x}", cmdu.header.message_type),
            mid = cmdu.message_id(),
            "sending CMDU"
        );
        self.sender.send_cmdu(dst, cmdu).map_err(|e| {
            warn!(dst = %dst, "send failed: {}", e);
            e
        })
    }

    /// Wrap a same-vendor message into its own VENDOR_SPECIFIC CMDU and send it
    pub fn send_vendor(&mut self, dst: MacAddress, message: &VendorMessage) -> Result<()> {
        let mid = self.next_message_id();
        self.send(dst, &message.to_cmdu(mid))
    }
}
