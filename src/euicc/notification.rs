//! Notification metadata from ListNotification (BF28) responses.
//!
//! The response is walked by hand rather than decoded as a tree: its outer lengths
//! use the long form, and vendors append tags of their own inside the records. Each
//! `BF2F` record is found by scanning, and its fields are read until something
//! unexpected turns up. A broken record yields whatever fields were read before the
//! break; it's never an error.

use crate::ber;
use crate::euicc::Iccid;
use num_enum::{FromPrimitive, IntoPrimitive};
use tracing::{debug, trace};

pub const TAG_NOTIFICATION_METADATA: [u8; 2] = [0xBF, 0x2F];

const TAG_SEQ_NUMBER: u8 = 0x80;
const TAG_EVENT: u8 = 0x81;
const TAG_SMDP_ADDRESS: u8 = 0x0C;
const TAG_ICCID: u8 = 0x5A;

/// The profile management operation a notification reports.
///
/// These are BER BIT STRINGs, so the first byte is the count of unused bits.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NotificationEvent {
    /// 0780
    Install,
    /// 0640
    Enable,
    /// 0520
    Disable,
    /// 0410
    Delete,
    Other(Vec<u8>),
}

impl From<&[u8]> for NotificationEvent {
    fn from(code: &[u8]) -> Self {
        match code {
            [0x07, 0x80] => Self::Install,
            [0x06, 0x40] => Self::Enable,
            [0x05, 0x20] => Self::Disable,
            [0x04, 0x10] => Self::Delete,
            other => Self::Other(other.to_vec()),
        }
    }
}

impl NotificationEvent {
    /// Enable and disable notifications are the ones a rotation leaves behind, and the
    /// only ones cleared; everything else is left for whoever else consumes them.
    pub fn is_consumed(&self) -> bool {
        matches!(self, Self::Enable | Self::Disable)
    }
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct Notification {
    /// 0x80: Sequence number, as used to remove the notification.
    pub sequence_number: Vec<u8>,
    /// 0x81: Event code (see [`NotificationEvent`]).
    pub event_code: Vec<u8>,
    /// 0x0C: Address of the SM-DP+ the notification is destined for.
    pub smdp_address: String,
    /// 0x5A: ICCID of the profile concerned, on-wire form.
    pub iccid: Iccid,
}

/// A notification slated for removal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingDeletion {
    pub sequence_number: Vec<u8>,
    pub iccid: Iccid,
    pub smdp_address: String,
}

impl Notification {
    /// Decodes the body of one `BF2F` record.
    pub fn decode_record(mut record: &[u8]) -> Self {
        let mut slf = Self::default();
        while let Some((&tag, rest)) = record.split_first() {
            if !matches!(tag, TAG_SEQ_NUMBER | TAG_EVENT | TAG_SMDP_ADDRESS | TAG_ICCID) {
                trace!(tag, "Unknown tag in notification record, stopping");
                break;
            }
            let (rest, value) = match ber::parse_short_value(rest) {
                Ok(v) => v,
                Err(err) => {
                    debug!(tag, err = %ber::TlvError::from(err), "Truncated notification record");
                    break;
                }
            };
            match tag {
                TAG_SEQ_NUMBER => slf.sequence_number = value.to_vec(),
                TAG_EVENT => slf.event_code = value.to_vec(),
                TAG_SMDP_ADDRESS => {
                    slf.smdp_address = encoding_rs::UTF_8
                        .decode_without_bom_handling(value)
                        .0
                        .into_owned()
                }
                _ => slf.iccid = Iccid::from_wire(value),
            }
            record = rest;
        }
        slf
    }

    pub fn event(&self) -> NotificationEvent {
        self.event_code.as_slice().into()
    }

    /// The deletion to issue for this notification, if it's one we clear. A record
    /// without a sequence number can't be removed, so it never qualifies.
    pub fn pending_deletion(&self) -> Option<PendingDeletion> {
        if self.sequence_number.is_empty() || !self.event().is_consumed() {
            return None;
        }
        Some(PendingDeletion {
            sequence_number: self.sequence_number.clone(),
            iccid: self.iccid.clone(),
            smdp_address: self.smdp_address.clone(),
        })
    }
}

/// Extracts every notification record from a ListNotification response, in order.
pub fn decode_notifications(response: &[u8]) -> Vec<Notification> {
    let mut notifications = Vec::new();
    let mut index = 0;
    while let Some(pos) = ber::find_first_tag(response, &TAG_NOTIFICATION_METADATA, index) {
        let len_at = pos + TAG_NOTIFICATION_METADATA.len();
        let Some(&len) = response.get(len_at) else {
            debug!(pos, "Notification record without a length");
            break;
        };
        let start = len_at + 1;
        let end = (start + len as usize).min(response.len());
        notifications.push(Notification::decode_record(&response[start..end]));
        index = end;
    }
    notifications
}

pub fn pending_deletions(notifications: &[Notification]) -> Vec<PendingDeletion> {
    notifications
        .iter()
        .filter_map(Notification::pending_deletion)
        .collect()
}

/// RemoveNotificationFromList result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, IntoPrimitive, FromPrimitive)]
#[repr(u8)]
pub enum DeleteResult {
    Success = 0,
    NothingToDelete = 1,
    UndefinedError = 127,
    #[num_enum(catch_all)]
    Other(u8),
}
