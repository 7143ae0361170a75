//! The eUICC's ISD-R (Issuer Security Domain - Root), as seen through a logical channel.
//!
//! The ES10 functions used here are all carried in STORE DATA commands, and answered
//! with BER-TLV structures defined by GSMA SGP.22. Only the handful needed to rotate
//! between installed profiles are implemented.

pub mod command;
pub mod notification;
pub mod profile;

use crate::ber::{self, TlvError};
use crate::transceiver::{self, Channel, DEFAULT_MAX_CONTINUATIONS};
use crate::{Error, Result};
use std::fmt;
use tracing::{debug, trace_span, warn};

pub use notification::{Notification, NotificationEvent, PendingDeletion};
pub use profile::ProfileEntry;

/// An ICCID, kept in its on-wire form: BCD with the nibbles of each byte swapped.
///
/// The wire form is what goes back into commands. [`fmt::Display`] gives the
/// human-readable digits, for logs and stored state only.
#[derive(Debug, Default, Clone, PartialEq, Eq, Hash)]
pub struct Iccid(Vec<u8>);

impl Iccid {
    pub fn from_wire<B: Into<Vec<u8>>>(bytes: B) -> Self {
        Self(bytes.into())
    }

    pub fn as_wire(&self) -> &[u8] {
        &self.0
    }

    pub fn wire_hex(&self) -> String {
        hex::encode(&self.0)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Display for Iccid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for b in &self.0 {
            write!(f, "{:x}{:x}", b & 0x0F, b >> 4)?;
        }
        Ok(())
    }
}

/// Pulls the single-byte result code (tag 0x80) out of an ES10 response wrapped in `outer`.
pub(crate) fn result_code(data: &[u8], outer: &[u8]) -> Result<u8> {
    let node = ber::decode(data)?;
    if node.tag != outer {
        return Err(TlvError::MissingTag(outer.to_vec()).into());
    }
    node.find(&[0x80])
        .and_then(|n| n.bytes())
        .and_then(|v| v.first().copied())
        .ok_or_else(|| TlvError::MissingTag(vec![0x80]).into())
}

/// ES10 functions over an open channel to the ISD-R.
#[derive(Debug)]
pub struct Euicc<C: Channel> {
    channel: C,
    max_continuations: usize,
}

impl<C: Channel> Euicc<C> {
    pub fn new(channel: C) -> Self {
        Self {
            channel,
            max_continuations: DEFAULT_MAX_CONTINUATIONS,
        }
    }

    pub fn with_max_continuations(mut self, max_continuations: usize) -> Self {
        self.max_continuations = max_continuations;
        self
    }

    pub fn into_inner(self) -> C {
        self.channel
    }

    fn call(&mut self, cmd: &crate::apdu::ApduCommand) -> Result<Vec<u8>> {
        let rsp = transceiver::transmit_chained(&mut self.channel, cmd, self.max_continuations)?;
        if !rsp.status.is_success() {
            return Err(Error::Status(rsp.status));
        }
        Ok(rsp.data)
    }

    /// Probes for the EID. Anything but a BF3E response means this isn't an eUICC
    /// we can talk to.
    ///
    /// Past the first byte the response is only read for the EID itself, leniently;
    /// an EID that can't be found is `None`, not an error.
    pub fn eid(&mut self) -> Result<Option<Vec<u8>>> {
        let span = trace_span!("eid");
        let _enter = span.enter();

        let rsp = transceiver::transmit(&mut self.channel, &command::get_eid()?)?;
        if rsp.data.first() != Some(&0xBF) {
            return Err(Error::NoEidFound(format!(
                "{}{:02x}{:02x}",
                hex::encode(&rsp.data),
                rsp.status.0,
                rsp.status.1
            )));
        }
        let eid = ber::find_first_tag(&rsp.data, &[0x5A], 0)
            .and_then(|at| ber::parse_short_value(&rsp.data[at + 1..]).ok())
            .map(|(_, eid)| eid.to_vec());
        if eid.is_none() {
            warn!(rsp = hex::encode(&rsp.data), "No EID in GetEID response");
        }
        Ok(eid)
    }

    /// ListNotification (BF28), all notifications.
    pub fn notifications(&mut self) -> Result<Vec<Notification>> {
        let span = trace_span!("notifications");
        let _enter = span.enter();

        let data = self.call(&command::list_notifications()?)?;
        let notifications = notification::decode_notifications(&data);
        debug!(count = notifications.len(), "Read notifications");
        Ok(notifications)
    }

    /// RemoveNotificationFromList (BF30). As with enabling, a response without a
    /// readable result code is taken at its status word.
    pub fn delete_notification(&mut self, seq: &[u8]) -> Result<notification::DeleteResult> {
        let data = self.call(&command::delete_notification(seq)?)?;
        match result_code(&data, &command::TAG_DELETE_NOTIFICATION) {
            Ok(code) => Ok(code.into()),
            Err(err) => {
                warn!(%err, rsp = hex::encode(&data), "Couldn't read RemoveNotification result");
                Ok(notification::DeleteResult::Success)
            }
        }
    }

    /// GetProfilesInfo (BF2D), asking for ICCID and state only.
    pub fn profiles(&mut self) -> Result<Vec<ProfileEntry>> {
        let span = trace_span!("profiles");
        let _enter = span.enter();

        let data = self.call(&command::list_profiles()?)?;
        let profiles = profile::decode_profiles(&data)?;
        debug!(count = profiles.len(), "Read profiles");
        Ok(profiles)
    }

    /// EnableProfile (BF31). A response without a readable result code is taken at
    /// its status word, which has already been checked.
    pub fn enable_profile(&mut self, iccid: &Iccid, refresh: bool) -> Result<profile::EnableResult> {
        let data = self.call(&command::enable_profile(iccid, refresh)?)?;
        match result_code(&data, &command::TAG_ENABLE_PROFILE) {
            Ok(code) => Ok(code.into()),
            Err(err) => {
                warn!(%err, rsp = hex::encode(&data), "Couldn't read EnableProfile result");
                Ok(profile::EnableResult::Success)
            }
        }
    }
}
