//! PC/SC host adapter: readers are PC/SC readers, channels are ISO 7816 logical
//! channels opened with MANAGE CHANNEL.

use crate::apdu::{ApduCommand, ApduResponse, Status};
use crate::service::{Reader, SeService};
use crate::transceiver::Channel;
use crate::{Error, Result};
use std::ffi::CString;
use tracing::{debug, trace, trace_span, warn};

/// How many 61XX/6CXX procedure rounds a single command may take.
const MAX_PROCEDURE_ROUNDS: usize = 16;

impl From<::pcsc::Error> for Error {
    fn from(err: ::pcsc::Error) -> Self {
        use ::pcsc::Error as E;
        match err {
            E::NoService | E::ServiceStopped | E::NoReadersAvailable | E::UnknownReader => {
                Error::ConnectionFailed(err.to_string())
            }
            _ => Error::HardwareIo(err.to_string()),
        }
    }
}

/// A PC/SC context, listing every connected reader.
pub struct PcscService {
    ctx: ::pcsc::Context,
}

impl PcscService {
    pub fn establish() -> Result<Self> {
        trace!(scope = "user", "pcsc::Context::establish()");
        Ok(Self {
            ctx: ::pcsc::Context::establish(::pcsc::Scope::User)?,
        })
    }

    pub fn reader_names(&self) -> Result<Vec<String>> {
        Ok(self
            .ctx
            .list_readers_owned()?
            .into_iter()
            .map(|name| name.to_string_lossy().into_owned())
            .collect())
    }
}

impl SeService for PcscService {
    type Reader = PcscReader;

    fn readers(&self) -> Result<Vec<PcscReader>> {
        let span = trace_span!("readers");
        let _enter = span.enter();

        let readers: Vec<_> = self
            .ctx
            .list_readers_owned()?
            .into_iter()
            .map(|name| PcscReader {
                ctx: self.ctx.clone(),
                name: name.to_string_lossy().into_owned(),
                cname: name,
            })
            .collect();
        debug!(count = readers.len(), "Listed readers");
        Ok(readers)
    }
}

pub struct PcscReader {
    ctx: ::pcsc::Context,
    name: String,
    cname: CString,
}

impl Reader for PcscReader {
    type Channel = PcscChannel;

    fn name(&self) -> &str {
        &self.name
    }

    fn open_channel(&mut self, aid: &[u8]) -> Result<PcscChannel> {
        let span = trace_span!("open_channel", reader = %self.name);
        let _enter = span.enter();

        debug!("Connecting to reader");
        let card = self.ctx.connect(
            &self.cname,
            ::pcsc::ShareMode::Shared,
            ::pcsc::Protocols::ANY,
        )?;
        if let Ok(atr) = card.get_attribute_owned(::pcsc::Attribute::AtrString) {
            debug!(atr = hex::encode_upper(atr), "Connected");
        }

        let mut channel = PcscChannel { card, number: 0 };
        let rsp = channel.exec(ApduCommand::new(0x00, 0x70, 0x00, 0x00, vec![]).expect(1))?;
        let number = match (rsp.status.is_success(), rsp.data.first()) {
            (true, Some(&n)) if (1..4).contains(&n) => n,
            (true, Some(&n)) => {
                // Closed again by the drop.
                channel.number = n;
                return Err(Error::ChannelUnavailable(format!(
                    "logical channel {} can't be addressed",
                    n
                )));
            }
            _ => return Err(Error::ChannelUnavailable(format!("MANAGE CHANNEL: {}", rsp.status))),
        };
        channel.number = number;
        debug!(number, "Opened logical channel");

        let rsp = channel.exec(ApduCommand::new(0x00, 0xA4, 0x04, 0x00, aid).expect(0))?;
        match rsp.status {
            s if s.is_success() => {
                debug!(aid = hex::encode_upper(aid), "Selected applet");
                Ok(channel)
            }
            Status(0x69, 0x99) | Status(0x6A, 0x82) | Status(0x69, 0x82) | Status(0x69, 0x85) => {
                Err(Error::ChannelUnavailable(format!("SELECT: {}", rsp.status)))
            }
            s => Err(Error::Status(s)),
        }
    }
}

/// A logical channel on a card. Closed when dropped.
pub struct PcscChannel {
    card: ::pcsc::Card,
    number: u8,
}

/// Rewrites the channel bits of a class byte. Proprietary classes (0x80) keep
/// their high bits.
fn logical_cla(cla: u8, number: u8) -> u8 {
    (cla & !0x03) | number
}

/// Sends a command, resolving T=0 procedure bytes on the way: 61XX is followed by
/// GET RESPONSE, 6CXX by a resend with the corrected Le.
fn exchange<F>(mut req: Vec<u8>, number: u8, mut send: F) -> Result<Vec<u8>>
where
    F: FnMut(&[u8]) -> Result<Vec<u8>>,
{
    let mut data = Vec::new();
    for _ in 0..MAX_PROCEDURE_ROUNDS {
        let rsp = send(&req)?;
        let Some(split) = rsp.len().checked_sub(2) else {
            return Err(Error::HardwareIo(format!(
                "response too short: {}",
                hex::encode(&rsp)
            )));
        };
        let (body, sw) = rsp.split_at(split);
        match (sw[0], sw[1]) {
            (0x61, le) => {
                trace!(le, "GET RESPONSE");
                data.extend_from_slice(body);
                req = vec![logical_cla(0x00, number), 0xC0, 0x00, 0x00, le];
            }
            (0x6C, le) => {
                trace!(le, "Resending with corrected Le");
                if has_le(&req) {
                    let last = req.len() - 1;
                    req[last] = le;
                } else {
                    req.push(le);
                }
            }
            _ => {
                data.extend_from_slice(&rsp);
                return Ok(data);
            }
        }
    }
    Err(Error::HardwareIo(format!(
        "no final status after {} procedure rounds",
        MAX_PROCEDURE_ROUNDS
    )))
}

/// Whether a short command APDU ends in an Le byte (case 2 or case 4).
fn has_le(req: &[u8]) -> bool {
    match req.len() {
        0..=4 => false,
        5 => true,
        len => len == 6 + req[4] as usize,
    }
}

impl PcscChannel {
    fn transmit_raw(&mut self, req: &[u8]) -> Result<Vec<u8>> {
        let mut buf = [0; ::pcsc::MAX_BUFFER_SIZE_EXTENDED];
        Ok(self.card.transmit(req, &mut buf)?.to_vec())
    }

    fn exec(&mut self, cmd: ApduCommand) -> Result<ApduResponse> {
        let req = cmd.to_bytes()?;
        ApduResponse::parse(&self.transmit(&req)?)
    }
}

impl Channel for PcscChannel {
    fn transmit(&mut self, command: &[u8]) -> Result<Vec<u8>> {
        let mut req = command.to_vec();
        if let Some(cla) = req.first_mut() {
            *cla = logical_cla(*cla, self.number);
        }
        let number = self.number;
        exchange(req, number, |req| self.transmit_raw(req))
    }
}

impl Drop for PcscChannel {
    fn drop(&mut self) {
        if self.number == 0 {
            return;
        }
        let req = [self.number, 0x70, 0x80, self.number];
        match self.transmit_raw(&req) {
            Ok(rsp) => trace!(rsp = hex::encode(rsp), number = self.number, "Closed logical channel"),
            Err(err) => warn!(%err, number = self.number, "Couldn't close logical channel"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;

    fn scripted(responses: &[&str]) -> (VecDeque<Vec<u8>>, Vec<String>) {
        (
            responses.iter().map(|r| hex::decode(r).unwrap()).collect(),
            Vec::new(),
        )
    }

    #[test]
    fn class_bytes() {
        assert_eq!(logical_cla(0x00, 1), 0x01);
        assert_eq!(logical_cla(0x81, 1), 0x81);
        assert_eq!(logical_cla(0x81, 2), 0x82);
        assert_eq!(logical_cla(0x80, 3), 0x83);
    }

    #[test]
    fn procedure_bytes() -> Result<()> {
        let (mut rsps, mut sent) = scripted(&["0102610a", "6c05", "03049000"]);
        let rsp = exchange(hex::decode("81e2910003bf2800").unwrap(), 2, |req| {
            sent.push(hex::encode(req));
            Ok(rsps.pop_front().unwrap())
        })?;
        assert_eq!(hex::encode(rsp), "010203049000");
        assert_eq!(sent, vec!["81e2910003bf2800", "02c000000a", "02c0000005"]);
        Ok(())
    }

    #[test]
    fn wrong_le_without_le() -> Result<()> {
        let (mut rsps, mut sent) = scripted(&["6c10", "0a0b9000"]);
        let rsp = exchange(hex::decode("00a40400025678").unwrap(), 0, |req| {
            sent.push(hex::encode(req));
            Ok(rsps.pop_front().unwrap())
        })?;
        assert_eq!(hex::encode(rsp), "0a0b9000");
        assert_eq!(sent, vec!["00a40400025678", "00a4040002567810"]);
        Ok(())
    }

    #[test]
    fn wrong_le_replaces_le() -> Result<()> {
        let (mut rsps, mut sent) = scripted(&["6c08", "9000"]);
        exchange(hex::decode("00a4040002567800").unwrap(), 0, |req| {
            sent.push(hex::encode(req));
            Ok(rsps.pop_front().unwrap())
        })?;
        assert_eq!(sent, vec!["00a4040002567800", "00a4040002567808"]);
        Ok(())
    }

    #[test]
    fn le_presence() {
        assert!(!has_le(&[0x00, 0x70, 0x00, 0x00]));
        assert!(has_le(&[0x00, 0xC0, 0x00, 0x00, 0x10]));
        assert!(!has_le(&[0x00, 0xA4, 0x04, 0x00, 0x01, 0xAA]));
        assert!(has_le(&[0x00, 0xA4, 0x04, 0x00, 0x01, 0xAA, 0x00]));
    }

    #[test]
    fn continuation_marker_passes_through() -> Result<()> {
        let (mut rsps, _) = scripted(&["01026a10"]);
        let rsp = exchange(vec![0x81, 0xE2, 0x91, 0x00], 1, |_| Ok(rsps.pop_front().unwrap()))?;
        assert_eq!(rsp, vec![0x01, 0x02, 0x6A, 0x10]);
        Ok(())
    }

    #[test]
    fn endless_procedure_bytes() {
        let result = exchange(vec![0x00, 0xC0, 0x00, 0x00, 0x00], 1, |_| Ok(vec![0x61, 0x00]));
        assert!(matches!(result, Err(Error::HardwareIo(_))));
    }
}
