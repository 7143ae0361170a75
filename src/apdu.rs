//! Raw command and response APDUs, as described by ISO/IEC 7816-4.

use crate::{Error, Result};
use std::fmt;

/// A raw command APDU: `CLA INS P1 P2 [Lc Data] [Le]`.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ApduCommand {
    /// Class- and instruction bytes. The class also carries the logical channel number.
    pub cla: u8,
    pub ins: u8,

    /// Arguments to the command.
    pub p1: u8,
    pub p2: u8,

    /// Command data. Lc is derived from this when serializing.
    pub data: Vec<u8>,

    /// Expected response length, where 0 = 256. Omitted from the wire when unset.
    pub le: Option<u8>,
}

impl ApduCommand {
    pub fn new<D: Into<Vec<u8>>>(cla: u8, ins: u8, p1: u8, p2: u8, data: D) -> Self {
        Self {
            cla,
            ins,
            p1,
            p2,
            data: data.into(),
            le: None,
        }
    }

    pub fn expect(mut self, le: u8) -> Self {
        self.le = Some(le);
        self
    }

    /// Serializes the command. Short APDUs only; a body over 255 bytes is refused.
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        let mut buf = Vec::with_capacity(5 + self.data.len() + 1);
        buf.extend_from_slice(&[self.cla, self.ins, self.p1, self.p2]);
        if !self.data.is_empty() {
            let lc = u8::try_from(self.data.len()).map_err(|_| {
                Error::HardwareIo(format!(
                    "command body too long: {} > {}",
                    self.data.len(),
                    u8::MAX
                ))
            })?;
            buf.push(lc);
            buf.extend_from_slice(&self.data);
        }
        if let Some(le) = self.le {
            buf.push(le);
        }
        Ok(buf)
    }
}

impl fmt::Display for ApduCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "cla={:02X} ins={:02X} p1={:02X} p2={:02X} Lc={} Le={:?}",
            self.cla,
            self.ins,
            self.p1,
            self.p2,
            self.data.len(),
            self.le
        )
    }
}

/// A raw response APDU.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApduResponse {
    /// Response data.
    pub data: Vec<u8>,
    /// Status word; (0x90, 0x00) is success.
    pub status: Status,
}

impl ApduResponse {
    /// Splits a raw response into payload and trailing status word.
    pub fn parse(raw: &[u8]) -> Result<Self> {
        let (sw2, data) = raw
            .split_last()
            .ok_or_else(|| Error::HardwareIo("response truncated: no SW2".into()))?;
        let (sw1, data) = data
            .split_last()
            .ok_or_else(|| Error::HardwareIo("response truncated: no SW1".into()))?;
        Ok(Self {
            data: data.to_vec(),
            status: Status(*sw1, *sw2),
        })
    }
}

/// A status word, SW1 and SW2.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Status(pub u8, pub u8);

impl Status {
    pub const OK: Self = Self(0x90, 0x00);

    /// 0x9000, or 0x91XX (OK, with a proactive command pending on the eUICC).
    pub fn is_success(&self) -> bool {
        matches!(self.0, 0x90 | 0x91)
    }

    /// Whether the card signals that more response data follows.
    ///
    /// The ISD-R firmware this talks to flags continuation with SW1 = 0x6A (a
    /// wrong-parameter class in ISO 7816-4) rather than 0x61. The literal byte
    /// is what's checked here; do not swap it for 0x61 without hardware traces.
    pub fn is_continuation(&self) -> bool {
        self.0 == crate::transceiver::CONTINUATION_MARKER
    }

    pub fn describe(&self) -> &'static str {
        match (self.0, self.1) {
            (0x90, 0x00) => "OK",
            (0x91, _) => "OK, proactive command pending",
            (0x61, _) => "OK, bytes remaining",
            (0x62, 0x82) => "end of file or record reached",
            (0x63, 0xC0..=0xCF) => "counter",
            (0x64, 0x82) => "logical channel opening access denied",
            (0x65, 0x81) => "memory failure",
            (0x67, _) => "wrong length",
            (0x68, 0x81) => "logical channel not supported",
            (0x68, 0x84) => "command chaining not supported",
            (0x69, 0x82) => "security status not satisfied",
            (0x69, 0x85) => "conditions of use not satisfied",
            (0x69, 0x99) => "applet selection failed",
            (0x6A, 0x80) => "incorrect parameters in the command data field",
            (0x6A, 0x82) => "file or application not found",
            (0x6A, 0x86) => "wrong parameters P1-P2",
            (0x6A, 0x88) => "referenced data not found",
            (0x6B, 0x00) => "wrong parameters P1-P2",
            (0x6C, _) => "wrong Le",
            (0x6D, 0x00) => "instruction not supported",
            (0x6E, 0x00) => "class not supported",
            (0x6F, 0x00) => "no precise diagnosis",
            _ => "unknown status",
        }
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:02X}{:02X} ({})", self.0, self.1, self.describe())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn write_header_only() -> Result<()> {
        let buf = ApduCommand::new(0x00, 0xA4, 0x12, 0x34, vec![]).to_bytes()?;
        assert_eq!(&buf, &[0x00, 0xA4, 0x12, 0x34]);
        Ok(())
    }

    #[test]
    fn write_le_only() -> Result<()> {
        let buf = ApduCommand::new(0x81, 0xC0, 0x00, 0x00, vec![])
            .expect(0x88)
            .to_bytes()?;
        assert_eq!(&buf, &[0x81, 0xC0, 0x00, 0x00, 0x88]);
        Ok(())
    }

    #[test]
    fn write_body_without_le() -> Result<()> {
        let buf = ApduCommand::new(0x81, 0xE2, 0x91, 0x00, vec![0xBF, 0x28, 0x00]).to_bytes()?;
        assert_eq!(hex::encode(buf), "81e2910003bf2800");
        Ok(())
    }

    #[test]
    fn write_body_and_le() -> Result<()> {
        let buf = ApduCommand::new(0x00, 0xA4, 0x04, 0x00, vec![0x56, 0x78])
            .expect(0x00)
            .to_bytes()?;
        assert_eq!(&buf, &[0x00, 0xA4, 0x04, 0x00, 0x02, 0x56, 0x78, 0x00]);
        Ok(())
    }

    #[test]
    fn write_body_too_long() {
        let body = vec![0x69; 512];
        match ApduCommand::new(0x00, 0xA4, 0x12, 0x34, body).to_bytes() {
            Err(Error::HardwareIo(msg)) => assert!(msg.contains("512"), "{}", msg),
            v => panic!("wrong result: {:?}", v),
        }
    }

    #[test]
    fn parse_status_only() -> Result<()> {
        let res = ApduResponse::parse(&[0x90, 0x00])?;
        assert_eq!(
            res,
            ApduResponse {
                data: vec![],
                status: Status::OK,
            }
        );
        Ok(())
    }

    #[test]
    fn parse_body() -> Result<()> {
        let res = ApduResponse::parse(&[0x12, 0x34, 0x56, 0x78, 0x6A, 0x10])?;
        assert_eq!(res.data, vec![0x12, 0x34, 0x56, 0x78]);
        assert_eq!(res.status, Status(0x6A, 0x10));
        assert!(res.status.is_continuation());
        assert!(!res.status.is_success());
        Ok(())
    }

    #[test]
    fn parse_truncated() {
        assert!(matches!(
            ApduResponse::parse(&[0x90]),
            Err(Error::HardwareIo(_))
        ));
        assert!(matches!(ApduResponse::parse(&[]), Err(Error::HardwareIo(_))));
    }

    #[test]
    fn standard_more_data_is_not_continuation() {
        // 0x61XX is the textbook "more data" status; this firmware doesn't use it.
        assert!(!Status(0x61, 0x10).is_continuation());
    }

    #[test]
    fn status_display() {
        assert_eq!(
            Status(0x6A, 0x88).to_string(),
            "6A88 (referenced data not found)"
        );
        assert!(Status(0x91, 0x0C).is_success());
    }
}
