//! Sending commands down a logical channel, and stitching chained responses together.

use crate::apdu::{ApduCommand, ApduResponse};
use crate::Result;
use tracing::{debug, trace, trace_span};

/// SW1 the ISD-R uses to say "more data follows, fetch it with Le = SW2".
pub const CONTINUATION_MARKER: u8 = 0x6A;

/// Default cap on continuation commands for a single logical response.
pub const DEFAULT_MAX_CONTINUATIONS: usize = 64;

/// An open logical channel to the ISD-R on one reader.
///
/// Implementations own the hardware timeout; a transmit never blocks forever.
pub trait Channel {
    /// Sends a raw command APDU and returns the raw response, status word included.
    fn transmit(&mut self, command: &[u8]) -> Result<Vec<u8>>;
}

impl<C: Channel + ?Sized> Channel for &mut C {
    fn transmit(&mut self, command: &[u8]) -> Result<Vec<u8>> {
        (**self).transmit(command)
    }
}

impl<C: Channel + ?Sized> Channel for Box<C> {
    fn transmit(&mut self, command: &[u8]) -> Result<Vec<u8>> {
        (**self).transmit(command)
    }
}

/// The continuation command: `81 C0 00 00 Le`.
pub fn continuation(le: u8) -> ApduCommand {
    ApduCommand::new(0x81, 0xC0, 0x00, 0x00, vec![]).expect(le)
}

/// Sends one command and reads one response.
pub fn transmit<C: Channel + ?Sized>(channel: &mut C, command: &ApduCommand) -> Result<ApduResponse> {
    let req = command.to_bytes()?;
    trace!(req = hex::encode(&req), ">> TX");
    let rsp = channel.transmit(&req)?;
    trace!(rsp = hex::encode(&rsp), "<< RX");
    ApduResponse::parse(&rsp)
}

/// Sends a command, then keeps issuing continuation commands for as long as the
/// card answers with the continuation marker in SW1, up to `max_continuations`.
///
/// The returned response carries every payload concatenated in order, and the
/// status word of the final response.
pub fn transmit_chained<C: Channel + ?Sized>(
    channel: &mut C,
    command: &ApduCommand,
    max_continuations: usize,
) -> Result<ApduResponse> {
    let span = trace_span!("transmit_chained");
    let _enter = span.enter();

    let mut rsp = transmit(channel, command)?;
    let mut data = std::mem::take(&mut rsp.data);
    let mut continuations = 0;
    while rsp.status.is_continuation() {
        if continuations == max_continuations {
            return Err(crate::Error::ChainingExhausted(max_continuations));
        }
        continuations += 1;
        debug!(le = rsp.status.1, continuations, "Fetching continuation");
        rsp = transmit(channel, &continuation(rsp.status.1))?;
        data.append(&mut rsp.data);
    }
    trace!(data = hex::encode(&data), status = %rsp.status, "Chained response");
    Ok(ApduResponse {
        data,
        status: rsp.status,
    })
}
