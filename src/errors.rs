use crate::apdu::Status;
use crate::ber::TlvError;
use crate::euicc::profile::EnableResult;
use thiserror::Error;

pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Everything that can go wrong while processing one reader. None of these are
/// fatal to a rotation pass; they're recorded against the reader and the pass
/// moves on.
#[derive(Debug, Error)]
pub enum Error {
    /// A decoder found an inconsistent length or tag.
    #[error("malformed TLV: {0}")]
    MalformedTlv(#[from] TlvError),

    /// The continuation loop exceeded its cap.
    #[error("response chaining exceeded {0} continuations")]
    ChainingExhausted(usize),

    /// Security/authorization failure opening or using the logical channel.
    #[error("logical channel unavailable: {0}")]
    ChannelUnavailable(String),

    /// The EID probe didn't come back with a BF3E response.
    #[error("no EID found (probe response: {0})")]
    NoEidFound(String),

    /// Transport-level failure talking to the reader.
    #[error("hardware I/O: {0}")]
    HardwareIo(String),

    /// The session service or a session on it couldn't be established.
    #[error("unable to open a connection: {0}")]
    ConnectionFailed(String),

    /// The card answered with a non-success status word.
    #[error("card returned {0}")]
    Status(Status),

    /// The card refused to enable the selected profile.
    #[error("enable profile rejected: {0:?}")]
    EnableRejected(EnableResult),
}

impl Error {
    /// The short, user-visible status recorded against a reader when its pass fails.
    pub fn status_message(&self) -> &'static str {
        match self {
            Self::MalformedTlv(_) => "Malformed response",
            Self::ChainingExhausted(_) => "Response chaining exhausted",
            Self::ChannelUnavailable(_) => "ARA-M not supported",
            Self::NoEidFound(_) => "No EID Found",
            Self::HardwareIo(_) => "Card unavailable",
            Self::ConnectionFailed(_) => "Unable to open a connection",
            Self::Status(_) => "Failed",
            Self::EnableRejected(_) => "Enable rejected",
        }
    }
}
