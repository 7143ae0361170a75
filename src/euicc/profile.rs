//! Profile list from GetProfilesInfo (BF2D) responses.
//!
//! We only ever ask for the ICCID and state of each profile, which makes every
//! ProfileInfo element exactly `E3 10 5A 0A <iccid> 9F70 01 <state>`. The decoder
//! leans on that: it splits the response on `E3 10` instead of walking the tree.

use crate::ber::{self, TlvError};
use crate::euicc::Iccid;
use crate::Result;
use num_enum::{FromPrimitive, IntoPrimitive};
use tracing::trace;

/// A ProfileInfo element restricted to ICCID and state.
pub const PROFILE_INFO_MARKER: [u8; 2] = [0xE3, 0x10];

const TAG_ICCID: u8 = 0x5A;
const TAG_PROFILE_STATE: [u8; 3] = [0x9F, 0x70, 0x01];

/// One installed profile. Order in the list is the rotation order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProfileEntry {
    pub iccid: Iccid,
    pub enabled: bool,
}

impl ProfileEntry {
    fn decode_segment(segment: &[u8]) -> Result<Option<Self>> {
        let Some(at) = segment.iter().position(|&b| b == TAG_ICCID) else {
            trace!(segment = hex::encode(segment), "ProfileInfo without an ICCID");
            return Ok(None);
        };
        let (_, iccid) = ber::parse_short_value(&segment[at + 1..]).map_err(TlvError::from)?;

        // profileState: 0 = disabled, 1 = enabled.
        let enabled = ber::find_first_tag(segment, &TAG_PROFILE_STATE, 0)
            .and_then(|p| segment.get(p + TAG_PROFILE_STATE.len()))
            .map_or(false, |state| state & 0x0F == 1);

        Ok(Some(Self {
            iccid: Iccid::from_wire(iccid),
            enabled,
        }))
    }
}

/// Decodes every profile in a GetProfilesInfo response, in response order.
///
/// Whatever precedes the first ProfileInfo (the `BF2D` and `A0` headers) is dropped.
/// A segment with no ICCID is skipped; one whose ICCID runs off the end is an error.
pub fn decode_profiles(response: &[u8]) -> Result<Vec<ProfileEntry>> {
    let mut starts = Vec::new();
    let mut index = 0;
    while let Some(pos) = ber::find_first_tag(response, &PROFILE_INFO_MARKER, index) {
        index = pos + PROFILE_INFO_MARKER.len();
        starts.push(index);
    }

    let mut profiles = Vec::with_capacity(starts.len());
    for (i, &start) in starts.iter().enumerate() {
        let end = starts
            .get(i + 1)
            .map_or(response.len(), |next| next - PROFILE_INFO_MARKER.len());
        if let Some(entry) = ProfileEntry::decode_segment(&response[start..end])? {
            profiles.push(entry);
        }
    }
    Ok(profiles)
}

/// EnableProfile result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, IntoPrimitive, FromPrimitive)]
#[repr(u8)]
pub enum EnableResult {
    Success = 0,
    IccidOrAidNotFound = 1,
    ProfileNotInDisabledState = 2,
    DisallowedByPolicy = 3,
    WrongProfileReenabling = 4,
    CatBusy = 5,
    UndefinedError = 127,
    #[num_enum(catch_all)]
    Other(u8),
}
