//! Command APDUs for the ISD-R.

use crate::apdu::ApduCommand;
use crate::ber::TlvNode;
use crate::euicc::Iccid;
use crate::Result;

/// AID of the ISD-R, as selected when the logical channel is opened.
pub const ISD_R_AID: [u8; 16] = [
    0xA0, 0x00, 0x00, 0x05, 0x59, 0x10, 0x10, 0xFF, 0xFF, 0xFF, 0xFF, 0x89, 0x00, 0x00, 0x01,
    0x00,
];

pub const TAG_GET_EID: [u8; 2] = [0xBF, 0x3E];
pub const TAG_LIST_NOTIFICATION: [u8; 2] = [0xBF, 0x28];
pub const TAG_PROFILES_INFO: [u8; 2] = [0xBF, 0x2D];
pub const TAG_DELETE_NOTIFICATION: [u8; 2] = [0xBF, 0x30];
pub const TAG_ENABLE_PROFILE: [u8; 2] = [0xBF, 0x31];

const TAG_TAG_LIST: u8 = 0x5C;
const TAG_ICCID: u8 = 0x5A;
const TAG_PROFILE_STATE: [u8; 2] = [0x9F, 0x70];

/// STORE DATA, last (only) block, on logical channel 1 with the proprietary class.
fn store_data(function: TlvNode) -> Result<ApduCommand> {
    Ok(ApduCommand::new(0x81, 0xE2, 0x91, 0x00, function.encode()?))
}

/// GetEUICCData, asking only for the EID.
pub fn get_eid() -> Result<ApduCommand> {
    store_data(TlvNode::constructed(
        TAG_GET_EID,
        vec![TlvNode::primitive([TAG_TAG_LIST], [TAG_ICCID])],
    ))
}

/// ListNotification, with no filter.
pub fn list_notifications() -> Result<ApduCommand> {
    store_data(TlvNode::constructed(TAG_LIST_NOTIFICATION, vec![]))
}

/// GetProfilesInfo, asking for the ICCID and profile state of every profile.
pub fn list_profiles() -> Result<ApduCommand> {
    let mut tags = vec![TAG_ICCID];
    tags.extend_from_slice(&TAG_PROFILE_STATE);
    store_data(TlvNode::constructed(
        TAG_PROFILES_INFO,
        vec![TlvNode::primitive([TAG_TAG_LIST], tags)],
    ))
}

/// RemoveNotificationFromList: `BF30 L 80 L <seq>`.
pub fn delete_notification(seq: &[u8]) -> Result<ApduCommand> {
    store_data(TlvNode::constructed(
        TAG_DELETE_NOTIFICATION,
        vec![TlvNode::primitive([0x80], seq)],
    ))
}

/// EnableProfile by ICCID: `BF31 L A0 L 5A L <iccid> 81 01 <refresh>`.
///
/// The ICCID goes out exactly as it was read from the profile list.
pub fn enable_profile(iccid: &Iccid, refresh: bool) -> Result<ApduCommand> {
    store_data(TlvNode::constructed(
        TAG_ENABLE_PROFILE,
        vec![
            TlvNode::constructed(
                [0xA0],
                vec![TlvNode::primitive([TAG_ICCID], iccid.as_wire())],
            ),
            TlvNode::primitive([0x81], [refresh as u8]),
        ],
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ber::TlvError;
    use crate::Error;

    fn encode(cmd: Result<ApduCommand>) -> String {
        hex::encode(cmd.unwrap().to_bytes().unwrap())
    }

    #[test]
    fn fixed_commands() {
        assert_eq!(encode(get_eid()), "81e2910006bf3e035c015a");
        assert_eq!(encode(list_notifications()), "81e2910003bf2800");
        assert_eq!(encode(list_profiles()), "81e2910008bf2d055c035a9f70");
    }

    #[test]
    fn delete_notification_encoding() {
        assert_eq!(encode(delete_notification(&[0x22])), "81e2910006bf3003800122");
        assert_eq!(
            encode(delete_notification(&[0x01, 0x1d])),
            "81e2910007bf30048002011d"
        );
    }

    #[test]
    fn enable_profile_encoding() {
        let iccid = Iccid::from_wire(hex::decode("984474560000309161f5").unwrap());
        assert_eq!(
            encode(enable_profile(&iccid, true)),
            "81e2910014bf3111a00c5a0a984474560000309161f5810101"
        );
        assert_eq!(
            encode(enable_profile(&iccid, false)),
            "81e2910014bf3111a00c5a0a984474560000309161f5810100"
        );
    }

    #[test]
    fn oversized_sequence_number() {
        match delete_notification(&[0u8; 0x80]) {
            Err(Error::MalformedTlv(TlvError::ValueTooLong(_))) => {}
            v => panic!("wrong result: {:?}", v),
        }
    }

    #[test]
    fn isd_r_aid() {
        assert_eq!(
            hex::encode_upper(ISD_R_AID),
            "A0000005591010FFFFFFFF8900000100"
        );
    }
}
