use crate::euicc::ProfileEntry;

/// Picks the profile to enable next: the one after the first enabled profile,
/// wrapping around to the head of the list.
///
/// If nothing is enabled, or the enabled profile is the last one, the head wins.
/// This is also true when the head is the only profile. Returns `None` only for an
/// empty list.
pub fn select_next(profiles: &[ProfileEntry]) -> Option<&ProfileEntry> {
    let mut found_active = false;
    for profile in profiles {
        if found_active {
            return Some(profile);
        }
        if profile.enabled {
            found_active = true;
        }
    }
    profiles.first()
}
