//! Decide which change groups need a presubmit run.

use crate::change::{Change, ClPatchsets};
use crate::group::{ChangeGroup, Grouping};

/// True if any member is unknown to `previous` or has moved past the
/// patchset recorded there.
pub fn has_new_member(previous: &ClPatchsets, members: &[Change]) -> bool {
    members.iter().any(|c| match previous.get(&c.number) {
        None => true,
        Some(&seen) => seen < c.patchset,
    })
}

/// Groups from `current` that contain at least one new or updated change.
///
/// An empty `previous` means there is no baseline, and nothing is returned.
pub fn new_groups(previous: &ClPatchsets, current: &[ChangeGroup]) -> Vec<ChangeGroup> {
    if previous.is_empty() {
        return Vec::new();
    }
    current
        .iter()
        .filter(|g| has_new_member(previous, &g.changes))
        .cloned()
        .collect()
}

/// Like [`new_groups`], but also filters rejected multi-part sets so each
/// broken set is reported only when one of its members changes.
pub fn new_grouping(previous: &ClPatchsets, current: &Grouping) -> Grouping {
    if previous.is_empty() {
        return Grouping::default();
    }
    Grouping {
        groups: new_groups(previous, &current.groups),
        errors: current
            .errors
            .iter()
            .filter(|e| has_new_member(previous, &e.members))
            .cloned()
            .collect(),
    }
}
