//! Detect CI builds superseded by newer patchsets.

use std::collections::BTreeSet;

use crate::change::{ClPatchsets, ClRef};
use crate::error::Result;

/// Parse the colon-joined refs a build was started with.
pub fn parse_build_refs(refs: &str) -> Result<ClPatchsets> {
    let mut cls = ClPatchsets::new();
    for r in refs.split(':') {
        let cl: ClRef = r.parse()?;
        cls.insert(cl.number, cl.patchset);
    }
    Ok(cls)
}

/// Whether a build started with `build_refs` is made stale by `group_cls`,
/// the change numbers and patchsets of a group about to be tested.
///
/// When the build covers a different set of changes than the group (a part
/// joined or left a multi-part set), the build is outdated as soon as one
/// shared change is at the same or a newer patchset in the group. For
/// example a build of `{1000/1}` is outdated by a group `{1000/2, 2000/1}`.
///
/// When the sets match, the build is outdated only if every member of the
/// group is at or past the build's patchset.
pub fn is_build_outdated(build_refs: &str, group_cls: &ClPatchsets) -> Result<bool> {
    let build_cls = parse_build_refs(build_refs)?;

    let build_numbers: BTreeSet<u64> = build_cls.keys().copied().collect();
    let group_numbers: BTreeSet<u64> = group_cls.keys().copied().collect();

    if build_numbers != group_numbers {
        let overlapping_newer = build_cls.iter().any(|(number, &built)| {
            group_cls
                .get(number)
                .is_some_and(|&current| current >= built)
        });
        return Ok(overlapping_newer);
    }

    Ok(group_cls
        .iter()
        .all(|(number, &current)| current >= build_cls[number]))
}
