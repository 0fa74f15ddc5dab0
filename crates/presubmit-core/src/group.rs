//! Partition open changes into groups that are tested together.
//!
//! A change without a `MultiPart:` marker is a group on its own. Changes
//! carrying the marker are collected by topic and must form a complete set
//! (indices `1..=total`, one change each); an incomplete or inconsistent set
//! is returned as a [`MultiPartError`] instead of a group.

use std::collections::HashMap;

use serde::Serialize;

use crate::change::{Change, ClPatchsets};

/// An ordered, non-empty list of changes tested as one unit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChangeGroup {
    pub changes: Vec<Change>,
}

impl ChangeGroup {
    pub fn single(change: Change) -> Self {
        Self {
            changes: vec![change],
        }
    }

    pub fn len(&self) -> usize {
        self.changes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.changes.is_empty()
    }

    pub fn refs(&self) -> Vec<String> {
        self.changes.iter().map(|c| c.reference.clone()).collect()
    }

    pub fn projects(&self) -> Vec<String> {
        self.changes.iter().map(|c| c.project.clone()).collect()
    }

    /// Change number to patchset for every member.
    pub fn cl_patchsets(&self) -> ClPatchsets {
        self.changes.iter().map(|c| (c.number, c.patchset)).collect()
    }

    /// Comma-separated `number/patchset` labels, for log lines.
    pub fn describe(&self) -> String {
        self.changes
            .iter()
            .map(Change::label)
            .collect::<Vec<_>>()
            .join(", ")
    }
}

/// Why a multi-part set was rejected.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum MultiPartIssue {
    #[error("topic {topic:?} has {found} of {total} parts")]
    Incomplete {
        topic: String,
        total: u32,
        found: usize,
    },

    #[error("{reference} declares {found} parts, expected {expected}")]
    TotalMismatch {
        reference: String,
        expected: u32,
        found: u32,
    },

    #[error("{reference} has part index {found}, expected {expected}")]
    IndexMismatch {
        reference: String,
        expected: u32,
        found: u32,
    },
}

/// A multi-part set that cannot be tested, attributed to one of its changes.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("multi-part CL {}: {issue}", .change.reference)]
pub struct MultiPartError {
    /// The change the error is reported on.
    pub change: Change,
    /// Every currently open member of the set.
    pub members: Vec<Change>,
    pub issue: MultiPartIssue,
}

/// Result of grouping: testable groups plus rejected multi-part sets.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Grouping {
    pub groups: Vec<ChangeGroup>,
    pub errors: Vec<MultiPartError>,
}

impl Grouping {
    pub fn is_empty(&self) -> bool {
        self.groups.is_empty() && self.errors.is_empty()
    }
}

enum Slot {
    Single(Change),
    Topic(String),
}

/// Group `changes`, preserving the order in which each group's first member
/// appears. Changes without a fetchable reference are dropped.
pub fn group_changes(changes: &[Change]) -> Grouping {
    let mut slots = Vec::new();
    let mut topics: HashMap<String, Vec<Change>> = HashMap::new();

    for change in changes {
        if change.reference.is_empty() {
            continue;
        }
        if change.multi_part.is_none() {
            slots.push(Slot::Single(change.clone()));
            continue;
        }
        let topic = change.topic.clone().unwrap_or_default();
        let members = topics.entry(topic.clone()).or_default();
        if members.is_empty() {
            slots.push(Slot::Topic(topic));
        }
        members.push(change.clone());
    }

    let mut grouping = Grouping::default();
    for slot in slots {
        match slot {
            Slot::Single(change) => grouping.groups.push(ChangeGroup::single(change)),
            Slot::Topic(topic) => {
                let members = topics.remove(&topic).unwrap_or_default();
                match assemble_multi_part(&topic, members) {
                    Ok(group) => grouping.groups.push(group),
                    Err(err) => grouping.errors.push(err),
                }
            }
        }
    }
    grouping
}

fn assemble_multi_part(
    topic: &str,
    mut members: Vec<Change>,
) -> Result<ChangeGroup, MultiPartError> {
    members.sort_by_key(|c| c.multi_part.map(|m| m.index).unwrap_or_default());

    let reject = |change: &Change, members: &[Change], issue| MultiPartError {
        change: change.clone(),
        members: members.to_vec(),
        issue,
    };

    let first = &members[0];
    let total = first.multi_part.map(|m| m.total).unwrap_or_default();

    for change in &members {
        let found = change.multi_part.map(|m| m.total).unwrap_or_default();
        if found != total {
            let issue = MultiPartIssue::TotalMismatch {
                reference: change.reference.clone(),
                expected: total,
                found,
            };
            return Err(reject(change, &members, issue));
        }
    }

    if members.len() != total as usize {
        let issue = MultiPartIssue::Incomplete {
            topic: topic.to_string(),
            total,
            found: members.len(),
        };
        return Err(reject(first, &members, issue));
    }

    for (expected, change) in (1..=total).zip(&members) {
        let found = change.multi_part.map(|m| m.index).unwrap_or_default();
        if found != expected {
            let issue = MultiPartIssue::IndexMismatch {
                reference: change.reference.clone(),
                expected,
                found,
            };
            return Err(reject(change, &members, issue));
        }
    }

    Ok(ChangeGroup { changes: members })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn part(number: u64, topic: &str, index: u32, total: u32) -> Change {
        Change::new(number, 1, "core")
            .with_topic(topic)
            .with_message(format!("work\n\nMultiPart: {index}/{total}"))
    }

    #[test]
    fn test_plain_changes_are_singletons() {
        let changes = vec![Change::new(1, 1, "a"), Change::new(2, 3, "b")];
        let grouping = group_changes(&changes);
        assert!(grouping.errors.is_empty());
        assert_eq!(grouping.groups.len(), 2);
        assert_eq!(grouping.groups[1].describe(), "2/3");
    }

    #[test]
    fn test_complete_set_is_ordered_by_index() {
        let changes = vec![
            part(30, "topic", 3, 3),
            Change::new(5, 1, "other"),
            part(10, "topic", 1, 3),
            part(20, "topic", 2, 3),
        ];
        let grouping = group_changes(&changes);
        assert!(grouping.errors.is_empty());
        assert_eq!(grouping.groups.len(), 2);
        // The set sits where its first member appeared.
        assert_eq!(grouping.groups[0].describe(), "10/1, 20/1, 30/1");
        assert_eq!(grouping.groups[1].describe(), "5/1");
    }

    #[test]
    fn test_incomplete_set_is_an_error() {
        let changes = vec![part(10, "topic", 1, 2), Change::new(5, 1, "other")];
        let grouping = group_changes(&changes);
        assert_eq!(grouping.groups.len(), 1);
        assert_eq!(grouping.errors.len(), 1);
        let err = &grouping.errors[0];
        assert_eq!(err.change.number, 10);
        assert!(matches!(
            err.issue,
            MultiPartIssue::Incomplete { total: 2, found: 1, .. }
        ));
        assert!(err.to_string().contains("refs/changes/10/10/1"));
    }

    #[test]
    fn test_total_mismatch_names_offender() {
        let changes = vec![part(10, "t", 1, 2), part(20, "t", 2, 3)];
        let grouping = group_changes(&changes);
        assert!(grouping.groups.is_empty());
        let err = &grouping.errors[0];
        assert_eq!(err.change.number, 20);
        assert_eq!(err.members.len(), 2);
    }

    #[test]
    fn test_duplicate_index_is_an_error() {
        let changes = vec![part(10, "t", 1, 2), part(20, "t", 1, 2)];
        let grouping = group_changes(&changes);
        assert!(grouping.groups.is_empty());
        assert!(matches!(
            grouping.errors[0].issue,
            MultiPartIssue::IndexMismatch {
                expected: 2,
                found: 1,
                ..
            }
        ));
    }

    #[test]
    fn test_topics_are_kept_apart() {
        let changes = vec![
            part(10, "a", 1, 2),
            part(20, "b", 1, 1),
            part(11, "a", 2, 2),
        ];
        let grouping = group_changes(&changes);
        assert!(grouping.errors.is_empty());
        assert_eq!(grouping.groups.len(), 2);
        assert_eq!(grouping.groups[0].describe(), "10/1, 11/1");
        assert_eq!(grouping.groups[1].describe(), "20/1");
    }

    #[test]
    fn test_change_without_ref_is_dropped() {
        let changes = vec![Change::new(1, 1, "a").with_reference("")];
        assert!(group_changes(&changes).is_empty());
    }
}
