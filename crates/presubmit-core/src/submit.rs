//! Landing approved changes whose owners asked for it.
//!
//! A group is submitted only as a whole: a singleton, or a complete
//! multi-part set, in which every member carries `AutoSubmit` and is
//! reported submittable by the review server.

use crate::change::Change;
use crate::error::Result;
use crate::group::{group_changes, ChangeGroup};
use crate::obs::emit_group_submitted;
use crate::traits::ReviewServer;

/// Groups of `changes` that may be submitted now, in query order.
///
/// Incomplete multi-part sets are never submittable, even when every part
/// present is approved.
pub fn submittable_groups(changes: &[Change]) -> Vec<ChangeGroup> {
    group_changes(changes)
        .groups
        .into_iter()
        .filter(|g| !g.is_empty() && g.changes.iter().all(Change::ready_to_submit))
        .collect()
}

/// Submit each group in turn and return the number of changes landed.
///
/// The first failure stops the pass and is returned; groups submitted before
/// it stay submitted.
pub async fn submit_groups(review: &dyn ReviewServer, groups: &[ChangeGroup]) -> Result<usize> {
    let mut submitted = 0;
    for group in groups {
        review.submit(&group.refs()).await?;
        emit_group_submitted(&group.describe());
        submitted += group.len();
    }
    Ok(submitted)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fakes::MemoryReviewServer;

    fn approved(number: u64) -> Change {
        Change::new(number, 1, "core")
            .with_message("fix\n\nAutoSubmit")
            .with_submittable(true)
    }

    fn part(number: u64, index: u32, total: u32) -> Change {
        Change::new(number, 1, "core")
            .with_topic("api")
            .with_message(format!("api\n\nMultiPart: {index}/{total}\nAutoSubmit"))
            .with_submittable(true)
    }

    #[test]
    fn test_only_ready_singletons_are_picked() {
        let changes = vec![
            approved(100),
            approved(101).with_submittable(false),
            Change::new(102, 1, "core").with_submittable(true),
        ];
        let groups = submittable_groups(&changes);
        assert_eq!(groups.len(), 1);
        assert_eq!(groups[0].describe(), "100/1");
    }

    #[test]
    fn test_multi_part_set_needs_every_member_ready() {
        let complete = vec![part(200, 1, 2), part(201, 2, 2)];
        assert_eq!(submittable_groups(&complete).len(), 1);

        let unapproved = vec![part(200, 1, 2), part(201, 2, 2).with_submittable(false)];
        assert!(submittable_groups(&unapproved).is_empty());

        let incomplete = vec![part(200, 1, 3), part(201, 2, 3)];
        assert!(submittable_groups(&incomplete).is_empty());
    }

    #[tokio::test]
    async fn test_submit_groups_counts_changes() {
        let review = MemoryReviewServer::new();
        let groups = submittable_groups(&[approved(100), part(200, 1, 2), part(201, 2, 2)]);

        let submitted = submit_groups(&review, &groups).await.unwrap();
        assert_eq!(submitted, 3);
        assert_eq!(
            review.submits(),
            vec![
                "refs/changes/00/100/1",
                "refs/changes/00/200/1",
                "refs/changes/01/201/1",
            ]
        );
    }

    #[tokio::test]
    async fn test_submit_failure_stops_the_pass() {
        let review = MemoryReviewServer::new();
        review.fail_submits_to("refs/changes/00/100/1");
        let groups = submittable_groups(&[approved(100), approved(101)]);

        assert!(submit_groups(&review, &groups).await.is_err());
        assert!(review.submits().is_empty());
    }
}
