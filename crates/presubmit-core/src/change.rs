//! Open review changes and the ref strings that identify their patchsets.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use std::sync::OnceLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::{PresubmitError, Result};

/// Map from change number to the patchset known for it.
pub type ClPatchsets = BTreeMap<u64, u64>;

// ---------------------------------------------------------------------------
// Refs
// ---------------------------------------------------------------------------

/// A `(change number, patchset)` pair in ref form:
/// `refs/changes/<last two digits>/<number>/<patchset>`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ClRef {
    pub number: u64,
    pub patchset: u64,
}

impl ClRef {
    pub fn new(number: u64, patchset: u64) -> Self {
        Self { number, patchset }
    }
}

impl fmt::Display for ClRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "refs/changes/{:02}/{}/{}",
            self.number % 100,
            self.number,
            self.patchset
        )
    }
}

impl FromStr for ClRef {
    type Err = PresubmitError;

    /// Only the last two path segments are interpreted; the ref must have
    /// exactly five segments.
    fn from_str(s: &str) -> Result<Self> {
        let parts: Vec<&str> = s.split('/').collect();
        if parts.len() != 5 {
            return Err(PresubmitError::RefParse(format!(
                "{s:?}: expected 5 parts, got {}",
                parts.len()
            )));
        }
        let number = parts[3]
            .parse::<u64>()
            .map_err(|e| PresubmitError::RefParse(format!("{s:?}: change number: {e}")))?;
        let patchset = parts[4]
            .parse::<u64>()
            .map_err(|e| PresubmitError::RefParse(format!("{s:?}: patchset: {e}")))?;
        Ok(Self { number, patchset })
    }
}

// ---------------------------------------------------------------------------
// Commit message markers
// ---------------------------------------------------------------------------

/// Position of a change inside a multi-part set, from a `MultiPart: i/n` line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MultiPartMarker {
    pub index: u32,
    pub total: u32,
}

fn multi_part_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"MultiPart:\s*(\d+)\s*/\s*(\d+)").expect("valid regex"))
}

fn presubmit_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"PresubmitTest:\s*(\S+)").expect("valid regex"))
}

fn auto_submit_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?m)^\s*AutoSubmit\s*$").expect("valid regex"))
}

/// Extract the multi-part marker from a commit message.
///
/// The `MultiPart:` label is required; a bare `1/2` is ordinary text.
pub fn parse_multi_part(message: &str) -> Option<MultiPartMarker> {
    let caps = multi_part_re().captures(message)?;
    let index = caps[1].parse().ok()?;
    let total = caps[2].parse().ok()?;
    Some(MultiPartMarker { index, total })
}

/// Whether presubmit tests run for a change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PresubmitDirective {
    #[default]
    Run,
    /// `PresubmitTest: none` in the commit message.
    Skip,
}

/// Read the `PresubmitTest:` directive from a commit message.
pub fn parse_presubmit_directive(message: &str) -> PresubmitDirective {
    match presubmit_re().captures(message) {
        Some(caps) if caps[1].eq_ignore_ascii_case("none") => PresubmitDirective::Skip,
        _ => PresubmitDirective::Run,
    }
}

/// Whether the owner asked for the change to land once it is approved, with
/// an `AutoSubmit` line in the commit message.
pub fn parse_auto_submit(message: &str) -> bool {
    auto_submit_re().is_match(message)
}

// ---------------------------------------------------------------------------
// Change
// ---------------------------------------------------------------------------

/// One open change as returned by a review-server query.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Change {
    /// Review-server change id (`I...`).
    pub change_id: String,
    pub number: u64,
    pub patchset: u64,
    pub project: String,
    pub owner_email: String,
    /// Fetchable ref; empty when the server did not report one.
    pub reference: String,
    /// Topic shared by the members of a multi-part set.
    pub topic: Option<String>,
    pub message: String,
    pub presubmit: PresubmitDirective,
    pub multi_part: Option<MultiPartMarker>,
    pub auto_submit: bool,
    /// The review server reports the current patchset as ready to land.
    pub submittable: bool,
}

impl Change {
    /// A change at `number/patchset` with a canonical reference and an
    /// empty commit message.
    pub fn new(number: u64, patchset: u64, project: impl Into<String>) -> Self {
        Self {
            change_id: String::new(),
            number,
            patchset,
            project: project.into(),
            owner_email: String::new(),
            reference: ClRef::new(number, patchset).to_string(),
            topic: None,
            message: String::new(),
            presubmit: PresubmitDirective::Run,
            multi_part: None,
            auto_submit: false,
            submittable: false,
        }
    }

    pub fn with_change_id(mut self, change_id: impl Into<String>) -> Self {
        self.change_id = change_id.into();
        self
    }

    pub fn with_owner(mut self, email: impl Into<String>) -> Self {
        self.owner_email = email.into();
        self
    }

    pub fn with_reference(mut self, reference: impl Into<String>) -> Self {
        self.reference = reference.into();
        self
    }

    pub fn with_topic(mut self, topic: impl Into<String>) -> Self {
        let topic = topic.into();
        self.topic = if topic.is_empty() { None } else { Some(topic) };
        self
    }

    /// Set the commit message and re-derive the markers it carries.
    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = message.into();
        self.presubmit = parse_presubmit_directive(&self.message);
        self.multi_part = parse_multi_part(&self.message);
        self.auto_submit = parse_auto_submit(&self.message);
        self
    }

    pub fn with_submittable(mut self, submittable: bool) -> Self {
        self.submittable = submittable;
        self
    }

    /// Asked to land and cleared to land.
    pub fn ready_to_submit(&self) -> bool {
        self.auto_submit && self.submittable && !self.reference.is_empty()
    }

    pub fn cl_ref(&self) -> ClRef {
        ClRef::new(self.number, self.patchset)
    }

    /// Short human form, `<number>/<patchset>`.
    pub fn label(&self) -> String {
        format!("{}/{}", self.number, self.patchset)
    }
}
