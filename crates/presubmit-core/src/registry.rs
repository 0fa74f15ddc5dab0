//! Change registry persisted as a flat log of refs.
//!
//! The log holds one ref per line and describes the open changes seen by the
//! last successful run. It is read once at the start of a run and replaced
//! wholesale at the end; runs are serialized by the scheduler, so the file is
//! never locked.

use std::fs;
use std::io::{self, Write};
use std::path::Path;

use tempfile::NamedTempFile;
use tracing::debug;

use crate::change::{Change, ClPatchsets, ClRef};
use crate::error::{PresubmitError, Result};

/// Load the registry from `path`.
///
/// A missing file yields an empty registry. Blank lines are skipped; when a
/// change appears more than once the highest patchset wins.
pub fn load(path: &Path) -> Result<ClPatchsets> {
    let content = match fs::read_to_string(path) {
        Ok(content) => content,
        Err(e) if e.kind() == io::ErrorKind::NotFound => {
            debug!(path = %path.display(), "no presubmit log, starting empty");
            return Ok(ClPatchsets::new());
        }
        Err(e) => return Err(e.into()),
    };

    let mut cls = ClPatchsets::new();
    for (idx, line) in content.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let cl: ClRef = line.parse().map_err(|e: PresubmitError| PresubmitError::Parse {
            line: idx + 1,
            reason: e.to_string(),
        })?;
        let entry = cls.entry(cl.number).or_insert(cl.patchset);
        *entry = (*entry).max(cl.patchset);
    }
    Ok(cls)
}

/// Overwrite the log at `path` with the refs of `changes`. Changes the
/// review server reported without a ref are left out.
///
/// Writes go to a temp file in the same directory which is then renamed over
/// the log, so a crash leaves the previous log intact.
pub fn persist(path: &Path, changes: &[Change]) -> Result<()> {
    let mut cls = ClPatchsets::new();
    for change in changes.iter().filter(|c| !c.reference.is_empty()) {
        let entry = cls.entry(change.number).or_insert(change.patchset);
        *entry = (*entry).max(change.patchset);
    }
    persist_patchsets(path, &cls)
}

/// Overwrite the log at `path` with `cls`.
pub fn persist_patchsets(path: &Path, cls: &ClPatchsets) -> Result<()> {
    let dir = match path.parent() {
        Some(dir) if !dir.as_os_str().is_empty() => dir,
        _ => Path::new("."),
    };
    fs::create_dir_all(dir)?;

    let mut tmp = NamedTempFile::new_in(dir)?;
    for (&number, &patchset) in cls {
        writeln!(tmp, "{}", ClRef::new(number, patchset))?;
    }
    tmp.flush()?;
    tmp.persist(path).map_err(|e| e.error)?;

    debug!(path = %path.display(), entries = cls.len(), "presubmit log written");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_log_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let cls = load(&dir.path().join("absent")).unwrap();
        assert!(cls.is_empty());
    }

    #[test]
    fn test_persist_then_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("log");
        let changes = vec![
            Change::new(2000, 1, "tools"),
            Change::new(1000, 2, "core"),
        ];
        persist(&path, &changes).unwrap();

        let content = fs::read_to_string(&path).unwrap();
        assert_eq!(
            content,
            "refs/changes/00/1000/2\nrefs/changes/00/2000/1\n"
        );

        let cls = load(&path).unwrap();
        assert_eq!(cls, ClPatchsets::from([(1000, 2), (2000, 1)]));
    }

    #[test]
    fn test_persist_creates_parent_dir() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("tmp").join("log");
        persist(&path, &[Change::new(5, 1, "p")]).unwrap();
        assert_eq!(load(&path).unwrap(), ClPatchsets::from([(5, 1)]));
    }

    #[test]
    fn test_persist_replaces_previous_log() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("log");
        persist(&path, &[Change::new(1, 1, "p"), Change::new(2, 1, "p")]).unwrap();
        persist(&path, &[Change::new(3, 4, "p")]).unwrap();
        assert_eq!(load(&path).unwrap(), ClPatchsets::from([(3, 4)]));
    }

    #[test]
    fn test_load_skips_blank_lines_and_keeps_highest() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("log");
        fs::write(
            &path,
            "refs/changes/00/100/1\n\nrefs/changes/00/100/3\nrefs/changes/00/100/2\n",
        )
        .unwrap();
        assert_eq!(load(&path).unwrap(), ClPatchsets::from([(100, 3)]));
    }

    #[test]
    fn test_load_malformed_line_fails() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("log");
        fs::write(&path, "refs/changes/00/100/1\ngarbage\n").unwrap();
        match load(&path) {
            Err(PresubmitError::Parse { line, .. }) => assert_eq!(line, 2),
            other => panic!("expected Parse error, got {other:?}"),
        }
    }
}
