//! BIDS file naming and session numbering.
//!
//! Paths follow the BIDS layout:
//!
//! ```text
//! <root>/sub-<label>/ses-<label>/[<datatype>/]sub-<label>_ses-<label>_task-<label>[_acq-<label>][_run-<index>]_<suffix><extension>
//! ```

use std::collections::BTreeSet;
use std::fs::{self, File, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};

use fs2::FileExt;
use thiserror::Error;
use tracing::{debug, info};

/// Lock file taken at the dataset root while a session number is claimed.
pub const LOCK_FILE: &str = ".triggersync.lock";

#[derive(Error, Debug)]
pub enum BidsError {
    #[error("Invalid {entity} label '{label}': labels must be non-empty and alphanumeric")]
    InvalidLabel { entity: &'static str, label: String },

    #[error("Output file already exists: {}", .0.display())]
    AlreadyExists(PathBuf),

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

pub type BidsResult<T> = Result<T, BidsError>;

/// Validate a label, stripping an optional `<entity>-` prefix.
pub fn normalize_label(entity: &'static str, label: &str) -> BidsResult<String> {
    let trimmed = label.trim();
    let prefix = format!("{}-", entity);
    let bare = trimmed.strip_prefix(&prefix).unwrap_or(trimmed);
    if bare.is_empty() || !bare.chars().all(|c| c.is_ascii_alphanumeric()) {
        return Err(BidsError::InvalidLabel {
            entity,
            label: label.to_string(),
        });
    }
    Ok(bare.to_string())
}

#[derive(Debug, Clone, PartialEq)]
pub struct BidsPath {
    pub root: PathBuf,
    pub subject: String,
    pub session: Option<String>,
    pub task: Option<String>,
    pub acquisition: Option<String>,
    pub run: Option<u32>,
    pub datatype: Option<String>,
    pub suffix: String,
    pub extension: String,
}

impl BidsPath {
    /// A QTM recording path (`_qtm.qtm`) for the given subject.
    pub fn new(root: impl Into<PathBuf>, subject: &str) -> BidsResult<Self> {
        Ok(Self {
            root: root.into(),
            subject: normalize_label("sub", subject)?,
            session: None,
            task: None,
            acquisition: None,
            run: None,
            datatype: None,
            suffix: "qtm".to_string(),
            extension: ".qtm".to_string(),
        })
    }

    pub fn with_session(mut self, session: &str) -> BidsResult<Self> {
        self.session = Some(normalize_label("ses", session)?);
        Ok(self)
    }

    pub fn with_task(mut self, task: &str) -> BidsResult<Self> {
        self.task = Some(normalize_label("task", task)?);
        Ok(self)
    }

    pub fn with_acquisition(mut self, acquisition: &str) -> BidsResult<Self> {
        self.acquisition = Some(normalize_label("acq", acquisition)?);
        Ok(self)
    }

    pub fn with_run(mut self, run: u32) -> Self {
        self.run = Some(run);
        self
    }

    pub fn with_datatype(mut self, datatype: &str) -> BidsResult<Self> {
        self.datatype = Some(normalize_label("datatype", datatype)?);
        Ok(self)
    }

    /// Entities joined with `_`, without suffix or extension.
    pub fn stem(&self) -> String {
        let mut parts = vec![format!("sub-{}", self.subject)];
        if let Some(ref session) = self.session {
            parts.push(format!("ses-{}", session));
        }
        if let Some(ref task) = self.task {
            parts.push(format!("task-{}", task));
        }
        if let Some(ref acq) = self.acquisition {
            parts.push(format!("acq-{}", acq));
        }
        if let Some(run) = self.run {
            parts.push(format!("run-{:02}", run));
        }
        parts.join("_")
    }

    pub fn basename(&self) -> String {
        format!("{}_{}{}", self.stem(), self.suffix, self.extension)
    }

    pub fn directory(&self) -> PathBuf {
        let mut dir = self.root.join(format!("sub-{}", self.subject));
        if let Some(ref session) = self.session {
            dir = dir.join(format!("ses-{}", session));
        }
        if let Some(ref datatype) = self.datatype {
            dir = dir.join(datatype);
        }
        dir
    }

    pub fn fpath(&self) -> PathBuf {
        self.directory().join(self.basename())
    }
}

/// Collect the `ses-*` entities already used by a subject.
fn existing_sessions(subject_dir: &Path) -> io::Result<BTreeSet<String>> {
    let mut sessions = BTreeSet::new();
    if !subject_dir.is_dir() {
        return Ok(sessions);
    }

    let mut stack = vec![subject_dir.to_path_buf()];
    while let Some(dir) = stack.pop() {
        for entry in fs::read_dir(&dir)? {
            let entry = entry?;
            let name = entry.file_name().to_string_lossy().to_string();
            let is_dir = entry.file_type()?.is_dir();

            if is_dir {
                if let Some(label) = name.strip_prefix("ses-") {
                    if !label.is_empty() {
                        sessions.insert(label.to_string());
                    }
                }
                stack.push(entry.path());
            } else {
                for part in name.split(['_', '.']) {
                    if let Some(label) = part.strip_prefix("ses-")
                        && !label.is_empty()
                    {
                        sessions.insert(label.to_string());
                    }
                }
            }
        }
    }

    Ok(sessions)
}

/// Next session label, `ses-01` style numbering after the sessions the subject
/// already has. Returns the bare label (`"03"`).
///
/// Numbering starts at the session count plus one and skips labels already in
/// use, so a gap left by a deleted session is never reused.
pub fn next_session(root: &Path, subject: &str) -> BidsResult<String> {
    let subject = normalize_label("sub", subject)?;
    let sessions = existing_sessions(&root.join(format!("sub-{}", subject)))?;
    debug!("Existing sessions for sub-{}: {:?}", subject, sessions);

    let mut number = sessions.len() + 1;
    while sessions.contains(&format!("{:02}", number)) {
        number += 1;
    }
    Ok(format!("{:02}", number))
}

/// Fail with [`BidsError::AlreadyExists`] if a recording is already at `path`.
pub fn ensure_new_output(path: &Path) -> BidsResult<()> {
    if path.exists() {
        return Err(BidsError::AlreadyExists(path.to_path_buf()));
    }
    Ok(())
}

/// Parameters of a new recording's path; the session is assigned on prepare.
#[derive(Debug, Clone, Default)]
pub struct SessionRequest {
    pub root: PathBuf,
    pub subject: String,
    pub task: String,
    pub acquisition: Option<String>,
    pub run: Option<u32>,
    pub datatype: Option<String>,
}

impl SessionRequest {
    fn build(&self, session: &str) -> BidsResult<BidsPath> {
        let mut path = BidsPath::new(&self.root, &self.subject)?
            .with_session(session)?
            .with_task(&self.task)?;
        if let Some(ref acq) = self.acquisition {
            path = path.with_acquisition(acq)?;
        }
        if let Some(run) = self.run {
            path = path.with_run(run);
        }
        if let Some(ref datatype) = self.datatype {
            path = path.with_datatype(datatype)?;
        }
        Ok(path)
    }

    /// Compute the path the next session would get, touching nothing.
    pub fn plan(&self) -> BidsResult<BidsPath> {
        let session = next_session(&self.root, &self.subject)?;
        self.build(&session)
    }

    /// Claim the next session: create its directory and make sure the recording
    /// file does not exist yet. The dataset root is locked meanwhile so
    /// concurrent launches get distinct sessions.
    pub fn prepare(&self) -> BidsResult<BidsPath> {
        fs::create_dir_all(&self.root)?;
        let lock = lock_root(&self.root)?;

        let path = self.plan()?;
        let fpath = path.fpath();
        ensure_new_output(&fpath)?;
        fs::create_dir_all(path.directory())?;

        lock.unlock()?;
        info!("Prepared BIDS path {}", fpath.display());
        Ok(path)
    }
}

fn lock_root(root: &Path) -> io::Result<File> {
    let file = OpenOptions::new()
        .create(true)
        .truncate(false)
        .write(true)
        .open(root.join(LOCK_FILE))?;
    file.lock_exclusive()?;
    Ok(file)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn request(root: &Path) -> SessionRequest {
        SessionRequest {
            root: root.to_path_buf(),
            subject: "01".to_string(),
            task: "walking".to_string(),
            ..Default::default()
        }
    }

    #[test]
    fn test_basename_follows_entity_order() {
        let path = BidsPath::new("/data", "sub-01")
            .unwrap()
            .with_session("02")
            .unwrap()
            .with_task("walking")
            .unwrap()
            .with_acquisition("fast")
            .unwrap()
            .with_run(3);
        assert_eq!(path.basename(), "sub-01_ses-02_task-walking_acq-fast_run-03_qtm.qtm");
        assert_eq!(path.directory(), PathBuf::from("/data/sub-01/ses-02"));
    }

    #[test]
    fn test_datatype_adds_directory_level() {
        let path = BidsPath::new("/data", "P1")
            .unwrap()
            .with_session("01")
            .unwrap()
            .with_datatype("motion")
            .unwrap();
        assert_eq!(path.fpath(), PathBuf::from("/data/sub-P1/ses-01/motion/sub-P1_ses-01_qtm.qtm"));
    }

    #[test]
    fn test_labels_are_validated() {
        assert_eq!(normalize_label("task", "task-walking").unwrap(), "walking");
        assert!(matches!(
            normalize_label("sub", "john_doe"),
            Err(BidsError::InvalidLabel { entity: "sub", .. })
        ));
        assert!(normalize_label("ses", "sub-01").is_err());
        assert!(normalize_label("sub", "").is_err());
        assert!(normalize_label("sub", "sub-").is_err());
    }

    #[test]
    fn test_first_session_is_01() {
        let tmp = TempDir::new().unwrap();
        assert_eq!(next_session(tmp.path(), "01").unwrap(), "01");
    }

    #[test]
    fn test_next_session_counts_directories_and_files() {
        let tmp = TempDir::new().unwrap();
        let subject = tmp.path().join("sub-01");
        fs::create_dir_all(subject.join("ses-01")).unwrap();
        fs::create_dir_all(subject.join("ses-02/motion")).unwrap();
        File::create(subject.join("ses-02/motion/sub-01_ses-02_task-walking_qtm.qtm")).unwrap();
        // A session known only from a file name
        File::create(subject.join("sub-01_ses-pilot_scans.tsv")).unwrap();

        assert_eq!(next_session(tmp.path(), "sub-01").unwrap(), "04");
        // Other subjects are independent
        assert_eq!(next_session(tmp.path(), "02").unwrap(), "01");
    }

    #[test]
    fn test_next_session_skips_labels_in_use() {
        let tmp = TempDir::new().unwrap();
        let subject = tmp.path().join("sub-01");
        fs::create_dir_all(subject.join("ses-01")).unwrap();
        fs::create_dir_all(subject.join("ses-03")).unwrap();
        File::create(subject.join("ses-03/sub-01_ses-03_task-walking_qtm.qtm")).unwrap();

        assert_eq!(next_session(tmp.path(), "01").unwrap(), "04");

        let first = request(tmp.path()).prepare().unwrap();
        assert_eq!(first.session.as_deref(), Some("04"));
        // ses-01, ses-03 and ses-04 taken
        let second = request(tmp.path()).prepare().unwrap();
        assert_eq!(second.session.as_deref(), Some("05"));
    }

    #[test]
    fn test_existing_output_is_rejected() {
        let tmp = TempDir::new().unwrap();
        let recording = tmp.path().join("take1.qtm");
        assert!(ensure_new_output(&recording).is_ok());

        File::create(&recording).unwrap();
        match ensure_new_output(&recording) {
            Err(BidsError::AlreadyExists(path)) => assert_eq!(path, recording),
            other => panic!("expected AlreadyExists, got {:?}", other),
        }
    }

    #[test]
    fn test_prepare_creates_session_directory() {
        let tmp = TempDir::new().unwrap();
        let first = request(tmp.path()).prepare().unwrap();
        assert_eq!(first.session.as_deref(), Some("01"));
        assert!(first.directory().is_dir());
        assert!(!first.fpath().exists());

        let second = request(tmp.path()).prepare().unwrap();
        assert_eq!(second.session.as_deref(), Some("02"));
        assert_eq!(
            second.fpath(),
            tmp.path().join("sub-01/ses-02/sub-01_ses-02_task-walking_qtm.qtm")
        );
    }

    #[test]
    fn test_plan_touches_nothing() {
        let tmp = TempDir::new().unwrap();
        let planned = request(tmp.path()).plan().unwrap();
        assert_eq!(planned.session.as_deref(), Some("01"));
        assert!(!planned.directory().exists());
    }

    #[test]
    fn test_invalid_subject_fails_before_creating_anything() {
        let tmp = TempDir::new().unwrap();
        let mut req = request(tmp.path());
        req.subject = "bad label".to_string();
        assert!(matches!(req.prepare(), Err(BidsError::InvalidLabel { .. })));
        assert!(!tmp.path().join("sub-bad label").exists());
    }
}
