use std::collections::HashSet;
use std::fmt;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Duration, Utc};
use md5::{Digest, Md5};
use serde::{Deserialize, Serialize};
use tokio::fs;

use crate::error::LedgerError;
use crate::layers::PaperRecord;

/// Number of fingerprints kept across runs.
pub const SEEN_CAP: usize = 5000;

/// Identity of a paper for dedup purposes: MD5 of the lower-cased title.
///
/// Different arXiv records (revisions, cross-lists) of the same paper share a
/// title, so the title rather than the identifier decides sameness.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Fingerprint(String);

impl Fingerprint {
    pub fn of(paper: &PaperRecord) -> Self {
        Self::of_title(&paper.title)
    }

    pub fn of_title(title: &str) -> Self {
        let mut hasher = Md5::new();
        hasher.update(title.to_lowercase().as_bytes());
        Self(format!("{:x}", hasher.finalize()))
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Fingerprints emitted by earlier runs, oldest first.
#[derive(Debug, Clone, Default)]
pub struct SeenSet {
    order: Vec<Fingerprint>,
    index: HashSet<Fingerprint>,
}

impl SeenSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contains(&self, fingerprint: &Fingerprint) -> bool {
        self.index.contains(fingerprint)
    }

    /// Appends a fingerprint; returns false if it was already present.
    pub fn insert(&mut self, fingerprint: Fingerprint) -> bool {
        if !self.index.insert(fingerprint.clone()) {
            return false;
        }
        self.order.push(fingerprint);
        true
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    /// The newest `cap` fingerprints, oldest first.
    pub fn newest(&self, cap: usize) -> &[Fingerprint] {
        let start = self.order.len().saturating_sub(cap);
        &self.order[start..]
    }
}

impl Extend<Fingerprint> for SeenSet {
    fn extend<I: IntoIterator<Item = Fingerprint>>(&mut self, iter: I) {
        for fingerprint in iter {
            self.insert(fingerprint);
        }
    }
}

impl FromIterator<Fingerprint> for SeenSet {
    fn from_iter<I: IntoIterator<Item = Fingerprint>>(iter: I) -> Self {
        let mut seen = Self::new();
        seen.extend(iter);
        seen
    }
}

/// The persisted seen-papers file: a JSON array of fingerprint strings.
pub struct Ledger {
    path: PathBuf,
}

impl Ledger {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Loads prior history. Any failure means "no history".
    pub async fn load(&self) -> SeenSet {
        match self.try_load().await {
            Ok(seen) if seen.is_empty() => {
                tracing::info!("Ledger {:?} is empty", self.path);
                seen
            }
            Ok(seen) => {
                tracing::info!("Loaded {} seen fingerprints from {:?}", seen.len(), self.path);
                seen
            }
            Err(LedgerError::Io(e)) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::info!("No ledger at {:?}, starting with empty history", self.path);
                SeenSet::new()
            }
            Err(e) => {
                tracing::warn!("Could not read ledger {:?}, starting with empty history: {}", self.path, e);
                SeenSet::new()
            }
        }
    }

    async fn try_load(&self) -> Result<SeenSet, LedgerError> {
        let raw = fs::read_to_string(&self.path).await?;
        let fingerprints: Vec<Fingerprint> = serde_json::from_str(&raw)?;
        Ok(fingerprints.into_iter().collect())
    }

    fn staging_path(&self) -> PathBuf {
        let mut name = self.path.file_name().map(|n| n.to_os_string()).unwrap_or_default();
        name.push(".tmp");
        self.path.with_file_name(name)
    }

    /// Writes the newest [`SEEN_CAP`] fingerprints.
    pub async fn save(&self, seen: &SeenSet) -> Result<(), LedgerError> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).await?;
        }
        let kept = seen.newest(SEEN_CAP);
        let json = serde_json::to_string(kept)?;
        // Replace in one step so an interrupted save leaves the old ledger intact.
        let staging = self.staging_path();
        fs::write(&staging, json).await?;
        fs::rename(&staging, &self.path).await?;
        tracing::info!("Saved {} fingerprints to {:?}", kept.len(), self.path);
        Ok(())
    }
}

/// Per-run admission: a record is new if neither earlier runs nor earlier
/// topics of this run emitted it, and it is recent.
pub struct DedupFilter<'a> {
    seen: &'a SeenSet,
    admitted: Vec<Fingerprint>,
    admitted_index: HashSet<Fingerprint>,
    lookback_days: u32,
    now: DateTime<Utc>,
}

impl<'a> DedupFilter<'a> {
    pub fn new(seen: &'a SeenSet, lookback_days: u32, now: DateTime<Utc>) -> Self {
        Self {
            seen,
            admitted: Vec::new(),
            admitted_index: HashSet::new(),
            lookback_days,
            now,
        }
    }

    pub fn is_new(&self, paper: &PaperRecord) -> bool {
        let fingerprint = Fingerprint::of(paper);
        !self.seen.contains(&fingerprint) && !self.admitted_index.contains(&fingerprint)
    }

    /// Admits the record if it is new and recent, claiming its fingerprint
    /// immediately so later topics see it as taken.
    pub fn admit(&mut self, paper: &PaperRecord) -> bool {
        if !self.is_new(paper) || !is_recent(paper, self.lookback_days, self.now) {
            return false;
        }
        let fingerprint = Fingerprint::of(paper);
        tracing::debug!("Admitted {} ({})", paper.title, fingerprint);
        self.admitted_index.insert(fingerprint.clone());
        self.admitted.push(fingerprint);
        true
    }

    /// Fingerprints admitted so far, in admission order.
    pub fn into_admitted(self) -> Vec<Fingerprint> {
        self.admitted
    }
}

/// True if `updated`, or failing that `published`, is within the window.
/// An unparsable field is skipped, never decisive on its own.
pub fn is_recent(paper: &PaperRecord, lookback_days: u32, now: DateTime<Utc>) -> bool {
    // A window reaching past the representable range admits any parsed date.
    let cutoff = Duration::try_days(i64::from(lookback_days)).and_then(|d| now.checked_sub_signed(d));
    [paper.updated_at(), paper.published_at()]
        .into_iter()
        .flatten()
        .any(|at| cutoff.map_or(true, |cutoff| at >= cutoff))
}
