//! End-of-run summary, printed and optionally written as JSON

use crate::migration::{MigrationError, Mode, PairState};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fmt::Write as _;
use std::path::Path;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct Counts {
    pub succeeded: usize,
    pub skipped: usize,
    pub failed: usize,
}

impl Counts {
    pub fn total(&self) -> usize {
        self.succeeded + self.skipped + self.failed
    }
}

/// A message or folder that could not be transferred
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FailureEntry {
    pub folder: String,
    /// `uid 42`, a content hash, or empty for the folder itself
    pub item: String,
    #[serde(flatten)]
    pub error: MigrationError,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PairReport {
    pub label: String,
    pub mode: Mode,
    #[serde(flatten)]
    pub state: PairState,
    pub folders: Counts,
    pub messages: Counts,
    pub failures: Vec<FailureEntry>,
    /// Rendered folder tree for the listing modes
    #[serde(skip_serializing_if = "Option::is_none")]
    pub listing: Option<String>,
}

impl PairReport {
    pub fn new(label: &str, mode: Mode) -> Self {
        Self {
            label: label.to_string(),
            mode,
            state: PairState::NotStarted,
            folders: Counts::default(),
            messages: Counts::default(),
            failures: Vec::new(),
            listing: None,
        }
    }

    /// Completed with nothing left behind
    pub fn is_clean(&self) -> bool {
        match self.state {
            PairState::Completed => self.folders.failed == 0 && self.messages.failed == 0,
            PairState::Skipped(_) => true,
            _ => false,
        }
    }

    pub fn is_fatal(&self) -> bool {
        matches!(&self.state, PairState::Errored(error) if error.is_fatal())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MigrationReport {
    pub mode: Mode,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub cancelled: bool,
    pub pairs: Vec<PairReport>,
}

impl MigrationReport {
    pub fn messages(&self) -> Counts {
        self.pairs.iter().fold(Counts::default(), |acc, pair| Counts {
            succeeded: acc.succeeded + pair.messages.succeeded,
            skipped: acc.skipped + pair.messages.skipped,
            failed: acc.failed + pair.messages.failed,
        })
    }

    /// 0 when every pair is clean, 2 after a storage failure, 1 otherwise
    pub fn exit_code(&self) -> i32 {
        if self.pairs.iter().any(PairReport::is_fatal) {
            2
        } else if self.cancelled || !self.pairs.iter().all(PairReport::is_clean) {
            1
        } else {
            0
        }
    }

    pub fn render_text(&self) -> String {
        let mut out = String::new();
        for pair in &self.pairs {
            if let Some(listing) = &pair.listing {
                let _ = writeln!(out, "{}:", pair.label);
                out.push_str(listing);
            }
        }

        let _ = writeln!(
            out,
            "{} of {} mailbox(es) in {}s{}",
            self.mode,
            self.pairs.len(),
            (self.finished_at - self.started_at).num_seconds().max(0),
            if self.cancelled { " (cancelled)" } else { "" }
        );
        for pair in &self.pairs {
            let _ = writeln!(
                out,
                "  {}: {} | folders {} ok, {} skipped, {} failed | messages {} migrated, {} skipped, {} failed",
                pair.label,
                pair.state,
                pair.folders.succeeded,
                pair.folders.skipped,
                pair.folders.failed,
                pair.messages.succeeded,
                pair.messages.skipped,
                pair.messages.failed
            );
            for failure in &pair.failures {
                if failure.item.is_empty() {
                    let _ = writeln!(out, "    ! {}: {}", failure.folder, failure.error);
                } else {
                    let _ = writeln!(
                        out,
                        "    ! {} {}: {}",
                        failure.folder, failure.item, failure.error
                    );
                }
            }
        }
        out
    }
}

/// Write the reports of every mode that ran as one JSON array
pub fn write_json(path: &Path, reports: &[MigrationReport]) -> anyhow::Result<()> {
    let json = serde_json::to_string_pretty(reports)?;
    std::fs::write(path, json)?;
    Ok(())
}
