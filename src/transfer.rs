//! Transfer options and per-file outcome tracking.

use std::fmt;

use serde::Serialize;

/// Options accepted by every upload and download operation.
#[derive(Debug, Clone, Default)]
pub struct TransferOptions {
    /// Replace existing files at the destination.
    pub overwrite: bool,
    /// Show progress bars.
    pub verbose: bool,
    /// Glob patterns (brace alternatives allowed) of names skipped by folder uploads.
    pub exclude: Vec<String>,
}

impl TransferOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn overwrite(mut self, overwrite: bool) -> Self {
        self.overwrite = overwrite;
        self
    }

    pub fn verbose(mut self, verbose: bool) -> Self {
        self.verbose = verbose;
        self
    }

    pub fn exclude<I, S>(mut self, patterns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.exclude.extend(patterns.into_iter().map(Into::into));
        self
    }
}

/// Lifecycle of one file within a transfer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "state", content = "reason", rename_all = "snake_case")]
pub enum TransferStatus {
    Pending,
    InFlight,
    Succeeded,
    Failed(String),
}

impl TransferStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, TransferStatus::Succeeded | TransferStatus::Failed(_))
    }
}

/// One leaf file of an upload or download.
#[derive(Debug, Clone, Serialize)]
pub struct FileTransferUnit {
    pub source: String,
    pub destination: String,
    pub size: u64,
    pub status: TransferStatus,
}

impl FileTransferUnit {
    pub fn new(source: impl Into<String>, destination: impl Into<String>, size: u64) -> Self {
        Self {
            source: source.into(),
            destination: destination.into(),
            size,
            status: TransferStatus::Pending,
        }
    }

    /// pending -> in-flight
    pub fn start(&mut self) {
        if self.status == TransferStatus::Pending {
            self.status = TransferStatus::InFlight;
        }
    }

    /// in-flight -> succeeded
    pub fn succeed(&mut self) {
        if self.status == TransferStatus::InFlight {
            self.status = TransferStatus::Succeeded;
        }
    }

    /// pending | in-flight -> failed
    pub fn fail(&mut self, reason: impl fmt::Display) {
        if !self.status.is_terminal() {
            self.status = TransferStatus::Failed(reason.to_string());
        }
    }

    pub fn failure_reason(&self) -> Option<&str> {
        match &self.status {
            TransferStatus::Failed(reason) => Some(reason),
            _ => None,
        }
    }
}

/// Outcome of a folder upload or directory download.
#[derive(Debug, Clone, Default, Serialize)]
pub struct TransferReport {
    pub units: Vec<FileTransferUnit>,
}

impl TransferReport {
    pub fn push(&mut self, unit: FileTransferUnit) {
        self.units.push(unit);
    }

    pub fn total(&self) -> usize {
        self.units.len()
    }

    pub fn succeeded(&self) -> impl Iterator<Item = &FileTransferUnit> {
        self.units
            .iter()
            .filter(|u| u.status == TransferStatus::Succeeded)
    }

    pub fn failed(&self) -> impl Iterator<Item = &FileTransferUnit> {
        self.units.iter().filter(|u| u.failure_reason().is_some())
    }

    pub fn success_count(&self) -> usize {
        self.succeeded().count()
    }

    pub fn failed_count(&self) -> usize {
        self.failed().count()
    }

    pub fn bytes_transferred(&self) -> u64 {
        self.succeeded().map(|u| u.size).sum()
    }

    pub fn is_complete_success(&self) -> bool {
        self.units
            .iter()
            .all(|u| u.status == TransferStatus::Succeeded)
    }
}

impl fmt::Display for TransferReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} succeeded, {} failed, {} total",
            self.success_count(),
            self.failed_count(),
            self.total()
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unit_lifecycle() {
        let mut unit = FileTransferUnit::new("a.txt", "/apps/a.txt", 3);
        assert_eq!(unit.status, TransferStatus::Pending);

        // Cannot succeed without starting.
        unit.succeed();
        assert_eq!(unit.status, TransferStatus::Pending);

        unit.start();
        assert_eq!(unit.status, TransferStatus::InFlight);
        unit.succeed();
        assert_eq!(unit.status, TransferStatus::Succeeded);

        // Terminal states are final.
        unit.fail("late error");
        assert_eq!(unit.status, TransferStatus::Succeeded);
    }

    #[test]
    fn test_report_counts() {
        let mut report = TransferReport::default();

        let mut ok = FileTransferUnit::new("a", "b", 10);
        ok.start();
        ok.succeed();
        report.push(ok);

        let mut bad = FileTransferUnit::new("c", "d", 5);
        bad.start();
        bad.fail("boom");
        report.push(bad);

        assert_eq!(report.total(), 2);
        assert_eq!(report.success_count(), 1);
        assert_eq!(report.failed_count(), 1);
        assert_eq!(report.bytes_transferred(), 10);
        assert!(!report.is_complete_success());
        assert_eq!(report.failed().next().unwrap().failure_reason(), Some("boom"));
        assert_eq!(report.to_string(), "1 succeeded, 1 failed, 2 total");
    }
}
