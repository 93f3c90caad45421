use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{BencherError, Result};
use crate::runner::LogOutput;

/// Separator of the legacy queue encoding; never allowed inside a job name.
pub const QUEUE_DELIMITER: char = ',';

/// Status derived from what a job captured. Never stored.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum JobStatus {
    Pending,
    Done,
    Errored,
    /// The engine failed while the job ran; needs manual removal.
    Stuck,
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            JobStatus::Pending => write!(f, "pending"),
            JobStatus::Done => write!(f, "done"),
            JobStatus::Errored => write!(f, "errored"),
            JobStatus::Stuck => write!(f, "stuck"),
        }
    }
}

/// One benchmark execution, keyed by its version name.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Job {
    pub version: String,
    #[serde(default)]
    pub stdout: String,
    #[serde(default)]
    pub stderr: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exit_code: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stuck: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<DateTime<Utc>>,
}

impl Job {
    pub fn new(version: impl Into<String>) -> Self {
        Self {
            version: version.into(),
            stdout: String::new(),
            stderr: String::new(),
            exit_code: None,
            stuck: None,
            created_at: Some(Utc::now()),
            finished_at: None,
        }
    }

    /// Errored dominates Done; Stuck dominates everything.
    pub fn status(&self) -> JobStatus {
        if self.stuck.is_some() {
            return JobStatus::Stuck;
        }
        match (self.stdout.is_empty(), self.stderr.is_empty()) {
            (_, false) => JobStatus::Errored,
            (false, true) => JobStatus::Done,
            (true, true) => JobStatus::Pending,
        }
    }

    pub fn is_finished(&self) -> bool {
        self.status() != JobStatus::Pending
    }

    /// Record the demultiplexed output of a finished container.
    pub fn complete(&mut self, logs: LogOutput, exit_code: i64) {
        self.stdout = logs.stdout;
        self.stderr = logs.stderr;
        self.exit_code = Some(exit_code);
        self.finished_at = Some(Utc::now());
    }

    pub fn mark_stuck(&mut self, reason: impl Into<String>) {
        self.stuck = Some(reason.into());
        self.finished_at = Some(Utc::now());
    }
}

/// Job names double as container names, so they follow the engine's naming
/// rule `[a-zA-Z0-9][a-zA-Z0-9_.-]+`, which also keeps the queue delimiter out.
pub fn validate_version(version: &str) -> Result<()> {
    let invalid = |reason| {
        Err(BencherError::InvalidIdentifier {
            name: version.to_string(),
            reason,
        })
    };

    let mut chars = version.chars();
    let Some(first) = chars.next() else {
        return invalid("name is empty");
    };
    if version.contains(QUEUE_DELIMITER) {
        return invalid("name contains ','");
    }
    if !first.is_ascii_alphanumeric() {
        return invalid("name must start with a letter or digit");
    }
    if version.len() < 2 {
        return invalid("name must be at least two characters");
    }
    if !chars.all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '.' | '-')) {
        return invalid("name may only contain letters, digits, '_', '.' and '-'");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn job(stdout: &str, stderr: &str) -> Job {
        Job {
            stdout: stdout.to_string(),
            stderr: stderr.to_string(),
            ..Job::new("v1")
        }
    }

    #[test]
    fn status_derivation() {
        assert_eq!(job("", "").status(), JobStatus::Pending);
        assert_eq!(job("BenchmarkX 100 ns/op", "").status(), JobStatus::Done);
        assert_eq!(job("", "panic: boom").status(), JobStatus::Errored);
        assert_eq!(job("partial", "panic: boom").status(), JobStatus::Errored);
    }

    #[test]
    fn stuck_dominates() {
        let mut j = job("out", "");
        j.mark_stuck("wait: connection reset");
        assert_eq!(j.status(), JobStatus::Stuck);
        assert!(j.is_finished());
        assert!(j.finished_at.is_some());
    }

    #[test]
    fn complete_records_output() {
        let mut j = Job::new("v1");
        assert!(!j.is_finished());
        j.complete(
            LogOutput {
                stdout: "ok\n".into(),
                stderr: String::new(),
            },
            0,
        );
        assert_eq!(j.status(), JobStatus::Done);
        assert_eq!(j.exit_code, Some(0));
    }

    #[test]
    fn decodes_records_without_optional_fields() {
        let j: Job = serde_json::from_str(r#"{"version":"v7","stdout":"a"}"#).unwrap();
        assert_eq!(j.version, "v7");
        assert_eq!(j.status(), JobStatus::Done);
        assert!(j.created_at.is_none());
    }

    #[test]
    fn status_display() {
        assert_eq!(JobStatus::Pending.to_string(), "pending");
        assert_eq!(JobStatus::Errored.to_string(), "errored");
        assert_eq!(JobStatus::Stuck.to_string(), "stuck");
    }

    #[test]
    fn version_validation() {
        assert!(validate_version("v1.2-rc_3").is_ok());
        assert!(validate_version("happy_turing").is_ok());
        assert!(validate_version("").is_err());
        assert!(validate_version("a").is_err());
        assert!(validate_version("a,b").is_err());
        assert!(validate_version("-lead").is_err());
        assert!(validate_version("has space").is_err());
        assert!(validate_version("slash/name").is_err());
    }
}
