use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ActivityId(pub i64);

impl fmt::Display for ActivityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StudentId(pub Uuid);

impl fmt::Display for StudentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Error returned when a stored code does not match any known variant.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown {kind} code `{code}`")]
pub struct UnknownCode {
    pub kind: &'static str,
    pub code: String,
}

impl UnknownCode {
    fn new(kind: &'static str, code: &str) -> Self {
        Self {
            kind,
            code: code.to_string(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActivityKind {
    Assignment,
    Quiz,
    Generic,
    Subsection,
}

impl ActivityKind {
    pub fn is_container(self) -> bool {
        matches!(self, ActivityKind::Subsection)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ActivityKind::Assignment => "assignment",
            ActivityKind::Quiz => "quiz",
            ActivityKind::Generic => "generic",
            ActivityKind::Subsection => "subsection",
        }
    }
}

impl FromStr for ActivityKind {
    type Err = UnknownCode;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "assign" | "assignment" => Ok(ActivityKind::Assignment),
            "quiz" => Ok(ActivityKind::Quiz),
            "generic" | "page" | "resource" | "url" => Ok(ActivityKind::Generic),
            "subsection" => Ok(ActivityKind::Subsection),
            other => Err(UnknownCode::new("activity kind", other)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Activity {
    pub id: ActivityId,
    pub name: String,
    pub kind: ActivityKind,
}

impl Activity {
    pub fn new(id: i64, name: impl Into<String>, kind: ActivityKind) -> Self {
        Self {
            id: ActivityId(id),
            name: name.into(),
            kind,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EvidenceSource {
    TrackingApi,
    TrackingTable,
    ModuleSubmission,
    ModuleAttempt,
    AccessLog,
}

impl EvidenceSource {
    pub const ALL: [EvidenceSource; 5] = [
        EvidenceSource::TrackingApi,
        EvidenceSource::TrackingTable,
        EvidenceSource::ModuleSubmission,
        EvidenceSource::ModuleAttempt,
        EvidenceSource::AccessLog,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            EvidenceSource::TrackingApi => "tracking_api",
            EvidenceSource::TrackingTable => "tracking_table",
            EvidenceSource::ModuleSubmission => "module_submission",
            EvidenceSource::ModuleAttempt => "module_attempt",
            EvidenceSource::AccessLog => "access_log",
        }
    }
}

impl fmt::Display for EvidenceSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EvidenceSource {
    type Err = UnknownCode;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let code = s.trim().to_ascii_lowercase();
        EvidenceSource::ALL
            .into_iter()
            .find(|source| source.as_str() == code)
            .ok_or_else(|| UnknownCode::new("evidence source", &code))
    }
}

/// Completion flag recorded by the tracking API or tracking table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrackingState {
    Incomplete,
    Complete,
    CompletePass,
    CompleteFail,
}

impl TrackingState {
    /// Pass and fail are both terminal outcomes of the attempt lifecycle.
    pub fn is_complete(self) -> bool {
        !matches!(self, TrackingState::Incomplete)
    }
}

impl FromStr for TrackingState {
    type Err = UnknownCode;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "incomplete" | "0" => Ok(TrackingState::Incomplete),
            "complete" | "1" => Ok(TrackingState::Complete),
            "complete_pass" | "2" => Ok(TrackingState::CompletePass),
            "complete_fail" | "3" => Ok(TrackingState::CompleteFail),
            other => Err(UnknownCode::new("tracking state", other)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubmissionState {
    Draft,
    Submitted,
    Graded,
}

impl FromStr for SubmissionState {
    type Err = UnknownCode;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "draft" | "new" => Ok(SubmissionState::Draft),
            "submitted" => Ok(SubmissionState::Submitted),
            "graded" => Ok(SubmissionState::Graded),
            other => Err(UnknownCode::new("submission state", other)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttemptState {
    InProgress,
    Overdue,
    Finished,
    Abandoned,
}

impl FromStr for AttemptState {
    type Err = UnknownCode;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "inprogress" | "in_progress" => Ok(AttemptState::InProgress),
            "overdue" => Ok(AttemptState::Overdue),
            "finished" => Ok(AttemptState::Finished),
            "abandoned" => Ok(AttemptState::Abandoned),
            other => Err(UnknownCode::new("attempt state", other)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RawState {
    Tracking(TrackingState),
    Submission(SubmissionState),
    Attempt(AttemptState),
    Viewed,
}

impl RawState {
    /// Decodes a stored state code according to the source that produced it.
    pub fn parse(source: EvidenceSource, code: &str) -> Result<Self, UnknownCode> {
        match source {
            EvidenceSource::TrackingApi | EvidenceSource::TrackingTable => {
                code.parse().map(RawState::Tracking)
            }
            EvidenceSource::ModuleSubmission => code.parse().map(RawState::Submission),
            EvidenceSource::ModuleAttempt => code.parse().map(RawState::Attempt),
            EvidenceSource::AccessLog => match code.trim().to_ascii_lowercase().as_str() {
                "viewed" => Ok(RawState::Viewed),
                other => Err(UnknownCode::new("access log event", other)),
            },
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimestampSet {
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub updated_at: Option<DateTime<Utc>>,
}

impl TimestampSet {
    pub fn started(at: DateTime<Utc>) -> Self {
        Self {
            started_at: Some(at),
            ..Self::default()
        }
    }

    pub fn is_empty(&self) -> bool {
        self.started_at.is_none() && self.completed_at.is_none() && self.updated_at.is_none()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EvidenceRecord {
    pub source: EvidenceSource,
    pub state: RawState,
    pub timestamps: TimestampSet,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StatusKey {
    NotStarted,
    Pending,
    Completed,
}

impl StatusKey {
    pub fn label(self) -> &'static str {
        match self {
            StatusKey::NotStarted => "not started",
            StatusKey::Pending => "pending",
            StatusKey::Completed => "completed",
        }
    }
}

impl fmt::Display for StatusKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResolvedStatus {
    pub key: StatusKey,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub updated_at: Option<DateTime<Utc>>,
}

impl ResolvedStatus {
    pub fn new(key: StatusKey, timestamps: TimestampSet) -> Self {
        Self {
            key,
            started_at: timestamps.started_at,
            completed_at: timestamps.completed_at,
            updated_at: timestamps.updated_at,
        }
    }

    pub fn not_started() -> Self {
        Self::new(StatusKey::NotStarted, TimestampSet::default())
    }

    pub fn timestamps(&self) -> TimestampSet {
        TimestampSet {
            started_at: self.started_at,
            completed_at: self.completed_at,
            updated_at: self.updated_at,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kind_codes_map_to_leaf_and_container_kinds() {
        let assign = "assign".parse::<ActivityKind>();
        assert_eq!(assign, Ok(ActivityKind::Assignment));
        assert_eq!("Page".parse::<ActivityKind>(), Ok(ActivityKind::Generic));
        assert!("subsection".parse::<ActivityKind>().unwrap().is_container());
        assert!(!ActivityKind::Quiz.is_container());
        assert!("forum_thread".parse::<ActivityKind>().is_err());
    }

    #[test]
    fn raw_state_is_decoded_per_source() {
        assert_eq!(
            RawState::parse(EvidenceSource::TrackingTable, "complete_fail"),
            Ok(RawState::Tracking(TrackingState::CompleteFail))
        );
        assert_eq!(
            RawState::parse(EvidenceSource::ModuleAttempt, "inprogress"),
            Ok(RawState::Attempt(AttemptState::InProgress))
        );
        let err = RawState::parse(EvidenceSource::TrackingApi, "graded").unwrap_err();
        assert_eq!(err.kind, "tracking state");
    }

    #[test]
    fn failed_tracking_outcome_still_counts_as_complete() {
        assert!(TrackingState::CompleteFail.is_complete());
        assert!(TrackingState::CompletePass.is_complete());
        assert!(!TrackingState::Incomplete.is_complete());
    }

    #[test]
    fn status_key_serializes_as_snake_case() {
        let json = serde_json::to_string(&StatusKey::NotStarted).unwrap();
        assert_eq!(json, "\"not_started\"");
        let source = "access_log".parse::<EvidenceSource>();
        assert_eq!(source, Ok(EvidenceSource::AccessLog));
    }
}
