use chrono::{DateTime, TimeZone, Utc};
use uuid::Uuid;

use crate::gateway::EvidenceRow;
use crate::models::{EvidenceSource, StudentId, TimestampSet};

pub fn student() -> StudentId {
    StudentId(Uuid::from_u128(42))
}

pub fn at(secs: i64) -> DateTime<Utc> {
    Utc.timestamp_opt(secs, 0).unwrap()
}

pub fn stamps(started: Option<i64>, completed: Option<i64>, updated: Option<i64>) -> TimestampSet {
    TimestampSet {
        started_at: started.map(at),
        completed_at: completed.map(at),
        updated_at: updated.map(at),
    }
}

pub fn row(activity: i64, source: EvidenceSource, state: &str, ts: TimestampSet) -> EvidenceRow {
    EvidenceRow::new(activity, student(), source, state, ts)
}

pub fn api(activity: i64, state: &str, ts: TimestampSet) -> EvidenceRow {
    row(activity, EvidenceSource::TrackingApi, state, ts)
}

pub fn table(activity: i64, state: &str, ts: TimestampSet) -> EvidenceRow {
    row(activity, EvidenceSource::TrackingTable, state, ts)
}

pub fn submission(activity: i64, state: &str, ts: TimestampSet) -> EvidenceRow {
    row(activity, EvidenceSource::ModuleSubmission, state, ts)
}

pub fn attempt(activity: i64, state: &str, ts: TimestampSet) -> EvidenceRow {
    row(activity, EvidenceSource::ModuleAttempt, state, ts)
}

pub fn viewed(activity: i64, secs: i64) -> EvidenceRow {
    let ts = TimestampSet::started(at(secs));
    row(activity, EvidenceSource::AccessLog, "viewed", ts)
}
