use std::collections::{HashMap, HashSet};

use chrono::{DateTime, Utc};

use crate::error::GatewayError;
use crate::models::{
    Activity, ActivityId, EvidenceRecord, EvidenceSource, RawState, StudentId, TimestampSet,
};

/// Lookups the resolver needs from the host data store.
///
/// Missing evidence is `Ok(None)` or an empty `Vec`. An `Err` means the lookup
/// itself could not complete.
pub trait EvidenceGateway {
    fn is_tracking_enabled(&self, activity_id: ActivityId) -> Result<bool, GatewayError>;

    fn tracking_record(
        &self,
        activity_id: ActivityId,
        student_id: StudentId,
    ) -> Result<Option<EvidenceRecord>, GatewayError>;

    /// Fallback tracking storage, independent from the API-level record.
    fn tracking_table_record(
        &self,
        activity_id: ActivityId,
        student_id: StudentId,
    ) -> Result<Option<EvidenceRecord>, GatewayError>;

    /// Latest assignment submission.
    fn assignment_submission(
        &self,
        activity_id: ActivityId,
        student_id: StudentId,
    ) -> Result<Option<EvidenceRecord>, GatewayError>;

    /// Quiz attempts, most recent first.
    fn quiz_attempts(
        &self,
        activity_id: ActivityId,
        student_id: StudentId,
    ) -> Result<Vec<EvidenceRecord>, GatewayError>;

    fn first_viewed_at(
        &self,
        activity_id: ActivityId,
        student_id: StudentId,
    ) -> Result<Option<DateTime<Utc>>, GatewayError>;

    /// Children of a container in display order, without hidden or deleted ones.
    fn visible_children(&self, container_id: ActivityId) -> Result<Vec<Activity>, GatewayError>;
}

/// One evidence row as stored, state code still undecoded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EvidenceRow {
    pub activity_id: ActivityId,
    pub student_id: StudentId,
    pub source: EvidenceSource,
    pub state: String,
    pub timestamps: TimestampSet,
}

impl EvidenceRow {
    pub fn new(
        activity_id: i64,
        student_id: StudentId,
        source: EvidenceSource,
        state: impl Into<String>,
        timestamps: TimestampSet,
    ) -> Self {
        Self {
            activity_id: ActivityId(activity_id),
            student_id,
            source,
            state: state.into(),
            timestamps,
        }
    }

    fn recency(&self) -> Option<DateTime<Utc>> {
        let ts = &self.timestamps;
        ts.updated_at.or(ts.completed_at).or(ts.started_at)
    }

    fn decode(&self) -> Result<EvidenceRecord, GatewayError> {
        let state = RawState::parse(self.source, &self.state).map_err(|err| {
            GatewayError::Malformed(format!(
                "{} row for activity {}: {err}",
                self.source, self.activity_id
            ))
        })?;
        Ok(EvidenceRecord {
            source: self.source,
            state,
            timestamps: self.timestamps,
        })
    }
}

#[derive(Debug, Clone)]
struct ActivityEntry {
    activity: Activity,
    tracking_enabled: bool,
    visible: bool,
}

/// Point-in-time copy of a course's activity graph and evidence rows.
///
/// Built once per request and dropped with it.
#[derive(Debug, Clone, Default)]
pub struct EvidenceSnapshot {
    activities: HashMap<ActivityId, ActivityEntry>,
    order: Vec<ActivityId>,
    children: HashMap<ActivityId, Vec<ActivityId>>,
    evidence: Vec<EvidenceRow>,
}

impl EvidenceSnapshot {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert_activity(&mut self, activity: Activity, tracking_enabled: bool, visible: bool) {
        let id = activity.id;
        if !self.activities.contains_key(&id) {
            self.order.push(id);
        }
        self.activities.insert(
            id,
            ActivityEntry {
                activity,
                tracking_enabled,
                visible,
            },
        );
    }

    /// Appends `child_id` to the container's child list; order of calls is display order.
    pub fn link_child(&mut self, container_id: ActivityId, child_id: ActivityId) {
        let siblings = self.children.entry(container_id).or_default();
        siblings.push(child_id);
    }

    pub fn push_evidence(&mut self, row: EvidenceRow) {
        self.evidence.push(row);
    }

    pub fn with_activity(mut self, activity: Activity) -> Self {
        self.insert_activity(activity, true, true);
        self
    }

    pub fn with_untracked_activity(mut self, activity: Activity) -> Self {
        self.insert_activity(activity, false, true);
        self
    }

    pub fn with_hidden_activity(mut self, activity: Activity) -> Self {
        self.insert_activity(activity, true, false);
        self
    }

    pub fn with_child(mut self, container_id: i64, child_id: i64) -> Self {
        self.link_child(ActivityId(container_id), ActivityId(child_id));
        self
    }

    pub fn with_evidence(mut self, row: EvidenceRow) -> Self {
        self.push_evidence(row);
        self
    }

    pub fn activity(&self, id: ActivityId) -> Option<&Activity> {
        self.activities.get(&id).map(|entry| &entry.activity)
    }

    /// Visible activities that are nobody's child, in insertion order.
    pub fn top_level_activities(&self) -> Vec<Activity> {
        let nested: HashSet<ActivityId> = self.children.values().flatten().copied().collect();
        self.order
            .iter()
            .filter(|id| !nested.contains(id))
            .filter_map(|id| self.activities.get(id))
            .filter(|entry| entry.visible)
            .map(|entry| entry.activity.clone())
            .collect()
    }

    pub fn evidence_count(&self) -> usize {
        self.evidence.len()
    }

    /// Rows for one source, most recent first.
    fn rows(
        &self,
        source: EvidenceSource,
        activity_id: ActivityId,
        student_id: StudentId,
    ) -> Vec<&EvidenceRow> {
        let mut rows: Vec<&EvidenceRow> = self
            .evidence
            .iter()
            .filter(|row| {
                row.source == source
                    && row.activity_id == activity_id
                    && row.student_id == student_id
            })
            .collect();
        rows.sort_by(|a, b| b.recency().cmp(&a.recency()));
        rows
    }

    fn latest(
        &self,
        source: EvidenceSource,
        activity_id: ActivityId,
        student_id: StudentId,
    ) -> Result<Option<EvidenceRecord>, GatewayError> {
        self.rows(source, activity_id, student_id)
            .first()
            .map(|row| row.decode())
            .transpose()
    }
}

impl EvidenceGateway for EvidenceSnapshot {
    fn is_tracking_enabled(&self, activity_id: ActivityId) -> Result<bool, GatewayError> {
        Ok(self
            .activities
            .get(&activity_id)
            .is_some_and(|entry| entry.tracking_enabled))
    }

    fn tracking_record(
        &self,
        activity_id: ActivityId,
        student_id: StudentId,
    ) -> Result<Option<EvidenceRecord>, GatewayError> {
        self.latest(EvidenceSource::TrackingApi, activity_id, student_id)
    }

    fn tracking_table_record(
        &self,
        activity_id: ActivityId,
        student_id: StudentId,
    ) -> Result<Option<EvidenceRecord>, GatewayError> {
        self.latest(EvidenceSource::TrackingTable, activity_id, student_id)
    }

    fn assignment_submission(
        &self,
        activity_id: ActivityId,
        student_id: StudentId,
    ) -> Result<Option<EvidenceRecord>, GatewayError> {
        self.latest(EvidenceSource::ModuleSubmission, activity_id, student_id)
    }

    fn quiz_attempts(
        &self,
        activity_id: ActivityId,
        student_id: StudentId,
    ) -> Result<Vec<EvidenceRecord>, GatewayError> {
        self.rows(EvidenceSource::ModuleAttempt, activity_id, student_id)
            .into_iter()
            .map(EvidenceRow::decode)
            .collect()
    }

    fn first_viewed_at(
        &self,
        activity_id: ActivityId,
        student_id: StudentId,
    ) -> Result<Option<DateTime<Utc>>, GatewayError> {
        let mut first = None;
        for row in self.rows(EvidenceSource::AccessLog, activity_id, student_id) {
            let timestamps = row.decode()?.timestamps;
            let viewed = timestamps.started_at.or(timestamps.updated_at);
            first = match (first, viewed) {
                (Some(a), Some(b)) => Some(std::cmp::min(a, b)),
                (a, b) => a.or(b),
            };
        }
        Ok(first)
    }

    fn visible_children(&self, container_id: ActivityId) -> Result<Vec<Activity>, GatewayError> {
        let Some(child_ids) = self.children.get(&container_id) else {
            return Ok(Vec::new());
        };

        let mut visible = Vec::with_capacity(child_ids.len());
        for child_id in child_ids {
            let entry = self.activities.get(child_id).ok_or_else(|| {
                GatewayError::Malformed(format!(
                    "container {container_id} links unknown activity {child_id}"
                ))
            })?;
            if entry.visible {
                visible.push(entry.activity.clone());
            }
        }
        Ok(visible)
    }
}
