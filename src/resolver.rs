use crate::cache::ResolutionCache;
use crate::error::{GatewayError, ResolveError, Result};
use crate::gateway::EvidenceGateway;
use crate::models::{
    Activity, ActivityId, ActivityKind, AttemptState, EvidenceRecord, EvidenceSource, RawState,
    ResolvedStatus, StatusKey, StudentId, SubmissionState, TimestampSet, TrackingState,
};
use crate::reconcile::reconcile;

/// Resolves an activity of any kind for one student.
pub fn resolve<G>(gateway: &G, activity: &Activity, student_id: StudentId) -> Result<ResolvedStatus>
where
    G: EvidenceGateway + ?Sized,
{
    resolve_on_path(gateway, activity, student_id, &mut Vec::new(), None)
}

/// Resolves a container from its visible children. A leaf passed here is
/// resolved from its own evidence, as [`resolve`] would.
pub fn resolve_container<G>(
    gateway: &G,
    activity: &Activity,
    student_id: StudentId,
) -> Result<ResolvedStatus>
where
    G: EvidenceGateway + ?Sized,
{
    if !activity.kind.is_container() {
        return resolve_leaf(gateway, activity, student_id);
    }
    resolve_container_on_path(gateway, activity, student_id, &mut Vec::new(), None)
}

/// Like [`resolve`], but every activity in the tree is read from and stored
/// into `cache`.
pub(crate) fn resolve_cached<G>(
    gateway: &G,
    activity: &Activity,
    student_id: StudentId,
    cache: &mut ResolutionCache,
) -> Result<ResolvedStatus>
where
    G: EvidenceGateway + ?Sized,
{
    resolve_on_path(gateway, activity, student_id, &mut Vec::new(), Some(cache))
}

fn resolve_on_path<G>(
    gateway: &G,
    activity: &Activity,
    student_id: StudentId,
    path: &mut Vec<ActivityId>,
    mut cache: Option<&mut ResolutionCache>,
) -> Result<ResolvedStatus>
where
    G: EvidenceGateway + ?Sized,
{
    let key = (activity.id, student_id);
    if let Some(status) = cache.as_deref_mut().and_then(|c| c.lookup(key)) {
        return Ok(status);
    }

    let status = if activity.kind.is_container() {
        resolve_container_on_path(gateway, activity, student_id, path, cache.as_deref_mut())?
    } else {
        resolve_leaf(gateway, activity, student_id)?
    };

    if let Some(cache) = cache {
        cache.store(key, &status);
    }
    Ok(status)
}

fn resolve_container_on_path<G>(
    gateway: &G,
    activity: &Activity,
    student_id: StudentId,
    path: &mut Vec<ActivityId>,
    mut cache: Option<&mut ResolutionCache>,
) -> Result<ResolvedStatus>
where
    G: EvidenceGateway + ?Sized,
{
    if path.contains(&activity.id) {
        let mut cycle = path.clone();
        cycle.push(activity.id);
        return Err(ResolveError::CyclicActivityGraph {
            activity_id: activity.id,
            path: cycle,
        });
    }

    let children = gateway
        .visible_children(activity.id)
        .map_err(ResolveError::children(activity.id))?;

    if children.is_empty() {
        tracing::debug!(activity_id = %activity.id, "container has no visible children");
        return Ok(ResolvedStatus::not_started());
    }

    path.push(activity.id);
    let mut resolved = Vec::with_capacity(children.len());
    for child in &children {
        let status = resolve_on_path(gateway, child, student_id, path, cache.as_deref_mut());
        match status {
            Ok(status) => resolved.push(status),
            Err(err) => {
                path.pop();
                return Err(err);
            }
        }
    }
    path.pop();

    let key = aggregate_keys(resolved.iter().map(|status| status.key));
    let timestamps: Vec<TimestampSet> = resolved.iter().map(ResolvedStatus::timestamps).collect();

    tracing::debug!(
        activity_id = %activity.id,
        children = resolved.len(),
        key = %key,
        "aggregated container"
    );

    Ok(ResolvedStatus::new(key, reconcile(&timestamps)))
}

fn aggregate_keys<I>(keys: I) -> StatusKey
where
    I: IntoIterator<Item = StatusKey>,
{
    let mut all_completed = true;
    let mut any_activity = false;

    for key in keys {
        match key {
            StatusKey::Completed => any_activity = true,
            StatusKey::Pending => {
                any_activity = true;
                all_completed = false;
            }
            StatusKey::NotStarted => all_completed = false,
        }
    }

    if all_completed && any_activity {
        StatusKey::Completed
    } else if any_activity {
        StatusKey::Pending
    } else {
        StatusKey::NotStarted
    }
}

/// Evidence gathered for one leaf: the key decision so far and every
/// timestamp candidate read along the way.
#[derive(Default)]
struct LeafEvidence {
    decision: Option<StatusKey>,
    candidates: Vec<TimestampSet>,
}

impl LeafEvidence {
    fn decide(&mut self, key: StatusKey) {
        if self.decision.is_none() {
            self.decision = Some(key);
        }
    }

    fn has_started_candidate(&self) -> bool {
        self.candidates.iter().any(|c| c.started_at.is_some())
    }
}

/// Resolves a non-container activity from its own evidence.
///
/// Containers passed here are read as generic leaves; use [`resolve`] or
/// [`resolve_container`] to get child aggregation.
pub fn resolve_leaf<G>(
    gateway: &G,
    activity: &Activity,
    student_id: StudentId,
) -> Result<ResolvedStatus>
where
    G: EvidenceGateway + ?Sized,
{
    let id = activity.id;
    let mut evidence = LeafEvidence::default();

    let tracking = tracking_evidence(gateway, id, student_id)?;
    if let Some(record) = tracking {
        let failed = ResolveError::lookup(record.source, id, student_id);
        let state = tracking_state(&record).map_err(failed)?;
        tracing::debug!(activity_id = %id, source = %record.source, ?state, "tracking evidence");
        if state.is_complete() {
            evidence.decide(StatusKey::Completed);
        }
        evidence.candidates.push(record.timestamps);
    } else {
        module_evidence(gateway, activity, student_id, &mut evidence)?;
    }

    if !evidence.has_started_candidate() {
        match gateway.first_viewed_at(id, student_id) {
            Ok(Some(viewed_at)) => evidence.candidates.push(TimestampSet::started(viewed_at)),
            Ok(None) => {}
            Err(err) => {
                tracing::warn!(
                    activity_id = %id,
                    student_id = %student_id,
                    error = %err,
                    "access log lookup failed, ignoring"
                );
            }
        }
    }

    let timestamps = reconcile(&evidence.candidates);
    let key = match evidence.decision {
        Some(key) => key,
        None if timestamps.started_at.is_some() => StatusKey::Pending,
        None => StatusKey::NotStarted,
    };

    Ok(ResolvedStatus::new(key, timestamps))
}

/// The API-level record when tracking is enabled, else the tracking table.
fn tracking_evidence<G>(
    gateway: &G,
    id: ActivityId,
    student_id: StudentId,
) -> Result<Option<EvidenceRecord>>
where
    G: EvidenceGateway + ?Sized,
{
    let api_failed = ResolveError::lookup(EvidenceSource::TrackingApi, id, student_id);
    if gateway.is_tracking_enabled(id).map_err(api_failed)? {
        let record = gateway.tracking_record(id, student_id);
        if let Some(record) = record.map_err(api_failed)? {
            return Ok(Some(record));
        }
    }

    let table_failed = ResolveError::lookup(EvidenceSource::TrackingTable, id, student_id);
    gateway
        .tracking_table_record(id, student_id)
        .map_err(table_failed)
}

fn tracking_state(record: &EvidenceRecord) -> std::result::Result<TrackingState, GatewayError> {
    match record.state {
        RawState::Tracking(state) => Ok(state),
        other => Err(unexpected_state(record.source, other)),
    }
}

fn module_evidence<G>(
    gateway: &G,
    activity: &Activity,
    student_id: StudentId,
    evidence: &mut LeafEvidence,
) -> Result<()>
where
    G: EvidenceGateway + ?Sized,
{
    let id = activity.id;
    match activity.kind {
        ActivityKind::Assignment => {
            let failed = ResolveError::lookup(EvidenceSource::ModuleSubmission, id, student_id);
            let submission = match gateway.assignment_submission(id, student_id) {
                Ok(Some(submission)) => submission,
                Ok(None) => return Ok(()),
                Err(reason) => return Err(failed(reason)),
            };
            let key = match submission.state {
                RawState::Submission(SubmissionState::Graded) => Some(StatusKey::Completed),
                RawState::Submission(SubmissionState::Submitted) => Some(StatusKey::Pending),
                RawState::Submission(SubmissionState::Draft) => None,
                other => return Err(failed(unexpected_state(submission.source, other))),
            };
            if let Some(key) = key {
                evidence.decide(key);
            }
            evidence.candidates.push(submission.timestamps);
        }
        ActivityKind::Quiz => {
            let failed = ResolveError::lookup(EvidenceSource::ModuleAttempt, id, student_id);
            let attempts = gateway.quiz_attempts(id, student_id).map_err(failed)?;
            quiz_evidence(&attempts, evidence).map_err(failed)?;
        }
        ActivityKind::Generic | ActivityKind::Subsection => {}
    }

    tracing::debug!(
        activity_id = %id,
        kind = activity.kind.as_str(),
        decision = ?evidence.decision,
        "module evidence"
    );
    Ok(())
}

/// Attempts arrive most recent first. A finished attempt outranks one in
/// progress; only the most recent finished attempt supplies `completed_at`.
fn quiz_evidence(
    attempts: &[EvidenceRecord],
    evidence: &mut LeafEvidence,
) -> std::result::Result<(), GatewayError> {
    let mut finished_seen = false;
    let mut in_progress_seen = false;

    for attempt in attempts {
        let state = match attempt.state {
            RawState::Attempt(state) => state,
            other => return Err(unexpected_state(attempt.source, other)),
        };

        let mut timestamps = attempt.timestamps;
        match state {
            AttemptState::Finished if !finished_seen => finished_seen = true,
            AttemptState::InProgress => {
                in_progress_seen = true;
                timestamps.completed_at = None;
            }
            _ => timestamps.completed_at = None,
        }
        evidence.candidates.push(timestamps);
    }

    if finished_seen {
        evidence.decide(StatusKey::Completed);
    } else if in_progress_seen {
        evidence.decide(StatusKey::Pending);
    }
    Ok(())
}

fn unexpected_state(source: EvidenceSource, state: RawState) -> GatewayError {
    GatewayError::Malformed(format!("{source} returned unexpected state {state:?}"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gateway::EvidenceSnapshot;
    use crate::test_support::{api, at, attempt, stamps, student, submission, table, viewed};

    #[test]
    fn aggregate_rule_covers_all_mixes() {
        use StatusKey::*;
        assert_eq!(aggregate_keys([Completed, Completed]), Completed);
        assert_eq!(aggregate_keys([NotStarted, NotStarted]), NotStarted);
        assert_eq!(aggregate_keys([Completed, NotStarted]), Pending);
        assert_eq!(aggregate_keys([Pending, Pending]), Pending);
        assert_eq!(aggregate_keys([NotStarted, Pending]), Pending);
    }

    #[test]
    fn tracking_table_is_the_fallback_when_tracking_is_disabled() {
        let essay = Activity::new(1, "Essay", ActivityKind::Assignment);
        let passed = stamps(Some(5), Some(9), Some(9));
        let snapshot = EvidenceSnapshot::new()
            .with_untracked_activity(essay.clone())
            .with_evidence(api(1, "incomplete", stamps(Some(1), None, None)))
            .with_evidence(table(1, "complete_pass", passed));

        let status = resolve(&snapshot, &essay, student()).unwrap();
        assert_eq!(status.key, StatusKey::Completed);
        assert_eq!(status.started_at, Some(at(5)));
        assert_eq!(status.completed_at, Some(at(9)));
    }

    #[test]
    fn failed_outcome_still_resolves_completed() {
        let quiz = Activity::new(2, "Unit test", ActivityKind::Quiz);
        let snapshot = EvidenceSnapshot::new()
            .with_activity(quiz.clone())
            .with_evidence(api(2, "complete_fail", stamps(None, Some(30), None)));

        let status = resolve(&snapshot, &quiz, student()).unwrap();
        assert_eq!(status.key, StatusKey::Completed);
        assert_eq!(status.started_at, None);
    }

    #[test]
    fn tracking_record_skips_module_evidence() {
        let essay = Activity::new(3, "Essay", ActivityKind::Assignment);
        let snapshot = EvidenceSnapshot::new()
            .with_activity(essay.clone())
            .with_evidence(api(3, "incomplete", TimestampSet::default()))
            .with_evidence(submission(3, "graded", stamps(Some(2), Some(8), None)));

        let status = resolve(&snapshot, &essay, student()).unwrap();
        assert_eq!(status.key, StatusKey::NotStarted);
        assert_eq!(status.completed_at, None);
    }

    #[test]
    fn submitted_assignment_is_pending() {
        let essay = Activity::new(4, "Essay", ActivityKind::Assignment);
        let snapshot = EvidenceSnapshot::new()
            .with_untracked_activity(essay.clone())
            .with_evidence(submission(4, "submitted", stamps(None, None, Some(12))));

        let status = resolve(&snapshot, &essay, student()).unwrap();
        assert_eq!(status.key, StatusKey::Pending);
        assert_eq!(status.started_at, Some(at(12)));
    }

    #[test]
    fn draft_submission_with_a_view_is_pending() {
        let essay = Activity::new(5, "Essay", ActivityKind::Assignment);
        let snapshot = EvidenceSnapshot::new()
            .with_untracked_activity(essay.clone())
            .with_evidence(submission(5, "draft", TimestampSet::default()))
            .with_evidence(viewed(5, 3));

        let status = resolve(&snapshot, &essay, student()).unwrap();
        assert_eq!(status.key, StatusKey::Pending);
        assert_eq!(status.started_at, Some(at(3)));
    }

    #[test]
    fn access_log_does_not_override_a_known_start() {
        let page = Activity::new(6, "Reading", ActivityKind::Generic);
        let snapshot = EvidenceSnapshot::new()
            .with_activity(page.clone())
            .with_evidence(api(6, "complete", stamps(Some(20), Some(25), None)))
            .with_evidence(viewed(6, 1));

        let status = resolve(&snapshot, &page, student()).unwrap();
        assert_eq!(status.started_at, Some(at(20)));
    }

    #[test]
    fn abandoned_attempts_give_no_key_signal_but_keep_their_start() {
        let quiz = Activity::new(7, "Quiz", ActivityKind::Quiz);
        let snapshot = EvidenceSnapshot::new()
            .with_untracked_activity(quiz.clone())
            .with_evidence(attempt(7, "abandoned", stamps(Some(4), Some(6), Some(6))));

        let status = resolve(&snapshot, &quiz, student()).unwrap();
        assert_eq!(status.key, StatusKey::Pending);
        assert_eq!(status.started_at, Some(at(4)));
        assert_eq!(status.completed_at, None);
    }

    #[test]
    fn only_latest_finished_attempt_sets_completion() {
        let quiz = Activity::new(8, "Quiz", ActivityKind::Quiz);
        let older = stamps(Some(10), Some(500), Some(30));
        let newer = stamps(Some(40), Some(60), Some(60));
        let snapshot = EvidenceSnapshot::new()
            .with_untracked_activity(quiz.clone())
            .with_evidence(attempt(8, "finished", older))
            .with_evidence(attempt(8, "finished", newer));

        let status = resolve(&snapshot, &quiz, student()).unwrap();
        assert_eq!(status.key, StatusKey::Completed);
        assert_eq!(status.completed_at, Some(at(60)));
        assert_eq!(status.started_at, Some(at(10)));
    }

    #[test]
    fn malformed_tracking_row_propagates() {
        let page = Activity::new(9, "Reading", ActivityKind::Generic);
        let snapshot = EvidenceSnapshot::new()
            .with_activity(page.clone())
            .with_evidence(api(9, "maybe", TimestampSet::default()));

        let err = resolve(&snapshot, &page, student()).unwrap_err();
        assert!(matches!(
            err,
            ResolveError::EvidenceLookupFailed {
                evidence_source: EvidenceSource::TrackingApi,
                reason: GatewayError::Malformed(_),
                ..
            }
        ));
    }

    #[test]
    fn nested_containers_aggregate_recursively() {
        let unit = Activity::new(100, "Unit", ActivityKind::Subsection);
        let snapshot = EvidenceSnapshot::new()
            .with_activity(unit.clone())
            .with_activity(Activity::new(110, "Week", ActivityKind::Subsection))
            .with_activity(Activity::new(111, "Page", ActivityKind::Generic))
            .with_activity(Activity::new(120, "Page", ActivityKind::Generic))
            .with_child(100, 110)
            .with_child(110, 111)
            .with_child(100, 120)
            .with_evidence(api(111, "complete", stamps(Some(3), Some(7), Some(7))))
            .with_evidence(api(120, "complete", stamps(Some(1), Some(4), Some(4))));

        let status = resolve(&snapshot, &unit, student()).unwrap();
        assert_eq!(status.key, StatusKey::Completed);
        assert_eq!(status.started_at, Some(at(1)));
        assert_eq!(status.completed_at, Some(at(7)));
    }

    #[test]
    fn revisiting_a_sibling_subtree_is_not_a_cycle() {
        let unit = Activity::new(200, "Unit", ActivityKind::Subsection);
        let snapshot = EvidenceSnapshot::new()
            .with_activity(unit.clone())
            .with_activity(Activity::new(210, "Shared", ActivityKind::Subsection))
            .with_activity(Activity::new(211, "Page", ActivityKind::Generic))
            .with_child(200, 210)
            .with_child(200, 210)
            .with_child(210, 211);

        let status = resolve(&snapshot, &unit, student()).unwrap();
        assert_eq!(status.key, StatusKey::NotStarted);
    }

    #[test]
    fn resolve_container_on_a_leaf_reads_its_evidence() {
        let page = Activity::new(300, "Reading", ActivityKind::Generic);
        let snapshot = EvidenceSnapshot::new()
            .with_activity(page.clone())
            .with_evidence(api(300, "complete", stamps(Some(2), Some(5), Some(5))));

        let via_container = resolve_container(&snapshot, &page, student()).unwrap();
        let via_leaf = resolve_leaf(&snapshot, &page, student()).unwrap();
        assert_eq!(via_container.key, StatusKey::Completed);
        assert_eq!(via_container, via_leaf);
    }

    #[test]
    fn cached_resolution_stores_every_level_of_the_tree() {
        let week = Activity::new(400, "Week", ActivityKind::Subsection);
        let page = Activity::new(401, "Page", ActivityKind::Generic);
        let snapshot = EvidenceSnapshot::new()
            .with_activity(week.clone())
            .with_activity(page.clone())
            .with_child(400, 401)
            .with_evidence(api(401, "complete", stamps(Some(1), Some(2), Some(2))));

        let mut cache = ResolutionCache::new();
        let parent = resolve_cached(&snapshot, &week, student(), &mut cache);
        assert_eq!(parent.unwrap().key, StatusKey::Completed);
        assert_eq!((cache.hits(), cache.misses(), cache.len()), (0, 2, 2));

        let child = resolve_cached(&snapshot, &page, student(), &mut cache);
        assert_eq!(child.unwrap().key, StatusKey::Completed);
        assert_eq!((cache.hits(), cache.misses()), (1, 2));
    }
}
