use crate::models::TimestampSet;

/// Reconciles candidate timestamp sets field by field.
///
/// `started_at` takes the earliest candidate, `completed_at` and `updated_at`
/// the latest. A missing `started_at` falls back to the reconciled
/// `updated_at`. Fields without candidates stay absent.
pub fn reconcile<'a, I>(candidates: I) -> TimestampSet
where
    I: IntoIterator<Item = &'a TimestampSet>,
{
    let mut merged = TimestampSet::default();

    for candidate in candidates {
        merged.started_at = earliest(merged.started_at, candidate.started_at);
        merged.completed_at = latest(merged.completed_at, candidate.completed_at);
        merged.updated_at = latest(merged.updated_at, candidate.updated_at);
    }

    if merged.started_at.is_none() {
        merged.started_at = merged.updated_at;
    }

    merged
}

fn earliest<T: Ord>(current: Option<T>, candidate: Option<T>) -> Option<T> {
    match (current, candidate) {
        (Some(a), Some(b)) => Some(a.min(b)),
        (a, b) => a.or(b),
    }
}

fn latest<T: Ord>(current: Option<T>, candidate: Option<T>) -> Option<T> {
    match (current, candidate) {
        (Some(a), Some(b)) => Some(a.max(b)),
        (a, b) => a.or(b),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{DateTime, TimeZone, Utc};

    fn at(secs: i64) -> Option<DateTime<Utc>> {
        Some(Utc.timestamp_opt(secs, 0).unwrap())
    }

    fn set(started: Option<i64>, completed: Option<i64>, updated: Option<i64>) -> TimestampSet {
        TimestampSet {
            started_at: started.and_then(at),
            completed_at: completed.and_then(at),
            updated_at: updated.and_then(at),
        }
    }

    #[test]
    fn picks_earliest_start_and_latest_completion() {
        let candidates = vec![
            set(Some(30), Some(90), Some(95)),
            set(Some(10), None, Some(40)),
            set(None, Some(120), None),
        ];

        let merged = reconcile(&candidates);
        assert_eq!(merged.started_at, at(10));
        assert_eq!(merged.completed_at, at(120));
        assert_eq!(merged.updated_at, at(95));
    }

    #[test]
    fn missing_start_falls_back_to_update() {
        let merged = reconcile(&[set(None, None, Some(50))]);
        assert_eq!(merged.started_at, at(50));
        assert_eq!(merged.updated_at, at(50));
        assert_eq!(merged.completed_at, None);
    }

    #[test]
    fn no_candidates_leaves_every_field_absent() {
        assert!(reconcile(&Vec::<TimestampSet>::new()).is_empty());
        assert!(reconcile(&[TimestampSet::default(), TimestampSet::default()]).is_empty());
    }

    #[test]
    fn inconsistent_ordering_is_surfaced_untouched() {
        let merged = reconcile(&[set(Some(200), Some(100), None)]);
        assert_eq!(merged.started_at, at(200));
        assert_eq!(merged.completed_at, at(100));
    }
}
