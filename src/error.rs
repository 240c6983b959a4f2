//! Error types for evidence lookups and status resolution.

use crate::models::{ActivityId, EvidenceSource, StudentId};

/// A gateway lookup that could not complete.
///
/// "No record" is never an error; lookups return `Ok(None)` or an empty
/// sequence for that.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum GatewayError {
    #[error("evidence store unavailable: {0}")]
    Unavailable(String),

    #[error("malformed evidence: {0}")]
    Malformed(String),
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ResolveError {
    #[error("{evidence_source} lookup failed for activity {activity_id}, student {student_id}: {reason}")]
    EvidenceLookupFailed {
        evidence_source: EvidenceSource,
        activity_id: ActivityId,
        student_id: StudentId,
        reason: GatewayError,
    },

    #[error("could not list children of container {activity_id}: {reason}")]
    ChildrenLookupFailed {
        activity_id: ActivityId,
        reason: GatewayError,
    },

    #[error("activity {activity_id} is its own ancestor (path: {})", format_path(.path))]
    CyclicActivityGraph {
        activity_id: ActivityId,
        path: Vec<ActivityId>,
    },
}

impl ResolveError {
    /// Wraps a failed lookup of `evidence_source` for one activity and student.
    pub fn lookup(
        evidence_source: EvidenceSource,
        activity_id: ActivityId,
        student_id: StudentId,
    ) -> impl Fn(GatewayError) -> Self + Copy {
        move |reason| ResolveError::EvidenceLookupFailed {
            evidence_source,
            activity_id,
            student_id,
            reason,
        }
    }

    pub fn children(activity_id: ActivityId) -> impl Fn(GatewayError) -> Self + Copy {
        move |reason| ResolveError::ChildrenLookupFailed {
            activity_id,
            reason,
        }
    }
}

fn format_path(path: &[ActivityId]) -> String {
    path.iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(" -> ")
}

pub type Result<T> = std::result::Result<T, ResolveError>;
