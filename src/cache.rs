use std::collections::HashMap;

use crate::error::Result;
use crate::gateway::EvidenceGateway;
use crate::models::{Activity, ActivityId, ResolvedStatus, StudentId};
use crate::resolver;

/// Caches successful resolutions by `(activity, student)`.
///
/// Every activity the resolver visits is cached, including the children of a
/// container, so a report that lists a container and then its children reads
/// each leaf once. Create one per request or report run; evidence may change
/// between runs.
#[derive(Debug, Default)]
pub struct ResolutionCache {
    entries: HashMap<(ActivityId, StudentId), ResolvedStatus>,
    hits: usize,
    misses: usize,
}

impl ResolutionCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn resolve<G>(
        &mut self,
        gateway: &G,
        activity: &Activity,
        student_id: StudentId,
    ) -> Result<ResolvedStatus>
    where
        G: EvidenceGateway + ?Sized,
    {
        resolver::resolve_cached(gateway, activity, student_id, self)
    }

    pub(crate) fn lookup(&mut self, key: (ActivityId, StudentId)) -> Option<ResolvedStatus> {
        match self.entries.get(&key) {
            Some(status) => {
                self.hits += 1;
                Some(status.clone())
            }
            None => {
                self.misses += 1;
                None
            }
        }
    }

    pub(crate) fn store(&mut self, key: (ActivityId, StudentId), status: &ResolvedStatus) {
        self.entries.insert(key, status.clone());
    }

    pub fn hits(&self) -> usize {
        self.hits
    }

    pub fn misses(&self) -> usize {
        self.misses
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
