//! Exhaustion Registry (C8, spec §4.8).
//!
//! Per-project set of provider identifiers that are currently known to be
//! unusable (rate-limited, unauthorized, out of credit). Admission consults
//! this registry for the provider the task's agent config would use; an
//! exhausted provider's tasks stay `ready`, they just aren't dispatched.

use std::collections::HashMap;
use std::sync::RwLock;

use crate::model::types::{ProjectId, ProviderId};

/// Per-project set of currently-exhausted provider identifiers.
#[derive(Default)]
pub struct ExhaustionRegistry {
    exhausted: RwLock<HashMap<ProjectId, std::collections::HashSet<ProviderId>>>,
}

impl ExhaustionRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Mark `provider` exhausted for `project`. Idempotent.
    pub fn mark(&self, project: &ProjectId, provider: &ProviderId) {
        let mut guard = self.exhausted.write().unwrap_or_else(std::sync::PoisonError::into_inner);
        guard
            .entry(project.clone())
            .or_default()
            .insert(provider.clone());
    }

    /// Clear `provider`'s exhausted mark for `project`. No-op if it wasn't
    /// marked.
    pub fn clear(&self, project: &ProjectId, provider: &ProviderId) {
        let mut guard = self.exhausted.write().unwrap_or_else(std::sync::PoisonError::into_inner);
        if let Some(set) = guard.get_mut(project) {
            set.remove(provider);
        }
    }

    /// `true` if `provider` is currently marked exhausted for `project`.
    #[must_use]
    pub fn is_exhausted(&self, project: &ProjectId, provider: &ProviderId) -> bool {
        let guard = self.exhausted.read().unwrap_or_else(std::sync::PoisonError::into_inner);
        guard.get(project).is_some_and(|set| set.contains(provider))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pid(s: &str) -> ProjectId {
        ProjectId::new(s).unwrap()
    }

    fn provider(s: &str) -> ProviderId {
        ProviderId::new(s).unwrap()
    }

    #[test]
    fn unmarked_provider_is_not_exhausted() {
        let registry = ExhaustionRegistry::new();
        assert!(!registry.is_exhausted(&pid("p1"), &provider("anthropic")));
    }

    #[test]
    fn mark_then_is_exhausted() {
        let registry = ExhaustionRegistry::new();
        registry.mark(&pid("p1"), &provider("anthropic"));
        assert!(registry.is_exhausted(&pid("p1"), &provider("anthropic")));
    }

    #[test]
    fn clear_removes_mark() {
        let registry = ExhaustionRegistry::new();
        registry.mark(&pid("p1"), &provider("anthropic"));
        registry.clear(&pid("p1"), &provider("anthropic"));
        assert!(!registry.is_exhausted(&pid("p1"), &provider("anthropic")));
    }

    #[test]
    fn marks_are_scoped_per_project() {
        let registry = ExhaustionRegistry::new();
        registry.mark(&pid("p1"), &provider("anthropic"));
        assert!(!registry.is_exhausted(&pid("p2"), &provider("anthropic")));
    }
}
