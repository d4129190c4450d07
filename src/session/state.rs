//! Broker-side session state that has to survive a reconnect.

use std::collections::BTreeSet;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use crate::codec::TubeChange;

/// Tube every fresh connection uses and watches.
pub const DEFAULT_TUBE: &str = "default";

/// The used tube and watch list of the current session.
///
/// Tracks every confirmed `use`/`watch`/`ignore` so it can be replayed on a
/// new connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionState {
    pub used_tube: String,
    pub watched_tubes: BTreeSet<String>,
}

impl SessionState {
    /// State of a freshly opened connection.
    pub fn new() -> Self {
        Self {
            used_tube: DEFAULT_TUBE.to_string(),
            watched_tubes: BTreeSet::from([DEFAULT_TUBE.to_string()]),
        }
    }

    /// Record a confirmed tube change.
    pub fn apply(&mut self, change: &TubeChange) {
        match change {
            TubeChange::Use(tube) => self.used_tube = tube.clone(),
            TubeChange::Watch(tube) => {
                self.watched_tubes.insert(tube.clone());
            }
            TubeChange::Ignore(tube) => {
                self.watched_tubes.remove(tube);
            }
        }
    }

    /// Whether this is the state of a fresh connection.
    pub fn is_default(&self) -> bool {
        *self == Self::new()
    }

    /// Commands that bring a fresh connection to this state, in order:
    /// `use`, then every extra `watch`, then `ignore default` if needed.
    pub fn replay_plan(&self) -> Vec<TubeChange> {
        let mut plan = Vec::new();

        if self.used_tube != DEFAULT_TUBE {
            plan.push(TubeChange::Use(self.used_tube.clone()));
        }
        for tube in self.watched_tubes.iter().filter(|t| *t != DEFAULT_TUBE) {
            plan.push(TubeChange::Watch(tube.clone()));
        }
        if !self.watched_tubes.contains(DEFAULT_TUBE) {
            plan.push(TubeChange::Ignore(DEFAULT_TUBE.to_string()));
        }

        plan
    }
}

impl Default for SessionState {
    fn default() -> Self {
        Self::new()
    }
}

/// [`SessionState`] shared between the connection task, which records
/// confirmed changes, and the supervisor, which replays them.
#[derive(Debug, Clone, Default)]
pub struct SharedSession {
    inner: Arc<Mutex<SessionState>>,
}

impl SharedSession {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, SessionState> {
        // State is plain data; a panic mid-update cannot leave it invalid.
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn apply(&self, change: &TubeChange) {
        self.lock().apply(change);
    }

    pub fn snapshot(&self) -> SessionState {
        self.lock().clone()
    }

    /// Back to the state of a fresh connection.
    pub fn reset(&self) {
        *self.lock() = SessionState::new();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fresh_state() {
        let state = SessionState::new();
        assert_eq!(state.used_tube, "default");
        assert_eq!(state.watched_tubes.len(), 1);
        assert!(state.is_default());
        assert!(state.replay_plan().is_empty());
    }

    #[test]
    fn test_replay_plan_order() {
        let mut state = SessionState::new();
        state.apply(&TubeChange::Use("used".into()));
        state.apply(&TubeChange::Watch("watched".into()));
        state.apply(&TubeChange::Ignore("default".into()));

        assert_eq!(
            state.replay_plan(),
            vec![
                TubeChange::Use("used".into()),
                TubeChange::Watch("watched".into()),
                TubeChange::Ignore("default".into()),
            ]
        );
    }

    #[test]
    fn test_watch_then_ignore_same_tube() {
        let mut state = SessionState::new();
        state.apply(&TubeChange::Watch("a".into()));
        state.apply(&TubeChange::Ignore("a".into()));
        assert!(state.is_default());
    }

    #[test]
    fn test_shared_reset() {
        let shared = SharedSession::new();
        shared.apply(&TubeChange::Use("jobs".into()));
        assert_eq!(shared.snapshot().used_tube, "jobs");

        shared.reset();
        assert!(shared.snapshot().is_default());
    }
}
