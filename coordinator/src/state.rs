//! Per-run coordination state.

use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::RwLock;

use replicant_common::{ClusterError, CoordinationState, Result, Role};

/// State of the single coordination run a coordinator instance may perform.
pub struct RunState {
    state: RwLock<CoordinationState>,
    role: RwLock<Option<Role>>,
    begun: AtomicBool,
    claim_attempted: AtomicBool,
}

impl RunState {
    /// Create an unresolved run.
    pub fn new() -> Self {
        Self {
            state: RwLock::new(CoordinationState::Unresolved),
            role: RwLock::new(None),
            begun: AtomicBool::new(false),
            claim_attempted: AtomicBool::new(false),
        }
    }

    /// Mark the run as begun. Fails if it already was.
    pub fn begin(&self) -> Result<()> {
        if self.begun.swap(true, Ordering::SeqCst) {
            return Err(ClusterError::RunAlreadyStarted);
        }
        Ok(())
    }

    /// Move forward to `next`.
    pub fn transition(&self, next: CoordinationState) -> Result<()> {
        let mut state = self.state.write();
        if !state.can_transition_to(next) {
            return Err(ClusterError::InvalidTransition {
                from: *state,
                to: next,
            });
        }

        if let Some(role) = next.role() {
            *self.role.write() = Some(role);
        }
        *state = next;
        Ok(())
    }

    /// Move to `Failed` unless already terminal.
    ///
    /// Returns whether the state changed.
    pub fn fail(&self) -> bool {
        let mut state = self.state.write();
        if state.is_terminal() {
            return false;
        }
        *state = CoordinationState::Failed;
        true
    }

    /// Current state.
    pub fn current(&self) -> CoordinationState {
        *self.state.read()
    }

    /// Role decided by resolution, kept after leaving `Preparing`.
    pub fn decided_role(&self) -> Option<Role> {
        *self.role.read()
    }

    /// Record that this run tried to claim the primary name.
    pub fn mark_claim_attempted(&self) {
        self.claim_attempted.store(true, Ordering::SeqCst);
    }

    /// Whether a claim was attempted, successful or not.
    pub fn claim_attempted(&self) -> bool {
        self.claim_attempted.load(Ordering::SeqCst)
    }
}

impl Default for RunState {
    fn default() -> Self {
        Self::new()
    }
}
