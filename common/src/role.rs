//! Role, process outcome and coordination state machine types.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Role a node holds for the lifetime of one coordination run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// Node accepting writes.
    Primary,
    /// Read-only node replicating from the primary.
    Replica,
}

impl Role {
    /// Get the role name as used in logs and CLI output.
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Primary => "primary",
            Role::Replica => "replica",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome of polling the database process after start.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ProcessOutcome {
    /// The process is up and serving.
    Started,
    /// The process died or reported a failed start.
    Failed,
}

/// Per-run coordination state.
///
/// Transitions only move forward; `Started` and `Failed` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CoordinationState {
    /// Role not yet decided.
    Unresolved,
    /// Running the role-specific preparation hook.
    Preparing(Role),
    /// Database process started, waiting for an outcome.
    Starting,
    /// Process running with the given role.
    Started(Role),
    /// Run failed.
    Failed,
}

impl CoordinationState {
    /// Check if this is a terminal state.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            CoordinationState::Started(_) | CoordinationState::Failed
        )
    }

    /// Check if transition to given state is valid.
    pub fn can_transition_to(&self, next: CoordinationState) -> bool {
        use CoordinationState::*;

        match (self, next) {
            (Unresolved, Preparing(_)) => true,
            (Preparing(_), Starting) => true,
            (Starting, Started(_)) => true,
            (current, Failed) => !current.is_terminal(),
            _ => false,
        }
    }

    /// Role decided for this run, where the state carries one.
    pub fn role(&self) -> Option<Role> {
        match self {
            CoordinationState::Preparing(role) | CoordinationState::Started(role) => Some(*role),
            _ => None,
        }
    }
}

impl fmt::Display for CoordinationState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CoordinationState::Unresolved => write!(f, "unresolved"),
            CoordinationState::Preparing(role) => write!(f, "preparing({})", role),
            CoordinationState::Starting => write!(f, "starting"),
            CoordinationState::Started(role) => write!(f, "started({})", role),
            CoordinationState::Failed => write!(f, "failed"),
        }
    }
}

/// Result of a promotion attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PromotionDecision {
    /// No effective incumbent; this node was promoted.
    Promoted,
    /// An active primary answered and force was not given.
    RefusedActivePrimary,
    /// An active primary answered and was overridden by force.
    ForcedOverActivePrimary,
    /// The incumbent could not be reached and strict mode refused to proceed.
    RefusedUnreachable,
}

impl PromotionDecision {
    /// Check if the local node was promoted.
    pub fn is_promoted(&self) -> bool {
        matches!(
            self,
            PromotionDecision::Promoted | PromotionDecision::ForcedOverActivePrimary
        )
    }

    /// Get the decision code printed by the CLI.
    pub fn code(&self) -> &'static str {
        match self {
            PromotionDecision::Promoted => "PROMOTED",
            PromotionDecision::RefusedActivePrimary => "REFUSED_ACTIVE_PRIMARY",
            PromotionDecision::ForcedOverActivePrimary => "FORCED_OVER_ACTIVE_PRIMARY",
            PromotionDecision::RefusedUnreachable => "REFUSED_UNREACHABLE",
        }
    }
}

impl fmt::Display for PromotionDecision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}
