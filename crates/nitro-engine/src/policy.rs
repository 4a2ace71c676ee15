//! Approval of objectives proposed by peers.

use nitro_protocols::Objective;

/// Decides whether the node joins an objective a peer started.
pub trait PolicyMaker: Send + Sync {
    /// Whether to approve `objective`. Consulted once per objective.
    fn should_approve(&self, objective: &Objective) -> bool;
}

/// Approves everything.
#[derive(Debug, Clone, Copy, Default)]
pub struct PermissivePolicy;

impl PolicyMaker for PermissivePolicy {
    fn should_approve(&self, _objective: &Objective) -> bool {
        true
    }
}

/// Rejects everything.
#[derive(Debug, Clone, Copy, Default)]
pub struct RejectAllPolicy;

impl PolicyMaker for RejectAllPolicy {
    fn should_approve(&self, objective: &Objective) -> bool {
        tracing::debug!(objective = %objective.id(), "policy rejects objective");
        false
    }
}
