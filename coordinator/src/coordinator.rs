//! Coordination run: resolve a role, prepare, start, publish.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

use replicant_agent::{PreparationStrategy, ProcessSupervisor};
use replicant_common::{
    constants, whole_seconds, ClusterError, ClusterIdentity, CoordinationState, PrimaryName,
    ProcessOutcome, Result, Role,
};
use replicant_directory::{ClaimMode, NameDirectory};

use crate::metrics::{CoordinationMetrics, SharedMetrics};
use crate::resolver::RoleResolver;
use crate::state::RunState;

/// Drives one node through a single coordination run.
///
/// The run resolves the node's role from the directory, runs the matching
/// preparation hook, starts the database process and waits for its outcome.
/// A node that comes up as primary then claims the primary name. A run that
/// fails after claiming, or trying to claim, releases the name if it still
/// points at this node.
pub struct ClusterCoordinator {
    identity: ClusterIdentity,
    primary_name: PrimaryName,
    resolver: RoleResolver,
    directory: Arc<dyn NameDirectory>,
    preparation: Arc<dyn PreparationStrategy>,
    supervisor: Arc<dyn ProcessSupervisor>,
    poll_timeout: Duration,
    provisional_claim: bool,
    run: RunState,
    metrics: SharedMetrics,
    run_id: Uuid,
}

impl ClusterCoordinator {
    /// Create a coordinator for `identity`, publishing under `naming_domain`.
    pub fn new(
        identity: ClusterIdentity,
        naming_domain: &str,
        directory: Arc<dyn NameDirectory>,
        preparation: Arc<dyn PreparationStrategy>,
        supervisor: Arc<dyn ProcessSupervisor>,
    ) -> Self {
        let resolver = RoleResolver::new(directory.clone(), naming_domain);
        let primary_name = resolver.primary_name(&identity);

        Self {
            identity,
            primary_name,
            resolver,
            directory,
            preparation,
            supervisor,
            poll_timeout: constants::poll_timeout(),
            provisional_claim: false,
            run: RunState::new(),
            metrics: Arc::new(CoordinationMetrics::new()),
            run_id: Uuid::new_v4(),
        }
    }

    /// Set the ceiling on waiting for a process outcome.
    pub fn with_poll_timeout(mut self, timeout: Duration) -> Self {
        self.poll_timeout = timeout;
        self
    }

    /// Claim the primary name right after resolving `Primary`, before preparing.
    pub fn with_provisional_claim(mut self, enabled: bool) -> Self {
        self.provisional_claim = enabled;
        self
    }

    /// Report into shared metrics.
    pub fn with_metrics(mut self, metrics: SharedMetrics) -> Self {
        self.metrics = metrics;
        self
    }

    /// Run identifier used in logs.
    pub fn run_id(&self) -> Uuid {
        self.run_id
    }

    /// Local node identity.
    pub fn identity(&self) -> &ClusterIdentity {
        &self.identity
    }

    /// Published primary name of this node's cluster.
    pub fn primary_name(&self) -> &PrimaryName {
        &self.primary_name
    }

    /// Current state of the run.
    pub fn state(&self) -> CoordinationState {
        self.run.current()
    }

    /// Role decided by resolution, if resolution finished.
    pub fn decided_role(&self) -> Option<Role> {
        self.run.decided_role()
    }

    /// Metrics this coordinator reports into.
    pub fn metrics(&self) -> &SharedMetrics {
        &self.metrics
    }

    /// Perform the coordination run.
    pub async fn initialise(&self) -> Result<Role> {
        self.initialise_until(std::future::pending::<()>()).await
    }

    /// Perform the coordination run, abandoning it when `shutdown` completes.
    ///
    /// A cancelled run ends `Failed` with `Cancelled` and gets the same
    /// cleanup as any other failure.
    #[instrument(
        skip(self, shutdown),
        fields(run_id = %self.run_id, cluster = %self.identity.cluster(), address = %self.identity.address())
    )]
    pub async fn initialise_until<F>(&self, shutdown: F) -> Result<Role>
    where
        F: Future<Output = ()>,
    {
        self.run.begin()?;
        self.metrics.run_started();

        let outcome = tokio::select! {
            result = self.run_to_completion() => result,
            _ = shutdown => {
                warn!(state = %self.run.current(), "Coordination run cancelled");
                Err(ClusterError::Cancelled)
            }
        };

        match outcome {
            Ok(role) => {
                self.metrics.run_succeeded(role);
                info!(
                    role = %role,
                    name = %self.primary_name,
                    flavor = self.preparation.flavor(),
                    "Coordination run started"
                );
                Ok(role)
            }
            Err(e) => {
                self.run.fail();
                self.metrics.run_failed();
                error!(
                    error = %e,
                    code = e.error_code(),
                    role = ?self.run.decided_role(),
                    "Coordination run failed"
                );
                self.release_after_failure().await;
                Err(e)
            }
        }
    }

    async fn run_to_completion(&self) -> Result<Role> {
        let role = self.resolver.resolve(&self.identity).await?;
        self.run.transition(CoordinationState::Preparing(role))?;

        if role == Role::Primary && self.provisional_claim {
            self.claim_primary().await?;
        }

        match role {
            Role::Primary => self.preparation.prepare_master().await?,
            Role::Replica => self.preparation.prepare_replica().await?,
        }

        self.run.transition(CoordinationState::Starting)?;
        self.supervisor.start().await?;

        let outcome = tokio::time::timeout(self.poll_timeout, self.supervisor.poll(self.poll_timeout))
            .await
            .map_err(|_| ClusterError::PollTimeout {
                timeout_secs: whole_seconds(self.poll_timeout),
            })??;

        if outcome == ProcessOutcome::Failed {
            return Err(ClusterError::ProcessFailed(format!(
                "database process failed to start as {}",
                role
            )));
        }

        if role == Role::Primary {
            self.claim_primary().await?;
        }

        self.run.transition(CoordinationState::Started(role))?;
        Ok(role)
    }

    async fn claim_primary(&self) -> Result<()> {
        self.run.mark_claim_attempted();

        let result = self
            .directory
            .claim(&self.primary_name, self.identity.address(), ClaimMode::IfAbsent)
            .await;
        self.metrics.claim(result.is_ok());

        let record = result?;
        info!(
            name = %self.primary_name,
            address = record.address().unwrap_or("-"),
            "Primary name claimed"
        );
        Ok(())
    }

    /// Best-effort release after a failed primary run. Never escalates.
    async fn release_after_failure(&self) {
        if self.run.decided_role() != Some(Role::Primary) || !self.run.claim_attempted() {
            return;
        }

        match self
            .directory
            .release(&self.primary_name, self.identity.address())
            .await
        {
            Ok(true) => {
                self.metrics.release(true);
                info!(name = %self.primary_name, "Released primary name after failure");
            }
            Ok(false) => {
                debug!(name = %self.primary_name, "Primary name not bound to this node, nothing released");
            }
            Err(e) => {
                self.metrics.release(false);
                warn!(name = %self.primary_name, error = %e, "Failed to release primary name");
            }
        }
    }
}
