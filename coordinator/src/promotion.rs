//! Guarded promotion of a replica to primary.

use std::fmt;
use std::sync::Arc;

use serde::Serialize;
use tracing::{info, instrument, warn};

use replicant_agent::{DatabaseHealthCheck, LocalPromoter};
use replicant_common::{ClusterError, ClusterIdentity, PrimaryName, PromotionDecision, Result};
use replicant_directory::{ClaimMode, NameDirectory};

use crate::metrics::{CoordinationMetrics, SharedMetrics};

/// Outcome of a promotion request.
#[derive(Debug, Clone, Serialize)]
pub struct PromotionReport {
    /// What the guard decided.
    pub decision: PromotionDecision,
    /// Human-readable reason.
    pub explanation: String,
    /// Address published under the primary name when the request arrived.
    pub incumbent: Option<String>,
}

impl PromotionReport {
    fn new(
        decision: PromotionDecision,
        explanation: impl Into<String>,
        incumbent: Option<&str>,
    ) -> Self {
        Self {
            decision,
            explanation: explanation.into(),
            incumbent: incumbent.map(str::to_string),
        }
    }
}

impl fmt::Display for PromotionReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.decision, self.explanation)
    }
}

/// What probing the incumbent revealed.
#[derive(Debug)]
enum Incumbent {
    Active,
    InRecovery,
    Unreachable(String),
}

/// Validates a promotion against the live incumbent before executing it.
///
/// The check and the final claim are not atomic. The claim is conditional on
/// the binding the guard observed, so a node that re-bound the name in
/// between makes the claim fail with `AlreadyClaimed` rather than be
/// overwritten. Only a forced promotion overwrites unconditionally.
pub struct PromotionGuard {
    identity: ClusterIdentity,
    primary_name: PrimaryName,
    directory: Arc<dyn NameDirectory>,
    health: Arc<dyn DatabaseHealthCheck>,
    promoter: Arc<dyn LocalPromoter>,
    local_host: String,
    refuse_unreachable: bool,
    metrics: SharedMetrics,
}

impl PromotionGuard {
    /// Create a guard for the local node `identity`.
    pub fn new(
        identity: ClusterIdentity,
        naming_domain: &str,
        directory: Arc<dyn NameDirectory>,
        health: Arc<dyn DatabaseHealthCheck>,
        promoter: Arc<dyn LocalPromoter>,
    ) -> Self {
        let primary_name = identity.primary_name(naming_domain);
        Self {
            identity,
            primary_name,
            directory,
            health,
            promoter,
            local_host: "localhost".to_string(),
            refuse_unreachable: false,
            metrics: Arc::new(CoordinationMetrics::new()),
        }
    }

    /// Host the local database is checked at.
    pub fn with_local_host(mut self, host: impl Into<String>) -> Self {
        self.local_host = host.into();
        self
    }

    /// Refuse, rather than proceed, when the incumbent cannot be reached.
    pub fn with_refuse_unreachable(mut self, refuse: bool) -> Self {
        self.refuse_unreachable = refuse;
        self
    }

    /// Report into shared metrics.
    pub fn with_metrics(mut self, metrics: SharedMetrics) -> Self {
        self.metrics = metrics;
        self
    }

    /// Published primary name guarded by this instance.
    pub fn primary_name(&self) -> &PrimaryName {
        &self.primary_name
    }

    /// Decide on and, if approved, execute a promotion.
    ///
    /// Refusals are reported as decisions, not errors. Errors mean nothing
    /// was decided (directory or local check failures) or that an approved
    /// promotion could not be carried out.
    #[instrument(skip(self), fields(name = %self.primary_name, address = %self.identity.address()))]
    pub async fn promote(&self, force: bool) -> Result<PromotionReport> {
        self.ensure_local_replica().await?;

        let record = self.directory.lookup(&self.primary_name).await?;
        let incumbent = record.address();

        let (decision, explanation, mode) = match incumbent {
            None => (
                PromotionDecision::Promoted,
                format!("no primary published under {}", self.primary_name),
                ClaimMode::IfAbsent,
            ),
            Some(holder) if holder == self.identity.address() => (
                PromotionDecision::Promoted,
                format!("{} already points at this node", self.primary_name),
                ClaimMode::IfAbsent,
            ),
            Some(holder) => match self.inspect_incumbent(holder).await? {
                Incumbent::Active if !force => {
                    return Ok(self.refuse(
                        PromotionDecision::RefusedActivePrimary,
                        format!("{} is an active primary; use --force to override", holder),
                        incumbent,
                    ));
                }
                Incumbent::Active => (
                    PromotionDecision::ForcedOverActivePrimary,
                    format!("forced over active primary {}", holder),
                    ClaimMode::Force,
                ),
                Incumbent::InRecovery => (
                    PromotionDecision::Promoted,
                    format!("incumbent {} is in recovery, not an active primary", holder),
                    self.replace_mode(holder, force),
                ),
                Incumbent::Unreachable(reason) if self.refuse_unreachable && !force => {
                    return Ok(self.refuse(
                        PromotionDecision::RefusedUnreachable,
                        format!("incumbent {} unreachable ({}); use --force to override", holder, reason),
                        incumbent,
                    ));
                }
                Incumbent::Unreachable(reason) => {
                    warn!(incumbent = holder, reason = %reason, "Incumbent unreachable, promoting anyway");
                    (
                        PromotionDecision::Promoted,
                        format!("incumbent {} unreachable ({}), ambiguous", holder, reason),
                        self.replace_mode(holder, force),
                    )
                }
            },
        };

        // Never retried: a failed promote leaves the directory untouched.
        self.promoter.promote().await?;

        self.directory
            .claim(&self.primary_name, self.identity.address(), mode)
            .await?;
        self.metrics.promotion(decision);

        info!(
            decision = %decision,
            incumbent = incumbent.unwrap_or("-"),
            "Promoted local database"
        );
        Ok(PromotionReport::new(decision, explanation, incumbent))
    }

    fn replace_mode(&self, holder: &str, force: bool) -> ClaimMode {
        if force {
            ClaimMode::Force
        } else {
            ClaimMode::ReplaceIfHeldBy(holder.to_string())
        }
    }

    fn refuse(
        &self,
        decision: PromotionDecision,
        explanation: String,
        incumbent: Option<&str>,
    ) -> PromotionReport {
        self.metrics.promotion(decision);
        warn!(decision = %decision, explanation = %explanation, "Promotion refused");
        PromotionReport::new(decision, explanation, incumbent)
    }

    async fn ensure_local_replica(&self) -> Result<()> {
        let in_recovery = self
            .health
            .is_in_recovery(&self.local_host)
            .await
            .map_err(|e| match e {
                ClusterError::IncumbentUnreachable { reason, .. } => ClusterError::PromotionFailed(
                    format!("local database at {} unreachable: {}", self.local_host, reason),
                ),
                other => other,
            })?;

        if !in_recovery {
            return Err(ClusterError::NotReplica(format!(
                "database at {} is not in recovery",
                self.local_host
            )));
        }
        Ok(())
    }

    /// Only `IncumbentUnreachable` counts as unreachable; an endpoint that
    /// answers with an error aborts the promotion.
    async fn inspect_incumbent(&self, holder: &str) -> Result<Incumbent> {
        let unreachable = |e: ClusterError| match e {
            ClusterError::IncumbentUnreachable { reason, .. } => Ok(Incumbent::Unreachable(reason)),
            other => Err(other),
        };

        match self.health.ping(holder).await {
            Ok(true) => {}
            Ok(false) => {
                return Err(ClusterError::DatabaseError(format!(
                    "{}: unexpected ping answer",
                    holder
                )))
            }
            Err(e) => return unreachable(e),
        }

        match self.health.is_in_recovery(holder).await {
            Ok(true) => Ok(Incumbent::InRecovery),
            Ok(false) => Ok(Incumbent::Active),
            Err(e) => unreachable(e),
        }
    }
}
