//! Replicant Coordinator
//!
//! Decides whether a freshly booted database node is the cluster's primary
//! or a replica, brings it up in that role and publishes the primary's
//! address. Also guards operator-requested promotions against creating a
//! second primary.

pub mod bootstrap;
pub mod config;
pub mod coordinator;
pub mod metrics;
pub mod promotion;
pub mod resolver;
pub mod state;

pub use config::ClusterConfig;
pub use coordinator::ClusterCoordinator;
pub use metrics::{CoordinationMetrics, MetricsSnapshot, SharedMetrics};
pub use promotion::{PromotionGuard, PromotionReport};
pub use resolver::RoleResolver;
