//! Replicant Agent
//!
//! Adapters between the coordinator and the host it runs on: where instance
//! metadata comes from, how the database process is started and polled, what
//! a node does to prepare for its role, and how a database endpoint is checked
//! or promoted.

pub mod command;
pub mod health;
pub mod metadata;
pub mod preparation;
pub mod promoter;
pub mod recovery;
pub mod supervisor;

pub use health::{DatabaseHealthCheck, PgHealthCheck};
pub use metadata::{EnvMetadataSource, JsonFileMetadataSource, MetadataSource, StaticMetadataSource};
pub use preparation::{PostgresPreparation, PreparationStrategy, ScriptPreparation};
pub use promoter::{LocalPromoter, PgCtlPromoter};
pub use supervisor::{InitScriptSupervisor, ProcessSupervisor};
