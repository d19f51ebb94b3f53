//! xval-engine - client × validator cross-execution
//!
//! Provides the orchestrator that:
//! - Runs one client and one validator container as a pair, waiting for the
//!   client's RPC port before launching the validator
//! - Sweeps every pair of a client set and a validator set into a result matrix
//! - Writes the matrix as a CI artifact

pub mod catalog;
pub mod config;
mod error;
pub mod layout;
pub mod matrix;
pub mod obs;
pub mod probe;
pub mod report;
pub mod runner;
pub mod sweep;
pub mod telemetry;
pub mod verdict;

// Re-export key types
pub use catalog::{CatalogError, ImageCatalog, StaticCatalog};
pub use config::{ProbeConfig, RunConfig};
pub use error::SweepError;
pub use layout::{LogLayout, PairLogs};
pub use matrix::{DuplicateCell, ResultMatrix};
pub use probe::{Prober, ReadinessOutcome};
pub use report::{render_summary_md, write_sweep_report_json, SweepReport, SweepSummary};
pub use runner::{PairRunner, PairSpec};
pub use sweep::MatrixOrchestrator;
pub use verdict::{IdentityHandoff, Role, RunError, RunVerdict, Stage};
