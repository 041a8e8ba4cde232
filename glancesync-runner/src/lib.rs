//! Sync orchestrator: turns region/target tokens into an ordered region list
//! and runs one region job per region, sequentially or in bounded batches on
//! tokio's blocking pool.

mod error;
pub mod orchestrator;
pub mod paths;
pub mod plan;

pub use error::RunnerError;
pub use orchestrator::{init_tracing, Orchestrator, RegionRun, RegionStatus, StatusRow};
pub use plan::{plan_regions, RegionToken};
