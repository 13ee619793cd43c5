//! Summary engine, estimation runs and mempool logging

mod estimation_run;
mod mempool_logger;
mod summary_engine;

pub use estimation_run::{fold_into_bucket, EstimationRun, RunError, RunOutput};
pub use mempool_logger::{LoggerError, MempoolLogger};
pub use summary_engine::{
    build_summary, ConstructError, EngineError, SummaryEngine, SummaryEngineConfig,
};
