pub mod checkpoint;
pub mod config;
pub mod error;
pub mod executor;
pub mod otu_map;
pub mod pipeline;
pub mod rep_set;
pub mod seqs;
pub mod subsample;
pub mod tools;
pub mod util;

pub use checkpoint::Step1Checkpoint;
pub use config::PipelineParameters;
pub use executor::{CommandExecutor, ExecutionMode};
pub use pipeline::{OpenReferencePipeline, PipelineOutputs};
