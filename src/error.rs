use std::{path::PathBuf, process::ExitStatus};

use thiserror::Error;

/// Problems detected before any external operation runs.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("{} does not exist or is not readable: {:?}", .0, .1)]
    MissingPath(&'static str, PathBuf),

    #[error(
        "Both a step 1 OTU map and a step 1 failures fasta are required to skip step 1 \
        (got only the {})", .0
    )]
    IncompleteCheckpoint(&'static str),

    #[error("Output directory {:?} already exists. Choose a different directory, or force overwrite with -f", .0)]
    OutputDirExists(PathBuf),

    #[error("Output directory {:?} is not writable", .0)]
    OutputDirUnwritable(PathBuf, #[source] std::io::Error),

    #[error("Invalid value for {}: {}", .0, .1)]
    InvalidValue(&'static str, String),

    #[error("Unknown OTU picking method: {}", .0)]
    UnknownMethod(String),

    #[error("Could not parse line {} of the parameters file: {:?}", .0, .1)]
    ParameterLine(usize, String),
}

/// Failure of an external operation. Never retried.
#[derive(Error, Debug)]
pub enum ExecError {
    #[error("Could not start {:?}", .description)]
    Spawn {
        description: String,
        #[source]
        source: std::io::Error,
    },

    #[error("{:?} finished with {}{}\n{}", .description, .status, log_hint(.log_path), .stderr_tail)]
    Failed {
        description: String,
        status: ExitStatus,
        stderr_tail: String,
        log_path: Option<PathBuf>,
    },

    #[error("{:?} did not produce the expected output {:?}{}", .description, .path, log_hint(.log_path))]
    MissingOutput {
        description: String,
        path: PathBuf,
        log_path: Option<PathBuf>,
    },
}

fn log_hint(log_path: &Option<PathBuf>) -> String {
    match log_path {
        Some(path) => format!(" (see {path:?})"),
        None => String::new(),
    }
}

/// Invariant violations while reading or merging OTU maps.
#[derive(Error, Debug)]
pub enum MergeError {
    #[error("Sequence {:?} is assigned to both OTU {:?} and OTU {:?}", .seq_id, .first_otu, .second_otu)]
    DuplicateSequence {
        seq_id: String,
        first_otu: String,
        second_otu: String,
    },

    #[error("Line {} of the OTU map has no OTU identifier", .0)]
    MissingOtuId(u64),

    #[error("OTU {:?} appears twice in the same OTU map", .0)]
    DuplicateOtu(String),

    #[error(
        "OTU {:?} is produced by more than one stage; reference ids must not start with the new \
        reference set id", .otu_id
    )]
    OtuIdCollision { otu_id: String },
}

/// A stage's OTU map and failures do not split the stage input exactly.
#[derive(Error, Debug)]
pub enum PartitionError {
    #[error("{} sequences are both clustered and failed (first: {:?})", .count, .first)]
    Overlapping { count: usize, first: String },

    #[error("{} clustered or failed sequences are not in {:?} (first: {:?})", .count, .input, .first)]
    Unknown {
        count: usize,
        input: PathBuf,
        first: String,
    },

    #[error("{} of {} input sequences are neither clustered nor failed (first: {:?})", .count, .total, .first)]
    Unaccounted {
        count: usize,
        total: usize,
        first: String,
    },
}
