use std::path::{Path, PathBuf};

use crate::{config::ensure_readable, error::ConfigError};

/// Pre-existing step 1 artifacts that stand in for running step 1.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum Step1Checkpoint {
    #[default]
    NoCheckpoint,
    Checkpoint {
        otu_map: PathBuf,
        failures_fasta: PathBuf,
    },
}

impl Step1Checkpoint {
    /// Both paths or neither: one without the other cannot seed step 2.
    pub fn resolve(
        otu_map: Option<&Path>,
        failures_fasta: Option<&Path>,
    ) -> Result<Self, ConfigError> {
        match (otu_map, failures_fasta) {
            (None, None) => Ok(Step1Checkpoint::NoCheckpoint),
            (Some(_), None) => Err(ConfigError::IncompleteCheckpoint("step 1 OTU map")),
            (None, Some(_)) => Err(ConfigError::IncompleteCheckpoint("step 1 failures fasta")),
            (Some(otu_map), Some(failures_fasta)) => {
                ensure_readable("Step 1 OTU map", otu_map)?;
                ensure_readable("Step 1 failures fasta", failures_fasta)?;

                Ok(Step1Checkpoint::Checkpoint {
                    otu_map: otu_map.to_path_buf(),
                    failures_fasta: failures_fasta.to_path_buf(),
                })
            }
        }
    }

    pub fn skips_step1(&self) -> bool {
        matches!(self, Step1Checkpoint::Checkpoint { .. })
    }
}
