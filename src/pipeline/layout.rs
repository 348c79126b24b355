//! File and directory names of a run. Downstream tooling relies on these names.

use std::{
    fmt,
    path::{Path, PathBuf},
};

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Stage {
    Prefilter,
    Step1,
    Step2,
    Step3,
    Step4,
}

impl Stage {
    pub fn dir_name(self) -> &'static str {
        match self {
            Stage::Prefilter => "prefilter_otus",
            Stage::Step1 => "step1_otus",
            Stage::Step2 => "step2_otus",
            Stage::Step3 => "step3_otus",
            Stage::Step4 => "step4_otus",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Stage::Prefilter => "Prefilter",
            Stage::Step1 => "Step 1 (closed-reference OTU picking)",
            Stage::Step2 => "Step 2 (de novo OTU picking on the subsampled failures)",
            Stage::Step3 => "Step 3 (closed-reference OTU picking against the step 2 OTUs)",
            Stage::Step4 => "Step 4 (de novo OTU picking on the remaining failures)",
        };
        f.write_str(name)
    }
}

/// File name of `path` without its last extension, the prefix clustering tools give their outputs.
pub fn file_stem(path: &Path) -> String {
    path.file_stem()
        .map(|stem| stem.to_string_lossy().into_owned())
        .unwrap_or_default()
}

/// Files a clustering run of `input` leaves in its stage directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StageFiles {
    pub otu_map: PathBuf,
    pub failures: PathBuf,
    pub clusters: PathBuf,
    pub log: PathBuf,
}

impl StageFiles {
    pub fn new(stage_dir: &Path, input: &Path, clusters_format: &str) -> Self {
        let stem = file_stem(input);

        StageFiles {
            otu_map: stage_dir.join(format!("{stem}_otus.txt")),
            failures: stage_dir.join(format!("{stem}_failures.txt")),
            clusters: stage_dir.join(format!("{stem}_clusters.{clusters_format}")),
            log: stage_dir.join(format!("{stem}_otus.log")),
        }
    }
}

/// Paths under one run's output directory (the top level, or one iteration).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunLayout {
    root: PathBuf,
}

impl RunLayout {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        RunLayout { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn stage_dir(&self, stage: Stage) -> PathBuf {
        self.root.join(stage.dir_name())
    }

    pub fn iteration(&self, index: usize) -> RunLayout {
        RunLayout::new(self.root.join(index.to_string()))
    }

    pub fn workflow_log(&self, started: &chrono::DateTime<chrono::Local>) -> PathBuf {
        self.root.join(format!("log_{}.txt", started.format("%Y%m%d%H%M%S")))
    }

    pub fn prefiltered_seqs(&self, input: &Path) -> PathBuf {
        self.stage_dir(Stage::Prefilter).join(format!("prefiltered_{}.fna", file_stem(input)))
    }

    pub fn step1_rep_set(&self) -> PathBuf {
        self.stage_dir(Stage::Step1).join("step1_rep_set.fna")
    }

    pub fn step1_failures_fasta(&self) -> PathBuf {
        self.stage_dir(Stage::Step1).join("failures.fasta")
    }

    pub fn subsampled_failures(&self) -> PathBuf {
        self.stage_dir(Stage::Step2).join("subsampled_failures.fna")
    }

    pub fn step2_rep_set(&self) -> PathBuf {
        self.stage_dir(Stage::Step2).join("step2_rep_set.fna")
    }

    pub fn step3_failures_fasta(&self) -> PathBuf {
        self.stage_dir(Stage::Step3).join("failures_failures.fasta")
    }

    pub fn step4_rep_set(&self) -> PathBuf {
        self.stage_dir(Stage::Step4).join("step4_rep_set.fna")
    }

    pub fn final_otu_map(&self) -> PathBuf {
        self.root.join("final_otu_map.txt")
    }

    pub fn final_otu_map_mc(&self, min_otu_size: usize) -> PathBuf {
        self.root.join(format!("final_otu_map_mc{min_otu_size}.txt"))
    }

    pub fn final_otu_map_mc_without(&self, min_otu_size: usize, failures_label: &str) -> PathBuf {
        self.root.join(format!("final_otu_map_mc{min_otu_size}_no_{failures_label}.txt"))
    }

    pub fn rep_set(&self) -> PathBuf {
        self.root.join("rep_set.fna")
    }

    pub fn rep_set_without(&self, failures_label: &str) -> PathBuf {
        self.root.join(format!("rep_set_no_{failures_label}.fna"))
    }

    pub fn new_refseqs(&self) -> PathBuf {
        self.root.join("new_refseqs.fna")
    }

    pub fn taxonomy_dir(&self) -> PathBuf {
        self.root.join("uclust_assigned_taxonomy")
    }

    pub fn alignment_dir(&self) -> PathBuf {
        self.root.join("pynast_aligned_seqs")
    }

    pub fn tree(&self) -> PathBuf {
        self.root.join("rep_set.tre")
    }

    /// `otu_table_mc<N>[_w_tax][_no_<failures_label>].biom`
    pub fn otu_table(&self, min_otu_size: usize, with_taxonomy: bool, without: Option<&str>) -> PathBuf {
        let mut name = format!("otu_table_mc{min_otu_size}");

        if with_taxonomy {
            name.push_str("_w_tax");
        }

        if let Some(failures_label) = without {
            name.push_str("_no_");
            name.push_str(failures_label);
        }

        name.push_str(".biom");
        self.root.join(name)
    }
}
