//! Open-reference OTU picking: closed-reference clustering against a reference database, de novo
//! clustering of a subsample of the failures, closed-reference clustering of all the failures
//! against the new clusters, and a last de novo pass over what is still unassigned.

use std::{
    fs,
    path::{Path, PathBuf},
};

use anyhow::Context;
use tracing::info;

use crate::{
    checkpoint::Step1Checkpoint,
    config::{ensure_readable, OutputDirCheck, PipelineParameters},
    error::ConfigError,
    executor::CommandExecutor,
    tools::Toolbox,
};

pub mod iterative;
pub mod layout;
pub mod merge;
pub mod output;
pub mod stages;

use layout::RunLayout;
use merge::MergedRun;
use stages::StageContext;

/// Artifacts of a finished run, all under the output directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PipelineOutputs {
    pub final_otu_map: PathBuf,
    pub final_otu_map_mc: PathBuf,
    pub rep_set: PathBuf,
    pub new_refseqs: PathBuf,
    pub otu_table: PathBuf,
    pub taxonomy_assignments: Option<PathBuf>,
    /// Present when alignment and tree building ran.
    pub tree: Option<PathBuf>,
    pub otu_table_no_align_failures: Option<PathBuf>,
    pub rep_set_no_align_failures: Option<PathBuf>,
}

pub struct OpenReferencePipeline<'a> {
    params: &'a PipelineParameters,
    tools: &'a Toolbox,
    exec: &'a CommandExecutor,
}

impl<'a> OpenReferencePipeline<'a> {
    pub fn new(params: &'a PipelineParameters, tools: &'a Toolbox, exec: &'a CommandExecutor) -> Self {
        OpenReferencePipeline { params, tools, exec }
    }

    pub fn params(&self) -> &PipelineParameters {
        self.params
    }

    /// Runs the whole workflow on `inputs`. A single input is processed directly; several inputs
    /// are processed as successive batches, each one using the OTUs found by the previous ones.
    ///
    /// Configuration problems are reported before the output directory is touched.
    pub fn pick_open_reference_otus(
        &self,
        inputs: &[PathBuf],
        output_dir: &Path,
        checkpoint: &Step1Checkpoint,
    ) -> anyhow::Result<PipelineOutputs> {
        if inputs.is_empty() {
            return Err(ConfigError::InvalidValue("input_fps", "no input sequence files".to_owned()).into());
        }

        for input in inputs {
            ensure_readable("Input sequences", input)?;
        }

        self.params.validate()?;

        OutputDirCheck::evaluate(output_dir, self.params.force_overwrite).into_result(output_dir)?;

        let layout = RunLayout::new(output_dir);
        let log_path = layout.workflow_log(&chrono::Local::now());

        let opened_log = self
            .exec
            .open_log(&log_path)
            .with_context(|| format!("Opening workflow log {log_path:?}"))?;

        let result = match inputs {
            [input] => self.run_single(input, &layout, checkpoint),
            _ => iterative::run_iterations(self, inputs, &layout, checkpoint),
        };

        if opened_log {
            self.exec.close_log();
        }

        result
    }

    fn run_single(
        &self,
        input: &Path,
        layout: &RunLayout,
        checkpoint: &Step1Checkpoint,
    ) -> anyhow::Result<PipelineOutputs> {
        let merged = self.run_batch(
            input,
            layout,
            &self.params.reference,
            &self.params.new_reference_set_id,
            checkpoint,
        )?;

        output::assemble(&self.stage_context(layout), &merged)
    }

    pub(crate) fn stage_context<'l>(&self, layout: &'l RunLayout) -> StageContext<'l>
    where
        'a: 'l,
    {
        StageContext {
            params: self.params,
            tools: self.tools,
            exec: self.exec,
            layout,
        }
    }

    /// Prefilter, steps 1 to 4 and the merge for one input file, without the output assembly.
    pub(crate) fn run_batch(
        &self,
        input: &Path,
        layout: &RunLayout,
        reference: &Path,
        new_ref_set_id: &str,
        checkpoint: &Step1Checkpoint,
    ) -> anyhow::Result<MergedRun> {
        let ctx = self.stage_context(layout);

        fs::create_dir_all(layout.root()).with_context(|| format!("Creating {:?}", layout.root()))?;

        let step1 = match checkpoint {
            Step1Checkpoint::NoCheckpoint => {
                let prefiltered;
                let step1_input = match self.params.prefilter() {
                    Some((prefilter_reference, identity)) => {
                        prefiltered = stages::run_prefilter(&ctx, input, prefilter_reference, identity)?;
                        prefiltered.as_path()
                    }
                    None => input,
                };

                stages::run_step1(&ctx, step1_input, reference)?
            }
            Step1Checkpoint::Checkpoint { otu_map, failures_fasta } => {
                info!("Using the supplied step 1 OTU map {otu_map:?} and failures {failures_fasta:?}");
                stages::use_step1_checkpoint(&ctx, input, otu_map, failures_fasta)?
            }
        };

        let mut otu_maps = vec![step1.clustered.otu_map.clone()];
        let mut rep_sets = vec![step1.clustered.rep_set.clone()];

        if step1.has_failures {
            let step2 = stages::run_step2(&ctx, &step1.failures_fasta, new_ref_set_id)?;
            let step3 = stages::run_step3(&ctx, &step1.failures_fasta, &step2.rep_set)?;

            otu_maps.push(step3.clustered.otu_map.clone());
            rep_sets.push(step2.rep_set);

            if self.params.suppress_step4 {
                info!("Step 4 suppressed, step 3 failures stay unclustered");
            } else if step3.has_failures {
                let step4 = stages::run_step4(&ctx, &step3.failures_fasta, new_ref_set_id)?;

                otu_maps.push(step4.otu_map);
                rep_sets.push(step4.rep_set);
            } else {
                info!("Step 3 left no failures, skipping step 4");
            }
        } else {
            info!("Step 1 left no failures, skipping steps 2 to 4");
        }

        merge::merge_stage_maps(&ctx, reference, &otu_maps, merge::SharedOtus::Reject, rep_sets)
    }
}
