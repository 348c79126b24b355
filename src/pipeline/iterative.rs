use std::path::PathBuf;

use anyhow::Context;
use itertools::Itertools;
use tracing::info;

use crate::checkpoint::Step1Checkpoint;

use super::{layout::RunLayout, merge, output, OpenReferencePipeline, PipelineOutputs};

/// Processes `inputs` in order, iteration `i` in `<output_dir>/<i>/`. Each iteration clusters
/// against the reference grown by the previous one, so later batches can join OTUs first seen in
/// earlier batches. The iterations' maps are merged and assembled once at the top level.
pub fn run_iterations(
    pipeline: &OpenReferencePipeline<'_>,
    inputs: &[PathBuf],
    layout: &RunLayout,
    checkpoint: &Step1Checkpoint,
) -> anyhow::Result<PipelineOutputs> {
    let params = pipeline.params();
    let mut reference = params.reference.clone();
    let mut iterations = Vec::with_capacity(inputs.len());

    for (i, input) in inputs.iter().enumerate() {
        let iteration_layout = layout.iteration(i);
        let new_ref_set_id = format!("{}.{i}", params.new_reference_set_id);

        // the checkpoint describes step 1 of the first input only
        let checkpoint = if i == 0 { checkpoint.clone() } else { Step1Checkpoint::NoCheckpoint };

        info!("Iteration {i}: {input:?} against {reference:?}");

        let merged = pipeline
            .run_batch(input, &iteration_layout, &reference, &new_ref_set_id, &checkpoint)
            .with_context(|| format!("Iteration {i} on {input:?}"))?;

        reference = merged.new_refseqs.clone();
        iterations.push(merged);
    }

    let ctx = pipeline.stage_context(layout);

    let otu_maps = iterations.iter().map(|merged| merged.final_otu_map.clone()).collect_vec();
    let rep_sets = iterations
        .iter()
        .flat_map(|merged| merged.stage_rep_sets.iter().cloned())
        .collect_vec();

    let merged = merge::merge_stage_maps(&ctx, &reference, &otu_maps, merge::SharedOtus::Unite, rep_sets)
        .context("Merging the iterations")?;

    output::assemble(&ctx, &merged)
}
