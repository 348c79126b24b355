use std::{collections::HashSet, fs};

use anyhow::Context;
use tracing::info;

use crate::{otu_map::OtuMap, rep_set::RepresentativeSet, seqs};

use super::{merge::MergedRun, stages::StageContext, PipelineOutputs};

/// Builds the OTU tables of a merged run, with taxonomy and a tree unless suppressed.
///
/// When alignment runs, OTUs whose representative failed to align are removed from a second
/// map, rep set and table so those three stay consistent with the tree.
pub fn assemble(ctx: &StageContext<'_>, merged: &MergedRun) -> anyhow::Result<PipelineOutputs> {
    let params = ctx.params;
    let layout = ctx.layout;
    let tools = ctx.tools;
    let min_otu_size = params.min_otu_size;

    let taxonomy_assignments = if params.suppress_taxonomy {
        None
    } else {
        let dir = layout.taxonomy_dir();
        fs::create_dir_all(&dir).with_context(|| format!("Creating {dir:?}"))?;

        Some(
            tools
                .classifier
                .classify(ctx.exec, &merged.rep_set, &dir)
                .context("Assigning taxonomy")?,
        )
    };

    let otu_table = layout.otu_table(min_otu_size, taxonomy_assignments.is_some(), None);
    tools
        .table_builder
        .build_table(ctx.exec, &merged.final_otu_map_mc, taxonomy_assignments.as_deref(), &otu_table)
        .context("Building the OTU table")?;

    let mut outputs = PipelineOutputs {
        final_otu_map: merged.final_otu_map.clone(),
        final_otu_map_mc: merged.final_otu_map_mc.clone(),
        rep_set: merged.rep_set.clone(),
        new_refseqs: merged.new_refseqs.clone(),
        otu_table,
        taxonomy_assignments,
        tree: None,
        otu_table_no_align_failures: None,
        rep_set_no_align_failures: None,
    };

    if params.suppress_align_and_tree {
        return Ok(outputs);
    }

    let dir = layout.alignment_dir();
    fs::create_dir_all(&dir).with_context(|| format!("Creating {dir:?}"))?;

    let alignment = tools
        .aligner
        .align(ctx.exec, &merged.rep_set, &dir)
        .context("Aligning representative sequences")?;
    let label = tools.aligner.failures_label();

    let map_without = layout.final_otu_map_mc_without(min_otu_size, label);
    let rep_set_without = layout.rep_set_without(label);

    ctx.exec.run_internal("Remove OTUs whose representative failed to align", || {
        let failed: HashSet<String> = if alignment.failures.exists() {
            seqs::read_ids(&alignment.failures)?.into_iter().collect()
        } else {
            HashSet::new()
        };

        OtuMap::from_path(&merged.final_otu_map_mc)?
            .without_otus(&failed)
            .write_to_path(&map_without)?;

        let mut reps = RepresentativeSet::from_fasta(&merged.rep_set)?;
        reps.retain(|otu_id| !failed.contains(otu_id));
        reps.write_fasta(&rep_set_without)?;

        info!("{} representative sequences failed to align", failed.len());
        Ok(())
    })?;

    let tree = layout.tree();
    tools
        .tree_builder
        .build_tree(ctx.exec, &alignment.aligned, &tree)
        .context("Building the phylogenetic tree")?;

    let table_without = layout.otu_table(min_otu_size, outputs.taxonomy_assignments.is_some(), Some(label));
    tools
        .table_builder
        .build_table(ctx.exec, &map_without, outputs.taxonomy_assignments.as_deref(), &table_without)
        .context("Building the OTU table without alignment failures")?;

    outputs.tree = Some(tree);
    outputs.otu_table_no_align_failures = Some(table_without);
    outputs.rep_set_no_align_failures = Some(rep_set_without);

    Ok(outputs)
}

