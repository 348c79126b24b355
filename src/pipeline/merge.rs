use std::{
    collections::HashSet,
    path::{Path, PathBuf},
};

use anyhow::Context;
use tracing::info;

use crate::{otu_map::OtuMap, rep_set::RepresentativeSet, seqs};

use super::stages::StageContext;

/// Top-level artifacts of one run directory after the merge.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MergedRun {
    pub final_otu_map: PathBuf,
    pub final_otu_map_mc: PathBuf,
    pub rep_set: PathBuf,
    pub new_refseqs: PathBuf,
    /// Representative sequences of every stage that ran, to rebuild a rep set for merged runs.
    pub stage_rep_sets: Vec<PathBuf>,
}

/// How OTU ids shared between the merged maps are handled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SharedOtus {
    /// Maps of the stages of one run: a shared id is an error.
    Reject,
    /// Maps of successive iterations: members of a shared id are united.
    Unite,
}

/// Merges the stage maps into `final_otu_map.txt`, drops OTUs smaller than the minimum size into
/// `final_otu_map_mc<N>.txt`, and writes the representative sequences of the surviving OTUs.
///
/// `new_refseqs.fna` gets `reference` followed by the representatives of surviving OTUs that are
/// not in `reference`.
pub fn merge_stage_maps(
    ctx: &StageContext<'_>,
    reference: &Path,
    otu_maps: &[PathBuf],
    shared_otus: SharedOtus,
    stage_rep_sets: Vec<PathBuf>,
) -> anyhow::Result<MergedRun> {
    let layout = ctx.layout;
    let min_otu_size = ctx.params.min_otu_size;

    let merged = MergedRun {
        final_otu_map: layout.final_otu_map(),
        final_otu_map_mc: layout.final_otu_map_mc(min_otu_size),
        rep_set: layout.rep_set(),
        new_refseqs: layout.new_refseqs(),
        stage_rep_sets,
    };

    ctx.exec.run_internal("Merge OTU maps", || {
        let maps = otu_maps
            .iter()
            .map(|path| OtuMap::from_path(path))
            .collect::<anyhow::Result<Vec<_>>>()?;

        let final_map = match shared_otus {
            SharedOtus::Reject => OtuMap::concat(&maps),
            SharedOtus::Unite => OtuMap::merge(&maps),
        }
        .context("Merging OTU maps")?;
        final_map.write_to_path(&merged.final_otu_map)?;

        let filtered = final_map.filter_min_size(min_otu_size);
        filtered.write_to_path(&merged.final_otu_map_mc)?;

        info!(
            "{} OTUs ({} sequences), {} with at least {min_otu_size} members ({} sequences)",
            final_map.len(),
            final_map.num_sequences(),
            filtered.len(),
            filtered.num_sequences(),
        );

        let all_reps = merged
            .stage_rep_sets
            .iter()
            .map(|path| RepresentativeSet::from_fasta(path))
            .collect::<anyhow::Result<Vec<_>>>()?;
        let reps = RepresentativeSet::union(all_reps).select(&filtered)?;
        reps.write_fasta(&merged.rep_set)?;

        write_new_refseqs(reference, &reps, &merged.new_refseqs)
    })?;

    Ok(merged)
}

fn write_new_refseqs(reference: &Path, reps: &RepresentativeSet, output: &Path) -> anyhow::Result<()> {
    let mut writer = seqs::writer(output)?;
    let mut known = HashSet::new();

    for record in seqs::reader(reference)?.records() {
        let record = record.with_context(|| format!("Reading reference {reference:?}"))?;
        known.insert(record.id().to_owned());
        writer.write_record(&record)?;
    }

    let mut added = 0;

    for otu_id in reps.otu_ids().filter(|otu_id| !known.contains(*otu_id)) {
        if let Some(record) = reps.get(otu_id) {
            writer.write_record(record)?;
            added += 1;
        }
    }

    writer.flush()?;
    info!("Added {added} new reference sequences to {output:?}");

    Ok(())
}
