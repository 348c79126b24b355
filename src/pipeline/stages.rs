//! The stage runners. Each one wraps one clustering invocation and the bookkeeping that feeds the
//! next stage: reading the OTU map and failures, checking that they partition the stage input,
//! extracting the failed sequences and picking representative sequences.

use std::{
    fs,
    path::{Path, PathBuf},
};

use anyhow::Context;
use tracing::info;

use crate::{
    config::PipelineParameters,
    error::PartitionError,
    executor::CommandExecutor,
    otu_map::{FailureSet, OtuMap, PartitionReport},
    rep_set::RepresentativeSet,
    seqs,
    subsample::Subsampler,
    tools::{PickMode, PickOtusJob, Toolbox},
};

use super::layout::{RunLayout, Stage, StageFiles};

/// Everything a stage runner needs, for one run directory.
pub struct StageContext<'a> {
    pub params: &'a PipelineParameters,
    pub tools: &'a Toolbox,
    pub exec: &'a CommandExecutor,
    pub layout: &'a RunLayout,
}

impl StageContext<'_> {
    fn stage_dir(&self, stage: Stage) -> anyhow::Result<PathBuf> {
        let dir = self.layout.stage_dir(stage);
        fs::create_dir_all(&dir).with_context(|| format!("Creating {dir:?}"))?;
        Ok(dir)
    }

    fn pick(&self, stage: Stage, input: &Path, mode: PickMode<'_>, similarity: f64) -> anyhow::Result<StageFiles> {
        let dir = self.stage_dir(stage)?;

        info!("{stage}");

        self.tools
            .picker
            .pick_otus(
                self.exec,
                &PickOtusJob {
                    input,
                    mode,
                    similarity: Some(similarity),
                    output_dir: &dir,
                },
            )
            .with_context(|| format!("{stage} failed"))?;

        Ok(StageFiles::new(&dir, input, self.tools.picker.clusters_format()))
    }
}

/// An OTU map and the representative sequences of its OTUs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StageOutput {
    pub otu_map: PathBuf,
    pub rep_set: PathBuf,
}

/// Output of a closed-reference stage whose failures feed the next stage.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClosedReferenceOutput {
    pub clustered: StageOutput,
    pub failures_fasta: PathBuf,
    /// Always true in dry-run mode, where the failures are never read.
    pub has_failures: bool,
}

fn read_failures(files: &StageFiles, required: bool) -> anyhow::Result<FailureSet> {
    if !required && !files.failures.exists() {
        return Ok(FailureSet::default());
    }

    FailureSet::from_path(&files.failures)
}

/// Rejects a stage whose clustered and failed ids do not split its input exactly: ids in both,
/// ids from outside the input, and input ids reported nowhere.
fn check_partition(stage: Stage, input: &Path, map: &OtuMap, failures: &FailureSet) -> anyhow::Result<()> {
    let input_ids = seqs::read_ids(input)?;
    let report = PartitionReport::check(&input_ids, map, failures);

    let error = if let Some(first) = report.overlapping.first() {
        PartitionError::Overlapping { count: report.overlapping.len(), first: first.clone() }
    } else if let Some(first) = report.unknown.first() {
        PartitionError::Unknown {
            count: report.unknown.len(),
            input: input.to_path_buf(),
            first: first.clone(),
        }
    } else if let Some(first) = report.unaccounted.first() {
        PartitionError::Unaccounted {
            count: report.unaccounted.len(),
            total: input_ids.len(),
            first: first.clone(),
        }
    } else {
        return Ok(());
    };

    Err(anyhow::Error::new(error).context(format!("{stage} did not partition its input")))
}

/// Clusters `input` against the prefilter reference and keeps only the sequences that hit it.
/// Returns the path of the reduced sequence file.
pub fn run_prefilter(
    ctx: &StageContext<'_>,
    input: &Path,
    prefilter_reference: &Path,
    identity: f64,
) -> anyhow::Result<PathBuf> {
    let files = ctx.pick(
        Stage::Prefilter,
        input,
        PickMode::ClosedReference { reference: prefilter_reference },
        identity,
    )?;
    let prefiltered = ctx.layout.prefiltered_seqs(input);

    ctx.exec.run_internal("Remove sequences that failed the prefilter", || {
        let map = OtuMap::from_path(&files.otu_map)?;
        let failures = read_failures(&files, true)?;
        check_partition(Stage::Prefilter, input, &map, &failures)?;

        let kept = seqs::filter_fasta(input, &prefiltered, &failures.to_set(), false)?;
        info!("{kept} sequences passed the prefilter, {} discarded", failures.len());

        Ok(())
    })?;

    Ok(prefiltered)
}

/// Closed-reference clustering of the input against the reference database.
pub fn run_step1(ctx: &StageContext<'_>, input: &Path, reference: &Path) -> anyhow::Result<ClosedReferenceOutput> {
    let params = ctx.params;
    let files = ctx.pick(
        Stage::Step1,
        input,
        PickMode::ClosedReference { reference },
        params.similarity,
    )?;

    let rep_set = ctx.layout.step1_rep_set();
    let failures_fasta = ctx.layout.step1_failures_fasta();
    let mut has_failures = true;

    ctx.exec.run_internal("Pick step 1 representative sequences and extract failures", || {
        let map = OtuMap::from_path(&files.otu_map)?;
        let failures = read_failures(&files, true)?;
        check_partition(Stage::Step1, input, &map, &failures)?;

        RepresentativeSet::pick(&map, input, params.rep_set_method)?.write_fasta(&rep_set)?;
        seqs::filter_fasta(input, &failures_fasta, &failures.to_set(), true)?;

        info!("Step 1: {} OTUs, {} failures", map.len(), failures.len());
        has_failures = !failures.is_empty();

        Ok(())
    })?;

    Ok(ClosedReferenceOutput {
        clustered: StageOutput { otu_map: files.otu_map, rep_set },
        failures_fasta,
        has_failures,
    })
}

/// Stands in for [`run_step1`] with a map and failures from an earlier run. Only the step 1
/// representative sequences are recomputed, from the members in `input`.
pub fn use_step1_checkpoint(
    ctx: &StageContext<'_>,
    input: &Path,
    otu_map: &Path,
    failures_fasta: &Path,
) -> anyhow::Result<ClosedReferenceOutput> {
    ctx.stage_dir(Stage::Step1)?;

    let rep_set = ctx.layout.step1_rep_set();
    let method = ctx.params.rep_set_method;

    ctx.exec.run_internal("Pick step 1 representative sequences from the checkpoint", || {
        let map = OtuMap::from_path(otu_map)?;
        RepresentativeSet::pick(&map, input, method)?.write_fasta(&rep_set)
    })?;

    let has_failures = seqs::count_records(failures_fasta)? > 0;

    Ok(ClosedReferenceOutput {
        clustered: StageOutput { otu_map: otu_map.to_path_buf(), rep_set },
        failures_fasta: failures_fasta.to_path_buf(),
        has_failures,
    })
}

/// De novo clustering of a subsample of the step 1 failures. Its representative sequences are
/// the reference of step 3; the subsample itself is removed afterwards.
pub fn run_step2(ctx: &StageContext<'_>, step1_failures: &Path, new_ref_set_id: &str) -> anyhow::Result<StageOutput> {
    let params = ctx.params;
    let subsample = ctx.layout.subsampled_failures();

    ctx.stage_dir(Stage::Step2)?;

    ctx.exec.run_internal("Subsample step 1 failures", || {
        let kept = Subsampler::new(params.subsample_percent, params.subsample_seed)
            .subsample_fasta(step1_failures, &subsample)?;
        info!("Subsampled {kept} step 1 failures ({} requested)", params.subsample_percent);

        Ok(())
    })?;

    let otu_id_prefix = format!("{new_ref_set_id}.ReferenceOTU");
    let files = ctx.pick(
        Stage::Step2,
        &subsample,
        PickMode::Denovo { otu_id_prefix: &otu_id_prefix },
        params.similarity,
    )?;

    let rep_set = ctx.layout.step2_rep_set();

    ctx.exec.run_internal("Pick step 2 representative sequences", || {
        let map = OtuMap::from_path(&files.otu_map)?;
        let failures = read_failures(&files, false)?;
        check_partition(Stage::Step2, &subsample, &map, &failures)?;

        RepresentativeSet::pick(&map, &subsample, params.rep_set_method)?.write_fasta(&rep_set)?;
        info!("Step 2: {} new OTUs", map.len());

        fs::remove_file(&subsample).with_context(|| format!("Removing {subsample:?}"))?;
        Ok(())
    })?;

    Ok(StageOutput { otu_map: files.otu_map, rep_set })
}

/// Closed-reference clustering of all the step 1 failures against the step 2 OTUs. The
/// representatives of its OTUs are those of step 2.
pub fn run_step3(
    ctx: &StageContext<'_>,
    step1_failures: &Path,
    step2_rep_set: &Path,
) -> anyhow::Result<ClosedReferenceOutput> {
    let params = ctx.params;
    let files = ctx.pick(
        Stage::Step3,
        step1_failures,
        PickMode::ClosedReference { reference: step2_rep_set },
        params.similarity,
    )?;

    let failures_fasta = ctx.layout.step3_failures_fasta();
    let mut has_failures = true;

    ctx.exec.run_internal("Extract step 3 failures", || {
        let map = OtuMap::from_path(&files.otu_map)?;
        let failures = read_failures(&files, true)?;
        check_partition(Stage::Step3, step1_failures, &map, &failures)?;

        info!("Step 3: {} OTUs, {} failures", map.len(), failures.len());
        has_failures = !failures.is_empty();

        if !params.suppress_step4 && has_failures {
            seqs::filter_fasta(step1_failures, &failures_fasta, &failures.to_set(), true)?;
        }

        Ok(())
    })?;

    Ok(ClosedReferenceOutput {
        clustered: StageOutput {
            otu_map: files.otu_map,
            rep_set: step2_rep_set.to_path_buf(),
        },
        failures_fasta,
        has_failures,
    })
}

/// De novo clustering of everything step 3 could not assign.
pub fn run_step4(ctx: &StageContext<'_>, step3_failures: &Path, new_ref_set_id: &str) -> anyhow::Result<StageOutput> {
    let params = ctx.params;
    let otu_id_prefix = format!("{new_ref_set_id}.CleanUp.ReferenceOTU");
    let files = ctx.pick(
        Stage::Step4,
        step3_failures,
        PickMode::Denovo { otu_id_prefix: &otu_id_prefix },
        params.similarity,
    )?;

    let rep_set = ctx.layout.step4_rep_set();

    ctx.exec.run_internal("Pick step 4 representative sequences", || {
        let map = OtuMap::from_path(&files.otu_map)?;
        let failures = read_failures(&files, false)?;
        check_partition(Stage::Step4, step3_failures, &map, &failures)?;

        RepresentativeSet::pick(&map, step3_failures, params.rep_set_method)?.write_fasta(&rep_set)?;
        info!("Step 4: {} new OTUs", map.len());

        Ok(())
    })?;

    Ok(StageOutput { otu_map: files.otu_map, rep_set })
}
