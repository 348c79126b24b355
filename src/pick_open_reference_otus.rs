use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use clap::Args;
use tracing::info;

use openref_otus::{
    config::{
        ensure_readable, OtuPickingMethod, ScriptParameters, DEFAULT_MIN_OTU_SIZE, DEFAULT_NEW_REF_SET_ID,
        DEFAULT_PERCENT_SUBSAMPLE, DEFAULT_PREFILTER_PERCENT_ID, DEFAULT_SUBSAMPLE_SEED,
    },
    tools::{QiimeScripts, Toolbox},
    CommandExecutor, ExecutionMode, OpenReferencePipeline, PipelineParameters, Step1Checkpoint,
};

#[derive(Args)]
pub struct PickOpenReferenceOtusArgs {
    /// Input sequences (comma-separated or repeated). More than one file runs the batches
    /// iteratively, each against the reference grown by the previous ones
    #[clap(short = 'i', long, required = true, value_delimiter = ',', num_args = 1..)]
    input_fps: Vec<PathBuf>,

    /// Reference sequences
    #[clap(short, long)]
    reference_fp: PathBuf,

    #[clap(short, long)]
    output_dir: PathBuf,

    #[clap(short = 'm', long, value_enum, default_value_t = OtuPickingMethod::Uclust)]
    otu_picking_method: OtuPickingMethod,

    /// Parameter file with `script_name:parameter_name value` lines
    #[clap(short, long)]
    parameter_fp: Option<PathBuf>,

    /// Reference for the prefilter, if different from --reference-fp
    #[clap(long)]
    prefilter_refseqs_fp: Option<PathBuf>,

    /// Identity of the prefilter (0 disables it)
    #[clap(long, default_value_t = DEFAULT_PREFILTER_PERCENT_ID)]
    prefilter_percent_id: f64,

    /// Prefix of the OTU ids minted by the de novo steps
    #[clap(short = 'n', long, default_value = DEFAULT_NEW_REF_SET_ID)]
    new_ref_set_id: String,

    /// Write into an existing output directory
    #[clap(short, long)]
    force: bool,

    /// Split the reference-based steps, the alignment and the taxonomy assignment into jobs
    #[clap(short = 'a', long)]
    parallel: bool,

    /// Number of jobs with --parallel (default: parallel:jobs_to_start from the parameter file, or 1)
    #[clap(short = 'O', long)]
    jobs_to_start: Option<usize>,

    /// Fraction of the step 1 failures clustered de novo in step 2
    #[clap(short = 's', long, default_value_t = DEFAULT_PERCENT_SUBSAMPLE)]
    percent_subsample: f64,

    #[clap(long, default_value_t = DEFAULT_SUBSAMPLE_SEED)]
    subsample_seed: u64,

    /// OTU map of an earlier step 1 (requires --step1-failures-fasta-fp)
    #[clap(long)]
    step1_otu_map_fp: Option<PathBuf>,

    /// Failures fasta of an earlier step 1 (requires --step1-otu-map-fp)
    #[clap(long)]
    step1_failures_fasta_fp: Option<PathBuf>,

    /// Leave the step 3 failures unclustered
    #[clap(long)]
    suppress_step4: bool,

    #[clap(long, default_value_t = DEFAULT_MIN_OTU_SIZE)]
    min_otu_size: usize,

    #[clap(long)]
    suppress_taxonomy_assignment: bool,

    #[clap(long)]
    suppress_align_and_tree: bool,

    /// Print the commands instead of running them
    #[clap(long)]
    dry_run: bool,

    /// QIIME installation prefix; scripts are looked up in <PREFIX>/bin instead of the PATH
    #[clap(long)]
    qiime_prefix: Option<PathBuf>,
}

impl PickOpenReferenceOtusArgs {
    fn parameters(&self) -> Result<PipelineParameters> {
        let mut params = PipelineParameters::new(self.reference_fp.clone());

        if let Some(parameter_fp) = &self.parameter_fp {
            ensure_readable("Parameter file", parameter_fp)?;
            params.apply_script_params(ScriptParameters::from_path(parameter_fp)?)?;
        }

        params.prefilter_reference = self.prefilter_refseqs_fp.clone();
        params.prefilter_identity = self.prefilter_percent_id;
        params.otu_picking_method = self.otu_picking_method;
        params.subsample_percent = self.percent_subsample;
        params.subsample_seed = self.subsample_seed;
        params.new_reference_set_id = self.new_ref_set_id.clone();
        params.min_otu_size = self.min_otu_size;
        params.suppress_step4 = self.suppress_step4;
        params.suppress_taxonomy = self.suppress_taxonomy_assignment;
        params.suppress_align_and_tree = self.suppress_align_and_tree;
        params.parallel = self.parallel;
        params.force_overwrite = self.force;

        if let Some(jobs_to_start) = self.jobs_to_start {
            params.jobs_to_start = jobs_to_start;
        }

        Ok(params)
    }

    fn execution_mode(&self, params: &PipelineParameters) -> ExecutionMode {
        if self.dry_run {
            ExecutionMode::DryRun
        } else if params.parallel {
            ExecutionMode::Parallel { jobs_to_start: params.jobs_to_start }
        } else {
            ExecutionMode::Serial
        }
    }
}

pub fn pick_open_reference_otus(args: PickOpenReferenceOtusArgs) -> Result<()> {
    let params = args.parameters()?;
    params.validate()?;

    let checkpoint = Step1Checkpoint::resolve(
        args.step1_otu_map_fp.as_deref(),
        args.step1_failures_fasta_fp.as_deref(),
    )?;

    let mode = args.execution_mode(&params);
    let prefix = args.qiime_prefix.as_deref();

    let scripts = if mode == ExecutionMode::DryRun {
        QiimeScripts::new(prefix, params.otu_picking_method, params.script_params.clone())
    } else {
        let resolved = QiimeScripts::resolve(prefix, params.otu_picking_method, params.script_params.clone())
            .context("Looking for the QIIME scripts")?;

        match resolved {
            Some(scripts) => scripts,
            None => bail!("pick_otus.py not found. Is QIIME 1 installed and on the PATH (or given with --qiime-prefix)?"),
        }
    };

    let tools = Toolbox::qiime(scripts);
    let exec = CommandExecutor::new(mode);
    let pipeline = OpenReferencePipeline::new(&params, &tools, &exec);

    let outputs = pipeline.pick_open_reference_otus(&args.input_fps, &args.output_dir, &checkpoint)?;

    info!("Final OTU map: {:?}", outputs.final_otu_map_mc);
    info!("OTU table: {:?}", outputs.otu_table);

    if let Some(table) = &outputs.otu_table_no_align_failures {
        info!("OTU table without alignment failures: {table:?}");
    }

    Ok(())
}
