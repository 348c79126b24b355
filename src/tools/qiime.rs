use std::{
    io,
    path::{self, Path, PathBuf},
    process::Command,
};

use anyhow::Context;

use crate::{
    config::{OtuPickingMethod, ScriptParameters},
    executor::{CommandExecutor, ExternalOp},
    pipeline::layout::{file_stem, StageFiles},
    util::cli_tools::{CliTool, QiimeScript},
};

use super::{Aligner, AlignmentOutputs, OtuPicker, PickMode, PickOtusJob, TableBuilder, TaxonomyClassifier, TreeBuilder};

/// Parameters the workflow sets itself; parameter-file values for these are ignored.
const PICK_OTUS_CONTROLLED_PARAMS: &[&str] = &[
    "otu_picking_method",
    "refseqs_fp",
    "similarity",
    "denovo_otu_id_prefix",
    "suppress_new_clusters",
    "output_dir",
];

const PYNAST_FAILURES_LABEL: &str = "pynast_failures";

/// The QIIME 1 scripts of one installation.
#[derive(Debug, Clone)]
pub struct QiimeScripts {
    pick_otus: QiimeScript,
    method: OtuPickingMethod,
    params: ScriptParameters,
}

impl QiimeScripts {
    pub fn new(install_prefix: Option<&Path>, method: OtuPickingMethod, params: ScriptParameters) -> Self {
        QiimeScripts {
            pick_otus: QiimeScript::new(install_prefix, "pick_otus.py"),
            method,
            params,
        }
    }

    pub fn resolve(
        install_prefix: Option<&Path>,
        method: OtuPickingMethod,
        params: ScriptParameters,
    ) -> io::Result<Option<Self>> {
        let Some(pick_otus) = QiimeScript::resolve(install_prefix, "pick_otus.py")? else {
            return Ok(None);
        };

        Ok(Some(QiimeScripts { pick_otus, method, params }))
    }

    fn script(&self, name: &str) -> QiimeScript {
        self.pick_otus.sibling(name)
    }

    fn forwarded(&self, script: &str) -> Vec<String> {
        self.params.cli_args(script, &[])
    }

    pub fn pick_otus_cmd(&self, job: &PickOtusJob<'_>, jobs_to_start: Option<usize>) -> io::Result<Command> {
        let mut cmd = match (job.mode, jobs_to_start) {
            (PickMode::ClosedReference { reference }, Some(jobs)) => {
                let script = format!("parallel_pick_otus_{}.py", self.method.reference_binding());
                let mut cmd = self.script(&script).new_command();

                cmd.arg("-r")
                    .arg(path::absolute(reference)?)
                    .args(["-T", "-O", &jobs.to_string()]);

                cmd
            }
            (PickMode::ClosedReference { reference }, None) => {
                let mut cmd = self.pick_otus.new_command();

                cmd.args(["-m", self.method.reference_binding()])
                    .arg("-r")
                    .arg(path::absolute(reference)?)
                    .arg("--suppress_new_clusters");

                cmd
            }
            (PickMode::Denovo { otu_id_prefix }, _) => {
                let mut cmd = self.pick_otus.new_command();

                cmd.args(["-m", self.method.denovo_binding()])
                    .args(["--denovo_otu_id_prefix", otu_id_prefix]);

                cmd
            }
        };

        cmd.arg("-i")
            .arg(path::absolute(job.input)?)
            .arg("-o")
            .arg(path::absolute(job.output_dir)?);

        if let Some(similarity) = job.similarity {
            cmd.args(["-s", &similarity.to_string()]);
        }

        cmd.args(self.params.cli_args("pick_otus", PICK_OTUS_CONTROLLED_PARAMS));

        Ok(cmd)
    }
}

impl OtuPicker for QiimeScripts {
    fn pick_otus(&self, exec: &CommandExecutor, job: &PickOtusJob<'_>) -> anyhow::Result<()> {
        let files = StageFiles::new(job.output_dir, job.input, self.clusters_format());
        let cmd = self.pick_otus_cmd(job, exec.parallel_jobs())?;

        let description = match job.mode {
            PickMode::ClosedReference { .. } => format!("Pick closed-reference OTUs on {:?}", job.input),
            PickMode::Denovo { .. } => format!("Pick de novo OTUs on {:?}", job.input),
        };

        exec.run_one(
            ExternalOp::new(description, cmd)
                .expect_output(files.otu_map)
                .with_log(files.log),
        )?;

        Ok(())
    }

    fn clusters_format(&self) -> &str {
        self.method.clusters_format()
    }
}

impl Aligner for QiimeScripts {
    fn align(&self, exec: &CommandExecutor, seqs: &Path, output_dir: &Path) -> anyhow::Result<AlignmentOutputs> {
        let stem = file_stem(seqs);
        let outputs = AlignmentOutputs {
            aligned: output_dir.join(format!("{stem}_aligned.fasta")),
            failures: output_dir.join(format!("{stem}_failures.fasta")),
        };

        let mut cmd = match exec.parallel_jobs() {
            Some(jobs) => {
                let mut cmd = self.script("parallel_align_seqs_pynast.py").new_command();
                cmd.args(["-T", "-O", &jobs.to_string()]);
                cmd
            }
            None => self.script("align_seqs.py").new_command(),
        };

        cmd.arg("-i")
            .arg(path::absolute(seqs)?)
            .arg("-o")
            .arg(path::absolute(output_dir)?)
            .args(self.forwarded("align_seqs"));

        exec.run_one(
            ExternalOp::new("Align representative sequences", cmd)
                .expect_output(&outputs.aligned)
                .with_log(output_dir.join(format!("{stem}_log.txt"))),
        )
        .context("Aligning sequences")?;

        Ok(outputs)
    }

    fn failures_label(&self) -> &str {
        PYNAST_FAILURES_LABEL
    }
}

impl TreeBuilder for QiimeScripts {
    fn build_tree(&self, exec: &CommandExecutor, alignment: &Path, tree: &Path) -> anyhow::Result<()> {
        let filter_dir = alignment.parent().unwrap_or(Path::new("."));
        let filtered = filter_dir.join(format!("{}_pfiltered.fasta", file_stem(alignment)));

        let mut filter_cmd = self.script("filter_alignment.py").new_command();
        filter_cmd
            .arg("-i")
            .arg(path::absolute(alignment)?)
            .arg("-o")
            .arg(path::absolute(filter_dir)?)
            .args(self.forwarded("filter_alignment"));

        let mut tree_cmd = self.script("make_phylogeny.py").new_command();
        tree_cmd
            .arg("-i")
            .arg(path::absolute(&filtered)?)
            .arg("-o")
            .arg(path::absolute(tree)?)
            .args(self.forwarded("make_phylogeny"));

        exec.run(vec![
            ExternalOp::new("Filter alignment", filter_cmd).expect_output(&filtered),
            ExternalOp::new("Build phylogenetic tree", tree_cmd).expect_output(tree),
        ])?;

        Ok(())
    }
}

impl TaxonomyClassifier for QiimeScripts {
    fn classify(&self, exec: &CommandExecutor, seqs: &Path, output_dir: &Path) -> anyhow::Result<PathBuf> {
        let stem = file_stem(seqs);
        let assignments = output_dir.join(format!("{stem}_tax_assignments.txt"));

        let mut cmd = match exec.parallel_jobs() {
            Some(jobs) => {
                let mut cmd = self.script("parallel_assign_taxonomy_uclust.py").new_command();
                cmd.args(["-T", "-O", &jobs.to_string()]);
                cmd
            }
            None => self.script("assign_taxonomy.py").new_command(),
        };

        cmd.arg("-i")
            .arg(path::absolute(seqs)?)
            .arg("-o")
            .arg(path::absolute(output_dir)?)
            .args(self.forwarded("assign_taxonomy"));

        exec.run_one(
            ExternalOp::new("Assign taxonomy", cmd)
                .expect_output(&assignments)
                .with_log(output_dir.join(format!("{stem}_tax_assignments.log"))),
        )?;

        Ok(assignments)
    }
}

impl TableBuilder for QiimeScripts {
    fn build_table(
        &self,
        exec: &CommandExecutor,
        otu_map: &Path,
        taxonomy: Option<&Path>,
        table: &Path,
    ) -> anyhow::Result<()> {
        let mut cmd = self.script("make_otu_table.py").new_command();

        cmd.arg("-i")
            .arg(path::absolute(otu_map)?)
            .arg("-o")
            .arg(path::absolute(table)?);

        if let Some(taxonomy) = taxonomy {
            cmd.arg("-t").arg(path::absolute(taxonomy)?);
        }

        cmd.args(self.forwarded("make_otu_table"));

        exec.run_one(ExternalOp::new(format!("Build OTU table {table:?}"), cmd).expect_output(table))?;

        Ok(())
    }
}
