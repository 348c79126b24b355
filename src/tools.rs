//! The external collaborators of the workflow. The pipeline only relies on these signatures and
//! on the file names of [`crate::pipeline::layout`]; [`qiime::QiimeScripts`] binds them to the
//! QIIME 1 command-line scripts.

use std::path::{Path, PathBuf};

use crate::executor::CommandExecutor;

pub mod qiime;

pub use qiime::QiimeScripts;

#[derive(Debug, Clone, Copy)]
pub enum PickMode<'a> {
    /// Sequences that hit no reference at the identity threshold are reported as failures.
    ClosedReference { reference: &'a Path },
    /// New OTU ids are `<otu_id_prefix><n>`.
    Denovo { otu_id_prefix: &'a str },
}

#[derive(Debug, Clone, Copy)]
pub struct PickOtusJob<'a> {
    pub input: &'a Path,
    pub mode: PickMode<'a>,
    /// `None` keeps the tool's default.
    pub similarity: Option<f64>,
    pub output_dir: &'a Path,
}

pub trait OtuPicker {
    /// Clusters `job.input`, leaving the files named by
    /// [`StageFiles`](crate::pipeline::layout::StageFiles) in `job.output_dir`. De novo runs may
    /// omit the failures file. Worker count comes from [`CommandExecutor::parallel_jobs`].
    fn pick_otus(&self, exec: &CommandExecutor, job: &PickOtusJob<'_>) -> anyhow::Result<()>;

    fn clusters_format(&self) -> &str;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AlignmentOutputs {
    pub aligned: PathBuf,
    pub failures: PathBuf,
}

pub trait Aligner {
    fn align(&self, exec: &CommandExecutor, seqs: &Path, output_dir: &Path) -> anyhow::Result<AlignmentOutputs>;

    /// Names the alignment failures in output file names, as in `otu_table_mc2_no_pynast_failures.biom`.
    fn failures_label(&self) -> &str;
}

pub trait TreeBuilder {
    fn build_tree(&self, exec: &CommandExecutor, alignment: &Path, tree: &Path) -> anyhow::Result<()>;
}

pub trait TaxonomyClassifier {
    /// Returns the path of the assignments file written under `output_dir`.
    fn classify(&self, exec: &CommandExecutor, seqs: &Path, output_dir: &Path) -> anyhow::Result<PathBuf>;
}

pub trait TableBuilder {
    fn build_table(
        &self,
        exec: &CommandExecutor,
        otu_map: &Path,
        taxonomy: Option<&Path>,
        table: &Path,
    ) -> anyhow::Result<()>;
}

/// One binding for every collaborator.
pub struct Toolbox {
    pub picker: Box<dyn OtuPicker>,
    pub aligner: Box<dyn Aligner>,
    pub tree_builder: Box<dyn TreeBuilder>,
    pub classifier: Box<dyn TaxonomyClassifier>,
    pub table_builder: Box<dyn TableBuilder>,
}

impl Toolbox {
    pub fn qiime(scripts: QiimeScripts) -> Self {
        Toolbox {
            picker: Box::new(scripts.clone()),
            aligner: Box::new(scripts.clone()),
            tree_builder: Box::new(scripts.clone()),
            classifier: Box::new(scripts.clone()),
            table_builder: Box::new(scripts),
        }
    }
}
