use std::{fmt, fs, io, path::{Path, PathBuf}, str::FromStr};

use clap::ValueEnum;

use crate::error::ConfigError;

pub mod parameters;

pub use parameters::{ParamValue, ScriptParameters};

pub const DEFAULT_SIMILARITY: f64 = 0.97;
pub const DEFAULT_PREFILTER_PERCENT_ID: f64 = 0.60;
pub const DEFAULT_PERCENT_SUBSAMPLE: f64 = 0.001;
pub const DEFAULT_NEW_REF_SET_ID: &str = "New";
pub const DEFAULT_MIN_OTU_SIZE: usize = 2;
pub const DEFAULT_SUBSAMPLE_SEED: u64 = 0;

/// Selects the pair of clustering bindings used for the de novo and the reference steps.
#[derive(ValueEnum, Debug, Copy, Clone, PartialEq, Eq, Default)]
pub enum OtuPickingMethod {
    #[default]
    Uclust,
    Usearch61,
}

impl OtuPickingMethod {
    pub fn denovo_binding(self) -> &'static str {
        match self {
            OtuPickingMethod::Uclust => "uclust",
            OtuPickingMethod::Usearch61 => "usearch61",
        }
    }

    pub fn reference_binding(self) -> &'static str {
        match self {
            OtuPickingMethod::Uclust => "uclust_ref",
            OtuPickingMethod::Usearch61 => "usearch61_ref",
        }
    }

    /// Extension of the raw clustering trace written next to each OTU map.
    pub fn clusters_format(self) -> &'static str {
        "uc"
    }
}

impl FromStr for OtuPickingMethod {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "uclust" => Ok(OtuPickingMethod::Uclust),
            "usearch61" => Ok(OtuPickingMethod::Usearch61),
            _ => Err(ConfigError::UnknownMethod(s.to_owned())),
        }
    }
}

impl fmt::Display for OtuPickingMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.denovo_binding())
    }
}

/// How one member of an OTU is chosen to represent it.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Default)]
pub enum RepSetMethod {
    #[default]
    First,
    Longest,
}

impl FromStr for RepSetMethod {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "first" => Ok(RepSetMethod::First),
            "longest" => Ok(RepSetMethod::Longest),
            _ => Err(ConfigError::InvalidValue("rep_set_picking_method", s.to_owned())),
        }
    }
}

/// Everything a run needs to know, built once and passed down by reference.
#[derive(Debug, Clone)]
pub struct PipelineParameters {
    pub reference: PathBuf,
    /// Defaults to `reference` when unset.
    pub prefilter_reference: Option<PathBuf>,
    /// 0 disables the prefilter.
    pub prefilter_identity: f64,
    pub otu_picking_method: OtuPickingMethod,
    pub similarity: f64,
    pub subsample_percent: f64,
    pub subsample_seed: u64,
    pub new_reference_set_id: String,
    pub min_otu_size: usize,
    pub suppress_step4: bool,
    pub suppress_taxonomy: bool,
    pub suppress_align_and_tree: bool,
    pub parallel: bool,
    pub jobs_to_start: usize,
    pub force_overwrite: bool,
    pub rep_set_method: RepSetMethod,
    pub script_params: ScriptParameters,
}

impl PipelineParameters {
    pub fn new(reference: PathBuf) -> Self {
        PipelineParameters {
            reference,
            prefilter_reference: None,
            prefilter_identity: DEFAULT_PREFILTER_PERCENT_ID,
            otu_picking_method: OtuPickingMethod::default(),
            similarity: DEFAULT_SIMILARITY,
            subsample_percent: DEFAULT_PERCENT_SUBSAMPLE,
            subsample_seed: DEFAULT_SUBSAMPLE_SEED,
            new_reference_set_id: DEFAULT_NEW_REF_SET_ID.to_owned(),
            min_otu_size: DEFAULT_MIN_OTU_SIZE,
            suppress_step4: false,
            suppress_taxonomy: false,
            suppress_align_and_tree: false,
            parallel: false,
            jobs_to_start: 1,
            force_overwrite: false,
            rep_set_method: RepSetMethod::default(),
            script_params: ScriptParameters::default(),
        }
    }

    /// Takes the parameter-file values the workflow itself interprets. Command-line values set
    /// afterwards win.
    pub fn apply_script_params(&mut self, params: ScriptParameters) -> Result<(), ConfigError> {
        if let Some(similarity) = params.get_value("pick_otus", "similarity") {
            self.similarity = parse_value("pick_otus:similarity", similarity)?;
        }

        if let Some(method) = params.get_value("pick_rep_set", "rep_set_picking_method") {
            self.rep_set_method = method.parse()?;
        }

        if let Some(jobs) = params.get_value("parallel", "jobs_to_start") {
            self.jobs_to_start = parse_value("parallel:jobs_to_start", jobs)?;
        }

        self.script_params = params;
        Ok(())
    }

    /// Prefilter reference and identity, or `None` if the prefilter is disabled.
    pub fn prefilter(&self) -> Option<(&Path, f64)> {
        if self.prefilter_identity == 0.0 {
            return None;
        }

        let reference = self.prefilter_reference.as_deref().unwrap_or(&self.reference);
        Some((reference, self.prefilter_identity))
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        ensure_readable("Reference sequences", &self.reference)?;

        if let Some(prefilter_reference) = &self.prefilter_reference {
            ensure_readable("Prefilter reference sequences", prefilter_reference)?;
        }

        if !(0.0..=1.0).contains(&self.prefilter_identity) {
            return Err(invalid("prefilter_percent_id", self.prefilter_identity));
        }

        if !(self.similarity > 0.0 && self.similarity <= 1.0) {
            return Err(invalid("similarity", self.similarity));
        }

        if !(self.subsample_percent > 0.0 && self.subsample_percent <= 1.0) {
            return Err(invalid("percent_subsample", self.subsample_percent));
        }

        if self.min_otu_size < 1 {
            return Err(invalid("min_otu_size", self.min_otu_size));
        }

        if self.jobs_to_start < 1 {
            return Err(invalid("jobs_to_start", self.jobs_to_start));
        }

        if self.new_reference_set_id.is_empty()
            || self.new_reference_set_id.chars().any(char::is_whitespace)
        {
            return Err(invalid("new_ref_set_id", &self.new_reference_set_id));
        }

        Ok(())
    }
}

fn parse_value<T: FromStr>(name: &'static str, value: &str) -> Result<T, ConfigError> {
    value.parse().map_err(|_| invalid(name, value))
}

fn invalid(name: &'static str, value: impl fmt::Display) -> ConfigError {
    ConfigError::InvalidValue(name, value.to_string())
}

pub fn ensure_readable(what: &'static str, path: &Path) -> Result<(), ConfigError> {
    match fs::File::open(path) {
        Ok(_) => Ok(()),
        Err(_) => Err(ConfigError::MissingPath(what, path.to_path_buf())),
    }
}

/// Pre-flight state of the output directory, evaluated once before any stage runs.
#[derive(Debug)]
pub enum OutputDirCheck {
    Ready,
    AlreadyExists,
    Unwritable(io::Error),
}

impl OutputDirCheck {
    /// Creates the directory (and its parents) when it does not exist yet.
    pub fn evaluate(dir: &Path, force: bool) -> Self {
        if dir.exists() {
            if !force {
                return OutputDirCheck::AlreadyExists;
            }

            return match fs::metadata(dir) {
                Ok(meta) if !meta.is_dir() => OutputDirCheck::Unwritable(io::Error::new(
                    io::ErrorKind::Other,
                    "path exists and is not a directory",
                )),
                Ok(meta) if meta.permissions().readonly() => OutputDirCheck::Unwritable(
                    io::Error::new(io::ErrorKind::PermissionDenied, "directory is read-only"),
                ),
                Ok(_) => OutputDirCheck::Ready,
                Err(e) => OutputDirCheck::Unwritable(e),
            };
        }

        match fs::create_dir_all(dir) {
            Ok(()) => OutputDirCheck::Ready,
            Err(e) => OutputDirCheck::Unwritable(e),
        }
    }

    pub fn into_result(self, dir: &Path) -> Result<(), ConfigError> {
        match self {
            OutputDirCheck::Ready => Ok(()),
            OutputDirCheck::AlreadyExists => Err(ConfigError::OutputDirExists(dir.to_path_buf())),
            OutputDirCheck::Unwritable(e) => Err(ConfigError::OutputDirUnwritable(dir.to_path_buf(), e)),
        }
    }
}
