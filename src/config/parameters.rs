use std::{collections::BTreeMap, fs::File, io::{BufRead, BufReader}, path::Path, sync::LazyLock};

use anyhow::Context;
use regex::Regex;

use crate::error::ConfigError;

static LINE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(\w+):(\w+)(?:\s+(.*?))?\s*$").unwrap());

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParamValue {
    Flag,
    Value(String),
}

/// Per-script parameter overrides, read from a QIIME-style parameters file:
///
/// ```text
/// # comment
/// pick_otus:similarity 0.94
/// pick_otus:enable_rev_strand_match True
/// align_seqs:min_length 75
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScriptParameters {
    by_script: BTreeMap<String, BTreeMap<String, ParamValue>>,
}

impl ScriptParameters {
    pub fn read<R: BufRead>(reader: R) -> anyhow::Result<Self> {
        let mut params = Self::default();

        for (i, line) in reader.lines().enumerate() {
            let line = line?;
            let trimmed = line.trim();

            if trimmed.is_empty() || trimmed.starts_with('#') {
                continue;
            }

            let cap = LINE_RE
                .captures(trimmed)
                .ok_or_else(|| ConfigError::ParameterLine(i + 1, line.clone()))?;

            let value = cap.get(3).map(|m| m.as_str()).unwrap_or("");
            params.set(&cap[1], &cap[2], value);
        }

        Ok(params)
    }

    pub fn from_path(path: &Path) -> anyhow::Result<Self> {
        let file = File::open(path).with_context(|| format!("Opening parameters file {path:?}"))?;
        Self::read(BufReader::new(file)).with_context(|| format!("Reading parameters file {path:?}"))
    }

    /// `True` becomes a bare flag and `False` drops the parameter, as in QIIME.
    pub fn set(&mut self, script: &str, param: &str, value: &str) {
        let script_params = self.by_script.entry(script.to_owned()).or_default();

        match value {
            "False" => {
                script_params.remove(param);
            }
            "True" | "" => {
                script_params.insert(param.to_owned(), ParamValue::Flag);
            }
            value => {
                script_params.insert(param.to_owned(), ParamValue::Value(value.to_owned()));
            }
        }
    }

    pub fn get(&self, script: &str, param: &str) -> Option<&ParamValue> {
        self.by_script.get(script)?.get(param)
    }

    pub fn get_value(&self, script: &str, param: &str) -> Option<&str> {
        match self.get(script, param)? {
            ParamValue::Value(value) => Some(value),
            ParamValue::Flag => None,
        }
    }

    /// Command-line arguments for `script`, skipping the parameters listed in `controlled`.
    pub fn cli_args(&self, script: &str, controlled: &[&str]) -> Vec<String> {
        let Some(script_params) = self.by_script.get(script) else {
            return Vec::new();
        };

        let mut args = Vec::new();

        for (param, value) in script_params {
            if controlled.contains(&param.as_str()) {
                continue;
            }

            args.push(format!("--{param}"));

            if let ParamValue::Value(value) = value {
                args.push(value.clone());
            }
        }

        args
    }
}
