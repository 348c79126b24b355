use std::{
    io::{self, ErrorKind},
    path::{Path, PathBuf},
    process::{Command, Stdio},
};

pub trait CliTool {
    fn new_command(&self) -> Command;
}

/// Runs `command` with its output discarded. Only a missing executable counts as absent; a
/// non-zero exit still means the tool is there.
pub fn silent_test_command_exists(mut command: Command) -> io::Result<bool> {
    let status = command.stdin(Stdio::null()).stdout(Stdio::null()).stderr(Stdio::null()).status();

    match status {
        Ok(_) => Ok(true),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
        Err(e) => Err(e),
    }
}

/// `Some(tool)` if `tool` started with `args` could be spawned.
pub fn resolve_with_silent_test_args<Tool: CliTool>(tool: Tool, args: &[&str]) -> io::Result<Option<Tool>> {
    let mut test_command = tool.new_command();
    test_command.args(args);

    Ok(silent_test_command_exists(test_command)?.then_some(tool))
}

/// One of the QIIME 1 scripts (`pick_otus.py`, `align_seqs.py`, ...), either on the PATH or under
/// `<install_prefix>/bin`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QiimeScript {
    install_prefix: Option<PathBuf>,
    script: String,
}

impl QiimeScript {
    pub fn new(install_prefix: Option<&Path>, script: &str) -> Self {
        QiimeScript {
            install_prefix: install_prefix.map(Path::to_owned),
            script: script.to_owned(),
        }
    }

    pub fn resolve(install_prefix: Option<&Path>, script: &str) -> io::Result<Option<QiimeScript>> {
        resolve_with_silent_test_args(Self::new(install_prefix, script), &["-h"])
    }

    pub fn name(&self) -> &str {
        &self.script
    }

    /// The same installation, another script.
    pub fn sibling(&self, script: &str) -> Self {
        QiimeScript {
            install_prefix: self.install_prefix.clone(),
            script: script.to_owned(),
        }
    }
}

impl CliTool for QiimeScript {
    fn new_command(&self) -> Command {
        if let Some(prefix) = &self.install_prefix {
            Command::new(prefix.join("bin").join(&self.script))
        } else {
            Command::new(&self.script)
        }
    }
}
