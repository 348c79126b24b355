use std::{
    fs::{File, OpenOptions},
    io::{self, Write},
    path::{Path, PathBuf},
    process::{Command, Stdio},
    sync::Mutex,
};

use itertools::Itertools;
use tracing::{debug, info};

use crate::error::ExecError;

const STDERR_TAIL_LINES: usize = 20;

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum ExecutionMode {
    /// Run every operation, one at a time.
    Serial,
    /// Like `Serial`, but tool bindings may split their own work across this many jobs.
    Parallel { jobs_to_start: usize },
    /// Print the operations instead of running them.
    DryRun,
}

/// One invocation of an external tool.
#[derive(Debug)]
pub struct ExternalOp {
    description: String,
    command: Command,
    expected_outputs: Vec<PathBuf>,
    log_path: Option<PathBuf>,
}

impl ExternalOp {
    pub fn new(description: impl Into<String>, command: Command) -> Self {
        ExternalOp {
            description: description.into(),
            command,
            expected_outputs: Vec::new(),
            log_path: None,
        }
    }

    /// Fail the operation if `path` is missing after a successful exit.
    pub fn expect_output(mut self, path: impl Into<PathBuf>) -> Self {
        self.expected_outputs.push(path.into());
        self
    }

    /// Log written by the tool itself, pointed at when the operation fails.
    pub fn with_log(mut self, path: impl Into<PathBuf>) -> Self {
        self.log_path = Some(path.into());
        self
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    pub fn command(&self) -> &Command {
        &self.command
    }
}

/// Runs external operations and in-process bookkeeping steps, recording both in the workflow log.
#[derive(Debug)]
pub struct CommandExecutor {
    mode: ExecutionMode,
    workflow_log: Mutex<Option<File>>,
}

impl CommandExecutor {
    pub fn new(mode: ExecutionMode) -> Self {
        CommandExecutor {
            mode,
            workflow_log: Mutex::new(None),
        }
    }

    pub fn mode(&self) -> ExecutionMode {
        self.mode
    }

    pub fn is_dry_run(&self) -> bool {
        self.mode == ExecutionMode::DryRun
    }

    pub fn parallel_jobs(&self) -> Option<usize> {
        match self.mode {
            ExecutionMode::Parallel { jobs_to_start } => Some(jobs_to_start),
            _ => None,
        }
    }

    /// Starts the workflow log unless one is already open. Returns whether a new log was opened.
    pub fn open_log(&self, path: &Path) -> io::Result<bool> {
        let mut log = self.lock_log();

        if log.is_some() {
            return Ok(false);
        }

        let mut file = OpenOptions::new().create(true).append(true).open(path)?;
        writeln!(file, "Logging started at {}", chrono::Local::now().format("%H:%M:%S on %d %b %Y"))?;
        writeln!(file, "Execution mode: {:?}\n", self.mode)?;

        *log = Some(file);
        info!("Writing workflow log to {path:?}");
        Ok(true)
    }

    pub fn close_log(&self) {
        let mut log = self.lock_log();

        if let Some(file) = log.as_mut() {
            let _ = writeln!(file, "\nLogging stopped at {}", chrono::Local::now().format("%H:%M:%S on %d %b %Y"));
        }

        *log = None;
    }

    fn lock_log(&self) -> std::sync::MutexGuard<'_, Option<File>> {
        self.workflow_log.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn write_log(&self, entry: &str) {
        if let Some(file) = self.lock_log().as_mut() {
            // losing a log line must not abort the run
            let _ = writeln!(file, "{entry}");
        }
    }

    /// Runs `ops` in order, stopping at the first failure.
    pub fn run(&self, ops: Vec<ExternalOp>) -> Result<(), ExecError> {
        for op in ops {
            self.run_one(op)?;
        }

        Ok(())
    }

    pub fn run_one(&self, mut op: ExternalOp) -> Result<(), ExecError> {
        let rendered = format!("{:?}", op.command);

        if self.is_dry_run() {
            println!("# {}", op.description);
            println!("{rendered}");
            self.write_log(&format!("# {}\n{rendered}\n", op.description));
            return Ok(());
        }

        info!("{}", op.description);
        debug!("Running {rendered}");
        self.write_log(&format!("# {}\nCommand: {rendered}", op.description));

        let output = op
            .command
            .stdin(Stdio::null())
            .output()
            .map_err(|source| ExecError::Spawn { description: op.description.clone(), source })?;

        let stdout = String::from_utf8_lossy(&output.stdout);
        let stderr = String::from_utf8_lossy(&output.stderr);

        self.write_log(&format!("Exit status: {}\nStdout:\n{stdout}\nStderr:\n{stderr}\n", output.status));

        if !output.status.success() {
            let lines = stderr.lines().collect_vec();
            let stderr_tail = lines[lines.len().saturating_sub(STDERR_TAIL_LINES)..].join("\n");

            return Err(ExecError::Failed {
                description: op.description,
                status: output.status,
                stderr_tail,
                log_path: op.log_path,
            });
        }

        if let Some(missing) = op.expected_outputs.iter().find(|path| !path.exists()) {
            return Err(ExecError::MissingOutput {
                description: op.description,
                path: missing.clone(),
                log_path: op.log_path,
            });
        }

        Ok(())
    }

    /// Runs an in-process bookkeeping step. Skipped in dry-run mode, where its inputs do not exist.
    pub fn run_internal<F>(&self, description: &str, step: F) -> anyhow::Result<()>
    where
        F: FnOnce() -> anyhow::Result<()>,
    {
        if self.is_dry_run() {
            println!("# {description} (in-process)");
            self.write_log(&format!("# {description} (in-process, skipped)\n"));
            return Ok(());
        }

        info!("{description}");
        self.write_log(&format!("# {description} (in-process)"));

        let result = step();

        match &result {
            Ok(()) => self.write_log("Done\n"),
            Err(e) => self.write_log(&format!("Failed: {e:#}\n")),
        }

        result
    }
}

#[cfg(all(test, unix))]
mod tests {
    use std::fs;

    use super::*;

    fn sh(script: &str) -> Command {
        let mut cmd = Command::new("sh");
        cmd.args(["-c", script]);
        cmd
    }

    #[test]
    fn serial_runs_until_first_failure() {
        let dir = tempfile::tempdir().unwrap();
        let marker = dir.path().join("marker");
        let exec = CommandExecutor::new(ExecutionMode::Serial);

        let ops = vec![
            ExternalOp::new("fail", sh("echo boom >&2; exit 3")).with_log(dir.path().join("tool.log")),
            ExternalOp::new("touch", sh(&format!("touch {}", marker.display()))),
        ];

        match exec.run(ops) {
            Err(ExecError::Failed { description, status, stderr_tail, log_path }) => {
                assert_eq!(description, "fail");
                assert_eq!(status.code(), Some(3));
                assert_eq!(stderr_tail, "boom");
                assert_eq!(log_path, Some(dir.path().join("tool.log")));
            }
            other => panic!("unexpected result: {other:?}"),
        }

        assert!(!marker.exists());
    }

    #[test]
    fn missing_expected_output_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let exec = CommandExecutor::new(ExecutionMode::Serial);

        let op = ExternalOp::new("noop", sh("true")).expect_output(dir.path().join("out.txt"));
        assert!(matches!(exec.run_one(op), Err(ExecError::MissingOutput { .. })));
    }

    #[test]
    fn dry_run_executes_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let marker = dir.path().join("marker");
        let exec = CommandExecutor::new(ExecutionMode::DryRun);

        exec.run(vec![ExternalOp::new("touch", sh(&format!("touch {}", marker.display())))])
            .unwrap();
        exec.run_internal("bookkeeping", || anyhow::bail!("must not run")).unwrap();

        assert!(!marker.exists());
    }

    #[test]
    fn parallel_mode_exposes_job_count() {
        assert_eq!(CommandExecutor::new(ExecutionMode::Parallel { jobs_to_start: 4 }).parallel_jobs(), Some(4));
        assert_eq!(CommandExecutor::new(ExecutionMode::Serial).parallel_jobs(), None);
    }

    #[test]
    fn workflow_log_records_operations() {
        let dir = tempfile::tempdir().unwrap();
        let log_path = dir.path().join("log.txt");
        let exec = CommandExecutor::new(ExecutionMode::Serial);

        assert!(exec.open_log(&log_path).unwrap());
        assert!(!exec.open_log(&dir.path().join("other.txt")).unwrap());

        exec.run_one(ExternalOp::new("say hello", sh("echo hello"))).unwrap();
        exec.run_internal("count things", || Ok(())).unwrap();
        exec.close_log();

        let log = fs::read_to_string(&log_path).unwrap();
        assert!(log.contains("# say hello"));
        assert!(log.contains("hello"));
        assert!(log.contains("# count things (in-process)"));
    }
}
