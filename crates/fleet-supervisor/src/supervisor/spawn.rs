// ABOUTME: Launches worker child processes for a phone and socket path.
// ABOUTME: Forwards worker stdout/stderr lines into the log under the worker target.

use fleet_core::WorkerConfig;
use fleet_log::WORKER_TARGET;
use std::collections::BTreeMap;
use std::io;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::{Child, Command};

/// How to start one worker: `program args... <phone> <socket>`.
#[derive(Debug, Clone)]
pub struct WorkerCommand {
    program: String,
    args: Vec<String>,
    working_dir: Option<PathBuf>,
    env: BTreeMap<String, String>,
    forward_output: bool,
}

impl WorkerCommand {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            working_dir: None,
            env: BTreeMap::new(),
            forward_output: true,
        }
    }

    pub fn from_config(config: &WorkerConfig) -> Self {
        Self {
            program: config.command.clone(),
            args: config.args.clone(),
            working_dir: config.working_dir_expanded(),
            env: config.env.clone(),
            forward_output: config.forward_output,
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn current_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.working_dir = Some(dir.into());
        self
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }

    pub fn forward_output(mut self, forward: bool) -> Self {
        self.forward_output = forward;
        self
    }

    pub fn program(&self) -> &str {
        &self.program
    }

    /// Start the worker. The child is killed if its handle is dropped.
    pub fn spawn(&self, phone: &str, socket: &Path) -> io::Result<Child> {
        let mut cmd = Command::new(&self.program);
        cmd.args(&self.args)
            .arg(phone)
            .arg(socket)
            .envs(&self.env)
            .stdin(Stdio::null())
            .kill_on_drop(true);

        if let Some(dir) = &self.working_dir {
            cmd.current_dir(dir);
        }

        if self.forward_output {
            cmd.stdout(Stdio::piped()).stderr(Stdio::piped());
        } else {
            cmd.stdout(Stdio::null()).stderr(Stdio::null());
        }

        let mut child = cmd.spawn()?;
        tracing::info!(phone = %phone, pid = ?child.id(), program = %self.program, "Spawned worker");

        if let Some(stdout) = child.stdout.take() {
            forward_lines(phone.to_string(), "stdout", stdout);
        }
        if let Some(stderr) = child.stderr.take() {
            forward_lines(phone.to_string(), "stderr", stderr);
        }

        Ok(child)
    }
}

fn forward_lines<R>(phone: String, stream: &'static str, reader: R)
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut lines = BufReader::new(reader).lines();
        while let Ok(Some(line)) = lines.next_line().await {
            tracing::debug!(target: WORKER_TARGET, phone = %phone, stream, "{}", line);
        }
    });
}
