//! External tool invocation
//!
//! Every toolchain step runs its tool through [`run_streaming`], which
//! forwards stdout and stderr line by line to the build callback while
//! capturing the combined transcript.

use std::ffi::{OsStr, OsString};
use std::path::{Path, PathBuf};
use std::process::Stdio;

use apkforge_core::{BuildCallback, BuildResult};
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::Command;
use tokio::sync::mpsc;
use tracing::{debug, info};

use crate::BuildError;

/// A tool invocation, built up before it runs
#[derive(Debug, Clone)]
pub struct ToolCommand {
    label: String,
    program: PathBuf,
    args: Vec<OsString>,
    /// Indices into `args` masked in logs
    secret: Vec<usize>,
    current_dir: Option<PathBuf>,
}

impl ToolCommand {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        let program = program.into();
        Self {
            label: tool_label(&program),
            program,
            args: Vec::new(),
            secret: Vec::new(),
            current_dir: None,
        }
    }

    /// Invoke `path` directly, through `java -jar` for a jar, or through
    /// `sh` for a shell script
    pub fn tool(path: &Path, java: &Path) -> Self {
        let label = tool_label(path);
        let mut command = match path.extension().and_then(|e| e.to_str()) {
            Some("jar") => Self::new(java).arg("-jar").arg(path),
            Some("sh") => Self::new("sh").arg(path),
            _ => Self::new(path),
        };
        command.label = label;
        command
    }

    pub fn arg(mut self, arg: impl AsRef<OsStr>) -> Self {
        self.args.push(arg.as_ref().to_os_string());
        self
    }

    /// An argument that must not show up in logs
    pub fn secret_arg(mut self, arg: impl AsRef<OsStr>) -> Self {
        self.secret.push(self.args.len());
        self.arg(arg)
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<OsStr>,
    {
        self.args.extend(args.into_iter().map(|a| a.as_ref().to_os_string()));
        self
    }

    pub fn current_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.current_dir = Some(dir.into());
        self
    }

    /// Short tool name used in messages
    pub fn label(&self) -> &str {
        &self.label
    }

    /// Command line for logs
    pub fn display(&self) -> String {
        let mut line = self.program.to_string_lossy().into_owned();
        for (i, arg) in self.args.iter().enumerate() {
            line.push(' ');
            if self.secret.contains(&i) {
                line.push_str("****");
            } else {
                line.push_str(&arg.to_string_lossy());
            }
        }
        line
    }

    pub async fn run(&self, callback: Option<&dyn BuildCallback>) -> Result<ProcessOutput, BuildError> {
        run_streaming(self, callback).await
    }
}

fn tool_label(path: &Path) -> String {
    path.file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.to_string_lossy().into_owned())
}

/// What a finished tool left behind
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessOutput {
    /// `None` when the process was killed by a signal
    pub exit_code: Option<i32>,
    /// Interleaved stdout and stderr, in arrival order
    pub output: String,
}

impl ProcessOutput {
    pub fn success(&self) -> bool {
        self.exit_code == Some(0)
    }

    /// Map to a step result; failures always say how the tool exited
    pub fn into_result(self, tool: &str, success_message: &str) -> BuildResult {
        if self.success() {
            if self.output.trim().is_empty() {
                BuildResult::success(success_message)
            } else {
                BuildResult::success(self.output)
            }
        } else {
            let status = match self.exit_code {
                Some(code) => format!("{} exited with status {}", tool, code),
                None => format!("{} was terminated by a signal", tool),
            };
            if self.output.trim().is_empty() {
                BuildResult::failure(status)
            } else {
                BuildResult::failure(format!("{}\n{}", self.output.trim_end(), status))
            }
        }
    }
}

/// Run `command` to completion, streaming each output line to `callback`
pub async fn run_streaming(
    command: &ToolCommand,
    callback: Option<&dyn BuildCallback>,
) -> Result<ProcessOutput, BuildError> {
    info!("Running {}", command.display());

    let mut process = Command::new(&command.program);
    process
        .args(&command.args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);
    if let Some(dir) = &command.current_dir {
        process.current_dir(dir);
    }

    let mut child = process.spawn().map_err(|source| BuildError::Spawn {
        tool: command.label.clone(),
        source,
    })?;

    let (tx, mut rx) = mpsc::unbounded_channel::<String>();
    if let Some(stdout) = child.stdout.take() {
        tokio::spawn(forward_lines(stdout, tx.clone()));
    }
    if let Some(stderr) = child.stderr.take() {
        tokio::spawn(forward_lines(stderr, tx.clone()));
    }
    drop(tx);

    let mut output = String::new();
    while let Some(line) = rx.recv().await {
        debug!("[{}] {}", command.label, line);
        if let Some(callback) = callback {
            callback.on_log(&line);
        }
        output.push_str(&line);
        output.push('\n');
    }

    let status = child.wait().await?;
    debug!("{} finished with {}", command.label, status);

    Ok(ProcessOutput {
        exit_code: status.code(),
        output,
    })
}

async fn forward_lines<R>(reader: R, tx: mpsc::UnboundedSender<String>)
where
    R: AsyncRead + Unpin,
{
    let mut reader = BufReader::new(reader);
    let mut buffer = Vec::new();
    loop {
        buffer.clear();
        match reader.read_until(b'\n', &mut buffer).await {
            Ok(0) | Err(_) => break,
            Ok(_) => {
                let line = String::from_utf8_lossy(&buffer);
                let line = line.trim_end_matches(['\n', '\r']);
                if tx.send(line.to_string()).is_err() {
                    break;
                }
            }
        }
    }
}

/// Run a tool and turn the outcome into a step result
pub(crate) async fn run_tool(
    command: ToolCommand,
    callback: Option<&dyn BuildCallback>,
    success_message: &str,
) -> BuildResult {
    match command.run(callback).await {
        Ok(output) => output.into_result(command.label(), success_message),
        Err(e) => BuildResult::failure(e.to_string()),
    }
}
