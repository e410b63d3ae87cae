//! Build step contract
//!
//! Every unit of pipeline work implements [`BuildStep`] and reports back a
//! [`BuildResult`]. Progress is streamed through an optional
//! [`BuildCallback`] while the step runs.

use async_trait::async_trait;
use parking_lot::Mutex;

/// Terminal value of every step and of the orchestrator itself
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildResult {
    /// Whether the step completed successfully
    pub success: bool,
    /// Captured output or failure message
    pub output: String,
}

impl BuildResult {
    pub fn success(output: impl Into<String>) -> Self {
        Self {
            success: true,
            output: output.into(),
        }
    }

    pub fn failure(output: impl Into<String>) -> Self {
        Self {
            success: false,
            output: output.into(),
        }
    }
}

/// Progress interface handed to running steps
pub trait BuildCallback: Send + Sync {
    /// A single line of progress output
    fn on_log(&self, line: &str);

    /// The pipeline produced its final artifact
    fn on_success(&self, _artifact: &str) {}

    /// The pipeline stopped on a failed step
    fn on_failure(&self, _message: &str) {}
}

/// A uniform unit of pipeline work
#[async_trait]
pub trait BuildStep: Send {
    /// Display name used in logs and the transcript
    fn name(&self) -> &str;

    /// Run the step to completion
    async fn execute(&mut self, callback: Option<&dyn BuildCallback>) -> BuildResult;
}

/// Forward a line to an optional callback
pub fn log_line(callback: Option<&dyn BuildCallback>, line: &str) {
    if let Some(callback) = callback {
        callback.on_log(line);
    }
}

/// Callback that records everything it receives
#[derive(Debug, Default)]
pub struct CollectingCallback {
    lines: Mutex<Vec<String>>,
    successes: Mutex<Vec<String>>,
    failures: Mutex<Vec<String>>,
}

impl CollectingCallback {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn lines(&self) -> Vec<String> {
        self.lines.lock().clone()
    }

    pub fn successes(&self) -> Vec<String> {
        self.successes.lock().clone()
    }

    pub fn failures(&self) -> Vec<String> {
        self.failures.lock().clone()
    }
}

impl BuildCallback for CollectingCallback {
    fn on_log(&self, line: &str) {
        self.lines.lock().push(line.to_string());
    }

    fn on_success(&self, artifact: &str) {
        self.successes.lock().push(artifact.to_string());
    }

    fn on_failure(&self, message: &str) {
        self.failures.lock().push(message.to_string());
    }
}
