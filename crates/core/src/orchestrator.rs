//! Build Orchestrator
//!
//! Runs an ordered list of steps strictly one after another, stopping at
//! the first failure. The transcript collects each step's output in the
//! order the steps ran.

use std::path::PathBuf;
use std::time::Instant;

use async_trait::async_trait;
use tracing::{debug, error, info};

use crate::step::{log_line, BuildCallback, BuildResult, BuildStep};

/// Sequential, fail-fast step runner
pub struct BuildOrchestrator {
    steps: Vec<Box<dyn BuildStep>>,
    final_artifact: Option<PathBuf>,
}

impl BuildOrchestrator {
    /// Create an orchestrator over the given steps
    pub fn new(steps: Vec<Box<dyn BuildStep>>) -> Self {
        Self {
            steps,
            final_artifact: None,
        }
    }

    /// Report this path through `on_success` once every step passed
    pub fn with_final_artifact(mut self, artifact: impl Into<PathBuf>) -> Self {
        self.final_artifact = Some(artifact.into());
        self
    }

    /// Names of the registered steps, in execution order
    pub fn step_names(&self) -> Vec<String> {
        self.steps.iter().map(|s| s.name().to_string()).collect()
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    /// Run every step in order
    pub async fn execute(&mut self, callback: Option<&dyn BuildCallback>) -> BuildResult {
        let mut transcript = String::new();

        for step in self.steps.iter_mut() {
            let name = step.name().to_string();
            let message = format!("Executing step: {}", name);
            info!("{}", message);
            log_line(callback, &message);

            let started = Instant::now();
            let result = step.execute(callback).await;
            debug!("Step {} finished in {:?}", name, started.elapsed());

            transcript.push_str(&format!("Step: {}\nOutput: {}\n\n", name, result.output));

            if !result.success {
                error!("Step {} failed", name);
                if let Some(callback) = callback {
                    callback.on_failure(&format!("{}: {}", name, result.output));
                }
                return BuildResult::failure(transcript);
            }
        }

        if let (Some(callback), Some(artifact)) = (callback, &self.final_artifact) {
            callback.on_success(&artifact.to_string_lossy());
        }

        info!("All {} steps completed", self.steps.len());
        BuildResult::success(transcript)
    }
}

#[async_trait]
impl BuildStep for BuildOrchestrator {
    fn name(&self) -> &str {
        "BuildOrchestrator"
    }

    async fn execute(&mut self, callback: Option<&dyn BuildCallback>) -> BuildResult {
        BuildOrchestrator::execute(self, callback).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::step::CollectingCallback;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    struct FakeStep {
        name: String,
        succeed: bool,
        runs: Arc<AtomicUsize>,
    }

    impl FakeStep {
        fn boxed(name: &str, succeed: bool, runs: &Arc<AtomicUsize>) -> Box<dyn BuildStep> {
            Box::new(Self {
                name: name.to_string(),
                succeed,
                runs: runs.clone(),
            })
        }
    }

    #[async_trait]
    impl BuildStep for FakeStep {
        fn name(&self) -> &str {
            &self.name
        }

        async fn execute(&mut self, callback: Option<&dyn BuildCallback>) -> BuildResult {
            self.runs.fetch_add(1, Ordering::SeqCst);
            log_line(callback, &format!("{} working", self.name));
            if self.succeed {
                BuildResult::success(format!("{} done", self.name))
            } else {
                BuildResult::failure(format!("{} broke", self.name))
            }
        }
    }

    #[tokio::test]
    async fn test_all_steps_succeed() {
        let runs = Arc::new(AtomicUsize::new(0));
        let mut orchestrator = BuildOrchestrator::new(vec![
            FakeStep::boxed("one", true, &runs),
            FakeStep::boxed("two", true, &runs),
        ])
        .with_final_artifact("/tmp/app-signed.apk");
        let callback = CollectingCallback::new();

        let result = orchestrator.execute(Some(&callback)).await;

        assert!(result.success);
        assert_eq!(
            result.output,
            "Step: one\nOutput: one done\n\nStep: two\nOutput: two done\n\n"
        );
        assert_eq!(runs.load(Ordering::SeqCst), 2);
        assert_eq!(callback.successes(), vec!["/tmp/app-signed.apk".to_string()]);
    }

    #[tokio::test]
    async fn test_stops_at_first_failure() {
        let runs = Arc::new(AtomicUsize::new(0));
        let third_runs = Arc::new(AtomicUsize::new(0));
        let mut orchestrator = BuildOrchestrator::new(vec![
            FakeStep::boxed("one", true, &runs),
            FakeStep::boxed("two", false, &runs),
            FakeStep::boxed("three", true, &third_runs),
        ]);
        let callback = CollectingCallback::new();

        let result = orchestrator.execute(Some(&callback)).await;

        assert!(!result.success);
        assert!(result.output.contains("one done"));
        assert!(result.output.contains("two broke"));
        assert!(!result.output.contains("three"));
        assert_eq!(third_runs.load(Ordering::SeqCst), 0);
        assert_eq!(callback.failures(), vec!["two: two broke".to_string()]);
        assert!(callback.successes().is_empty());
    }

    #[tokio::test]
    async fn test_streams_step_lines() {
        let runs = Arc::new(AtomicUsize::new(0));
        let mut orchestrator = BuildOrchestrator::new(vec![FakeStep::boxed("one", true, &runs)]);
        let callback = CollectingCallback::new();

        orchestrator.execute(Some(&callback)).await;

        assert_eq!(
            callback.lines(),
            vec!["Executing step: one".to_string(), "one working".to_string()]
        );
    }

    #[tokio::test]
    async fn test_empty_orchestrator_succeeds() {
        let mut orchestrator = BuildOrchestrator::new(Vec::new());
        let result = orchestrator.execute(None).await;
        assert!(result.success);
        assert!(result.output.is_empty());
    }

    #[tokio::test]
    async fn test_nested_as_step() {
        let runs = Arc::new(AtomicUsize::new(0));
        let inner = BuildOrchestrator::new(vec![FakeStep::boxed("inner", true, &runs)]);
        let mut outer = BuildOrchestrator::new(vec![Box::new(inner)]);

        let result = outer.execute(None).await;

        assert!(result.success);
        assert!(result.output.starts_with("Step: BuildOrchestrator\nOutput: Step: inner"));
    }
}
