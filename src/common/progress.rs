//! Optional progress reporting for long running steps.

/// Sink for step descriptions. Purely informational: it never affects control flow.
pub trait Progress {
    fn update(&mut self, description: &str);
}

/// Progress sink that discards every update.
#[derive(Debug, Default)]
pub struct NoProgress;

impl Progress for NoProgress {
    fn update(&mut self, _description: &str) {}
}

/// Progress sink that counts steps and remembers the latest description.
#[derive(Debug, Default)]
pub struct StepCounter {
    pub steps: usize,
    pub last: Option<String>,
}

impl Progress for StepCounter {
    fn update(&mut self, description: &str) {
        self.steps += 1;
        self.last = Some(description.to_string());
        tracing::debug!(step = self.steps, description, "progress");
    }
}
