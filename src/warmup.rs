use anyhow::Result;

/// Account warm-up is an external collaborator: the scheduler invokes one
/// cycle per tick with no arguments, and the implementation owns its own
/// per-account pacing and failure handling.
pub trait WarmupRunner {
    fn run_cycle(&mut self) -> Result<()>;
}

/// Placeholder used until a real warm-up integration is wired in.
pub struct NoopWarmup;

impl WarmupRunner for NoopWarmup {
    fn run_cycle(&mut self) -> Result<()> {
        Ok(())
    }
}
