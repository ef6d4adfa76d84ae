//! Lifecycle contract shared by every runnable process role.

use async_trait::async_trait;

/// A long-running component the runner can start and stop.
///
/// `start` spawns the component's tasks and returns once it is serving (for a
/// server, once the listener is bound). `stop` signals shutdown and waits for
/// the spawned tasks to finish.
#[async_trait]
pub trait Service: Send {
    /// Short name used in log lines.
    fn name(&self) -> &str;

    async fn start(&mut self) -> anyhow::Result<()>;

    async fn stop(&mut self) -> anyhow::Result<()>;
}
