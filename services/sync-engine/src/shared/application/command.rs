use async_trait::async_trait;

/// A request to mutate system state.
pub trait Command: Send + Sync {}

/// The seam transport layers call through: one handler per command family,
/// failures surfaced as values, never raised.
#[async_trait]
pub trait CommandHandler<C: Command>: Send + Sync {
    type Output: Send + 'static;
    type Error: Send + 'static;

    async fn handle(&self, command: C) -> Result<Self::Output, Self::Error>;
}
