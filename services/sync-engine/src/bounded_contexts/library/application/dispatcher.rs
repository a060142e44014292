use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error};

use crate::bounded_contexts::library::application::commands::CommandEnvelope;
use crate::bounded_contexts::library::application::runtime::{
    AggregateRuntime, ExecuteError, ExecutionOutcome,
};
use crate::bounded_contexts::library::domain::errors::LibraryError;
use crate::shared::application::command::CommandHandler;

pub const DEFAULT_COMMAND_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Error, Debug)]
pub enum DispatchError {
    #[error("{0}")]
    Validation(LibraryError),

    #[error("version conflict; retry the command")]
    VersionConflict,

    #[error("command was cancelled")]
    Cancelled,

    #[error("command timed out")]
    Timeout,

    #[error("stream is quarantined; operator intervention required")]
    StreamPoisoned,

    #[error("storage unavailable: {0}")]
    Unavailable(String),
}

impl DispatchError {
    /// Stable lower_snake reason code; the contract clients program against.
    pub fn code(&self) -> &'static str {
        match self {
            DispatchError::Validation(err) => err.code(),
            DispatchError::VersionConflict => "version_conflict",
            DispatchError::Cancelled => "cancelled",
            DispatchError::Timeout => "timeout",
            DispatchError::StreamPoisoned => "stream_poisoned",
            DispatchError::Unavailable(_) => "unavailable",
        }
    }

    /// Whether a client may retry the same command unchanged.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            DispatchError::VersionConflict
                | DispatchError::Timeout
                | DispatchError::Unavailable(_)
        )
    }
}

impl From<ExecuteError> for DispatchError {
    fn from(err: ExecuteError) -> Self {
        match err {
            ExecuteError::Validation(err) => DispatchError::Validation(err),
            ExecuteError::VersionConflict => DispatchError::VersionConflict,
            ExecuteError::Cancelled => DispatchError::Cancelled,
            ExecuteError::Poisoned => DispatchError::StreamPoisoned,
            ExecuteError::Store(err) => DispatchError::Unavailable(err.to_string()),
        }
    }
}

/// Stateless front door of the write path: routes the envelope to the
/// per-user runtime, bounds it with the command timeout, and maps failures
/// to the stable reason codes.
pub struct Dispatcher {
    runtime: Arc<AggregateRuntime>,
    command_timeout: Duration,
}

impl Dispatcher {
    pub fn new(runtime: Arc<AggregateRuntime>) -> Self {
        Self {
            runtime,
            command_timeout: DEFAULT_COMMAND_TIMEOUT,
        }
    }

    pub fn with_command_timeout(mut self, command_timeout: Duration) -> Self {
        self.command_timeout = command_timeout;
        self
    }

    pub fn runtime(&self) -> Arc<AggregateRuntime> {
        Arc::clone(&self.runtime)
    }

    /// Blocking dispatch: resolves once the events are durably appended (or
    /// the command failed). The timeout covers load + validate + append; on
    /// expiry the in-flight work is dropped before its append and the
    /// aggregate is untouched.
    pub async fn dispatch(
        &self,
        envelope: CommandEnvelope,
    ) -> Result<ExecutionOutcome, DispatchError> {
        let cancel = CancellationToken::new();
        let result = tokio::time::timeout(
            self.command_timeout,
            self.runtime.execute(&envelope, &cancel),
        )
        .await;

        match result {
            Ok(Ok(outcome)) => {
                debug!(
                    user_id = %envelope.user_id,
                    command = envelope.command.name(),
                    stream_version = outcome.stream_version,
                    events = outcome.event_types.len(),
                    "command dispatched"
                );
                Ok(outcome)
            }
            Ok(Err(err)) => Err(DispatchError::from(err)),
            Err(_) => {
                cancel.cancel();
                Err(DispatchError::Timeout)
            }
        }
    }

    /// Fire-and-forget variant: the command runs on its own task and
    /// failures are only logged.
    pub fn dispatch_detached(self: &Arc<Self>, envelope: CommandEnvelope) {
        let dispatcher = Arc::clone(self);
        tokio::spawn(async move {
            let user_id = envelope.user_id.clone();
            let command = envelope.command.name();
            if let Err(err) = dispatcher.dispatch(envelope).await {
                error!(
                    user_id = %user_id,
                    command,
                    code = err.code(),
                    "detached command failed: {err}"
                );
            }
        });
    }
}

#[async_trait]
impl CommandHandler<CommandEnvelope> for Dispatcher {
    type Output = ExecutionOutcome;
    type Error = DispatchError;

    async fn handle(&self, command: CommandEnvelope) -> Result<ExecutionOutcome, DispatchError> {
        self.dispatch(command).await
    }
}
