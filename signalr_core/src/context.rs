//! The duplex connection context and its shutdown protocol.
//!
//! A live connection has two independently driven tasks:
//!
//! * the **application task** reads and writes the application ends of the
//!   [duplex pipe](crate::pipe), and
//! * the **transport task** reads and writes the transport ends.
//!
//! Either may finish first, cleanly or with an error. [`DuplexConnectionContext::dispose`]
//! coordinates the teardown:
//!
//! ```text
//!                 graceful                                forced
//!  ┌──────────────────────────────────────┐   ┌──────────────────────────────────┐
//!  │ wait for the first task to finish    │   │ complete both outputs now        │
//!  │ complete its ends (output gets its   │   │ await both tasks concurrently    │
//!  │   error as the completion reason)    │   │ complete both inputs             │
//!  │ wait for the other task to drain     │   └──────────────────────────────────┘
//!  │ complete the other task's ends       │
//!  └──────────────────────────────────────┘
//! ```
//!
//! The side that finishes first never cuts off data the other side may still
//! be reading; it signals and waits. Forced mode does not wait for draining,
//! so a hung task leaks rather than deadlocking shutdown.
//!
//! Status only moves forward: `Inactive → Active → Disposed`. The first
//! `dispose` call builds a single shared completion; every other call awaits
//! that same completion and observes the same outcome.

pub mod heartbeat;

use alloc::string::String;
use core::time::Duration;
use std::{
    sync::{Mutex, PoisonError},
    time::Instant,
};

use futures::{
    FutureExt,
    future::{BoxFuture, Either, Shared},
};
use thiserror::Error;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use self::heartbeat::Heartbeat;
use crate::pipe::{CompletionError, DuplexPipe};

/// Outcome of an application or transport task.
pub type TaskResult = Result<(), CompletionError>;

/// Lifecycle of a [`DuplexConnectionContext`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ContextStatus {
    /// Created; tasks not yet attached.
    Inactive,

    /// Tasks running.
    Active,

    /// Shut down. Terminal.
    Disposed,
}

/// How [`DuplexConnectionContext::dispose`] tears down.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ShutdownMode {
    /// Let the first finished side signal, then wait for the other to drain.
    Graceful,

    /// Complete both outputs immediately and wait without draining.
    Forced,
}

/// The shared outcome of disposing a context.
#[derive(Debug, Clone, Error)]
pub enum DisposeError {
    /// The shutdown was cancelled before it finished.
    #[error("connection shutdown was cancelled")]
    Cancelled,

    /// A connection task failed.
    #[error("connection task failed: {0}")]
    Failed(CompletionError),
}

/// The context is not in the status an operation requires.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("connection context is {0:?}")]
pub struct InvalidStatus(pub ContextStatus);

type Disposal = Shared<BoxFuture<'static, Result<(), DisposeError>>>;

#[derive(Debug)]
struct Inner {
    status: ContextStatus,
    application_task: Option<JoinHandle<TaskResult>>,
    transport_task: Option<JoinHandle<TaskResult>>,
    disposal: Option<Disposal>,
}

/// A live duplex connection.
#[derive(Debug)]
pub struct DuplexConnectionContext {
    connection_id: String,
    application: DuplexPipe,
    transport: DuplexPipe,
    inner: async_lock::Mutex<Inner>,
    last_seen: Mutex<Instant>,
    heartbeat: Heartbeat,
}

impl DuplexConnectionContext {
    /// Wrap the two parties' pipe ends.
    ///
    /// `application` are the ends the application task uses and `transport`
    /// the ends the transport task uses.
    #[must_use]
    pub fn new(connection_id: impl Into<String>, application: DuplexPipe, transport: DuplexPipe) -> Self {
        Self {
            connection_id: connection_id.into(),
            application,
            transport,
            inner: async_lock::Mutex::new(Inner {
                status: ContextStatus::Inactive,
                application_task: None,
                transport_task: None,
                disposal: None,
            }),
            last_seen: Mutex::new(Instant::now()),
            heartbeat: Heartbeat::new(),
        }
    }

    /// The connection identifier.
    #[must_use]
    pub fn connection_id(&self) -> &str {
        &self.connection_id
    }

    /// The application's pipe ends.
    #[must_use]
    pub const fn application(&self) -> &DuplexPipe {
        &self.application
    }

    /// The transport's pipe ends.
    #[must_use]
    pub const fn transport(&self) -> &DuplexPipe {
        &self.transport
    }

    /// Current status.
    pub async fn status(&self) -> ContextStatus {
        self.inner.lock().await.status
    }

    /// Attach the two tasks and become active.
    ///
    /// # Errors
    ///
    /// Returns [`InvalidStatus`] unless the context is inactive. The handles
    /// are aborted in that case.
    pub async fn start(
        &self,
        application_task: JoinHandle<TaskResult>,
        transport_task: JoinHandle<TaskResult>,
    ) -> Result<(), InvalidStatus> {
        let mut inner = self.inner.lock().await;
        if inner.status != ContextStatus::Inactive {
            application_task.abort();
            transport_task.abort();
            return Err(InvalidStatus(inner.status));
        }

        inner.application_task = Some(application_task);
        inner.transport_task = Some(transport_task);
        inner.status = ContextStatus::Active;
        tracing::debug!(connection_id = %self.connection_id, "connection context active");
        Ok(())
    }

    /// Shut the connection down.
    ///
    /// The first caller's `mode` and `cancel` drive the teardown; every
    /// caller awaits the same completion. Cancelling `cancel` settles that
    /// completion as [`DisposeError::Cancelled`].
    ///
    /// # Errors
    ///
    /// Returns [`DisposeError::Cancelled`] if the shutdown was cancelled, or
    /// [`DisposeError::Failed`] with the first task error observed.
    pub async fn dispose(&self, mode: ShutdownMode, cancel: CancellationToken) -> Result<(), DisposeError> {
        let disposal = {
            let mut inner = self.inner.lock().await;
            match &inner.disposal {
                Some(disposal) => disposal.clone(),
                None => {
                    inner.status = ContextStatus::Disposed;
                    tracing::debug!(connection_id = %self.connection_id, ?mode, "disposing connection context");

                    let teardown = shutdown(
                        mode,
                        Task::from(inner.application_task.take()),
                        Task::from(inner.transport_task.take()),
                        self.application.clone(),
                        self.transport.clone(),
                    );

                    let disposal = async move {
                        tokio::select! {
                            result = teardown => result,
                            () = cancel.cancelled() => Err(DisposeError::Cancelled),
                        }
                    }
                    .boxed()
                    .shared();

                    inner.disposal = Some(disposal.clone());
                    disposal
                }
            }
        };

        let result = disposal.await;
        if let Err(err) = &result {
            tracing::debug!(connection_id = %self.connection_id, "connection context disposed with error: {err}");
        }
        result
    }

    /// Register a heartbeat callback.
    pub fn on_heartbeat<S>(&self, callback: impl Fn(&S) + Send + Sync + 'static, state: S)
    where
        S: Send + Sync + 'static,
    {
        self.heartbeat.on_heartbeat(callback, state);
    }

    /// Run every heartbeat callback once.
    pub fn tick_heartbeat(&self) {
        self.heartbeat.tick();
    }

    /// Tick the heartbeat every `period` until `cancel` fires.
    pub async fn run_heartbeat(&self, period: Duration, cancel: CancellationToken) {
        self.heartbeat.run(period, cancel).await;
    }

    /// Record activity on the connection.
    pub fn touch(&self) {
        *self.last_seen.lock().unwrap_or_else(PoisonError::into_inner) = Instant::now();
    }

    /// When activity was last recorded.
    #[must_use]
    pub fn last_seen(&self) -> Instant {
        *self.last_seen.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

enum Task {
    Running(JoinHandle<TaskResult>),
    Finished(TaskResult),
}

impl From<Option<JoinHandle<TaskResult>>> for Task {
    fn from(handle: Option<JoinHandle<TaskResult>>) -> Self {
        handle.map_or(Task::Finished(Ok(())), Task::Running)
    }
}

impl Task {
    /// The task's error if it has already finished with one.
    fn error_if_finished(&mut self) -> Option<CompletionError> {
        if let Task::Running(handle) = self {
            if !handle.is_finished() {
                return None;
            }
            let result = (&mut *handle).now_or_never()?;
            *self = Task::Finished(flatten(result));
        }

        match self {
            Task::Finished(Err(err)) => Some(err.clone()),
            _ => None,
        }
    }

    async fn join(self) -> TaskResult {
        match self {
            Task::Running(handle) => flatten(handle.await),
            Task::Finished(result) => result,
        }
    }
}

fn flatten(result: Result<TaskResult, tokio::task::JoinError>) -> TaskResult {
    result.unwrap_or_else(|join_err| Err(CompletionError::new(join_err)))
}

async fn shutdown(
    mode: ShutdownMode,
    application_task: Task,
    transport_task: Task,
    application: DuplexPipe,
    transport: DuplexPipe,
) -> Result<(), DisposeError> {
    match mode {
        ShutdownMode::Graceful => graceful(application_task, transport_task, application, transport).await,
        ShutdownMode::Forced => forced(application_task, transport_task, application, transport).await,
    }
}

async fn graceful(
    application_task: Task,
    transport_task: Task,
    application: DuplexPipe,
    transport: DuplexPipe,
) -> Result<(), DisposeError> {
    let first = futures::future::select(application_task.join().boxed(), transport_task.join().boxed()).await;

    let (first_result, second_result) = match first {
        Either::Left((application_result, transport_rest)) => {
            tracing::trace!("application finished first");
            application.complete(application_result.clone().err());
            let transport_result = transport_rest.await;
            transport.complete(transport_result.clone().err());
            (application_result, transport_result)
        }
        Either::Right((transport_result, application_rest)) => {
            tracing::trace!("transport finished first");
            transport.complete(transport_result.clone().err());
            let application_result = application_rest.await;
            application.complete(application_result.clone().err());
            (transport_result, application_result)
        }
    };

    first_result.and(second_result).map_err(DisposeError::Failed)
}

async fn forced(
    mut application_task: Task,
    mut transport_task: Task,
    application: DuplexPipe,
    transport: DuplexPipe,
) -> Result<(), DisposeError> {
    application.output.complete(application_task.error_if_finished());
    transport.output.complete(transport_task.error_if_finished());

    let (application_result, transport_result) =
        futures::future::join(application_task.join(), transport_task.join()).await;

    application.input.complete();
    transport.input.complete();

    application_result
        .and(transport_result)
        .map_err(DisposeError::Failed)
}
