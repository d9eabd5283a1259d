//! Request executor abstraction for the session.
//!
//! This module defines the seam between the session and the network. A
//! [`RequestExecutor`] receives fully built [`Command`] values and returns the matching
//! [`CommandResponse`]. Retry, failover, timeouts, authentication and node topology all
//! live behind this trait.
//!
//! # Examples
//!
//! ```ignore
//! use docsession::transport::RequestExecutor;
//! use docsession::commands::Command;
//!
//! let executor = MyHttpExecutor::new("http://localhost:8080", "Northwind");
//! let response = executor
//!     .execute(
//!         Command::GetDocuments { ids: vec!["orders/1".into()], includes: Vec::new() },
//!         &session_info,
//!     )
//!     .await?;
//! ```

use async_trait::async_trait;
use std::{fmt::Debug, sync::Arc};

use crate::{
    commands::{Command, CommandResponse},
    error::SessionResult,
    session::SessionInfo,
};

/// Abstract interface for executing session commands against a server.
///
/// # Error Handling
///
/// Implementations report network and timeout failures as
/// [`SessionError::Transport`](crate::error::SessionError::Transport), rejected change vector
/// preconditions as [`SessionError::Concurrency`](crate::error::SessionError::Concurrency) and
/// other non-success statuses as [`SessionError::Server`](crate::error::SessionError::Server).
/// A failed batch must not have been applied at all.
///
/// # Thread Safety
///
/// Executors are shared by every session opened from a store and must be `Send + Sync`.
#[async_trait]
pub trait RequestExecutor: Send + Sync + Debug {
    /// Executes one command as a single round trip.
    ///
    /// # Arguments
    ///
    /// * `command` - The command to send
    /// * `session_info` - Identity and request counter of the calling session
    async fn execute(
        &self,
        command: Command,
        session_info: &SessionInfo,
    ) -> SessionResult<CommandResponse>;
}

#[async_trait]
impl<E> RequestExecutor for &E
where
    E: RequestExecutor + ?Sized,
{
    async fn execute(
        &self,
        command: Command,
        session_info: &SessionInfo,
    ) -> SessionResult<CommandResponse> {
        (*self)
            .execute(command, session_info)
            .await
    }
}

#[async_trait]
impl<E> RequestExecutor for Box<E>
where
    E: RequestExecutor + ?Sized,
{
    async fn execute(
        &self,
        command: Command,
        session_info: &SessionInfo,
    ) -> SessionResult<CommandResponse> {
        (**self)
            .execute(command, session_info)
            .await
    }
}

#[async_trait]
impl<E> RequestExecutor for Arc<E>
where
    E: RequestExecutor + ?Sized,
{
    async fn execute(
        &self,
        command: Command,
        session_info: &SessionInfo,
    ) -> SessionResult<CommandResponse> {
        (**self)
            .execute(command, session_info)
            .await
    }
}

/// Factory trait for creating executor instances.
#[async_trait]
pub trait RequestExecutorBuilder {
    type Executor: RequestExecutor;

    async fn build(self) -> SessionResult<Self::Executor>;
}
