//! Location sources.
//!
//! Every source is started with an interval and the controller's event
//! channel, runs on its own task, and reports through [`SourceEvent`]s. The
//! controller is the only consumer of those events.

pub mod gps;
pub mod network;
pub mod simulated;

use crate::error::{SourceError, SourceResult};
use crate::reading::{LocationReading, SourceKind};
use std::future::Future;
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

pub use gps::TermuxGpsSource;
pub use network::{HttpIpLocator, IpProvider, NetworkLocator, NetworkSource};
pub use simulated::SimulatedGpsSource;

/// Tagged event delivered from a source to the controller
#[derive(Debug, Clone, PartialEq)]
pub enum SourceEvent {
    Reading(LocationReading),
    Status { source: SourceKind, text: String },
    Failure { source: SourceKind, error: SourceError },
}

impl SourceEvent {
    pub fn source(&self) -> SourceKind {
        match self {
            SourceEvent::Reading(reading) => reading.source(),
            SourceEvent::Status { source, .. } | SourceEvent::Failure { source, .. } => *source,
        }
    }
}

pub type EventSender = mpsc::Sender<SourceEvent>;

/// Uniform contract over the acquisition strategies.
pub trait LocationSource: Send {
    fn kind(&self) -> SourceKind;

    /// One-time availability check, run before the first start.
    fn initialize(&mut self) -> SourceResult<()>;

    /// Begin acquiring, emitting at most one request per `interval`.
    fn start(&mut self, interval: Duration, events: EventSender) -> SourceResult<()>;

    /// Stop acquiring. Stopping a stopped source does nothing.
    fn stop(&mut self);

    fn is_running(&self) -> bool;
}

/// Handle to the background task of a running source
#[derive(Debug, Default)]
pub(crate) struct TaskSlot {
    handle: Option<JoinHandle<()>>,
}

impl TaskSlot {
    /// Spawn on the current runtime, replacing any task already running.
    pub(crate) fn spawn<F>(&mut self, task: F) -> SourceResult<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let runtime = Handle::try_current()
            .map_err(|e| SourceError::Unavailable(format!("no async runtime: {}", e)))?;
        self.abort();
        self.handle = Some(runtime.spawn(task));
        Ok(())
    }

    /// Returns true if a task was running.
    pub(crate) fn abort(&mut self) -> bool {
        match self.handle.take() {
            Some(handle) => {
                handle.abort();
                true
            }
            None => false,
        }
    }

    pub(crate) fn is_running(&self) -> bool {
        self.handle.as_ref().map_or(false, |h| !h.is_finished())
    }
}
