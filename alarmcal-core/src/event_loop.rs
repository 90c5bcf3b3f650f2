//! Completion events for asynchronous resource work.
//!
//! Jobs, timers and file watchers run off the control task. When they finish
//! they post a `ResourceEvent` tagged with the resource id; the registry
//! receives it on the control task and hands it to the owning resource, so
//! resource state is only ever touched from one place.

use tokio::sync::mpsc;

use crate::settings::ResourceId;

pub type JobId = u64;

#[derive(Debug, Clone, PartialEq)]
pub enum ResourceEvent {
    /// A remote download into the local cache finished
    DownloadFinished {
        job: JobId,
        result: Result<(), String>,
    },
    /// An upload of the local cache finished
    UploadFinished {
        job: JobId,
        result: Result<(), String>,
    },
    /// The debounce interval for a scheduled save elapsed
    SaveTimer,
    /// The watched calendar file changed on disk
    FileChanged,
}

#[derive(Debug)]
pub struct Dispatch {
    pub resource: ResourceId,
    pub event: ResourceEvent,
}

/// Creates `EventSender`s bound to individual resources.
#[derive(Debug, Clone)]
pub struct EventLoopHandle {
    tx: mpsc::UnboundedSender<Dispatch>,
}

impl EventLoopHandle {
    pub fn channel() -> (EventLoopHandle, mpsc::UnboundedReceiver<Dispatch>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (EventLoopHandle { tx }, rx)
    }

    pub fn sender(&self, resource: ResourceId) -> EventSender {
        EventSender {
            tx: self.tx.clone(),
            resource,
        }
    }
}

/// Posts events for one resource. Safe to use from any thread.
#[derive(Debug, Clone)]
pub struct EventSender {
    tx: mpsc::UnboundedSender<Dispatch>,
    resource: ResourceId,
}

impl EventSender {
    /// Post an event. If the registry is gone the event is dropped, which
    /// lets detached jobs finish after their resource has closed.
    pub fn send(&self, event: ResourceEvent) {
        let _ = self.tx.send(Dispatch {
            resource: self.resource,
            event,
        });
    }
}
