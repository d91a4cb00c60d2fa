//! Background worker thread that runs tick batches.
//!
//! The worker shares nothing with the orchestrator: requests and replies
//! cross an `mpsc` channel as encoded frames. The worker keeps its own part
//! table and scratch buffers between batches.

use crate::protocol::{ProtocolError, WorkerMessage, WorkerReply, decode, encode};
use crate::tick::{TickBuffers, TickError, TickRequest, run_ticks};
use heatnet_core::part::PartTable;
use std::any::Any;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::mpsc::{self, Receiver, Sender, TryRecvError};
use std::thread::{self, JoinHandle};

const THREAD_NAME: &str = "heatnet-worker";

/// Channel-level failures. Computation failures arrive as
/// [`WorkerReply::Failed`] instead.
#[derive(Debug, thiserror::Error)]
pub enum WorkerError {
    #[error("failed to spawn worker thread: {0}")]
    Spawn(#[from] std::io::Error),
    #[error("worker channel disconnected")]
    Disconnected,
    #[error(transparent)]
    Protocol(#[from] ProtocolError),
}

/// Handle to the worker thread. Dropping it closes the channel and joins.
#[derive(Debug)]
pub struct HeatWorker {
    to_worker: Option<Sender<Vec<u8>>>,
    from_worker: Receiver<Vec<u8>>,
    handle: Option<JoinHandle<()>>,
}

impl HeatWorker {
    /// Start the worker thread and hand it the part table.
    pub fn spawn(parts: &PartTable) -> Result<Self, WorkerError> {
        let (to_worker, requests) = mpsc::channel::<Vec<u8>>();
        let (replies, from_worker) = mpsc::channel::<Vec<u8>>();
        let handle = thread::Builder::new()
            .name(THREAD_NAME.to_string())
            .spawn(move || worker_loop(requests, replies))?;
        let worker = Self {
            to_worker: Some(to_worker),
            from_worker,
            handle: Some(handle),
        };
        worker.send(&WorkerMessage::Parts(parts.clone()))?;
        tracing::debug!(thread = THREAD_NAME, "worker started");
        Ok(worker)
    }

    fn send(&self, message: &WorkerMessage) -> Result<(), WorkerError> {
        let frame = encode(message)?;
        self.to_worker
            .as_ref()
            .ok_or(WorkerError::Disconnected)?
            .send(frame)
            .map_err(|_| WorkerError::Disconnected)
    }

    pub fn submit(&self, request: TickRequest) -> Result<(), WorkerError> {
        self.send(&WorkerMessage::Tick(request))
    }

    pub fn set_parts(&self, parts: &PartTable) -> Result<(), WorkerError> {
        self.send(&WorkerMessage::Parts(parts.clone()))
    }

    /// Non-blocking receive.
    pub fn try_recv(&self) -> Result<Option<WorkerReply>, WorkerError> {
        match self.from_worker.try_recv() {
            Ok(frame) => Ok(Some(decode(&frame)?)),
            Err(TryRecvError::Empty) => Ok(None),
            Err(TryRecvError::Disconnected) => Err(WorkerError::Disconnected),
        }
    }

    /// Block until a reply arrives.
    pub fn recv(&self) -> Result<WorkerReply, WorkerError> {
        let frame = self
            .from_worker
            .recv()
            .map_err(|_| WorkerError::Disconnected)?;
        Ok(decode(&frame)?)
    }
}

impl Drop for HeatWorker {
    fn drop(&mut self) {
        // Closing the request channel ends the worker loop.
        self.to_worker.take();
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                tracing::warn!(thread = THREAD_NAME, "worker thread panicked during shutdown");
            }
        }
    }
}

fn worker_loop(requests: Receiver<Vec<u8>>, replies: Sender<Vec<u8>>) {
    let mut parts = PartTable::default();
    let mut buffers = TickBuffers::default();

    for frame in requests {
        let reply = match decode::<WorkerMessage>(&frame) {
            Ok(WorkerMessage::Parts(table)) => {
                parts = table;
                continue;
            }
            Ok(WorkerMessage::Tick(request)) => {
                let id = request.id;
                let outcome = catch_unwind(AssertUnwindSafe(|| run_ticks(request, &parts, &mut buffers)));
                match outcome {
                    Ok(Ok(result)) => WorkerReply::Done(result),
                    Ok(Err(error)) => WorkerReply::Failed { id: Some(id), error },
                    Err(payload) => {
                        // Scratch state may be half-written.
                        buffers = TickBuffers::default();
                        WorkerReply::Failed {
                            id: Some(id),
                            error: TickError::Panicked(panic_message(payload.as_ref())),
                        }
                    }
                }
            }
            Err(e) => WorkerReply::Failed {
                id: None,
                error: TickError::Protocol(e.to_string()),
            },
        };
        let frame = match encode(&reply) {
            Ok(frame) => frame,
            Err(e) => {
                tracing::warn!(error = %e, "worker could not encode reply");
                continue;
            }
        };
        if replies.send(frame).is_err() {
            break;
        }
    }
    tracing::debug!(thread = THREAD_NAME, "worker stopped");
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reactor::ReactorState;
    use heatnet_core::id::RequestId;
    use heatnet_core::network::NetworkLimits;
    use heatnet_core::test_utils::*;

    fn request(id: u64) -> TickRequest {
        let parts = standard_parts();
        let layout = layout_from_map(&parts, &["CFC"]);
        TickRequest {
            id: RequestId(id),
            heat: heat_buffer(layout.dims),
            layout,
            reactor: ReactorState::default(),
            multiplier: 1.0,
            tick_count: 1,
            auto_sell: false,
            record_transfers: false,
            limits: NetworkLimits::default(),
        }
    }

    #[test]
    fn worker_matches_inline() {
        let parts = standard_parts();
        let worker = HeatWorker::spawn(&parts).unwrap();
        worker.submit(request(7)).unwrap();
        let WorkerReply::Done(remote) = worker.recv().unwrap() else {
            panic!("worker failed");
        };
        let local = run_ticks(request(7), &parts, &mut TickBuffers::default()).unwrap();
        assert_eq!(remote, local);
    }

    #[test]
    fn computation_error_keeps_the_id() {
        let worker = HeatWorker::spawn(&standard_parts()).unwrap();
        let mut bad = request(9);
        bad.heat.clear();
        worker.submit(bad).unwrap();
        match worker.recv().unwrap() {
            WorkerReply::Failed { id, error } => {
                assert_eq!(id, Some(RequestId(9)));
                assert!(matches!(error, TickError::BufferTooSmall { .. }));
            }
            other => panic!("expected failure, got {other:?}"),
        }
    }

    #[test]
    fn empty_channel_is_not_an_error() {
        let worker = HeatWorker::spawn(&standard_parts()).unwrap();
        assert!(worker.try_recv().unwrap().is_none());
    }

    #[test]
    fn panic_messages_are_extracted() {
        let boxed: Box<dyn Any + Send> = Box::new("boom");
        assert_eq!(panic_message(boxed.as_ref()), "boom");
        let boxed: Box<dyn Any + Send> = Box::new(String::from("bang"));
        assert_eq!(panic_message(boxed.as_ref()), "bang");
    }
}
