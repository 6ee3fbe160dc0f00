// FIFO job queue in front of a blocking bus device
//
// Every transfer becomes a job. A single worker task pops jobs in order and
// runs them on the blocking pool, so the device only ever sees one transfer
// at a time and in submission order.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, PoisonError};

use async_trait::async_trait;
use tokio::sync::{Notify, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, trace};

use super::{BusDevice, BusError, Result, Transport};

#[derive(Debug)]
enum Op {
    Write { address: u8, frame: Vec<u8> },
    Read { address: u8, len: usize },
    WriteRead { address: u8, frame: Vec<u8>, len: usize },
}

impl Op {
    fn execute<D: BusDevice>(&self, device: &mut D) -> Result<Vec<u8>> {
        match self {
            Op::Write { address, frame } => {
                device.write(*address, frame).map(|_| Vec::new())
            }
            Op::Read { address, len } => device.read(*address, *len),
            Op::WriteRead { address, frame, len } => {
                device.write(*address, frame)?;
                device.read(*address, *len)
            }
        }
    }
}

struct Job {
    op: Op,
    reply: oneshot::Sender<Result<Vec<u8>>>,
}

#[derive(Default)]
struct Shared {
    pending: Mutex<VecDeque<Job>>,
    wake: Notify,
}

impl Shared {
    fn queue(&self) -> std::sync::MutexGuard<'_, VecDeque<Job>> {
        self.pending.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Transport that serializes all transfers through one worker
pub struct QueuedBus {
    shared: Arc<Shared>,
    worker: JoinHandle<()>,
}

impl QueuedBus {
    /// Start the worker for `device`. Must be called inside a tokio runtime.
    pub fn spawn<D: BusDevice>(device: D) -> Self {
        let shared = Arc::new(Shared::default());
        let worker = tokio::spawn(run_worker(shared.clone(), device));
        Self { shared, worker }
    }

    /// Number of jobs waiting to be issued
    pub fn pending(&self) -> usize {
        self.shared.queue().len()
    }

    fn submit(&self, op: Op) -> oneshot::Receiver<Result<Vec<u8>>> {
        let (reply, rx) = oneshot::channel();
        trace!("Queueing {:?}", op);
        self.shared.queue().push_back(Job { op, reply });
        self.shared.wake.notify_one();
        rx
    }

    async fn complete(rx: oneshot::Receiver<Result<Vec<u8>>>) -> Result<Vec<u8>> {
        rx.await.map_err(|_| BusError::Cancelled)?
    }
}

impl Drop for QueuedBus {
    fn drop(&mut self) {
        self.worker.abort();
    }
}

#[async_trait]
impl Transport for QueuedBus {
    async fn write(&self, address: u8, frame: &[u8]) -> Result<()> {
        let rx = self.submit(Op::Write {
            address,
            frame: frame.to_vec(),
        });
        Self::complete(rx).await.map(|_| ())
    }

    async fn read(&self, address: u8, len: usize) -> Result<Vec<u8>> {
        let rx = self.submit(Op::Read { address, len });
        Self::complete(rx).await
    }

    async fn write_read(&self, address: u8, frame: &[u8], len: usize) -> Result<Vec<u8>> {
        let rx = self.submit(Op::WriteRead {
            address,
            frame: frame.to_vec(),
            len,
        });
        Self::complete(rx).await
    }

    fn clear_queue(&self) -> usize {
        let dropped: Vec<Job> = self.shared.queue().drain(..).collect();
        if !dropped.is_empty() {
            debug!("Cleared {} queued bus operations", dropped.len());
        }
        // Dropping the jobs drops their reply senders, which cancels the callers
        dropped.len()
    }
}

async fn run_worker<D: BusDevice>(shared: Arc<Shared>, device: D) {
    let device = Arc::new(Mutex::new(device));

    loop {
        let job = loop {
            if let Some(job) = shared.queue().pop_front() {
                break job;
            }
            shared.wake.notified().await;
        };

        let Job { op, reply } = job;
        let device = device.clone();
        let result = tokio::task::spawn_blocking(move || {
            let mut device = device.lock().unwrap_or_else(PoisonError::into_inner);
            op.execute(&mut *device)
        })
        .await
        .unwrap_or_else(|e| Err(BusError::Worker(e.to_string())));

        // Caller may have given up waiting; the transfer has still happened.
        // The next job is taken right away, so a `clear_queue` issued in reaction
        // to this reply can no longer cancel it.
        let _ = reply.send(result);
    }
}
