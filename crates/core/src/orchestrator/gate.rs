//! FIFO admission gate bounding concurrently running operations
//!
//! A finished operation hands its slot directly to the oldest queued one, so
//! admission order is submission order and the running count never exceeds
//! the cap, even briefly.

use std::collections::VecDeque;
use std::sync::Arc;

use parking_lot::Mutex;
use tether_domain::{OperationId, Result, TetherError};
use tokio::sync::oneshot;

struct GateState {
    running: usize,
    queue: VecDeque<(OperationId, oneshot::Sender<()>)>,
    accepting: bool,
}

impl GateState {
    /// Pass a freed slot to the oldest queued operation still waiting
    fn hand_over(&mut self) {
        while let Some((_, tx)) = self.queue.pop_front() {
            if tx.send(()).is_ok() {
                return;
            }
        }
        self.running = self.running.saturating_sub(1);
    }
}

pub(crate) struct AdmissionGate {
    capacity: usize,
    state: Mutex<GateState>,
}

/// A held run slot; dropping it admits the next queued operation
pub(crate) struct RunPermit {
    gate: Arc<AdmissionGate>,
}

impl Drop for RunPermit {
    fn drop(&mut self) {
        self.gate.state.lock().hand_over();
    }
}

/// Queue position; leaves the queue (or passes on a slot that arrived too
/// late) when dropped unsettled
struct QueueTicket {
    gate: Arc<AdmissionGate>,
    id: OperationId,
    rx: oneshot::Receiver<()>,
    settled: bool,
}

impl Drop for QueueTicket {
    fn drop(&mut self) {
        if self.settled {
            return;
        }
        let mut state = self.gate.state.lock();
        state.queue.retain(|(id, _)| *id != self.id);
        self.rx.close();
        if self.rx.try_recv().is_ok() {
            state.hand_over();
        }
    }
}

/// Result of [`AdmissionGate::enter`]
pub(crate) enum Admission {
    Immediate(RunPermit),
    Queued(QueuedAdmission),
}

pub(crate) struct QueuedAdmission {
    ticket: QueueTicket,
}

impl QueuedAdmission {
    pub(crate) async fn wait(mut self) -> Result<RunPermit> {
        let received = (&mut self.ticket.rx).await;
        self.ticket.settled = true;
        match received {
            Ok(()) => Ok(RunPermit { gate: Arc::clone(&self.ticket.gate) }),
            Err(_) => Err(TetherError::ShuttingDown(
                "orchestrator stopped before the operation was admitted".to_string(),
            )),
        }
    }
}

impl AdmissionGate {
    pub(crate) fn new(capacity: usize) -> Arc<Self> {
        Arc::new(Self {
            capacity,
            state: Mutex::new(GateState { running: 0, queue: VecDeque::new(), accepting: true }),
        })
    }

    /// Take a slot if one is free, otherwise join the back of the queue
    pub(crate) fn enter(self: &Arc<Self>, id: OperationId) -> Result<Admission> {
        let mut state = self.state.lock();
        if !state.accepting {
            return Err(TetherError::ShuttingDown(
                "orchestrator is not accepting operations".to_string(),
            ));
        }
        if state.running < self.capacity {
            state.running += 1;
            return Ok(Admission::Immediate(RunPermit { gate: Arc::clone(self) }));
        }
        let (tx, rx) = oneshot::channel();
        state.queue.push_back((id, tx));
        Ok(Admission::Queued(QueuedAdmission {
            ticket: QueueTicket { gate: Arc::clone(self), id, rx, settled: false },
        }))
    }

    pub(crate) fn running(&self) -> usize {
        self.state.lock().running
    }

    pub(crate) fn queue_depth(&self) -> usize {
        self.state.lock().queue.len()
    }

    pub(crate) fn is_accepting(&self) -> bool {
        self.state.lock().accepting
    }

    /// Refuse new operations from now on
    pub(crate) fn close(&self) {
        self.state.lock().accepting = false;
    }

    /// Reject everything still queued. Returns how many were dropped.
    pub(crate) fn drain_queue(&self) -> usize {
        let mut state = self.state.lock();
        let drained = state.queue.len();
        // Dropping the senders wakes each waiter with an error.
        state.queue.clear();
        drained
    }
}
