//! Simulator lifecycle events and the two listener channels.
//!
//! Listeners come in two classes:
//! - **thread listeners**, closures invoked synchronously on the worker task
//!   that runs the interpreter loop;
//! - **deferred listeners**, which receive events over channels and are meant
//!   to be drained from a UI or driver task.
//!
//! Step events on the deferred side are coalesced: they travel over a bounded
//! single-slot channel and a new step event is only enqueued if the previous
//! one has been taken, so a fast simulation cannot build an unbounded backlog
//! of refresh requests. Lifecycle events (start, pause, finish) are never
//! dropped.

use crossbeam_channel as cbc;

use super::{FinishReason, PauseReason};

/// An event emitted by the simulator's interpreter loop.
#[derive(Debug, Clone)]
pub enum SimulatorEvent {
    /// A run has started at the given PC.
    Started {
        /// The PC at the start of the run.
        pc: u32,
    },
    /// The run has paused and can be resumed.
    Paused {
        /// The PC of the next instruction to execute.
        pc: u32,
        /// Why the run paused.
        reason: PauseReason,
    },
    /// The run has terminated.
    Finished {
        /// The PC when the run finished.
        pc: u32,
        /// Why the run finished.
        reason: FinishReason,
    },
    /// One instruction has executed. Not delivered at unlimited run speed.
    Stepped,
}

/// A synchronous listener run on the simulator's worker task.
pub type ThreadListener = Box<dyn FnMut(&SimulatorEvent) + Send>;

/// The pair of receivers handed to a deferred subscriber.
#[derive(Debug)]
pub struct DeferredReceiver {
    /// Start, pause, and finish events, never dropped.
    pub lifecycle: cbc::Receiver<SimulatorEvent>,
    /// Coalesced step events; at most one pending at a time.
    pub steps: cbc::Receiver<SimulatorEvent>,
}

/// Dispatches simulator events to both listener classes.
pub struct EventBus {
    thread_listeners: Vec<ThreadListener>,
    lifecycle_senders: Vec<cbc::Sender<SimulatorEvent>>,
    step_senders: Vec<cbc::Sender<SimulatorEvent>>,
}

impl std::fmt::Debug for EventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventBus")
            .field("thread_listeners", &self.thread_listeners.len())
            .field("deferred", &self.lifecycle_senders.len())
            .finish()
    }
}

impl EventBus {
    /// Creates a bus with no listeners.
    pub fn new() -> Self {
        Self {
            thread_listeners: Vec::new(),
            lifecycle_senders: Vec::new(),
            step_senders: Vec::new(),
        }
    }

    /// Registers a listener invoked synchronously from the worker.
    pub fn add_thread_listener(&mut self, listener: impl FnMut(&SimulatorEvent) + Send + 'static) {
        self.thread_listeners.push(Box::new(listener));
    }

    /// Creates a deferred subscription. The returned receivers can be drained
    /// from any task.
    pub fn subscribe_deferred(&mut self) -> DeferredReceiver {
        let (lifecycle_tx, lifecycle_rx) = cbc::unbounded();
        // Single slot: an undelivered step event swallows newer ones.
        let (step_tx, step_rx) = cbc::bounded(1);
        self.lifecycle_senders.push(lifecycle_tx);
        self.step_senders.push(step_tx);
        DeferredReceiver { lifecycle: lifecycle_rx, steps: step_rx }
    }

    /// Dispatches an event to every listener.
    pub fn dispatch(&mut self, event: SimulatorEvent) {
        for listener in &mut self.thread_listeners {
            listener(&event);
        }
        match &event {
            SimulatorEvent::Stepped => {
                for sender in &self.step_senders {
                    // Full means the subscriber has not consumed the last
                    // step; drop this one rather than queue it.
                    let _ = sender.try_send(event.clone());
                }
            }
            _ => {
                for sender in &self.lifecycle_senders {
                    let _ = sender.send(event.clone());
                }
            }
        }
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[test]
    fn test_thread_listeners_see_every_event() {
        let count = Arc::new(AtomicUsize::new(0));
        let seen = Arc::clone(&count);

        let mut bus = EventBus::new();
        bus.add_thread_listener(move |_| {
            seen.fetch_add(1, Ordering::Relaxed);
        });
        for _ in 0..5 {
            bus.dispatch(SimulatorEvent::Stepped);
        }
        assert_eq!(count.load(Ordering::Relaxed), 5);
    }

    #[test]
    fn test_step_events_are_coalesced() {
        let mut bus = EventBus::new();
        let receiver = bus.subscribe_deferred();
        for _ in 0..10 {
            bus.dispatch(SimulatorEvent::Stepped);
        }
        // Only the first undelivered step event is retained.
        assert_eq!(receiver.steps.try_iter().count(), 1);
    }

    #[test]
    fn test_lifecycle_events_are_not_dropped() {
        let mut bus = EventBus::new();
        let receiver = bus.subscribe_deferred();
        bus.dispatch(SimulatorEvent::Started { pc: 0x0040_0000 });
        bus.dispatch(SimulatorEvent::Finished {
            pc: 0x0040_0008,
            reason: FinishReason::Exit(0),
        });
        assert_eq!(receiver.lifecycle.try_iter().count(), 2);
    }
}
