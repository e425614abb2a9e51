//! Delayed delivery.
//!
//! Timers are plain tokio tasks that sleep and then `tell`. They never touch a
//! mailbox until they fire, and cancelling one that already fired is a no-op.

use crate::actor_ref::ActorRef;
use crate::message::{Payload, SystemMessage};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::AbortHandle;

/// Handle to a pending delayed send.
#[derive(Debug, Clone)]
pub struct Cancellable {
    cancelled: Arc<AtomicBool>,
    task: AbortHandle,
}

impl Cancellable {
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Release);
        self.task.abort();
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }
}

/// Sends `payload` to `target` after `delay`, unless cancelled first.
pub(crate) fn schedule(
    target: ActorRef,
    payload: Payload,
    sender: Option<ActorRef>,
    delay: Duration,
) -> Cancellable {
    let cancelled = Arc::new(AtomicBool::new(false));
    let flag = cancelled.clone();
    let task = tokio::spawn(async move {
        tokio::time::sleep(delay).await;
        if !flag.load(Ordering::Acquire) {
            target.tell_payload(payload, sender);
        }
    });
    Cancellable {
        cancelled,
        task: task.abort_handle(),
    }
}

/// Arms a dead-man's handle: after `delay` the actor receives the expiry for
/// `generation`, which it ignores if the handle was re-armed or cancelled since.
pub(crate) fn arm_dead_mans_handle(target: ActorRef, generation: u64, delay: Duration) -> Cancellable {
    let cancelled = Arc::new(AtomicBool::new(false));
    let flag = cancelled.clone();
    let task = tokio::spawn(async move {
        tokio::time::sleep(delay).await;
        if !flag.load(Ordering::Acquire) {
            target.send_system(SystemMessage::DeadMansHandle(generation), None);
        }
    });
    Cancellable {
        cancelled,
        task: task.abort_handle(),
    }
}
