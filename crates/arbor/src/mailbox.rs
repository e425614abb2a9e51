//! Mailboxes and the control channel.
//!
//! Each actor has two inbound queues: the mailbox (user and bookkeeping messages,
//! FIFO) and a control channel that carries interruptions from the parent or an
//! external stopper. The engine polls the control channel first.
//!
//! A mailbox can be marked dead exactly once. After that, enqueueing hands the
//! envelope back so the caller can route it to dead letters.

use crate::actor_ref::ActorRef;
use crate::message::Envelope;
use crate::supervision::Directive;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;

/// An interruption delivered on the control channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Signal {
    /// The parent's decision after a failure (or fate-sharing with a sibling).
    /// The child's lifecycle tag is set before this is sent.
    Supervise(Directive),
    /// Stop requested by anyone but the parent's own teardown.
    Stop,
    /// The parent is stopping or restarting and takes its children down with it.
    ParentStopping,
}

#[derive(Clone)]
pub(crate) struct MailboxSender {
    tx: mpsc::UnboundedSender<Envelope>,
    dead: Arc<AtomicBool>,
    len: Arc<AtomicUsize>,
}

impl MailboxSender {
    /// Enqueues an envelope, or hands it back if the mailbox is dead.
    pub(crate) fn enqueue(&self, envelope: Envelope) -> Result<(), Envelope> {
        if self.dead.load(Ordering::Acquire) {
            return Err(envelope);
        }
        self.len.fetch_add(1, Ordering::AcqRel);
        self.tx.send(envelope).map_err(|e| {
            self.len.fetch_sub(1, Ordering::AcqRel);
            e.0
        })
    }

    pub(crate) fn is_dead(&self) -> bool {
        self.dead.load(Ordering::Acquire)
    }

    pub(crate) fn len(&self) -> usize {
        self.len.load(Ordering::Acquire)
    }
}

pub(crate) struct Mailbox {
    rx: mpsc::UnboundedReceiver<Envelope>,
    dead: Arc<AtomicBool>,
    len: Arc<AtomicUsize>,
}

impl Mailbox {
    pub(crate) async fn recv(&mut self) -> Option<Envelope> {
        let envelope = self.rx.recv().await;
        if envelope.is_some() {
            self.len.fetch_sub(1, Ordering::AcqRel);
        }
        envelope
    }

    /// Marks the mailbox dead and refuses further sends. Envelopes already queued
    /// can still be drained with [`Mailbox::try_recv`].
    pub(crate) fn close(&mut self) {
        self.dead.store(true, Ordering::Release);
        self.rx.close();
    }

    pub(crate) fn try_recv(&mut self) -> Option<Envelope> {
        let envelope = self.rx.try_recv().ok();
        if envelope.is_some() {
            self.len.fetch_sub(1, Ordering::AcqRel);
        }
        envelope
    }
}

pub(crate) fn mailbox() -> (MailboxSender, Mailbox) {
    let (tx, rx) = mpsc::unbounded_channel();
    let dead = Arc::new(AtomicBool::new(false));
    let len = Arc::new(AtomicUsize::new(0));
    (
        MailboxSender {
            tx,
            dead: dead.clone(),
            len: len.clone(),
        },
        Mailbox { rx, dead, len },
    )
}

/// Everything that outlives one incarnation of an actor: its queues and its
/// watchers. Handed back by the engine on restart so the next instance picks up
/// exactly where the last one left off.
pub(crate) struct Inbox {
    pub(crate) mailbox: Mailbox,
    pub(crate) control: mpsc::UnboundedReceiver<Signal>,
    pub(crate) watchers: HashMap<String, ActorRef>,
}
