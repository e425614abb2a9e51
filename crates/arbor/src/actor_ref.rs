//! # Actor References
//!
//! An [`ActorRef`] is the only way to reach an actor. It is cheap to clone and
//! location transparent: the same `tell` works for
//!
//! - **local** actors (enqueue into the mailbox),
//! - **remote** actors (encode and hand the frame to the connection pool), and
//! - **dead-letter** references, returned when a path could not be resolved. Every
//!   message sent through one ends up at `/system/deadletters`.
//!
//! A local reference survives restarts of its actor: the parent rebinds a new
//! incarnation to the same mailbox, so nobody needs to resolve the path again.

use crate::error::{ActorError, RuntimeError};
use crate::mailbox::{Inbox, MailboxSender, Signal};
use crate::message::{
    DeadLetter, Envelope, Letter, Message, Payload, PoisonPill, SystemMessage, Terminated,
};
use crate::path::{self, RemoteAddress};
use crate::props::Props;
use crate::system::SystemShared;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, Mutex, PoisonError, Weak};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// Lifecycle intent of a local actor, set by whoever starts or interrupts it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub(crate) enum Lifecycle {
    Start = 0,
    Running = 1,
    Restart = 2,
    Resume = 3,
    Stop = 4,
}

impl Lifecycle {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => Lifecycle::Start,
            1 => Lifecycle::Running,
            2 => Lifecycle::Restart,
            3 => Lifecycle::Resume,
            _ => Lifecycle::Stop,
        }
    }
}

/// The local half of a reference: queues, handle of the current incarnation and
/// what is needed to build the next one.
pub(crate) struct LocalCell {
    mailbox: MailboxSender,
    control: mpsc::UnboundedSender<Signal>,
    lifecycle: AtomicU8,
    restart_cause: Mutex<Option<ActorError>>,
    handle: Mutex<Option<JoinHandle<Option<Inbox>>>>,
    props: Props,
    terminated: watch::Sender<bool>,
}

impl LocalCell {
    pub(crate) fn mailbox(&self) -> &MailboxSender {
        &self.mailbox
    }

    pub(crate) fn props(&self) -> &Props {
        &self.props
    }

    pub(crate) fn lifecycle(&self) -> Lifecycle {
        Lifecycle::from_u8(self.lifecycle.load(Ordering::Acquire))
    }

    pub(crate) fn set_lifecycle(&self, lifecycle: Lifecycle) {
        self.lifecycle.store(lifecycle as u8, Ordering::Release);
    }

    pub(crate) fn set_restart_cause(&self, cause: ActorError) {
        *self
            .restart_cause
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(cause);
    }

    pub(crate) fn take_restart_cause(&self) -> Option<ActorError> {
        self.restart_cause
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
    }

    pub(crate) fn store_handle(&self, handle: JoinHandle<Option<Inbox>>) {
        *self.handle.lock().unwrap_or_else(PoisonError::into_inner) = Some(handle);
    }

    pub(crate) fn take_handle(&self) -> Option<JoinHandle<Option<Inbox>>> {
        self.handle
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
    }

    pub(crate) fn signal(&self, signal: Signal) -> bool {
        self.control.send(signal).is_ok()
    }

    pub(crate) fn mark_terminated(&self) {
        self.terminated.send_replace(true);
    }

    fn is_terminated(&self) -> bool {
        *self.terminated.borrow()
    }
}

enum RefKind {
    Local(LocalCell),
    Remote(RemoteAddress),
    DeadLetter,
}

struct RefInner {
    path: String,
    name: String,
    system: Weak<SystemShared>,
    kind: RefKind,
}

/// Handle to an actor, local or remote.
#[derive(Clone)]
pub struct ActorRef(Arc<RefInner>);

impl ActorRef {
    /// Creates a local reference and the queues its engine will consume.
    pub(crate) fn new_local(
        path: String,
        system: Weak<SystemShared>,
        props: Props,
    ) -> (ActorRef, Inbox) {
        let (mailbox, receiver) = crate::mailbox::mailbox();
        let (control, control_rx) = mpsc::unbounded_channel();
        let (terminated, _) = watch::channel(false);
        let cell = LocalCell {
            mailbox,
            control,
            lifecycle: AtomicU8::new(Lifecycle::Start as u8),
            restart_cause: Mutex::new(None),
            handle: Mutex::new(None),
            props,
            terminated,
        };
        let actor = ActorRef(Arc::new(RefInner {
            name: path::name_of(&path),
            path,
            system,
            kind: RefKind::Local(cell),
        }));
        let inbox = Inbox {
            mailbox: receiver,
            control: control_rx,
            watchers: Default::default(),
        };
        (actor, inbox)
    }

    pub(crate) fn new_remote(address: RemoteAddress, system: Weak<SystemShared>) -> ActorRef {
        ActorRef(Arc::new(RefInner {
            path: address.to_path(),
            name: path::name_of(&address.path),
            system,
            kind: RefKind::Remote(address),
        }))
    }

    /// A reference that forwards everything to dead letters.
    pub(crate) fn new_dead_letter(path: String, system: Weak<SystemShared>) -> ActorRef {
        ActorRef(Arc::new(RefInner {
            name: path::name_of(&path),
            path,
            system,
            kind: RefKind::DeadLetter,
        }))
    }

    pub fn path(&self) -> &str {
        &self.0.path
    }

    pub fn name(&self) -> &str {
        &self.0.name
    }

    pub fn is_local(&self) -> bool {
        matches!(self.0.kind, RefKind::Local(_))
    }

    pub fn is_remote(&self) -> bool {
        matches!(self.0.kind, RefKind::Remote(_))
    }

    /// True for references produced by a failed resolution.
    pub fn is_dead_letter(&self) -> bool {
        matches!(self.0.kind, RefKind::DeadLetter)
    }

    /// True once a local actor has fully stopped. Always false for remote references.
    pub fn is_terminated(&self) -> bool {
        match &self.0.kind {
            RefKind::Local(cell) => cell.is_terminated(),
            RefKind::Remote(_) => false,
            RefKind::DeadLetter => true,
        }
    }

    /// Same underlying actor object, not merely the same path.
    pub fn same_actor(&self, other: &ActorRef) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }

    pub(crate) fn local(&self) -> Option<&LocalCell> {
        match &self.0.kind {
            RefKind::Local(cell) => Some(cell),
            _ => None,
        }
    }

    pub(crate) fn system(&self) -> Option<Arc<SystemShared>> {
        self.0.system.upgrade()
    }

    /// Sends a message without waiting.
    ///
    /// Returns whether the message was accepted for delivery: enqueued locally, or
    /// encoded and queued for a remote connection. `false` means it went to dead
    /// letters (or was dropped during system shutdown).
    pub fn tell<M: Message>(&self, message: M, sender: Option<&ActorRef>) -> bool {
        self.tell_payload(Payload::new(message), sender.cloned())
    }

    pub(crate) fn tell_payload(&self, payload: Payload, sender: Option<ActorRef>) -> bool {
        match &self.0.kind {
            RefKind::Local(cell) => match cell.mailbox.enqueue(Envelope::user(payload, sender)) {
                Ok(()) => true,
                Err(envelope) => {
                    self.bounce(envelope);
                    false
                }
            },
            RefKind::Remote(address) => {
                let Some(system) = self.system() else {
                    return false;
                };
                match system.post_remote(address, &self.0.path, &payload, sender.as_ref()) {
                    Ok(()) => true,
                    Err(e) => {
                        warn!(path = %self, error = %e, "Remote send failed");
                        false
                    }
                }
            }
            RefKind::DeadLetter => {
                self.bounce(Envelope::user(payload, sender));
                false
            }
        }
    }

    /// Like [`tell`](Self::tell), but waits for a remote write to complete and
    /// reports transport failures.
    pub async fn send<M: Message>(
        &self,
        message: M,
        sender: Option<&ActorRef>,
    ) -> Result<(), RuntimeError> {
        let payload = Payload::new(message);
        match &self.0.kind {
            RefKind::Remote(address) => {
                let system = self.system().ok_or(RuntimeError::SystemStopped)?;
                system
                    .send_remote(address, &self.0.path, &payload, sender)
                    .await
            }
            _ => {
                if self.tell_payload(payload, sender.cloned()) {
                    Ok(())
                } else {
                    Err(RuntimeError::Undeliverable(self.0.path.clone()))
                }
            }
        }
    }

    /// Asks the actor to stop. Local actors are interrupted right away; remote ones
    /// receive a [`PoisonPill`].
    pub fn stop(&self) {
        match &self.0.kind {
            RefKind::Local(cell) => {
                cell.signal(Signal::Stop);
            }
            RefKind::Remote(_) => {
                self.tell(PoisonPill, None);
            }
            RefKind::DeadLetter => {}
        }
    }

    /// Resolves once the actor has stopped for good.
    pub async fn terminated(&self) -> Result<(), RuntimeError> {
        match &self.0.kind {
            RefKind::Local(cell) => {
                let mut rx = cell.terminated.subscribe();
                // The sender lives in this cell, so the wait cannot fail while we hold it.
                let _ = rx.wait_for(|done| *done).await;
                Ok(())
            }
            RefKind::Remote(_) => Err(RuntimeError::Remote(self.0.path.clone())),
            RefKind::DeadLetter => Ok(()),
        }
    }

    pub(crate) fn send_system(&self, message: SystemMessage, sender: Option<ActorRef>) {
        let envelope = Envelope::system(message, sender);
        let refused = match &self.0.kind {
            RefKind::Local(cell) => cell.mailbox.enqueue(envelope).err(),
            _ => Some(envelope),
        };
        if let Some(envelope) = refused {
            self.bounce(envelope);
        }
    }

    /// Handles an envelope this reference could not deliver.
    pub(crate) fn bounce(&self, envelope: Envelope) {
        match envelope.letter {
            Letter::User(message) => {
                if let Some(system) = self.system() {
                    system.dead_letter(DeadLetter {
                        message,
                        path: self.0.path.clone(),
                        sender: envelope.sender,
                    });
                }
            }
            Letter::System(SystemMessage::Resolve { reply, .. }) => {
                let _ = reply.send(None);
            }
            Letter::System(SystemMessage::CreateChild { reply, .. }) => {
                let _ = reply.send(Err(RuntimeError::Undeliverable(self.0.path.clone())));
            }
            Letter::System(SystemMessage::Watch(watcher)) => {
                watcher.tell(
                    Terminated {
                        path: self.0.path.clone(),
                        name: self.0.name.clone(),
                    },
                    Some(self),
                );
            }
            Letter::System(other) => {
                debug!(path = %self, message = ?other, "Dropping system message");
            }
        }
    }

    pub(crate) fn signal(&self, signal: Signal) -> bool {
        self.local().is_some_and(|cell| cell.signal(signal))
    }
}

impl PartialEq for ActorRef {
    fn eq(&self, other: &Self) -> bool {
        self.0.path == other.0.path
    }
}

impl Eq for ActorRef {}

impl Hash for ActorRef {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.0.path.hash(state);
    }
}

impl fmt::Display for ActorRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0.path)
    }
}

impl fmt::Debug for ActorRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let kind = match self.0.kind {
            RefKind::Local(_) => "local",
            RefKind::Remote(_) => "remote",
            RefKind::DeadLetter => "dead-letter",
        };
        write!(f, "ActorRef({}, {})", self.0.path, kind)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dead_letter_reference_reports_itself() {
        let actor = ActorRef::new_dead_letter("/user/ghost/".to_string(), Weak::new());
        assert!(actor.is_dead_letter());
        assert!(actor.is_terminated());
        assert_eq!(actor.name(), "ghost");
        // No system behind it: the message is dropped and the send reports failure.
        assert!(!actor.tell("boo", None));
    }

    #[test]
    fn remote_reference_keeps_full_path() {
        let address = RemoteAddress::parse("arbor://10.0.0.5:9000/edge/user/cache/").unwrap();
        let actor = ActorRef::new_remote(address, Weak::new());
        assert!(actor.is_remote());
        assert_eq!(actor.path(), "arbor://10.0.0.5:9000/edge/user/cache/");
        assert_eq!(actor.name(), "cache");
        assert_eq!(format!("{:?}", actor), "ActorRef(arbor://10.0.0.5:9000/edge/user/cache/, remote)");
    }
}
