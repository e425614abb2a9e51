//! # Messages and Envelopes
//!
//! Actors exchange [`Payload`]s: type-erased, reference-counted values that can be
//! cloned cheaply when a message fans out (broadcast, event subscriptions, dead
//! letters). Any `'static` type that is `Send + Sync + Debug` is a [`Message`].
//!
//! Inside the runtime every payload travels in an [`Envelope`] next to the claimed
//! sender. Envelopes also carry the runtime's own bookkeeping traffic
//! ([`SystemMessage`]), which never reaches user behaviors.
//!
//! A handful of public control payloads are intercepted by the engine before the
//! behavior sees them: [`PoisonPill`], [`DeleteChild`], [`GetChildren`] and
//! [`Broadcast`]. The rest of the types here are notifications the runtime sends
//! *to* actors.

use crate::actor_ref::ActorRef;
use crate::error::{ActorError, RuntimeError};
use crate::props::Props;
use serde::{Deserialize, Serialize};
use std::any::{Any, TypeId};
use std::collections::VecDeque;
use std::fmt;
use std::sync::Arc;
use tokio::sync::oneshot;

/// Anything that can be sent to an actor.
///
/// Implemented automatically for every eligible type.
pub trait Message: Any + Send + Sync + fmt::Debug {
    fn as_any(&self) -> &dyn Any;
    fn type_name(&self) -> &'static str;
}

impl<T: Any + Send + Sync + fmt::Debug> Message for T {
    fn as_any(&self) -> &dyn Any {
        self
    }

    fn type_name(&self) -> &'static str {
        std::any::type_name::<T>()
    }
}

/// A type-erased message.
#[derive(Clone)]
pub struct Payload(Arc<dyn Message>);

impl Payload {
    /// Wraps a message. Wrapping a `Payload` again returns it unchanged.
    pub fn new<M: Message>(message: M) -> Self {
        if let Some(existing) = (&message as &dyn Any).downcast_ref::<Payload>() {
            return existing.clone();
        }
        Payload(Arc::new(message))
    }

    fn inner(&self) -> &dyn Message {
        &*self.0
    }

    pub fn downcast_ref<T: Any>(&self) -> Option<&T> {
        self.inner().as_any().downcast_ref::<T>()
    }

    pub fn is<T: Any>(&self) -> bool {
        self.inner().as_any().is::<T>()
    }

    pub fn type_name(&self) -> &'static str {
        self.inner().type_name()
    }

    pub fn type_id(&self) -> TypeId {
        Any::type_id(self.inner().as_any())
    }
}

impl fmt::Debug for Payload {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self.inner(), f)
    }
}

/// A payload or a runtime message, plus the claimed sender.
pub(crate) struct Envelope {
    pub(crate) letter: Letter,
    pub(crate) sender: Option<ActorRef>,
}

pub(crate) enum Letter {
    User(Payload),
    System(SystemMessage),
}

impl Envelope {
    pub(crate) fn user(payload: Payload, sender: Option<ActorRef>) -> Self {
        Envelope {
            letter: Letter::User(payload),
            sender,
        }
    }

    pub(crate) fn system(message: SystemMessage, sender: Option<ActorRef>) -> Self {
        Envelope {
            letter: Letter::System(message),
            sender,
        }
    }
}

/// Bookkeeping traffic between engines.
pub(crate) enum SystemMessage {
    /// Walk one more segment towards the target, or answer if none remain.
    Resolve {
        remaining: VecDeque<String>,
        reply: oneshot::Sender<Option<ActorRef>>,
    },
    CreateChild {
        props: Props,
        name: Option<String>,
        reply: oneshot::Sender<Result<ActorRef, RuntimeError>>,
    },
    Watch(ActorRef),
    Unwatch(ActorRef),
    ChildStopped(ActorRef),
    /// A child failed. `starting` is set when the failure happened in a start hook,
    /// in which case the child is already on its way out.
    Failed {
        child: ActorRef,
        error: ActorError,
        starting: bool,
    },
    DeadMansHandle(u64),
}

impl fmt::Debug for SystemMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SystemMessage::Resolve { remaining, .. } => {
                f.debug_struct("Resolve").field("remaining", remaining).finish()
            }
            SystemMessage::CreateChild { name, .. } => {
                f.debug_struct("CreateChild").field("name", name).finish()
            }
            SystemMessage::Watch(r) => f.debug_tuple("Watch").field(r).finish(),
            SystemMessage::Unwatch(r) => f.debug_tuple("Unwatch").field(r).finish(),
            SystemMessage::ChildStopped(r) => f.debug_tuple("ChildStopped").field(r).finish(),
            SystemMessage::Failed {
                child,
                error,
                starting,
            } => f
                .debug_struct("Failed")
                .field("child", child)
                .field("error", error)
                .field("starting", starting)
                .finish(),
            SystemMessage::DeadMansHandle(g) => f.debug_tuple("DeadMansHandle").field(g).finish(),
        }
    }
}

/// Stops the receiving actor once it is dequeued, after everything sent before it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PoisonPill;

/// Asks an actor to stop its child `name`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeleteChild {
    pub name: String,
}

/// Asks an actor for its children. The answer is a [`Children`] sent to the sender.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GetChildren;

#[derive(Debug, Clone)]
pub struct Children(pub Vec<ActorRef>);

/// Asks an actor to forward the wrapped payload to each of its children,
/// keeping the original sender.
#[derive(Debug, Clone)]
pub struct Broadcast(pub Payload);

impl Broadcast {
    pub fn new<M: Message>(message: M) -> Self {
        Broadcast(Payload::new(message))
    }
}

/// Sent to every watcher when the watched actor has stopped.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Terminated {
    pub path: String,
    pub name: String,
}

/// Delivered to a parent's behavior after its supervision strategy has handled a
/// child failure.
#[derive(Debug, Clone)]
pub struct ChildFailed {
    pub child: ActorRef,
    pub error: ActorError,
}

/// A message that could not be delivered, as recorded by `/system/deadletters`.
#[derive(Debug, Clone)]
pub struct DeadLetter {
    pub message: Payload,
    pub path: String,
    pub sender: Option<ActorRef>,
}

/// Subscribes the sender to messages of one type on a publish/subscribe actor
/// such as `/system/events` or `/system/deadletters`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Subscribe {
    pub(crate) type_id: TypeId,
    pub(crate) type_name: &'static str,
}

impl Subscribe {
    pub fn to<T: Message>() -> Self {
        Subscribe {
            type_id: TypeId::of::<T>(),
            type_name: std::any::type_name::<T>(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Unsubscribe {
    pub(crate) type_id: TypeId,
}

impl Unsubscribe {
    pub fn from<T: Message>() -> Self {
        Unsubscribe {
            type_id: TypeId::of::<T>(),
        }
    }
}

/// Publishes the wrapped payload to every subscriber of its type.
#[derive(Debug, Clone)]
pub struct Publish(pub Payload);

impl Publish {
    pub fn new<M: Message>(message: M) -> Self {
        Publish(Payload::new(message))
    }
}

/// Snapshot bookkeeping reported back to a persistent actor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SnapshotSaved {
    pub persistence_id: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SnapshotDeleted {
    pub persistence_id: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SnapshotFailed {
    pub persistence_id: String,
    pub reason: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, PartialEq)]
    struct Ping(u32);

    #[test]
    fn payload_downcasts_to_original_type() {
        let payload = Payload::new(Ping(7));
        assert!(payload.is::<Ping>());
        assert_eq!(payload.downcast_ref::<Ping>(), Some(&Ping(7)));
        assert!(payload.downcast_ref::<String>().is_none());
        assert_eq!(payload.type_id(), TypeId::of::<Ping>());
        assert!(payload.type_name().ends_with("Ping"));
    }

    #[test]
    fn wrapping_a_payload_does_not_nest() {
        let payload = Payload::new(Ping(1));
        let again = Payload::new(payload.clone());
        assert!(again.is::<Ping>());
        assert_eq!(format!("{:?}", again), "Ping(1)");
    }
}
