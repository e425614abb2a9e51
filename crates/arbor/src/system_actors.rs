//! Actors the system creates for itself.

use crate::actor::Actor;
use crate::actor_ref::ActorRef;
use crate::context::Context;
use crate::error::ActorError;
use crate::message::{DeadLetter, Payload, Publish, Subscribe, Unsubscribe};
use async_trait::async_trait;
use std::any::TypeId;
use std::collections::HashMap;
use tracing::{debug, warn};

/// `/`, `/system` and `/user`. Only supervises; messages are ignored.
pub(crate) struct Guardian;

#[async_trait]
impl Actor for Guardian {
    async fn receive(&mut self, msg: Payload, ctx: &mut Context<Self>) -> Result<(), ActorError> {
        debug!(path = %ctx.myself(), message = msg.type_name(), "Guardian ignores message");
        Ok(())
    }
}

/// Subscribers keyed by message type.
#[derive(Default)]
struct Subscriptions {
    by_type: HashMap<TypeId, Vec<ActorRef>>,
}

impl Subscriptions {
    /// Applies a `Subscribe`/`Unsubscribe` from `sender`. Returns `false` for any
    /// other message.
    fn apply(&mut self, msg: &Payload, sender: Option<&ActorRef>, hub: &ActorRef) -> bool {
        if let Some(subscribe) = msg.downcast_ref::<Subscribe>() {
            match sender {
                Some(sender) => {
                    let list = self.by_type.entry(subscribe.type_id).or_default();
                    if !list.contains(sender) {
                        debug!(path = %hub, subscriber = %sender, topic = subscribe.type_name, "Subscribed");
                        list.push(sender.clone());
                    }
                }
                None => warn!(path = %hub, topic = subscribe.type_name, "Subscribe without sender"),
            }
            return true;
        }
        if let Some(unsubscribe) = msg.downcast_ref::<Unsubscribe>() {
            if let Some(sender) = sender {
                if let Some(list) = self.by_type.get_mut(&unsubscribe.type_id) {
                    list.retain(|s| s != sender);
                }
            }
            return true;
        }
        false
    }

    /// Live subscribers for `topic`; stopped ones are dropped on the way.
    fn live(&mut self, topic: TypeId) -> Vec<ActorRef> {
        match self.by_type.get_mut(&topic) {
            Some(list) => {
                list.retain(|s| !s.is_terminated());
                list.clone()
            }
            None => Vec::new(),
        }
    }
}

/// `/system/deadletters`: logs undeliverable messages and forwards them to
/// subscribers of [`DeadLetter`].
pub(crate) struct DeadLetterActor {
    log: bool,
    subscriptions: Subscriptions,
}

impl DeadLetterActor {
    pub(crate) fn new(log: bool) -> Self {
        DeadLetterActor {
            log,
            subscriptions: Subscriptions::default(),
        }
    }
}

#[async_trait]
impl Actor for DeadLetterActor {
    async fn receive(&mut self, msg: Payload, ctx: &mut Context<Self>) -> Result<(), ActorError> {
        if self.subscriptions.apply(&msg, ctx.sender(), ctx.myself()) {
            return Ok(());
        }
        let Some(letter) = msg.downcast_ref::<DeadLetter>() else {
            debug!(path = %ctx.myself(), message = msg.type_name(), "Not a dead letter");
            return Ok(());
        };

        let subscribers = self.subscriptions.live(TypeId::of::<DeadLetter>());
        if self.log || subscribers.is_empty() {
            warn!(
                path = %letter.path,
                message = letter.message.type_name(),
                sender = ?letter.sender.as_ref().map(ActorRef::path),
                "Dead letter"
            );
        }
        // A dead letter about a dead letter means a subscriber itself is gone.
        if letter.message.is::<DeadLetter>() {
            return Ok(());
        }
        for subscriber in subscribers {
            subscriber.tell_payload(msg.clone(), None);
        }
        Ok(())
    }
}

/// `/system/events`: forwards each [`Publish`] to the subscribers of the
/// published type.
#[derive(Default)]
pub(crate) struct EventsActor {
    subscriptions: Subscriptions,
}

#[async_trait]
impl Actor for EventsActor {
    async fn receive(&mut self, msg: Payload, ctx: &mut Context<Self>) -> Result<(), ActorError> {
        if self.subscriptions.apply(&msg, ctx.sender(), ctx.myself()) {
            return Ok(());
        }
        match msg.downcast_ref::<Publish>() {
            Some(Publish(event)) => {
                let subscribers = self.subscriptions.live(event.type_id());
                debug!(topic = event.type_name(), subscribers = subscribers.len(), "Publish");
                for subscriber in subscribers {
                    subscriber.tell_payload(event.clone(), ctx.sender().cloned());
                }
            }
            None => debug!(path = %ctx.myself(), message = msg.type_name(), "Not an event"),
        }
        Ok(())
    }
}
