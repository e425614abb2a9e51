//! # Actor Context
//!
//! Every hook and behavior receives a `&mut Context<A>`. It is the actor's view of
//! the runtime: its own reference, its parent and children, the sender of the
//! message being processed, and the operations that change how the actor runs
//! (behavior switching, stashing, timers, stopping).
//!
//! The context is owned by the actor's engine and is never shared, so none of
//! these operations need locking.

use crate::actor::{Actor, Behavior};
use crate::actor_ref::ActorRef;
use crate::engine;
use crate::error::{ActorError, RuntimeError};
use crate::message::{
    DeadLetter, Message, Payload, SnapshotDeleted, SnapshotFailed, SnapshotSaved, SystemMessage,
};
use crate::path;
use crate::props::Props;
use crate::supervision::Supervisor;
use crate::system::{ActorSystem, SystemShared};
use crate::timer::{self, Cancellable};
use serde::Serialize;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// The handler currently processing user messages.
pub(crate) enum Handler<A: Actor> {
    Receive,
    Custom(Arc<dyn Behavior<A>>),
}

impl<A: Actor> Clone for Handler<A> {
    fn clone(&self) -> Self {
        match self {
            Handler::Receive => Handler::Receive,
            Handler::Custom(b) => Handler::Custom(b.clone()),
        }
    }
}

pub struct Context<A: Actor> {
    pub(crate) myself: ActorRef,
    pub(crate) parent: Option<ActorRef>,
    pub(crate) system: Arc<SystemShared>,
    pub(crate) children: HashMap<String, ActorRef>,
    pub(crate) watchers: HashMap<String, ActorRef>,
    pub(crate) sender: Option<ActorRef>,
    pub(crate) supervisor: Arc<dyn Supervisor>,
    pub(crate) handler: Handler<A>,
    pub(crate) failed: bool,
    pub(crate) stop_requested: bool,
    pub(crate) persistence_id: Option<String>,
    behaviors: Vec<Handler<A>>,
    stash: VecDeque<(Payload, Option<ActorRef>)>,
    dead_mans_handle: Option<Cancellable>,
    dead_mans_generation: u64,
}

impl<A: Actor> Context<A> {
    pub(crate) fn new(
        myself: ActorRef,
        parent: Option<ActorRef>,
        system: Arc<SystemShared>,
        watchers: HashMap<String, ActorRef>,
        supervisor: Arc<dyn Supervisor>,
    ) -> Self {
        Context {
            myself,
            parent,
            system,
            children: HashMap::new(),
            watchers,
            sender: None,
            supervisor,
            handler: Handler::Receive,
            failed: false,
            stop_requested: false,
            persistence_id: None,
            behaviors: Vec::new(),
            stash: VecDeque::new(),
            dead_mans_handle: None,
            dead_mans_generation: 0,
        }
    }

    pub fn myself(&self) -> &ActorRef {
        &self.myself
    }

    pub fn parent(&self) -> Option<&ActorRef> {
        self.parent.as_ref()
    }

    /// Sender of the message currently being processed, if it claimed one.
    pub fn sender(&self) -> Option<&ActorRef> {
        self.sender.as_ref()
    }

    pub fn system(&self) -> ActorSystem {
        ActorSystem::from_shared(self.system.clone())
    }

    // ---- children ------------------------------------------------------------

    /// Creates a child. The returned reference accepts messages immediately.
    ///
    /// If a child called `name` already exists it is returned instead.
    pub fn actor_of(&mut self, props: Props, name: &str) -> Result<ActorRef, RuntimeError> {
        self.spawn_child(props, Some(name.to_string()))
    }

    /// Creates a child with a generated name.
    pub fn actor_of_anonymous(&mut self, props: Props) -> Result<ActorRef, RuntimeError> {
        self.spawn_child(props, None)
    }

    /// Creates a child from props registered with
    /// [`ActorSystem::register_props`](crate::ActorSystem::register_props).
    pub fn actor_of_registered(
        &mut self,
        type_name: &str,
        name: &str,
    ) -> Result<ActorRef, RuntimeError> {
        let props = self.system.resolver.registered_props(type_name).ok_or_else(|| {
            RuntimeError::Instantiation(format!("no props registered for {type_name}"))
        })?;
        self.spawn_child(props, Some(name.to_string()))
    }

    pub(crate) fn spawn_child(
        &mut self,
        props: Props,
        name: Option<String>,
    ) -> Result<ActorRef, RuntimeError> {
        let name = name.unwrap_or_else(|| self.system.anonymous_name());
        if !path::is_valid_name(&name) {
            return Err(RuntimeError::InvalidPath(name));
        }
        if let Some(existing) = self.children.get(&name) {
            if !existing.is_terminated() {
                warn!(parent = %self.myself, child = %name, "Child name collision");
                return Ok(existing.clone());
            }
        }
        let child = engine::spawn_actor(
            path::child_path(self.myself.path(), &name),
            Some(self.myself.clone()),
            &self.system,
            props,
        )?;
        debug!(parent = %self.myself, child = %child, "Child created");
        self.children.insert(name, child.clone());
        Ok(child)
    }

    pub fn children(&self) -> Vec<ActorRef> {
        self.children.values().cloned().collect()
    }

    pub fn child(&self, name: &str) -> Option<ActorRef> {
        self.children.get(name).cloned()
    }

    // ---- addressing ----------------------------------------------------------

    /// Resolves a path relative to this actor (`./x`, `../x`, `x`), absolute
    /// (`/user/x`) or remote.
    ///
    /// Never fails: an unknown path yields a dead-letter reference. Paths at or
    /// below this actor are answered from the local child table, so resolving them
    /// never waits on this actor's own mailbox.
    pub async fn resolve(&self, target: &str) -> ActorRef {
        let absolute = match path::absolutize(self.myself.path(), target) {
            Ok(p) => p,
            Err(e) => {
                warn!(path = %self.myself, target, error = %e, "Unresolvable path");
                return ActorRef::new_dead_letter(target.to_string(), Arc::downgrade(&self.system));
            }
        };

        if !path::is_remote(&absolute) {
            if absolute == self.myself.path() {
                return self.myself.clone();
            }
            if let Some(rest) = absolute.strip_prefix(self.myself.path()) {
                let mut remaining: VecDeque<String> = path::segments(rest).into();
                let child = remaining
                    .pop_front()
                    .and_then(|first| self.children.get(&first).cloned());
                return match child {
                    Some(child) if remaining.is_empty() => child,
                    Some(child) => {
                        self.system
                            .resolver
                            .resolve_from(&self.system, child, remaining, &absolute)
                            .await
                    }
                    None => ActorRef::new_dead_letter(absolute, Arc::downgrade(&self.system)),
                };
            }
        }
        self.system.resolve(&absolute).await
    }

    // ---- messaging -----------------------------------------------------------

    pub fn tell_self<M: Message>(&self, message: M) -> bool {
        self.myself.tell(message, Some(&self.myself))
    }

    /// Answers the sender of the current message. Without a sender the reply is a
    /// dead letter.
    pub fn reply<M: Message>(&self, message: M) -> bool {
        match &self.sender {
            Some(sender) => sender.tell(message, Some(&self.myself)),
            None => {
                self.system.dead_letter(DeadLetter {
                    message: Payload::new(message),
                    path: String::new(),
                    sender: Some(self.myself.clone()),
                });
                false
            }
        }
    }

    /// Sends `message` to this actor after `delay`.
    pub fn schedule_in<M: Message>(&self, message: M, delay: Duration) -> Cancellable {
        self.schedule_to(&self.myself, message, delay)
    }

    pub fn schedule_to<M: Message>(
        &self,
        target: &ActorRef,
        message: M,
        delay: Duration,
    ) -> Cancellable {
        timer::schedule(
            target.clone(),
            Payload::new(message),
            Some(self.myself.clone()),
            delay,
        )
    }

    /// Number of envelopes waiting in this actor's mailbox.
    pub fn mailbox_size(&self) -> usize {
        self.myself.local().map_or(0, |cell| cell.mailbox().len())
    }

    pub async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }

    // ---- watching ------------------------------------------------------------

    /// Asks `target` to send this actor a [`Terminated`](crate::Terminated) when it
    /// stops. Watching an actor that already stopped answers right away.
    pub fn watch(&self, target: &ActorRef) {
        if target.is_remote() {
            warn!(path = %self.myself, target = %target, "Remote actors cannot be watched");
            return;
        }
        target.send_system(SystemMessage::Watch(self.myself.clone()), None);
    }

    pub fn unwatch(&self, target: &ActorRef) {
        if target.is_local() {
            target.send_system(SystemMessage::Unwatch(self.myself.clone()), None);
        }
    }

    // ---- stopping ------------------------------------------------------------

    pub fn stop(&self, target: &ActorRef) {
        target.stop();
    }

    /// Stops this actor once the current message has been handled.
    pub fn stop_self(&mut self) {
        self.stop_requested = true;
    }

    /// During `post_stop`: whether the actor is stopping because it failed.
    pub fn failed(&self) -> bool {
        self.failed
    }

    /// Whether the system is going down with the intent of coming back, in which
    /// case persistent actors should keep their snapshots.
    pub fn in_shutdown(&self) -> bool {
        self.system.in_shutdown.load(Ordering::Acquire)
    }

    pub fn set_supervisor(&mut self, supervisor: impl Supervisor) {
        self.supervisor = Arc::new(supervisor);
    }

    // ---- behaviors -----------------------------------------------------------

    /// Replaces the current behavior.
    pub fn become_behavior(&mut self, behavior: impl Behavior<A>) {
        self.handler = Handler::Custom(Arc::new(behavior));
    }

    /// Pushes the current behavior and switches to `behavior`.
    pub fn stash_become(&mut self, behavior: impl Behavior<A>) {
        let previous = std::mem::replace(&mut self.handler, Handler::Custom(Arc::new(behavior)));
        self.behaviors.push(previous);
    }

    /// Returns to the most recently pushed behavior.
    pub fn unbecome(&mut self) -> Result<(), ActorError> {
        let previous = self.behaviors.pop().ok_or(ActorError::EmptyBehaviorStack)?;
        self.handler = previous;
        Ok(())
    }

    /// Back to [`Actor::receive`], keeping the behavior stack.
    pub fn become_receive(&mut self) {
        self.handler = Handler::Receive;
    }

    // ---- stash ---------------------------------------------------------------

    /// Defers a message (with its sender) until [`unstash_all`](Self::unstash_all).
    pub fn stash(&mut self, message: Payload) {
        self.stash.push_back((message, self.sender.clone()));
    }

    /// Re-enqueues stashed messages, in order, at the end of the mailbox.
    pub fn unstash_all(&mut self) {
        for (message, sender) in self.stash.drain(..) {
            self.myself.tell_payload(message, sender);
        }
    }

    pub fn stash_size(&self) -> usize {
        self.stash.len()
    }

    // ---- dead-man's handle ---------------------------------------------------

    /// Stops this actor after `delay` unless re-armed or cancelled first. The
    /// [`Actor::dying`] hook runs before the stop.
    pub fn die_in(&mut self, delay: Duration) {
        if let Some(previous) = self.dead_mans_handle.take() {
            previous.cancel();
        }
        self.dead_mans_generation += 1;
        self.dead_mans_handle = Some(timer::arm_dead_mans_handle(
            self.myself.clone(),
            self.dead_mans_generation,
            delay,
        ));
    }

    pub fn cancel_dead_mans_handle(&mut self) {
        if let Some(handle) = self.dead_mans_handle.take() {
            handle.cancel();
        }
        self.dead_mans_generation += 1;
    }

    /// Whether an expiry for `generation` should still stop the actor. Consumes
    /// the armed handle if so.
    pub(crate) fn dead_mans_handle_expired(&mut self, generation: u64) -> bool {
        if self.dead_mans_handle.is_some() && generation == self.dead_mans_generation {
            self.dead_mans_handle = None;
            true
        } else {
            false
        }
    }

    // ---- persistence ---------------------------------------------------------

    /// Stores `state` as this actor's snapshot. The outcome arrives later as a
    /// [`SnapshotSaved`] or [`SnapshotFailed`] message.
    pub fn save_snapshot<T: Serialize>(&self, state: &T) {
        let Some(id) = self.persistence_id.clone() else {
            warn!(path = %self.myself, "save_snapshot on an actor without persistence id");
            return;
        };
        let myself = self.myself.clone();
        let value = match serde_json::to_value(state) {
            Ok(value) => value,
            Err(e) => {
                myself.tell(
                    SnapshotFailed {
                        persistence_id: id,
                        reason: e.to_string(),
                    },
                    None,
                );
                return;
            }
        };
        let service = self.system.persistence.clone();
        tokio::spawn(async move {
            let result = match service {
                Some(service) => service.write(&id, value).await.map_err(|e| e.to_string()),
                None => Err("no persistence service configured".to_string()),
            };
            match result {
                Ok(()) => myself.tell(SnapshotSaved { persistence_id: id }, None),
                Err(reason) => myself.tell(
                    SnapshotFailed {
                        persistence_id: id,
                        reason,
                    },
                    None,
                ),
            };
        });
    }

    /// Removes this actor's snapshot, reporting [`SnapshotDeleted`] or
    /// [`SnapshotFailed`].
    pub fn delete_snapshot(&self) {
        let Some(id) = self.persistence_id.clone() else {
            warn!(path = %self.myself, "delete_snapshot on an actor without persistence id");
            return;
        };
        let myself = self.myself.clone();
        let service = self.system.persistence.clone();
        tokio::spawn(async move {
            let result = match service {
                Some(service) => service.delete(&id).await.map_err(|e| e.to_string()),
                None => Err("no persistence service configured".to_string()),
            };
            match result {
                Ok(()) => myself.tell(SnapshotDeleted { persistence_id: id }, None),
                Err(reason) => myself.tell(
                    SnapshotFailed {
                        persistence_id: id,
                        reason,
                    },
                    None,
                ),
            };
        });
    }
}
