//! # Lifecycle Engine
//!
//! One tokio task per actor incarnation. The task owns the actor value, its
//! [`Context`] and both inbound queues, and runs through three phases:
//!
//! 1. **Start**: recovery for persistent actors, then the restart hook if the
//!    parent tagged this incarnation as a restart, otherwise `pre_start`.
//!    A failure here is reported to the parent and the actor stops without
//!    processing any message.
//! 2. **Running**: a biased `select!` over the control channel and the mailbox.
//!    Bookkeeping messages are handled here; everything else goes to the current
//!    behavior. A behavior error is reported to the parent and the task parks on
//!    the control channel until the parent decides (resume, restart or stop).
//! 3. **Teardown**: children are stopped and awaited first. A stop then runs
//!    `post_stop`, marks the mailbox dead, evicts the path from the resolution
//!    cache, notifies the parent and watchers and drains leftovers to dead letters.
//!    A restart skips all of that and hands the queues back to the parent, which
//!    starts the next incarnation on them.
//!
//! Every hook and behavior call runs under `guarded`: a panic becomes an
//! [`ActorError`] and takes the same path as a returned error.

use crate::actor::Actor;
use crate::actor_ref::{ActorRef, Lifecycle};
use crate::context::{Context, Handler};
use crate::error::{ActorError, RuntimeError};
use crate::mailbox::{Inbox, Mailbox, Signal};
use crate::message::{
    Broadcast, ChildFailed, Children, DeleteChild, Envelope, GetChildren, Letter, Payload,
    PoisonPill, SystemMessage, Terminated,
};
use crate::props::{Launch, Props};
use crate::supervision::{self, Directive, Supervisor};
use crate::system::SystemShared;
use futures::FutureExt;
use std::any::Any;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Allocates a reference and starts the first incarnation on it.
pub(crate) fn spawn_actor(
    path: String,
    parent: Option<ActorRef>,
    system: &Arc<SystemShared>,
    props: Props,
) -> Result<ActorRef, RuntimeError> {
    let (myself, inbox) = ActorRef::new_local(path, Arc::downgrade(system), props.clone());
    let launch = Launch {
        myself: myself.clone(),
        parent,
        system: system.clone(),
        inbox,
    };
    props
        .launch(launch)
        .map_err(|(e, _)| RuntimeError::Instantiation(e.to_string()))?;
    Ok(myself)
}

/// Starts the task for one incarnation of `actor`.
pub(crate) fn spawn<A: Actor>(
    actor: A,
    launch: Launch,
    supervisor: Arc<dyn Supervisor>,
) -> JoinHandle<Option<Inbox>> {
    let Launch {
        myself,
        parent,
        system,
        inbox,
    } = launch;
    let Inbox {
        mailbox,
        control,
        watchers,
    } = inbox;
    let engine = Engine {
        actor,
        ctx: Context::new(myself, parent, system, watchers, supervisor),
        mailbox,
        control,
    };
    tokio::spawn(engine.run())
}

/// Final bookkeeping for a stopped actor: dead mailbox, cache eviction, parent
/// and watcher notifications, leftovers to dead letters.
pub(crate) fn finalize(
    myself: &ActorRef,
    inbox: Inbox,
    system: &Arc<SystemShared>,
    parent: Option<&ActorRef>,
) {
    let Inbox {
        mut mailbox,
        watchers,
        ..
    } = inbox;
    mailbox.close();
    system.resolver.decache(myself.path());

    if let Some(parent) = parent {
        parent.send_system(SystemMessage::ChildStopped(myself.clone()), None);
    }

    let terminated = Terminated {
        path: myself.path().to_string(),
        name: myself.name().to_string(),
    };
    for watcher in watchers.values() {
        watcher.tell(terminated.clone(), Some(myself));
    }

    let mut drained = 0usize;
    while let Some(envelope) = mailbox.try_recv() {
        drained += 1;
        myself.bounce(envelope);
    }
    if let Some(cell) = myself.local() {
        cell.set_lifecycle(Lifecycle::Stop);
        cell.mark_terminated();
    }
    debug!(path = %myself, drained, "Actor stopped");
}

enum Exit {
    Stop { notify_parent: bool },
    Restart,
}

enum Flow {
    Continue,
    Stop,
}

struct Engine<A: Actor> {
    actor: A,
    ctx: Context<A>,
    mailbox: Mailbox,
    control: mpsc::UnboundedReceiver<Signal>,
}

impl<A: Actor> Engine<A> {
    async fn run(mut self) -> Option<Inbox> {
        let mut vigil = Vigil {
            actor: self.ctx.myself.clone(),
            armed: true,
        };

        let exit = match self.start().await {
            Ok(()) => {
                debug!(path = %self.ctx.myself, "Actor started");
                self.receive_loop().await
            }
            Err(e) => {
                warn!(path = %self.ctx.myself, error = %e, "Actor failed to start");
                self.ctx.failed = true;
                match &self.ctx.parent {
                    Some(parent) => parent.send_system(
                        SystemMessage::Failed {
                            child: self.ctx.myself.clone(),
                            error: e,
                            starting: true,
                        },
                        None,
                    ),
                    None => error!(path = %self.ctx.myself, "Root actor failed to start"),
                }
                Exit::Stop {
                    notify_parent: true,
                }
            }
        };

        let inbox = self.teardown(exit).await;
        vigil.armed = false;
        inbox
    }

    async fn start(&mut self) -> Result<(), ActorError> {
        let cell = self.ctx.myself.local();
        let lifecycle = cell.map_or(Lifecycle::Start, |c| c.lifecycle());
        let cause = cell.and_then(|c| c.take_restart_cause());

        self.recover().await?;
        if lifecycle == Lifecycle::Restart {
            let cause = cause.unwrap_or_else(|| ActorError::msg("restart requested"));
            guarded(self.actor.pre_restart(&cause, &mut self.ctx)).await?;
        } else {
            guarded(self.actor.pre_start(&mut self.ctx)).await?;
        }

        if let Some(cell) = self.ctx.myself.local() {
            cell.set_lifecycle(Lifecycle::Running);
        }
        Ok(())
    }

    /// Loads the snapshot of a persistent actor, if it has one.
    async fn recover(&mut self) -> Result<(), ActorError> {
        let Some(id) = self.actor.persistence_id() else {
            return Ok(());
        };
        self.ctx.persistence_id = Some(id.clone());

        match self.ctx.system.persistence.clone() {
            Some(service) => {
                let snapshot = service
                    .read(&id)
                    .await
                    .map_err(|e| ActorError::Persistence(e.to_string()))?;
                if let Some(snapshot) = snapshot {
                    debug!(path = %self.ctx.myself, persistence_id = %id, "Recovering snapshot");
                    guarded(self.actor.recover(snapshot, &mut self.ctx)).await?;
                }
            }
            None => {
                warn!(path = %self.ctx.myself, persistence_id = %id, "No persistence service, starting empty");
            }
        }
        guarded(self.actor.post_recovery(&mut self.ctx)).await
    }

    async fn receive_loop(&mut self) -> Exit {
        loop {
            tokio::select! {
                biased;
                signal = self.control.recv() => match signal {
                    Some(Signal::Supervise(Directive::Resume)) => self.resume().await,
                    Some(Signal::Supervise(Directive::Restart)) => return Exit::Restart,
                    Some(Signal::Supervise(Directive::Stop)) | Some(Signal::Stop) | None => {
                        return Exit::Stop { notify_parent: true };
                    }
                    Some(Signal::ParentStopping) => return Exit::Stop { notify_parent: false },
                },
                envelope = self.mailbox.recv() => {
                    let Some(envelope) = envelope else {
                        return Exit::Stop { notify_parent: true };
                    };
                    match self.dispatch(envelope).await {
                        Ok(Flow::Continue) => {}
                        Ok(Flow::Stop) => return Exit::Stop { notify_parent: true },
                        Err(e) => {
                            if let Some(exit) = self.escalate(e).await {
                                return exit;
                            }
                        }
                    }
                    if self.ctx.stop_requested {
                        return Exit::Stop { notify_parent: true };
                    }
                }
            }
        }
    }

    /// Reports a behavior failure and parks until the parent decides.
    async fn escalate(&mut self, error: ActorError) -> Option<Exit> {
        warn!(path = %self.ctx.myself, error = %error, "Actor failed");
        let Some(parent) = self.ctx.parent.clone() else {
            error!(path = %self.ctx.myself, error = %error, "Root actor failed, stopping");
            self.ctx.failed = true;
            return Some(Exit::Stop {
                notify_parent: false,
            });
        };
        parent.send_system(
            SystemMessage::Failed {
                child: self.ctx.myself.clone(),
                error,
                starting: false,
            },
            None,
        );

        // Only the control channel is polled here: the mailbox stays untouched so a
        // resume continues exactly where processing stopped.
        match self.control.recv().await {
            Some(Signal::Supervise(Directive::Resume)) => {
                self.resume().await;
                None
            }
            Some(Signal::Supervise(Directive::Restart)) => Some(Exit::Restart),
            Some(Signal::ParentStopping) => {
                self.ctx.failed = true;
                Some(Exit::Stop {
                    notify_parent: false,
                })
            }
            Some(Signal::Supervise(Directive::Stop)) | Some(Signal::Stop) | None => {
                self.ctx.failed = true;
                Some(Exit::Stop {
                    notify_parent: true,
                })
            }
        }
    }

    async fn resume(&mut self) {
        if let Some(cell) = self.ctx.myself.local() {
            cell.set_lifecycle(Lifecycle::Running);
        }
        debug!(path = %self.ctx.myself, "Resuming");
        if let Err(e) = guarded(self.actor.on_resume(&mut self.ctx)).await {
            warn!(path = %self.ctx.myself, error = %e, "on_resume failed");
        }
    }

    async fn dispatch(&mut self, envelope: Envelope) -> Result<Flow, ActorError> {
        let Envelope { letter, sender } = envelope;
        match letter {
            Letter::System(message) => self.handle_system(message).await,
            Letter::User(payload) => self.handle_user(payload, sender).await,
        }
    }

    async fn handle_system(&mut self, message: SystemMessage) -> Result<Flow, ActorError> {
        match message {
            SystemMessage::Resolve {
                mut remaining,
                reply,
            } => match remaining.pop_front() {
                None => {
                    let _ = reply.send(Some(self.ctx.myself.clone()));
                }
                Some(name) => match self.ctx.children.get(&name) {
                    Some(child) => {
                        child.send_system(SystemMessage::Resolve { remaining, reply }, None)
                    }
                    None => {
                        let _ = reply.send(None);
                    }
                },
            },
            SystemMessage::CreateChild { props, name, reply } => {
                let _ = reply.send(self.ctx.spawn_child(props, name));
            }
            SystemMessage::Watch(watcher) => {
                self.ctx
                    .watchers
                    .insert(watcher.path().to_string(), watcher);
            }
            SystemMessage::Unwatch(watcher) => {
                self.ctx.watchers.remove(watcher.path());
            }
            SystemMessage::ChildStopped(child) => {
                supervision::remove_child(&mut self.ctx.children, &child);
            }
            SystemMessage::Failed {
                child,
                error,
                starting,
            } => {
                if starting {
                    warn!(parent = %self.ctx.myself, child = %child, error = %error, "Child failed to start");
                } else {
                    supervision::handle_child_failure(
                        &*self.ctx.supervisor,
                        &self.ctx.myself,
                        &mut self.ctx.children,
                        &child,
                        &error,
                        &self.ctx.system,
                    )
                    .await;
                }
                return self
                    .deliver(Payload::new(ChildFailed { child, error }), None)
                    .await;
            }
            SystemMessage::DeadMansHandle(generation) => {
                if self.ctx.dead_mans_handle_expired(generation) {
                    info!(path = %self.ctx.myself, "Dead man's handle expired");
                    if let Err(e) = guarded(self.actor.dying(&mut self.ctx)).await {
                        warn!(path = %self.ctx.myself, error = %e, "dying hook failed");
                    }
                    return Ok(Flow::Stop);
                }
            }
        }
        Ok(Flow::Continue)
    }

    async fn handle_user(
        &mut self,
        payload: Payload,
        sender: Option<ActorRef>,
    ) -> Result<Flow, ActorError> {
        if payload.is::<PoisonPill>() {
            return Ok(Flow::Stop);
        }
        if let Some(DeleteChild { name }) = payload.downcast_ref::<DeleteChild>() {
            if let Some(child) = self.ctx.children.get(name) {
                child.stop();
            }
            return Ok(Flow::Continue);
        }
        if payload.is::<GetChildren>() {
            match &sender {
                Some(sender) => {
                    sender.tell(Children(self.ctx.children()), Some(&self.ctx.myself));
                }
                None => debug!(path = %self.ctx.myself, "GetChildren without sender"),
            }
            return Ok(Flow::Continue);
        }
        if let Some(Broadcast(inner)) = payload.downcast_ref::<Broadcast>() {
            for child in self.ctx.children.values() {
                child.tell_payload(inner.clone(), sender.clone());
            }
            return Ok(Flow::Continue);
        }
        self.deliver(payload, sender).await
    }

    /// Hands a payload to the current behavior.
    async fn deliver(
        &mut self,
        payload: Payload,
        sender: Option<ActorRef>,
    ) -> Result<Flow, ActorError> {
        debug!(path = %self.ctx.myself, message = payload.type_name(), "Dispatch");
        self.ctx.sender = sender;
        let result = match self.ctx.handler.clone() {
            Handler::Receive => guarded(self.actor.receive(payload, &mut self.ctx)).await,
            Handler::Custom(behavior) => {
                guarded(behavior.receive(&mut self.actor, payload, &mut self.ctx)).await
            }
        };
        self.ctx.sender = None;
        result.map(|()| Flow::Continue)
    }

    async fn teardown(mut self, exit: Exit) -> Option<Inbox> {
        let myself = self.ctx.myself.clone();

        // Children go first, so nothing below us is still running when we clean up.
        let children: Vec<ActorRef> = self.ctx.children.drain().map(|(_, c)| c).collect();
        for child in &children {
            child.signal(Signal::ParentStopping);
        }
        for child in &children {
            let _ = child.terminated().await;
        }
        self.ctx.cancel_dead_mans_handle();

        match exit {
            Exit::Restart => {
                debug!(path = %myself, "Handing over to the next incarnation");
                Some(Inbox {
                    mailbox: self.mailbox,
                    control: self.control,
                    watchers: std::mem::take(&mut self.ctx.watchers),
                })
            }
            Exit::Stop { notify_parent } => {
                if let Err(e) = guarded(self.actor.post_stop(&mut self.ctx)).await {
                    error!(path = %myself, error = %e, "post_stop failed");
                }
                let inbox = Inbox {
                    mailbox: self.mailbox,
                    control: self.control,
                    watchers: std::mem::take(&mut self.ctx.watchers),
                };
                let parent = if notify_parent {
                    self.ctx.parent.as_ref()
                } else {
                    None
                };
                finalize(&myself, inbox, &self.ctx.system, parent);
                None
            }
        }
    }
}

/// Runs a hook or behavior call, turning a panic into an [`ActorError`].
async fn guarded<F>(hook: F) -> Result<(), ActorError>
where
    F: Future<Output = Result<(), ActorError>>,
{
    match AssertUnwindSafe(hook).catch_unwind().await {
        Ok(result) => result,
        Err(panic) => Err(ActorError::msg(panic_message(&*panic))),
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        format!("panicked: {message}")
    } else if let Some(message) = panic.downcast_ref::<String>() {
        format!("panicked: {message}")
    } else {
        "panicked".to_string()
    }
}

/// Marks the actor terminated if its task unwinds before teardown finished.
struct Vigil {
    actor: ActorRef,
    armed: bool,
}

impl Drop for Vigil {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        if std::thread::panicking() {
            error!(path = %self.actor, "Actor panicked");
        }
        if let Some(system) = self.actor.system() {
            system.resolver.decache(self.actor.path());
        }
        if let Some(cell) = self.actor.local() {
            cell.mark_terminated();
        }
    }
}
