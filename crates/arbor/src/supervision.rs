//! # Supervision
//!
//! A parent decides what happens to a child that failed while running. The
//! decision is a [`SupervisionStrategy`]: a [`Directive`] (what to do) and a
//! [`Mode`] (to whom). With [`Mode::AllForOne`] every current child gets the same
//! treatment as the one that failed.
//!
//! The parent always records its intent in the child's lifecycle tag before it
//! signals the child. Restarts wait for the old incarnation to exit, then start a
//! fresh instance from the child's [`Props`](crate::Props) on the *same*
//! [`ActorRef`], so holders of the reference never notice.

use crate::actor_ref::{ActorRef, Lifecycle};
use crate::engine;
use crate::error::ActorError;
use crate::mailbox::Signal;
use crate::props::Launch;
use crate::system::SystemShared;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{error, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Directive {
    Stop,
    Resume,
    Restart,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Mode {
    OneForOne,
    AllForOne,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SupervisionStrategy {
    pub directive: Directive,
    pub mode: Mode,
}

impl SupervisionStrategy {
    pub const fn new(directive: Directive, mode: Mode) -> Self {
        SupervisionStrategy { directive, mode }
    }

    pub const fn one_for_one(directive: Directive) -> Self {
        Self::new(directive, Mode::OneForOne)
    }

    pub const fn all_for_one(directive: Directive) -> Self {
        Self::new(directive, Mode::AllForOne)
    }
}

/// Stop the failing child only.
impl Default for SupervisionStrategy {
    fn default() -> Self {
        Self::one_for_one(Directive::Stop)
    }
}

/// Chooses a strategy per failure. Implement this to vary the decision by child
/// or by error; a plain [`SupervisionStrategy`] applies the same decision to all.
pub trait Supervisor: Send + Sync + 'static {
    fn decide(&self, child: &ActorRef, cause: &ActorError) -> SupervisionStrategy;
}

impl Supervisor for SupervisionStrategy {
    fn decide(&self, _child: &ActorRef, _cause: &ActorError) -> SupervisionStrategy {
        *self
    }
}

/// Applies the supervisor's decision for a failure of `child`.
///
/// Runs on the parent's task. Returns once resumed children have been signalled,
/// stopped children have been told to stop, and restarted children are running
/// again (or have been declared dead if they could not be rebuilt).
pub(crate) async fn handle_child_failure(
    supervisor: &dyn Supervisor,
    parent: &ActorRef,
    children: &mut HashMap<String, ActorRef>,
    child: &ActorRef,
    cause: &ActorError,
    system: &Arc<SystemShared>,
) {
    let strategy = supervisor.decide(child, cause);
    info!(parent = %parent, child = %child, error = %cause, ?strategy, "Supervising failure");

    let affected: Vec<ActorRef> = match strategy.mode {
        Mode::OneForOne => children
            .values()
            .filter(|c| c.same_actor(child))
            .cloned()
            .collect(),
        Mode::AllForOne => children.values().cloned().collect(),
    };
    if affected.is_empty() {
        warn!(parent = %parent, child = %child, "Failure report from unknown child");
        return;
    }

    let lifecycle = match strategy.directive {
        Directive::Stop => Lifecycle::Stop,
        Directive::Resume => Lifecycle::Resume,
        Directive::Restart => Lifecycle::Restart,
    };

    // Commit intent on every affected child, then interrupt it.
    for target in &affected {
        if let Some(cell) = target.local() {
            if strategy.directive == Directive::Restart {
                cell.set_restart_cause(cause.clone());
            }
            cell.set_lifecycle(lifecycle);
            cell.signal(Signal::Supervise(strategy.directive));
        }
    }

    if strategy.directive == Directive::Restart {
        for target in &affected {
            restart(parent, children, target, system).await;
        }
    }
}

/// Waits for the old incarnation of `child` to exit and starts a new one on the
/// same reference.
async fn restart(
    parent: &ActorRef,
    children: &mut HashMap<String, ActorRef>,
    child: &ActorRef,
    system: &Arc<SystemShared>,
) {
    let Some(cell) = child.local() else {
        return;
    };
    let Some(handle) = cell.take_handle() else {
        warn!(child = %child, "Restart requested but no running incarnation");
        return;
    };

    let inbox = match handle.await {
        Ok(Some(inbox)) => inbox,
        Ok(None) => {
            // Stopped on its own before the restart took effect.
            remove_child(children, child);
            return;
        }
        Err(e) => {
            error!(child = %child, error = %e, "Actor task failed during restart");
            remove_child(children, child);
            return;
        }
    };

    let launch = Launch {
        myself: child.clone(),
        parent: Some(parent.clone()),
        system: system.clone(),
        inbox,
    };
    if let Err((e, inbox)) = cell.props().launch(launch) {
        error!(child = %child, error = %e, "Could not rebuild actor, stopping it");
        remove_child(children, child);
        engine::finalize(child, inbox, system, None);
    } else {
        info!(child = %child, "Restarted");
    }
}

pub(crate) fn remove_child(children: &mut HashMap<String, ActorRef>, child: &ActorRef) {
    if children
        .get(child.name())
        .is_some_and(|existing| existing.same_actor(child))
    {
        children.remove(child.name());
    }
}
