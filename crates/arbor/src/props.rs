//! Recipes for building actors.
//!
//! [`Props`] wraps a factory closure for one actor type. The runtime calls it when
//! the actor is first created and again for every supervised restart, so the
//! closure must be able to produce a fresh instance each time.

use crate::actor::Actor;
use crate::actor_ref::ActorRef;
use crate::engine;
use crate::error::ActorError;
use crate::mailbox::Inbox;
use crate::supervision::{SupervisionStrategy, Supervisor};
use crate::system::SystemShared;
use std::fmt;
use std::sync::Arc;
use tokio::task::JoinHandle;

/// Everything a new incarnation needs besides the actor value itself.
pub(crate) struct Launch {
    pub(crate) myself: ActorRef,
    pub(crate) parent: Option<ActorRef>,
    pub(crate) system: Arc<SystemShared>,
    pub(crate) inbox: Inbox,
}

type Spawner = Box<dyn FnOnce(Launch, Arc<dyn Supervisor>) -> JoinHandle<Option<Inbox>> + Send>;
type Factory = dyn Fn() -> Result<Spawner, ActorError> + Send + Sync;

#[derive(Clone)]
pub struct Props {
    factory: Arc<Factory>,
    supervisor: Option<Arc<dyn Supervisor>>,
    type_name: &'static str,
}

impl Props {
    /// Props for an actor built by an infallible closure.
    pub fn new<A, F>(factory: F) -> Self
    where
        A: Actor,
        F: Fn() -> A + Send + Sync + 'static,
    {
        Self::try_new(move || Ok(factory()))
    }

    /// Props for an actor whose construction can fail. A failure on first creation
    /// is reported to the creator; a failure on restart stops the actor.
    pub fn try_new<A, F>(factory: F) -> Self
    where
        A: Actor,
        F: Fn() -> Result<A, ActorError> + Send + Sync + 'static,
    {
        let factory = move || -> Result<Spawner, ActorError> {
            let actor = factory()?;
            Ok(Box::new(move |launch: Launch, supervisor: Arc<dyn Supervisor>| {
                engine::spawn(actor, launch, supervisor)
            }))
        };
        Props {
            factory: Arc::new(factory),
            supervisor: None,
            type_name: std::any::type_name::<A>(),
        }
    }

    /// How this actor supervises its own children. Defaults to
    /// [`SupervisionStrategy::default`].
    pub fn with_supervisor(mut self, supervisor: impl Supervisor) -> Self {
        self.supervisor = Some(Arc::new(supervisor));
        self
    }

    pub fn with_strategy(self, strategy: SupervisionStrategy) -> Self {
        self.with_supervisor(strategy)
    }

    pub fn type_name(&self) -> &'static str {
        self.type_name
    }

    /// Builds an instance and starts its engine. On failure the inbox is handed
    /// back so the caller can dispose of the queued messages.
    pub(crate) fn launch(&self, launch: Launch) -> Result<(), (ActorError, Inbox)> {
        match (self.factory)() {
            Ok(spawner) => {
                let myself = launch.myself.clone();
                let supervisor = self
                    .supervisor
                    .clone()
                    .unwrap_or_else(|| Arc::new(SupervisionStrategy::default()));
                let handle = spawner(launch, supervisor);
                if let Some(cell) = myself.local() {
                    cell.store_handle(handle);
                }
                Ok(())
            }
            Err(e) => Err((e, launch.inbox)),
        }
    }
}

impl fmt::Debug for Props {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Props")
            .field("type_name", &self.type_name)
            .field("custom_supervisor", &self.supervisor.is_some())
            .finish()
    }
}
