//! # Arbor
//!
//! Hierarchical, supervised, location-transparent actors on Tokio.
//!
//! Every actor lives at a path in a tree (`/user/orders/worker-1/`), owns a FIFO
//! mailbox, and runs on its own task. Parents supervise their children: when a
//! child's behavior returns an error, the parent's [`SupervisionStrategy`]
//! decides whether to resume it, restart it behind the same [`ActorRef`], or
//! stop it, for that child alone or for all of its siblings.
//!
//! ## Core Abstractions
//!
//! - [`Actor`]: your state plus a `receive` function and optional lifecycle hooks.
//! - [`Props`]: a factory for an actor type, used again on every restart.
//! - [`ActorRef`]: the handle you `tell` messages to, local or remote alike.
//! - [`Context`]: the actor's view of the runtime (children, sender, timers,
//!   behavior switching, stashing, snapshots).
//! - [`ActorSystem`]: the tree, its caches, and the remote transport.
//!
//! ## Quick Start
//!
//! ```rust
//! use arbor::{async_trait, Actor, ActorError, ActorSystem, Context, Payload, Props, SystemConfig, TestProbe};
//! use std::time::Duration;
//!
//! #[derive(Debug)]
//! struct Greet(String);
//!
//! struct Greeter;
//!
//! #[async_trait]
//! impl Actor for Greeter {
//!     async fn receive(&mut self, msg: Payload, ctx: &mut Context<Self>) -> Result<(), ActorError> {
//!         if let Some(Greet(name)) = msg.downcast_ref::<Greet>() {
//!             ctx.reply(format!("hello, {name}"));
//!         }
//!         Ok(())
//!     }
//! }
//!
//! # #[tokio::main] async fn main() -> Result<(), arbor::RuntimeError> {
//! let system = ActorSystem::start(SystemConfig::new("quickstart")).await?;
//! let greeter = system.actor_of(Props::new(|| Greeter), "greeter").await?;
//! let mut probe = TestProbe::new(&system, "probe").await?;
//!
//! greeter.tell(Greet("ada".into()), Some(probe.actor_ref()));
//! let answer = probe.expect::<String>(Duration::from_secs(1)).await;
//! assert_eq!(answer.as_deref(), Some("hello, ada"));
//!
//! system.stop().await;
//! # Ok(())
//! # }
//! ```
//!
//! ## Remoting
//!
//! Give the system a port and its actors become reachable as
//! `arbor://host:port/system-name/user/...`. Resolving such a path from another
//! system yields a remote [`ActorRef`]; messages sent through it are encoded by
//! the system's [`WireCodec`] (by default a [`JsonCodec`] with registered types)
//! and delivered in order per destination path.
//!
//! ## Observability
//!
//! Everything is reported through `tracing`; see [`logging`].

pub mod actor;
pub mod actor_ref;
pub mod config;
pub mod context;
mod engine;
pub mod error;
pub mod logging;
mod mailbox;
pub mod message;
mod path;
pub mod persistence;
pub mod probe;
pub mod props;
pub mod remote;
mod resolver;
pub mod supervision;
pub mod system;
mod system_actors;
pub mod timer;

pub use async_trait::async_trait;

pub use actor::{Actor, Behavior};
pub use actor_ref::ActorRef;
pub use config::SystemConfig;
pub use context::Context;
pub use error::{ActorError, CodecError, RuntimeError, TransportError};
pub use logging::setup_tracing;
pub use message::{
    Broadcast, ChildFailed, Children, DeadLetter, DeleteChild, GetChildren, Message, Payload,
    PoisonPill, Publish, SnapshotDeleted, SnapshotFailed, SnapshotSaved, Subscribe, Terminated,
    Unsubscribe,
};
pub use path::{RemoteAddress, SCHEME};
pub use persistence::{InMemoryPersistence, PersistenceService};
pub use probe::TestProbe;
pub use props::Props;
pub use remote::{JsonCodec, WireCodec};
pub use supervision::{Directive, Mode, SupervisionStrategy, Supervisor};
pub use system::{ActorSystem, ActorSystemBuilder};
pub use timer::Cancellable;
