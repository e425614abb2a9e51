//! # Actor System
//!
//! An [`ActorSystem`] owns one actor tree and the services every actor in it
//! shares: the resolver and its caches, the dead-letter and event hubs, the
//! optional persistence service, and the remote transport.
//!
//! ```text
//! /                      root guardian (Restart, OneForOne)
//! ├── system/            system guardian (Restart, OneForOne)
//! │   ├── deadletters/   dead-letter hub
//! │   └── events/        event stream
//! └── user/              user guardian (config.root_strategy)
//!     └── ...            application actors
//! ```
//!
//! Several systems can live in one process; nothing here is global.
//!
//! ```rust,no_run
//! use arbor::{ActorSystem, SystemConfig};
//!
//! # async fn run() -> Result<(), arbor::RuntimeError> {
//! let system = ActorSystem::start(SystemConfig::new("shop").with_port(0)).await?;
//! println!("listening at {:?}", system.address());
//! system.shutdown().await;
//! # Ok(())
//! # }
//! ```

use crate::actor_ref::ActorRef;
use crate::config::SystemConfig;
use crate::engine;
use crate::error::{RuntimeError, TransportError};
use crate::message::{DeadLetter, Envelope, Message, Payload, Publish, SystemMessage};
use crate::path::{self, RemoteAddress};
use crate::persistence::PersistenceService;
use crate::props::Props;
use crate::remote::codec::encode_frame;
use crate::remote::listener::Listener;
use crate::remote::pool::{ConnectionManager, PoolSettings};
use crate::remote::{JsonCodec, WireCodec};
use crate::resolver::Resolver;
use crate::supervision::{Directive, SupervisionStrategy};
use crate::system_actors::{DeadLetterActor, EventsActor, Guardian};
use bytes::Bytes;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, OnceLock};
use tokio::sync::{oneshot, Mutex};
use tracing::{debug, info, warn};

/// State shared by every actor of one system.
pub(crate) struct SystemShared {
    pub(crate) config: SystemConfig,
    pub(crate) resolver: Resolver,
    pub(crate) root: OnceLock<ActorRef>,
    pub(crate) user: OnceLock<ActorRef>,
    pub(crate) dead_letters: OnceLock<ActorRef>,
    pub(crate) events: OnceLock<ActorRef>,
    pub(crate) stopping: AtomicBool,
    pub(crate) in_shutdown: AtomicBool,
    pub(crate) persistence: Option<Arc<dyn PersistenceService>>,
    pub(crate) codec: Arc<dyn WireCodec>,
    pub(crate) connections: ConnectionManager,
    address: OnceLock<RemoteAddress>,
    listener: Mutex<Option<Listener>>,
    next_id: AtomicU64,
}

impl SystemShared {
    /// Routes an undeliverable message to the dead-letter hub. Dropped once the
    /// system is stopping.
    pub(crate) fn dead_letter(&self, letter: DeadLetter) {
        if self.stopping.load(Ordering::Acquire) {
            return;
        }
        let Some(hub) = self.dead_letters.get() else {
            warn!(path = %letter.path, message = letter.message.type_name(), "Dead letter");
            return;
        };
        // Straight into the hub's queue: a dead hub must not bounce back here.
        let accepted = hub
            .local()
            .is_some_and(|cell| cell.mailbox().enqueue(Envelope::user(Payload::new(letter), None)).is_ok());
        if !accepted {
            debug!("Dead-letter hub is gone, dropping dead letter");
        }
    }

    pub(crate) fn anonymous_name(&self) -> String {
        format!("$a{}", self.next_id.fetch_add(1, Ordering::Relaxed))
    }

    pub(crate) async fn resolve(self: &Arc<Self>, target: &str) -> ActorRef {
        self.resolver.resolve(self, target).await
    }

    /// Whether `address` names this system.
    pub(crate) fn is_local_address(&self, address: &RemoteAddress) -> bool {
        match self.address.get() {
            Some(local) => {
                local.system == address.system
                    && local.port == address.port
                    && local.host == address.host
            }
            None => false,
        }
    }

    /// The fully qualified form of `actor`, for use as a sender on the wire.
    pub(crate) fn remotify(&self, actor: &ActorRef) -> Option<String> {
        if actor.is_remote() {
            return Some(actor.path().to_string());
        }
        if actor.is_dead_letter() {
            return None;
        }
        let local = self.address.get()?;
        Some(
            RemoteAddress {
                host: local.host.clone(),
                port: local.port,
                system: local.system.clone(),
                path: actor.path().to_string(),
            }
            .to_path(),
        )
    }

    fn frame(
        &self,
        target_path: &str,
        payload: &Payload,
        sender: Option<&ActorRef>,
    ) -> Result<Bytes, TransportError> {
        if self.stopping.load(Ordering::Acquire) {
            return Err(TransportError::PoolClosed);
        }
        let bytes = self.codec.encode(payload)?;
        let sender = sender.and_then(|s| self.remotify(s));
        encode_frame(
            target_path,
            sender.as_deref(),
            &bytes,
            self.config.max_frame_size,
        )
    }

    /// Encodes and queues a frame; the write happens in the background.
    pub(crate) fn post_remote(
        &self,
        address: &RemoteAddress,
        target_path: &str,
        payload: &Payload,
        sender: Option<&ActorRef>,
    ) -> Result<(), TransportError> {
        let frame = self.frame(target_path, payload, sender)?;
        self.connections
            .post(&address.host_key(), target_path, frame);
        Ok(())
    }

    pub(crate) async fn send_remote(
        &self,
        address: &RemoteAddress,
        target_path: &str,
        payload: &Payload,
        sender: Option<&ActorRef>,
    ) -> Result<(), RuntimeError> {
        let frame = self.frame(target_path, payload, sender)?;
        self.connections
            .send(&address.host_key(), target_path, frame)
            .await?;
        Ok(())
    }
}

/// Asks `parent` to create a child and waits for the answer.
async fn create_child(
    parent: &ActorRef,
    props: Props,
    name: Option<String>,
) -> Result<ActorRef, RuntimeError> {
    let (reply, answer) = oneshot::channel();
    parent.send_system(SystemMessage::CreateChild { props, name, reply }, None);
    answer.await.map_err(|_| RuntimeError::SystemStopped)?
}

/// Configures and starts an [`ActorSystem`].
pub struct ActorSystemBuilder {
    config: SystemConfig,
    codec: Option<Arc<dyn WireCodec>>,
    persistence: Option<Arc<dyn PersistenceService>>,
}

impl ActorSystemBuilder {
    /// Payload codec for remote messages. Defaults to an empty [`JsonCodec`].
    pub fn codec(mut self, codec: impl WireCodec) -> Self {
        self.codec = Some(Arc::new(codec));
        self
    }

    pub fn persistence(mut self, service: Arc<dyn PersistenceService>) -> Self {
        self.persistence = Some(service);
        self
    }

    pub async fn start(self) -> Result<ActorSystem, RuntimeError> {
        let ActorSystemBuilder {
            config,
            codec,
            persistence,
        } = self;

        let settings = PoolSettings {
            size: config.pool_size.max(1),
            connect_retries: config.connect_retries,
            idle_timeout: config.idle_timeout,
            idle_check_interval: config.idle_check_interval,
        };
        let shared = Arc::new(SystemShared {
            resolver: Resolver::new(
                config.resolution_cache_capacity,
                config.constructor_cache_capacity,
                config.resolve_timeout,
            ),
            root: OnceLock::new(),
            user: OnceLock::new(),
            dead_letters: OnceLock::new(),
            events: OnceLock::new(),
            stopping: AtomicBool::new(false),
            in_shutdown: AtomicBool::new(false),
            persistence,
            codec: codec.unwrap_or_else(|| Arc::new(JsonCodec::new())),
            connections: ConnectionManager::new(settings),
            address: OnceLock::new(),
            listener: Mutex::new(None),
            next_id: AtomicU64::new(0),
            config,
        });

        let restart = SupervisionStrategy::one_for_one(Directive::Restart);
        let root = engine::spawn_actor(
            "/".to_string(),
            None,
            &shared,
            Props::new(|| Guardian).with_strategy(restart),
        )?;
        let _ = shared.root.set(root.clone());

        let system_guardian = create_child(
            &root,
            Props::new(|| Guardian).with_strategy(restart),
            Some("system".to_string()),
        )
        .await?;
        let user = create_child(
            &root,
            Props::new(|| Guardian).with_strategy(shared.config.root_strategy),
            Some("user".to_string()),
        )
        .await?;
        let log_dead_letters = shared.config.log_dead_letters;
        let dead_letters = create_child(
            &system_guardian,
            Props::new(move || DeadLetterActor::new(log_dead_letters)),
            Some("deadletters".to_string()),
        )
        .await?;
        let events = create_child(
            &system_guardian,
            Props::new(EventsActor::default),
            Some("events".to_string()),
        )
        .await?;

        for actor in [&system_guardian, &user, &dead_letters, &events] {
            shared.resolver.cache(actor);
        }
        let _ = shared.user.set(user);
        let _ = shared.dead_letters.set(dead_letters);
        let _ = shared.events.set(events);

        if let Some(port) = shared.config.port {
            let listener = Listener::bind(&shared, &shared.config.host, port).await?;
            let _ = shared.address.set(RemoteAddress {
                host: shared.config.host.clone(),
                port: listener.local_addr().port(),
                system: shared.config.name.clone(),
                path: "/".to_string(),
            });
            *shared.listener.lock().await = Some(listener);
        }

        info!(
            system = %shared.config.name,
            address = ?shared.address.get().map(RemoteAddress::to_path),
            "Actor system started"
        );
        Ok(ActorSystem { shared })
    }
}

/// Handle to a running actor system. Cheap to clone.
#[derive(Clone)]
pub struct ActorSystem {
    shared: Arc<SystemShared>,
}

impl ActorSystem {
    pub fn builder(config: SystemConfig) -> ActorSystemBuilder {
        ActorSystemBuilder {
            config,
            codec: None,
            persistence: None,
        }
    }

    /// Starts a system with the default codec and no persistence.
    pub async fn start(config: SystemConfig) -> Result<ActorSystem, RuntimeError> {
        Self::builder(config).start().await
    }

    pub(crate) fn from_shared(shared: Arc<SystemShared>) -> Self {
        ActorSystem { shared }
    }

    pub fn name(&self) -> &str {
        &self.shared.config.name
    }

    pub fn config(&self) -> &SystemConfig {
        &self.shared.config
    }

    fn user_guardian(&self) -> Result<ActorRef, RuntimeError> {
        self.shared
            .user
            .get()
            .cloned()
            .ok_or(RuntimeError::SystemStopped)
    }

    /// Creates a top-level actor under `/user`.
    pub async fn actor_of(&self, props: Props, name: &str) -> Result<ActorRef, RuntimeError> {
        if self.shared.stopping.load(Ordering::Acquire) {
            return Err(RuntimeError::SystemStopped);
        }
        create_child(&self.user_guardian()?, props, Some(name.to_string())).await
    }

    pub async fn actor_of_anonymous(&self, props: Props) -> Result<ActorRef, RuntimeError> {
        if self.shared.stopping.load(Ordering::Acquire) {
            return Err(RuntimeError::SystemStopped);
        }
        create_child(&self.user_guardian()?, props, None).await
    }

    /// Creates a top-level actor from props stored with [`register_props`](Self::register_props).
    pub async fn actor_of_registered(
        &self,
        type_name: &str,
        name: &str,
    ) -> Result<ActorRef, RuntimeError> {
        let props = self
            .shared
            .resolver
            .registered_props(type_name)
            .ok_or_else(|| {
                RuntimeError::Instantiation(format!("no props registered for {type_name}"))
            })?;
        self.actor_of(props, name).await
    }

    pub fn register_props(&self, type_name: &str, props: Props) {
        self.shared.resolver.register_props(type_name, props);
    }

    /// Resolves an absolute path, a remote path, or a path relative to `/user`.
    /// Unknown paths give a dead-letter reference.
    pub async fn resolve(&self, target: &str) -> ActorRef {
        match path::absolutize("/user/", target) {
            Ok(absolute) => self.shared.resolve(&absolute).await,
            Err(e) => {
                warn!(target, error = %e, "Unresolvable path");
                ActorRef::new_dead_letter(target.to_string(), Arc::downgrade(&self.shared))
            }
        }
    }

    /// The dead-letter hub. Send it [`Subscribe::to::<DeadLetter>()`](crate::Subscribe)
    /// to observe undeliverable messages.
    pub fn dead_letters(&self) -> ActorRef {
        self.system_actor(&self.shared.dead_letters, "/system/deadletters/")
    }

    /// The event stream.
    pub fn events(&self) -> ActorRef {
        self.system_actor(&self.shared.events, "/system/events/")
    }

    fn system_actor(&self, slot: &OnceLock<ActorRef>, path: &str) -> ActorRef {
        slot.get().cloned().unwrap_or_else(|| {
            ActorRef::new_dead_letter(path.to_string(), Arc::downgrade(&self.shared))
        })
    }

    /// Publishes an event to every subscriber of its type.
    pub fn publish<M: Message>(&self, event: M) -> bool {
        self.events().tell(Publish::new(event), None)
    }

    /// The remote form of this system's root, e.g. `arbor://127.0.0.1:9100/shop/`.
    /// `None` without a listener.
    pub fn address(&self) -> Option<String> {
        self.shared.address.get().map(RemoteAddress::to_path)
    }

    /// The port the listener is bound to.
    pub fn port(&self) -> Option<u16> {
        self.shared.address.get().map(|a| a.port)
    }

    /// The fully qualified path other systems use to reach `actor`.
    pub fn remote_path(&self, actor: &ActorRef) -> Option<String> {
        self.shared.remotify(actor)
    }

    pub fn is_stopping(&self) -> bool {
        self.shared.stopping.load(Ordering::Acquire)
    }

    /// Stops every actor. [`Context::in_shutdown`](crate::Context::in_shutdown)
    /// reports `false`, so persistent actors may discard their state.
    pub async fn stop(&self) {
        self.terminate(false).await;
    }

    /// Stops every actor, telling persistent actors to keep their state.
    pub async fn shutdown(&self) {
        self.terminate(true).await;
    }

    async fn terminate(&self, in_shutdown: bool) {
        if self.shared.stopping.swap(true, Ordering::AcqRel) {
            return;
        }
        self.shared.in_shutdown.store(in_shutdown, Ordering::Release);
        info!(system = %self.name(), in_shutdown, "Stopping actor system");

        // Application actors first, then the system actors under the root.
        if let Some(user) = self.shared.user.get() {
            user.stop();
            let _ = user.terminated().await;
        }
        if let Some(root) = self.shared.root.get() {
            root.stop();
            let _ = root.terminated().await;
        }

        let listener = self.shared.listener.lock().await.take();
        if let Some(listener) = listener {
            listener.stop().await;
        }
        self.shared.connections.shutdown().await;
        info!(system = %self.name(), "Actor system stopped");
    }
}
