//! # Test Probe
//!
//! A [`TestProbe`] is a real actor whose only job is to hand every message it
//! receives to the test that owns it. Give its reference to the actor under test
//! (as a target, a sender, a watcher or a subscriber) and assert on what arrives.
//!
//! ```rust
//! use arbor::{ActorSystem, SystemConfig, TestProbe};
//! use std::time::Duration;
//!
//! # #[tokio::main] async fn main() -> Result<(), arbor::RuntimeError> {
//! let system = ActorSystem::start(SystemConfig::new("probe-doc")).await?;
//! let mut probe = TestProbe::new(&system, "probe").await?;
//!
//! probe.actor_ref().tell(42u32, None);
//! assert_eq!(probe.expect::<u32>(Duration::from_secs(1)).await, Some(42));
//! assert!(probe.expect_no_message(Duration::from_millis(50)).await);
//!
//! system.stop().await;
//! # Ok(())
//! # }
//! ```

use crate::actor::Actor;
use crate::actor_ref::ActorRef;
use crate::context::Context;
use crate::error::{ActorError, RuntimeError};
use crate::message::{Message, Payload};
use crate::props::Props;
use crate::system::ActorSystem;
use async_trait::async_trait;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tracing::debug;

type Received = (Payload, Option<ActorRef>);

struct ProbeActor {
    tx: mpsc::UnboundedSender<Received>,
}

#[async_trait]
impl Actor for ProbeActor {
    async fn receive(&mut self, msg: Payload, ctx: &mut Context<Self>) -> Result<(), ActorError> {
        // The test may have dropped the probe already.
        let _ = self.tx.send((msg, ctx.sender().cloned()));
        Ok(())
    }
}

pub struct TestProbe {
    actor: ActorRef,
    rx: mpsc::UnboundedReceiver<Received>,
    last_sender: Option<ActorRef>,
}

impl TestProbe {
    /// Creates the probe actor as `/user/<name>`.
    pub async fn new(system: &ActorSystem, name: &str) -> Result<Self, RuntimeError> {
        let (tx, rx) = mpsc::unbounded_channel();
        let actor = system
            .actor_of(Props::new(move || ProbeActor { tx: tx.clone() }), name)
            .await?;
        Ok(TestProbe {
            actor,
            rx,
            last_sender: None,
        })
    }

    pub fn actor_ref(&self) -> &ActorRef {
        &self.actor
    }

    /// Next message of any type.
    pub async fn receive(&mut self, within: Duration) -> Option<Payload> {
        let (payload, sender) = tokio::time::timeout(within, self.rx.recv()).await.ok()??;
        self.last_sender = sender;
        Some(payload)
    }

    /// Waits for the next message of type `T`, skipping messages of other types.
    pub async fn expect<T: Message + Clone>(&mut self, within: Duration) -> Option<T> {
        let deadline = Instant::now() + within;
        loop {
            let left = deadline.saturating_duration_since(Instant::now());
            let payload = self.receive(left).await?;
            match payload.downcast_ref::<T>() {
                Some(found) => return Some(found.clone()),
                None => debug!(
                    expected = std::any::type_name::<T>(),
                    got = payload.type_name(),
                    "Probe skipped message"
                ),
            }
        }
    }

    /// `true` if nothing arrives within `within`.
    pub async fn expect_no_message(&mut self, within: Duration) -> bool {
        self.receive(within).await.is_none()
    }

    /// Sender of the last message returned by this probe.
    pub fn last_sender(&self) -> Option<&ActorRef> {
        self.last_sender.as_ref()
    }
}
