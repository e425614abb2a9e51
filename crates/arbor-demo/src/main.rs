//! # Arbor Demo
//!
//! Walks through the runtime end to end:
//! 1.  A `foreman` restarts its crashing `worker` child without losing the reference.
//! 2.  Two systems on loopback exchange messages over the remote transport, and the
//!     receiver answers through the sender reference that travelled with the frame.
//!
//! Run with `RUST_LOG=debug cargo run -p arbor-demo` to see the lifecycle events.

use arbor::{
    setup_tracing, Actor, ActorError, ActorRef, ActorSystem, Context, Directive, JsonCodec,
    Payload, Props, RuntimeError, SupervisionStrategy, SystemConfig,
};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{info, warn, Instrument};

#[derive(Debug, thiserror::Error)]
enum DemoError {
    #[error(transparent)]
    Runtime(#[from] RuntimeError),
    #[error("no answer within {0:?}")]
    Silent(Duration),
    #[error("{0} is not listening")]
    NotListening(String),
}

#[derive(Debug, Clone)]
enum Job {
    Work(u32),
    Crash,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct Note {
    text: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct Ack {
    echoed: String,
}

/// Reports every finished job (and every restart) to `out`.
struct Worker {
    out: mpsc::UnboundedSender<String>,
}

#[async_trait]
impl Actor for Worker {
    async fn pre_restart(
        &mut self,
        cause: &ActorError,
        _ctx: &mut Context<Self>,
    ) -> Result<(), ActorError> {
        let _ = self.out.send(format!("worker restarted after: {cause}"));
        Ok(())
    }

    async fn receive(&mut self, msg: Payload, _ctx: &mut Context<Self>) -> Result<(), ActorError> {
        match msg.downcast_ref::<Job>() {
            Some(Job::Work(n)) => {
                let _ = self.out.send(format!("job {n} done"));
                Ok(())
            }
            Some(Job::Crash) => Err(ActorError::msg("worker hit a bad job")),
            None => Ok(()),
        }
    }
}

/// Owns the worker and restarts it on failure.
struct Foreman {
    out: mpsc::UnboundedSender<String>,
    worker: Option<ActorRef>,
}

#[async_trait]
impl Actor for Foreman {
    async fn pre_start(&mut self, ctx: &mut Context<Self>) -> Result<(), ActorError> {
        let out = self.out.clone();
        let worker = ctx
            .actor_of(Props::new(move || Worker { out: out.clone() }), "worker")
            .map_err(|e| ActorError::msg(e.to_string()))?;
        self.worker = Some(worker);
        Ok(())
    }

    async fn receive(&mut self, msg: Payload, ctx: &mut Context<Self>) -> Result<(), ActorError> {
        if let (Some(job), Some(worker)) = (msg.downcast_ref::<Job>(), &self.worker) {
            worker.tell(job.clone(), Some(ctx.myself()));
        }
        Ok(())
    }
}

/// Logs notes and acknowledges them to whoever sent them.
struct Printer;

#[async_trait]
impl Actor for Printer {
    async fn receive(&mut self, msg: Payload, ctx: &mut Context<Self>) -> Result<(), ActorError> {
        if let Some(note) = msg.downcast_ref::<Note>() {
            info!(text = %note.text, from = ?ctx.sender().map(ActorRef::path), "Printer got a note");
            ctx.reply(Ack {
                echoed: note.text.clone(),
            });
        }
        Ok(())
    }
}

/// Hands acknowledgements to the demo driver.
struct Inbox {
    out: mpsc::UnboundedSender<String>,
}

#[async_trait]
impl Actor for Inbox {
    async fn receive(&mut self, msg: Payload, _ctx: &mut Context<Self>) -> Result<(), ActorError> {
        if let Some(ack) = msg.downcast_ref::<Ack>() {
            let _ = self.out.send(ack.echoed.clone());
        }
        Ok(())
    }
}

const WAIT: Duration = Duration::from_secs(5);

async fn next(rx: &mut mpsc::UnboundedReceiver<String>) -> Result<String, DemoError> {
    tokio::time::timeout(WAIT, rx.recv())
        .await
        .ok()
        .flatten()
        .ok_or(DemoError::Silent(WAIT))
}

async fn supervision_demo() -> Result<(), DemoError> {
    let system = ActorSystem::start(SystemConfig::new("workshop")).await?;
    let (tx, mut rx) = mpsc::unbounded_channel();

    let foreman = system
        .actor_of(
            Props::new(move || Foreman {
                out: tx.clone(),
                worker: None,
            })
            .with_strategy(SupervisionStrategy::one_for_one(Directive::Restart)),
            "foreman",
        )
        .await?;

    foreman.tell(Job::Work(1), None);
    foreman.tell(Job::Crash, None);
    foreman.tell(Job::Work(2), None);
    for _ in 0..3 {
        info!(event = %next(&mut rx).await?, "Workshop");
    }

    let worker = system.resolve("/user/foreman/worker").await;
    info!(path = %worker.path(), alive = !worker.is_dead_letter(), "Worker after restart");
    system.shutdown().await;
    Ok(())
}

fn remote_node(name: &str) -> SystemConfig {
    SystemConfig::new(name).with_host("127.0.0.1").with_port(0)
}

fn codec() -> JsonCodec {
    JsonCodec::new()
        .with_type::<Note>("demo.Note")
        .with_type::<Ack>("demo.Ack")
}

async fn remote_demo() -> Result<(), DemoError> {
    let alpha = ActorSystem::builder(remote_node("alpha"))
        .codec(codec())
        .start()
        .await?;
    let beta = ActorSystem::builder(remote_node("beta"))
        .codec(codec())
        .start()
        .await?;

    let (tx, mut rx) = mpsc::unbounded_channel();
    beta.actor_of(Props::new(|| Printer), "printer").await?;
    let inbox = alpha
        .actor_of(Props::new(move || Inbox { out: tx.clone() }), "inbox")
        .await?;

    let address = beta
        .address()
        .ok_or_else(|| DemoError::NotListening(beta.name().to_string()))?;
    let printer = alpha.resolve(&format!("{address}user/printer/")).await;
    info!(path = %printer.path(), "Resolved remote printer");

    for text in ["first", "second", "third"] {
        printer
            .send(
                Note {
                    text: text.to_string(),
                },
                Some(&inbox),
            )
            .await?;
    }
    for _ in 0..3 {
        info!(echoed = %next(&mut rx).await?, "Alpha got an ack");
    }

    alpha.stop().await;
    beta.stop().await;
    Ok(())
}

#[tokio::main]
async fn main() -> Result<(), DemoError> {
    setup_tracing();
    info!("Starting arbor demo");

    supervision_demo()
        .instrument(tracing::info_span!("supervision"))
        .await?;

    if let Err(e) = remote_demo().instrument(tracing::info_span!("remote")).await {
        warn!(error = %e, "Remote demo failed");
        return Err(e);
    }

    info!("Demo completed");
    Ok(())
}
