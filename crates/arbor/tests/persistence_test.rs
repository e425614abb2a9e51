use arbor::{
    async_trait, Actor, ActorError, ActorRef, ActorSystem, Context, InMemoryPersistence, Payload,
    PersistenceService, Props, SnapshotDeleted, SnapshotFailed, SnapshotSaved, SystemConfig,
    TestProbe,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;

const WAIT: Duration = Duration::from_secs(2);

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
struct Tally {
    count: u32,
}

#[derive(Debug, Clone)]
struct Incr;
#[derive(Debug, Clone)]
struct Save;
#[derive(Debug, Clone)]
struct Forget;
#[derive(Debug, Clone)]
struct Get;

struct Counter {
    id: &'static str,
    state: Tally,
    to: ActorRef,
}

#[async_trait]
impl Actor for Counter {
    fn persistence_id(&self) -> Option<String> {
        Some(self.id.to_string())
    }

    async fn recover(
        &mut self,
        snapshot: serde_json::Value,
        _ctx: &mut Context<Self>,
    ) -> Result<(), ActorError> {
        self.state = serde_json::from_value(snapshot)?;
        Ok(())
    }

    async fn post_recovery(&mut self, _ctx: &mut Context<Self>) -> Result<(), ActorError> {
        self.to.tell(format!("recovered at {}", self.state.count), None);
        Ok(())
    }

    async fn receive(&mut self, msg: Payload, ctx: &mut Context<Self>) -> Result<(), ActorError> {
        if msg.is::<Incr>() {
            self.state.count += 1;
        } else if msg.is::<Save>() {
            ctx.save_snapshot(&self.state);
        } else if msg.is::<Forget>() {
            ctx.delete_snapshot();
        } else if msg.is::<Get>() {
            ctx.reply(self.state.clone());
        } else if let Some(saved) = msg.downcast_ref::<SnapshotSaved>() {
            self.to.tell(saved.clone(), None);
        } else if let Some(deleted) = msg.downcast_ref::<SnapshotDeleted>() {
            self.to.tell(deleted.clone(), None);
        } else if let Some(failed) = msg.downcast_ref::<SnapshotFailed>() {
            self.to.tell(failed.clone(), None);
        }
        Ok(())
    }
}

fn counter(id: &'static str, to: &ActorRef) -> Props {
    let to = to.clone();
    Props::new(move || Counter {
        id,
        state: Tally::default(),
        to: to.clone(),
    })
}

async fn start(name: &str, store: &Arc<InMemoryPersistence>) -> ActorSystem {
    ActorSystem::builder(SystemConfig::new(name))
        .persistence(store.clone())
        .start()
        .await
        .expect("system should start")
}

#[tokio::test]
async fn test_state_survives_a_system_restart() {
    let store = Arc::new(InMemoryPersistence::new());

    let system = start("ledger", &store).await;
    let mut probe = TestProbe::new(&system, "probe").await.unwrap();
    let tally = system
        .actor_of(counter("tally-1", probe.actor_ref()), "tally")
        .await
        .unwrap();
    assert_eq!(
        probe.expect::<String>(WAIT).await.as_deref(),
        Some("recovered at 0")
    );

    for _ in 0..3 {
        tally.tell(Incr, None);
    }
    tally.tell(Save, None);
    let saved = probe.expect::<SnapshotSaved>(WAIT).await.expect("saved");
    assert_eq!(saved.persistence_id, "tally-1");
    assert!(store.contains("tally-1"));
    system.shutdown().await;

    let system = start("ledger", &store).await;
    let mut probe = TestProbe::new(&system, "probe").await.unwrap();
    let tally = system
        .actor_of(counter("tally-1", probe.actor_ref()), "tally")
        .await
        .unwrap();
    assert_eq!(
        probe.expect::<String>(WAIT).await.as_deref(),
        Some("recovered at 3")
    );
    tally.tell(Get, Some(probe.actor_ref()));
    assert_eq!(probe.expect::<Tally>(WAIT).await, Some(Tally { count: 3 }));
    system.stop().await;
}

#[tokio::test]
async fn test_delete_snapshot() {
    let store = Arc::new(InMemoryPersistence::new());
    let service: Arc<dyn PersistenceService> = store.clone();
    service
        .write_as("tally-2", &Tally { count: 10 })
        .await
        .unwrap();

    let system = start("forget", &store).await;
    let mut probe = TestProbe::new(&system, "probe").await.unwrap();
    let tally = system
        .actor_of(counter("tally-2", probe.actor_ref()), "tally")
        .await
        .unwrap();
    assert_eq!(
        probe.expect::<String>(WAIT).await.as_deref(),
        Some("recovered at 10")
    );

    tally.tell(Forget, None);
    let deleted = probe.expect::<SnapshotDeleted>(WAIT).await.expect("deleted");
    assert_eq!(deleted.persistence_id, "tally-2");
    assert!(store.is_empty());
    system.stop().await;
}

#[tokio::test]
async fn test_saving_without_a_service_reports_failure() {
    let system = ActorSystem::start(SystemConfig::new("no-store")).await.unwrap();
    let mut probe = TestProbe::new(&system, "probe").await.unwrap();
    let tally = system
        .actor_of(counter("tally-3", probe.actor_ref()), "tally")
        .await
        .unwrap();

    // Starts empty.
    assert_eq!(
        probe.expect::<String>(WAIT).await.as_deref(),
        Some("recovered at 0")
    );
    tally.tell(Save, None);
    let failed = probe.expect::<SnapshotFailed>(WAIT).await.expect("failure");
    assert_eq!(failed.persistence_id, "tally-3");
    system.stop().await;
}

#[tokio::test]
async fn test_corrupt_snapshot_fails_the_start() {
    let store = Arc::new(InMemoryPersistence::new());
    store
        .write("tally-4", serde_json::json!({"count": "many"}))
        .await
        .unwrap();

    let system = start("corrupt", &store).await;
    let mut probe = TestProbe::new(&system, "probe").await.unwrap();
    let tally = system
        .actor_of(counter("tally-4", probe.actor_ref()), "tally")
        .await
        .unwrap();

    tokio::time::timeout(WAIT, tally.terminated())
        .await
        .expect("actor should stop")
        .unwrap();
    assert!(probe.expect_no_message(Duration::from_millis(100)).await);
    system.stop().await;
}
