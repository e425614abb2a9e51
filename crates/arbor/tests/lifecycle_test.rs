use arbor::{
    async_trait, Actor, ActorError, ActorRef, ActorSystem, Behavior, Broadcast, Children, Context,
    DeadLetter, DeleteChild, GetChildren, Payload, Props, Subscribe, SystemConfig, Terminated,
    TestProbe,
};
use std::sync::{Arc, Mutex};
use std::time::Duration;

const WAIT: Duration = Duration::from_secs(2);

async fn system(name: &str) -> ActorSystem {
    ActorSystem::start(SystemConfig::new(name))
        .await
        .expect("system should start")
}

/// Forwards every `u32` to a probe.
struct Relay {
    to: ActorRef,
}

#[async_trait]
impl Actor for Relay {
    async fn receive(&mut self, msg: Payload, _ctx: &mut Context<Self>) -> Result<(), ActorError> {
        if let Some(n) = msg.downcast_ref::<u32>() {
            self.to.tell(*n, None);
        }
        Ok(())
    }
}

#[tokio::test]
async fn test_messages_from_one_sender_arrive_in_order() {
    let system = system("fifo").await;
    let mut probe = TestProbe::new(&system, "probe").await.unwrap();
    let relay = system
        .actor_of(
            Props::new({
                let to = probe.actor_ref().clone();
                move || Relay { to: to.clone() }
            }),
            "relay",
        )
        .await
        .unwrap();

    for i in 0..1000u32 {
        assert!(relay.tell(i, None));
    }
    for i in 0..1000u32 {
        assert_eq!(probe.expect::<u32>(WAIT).await, Some(i));
    }
    system.stop().await;
}

#[tokio::test]
async fn test_child_accepts_messages_right_after_creation() {
    let system = system("eager").await;
    let mut probe = TestProbe::new(&system, "probe").await.unwrap();
    let to = probe.actor_ref().clone();
    let relay = system
        .actor_of(Props::new(move || Relay { to: to.clone() }), "relay")
        .await
        .unwrap();
    // No wait for the actor to reach its running state.
    relay.tell(5u32, None);
    assert_eq!(probe.expect::<u32>(WAIT).await, Some(5));
    system.stop().await;
}

// ---- behaviors and stash -----------------------------------------------------

#[derive(Debug, Clone)]
struct Open;
#[derive(Debug, Clone)]
struct Close;
#[derive(Debug, Clone)]
struct Pop;

/// Stashes numbers while closed, forwards them while open.
struct Gate {
    to: ActorRef,
}

struct Opened;

#[async_trait]
impl Behavior<Gate> for Opened {
    async fn receive(
        &self,
        gate: &mut Gate,
        msg: Payload,
        ctx: &mut Context<Gate>,
    ) -> Result<(), ActorError> {
        if let Some(n) = msg.downcast_ref::<u32>() {
            gate.to.tell(*n, None);
        } else if msg.is::<Close>() {
            ctx.unbecome()?;
        }
        Ok(())
    }
}

#[async_trait]
impl Actor for Gate {
    async fn receive(&mut self, msg: Payload, ctx: &mut Context<Self>) -> Result<(), ActorError> {
        if msg.is::<u32>() {
            ctx.stash(msg);
        } else if msg.is::<Open>() {
            ctx.unstash_all();
            ctx.stash_become(Opened);
        } else if msg.is::<Pop>() {
            let empty = matches!(ctx.unbecome(), Err(ActorError::EmptyBehaviorStack));
            ctx.reply(empty);
        }
        Ok(())
    }
}

#[tokio::test]
async fn test_stash_and_become() {
    let system = system("gate").await;
    let mut probe = TestProbe::new(&system, "probe").await.unwrap();
    let to = probe.actor_ref().clone();
    let gate = system
        .actor_of(Props::new(move || Gate { to: to.clone() }), "gate")
        .await
        .unwrap();

    for i in 1..=3u32 {
        gate.tell(i, None);
    }
    assert!(probe.expect_no_message(Duration::from_millis(100)).await);

    gate.tell(Open, None);
    for i in 1..=3u32 {
        assert_eq!(probe.expect::<u32>(WAIT).await, Some(i));
    }

    // Back to the initial behavior: numbers are stashed again.
    gate.tell(Close, None);
    gate.tell(4u32, None);
    assert!(probe.expect_no_message(Duration::from_millis(100)).await);
    system.stop().await;
}

#[tokio::test]
async fn test_unbecome_on_empty_stack_is_an_error() {
    let system = system("pop").await;
    let mut probe = TestProbe::new(&system, "probe").await.unwrap();
    let to = probe.actor_ref().clone();
    let gate = system
        .actor_of(Props::new(move || Gate { to: to.clone() }), "gate")
        .await
        .unwrap();

    gate.tell(Pop, Some(probe.actor_ref()));
    assert_eq!(probe.expect::<bool>(WAIT).await, Some(true));
    system.stop().await;
}

// ---- scheduled sends ---------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
struct Tick(u32);

/// `Later { tick, cancel }` schedules `tick` for the probe after 50ms and
/// cancels it straight away when asked to. `Echo` goes through `schedule_in`.
#[derive(Debug, Clone)]
struct Later {
    tick: u32,
    cancel: bool,
}

#[derive(Debug, Clone)]
struct Echo(u32);

struct Scheduler {
    to: ActorRef,
}

#[async_trait]
impl Actor for Scheduler {
    async fn receive(&mut self, msg: Payload, ctx: &mut Context<Self>) -> Result<(), ActorError> {
        if let Some(later) = msg.downcast_ref::<Later>() {
            let timer = ctx.schedule_to(&self.to, Tick(later.tick), Duration::from_millis(50));
            if later.cancel {
                timer.cancel();
            }
        } else if let Some(Echo(n)) = msg.downcast_ref::<Echo>() {
            ctx.schedule_in(Tick(*n), Duration::from_millis(20));
        } else if let Some(tick) = msg.downcast_ref::<Tick>() {
            self.to.tell(tick.clone(), ctx.sender());
        }
        Ok(())
    }
}

async fn scheduler(system: &ActorSystem, probe: &TestProbe) -> ActorRef {
    let to = probe.actor_ref().clone();
    system
        .actor_of(Props::new(move || Scheduler { to: to.clone() }), "scheduler")
        .await
        .unwrap()
}

#[tokio::test]
async fn test_scheduled_message_arrives_after_the_delay() {
    let system = system("schedule").await;
    let mut probe = TestProbe::new(&system, "probe").await.unwrap();
    let scheduler = scheduler(&system, &probe).await;

    scheduler.tell(Later { tick: 1, cancel: false }, None);
    assert!(probe.expect_no_message(Duration::from_millis(20)).await);
    assert_eq!(probe.expect::<Tick>(WAIT).await, Some(Tick(1)));
    // The scheduling actor is the claimed sender.
    assert!(probe.last_sender() == Some(&scheduler));

    scheduler.tell(Echo(2), None);
    assert_eq!(probe.expect::<Tick>(WAIT).await, Some(Tick(2)));
    system.stop().await;
}

#[tokio::test]
async fn test_cancelled_schedule_never_fires() {
    let system = system("schedule-cancel").await;
    let mut probe = TestProbe::new(&system, "probe").await.unwrap();
    let scheduler = scheduler(&system, &probe).await;

    scheduler.tell(Later { tick: 1, cancel: true }, None);
    assert!(probe.expect_no_message(Duration::from_millis(200)).await);

    // A later, uncancelled one still goes through.
    scheduler.tell(Later { tick: 2, cancel: false }, None);
    assert_eq!(probe.expect::<Tick>(WAIT).await, Some(Tick(2)));
    system.stop().await;
}

// ---- dead-man's handle -------------------------------------------------------

struct Ephemeral {
    to: ActorRef,
    after: Duration,
}

#[async_trait]
impl Actor for Ephemeral {
    async fn pre_start(&mut self, ctx: &mut Context<Self>) -> Result<(), ActorError> {
        ctx.die_in(self.after);
        Ok(())
    }

    async fn receive(&mut self, msg: Payload, ctx: &mut Context<Self>) -> Result<(), ActorError> {
        // Any message keeps it alive a little longer.
        if msg.is::<u32>() {
            ctx.die_in(self.after);
        }
        Ok(())
    }

    async fn dying(&mut self, _ctx: &mut Context<Self>) -> Result<(), ActorError> {
        self.to.tell("dying".to_string(), None);
        Ok(())
    }
}

#[tokio::test]
async fn test_dead_mans_handle_stops_the_actor() {
    let system = system("dmh").await;
    let mut probe = TestProbe::new(&system, "probe").await.unwrap();
    let to = probe.actor_ref().clone();
    let actor = system
        .actor_of(
            Props::new(move || Ephemeral {
                to: to.clone(),
                after: Duration::from_millis(100),
            }),
            "ephemeral",
        )
        .await
        .unwrap();

    assert_eq!(probe.expect::<String>(WAIT).await.as_deref(), Some("dying"));
    tokio::time::timeout(WAIT, actor.terminated())
        .await
        .expect("actor should stop")
        .unwrap();
    system.stop().await;
}

#[tokio::test]
async fn test_rearming_the_handle_postpones_the_stop() {
    let system = system("dmh-rearm").await;
    let mut probe = TestProbe::new(&system, "probe").await.unwrap();
    let to = probe.actor_ref().clone();
    let actor = system
        .actor_of(
            Props::new(move || Ephemeral {
                to: to.clone(),
                after: Duration::from_millis(300),
            }),
            "ephemeral",
        )
        .await
        .unwrap();

    for _ in 0..4 {
        tokio::time::sleep(Duration::from_millis(150)).await;
        actor.tell(1u32, None);
    }
    assert!(!actor.is_terminated());
    assert_eq!(probe.expect::<String>(WAIT).await.as_deref(), Some("dying"));
    system.stop().await;
}

// ---- watching ----------------------------------------------------------------

struct Watcher {
    target: ActorRef,
    to: ActorRef,
}

#[async_trait]
impl Actor for Watcher {
    async fn pre_start(&mut self, ctx: &mut Context<Self>) -> Result<(), ActorError> {
        ctx.watch(&self.target);
        Ok(())
    }

    async fn receive(&mut self, msg: Payload, _ctx: &mut Context<Self>) -> Result<(), ActorError> {
        if let Some(terminated) = msg.downcast_ref::<Terminated>() {
            self.to.tell(terminated.clone(), None);
        }
        Ok(())
    }
}

#[tokio::test]
async fn test_watchers_are_told_when_an_actor_stops() {
    let system = system("watch").await;
    let mut probe = TestProbe::new(&system, "probe").await.unwrap();
    let to = probe.actor_ref().clone();
    let target = system
        .actor_of(Props::new(move || Relay { to: to.clone() }), "target")
        .await
        .unwrap();

    let (watched, to) = (target.clone(), probe.actor_ref().clone());
    system
        .actor_of(
            Props::new(move || Watcher {
                target: watched.clone(),
                to: to.clone(),
            }),
            "watcher",
        )
        .await
        .unwrap();

    tokio::time::sleep(Duration::from_millis(50)).await;
    target.stop();

    let terminated = probe.expect::<Terminated>(WAIT).await.expect("Terminated");
    assert_eq!(terminated.path, "/user/target/");
    assert_eq!(terminated.name, "target");
    system.stop().await;
}

#[tokio::test]
async fn test_watching_a_stopped_actor_answers_immediately() {
    let system = system("watch-late").await;
    let mut probe = TestProbe::new(&system, "probe").await.unwrap();
    let to = probe.actor_ref().clone();
    let target = system
        .actor_of(Props::new(move || Relay { to: to.clone() }), "target")
        .await
        .unwrap();
    target.stop();
    target.terminated().await.unwrap();

    let (watched, to) = (target.clone(), probe.actor_ref().clone());
    system
        .actor_of(
            Props::new(move || Watcher {
                target: watched.clone(),
                to: to.clone(),
            }),
            "watcher",
        )
        .await
        .unwrap();

    let terminated = probe.expect::<Terminated>(WAIT).await.expect("Terminated");
    assert_eq!(terminated.path, "/user/target/");
    system.stop().await;
}

// ---- shutdown order ----------------------------------------------------------

type Log = Arc<Mutex<Vec<String>>>;

struct Node {
    name: &'static str,
    kids: Vec<&'static str>,
    log: Log,
}

#[async_trait]
impl Actor for Node {
    async fn pre_start(&mut self, ctx: &mut Context<Self>) -> Result<(), ActorError> {
        for &name in &self.kids {
            let log = self.log.clone();
            ctx.actor_of(
                Props::new(move || Node {
                    name,
                    kids: Vec::new(),
                    log: log.clone(),
                }),
                name,
            )
            .map_err(|e| ActorError::msg(e.to_string()))?;
        }
        Ok(())
    }

    async fn receive(&mut self, _msg: Payload, _ctx: &mut Context<Self>) -> Result<(), ActorError> {
        Ok(())
    }

    async fn post_stop(&mut self, ctx: &mut Context<Self>) -> Result<(), ActorError> {
        let children_alive = ctx.children().iter().any(|c| !c.is_terminated());
        self.log
            .lock()
            .unwrap()
            .push(format!("{} stopped, children alive: {children_alive}", self.name));
        Ok(())
    }
}

#[tokio::test]
async fn test_children_stop_before_their_parent() {
    let system = system("shutdown").await;
    let log: Log = Arc::default();
    let parent_log = log.clone();
    let parent = system
        .actor_of(
            Props::new(move || Node {
                name: "parent",
                kids: vec!["left", "right"],
                log: parent_log.clone(),
            }),
            "parent",
        )
        .await
        .unwrap();

    tokio::time::sleep(Duration::from_millis(50)).await;
    parent.stop();
    parent.terminated().await.unwrap();

    let log = log.lock().unwrap().clone();
    assert_eq!(log.len(), 3);
    assert_eq!(log[2], "parent stopped, children alive: false");
    assert!(log[..2].iter().all(|line| !line.starts_with("parent")));
    system.stop().await;
}

// ---- dead letters ------------------------------------------------------------

#[tokio::test]
async fn test_messages_to_a_stopped_actor_become_dead_letters() {
    let system = system("dead").await;
    let mut probe = TestProbe::new(&system, "probe").await.unwrap();
    system
        .dead_letters()
        .tell(Subscribe::to::<DeadLetter>(), Some(probe.actor_ref()));

    let to = probe.actor_ref().clone();
    let victim = system
        .actor_of(Props::new(move || Relay { to: to.clone() }), "victim")
        .await
        .unwrap();
    victim.stop();
    victim.terminated().await.unwrap();

    assert!(!victim.tell(7u32, None));
    let letter = probe.expect::<DeadLetter>(WAIT).await.expect("dead letter");
    assert_eq!(letter.path, "/user/victim/");
    assert_eq!(letter.message.downcast_ref::<u32>(), Some(&7));
    system.stop().await;
}

// ---- control messages --------------------------------------------------------

struct Brood {
    to: ActorRef,
}

#[async_trait]
impl Actor for Brood {
    async fn pre_start(&mut self, ctx: &mut Context<Self>) -> Result<(), ActorError> {
        for name in ["c0", "c1", "c2"] {
            let to = self.to.clone();
            ctx.actor_of(Props::new(move || Relay { to: to.clone() }), name)
                .map_err(|e| ActorError::msg(e.to_string()))?;
        }
        Ok(())
    }

    async fn receive(&mut self, _msg: Payload, _ctx: &mut Context<Self>) -> Result<(), ActorError> {
        Ok(())
    }
}

#[tokio::test]
async fn test_children_broadcast_and_delete() {
    let system = system("brood").await;
    let mut probe = TestProbe::new(&system, "probe").await.unwrap();
    let to = probe.actor_ref().clone();
    let brood = system
        .actor_of(Props::new(move || Brood { to: to.clone() }), "brood")
        .await
        .unwrap();

    brood.tell(GetChildren, Some(probe.actor_ref()));
    let Children(children) = probe.expect::<Children>(WAIT).await.expect("children");
    assert_eq!(children.len(), 3);

    brood.tell(Broadcast::new(9u32), None);
    for _ in 0..3 {
        assert_eq!(probe.expect::<u32>(WAIT).await, Some(9));
    }

    brood.tell(DeleteChild { name: "c0".into() }, None);
    let mut remaining = 3;
    for _ in 0..20 {
        tokio::time::sleep(Duration::from_millis(50)).await;
        brood.tell(GetChildren, Some(probe.actor_ref()));
        let Children(children) = probe.expect::<Children>(WAIT).await.expect("children");
        remaining = children.len();
        if remaining == 2 {
            break;
        }
    }
    assert_eq!(remaining, 2);
    system.stop().await;
}

#[tokio::test]
async fn test_events_reach_subscribers_of_their_type() {
    let system = system("events").await;
    let mut probe = TestProbe::new(&system, "probe").await.unwrap();
    system
        .events()
        .tell(Subscribe::to::<u64>(), Some(probe.actor_ref()));

    system.publish("ignored".to_string());
    system.publish(5u64);
    assert_eq!(probe.expect::<u64>(WAIT).await, Some(5));
    assert!(probe.expect_no_message(Duration::from_millis(100)).await);
    system.stop().await;
}
