use arbor::{
    ActorSystem, DeadLetter, JsonCodec, RuntimeError, Subscribe, SystemConfig, TestProbe,
    TransportError,
};
use serde::{Deserialize, Serialize};
use std::time::Duration;

const WAIT: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct Seq(u32);

async fn node(name: &str, pool_size: usize) -> ActorSystem {
    ActorSystem::builder(
        SystemConfig::new(name)
            .with_host("127.0.0.1")
            .with_port(0)
            .with_pool_size(pool_size),
    )
    .codec(JsonCodec::new().with_type::<Seq>("test.Seq"))
    .start()
    .await
    .expect("node should start")
}

#[tokio::test]
async fn test_remote_sends_to_one_path_keep_their_order() {
    let a = node("node-a", 2).await;
    let b = node("node-b", 2).await;
    let mut sink = TestProbe::new(&b, "sink").await.unwrap();

    let address = b.address().expect("b listens");
    let remote = a.resolve(&format!("{address}user/sink/")).await;
    assert!(remote.is_remote());
    assert_eq!(remote.path(), format!("{address}user/sink/"));

    for i in 0..200 {
        assert!(remote.tell(Seq(i), None));
    }
    for i in 0..200 {
        assert_eq!(sink.expect::<Seq>(WAIT).await, Some(Seq(i)));
    }

    a.stop().await;
    b.stop().await;
}

#[tokio::test]
async fn test_independent_paths_each_stay_ordered() {
    let a = node("fan-a", 2).await;
    let b = node("fan-b", 2).await;
    let mut left = TestProbe::new(&b, "left").await.unwrap();
    let mut right = TestProbe::new(&b, "right").await.unwrap();

    let address = b.address().unwrap();
    let to_left = a.resolve(&format!("{address}user/left/")).await;
    let to_right = a.resolve(&format!("{address}user/right/")).await;

    for i in 0..100 {
        to_left.tell(Seq(i), None);
        to_right.tell(Seq(i), None);
    }
    for i in 0..100 {
        assert_eq!(left.expect::<Seq>(WAIT).await, Some(Seq(i)));
    }
    for i in 0..100 {
        assert_eq!(right.expect::<Seq>(WAIT).await, Some(Seq(i)));
    }

    a.stop().await;
    b.stop().await;
}

#[tokio::test]
async fn test_remote_sender_can_be_replied_to() {
    let a = node("reply-a", 4).await;
    let b = node("reply-b", 4).await;
    let mut on_a = TestProbe::new(&a, "asker").await.unwrap();
    let mut on_b = TestProbe::new(&b, "answerer").await.unwrap();

    let remote = a
        .resolve(&format!("{}user/answerer/", b.address().unwrap()))
        .await;
    remote
        .send(Seq(1), Some(on_a.actor_ref()))
        .await
        .expect("write should succeed");

    assert_eq!(on_b.expect::<Seq>(WAIT).await, Some(Seq(1)));
    let sender = on_b.last_sender().cloned().expect("sender travels with the frame");
    assert!(sender.is_remote());
    assert_eq!(
        Some(sender.path().to_string()),
        a.remote_path(on_a.actor_ref())
    );

    sender.tell(Seq(2), None);
    assert_eq!(on_a.expect::<Seq>(WAIT).await, Some(Seq(2)));

    a.stop().await;
    b.stop().await;
}

#[tokio::test]
async fn test_unknown_remote_target_becomes_a_dead_letter() {
    let a = node("lost-a", 1).await;
    let b = node("lost-b", 1).await;
    let mut watcher = TestProbe::new(&b, "watcher").await.unwrap();
    b.dead_letters()
        .tell(Subscribe::to::<DeadLetter>(), Some(watcher.actor_ref()));

    let remote = a
        .resolve(&format!("{}user/missing/", b.address().unwrap()))
        .await;
    remote.tell(Seq(9), None);

    let letter = watcher.expect::<DeadLetter>(WAIT).await.expect("dead letter");
    assert_eq!(letter.path, "/user/missing/");
    assert_eq!(letter.message.downcast_ref::<Seq>(), Some(&Seq(9)));

    a.stop().await;
    b.stop().await;
}

#[tokio::test]
async fn test_unregistered_message_types_are_not_sent() {
    let a = node("codec-a", 1).await;
    let b = node("codec-b", 1).await;
    let remote = a
        .resolve(&format!("{}user/anyone/", b.address().unwrap()))
        .await;

    assert!(!remote.tell(42u8, None));
    let err = remote.send(42u8, None).await.unwrap_err();
    assert!(matches!(
        err,
        RuntimeError::Transport(TransportError::Codec(_))
    ));

    a.stop().await;
    b.stop().await;
}

#[tokio::test]
async fn test_unreachable_host_reports_connect_failure() {
    let a = ActorSystem::builder(
        SystemConfig::new("lonely")
            .with_host("127.0.0.1")
            .with_port(0)
            .with_connect_retries(2),
    )
    .codec(JsonCodec::new().with_type::<Seq>("test.Seq"))
    .start()
    .await
    .unwrap();

    // Grab a free port and release it again.
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    drop(listener);

    let remote = a
        .resolve(&format!("arbor://127.0.0.1:{port}/ghost/user/x/"))
        .await;
    let err = remote.send(Seq(1), None).await.unwrap_err();
    assert!(matches!(
        err,
        RuntimeError::Transport(TransportError::ConnectFailed { attempts: 2, .. })
    ));
    a.stop().await;
}

#[tokio::test]
async fn test_remote_paths_to_self_resolve_locally() {
    let a = node("self", 1).await;
    let probe = TestProbe::new(&a, "me").await.unwrap();
    let via_address = a
        .resolve(&format!("{}user/me/", a.address().unwrap()))
        .await;
    assert!(via_address.is_local());
    assert!(via_address.same_actor(probe.actor_ref()));
    a.stop().await;
}
