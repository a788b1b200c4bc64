#![allow(clippy::unwrap_used, clippy::expect_used)]

use async_trait::async_trait;
use querymesh_core::{
    Agent, AgentStatus, Message, MessageType, Priority, QuerymeshError, QuerymeshResult,
};
use querymesh_hub::routing::id_hash;
use querymesh_hub::*;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

// ---------------------------------------------------------------------------
// Test agents and middleware
// ---------------------------------------------------------------------------

/// Replies to every message with a fixed tag.
struct Tagged {
    name: &'static str,
    tag: &'static str,
}

#[async_trait]
impl Agent for Tagged {
    fn name(&self) -> &str {
        self.name
    }

    async fn process(&self, message: Message) -> QuerymeshResult<Option<Message>> {
        Ok(Some(message.reply(serde_json::json!({ "tag": self.tag }))))
    }
}

/// Counts what it receives and never replies.
struct Counter {
    name: &'static str,
    seen: Arc<AtomicUsize>,
}

#[async_trait]
impl Agent for Counter {
    fn name(&self) -> &str {
        self.name
    }

    async fn process(&self, _message: Message) -> QuerymeshResult<Option<Message>> {
        self.seen.fetch_add(1, Ordering::SeqCst);
        Ok(None)
    }
}

struct Failing;

#[async_trait]
impl Agent for Failing {
    fn name(&self) -> &str {
        "failing"
    }

    async fn process(&self, _message: Message) -> QuerymeshResult<Option<Message>> {
        Err(QuerymeshError::Agent("boom".into()))
    }
}

struct Slow(Duration);

#[async_trait]
impl Middleware for Slow {
    async fn process(&self, message: Message, _rule: &RoutingRule) -> QuerymeshResult<Message> {
        tokio::time::sleep(self.0).await;
        Ok(message)
    }
}

struct Reject;

#[async_trait]
impl Middleware for Reject {
    async fn process(&self, _message: Message, _rule: &RoutingRule) -> QuerymeshResult<Message> {
        Err(QuerymeshError::Middleware {
            name: "reject".into(),
            reason: "not allowed".into(),
        })
    }
}

fn tagged(name: &'static str, tag: &'static str) -> Arc<dyn Agent> {
    Arc::new(Tagged { name, tag })
}

// ---------------------------------------------------------------------------
// 1. Registry
// ---------------------------------------------------------------------------

#[tokio::test]
async fn reregistering_keeps_one_entry_last_write_wins() {
    let hub = Hub::with_defaults();
    hub.register(tagged("dup", "first")).await;
    hub.register(tagged("dup", "second")).await;

    assert_eq!(hub.agent_names(), vec!["dup".to_string()]);
    let reply = hub
        .dispatch(Message::request("caller", "dup", serde_json::json!({})))
        .await
        .unwrap();
    assert_eq!(reply.content["tag"], "second");
}

#[tokio::test]
async fn failing_agent_status_is_error() {
    let hub = Hub::with_defaults();
    hub.register(Arc::new(Failing)).await;
    let result = hub
        .dispatch(Message::request("caller", "failing", serde_json::json!({})))
        .await;
    assert!(result.is_err());
    assert_eq!(hub.agent_status("failing"), Some(AgentStatus::Error));
}

// ---------------------------------------------------------------------------
// 2. Delivery strategies
// ---------------------------------------------------------------------------

#[tokio::test]
async fn broadcast_reaches_everyone_but_sender() {
    let hub = Hub::new(HubConfig::default());
    hub.add_routing_rule(RoutingRule::new("a", "*").with_strategy(RoutingStrategy::Broadcast));
    for name in ["a", "b", "c"] {
        hub.register(tagged(name, name)).await;
    }

    let msg = Message::notification("a", "all", serde_json::json!("hello"));
    assert!(hub.send(msg.clone()).await);

    assert_eq!(hub.queue_len("a").await, 0);
    for name in ["b", "c"] {
        let copy = hub.receive(name).await.unwrap();
        assert_ne!(copy.id, msg.id);
        assert_eq!(copy.correlation_id, msg.correlation_id);
        assert_eq!(copy.receiver, name);
    }
}

#[tokio::test]
async fn broadcast_with_no_other_agents_fails() {
    let hub = Hub::new(HubConfig::default());
    hub.add_routing_rule(RoutingRule::default().with_strategy(RoutingStrategy::Broadcast));
    hub.register(tagged("solo", "solo")).await;
    assert!(!hub.send(Message::notification("solo", "all", serde_json::json!(1))).await);
}

#[tokio::test]
async fn round_robin_uses_id_hash() {
    let hub = Hub::new(HubConfig::default());
    hub.add_routing_rule(RoutingRule::default().with_strategy(RoutingStrategy::RoundRobin));
    let names = ["x", "y", "z"];
    for name in names {
        hub.register(tagged(name, name)).await;
    }

    for _ in 0..12 {
        let msg = Message::request("src", "pool", serde_json::json!(null));
        let expected = names[(id_hash(&msg.id) % names.len() as u64) as usize];
        assert!(hub.send(msg.clone()).await);
        let got = hub.receive(expected).await.unwrap();
        assert_eq!(got.id, msg.id);
        assert_eq!(got.receiver, expected);
    }
}

#[tokio::test]
async fn load_balanced_picks_shortest_queue() {
    let hub = Hub::new(HubConfig::default());
    hub.add_routing_rule(
        RoutingRule::default()
            .with_message_type(MessageType::Notification)
            .with_strategy(RoutingStrategy::LoadBalanced),
    );
    hub.register(tagged("p", "p")).await;
    hub.register(tagged("q", "q")).await;

    // Two direct requests leave p with the longer queue.
    for n in 0..2 {
        assert!(hub.send(Message::request("src", "p", serde_json::json!(n))).await);
    }

    for _ in 0..2 {
        assert!(hub.send(Message::notification("src", "any", serde_json::json!(0))).await);
    }
    assert_eq!(hub.queue_len("p").await, 2);
    assert_eq!(hub.queue_len("q").await, 2);

    // Tie goes to the first name.
    assert!(hub.send(Message::notification("src", "any", serde_json::json!(0))).await);
    assert_eq!(hub.queue_len("p").await, 3);
}

#[tokio::test]
async fn queued_messages_come_out_by_priority() {
    let hub = Hub::with_defaults();
    hub.register(tagged("b", "b")).await;
    for p in [Priority::DEFAULT, Priority::URGENT, Priority::NORMAL, Priority::URGENT] {
        let msg = Message::request("a", "b", serde_json::json!(p)).with_priority(p);
        assert!(hub.send(msg).await);
    }
    let mut order = Vec::new();
    while let Some(m) = hub.receive("b").await {
        order.push(m.priority);
    }
    assert_eq!(order, vec![1, 1, 3, 5]);
}

// ---------------------------------------------------------------------------
// 3. Failure handling
// ---------------------------------------------------------------------------

#[tokio::test]
async fn middleware_error_is_a_failed_send() {
    let hub = Hub::new(HubConfig::default());
    hub.add_middleware("reject", Arc::new(Reject));
    hub.add_routing_rule(RoutingRule::default().with_middleware(["reject"]));
    hub.register(tagged("b", "b")).await;

    assert!(!hub.send(Message::request("a", "b", serde_json::json!(1))).await);
    assert_eq!(hub.queue_len("b").await, 0);

    let stats = hub.stats().await;
    assert_eq!(stats.failed_deliveries, 1);
    let last = hub.history(1);
    assert!(!last[0].success);
}

#[tokio::test]
async fn validation_rejects_empty_sender() {
    let hub = Hub::with_defaults();
    hub.register(tagged("b", "b")).await;
    assert!(!hub.send(Message::request("", "b", serde_json::json!(1))).await);
}

#[tokio::test]
async fn rule_timeout_fails_the_send() {
    let hub = Hub::new(HubConfig::default());
    hub.add_middleware("slow", Arc::new(Slow(Duration::from_millis(300))));
    hub.add_routing_rule(
        RoutingRule::default()
            .with_middleware(["slow"])
            .with_timeout(Duration::from_millis(30)),
    );
    hub.register(tagged("b", "b")).await;

    assert!(!hub.send(Message::request("a", "b", serde_json::json!(1))).await);
    assert_eq!(hub.stats().await.active_messages, 0);
}

#[tokio::test]
async fn unknown_middleware_is_skipped() {
    let hub = Hub::new(HubConfig::default());
    hub.add_routing_rule(RoutingRule::default().with_middleware(["does-not-exist", "tagging"]));
    hub.register(tagged("b", "b")).await;

    assert!(hub.send(Message::request("a", "b", serde_json::json!(1))).await);
    let got = hub.receive("b").await.unwrap();
    assert_eq!(got.metadata["tagged"], serde_json::Value::Bool(true));
}

// ---------------------------------------------------------------------------
// 4. Concurrency cap
// ---------------------------------------------------------------------------

#[tokio::test]
async fn concurrency_cap_is_never_exceeded() {
    const CAP: usize = 3;
    let config = HubConfig::default()
        .with_max_concurrent(CAP)
        .with_backpressure(Duration::from_millis(5));
    let hub = Arc::new(Hub::new(config));
    hub.add_middleware("slow", Arc::new(Slow(Duration::from_millis(40))));
    hub.add_routing_rule(RoutingRule::default().with_middleware(["slow"]));
    hub.register(tagged("b", "b")).await;

    let handles: Vec<_> = (0..=CAP)
        .map(|n| {
            let hub = Arc::clone(&hub);
            tokio::spawn(async move {
                hub.send(Message::request("a", "b", serde_json::json!(n))).await
            })
        })
        .collect();

    for handle in handles {
        assert!(handle.await.unwrap(), "backpressure must delay, not reject");
    }

    let stats = hub.stats().await;
    assert!(stats.peak_active_messages <= CAP);
    assert!(stats.peak_active_messages >= 2);
    assert_eq!(stats.active_messages, 0);
    assert_eq!(stats.successful_deliveries, (CAP + 1) as u64);
    assert_eq!(hub.queue_len("b").await, CAP + 1);
}

// ---------------------------------------------------------------------------
// 5. Background loop
// ---------------------------------------------------------------------------

#[tokio::test]
async fn background_loop_chains_responses() {
    let seen = Arc::new(AtomicUsize::new(0));
    let hub = Arc::new(Hub::new(
        HubConfig::default().with_poll_tick(Duration::from_millis(10)),
    ));
    hub.add_routing_rule(RoutingRule::default().with_middleware(["validation"]));
    hub.register(tagged("ping", "pong")).await;
    hub.register(Arc::new(Counter {
        name: "pong",
        seen: Arc::clone(&seen),
    }))
    .await;

    // The reply from "ping" is addressed back to "pong" and re-sent by the loop.
    assert!(hub.send(Message::request("pong", "ping", serde_json::json!({}))).await);

    hub.start();
    assert!(hub.is_running());

    let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
    while seen.load(Ordering::SeqCst) == 0 && tokio::time::Instant::now() < deadline {
        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    hub.stop().await;
    assert!(!hub.is_running());
    assert_eq!(seen.load(Ordering::SeqCst), 1);

    let stats = hub.stats().await;
    assert_eq!(stats.communication_matrix["pong"]["ping"], 1);
    assert_eq!(stats.communication_matrix["ping"]["pong"], 1);
    assert_eq!(stats.message_types[&MessageType::Response], 1);
}

#[tokio::test]
async fn stop_without_start_is_noop() {
    let hub = Hub::with_defaults();
    hub.stop().await;
    assert!(!hub.is_running());
}

#[tokio::test]
async fn shutdown_clears_everything() {
    let hub = Arc::new(Hub::with_defaults());
    hub.register(tagged("b", "b")).await;
    assert!(hub.send(Message::request("a", "b", serde_json::json!(1))).await);
    hub.start();

    hub.shutdown().await;
    assert!(!hub.is_running());
    assert!(hub.agent_names().is_empty());
    assert!(hub.stats().await.queue_status.is_empty());
}

// ---------------------------------------------------------------------------
// 6. Stats and history
// ---------------------------------------------------------------------------

#[tokio::test]
async fn stats_and_history_track_every_send() {
    let hub = Hub::with_defaults();
    hub.register(tagged("b", "b")).await;

    assert!(hub.send(Message::request("a", "b", serde_json::json!(1))).await);
    assert!(hub.send(Message::notification("a", "b", serde_json::json!(2))).await);
    assert!(!hub.send(Message::request("a", "ghost", serde_json::json!(3))).await);

    let stats = hub.stats().await;
    assert_eq!(stats.total_messages, 3);
    assert_eq!(stats.successful_deliveries, 2);
    assert!((stats.success_rate - 200.0 / 3.0).abs() < 1e-6);
    assert_eq!(stats.message_types[&MessageType::Request], 2);
    assert_eq!(stats.message_types[&MessageType::Notification], 1);
    assert_eq!(stats.queue_status["b"], 2);

    let history = hub.history(10);
    assert_eq!(history.len(), 3);
    assert_eq!(history[2].receiver, "ghost");
    assert_eq!(hub.history(1).len(), 1);
}
