use crate::config::HubConfig;
use crate::middleware::{builtin_middleware, Middleware};
use crate::queue::PriorityQueue;
use crate::routing::{find_rule, id_hash, RoutingRule, RoutingStrategy};
use crate::stats::{CommunicationStats, HistoryEntry, MessageHistory, StatsSnapshot};
use chrono::Utc;
use parking_lot::{Mutex, RwLock};
use querymesh_core::{Agent, AgentStatus, Message, MessageType, QuerymeshError, QuerymeshResult};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

struct AgentEntry {
    agent: Arc<dyn Agent>,
    status: AgentStatus,
}

#[derive(Default)]
struct ActiveSet {
    ids: HashMap<Uuid, usize>,
    count: usize,
    peak: usize,
}

struct LoopHandle {
    stop_tx: watch::Sender<bool>,
    handle: JoinHandle<()>,
}

/// Releases a concurrency slot when the send finishes or is cancelled.
struct ActiveGuard<'a> {
    hub: &'a Hub,
    id: Uuid,
}

impl Drop for ActiveGuard<'_> {
    fn drop(&mut self) {
        let mut active = self.hub.active.lock();
        if let Some(n) = active.ids.get_mut(&self.id) {
            *n -= 1;
            if *n == 0 {
                active.ids.remove(&self.id);
            }
            active.count = active.count.saturating_sub(1);
        }
    }
}

/// In-process message routing substrate.
///
/// Owns the agent registry, one bounded priority queue per agent, the routing
/// rules and middleware, delivery statistics, and an optional background loop
/// that drains queues into agents. All queues sit behind one lock.
pub struct Hub {
    config: HubConfig,
    registry: RwLock<BTreeMap<String, AgentEntry>>,
    queues: tokio::sync::Mutex<HashMap<String, PriorityQueue>>,
    rules: RwLock<Vec<RoutingRule>>,
    middleware: RwLock<HashMap<String, Arc<dyn Middleware>>>,
    stats: Mutex<CommunicationStats>,
    history: Mutex<MessageHistory>,
    active: Mutex<ActiveSet>,
    runner: Mutex<Option<LoopHandle>>,
}

impl Hub {
    /// A hub with the built-in middleware and no explicit routing rules.
    pub fn new(config: HubConfig) -> Self {
        let middleware = builtin_middleware()
            .into_iter()
            .map(|(name, mw)| (name.to_string(), mw))
            .collect();
        Self {
            history: Mutex::new(MessageHistory::new(config.history_capacity)),
            config,
            registry: RwLock::new(BTreeMap::new()),
            queues: tokio::sync::Mutex::new(HashMap::new()),
            rules: RwLock::new(Vec::new()),
            middleware: RwLock::new(middleware),
            stats: Mutex::new(CommunicationStats::default()),
            active: Mutex::new(ActiveSet::default()),
            runner: Mutex::new(None),
        }
    }

    /// Concurrency cap 100 with a match-all direct rule running validation and logging.
    pub fn with_defaults() -> Self {
        let hub = Self::new(HubConfig::default());
        hub.add_routing_rule(RoutingRule::default().with_middleware(["validation", "logging"]));
        hub
    }

    /// Concurrency cap 500 with a match-all direct rule running validation only.
    pub fn high_performance() -> Self {
        let hub = Self::new(HubConfig::default().with_max_concurrent(500));
        hub.add_routing_rule(RoutingRule::default().with_middleware(["validation"]));
        hub
    }

    /// Active configuration.
    pub fn config(&self) -> &HubConfig {
        &self.config
    }

    // ------------------------------------------------------------------
    // Registry
    // ------------------------------------------------------------------

    /// Register an agent under its name, replacing any previous registration.
    pub async fn register(&self, agent: Arc<dyn Agent>) {
        let name = agent.name().to_string();
        let replaced = self
            .registry
            .write()
            .insert(
                name.clone(),
                AgentEntry {
                    agent,
                    status: AgentStatus::Idle,
                },
            )
            .is_some();

        self.queues
            .lock()
            .await
            .entry(name.clone())
            .or_insert_with(|| PriorityQueue::new(self.config.queue_capacity));

        if replaced {
            info!(agent = %name, "Agent re-registered");
        } else {
            info!(agent = %name, "Agent registered");
        }
    }

    /// Remove an agent and drop its queue. Returns whether it was registered.
    pub async fn unregister(&self, name: &str) -> bool {
        let removed = self.registry.write().remove(name).is_some();
        if let Some(queue) = self.queues.lock().await.remove(name) {
            if !queue.is_empty() {
                warn!(agent = %name, dropped = queue.len(), "Dropping queued messages");
            }
        }
        if removed {
            info!(agent = %name, "Agent unregistered");
        }
        removed
    }

    /// Whether an agent named `name` is registered.
    pub fn is_registered(&self, name: &str) -> bool {
        self.registry.read().contains_key(name)
    }

    /// Registered agent names in sorted order.
    pub fn agent_names(&self) -> Vec<String> {
        self.registry.read().keys().cloned().collect()
    }

    /// Status of a registered agent.
    pub fn agent_status(&self, name: &str) -> Option<AgentStatus> {
        self.registry.read().get(name).map(|entry| entry.status)
    }

    fn agent(&self, name: &str) -> Option<Arc<dyn Agent>> {
        self.registry
            .read()
            .get(name)
            .map(|entry| Arc::clone(&entry.agent))
    }

    fn set_status(&self, name: &str, status: AgentStatus) {
        if let Some(entry) = self.registry.write().get_mut(name) {
            entry.status = status;
        }
    }

    // ------------------------------------------------------------------
    // Configuration
    // ------------------------------------------------------------------

    /// Append a routing rule. Earlier rules take precedence.
    pub fn add_routing_rule(&self, rule: RoutingRule) {
        debug!(
            sender = %rule.sender_pattern,
            receiver = %rule.receiver_pattern,
            strategy = ?rule.strategy,
            "Routing rule added"
        );
        self.rules.write().push(rule);
    }

    /// Register or replace a named middleware.
    pub fn add_middleware(&self, name: impl Into<String>, middleware: Arc<dyn Middleware>) {
        self.middleware.write().insert(name.into(), middleware);
    }

    fn rule_for(&self, message: &Message) -> RoutingRule {
        find_rule(&self.rules.read(), message)
    }

    // ------------------------------------------------------------------
    // Send / receive
    // ------------------------------------------------------------------

    /// Route a message to its receiver's queue.
    ///
    /// Waits while the concurrency cap is reached. Never fails loudly: every
    /// outcome is recorded and reported as `true` (delivered) or `false`.
    pub async fn send(&self, message: Message) -> bool {
        let _slot = self.acquire_slot(message.id).await;
        let started = Instant::now();
        let id = message.id;
        let sender = message.sender.clone();
        let receiver = message.receiver.clone();
        let message_type = message.message_type;

        let rule = self.rule_for(&message);
        let result = match tokio::time::timeout(rule.timeout, self.route(message, &rule)).await {
            Ok(result) => result,
            Err(_) => Err(QuerymeshError::Timeout {
                agent: receiver.clone(),
                after_ms: rule.timeout.as_millis() as u64,
            }),
        };

        let success = match result {
            Ok(()) => true,
            Err(e) => {
                warn!(message_id = %id, sender = %sender, receiver = %receiver, error = %e, "Send failed");
                false
            }
        };
        self.record(id, &sender, &receiver, message_type, success, started.elapsed());
        success
    }

    /// Take the next message from an agent's queue.
    pub async fn receive(&self, agent_name: &str) -> Option<Message> {
        self.queues.lock().await.get_mut(agent_name)?.dequeue()
    }

    /// Number of messages waiting for an agent.
    pub async fn queue_len(&self, agent_name: &str) -> usize {
        self.queues
            .lock()
            .await
            .get(agent_name)
            .map_or(0, PriorityQueue::len)
    }

    /// Deliver a request straight to its receiver and wait for the reply.
    ///
    /// Runs the matched rule's middleware, then the agent, under the message
    /// timeout or else the rule timeout. Every fault comes back as `Err`.
    pub async fn dispatch(&self, message: Message) -> QuerymeshResult<Message> {
        let _slot = self.acquire_slot(message.id).await;
        let started = Instant::now();
        let id = message.id;
        let sender = message.sender.clone();
        let receiver = message.receiver.clone();
        let message_type = message.message_type;

        let rule = self.rule_for(&message);
        let budget = message.timeout.unwrap_or(rule.timeout);
        let result = match tokio::time::timeout(budget, self.dispatch_inner(message, &rule)).await {
            Ok(result) => result,
            Err(_) => {
                self.set_status(&receiver, AgentStatus::Error);
                Err(QuerymeshError::Timeout {
                    agent: receiver.clone(),
                    after_ms: budget.as_millis() as u64,
                })
            }
        };

        if let Err(e) = &result {
            warn!(message_id = %id, receiver = %receiver, error = %e, "Dispatch failed");
        }
        self.record(id, &sender, &receiver, message_type, result.is_ok(), started.elapsed());
        result
    }

    async fn dispatch_inner(&self, message: Message, rule: &RoutingRule) -> QuerymeshResult<Message> {
        let message = self.run_middleware(message, rule).await?;
        let name = message.receiver.clone();
        let agent = self
            .agent(&name)
            .ok_or_else(|| QuerymeshError::AgentNotFound(name.clone()))?;

        self.set_status(&name, AgentStatus::Processing);
        match agent.process(message).await {
            Ok(Some(reply)) => {
                self.set_status(&name, AgentStatus::Idle);
                Ok(reply)
            }
            Ok(None) => {
                self.set_status(&name, AgentStatus::Idle);
                Err(QuerymeshError::Agent(format!("{name} returned no reply")))
            }
            Err(e) => {
                self.set_status(&name, AgentStatus::Error);
                Err(e)
            }
        }
    }

    async fn acquire_slot(&self, id: Uuid) -> ActiveGuard<'_> {
        let cap = self.config.max_concurrent_messages.max(1);
        loop {
            {
                let mut active = self.active.lock();
                if active.count < cap {
                    *active.ids.entry(id).or_insert(0) += 1;
                    active.count += 1;
                    active.peak = active.peak.max(active.count);
                    break;
                }
            }
            debug!(message_id = %id, cap, "Concurrency cap reached, pausing");
            tokio::time::sleep(self.config.backpressure()).await;
        }
        ActiveGuard { hub: self, id }
    }

    async fn run_middleware(&self, mut message: Message, rule: &RoutingRule) -> QuerymeshResult<Message> {
        for name in rule.middleware_chain() {
            let middleware = self.middleware.read().get(name).cloned();
            match middleware {
                Some(mw) => message = mw.process(message, rule).await?,
                None => warn!(middleware = %name, "Unknown middleware, skipping"),
            }
        }
        Ok(message)
    }

    async fn route(&self, message: Message, rule: &RoutingRule) -> QuerymeshResult<()> {
        let mut message = self.run_middleware(message, rule).await?;
        match rule.strategy {
            RoutingStrategy::Direct => self.enqueue(message).await,
            RoutingStrategy::Broadcast => self.broadcast(message).await,
            RoutingStrategy::RoundRobin => {
                let eligible = self.eligible_receivers(&message.sender)?;
                let pick = (id_hash(&message.id) % eligible.len() as u64) as usize;
                message.receiver = eligible[pick].clone();
                self.enqueue(message).await
            }
            RoutingStrategy::LoadBalanced => {
                let eligible = self.eligible_receivers(&message.sender)?;
                let target = {
                    let queues = self.queues.lock().await;
                    eligible
                        .iter()
                        .min_by_key(|name| queues.get(name.as_str()).map_or(0, PriorityQueue::len))
                        .cloned()
                };
                message.receiver = target
                    .ok_or_else(|| QuerymeshError::Delivery("no eligible receiver".to_string()))?;
                self.enqueue(message).await
            }
        }
    }

    fn eligible_receivers(&self, sender: &str) -> QuerymeshResult<Vec<String>> {
        let eligible: Vec<String> = self
            .registry
            .read()
            .keys()
            .filter(|name| name.as_str() != sender)
            .cloned()
            .collect();
        if eligible.is_empty() {
            return Err(QuerymeshError::Delivery("no eligible receiver".to_string()));
        }
        Ok(eligible)
    }

    async fn broadcast(&self, message: Message) -> QuerymeshResult<()> {
        let recipients = self.eligible_receivers(&message.sender)?;
        let mut delivered = 0usize;
        for name in recipients {
            match self.enqueue(message.fork_to(name.clone())).await {
                Ok(()) => delivered += 1,
                Err(e) => warn!(receiver = %name, error = %e, "Broadcast copy not delivered"),
            }
        }
        if delivered == 0 {
            return Err(QuerymeshError::Delivery("broadcast reached no agent".to_string()));
        }
        debug!(message_id = %message.id, delivered, "Broadcast delivered");
        Ok(())
    }

    async fn enqueue(&self, message: Message) -> QuerymeshResult<()> {
        if !self.is_registered(&message.receiver) {
            return Err(QuerymeshError::AgentNotFound(message.receiver.clone()));
        }
        let evicted = {
            let mut queues = self.queues.lock().await;
            queues
                .entry(message.receiver.clone())
                .or_insert_with(|| PriorityQueue::new(self.config.queue_capacity))
                .enqueue(message)
        };
        if let Some(evicted) = evicted {
            self.record_eviction(evicted);
        }
        Ok(())
    }

    fn record_eviction(&self, evicted: Message) {
        warn!(
            message_id = %evicted.id,
            receiver = %evicted.receiver,
            "Queue full, evicted oldest message"
        );
        self.stats.lock().evicted += 1;
        self.history.lock().push(HistoryEntry {
            message_id: evicted.id,
            sender: evicted.sender,
            receiver: evicted.receiver,
            message_type: evicted.message_type,
            timestamp: Utc::now(),
            success: false,
            latency_ms: 0,
        });
    }

    fn record(
        &self,
        id: Uuid,
        sender: &str,
        receiver: &str,
        message_type: MessageType,
        success: bool,
        latency: Duration,
    ) {
        self.stats
            .lock()
            .record(success, latency, message_type, sender, receiver);
        self.history.lock().push(HistoryEntry {
            message_id: id,
            sender: sender.to_string(),
            receiver: receiver.to_string(),
            message_type,
            timestamp: Utc::now(),
            success,
            latency_ms: latency.as_millis() as u64,
        });
    }

    // ------------------------------------------------------------------
    // Background loop
    // ------------------------------------------------------------------

    /// Start the background dispatch loop. No-op when already running.
    pub fn start(self: &Arc<Self>) {
        let mut runner = self.runner.lock();
        if runner.is_some() {
            warn!("Hub dispatch loop already running");
            return;
        }
        let (stop_tx, stop_rx) = watch::channel(false);
        let hub = Arc::clone(self);
        let handle = tokio::spawn(async move { hub.run_loop(stop_rx).await });
        *runner = Some(LoopHandle { stop_tx, handle });
    }

    /// Signal the loop to stop and wait for it to exit.
    pub async fn stop(&self) {
        let runner = self.runner.lock().take();
        if let Some(LoopHandle { stop_tx, handle }) = runner {
            let _ = stop_tx.send(true);
            if let Err(e) = handle.await {
                error!(error = %e, "Hub dispatch loop ended abnormally");
            }
        }
    }

    /// Whether the background loop is running.
    pub fn is_running(&self) -> bool {
        self.runner.lock().is_some()
    }

    /// Stop the loop and forget every agent, queued message, and in-flight send.
    pub async fn shutdown(&self) {
        self.stop().await;
        self.registry.write().clear();
        self.queues.lock().await.clear();
        let mut active = self.active.lock();
        active.ids.clear();
        active.count = 0;
        info!("Hub shut down");
    }

    async fn run_loop(self: Arc<Self>, mut stop_rx: watch::Receiver<bool>) {
        let mut ticker = tokio::time::interval(self.config.poll_tick());
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        info!(tick_ms = self.config.poll_tick_ms, "Hub dispatch loop started");

        loop {
            tokio::select! {
                _ = ticker.tick() => self.poll_once().await,
                changed = stop_rx.changed() => {
                    if changed.is_err() || *stop_rx.borrow() {
                        break;
                    }
                }
            }
        }

        info!("Hub dispatch loop stopped");
    }

    /// Take at most one message from every queue and process each in its own task.
    async fn poll_once(self: &Arc<Self>) {
        let batch: Vec<Message> = {
            let mut queues = self.queues.lock().await;
            queues.values_mut().filter_map(PriorityQueue::dequeue).collect()
        };
        for message in batch {
            let hub = Arc::clone(self);
            tokio::spawn(async move { hub.process_queued(message).await });
        }
    }

    async fn process_queued(&self, message: Message) {
        let name = message.receiver.clone();
        let Some(agent) = self.agent(&name) else {
            warn!(agent = %name, message_id = %message.id, "Queued message for unknown agent");
            return;
        };

        self.set_status(&name, AgentStatus::Processing);
        match agent.process(message).await {
            Ok(Some(response)) => {
                self.set_status(&name, AgentStatus::Idle);
                self.send(response).await;
            }
            Ok(None) => self.set_status(&name, AgentStatus::Idle),
            Err(e) => {
                self.set_status(&name, AgentStatus::Error);
                error!(agent = %name, error = %e, "Agent failed to process message");
            }
        }
    }

    // ------------------------------------------------------------------
    // Observability
    // ------------------------------------------------------------------

    /// Counters, queue lengths and concurrency at this instant.
    pub async fn stats(&self) -> StatsSnapshot {
        let queue_status: BTreeMap<String, usize> = self
            .queues
            .lock()
            .await
            .iter()
            .map(|(name, queue)| (name.clone(), queue.len()))
            .collect();
        let (active_messages, peak_active_messages) = {
            let active = self.active.lock();
            (active.count, active.peak)
        };
        let stats = self.stats.lock().clone();

        StatsSnapshot {
            total_messages: stats.total_messages,
            successful_deliveries: stats.successful_deliveries,
            failed_deliveries: stats.failed_deliveries,
            success_rate: stats.success_rate(),
            average_latency_ms: stats.average_latency_ms,
            evicted: stats.evicted,
            message_types: stats.message_types,
            communication_matrix: stats.communication_matrix,
            queue_status,
            active_messages,
            peak_active_messages,
        }
    }

    /// The most recent `limit` delivery records, oldest first.
    pub fn history(&self, limit: usize) -> Vec<HistoryEntry> {
        self.history.lock().recent(limit)
    }
}

impl Default for Hub {
    fn default() -> Self {
        Self::with_defaults()
    }
}
