//! Per-tenant MQTT client runner
//!
//! Owns one broker connection per tenant and drives its lifecycle:
//! connect, fixed-delay reconnect, subscribe bookkeeping, and forwarding of
//! received messages to the backend webhook.
//!
//! The runner executes as a dedicated tokio task. Broker events and
//! control-plane commands are drained by a single `select!` loop, so all
//! registry mutation happens on one logical thread of control — the
//! control-plane only observes the runner through its shared atomic flags
//! and the bounded command channel of its [`RunnerHandle`].
//!
//! State machine: Idle → Connecting → Connected → Disconnected →
//! Connecting (after a fixed pause) → … → Stopped (terminal). A rejected
//! connect attempt keeps the loop retrying; only an explicit stop request
//! terminates it.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use rumqttc::{
    AsyncClient, ConnAck, ConnectReturnCode, ConnectionError, Event, EventLoop, MqttOptions,
    Packet, Publish, QoS, SubAck, SubscribeReasonCode, UnsubAck,
};
use tokio::sync::{mpsc, oneshot, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::error::BridgeError;
use crate::forward::{BackendClient, DeliveryOutcome};
use crate::registry::SubscriptionRegistry;
use crate::tenant::{RunnerStatus, Subscription, TenantConfig};
use crate::util;

/// Fixed pause between reconnect attempts. A deliberately minimal policy:
/// the interval is constant, not exponential.
pub const RECONNECT_DELAY: Duration = Duration::from_secs(1);

/// Keep-alive interval for the broker connection.
const KEEP_ALIVE: Duration = Duration::from_secs(30);

/// Bound on the graceful disconnect during shutdown.
const DISCONNECT_TIMEOUT: Duration = Duration::from_secs(2);

/// Bound on waiting for the runner task to exit after a stop request.
const STOP_TIMEOUT: Duration = Duration::from_secs(5);

/// Bound on a command round-trip to the runner task.
const COMMAND_TIMEOUT: Duration = Duration::from_secs(5);

/// Poll interval while waiting for the runner loop to report running.
const STARTUP_POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Capacity of the rumqttc request channel.
const EVENT_CHANNEL_CAPACITY: usize = 256;

/// Capacity of the control-plane command channel.
const COMMAND_CHANNEL_CAPACITY: usize = 32;

/// QoS used for all bridge subscriptions.
const SUBSCRIBE_QOS: QoS = QoS::AtMostOnce;

/// Control-plane requests funneled into the runner's event loop.
enum RunnerCommand {
    AddSubscription {
        subscription: Subscription,
        reply: oneshot::Sender<Result<Subscription, BridgeError>>,
    },
    RemoveSubscription {
        id: i64,
        reply: oneshot::Sender<Result<(), BridgeError>>,
    },
    Subscriptions {
        reply: oneshot::Sender<Vec<Subscription>>,
    },
    Stop,
}

/// Lifecycle flags shared between the runner task and its handle.
///
/// `connecting` and `connected` are mutually exclusive; both false means
/// the runner is between attempts (or stopped).
#[derive(Debug, Default)]
pub struct RunnerState {
    running: AtomicBool,
    connected: AtomicBool,
    connecting: AtomicBool,
}

impl RunnerState {
    /// Whether the runner loop is alive.
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Whether the broker connection is currently established.
    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    /// Whether a connect attempt is in flight.
    pub fn is_connecting(&self) -> bool {
        self.connecting.load(Ordering::SeqCst)
    }

    fn set_running(&self, value: bool) {
        self.running.store(value, Ordering::SeqCst);
    }

    fn set_connected(&self, value: bool) {
        self.connected.store(value, Ordering::SeqCst);
    }

    fn set_connecting(&self, value: bool) {
        self.connecting.store(value, Ordering::SeqCst);
    }
}

/// Control-plane handle to a running tenant client.
///
/// Cheap to share; owned by the supervisor table. All interaction with the
/// runner task goes through the command channel with a bounded wait, so a
/// wedged runner can not hang the control-plane.
pub struct RunnerHandle {
    config: TenantConfig,
    state: Arc<RunnerState>,
    started_at: DateTime<Utc>,
    cmd_tx: mpsc::Sender<RunnerCommand>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl RunnerHandle {
    /// Starts a new runner task for the given tenant and returns its handle.
    pub fn spawn(config: TenantConfig) -> Arc<RunnerHandle> {
        let (cmd_tx, cmd_rx) = mpsc::channel(COMMAND_CHANNEL_CAPACITY);
        let state = Arc::new(RunnerState::default());
        let runner = ClientRunner::new(config.clone(), Arc::clone(&state), cmd_rx);
        let task = tokio::spawn(runner.run());
        Arc::new(Self {
            config,
            state,
            started_at: Utc::now(),
            cmd_tx,
            task: Mutex::new(Some(task)),
        })
    }

    /// The tenant configuration this runner was started with.
    pub fn config(&self) -> &TenantConfig {
        &self.config
    }

    /// Snapshot of the runner's lifecycle state.
    pub fn status(&self) -> RunnerStatus {
        RunnerStatus {
            tenant_id: self.config.tenant_id,
            running: self.state.is_running(),
            connected: self.state.is_connected(),
            started_at: self.started_at,
        }
    }

    /// Waits until the runner loop reports running, up to `timeout`.
    /// Returns false if the deadline passed first.
    pub async fn wait_running(&self, timeout: Duration) -> bool {
        let deadline = tokio::time::Instant::now() + timeout;
        while !self.state.is_running() {
            if tokio::time::Instant::now() >= deadline {
                return false;
            }
            tokio::time::sleep(STARTUP_POLL_INTERVAL).await;
        }
        true
    }

    /// Requests a new subscription on this tenant's connection.
    ///
    /// # Errors
    ///
    /// - [`BridgeError::BrokerRejected`] when the connection is down or the
    ///   client refuses the subscribe request; the subscription is discarded.
    /// - [`BridgeError::RunnerUnavailable`] when the runner does not answer
    ///   within the bounded wait.
    pub async fn add_subscription(
        &self,
        subscription: Subscription,
    ) -> Result<Subscription, BridgeError> {
        let (reply, rx) = oneshot::channel();
        self.send_command(RunnerCommand::AddSubscription { subscription, reply })
            .await?;
        self.await_reply(rx).await?
    }

    /// Removes a subscription and issues the matching unsubscribe.
    ///
    /// # Errors
    ///
    /// - [`BridgeError::SubscriptionNotFound`] when the id is unknown.
    /// - [`BridgeError::RunnerUnavailable`] on command timeout.
    pub async fn remove_subscription(&self, id: i64) -> Result<(), BridgeError> {
        let (reply, rx) = oneshot::channel();
        self.send_command(RunnerCommand::RemoveSubscription { id, reply })
            .await?;
        self.await_reply(rx).await?
    }

    /// Snapshot of the tenant's subscription registry.
    pub async fn subscriptions(&self) -> Result<Vec<Subscription>, BridgeError> {
        let (reply, rx) = oneshot::channel();
        self.send_command(RunnerCommand::Subscriptions { reply })
            .await?;
        self.await_reply(rx).await
    }

    /// Signals the runner to stop and waits for the task to exit.
    ///
    /// The wait is bounded by [`STOP_TIMEOUT`]; a task that fails to exit
    /// in time is aborted. Afterwards the status flags read stopped either
    /// way.
    pub async fn stop(&self) {
        // try_send: a wedged runner must not block the stop path; the join
        // timeout below covers it.
        let _ = self.cmd_tx.try_send(RunnerCommand::Stop);
        if let Some(task) = self.task.lock().await.take() {
            let abort = task.abort_handle();
            if tokio::time::timeout(STOP_TIMEOUT, task).await.is_err() {
                warn!(
                    tenant = self.config.tenant_id,
                    "runner did not exit within stop timeout, aborting task"
                );
                abort.abort();
            }
        }
        self.state.set_running(false);
        self.state.set_connected(false);
        self.state.set_connecting(false);
    }

    async fn send_command(&self, command: RunnerCommand) -> Result<(), BridgeError> {
        self.cmd_tx
            .send(command)
            .await
            .map_err(|_| BridgeError::RunnerUnavailable(self.config.tenant_id))
    }

    async fn await_reply<T>(&self, rx: oneshot::Receiver<T>) -> Result<T, BridgeError> {
        match tokio::time::timeout(COMMAND_TIMEOUT, rx).await {
            Ok(Ok(value)) => Ok(value),
            _ => Err(BridgeError::RunnerUnavailable(self.config.tenant_id)),
        }
    }
}

/// The runner task itself. Exclusive owner of the event loop and the
/// subscription registry.
struct ClientRunner {
    config: TenantConfig,
    state: Arc<RunnerState>,
    cmd_rx: mpsc::Receiver<RunnerCommand>,
    registry: SubscriptionRegistry,
    backend: BackendClient,
    /// Whether the configured subscription list has been loaded into the
    /// registry yet; happens on the first successful connect.
    seeded: bool,
}

impl ClientRunner {
    fn new(
        config: TenantConfig,
        state: Arc<RunnerState>,
        cmd_rx: mpsc::Receiver<RunnerCommand>,
    ) -> Self {
        Self {
            config,
            state,
            cmd_rx,
            registry: SubscriptionRegistry::new(),
            backend: BackendClient::new(),
            seeded: false,
        }
    }

    async fn run(mut self) {
        let (client, mut eventloop) = self.make_client();
        self.state.set_running(true);
        self.state.set_connecting(true);
        info!(
            tenant = self.config.tenant_id,
            host = %self.config.mqtt_host,
            port = self.config.mqtt_port,
            "starting MQTT client runner"
        );

        loop {
            tokio::select! {
                cmd = self.cmd_rx.recv() => {
                    let stop = match cmd {
                        Some(cmd) => self.handle_command(&client, cmd),
                        None => true,
                    };
                    if stop {
                        break;
                    }
                }
                event = eventloop.poll() => {
                    match event {
                        Ok(event) => self.handle_event(&client, event).await,
                        Err(err) => {
                            self.on_connection_error(&err);
                            if self.pause_before_reconnect(&client).await {
                                break;
                            }
                            self.state.set_connecting(true);
                        }
                    }
                }
            }
        }

        self.shutdown(&client).await;
    }

    fn make_client(&self) -> (AsyncClient, EventLoop) {
        let client_id = util::generate_client_id(self.config.tenant_id);
        let mut options = MqttOptions::new(
            client_id,
            self.config.mqtt_host.clone(),
            self.config.mqtt_port,
        );
        options.set_keep_alive(KEEP_ALIVE);
        if let (Some(username), Some(password)) =
            (&self.config.mqtt_username, &self.config.mqtt_password)
        {
            options.set_credentials(username.clone(), password.clone());
        }
        AsyncClient::new(options, EVENT_CHANNEL_CAPACITY)
    }

    /// Pauses for the fixed reconnect delay while still serving commands,
    /// so stop latency stays bounded by the retry granularity.
    /// Returns true when a stop request arrived during the pause.
    async fn pause_before_reconnect(&mut self, client: &AsyncClient) -> bool {
        let sleep = tokio::time::sleep(RECONNECT_DELAY);
        tokio::pin!(sleep);
        loop {
            tokio::select! {
                _ = &mut sleep => return false,
                cmd = self.cmd_rx.recv() => {
                    let stop = match cmd {
                        Some(cmd) => self.handle_command(client, cmd),
                        None => true,
                    };
                    if stop {
                        return true;
                    }
                }
            }
        }
    }

    /// Returns true when the command requests a stop.
    fn handle_command(&mut self, client: &AsyncClient, command: RunnerCommand) -> bool {
        match command {
            RunnerCommand::AddSubscription { subscription, reply } => {
                let _ = reply.send(self.add_subscription(client, subscription));
                false
            }
            RunnerCommand::RemoveSubscription { id, reply } => {
                let _ = reply.send(self.remove_subscription(client, id));
                false
            }
            RunnerCommand::Subscriptions { reply } => {
                let _ = reply.send(self.registry.snapshot());
                false
            }
            RunnerCommand::Stop => true,
        }
    }

    async fn handle_event(&mut self, client: &AsyncClient, event: Event) {
        match event {
            Event::Incoming(Packet::ConnAck(ack)) => self.on_connect(client, &ack),
            Event::Incoming(Packet::Publish(publish)) => self.on_message(&publish).await,
            Event::Incoming(Packet::SubAck(ack)) => self.on_subscribe_ack(&ack),
            Event::Incoming(Packet::UnsubAck(ack)) => self.on_unsubscribe_ack(&ack),
            _ => {}
        }
    }

    fn on_connect(&mut self, client: &AsyncClient, ack: &ConnAck) {
        self.state.set_connecting(false);
        if ack.code != ConnectReturnCode::Success {
            warn!(
                tenant = self.config.tenant_id,
                code = ?ack.code,
                "broker refused connection"
            );
            return;
        }
        info!(tenant = self.config.tenant_id, "connected to MQTT broker");
        self.state.set_connected(true);

        if !self.seeded {
            for mut subscription in self.config.subscriptions.clone() {
                subscription.tenant_id = self.config.tenant_id;
                self.registry.insert_pending(subscription);
            }
            self.seeded = true;
        }

        // Acknowledgments from a previous connection will never arrive.
        self.registry.reset_pending();

        // (Re-)subscribe everything currently registered. Idempotent:
        // inserting by id replaces, so repeat connects do not duplicate.
        for subscription in self.registry.snapshot() {
            match client.try_subscribe(subscription.topic.as_str(), SUBSCRIBE_QOS) {
                Ok(()) => self.registry.mark_pending(subscription.id),
                Err(err) => warn!(
                    tenant = self.config.tenant_id,
                    subscription = subscription.id,
                    topic = %subscription.topic,
                    error = %err,
                    "failed to issue subscribe"
                ),
            }
        }
    }

    fn on_connection_error(&mut self, err: &ConnectionError) {
        let was_connected = self.state.is_connected();
        self.state.set_connected(false);
        self.state.set_connecting(false);
        match err {
            ConnectionError::ConnectionRefused(code) => warn!(
                tenant = self.config.tenant_id,
                code = ?code,
                "broker rejected connection"
            ),
            other if was_connected => warn!(
                tenant = self.config.tenant_id,
                error = %other,
                "disconnected from broker"
            ),
            other => debug!(
                tenant = self.config.tenant_id,
                error = %other,
                "connect attempt failed"
            ),
        }
    }

    async fn on_message(&self, publish: &Publish) {
        debug!(
            tenant = self.config.tenant_id,
            topic = %publish.topic,
            payload = %util::format_payload_preview(&publish.payload),
            "message received"
        );
        let matched = self.registry.subscriptions_for_topic(&publish.topic);
        if matched.is_empty() {
            debug!(
                tenant = self.config.tenant_id,
                topic = %publish.topic,
                "no subscription matches topic"
            );
            return;
        }
        // One forwarding call per matching subscription; a failure for one
        // must not affect the others.
        for subscription in matched {
            let outcome = self
                .backend
                .forward(
                    &self.config.backend_url,
                    subscription.id,
                    &self.config.backend_token,
                    &publish.payload,
                )
                .await;
            match outcome {
                DeliveryOutcome::Delivered => debug!(
                    tenant = self.config.tenant_id,
                    subscription = subscription.id,
                    "message forwarded"
                ),
                outcome => warn!(
                    tenant = self.config.tenant_id,
                    subscription = subscription.id,
                    %outcome,
                    "message not delivered"
                ),
            }
        }
    }

    fn on_subscribe_ack(&mut self, ack: &SubAck) {
        let accepted = ack
            .return_codes
            .iter()
            .all(|code| matches!(code, SubscribeReasonCode::Success(_)));
        match self.registry.resolve_subscribe(ack.pkid, accepted) {
            Ok(subscription) if accepted => info!(
                tenant = self.config.tenant_id,
                subscription = subscription.id,
                topic = %subscription.topic,
                ack = ack.pkid,
                "subscription acknowledged"
            ),
            Ok(subscription) => warn!(
                tenant = self.config.tenant_id,
                subscription = subscription.id,
                topic = %subscription.topic,
                "broker rejected subscription, entry discarded"
            ),
            Err(err) => warn!(
                tenant = self.config.tenant_id,
                error = %err,
                "ignoring subscribe acknowledgment"
            ),
        }
    }

    fn on_unsubscribe_ack(&mut self, ack: &UnsubAck) {
        match self.registry.resolve_unsubscribe(ack.pkid) {
            Ok((id, topic)) => info!(
                tenant = self.config.tenant_id,
                subscription = id,
                topic = %topic,
                "unsubscribe acknowledged"
            ),
            Err(err) => warn!(
                tenant = self.config.tenant_id,
                error = %err,
                "ignoring unsubscribe acknowledgment"
            ),
        }
    }

    fn add_subscription(
        &mut self,
        client: &AsyncClient,
        mut subscription: Subscription,
    ) -> Result<Subscription, BridgeError> {
        subscription.tenant_id = self.config.tenant_id;
        if !self.state.is_connected() {
            return Err(BridgeError::BrokerRejected(
                "not connected to broker".to_string(),
            ));
        }
        info!(
            tenant = self.config.tenant_id,
            subscription = subscription.id,
            topic = %subscription.topic,
            "adding subscription"
        );
        if let Err(err) = client.try_subscribe(subscription.topic.as_str(), SUBSCRIBE_QOS) {
            warn!(
                tenant = self.config.tenant_id,
                subscription = subscription.id,
                error = %err,
                "subscribe request rejected"
            );
            return Err(BridgeError::BrokerRejected(err.to_string()));
        }
        subscription.ack = None;
        subscription.active = false;
        self.registry.insert_pending(subscription.clone());
        Ok(subscription)
    }

    fn remove_subscription(&mut self, client: &AsyncClient, id: i64) -> Result<(), BridgeError> {
        let subscription = self.registry.remove(id)?;
        info!(
            tenant = self.config.tenant_id,
            subscription = id,
            topic = %subscription.topic,
            "removing subscription"
        );
        // A clean session holds no broker-side state while disconnected;
        // the entry is simply not re-subscribed on the next connect.
        if self.state.is_connected() {
            match client.try_unsubscribe(subscription.topic.as_str()) {
                Ok(()) => self
                    .registry
                    .push_pending_unsubscribe(id, subscription.topic.clone()),
                Err(err) => warn!(
                    tenant = self.config.tenant_id,
                    subscription = id,
                    error = %err,
                    "failed to issue unsubscribe"
                ),
            }
        }
        Ok(())
    }

    async fn shutdown(&self, client: &AsyncClient) {
        info!(tenant = self.config.tenant_id, "stopping MQTT client runner");
        let _ = tokio::time::timeout(DISCONNECT_TIMEOUT, client.disconnect()).await;
        self.state.set_connected(false);
        self.state.set_connecting(false);
        self.state.set_running(false);
    }
}
