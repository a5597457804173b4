//! STOMP push channel.
//!
//! A [`PushChannel`] owns one background task that connects through a
//! [`Connector`], performs the STOMP handshake and then multiplexes transport
//! reads, outbound commands and heart-beats with `tokio::select!`. The handle
//! itself never blocks: [`subscribe`](PushChannel::subscribe),
//! [`publish`](PushChannel::publish) and [`disconnect`](PushChannel::disconnect)
//! enqueue work for the task, and everything the task observes comes back as a
//! [`ChannelEvent`].
//!
//! Use [`PushChannel::open`] with any connector, or the convenience method
//! [`connect`](PushChannel::connect) (WebSocket).

use std::collections::{BTreeMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicU8, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use geoparty_core::stomp::{Frame, HeartBeat, StompCommand};
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TryRecvError;
use tokio::time::{Instant, Interval, MissedTickBehavior};
use tracing::{debug, warn};

use crate::transport::{Connector, Preconnected, Transport, TransportReader, TransportWriter};

// ---------------------------------------------------------------------------
// Public types
// ---------------------------------------------------------------------------

/// Connection parameters that do not depend on the transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelConfig {
    /// Value of the `host` header in CONNECT.
    pub host: String,
    pub heart_beat: HeartBeat,
    /// Wait this long and reconnect after the connection drops. `None`
    /// disables reconnection.
    pub reconnect_delay: Option<Duration>,
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            heart_beat: HeartBeat::new(10_000, 10_000),
            reconnect_delay: None,
        }
    }
}

impl ChannelConfig {
    pub fn new(host: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            ..Default::default()
        }
    }

    pub fn with_heart_beat(mut self, heart_beat: HeartBeat) -> Self {
        self.heart_beat = heart_beat;
        self
    }

    pub fn with_reconnect_delay(mut self, delay: Option<Duration>) -> Self {
        self.reconnect_delay = delay;
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// Opening the transport or waiting for CONNECTED.
    Connecting,
    Connected,
    /// Disconnected for good. The background task has exited.
    Closed,
}

impl ConnectionState {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => ConnectionState::Connecting,
            1 => ConnectionState::Connected,
            _ => ConnectionState::Closed,
        }
    }

    fn as_u8(self) -> u8 {
        match self {
            ConnectionState::Connecting => 0,
            ConnectionState::Connected => 1,
            ConnectionState::Closed => 2,
        }
    }
}

/// Something the background task observed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChannelEvent {
    /// The server answered CONNECTED. Emitted again after every reconnect.
    Connected,
    /// A MESSAGE frame for an active subscription.
    Message { destination: String, body: String },
    /// A STOMP ERROR frame or a failed connection attempt.
    Error { message: String },
    /// The connection is gone. Every subscription has been forgotten.
    Disconnected { reason: Option<String> },
}

/// Returned by [`PushChannel::subscribe`]. Becomes inert once the connection
/// it was made on drops.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubscriptionHandle {
    id: u64,
    epoch: u64,
    destination: String,
}

impl SubscriptionHandle {
    /// STOMP subscription id, as sent in the `id` header.
    pub fn id(&self) -> String {
        subscription_id(self.id)
    }

    pub fn destination(&self) -> &str {
        &self.destination
    }
}

fn subscription_id(id: u64) -> String {
    format!("sub-{id}")
}

fn parse_subscription_id(raw: &str) -> Option<u64> {
    raw.strip_prefix("sub-")?.parse().ok()
}

// ---------------------------------------------------------------------------
// Shared state
// ---------------------------------------------------------------------------

/// Active subscriptions. The epoch changes whenever the connection drops, so
/// handles from an earlier connection can be recognised.
#[derive(Debug, Default)]
struct Registry {
    epoch: u64,
    routes: BTreeMap<u64, String>,
}

#[derive(Debug)]
struct Shared {
    state: AtomicU8,
    closing: AtomicBool,
    next_id: AtomicU64,
    registry: Mutex<Registry>,
}

impl Shared {
    fn new() -> Self {
        Self {
            state: AtomicU8::new(ConnectionState::Connecting.as_u8()),
            closing: AtomicBool::new(false),
            next_id: AtomicU64::new(0),
            registry: Mutex::new(Registry::default()),
        }
    }

    fn registry(&self) -> MutexGuard<'_, Registry> {
        self.registry.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn state(&self) -> ConnectionState {
        ConnectionState::from_u8(self.state.load(Ordering::Acquire))
    }

    fn set_state(&self, state: ConnectionState) {
        self.state.store(state.as_u8(), Ordering::Release);
    }

    fn destination_of(&self, id: u64) -> Option<String> {
        self.registry().routes.get(&id).cloned()
    }

    fn routes(&self) -> Vec<(u64, String)> {
        self.registry()
            .routes
            .iter()
            .map(|(id, dest)| (*id, dest.clone()))
            .collect()
    }

    /// Forget every subscription and start a new epoch.
    fn invalidate(&self) {
        let mut registry = self.registry();
        registry.epoch += 1;
        registry.routes.clear();
    }
}

enum LoopCommand {
    Subscribe { id: u64 },
    Unsubscribe { id: u64 },
    Send { destination: String, body: String },
    Disconnect,
}

// ---------------------------------------------------------------------------
// PushChannel
// ---------------------------------------------------------------------------

/// Handle to a STOMP session running in a background task.
///
/// Must be created inside a tokio runtime. Dropping the handle disconnects.
pub struct PushChannel {
    events: mpsc::UnboundedReceiver<ChannelEvent>,
    commands: mpsc::UnboundedSender<LoopCommand>,
    shared: Arc<Shared>,
    reconnects: bool,
}

impl PushChannel {
    /// Start connecting through `connector`. Returns immediately; watch for
    /// [`ChannelEvent::Connected`].
    pub fn open<C: Connector>(
        connector: C,
        auth_token: Option<String>,
        config: ChannelConfig,
    ) -> Self {
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
        let shared = Arc::new(Shared::new());
        let reconnects = config.reconnect_delay.is_some();

        tokio::spawn(run(
            connector,
            auth_token,
            config,
            cmd_rx,
            event_tx,
            Arc::clone(&shared),
        ));

        Self {
            events: event_rx,
            commands: cmd_tx,
            shared,
            reconnects,
        }
    }

    /// Run a session over an already-open transport. Never reconnects.
    pub fn from_transport<T: Transport>(
        transport: T,
        auth_token: Option<String>,
        config: ChannelConfig,
    ) -> Self {
        let config = ChannelConfig {
            reconnect_delay: None,
            ..config
        };
        Self::open(Preconnected::new(transport), auth_token, config)
    }

    /// Connect to a STOMP-over-WebSocket endpoint (`ws://` or `wss://`).
    #[cfg(feature = "native")]
    pub fn connect(endpoint: &str, auth_token: &str, config: ChannelConfig) -> Self {
        Self::open(
            crate::ws_transport::WsConnector::new(endpoint),
            Some(auth_token.to_string()),
            config,
        )
    }

    pub fn state(&self) -> ConnectionState {
        self.shared.state()
    }

    pub fn is_connected(&self) -> bool {
        !self.shared.closing.load(Ordering::Acquire)
            && self.shared.state() == ConnectionState::Connected
    }

    /// Whether a dropped connection will be re-established.
    pub fn will_reconnect(&self) -> bool {
        self.reconnects && !self.shared.closing.load(Ordering::Acquire)
    }

    /// Register a subscription. If the channel is not connected yet the
    /// SUBSCRIBE frame goes out as soon as CONNECTED arrives.
    pub fn subscribe(&self, destination: impl Into<String>) -> SubscriptionHandle {
        let destination = destination.into();
        let id = self.shared.next_id.fetch_add(1, Ordering::Relaxed);
        let epoch = {
            let mut registry = self.shared.registry();
            if !self.shared.closing.load(Ordering::Acquire) {
                registry.routes.insert(id, destination.clone());
            }
            registry.epoch
        };
        let _ = self.commands.send(LoopCommand::Subscribe { id });
        SubscriptionHandle {
            id,
            epoch,
            destination,
        }
    }

    /// Remove a subscription. Unknown, repeated or stale handles are ignored.
    pub fn unsubscribe(&self, handle: &SubscriptionHandle) {
        let removed = {
            let mut registry = self.shared.registry();
            registry.epoch == handle.epoch && registry.routes.remove(&handle.id).is_some()
        };
        if removed {
            let _ = self.commands.send(LoopCommand::Unsubscribe { id: handle.id });
        }
    }

    /// Send a body to an application destination.
    ///
    /// Returns `false` without queueing anything when the channel is not
    /// connected. Nothing is replayed after a later connect.
    pub fn publish(&self, destination: &str, body: impl Into<String>) -> bool {
        if !self.is_connected() {
            debug!(destination, "not connected, dropping publish");
            return false;
        }
        self.commands
            .send(LoopCommand::Send {
                destination: destination.to_string(),
                body: body.into(),
            })
            .is_ok()
    }

    /// Close the session. Safe to call any number of times.
    pub fn disconnect(&self) {
        if self.shared.closing.swap(true, Ordering::AcqRel) {
            return;
        }
        self.shared.registry().routes.clear();
        let _ = self.commands.send(LoopCommand::Disconnect);
    }

    /// Wait for the next event. `None` once the background task has exited
    /// and every event has been consumed.
    pub async fn recv(&mut self) -> Option<ChannelEvent> {
        self.events.recv().await
    }

    pub fn try_recv(&mut self) -> Result<ChannelEvent, TryRecvError> {
        self.events.try_recv()
    }
}

impl Drop for PushChannel {
    fn drop(&mut self) {
        self.disconnect();
    }
}

// ---------------------------------------------------------------------------
// Background task
// ---------------------------------------------------------------------------

enum SessionEnd {
    /// Disconnect was requested.
    Closed,
    Dropped(Option<String>),
}

async fn run<C: Connector>(
    mut connector: C,
    auth_token: Option<String>,
    config: ChannelConfig,
    mut commands: mpsc::UnboundedReceiver<LoopCommand>,
    events: mpsc::UnboundedSender<ChannelEvent>,
    shared: Arc<Shared>,
) {
    loop {
        shared.set_state(ConnectionState::Connecting);

        let attempt = {
            let connect = connector.connect();
            tokio::pin!(connect);
            loop {
                tokio::select! {
                    result = &mut connect => break Some(result),
                    command = commands.recv() => match command {
                        None | Some(LoopCommand::Disconnect) => break None,
                        // Registered subscriptions are flushed on CONNECTED.
                        Some(_) => continue,
                    },
                }
            }
        };

        let end = match attempt {
            None => SessionEnd::Closed,
            Some(Ok(transport)) => {
                session(
                    transport,
                    auth_token.as_deref(),
                    &config,
                    &mut commands,
                    &events,
                    &shared,
                )
                .await
            }
            Some(Err(e)) => {
                warn!(error = %e, "push channel connect failed");
                let _ = events.send(ChannelEvent::Error {
                    message: e.to_string(),
                });
                SessionEnd::Dropped(Some(e.to_string()))
            }
        };

        let (requested, reason) = match end {
            SessionEnd::Closed => (true, None),
            SessionEnd::Dropped(reason) => (false, reason),
        };
        shared.invalidate();
        let _ = events.send(ChannelEvent::Disconnected { reason });

        if requested || shared.closing.load(Ordering::Acquire) {
            break;
        }
        let Some(delay) = config.reconnect_delay else {
            break;
        };

        debug!(?delay, "reconnecting after delay");
        let sleep = tokio::time::sleep(delay);
        tokio::pin!(sleep);
        let cancelled = loop {
            tokio::select! {
                _ = &mut sleep => break false,
                command = commands.recv() => match command {
                    None | Some(LoopCommand::Disconnect) => break true,
                    Some(_) => continue,
                },
            }
        };
        if cancelled {
            break;
        }
    }

    shared.set_state(ConnectionState::Closed);
    debug!("push channel task exited");
}

async fn write_frame<W: TransportWriter>(
    writer: &mut W,
    frame: &Frame,
) -> Result<(), SessionEnd> {
    debug!(command = %frame.command, "-> frame");
    writer
        .send(&frame.encode())
        .await
        .map_err(|e| SessionEnd::Dropped(Some(e.to_string())))
}

async fn tick(heart_beat: &mut Option<Interval>) {
    match heart_beat {
        Some(interval) => {
            interval.tick().await;
        }
        None => std::future::pending().await,
    }
}

/// One connected transport, from CONNECT until it closes.
async fn session<T: Transport>(
    transport: T,
    auth_token: Option<&str>,
    config: &ChannelConfig,
    commands: &mut mpsc::UnboundedReceiver<LoopCommand>,
    events: &mpsc::UnboundedSender<ChannelEvent>,
    shared: &Shared,
) -> SessionEnd {
    let (mut reader, mut writer) = transport.split();

    let hello = Frame::connect(&config.host, auth_token, config.heart_beat);
    if let Err(end) = write_frame(&mut writer, &hello).await {
        return end;
    }

    let mut connected = false;
    // Subscription ids whose SUBSCRIBE frame went out on this connection.
    let mut sent: HashSet<u64> = HashSet::new();
    let mut heart_beat: Option<Interval> = None;

    loop {
        tokio::select! {
            incoming = reader.recv() => {
                let text = match incoming {
                    Ok(Some(text)) => text,
                    Ok(None) => return SessionEnd::Dropped(None),
                    Err(e) => return SessionEnd::Dropped(Some(e.to_string())),
                };
                let frame = match Frame::decode(&text) {
                    Ok(Some(frame)) => frame,
                    Ok(None) => continue,
                    Err(e) => {
                        warn!(error = %e, "dropping undecodable frame");
                        continue;
                    }
                };
                debug!(command = %frame.command, "<- frame");

                match frame.command {
                    StompCommand::Connected => {
                        if connected {
                            continue;
                        }
                        connected = true;
                        shared.set_state(ConnectionState::Connected);

                        let server = frame
                            .header("heart-beat")
                            .and_then(HeartBeat::parse)
                            .unwrap_or_default();
                        heart_beat = config.heart_beat.outgoing_interval(server).map(|period| {
                            let mut interval = tokio::time::interval_at(Instant::now() + period, period);
                            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
                            interval
                        });

                        for (id, destination) in shared.routes() {
                            if sent.insert(id)
                                && let Err(end) = write_frame(
                                    &mut writer,
                                    &Frame::subscribe(&subscription_id(id), &destination),
                                )
                                .await
                            {
                                return end;
                            }
                        }
                        let _ = events.send(ChannelEvent::Connected);
                    }
                    StompCommand::Message => {
                        let Some(id) = frame.header("subscription").and_then(parse_subscription_id) else {
                            warn!("MESSAGE without a usable subscription header");
                            continue;
                        };
                        match shared.destination_of(id) {
                            Some(destination) => {
                                let _ = events.send(ChannelEvent::Message {
                                    destination,
                                    body: frame.body,
                                });
                            }
                            None => debug!(subscription = id, "dropping message for inactive subscription"),
                        }
                    }
                    StompCommand::Error => {
                        let message = frame
                            .header("message")
                            .map(str::to_string)
                            .unwrap_or_else(|| frame.body.clone());
                        warn!(%message, "server sent ERROR frame");
                        let _ = events.send(ChannelEvent::Error { message });
                    }
                    StompCommand::Receipt => {}
                    other => debug!(command = %other, "ignoring unexpected frame"),
                }
            }
            command = commands.recv() => {
                let result = match command {
                    Some(LoopCommand::Subscribe { id }) => {
                        match shared.destination_of(id) {
                            Some(destination) if connected && sent.insert(id) => {
                                write_frame(&mut writer, &Frame::subscribe(&subscription_id(id), &destination)).await
                            }
                            _ => Ok(()),
                        }
                    }
                    Some(LoopCommand::Unsubscribe { id }) => {
                        if sent.remove(&id) {
                            write_frame(&mut writer, &Frame::unsubscribe(&subscription_id(id))).await
                        } else {
                            Ok(())
                        }
                    }
                    Some(LoopCommand::Send { destination, body }) => {
                        if connected {
                            write_frame(&mut writer, &Frame::send(&destination, body)).await
                        } else {
                            Ok(())
                        }
                    }
                    Some(LoopCommand::Disconnect) | None => {
                        if connected {
                            let _ = write_frame(&mut writer, &Frame::disconnect()).await;
                        }
                        let _ = writer.close().await;
                        return SessionEnd::Closed;
                    }
                };
                if let Err(end) = result {
                    return end;
                }
            }
            _ = tick(&mut heart_beat) => {
                if let Err(e) = writer.send("\n").await {
                    return SessionEnd::Dropped(Some(e.to_string()));
                }
            }
        }
    }
}
