//! In-memory transport and screen fixtures for tests.
//!
//! [`scripted`] returns a transport plus a [`Remote`] that plays the server:
//! it pushes frames on demand and records everything the client wrote.
//! [`mount`] wires a screen to such a transport behind a controller.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use geoparty_core::identity::UserId;
use geoparty_core::stomp::{Frame, StompCommand};
use serde_json::{Value, json};
use tokio::sync::mpsc;

use crate::context::{AppContext, SessionIdentity};
use crate::controller::{Navigator, ScreenController};
use crate::push_channel::{ChannelConfig, PushChannel};
use crate::screens::{Route, Screen, ScreenEnv};
use crate::session_store::{LOBBY_ID, MemoryStore, SessionStore};
use crate::transport::{Connector, Transport, TransportError, TransportReader, TransportWriter};

pub struct ScriptedTransport {
    incoming: mpsc::UnboundedReceiver<String>,
    sent: Arc<Mutex<Vec<String>>>,
    closed: Arc<AtomicBool>,
}

pub struct ScriptedReader {
    incoming: mpsc::UnboundedReceiver<String>,
}

pub struct ScriptedWriter {
    sent: Arc<Mutex<Vec<String>>>,
    closed: Arc<AtomicBool>,
}

/// Server side of a [`ScriptedTransport`].
pub struct Remote {
    tx: Option<mpsc::UnboundedSender<String>>,
    sent: Arc<Mutex<Vec<String>>>,
    closed: Arc<AtomicBool>,
}

pub fn scripted() -> (ScriptedTransport, Remote) {
    let (tx, rx) = mpsc::unbounded_channel();
    let sent = Arc::new(Mutex::new(Vec::new()));
    let closed = Arc::new(AtomicBool::new(false));
    (
        ScriptedTransport {
            incoming: rx,
            sent: Arc::clone(&sent),
            closed: Arc::clone(&closed),
        },
        Remote {
            tx: Some(tx),
            sent,
            closed,
        },
    )
}

impl Transport for ScriptedTransport {
    type Reader = ScriptedReader;
    type Writer = ScriptedWriter;

    fn split(self) -> (ScriptedReader, ScriptedWriter) {
        (
            ScriptedReader {
                incoming: self.incoming,
            },
            ScriptedWriter {
                sent: self.sent,
                closed: self.closed,
            },
        )
    }
}

impl TransportReader for ScriptedReader {
    async fn recv(&mut self) -> Result<Option<String>, TransportError> {
        Ok(self.incoming.recv().await)
    }
}

impl TransportWriter for ScriptedWriter {
    async fn send(&mut self, text: &str) -> Result<(), TransportError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(TransportError::ConnectionClosed);
        }
        self.sent.lock().unwrap().push(text.to_string());
        Ok(())
    }

    async fn close(&mut self) -> Result<(), TransportError> {
        self.closed.store(true, Ordering::Release);
        Ok(())
    }
}

impl Remote {
    pub fn push(&self, text: impl Into<String>) {
        if let Some(tx) = &self.tx {
            let _ = tx.send(text.into());
        }
    }

    pub fn connected(&self) {
        self.push(
            Frame::new(StompCommand::Connected)
                .with_header("version", "1.2")
                .with_header("heart-beat", "0,0")
                .encode(),
        );
    }

    pub fn message(&self, subscription: &str, destination: &str, body: &str) {
        self.push(
            Frame::new(StompCommand::Message)
                .with_header("subscription", subscription)
                .with_header("destination", destination)
                .with_header("message-id", "m")
                .with_body(body)
                .encode(),
        );
    }

    pub fn error(&self, message: &str) {
        self.push(
            Frame::new(StompCommand::Error)
                .with_header("message", message)
                .encode(),
        );
    }

    /// Close the connection from the server side.
    pub fn hang_up(&mut self) {
        self.tx = None;
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Every frame the client has written, heart-beats excluded.
    pub fn frames(&self) -> Vec<Frame> {
        self.sent
            .lock()
            .unwrap()
            .iter()
            .filter_map(|raw| Frame::decode(raw).ok().flatten())
            .collect()
    }

    pub fn frames_of(&self, command: StompCommand) -> Vec<Frame> {
        self.frames()
            .into_iter()
            .filter(|f| f.command == command)
            .collect()
    }
}

/// Hands out a queue of transports, one per connection attempt.
pub struct QueueConnector(pub VecDeque<ScriptedTransport>);

impl Connector for QueueConnector {
    type Transport = ScriptedTransport;

    async fn connect(&mut self) -> Result<ScriptedTransport, TransportError> {
        self.0
            .pop_front()
            .ok_or_else(|| TransportError::Connect("no more transports".to_string()))
    }
}

/// Yield to the runtime until `condition` holds or the attempts run out.
pub async fn eventually(mut condition: impl FnMut() -> bool) -> bool {
    for _ in 0..200 {
        if condition() {
            return true;
        }
        tokio::task::yield_now().await;
    }
    condition()
}

/// Let spawned tasks run until they block.
pub async fn settle() {
    for _ in 0..50 {
        tokio::task::yield_now().await;
    }
}

pub fn envelope(kind: &str, payload: Value) -> String {
    json!({ "type": kind, "payload": payload }).to_string()
}

// ---------------------------------------------------------------------------
// Screen fixtures
// ---------------------------------------------------------------------------

#[derive(Debug, Default)]
pub struct RecordingNavigator(Mutex<Vec<Route>>);

impl RecordingNavigator {
    pub fn routes(&self) -> Vec<Route> {
        self.0.lock().unwrap().clone()
    }
}

impl Navigator for RecordingNavigator {
    fn navigate(&self, route: Route) {
        self.0.lock().unwrap().push(route);
    }
}

pub struct Fixture {
    pub env: ScreenEnv,
    pub store: Arc<MemoryStore>,
    pub navigator: Arc<RecordingNavigator>,
}

/// Signed in as `ann` (user 1) with lobby 7 selected.
pub fn fixture() -> Fixture {
    let store = Arc::new(MemoryStore::new());
    store.set(LOBBY_ID, "7");
    let context = AppContext::new();
    context.sign_in(SessionIdentity {
        auth_token: "tok".to_string(),
        username: "ann".to_string(),
        user_id: Some(UserId(1)),
    });
    Fixture {
        env: ScreenEnv::new(context, store.clone()),
        store,
        navigator: Arc::new(RecordingNavigator::default()),
    }
}

pub struct Mounted<S: Screen> {
    pub controller: ScreenController<S>,
    pub remote: Remote,
    pub navigator: Arc<RecordingNavigator>,
    pub store: Arc<MemoryStore>,
}

pub fn mount<S: Screen>(screen: S) -> Mounted<S> {
    mount_with(screen, fixture())
}

/// Prepare `screen` and attach a scripted channel. Must run inside a runtime.
pub fn mount_with<S: Screen>(screen: S, fixture: Fixture) -> Mounted<S> {
    let (transport, remote) = scripted();
    let channel = PushChannel::from_transport(
        transport,
        Some("tok".to_string()),
        ChannelConfig::new("test"),
    );
    let mut controller = ScreenController::new(screen, fixture.env, fixture.navigator.clone());
    assert!(controller.prepare(), "prerequisites missing");
    controller.attach(channel);
    Mounted {
        controller,
        remote,
        navigator: fixture.navigator,
        store: fixture.store,
    }
}

/// Like [`mount`], but the channel reconnects once onto a second transport.
pub fn mount_reconnecting<S: Screen>(screen: S) -> (ScreenController<S>, Remote, Remote) {
    let fixture = fixture();
    let (first, first_remote) = scripted();
    let (second, second_remote) = scripted();
    let channel = PushChannel::open(
        QueueConnector(VecDeque::from([first, second])),
        Some("tok".to_string()),
        ChannelConfig::new("test").with_reconnect_delay(Some(Duration::from_millis(5))),
    );
    let mut controller = ScreenController::new(screen, fixture.env, fixture.navigator);
    assert!(controller.prepare(), "prerequisites missing");
    controller.attach(channel);
    (controller, first_remote, second_remote)
}
