//! Framework-agnostic screen controller.
//!
//! Owns one [`PushChannel`] and one [`Screen`], providing the dispatch logic
//! every screen shares:
//!
//! - Reading prerequisites and moving through [`Phase`]s.
//! - Subscribing to the screen's channels on every connect.
//! - Decoding push messages and handing them to the screen.
//! - Carrying out the screen's [`Reaction`]s, including navigation.
//!
//! Frontends only need to:
//! 1. Call [`ScreenController::prepare`], then [`ScreenController::attach`].
//! 2. Call [`ScreenController::recv`] or [`ScreenController::try_recv`] in a
//!    loop.
//! 3. Call [`ScreenController::publish`] (or a screen-specific command
//!    method) to transmit user actions.

use std::collections::VecDeque;
use std::sync::Arc;

use geoparty_core::game_state::{PartialGameState, StateChanged};
use geoparty_core::protocol::{Command, InboundEvent};
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TryRecvError;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::push_channel::{ChannelEvent, PushChannel, SubscriptionHandle};
use crate::screens::{Reaction, Route, Screen, ScreenEnv};

/// Notices beyond this count push out the oldest.
pub const MAX_NOTICES: usize = 100;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    /// Reading prerequisites.
    Loading,
    /// Channel attached, waiting for CONNECTED.
    Connecting,
    Ready,
    /// Navigation issued. Terminal.
    Transitioning,
    /// Terminal for this mount.
    Error,
}

/// Outcome of processing a single event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PollResult {
    /// An event was applied; the flags describe what was modified.
    Updated(StateChanged),
    /// Navigation was issued. The controller has torn itself down.
    Navigated(Route),
    /// The controller entered [`Phase::Error`].
    Failed,
    /// Nothing more will arrive.
    Disconnected,
    /// No event was available.
    Empty,
}

/// A dismissible message for the user.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notice {
    pub id: u64,
    pub message: String,
}

/// Receives navigation requests.
pub trait Navigator: Send + Sync {
    fn navigate(&self, route: Route);
}

impl Navigator for mpsc::UnboundedSender<Route> {
    fn navigate(&self, route: Route) {
        let _ = self.send(route);
    }
}

enum Incoming {
    Connected,
    Error(String),
    Disconnected(Option<String>),
    Event(InboundEvent),
}

pub struct ScreenController<S: Screen> {
    screen: S,
    env: ScreenEnv,
    navigator: Arc<dyn Navigator>,
    phase: Phase,
    channel: Option<PushChannel>,
    handles: Vec<SubscriptionHandle>,
    backlog: VecDeque<Incoming>,
    pending: Option<(Instant, Route)>,
    notices: VecDeque<Notice>,
    next_notice: u64,
    ready_once: bool,
    torn_down: bool,
}

impl<S: Screen> ScreenController<S> {
    pub fn new(screen: S, env: ScreenEnv, navigator: Arc<dyn Navigator>) -> Self {
        Self {
            screen,
            env,
            navigator,
            phase: Phase::Loading,
            channel: None,
            handles: Vec::new(),
            backlog: VecDeque::new(),
            pending: None,
            notices: VecDeque::new(),
            next_notice: 0,
            ready_once: false,
            torn_down: false,
        }
    }

    // ------------------------------------------------------------------
    // Loading
    // ------------------------------------------------------------------

    /// Read prerequisites. On failure the controller enters
    /// [`Phase::Error`] with a notice and `false` is returned.
    pub fn prepare(&mut self) -> bool {
        if self.phase != Phase::Loading {
            return false;
        }
        match self.screen.prepare(&self.env) {
            Ok(()) => true,
            Err(e) => {
                self.fail(e.to_string());
                false
            }
        }
    }

    /// Replace the shared game state with a freshly fetched snapshot. Only
    /// honoured while loading.
    pub fn apply_snapshot(&mut self, state: PartialGameState) {
        if self.phase != Phase::Loading || self.torn_down {
            debug!(screen = self.screen.name(), "ignoring late game-state snapshot");
            return;
        }
        self.env.context.replace_game(state);
    }

    /// Hand over the channel. The controller starts waiting for
    /// [`ChannelEvent::Connected`].
    pub fn attach(&mut self, channel: PushChannel) {
        if self.phase != Phase::Loading || self.torn_down {
            channel.disconnect();
            return;
        }
        self.channel = Some(channel);
        self.phase = Phase::Connecting;
        debug!(screen = self.screen.name(), "connecting");
    }

    // ------------------------------------------------------------------
    // Event processing
    // ------------------------------------------------------------------

    /// Await and process the next event.
    pub async fn recv(&mut self) -> PollResult {
        loop {
            if self.torn_down {
                return PollResult::Disconnected;
            }
            if let Some(incoming) = self.backlog.pop_front() {
                return self.handle(incoming);
            }
            if self.pending_due() {
                return self.fire_pending();
            }

            let deadline = self.pending.as_ref().map(|(at, _)| *at);
            let Some(channel) = self.channel.as_mut() else {
                if deadline.is_none() {
                    return PollResult::Disconnected;
                }
                sleep_until(deadline).await;
                continue;
            };

            tokio::select! {
                event = channel.recv() => match event {
                    Some(event) => {
                        self.enqueue(event);
                        self.drain();
                    }
                    None => self.channel = None,
                },
                _ = sleep_until(deadline) => {}
            }
        }
    }

    /// Process one event if one is available.
    pub fn try_recv(&mut self) -> PollResult {
        if self.torn_down {
            return PollResult::Disconnected;
        }
        if self.backlog.is_empty() {
            self.drain();
        }
        if let Some(incoming) = self.backlog.pop_front() {
            return self.handle(incoming);
        }
        if self.pending_due() {
            return self.fire_pending();
        }
        if self.channel.is_none() && self.pending.is_none() {
            return PollResult::Disconnected;
        }
        PollResult::Empty
    }

    fn enqueue(&mut self, event: ChannelEvent) {
        let incoming = match event {
            ChannelEvent::Connected => Incoming::Connected,
            ChannelEvent::Error { message } => Incoming::Error(message),
            ChannelEvent::Disconnected { reason } => Incoming::Disconnected(reason),
            ChannelEvent::Message { destination, body } => match InboundEvent::decode(&body) {
                Ok(event) => Incoming::Event(event),
                Err(e) => {
                    warn!(screen = self.screen.name(), %destination, error = %e, "dropping malformed push message");
                    return;
                }
            },
        };
        self.backlog.push_back(incoming);
    }

    /// Pull everything already delivered into the backlog. A game winner in
    /// the batch suppresses any round winner.
    fn drain(&mut self) {
        while let Some(channel) = self.channel.as_mut() {
            match channel.try_recv() {
                Ok(event) => self.enqueue(event),
                Err(TryRecvError::Empty) => break,
                Err(TryRecvError::Disconnected) => self.channel = None,
            }
        }
        let game_over = self
            .backlog
            .iter()
            .any(|i| matches!(i, Incoming::Event(InboundEvent::GameWinner(_))));
        if game_over {
            self.backlog
                .retain(|i| !matches!(i, Incoming::Event(InboundEvent::RoundWinner(_))));
        }
    }

    fn handle(&mut self, incoming: Incoming) -> PollResult {
        if self.torn_down || matches!(self.phase, Phase::Transitioning | Phase::Error) {
            return PollResult::Empty;
        }
        match incoming {
            Incoming::Connected => self.on_connected(),
            Incoming::Error(message) => {
                warn!(screen = self.screen.name(), %message, "push channel error");
                self.notify(message);
                PollResult::Updated(notices_changed())
            }
            Incoming::Disconnected(reason) => self.on_disconnected(reason),
            Incoming::Event(event) => {
                if self.phase != Phase::Ready {
                    debug!(screen = self.screen.name(), kind = event.kind(), "event before ready, dropped");
                    return PollResult::Updated(StateChanged::default());
                }
                if let InboundEvent::Unknown(kind) = &event {
                    debug!(screen = self.screen.name(), kind, "ignoring unknown event type");
                    return PollResult::Updated(StateChanged::default());
                }
                debug!(screen = self.screen.name(), kind = event.kind(), "event");
                let reaction = self.screen.on_event(&event, &self.env);
                self.react(reaction)
            }
        }
    }

    fn on_connected(&mut self) -> PollResult {
        let Some(channel) = self.channel.as_ref() else {
            return PollResult::Empty;
        };
        self.handles = self
            .screen
            .channels()
            .into_iter()
            .map(|destination| channel.subscribe(destination.to_string()))
            .collect();
        self.phase = Phase::Ready;
        info!(screen = self.screen.name(), "ready");

        if let Some(command) = self.screen.entry_command() {
            self.publish(command);
        }
        if !self.ready_once {
            self.ready_once = true;
            let reaction = self.screen.on_ready(&self.env);
            return self.react(reaction);
        }
        PollResult::Updated(StateChanged::default())
    }

    fn on_disconnected(&mut self, reason: Option<String>) -> PollResult {
        // Handles taken after the drop belong to the next session and would
        // be flushed on its CONNECTED alongside the fresh ones.
        if let Some(channel) = self.channel.as_ref() {
            for handle in self.handles.drain(..) {
                channel.unsubscribe(&handle);
            }
        }
        self.handles.clear();
        let reconnecting = self
            .channel
            .as_ref()
            .is_some_and(PushChannel::will_reconnect);
        if reconnecting {
            self.phase = Phase::Connecting;
            self.notify("Connection lost, reconnecting");
            return PollResult::Updated(notices_changed());
        }
        match reason {
            Some(reason) => self.fail(format!("Connection lost: {reason}")),
            None => self.fail("Connection lost"),
        }
    }

    fn react(&mut self, reaction: Reaction) -> PollResult {
        match reaction {
            Reaction::Ignored => PollResult::Updated(StateChanged::default()),
            Reaction::Updated(changed) => PollResult::Updated(changed),
            Reaction::Notify(message) => {
                self.notify(message);
                PollResult::Updated(notices_changed())
            }
            Reaction::Advance(route) => self.transition(route),
            Reaction::AdvanceAfter(delay, route) => {
                debug!(screen = self.screen.name(), ?route, ?delay, "navigation scheduled");
                self.pending = Some((Instant::now() + delay, route));
                PollResult::Updated(StateChanged::default())
            }
            Reaction::Abort { notice, route } => {
                self.notify(notice);
                self.transition(route)
            }
        }
    }

    // ------------------------------------------------------------------
    // Navigation and teardown
    // ------------------------------------------------------------------

    fn pending_due(&self) -> bool {
        self.pending
            .as_ref()
            .is_some_and(|(at, _)| Instant::now() >= *at)
    }

    fn fire_pending(&mut self) -> PollResult {
        match self.pending.take() {
            Some((_, route)) => self.transition(route),
            None => PollResult::Empty,
        }
    }

    fn transition(&mut self, route: Route) -> PollResult {
        if self.torn_down || self.phase == Phase::Transitioning {
            return PollResult::Empty;
        }
        self.phase = Phase::Transitioning;
        self.pending = None;
        self.env.context.persist_game(self.env.store());
        info!(screen = self.screen.name(), ?route, "navigating");
        self.navigator.navigate(route);
        self.teardown();
        PollResult::Navigated(route)
    }

    /// User-initiated navigation. Supersedes any scheduled navigation.
    pub fn navigate(&mut self, route: Route) -> bool {
        matches!(self.transition(route), PollResult::Navigated(_))
    }

    fn fail(&mut self, notice: impl Into<String>) -> PollResult {
        let notice = notice.into();
        warn!(screen = self.screen.name(), %notice, "screen failed");
        self.notify(notice);
        self.phase = Phase::Error;
        self.pending = None;
        self.backlog.clear();
        self.release_channel();
        PollResult::Failed
    }

    fn release_channel(&mut self) {
        if let Some(channel) = self.channel.take() {
            for handle in self.handles.drain(..) {
                channel.unsubscribe(&handle);
            }
            channel.disconnect();
        }
        self.handles.clear();
    }

    /// Remove every subscription, close the channel and cancel scheduled
    /// navigation. Safe to call any number of times.
    pub fn teardown(&mut self) {
        if self.torn_down {
            return;
        }
        self.torn_down = true;
        self.pending = None;
        self.backlog.clear();
        self.release_channel();
        self.screen.on_teardown(&self.env);
        debug!(screen = self.screen.name(), "torn down");
    }

    // ------------------------------------------------------------------
    // Commands
    // ------------------------------------------------------------------

    /// Publish a command. A silent no-op returning `false` unless the
    /// controller is ready and the channel connected.
    pub fn publish(&self, command: Command) -> bool {
        if self.torn_down || self.phase != Phase::Ready {
            debug!(screen = self.screen.name(), ?command, "not ready, dropping command");
            return false;
        }
        let Some(channel) = self.channel.as_ref() else {
            return false;
        };
        let body = match command.to_body() {
            Ok(body) => body,
            Err(e) => {
                warn!(error = %e, "failed to encode command");
                return false;
            }
        };
        channel.publish(&command.destination(), body)
    }

    // ------------------------------------------------------------------
    // Notices and accessors
    // ------------------------------------------------------------------

    /// Add a notice and return its id.
    pub fn notify(&mut self, message: impl Into<String>) -> u64 {
        let id = self.next_notice;
        self.next_notice += 1;
        if self.notices.len() == MAX_NOTICES {
            self.notices.pop_front();
        }
        self.notices.push_back(Notice {
            id,
            message: message.into(),
        });
        id
    }

    pub fn dismiss(&mut self, id: u64) -> bool {
        let before = self.notices.len();
        self.notices.retain(|n| n.id != id);
        self.notices.len() != before
    }

    pub fn notices(&self) -> &VecDeque<Notice> {
        &self.notices
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn screen(&self) -> &S {
        &self.screen
    }

    pub(crate) fn screen_mut(&mut self) -> &mut S {
        &mut self.screen
    }

    pub fn env(&self) -> &ScreenEnv {
        &self.env
    }

    /// Route and deadline of a scheduled navigation.
    pub fn pending_navigation(&self) -> Option<(Instant, Route)> {
        self.pending
    }

    pub fn is_torn_down(&self) -> bool {
        self.torn_down
    }
}

impl<S: Screen> Drop for ScreenController<S> {
    fn drop(&mut self) {
        self.teardown();
    }
}

fn notices_changed() -> StateChanged {
    StateChanged {
        notices: true,
        ..Default::default()
    }
}

async fn sleep_until(deadline: Option<Instant>) {
    match deadline {
        Some(at) => tokio::time::sleep_until(at).await,
        None => std::future::pending().await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::screens::{GuessScreen, LobbyScreen, RoundCardScreen};
    use crate::session_store::{LOBBY_ID, ROUND_WINNER, SessionStore};
    use crate::test_support::{Mounted, envelope, eventually, fixture, mount, mount_reconnecting, settle};
    use geoparty_core::identity::LobbyId;
    use geoparty_core::stomp::StompCommand;
    use serde_json::json;

    #[tokio::test]
    async fn publish_while_connecting_is_dropped_and_not_replayed() {
        let Mounted {
            mut controller,
            remote,
            ..
        } = mount(LobbyScreen::new());
        assert_eq!(controller.phase(), Phase::Connecting);
        assert!(!controller.publish(Command::StartGame {
            lobby_id: LobbyId(7)
        }));

        remote.connected();
        controller.recv().await;
        assert_eq!(controller.phase(), Phase::Ready);

        assert!(eventually(|| !remote.frames_of(StompCommand::Send).is_empty()).await);
        settle().await;
        let sends = remote.frames_of(StompCommand::Send);
        assert_eq!(sends.len(), 1);
        assert_eq!(sends[0].header("destination"), Some("/app/lobby/7/join"));
    }

    #[tokio::test]
    async fn subscribes_to_screen_channels_on_connect() {
        let Mounted {
            mut controller,
            remote,
            ..
        } = mount(GuessScreen::new());
        remote.connected();
        controller.recv().await;

        assert!(eventually(|| remote.frames_of(StompCommand::Subscribe).len() == 3).await);
        let destinations: Vec<_> = remote
            .frames_of(StompCommand::Subscribe)
            .iter()
            .filter_map(|f| f.header("destination").map(str::to_string))
            .collect();
        assert_eq!(
            destinations,
            ["/topic/game/7", "/user/queue/errors", "/user/queue/results"]
        );
    }

    #[tokio::test]
    async fn teardown_is_idempotent_and_releases_everything() {
        let Mounted {
            mut controller,
            remote,
            ..
        } = mount(RoundCardScreen::new());
        remote.connected();
        controller.recv().await;

        controller.teardown();
        controller.teardown();
        assert!(controller.is_torn_down());
        assert!(!controller.publish(Command::StartGame {
            lobby_id: LobbyId(7)
        }));

        assert!(eventually(|| remote.is_closed()).await);
        assert_eq!(remote.frames_of(StompCommand::Unsubscribe).len(), 2);
        assert_eq!(remote.frames_of(StompCommand::Disconnect).len(), 1);
        assert_eq!(controller.recv().await, PollResult::Disconnected);
    }

    #[tokio::test]
    async fn malformed_payload_leaves_state_unchanged() {
        let Mounted {
            mut controller,
            remote,
            ..
        } = mount(LobbyScreen::new());
        remote.connected();
        controller.recv().await;
        remote.message(
            "sub-0",
            "/topic/lobby/7",
            &envelope(
                "LOBBY_STATUS",
                json!({ "maxPlayers": 4, "players": [{ "userId": 1, "username": "A" }] }),
            ),
        );
        controller.recv().await;
        let before = controller.screen().state().clone();

        remote.message("sub-0", "/topic/lobby/7", "{not json");
        remote.message(
            "sub-0",
            "/topic/lobby/7",
            &envelope("USER_JOINED", json!({ "userId": 5 })),
        );
        remote.error("marker");

        assert_eq!(
            controller.recv().await,
            PollResult::Updated(notices_changed())
        );
        assert_eq!(controller.screen().state(), &before);
        assert_eq!(controller.phase(), Phase::Ready);
    }

    #[tokio::test]
    async fn nothing_mutates_state_after_navigation() {
        let Mounted {
            mut controller,
            remote,
            navigator,
            ..
        } = mount(RoundCardScreen::new());
        remote.connected();
        controller.recv().await;

        remote.message(
            "sub-0",
            "/topic/game/7",
            &envelope("SCREEN_CHANGE", json!({ "screen": "GUESS" })),
        );
        remote.message(
            "sub-0",
            "/topic/game/7",
            &envelope("GAME_STATE", json!({ "currentRound": 9 })),
        );
        remote.message(
            "sub-0",
            "/topic/game/7",
            &envelope("SCREEN_CHANGE", json!({ "screen": "GUESS" })),
        );

        assert_eq!(
            controller.recv().await,
            PollResult::Navigated(Route::Guess)
        );
        settle().await;
        assert_eq!(controller.recv().await, PollResult::Disconnected);
        assert_eq!(controller.try_recv(), PollResult::Disconnected);
        assert_eq!(navigator.routes(), [Route::Guess]);
        assert_eq!(controller.env().context.game().current_round, None);
    }

    #[tokio::test]
    async fn game_winner_beats_round_winner_in_one_batch() {
        let Mounted {
            mut controller,
            remote,
            navigator,
            store,
        } = mount(GuessScreen::new());
        remote.connected();
        controller.recv().await;

        remote.message(
            "sub-2",
            "/user/queue/results",
            &envelope("ROUND_WINNER", json!({ "userId": 1, "username": "A" })),
        );
        remote.message(
            "sub-0",
            "/topic/game/7",
            &envelope("GAME_WINNER", json!({ "userId": 2, "username": "B" })),
        );
        settle().await;

        assert_eq!(
            controller.recv().await,
            PollResult::Navigated(Route::FinalResults)
        );
        assert_eq!(navigator.routes(), [Route::FinalResults]);
        assert_eq!(store.get(ROUND_WINNER), None);
    }

    #[tokio::test]
    async fn missing_lobby_is_terminal() {
        let fixture = fixture();
        fixture.store.remove(LOBBY_ID);
        let mut controller =
            ScreenController::new(LobbyScreen::new(), fixture.env, fixture.navigator);

        assert!(!controller.prepare());
        assert_eq!(controller.phase(), Phase::Error);
        assert_eq!(controller.notices().len(), 1);
        assert_eq!(controller.notices()[0].message, "no lobby selected");
        assert_eq!(controller.recv().await, PollResult::Disconnected);
    }

    #[tokio::test]
    async fn drop_without_reconnect_fails_the_screen() {
        let Mounted {
            mut controller,
            mut remote,
            ..
        } = mount(RoundCardScreen::new());
        remote.connected();
        controller.recv().await;

        remote.hang_up();
        assert_eq!(controller.recv().await, PollResult::Failed);
        assert_eq!(controller.phase(), Phase::Error);
        assert_eq!(controller.recv().await, PollResult::Disconnected);
    }

    #[tokio::test]
    async fn reconnect_resubscribes_and_resends_entry_command() {
        let (mut controller, mut first, second) = mount_reconnecting(LobbyScreen::new());

        first.connected();
        controller.recv().await;
        first.hang_up();
        assert_eq!(
            controller.recv().await,
            PollResult::Updated(notices_changed())
        );
        assert_eq!(controller.phase(), Phase::Connecting);

        second.connected();
        controller.recv().await;
        assert_eq!(controller.phase(), Phase::Ready);
        assert!(eventually(|| second.frames_of(StompCommand::Subscribe).len() == 2).await);
        assert!(eventually(|| second.frames_of(StompCommand::Send).len() == 1).await);
    }

    #[tokio::test]
    async fn drop_before_subscribing_leaves_one_subscription_per_destination() {
        let (mut controller, mut first, second) = mount_reconnecting(LobbyScreen::new());

        first.connected();
        settle().await;
        first.hang_up();
        settle().await;

        // The controller subscribes only after the session already ended.
        assert_eq!(controller.recv().await, PollResult::Updated(StateChanged::default()));
        assert_eq!(
            controller.recv().await,
            PollResult::Updated(notices_changed())
        );

        second.connected();
        controller.recv().await;
        assert_eq!(controller.phase(), Phase::Ready);
        settle().await;

        let destinations: Vec<_> = second
            .frames_of(StompCommand::Subscribe)
            .iter()
            .filter_map(|f| f.header("destination").map(str::to_string))
            .collect();
        assert_eq!(destinations, ["/topic/lobby/7", "/user/queue/errors"]);
    }

    #[tokio::test]
    async fn notices_are_capped_and_dismissible() {
        let Mounted { mut controller, .. } = mount(LobbyScreen::new());
        for i in 0..(MAX_NOTICES + 5) {
            controller.notify(format!("n{i}"));
        }
        assert_eq!(controller.notices().len(), MAX_NOTICES);
        assert_eq!(controller.notices()[0].message, "n5");

        let id = controller.notices()[3].id;
        assert!(controller.dismiss(id));
        assert!(!controller.dismiss(id));
    }
}
