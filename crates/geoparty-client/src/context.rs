//! Process-wide state shared by every screen.
//!
//! Identity and the mirrored game state live in `tokio::sync::watch`
//! channels: controllers write, anything else can observe.

use std::sync::Arc;

use geoparty_core::game_state::PartialGameState;
use geoparty_core::identity::UserId;
use tokio::sync::watch;
use tracing::{debug, info};

use crate::session_store::{self, GAME_STATE, SessionStore};

/// Who is signed in.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionIdentity {
    pub auth_token: String,
    pub username: String,
    pub user_id: Option<UserId>,
}

#[derive(Debug, Clone)]
pub struct AppContext {
    identity: Arc<watch::Sender<Option<SessionIdentity>>>,
    game: Arc<watch::Sender<PartialGameState>>,
}

impl Default for AppContext {
    fn default() -> Self {
        Self::new()
    }
}

impl AppContext {
    pub fn new() -> Self {
        Self {
            identity: Arc::new(watch::Sender::new(None)),
            game: Arc::new(watch::Sender::new(PartialGameState::default())),
        }
    }

    /// A context whose game state starts from what the store last saved.
    pub fn restore(store: &dyn SessionStore) -> Self {
        let context = Self::new();
        if let Some(state) = session_store::get_json::<PartialGameState>(store, GAME_STATE) {
            debug!(round = ?state.current_round, "restored game state");
            context.game.send_replace(state);
        }
        context
    }

    // ------------------------------------------------------------------
    // Identity
    // ------------------------------------------------------------------

    pub fn sign_in(&self, identity: SessionIdentity) {
        info!(username = %identity.username, user_id = ?identity.user_id, "signed in");
        self.identity.send_replace(Some(identity));
    }

    pub fn sign_out(&self) {
        self.identity.send_replace(None);
    }

    pub fn identity(&self) -> Option<SessionIdentity> {
        self.identity.borrow().clone()
    }

    pub fn watch_identity(&self) -> watch::Receiver<Option<SessionIdentity>> {
        self.identity.subscribe()
    }

    // ------------------------------------------------------------------
    // Game state
    // ------------------------------------------------------------------

    pub fn game(&self) -> PartialGameState {
        self.game.borrow().clone()
    }

    /// Mutate the game state in place. Observers are only woken when `f`
    /// returns `true`.
    pub fn update_game(&self, f: impl FnOnce(&mut PartialGameState) -> bool) -> bool {
        self.game.send_if_modified(f)
    }

    pub fn replace_game(&self, state: PartialGameState) {
        self.game.send_replace(state);
    }

    pub fn watch_game(&self) -> watch::Receiver<PartialGameState> {
        self.game.subscribe()
    }

    /// Write the current game state to the store.
    pub fn persist_game(&self, store: &dyn SessionStore) {
        session_store::set_json(store, GAME_STATE, &*self.game.borrow());
    }
}
