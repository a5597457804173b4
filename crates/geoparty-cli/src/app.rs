//! The terminal shell: mounts one screen controller per route and feeds it
//! the lines typed at the prompt.
//!
//! Each mount owns its own push channel. When the controller navigates, the
//! shell drops it (tearing down its subscriptions and connection) before the
//! next screen is mounted.

use std::sync::Arc;

use geoparty_client::config::ConfigError;
use geoparty_client::controller::{Phase, PollResult, ScreenController};
use geoparty_client::rest::{RestClient, RestError};
use geoparty_client::screens::{
    ActionCardScreen, GuessScreen, LobbyScreen, ResultsScreen, RoundCardScreen, Screen, ScreenEnv,
};
use geoparty_client::session_store::{self, LOBBY_CODE, LOBBY_ID};
use geoparty_client::{ClientConfig, PushChannel, Route};
use geoparty_core::game_state::PartialGameState;
use thiserror::Error;
use tokio::io::{AsyncBufReadExt, BufReader, Lines, Stdin};
use tokio::sync::mpsc;
use tracing::{info, warn};

use crate::commands::{self, HELP, Input};

#[derive(Debug, Error)]
pub enum ShellError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("HTTP client setup failed: {0}")]
    Rest(#[from] RestError),
    #[error("reading input failed: {0}")]
    Io(#[from] std::io::Error),
}

enum Outcome {
    Navigate(Route),
    Quit,
}

/// Screen-specific rendering and commands.
trait View: Screen + Sized {
    /// Whether to load the game state over REST before connecting.
    fn wants_snapshot(&self) -> bool {
        true
    }

    fn render(controller: &ScreenController<Self>);

    /// Apply a command. Returns `false` if it means nothing here.
    fn handle(controller: &mut ScreenController<Self>, input: Input) -> bool;
}

pub struct Shell {
    config: ClientConfig,
    env: ScreenEnv,
    rest: RestClient,
    token: String,
    navigator: Arc<mpsc::UnboundedSender<Route>>,
    routes: mpsc::UnboundedReceiver<Route>,
    input: Lines<BufReader<Stdin>>,
}

impl Shell {
    pub fn new(config: ClientConfig, env: ScreenEnv, token: String) -> Result<Self, ShellError> {
        // Fail early on a bad server URL.
        config.ws_url()?;
        let rest = RestClient::new(&config.rest_base()?, &token)?;
        let (tx, routes) = mpsc::unbounded_channel();
        Ok(Self {
            config,
            env,
            rest,
            token,
            navigator: Arc::new(tx),
            routes,
            input: BufReader::new(tokio::io::stdin()).lines(),
        })
    }

    /// Where to start: the screen the saved game was on, the saved lobby, or
    /// the lobby list.
    fn initial_route(&self) -> Route {
        if self.env.require_lobby().is_err() {
            return Route::LobbyList;
        }
        self.env
            .context
            .game()
            .current_screen
            .and_then(Route::for_screen)
            .unwrap_or(Route::Lobby)
    }

    pub async fn run(mut self) -> Result<(), ShellError> {
        let mut route = self.initial_route();
        println!("Type `help` for commands.");
        loop {
            info!(?route, "mounting");
            let outcome = match route {
                Route::LobbyList => self.lobby_list().await?,
                Route::Lobby => self.mount(route, LobbyScreen::new()).await?,
                Route::RoundCard => self.mount(route, RoundCardScreen::new()).await?,
                Route::ActionCard => self.mount(route, ActionCardScreen::new()).await?,
                Route::Guess => self.mount(route, GuessScreen::new()).await?,
                Route::Results => {
                    let countdown = self.config.results_countdown;
                    self.mount(route, ResultsScreen::round(countdown)).await?
                }
                Route::FinalResults => {
                    self.mount(route, ResultsScreen::final_results()).await?
                }
            };
            match outcome {
                Outcome::Navigate(next) => route = next,
                Outcome::Quit => return Ok(()),
            }
        }
    }

    /// No screen controller here, only a prompt to pick a lobby.
    async fn lobby_list(&mut self) -> Result<Outcome, ShellError> {
        println!("You are not in a lobby. `join <lobby-id> [code]` to enter one.");
        while let Some(line) = self.input.next_line().await? {
            match commands::parse(&line) {
                Ok(Some(Input::Join { lobby_id, code })) => {
                    let store = self.env.store();
                    session_store::clear_game_flow(store);
                    self.env.context.replace_game(PartialGameState::default());
                    session_store::set_display(store, LOBBY_ID, lobby_id);
                    if let Some(code) = code {
                        store.set(LOBBY_CODE, &code);
                    }
                    return Ok(Outcome::Navigate(Route::Lobby));
                }
                Ok(Some(Input::Leaderboard)) => self.leaderboard().await,
                Ok(Some(Input::Help)) => println!("{HELP}"),
                Ok(Some(Input::Quit)) => return Ok(Outcome::Quit),
                Ok(Some(_)) => println!("Join a lobby first."),
                Ok(None) => {}
                Err(e) => println!("{e}"),
            }
        }
        Ok(Outcome::Quit)
    }

    async fn mount<S: View>(&mut self, route: Route, screen: S) -> Result<Outcome, ShellError> {
        let mut controller =
            ScreenController::new(screen, self.env.clone(), self.navigator.clone());
        let mut shown = 0;

        if !controller.prepare() {
            show_notices(&controller, &mut shown);
            return Ok(Outcome::Navigate(Route::LobbyList));
        }
        if controller.screen().wants_snapshot()
            && let Ok(lobby_id) = self.env.require_lobby()
        {
            match self.rest.fetch_game_state(lobby_id).await {
                Ok(state) => controller.apply_snapshot(state),
                Err(e) => warn!(error = %e, "could not load the game state"),
            }
        }
        controller.attach(PushChannel::connect(
            &self.config.ws_url()?,
            &self.token,
            self.config.channel_config()?,
        ));
        S::render(&controller);

        let mut live = true;
        loop {
            tokio::select! {
                poll = controller.recv(), if live => match poll {
                    PollResult::Updated(changed) => {
                        if changed.any() && !changed.notices {
                            S::render(&controller);
                        }
                    }
                    PollResult::Failed | PollResult::Disconnected => {
                        live = false;
                        if !controller.is_torn_down() {
                            println!("Disconnected. `retry` to reconnect or `quit` to exit.");
                        }
                    }
                    PollResult::Navigated(_) | PollResult::Empty => {}
                },
                line = self.input.next_line() => {
                    let Some(line) = line? else {
                        return Ok(Outcome::Quit);
                    };
                    match commands::parse(&line) {
                        Ok(None) => {}
                        Ok(Some(Input::Quit)) => return Ok(Outcome::Quit),
                        Ok(Some(Input::Help)) => println!("{HELP}"),
                        Ok(Some(Input::Retry)) if !live => return Ok(Outcome::Navigate(route)),
                        Ok(Some(Input::Dismiss(id))) => {
                            if !controller.dismiss(id) {
                                println!("No notice {id}.");
                            }
                        }
                        Ok(Some(Input::Leaderboard)) => self.leaderboard().await,
                        Ok(Some(Input::Cards)) => self.round_cards().await,
                        Ok(Some(input)) => {
                            if controller.phase() != Phase::Ready {
                                println!("Not connected yet.");
                            } else if !S::handle(&mut controller, input) {
                                println!("That does nothing on this screen.");
                            }
                        }
                        Err(e) => println!("{e}"),
                    }
                }
            }

            show_notices(&controller, &mut shown);
            if controller.is_torn_down() {
                let next = self.routes.try_recv().unwrap_or(Route::LobbyList);
                return Ok(Outcome::Navigate(next));
            }
        }
    }

    async fn leaderboard(&self) {
        match self.rest.fetch_leaderboard().await {
            Ok(entries) => {
                for (rank, entry) in entries.iter().enumerate() {
                    println!("{:>3}. {:<20} {}", rank + 1, entry.username, entry.score);
                }
            }
            Err(e) => println!("Could not load the leaderboard: {e}"),
        }
    }

    async fn round_cards(&self) {
        let Ok(lobby_id) = self.env.require_lobby() else {
            println!("Join a lobby first.");
            return;
        };
        match self.rest.fetch_round_cards(lobby_id).await {
            Ok(cards) => {
                for card in cards {
                    let name = card.name.as_deref().unwrap_or(&card.id);
                    match card.description {
                        Some(description) => println!("  {} ({name}): {description}", card.id),
                        None => println!("  {} ({name})", card.id),
                    }
                }
            }
            Err(e) => println!("Could not load the round cards: {e}"),
        }
    }
}

/// Print notices added since the last call.
fn show_notices<S: Screen>(controller: &ScreenController<S>, shown: &mut u64) {
    let since = *shown;
    for notice in controller.notices().iter().filter(|n| n.id >= since) {
        println!("! {} [dismiss {}]", notice.message, notice.id);
        *shown = notice.id + 1;
    }
}

fn show_scores<S: Screen>(controller: &ScreenController<S>) {
    let game = controller.env().context.game();
    if let Some(round) = game.current_round {
        println!("Round {round}");
    }
    for player in &game.players {
        println!(
            "  {:<20} round cards {:>2}  action cards {:>2}",
            player.username, player.round_cards_left, player.action_cards_left
        );
    }
}

// ---------------------------------------------------------------------------
// Screens
// ---------------------------------------------------------------------------

impl View for LobbyScreen {
    fn wants_snapshot(&self) -> bool {
        false
    }

    fn render(controller: &ScreenController<Self>) {
        let screen = controller.screen();
        let state = screen.state();
        match &state.lobby_code {
            Some(code) => println!("Lobby {} (code {code})", screen.lobby_id()),
            None => println!("Lobby {}", screen.lobby_id()),
        }
        println!(
            "  host: {}  players: {}/{}",
            state.host.as_deref().unwrap_or("?"),
            state.members.len(),
            state.max_players
        );
        for member in &state.members {
            println!("  - {}", member.username);
        }
        if screen.is_host() {
            println!("You are the host: `settings ...` or `start`.");
        }
    }

    fn handle(controller: &mut ScreenController<Self>, input: Input) -> bool {
        match input {
            Input::Leave => controller.leave(),
            Input::Start => controller.start_game(),
            Input::Settings(settings) => controller.update_settings(settings),
            _ => return false,
        };
        true
    }
}

impl View for RoundCardScreen {
    fn render(controller: &ScreenController<Self>) {
        show_scores(controller);
        let screen = controller.screen();
        if let Some(card) = screen.selected() {
            println!("You picked `{card}`. Waiting for the others.");
        } else if screen.is_chooser() {
            println!("You choose this round's card: `cards` to list, `card <id>` to pick.");
        } else {
            match screen.chooser() {
                Some(chooser) => println!("Waiting for player {chooser} to pick a round card."),
                None => println!("Waiting for the round card."),
            }
        }
    }

    fn handle(controller: &mut ScreenController<Self>, input: Input) -> bool {
        match input {
            Input::Card(card) => controller.select_round_card(&card),
            _ => return false,
        };
        true
    }
}

impl View for ActionCardScreen {
    fn render(controller: &ScreenController<Self>) {
        show_scores(controller);
        let game = controller.env().context.game();
        if controller.screen().is_completed() {
            println!("Done with action cards. Waiting for the others.");
        } else if game.inventory.action_cards.is_empty() {
            println!("No action cards in hand. `done` to continue.");
        } else {
            println!("Your action cards: {}", game.inventory.action_cards.join(", "));
        }
    }

    fn handle(controller: &mut ScreenController<Self>, input: Input) -> bool {
        match input {
            Input::Action { card, target } => controller.play_action_card(&card, target),
            Input::Done => controller.complete_action_cards(),
            _ => return false,
        };
        true
    }
}

impl View for GuessScreen {
    fn render(controller: &ScreenController<Self>) {
        let game = controller.env().context.game();
        if let Some(card) = &game.active_round_card {
            println!("Round card: {card}");
        }
        match controller.screen().guess() {
            Some((lat, lon)) => println!("Guessed {lat:.4}, {lon:.4}. Waiting for the results."),
            None => println!("`guess <lat> <lon>` to place your guess."),
        }
    }

    fn handle(controller: &mut ScreenController<Self>, input: Input) -> bool {
        match input {
            Input::Guess {
                latitude,
                longitude,
            } => controller.submit_guess(latitude, longitude),
            _ => return false,
        };
        true
    }
}

impl View for ResultsScreen {
    fn render(controller: &ScreenController<Self>) {
        let screen = controller.screen();
        let title = if screen.is_final() { "Game winner" } else { "Round winner" };
        match screen.winner() {
            Some(winner) => match winner.score {
                Some(score) => println!("{title}: {} ({score} points)", winner.username),
                None => println!("{title}: {}", winner.username),
            },
            None => println!("{title}: unknown"),
        }
        if screen.is_final() {
            println!("`next` to go back to the lobby list.");
        } else {
            show_scores(controller);
        }
    }

    fn handle(controller: &mut ScreenController<Self>, input: Input) -> bool {
        match input {
            Input::Next if controller.screen().is_final() => {
                controller.navigate(Route::LobbyList);
                true
            }
            _ => false,
        }
    }
}
