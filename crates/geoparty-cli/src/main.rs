use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use geoparty_client::screens::ScreenEnv;
use geoparty_client::session_store::{self, LOBBY_CODE, LOBBY_ID};
use geoparty_client::{AppContext, ClientConfig, FileStore, SessionIdentity, SessionStore};
use geoparty_core::identity::{LobbyId, UserId};
use tracing_subscriber::EnvFilter;

mod app;
mod commands;

#[derive(Parser, Debug)]
#[command(name = "geoparty")]
#[command(about = "Play geoparty from the terminal", long_about = None)]
struct Cli {
    /// Backend base URL (http, https, ws or wss)
    #[arg(short, long, env = "GEOPARTY_SERVER", default_value = "http://localhost:8080")]
    server: String,

    /// Path of the STOMP WebSocket endpoint
    #[arg(long, env = "GEOPARTY_WS_PATH", default_value = "/ws")]
    ws_path: String,

    /// Bearer token from the login endpoint
    #[arg(short, long, env = "GEOPARTY_TOKEN")]
    token: String,

    /// Username the token belongs to
    #[arg(short, long, env = "GEOPARTY_USERNAME")]
    username: String,

    /// Numeric user id the token belongs to
    #[arg(long, env = "GEOPARTY_USER_ID")]
    user_id: Option<UserId>,

    /// Lobby to join on start
    #[arg(short, long, env = "GEOPARTY_LOBBY")]
    lobby: Option<LobbyId>,

    /// Join code for a private lobby
    #[arg(long, env = "GEOPARTY_LOBBY_CODE")]
    code: Option<String>,

    /// File that keeps the session between runs
    #[arg(long, env = "GEOPARTY_SESSION", default_value = ".geoparty-session.json")]
    session_file: PathBuf,

    /// Seconds the round results stay up
    #[arg(long, default_value_t = 10)]
    results_secs: u64,

    /// Seconds to wait before reconnecting; 0 disables reconnecting
    #[arg(long, default_value_t = 5)]
    reconnect_secs: u64,
}

impl Cli {
    fn client_config(&self) -> ClientConfig {
        let reconnect = (self.reconnect_secs > 0).then(|| Duration::from_secs(self.reconnect_secs));
        ClientConfig::new(&self.server)
            .with_ws_path(&self.ws_path)
            .with_reconnect_delay(reconnect)
            .with_results_countdown(Duration::from_secs(self.results_secs))
    }
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config = cli.client_config();

    let store = Arc::new(FileStore::open(&cli.session_file));
    if let Some(lobby_id) = cli.lobby {
        session_store::clear_game_flow(store.as_ref());
        session_store::set_display(store.as_ref(), LOBBY_ID, lobby_id);
        if let Some(code) = &cli.code {
            store.set(LOBBY_CODE, code);
        }
    }

    let context = AppContext::restore(store.as_ref());
    context.sign_in(SessionIdentity {
        auth_token: cli.token.clone(),
        username: cli.username.clone(),
        user_id: cli.user_id,
    });
    let env = ScreenEnv::new(context, store);

    let shell = match app::Shell::new(config, env, cli.token) {
        Ok(shell) => shell,
        Err(e) => {
            eprintln!("Error: {e}");
            std::process::exit(2);
        }
    };
    if let Err(e) = shell.run().await {
        eprintln!("Error: {e}");
        std::process::exit(1);
    }
}
