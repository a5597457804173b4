//! REST calls that complement the push channel.
//!
//! Only reads are done over HTTP: the initial game-state snapshot a screen
//! applies while loading, the round-card choices and the leaderboard.

use std::time::Duration;

use geoparty_core::game_state::{GameStateDelta, PartialGameState};
use geoparty_core::identity::{LobbyId, UserId, user_id_of};
use reqwest::{Client, StatusCode};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use tracing::debug;

#[derive(Debug, Error)]
pub enum RestError {
    #[error("request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("server answered {status} for {url}")]
    Status { status: StatusCode, url: String },
}

/// A round card the chooser can pick.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoundCardOption {
    pub id: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "Value", rename_all = "camelCase")]
pub struct LeaderboardEntry {
    pub user_id: Option<UserId>,
    pub username: String,
    pub score: u64,
}

impl TryFrom<Value> for LeaderboardEntry {
    type Error = String;

    fn try_from(value: Value) -> Result<Self, Self::Error> {
        #[derive(Deserialize)]
        struct Fields {
            username: String,
            #[serde(default)]
            score: u64,
        }
        let user_id = user_id_of(&value);
        let fields: Fields = serde_json::from_value(value).map_err(|e| e.to_string())?;
        Ok(LeaderboardEntry {
            user_id,
            username: fields.username,
            score: fields.score,
        })
    }
}

/// Bearer-authenticated JSON client.
#[derive(Clone)]
pub struct RestClient {
    client: Client,
    base_url: String,
    token: String,
}

impl RestClient {
    pub fn new(base_url: &str, token: &str) -> Result<Self, RestError> {
        let client = Client::builder().timeout(Duration::from_secs(15)).build()?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            token: token.to_string(),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path.trim_start_matches('/'))
    }

    async fn get_json<T: DeserializeOwned>(&self, path: &str) -> Result<T, RestError> {
        let url = self.url(path);
        debug!(%url, "GET");
        let response = self.client.get(&url).bearer_auth(&self.token).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(RestError::Status { status, url });
        }
        Ok(response.json().await?)
    }

    /// Current game state, for the wholesale load a screen does on mount.
    pub async fn fetch_game_state(&self, lobby_id: LobbyId) -> Result<PartialGameState, RestError> {
        let delta: GameStateDelta = self
            .get_json(&format!("/api/game/{lobby_id}/state"))
            .await?;
        Ok(PartialGameState::from(delta))
    }

    pub async fn fetch_round_cards(
        &self,
        lobby_id: LobbyId,
    ) -> Result<Vec<RoundCardOption>, RestError> {
        self.get_json(&format!("/api/game/{lobby_id}/round-cards"))
            .await
    }

    pub async fn fetch_leaderboard(&self) -> Result<Vec<LeaderboardEntry>, RestError> {
        self.get_json("/api/leaderboard").await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn urls_join_without_double_slashes() {
        let client = RestClient::new("http://localhost:8080/", "t").unwrap();
        assert_eq!(
            client.url("/api/leaderboard"),
            "http://localhost:8080/api/leaderboard"
        );
        assert_eq!(
            client.url("api/game/7/state"),
            "http://localhost:8080/api/game/7/state"
        );
    }

    #[test]
    fn client_builds_with_its_timeout() {
        let client = RestClient::new("https://geoparty.example/api", "t").unwrap();
        assert_eq!(client.url("/leaderboard"), "https://geoparty.example/api/leaderboard");
    }

    #[test]
    fn leaderboard_entries_normalize_ids() {
        let entries: Vec<LeaderboardEntry> = serde_json::from_str(
            r#"[{"user_id": "4", "username": "D", "score": 900}, {"username": "E"}]"#,
        )
        .unwrap();
        assert_eq!(entries[0].user_id, Some(UserId(4)));
        assert_eq!(entries[0].score, 900);
        assert_eq!(entries[1].user_id, None);
        assert_eq!(entries[1].score, 0);
    }

    #[test]
    fn round_card_options_tolerate_missing_text() {
        let options: Vec<RoundCardOption> =
            serde_json::from_str(r#"[{"id": "capitals", "name": "Capitals"}, {"id": "x"}]"#)
                .unwrap();
        assert_eq!(options.len(), 2);
        assert_eq!(options[1].name, None);
    }
}
