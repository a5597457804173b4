//! Client side of geoparty: the STOMP push channel, the session store and the
//! per-screen controllers that drive a game from lobby to final results.

pub mod config;
pub mod context;
pub mod controller;
pub mod push_channel;
#[cfg(feature = "native")]
pub mod rest;
pub mod screens;
pub mod session_store;
pub mod transport;

#[cfg(test)]
mod test_support;

#[cfg(feature = "native")]
pub mod ws_transport;

pub use config::ClientConfig;
pub use context::{AppContext, SessionIdentity};
pub use controller::{Navigator, PollResult, ScreenController};
pub use push_channel::{ChannelConfig, ChannelEvent, ConnectionState, PushChannel};
pub use screens::Route;
pub use session_store::{FileStore, MemoryStore, SessionStore};
