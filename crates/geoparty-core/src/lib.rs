pub mod game_state;
pub mod identity;
pub mod protocol;
pub mod stomp;
