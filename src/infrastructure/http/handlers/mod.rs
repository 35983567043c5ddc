//! HTTP Handlers

mod book;
mod ping;
mod websocket;

pub use book::*;
pub use ping::*;
pub use websocket::*;
