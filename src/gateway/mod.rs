//! HTTP surface: knowledge ingestion and search, chat, stats and health.

mod chat;
mod protocol;
pub mod routes;
mod server;

pub use chat::{Backend, ChatService};
pub use protocol::*;
pub use server::*;
