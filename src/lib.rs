//! kbgate: knowledge retrieval with hybrid search and dual-mode request
//! routing for customer-facing and internal assistants.

pub mod cli;
pub mod config;
pub mod credits;
pub mod error;
pub mod gateway;
pub mod knowledge;
pub mod logging;
pub mod providers;
pub mod routing;
