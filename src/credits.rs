//! Credit gating for chat requests.
//!
//! Balance bookkeeping lives in the calling application; the gateway only
//! asks whether a caller may proceed.

use async_trait::async_trait;
use std::collections::HashSet;
use std::sync::Arc;
use tracing::info;

use crate::config::CreditsConfig;

/// Decides whether a caller may spend generation capacity.
#[async_trait]
pub trait CreditGate: Send + Sync {
    async fn can_proceed(&self, caller_id: Option<&str>) -> bool;
}

/// Allows every request.
#[derive(Debug, Clone, Copy, Default)]
pub struct Unmetered;

#[async_trait]
impl CreditGate for Unmetered {
    async fn can_proceed(&self, _caller_id: Option<&str>) -> bool {
        true
    }
}

/// Denies a fixed set of callers. Anonymous callers are allowed.
#[derive(Debug, Clone, Default)]
pub struct DenyList {
    denied: HashSet<String>,
}

impl DenyList {
    pub fn new<I, S>(callers: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            denied: callers.into_iter().map(Into::into).collect(),
        }
    }
}

#[async_trait]
impl CreditGate for DenyList {
    async fn can_proceed(&self, caller_id: Option<&str>) -> bool {
        caller_id.map_or(true, |id| !self.denied.contains(id))
    }
}

/// Gate selected by `credits` config: a deny list when any callers are
/// listed, otherwise unmetered.
pub fn from_config(config: &CreditsConfig) -> Arc<dyn CreditGate> {
    if config.denied.is_empty() {
        Arc::new(Unmetered)
    } else {
        info!(denied = config.denied.len(), "credit deny list active");
        Arc::new(DenyList::new(config.denied.iter().cloned()))
    }
}
