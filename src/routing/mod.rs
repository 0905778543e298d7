//! Dual-mode request routing.
//!
//! A message plus its caller context is classified into a [`Mode`]
//! (`client` or `companion`), then the router picks the backend tier and
//! flags escalation. Both steps are pure and stateless.

mod matcher;
pub mod mode;
pub mod provider;

pub use matcher::KeywordMatcher;
pub use mode::{KeywordModeDetector, ModeDetection, ModeDetector, ModeTrigger};
pub use provider::ProviderRouter;

use serde::{Deserialize, Serialize};

use crate::knowledge::AccessScope;

// ============================================================================
// Types
// ============================================================================

/// Which response track handles a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    /// Customer-facing: public knowledge only.
    Client,
    /// Internal operator assistant: public and internal knowledge.
    Companion,
}

impl Mode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Mode::Client => "client",
            Mode::Companion => "companion",
        }
    }

    /// Knowledge a response in this mode may be grounded on.
    pub fn access_scope(&self) -> AccessScope {
        match self {
            Mode::Client => AccessScope::PublicOnly,
            Mode::Companion => AccessScope::IncludeInternal,
        }
    }
}

/// Who is asking, as asserted by the calling application.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CallerContext {
    #[serde(default)]
    pub role: Option<String>,
    #[serde(default)]
    pub internal: Option<bool>,
    /// Identifier passed to the credit gate.
    #[serde(default)]
    pub caller_id: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum TaskType {
    #[default]
    Chat,
    Search,
    Analysis,
    Drafting,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Complexity {
    Simple,
    #[default]
    Moderate,
    Complex,
}

/// Backend tier a message is routed to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderTier {
    /// Low-latency, low-cost model.
    Fast,
    /// Higher-capability model.
    Deep,
}

impl ProviderTier {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProviderTier::Fast => "fast",
            ProviderTier::Deep => "deep",
        }
    }
}

/// Per-request routing outcome. Never persisted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RoutingDecision {
    pub mode: Mode,
    pub provider: ProviderTier,
    /// Advisory: the message looks urgent or high value.
    pub escalate: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wire_names() {
        assert_eq!(serde_json::to_string(&Mode::Companion).unwrap(), "\"companion\"");
        let t: TaskType = serde_json::from_str("\"drafting\"").unwrap();
        assert_eq!(t, TaskType::Drafting);
        let ctx: CallerContext = serde_json::from_str(r#"{"role":"admin","callerId":"u1"}"#).unwrap();
        assert_eq!(ctx.role.as_deref(), Some("admin"));
        assert_eq!(ctx.internal, None);
    }

    #[test]
    fn mode_determines_scope() {
        assert_eq!(Mode::Client.access_scope(), AccessScope::PublicOnly);
        assert_eq!(Mode::Companion.access_scope(), AccessScope::IncludeInternal);
    }
}
