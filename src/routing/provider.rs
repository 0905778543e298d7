use tracing::debug;

use crate::config::RoutingConfig;

use super::{Complexity, KeywordMatcher, Mode, ProviderTier, RoutingDecision, TaskType};

/// Chooses the backend tier for a message and flags escalation.
#[derive(Debug, Clone)]
pub struct ProviderRouter {
    escalation: KeywordMatcher,
}

impl ProviderRouter {
    pub fn new(config: &RoutingConfig) -> Result<Self, regex::Error> {
        Ok(Self {
            escalation: KeywordMatcher::new(&config.escalation_keywords)?,
        })
    }

    /// Route a message. Rules are evaluated in order; the first match wins.
    ///
    /// 1. client mode, simple complexity or a search task → fast
    /// 2. companion mode or complex complexity → deep
    /// 3. otherwise → fast
    pub fn route(
        &self,
        task: TaskType,
        complexity: Complexity,
        mode: Mode,
        message: &str,
    ) -> RoutingDecision {
        let provider = if mode == Mode::Client
            || complexity == Complexity::Simple
            || task == TaskType::Search
        {
            ProviderTier::Fast
        } else if mode == Mode::Companion || complexity == Complexity::Complex {
            ProviderTier::Deep
        } else {
            ProviderTier::Fast
        };

        let escalation = self.escalation.find(message);
        if let Some(kw) = escalation {
            debug!(keyword = kw, "escalation keyword matched");
        }

        RoutingDecision {
            mode,
            provider,
            escalate: escalation.is_some(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn router() -> ProviderRouter {
        ProviderRouter::new(&RoutingConfig::default()).unwrap()
    }

    #[test]
    fn client_mode_always_fast() {
        let r = router();
        for complexity in [Complexity::Simple, Complexity::Moderate, Complexity::Complex] {
            let d = r.route(TaskType::Analysis, complexity, Mode::Client, "hi");
            assert_eq!(d.provider, ProviderTier::Fast);
        }
    }

    #[test]
    fn companion_goes_deep_unless_simple_or_search() {
        let r = router();
        assert_eq!(
            r.route(TaskType::Chat, Complexity::Moderate, Mode::Companion, "x").provider,
            ProviderTier::Deep
        );
        assert_eq!(
            r.route(TaskType::Chat, Complexity::Simple, Mode::Companion, "x").provider,
            ProviderTier::Fast
        );
        assert_eq!(
            r.route(TaskType::Search, Complexity::Complex, Mode::Companion, "x").provider,
            ProviderTier::Fast
        );
    }

    #[test]
    fn escalation_is_flagged_without_changing_tier() {
        let r = router();
        let d = r.route(
            TaskType::Chat,
            Complexity::Moderate,
            Mode::Client,
            "This is URGENT, I want to talk to a   human",
        );
        assert!(d.escalate);
        assert_eq!(d.provider, ProviderTier::Fast);
        assert!(!r.route(TaskType::Chat, Complexity::Moderate, Mode::Client, "thanks").escalate);
    }
}
