use std::fmt;

use tracing::debug;

use crate::config::RoutingConfig;

use super::{CallerContext, KeywordMatcher, Mode};

/// What caused a mode decision.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ModeTrigger {
    /// The caller is internal by flag or role.
    CallerContext,
    /// The message mentioned an internal-operations keyword.
    Keyword(String),
    /// Nothing indicated internal use.
    Default,
}

impl fmt::Display for ModeTrigger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ModeTrigger::CallerContext => write!(f, "callerContext"),
            ModeTrigger::Keyword(kw) => write!(f, "keyword:{kw}"),
            ModeTrigger::Default => write!(f, "default"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModeDetection {
    pub mode: Mode,
    pub trigger: ModeTrigger,
}

/// Classifies a message into a response mode.
///
/// Implementations must be deterministic for a given input.
pub trait ModeDetector: Send + Sync {
    fn detect(&self, message: &str, caller: &CallerContext) -> ModeDetection;
}

/// Rule-based detector: caller context first, then message keywords.
#[derive(Debug, Clone)]
pub struct KeywordModeDetector {
    internal_roles: Vec<String>,
    keywords: KeywordMatcher,
}

impl KeywordModeDetector {
    pub fn new(config: &RoutingConfig) -> Result<Self, regex::Error> {
        Ok(Self {
            internal_roles: config
                .internal_roles
                .iter()
                .map(|r| r.trim().to_lowercase())
                .collect(),
            keywords: KeywordMatcher::new(&config.companion_keywords)?,
        })
    }

    fn is_internal_caller(&self, caller: &CallerContext) -> bool {
        if caller.internal == Some(true) {
            return true;
        }
        caller
            .role
            .as_deref()
            .map(|r| r.trim().to_lowercase())
            .is_some_and(|r| self.internal_roles.contains(&r))
    }
}

impl ModeDetector for KeywordModeDetector {
    fn detect(&self, message: &str, caller: &CallerContext) -> ModeDetection {
        let detection = if self.is_internal_caller(caller) {
            ModeDetection {
                mode: Mode::Companion,
                trigger: ModeTrigger::CallerContext,
            }
        } else if let Some(kw) = self.keywords.find(message) {
            ModeDetection {
                mode: Mode::Companion,
                trigger: ModeTrigger::Keyword(kw.to_string()),
            }
        } else {
            ModeDetection {
                mode: Mode::Client,
                trigger: ModeTrigger::Default,
            }
        };
        debug!(
            mode = detection.mode.as_str(),
            trigger = %detection.trigger,
            "mode detected"
        );
        detection
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn detector() -> KeywordModeDetector {
        KeywordModeDetector::new(&RoutingConfig::default()).unwrap()
    }

    #[test]
    fn plain_customer_question_is_client() {
        let d = detector().detect("What are your pricing plans?", &CallerContext::default());
        assert_eq!(d.mode, Mode::Client);
        assert_eq!(d.trigger, ModeTrigger::Default);
    }

    #[test]
    fn internal_keyword_selects_companion() {
        let d = detector().detect(
            "What is our SOP for escalating refunds?",
            &CallerContext::default(),
        );
        assert_eq!(d.mode, Mode::Companion);
        assert_eq!(d.trigger.to_string(), "keyword:sop");
    }

    #[test]
    fn internal_role_selects_companion() {
        let caller = CallerContext {
            role: Some(" Admin ".into()),
            ..Default::default()
        };
        let d = detector().detect("hello", &caller);
        assert_eq!(d.mode, Mode::Companion);
        assert_eq!(d.trigger, ModeTrigger::CallerContext);
    }

    #[test]
    fn internal_flag_selects_companion() {
        let caller = CallerContext {
            internal: Some(true),
            role: Some("customer".into()),
            ..Default::default()
        };
        assert_eq!(detector().detect("hi", &caller).mode, Mode::Companion);

        let caller = CallerContext {
            internal: Some(false),
            role: Some("customer".into()),
            ..Default::default()
        };
        assert_eq!(detector().detect("hi", &caller).mode, Mode::Client);
    }

    #[test]
    fn detection_is_deterministic() {
        let d = detector();
        let caller = CallerContext::default();
        for msg in ["configure the webhook", "reset my password", "API key rotation"] {
            assert_eq!(d.detect(msg, &caller), d.detect(msg, &caller));
        }
    }
}
