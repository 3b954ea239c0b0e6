//! Ordered rule table that classifies raw failures from `render`.
//!
//! Backend SDK errors and script runtime errors arrive as free text. The
//! table maps that text onto the closed [`ErrorKind`] taxonomy by
//! case-insensitive substring matching; the first matching rule wins and
//! anything unmatched becomes `execution_error`.

use serde::Deserialize;
use tracing::debug;

use super::{ErrorKind, TemplateExecutionError};

const FALLBACK_MESSAGE: &str = "Template execution failed. Please check your parameters and try again.";

/// One row of the table.
///
/// `when` is a list of alternatives; an alternative matches when every
/// needle in it occurs in the lowercased failure text.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ErrorRule {
    pub when: Vec<Vec<String>>,
    pub code: ErrorKind,
    pub message: String,
}

impl ErrorRule {
    pub fn new(when: &[&[&str]], code: ErrorKind, message: &str) -> Self {
        Self {
            when: when
                .iter()
                .map(|group| group.iter().map(|n| n.to_string()).collect())
                .collect(),
            code,
            message: message.to_string(),
        }
    }

    fn matches(&self, lowered: &str) -> bool {
        self.when.iter().any(|group| {
            !group.is_empty()
                && group
                    .iter()
                    .all(|needle| lowered.contains(needle.to_lowercase().as_str()))
        })
    }
}

/// The full classification table.
#[derive(Debug, Clone)]
pub struct ErrorRules {
    rules: Vec<ErrorRule>,
}

impl Default for ErrorRules {
    fn default() -> Self {
        Self::builtin()
    }
}

impl ErrorRules {
    /// The built-in rules, in priority order.
    pub fn builtin() -> Self {
        Self {
            rules: vec![
                ErrorRule::new(
                    &[&["not found"], &["404"]],
                    ErrorKind::AssetNotFound,
                    "One or more video/image/audio assets were not found. Please check your asset IDs.",
                ),
                ErrorRule::new(
                    &[&["duration", "exceeds"]],
                    ErrorKind::DurationError,
                    "Requested clip duration exceeds the source video length. Please use a shorter duration.",
                ),
                ErrorRule::new(
                    &[&["index_spoken_words"], &["caption"]],
                    ErrorKind::CaptionIndexMissing,
                    "Auto-captions require the video to be indexed first. Please ensure your video has been indexed with index_spoken_words().",
                ),
                ErrorRule::new(
                    &[&["permission"], &["403"]],
                    ErrorKind::PermissionDenied,
                    "Permission denied. You don't have access to one or more assets.",
                ),
            ],
        }
    }

    /// Appends extra rules after the built-in ones, ahead of the fallback.
    pub fn with_extra(mut self, extra: impl IntoIterator<Item = ErrorRule>) -> Self {
        self.rules.extend(extra);
        self
    }

    pub fn rules(&self) -> &[ErrorRule] {
        &self.rules
    }

    /// Classifies raw failure text. Never fails; unmatched text becomes
    /// `execution_error`.
    pub fn classify(&self, text: &str) -> TemplateExecutionError {
        let lowered = text.to_lowercase();
        let (code, message) = self
            .rules
            .iter()
            .find(|rule| rule.matches(&lowered))
            .map(|rule| (rule.code, rule.message.as_str()))
            .unwrap_or((ErrorKind::ExecutionError, FALLBACK_MESSAGE));

        debug!("Classified render failure as {code}");
        TemplateExecutionError::new(code, message).with_details(text)
    }

    /// Normalizes any failure surfacing from `render`.
    ///
    /// Errors that are already typed (timeouts, internal failures) pass
    /// through unchanged; everything else is classified by its text.
    pub fn normalize(&self, err: anyhow::Error) -> TemplateExecutionError {
        match err.downcast::<TemplateExecutionError>() {
            Ok(typed) => typed,
            Err(other) => self.classify(&format!("{other:#}")),
        }
    }
}
