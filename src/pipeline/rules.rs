//! Header rules for automated mail.
//!
//! Auto-replies and bulk mail announce themselves in their headers. A message
//! carrying any of the pairs below verbatim is pointless to relay.

use tracing::warn;

use crate::mailbox::Header;

/// An exact header name/value pair that marks a message as automated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IgnoreRule {
    pub name: &'static str,
    pub value: &'static str,
}

impl IgnoreRule {
    /// Exact, case-sensitive match on both name and value.
    pub fn matches(&self, header: &Header) -> bool {
        header.name == self.name && header.value == self.value
    }
}

/// The fixed ignore set.
pub const IGNORE_RULES: [IgnoreRule; 3] = [
    IgnoreRule {
        name: "X-Autoreply",
        value: "yes",
    },
    IgnoreRule {
        name: "Auto-Submitted",
        value: "auto-replied",
    },
    IgnoreRule {
        name: "Precedence",
        value: "bulk",
    },
];

/// First rule present in `headers`, if any.
pub fn matching_rule(headers: &[Header]) -> Option<&'static IgnoreRule> {
    IGNORE_RULES
        .iter()
        .find(|rule| headers.iter().any(|h| rule.matches(h)))
}

/// Whether a message with these headers should be dropped instead of relayed.
pub fn is_pointless(headers: &[Header]) -> bool {
    match matching_rule(headers) {
        Some(rule) => {
            warn!(
                "Filtering out message due to header combination {}: {}",
                rule.name, rule.value
            );
            true
        }
        None => false,
    }
}
