//! Call-to-action derivation for auto-posts.

use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::automation::types::{AutoPostingConfig, ButtonType, CallToActionSpec};

/// Action types accepted by the Business Profile `localPosts` API.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ActionType {
    Book,
    Order,
    Shop,
    LearnMore,
    SignUp,
    Call,
}

/// A resolved call to action, in the shape the API expects.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CallToAction {
    pub action_type: ActionType,
    /// Absent for `CALL`; the API dials the profile's phone number.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
}

static CATEGORY_RULES: LazyLock<Vec<(Regex, ActionType)>> = LazyLock::new(|| {
    [
        (r"(?i)restaurant|food", ActionType::Order),
        (r"(?i)salon|spa|health|clinic", ActionType::Book),
        (r"(?i)retail|shop|store", ActionType::Shop),
        (r"(?i)education|school|course", ActionType::SignUp),
    ]
    .into_iter()
    .map(|(pattern, action)| {
        (
            Regex::new(pattern).expect("category patterns are valid"),
            action,
        )
    })
    .collect()
});

/// Pick an action from the business category, first match wins.
pub fn action_for_category(category: &str) -> ActionType {
    CATEGORY_RULES
        .iter()
        .find(|(pattern, _)| pattern.is_match(category))
        .map(|(_, action)| *action)
        .unwrap_or(ActionType::LearnMore)
}

/// The action a button asks for, before checking phone/URL availability.
pub fn resolve_action_type(spec: Option<&CallToActionSpec>, category: &str) -> Option<ActionType> {
    let spec = spec.filter(|s| s.enabled)?;
    match spec.button_type {
        ButtonType::NoButton => None,
        ButtonType::Auto => Some(action_for_category(category)),
        ButtonType::CallNow => Some(ActionType::Call),
        ButtonType::Book => Some(ActionType::Book),
        ButtonType::Order => Some(ActionType::Order),
        ButtonType::Buy => Some(ActionType::Shop),
        ButtonType::LearnMore => Some(ActionType::LearnMore),
        ButtonType::SignUp => Some(ActionType::SignUp),
    }
}

/// Build the CTA for a post, or `None` when the button cannot be satisfied.
///
/// A missing CTA never fails the post itself.
pub fn derive_call_to_action(config: &AutoPostingConfig) -> Option<CallToAction> {
    let spec = config.button.as_ref();
    let action_type = resolve_action_type(spec, &config.category)?;

    if action_type == ActionType::Call {
        let phone = spec
            .and_then(|s| non_blank(s.phone_number.as_deref()))
            .or_else(|| non_blank(config.phone_number.as_deref()));
        if phone.is_none() {
            tracing::warn!(
                business = %config.business_name,
                "CALL button requested but no phone number is configured, posting without CTA"
            );
            return None;
        }
        return Some(CallToAction {
            action_type,
            url: None,
        });
    }

    let url = spec
        .and_then(|s| non_blank(s.custom_url.as_deref()))
        .or_else(|| non_blank(config.website_url.as_deref()));
    match url {
        Some(url) => Some(CallToAction {
            action_type,
            url: Some(url.to_string()),
        }),
        None => {
            tracing::warn!(
                business = %config.business_name,
                action = ?action_type,
                "CTA requested but no URL is configured, posting without CTA"
            );
            None
        }
    }
}

fn non_blank(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|v| !v.is_empty())
}
