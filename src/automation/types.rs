//! Persisted automation configuration and its partial-update forms.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};

/// User id used when a config is not bound to a specific account owner.
pub const DEFAULT_USER_ID: &str = "default";

/// Automation settings for a single location.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AutomationConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auto_posting: Option<AutoPostingConfig>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auto_reply: Option<AutoReplyConfig>,
    #[serde(default)]
    pub updated_at: DateTime<Utc>,
}

impl AutomationConfig {
    pub fn posting_enabled(&self) -> bool {
        self.auto_posting.as_ref().is_some_and(|p| p.enabled)
    }

    pub fn reply_enabled(&self) -> bool {
        self.auto_reply.as_ref().is_some_and(|r| r.enabled)
    }
}

/// Human-facing posting cadence.
///
/// Unknown labels are kept verbatim so a bad value round-trips through
/// storage and degrades to "no schedule" instead of failing to load.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum Frequency {
    #[default]
    Daily,
    /// Every second day of the month.
    Alternative,
    Weekly,
    TwiceWeekly,
    Custom,
    /// Every 30 seconds, for manual verification only.
    TestInterval,
    Unsupported(String),
}

impl Frequency {
    pub fn as_str(&self) -> &str {
        match self {
            Self::Daily => "daily",
            Self::Alternative => "alternative",
            Self::Weekly => "weekly",
            Self::TwiceWeekly => "twice-weekly",
            Self::Custom => "custom",
            Self::TestInterval => "test-interval",
            Self::Unsupported(raw) => raw,
        }
    }
}

impl From<String> for Frequency {
    fn from(raw: String) -> Self {
        match raw.trim().to_lowercase().as_str() {
            "daily" => Self::Daily,
            "alternative" | "alternate" => Self::Alternative,
            "weekly" => Self::Weekly,
            "twice-weekly" | "twice_weekly" | "twiceweekly" => Self::TwiceWeekly,
            "custom" => Self::Custom,
            "test-interval" | "test30s" | "test" => Self::TestInterval,
            _ => Self::Unsupported(raw),
        }
    }
}

impl From<Frequency> for String {
    fn from(freq: Frequency) -> Self {
        freq.as_str().to_string()
    }
}

impl std::fmt::Display for Frequency {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Postal address used for the trailing address line of posts.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BusinessAddress {
    #[serde(default)]
    pub address_lines: Vec<String>,
    #[serde(default)]
    pub locality: Option<String>,
    #[serde(default)]
    pub administrative_area: Option<String>,
    #[serde(default)]
    pub postal_code: Option<String>,
}

impl BusinessAddress {
    /// `"12 Main St, Pune, Maharashtra 411001"`, or `None` when every part is blank.
    pub fn display_line(&self) -> Option<String> {
        let mut parts: Vec<String> = self
            .address_lines
            .iter()
            .map(|l| l.trim())
            .filter(|l| !l.is_empty())
            .map(str::to_string)
            .collect();

        if let Some(locality) = non_blank(self.locality.as_deref()) {
            parts.push(locality.to_string());
        }

        let region = [
            non_blank(self.administrative_area.as_deref()),
            non_blank(self.postal_code.as_deref()),
        ]
        .into_iter()
        .flatten()
        .collect::<Vec<_>>()
        .join(" ");
        if !region.is_empty() {
            parts.push(region);
        }

        if parts.is_empty() {
            None
        } else {
            Some(parts.join(", "))
        }
    }
}

fn non_blank(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|v| !v.is_empty())
}

/// Button type requested for a post.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ButtonType {
    CallNow,
    Book,
    Order,
    Buy,
    LearnMore,
    SignUp,
    /// Pick an action from the business category.
    #[default]
    Auto,
    #[serde(rename = "none")]
    NoButton,
}

/// Call-to-action preferences for auto-posts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CallToActionSpec {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(rename = "type", default)]
    pub button_type: ButtonType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phone_number: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub custom_url: Option<String>,
}

impl Default for CallToActionSpec {
    fn default() -> Self {
        Self {
            enabled: true,
            button_type: ButtonType::Auto,
            phone_number: None,
            custom_url: None,
        }
    }
}

/// Auto-posting settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AutoPostingConfig {
    #[serde(default)]
    pub enabled: bool,
    /// Time of day, `HH:MM`.
    #[serde(default = "default_schedule")]
    pub schedule: String,
    #[serde(default)]
    pub frequency: Frequency,
    /// 0 = Sunday .. 6 = Saturday; weekly only.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub day_of_week: Option<u8>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub custom_times: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timezone: Option<String>,
    #[serde(default)]
    pub business_name: String,
    #[serde(default)]
    pub category: String,
    #[serde(default, deserialize_with = "deserialize_keywords")]
    pub keywords: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub website_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phone_number: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub address: Option<BusinessAddress>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub button: Option<CallToActionSpec>,
    #[serde(default = "default_user_id")]
    pub user_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub account_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_run: Option<DateTime<Utc>>,
}

impl Default for AutoPostingConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            schedule: default_schedule(),
            frequency: Frequency::Daily,
            day_of_week: None,
            custom_times: Vec::new(),
            timezone: None,
            business_name: String::new(),
            category: String::new(),
            keywords: String::new(),
            website_url: None,
            phone_number: None,
            address: None,
            button: None,
            user_id: default_user_id(),
            account_id: None,
            last_run: None,
        }
    }
}

impl AutoPostingConfig {
    pub fn keyword_list(&self) -> Vec<String> {
        split_keywords(&self.keywords)
    }

    /// True when the two configs would compile to different jobs.
    pub fn schedule_differs(&self, other: &AutoPostingConfig) -> bool {
        self.enabled != other.enabled
            || self.schedule != other.schedule
            || self.frequency != other.frequency
            || self.day_of_week != other.day_of_week
            || self.custom_times.first() != other.custom_times.first()
            || self.timezone != other.timezone
    }
}

/// Review auto-reply settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AutoReplyConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub business_name: String,
    #[serde(default)]
    pub category: String,
    #[serde(default, deserialize_with = "deserialize_keywords")]
    pub keywords: String,
    #[serde(default = "default_true")]
    pub reply_to_all: bool,
    #[serde(default = "default_true")]
    pub reply_to_positive: bool,
    #[serde(default = "default_true")]
    pub reply_to_negative: bool,
    #[serde(default = "default_true")]
    pub reply_to_neutral: bool,
    #[serde(default = "default_user_id")]
    pub user_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub account_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_check: Option<DateTime<Utc>>,
}

impl Default for AutoReplyConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            business_name: String::new(),
            category: String::new(),
            keywords: String::new(),
            reply_to_all: true,
            reply_to_positive: true,
            reply_to_negative: true,
            reply_to_neutral: true,
            user_id: default_user_id(),
            account_id: None,
            last_check: None,
        }
    }
}

impl AutoReplyConfig {
    pub fn keyword_list(&self) -> Vec<String> {
        split_keywords(&self.keywords)
    }
}

/// Partial update for a location's settings, as sent by callers.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AutomationUpdate {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auto_posting: Option<AutoPostingUpdate>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auto_reply: Option<AutoReplyUpdate>,
}

impl AutomationUpdate {
    /// Merge this update onto `base`, field by field.
    pub fn apply_to(self, base: Option<AutomationConfig>, now: DateTime<Utc>) -> AutomationConfig {
        let mut config = base.unwrap_or_default();
        if let Some(update) = self.auto_posting {
            config.auto_posting = Some(update.apply_to(config.auto_posting.take().unwrap_or_default()));
        }
        if let Some(update) = self.auto_reply {
            config.auto_reply = Some(update.apply_to(config.auto_reply.take().unwrap_or_default()));
        }
        config.updated_at = now;
        config
    }
}

/// Field-level patch for [`AutoPostingConfig`]. Blank strings clear optional fields.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AutoPostingUpdate {
    pub enabled: Option<bool>,
    pub schedule: Option<String>,
    pub frequency: Option<Frequency>,
    pub day_of_week: Option<u8>,
    pub custom_times: Option<Vec<String>>,
    pub timezone: Option<String>,
    pub business_name: Option<String>,
    pub category: Option<String>,
    #[serde(default, deserialize_with = "deserialize_optional_keywords")]
    pub keywords: Option<String>,
    pub website_url: Option<String>,
    pub phone_number: Option<String>,
    pub address: Option<BusinessAddress>,
    pub button: Option<CallToActionSpec>,
    pub user_id: Option<String>,
    pub account_id: Option<String>,
}

impl AutoPostingUpdate {
    pub fn apply_to(self, mut base: AutoPostingConfig) -> AutoPostingConfig {
        set(&mut base.enabled, self.enabled);
        set(&mut base.schedule, self.schedule);
        set(&mut base.frequency, self.frequency);
        if self.day_of_week.is_some() {
            base.day_of_week = self.day_of_week;
        }
        set(&mut base.custom_times, self.custom_times);
        set_optional(&mut base.timezone, self.timezone);
        set(&mut base.business_name, self.business_name);
        set(&mut base.category, self.category);
        set(&mut base.keywords, self.keywords);
        set_optional(&mut base.website_url, self.website_url);
        set_optional(&mut base.phone_number, self.phone_number);
        if self.address.is_some() {
            base.address = self.address;
        }
        if self.button.is_some() {
            base.button = self.button;
        }
        set_user_id(&mut base.user_id, self.user_id);
        set_optional(&mut base.account_id, self.account_id);
        base
    }
}

/// Field-level patch for [`AutoReplyConfig`].
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AutoReplyUpdate {
    pub enabled: Option<bool>,
    pub business_name: Option<String>,
    pub category: Option<String>,
    #[serde(default, deserialize_with = "deserialize_optional_keywords")]
    pub keywords: Option<String>,
    pub reply_to_all: Option<bool>,
    pub reply_to_positive: Option<bool>,
    pub reply_to_negative: Option<bool>,
    pub reply_to_neutral: Option<bool>,
    pub user_id: Option<String>,
    pub account_id: Option<String>,
}

impl AutoReplyUpdate {
    pub fn apply_to(self, mut base: AutoReplyConfig) -> AutoReplyConfig {
        set(&mut base.enabled, self.enabled);
        set(&mut base.business_name, self.business_name);
        set(&mut base.category, self.category);
        set(&mut base.keywords, self.keywords);
        set(&mut base.reply_to_all, self.reply_to_all);
        set(&mut base.reply_to_positive, self.reply_to_positive);
        set(&mut base.reply_to_negative, self.reply_to_negative);
        set(&mut base.reply_to_neutral, self.reply_to_neutral);
        set_user_id(&mut base.user_id, self.user_id);
        set_optional(&mut base.account_id, self.account_id);
        base
    }
}

fn set<T>(target: &mut T, value: Option<T>) {
    if let Some(value) = value {
        *target = value;
    }
}

fn set_optional(target: &mut Option<String>, value: Option<String>) {
    if let Some(value) = value {
        let trimmed = value.trim();
        *target = if trimmed.is_empty() {
            None
        } else {
            Some(trimmed.to_string())
        };
    }
}

fn set_user_id(target: &mut String, value: Option<String>) {
    if let Some(value) = value {
        let trimmed = value.trim();
        *target = if trimmed.is_empty() {
            default_user_id()
        } else {
            trimmed.to_string()
        };
    }
}

fn split_keywords(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|k| !k.is_empty())
        .map(str::to_string)
        .collect()
}

#[derive(Deserialize)]
#[serde(untagged)]
enum KeywordsRepr {
    Joined(String),
    List(Vec<String>),
}

impl From<KeywordsRepr> for String {
    fn from(repr: KeywordsRepr) -> Self {
        match repr {
            KeywordsRepr::Joined(s) => s,
            KeywordsRepr::List(items) => items.join(","),
        }
    }
}

fn deserialize_keywords<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    Option::<KeywordsRepr>::deserialize(deserializer).map(|repr| repr.map(Into::into).unwrap_or_default())
}

fn deserialize_optional_keywords<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    Option::<KeywordsRepr>::deserialize(deserializer).map(|repr| repr.map(Into::into))
}

fn default_schedule() -> String {
    "09:00".to_string()
}

fn default_user_id() -> String {
    DEFAULT_USER_ID.to_string()
}

fn default_true() -> bool {
    true
}
