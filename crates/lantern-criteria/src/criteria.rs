use std::collections::BTreeSet;

use chrono::{Duration as ChronoDuration, TimeZone, Utc};
use lantern_types::{LogLevel, TaskType, Timestamp};
use serde::{Deserialize, Serialize};

use crate::custom::CustomRule;

/// Window used by the `recent` date preset.
pub const RECENT_WINDOW_MINUTES: i64 = 20;

/// Which entity kinds a query returns.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Scope {
    #[default]
    All,
    Messages,
    Tasks,
}

/// Result ordering by `created_at`.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SortOrder {
    #[default]
    NewestFirst,
    OldestFirst,
}

/// A filter over stored entities: scope, ordering, and independently
/// toggleable facets combined with AND.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Criteria {
    pub scope: Scope,
    pub order: SortOrder,
    pub limit: Option<usize>,
    /// Only entities the reader has pinned.
    pub pinned_only: bool,
    pub log_levels: LogLevelsFacet,
    pub labels: LabelsFacet,
    pub dates: DatesFacet,
    pub hosts: HostsFacet,
    pub response: ResponseFacet,
    pub duration: DurationFacet,
    pub networking: NetworkingFacet,
    pub custom: CustomFacet,
}

impl Criteria {
    /// Criteria matching every message and task.
    pub fn all() -> Self {
        Self::default()
    }

    pub fn messages() -> Self {
        Self {
            scope: Scope::Messages,
            ..Self::default()
        }
    }

    pub fn tasks() -> Self {
        Self {
            scope: Scope::Tasks,
            ..Self::default()
        }
    }

    pub fn with_levels(mut self, levels: impl IntoIterator<Item = LogLevel>) -> Self {
        self.log_levels = LogLevelsFacet {
            is_enabled: true,
            levels: levels.into_iter().collect(),
        };
        self
    }

    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn with_order(mut self, order: SortOrder) -> Self {
        self.order = order;
        self
    }

    /// One-line description of the enabled facets, e.g. for export
    /// provenance.
    pub fn summary(&self) -> String {
        let mut parts = Vec::new();
        match self.scope {
            Scope::All => {}
            Scope::Messages => parts.push("messages".to_string()),
            Scope::Tasks => parts.push("tasks".to_string()),
        }
        if self.pinned_only {
            parts.push("pinned".into());
        }
        if self.log_levels.is_enabled && self.log_levels.levels.len() < LogLevel::ALL.len() {
            let levels: Vec<&str> = self.log_levels.levels.iter().map(|l| l.as_str()).collect();
            parts.push(format!("levels={}", levels.join(",")));
        }
        if self.labels.is_enabled {
            if let Some(focused) = &self.labels.focused {
                parts.push(format!("label={focused}"));
            } else if !self.labels.hidden.is_empty() {
                let hidden: Vec<&str> = self.labels.hidden.iter().map(String::as_str).collect();
                parts.push(format!("hidden={}", hidden.join(",")));
            }
        }
        if self.dates.is_enabled {
            if self.dates.current_session_only {
                parts.push("current-session".into());
            } else {
                if let Some(start) = self.dates.start {
                    parts.push(format!("since={}", start.to_rfc3339()));
                }
                if let Some(end) = self.dates.end {
                    parts.push(format!("until={}", end.to_rfc3339()));
                }
            }
        }
        if self.hosts.is_enabled && !self.hosts.allowed.is_empty() {
            let hosts: Vec<&str> = self.hosts.allowed.iter().map(String::as_str).collect();
            parts.push(format!("hosts={}", hosts.join(",")));
        }
        if self.response.is_enabled {
            parts.push("response".into());
        }
        if self.duration.is_enabled {
            parts.push("duration".into());
        }
        if self.networking.is_enabled {
            parts.push("networking".into());
        }
        let rules = self.custom.active_rules().count();
        if rules > 0 {
            parts.push(format!("custom={rules}"));
        }
        if parts.is_empty() {
            "all".into()
        } else {
            parts.join(" ")
        }
    }
}

// ---------------------------------------------------------------------------
// Facets
// ---------------------------------------------------------------------------

/// Messages whose level is in the set.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogLevelsFacet {
    pub is_enabled: bool,
    pub levels: BTreeSet<LogLevel>,
}

impl Default for LogLevelsFacet {
    fn default() -> Self {
        Self {
            is_enabled: true,
            levels: LogLevel::ALL.into_iter().collect(),
        }
    }
}

/// Messages by label: a focused label wins over the hidden set.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct LabelsFacet {
    pub is_enabled: bool,
    pub focused: Option<String>,
    pub hidden: BTreeSet<String>,
}

impl Default for LabelsFacet {
    fn default() -> Self {
        Self {
            is_enabled: true,
            focused: None,
            hidden: BTreeSet::new(),
        }
    }
}

/// Creation-time window, or the active session only.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DatesFacet {
    pub is_enabled: bool,
    /// Inclusive lower bound.
    pub start: Option<Timestamp>,
    /// Inclusive upper bound.
    pub end: Option<Timestamp>,
    /// Overrides `start` and `end` when set.
    pub current_session_only: bool,
}

impl Default for DatesFacet {
    fn default() -> Self {
        Self {
            is_enabled: true,
            start: None,
            end: None,
            current_session_only: false,
        }
    }
}

impl DatesFacet {
    pub fn between(start: Option<Timestamp>, end: Option<Timestamp>) -> Self {
        Self {
            is_enabled: true,
            start,
            end,
            current_session_only: false,
        }
    }

    /// The last twenty minutes before `now`.
    pub fn recent(now: Timestamp) -> Self {
        Self::between(Some(now - ChronoDuration::minutes(RECENT_WINDOW_MINUTES)), None)
    }

    /// Since midnight (UTC) of the day containing `now`.
    pub fn today(now: Timestamp) -> Self {
        let midnight = now
            .date_naive()
            .and_hms_opt(0, 0, 0)
            .map(|naive| Utc.from_utc_datetime(&naive));
        Self::between(midnight, None)
    }

    /// The active session only.
    pub fn session() -> Self {
        Self {
            current_session_only: true,
            ..Self::default()
        }
    }

    pub fn contains(&self, at: Timestamp) -> bool {
        self.start.map_or(true, |s| at >= s) && self.end.map_or(true, |e| at <= e)
    }
}

/// Tasks whose host is in the allowed set. An empty set allows every host.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct HostsFacet {
    pub is_enabled: bool,
    pub allowed: BTreeSet<String>,
}

impl Default for HostsFacet {
    fn default() -> Self {
        Self {
            is_enabled: true,
            allowed: BTreeSet::new(),
        }
    }
}

/// Inclusive range with optional ends.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RangeFilter<T> {
    pub from: Option<T>,
    pub to: Option<T>,
}

impl<T: PartialOrd + Copy> RangeFilter<T> {
    pub fn new(from: Option<T>, to: Option<T>) -> Self {
        Self { from, to }
    }

    pub fn is_unbounded(&self) -> bool {
        self.from.is_none() && self.to.is_none()
    }

    pub fn contains(&self, value: T) -> bool {
        self.from.map_or(true, |f| value >= f) && self.to.map_or(true, |t| value <= t)
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SizeUnit {
    #[default]
    Bytes,
    Kilobytes,
    Megabytes,
}

impl SizeUnit {
    pub fn multiplier(&self) -> u64 {
        match self {
            Self::Bytes => 1,
            Self::Kilobytes => 1024,
            Self::Megabytes => 1024 * 1024,
        }
    }
}

/// Response-size bounds expressed in `unit`.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SizeRange {
    pub range: RangeFilter<u64>,
    pub unit: SizeUnit,
}

impl SizeRange {
    /// The bounds in bytes.
    pub fn in_bytes(&self) -> RangeFilter<u64> {
        let m = self.unit.multiplier();
        RangeFilter::new(
            self.range.from.map(|v| v.saturating_mul(m)),
            self.range.to.map(|v| v.saturating_mul(m)),
        )
    }
}

/// Status code, response size, and content type of tasks.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResponseFacet {
    pub is_enabled: bool,
    pub status_code: RangeFilter<u16>,
    pub response_size: SizeRange,
    /// MIME type to match; `type/*` matches a whole family.
    pub content_type: Option<String>,
}

impl ResponseFacet {
    pub fn content_type_matches(&self, actual: Option<&str>) -> bool {
        let Some(expected) = &self.content_type else {
            return true;
        };
        let Some(actual) = actual else {
            return false;
        };
        let expected = expected.to_ascii_lowercase();
        match expected.strip_suffix("/*") {
            Some(family) => actual.split('/').next() == Some(family),
            None => actual == expected,
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DurationUnit {
    #[default]
    Milliseconds,
    Seconds,
    Minutes,
}

impl DurationUnit {
    /// `value` in this unit as a duration. `None` when it is negative,
    /// not finite, or too large to represent.
    pub fn to_std(&self, value: f64) -> Option<std::time::Duration> {
        let seconds = match self {
            Self::Milliseconds => value / 1000.0,
            Self::Seconds => value,
            Self::Minutes => value * 60.0,
        };
        std::time::Duration::try_from_secs_f64(seconds).ok()
    }
}

/// Duration bounds for terminal tasks.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct DurationFacet {
    pub is_enabled: bool,
    pub min: Option<f64>,
    pub max: Option<f64>,
    pub unit: DurationUnit,
}

impl DurationFacet {
    pub fn has_bound(&self) -> bool {
        self.min.is_some() || self.max.is_some()
    }
}

/// Where a task's response came from.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResponseSource {
    Network,
    Cache,
}

/// Task type, response source, and redirect filters.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetworkingFacet {
    pub is_enabled: bool,
    pub task_type: Option<TaskType>,
    pub source: Option<ResponseSource>,
    /// Only tasks that were redirected at least once.
    pub is_redirect: bool,
}

/// User-defined rules, AND-combined.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct CustomFacet {
    pub is_enabled: bool,
    pub rules: Vec<CustomRule>,
}

impl CustomFacet {
    /// Rules that take part in matching.
    pub fn active_rules(&self) -> impl Iterator<Item = &CustomRule> {
        self.rules
            .iter()
            .filter(move |r| self.is_enabled && r.is_enabled)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::custom::{CustomField, Operator};

    #[test]
    fn defaults_match_everything() {
        let criteria = Criteria::default();
        assert_eq!(criteria.log_levels.levels.len(), LogLevel::ALL.len());
        assert!(criteria.labels.focused.is_none());
        assert!(!criteria.response.is_enabled);
        assert_eq!(criteria.summary(), "all");
    }

    #[test]
    fn recent_preset_covers_twenty_minutes() {
        let now = Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap();
        let recent = DatesFacet::recent(now);
        assert!(recent.contains(now - ChronoDuration::minutes(19)));
        assert!(!recent.contains(now - ChronoDuration::minutes(21)));
    }

    #[test]
    fn today_preset_starts_at_midnight() {
        let now = Utc.with_ymd_and_hms(2024, 5, 1, 12, 30, 0).unwrap();
        let today = DatesFacet::today(now);
        assert_eq!(today.start, Some(Utc.with_ymd_and_hms(2024, 5, 1, 0, 0, 0).unwrap()));
        assert!(today.end.is_none());
    }

    #[test]
    fn size_range_scales_by_unit() {
        let size = SizeRange {
            range: RangeFilter::new(Some(1), Some(2)),
            unit: SizeUnit::Kilobytes,
        };
        assert_eq!(size.in_bytes(), RangeFilter::new(Some(1024), Some(2048)));
    }

    #[test]
    fn content_type_families() {
        let facet = ResponseFacet {
            content_type: Some("image/*".into()),
            ..Default::default()
        };
        assert!(facet.content_type_matches(Some("image/png")));
        assert!(!facet.content_type_matches(Some("application/json")));
        assert!(!facet.content_type_matches(None));
    }

    #[test]
    fn summary_lists_enabled_facets() {
        let mut criteria = Criteria::messages().with_levels([LogLevel::Error, LogLevel::Critical]);
        criteria.labels.focused = Some("auth".into());
        criteria.custom.is_enabled = true;
        criteria
            .custom
            .rules
            .push(CustomRule::new(CustomField::Text, Operator::Contains, "x"));
        assert_eq!(
            criteria.summary(),
            "messages levels=error,critical label=auth custom=1"
        );
    }

    #[test]
    fn criteria_serde_roundtrip_with_partial_input() {
        let criteria: Criteria = serde_json::from_str(r#"{"scope":"tasks","limit":5}"#).unwrap();
        assert_eq!(criteria.scope, Scope::Tasks);
        assert_eq!(criteria.limit, Some(5));
        assert!(criteria.log_levels.is_enabled);

        let json = serde_json::to_string(&criteria).unwrap();
        let back: Criteria = serde_json::from_str(&json).unwrap();
        assert_eq!(back, criteria);
    }
}
