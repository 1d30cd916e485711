use std::fmt;

use lantern_types::{EntityKind, Message, NetworkTask};
use regex::{Regex, RegexBuilder};
use serde::{Deserialize, Serialize};

use crate::error::{CriteriaError, CriteriaResult};

// ---------------------------------------------------------------------------
// Rule types
// ---------------------------------------------------------------------------

/// Entity field a custom rule inspects.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CustomField {
    // Messages
    Level,
    Label,
    Text,
    /// Value of one metadata entry.
    Metadata(String),
    File,
    Function,
    Line,
    // Tasks
    Url,
    Host,
    Method,
    StatusCode,
    /// Duration in milliseconds.
    Duration,
    ResponseBodySize,
    RequestBodySize,
    ContentType,
    ErrorCode,
    ErrorDescription,
    /// Value of one response header, matched case-insensitively by name.
    ResponseHeader(String),
    /// Value of one request header, matched case-insensitively by name.
    RequestHeader(String),
}

impl CustomField {
    /// The entity kind that carries this field.
    pub fn kind(&self) -> EntityKind {
        match self {
            Self::Level
            | Self::Label
            | Self::Text
            | Self::Metadata(_)
            | Self::File
            | Self::Function
            | Self::Line => EntityKind::Message,
            _ => EntityKind::Task,
        }
    }

    /// Whether values of this field are numbers.
    pub fn is_numeric(&self) -> bool {
        matches!(
            self,
            Self::Line
                | Self::StatusCode
                | Self::Duration
                | Self::ResponseBodySize
                | Self::RequestBodySize
                | Self::ErrorCode
        )
    }

    fn message_value(&self, message: &Message) -> Option<FieldValue> {
        let source = message.source.as_ref();
        match self {
            Self::Level => Some(FieldValue::Text(message.level.as_str().to_string())),
            Self::Label => Some(FieldValue::Text(message.label.clone())),
            Self::Text => Some(FieldValue::Text(message.text.clone())),
            Self::Metadata(key) => message.metadata.get(key).cloned().map(FieldValue::Text),
            Self::File => source.map(|s| FieldValue::Text(s.file.clone())),
            Self::Function => source.map(|s| FieldValue::Text(s.function.clone())),
            Self::Line => source.map(|s| FieldValue::Number(f64::from(s.line))),
            _ => None,
        }
    }

    fn task_value(&self, task: &NetworkTask) -> Option<FieldValue> {
        match self {
            Self::Url => Some(FieldValue::Text(task.url.clone())),
            Self::Host => task.host.clone().map(FieldValue::Text),
            Self::Method => Some(FieldValue::Text(task.method.clone())),
            Self::StatusCode => task.status_code.map(|c| FieldValue::Number(f64::from(c))),
            Self::Duration => task
                .duration
                .map(|d| FieldValue::Number(d.as_secs_f64() * 1000.0)),
            Self::ResponseBodySize => Some(FieldValue::Number(task.response_body_size as f64)),
            Self::RequestBodySize => Some(FieldValue::Number(task.request_body_size as f64)),
            Self::ContentType => task.content_type().map(FieldValue::Text),
            Self::ErrorCode => task.error.as_ref().map(|e| FieldValue::Number(e.code as f64)),
            Self::ErrorDescription => task
                .error
                .as_ref()
                .map(|e| FieldValue::Text(e.description.clone())),
            Self::ResponseHeader(name) => task
                .response_header(name)
                .map(|v| FieldValue::Text(v.to_string())),
            Self::RequestHeader(name) => task
                .request_header(name)
                .map(|v| FieldValue::Text(v.to_string())),
            _ => None,
        }
    }
}

impl fmt::Display for CustomField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Level => f.write_str("level"),
            Self::Label => f.write_str("label"),
            Self::Text => f.write_str("text"),
            Self::Metadata(key) => write!(f, "metadata.{key}"),
            Self::File => f.write_str("file"),
            Self::Function => f.write_str("function"),
            Self::Line => f.write_str("line"),
            Self::Url => f.write_str("url"),
            Self::Host => f.write_str("host"),
            Self::Method => f.write_str("method"),
            Self::StatusCode => f.write_str("status_code"),
            Self::Duration => f.write_str("duration"),
            Self::ResponseBodySize => f.write_str("response_body_size"),
            Self::RequestBodySize => f.write_str("request_body_size"),
            Self::ContentType => f.write_str("content_type"),
            Self::ErrorCode => f.write_str("error_code"),
            Self::ErrorDescription => f.write_str("error_description"),
            Self::ResponseHeader(name) => write!(f, "response_header.{name}"),
            Self::RequestHeader(name) => write!(f, "request_header.{name}"),
        }
    }
}

/// Comparison applied by a custom rule.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Operator {
    Equals,
    NotEquals,
    Contains,
    NotContains,
    BeginsWith,
    Regex,
    GreaterThan,
    LessThan,
}

impl Operator {
    fn is_ordering(&self) -> bool {
        matches!(self, Self::GreaterThan | Self::LessThan)
    }
}

impl fmt::Display for Operator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Equals => "equals",
            Self::NotEquals => "not_equals",
            Self::Contains => "contains",
            Self::NotContains => "not_contains",
            Self::BeginsWith => "begins_with",
            Self::Regex => "regex",
            Self::GreaterThan => "greater_than",
            Self::LessThan => "less_than",
        })
    }
}

/// A user-defined predicate `{field} {operator} {value}`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CustomRule {
    pub field: CustomField,
    pub operator: Operator,
    pub value: String,
    pub is_enabled: bool,
}

impl CustomRule {
    pub fn new(field: CustomField, operator: Operator, value: impl Into<String>) -> Self {
        Self {
            field,
            operator,
            value: value.into(),
            is_enabled: true,
        }
    }
}

// ---------------------------------------------------------------------------
// Compiled rules
// ---------------------------------------------------------------------------

enum FieldValue {
    Text(String),
    Number(f64),
}

enum Matcher {
    Text(String),
    Number(f64),
    Pattern(Regex),
}

/// A validated custom rule, ready to evaluate.
pub(crate) struct CompiledRule {
    field: CustomField,
    operator: Operator,
    matcher: Matcher,
}

impl CompiledRule {
    pub(crate) fn compile(rule: &CustomRule) -> CriteriaResult<Self> {
        let matcher = match rule.operator {
            Operator::Regex => {
                let regex = RegexBuilder::new(&rule.value)
                    .case_insensitive(true)
                    .build()
                    .map_err(|e| CriteriaError::InvalidRegex {
                        pattern: rule.value.clone(),
                        reason: e.to_string(),
                    })?;
                Matcher::Pattern(regex)
            }
            op if op.is_ordering() => {
                if !rule.field.is_numeric() {
                    return Err(CriteriaError::UnsupportedOperator {
                        field: rule.field.clone(),
                        operator: op,
                    });
                }
                Matcher::Number(parse_number(&rule.field, &rule.value)?)
            }
            Operator::Equals | Operator::NotEquals if rule.field.is_numeric() => {
                Matcher::Number(parse_number(&rule.field, &rule.value)?)
            }
            _ => Matcher::Text(rule.value.to_lowercase()),
        };
        Ok(Self {
            field: rule.field.clone(),
            operator: rule.operator,
            matcher,
        })
    }

    pub(crate) fn kind(&self) -> EntityKind {
        self.field.kind()
    }

    /// Evaluate against a message. Returns `true` for fields messages lack.
    pub(crate) fn matches_message(&self, message: &Message) -> bool {
        if self.kind() != EntityKind::Message {
            return true;
        }
        self.test(self.field.message_value(message))
    }

    /// Evaluate against a task. Returns `true` for fields tasks lack.
    pub(crate) fn matches_task(&self, task: &NetworkTask) -> bool {
        if self.kind() != EntityKind::Task {
            return true;
        }
        self.test(self.field.task_value(task))
    }

    fn test(&self, value: Option<FieldValue>) -> bool {
        // An absent value never satisfies a rule.
        let Some(value) = value else {
            return false;
        };
        match (&self.matcher, value) {
            (Matcher::Number(expected), FieldValue::Number(actual)) => match self.operator {
                Operator::Equals => actual == *expected,
                Operator::NotEquals => actual != *expected,
                Operator::GreaterThan => actual > *expected,
                Operator::LessThan => actual < *expected,
                _ => false,
            },
            (Matcher::Pattern(regex), FieldValue::Text(actual)) => regex.is_match(&actual),
            (Matcher::Pattern(regex), FieldValue::Number(actual)) => {
                regex.is_match(&format_number(actual))
            }
            (Matcher::Text(expected), actual) => {
                let actual = match actual {
                    FieldValue::Text(s) => s.to_lowercase(),
                    FieldValue::Number(n) => format_number(n),
                };
                match self.operator {
                    Operator::Equals => actual == *expected,
                    Operator::NotEquals => actual != *expected,
                    Operator::Contains => actual.contains(expected.as_str()),
                    Operator::NotContains => !actual.contains(expected.as_str()),
                    Operator::BeginsWith => actual.starts_with(expected.as_str()),
                    _ => false,
                }
            }
            (Matcher::Number(_), FieldValue::Text(_)) => false,
        }
    }
}

fn parse_number(field: &CustomField, value: &str) -> CriteriaResult<f64> {
    value
        .trim()
        .parse::<f64>()
        .ok()
        .filter(|n| n.is_finite())
        .ok_or_else(|| CriteriaError::InvalidValue {
            field: field.to_string(),
            value: value.to_string(),
        })
}

fn format_number(n: f64) -> String {
    if n.fract() == 0.0 && n.abs() < 1e15 {
        format!("{}", n as i64)
    } else {
        n.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use lantern_types::{LogLevel, SessionId, SourceLocation};
    use std::time::Duration;

    fn message() -> Message {
        Message::new(SessionId::new(), Utc::now(), "Auth", LogLevel::Info, "Token Refreshed")
            .with_source(SourceLocation {
                file: "auth.rs".into(),
                function: "refresh".into(),
                line: 42,
            })
    }

    fn task() -> NetworkTask {
        let mut task = NetworkTask::new(SessionId::new(), Utc::now(), "GET", "https://api.example.com/v1");
        task.status_code = Some(404);
        task.duration = Some(Duration::from_millis(250));
        task
    }

    fn compile(field: CustomField, op: Operator, value: &str) -> CompiledRule {
        CompiledRule::compile(&CustomRule::new(field, op, value)).unwrap()
    }

    #[test]
    fn text_operators_are_case_insensitive() {
        let msg = message();
        assert!(compile(CustomField::Label, Operator::Equals, "auth").matches_message(&msg));
        assert!(compile(CustomField::Text, Operator::Contains, "refresh").matches_message(&msg));
        assert!(compile(CustomField::Text, Operator::BeginsWith, "token").matches_message(&msg));
        assert!(compile(CustomField::Text, Operator::NotContains, "expired").matches_message(&msg));
        assert!(!compile(CustomField::Label, Operator::NotEquals, "AUTH").matches_message(&msg));
    }

    #[test]
    fn numeric_comparisons() {
        let task = task();
        assert!(compile(CustomField::StatusCode, Operator::GreaterThan, "399").matches_task(&task));
        assert!(compile(CustomField::StatusCode, Operator::Equals, "404").matches_task(&task));
        assert!(compile(CustomField::Duration, Operator::LessThan, "300").matches_task(&task));
        assert!(!compile(CustomField::Duration, Operator::GreaterThan, "300").matches_task(&task));
        assert!(compile(CustomField::Line, Operator::Equals, "42").matches_message(&message()));
    }

    #[test]
    fn regex_operator() {
        let task = task();
        assert!(compile(CustomField::Url, Operator::Regex, r"^https://api\.").matches_task(&task));
        assert!(compile(CustomField::StatusCode, Operator::Regex, r"^4\d\d$").matches_task(&task));
        assert!(compile(CustomField::Url, Operator::Regex, r"^HTTPS://API\.").matches_task(&task));
    }

    #[test]
    fn rules_for_other_kind_are_neutral() {
        let rule = compile(CustomField::StatusCode, Operator::Equals, "200");
        assert!(rule.matches_message(&message()));
        let rule = compile(CustomField::Label, Operator::Equals, "nope");
        assert!(rule.matches_task(&task()));
    }

    #[test]
    fn absent_values_never_match() {
        let mut task = task();
        task.status_code = None;
        assert!(!compile(CustomField::StatusCode, Operator::NotEquals, "200").matches_task(&task));
        assert!(!compile(CustomField::ErrorDescription, Operator::NotContains, "x").matches_task(&task));
    }

    #[test]
    fn compile_rejects_bad_rules() {
        let bad_regex = CustomRule::new(CustomField::Text, Operator::Regex, "(unclosed");
        assert!(matches!(
            CompiledRule::compile(&bad_regex),
            Err(CriteriaError::InvalidRegex { .. })
        ));

        let bad_number = CustomRule::new(CustomField::StatusCode, Operator::GreaterThan, "abc");
        assert!(matches!(
            CompiledRule::compile(&bad_number),
            Err(CriteriaError::InvalidValue { .. })
        ));

        let ordering_on_text = CustomRule::new(CustomField::Label, Operator::LessThan, "b");
        assert!(matches!(
            CompiledRule::compile(&ordering_on_text),
            Err(CriteriaError::UnsupportedOperator { .. })
        ));
    }

    #[test]
    fn field_display_names() {
        assert_eq!(CustomField::Metadata("user".into()).to_string(), "metadata.user");
        assert_eq!(CustomField::StatusCode.to_string(), "status_code");
        assert_eq!(Operator::NotContains.to_string(), "not_contains");
    }
}
