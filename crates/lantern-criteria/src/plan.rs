use std::collections::HashSet;
use std::time::Duration;

use lantern_types::{Entity, EntityId, EntityKind, Message, NetworkTask, SessionId, Timestamp};

use crate::criteria::{Criteria, DurationFacet, ResponseSource, Scope, SortOrder};
use crate::custom::CompiledRule;
use crate::error::{CriteriaError, CriteriaResult};

/// Reader-side state a match depends on.
#[derive(Clone, Copy, Debug, Default)]
pub struct MatchContext<'a> {
    /// The active session, for `current_session_only`.
    pub current_session: Option<SessionId>,
    /// Pinned entities, for `pinned_only`.
    pub pins: Option<&'a HashSet<EntityId>>,
}

impl<'a> MatchContext<'a> {
    pub fn new(current_session: Option<SessionId>) -> Self {
        Self {
            current_session,
            pins: None,
        }
    }

    pub fn with_pins(mut self, pins: &'a HashSet<EntityId>) -> Self {
        self.pins = Some(pins);
        self
    }

    fn is_pinned(&self, id: &EntityId) -> bool {
        self.pins.is_some_and(|p| p.contains(id))
    }
}

/// Validated criteria plus hints a store can use to narrow its scan.
pub struct QueryPlan {
    criteria: Criteria,
    rules: Vec<CompiledRule>,
    min_duration: Option<Duration>,
    max_duration: Option<Duration>,
}

/// Validate criteria and prepare them for repeated evaluation.
pub fn compile(criteria: &Criteria) -> CriteriaResult<QueryPlan> {
    let rules = criteria
        .custom
        .active_rules()
        .map(CompiledRule::compile)
        .collect::<CriteriaResult<Vec<_>>>()?;
    let facet = &criteria.duration;
    Ok(QueryPlan {
        criteria: criteria.clone(),
        rules,
        min_duration: duration_bound(facet, facet.min, "duration.min")?,
        max_duration: duration_bound(facet, facet.max, "duration.max")?,
    })
}

fn duration_bound(
    facet: &DurationFacet,
    value: Option<f64>,
    field: &str,
) -> CriteriaResult<Option<Duration>> {
    value
        .map(|v| {
            facet.unit.to_std(v).ok_or_else(|| CriteriaError::InvalidValue {
                field: field.to_string(),
                value: v.to_string(),
            })
        })
        .transpose()
}

/// Evaluate criteria against one entity.
///
/// Pure: the result depends only on the arguments. Prefer [`compile`] when
/// matching many entities.
pub fn evaluate(criteria: &Criteria, entity: &Entity, ctx: &MatchContext<'_>) -> CriteriaResult<bool> {
    Ok(compile(criteria)?.matches(entity, ctx))
}

impl QueryPlan {
    pub fn criteria(&self) -> &Criteria {
        &self.criteria
    }

    pub fn scope(&self) -> Scope {
        self.criteria.scope
    }

    pub fn order(&self) -> SortOrder {
        self.criteria.order
    }

    pub fn limit(&self) -> Option<usize> {
        self.criteria.limit
    }

    /// Whether entities of `kind` can match at all.
    pub fn includes(&self, kind: EntityKind) -> bool {
        match self.criteria.scope {
            Scope::All => true,
            Scope::Messages => kind == EntityKind::Message,
            Scope::Tasks => kind == EntityKind::Task,
        }
    }

    /// Label a store can look up in its label index instead of scanning.
    pub fn focused_label(&self) -> Option<&str> {
        let labels = &self.criteria.labels;
        if labels.is_enabled {
            labels.focused.as_deref()
        } else {
            None
        }
    }

    /// Whether matches are restricted to the active session.
    pub fn current_session_only(&self) -> bool {
        self.criteria.dates.is_enabled && self.criteria.dates.current_session_only
    }

    /// Inclusive `created_at` bounds, if any apply.
    pub fn time_bounds(&self) -> (Option<Timestamp>, Option<Timestamp>) {
        let dates = &self.criteria.dates;
        if dates.is_enabled && !dates.current_session_only {
            (dates.start, dates.end)
        } else {
            (None, None)
        }
    }

    pub fn pinned_only(&self) -> bool {
        self.criteria.pinned_only
    }

    /// Whether the entity satisfies every enabled facet.
    pub fn matches(&self, entity: &Entity, ctx: &MatchContext<'_>) -> bool {
        let id = entity.id();
        if !self.includes(id.kind()) {
            return false;
        }
        if self.criteria.pinned_only && !ctx.is_pinned(&id) {
            return false;
        }
        if !self.matches_dates(entity, ctx) {
            return false;
        }
        match entity {
            Entity::Message(m) => self.matches_message(m),
            Entity::Task(t) => self.matches_task(t),
        }
    }

    fn matches_dates(&self, entity: &Entity, ctx: &MatchContext<'_>) -> bool {
        let dates = &self.criteria.dates;
        if !dates.is_enabled {
            return true;
        }
        if dates.current_session_only {
            return ctx.current_session == Some(entity.session_id());
        }
        dates.contains(entity.created_at())
    }

    fn matches_message(&self, message: &Message) -> bool {
        let c = &self.criteria;
        if c.log_levels.is_enabled && !c.log_levels.levels.contains(&message.level) {
            return false;
        }
        if c.labels.is_enabled {
            match &c.labels.focused {
                Some(focused) if *focused != message.label => return false,
                Some(_) => {}
                None if c.labels.hidden.contains(&message.label) => return false,
                None => {}
            }
        }
        self.rules.iter().all(|r| r.matches_message(message))
    }

    fn matches_task(&self, task: &NetworkTask) -> bool {
        let c = &self.criteria;

        if c.hosts.is_enabled && !c.hosts.allowed.is_empty() {
            let allowed = task
                .host
                .as_ref()
                .is_some_and(|h| c.hosts.allowed.contains(h));
            if !allowed {
                return false;
            }
        }

        if c.response.is_enabled {
            let status = &c.response.status_code;
            if !status.is_unbounded() && !task.status_code.is_some_and(|s| status.contains(s)) {
                return false;
            }
            let size = c.response.response_size.in_bytes();
            if !size.contains(task.response_body_size) {
                return false;
            }
            if !c.response.content_type_matches(task.content_type().as_deref()) {
                return false;
            }
        }

        if c.duration.is_enabled && c.duration.has_bound() {
            let Some(duration) = task.duration.filter(|_| task.is_terminal()) else {
                return false;
            };
            if self.min_duration.is_some_and(|min| duration < min) {
                return false;
            }
            if self.max_duration.is_some_and(|max| duration > max) {
                return false;
            }
        }

        if c.networking.is_enabled {
            let n = &c.networking;
            if n.task_type.is_some_and(|t| t != task.task_type) {
                return false;
            }
            match n.source {
                Some(ResponseSource::Cache) if !task.from_cache => return false,
                Some(ResponseSource::Network) if task.from_cache => return false,
                _ => {}
            }
            if n.is_redirect && task.redirect_count == 0 {
                return false;
            }
        }

        self.rules.iter().all(|r| r.matches_task(task))
    }
}

impl std::fmt::Debug for QueryPlan {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QueryPlan")
            .field("scope", &self.criteria.scope)
            .field("focused_label", &self.focused_label())
            .field("time_bounds", &self.time_bounds())
            .field("rules", &self.rules.len())
            .finish()
    }
}
