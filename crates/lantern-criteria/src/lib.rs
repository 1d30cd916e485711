//! Filter criteria for Lantern entities.
//!
//! A [`Criteria`] is a set of independently toggleable facets (log levels,
//! labels, dates, hosts, response, duration, networking, custom rules)
//! combined with AND. A facet that is disabled matches everything, and a
//! facet naming fields an entity kind does not have is neutral for that kind.
//!
//! [`compile`] validates criteria into a [`QueryPlan`] that evaluates
//! entities cheaply and exposes index hints (focused label, time bounds,
//! session restriction, scope) to the entity store.

pub mod criteria;
pub mod custom;
pub mod error;
pub mod plan;

pub use criteria::{
    Criteria, CustomFacet, DatesFacet, DurationFacet, DurationUnit, HostsFacet, LabelsFacet,
    LogLevelsFacet, NetworkingFacet, RangeFilter, ResponseFacet, ResponseSource, Scope, SizeRange,
    SizeUnit, SortOrder, RECENT_WINDOW_MINUTES,
};
pub use custom::{CustomField, CustomRule, Operator};
pub use error::{CriteriaError, CriteriaResult};
pub use plan::{compile, evaluate, MatchContext, QueryPlan};
