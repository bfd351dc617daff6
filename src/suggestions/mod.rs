//! Context-aware "next action" suggestions
//!
//! [`suggest`] is a pure function of a [`Location`] and a [`ContextSnapshot`].
//! [`SuggestionPanel`] layers session state (open flag, dismissals) on top.

mod context;
mod engine;
mod location;
mod panel;

pub use context::{workflow_status, ApprovalProgress, BatchFlags, CloneStatus, ContextSnapshot, TrainerVmStatus};
pub use engine::{rule_ids, suggest, Category, RoutePattern, Suggestion};
pub use location::{BatchTab, Location, SuggestionAction};
pub use panel::{Navigation, SuggestionPanel};
