//! Plan-Approval State Machine (spec §4.8): drives planner -> evaluator
//! iterations until a plan is approved or the attempt bound is exhausted.

pub mod state;

pub use state::{
    CitationPolicy, PersonaCaller, PlanApprovalLoop, PlanApprovalOutcome, PlanAttempt,
    PlanRequestContext,
};
