//! areaudit-solver - the recursive audit solver.
//!
//! A `Rule` tree (loaded from an area specification) enumerates candidate
//! `Solution`s against a `SolveContext`; auditing a solution claims courses
//! through the per-attempt ledger and produces a `RuleResult` with rank and
//! status; the area driver iterates limited transcripts, retains the best
//! result, and emits progress events.

pub mod area;
pub mod audit;
pub mod context;
pub mod result;
pub mod rule;
pub mod solution;
pub mod solve;

pub use area::{AreaOfStudy, AreaResult};
pub use audit::{run_audit, AuditEvent, AuditOptions};
pub use context::{AuditContext, AuditFacts, SolveContext};
pub use result::RuleResult;
pub use rule::Rule;
pub use solution::Solution;
pub use solve::find_best_solution;
