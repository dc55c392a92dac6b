//! Result statuses and the aggregation lattice.

use serde::{Deserialize, Serialize};

/// Status of an audited node, from best to worst. The derived `Ord` follows
/// declaration order, so "worst of" is simply `max`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ResultStatus {
    /// Waived by an override or an externally-audited requirement.
    Waived,
    /// Fully satisfied by completed courses.
    Pass,
    /// Satisfied, but some matched courses are still in progress this term.
    PendingCurrent,
    /// Satisfied, but some matched courses are registrations in a future term.
    PendingRegistered,
    /// Partially satisfied.
    NeedsMoreItems,
    /// Nothing matched at all.
    Empty,
}

impl ResultStatus {
    /// A node is "ok" iff its status is one of the passing statuses.
    pub fn is_passing(self) -> bool {
        matches!(
            self,
            ResultStatus::Waived
                | ResultStatus::Pass
                | ResultStatus::PendingCurrent
                | ResultStatus::PendingRegistered
        )
    }

    /// Worst status over a set of contributing children. An empty set audits
    /// as `Pass` (vacuous satisfaction, e.g. a count of zero).
    pub fn worst(statuses: impl IntoIterator<Item = ResultStatus>) -> ResultStatus {
        statuses
            .into_iter()
            .max()
            .unwrap_or(ResultStatus::Pass)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ResultStatus::Waived => "waived",
            ResultStatus::Pass => "pass",
            ResultStatus::PendingCurrent => "pending-current",
            ResultStatus::PendingRegistered => "pending-registered",
            ResultStatus::NeedsMoreItems => "needs-more-items",
            ResultStatus::Empty => "empty",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lattice_order_best_to_worst() {
        assert!(ResultStatus::Waived < ResultStatus::Pass);
        assert!(ResultStatus::Pass < ResultStatus::PendingCurrent);
        assert!(ResultStatus::PendingCurrent < ResultStatus::PendingRegistered);
        assert!(ResultStatus::PendingRegistered < ResultStatus::NeedsMoreItems);
        assert!(ResultStatus::NeedsMoreItems < ResultStatus::Empty);
    }

    #[test]
    fn worst_picks_the_worst_contributor() {
        let worst = ResultStatus::worst([
            ResultStatus::Pass,
            ResultStatus::PendingCurrent,
            ResultStatus::Waived,
        ]);
        assert_eq!(worst, ResultStatus::PendingCurrent);
        assert_eq!(ResultStatus::worst([]), ResultStatus::Pass);
    }

    #[test]
    fn passing_statuses() {
        assert!(ResultStatus::Waived.is_passing());
        assert!(ResultStatus::PendingRegistered.is_passing());
        assert!(!ResultStatus::NeedsMoreItems.is_passing());
        assert!(!ResultStatus::Empty.is_passing());
    }

    #[test]
    fn serde_uses_kebab_case() {
        let json = serde_json::to_string(&ResultStatus::PendingCurrent).unwrap();
        assert_eq!(json, r#""pending-current""#);
    }
}
