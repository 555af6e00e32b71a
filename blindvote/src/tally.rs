use crate::*;
use indexmap::IndexMap;
use rust_decimal::Decimal;

/// Election results as reported to administrators
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct ElectionResults {
    /// Count per candidate label, every candidate listed in ballot order
    pub votes: IndexMap<String, u64>,
    pub total_eligible: usize,
    pub total_signed: usize,

    /// `total_signed / total_eligible * 100`, rounded to two decimal places
    pub participation: Decimal,
}

impl ElectionResults {
    pub fn collect(
        eligibility: &EligibilityLedger,
        ballots: &BallotLedger,
        candidates: &CandidateList,
    ) -> Self {
        let mut votes: IndexMap<String, u64> = candidates
            .iter()
            .map(|candidate| (candidate.label.clone(), 0))
            .collect();
        for (label, count) in ballots.tally() {
            *votes.entry(label).or_insert(0) += count;
        }

        let total_eligible = eligibility.total_eligible();
        let total_signed = eligibility.total_signed();
        ElectionResults {
            votes,
            total_eligible,
            total_signed,
            participation: participation_percentage(total_signed, total_eligible),
        }
    }

    pub fn total_votes(&self) -> u64 {
        self.votes.values().sum()
    }
}

/// Percentage of eligible voters who were signed for; zero for an empty roster.
pub fn participation_percentage(signed: usize, eligible: usize) -> Decimal {
    if eligible == 0 {
        return Decimal::ZERO;
    }
    (Decimal::from(signed) * Decimal::ONE_HUNDRED / Decimal::from(eligible)).round_dp(2)
}
