use crate::*;
use indexmap::IndexMap;
use log::{info, warn};
use std::collections::HashSet;
use std::sync::{Mutex, MutexGuard, PoisonError};
use uuid::Uuid;

/// An accepted vote
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct CastVote {
    pub candidate_label: String,
    pub signature: BallotSignature,
}

#[derive(Default)]
struct Ledger {
    votes: Vec<CastVote>,
    serials: HashSet<Uuid>,
}

/// Append-only record of cast votes.
///
/// Signatures are keyed by their ballot serial; a serial is accepted once.
/// Eligibility is not checked here: holding a valid signature is the
/// authorization.
#[derive(Default)]
pub struct BallotLedger {
    inner: Mutex<Ledger>,
}

impl BallotLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Rebuild the ledger from the store's cast votes
    pub fn load<S: Store + ?Sized>(store: &S) -> Result<Self, Error> {
        let ledger = BallotLedger::new();
        {
            let mut inner = ledger.lock();
            for vote in store.load_cast_votes()? {
                if !inner.serials.insert(vote.signature.serial) {
                    warn!(
                        "stored votes repeat ballot serial {}; keeping the first",
                        vote.signature.serial
                    );
                    continue;
                }
                inner.votes.push(vote);
            }
            info!("loaded {} cast votes", inner.votes.len());
        }
        Ok(ledger)
    }

    fn lock(&self) -> MutexGuard<'_, Ledger> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Record a vote, or fail with [`Error::DuplicateSignature`] if its
    /// signature has been cast before.
    pub fn try_cast(&self, candidate_label: &str, signature: BallotSignature) -> Result<(), Error> {
        self.try_cast_with(candidate_label, signature, |_| Ok(()))
    }

    /// Like [`BallotLedger::try_cast`], calling `persist` with the new vote
    /// before it is recorded. Nothing is recorded if `persist` fails.
    pub fn try_cast_with<F>(
        &self,
        candidate_label: &str,
        signature: BallotSignature,
        persist: F,
    ) -> Result<(), Error>
    where
        F: FnOnce(&CastVote) -> Result<(), Error>,
    {
        let mut inner = self.lock();
        if inner.serials.contains(&signature.serial) {
            return Err(Error::DuplicateSignature);
        }
        let vote = CastVote {
            candidate_label: candidate_label.to_owned(),
            signature,
        };
        persist(&vote)?;
        inner.serials.insert(vote.signature.serial);
        inner.votes.push(vote);
        Ok(())
    }

    /// Vote count per candidate label, in order of first vote
    pub fn tally(&self) -> IndexMap<String, u64> {
        let mut counts = IndexMap::new();
        for vote in &self.lock().votes {
            *counts.entry(vote.candidate_label.clone()).or_insert(0) += 1;
        }
        counts
    }

    pub fn len(&self) -> usize {
        self.lock().votes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
