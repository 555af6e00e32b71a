use crate::*;
use indexmap::IndexMap;
use log::{info, warn};
use std::sync::{Mutex, MutexGuard, PoisonError};

/// Whether a rostered voter has been issued their signature
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct EligibilityRecord {
    pub voter_id: String,
    pub has_received_signature: bool,
}

/// The roster, and which voters on it have already been signed for.
///
/// A voter moves from unsigned to signed at most once. Every check-and-mark
/// happens under a single lock, so concurrent requests for the same voter
/// cannot both succeed.
pub struct EligibilityLedger {
    voters: Mutex<IndexMap<String, bool>>,
}

// Roster files written by spreadsheet tools carry byte-order marks and NULs
fn clean_voter_id(raw: &str) -> String {
    raw.chars()
        .filter(|c| *c != '\u{feff}' && *c != '\0')
        .collect::<String>()
        .trim()
        .to_owned()
}

impl EligibilityLedger {
    pub fn from_roster<I, S>(roster: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut voters = IndexMap::new();
        for raw in roster {
            let voter_id = clean_voter_id(raw.as_ref());
            if voter_id.is_empty() {
                continue;
            }
            voters.entry(voter_id).or_insert(false);
        }
        EligibilityLedger {
            voters: Mutex::new(voters),
        }
    }

    /// Rebuild the ledger from the store's roster and voted list
    pub fn load<S: Store + ?Sized>(store: &S) -> Result<Self, Error> {
        let ledger = Self::from_roster(store.load_roster()?);
        {
            let mut voters = ledger.lock();
            for voter_id in store.load_voted()? {
                let voter_id = clean_voter_id(&voter_id);
                match voters.get_mut(&voter_id) {
                    Some(signed) => *signed = true,
                    None => warn!("voted list names {} who is not on the roster", voter_id),
                }
            }
        }
        info!(
            "loaded roster of {} voters, {} already signed",
            ledger.total_eligible(),
            ledger.total_signed()
        );
        Ok(ledger)
    }

    fn lock(&self) -> MutexGuard<'_, IndexMap<String, bool>> {
        self.voters.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// On the roster and not yet signed for
    pub fn is_eligible(&self, voter_id: &str) -> bool {
        matches!(self.lock().get(voter_id), Some(false))
    }

    pub fn mark_signed(&self, voter_id: &str) -> Result<(), Error> {
        self.authorize(voter_id, || Ok(()))
    }

    /// Check that `voter_id` may be signed for, run `f`, and mark the voter
    /// signed if `f` succeeds. The ledger is unchanged if `f` fails.
    pub fn authorize<T, F>(&self, voter_id: &str, f: F) -> Result<T, Error>
    where
        F: FnOnce() -> Result<T, Error>,
    {
        let mut voters = self.lock();
        match voters.get(voter_id) {
            None => return Err(Error::UnauthorizedVoter(voter_id.to_owned())),
            Some(true) => return Err(Error::AlreadySigned(voter_id.to_owned())),
            Some(false) => {}
        }
        let result = f()?;
        if let Some(signed) = voters.get_mut(voter_id) {
            *signed = true;
        }
        Ok(result)
    }

    pub fn records(&self) -> Vec<EligibilityRecord> {
        self.lock()
            .iter()
            .map(|(voter_id, signed)| EligibilityRecord {
                voter_id: voter_id.clone(),
                has_received_signature: *signed,
            })
            .collect()
    }

    /// Ids of voters who have received a signature, in roster order
    pub fn voted(&self) -> Vec<String> {
        self.lock()
            .iter()
            .filter(|(_, signed)| **signed)
            .map(|(voter_id, _)| voter_id.clone())
            .collect()
    }

    pub fn total_eligible(&self) -> usize {
        self.lock().len()
    }

    pub fn total_signed(&self) -> usize {
        self.lock().values().filter(|signed| **signed).count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn roster_cleaning() {
        let ledger = EligibilityLedger::from_roster([
            "\u{feff}student1",
            " student2 ",
            "",
            "student\u{0}3",
            "student1",
        ]);
        assert_eq!(ledger.total_eligible(), 3);
        assert!(ledger.is_eligible("student1"));
        assert!(ledger.is_eligible("student2"));
        assert!(ledger.is_eligible("student3"));
    }

    #[test]
    fn signs_once() {
        let ledger = EligibilityLedger::from_roster(["alice", "bob"]);
        ledger.mark_signed("alice").unwrap();
        assert!(!ledger.is_eligible("alice"));
        assert_eq!(
            ledger.mark_signed("alice"),
            Err(Error::AlreadySigned("alice".to_owned()))
        );
        assert_eq!(
            ledger.mark_signed("mallory"),
            Err(Error::UnauthorizedVoter("mallory".to_owned()))
        );
        assert_eq!(ledger.voted(), vec!["alice"]);
        assert_eq!(ledger.total_signed(), 1);
        assert_eq!(
            ledger.records(),
            vec![
                EligibilityRecord {
                    voter_id: "alice".to_owned(),
                    has_received_signature: true
                },
                EligibilityRecord {
                    voter_id: "bob".to_owned(),
                    has_received_signature: false
                },
            ]
        );
    }

    #[test]
    fn failed_authorization_leaves_voter_unsigned() {
        let ledger = EligibilityLedger::from_roster(["alice"]);
        let result: Result<(), Error> =
            ledger.authorize("alice", || Err(Error::InvalidSignature));
        assert_eq!(result, Err(Error::InvalidSignature));
        assert!(ledger.is_eligible("alice"));
        assert_eq!(ledger.authorize("alice", || Ok(5)), Ok(5));
        assert!(!ledger.is_eligible("alice"));
    }

    #[test]
    fn load_restores_voted() {
        let store = MemStore::with_roster(["alice", "bob"]);
        store.append_voted("bob").unwrap();
        store.append_voted("ghost").unwrap();
        let ledger = EligibilityLedger::load(&store).unwrap();
        assert!(ledger.is_eligible("alice"));
        assert!(!ledger.is_eligible("bob"));
        assert_eq!(ledger.total_signed(), 1);
    }
}
