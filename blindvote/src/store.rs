use crate::*;
use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

/// Persistence the voting service reads its state from and appends to.
///
/// Implementations must make each append atomic: after a crash the store
/// holds either the whole record or none of it.
pub trait Store: Send + Sync {
    /// Voter ids allowed to request a signature
    fn load_roster(&self) -> Result<Vec<String>, Error>;

    /// Voter ids that have already received a signature
    fn load_voted(&self) -> Result<Vec<String>, Error>;

    fn append_voted(&self, voter_id: &str) -> Result<(), Error>;

    fn load_cast_votes(&self) -> Result<Vec<CastVote>, Error>;

    fn append_cast_vote(&self, vote: &CastVote) -> Result<(), Error>;

    /// The signer's keys, if any have been generated yet
    fn load_keys(&self) -> Result<Option<SignerKeys>, Error>;

    fn save_keys(&self, keys: &SignerKeys) -> Result<(), Error>;
}

#[derive(Default)]
struct MemStoreInner {
    roster: Vec<String>,
    voted: Vec<String>,
    votes: Vec<CastVote>,
    keys: Option<SignerKeys>,
}

/// A simple store that keeps everything in memory
#[derive(Default)]
pub struct MemStore {
    inner: RwLock<MemStoreInner>,
}

impl MemStore {
    pub fn with_roster<I, S>(roster: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let store = MemStore::default();
        store.set_roster(roster);
        store
    }

    pub fn set_roster<I, S>(&self, roster: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.write().roster = roster.into_iter().map(Into::into).collect();
    }

    fn read(&self) -> RwLockReadGuard<'_, MemStoreInner> {
        self.inner.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, MemStoreInner> {
        self.inner.write().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Store for MemStore {
    fn load_roster(&self) -> Result<Vec<String>, Error> {
        Ok(self.read().roster.clone())
    }

    fn load_voted(&self) -> Result<Vec<String>, Error> {
        Ok(self.read().voted.clone())
    }

    fn append_voted(&self, voter_id: &str) -> Result<(), Error> {
        self.write().voted.push(voter_id.to_owned());
        Ok(())
    }

    fn load_cast_votes(&self) -> Result<Vec<CastVote>, Error> {
        Ok(self.read().votes.clone())
    }

    fn append_cast_vote(&self, vote: &CastVote) -> Result<(), Error> {
        self.write().votes.push(vote.clone());
        Ok(())
    }

    fn load_keys(&self) -> Result<Option<SignerKeys>, Error> {
        Ok(self.read().keys.clone())
    }

    fn save_keys(&self, keys: &SignerKeys) -> Result<(), Error> {
        self.write().keys = Some(keys.clone());
        Ok(())
    }
}

impl From<Vec<String>> for MemStore {
    fn from(roster: Vec<String>) -> Self {
        MemStore::with_roster(roster)
    }
}
