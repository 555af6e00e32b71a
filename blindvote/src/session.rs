use crate::*;
use log::debug;
use num_bigint::BigUint;
use rand::{CryptoRng, Rng};
use std::collections::HashMap;
use std::fmt;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

/// Signer-side state of one Diffie-Hellman exchange.
///
/// The ephemeral exponent `b` doubles as the Schnorr commitment nonce, so a
/// session must never sign twice; [`DhSessionStore::consume`] removes it.
pub struct DhSession {
    id: String,
    voter_public: BigUint,
    ephemeral: BigUint,
    ephemeral_public: BigUint,
    shared_secret: BigUint,
    last_active: Instant,
}

impl DhSession {
    pub fn id(&self) -> &str {
        &self.id
    }

    /// The voter's `A = g^a mod p`
    pub fn voter_public(&self) -> &BigUint {
        &self.voter_public
    }

    /// The signer's `B = g^b mod p`
    pub fn ephemeral_public(&self) -> &BigUint {
        &self.ephemeral_public
    }

    pub(crate) fn ephemeral_secret(&self) -> &BigUint {
        &self.ephemeral
    }

    /// `K = A^b mod p`
    pub(crate) fn shared_secret(&self) -> &BigUint {
        &self.shared_secret
    }

    fn expired(&self, ttl: Duration) -> bool {
        self.last_active.elapsed() >= ttl
    }
}

impl fmt::Debug for DhSession {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("DhSession")
            .field("id", &self.id)
            .field("voter_public", &self.voter_public)
            .field("ephemeral_public", &self.ephemeral_public)
            .finish_non_exhaustive()
    }
}

/// Per-voter exchange state, keyed by session id.
///
/// A repeated exchange for the same id replaces the earlier session; its
/// ephemeral secret is dropped without ever having signed. Sessions idle for
/// longer than the TTL behave as absent. They are purged when accessed and
/// whenever a new exchange begins.
pub struct DhSessionStore {
    params: GroupParams,
    ttl: Duration,
    sessions: Mutex<HashMap<String, DhSession>>,
}

impl DhSessionStore {
    pub fn new(params: GroupParams, ttl: Duration) -> Self {
        DhSessionStore {
            params,
            ttl,
            sessions: Mutex::new(HashMap::new()),
        }
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, DhSession>> {
        self.sessions.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Answer the voter's `A` with a fresh `B = g^b`, storing `K = A^b`.
    pub fn begin_exchange<R: Rng + CryptoRng + ?Sized>(
        &self,
        session_id: &str,
        voter_public: &BigUint,
        rng: &mut R,
    ) -> Result<BigUint, Error> {
        if session_id.is_empty() {
            return Err(Error::invalid("session id must not be empty"));
        }
        if !self.params.contains(voter_public) {
            return Err(Error::invalid("DH public value must lie in [1, p-1]"));
        }

        let ephemeral = self.params.random_exponent(rng);
        let ephemeral_public = mod_pow(&self.params.g, &ephemeral, &self.params.p);
        let shared_secret = mod_pow(voter_public, &ephemeral, &self.params.p);

        let session = DhSession {
            id: session_id.to_owned(),
            voter_public: voter_public.clone(),
            ephemeral,
            ephemeral_public: ephemeral_public.clone(),
            shared_secret,
            last_active: Instant::now(),
        };

        let mut sessions = self.lock();
        let ttl = self.ttl;
        let before = sessions.len();
        sessions.retain(|id, session| id == session_id || !session.expired(ttl));
        if sessions.len() < before {
            debug!("purged {} expired sessions", before - sessions.len());
        }
        if sessions.insert(session_id.to_owned(), session).is_some() {
            debug!("session {} re-exchanged, previous secret discarded", session_id);
        } else {
            debug!("session {} opened", session_id);
        }
        Ok(ephemeral_public)
    }

    /// The shared secret `K` of a live session
    pub fn shared_secret(&self, session_id: &str) -> Result<BigUint, Error> {
        let mut sessions = self.lock();
        let expired = match sessions.get(session_id) {
            Some(session) => session.expired(self.ttl),
            None => return Err(Error::SessionNotFound(session_id.to_owned())),
        };
        if expired {
            sessions.remove(session_id);
            debug!("session {} expired", session_id);
            return Err(Error::SessionNotFound(session_id.to_owned()));
        }

        match sessions.get_mut(session_id) {
            Some(session) => {
                session.last_active = Instant::now();
                Ok(session.shared_secret.clone())
            }
            None => Err(Error::SessionNotFound(session_id.to_owned())),
        }
    }

    /// Drop a session. Returns whether it existed.
    pub fn end_session(&self, session_id: &str) -> bool {
        let removed = self.lock().remove(session_id).is_some();
        if removed {
            debug!("session {} ended", session_id);
        }
        removed
    }

    /// Run `f` against a live session and remove the session if `f` succeeds.
    ///
    /// The store stays locked for the duration of `f`, so no exchange can
    /// replace the session halfway through. On error the session is kept.
    pub fn consume<T, F>(&self, session_id: &str, f: F) -> Result<T, Error>
    where
        F: FnOnce(&DhSession) -> Result<T, Error>,
    {
        let mut sessions = self.lock();
        let expired = match sessions.get(session_id) {
            Some(session) => session.expired(self.ttl),
            None => return Err(Error::SessionNotFound(session_id.to_owned())),
        };
        if expired {
            sessions.remove(session_id);
            debug!("session {} expired", session_id);
            return Err(Error::SessionNotFound(session_id.to_owned()));
        }

        let result = match sessions.get(session_id) {
            Some(session) => f(session)?,
            None => return Err(Error::SessionNotFound(session_id.to_owned())),
        };
        sessions.remove(session_id);
        debug!("session {} consumed", session_id);
        Ok(result)
    }

    /// Remove every expired session, returning how many were dropped.
    pub fn purge_expired(&self) -> usize {
        let mut sessions = self.lock();
        let before = sessions.len();
        let ttl = self.ttl;
        sessions.retain(|_, session| !session.expired(ttl));
        let purged = before - sessions.len();
        if purged > 0 {
            debug!("purged {} expired sessions", purged);
        }
        purged
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
