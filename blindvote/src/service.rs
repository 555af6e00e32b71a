use crate::*;
use log::{debug, info, warn};
use num_bigint::BigUint;
use rand::rngs::OsRng;
use rand::{CryptoRng, Rng};

/// The signer: owns the keys, the live DH sessions and both ledgers.
///
/// All methods take `&self`; the service can be shared across threads.
pub struct VotingService<S: Store> {
    keys: KeyManager,
    params: PublicParams,
    candidates: CandidateList,
    sessions: DhSessionStore,
    eligibility: EligibilityLedger,
    ballots: BallotLedger,
    store: S,
}

impl<S: Store> VotingService<S> {
    /// Build a service, restoring the voted list and cast votes from `store`.
    pub fn new(
        config: &Config,
        keys: KeyManager,
        candidates: CandidateList,
        store: S,
    ) -> Result<Self, Error> {
        if candidates.is_empty() {
            return Err(Error::invalid("an election needs at least one candidate"));
        }
        let params = keys.public_params();
        let sessions = DhSessionStore::new(params.group.clone(), config.session_ttl);
        let eligibility = EligibilityLedger::load(&store)?;
        let ballots = BallotLedger::load(&store)?;

        info!(
            "voting service ready: {} scheme, {} candidates",
            keys.kind(),
            candidates.len()
        );
        Ok(VotingService {
            keys,
            params,
            candidates,
            sessions,
            eligibility,
            ballots,
            store,
        })
    }

    pub fn public_params(&self) -> &PublicParams {
        &self.params
    }

    pub fn candidates(&self) -> &CandidateList {
        &self.candidates
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    /// Shut the service down, dropping live sessions
    pub fn into_store(self) -> S {
        self.store
    }

    /// Answer a voter's DH value `A` with the signer's `B`
    pub fn begin_exchange(&self, session_id: &str, voter_public: &BigUint) -> Result<BigUint, Error> {
        self.begin_exchange_with_rng(session_id, voter_public, &mut OsRng)
    }

    pub fn begin_exchange_with_rng<R: Rng + CryptoRng + ?Sized>(
        &self,
        session_id: &str,
        voter_public: &BigUint,
        rng: &mut R,
    ) -> Result<BigUint, Error> {
        self.sessions
            .begin_exchange(session_id, voter_public, rng)
            .map_err(|e| {
                warn!("exchange for session {} refused: {}", session_id, e);
                e
            })
    }

    pub fn end_session(&self, session_id: &str) -> bool {
        self.sessions.end_session(session_id)
    }

    pub fn purge_expired_sessions(&self) -> usize {
        self.sessions.purge_expired()
    }

    /// Sign a blinded ballot for an eligible voter.
    ///
    /// The voter is marked signed, the voted list appended and the session
    /// consumed together; if any step fails none of them happen.
    pub fn sign_ballot(&self, request: &SignRequest) -> Result<BlindSignature, Error> {
        let result = validate_blinded(&self.params, &request.blinded).and_then(|_| {
            self.eligibility.authorize(&request.voter_id, || {
                self.sessions.consume(&request.session_id, |session| {
                    check_binding(session.shared_secret(), request)?;
                    let signature = sign_blinded(self.keys.keys(), session, &request.blinded)?;
                    self.store.append_voted(&request.voter_id)?;
                    Ok(signature)
                })
            })
        });

        match &result {
            Ok(_) => info!("issued blind signature to voter {}", request.voter_id),
            Err(e) => warn!("sign request from voter {} refused: {}", request.voter_id, e),
        }
        result
    }

    /// Verify and record a vote.
    pub fn cast_ballot(&self, candidate_id: u32, signature: BallotSignature) -> Result<(), Error> {
        let candidate = self
            .candidates
            .get(candidate_id)
            .ok_or_else(|| Error::invalid(format!("unknown candidate {}", candidate_id)))?;

        if !verify_ballot(&self.params, candidate_id, &signature) {
            warn!("rejected ballot {} with an invalid signature", signature.serial);
            return Err(Error::InvalidSignature);
        }

        let serial = signature.serial;
        self.ballots
            .try_cast_with(&candidate.label, signature, |vote| {
                self.store.append_cast_vote(vote)
            })
            .map_err(|e| {
                warn!("rejected ballot {}: {}", serial, e);
                e
            })?;
        debug!("accepted ballot {}", serial);
        info!("vote cast ({} total)", self.ballots.len());
        Ok(())
    }

    pub fn is_eligible(&self, voter_id: &str) -> bool {
        self.eligibility.is_eligible(voter_id)
    }

    pub fn results(&self) -> ElectionResults {
        ElectionResults::collect(&self.eligibility, &self.ballots, &self.candidates)
    }

    /// Voters who have received a signature. Never joined against the ballots.
    pub fn voted_list(&self) -> Vec<String> {
        self.eligibility.voted()
    }
}
