use crate::*;
use hkdf::Hkdf;
use num_bigint::BigUint;
use rand::{CryptoRng, Rng, SeedableRng};
use rand_chacha::ChaCha20Rng;
use sha2::Sha256;
use std::fmt;

/// The voter's half of the protocol: DH exchange, blinding and unblinding.
///
/// Blinding factors are derived from the voter's secret `a` together with the
/// shared secret `K` and the ballot message. The signer knows `K` but not `a`,
/// so it cannot recompute them.
pub struct VoterExchange {
    params: PublicParams,
    secret: BigUint,
    public: BigUint,
    signer_public: Option<BigUint>,
    shared_secret: Option<BigUint>,
}

impl VoterExchange {
    /// Start an exchange with a fresh secret `a ∈ [2, p-2]`
    pub fn new<R: Rng + CryptoRng + ?Sized>(
        params: PublicParams,
        rng: &mut R,
    ) -> Result<Self, Error> {
        params.group.validate()?;
        let secret = params.group.random_exponent(rng);
        Ok(Self::build(params, secret))
    }

    pub fn with_secret(params: PublicParams, secret: BigUint) -> Result<Self, Error> {
        params.group.validate()?;
        if !params.group.exponent_in_range(&secret) {
            return Err(Error::invalid("voter secret must lie in [2, p-2]"));
        }
        Ok(Self::build(params, secret))
    }

    fn build(params: PublicParams, secret: BigUint) -> Self {
        let public = mod_pow(&params.group.g, &secret, &params.group.p);
        VoterExchange {
            params,
            secret,
            public,
            signer_public: None,
            shared_secret: None,
        }
    }

    pub fn params(&self) -> &PublicParams {
        &self.params
    }

    /// `A = g^a mod p`, sent to the signer
    pub fn public_value(&self) -> &BigUint {
        &self.public
    }

    /// Finish the exchange with the signer's `B`, returning `K = B^a mod p`.
    pub fn complete(&mut self, signer_public: &BigUint) -> Result<BigUint, Error> {
        if !self.params.group.contains(signer_public) {
            return Err(Error::invalid("signer DH value must lie in [1, p-1]"));
        }
        let shared = mod_pow(signer_public, &self.secret, &self.params.group.p);
        self.signer_public = Some(signer_public.clone());
        self.shared_secret = Some(shared.clone());
        Ok(shared)
    }

    pub fn shared_secret(&self) -> Option<&BigUint> {
        self.shared_secret.as_ref()
    }

    fn completed(&self) -> Result<(&BigUint, &BigUint), Error> {
        match (&self.signer_public, &self.shared_secret) {
            (Some(b), Some(k)) => Ok((b, k)),
            _ => Err(Error::invalid("key exchange has not been completed")),
        }
    }

    /// Blind a ballot for one of `candidates`.
    pub fn blind(
        &self,
        candidates: &CandidateList,
        message: BallotMessage,
    ) -> Result<(BlindedBallot, Unblinder), Error> {
        if candidates.get(message.candidate_id).is_none() {
            return Err(Error::invalid(format!(
                "unknown candidate {}",
                message.candidate_id
            )));
        }
        let (commitment, _) = self.completed()?;
        let mut rng = self.blinding_rng(&message)?;
        blind_ballot(&self.params, commitment, message, &mut rng)
    }

    /// Wrap a blinded ballot into a request bound to this exchange
    pub fn sign_request(
        &self,
        voter_id: &str,
        session_id: &str,
        blinded: BlindedBallot,
    ) -> Result<SignRequest, Error> {
        let (_, shared) = self.completed()?;
        let binding = session_binding(shared, voter_id, &blinded)?;
        Ok(SignRequest {
            voter_id: voter_id.to_owned(),
            session_id: session_id.to_owned(),
            blinded,
            binding,
        })
    }

    pub fn unblind(
        &self,
        unblinder: &Unblinder,
        signature: &BlindSignature,
    ) -> Result<BallotSignature, Error> {
        unblind_signature(&self.params, unblinder, signature)
    }

    pub(crate) fn blinding_rng(&self, message: &BallotMessage) -> Result<ChaCha20Rng, Error> {
        let (_, shared) = self.completed()?;
        let salt = shared.to_bytes_be();
        let h = Hkdf::<Sha256>::new(Some(salt.as_slice()), &self.secret.to_bytes_be());
        let mut seed = [0u8; 32];
        h.expand(&message.to_bytes(), &mut seed)
            .map_err(|_| Error::Arithmetic("blinding seed expansion failed".to_owned()))?;
        Ok(ChaCha20Rng::from_seed(seed))
    }
}

impl fmt::Debug for VoterExchange {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("VoterExchange")
            .field("public", &self.public)
            .field("signer_public", &self.signer_public)
            .finish_non_exhaustive()
    }
}
