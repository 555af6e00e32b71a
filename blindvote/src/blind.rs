//! Blind issuing of ballot signatures.
//!
//! Two constructions are supported, chosen by [`SchemeKind`]:
//!
//! - **Schnorr**: the signer's DH ephemeral `b` is the commitment nonce, so
//!   `B = g^b` from the exchange is the commitment. The voter blinds with
//!   `R' = B·g^α·y^β`, `c' = H(R' ‖ m)` and sends `c = c' + β`; the signer
//!   answers `s = b + c·x`; the voter keeps `(c', s + α)`.
//! - **Rsa**: Chaum's construction over a full-domain hash, blinding with
//!   `h·r^e` and unblinding with `r^-1`.
//!
//! All exponent arithmetic is modulo `p - 1`.

use crate::*;
use num_bigint::{BigUint, RandBigInt};
use num_traits::Zero;
use rand::Rng;
use std::fmt;
use uuid::Uuid;

const MESSAGE_PREFIX: &str = "blindvote/ballot/v1";
const MAX_BLINDING_ATTEMPTS: usize = 64;

/// The plaintext a ballot signature covers: a choice and a voter-chosen serial.
///
/// The serial keeps two ballots for the same candidate from carrying the same
/// signature, and is what the ballot ledger deduplicates on.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct BallotMessage {
    pub candidate_id: u32,
    pub serial: Uuid,
}

impl BallotMessage {
    pub fn new(candidate_id: u32, serial: Uuid) -> Self {
        BallotMessage {
            candidate_id,
            serial,
        }
    }

    /// A message for `candidate_id` with a fresh random serial
    pub fn random<R: Rng + ?Sized>(candidate_id: u32, rng: &mut R) -> Self {
        let serial = uuid::Builder::from_random_bytes(rng.gen()).into_uuid();
        BallotMessage::new(candidate_id, serial)
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        format!(
            "{}:{}:{}",
            MESSAGE_PREFIX,
            self.candidate_id,
            self.serial.hyphenated()
        )
        .into_bytes()
    }
}

/// A ballot as the signer sees it
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
#[serde(tag = "scheme", rename_all = "snake_case")]
pub enum BlindedBallot {
    /// Blinded challenge `c = c' + β mod (p-1)`
    Schnorr {
        #[serde(with = "BigUintHex")]
        challenge: BigUint,
    },

    /// `h·r^e mod N`
    Rsa {
        #[serde(with = "BigUintHex")]
        value: BigUint,
    },
}

impl BlindedBallot {
    pub fn kind(&self) -> SchemeKind {
        match self {
            BlindedBallot::Schnorr { .. } => SchemeKind::Schnorr,
            BlindedBallot::Rsa { .. } => SchemeKind::Rsa,
        }
    }

    pub fn value(&self) -> &BigUint {
        match self {
            BlindedBallot::Schnorr { challenge } => challenge,
            BlindedBallot::Rsa { value } => value,
        }
    }

    /// Canonical bytes: a scheme tag followed by the big-endian value
    pub fn to_bytes(&self) -> Vec<u8> {
        let tag = match self {
            BlindedBallot::Schnorr { .. } => 0u8,
            BlindedBallot::Rsa { .. } => 1u8,
        };
        let mut bytes = vec![tag];
        bytes.extend_from_slice(&self.value().to_bytes_be());
        bytes
    }
}

/// What the signer returns for a blinded ballot
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
#[serde(tag = "scheme", rename_all = "snake_case")]
pub enum BlindSignature {
    /// `s = b + c·x mod (p-1)`
    Schnorr {
        #[serde(with = "BigUintHex")]
        response: BigUint,
    },

    /// `(h·r^e)^d mod N`
    Rsa {
        #[serde(with = "BigUintHex")]
        value: BigUint,
    },
}

/// An unblinded signature value
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
#[serde(tag = "scheme", rename_all = "snake_case")]
pub enum SignatureValue {
    Schnorr {
        #[serde(with = "BigUintHex")]
        challenge: BigUint,

        #[serde(with = "BigUintHex")]
        response: BigUint,
    },
    Rsa {
        #[serde(with = "BigUintHex")]
        value: BigUint,
    },
}

/// A finished ballot signature, as submitted alongside a vote
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct BallotSignature {
    pub serial: Uuid,
    pub value: SignatureValue,
}

/// Voter-side state needed to unblind the signer's answer.
///
/// Never leaves the voter.
#[derive(Clone)]
pub struct Unblinder {
    message: BallotMessage,
    factor: BlindingFactor,
}

#[derive(Clone)]
enum BlindingFactor {
    Schnorr { alpha: BigUint, challenge: BigUint },
    Rsa { inverse: BigUint },
}

impl Unblinder {
    pub fn message(&self) -> &BallotMessage {
        &self.message
    }
}

impl fmt::Debug for Unblinder {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("Unblinder")
            .field("message", &self.message)
            .finish_non_exhaustive()
    }
}

/// The Schnorr challenge `H(R ‖ m) mod order`, with `R` length-prefixed.
pub fn schnorr_challenge(
    commitment: &BigUint,
    message: &BallotMessage,
    order: &BigUint,
) -> Result<BigUint, Error> {
    let r = commitment.to_bytes_be();
    let mut input = Vec::with_capacity(8 + r.len() + 64);
    input.extend_from_slice(&(r.len() as u64).to_be_bytes());
    input.extend_from_slice(&r);
    input.extend_from_slice(&message.to_bytes());
    hash_to_exponent(&input, order)
}

/// Blind `message` for the signer described by `params`.
///
/// `commitment` is the signer's `B` from the DH exchange; it is only used by
/// the Schnorr variant. Blinding factors are drawn from `rng`.
pub fn blind_ballot<R: Rng + ?Sized>(
    params: &PublicParams,
    commitment: &BigUint,
    message: BallotMessage,
    rng: &mut R,
) -> Result<(BlindedBallot, Unblinder), Error> {
    match &params.scheme {
        PublicScheme::Schnorr => {
            let group = &params.group;
            if !group.contains(commitment) {
                return Err(Error::invalid("signer commitment must lie in [1, p-1]"));
            }
            let order = group.order();
            let alpha = rng.gen_biguint_below(&order);
            let beta = rng.gen_biguint_below(&order);

            let r = commitment * mod_pow(&group.g, &alpha, &group.p) % &group.p
                * mod_pow(&params.y, &beta, &group.p)
                % &group.p;
            let challenge = schnorr_challenge(&r, &message, &order)?;
            let blinded = (&challenge + &beta) % &order;

            Ok((
                BlindedBallot::Schnorr { challenge: blinded },
                Unblinder {
                    message,
                    factor: BlindingFactor::Schnorr { alpha, challenge },
                },
            ))
        }
        PublicScheme::Rsa(key) => {
            let h = hash_to_field(&message.to_bytes(), &key.n)?;
            let two = BigUint::from(2u32);
            for _ in 0..MAX_BLINDING_ATTEMPTS {
                let r = rng.gen_biguint_range(&two, &key.n);
                // r must be a unit mod N
                let inverse = match ring_inverse(&r, &key.n) {
                    Ok(inverse) => inverse,
                    Err(_) => continue,
                };
                let blinded = &h * r.modpow(&key.e, &key.n) % &key.n;
                return Ok((
                    BlindedBallot::Rsa { value: blinded },
                    Unblinder {
                        message,
                        factor: BlindingFactor::Rsa { inverse },
                    },
                ));
            }
            Err(Error::Arithmetic(
                "no invertible blinding factor found".to_owned(),
            ))
        }
    }
}

/// Check that a blinded ballot is well-formed for the signer's scheme.
pub fn validate_blinded(params: &PublicParams, blinded: &BlindedBallot) -> Result<(), Error> {
    match (&params.scheme, blinded) {
        (PublicScheme::Schnorr, BlindedBallot::Schnorr { challenge }) => {
            if *challenge >= params.group.order() {
                return Err(Error::invalid("blinded challenge must be below p-1"));
            }
            Ok(())
        }
        (PublicScheme::Rsa(key), BlindedBallot::Rsa { value }) => {
            if value.is_zero() || *value >= key.n {
                return Err(Error::invalid("blinded value must lie in [1, N-1]"));
            }
            Ok(())
        }
        (_, other) => Err(Error::invalid(format!(
            "expected a {} ballot, got {}",
            params.kind(),
            other.kind()
        ))),
    }
}

/// Sign a blinded ballot under the given session.
///
/// For Schnorr the session's ephemeral exponent is the nonce, so the caller
/// must make sure the session is never used again.
pub fn sign_blinded(
    keys: &SignerKeys,
    session: &DhSession,
    blinded: &BlindedBallot,
) -> Result<BlindSignature, Error> {
    validate_blinded(&keys.public_params(), blinded)?;
    match (&keys.signing, blinded) {
        (SigningKey::Schnorr, BlindedBallot::Schnorr { challenge }) => {
            let order = keys.keypair.params().order();
            let response =
                (session.ephemeral_secret() + challenge * keys.keypair.secret_exponent()) % &order;
            Ok(BlindSignature::Schnorr { response })
        }
        (SigningKey::Rsa(rsa), BlindedBallot::Rsa { value }) => Ok(BlindSignature::Rsa {
            value: rsa.sign_raw(value)?,
        }),
        _ => Err(Error::invalid("blinded ballot does not match the signing scheme")),
    }
}

/// Remove the blinding from the signer's answer and check the result.
///
/// A signer that answered with anything other than a valid signature is
/// reported as [`Error::InvalidSignature`].
pub fn unblind_signature(
    params: &PublicParams,
    unblinder: &Unblinder,
    signature: &BlindSignature,
) -> Result<BallotSignature, Error> {
    let value = match (&params.scheme, &unblinder.factor, signature) {
        (
            PublicScheme::Schnorr,
            BlindingFactor::Schnorr { alpha, challenge },
            BlindSignature::Schnorr { response },
        ) => {
            let order = params.group.order();
            if *response >= order {
                return Err(Error::InvalidSignature);
            }
            SignatureValue::Schnorr {
                challenge: challenge.clone(),
                response: (response + alpha) % &order,
            }
        }
        (PublicScheme::Rsa(key), BlindingFactor::Rsa { inverse }, BlindSignature::Rsa { value }) => {
            if *value >= key.n {
                return Err(Error::InvalidSignature);
            }
            SignatureValue::Rsa {
                value: value * inverse % &key.n,
            }
        }
        _ => return Err(Error::invalid("signature does not match the blinding scheme")),
    };

    let signature = BallotSignature {
        serial: unblinder.message.serial,
        value,
    };
    if !verify_ballot(params, unblinder.message.candidate_id, &signature) {
        return Err(Error::InvalidSignature);
    }
    Ok(signature)
}

/// Check a ballot signature against the signer's public parameters.
pub fn verify_ballot(params: &PublicParams, candidate_id: u32, signature: &BallotSignature) -> bool {
    let message = BallotMessage::new(candidate_id, signature.serial);
    verify_message(params, &message, &signature.value)
}

fn verify_message(params: &PublicParams, message: &BallotMessage, value: &SignatureValue) -> bool {
    match (&params.scheme, value) {
        (PublicScheme::Schnorr, SignatureValue::Schnorr { challenge, response }) => {
            let group = &params.group;
            let order = group.order();
            if *challenge >= order || *response >= order || !group.contains(&params.y) {
                return false;
            }
            let y_c = mod_pow(&params.y, challenge, &group.p);
            let y_c_inv = match mod_inverse(&y_c, &group.p) {
                Ok(inv) => inv,
                Err(_) => return false,
            };
            let r = mod_pow(&group.g, response, &group.p) * y_c_inv % &group.p;
            match schnorr_challenge(&r, message, &order) {
                Ok(expected) => expected == *challenge,
                Err(_) => false,
            }
        }
        (PublicScheme::Rsa(key), SignatureValue::Rsa { value }) => {
            if value.is_zero() || *value >= key.n {
                return false;
            }
            match hash_to_field(&message.to_bytes(), &key.n) {
                Ok(h) => value.modpow(&key.e, &key.n) == h,
                Err(_) => false,
            }
        }
        _ => false,
    }
}
