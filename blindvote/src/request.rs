use crate::*;
use hmac::{Hmac, Mac};
use num_bigint::BigUint;
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

/// What a voter sends to have a blinded ballot signed.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct SignRequest {
    pub voter_id: String,
    pub session_id: String,
    pub blinded: BlindedBallot,

    /// Hex HMAC-SHA256 under the session's shared secret, see [`session_binding`]
    pub binding: String,
}

fn binding_mac(shared_secret: &BigUint, voter_id: &str, blinded: &BlindedBallot) -> Result<HmacSha256, Error> {
    let mut mac = HmacSha256::new_from_slice(&shared_secret.to_bytes_be())
        .map_err(|_| Error::Arithmetic("shared secret unusable as a MAC key".to_owned()))?;
    mac.update(&(voter_id.len() as u64).to_be_bytes());
    mac.update(voter_id.as_bytes());
    mac.update(&blinded.to_bytes());
    Ok(mac)
}

/// MAC tying a blinded ballot and voter id to the DH session that produced `K`.
pub fn session_binding(
    shared_secret: &BigUint,
    voter_id: &str,
    blinded: &BlindedBallot,
) -> Result<String, Error> {
    let mac = binding_mac(shared_secret, voter_id, blinded)?;
    Ok(hex::encode(mac.finalize().into_bytes()))
}

/// Check a request's binding against the signer's copy of `K`.
pub fn check_binding(shared_secret: &BigUint, request: &SignRequest) -> Result<(), Error> {
    let tag = hex::decode(&request.binding)
        .map_err(|_| Error::invalid("session binding is not valid hex"))?;
    binding_mac(shared_secret, &request.voter_id, &request.blinded)?
        .verify_slice(&tag)
        .map_err(|_| Error::invalid("session binding does not match"))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(binding: String) -> SignRequest {
        SignRequest {
            voter_id: "alice".to_owned(),
            session_id: "s1".to_owned(),
            blinded: BlindedBallot::Schnorr {
                challenge: BigUint::from(1234u32),
            },
            binding,
        }
    }

    #[test]
    fn binding_round_trip() {
        let k = BigUint::from(4242u32);
        let blinded = BlindedBallot::Schnorr {
            challenge: BigUint::from(1234u32),
        };
        let binding = session_binding(&k, "alice", &blinded).unwrap();
        assert_eq!(binding.len(), 64);
        check_binding(&k, &request(binding.clone())).unwrap();

        // Wrong key
        assert!(matches!(
            check_binding(&BigUint::from(4243u32), &request(binding.clone())),
            Err(Error::InvalidParameter(_))
        ));

        // Different voter
        let mut other = request(binding);
        other.voter_id = "bob".to_owned();
        assert!(check_binding(&k, &other).is_err());

        assert!(check_binding(&k, &request("zz".to_owned())).is_err());
    }
}
