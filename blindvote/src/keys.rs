use crate::*;
use log::{info, warn};
use num_bigint::{BigUint, RandBigInt};
use num_traits::{One, Zero};
use rand::rngs::OsRng;
use rand::{CryptoRng, Rng};
use rsa::hazmat;
use rsa::traits::{PrivateKeyParts, PublicKeyParts};
use rsa::RsaPrivateKey;
use std::fmt;

/// Public exponent of every generated RSA key
pub const RSA_PUBLIC_EXPONENT: u32 = 65537;

const MAX_KEYGEN_ATTEMPTS: usize = 64;

/// The prime-order group every exchange and Schnorr signature runs in.
///
/// Validated when deserialized.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
#[serde(try_from = "GroupRecord")]
pub struct GroupParams {
    #[serde(with = "BigUintHex")]
    pub p: BigUint,

    #[serde(with = "BigUintHex")]
    pub g: BigUint,
}

/// Unchecked wire form of [`GroupParams`]
#[derive(Deserialize)]
pub struct GroupRecord {
    #[serde(with = "BigUintHex")]
    pub p: BigUint,

    #[serde(with = "BigUintHex")]
    pub g: BigUint,
}

impl TryFrom<GroupRecord> for GroupParams {
    type Error = Error;

    fn try_from(record: GroupRecord) -> Result<Self, Self::Error> {
        GroupParams::new(record.p, record.g)
    }
}

impl GroupParams {
    pub fn new(p: BigUint, g: BigUint) -> Result<Self, Error> {
        let params = GroupParams { p, g };
        params.validate()?;
        Ok(params)
    }

    /// Check that `p` is a probable prime of at least 5 and `g` lies in `[2, p-2]`
    pub fn validate(&self) -> Result<(), Error> {
        if self.p < BigUint::from(5u32) {
            return Err(Error::invalid("prime modulus must be at least 5"));
        }
        if !is_probable_prime(&self.p, 32, &mut rand::thread_rng()) {
            return Err(Error::invalid(format!("{} is not prime", self.p)));
        }
        if self.g < BigUint::from(2u32) || self.g > &self.p - 2u32 {
            return Err(Error::invalid("generator must lie in [2, p-2]"));
        }
        Ok(())
    }

    /// Exponent modulus, `p - 1`
    pub fn order(&self) -> BigUint {
        group_order(&self.p)
    }

    /// Whether `value` is a nonzero element of the field, i.e. in `[1, p-1]`
    pub fn contains(&self, value: &BigUint) -> bool {
        !value.is_zero() && value < &self.p
    }

    /// Uniform exponent from `[2, p-2]`
    pub(crate) fn random_exponent<R: Rng + CryptoRng + ?Sized>(&self, rng: &mut R) -> BigUint {
        rng.gen_biguint_range(&BigUint::from(2u32), &(&self.p - 1u32))
    }

    pub(crate) fn exponent_in_range(&self, exponent: &BigUint) -> bool {
        *exponent >= BigUint::from(2u32) && *exponent <= &self.p - 2u32
    }
}

/// The signer's long-term discrete-log key pair `{p, g, x, y = g^x mod p}`.
///
/// Persisted as the private record `{p, g, x}`; `y` is recomputed (and the
/// record validated) on load.
#[derive(Serialize, Deserialize, Clone, PartialEq, Eq)]
#[serde(try_from = "PrivateKeyRecord", into = "PrivateKeyRecord")]
pub struct KeyPair {
    params: GroupParams,
    x: BigUint,
    y: BigUint,
}

impl KeyPair {
    /// Pick `x` uniformly from `[2, p-2]` and compute `y = g^x mod p`.
    ///
    /// Exponents that land on the identity are redrawn, since `y = 1` would
    /// make every Schnorr signature trivially forgeable.
    pub fn generate<R: Rng + CryptoRng + ?Sized>(
        params: GroupParams,
        rng: &mut R,
    ) -> Result<Self, Error> {
        if params.p < BigUint::from(5u32) {
            return Err(Error::invalid("prime modulus must be at least 5"));
        }
        for _ in 0..MAX_KEYGEN_ATTEMPTS {
            let x = params.random_exponent(rng);
            let y = mod_pow(&params.g, &x, &params.p);
            if !y.is_one() {
                return Ok(KeyPair { params, x, y });
            }
        }
        Err(Error::Arithmetic(
            "generator has too small an order to produce a key".to_owned(),
        ))
    }

    /// Rebuild a key pair from its secret exponent
    pub fn from_secret(params: GroupParams, x: BigUint) -> Result<Self, Error> {
        if !params.exponent_in_range(&x) {
            return Err(Error::invalid("secret exponent must lie in [2, p-2]"));
        }
        let y = mod_pow(&params.g, &x, &params.p);
        if y.is_one() {
            return Err(Error::invalid("secret exponent maps to the identity"));
        }
        Ok(KeyPair { params, x, y })
    }

    pub fn params(&self) -> &GroupParams {
        &self.params
    }

    /// The public component `y = g^x mod p`
    pub fn public_component(&self) -> &BigUint {
        &self.y
    }

    pub(crate) fn secret_exponent(&self) -> &BigUint {
        &self.x
    }

    pub fn private_record(&self) -> PrivateKeyRecord {
        PrivateKeyRecord {
            p: self.params.p.clone(),
            g: self.params.g.clone(),
            x: self.x.clone(),
        }
    }
}

impl fmt::Debug for KeyPair {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("KeyPair")
            .field("p", &self.params.p)
            .field("g", &self.params.g)
            .field("y", &self.y)
            .finish_non_exhaustive()
    }
}

/// Stored form of the signer's key pair
#[derive(Serialize, Deserialize, Clone)]
pub struct PrivateKeyRecord {
    #[serde(with = "BigUintHex")]
    pub p: BigUint,

    #[serde(with = "BigUintHex")]
    pub g: BigUint,

    #[serde(with = "BigUintHex")]
    pub x: BigUint,
}

impl TryFrom<PrivateKeyRecord> for KeyPair {
    type Error = Error;

    fn try_from(record: PrivateKeyRecord) -> Result<Self, Self::Error> {
        let params = GroupParams::new(record.p, record.g)?;
        KeyPair::from_secret(params, record.x)
    }
}

impl From<KeyPair> for PrivateKeyRecord {
    fn from(keypair: KeyPair) -> Self {
        keypair.private_record()
    }
}

/// RSA public key `(n, e)`
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct RsaPublicKey {
    #[serde(with = "BigUintHex")]
    pub n: BigUint,

    #[serde(with = "BigUintHex")]
    pub e: BigUint,
}

/// RSA key pair used by [`SchemeKind::Rsa`]
#[derive(Serialize, Deserialize, Clone)]
#[serde(try_from = "RsaKeyRecord", into = "RsaKeyRecord")]
pub struct RsaKeyPair {
    key: RsaPrivateKey,
}

impl RsaKeyPair {
    /// Generate a key with a `bits`-bit modulus and `e = 65537`
    pub fn generate<R: Rng + CryptoRng + ?Sized>(bits: u64, rng: &mut R) -> Result<Self, Error> {
        if bits < 64 {
            return Err(Error::invalid(format!("RSA modulus of {} bits is too small", bits)));
        }
        let mut rng = rng;
        let exponent = rsa::BigUint::from(RSA_PUBLIC_EXPONENT);
        let key = RsaPrivateKey::new_with_exp(&mut rng, bits as usize, &exponent)
            .map_err(|e| Error::Arithmetic(format!("failed to generate an RSA key: {}", e)))?;
        Ok(RsaKeyPair { key })
    }

    pub fn public_key(&self) -> RsaPublicKey {
        RsaPublicKey {
            n: from_rsa_uint(self.key.n()),
            e: from_rsa_uint(self.key.e()),
        }
    }

    pub fn modulus(&self) -> BigUint {
        from_rsa_uint(self.key.n())
    }

    /// The raw private operation `value^d mod N`
    pub(crate) fn sign_raw(&self, value: &BigUint) -> Result<BigUint, Error> {
        let signed = hazmat::rsa_decrypt_and_check(&self.key, None::<&mut OsRng>, &to_rsa_uint(value))
            .map_err(|e| Error::Arithmetic(format!("RSA private operation failed: {}", e)))?;
        Ok(from_rsa_uint(&signed))
    }

    pub fn validate(&self) -> Result<(), Error> {
        self.key
            .validate()
            .map_err(|e| Error::invalid(format!("RSA key pair is inconsistent: {}", e)))
    }

    fn record(&self) -> RsaKeyRecord {
        let primes = self.key.primes();
        RsaKeyRecord {
            n: from_rsa_uint(self.key.n()),
            e: from_rsa_uint(self.key.e()),
            d: from_rsa_uint(self.key.d()),
            p: primes.first().map(from_rsa_uint).unwrap_or_default(),
            q: primes.get(1).map(from_rsa_uint).unwrap_or_default(),
        }
    }
}

impl PartialEq for RsaKeyPair {
    fn eq(&self, other: &Self) -> bool {
        self.key.n() == other.key.n() && self.key.e() == other.key.e() && self.key.d() == other.key.d()
    }
}

impl Eq for RsaKeyPair {}

impl fmt::Debug for RsaKeyPair {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("RsaKeyPair")
            .field("n", &self.modulus())
            .field("e", &from_rsa_uint(self.key.e()))
            .finish_non_exhaustive()
    }
}

/// Stored form of an RSA key pair
#[derive(Serialize, Deserialize, Clone)]
pub struct RsaKeyRecord {
    #[serde(with = "BigUintHex")]
    pub n: BigUint,

    #[serde(with = "BigUintHex")]
    pub e: BigUint,

    #[serde(with = "BigUintHex")]
    pub d: BigUint,

    #[serde(with = "BigUintHex")]
    pub p: BigUint,

    #[serde(with = "BigUintHex")]
    pub q: BigUint,
}

impl TryFrom<RsaKeyRecord> for RsaKeyPair {
    type Error = Error;

    fn try_from(record: RsaKeyRecord) -> Result<Self, Self::Error> {
        let key = RsaPrivateKey::from_components(
            to_rsa_uint(&record.n),
            to_rsa_uint(&record.e),
            to_rsa_uint(&record.d),
            vec![to_rsa_uint(&record.p), to_rsa_uint(&record.q)],
        )
        .map_err(|e| Error::invalid(format!("invalid RSA key record: {}", e)))?;
        let keypair = RsaKeyPair { key };
        keypair.validate()?;
        Ok(keypair)
    }
}

impl From<RsaKeyPair> for RsaKeyRecord {
    fn from(keypair: RsaKeyPair) -> Self {
        keypair.record()
    }
}

fn to_rsa_uint(value: &BigUint) -> rsa::BigUint {
    rsa::BigUint::from_bytes_be(&value.to_bytes_be())
}

fn from_rsa_uint(value: &rsa::BigUint) -> BigUint {
    BigUint::from_bytes_be(&value.to_bytes_be())
}

/// The scheme-specific part of the signer's private key
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SigningKey {
    /// Signs with the discrete-log key pair itself
    Schnorr,
    Rsa(RsaKeyPair),
}

/// Everything the signer keeps private
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct SignerKeys {
    pub keypair: KeyPair,
    pub signing: SigningKey,
}

impl SignerKeys {
    pub fn kind(&self) -> SchemeKind {
        match self.signing {
            SigningKey::Schnorr => SchemeKind::Schnorr,
            SigningKey::Rsa(_) => SchemeKind::Rsa,
        }
    }

    pub fn public_params(&self) -> PublicParams {
        let scheme = match &self.signing {
            SigningKey::Schnorr => PublicScheme::Schnorr,
            SigningKey::Rsa(rsa) => PublicScheme::Rsa(rsa.public_key()),
        };
        PublicParams {
            group: self.keypair.params().clone(),
            y: self.keypair.public_component().clone(),
            scheme,
        }
    }

    pub fn validate(&self) -> Result<(), Error> {
        self.keypair.params().validate()?;
        if let SigningKey::Rsa(rsa) = &self.signing {
            rsa.validate()?;
        }
        Ok(())
    }
}

/// What the signer publishes: `{p, g, y}` plus the verifying key of the scheme.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct PublicParams {
    #[serde(flatten)]
    pub group: GroupParams,

    #[serde(with = "BigUintHex")]
    pub y: BigUint,

    pub scheme: PublicScheme,
}

impl PublicParams {
    pub fn kind(&self) -> SchemeKind {
        match self.scheme {
            PublicScheme::Schnorr => SchemeKind::Schnorr,
            PublicScheme::Rsa(_) => SchemeKind::Rsa,
        }
    }
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PublicScheme {
    /// Verified against `y`
    Schnorr,
    Rsa(RsaPublicKey),
}

/// Holds the signer's keys for the life of the election.
pub struct KeyManager {
    keys: SignerKeys,
}

impl KeyManager {
    /// Generate fresh keys for the configured group and scheme
    pub fn generate<R: Rng + CryptoRng + ?Sized>(
        config: &Config,
        rng: &mut R,
    ) -> Result<Self, Error> {
        let keypair = KeyPair::generate(config.group_params()?, rng)?;
        let signing = match config.scheme {
            SchemeKind::Schnorr => SigningKey::Schnorr,
            SchemeKind::Rsa => SigningKey::Rsa(RsaKeyPair::generate(config.rsa_bits, rng)?),
        };
        info!("generated {} signing keys", config.scheme);
        Ok(KeyManager {
            keys: SignerKeys { keypair, signing },
        })
    }

    pub fn from_keys(keys: SignerKeys) -> Result<Self, Error> {
        keys.validate()?;
        Ok(KeyManager { keys })
    }

    /// Load the stored keys, or generate and store them if there are none.
    ///
    /// Stored keys are used unchanged even if the configuration has since
    /// moved on; an election keeps its keys until it ends.
    pub fn load_or_generate<S, R>(store: &S, config: &Config, rng: &mut R) -> Result<Self, Error>
    where
        S: Store + ?Sized,
        R: Rng + CryptoRng + ?Sized,
    {
        if let Some(keys) = store.load_keys()? {
            let manager = KeyManager::from_keys(keys)?;
            let params = manager.keys.keypair.params();
            if params.p != config.prime
                || params.g != config.generator
                || manager.keys.kind() != config.scheme
            {
                warn!("stored keys differ from the configuration; keeping the stored keys");
            }
            info!("loaded existing {} signing keys", manager.keys.kind());
            return Ok(manager);
        }

        let manager = KeyManager::generate(config, rng)?;
        store.save_keys(&manager.keys)?;
        Ok(manager)
    }

    pub fn public_params(&self) -> PublicParams {
        self.keys.public_params()
    }

    pub fn kind(&self) -> SchemeKind {
        self.keys.kind()
    }

    pub(crate) fn keys(&self) -> &SignerKeys {
        &self.keys
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use rand_chacha::ChaCha20Rng;

    fn toy_group() -> GroupParams {
        GroupParams::new(BigUint::from(9973u32), BigUint::from(5u32)).unwrap()
    }

    #[test]
    fn group_validation() {
        assert!(GroupParams::new(BigUint::from(9973u32), BigUint::from(5u32)).is_ok());
        assert!(GroupParams::new(BigUint::from(9971u32), BigUint::from(5u32)).is_err());
        assert!(GroupParams::new(BigUint::from(3u32), BigUint::from(2u32)).is_err());
        assert!(GroupParams::new(BigUint::from(9973u32), BigUint::from(1u32)).is_err());
        assert!(GroupParams::new(BigUint::from(9973u32), BigUint::from(9972u32)).is_err());

        let group = toy_group();
        assert!(!group.contains(&BigUint::zero()));
        assert!(group.contains(&BigUint::one()));
        assert!(group.contains(&BigUint::from(9972u32)));
        assert!(!group.contains(&BigUint::from(9973u32)));
    }

    #[test]
    fn deserialized_groups_are_checked() {
        let group: GroupParams = serde_json::from_str(r#"{"p":"26f5","g":"05"}"#).unwrap();
        assert_eq!(group, toy_group());

        for bad in [
            r#"{"p":"00","g":"02"}"#,
            r#"{"p":"03","g":"02"}"#,
            r#"{"p":"26f3","g":"05"}"#,
            r#"{"p":"26f5","g":"01"}"#,
        ] {
            assert!(serde_json::from_str::<GroupParams>(bad).is_err(), "{}", bad);
        }

        let mut rng = ChaCha20Rng::seed_from_u64(6);
        let manager = KeyManager::generate(&Config::default(), &mut rng).unwrap();
        let json = serde_json::to_string(&manager.public_params())
            .unwrap()
            .replace("\"p\":\"26f5\"", "\"p\":\"03\"");
        assert!(serde_json::from_str::<PublicParams>(&json).is_err());
    }

    #[test]
    fn keypair_invariants() {
        let mut rng = ChaCha20Rng::seed_from_u64(1);
        for _ in 0..50 {
            let keypair = KeyPair::generate(toy_group(), &mut rng).unwrap();
            let x = keypair.secret_exponent();
            assert!(*x >= BigUint::from(2u32) && *x <= BigUint::from(9971u32));
            assert_eq!(
                *keypair.public_component(),
                BigUint::from(5u32).modpow(x, &BigUint::from(9973u32))
            );
        }
    }

    #[test]
    fn keypair_from_secret() {
        let keypair = KeyPair::from_secret(toy_group(), BigUint::from(17u32)).unwrap();
        assert_eq!(
            *keypair.public_component(),
            BigUint::from(5u32).modpow(&BigUint::from(17u32), &BigUint::from(9973u32))
        );
        assert!(KeyPair::from_secret(toy_group(), BigUint::one()).is_err());
        assert!(KeyPair::from_secret(toy_group(), BigUint::from(9972u32)).is_err());
    }

    #[test]
    fn private_record_round_trip_revalidates() {
        let mut rng = ChaCha20Rng::seed_from_u64(2);
        let keypair = KeyPair::generate(toy_group(), &mut rng).unwrap();

        let json = serde_json::to_string(&keypair).unwrap();
        assert!(!json.contains("\"y\""));
        let restored: KeyPair = serde_json::from_str(&json).unwrap();
        assert_eq!(restored, keypair);

        // x outside [2, p-2] is refused on load
        let bad = r#"{"p":"26f5","g":"05","x":"01"}"#;
        assert!(serde_json::from_str::<KeyPair>(bad).is_err());
    }

    #[test]
    fn public_params_hide_secret() {
        let mut rng = ChaCha20Rng::seed_from_u64(3);
        let manager = KeyManager::generate(&Config::default(), &mut rng).unwrap();
        let params = manager.public_params();
        assert_eq!(params.kind(), SchemeKind::Schnorr);
        assert_eq!(params.y, *manager.keys().keypair.public_component());

        let json = serde_json::to_string(&params).unwrap();
        assert!(!json.contains("\"x\""));
        assert!(json.contains("\"p\":\"26f5\""));
        assert!(!format!("{:?}", manager.keys()).contains("x:"));
    }

    #[test]
    fn rsa_keys() {
        let mut rng = ChaCha20Rng::seed_from_u64(4);
        let rsa = RsaKeyPair::generate(256, &mut rng).unwrap();
        rsa.validate().unwrap();
        assert_eq!(rsa.modulus().bits(), 256);
        assert_eq!(rsa.public_key().e, BigUint::from(RSA_PUBLIC_EXPONENT));
        assert!(RsaKeyPair::generate(32, &mut rng).is_err());

        // The private operation inverts the public one
        let m = BigUint::from(123_456_789u32);
        let public = rsa.public_key();
        let signed = rsa.sign_raw(&m).unwrap();
        assert_eq!(signed.modpow(&public.e, &public.n), m);

        // Stored with its primes and checked again on load
        let json = serde_json::to_string(&rsa).unwrap();
        assert!(json.contains("\"q\""));
        let restored: RsaKeyPair = serde_json::from_str(&json).unwrap();
        assert_eq!(restored, rsa);
        let tampered = json.replacen("\"d\":\"", "\"d\":\"1", 1);
        assert!(serde_json::from_str::<RsaKeyPair>(&tampered).is_err());

        let config = Config {
            scheme: SchemeKind::Rsa,
            rsa_bits: 256,
            ..Config::default()
        };
        let manager = KeyManager::generate(&config, &mut rng).unwrap();
        assert_eq!(manager.kind(), SchemeKind::Rsa);
        assert!(matches!(manager.public_params().scheme, PublicScheme::Rsa(_)));
    }

    #[test]
    fn load_or_generate_keeps_stored_keys() {
        let mut rng = ChaCha20Rng::seed_from_u64(5);
        let store = MemStore::default();
        let config = Config::default();

        let first = KeyManager::load_or_generate(&store, &config, &mut rng).unwrap();
        let second = KeyManager::load_or_generate(&store, &config, &mut rng).unwrap();
        assert_eq!(first.keys(), second.keys());

        // A changed configuration does not replace stored keys
        let rsa_config = Config {
            scheme: SchemeKind::Rsa,
            rsa_bits: 256,
            ..Config::default()
        };
        let third = KeyManager::load_or_generate(&store, &rsa_config, &mut rng).unwrap();
        assert_eq!(third.kind(), SchemeKind::Schnorr);
        assert_eq!(first.public_params(), third.public_params());
    }
}
