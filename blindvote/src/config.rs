use crate::*;
use num_bigint::BigUint;
use std::env::var;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

pub const DEFAULT_PRIME: u32 = 9973;
pub const DEFAULT_GENERATOR: u32 = 5;
pub const DEFAULT_RSA_BITS: u64 = 1024;
pub const DEFAULT_SESSION_TTL_SECS: u64 = 300;

const MIN_RSA_BITS: u64 = 64;

/// Which blind-signature construction the signer runs.
///
/// Chosen once when the keys are generated and never changed afterwards.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum SchemeKind {
    /// Blind Schnorr signatures in the DH group, using the exchange's
    /// ephemeral value as the commitment.
    #[default]
    Schnorr,

    /// Chaum blind signatures with an RSA full-domain hash.
    Rsa,
}

impl FromStr for SchemeKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "schnorr" => Ok(SchemeKind::Schnorr),
            "rsa" => Ok(SchemeKind::Rsa),
            other => Err(Error::Config(format!("unknown signing scheme '{}'", other))),
        }
    }
}

impl fmt::Display for SchemeKind {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            SchemeKind::Schnorr => write!(f, "schnorr"),
            SchemeKind::Rsa => write!(f, "rsa"),
        }
    }
}

/// Election settings
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Config {
    /// Prime modulus of the DH group
    pub prime: BigUint,

    /// Generator of the DH group
    pub generator: BigUint,

    pub scheme: SchemeKind,

    /// Modulus size used when generating an RSA signing key
    pub rsa_bits: u64,

    /// Idle time after which a DH session is discarded
    pub session_ttl: Duration,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            prime: BigUint::from(DEFAULT_PRIME),
            generator: BigUint::from(DEFAULT_GENERATOR),
            scheme: SchemeKind::default(),
            rsa_bits: DEFAULT_RSA_BITS,
            session_ttl: Duration::from_secs(DEFAULT_SESSION_TTL_SECS),
        }
    }
}

impl Config {
    /// Read settings from `BLINDVOTE_*` environment variables, falling back to
    /// the defaults for anything unset.
    pub fn from_env() -> Result<Self, Error> {
        Self::from_lookup(|key| var(key).ok())
    }

    /// Read settings through an arbitrary key lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, Error>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Config::default();

        if let Some(val) = lookup("BLINDVOTE_PRIME") {
            config.prime = parse_number("BLINDVOTE_PRIME", &val)?;
        }
        if let Some(val) = lookup("BLINDVOTE_GENERATOR") {
            config.generator = parse_number("BLINDVOTE_GENERATOR", &val)?;
        }
        if let Some(val) = lookup("BLINDVOTE_SCHEME") {
            config.scheme = val.parse()?;
        }
        if let Some(val) = lookup("BLINDVOTE_RSA_BITS") {
            config.rsa_bits = parse_number("BLINDVOTE_RSA_BITS", &val)?;
        }
        if let Some(val) = lookup("BLINDVOTE_SESSION_TTL_SECS") {
            let secs: u64 = parse_number("BLINDVOTE_SESSION_TTL_SECS", &val)?;
            config.session_ttl = Duration::from_secs(secs);
        }

        config.validate()?;
        Ok(config)
    }

    /// The DH group described by these settings
    pub fn group_params(&self) -> Result<GroupParams, Error> {
        GroupParams::new(self.prime.clone(), self.generator.clone())
            .map_err(|e| Error::Config(e.to_string()))
    }

    pub fn validate(&self) -> Result<(), Error> {
        self.group_params()?;
        if self.scheme == SchemeKind::Rsa && self.rsa_bits < MIN_RSA_BITS {
            return Err(Error::Config(format!(
                "RSA modulus of {} bits is too small (minimum {})",
                self.rsa_bits, MIN_RSA_BITS
            )));
        }
        Ok(())
    }
}

fn parse_number<T: FromStr>(key: &str, val: &str) -> Result<T, Error> {
    val.trim()
        .parse()
        .map_err(|_| Error::Config(format!("{} must be a non-negative integer, got '{}'", key, val)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| vars.get(key).cloned()
    }

    #[test]
    fn defaults() {
        let config = Config::from_lookup(lookup(&[])).unwrap();
        assert_eq!(config, Config::default());
        assert_eq!(config.prime, BigUint::from(9973u32));
        assert_eq!(config.generator, BigUint::from(5u32));
        assert_eq!(config.scheme, SchemeKind::Schnorr);
        assert_eq!(config.session_ttl, Duration::from_secs(300));
    }

    #[test]
    fn overrides() {
        let config = Config::from_lookup(lookup(&[
            ("BLINDVOTE_PRIME", "65537"),
            ("BLINDVOTE_GENERATOR", "3"),
            ("BLINDVOTE_SCHEME", "RSA"),
            ("BLINDVOTE_RSA_BITS", "512"),
            ("BLINDVOTE_SESSION_TTL_SECS", " 30 "),
        ]))
        .unwrap();
        assert_eq!(config.prime, BigUint::from(65537u32));
        assert_eq!(config.generator, BigUint::from(3u32));
        assert_eq!(config.scheme, SchemeKind::Rsa);
        assert_eq!(config.rsa_bits, 512);
        assert_eq!(config.session_ttl, Duration::from_secs(30));
    }

    #[test]
    fn rejects_bad_values() {
        let bad = [
            ("BLINDVOTE_PRIME", "9972"),
            ("BLINDVOTE_PRIME", "lots"),
            ("BLINDVOTE_GENERATOR", "1"),
            ("BLINDVOTE_GENERATOR", "9972"),
            ("BLINDVOTE_SCHEME", "elgamal"),
            ("BLINDVOTE_SESSION_TTL_SECS", "-1"),
        ];
        for (key, val) in bad {
            let result = Config::from_lookup(lookup(&[(key, val)]));
            assert!(matches!(result, Err(Error::Config(_))), "{}={}", key, val);
        }

        let result = Config::from_lookup(lookup(&[
            ("BLINDVOTE_SCHEME", "rsa"),
            ("BLINDVOTE_RSA_BITS", "32"),
        ]));
        assert!(matches!(result, Err(Error::Config(_))));
    }
}
