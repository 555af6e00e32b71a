use num_bigint::BigUint;
use serde::{de, Deserialize, Deserializer, Serializer};

// a single-purpose type for use in `#[serde(with)]`
pub enum BigUintHex {}

impl BigUintHex {
    pub fn serialize<S: Serializer>(value: &BigUint, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&hex::encode(value.to_bytes_be()))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<BigUint, D::Error> {
        let encoded = String::deserialize(deserializer)?;
        let bytes = hex::decode(&encoded).map_err(de::Error::custom)?;
        Ok(BigUint::from_bytes_be(&bytes))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Serialize;

    #[derive(Serialize, Deserialize, Debug, PartialEq)]
    struct Wrapper {
        #[serde(with = "BigUintHex")]
        value: BigUint,
    }

    #[test]
    fn hex_encoding() {
        let wrapped = Wrapper {
            value: BigUint::from(9973u32),
        };
        let json = serde_json::to_string(&wrapped).unwrap();
        assert_eq!(json, r#"{"value":"26f5"}"#);

        let bad = serde_json::from_str::<Wrapper>(r#"{"value":"not hex"}"#);
        assert!(bad.is_err());
    }
}
