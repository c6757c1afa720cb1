//! bn254 scalar field helpers
//!
//! every value that reaches the hasher (commitments, secrets, roots) is an
//! element of the bn254 scalar field. textual inputs are parsed strictly:
//! a value at or above the modulus is an error, never silently reduced.

use ark_ff::{BigInteger, PrimeField};
use num_bigint::BigUint;

use crate::{LedgerError, Result};

pub use ark_bn254::Fr;

/// field modulus as a big integer
pub fn modulus() -> BigUint {
    BigUint::from_bytes_be(&Fr::MODULUS.to_bytes_be())
}

/// convert canonical big-endian bytes into a field element
pub fn fr_from_be_bytes(bytes: &[u8; 32]) -> Result<Fr> {
    let value = BigUint::from_bytes_be(bytes);
    if value >= modulus() {
        return Err(LedgerError::InvalidField(format!(
            "0x{} is not below the field modulus",
            hex::encode(bytes)
        )));
    }
    Ok(Fr::from_be_bytes_mod_order(bytes))
}

/// big-endian 32-byte encoding
pub fn fr_to_be_bytes(value: &Fr) -> [u8; 32] {
    let bytes = value.into_bigint().to_bytes_be();
    let mut out = [0u8; 32];
    out[32 - bytes.len()..].copy_from_slice(&bytes);
    out
}

/// parse `0x`-prefixed (or bare) hex, at most 64 digits
pub fn fr_from_hex(s: &str) -> Result<Fr> {
    let digits = s.strip_prefix("0x").unwrap_or(s);
    if digits.is_empty() || digits.len() > 64 {
        return Err(LedgerError::InvalidField(format!("bad hex length: {:?}", s)));
    }
    let padded = format!("{:0>64}", digits);
    let mut bytes = [0u8; 32];
    hex::decode_to_slice(&padded, &mut bytes)
        .map_err(|e| LedgerError::InvalidField(format!("{:?}: {}", s, e)))?;
    fr_from_be_bytes(&bytes)
}

/// `0x` + 64 lowercase hex digits
pub fn fr_to_hex(value: &Fr) -> String {
    format!("0x{}", hex::encode(fr_to_be_bytes(value)))
}

/// parse a base-10 string (the prover's native encoding)
pub fn fr_from_decimal(s: &str) -> Result<Fr> {
    let value = BigUint::parse_bytes(s.as_bytes(), 10)
        .ok_or_else(|| LedgerError::InvalidField(format!("not a decimal integer: {:?}", s)))?;
    if value >= modulus() {
        return Err(LedgerError::InvalidField(format!("{} is not below the field modulus", s)));
    }
    Ok(Fr::from_be_bytes_mod_order(&value.to_bytes_be()))
}

pub fn fr_to_decimal(value: &Fr) -> String {
    BigUint::from_bytes_be(&fr_to_be_bytes(value)).to_str_radix(10)
}

/// serde adapter: field element as `0x` hex string
pub mod hex_fr {
    use super::*;
    use serde::{de::Error as _, Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Fr, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(&fr_to_hex(value))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Fr, D::Error> {
        let s = String::deserialize(deserializer)?;
        fr_from_hex(&s).map_err(D::Error::custom)
    }
}

/// serde adapter: list of field elements as `0x` hex strings
pub mod hex_fr_vec {
    use super::*;
    use serde::{de::Error as _, ser::SerializeSeq, Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(values: &[Fr], serializer: S) -> std::result::Result<S::Ok, S::Error> {
        let mut seq = serializer.serialize_seq(Some(values.len()))?;
        for value in values {
            seq.serialize_element(&fr_to_hex(value))?;
        }
        seq.end()
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Vec<Fr>, D::Error> {
        let raw = Vec::<String>::deserialize(deserializer)?;
        raw.iter()
            .map(|s| fr_from_hex(s).map_err(D::Error::custom))
            .collect()
    }
}

/// serde adapter: field element as base-10 string
pub mod decimal_fr {
    use super::*;
    use serde::{de::Error as _, Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Fr, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(&fr_to_decimal(value))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Fr, D::Error> {
        let s = String::deserialize(deserializer)?;
        fr_from_decimal(&s).map_err(D::Error::custom)
    }
}
