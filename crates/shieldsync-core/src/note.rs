//! private notes (utxos)
//!
//! a note is known only to its owner. its commitment
//! Poseidon(amount, secret, nullifier) is what lands in the tree; the
//! nullifier is revealed when the note is spent.

use rand::RngCore;
use serde::{Deserialize, Serialize};

use crate::field::{fr_to_hex, hex_fr, Fr};
use crate::hasher::PoseidonHasher;
use crate::{LedgerError, Result};

/// note value in the token's base unit
pub type Amount = u128;

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Note {
    /// amounts are stored as decimal strings so that json readers never round them
    #[serde(with = "amount_string")]
    pub amount: Amount,
    #[serde(with = "hex_fr")]
    pub secret: Fr,
    #[serde(with = "hex_fr")]
    pub nullifier: Fr,
    #[serde(with = "hex_fr")]
    pub commitment: Fr,
    #[serde(default)]
    pub spent: bool,
    /// leaf index once the commitment was seen in a verified tree
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub leaf_index: Option<u64>,
}

impl Note {
    /// build a note from its secret material, deriving the commitment
    pub fn new(hasher: &PoseidonHasher, amount: Amount, secret: Fr, nullifier: Fr) -> Result<Self> {
        let commitment = commit(hasher, amount, &secret, &nullifier)?;
        Ok(Self {
            amount,
            secret,
            nullifier,
            commitment,
            spent: false,
            leaf_index: None,
        })
    }

    /// fresh note with random secret and nullifier
    pub fn random<R: RngCore>(hasher: &PoseidonHasher, amount: Amount, rng: &mut R) -> Result<Self> {
        Self::new(hasher, amount, random_field(rng), random_field(rng))
    }

    /// recompute the commitment and compare
    pub fn check_commitment(&self, hasher: &PoseidonHasher) -> Result<()> {
        let expected = commit(hasher, self.amount, &self.secret, &self.nullifier)?;
        if expected != self.commitment {
            return Err(LedgerError::InvalidNote(format!(
                "stored commitment {} does not match derived {}",
                fr_to_hex(&self.commitment),
                fr_to_hex(&expected)
            )));
        }
        Ok(())
    }

    /// same note, ignoring local bookkeeping (spent flag, leaf index)
    pub fn same_payload(&self, other: &Note) -> bool {
        self.amount == other.amount
            && self.secret == other.secret
            && self.nullifier == other.nullifier
            && self.commitment == other.commitment
    }

    pub fn commitment_hex(&self) -> String {
        fr_to_hex(&self.commitment)
    }
}

/// commitment = Poseidon(amount, secret, nullifier)
pub fn commit(hasher: &PoseidonHasher, amount: Amount, secret: &Fr, nullifier: &Fr) -> Result<Fr> {
    hasher.hash_triple(&Fr::from(amount), secret, nullifier)
}

/// 248 random bits, always below the modulus
pub fn random_field<R: RngCore>(rng: &mut R) -> Fr {
    let mut bytes = [0u8; 32];
    rng.fill_bytes(&mut bytes[1..]);
    crate::field::fr_from_be_bytes(&bytes).unwrap_or_else(|_| Fr::from(0u64))
}

/// serde adapter: amount as base-10 string
pub(crate) mod amount_string {
    use super::Amount;
    use serde::{de::Error as _, Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Amount, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&value.to_string())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Amount, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse::<Amount>().map_err(D::Error::custom)
    }
}
