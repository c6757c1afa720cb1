//! poseidon over bn254, bit-compatible with circomlib
//!
//! the tree hash and the note commitment must match the circuit and the
//! on-chain hasher exactly. a mismatch does not corrupt anything locally, it
//! just yields proofs that never verify on-chain.

use std::sync::Mutex;

use light_poseidon::{Poseidon, PoseidonHasher as _};

use crate::field::Fr;
use crate::Result;

/// two-to-one compression used for tree nodes
pub trait MerkleHasher: Send + Sync {
    fn hash_pair(&self, left: &Fr, right: &Fr) -> Result<Fr>;
}

/// circom-parameter poseidon (t = 3 for nodes, t = 4 for note commitments)
pub struct PoseidonHasher {
    pair: Mutex<Poseidon<Fr>>,
    triple: Mutex<Poseidon<Fr>>,
}

impl PoseidonHasher {
    pub fn new() -> Result<Self> {
        Ok(Self {
            pair: Mutex::new(Poseidon::<Fr>::new_circom(2)?),
            triple: Mutex::new(Poseidon::<Fr>::new_circom(3)?),
        })
    }

    /// Poseidon(a, b, c), used for note commitments
    pub fn hash_triple(&self, a: &Fr, b: &Fr, c: &Fr) -> Result<Fr> {
        let mut poseidon = self.triple.lock().unwrap_or_else(|e| e.into_inner());
        Ok(poseidon.hash(&[*a, *b, *c])?)
    }
}

impl MerkleHasher for PoseidonHasher {
    fn hash_pair(&self, left: &Fr, right: &Fr) -> Result<Fr> {
        let mut poseidon = self.pair.lock().unwrap_or_else(|e| e.into_inner());
        Ok(poseidon.hash(&[*left, *right])?)
    }
}

impl<H: MerkleHasher + ?Sized> MerkleHasher for std::sync::Arc<H> {
    fn hash_pair(&self, left: &Fr, right: &Fr) -> Result<Fr> {
        (**self).hash_pair(left, right)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::field::{fr_from_hex, fr_to_hex};

    #[test]
    fn test_circomlib_vector() {
        // circomlibjs: poseidon([1, 2])
        let h = PoseidonHasher::new().unwrap();
        let out = h.hash_pair(&Fr::from(1u64), &Fr::from(2u64)).unwrap();
        assert_eq!(
            out,
            fr_from_hex("0x115cc0f5e7d690413df64c6b9662e9cf2a3617f2743245519e19607a4417189a").unwrap(),
            "got {}",
            fr_to_hex(&out)
        );
    }

    #[test]
    fn test_order_matters() {
        let h = PoseidonHasher::new().unwrap();
        let a = Fr::from(7u64);
        let b = Fr::from(9u64);
        assert_ne!(h.hash_pair(&a, &b).unwrap(), h.hash_pair(&b, &a).unwrap());
    }

    #[test]
    fn test_triple_differs_from_pair() {
        let h = PoseidonHasher::new().unwrap();
        let one = Fr::from(1u64);
        let two = Fr::from(2u64);
        let zero = Fr::from(0u64);
        assert_ne!(
            h.hash_triple(&one, &two, &zero).unwrap(),
            h.hash_pair(&one, &two).unwrap()
        );
    }
}
