//! external prover and submission seams

use async_trait::async_trait;
use num_bigint::BigUint;
use serde_json::{json, Value};
use tracing::info;

use crate::assemble::{ProverInput, PublicSignals};
use crate::field::fr_to_hex;
use crate::{LedgerError, Result};

/// groth16 proof in the coordinate order the on-chain verifier expects
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProofTriple {
    pub a: [BigUint; 2],
    pub b: [[BigUint; 2]; 2],
    pub c: [BigUint; 2],
}

impl ProofTriple {
    /// read a snarkjs `proof.json`. snarkjs lists each G2 coordinate as
    /// (c0, c1) while the verifier contract takes (c1, c0).
    pub fn from_snarkjs(proof: &Value) -> Result<Self> {
        let coord = |path: &[usize], key: &str| -> Result<BigUint> {
            let mut node = proof
                .get(key)
                .ok_or_else(|| LedgerError::Serialization(format!("proof has no {}", key)))?;
            for i in path {
                node = node
                    .get(*i)
                    .ok_or_else(|| LedgerError::Serialization(format!("{}{:?} missing", key, path)))?;
            }
            let s = node
                .as_str()
                .ok_or_else(|| LedgerError::Serialization(format!("{}{:?} is not a string", key, path)))?;
            BigUint::parse_bytes(s.as_bytes(), 10)
                .ok_or_else(|| LedgerError::Serialization(format!("{}{:?} is not decimal", key, path)))
        };

        Ok(Self {
            a: [coord(&[0], "pi_a")?, coord(&[1], "pi_a")?],
            b: [
                [coord(&[0, 1], "pi_b")?, coord(&[0, 0], "pi_b")?],
                [coord(&[1, 1], "pi_b")?, coord(&[1, 0], "pi_b")?],
            ],
            c: [coord(&[0], "pi_c")?, coord(&[1], "pi_c")?],
        })
    }

    pub fn to_json(&self) -> Value {
        let s = |v: &BigUint| v.to_str_radix(10);
        json!({
            "a": [s(&self.a[0]), s(&self.a[1])],
            "b": [[s(&self.b[0][0]), s(&self.b[0][1])], [s(&self.b[1][0]), s(&self.b[1][1])]],
            "c": [s(&self.c[0]), s(&self.c[1])],
        })
    }
}

/// proof plus the public values it commits to
#[derive(Debug, Clone)]
pub struct SubmissionBundle {
    pub proof: ProofTriple,
    pub public: PublicSignals,
}

impl SubmissionBundle {
    pub fn to_json(&self) -> Result<Value> {
        Ok(json!({
            "proof": self.proof.to_json(),
            "public": serde_json::to_value(&self.public)?,
        }))
    }
}

/// turns a witness bundle into a proof (snarkjs, rapidsnark, a remote service)
#[async_trait]
pub trait Prover: Send + Sync {
    async fn prove(&self, input: &ProverInput) -> Result<ProofTriple>;
}

/// signs and broadcasts a proven spend, returning the transaction id
#[async_trait]
pub trait Submitter: Send + Sync {
    async fn submit(&self, bundle: &SubmissionBundle) -> Result<String>;
}

/// prove, then submit. a failed proof never reaches the submitter.
pub async fn prove_and_submit(
    prover: &dyn Prover,
    submitter: &dyn Submitter,
    input: &ProverInput,
) -> Result<String> {
    let proof = prover.prove(input).await?;
    let bundle = SubmissionBundle {
        proof,
        public: input.public.clone(),
    };
    let tx = submitter.submit(&bundle).await?;
    info!(
        "submitted {} with root {}: {}",
        input.shape,
        fr_to_hex(&input.public.root),
        tx
    );
    Ok(tx)
}
