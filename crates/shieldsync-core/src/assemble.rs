//! prover input assembly
//!
//! checks a spend against the notes we hold and a verified tree, then lays
//! the witness out the way the circuits name their signals. nothing here
//! proves anything; the bundle goes to an external prover.
//!
//! | circuit  | inputs | outputs | public amount |
//! |----------|--------|---------|---------------|
//! | deposit  | 0      | 1       | in            |
//! | transfer | 2      | 2       | none          |
//! | withdraw | 1      | 0       | out           |

use std::collections::HashSet;
use std::fmt;
use std::str::FromStr;

use rand::RngCore;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::field::{fr_to_decimal, fr_to_hex, hex_fr, hex_fr_vec, Fr};
use crate::note::{amount_string, Amount, Note};
use crate::reconcile::VerifiedSnapshot;
use crate::store::{NoteBackend, NoteStore};
use crate::tree::MerkleProof;
use crate::{LedgerError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CircuitShape {
    Deposit,
    Transfer,
    Withdraw,
}

impl CircuitShape {
    pub fn inputs(&self) -> usize {
        match self {
            CircuitShape::Deposit => 0,
            CircuitShape::Transfer => 2,
            CircuitShape::Withdraw => 1,
        }
    }

    pub fn outputs(&self) -> usize {
        match self {
            CircuitShape::Deposit => 1,
            CircuitShape::Transfer => 2,
            CircuitShape::Withdraw => 0,
        }
    }

    /// (public amount entering, public amount leaving) the pool
    fn public_flow(&self, public_amount: Amount) -> (Amount, Amount) {
        match self {
            CircuitShape::Deposit => (public_amount, 0),
            CircuitShape::Transfer => (0, 0),
            CircuitShape::Withdraw => (0, public_amount),
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            CircuitShape::Deposit => "deposit",
            CircuitShape::Transfer => "transfer",
            CircuitShape::Withdraw => "withdraw",
        }
    }
}

impl fmt::Display for CircuitShape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for CircuitShape {
    type Err = LedgerError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "deposit" => Ok(CircuitShape::Deposit),
            "transfer" => Ok(CircuitShape::Transfer),
            "withdraw" => Ok(CircuitShape::Withdraw),
            other => Err(LedgerError::CircuitShapeMismatch(format!("unknown circuit {:?}", other))),
        }
    }
}

/// a spend to check and lay out
#[derive(Debug, Clone)]
pub struct SpendRequest {
    pub shape: CircuitShape,
    /// commitments of the notes being consumed
    pub inputs: Vec<Fr>,
    /// freshly created notes
    pub outputs: Vec<Note>,
    /// value entering (deposit) or leaving (withdraw) the pool; zero for transfers
    pub public_amount: Amount,
}

/// deposit circuit signals
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DepositInputs {
    pub amount: String,
    pub secret: String,
    pub nullifier: String,
}

/// transfer / withdraw circuit signals
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SpendInputs {
    pub input_amounts: Vec<String>,
    pub input_secrets: Vec<String>,
    pub input_nullifiers: Vec<String>,
    pub path_elements: Vec<Vec<String>>,
    pub path_indices: Vec<Vec<String>>,
    pub root: String,
    pub output_amounts: Vec<String>,
    pub output_secrets: Vec<String>,
    pub output_nullifiers: Vec<String>,
    pub public_amount: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum CircuitInputs {
    Deposit(DepositInputs),
    Spend(SpendInputs),
}

/// what the chain will see once the proof lands
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PublicSignals {
    #[serde(with = "hex_fr_vec")]
    pub nullifiers: Vec<Fr>,
    #[serde(with = "hex_fr_vec")]
    pub commitments: Vec<Fr>,
    /// tree root the inputs are proven against (zero for deposits)
    #[serde(with = "hex_fr")]
    pub root: Fr,
    #[serde(with = "amount_string")]
    pub public_amount: Amount,
}

/// everything handed to the prover for one circuit run
#[derive(Debug, Clone)]
pub struct ProverInput {
    pub shape: CircuitShape,
    pub inputs: CircuitInputs,
    pub public: PublicSignals,
}

impl ProverInput {
    /// circuit-named input json, as the witness generator expects it
    pub fn to_json(&self) -> Result<serde_json::Value> {
        Ok(serde_json::to_value(&self.inputs)?)
    }

    pub fn to_json_pretty(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(&self.inputs)?)
    }
}

/// lays out spends against one verified snapshot
pub struct ProofAssembler<'a> {
    snapshot: &'a VerifiedSnapshot,
}

impl<'a> ProofAssembler<'a> {
    pub fn new(snapshot: &'a VerifiedSnapshot) -> Self {
        Self { snapshot }
    }

    /// notes that can back an input right now: present in the tree and not
    /// revealed in the snapshot
    pub fn is_spendable(&self, note: &Note) -> bool {
        !note.spent
            && !self.snapshot.is_spent(&note.nullifier)
            && self.snapshot.tree().position_of(&note.commitment).is_some()
    }

    pub fn assemble<B: NoteBackend>(&self, store: &NoteStore<B>, request: &SpendRequest) -> Result<ProverInput> {
        let shape = request.shape;
        if request.inputs.len() != shape.inputs() || request.outputs.len() != shape.outputs() {
            return Err(LedgerError::CircuitShapeMismatch(format!(
                "{} takes {} inputs and {} outputs, got {} and {}",
                shape,
                shape.inputs(),
                shape.outputs(),
                request.inputs.len(),
                request.outputs.len()
            )));
        }
        if shape == CircuitShape::Transfer && request.public_amount != 0 {
            return Err(LedgerError::CircuitShapeMismatch(
                "transfer has no public amount".into(),
            ));
        }
        let mut distinct = HashSet::new();
        if !request.inputs.iter().all(|c| distinct.insert(*c)) {
            return Err(LedgerError::CircuitShapeMismatch("same note used twice".into()));
        }

        let mut inputs = Vec::with_capacity(request.inputs.len());
        for commitment in &request.inputs {
            inputs.push(self.resolve_input(store, commitment)?);
        }
        for output in &request.outputs {
            output.check_commitment(store.hasher())?;
        }

        let (public_in, public_out) = shape.public_flow(request.public_amount);
        let total_in = sum(inputs.iter().map(|(n, _)| n.amount))?
            .checked_add(public_in)
            .ok_or_else(overflow)?;
        let total_out = sum(request.outputs.iter().map(|n| n.amount))?
            .checked_add(public_out)
            .ok_or_else(overflow)?;
        if total_in != total_out {
            return Err(LedgerError::ValueNotConserved {
                inputs: total_in,
                outputs: total_out,
            });
        }

        let root = if shape == CircuitShape::Deposit {
            Fr::from(0u64)
        } else {
            self.snapshot.root()
        };
        let public = PublicSignals {
            nullifiers: inputs.iter().map(|(n, _)| n.nullifier).collect(),
            commitments: request.outputs.iter().map(|n| n.commitment).collect(),
            root,
            public_amount: request.public_amount,
        };

        let circuit = match shape {
            CircuitShape::Deposit => {
                let note = &request.outputs[0];
                if note.amount != request.public_amount {
                    return Err(LedgerError::ValueNotConserved {
                        inputs: request.public_amount,
                        outputs: note.amount,
                    });
                }
                CircuitInputs::Deposit(DepositInputs {
                    amount: note.amount.to_string(),
                    secret: fr_to_decimal(&note.secret),
                    nullifier: fr_to_decimal(&note.nullifier),
                })
            }
            CircuitShape::Transfer | CircuitShape::Withdraw => CircuitInputs::Spend(SpendInputs {
                input_amounts: inputs.iter().map(|(n, _)| n.amount.to_string()).collect(),
                input_secrets: inputs.iter().map(|(n, _)| fr_to_decimal(&n.secret)).collect(),
                input_nullifiers: inputs.iter().map(|(n, _)| fr_to_decimal(&n.nullifier)).collect(),
                path_elements: inputs
                    .iter()
                    .map(|(_, p)| p.path_elements.iter().map(fr_to_decimal).collect())
                    .collect(),
                path_indices: inputs
                    .iter()
                    .map(|(_, p)| p.path_indices.iter().map(|b| b.to_string()).collect())
                    .collect(),
                root: fr_to_decimal(&root),
                output_amounts: request.outputs.iter().map(|n| n.amount.to_string()).collect(),
                output_secrets: request.outputs.iter().map(|n| fr_to_decimal(&n.secret)).collect(),
                output_nullifiers: request.outputs.iter().map(|n| fr_to_decimal(&n.nullifier)).collect(),
                public_amount: request.public_amount.to_string(),
            }),
        };

        info!(
            "assembled {} input: {} in, {} out, root {}",
            shape,
            inputs.len(),
            request.outputs.len(),
            fr_to_hex(&root)
        );
        Ok(ProverInput {
            shape,
            inputs: circuit,
            public,
        })
    }

    /// pick inputs with `select_spendable` for the shape, then assemble
    pub fn select_and_assemble<B: NoteBackend>(
        &self,
        store: &NoteStore<B>,
        shape: CircuitShape,
        outputs: Vec<Note>,
        public_amount: Amount,
    ) -> Result<ProverInput> {
        let (public_in, public_out) = shape.public_flow(public_amount);
        let target = sum(outputs.iter().map(|n| n.amount))?
            .checked_add(public_out)
            .ok_or_else(overflow)?
            .saturating_sub(public_in);
        let chosen = store.select_spendable_where(shape.inputs(), target, |n| self.is_spendable(n))?;
        self.assemble(
            store,
            &SpendRequest {
                shape,
                inputs: chosen.iter().map(|n| n.commitment).collect(),
                outputs,
                public_amount,
            },
        )
    }

    /// deposit a fresh note of `amount`
    pub fn deposit<B: NoteBackend>(&self, store: &NoteStore<B>, note: Note) -> Result<ProverInput> {
        let amount = note.amount;
        self.assemble(
            store,
            &SpendRequest {
                shape: CircuitShape::Deposit,
                inputs: Vec::new(),
                outputs: vec![note],
                public_amount: amount,
            },
        )
    }

    /// pay `amount` into a new note, returning the rest as change. returns
    /// the bundle plus the two output notes (payment, change).
    pub fn transfer<B: NoteBackend, R: RngCore>(
        &self,
        store: &NoteStore<B>,
        amount: Amount,
        rng: &mut R,
    ) -> Result<(ProverInput, Note, Note)> {
        let chosen = store.select_spendable_where(CircuitShape::Transfer.inputs(), amount, |n| self.is_spendable(n))?;
        let total = sum(chosen.iter().map(|n| n.amount))?;
        let payment = Note::random(store.hasher(), amount, rng)?;
        let change = Note::random(store.hasher(), total - amount, rng)?;
        debug!("transfer {} from {} selected, change {}", amount, total, total - amount);

        let input = self.assemble(
            store,
            &SpendRequest {
                shape: CircuitShape::Transfer,
                inputs: chosen.iter().map(|n| n.commitment).collect(),
                outputs: vec![payment.clone(), change.clone()],
                public_amount: 0,
            },
        )?;
        Ok((input, payment, change))
    }

    /// withdraw one whole note of exactly `amount`. the circuit has no
    /// outputs, so there is nowhere to put change.
    pub fn withdraw<B: NoteBackend>(&self, store: &NoteStore<B>, amount: Amount) -> Result<ProverInput> {
        let exact = |n: &Note| n.amount == amount && self.is_spendable(n);
        if !store.unspent().any(|n| exact(n)) {
            let balance = store
                .unspent()
                .filter(|n| self.is_spendable(n))
                .fold(0, |acc: Amount, n| acc.saturating_add(n.amount));
            return Err(LedgerError::NoExactNote { amount, balance });
        }
        let chosen = store.select_spendable_where(1, amount, exact)?;
        self.assemble(
            store,
            &SpendRequest {
                shape: CircuitShape::Withdraw,
                inputs: chosen.iter().map(|n| n.commitment).collect(),
                outputs: Vec::new(),
                public_amount: amount,
            },
        )
    }

    /// known, unspent, in the tree, and the path checks out locally
    fn resolve_input<B: NoteBackend>(&self, store: &NoteStore<B>, commitment: &Fr) -> Result<(Note, MerkleProof)> {
        let note = store
            .get(commitment)
            .ok_or_else(|| LedgerError::UnknownNote(fr_to_hex(commitment)))?;
        if note.spent || self.snapshot.is_spent(&note.nullifier) {
            return Err(LedgerError::NoteSpent(fr_to_hex(commitment)));
        }

        let tree = self.snapshot.tree();
        let index = tree
            .position_of(commitment)
            .ok_or_else(|| LedgerError::NotFoundInTree(fr_to_hex(commitment)))?;
        let proof = tree.proof(index)?;
        if !proof.verify(tree.hasher(), commitment, &self.snapshot.root())? {
            return Err(LedgerError::Integrity {
                computed: fr_to_hex(&proof.compute_root(tree.hasher(), commitment)?),
                onchain: fr_to_hex(&self.snapshot.root()),
                height: self.snapshot.height(),
            });
        }
        Ok((note.clone(), proof))
    }
}

fn sum<I: Iterator<Item = Amount>>(amounts: I) -> Result<Amount> {
    let mut total: Amount = 0;
    for amount in amounts {
        total = total.checked_add(amount).ok_or_else(overflow)?;
    }
    Ok(total)
}

fn overflow() -> LedgerError {
    LedgerError::InvalidNote("amount overflow".into())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SyncConfig;
    use crate::event::{encode_commitment_log, encode_nullifier_log, EventKey};
    use crate::hasher::PoseidonHasher;
    use crate::reconcile::Reconciler;
    use crate::source::memory::{MemoryLogSource, MemoryRootSource};
    use crate::source::CancelToken;
    use crate::store::{MemoryBackend, OwnerId};
    use crate::tree::{CommitmentTree, LeafInput};
    use rand::rngs::OsRng;
    use std::sync::Arc;

    const POOL: &str = "0x00000000000000000000000000000000000000aa";
    const DEPTH: usize = 6;

    struct Fixture {
        hasher: Arc<PoseidonHasher>,
        store: NoteStore<MemoryBackend>,
    }

    impl Fixture {
        fn new() -> Self {
            let hasher = Arc::new(PoseidonHasher::new().unwrap());
            let store = NoteStore::open(
                Arc::new(MemoryBackend::new()),
                OwnerId::new("alice").unwrap(),
                hasher.clone(),
            )
            .unwrap();
            Self { hasher, store }
        }

        fn note(&mut self, amount: Amount, seed: u64) -> Note {
            let note = Note::new(&self.hasher, amount, Fr::from(seed), Fr::from(seed + 500)).unwrap();
            self.store.add_note(note.clone()).unwrap();
            note
        }

        /// snapshot holding `leaves` in order, with `spent` revealed
        async fn snapshot(&self, leaves: &[Fr], spent: &[Fr]) -> VerifiedSnapshot {
            let mut logs = Vec::new();
            for (i, commitment) in leaves.iter().enumerate() {
                let key = EventKey {
                    block_number: 10 + i as u64,
                    log_index: 0,
                };
                logs.push(encode_commitment_log(POOL, key, [i as u8; 32], commitment, i as u64, b""));
            }
            for (i, nullifier) in spent.iter().enumerate() {
                let key = EventKey {
                    block_number: 90,
                    log_index: i as u64,
                };
                logs.push(encode_nullifier_log(POOL, key, [0xf0 + i as u8; 32], nullifier));
            }
            let root = CommitmentTree::build(
                self.hasher.clone(),
                DEPTH,
                leaves.iter().enumerate().map(|(i, c)| LeafInput {
                    index: i as u64,
                    commitment: *c,
                }),
            )
            .unwrap()
            .root();

            let config = SyncConfig {
                depth: DEPTH,
                ..SyncConfig::new(POOL, 0)
            };
            Reconciler::new(
                config,
                self.hasher.clone(),
                Arc::new(MemoryLogSource::with_logs("mem", 100, logs)),
                Arc::new(MemoryRootSource::fixed(root)),
            )
            .unwrap()
            .sync(&CancelToken::new())
            .await
            .unwrap()
        }
    }

    #[tokio::test]
    async fn test_deposit_bundle() {
        let fx = Fixture::new();
        let snapshot = fx.snapshot(&[], &[]).await;
        let note = Note::new(&fx.hasher, 1_000, Fr::from(7u64), Fr::from(8u64)).unwrap();

        let input = ProofAssembler::new(&snapshot).deposit(&fx.store, note.clone()).unwrap();
        let json = input.to_json().unwrap();
        assert_eq!(json, serde_json::json!({"amount": "1000", "secret": "7", "nullifier": "8"}));
        assert_eq!(input.public.commitments, vec![note.commitment]);
        assert!(input.public.nullifiers.is_empty());
        assert_eq!(input.public.public_amount, 1_000);
    }

    #[tokio::test]
    async fn test_transfer_bundle() {
        let mut fx = Fixture::new();
        let a = fx.note(30, 1);
        let b = fx.note(20, 2);
        let snapshot = fx.snapshot(&[Fr::from(999u64), a.commitment, b.commitment], &[]).await;

        let (input, payment, change) = ProofAssembler::new(&snapshot)
            .transfer(&fx.store, 35, &mut OsRng)
            .unwrap();
        assert_eq!(payment.amount, 35);
        assert_eq!(change.amount, 15);

        let json = input.to_json().unwrap();
        assert_eq!(json["inputAmounts"], serde_json::json!(["30", "20"]));
        assert_eq!(json["outputAmounts"], serde_json::json!(["35", "15"]));
        assert_eq!(json["publicAmount"], "0");
        assert_eq!(json["root"], fr_to_decimal(&snapshot.root()).as_str());
        assert_eq!(json["pathElements"].as_array().unwrap().len(), 2);
        assert_eq!(json["pathElements"][0].as_array().unwrap().len(), DEPTH);
        // a sits at leaf 1, b at leaf 2
        assert_eq!(json["pathIndices"][0][0], "1");
        assert_eq!(json["pathIndices"][1][0], "0");
        assert_eq!(json["pathIndices"][1][1], "1");

        assert_eq!(input.public.nullifiers, vec![a.nullifier, b.nullifier]);
        assert_eq!(input.public.commitments, vec![payment.commitment, change.commitment]);
        assert_eq!(input.public.root, snapshot.root());
    }

    #[tokio::test]
    async fn test_transfer_needs_two_notes() {
        let mut fx = Fixture::new();
        let a = fx.note(1_000, 1);
        let snapshot = fx.snapshot(&[a.commitment], &[]).await;
        let err = ProofAssembler::new(&snapshot)
            .transfer(&fx.store, 5, &mut OsRng)
            .err()
            .unwrap();
        assert!(matches!(err, LedgerError::InsufficientNotes { required: 2, available: 1 }));
    }

    #[tokio::test]
    async fn test_conservation_and_shape() {
        let mut fx = Fixture::new();
        let a = fx.note(30, 1);
        let b = fx.note(20, 2);
        let snapshot = fx.snapshot(&[a.commitment, b.commitment], &[]).await;
        let assembler = ProofAssembler::new(&snapshot);
        let out = |amount| Note::new(&fx.hasher, amount, Fr::from(amount as u64 + 77), Fr::from(1u64)).unwrap();

        let request = SpendRequest {
            shape: CircuitShape::Transfer,
            inputs: vec![a.commitment, b.commitment],
            outputs: vec![out(40), out(11)],
            public_amount: 0,
        };
        assert!(matches!(
            assembler.assemble(&fx.store, &request),
            Err(LedgerError::ValueNotConserved { inputs: 50, outputs: 51 })
        ));

        let request = SpendRequest {
            shape: CircuitShape::Transfer,
            inputs: vec![a.commitment],
            outputs: vec![out(30), out(0)],
            public_amount: 0,
        };
        assert!(matches!(
            assembler.assemble(&fx.store, &request),
            Err(LedgerError::CircuitShapeMismatch(_))
        ));

        let request = SpendRequest {
            shape: CircuitShape::Transfer,
            inputs: vec![a.commitment, a.commitment],
            outputs: vec![out(30), out(30)],
            public_amount: 0,
        };
        assert!(matches!(
            assembler.assemble(&fx.store, &request),
            Err(LedgerError::CircuitShapeMismatch(_))
        ));
    }

    #[tokio::test]
    async fn test_input_checks() {
        let mut fx = Fixture::new();
        let in_tree = fx.note(10, 1);
        let revealed = fx.note(10, 2);
        let pending = fx.note(10, 3);
        let snapshot = fx
            .snapshot(&[in_tree.commitment, revealed.commitment], &[revealed.nullifier])
            .await;
        let assembler = ProofAssembler::new(&snapshot);
        let withdraw = |c: Fr| SpendRequest {
            shape: CircuitShape::Withdraw,
            inputs: vec![c],
            outputs: Vec::new(),
            public_amount: 10,
        };

        assert!(assembler.assemble(&fx.store, &withdraw(in_tree.commitment)).is_ok());
        assert!(matches!(
            assembler.assemble(&fx.store, &withdraw(revealed.commitment)),
            Err(LedgerError::NoteSpent(_))
        ));
        assert!(matches!(
            assembler.assemble(&fx.store, &withdraw(pending.commitment)),
            Err(LedgerError::NotFoundInTree(_))
        ));
        assert!(matches!(
            assembler.assemble(&fx.store, &withdraw(Fr::from(4242u64))),
            Err(LedgerError::UnknownNote(_))
        ));
    }

    #[tokio::test]
    async fn test_withdraw_whole_note() {
        let mut fx = Fixture::new();
        let small = fx.note(10, 1);
        let big = fx.note(25, 2);
        let snapshot = fx.snapshot(&[small.commitment, big.commitment], &[]).await;
        let assembler = ProofAssembler::new(&snapshot);

        let input = assembler.withdraw(&fx.store, 10).unwrap();
        assert_eq!(input.public.nullifiers, vec![small.nullifier]);
        let json = input.to_json().unwrap();
        assert_eq!(json["publicAmount"], "10");
        assert_eq!(json["outputAmounts"], serde_json::json!([]));

        // 35 spendable, but no single note of 11
        let err = assembler.withdraw(&fx.store, 11).unwrap_err();
        assert!(matches!(err, LedgerError::NoExactNote { amount: 11, balance: 35 }));
        assert!(err.is_user_correctable());
    }

    #[test]
    fn test_shape_parse() {
        assert_eq!("transfer".parse::<CircuitShape>().unwrap(), CircuitShape::Transfer);
        assert!("mint".parse::<CircuitShape>().is_err());
        assert_eq!(CircuitShape::Withdraw.inputs(), 1);
        assert_eq!(CircuitShape::Deposit.outputs(), 1);
    }
}
