//! commitment merkle tree
//!
//! fixed-depth binary tree over bn254, rebuilt from a verified event window
//! rather than mutated in place. only non-empty subtrees are materialized;
//! everything else reads as the precomputed zero hash for its level, so a
//! depth-20 tree with a handful of leaves costs O(n * depth) to build and
//! O(depth) per proof.

use std::collections::{btree_map::Entry, BTreeMap, HashMap};
use std::sync::Arc;

use tracing::debug;

use crate::field::{fr_to_hex, Fr};
use crate::hasher::{MerkleHasher, PoseidonHasher};
use crate::{LedgerError, Result};

/// deepest tree we agree to build (leaf indices stay within u64 arithmetic)
pub const MAX_DEPTH: usize = 32;

/// per-level hash of an empty subtree
#[derive(Debug, Clone)]
pub struct ZeroHashes {
    levels: Vec<Fr>,
}

impl ZeroHashes {
    /// zero_0 = 0, zero_{k+1} = H(zero_k, zero_k)
    pub fn compute<H: MerkleHasher + ?Sized>(hasher: &H, depth: usize) -> Result<Self> {
        let mut levels = Vec::with_capacity(depth + 1);
        let mut current = Fr::from(0u64);
        levels.push(current);
        for _ in 0..depth {
            current = hasher.hash_pair(&current, &current)?;
            levels.push(current);
        }
        Ok(Self { levels })
    }

    pub fn at(&self, level: usize) -> Fr {
        self.levels[level]
    }

    /// root of a completely empty tree
    pub fn root(&self) -> Fr {
        self.levels[self.levels.len() - 1]
    }

    pub fn depth(&self) -> usize {
        self.levels.len() - 1
    }
}

/// one leaf of tree input: a commitment and its append index
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LeafInput {
    pub index: u64,
    pub commitment: Fr,
}

/// merkle inclusion proof, ordered leaf to root
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MerkleProof {
    pub leaf_index: u64,
    /// sibling at each level
    pub path_elements: Vec<Fr>,
    /// 0 = current node is the left child, 1 = right child
    pub path_indices: Vec<u8>,
    /// root the path was taken against
    pub root: Fr,
}

impl MerkleProof {
    /// fold a leaf up the path
    pub fn compute_root<H: MerkleHasher + ?Sized>(&self, hasher: &H, leaf: &Fr) -> Result<Fr> {
        if self.path_elements.len() != self.path_indices.len() {
            return Err(LedgerError::Hash(format!(
                "path has {} elements but {} direction bits",
                self.path_elements.len(),
                self.path_indices.len()
            )));
        }

        let mut current = *leaf;
        for (sibling, bit) in self.path_elements.iter().zip(&self.path_indices) {
            current = match bit {
                0 => hasher.hash_pair(&current, sibling)?,
                1 => hasher.hash_pair(sibling, &current)?,
                other => {
                    return Err(LedgerError::Hash(format!("direction bit {} is not 0 or 1", other)))
                }
            };
        }
        Ok(current)
    }

    /// does `leaf` hash up to `root` along this path
    pub fn verify<H: MerkleHasher + ?Sized>(&self, hasher: &H, leaf: &Fr, root: &Fr) -> Result<bool> {
        Ok(self.compute_root(hasher, leaf)? == *root)
    }
}

/// immutable commitment tree built from a full leaf set
pub struct CommitmentTree<H: MerkleHasher = PoseidonHasher> {
    hasher: Arc<H>,
    depth: usize,
    zeros: ZeroHashes,
    /// nodes[0] are leaves, nodes[depth] holds the root when non-empty
    nodes: Vec<BTreeMap<u64, Fr>>,
    positions: HashMap<Fr, u64>,
}

impl<H: MerkleHasher> CommitmentTree<H> {
    /// tree with no leaves
    pub fn empty(hasher: Arc<H>, depth: usize) -> Result<Self> {
        Self::build(hasher, depth, std::iter::empty())
    }

    /// sort leaves by index, reject overflow and conflicting duplicates, then
    /// hash every populated subtree bottom-up. missing indices read as zero.
    pub fn build<I>(hasher: Arc<H>, depth: usize, leaves: I) -> Result<Self>
    where
        I: IntoIterator<Item = LeafInput>,
    {
        if depth == 0 || depth > MAX_DEPTH {
            return Err(LedgerError::InvalidDepth(depth));
        }
        let capacity = 1u64 << depth;
        let zeros = ZeroHashes::compute(hasher.as_ref(), depth)?;

        let mut sorted: Vec<LeafInput> = leaves.into_iter().collect();
        sorted.sort_by_key(|leaf| leaf.index);

        let mut level0 = BTreeMap::new();
        for leaf in sorted {
            if leaf.index >= capacity {
                return Err(LedgerError::CapacityExceeded {
                    index: leaf.index,
                    capacity,
                });
            }
            match level0.entry(leaf.index) {
                Entry::Vacant(slot) => {
                    slot.insert(leaf.commitment);
                }
                Entry::Occupied(existing) => {
                    if *existing.get() != leaf.commitment {
                        return Err(LedgerError::ConflictingLeaf { index: leaf.index });
                    }
                }
            }
        }

        let mut positions = HashMap::with_capacity(level0.len());
        for (&index, commitment) in &level0 {
            // first occurrence wins; a repeated commitment keeps its earliest slot
            positions.entry(*commitment).or_insert(index);
        }

        let mut nodes = Vec::with_capacity(depth + 1);
        nodes.push(level0);
        for level in 0..depth {
            let below = &nodes[level];
            let zero = zeros.at(level);
            let mut above = BTreeMap::new();
            for &index in below.keys() {
                let parent = index >> 1;
                if above.contains_key(&parent) {
                    continue;
                }
                let left = below.get(&(parent << 1)).unwrap_or(&zero);
                let right = below.get(&((parent << 1) | 1)).unwrap_or(&zero);
                above.insert(parent, hasher.hash_pair(left, right)?);
            }
            nodes.push(above);
        }

        let tree = Self {
            hasher,
            depth,
            zeros,
            nodes,
            positions,
        };
        debug!(
            "built commitment tree: depth {}, {} leaves, root {}",
            depth,
            tree.len(),
            fr_to_hex(&tree.root())
        );
        Ok(tree)
    }

    pub fn depth(&self) -> usize {
        self.depth
    }

    /// number of addressable leaf slots (2^depth)
    pub fn capacity(&self) -> u64 {
        1u64 << self.depth
    }

    /// number of populated leaves
    pub fn len(&self) -> usize {
        self.nodes[0].len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes[0].is_empty()
    }

    /// one past the highest populated index
    pub fn next_index(&self) -> u64 {
        self.nodes[0].keys().next_back().map(|i| i + 1).unwrap_or(0)
    }

    pub fn zeros(&self) -> &ZeroHashes {
        &self.zeros
    }

    pub fn hasher(&self) -> &H {
        self.hasher.as_ref()
    }

    pub fn root(&self) -> Fr {
        if self.is_empty() {
            return self.zeros.root();
        }
        self.node(self.depth, 0)
    }

    /// stored leaf, or the level-0 zero for an unfilled slot
    pub fn leaf(&self, index: u64) -> Result<Fr> {
        self.check_index(index)?;
        Ok(self.node(0, index))
    }

    /// leaf index holding `commitment`
    pub fn position_of(&self, commitment: &Fr) -> Option<u64> {
        self.positions.get(commitment).copied()
    }

    /// (index, commitment) pairs in index order
    pub fn leaves(&self) -> impl Iterator<Item = LeafInput> + '_ {
        self.nodes[0].iter().map(|(&index, &commitment)| LeafInput { index, commitment })
    }

    /// sibling path from `index` up to the root
    pub fn proof(&self, index: u64) -> Result<MerkleProof> {
        self.check_index(index)?;

        let mut path_elements = Vec::with_capacity(self.depth);
        let mut path_indices = Vec::with_capacity(self.depth);
        let mut current = index;
        for level in 0..self.depth {
            path_elements.push(self.node(level, current ^ 1));
            path_indices.push((current & 1) as u8);
            current >>= 1;
        }

        Ok(MerkleProof {
            leaf_index: index,
            path_elements,
            path_indices,
            root: self.root(),
        })
    }

    fn node(&self, level: usize, index: u64) -> Fr {
        self.nodes[level]
            .get(&index)
            .copied()
            .unwrap_or_else(|| self.zeros.at(level))
    }

    fn check_index(&self, index: u64) -> Result<()> {
        if index >= self.capacity() {
            return Err(LedgerError::CapacityExceeded {
                index,
                capacity: self.capacity(),
            });
        }
        Ok(())
    }
}

impl CommitmentTree<PoseidonHasher> {
    /// poseidon tree from `{commitment, index}` pairs
    pub fn build_from_events<I>(depth: usize, leaves: I) -> Result<Self>
    where
        I: IntoIterator<Item = LeafInput>,
    {
        Self::build(Arc::new(PoseidonHasher::new()?), depth, leaves)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn hasher() -> Arc<PoseidonHasher> {
        Arc::new(PoseidonHasher::new().unwrap())
    }

    fn leaf(index: u64, value: u64) -> LeafInput {
        LeafInput {
            index,
            commitment: Fr::from(value),
        }
    }

    #[test]
    fn test_empty_root_is_zero_root() {
        let h = hasher();
        let tree = CommitmentTree::empty(h.clone(), 20).unwrap();
        assert!(tree.is_empty());
        assert_eq!(tree.next_index(), 0);

        let mut expected = Fr::from(0u64);
        for _ in 0..20 {
            expected = h.hash_pair(&expected, &expected).unwrap();
        }
        assert_eq!(tree.root(), expected);
        assert_eq!(tree.root(), tree.zeros().root());
    }

    #[test]
    fn test_gap_reads_as_zero() {
        let h = hasher();
        let tree = CommitmentTree::build(h.clone(), 2, vec![leaf(0, 11), leaf(1, 22), leaf(3, 44)]).unwrap();

        let zero = Fr::from(0u64);
        assert_eq!(tree.leaf(2).unwrap(), zero);
        assert_eq!(tree.next_index(), 4);
        assert_eq!(tree.len(), 3);

        let left = h.hash_pair(&Fr::from(11u64), &Fr::from(22u64)).unwrap();
        let right = h.hash_pair(&zero, &Fr::from(44u64)).unwrap();
        let root = h.hash_pair(&left, &right).unwrap();
        assert_eq!(tree.root(), root);
    }

    #[test]
    fn test_single_leaf_root() {
        let h = hasher();
        let tree = CommitmentTree::build(h.clone(), 3, vec![leaf(0, 5)]).unwrap();
        let zeros = ZeroHashes::compute(h.as_ref(), 3).unwrap();

        let mut expected = Fr::from(5u64);
        for level in 0..3 {
            expected = h.hash_pair(&expected, &zeros.at(level)).unwrap();
        }
        assert_eq!(tree.root(), expected);
    }

    #[test]
    fn test_capacity_exceeded() {
        let h = hasher();
        let err = CommitmentTree::build(h.clone(), 2, vec![leaf(4, 1)]).err().unwrap();
        assert!(matches!(err, LedgerError::CapacityExceeded { index: 4, capacity: 4 }));

        let tree = CommitmentTree::build(h, 2, vec![leaf(3, 1)]).unwrap();
        assert!(matches!(tree.proof(4), Err(LedgerError::CapacityExceeded { .. })));
        assert!(matches!(tree.leaf(9), Err(LedgerError::CapacityExceeded { .. })));
    }

    #[test]
    fn test_conflicting_and_idempotent_leaves() {
        let h = hasher();
        let err = CommitmentTree::build(h.clone(), 4, vec![leaf(1, 7), leaf(1, 8)]).err().unwrap();
        assert!(matches!(err, LedgerError::ConflictingLeaf { index: 1 }));

        let dup = CommitmentTree::build(h.clone(), 4, vec![leaf(1, 7), leaf(1, 7)]).unwrap();
        let single = CommitmentTree::build(h, 4, vec![leaf(1, 7)]).unwrap();
        assert_eq!(dup.root(), single.root());
        assert_eq!(dup.len(), 1);
    }

    #[test]
    fn test_invalid_depth() {
        assert!(matches!(
            CommitmentTree::empty(hasher(), 0),
            Err(LedgerError::InvalidDepth(0))
        ));
        assert!(matches!(
            CommitmentTree::empty(hasher(), 33),
            Err(LedgerError::InvalidDepth(33))
        ));
    }

    #[test]
    fn test_proof_tamper_detection() {
        let h = hasher();
        let tree = CommitmentTree::build(h.clone(), 4, (0..6).map(|i| leaf(i, 100 + i))).unwrap();
        let root = tree.root();
        let proof = tree.proof(5).unwrap();
        assert_eq!(proof.path_indices, vec![1, 0, 1, 0]);
        assert!(proof.verify(h.as_ref(), &Fr::from(105u64), &root).unwrap());
        assert!(!proof.verify(h.as_ref(), &Fr::from(104u64), &root).unwrap());

        for level in 0..4 {
            let mut bad = proof.clone();
            bad.path_elements[level] += Fr::from(1u64);
            assert!(!bad.verify(h.as_ref(), &Fr::from(105u64), &root).unwrap());

            let mut flipped = proof.clone();
            flipped.path_indices[level] ^= 1;
            assert!(!flipped.verify(h.as_ref(), &Fr::from(105u64), &root).unwrap());
        }

        let mut broken = proof.clone();
        broken.path_indices[0] = 2;
        assert!(broken.verify(h.as_ref(), &Fr::from(105u64), &root).is_err());
    }

    #[test]
    fn test_position_lookup() {
        let tree = CommitmentTree::build(hasher(), 4, vec![leaf(3, 9), leaf(0, 1)]).unwrap();
        assert_eq!(tree.position_of(&Fr::from(9u64)), Some(3));
        assert_eq!(tree.position_of(&Fr::from(1u64)), Some(0));
        assert_eq!(tree.position_of(&Fr::from(2u64)), None);
        let indices: Vec<u64> = tree.leaves().map(|l| l.index).collect();
        assert_eq!(indices, vec![0, 3]);
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(16))]

        #[test]
        fn prop_root_independent_of_order(
            entries in proptest::collection::btree_map(0u64..32, 1u64..u64::MAX, 0..12),
            rotate in any::<usize>(),
        ) {
            let h = hasher();
            let sorted: Vec<LeafInput> = entries.iter().map(|(&i, &v)| leaf(i, v)).collect();
            let mut shuffled = sorted.clone();
            shuffled.reverse();
            if !shuffled.is_empty() {
                let k = rotate % shuffled.len();
                shuffled.rotate_left(k);
            }

            let a = CommitmentTree::build(h.clone(), 5, sorted.clone()).unwrap();
            let b = CommitmentTree::build(h.clone(), 5, shuffled).unwrap();
            let c = CommitmentTree::build(h, 5, sorted).unwrap();
            prop_assert_eq!(a.root(), b.root());
            prop_assert_eq!(a.root(), c.root());
        }

        #[test]
        fn prop_every_proof_reproduces_root(
            entries in proptest::collection::btree_map(0u64..16, 1u64..u64::MAX, 1..10),
            probe in 0u64..16,
        ) {
            let h = hasher();
            let tree = CommitmentTree::build(h.clone(), 4, entries.iter().map(|(&i, &v)| leaf(i, v))).unwrap();
            let root = tree.root();
            for (&index, &value) in &entries {
                let proof = tree.proof(index).unwrap();
                prop_assert_eq!(proof.root, root);
                prop_assert!(proof.verify(h.as_ref(), &Fr::from(value), &root).unwrap());
            }
            // unfilled slots prove the zero leaf
            let proof = tree.proof(probe).unwrap();
            prop_assert!(proof.verify(h.as_ref(), &tree.leaf(probe).unwrap(), &root).unwrap());
        }
    }
}
