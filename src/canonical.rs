//! Canonical, rotation-invariant `LoopId` computation.

use sha2::{Digest, Sha256};

use crate::types::{LoopId, Step};

/// SHA-256 over the lexicographically-smallest rotation of
/// `(walletId, sorted nftIds)` tuples, so the same logical loop hashes
/// identically regardless of which wallet's step a caller happened to
/// submit first.
pub fn loop_id(steps: &[Step]) -> LoopId {
    let rotations = all_rotations(steps);
    let canonical = rotations
        .into_iter()
        .map(|rotation| rotation_key(&rotation))
        .min()
        .unwrap_or_default();

    let mut hasher = Sha256::new();
    hasher.update(canonical.as_bytes());
    hex::encode(hasher.finalize())
}

fn all_rotations(steps: &[Step]) -> Vec<Vec<&Step>> {
    let n = steps.len();
    (0..n)
        .map(|offset| (0..n).map(|i| &steps[(i + offset) % n]).collect())
        .collect()
}

fn rotation_key(rotation: &[&Step]) -> String {
    rotation
        .iter()
        .map(|step| {
            let mut nfts: Vec<&str> = step.nfts.iter().map(|n| n.as_str()).collect();
            nfts.sort_unstable();
            format!("{}:{}", step.from, nfts.join(","))
        })
        .collect::<Vec<_>>()
        .join("|")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn step(from: &str, to: &str, nft: &str) -> Step {
        Step {
            from: from.to_string(),
            to: to.to_string(),
            nfts: vec![nft.to_string()],
        }
    }

    #[test]
    fn rotation_invariant() {
        let loop_a = vec![step("a", "b", "n1"), step("b", "c", "n2"), step("c", "a", "n3")];
        let loop_b = vec![step("b", "c", "n2"), step("c", "a", "n3"), step("a", "b", "n1")];
        assert_eq!(loop_id(&loop_a), loop_id(&loop_b));
    }

    #[test]
    fn different_loops_hash_differently() {
        let loop_a = vec![step("a", "b", "n1"), step("b", "a", "n2")];
        let loop_b = vec![step("a", "b", "n9"), step("b", "a", "n2")];
        assert_ne!(loop_id(&loop_a), loop_id(&loop_b));
    }
}
