//! 64-bit SimHash fingerprints and Hamming distance.
//!
//! Similar texts produce fingerprints that differ in few bits, so near-duplicate
//! detection is a popcount away. This is a locality-sensitive hash, not a
//! cryptographic one: collisions between similar inputs are the point.

/// Identifier stored in `schema_meta` for fingerprints produced by this module.
pub const FINGERPRINT_SCHEME: &str = "simhash64-fnv1a-v1";

const FNV_OFFSET_BASIS: u64 = 14_695_981_039_346_656_037;
const FNV_PRIME: u64 = 1_099_511_628_211;

/// FNV-1a over the raw bytes of a token.
pub fn hash_token(token: &str) -> u64 {
    token.bytes().fold(FNV_OFFSET_BASIS, |hash, byte| {
        (hash ^ u64::from(byte)).wrapping_mul(FNV_PRIME)
    })
}

/// SimHash of `content`.
///
/// Tokens are whitespace-delimited (space, tab, LF, CR) with no case folding.
/// Leading and trailing ASCII punctuation is trimmed from each token before
/// hashing, so `management.` and `management` weigh the same; a token made
/// only of punctuation is hashed unchanged. Text without tokens fingerprints
/// to 0.
pub fn fingerprint(content: &str) -> u64 {
    let mut weights = [0i32; 64];

    for token in content
        .split([' ', '\t', '\n', '\r'])
        .filter(|t| !t.is_empty())
    {
        let h = hash_token(normalize_token(token));
        for (bit, weight) in weights.iter_mut().enumerate() {
            if h & (1u64 << bit) != 0 {
                *weight += 1;
            } else {
                *weight -= 1;
            }
        }
    }

    weights
        .iter()
        .enumerate()
        .filter(|(_, w)| **w > 0)
        .fold(0u64, |acc, (bit, _)| acc | (1u64 << bit))
}

/// Hamming distance between two fingerprints, in `[0, 64]`.
pub fn distance(a: u64, b: u64) -> u32 {
    (a ^ b).count_ones()
}

fn normalize_token(token: &str) -> &str {
    let trimmed = token.trim_matches(|c: char| c.is_ascii_punctuation());
    if trimmed.is_empty() {
        token
    } else {
        trimmed
    }
}
