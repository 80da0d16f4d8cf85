use super::{
    branch_opt_util,
    error::PackingError,
    params::{HASHED_KEY_BYTE_LEN, SEED_BYTE_LEN},
};
use std::collections::HashMap;
use turboshake::TurboShake128;

pub const MAX_ARITY: usize = 4;

/// Parameters of a constructed Binary Fuse Filter. Everything a decoder needs, besides the fingerprints.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BinaryFuseFilter {
    pub seed: [u8; SEED_BYTE_LEN],
    pub arity: u32,
    pub segment_length: u32,
    pub segment_count_length: u32,
    pub num_fingerprints: usize,
}

/// Output of a successful filter construction: filter parameters, peeling order of key hashes (`reverse_order`),
/// position of the free cell of each peeled key (`reverse_h`) and key hash to key index mapping.
pub type PeeledFilter = (BinaryFuseFilter, Vec<u64>, Vec<u8>, HashMap<u64, usize>);

impl BinaryFuseFilter {
    /// Constructs a 3-wise or 4-wise XOR Binary Fuse Filter over given keys, by finding a seed under which the
    /// key-to-cell hypergraph can be fully peeled.
    ///
    /// Seed of attempt `i` is derived from `base_seed` and `i`, so construction is deterministic.
    ///
    /// # Arguments
    ///
    /// * `keys` - Distinct keys to be encoded.
    /// * `arity` - Number of cells each key touches, either 3 or 4.
    /// * `base_seed` - Seed from which per-attempt filter seeds are derived.
    /// * `max_attempt_count` - The maximum number of seeds to try.
    ///
    /// # Returns
    ///
    /// * `Result<PeeledFilter, PackingError>` - Filter parameters and peeling order.
    ///   Returns an error if keys are empty, arity is unsupported or no seed admits a full peeling.
    pub fn construct(keys: &[u64], arity: u32, base_seed: &[u8; SEED_BYTE_LEN], max_attempt_count: usize) -> Result<PeeledFilter, PackingError> {
        if branch_opt_util::unlikely(!(arity == 3 || arity == 4)) {
            return Err(PackingError::UnsupportedOkvsArity(arity));
        }

        let num_keys = keys.len();
        if branch_opt_util::unlikely(num_keys == 0) {
            return Err(PackingError::EmptyKeyValueSet);
        }

        let (segment_length, segment_count, num_fingerprints) = filter_dimensions(arity, num_keys as u32);
        let segment_count_length = segment_count * segment_length;
        let arity_as_usize = arity as usize;

        let mut alone = vec![0u32; num_fingerprints];
        let mut t2count = vec![0u8; num_fingerprints];
        let mut t2hash = vec![0u64; num_fingerprints];
        let mut reverse_h = vec![0u8; num_keys];
        let mut reverse_order = vec![0u64; num_keys + 1];
        reverse_order[num_keys] = 1;

        let mut hash_to_index = HashMap::with_capacity(num_keys);

        let block_bits = {
            let mut block_bits = 1;
            while (1 << block_bits) < segment_count {
                block_bits += 1;
            }
            block_bits
        };
        let block_bits_mask = (1u64 << block_bits) - 1;

        let start_pos_len: usize = 1 << block_bits;
        let mut start_pos = vec![0usize; start_pos_len];

        let hashed_keys = keys.iter().map(|&key| hash_of_key(key)).collect::<Vec<[u64; 4]>>();

        for attempt in 0..max_attempt_count {
            let seed = derive_attempt_seed(base_seed, attempt);

            for (i, pos) in start_pos.iter_mut().enumerate() {
                *pos = (((i as u64) * (num_keys as u64)) >> block_bits) as usize;
            }

            // Zero marks an empty bucket position, so a zero hash or two keys sharing a hash need a fresh seed.
            let mut has_hash_collision = false;
            for (key_idx, hashed_key) in hashed_keys.iter().enumerate() {
                let hash = mix256(hashed_key, &seed);
                if branch_opt_util::unlikely(hash == 0 || hash_to_index.insert(hash, key_idx).is_some()) {
                    has_hash_collision = true;
                    break;
                }

                let mut segment_index = hash >> (64 - block_bits);
                while reverse_order[start_pos[segment_index as usize]] != 0 {
                    segment_index += 1;
                    segment_index &= block_bits_mask;
                }

                reverse_order[start_pos[segment_index as usize]] = hash;
                start_pos[segment_index as usize] += 1;
            }

            if branch_opt_util::unlikely(has_hash_collision) {
                reverse_order[..num_keys].fill(0);
                hash_to_index.clear();

                continue;
            }

            let mut count_mask = 0u8;
            for &hash in reverse_order.iter().take(num_keys) {
                let positions = hash_positions(hash, arity, segment_length, segment_count_length);

                for (idx, &pos) in positions[..arity_as_usize].iter().enumerate() {
                    t2count[pos] = t2count[pos].wrapping_add(4);
                    t2count[pos] ^= idx as u8;
                    t2hash[pos] ^= hash;

                    count_mask |= t2count[pos];
                }
            }

            // Some cell is shared by 32 or more keys, its counter is about to overflow.
            if branch_opt_util::unlikely(count_mask >= 0x80) {
                reverse_order[..num_keys].fill(0);
                t2count.fill(0);
                t2hash.fill(0);
                hash_to_index.clear();

                continue;
            }

            let mut qsize = 0;
            for i in 0..num_fingerprints {
                alone[qsize] = i as u32;
                if (t2count[i] >> 2) == 1 {
                    qsize += 1;
                }
            }

            let mut stack_size = 0;
            while qsize > 0 {
                qsize -= 1;

                let index = alone[qsize] as usize;
                if (t2count[index] >> 2) == 1 {
                    let hash = t2hash[index];
                    let found = t2count[index] & 3;

                    reverse_h[stack_size] = found;
                    reverse_order[stack_size] = hash;
                    stack_size += 1;

                    let positions = hash_positions(hash, arity, segment_length, segment_count_length);

                    for (idx, &other_index) in positions[..arity_as_usize].iter().enumerate() {
                        if idx == found as usize {
                            continue;
                        }

                        alone[qsize] = other_index as u32;
                        if (t2count[other_index] >> 2) == 2 {
                            qsize += 1;
                        }

                        t2count[other_index] -= 4;
                        t2count[other_index] ^= idx as u8;
                        t2hash[other_index] ^= hash;
                    }
                }
            }

            if stack_size == num_keys {
                return Ok((
                    BinaryFuseFilter {
                        seed,
                        arity,
                        segment_length,
                        segment_count_length,
                        num_fingerprints,
                    },
                    reverse_order,
                    reverse_h,
                    hash_to_index,
                ));
            }

            reverse_order[..num_keys].fill(0);
            t2count.fill(0);
            t2hash.fill(0);
            hash_to_index.clear();
        }

        branch_opt_util::cold();
        Err(PackingError::EncodingFailed {
            arity,
            attempts: max_attempt_count,
        })
    }

    /// Checks that parameters describe a filter whose cell indices all fall within `num_fingerprints`.
    pub fn is_well_formed(&self) -> bool {
        (self.arity == 3 || self.arity == 4)
            && self.segment_length.is_power_of_two()
            && self.segment_count_length > 0
            && self.segment_count_length % self.segment_length == 0
            && self.num_fingerprints as u64 == self.segment_count_length as u64 + (self.arity as u64 - 1) * self.segment_length as u64
    }

    /// Hashes a key under this filter's seed.
    #[inline]
    pub fn hash(&self, key: u64) -> u64 {
        mix256(&hash_of_key(key), &self.seed)
    }

    /// Cells a key hash touches. Only the first `arity` entries are meaningful.
    #[inline]
    pub fn positions(&self, hash: u64) -> [usize; MAX_ARITY] {
        hash_positions(hash, self.arity, self.segment_length, self.segment_count_length)
    }
}

/// Computes `(segment_length, segment_count, num_fingerprints)` for a filter holding `size` keys.
pub fn filter_dimensions(arity: u32, size: u32) -> (u32, u32, usize) {
    let segment_length = segment_length(arity, size).min(1u32 << 18);

    let size_factor = size_factor(arity, size);
    let capacity = if size > 1 { ((size as f64) * size_factor).round() as u32 } else { 0 };

    let init_segment_count = capacity.div_ceil(segment_length);
    let array_len = init_segment_count * segment_length;

    let segment_count: u32 = {
        let proposed = array_len.div_ceil(segment_length);
        if proposed < arity { 1 } else { proposed - (arity - 1) }
    };
    let array_len: u32 = (segment_count + arity - 1) * segment_length;

    (segment_length, segment_count, array_len as usize)
}

#[inline]
pub fn segment_length(arity: u32, size: u32) -> u32 {
    if size == 0 {
        return 4;
    }

    match arity {
        3 => 1u32 << ((size as f64).ln() / 3.33_f64.ln() + 2.25).floor() as usize,
        4 => 1u32 << ((size as f64).ln() / 2.91_f64.ln() - 0.5).floor() as usize,
        _ => 65536,
    }
}

#[inline]
pub fn size_factor(arity: u32, size: u32) -> f64 {
    match arity {
        3 => 1.125_f64.max(0.875 + 0.25 * 1e6_f64.ln() / (size as f64).ln()),
        4 => 1.075_f64.max(0.77 + 0.305 * 6e5_f64.ln() / (size as f64).ln()),
        _ => 2.0,
    }
}

/// Computes a 64-bit MurmurHash3-like hash from a 64-bit input.
/// See https://github.com/aappleby/smhasher/blob/0ff96f7835817a27d0487325b6c16033e2992eb5/src/MurmurHash3.cpp#L81-L90.
#[inline(always)]
pub const fn murmur64(mut h: u64) -> u64 {
    h ^= h >> 33;
    h = h.wrapping_mul(0xff51_afd7_ed55_8ccd);
    h ^= h >> 33;
    h = h.wrapping_mul(0xc4ce_b9fe_1a85_ec53);
    h ^= h >> 33;
    h
}

#[inline(always)]
pub const fn mix(key: u64, seed: u64) -> u64 {
    murmur64(key.wrapping_add(seed))
}

/// 256 -bit TurboSHAKE128 digest of a key, as four little-endian words.
#[inline]
pub fn hash_of_key(key: u64) -> [u64; 4] {
    let mut hasher = TurboShake128::default();
    hasher.absorb(&key.to_le_bytes());
    hasher.finalize::<{ TurboShake128::DEFAULT_DOMAIN_SEPARATOR }>();

    let mut digest = [0u8; HASHED_KEY_BYTE_LEN];
    hasher.squeeze(&mut digest);

    let mut words = [0u64; 4];
    for (word, chunk) in words.iter_mut().zip(digest.chunks_exact(8)) {
        let mut word_bytes = [0u8; 8];
        word_bytes.copy_from_slice(chunk);
        *word = u64::from_le_bytes(word_bytes);
    }

    words
}

#[inline]
pub fn mix256(key: &[u64; 4], seed: &[u8; SEED_BYTE_LEN]) -> u64 {
    let mut seed_words = [0u64; 4];
    for (word, chunk) in seed_words.iter_mut().zip(seed.chunks_exact(8)) {
        let mut word_bytes = [0u8; 8];
        word_bytes.copy_from_slice(chunk);
        *word = u64::from_le_bytes(word_bytes);
    }

    key.iter()
        .map(|&k| seed_words.iter().fold(0u64, |acc, &seed_word| murmur64(acc.wrapping_add(mix(k, seed_word)))))
        .fold(0, |acc, r| acc.wrapping_add(r))
}

/// Seed of the `attempt` -th construction attempt, TurboSHAKE128(`base_seed || attempt`).
pub fn derive_attempt_seed(base_seed: &[u8; SEED_BYTE_LEN], attempt: usize) -> [u8; SEED_BYTE_LEN] {
    let mut hasher = TurboShake128::default();
    hasher.absorb(base_seed);
    hasher.absorb(&(attempt as u64).to_le_bytes());
    hasher.finalize::<{ TurboShake128::DEFAULT_DOMAIN_SEPARATOR }>();

    let mut seed = [0u8; SEED_BYTE_LEN];
    hasher.squeeze(&mut seed);

    seed
}

/// Pseudorandom 128 -bit mask, XOR-ed into every stored value, so that decoding at a key which was never encoded
/// yields a pseudorandom looking word.
#[inline(always)]
pub const fn value_mask(hash: u64) -> u128 {
    (mix(hash, 0) as u128) | ((mix(hash, 1) as u128) << 64)
}

#[inline]
pub const fn hash_batch(hash: u64, segment_length: u32, segment_count_length: u32) -> (u32, u32, u32) {
    let segment_length_mask = segment_length - 1;
    let hi = ((hash as u128 * segment_count_length as u128) >> 64) as u64;

    let h0 = hi as u32;
    let mut h1 = h0 + segment_length;
    let mut h2 = h1 + segment_length;

    h1 ^= ((hash >> 18) as u32) & segment_length_mask;
    h2 ^= (hash as u32) & segment_length_mask;

    (h0, h1, h2)
}

#[inline]
pub const fn get_hash_from_hash(hash: u64, index: usize, segment_length: u32, segment_count_length: u32) -> u32 {
    let mut h = ((hash as u128 * segment_count_length as u128) >> 64) as u64;
    h += (index * segment_length as usize) as u64;

    if index > 0 {
        let segment_length_mask = (segment_length - 1) as u64;
        h ^= (hash >> ((index - 1) * 16)) & segment_length_mask;
    }

    h as u32
}

#[inline]
pub fn hash_positions(hash: u64, arity: u32, segment_length: u32, segment_count_length: u32) -> [usize; MAX_ARITY] {
    let mut positions = [0usize; MAX_ARITY];

    if arity == 3 {
        let (h0, h1, h2) = hash_batch(hash, segment_length, segment_count_length);
        positions[0] = h0 as usize;
        positions[1] = h1 as usize;
        positions[2] = h2 as usize;
    } else {
        for (index, position) in positions.iter_mut().enumerate() {
            *position = get_hash_from_hash(hash, index, segment_length, segment_count_length) as usize;
        }
    }

    positions
}
