use crate::{
    packing_internals::{
        binary_fuse_filter::{self, BinaryFuseFilter},
        branch_opt_util,
        error::PackingError,
        params::{OkvsParams, SEED_BYTE_LEN},
        tag_codec::TaggedValue,
    },
    table::CuckooTable,
};
use rayon::prelude::*;

/// Oblivious key-value store primitive: encodes key-value pairs such that decoding at any encoded key returns its value,
/// while decoding at any other key returns a pseudorandom looking value.
pub trait Okvs {
    /// Solves for an encoding which decodes each `keys[i]` to `values[i]`. Keys must be distinct.
    fn solve(&self, keys: &[u64], values: &[u128]) -> Result<OkvsEncoding, PackingError>;

    /// Evaluates the encoding at each of the given keys.
    fn decode(&self, keys: &[u64], encoding: &OkvsEncoding) -> Result<Vec<u128>, PackingError>;
}

/// Compact encoding of a key-value set, as produced by [`BinaryFuseOkvs`]. This is what gets sent to the peer.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct OkvsEncoding {
    filter: BinaryFuseFilter,
    fingerprints: Vec<u128>,
}

impl OkvsEncoding {
    const SEED_OFFSET: usize = 0;
    const ARITY_OFFSET: usize = Self::SEED_OFFSET + SEED_BYTE_LEN;
    const SEGMENT_LENGTH_OFFSET: usize = Self::ARITY_OFFSET + std::mem::size_of::<u32>();
    const SEGMENT_COUNT_LENGTH_OFFSET: usize = Self::SEGMENT_LENGTH_OFFSET + std::mem::size_of::<u32>();
    const NUM_FINGERPRINTS_OFFSET: usize = Self::SEGMENT_COUNT_LENGTH_OFFSET + std::mem::size_of::<u32>();
    const FINGERPRINTS_OFFSET: usize = Self::NUM_FINGERPRINTS_OFFSET + std::mem::size_of::<u64>();
    const FINGERPRINT_BYTE_LEN: usize = std::mem::size_of::<u128>();

    pub fn filter(&self) -> &BinaryFuseFilter {
        &self.filter
    }

    pub fn fingerprints(&self) -> &[u128] {
        &self.fingerprints
    }

    /// Number of 128 -bit cells in the encoding, always at least the number of encoded keys.
    pub fn len(&self) -> usize {
        self.fingerprints.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fingerprints.is_empty()
    }

    #[cfg(test)]
    pub(crate) fn fingerprints_mut(&mut self) -> &mut [u128] {
        &mut self.fingerprints
    }

    /// Serializes the encoding as little-endian filter parameters, followed by all fingerprints.
    pub fn to_bytes(&self) -> Vec<u8> {
        let total_byte_len = Self::FINGERPRINTS_OFFSET + self.fingerprints.len() * Self::FINGERPRINT_BYTE_LEN;
        let mut bytes = Vec::with_capacity(total_byte_len);

        bytes.extend_from_slice(&self.filter.seed);
        bytes.extend_from_slice(&self.filter.arity.to_le_bytes());
        bytes.extend_from_slice(&self.filter.segment_length.to_le_bytes());
        bytes.extend_from_slice(&self.filter.segment_count_length.to_le_bytes());
        bytes.extend_from_slice(&(self.filter.num_fingerprints as u64).to_le_bytes());
        self.fingerprints.iter().for_each(|fingerprint| bytes.extend_from_slice(&fingerprint.to_le_bytes()));

        bytes
    }

    /// Deserializes an encoding produced by [`OkvsEncoding::to_bytes`], rejecting any byte string whose filter
    /// parameters would make decoding read out of bounds.
    pub fn from_bytes(bytes: &[u8]) -> Result<OkvsEncoding, PackingError> {
        if branch_opt_util::unlikely(bytes.len() < Self::FINGERPRINTS_OFFSET) {
            return Err(PackingError::FailedToDeserializeEncoding);
        }

        let mut seed = [0u8; SEED_BYTE_LEN];
        seed.copy_from_slice(&bytes[Self::SEED_OFFSET..Self::ARITY_OFFSET]);

        let arity = u32::from_le_bytes(read_array(&bytes[Self::ARITY_OFFSET..Self::SEGMENT_LENGTH_OFFSET]));
        let segment_length = u32::from_le_bytes(read_array(&bytes[Self::SEGMENT_LENGTH_OFFSET..Self::SEGMENT_COUNT_LENGTH_OFFSET]));
        let segment_count_length = u32::from_le_bytes(read_array(&bytes[Self::SEGMENT_COUNT_LENGTH_OFFSET..Self::NUM_FINGERPRINTS_OFFSET]));
        let num_fingerprints = u64::from_le_bytes(read_array(&bytes[Self::NUM_FINGERPRINTS_OFFSET..Self::FINGERPRINTS_OFFSET]));

        let filter = BinaryFuseFilter {
            seed,
            arity,
            segment_length,
            segment_count_length,
            num_fingerprints: usize::try_from(num_fingerprints).map_err(|_| PackingError::FailedToDeserializeEncoding)?,
        };

        let fingerprint_bytes = &bytes[Self::FINGERPRINTS_OFFSET..];
        let is_consistent = filter.is_well_formed() && fingerprint_bytes.len() == filter.num_fingerprints * Self::FINGERPRINT_BYTE_LEN;

        if branch_opt_util::unlikely(!is_consistent) {
            return Err(PackingError::FailedToDeserializeEncoding);
        }

        let fingerprints = fingerprint_bytes
            .chunks_exact(Self::FINGERPRINT_BYTE_LEN)
            .map(|chunk| u128::from_le_bytes(read_array(chunk)))
            .collect::<Vec<u128>>();

        Ok(OkvsEncoding { filter, fingerprints })
    }

    #[inline]
    fn decode_one(&self, key: u64) -> u128 {
        let hash = self.filter.hash(key);
        let positions = self.filter.positions(hash);

        positions[..self.filter.arity as usize]
            .iter()
            .fold(binary_fuse_filter::value_mask(hash), |acc, &pos| acc ^ self.fingerprints[pos])
    }
}

#[inline(always)]
fn read_array<const N: usize>(bytes: &[u8]) -> [u8; N] {
    let mut array = [0u8; N];
    array.copy_from_slice(&bytes[..N]);
    array
}

/// XOR-OKVS over 128 -bit values, backed by a 3-wise or 4-wise Binary Fuse Filter.
///
/// Each key touches `arity` cells of the encoding and its value is the XOR of those cells and a key dependent mask.
/// Construction never consults randomness: filter seeds are derived from [`OkvsParams::seed`].
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct BinaryFuseOkvs {
    params: OkvsParams,
}

impl BinaryFuseOkvs {
    pub fn new(params: OkvsParams) -> Result<BinaryFuseOkvs, PackingError> {
        params.validate()?;
        Ok(BinaryFuseOkvs { params })
    }

    pub fn params(&self) -> &OkvsParams {
        &self.params
    }
}

impl Okvs for BinaryFuseOkvs {
    /// Builds the filter, then assigns cells in reverse peeling order, so that each key's free cell is set after all
    /// other cells it touches are already final.
    fn solve(&self, keys: &[u64], values: &[u128]) -> Result<OkvsEncoding, PackingError> {
        if branch_opt_util::unlikely(keys.len() != values.len()) {
            return Err(PackingError::KeyValueLengthMismatch {
                keys: keys.len(),
                values: values.len(),
            });
        }

        let (filter, reverse_order, reverse_h, hash_to_index) = BinaryFuseFilter::construct(keys, self.params.arity, &self.params.seed, self.params.max_attempt_count)?;
        let arity = filter.arity as usize;

        let mut fingerprints = vec![0u128; filter.num_fingerprints];

        for i in (0..keys.len()).rev() {
            let hash = reverse_order[i];
            let found = reverse_h[i] as usize;
            let value = match hash_to_index.get(&hash) {
                Some(&key_idx) => values[key_idx],
                None => {
                    branch_opt_util::cold();
                    return Err(PackingError::MalformedEncoding);
                }
            };

            let positions = filter.positions(hash);
            let free_cell = positions[found];

            fingerprints[free_cell] = positions[..arity]
                .iter()
                .enumerate()
                .filter(|&(idx, _)| idx != found)
                .fold(value ^ binary_fuse_filter::value_mask(hash), |acc, (_, &pos)| acc ^ fingerprints[pos]);
        }

        Ok(OkvsEncoding { filter, fingerprints })
    }

    fn decode(&self, keys: &[u64], encoding: &OkvsEncoding) -> Result<Vec<u128>, PackingError> {
        if branch_opt_util::unlikely(!encoding.filter.is_well_formed() || encoding.fingerprints.len() != encoding.filter.num_fingerprints) {
            return Err(PackingError::MalformedEncoding);
        }

        Ok(keys.par_iter().map(|&key| encoding.decode_one(key)).collect())
    }
}

/// Collects `(slot index, tagged value)` of every occupied slot, in ascending slot order. Empty slots are skipped.
pub fn to_key_value_pairs(table: &CuckooTable) -> Vec<(u64, TaggedValue)> {
    table.iter_occupied().map(|(slot, tagged)| (slot as u64, tagged)).collect()
}

/// Turns a finished cuckoo table into OKVS key-value pairs and drives an [`Okvs`] implementation over them.
///
/// Keys are slot indices, values are the tagged values stored in those slots, see [`to_key_value_pairs`].
#[derive(Clone, Debug, Default)]
pub struct OkvsAdapter<O: Okvs> {
    okvs: O,
}

impl<O: Okvs> OkvsAdapter<O> {
    pub fn new(okvs: O) -> OkvsAdapter<O> {
        OkvsAdapter { okvs }
    }

    pub fn okvs(&self) -> &O {
        &self.okvs
    }

    /// Encodes key-value pairs. Failing to find a solution is fatal for the run, caller must change OKVS parameters.
    pub fn encode(&self, pairs: &[(u64, TaggedValue)]) -> Result<OkvsEncoding, PackingError> {
        let (keys, values): (Vec<u64>, Vec<u128>) = pairs.iter().map(|&(key, tagged)| (key, tagged.to_u128())).unzip();

        match self.okvs.solve(&keys, &values) {
            Ok(encoding) => {
                tracing::debug!(num_pairs = pairs.len(), encoding_len = encoding.len(), "solved OKVS");
                Ok(encoding)
            }
            Err(e) => {
                tracing::warn!(num_pairs = pairs.len(), error = %e, "failed to solve OKVS");
                Err(e)
            }
        }
    }

    /// Decodes the encoding at each key. Results at keys which were never encoded carry no meaning.
    pub fn decode(&self, keys: &[u64], encoding: &OkvsEncoding) -> Result<Vec<TaggedValue>, PackingError> {
        let values = self.okvs.decode(keys, encoding)?;
        Ok(values.into_iter().map(TaggedValue::from_u128).collect())
    }

    /// Number of pairs whose key decodes back to exactly its value. Zero if the encoding can't be decoded at all.
    pub fn count_recovered(&self, pairs: &[(u64, TaggedValue)], encoding: &OkvsEncoding) -> usize {
        let keys = pairs.iter().map(|&(key, _)| key).collect::<Vec<u64>>();

        match self.decode(&keys, encoding) {
            Ok(decoded) => decoded.iter().zip(pairs).filter(|&(decoded, &(_, expected))| *decoded == expected).count(),
            Err(e) => {
                tracing::warn!(error = %e, "failed to decode OKVS");
                0
            }
        }
    }

    /// Checks that every pair's key decodes back to its value. Meant for self-testing, not for the protocol path.
    pub fn verify(&self, pairs: &[(u64, TaggedValue)], encoding: &OkvsEncoding) -> bool {
        self.count_recovered(pairs, encoding) == pairs.len()
    }
}

#[cfg(test)]
mod test {
    use super::{BinaryFuseOkvs, Okvs, OkvsAdapter, OkvsEncoding, to_key_value_pairs};
    use crate::{CuckooParams, OkvsParams, PackingError, packing_internals::tag_codec::TaggedValue, table::CuckooTableBuilder};
    use rand::prelude::*;
    use rand_chacha::ChaCha8Rng;
    use std::collections::HashSet;
    use test_case::test_case;

    fn generate_random_pairs(rng: &mut ChaCha8Rng, num_pairs: usize) -> (Vec<u64>, Vec<u128>) {
        let mut keys = HashSet::with_capacity(num_pairs);
        while keys.len() < num_pairs {
            keys.insert(rng.random::<u64>());
        }

        let keys = keys.into_iter().collect::<Vec<u64>>();
        let values = (0..num_pairs).map(|_| rng.random::<u128>()).collect::<Vec<u128>>();

        (keys, values)
    }

    #[test_case(3; "3-wise filter")]
    #[test_case(4; "4-wise filter")]
    fn encoded_values_are_recovered(arity: u32) {
        let mut rng = ChaCha8Rng::from_os_rng();
        let okvs = BinaryFuseOkvs::new(OkvsParams::default().with_arity(arity)).expect("Must be valid OKVS parameters");

        for num_pairs in [1, 2, 3, 17, 256, 1_000, 10_000] {
            let (keys, values) = generate_random_pairs(&mut rng, num_pairs);

            let encoding = okvs.solve(&keys, &values).expect("Must be able to solve OKVS");
            assert!(encoding.len() >= num_pairs);

            let decoded = okvs.decode(&keys, &encoding).expect("Must be able to decode OKVS");
            assert_eq!(decoded, values, "num_pairs = {}, arity = {}", num_pairs, arity);
        }
    }

    #[test]
    fn solve_rejects_bad_input() {
        let okvs = BinaryFuseOkvs::default();

        assert_eq!(okvs.solve(&[], &[]), Err(PackingError::EmptyKeyValueSet));
        assert_eq!(okvs.solve(&[1, 2], &[1]), Err(PackingError::KeyValueLengthMismatch { keys: 2, values: 1 }));
    }

    #[test_case(2 => matches Err(PackingError::UnsupportedOkvsArity(2)); "arity two")]
    #[test_case(3 => matches Ok(_); "arity three")]
    #[test_case(4 => matches Ok(_); "arity four")]
    #[test_case(5 => matches Err(PackingError::UnsupportedOkvsArity(5)); "arity five")]
    fn okvs_construction_validates_arity(arity: u32) -> Result<BinaryFuseOkvs, PackingError> {
        BinaryFuseOkvs::new(OkvsParams::default().with_arity(arity))
    }

    #[test]
    fn solving_is_deterministic() {
        let keys = (0..500).collect::<Vec<u64>>();
        let values = keys.iter().map(|&k| (k as u128) << 70 | 3).collect::<Vec<u128>>();

        let okvs = BinaryFuseOkvs::default();
        assert_eq!(okvs.solve(&keys, &values), okvs.solve(&keys, &values));

        let reseeded = BinaryFuseOkvs::new(OkvsParams::default().with_seed([1u8; 32])).expect("Must be valid OKVS parameters");
        assert_ne!(okvs.solve(&keys, &values), reseeded.solve(&keys, &values));
    }

    #[test]
    fn encoding_survives_serialization() {
        let mut rng = ChaCha8Rng::from_os_rng();
        let (keys, values) = generate_random_pairs(&mut rng, 1_000);

        let okvs = BinaryFuseOkvs::default();
        let encoding = okvs.solve(&keys, &values).expect("Must be able to solve OKVS");

        let bytes = encoding.to_bytes();
        assert_eq!(bytes.len(), 52 + encoding.len() * 16);
        assert_eq!(bytes[52..68], encoding.fingerprints()[0].to_le_bytes());

        let deserialized = OkvsEncoding::from_bytes(&bytes).expect("Must be able to deserialize OKVS encoding");

        assert_eq!(deserialized, encoding);
        assert_eq!(okvs.decode(&keys, &deserialized), Ok(values));
    }

    #[test]
    fn malformed_bytes_are_rejected() {
        let keys = (0..64).collect::<Vec<u64>>();
        let values = keys.iter().map(|&k| k as u128).collect::<Vec<u128>>();

        let bytes = BinaryFuseOkvs::default().solve(&keys, &values).expect("Must be able to solve OKVS").to_bytes();

        assert_eq!(OkvsEncoding::from_bytes(&[]), Err(PackingError::FailedToDeserializeEncoding));
        assert_eq!(OkvsEncoding::from_bytes(&bytes[..bytes.len() - 1]), Err(PackingError::FailedToDeserializeEncoding));

        let mut bad_arity = bytes.clone();
        bad_arity[32..36].copy_from_slice(&7u32.to_le_bytes());
        assert_eq!(OkvsEncoding::from_bytes(&bad_arity), Err(PackingError::FailedToDeserializeEncoding));

        let mut bad_segment_length = bytes.clone();
        bad_segment_length[36..40].copy_from_slice(&3u32.to_le_bytes());
        assert_eq!(OkvsEncoding::from_bytes(&bad_segment_length), Err(PackingError::FailedToDeserializeEncoding));
    }

    #[test]
    fn adapter_encodes_cuckoo_table_and_verifies() {
        let elements = (1..=1000).map(|i| i * 7919).collect::<Vec<i64>>();
        let table = CuckooTableBuilder::new(CuckooParams::default()).expect("Must be valid parameters").build(&elements).expect("Must be able to pack elements");

        let adapter = OkvsAdapter::new(BinaryFuseOkvs::default());
        let pairs = to_key_value_pairs(&table);

        assert_eq!(pairs.len(), elements.len());
        assert!(pairs.windows(2).all(|w| w[0].0 < w[1].0));

        let encoding = adapter.encode(&pairs).expect("Must be able to encode table");
        assert!(adapter.verify(&pairs, &encoding));

        let keys = pairs.iter().map(|&(key, _)| key).collect::<Vec<u64>>();
        let decoded = adapter.decode(&keys, &encoding).expect("Must be able to decode table");
        for (tagged, &(_, expected)) in decoded.iter().zip(&pairs) {
            assert_eq!(tagged.decode(), expected.decode());
        }
    }

    #[test]
    fn tampered_encoding_fails_verification() {
        let pairs = (0..100u64).map(|slot| (slot * 3, TaggedValue::combine(slot as i64 - 50, 1 + (slot % 3) as u8).unwrap())).collect::<Vec<_>>();

        let adapter = OkvsAdapter::new(BinaryFuseOkvs::default());
        let mut encoding = adapter.encode(&pairs).expect("Must be able to encode pairs");
        assert!(adapter.verify(&pairs, &encoding));

        // With three cells per key, flipping the same bit in every cell flips it in every decoded value.
        encoding.fingerprints_mut().iter_mut().for_each(|fingerprint| *fingerprint ^= 1);

        assert!(!adapter.verify(&pairs, &encoding));
        assert_eq!(adapter.count_recovered(&pairs, &encoding), 0);
    }

    #[test]
    fn non_encoded_keys_decode_to_garbage() {
        let pairs = (0..256u64).map(|slot| (slot, TaggedValue::combine(slot as i64, 2).unwrap())).collect::<Vec<_>>();

        let adapter = OkvsAdapter::new(BinaryFuseOkvs::default());
        let encoding = adapter.encode(&pairs).expect("Must be able to encode pairs");

        let foreign_keys = (1_000_000..1_000_256u64).collect::<Vec<u64>>();
        let decoded = adapter.decode(&foreign_keys, &encoding).expect("Must be able to decode");

        let num_well_formed = decoded.iter().filter(|tagged| tagged.decode().is_ok()).count();
        assert_eq!(num_well_formed, 0);
    }
}
