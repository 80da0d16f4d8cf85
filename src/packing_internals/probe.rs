use super::{
    params::SEED_BYTE_LEN,
    tag_codec::{Element, ProbeIndex},
};
use turboshake::TurboShake128;

/// Family of α hash functions, mapping an element and a probe index to a slot of the cuckoo table.
///
/// Each probe hashes `hash_key || element || probe_index` with TurboSHAKE128, so the only property relied
/// upon is uniform spread of the output. Distinct probe indices of the same element are likely, but not
/// guaranteed, to land in distinct slots.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ProbeSequence {
    hash_key: [u8; SEED_BYTE_LEN],
}

impl ProbeSequence {
    pub const fn new(hash_key: [u8; SEED_BYTE_LEN]) -> ProbeSequence {
        ProbeSequence { hash_key }
    }

    /// Computes `hash(element, probe_index) mod table_size`.
    ///
    /// # Arguments
    ///
    /// * `element` - The element being placed.
    /// * `probe_index` - Which of the α probe functions to evaluate.
    /// * `table_size` - Number of slots in the table, must be non-zero.
    ///
    /// # Returns
    ///
    /// * `usize` - Slot index in `[0, table_size)`.
    #[inline]
    pub fn slot(&self, element: Element, probe_index: ProbeIndex, table_size: usize) -> usize {
        debug_assert!(table_size > 0);

        let mut hasher = TurboShake128::default();
        hasher.absorb(&self.hash_key);
        hasher.absorb(&element.to_le_bytes());
        hasher.absorb(&[probe_index]);
        hasher.finalize::<{ TurboShake128::DEFAULT_DOMAIN_SEPARATOR }>();

        let mut digest = [0u8; std::mem::size_of::<u64>()];
        hasher.squeeze(&mut digest);

        (u64::from_le_bytes(digest) % table_size as u64) as usize
    }

    /// All α candidate slots of an element, in probe index order.
    pub fn candidate_slots(&self, element: Element, num_probes: ProbeIndex, table_size: usize) -> Vec<usize> {
        (1..=num_probes).map(|probe_index| self.slot(element, probe_index, table_size)).collect()
    }
}

#[cfg(test)]
mod test {
    use super::ProbeSequence;

    #[test]
    fn probing_is_deterministic() {
        const TABLE_SIZE: usize = 1270;

        let lhs = ProbeSequence::default();
        let rhs = ProbeSequence::default();

        for element in -500..500 {
            for probe_index in 1..=3 {
                assert_eq!(lhs.slot(element, probe_index, TABLE_SIZE), rhs.slot(element, probe_index, TABLE_SIZE));
            }
        }
    }

    #[test]
    fn slots_stay_within_table() {
        let probes = ProbeSequence::default();

        for table_size in [1, 2, 3, 4, 17, 1 << 10] {
            for element in [i64::MIN, -1, 0, 10, 20, 30, i64::MAX] {
                assert!(probes.candidate_slots(element, 4, table_size).into_iter().all(|slot| slot < table_size));
            }
        }
    }

    #[test]
    fn single_slot_table_maps_everything_to_slot_zero() {
        let probes = ProbeSequence::default();
        assert!((0..64).all(|element| probes.slot(element, 1, 1) == 0));
    }

    #[test]
    fn hash_key_separates_probe_families() {
        const TABLE_SIZE: usize = 1 << 20;

        let zero_keyed = ProbeSequence::default();
        let keyed = ProbeSequence::new([0xa5u8; 32]);

        let num_differing_slots = (0..256).filter(|&element| zero_keyed.slot(element, 1, TABLE_SIZE) != keyed.slot(element, 1, TABLE_SIZE)).count();
        assert!(num_differing_slots > 250);
    }

    #[test]
    fn probes_spread_uniformly() {
        const TABLE_SIZE: usize = 16;
        const NUM_ELEMENTS: i64 = 16_000;

        let probes = ProbeSequence::default();

        let mut histogram = [0usize; TABLE_SIZE];
        for element in 0..NUM_ELEMENTS {
            histogram[probes.slot(element, 1, TABLE_SIZE)] += 1;
        }

        // Expected 1000 hits per slot, standard deviation is about 31.
        assert!(histogram.iter().all(|&hits| (800..=1200).contains(&hits)), "{:?}", histogram);
    }
}
