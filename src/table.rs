use crate::packing_internals::{
    branch_opt_util,
    error::PackingError,
    params::{CuckooParams, EvictionPolicy},
    probe::ProbeSequence,
    tag_codec::{Element, ProbeIndex, TaggedValue},
};
use std::collections::HashSet;

/// Counters collected while packing, useful for tuning α and ε.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct PackingStats {
    /// Number of slots probed over the whole run.
    pub probe_attempts: usize,
    /// Number of times an occupant got displaced.
    pub evictions: usize,
    /// Most evictions a single insertion needed.
    pub longest_eviction_chain: usize,
    /// Input elements skipped because they were already packed.
    pub duplicates: usize,
}

/// Where a single insertion currently stands.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum InsertionState {
    Trying { element: Element, probe_index: ProbeIndex, attempt: usize },
    Inserted { evictions: usize },
    Failed { element: Element, attempts: usize },
}

/// Fixed-size cuckoo table, each slot either empty or holding a tagged value. Read-only once built.
#[derive(Clone, Debug, PartialEq)]
pub struct CuckooTable {
    slots: Vec<Option<TaggedValue>>,
    num_probes: ProbeIndex,
    probes: ProbeSequence,
    stats: PackingStats,
}

impl CuckooTable {
    /// Number of slots `m`.
    pub fn size(&self) -> usize {
        self.slots.len()
    }

    pub fn num_probes(&self) -> ProbeIndex {
        self.num_probes
    }

    pub fn slots(&self) -> &[Option<TaggedValue>] {
        &self.slots
    }

    pub fn stats(&self) -> &PackingStats {
        &self.stats
    }

    pub fn num_occupied(&self) -> usize {
        self.slots.iter().filter(|slot| slot.is_some()).count()
    }

    pub fn load_factor(&self) -> f64 {
        self.num_occupied() as f64 / self.size() as f64
    }

    /// Occupied slots in ascending slot order.
    pub fn iter_occupied(&self) -> impl Iterator<Item = (usize, TaggedValue)> + '_ {
        self.slots.iter().enumerate().filter_map(|(slot, content)| content.map(|tagged| (slot, tagged)))
    }

    /// Finds the slot holding an element, along with the probe index which placed it there.
    pub fn lookup(&self, element: Element) -> Option<(usize, ProbeIndex)> {
        (1..=self.num_probes).find_map(|probe_index| {
            let slot = self.probes.slot(element, probe_index, self.size());

            match self.slots[slot] {
                Some(tagged) if tagged.extract(probe_index) == Ok(element) => Some((slot, probe_index)),
                _ => None,
            }
        })
    }

    pub fn contains(&self, element: Element) -> bool {
        self.lookup(element).is_some()
    }

    /// Gives up ownership of the slots, e.g. for writing them out.
    pub fn into_slots(self) -> Vec<Option<TaggedValue>> {
        self.slots
    }
}

/// Packs elements into a [`CuckooTable`], using bounded eviction chains.
///
/// The builder is single-use: table size is fixed from the number of distinct input elements before the first
/// insertion and never grows. If the table turns out too dense, the only recovery is to build again with larger
/// ε or α.
#[derive(Clone, Debug)]
pub struct CuckooTableBuilder {
    params: CuckooParams,
    probes: ProbeSequence,
}

impl CuckooTableBuilder {
    pub fn new(params: CuckooParams) -> Result<CuckooTableBuilder, PackingError> {
        params.validate()?;

        Ok(CuckooTableBuilder {
            params,
            probes: ProbeSequence::new(params.hash_key),
        })
    }

    pub fn params(&self) -> &CuckooParams {
        &self.params
    }

    /// Inserts all elements in input order.
    ///
    /// # Arguments
    ///
    /// * `elements` - The set to pack. Repeated elements are packed once.
    ///
    /// # Returns
    ///
    /// * `Result<CuckooTable, PackingError>` - The fully populated table.
    ///   Returns [`PackingError::InsertionExhausted`] naming the element left in hand, as soon as any eviction chain
    ///   runs out of its attempt budget. The partially filled table is dropped.
    pub fn build(&self, elements: &[Element]) -> Result<CuckooTable, PackingError> {
        let mut seen = HashSet::with_capacity(elements.len());
        let distinct = elements.iter().copied().filter(|&element| seen.insert(element)).collect::<Vec<Element>>();

        let table_size = self.params.table_size(distinct.len())?;

        let mut slots: Vec<Option<TaggedValue>> = Vec::new();
        if branch_opt_util::unlikely(slots.try_reserve_exact(table_size).is_err()) {
            return Err(PackingError::TableTooLarge {
                num_elements: distinct.len(),
                expansion_factor: self.params.expansion_factor,
            });
        }
        slots.resize(table_size, None);

        let mut stats = PackingStats {
            duplicates: elements.len() - distinct.len(),
            ..Default::default()
        };

        tracing::debug!(
            num_elements = distinct.len(),
            duplicates = stats.duplicates,
            table_size,
            num_probes = self.params.num_probes,
            "packing elements into cuckoo table"
        );

        for &element in &distinct {
            self.insert(&mut slots, element, &mut stats)?;
        }

        Ok(CuckooTable {
            slots,
            num_probes: self.params.num_probes,
            probes: self.probes,
            stats,
        })
    }

    /// Drives one insertion through its states, until the element chain settles in an empty slot or the attempt budget
    /// is exhausted.
    fn insert(&self, slots: &mut [Option<TaggedValue>], element: Element, stats: &mut PackingStats) -> Result<(), PackingError> {
        let mut state = InsertionState::Trying {
            element,
            probe_index: 1,
            attempt: 0,
        };

        loop {
            state = match state {
                InsertionState::Trying { element, attempt, .. } if attempt >= self.params.max_attempts => {
                    branch_opt_util::cold();
                    InsertionState::Failed { element, attempts: attempt }
                }
                InsertionState::Trying { element, probe_index, attempt } => self.step(slots, element, probe_index, attempt, stats)?,
                InsertionState::Inserted { evictions } => {
                    stats.longest_eviction_chain = stats.longest_eviction_chain.max(evictions);
                    return Ok(());
                }
                InsertionState::Failed { element, attempts } => {
                    tracing::warn!(element, attempts, table_size = slots.len(), "cuckoo insertion exhausted its attempt budget");
                    return Err(PackingError::InsertionExhausted { element, attempts });
                }
            };
        }
    }

    /// One probe of the element in hand: either settles it in an empty slot, or swaps it with the slot's occupant,
    /// which then becomes the element in hand.
    fn step(&self, slots: &mut [Option<TaggedValue>], element: Element, probe_index: ProbeIndex, attempt: usize, stats: &mut PackingStats) -> Result<InsertionState, PackingError> {
        let num_probes = self.params.num_probes;
        let probe_index = match self.params.eviction_policy {
            EvictionPolicy::AttemptCycled => (attempt % num_probes as usize) as ProbeIndex + 1,
            EvictionPolicy::ResumeAfterOccupant => probe_index,
        };

        let slot = self.probes.slot(element, probe_index, slots.len());
        stats.probe_attempts += 1;

        let occupant = match slots[slot].replace(TaggedValue::combine(element, probe_index)?) {
            None => return Ok(InsertionState::Inserted { evictions: attempt }),
            Some(occupant) => occupant,
        };

        // Occupant must have been placed here by its own stored probe index, anything else means the slot got corrupted.
        let (evicted, evicted_probe_index) = occupant.decode()?;
        if branch_opt_util::unlikely(evicted_probe_index > num_probes || self.probes.slot(evicted, evicted_probe_index, slots.len()) != slot) {
            return Err(PackingError::AmbiguousTag(occupant.to_u128()));
        }

        stats.evictions += 1;
        tracing::trace!(slot, placed = element, evicted, attempt, "evicted cuckoo table occupant");

        Ok(InsertionState::Trying {
            element: evicted,
            probe_index: (evicted_probe_index % num_probes) + 1,
            attempt: attempt + 1,
        })
    }
}
