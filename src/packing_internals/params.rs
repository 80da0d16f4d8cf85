use super::{branch_opt_util, error::PackingError};

pub const SEED_BYTE_LEN: usize = 32;
pub const HASHED_KEY_BYTE_LEN: usize = 32;

pub const DEFAULT_NUM_PROBES: u8 = 3;
pub const DEFAULT_EXPANSION_FACTOR: f64 = 0.27;
pub const DEFAULT_MAX_ATTEMPTS: usize = 100;

pub const DEFAULT_OKVS_ARITY: u32 = 3;
pub const OKVS_MAX_ATTEMPT_COUNT: usize = 100;

/// Decides which probe index the element currently in hand uses next.
///
/// [`EvictionPolicy::AttemptCycled`] is the textbook rule, `probe index = (attempt mod α) + 1`. It is kept for
/// compatibility, but on dense tables it exhausts its budget almost always, e.g. every run at n = 1000, α = 3 and
/// ε = 0.27. Hence the default is [`EvictionPolicy::ResumeAfterOccupant`].
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum EvictionPolicy {
    /// Probe index is `(attempt mod α) + 1`, where `attempt` counts steps of the whole eviction chain.
    /// Two elements sharing a slot under different probe indices can keep displacing each other, so
    /// this policy exhausts its budget far earlier on dense tables.
    AttemptCycled,
    /// The inserted element starts at probe index 1, a displaced occupant continues right after the probe
    /// index which had placed it, wrapping around after α.
    #[default]
    ResumeAfterOccupant,
}

/// Parameters of one cuckoo packing run.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct CuckooParams {
    /// α, number of candidate slots per element.
    pub num_probes: u8,
    /// ε, table holds `ceil((1 + ε) * n)` slots. Negative values are accepted, they just make the run fail.
    pub expansion_factor: f64,
    /// Budget of probe attempts for one eviction chain.
    pub max_attempts: usize,
    pub eviction_policy: EvictionPolicy,
    /// Domain separation key mixed into every probe hash.
    pub hash_key: [u8; SEED_BYTE_LEN],
}

impl Default for CuckooParams {
    fn default() -> Self {
        CuckooParams {
            num_probes: DEFAULT_NUM_PROBES,
            expansion_factor: DEFAULT_EXPANSION_FACTOR,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            eviction_policy: EvictionPolicy::default(),
            hash_key: [0u8; SEED_BYTE_LEN],
        }
    }
}

impl CuckooParams {
    pub fn with_num_probes(mut self, num_probes: u8) -> Self {
        self.num_probes = num_probes;
        self
    }

    pub fn with_expansion_factor(mut self, expansion_factor: f64) -> Self {
        self.expansion_factor = expansion_factor;
        self
    }

    pub fn with_max_attempts(mut self, max_attempts: usize) -> Self {
        self.max_attempts = max_attempts;
        self
    }

    pub fn with_eviction_policy(mut self, eviction_policy: EvictionPolicy) -> Self {
        self.eviction_policy = eviction_policy;
        self
    }

    pub fn with_hash_key(mut self, hash_key: [u8; SEED_BYTE_LEN]) -> Self {
        self.hash_key = hash_key;
        self
    }

    pub fn validate(&self) -> Result<(), PackingError> {
        if branch_opt_util::unlikely(self.num_probes == 0) {
            return Err(PackingError::InvalidNumProbes);
        }
        if branch_opt_util::unlikely(self.max_attempts == 0) {
            return Err(PackingError::InvalidMaxAttempts);
        }
        if branch_opt_util::unlikely(!self.expansion_factor.is_finite()) {
            return Err(PackingError::InvalidExpansionFactor);
        }

        Ok(())
    }

    /// Number of slots for `num_elements` distinct elements, i.e. `max(1, ceil((1 + ε) * n))`.
    ///
    /// Returns [`PackingError::TableTooLarge`] if that number doesn't fit in `usize`.
    pub fn table_size(&self, num_elements: usize) -> Result<usize, PackingError> {
        let proposed = ((1.0 + self.expansion_factor) * num_elements as f64).ceil();

        if branch_opt_util::unlikely(!(proposed < usize::MAX as f64)) {
            return Err(PackingError::TableTooLarge {
                num_elements,
                expansion_factor: self.expansion_factor,
            });
        }

        Ok(if proposed < 1.0 { 1 } else { proposed as usize })
    }
}

/// Parameters of the Binary Fuse Filter backed OKVS.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct OkvsParams {
    /// Number of filter cells each key touches, either 3 or 4.
    pub arity: u32,
    pub max_attempt_count: usize,
    /// Per-attempt filter seeds are derived from this one, so encoding stays deterministic.
    pub seed: [u8; SEED_BYTE_LEN],
}

impl Default for OkvsParams {
    fn default() -> Self {
        OkvsParams {
            arity: DEFAULT_OKVS_ARITY,
            max_attempt_count: OKVS_MAX_ATTEMPT_COUNT,
            seed: [0u8; SEED_BYTE_LEN],
        }
    }
}

impl OkvsParams {
    pub fn with_arity(mut self, arity: u32) -> Self {
        self.arity = arity;
        self
    }

    pub fn with_max_attempt_count(mut self, max_attempt_count: usize) -> Self {
        self.max_attempt_count = max_attempt_count;
        self
    }

    pub fn with_seed(mut self, seed: [u8; SEED_BYTE_LEN]) -> Self {
        self.seed = seed;
        self
    }

    pub fn validate(&self) -> Result<(), PackingError> {
        if branch_opt_util::unlikely(!(self.arity == 3 || self.arity == 4)) {
            return Err(PackingError::UnsupportedOkvsArity(self.arity));
        }
        if branch_opt_util::unlikely(self.max_attempt_count == 0) {
            return Err(PackingError::InvalidMaxAttempts);
        }

        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::{CuckooParams, OkvsParams};
    use crate::PackingError;
    use test_case::test_case;

    #[test_case(3, 0.27 => matches Ok(4); "three elements with default expansion")]
    #[test_case(1000, 0.27 => matches Ok(1270); "thousand elements with default expansion")]
    #[test_case(8, -0.5 => matches Ok(4); "negative expansion shrinks table below element count")]
    #[test_case(2, -1.0 => matches Ok(1); "table never has zero slots")]
    #[test_case(0, 0.27 => matches Ok(1); "empty input still gets one slot")]
    #[test_case(0, 1e30 => matches Ok(1); "huge expansion of nothing is still one slot")]
    #[test_case(3, 1e30 => matches Err(PackingError::TableTooLarge { num_elements: 3, .. }); "slot count beyond usize")]
    fn table_size_is_ceiled_expansion(num_elements: usize, expansion_factor: f64) -> Result<usize, PackingError> {
        CuckooParams::default().with_expansion_factor(expansion_factor).table_size(num_elements)
    }

    #[test_case(CuckooParams::default() => matches Ok(()); "default parameters are valid")]
    #[test_case(CuckooParams::default().with_num_probes(0) => matches Err(PackingError::InvalidNumProbes); "zero probes")]
    #[test_case(CuckooParams::default().with_max_attempts(0) => matches Err(PackingError::InvalidMaxAttempts); "zero attempt budget")]
    #[test_case(CuckooParams::default().with_expansion_factor(f64::NAN) => matches Err(PackingError::InvalidExpansionFactor); "NaN expansion")]
    #[test_case(CuckooParams::default().with_expansion_factor(f64::INFINITY) => matches Err(PackingError::InvalidExpansionFactor); "infinite expansion")]
    fn cuckoo_params_validation(params: CuckooParams) -> Result<(), PackingError> {
        params.validate()
    }

    #[test_case(OkvsParams::default() => matches Ok(()); "default arity is valid")]
    #[test_case(OkvsParams::default().with_arity(4) => matches Ok(()); "arity four is valid")]
    #[test_case(OkvsParams::default().with_arity(2) => matches Err(PackingError::UnsupportedOkvsArity(2)); "arity two is unsupported")]
    #[test_case(OkvsParams::default().with_max_attempt_count(0) => matches Err(PackingError::InvalidMaxAttempts); "zero filter attempts")]
    fn okvs_params_validation(params: OkvsParams) -> Result<(), PackingError> {
        params.validate()
    }
}
