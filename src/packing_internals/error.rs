use super::tag_codec::{Element, ProbeIndex};

#[derive(Debug, PartialEq, thiserror::Error)]
pub enum PackingError {
    // Configuration
    #[error("Number of probes per element must be in [1, {}].", u8::MAX)]
    InvalidNumProbes,
    #[error("Maximum number of insertion attempts must be non-zero.")]
    InvalidMaxAttempts,
    #[error("Table expansion factor must be a finite number.")]
    InvalidExpansionFactor,
    #[error("Binary Fuse Filter backed OKVS supports arity of either 3 or 4, but got {0}.")]
    UnsupportedOkvsArity(u32),

    // Tag codec
    #[error("Probe index {probe_index} is outside of [1, {num_probes}].")]
    InvalidProbeIndex { probe_index: ProbeIndex, num_probes: ProbeIndex },
    #[error("Slot content {0:#034x} is not a tagged value produced for the requested probe index.")]
    AmbiguousTag(u128),

    // Cuckoo table
    #[error("Table for {num_elements} elements with expansion factor {expansion_factor} can not be allocated.")]
    TableTooLarge { num_elements: usize, expansion_factor: f64 },
    #[error("Exhausted {attempts} attempts while inserting element {element}, grow the table or the number of probes.")]
    InsertionExhausted { element: Element, attempts: usize },

    // OKVS
    #[error("Can not encode an empty key-value set.")]
    EmptyKeyValueSet,
    #[error("Got {keys} keys but {values} values.")]
    KeyValueLengthMismatch { keys: usize, values: usize },
    #[error("Exhausted {attempts} attempts to build {arity}-wise XOR binary fuse filter.")]
    EncodingFailed { arity: u32, attempts: usize },
    #[error("OKVS encoding does not agree with its own filter parameters.")]
    MalformedEncoding,
    #[error("Failed to deserialize OKVS encoding from bytes.")]
    FailedToDeserializeEncoding,
    #[error("Only {correct} out of {total} key-value pairs could be recovered from OKVS encoding.")]
    VerificationFailed { correct: usize, total: usize },
}
