use crate::{
    okvs::{BinaryFuseOkvs, Okvs, OkvsAdapter, OkvsEncoding, to_key_value_pairs},
    packing_internals::{
        branch_opt_util,
        error::PackingError,
        params::{CuckooParams, OkvsParams},
        tag_codec::{Element, TaggedValue},
    },
    table::{CuckooTable, CuckooTableBuilder},
};
use std::time::Instant;

/// Holder of the private set, which packs it into a cuckoo table and encodes that table as an OKVS for its peer.
#[derive(Clone, Debug)]
pub struct Sender {
    table: CuckooTable,
    pairs: Vec<(u64, TaggedValue)>,
    encoding: OkvsEncoding,
}

impl Sender {
    /// Sets up the sender with a Binary Fuse Filter backed OKVS.
    ///
    /// This function runs the whole local pipeline:
    /// 1. **Packing:** Builds a cuckoo table of `ceil((1 + ε) * n)` slots. Fails if any eviction chain exhausts its budget.
    /// 2. **Pair Extraction:** Each occupied slot becomes a `(slot index, tagged value)` pair.
    /// 3. **Encoding:** Solves the OKVS over those pairs. Fails if no filter seed admits a solution.
    /// 4. **Self-check:** Decodes every pair back, fails unless all of them are recovered.
    /// 5. **Serialization:** Converts the encoding into bytes, ready to be sent to the peer.
    ///
    /// # Arguments
    ///
    /// * `elements`: The private set.
    /// * `cuckoo_params`: Number of probes, expansion factor, attempt budget and hash key of the cuckoo table.
    /// * `okvs_params`: Arity, attempt budget and seed of the OKVS.
    ///
    /// # Returns
    ///
    /// A `Result` containing the `Sender` and the serialized OKVS encoding. Any failure is fatal for the run,
    /// caller has to retry with different parameters.
    pub fn setup(elements: &[Element], cuckoo_params: &CuckooParams, okvs_params: &OkvsParams) -> Result<(Sender, Vec<u8>), PackingError> {
        let okvs = BinaryFuseOkvs::new(*okvs_params)?;
        Self::setup_with_okvs(elements, cuckoo_params, okvs)
    }

    /// Same as [`Sender::setup`], but over any OKVS implementation.
    pub fn setup_with_okvs<O: Okvs>(elements: &[Element], cuckoo_params: &CuckooParams, okvs: O) -> Result<(Sender, Vec<u8>), PackingError> {
        let table = CuckooTableBuilder::new(*cuckoo_params)?.build(elements)?;
        tracing::info!(
            table_size = table.size(),
            num_occupied = table.num_occupied(),
            evictions = table.stats().evictions,
            longest_eviction_chain = table.stats().longest_eviction_chain,
            "packed private set into cuckoo table"
        );

        let adapter = OkvsAdapter::new(okvs);
        let pairs = to_key_value_pairs(&table);

        let solve_started_at = Instant::now();
        let encoding = adapter.encode(&pairs)?;
        let solve_time = solve_started_at.elapsed();

        let decode_started_at = Instant::now();
        let correct = adapter.count_recovered(&pairs, &encoding);
        let decode_time = decode_started_at.elapsed();

        tracing::info!(
            num_pairs = pairs.len(),
            encoding_len = encoding.len(),
            expansion = encoding.len() as f64 / pairs.len() as f64,
            ?solve_time,
            ?decode_time,
            correct,
            "encoded cuckoo table as OKVS"
        );

        if branch_opt_util::unlikely(correct != pairs.len()) {
            return Err(PackingError::VerificationFailed { correct, total: pairs.len() });
        }

        let encoding_bytes = encoding.to_bytes();
        Ok((Sender { table, pairs, encoding }, encoding_bytes))
    }

    pub fn table(&self) -> &CuckooTable {
        &self.table
    }

    pub fn pairs(&self) -> &[(u64, TaggedValue)] {
        &self.pairs
    }

    pub fn encoding(&self) -> &OkvsEncoding {
        &self.encoding
    }
}
