//! Cuckoo-OKVS: A Rust library implementation of cuckoo packing of a private set into an **O**blivious **K**ey-**V**alue **S**tore (OKVS).
//!
//! This crate places each element of a private set of 64-bit integers into one of α candidate slots of a cuckoo hash table, tags the stored
//! value with the probe index which placed it, and then encodes the `(slot index, tagged value)` pairs as a Binary Fuse Filter backed OKVS.
//! The encoding decodes to the right tagged value at every occupied slot, while at any other slot it decodes to a pseudorandom looking word.
//!
//! ## Features
//!
//! * **Deterministic Packing:** Placement depends only on the set, the hash key and the parameters. No randomness is consulted.
//! * **Probe Tagged Values:** Element and probe index are packed into one 128-bit word, so a peer evaluating the encoding at a candidate slot
//!   can tell under which probe index an element landed there.
//! * **Error Handling:** Failures to pack, to solve the OKVS or to recover every pair are reported as distinct errors, none of them is retried silently.
//! * **Flexibility:** Supports both 3-wise and 4-wise XOR Binary Fuse Filters as the OKVS.
//!
//! ## Usage
//!
//! Add Cuckoo-OKVS as dependency to your `Cargo.toml`:
//!
//! ```toml
//! [dependencies]
//! cuckoo_okvs = "=0.1.0"
//! ```
//!
//! Then, you can use it in your code:
//!
//! ```rust
//! use cuckoo_okvs::{CuckooParams, OkvsParams, receiver::Receiver, sender::Sender};
//!
//! fn main() {
//!     let elements = (0..1000i64).map(|i| i * 7919).collect::<Vec<i64>>();
//!
//!     // Sender packs its set and encodes the table, `encoding_bytes` is what gets sent to the peer.
//!     let (sender, encoding_bytes) = Sender::setup(&elements, &CuckooParams::default(), &OkvsParams::default()).expect("Sender setup failed");
//!
//!     // Peer evaluates the encoding at a slot of its choice.
//!     let receiver = Receiver::setup(&encoding_bytes).expect("Receiver setup failed");
//!
//!     let element = elements[42];
//!     let (slot, probe_index) = sender.table().lookup(element).expect("Element must be packed");
//!     let tagged = receiver.evaluate(&[slot as u64]).expect("Failed to evaluate encoding")[0];
//!
//!     assert_eq!(tagged.extract(probe_index), Ok(element));
//! }
//! ```
//!
//! ## Modules
//!
//! * `table`: Contains the `CuckooTableBuilder`, which packs a set into a `CuckooTable`.
//! * `okvs`: Contains the `Okvs` trait, its Binary Fuse Filter backed implementation and the `OkvsAdapter` which feeds it a finished table.
//! * `sender`: Contains the `Sender` struct, running the whole pipeline from private set to serialized encoding.
//! * `receiver`: Contains the `Receiver` struct, evaluating a received encoding at chosen slots.

pub use packing_internals::error::PackingError;
pub use packing_internals::params::{
    CuckooParams, DEFAULT_EXPANSION_FACTOR, DEFAULT_MAX_ATTEMPTS, DEFAULT_NUM_PROBES, DEFAULT_OKVS_ARITY, EvictionPolicy, OKVS_MAX_ATTEMPT_COUNT, OkvsParams, SEED_BYTE_LEN,
};
pub use packing_internals::probe::ProbeSequence;
pub use packing_internals::tag_codec::{Element, ProbeIndex, TaggedValue};

pub mod okvs;
pub mod receiver;
pub mod sender;
pub mod table;

mod packing_internals;
mod test_packing;
