#![cfg(test)]

use crate::{
    CuckooParams, Element, EvictionPolicy, OkvsParams, PackingError, TaggedValue,
    okvs::{BinaryFuseOkvs, OkvsAdapter},
    receiver::Receiver,
    sender::Sender,
};
use rand::prelude::*;
use rand_chacha::ChaCha8Rng;
use std::collections::HashSet;
use test_case::test_case;

fn generate_random_set(rng: &mut ChaCha8Rng, num_elements: usize) -> Vec<Element> {
    let mut set = HashSet::with_capacity(num_elements);

    while set.len() < num_elements {
        set.insert(rng.random::<i64>());
    }

    set.into_iter().collect()
}

/// Every element must decode, at the slot it was packed into, to exactly itself under the probe index which placed it.
fn assert_receiver_recovers_every_element(sender: &Sender, receiver: &Receiver, elements: &[Element]) {
    let placements = elements.iter().map(|&element| sender.table().lookup(element).expect("Element must be packed")).collect::<Vec<(usize, u8)>>();
    let slots = placements.iter().map(|&(slot, _)| slot as u64).collect::<Vec<u64>>();
    let evaluated = receiver.evaluate(&slots).expect("Failed to evaluate encoding");

    for ((&element, &(_, probe_index)), tagged) in elements.iter().zip(&placements).zip(evaluated) {
        assert_eq!(tagged.extract(probe_index), Ok(element));
        assert_eq!(tagged.decode(), Ok((element, probe_index)));
    }
}

#[test_case(EvictionPolicy::ResumeAfterOccupant; "resuming after occupant's probe index")]
#[test_case(EvictionPolicy::AttemptCycled; "cycling probe index by attempt")]
fn three_elements_pack_into_four_slots_and_survive_encoding(policy: EvictionPolicy) {
    let elements = [10, 20, 30];
    let cuckoo_params = CuckooParams::default().with_eviction_policy(policy);

    let (sender, encoding_bytes) = Sender::setup(&elements, &cuckoo_params, &OkvsParams::default()).expect("Sender setup failed");

    assert_eq!(sender.table().size(), 4);
    assert_eq!(sender.table().num_occupied(), 3);
    assert_eq!(sender.pairs().len(), 3);

    let adapter = OkvsAdapter::new(BinaryFuseOkvs::default());
    assert!(adapter.verify(sender.pairs(), sender.encoding()));

    let receiver = Receiver::setup(&encoding_bytes).expect("Receiver setup failed");
    assert_eq!(receiver.encoding(), sender.encoding());
    assert_receiver_recovers_every_element(&sender, &receiver, &elements);

    let empty_slot = (0..sender.table().size()).find(|&slot| sender.table().slots()[slot].is_none()).expect("One slot must stay empty");
    let evaluated = receiver.evaluate(&[empty_slot as u64]).expect("Failed to evaluate encoding");
    assert!(evaluated[0].decode().is_err());
}

#[test_case(EvictionPolicy::ResumeAfterOccupant; "resuming after occupant's probe index")]
#[test_case(EvictionPolicy::AttemptCycled; "cycling probe index by attempt")]
fn packing_more_elements_than_slots_terminates_with_error(policy: EvictionPolicy) {
    let elements = (1..=8).collect::<Vec<Element>>();
    let cuckoo_params = CuckooParams::default()
        .with_num_probes(1)
        .with_expansion_factor(-0.5)
        .with_max_attempts(100)
        .with_eviction_policy(policy);

    let result = Sender::setup(&elements, &cuckoo_params, &OkvsParams::default());
    assert!(matches!(result, Err(PackingError::InsertionExhausted { attempts: 100, .. })));
}

#[test]
fn digit_boundary_ambiguous_elements_do_not_collide() {
    assert_ne!(TaggedValue::combine(12, 3), TaggedValue::combine(1, 23));

    let elements = [12, 1, 123, 23];
    let (sender, encoding_bytes) = Sender::setup(&elements, &CuckooParams::default(), &OkvsParams::default()).expect("Sender setup failed");

    assert_eq!(sender.table().size(), 6);
    assert_eq!(sender.table().num_occupied(), elements.len());

    let receiver = Receiver::setup(&encoding_bytes).expect("Receiver setup failed");
    assert_receiver_recovers_every_element(&sender, &receiver, &elements);

    let (slot_of_12, probe_of_12) = sender.table().lookup(12).expect("Element must be packed");
    let tagged = receiver.evaluate(&[slot_of_12 as u64]).expect("Failed to evaluate encoding")[0];

    assert_eq!(tagged.extract(probe_of_12), Ok(12));
    assert!(matches!(tagged.extract(probe_of_12 % 3 + 1), Err(PackingError::AmbiguousTag(_))));
}

#[test_case(3; "with 3-wise xor filter")]
#[test_case(4; "with 4-wise xor filter")]
fn random_set_survives_whole_pipeline(arity: u32) {
    const NUM_ELEMENTS: usize = 1usize << 12;

    let mut rng = ChaCha8Rng::seed_from_u64(arity as u64);
    let elements = generate_random_set(&mut rng, NUM_ELEMENTS);

    let mut hash_key = [0u8; crate::SEED_BYTE_LEN];
    let mut okvs_seed = [0u8; crate::SEED_BYTE_LEN];
    rng.fill_bytes(&mut hash_key);
    rng.fill_bytes(&mut okvs_seed);

    let cuckoo_params = CuckooParams::default().with_expansion_factor(0.5).with_max_attempts(500).with_hash_key(hash_key);
    let okvs_params = OkvsParams::default().with_arity(arity).with_seed(okvs_seed);

    let (sender, encoding_bytes) = Sender::setup(&elements, &cuckoo_params, &okvs_params).expect("Sender setup failed");
    assert_eq!(sender.pairs().len(), NUM_ELEMENTS);

    let receiver = Receiver::setup(&encoding_bytes).expect("Receiver setup failed");
    assert_eq!(receiver.encoding().filter().arity, arity);
    assert_receiver_recovers_every_element(&sender, &receiver, &elements);
}

#[test]
fn sender_setup_is_deterministic() {
    let elements = (0..500).map(|i| i * 104729 - 26_000_000).collect::<Vec<Element>>();

    let (_, first) = Sender::setup(&elements, &CuckooParams::default(), &OkvsParams::default()).expect("Sender setup failed");
    let (_, second) = Sender::setup(&elements, &CuckooParams::default(), &OkvsParams::default()).expect("Sender setup failed");

    assert_eq!(first, second);
}

#[test]
fn empty_set_has_nothing_to_encode() {
    let result = Sender::setup(&[], &CuckooParams::default(), &OkvsParams::default());
    assert!(matches!(result, Err(PackingError::EmptyKeyValueSet)));
}

#[test]
fn invalid_parameters_are_rejected_before_packing() {
    let elements = [1, 2, 3];

    let result = Sender::setup(&elements, &CuckooParams::default().with_num_probes(0), &OkvsParams::default());
    assert!(matches!(result, Err(PackingError::InvalidNumProbes)));

    let result = Sender::setup(&elements, &CuckooParams::default(), &OkvsParams::default().with_arity(5));
    assert!(matches!(result, Err(PackingError::UnsupportedOkvsArity(5))));
}

#[test]
fn receiver_rejects_truncated_encoding() {
    let elements = (0..100).collect::<Vec<Element>>();
    let (_, encoding_bytes) = Sender::setup(&elements, &CuckooParams::default(), &OkvsParams::default()).expect("Sender setup failed");

    assert!(Receiver::setup(&encoding_bytes).is_ok());
    assert!(matches!(Receiver::setup(&encoding_bytes[..encoding_bytes.len() - 1]), Err(PackingError::FailedToDeserializeEncoding)));
    assert!(matches!(Receiver::setup(&[]), Err(PackingError::FailedToDeserializeEncoding)));
}
