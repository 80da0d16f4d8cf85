use super::{branch_opt_util, error::PackingError};

/// A member of the private set.
pub type Element = i64;

/// Which of the α probe functions placed an element, always in `[1, α]`.
pub type ProbeIndex = u8;

pub const PROBE_INDEX_BIT_LEN: u32 = ProbeIndex::BITS;
pub const ELEMENT_BIT_LEN: u32 = Element::BITS;

const PROBE_INDEX_MASK: u128 = (1u128 << PROBE_INDEX_BIT_LEN) - 1;
const ELEMENT_MASK: u128 = ((1u128 << ELEMENT_BIT_LEN) - 1) << PROBE_INDEX_BIT_LEN;
const UNUSED_BITS_MASK: u128 = !(PROBE_INDEX_MASK | ELEMENT_MASK);

/// An element packed together with the probe index which placed it in its slot.
///
/// Fixed-width layout, from least significant bit:
///
/// * bits `0..8`: probe index, never zero.
/// * bits `8..72`: two's complement bit pattern of the element.
/// * bits `72..128`: always zero.
///
/// Fields never share bits, so distinct `(element, probe index)` pairs always produce distinct tagged values,
/// whatever their decimal digit counts are. The same 128 -bit word is what gets stored in the OKVS.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct TaggedValue(u128);

impl TaggedValue {
    /// Packs an element together with the probe index which placed it.
    ///
    /// # Arguments
    ///
    /// * `element` - The set member being stored.
    /// * `probe_index` - Index of the probe function used, must be non-zero.
    ///
    /// # Returns
    ///
    /// * `Result<TaggedValue, PackingError>` - The tagged value. Returns an error if probe index is zero.
    pub fn combine(element: Element, probe_index: ProbeIndex) -> Result<TaggedValue, PackingError> {
        if branch_opt_util::unlikely(probe_index == 0) {
            return Err(PackingError::InvalidProbeIndex {
                probe_index,
                num_probes: ProbeIndex::MAX,
            });
        }

        let element_bits = (element as u64 as u128) << PROBE_INDEX_BIT_LEN;
        Ok(TaggedValue(element_bits | probe_index as u128))
    }

    /// Recovers the element, given the probe index the caller believes produced this tagged value.
    ///
    /// Probe index is stored alongside the element, so a wrong guess is detected and reported as
    /// [`PackingError::AmbiguousTag`], instead of silently handing back a corrupted element.
    pub fn extract(self, probe_index: ProbeIndex) -> Result<Element, PackingError> {
        let (element, stored_probe_index) = self.decode()?;

        if branch_opt_util::likely(stored_probe_index == probe_index) {
            Ok(element)
        } else {
            Err(PackingError::AmbiguousTag(self.0))
        }
    }

    /// Splits the tagged value back into element and probe index, checking that the layout is well-formed.
    pub fn decode(self) -> Result<(Element, ProbeIndex), PackingError> {
        let probe_index = (self.0 & PROBE_INDEX_MASK) as ProbeIndex;

        if branch_opt_util::unlikely(probe_index == 0 || (self.0 & UNUSED_BITS_MASK) != 0) {
            return Err(PackingError::AmbiguousTag(self.0));
        }

        let element = ((self.0 & ELEMENT_MASK) >> PROBE_INDEX_BIT_LEN) as u64 as Element;
        Ok((element, probe_index))
    }

    pub const fn probe_index(self) -> ProbeIndex {
        (self.0 & PROBE_INDEX_MASK) as ProbeIndex
    }

    pub const fn to_u128(self) -> u128 {
        self.0
    }

    /// Reinterprets a raw 128 -bit word, like one decoded from an OKVS, as a tagged value.
    /// Layout is validated only when the value is decoded.
    pub const fn from_u128(word: u128) -> TaggedValue {
        TaggedValue(word)
    }

    pub const fn to_le_bytes(self) -> [u8; 16] {
        self.0.to_le_bytes()
    }
}

#[cfg(test)]
mod test {
    use super::{Element, ProbeIndex, TaggedValue};
    use crate::PackingError;
    use rand::prelude::*;
    use rand_chacha::ChaCha8Rng;
    use test_case::test_case;

    #[test]
    fn extract_inverts_combine() {
        const NUM_RANDOM_ELEMENTS: usize = 1_000;

        let edge_elements = [0, 1, -1, 9, 10, 12, 99, Element::MIN, Element::MAX, Element::MIN + 1, Element::MAX - 1];

        let mut rng = ChaCha8Rng::from_os_rng();
        let random_elements = (0..NUM_RANDOM_ELEMENTS).map(|_| rng.random::<Element>()).collect::<Vec<Element>>();

        for &element in edge_elements.iter().chain(random_elements.iter()) {
            for probe_index in [1, 2, 3, 9, 10, 23, 100, ProbeIndex::MAX] {
                let tagged = TaggedValue::combine(element, probe_index).expect("Non-zero probe index must be accepted");

                assert_eq!(tagged.extract(probe_index), Ok(element), "element = {}, probe_index = {}", element, probe_index);
                assert_eq!(tagged.decode(), Ok((element, probe_index)));
                assert_eq!(tagged.probe_index(), probe_index);
                assert_eq!(TaggedValue::from_u128(tagged.to_u128()), tagged);
            }
        }
    }

    #[test]
    fn decimal_concatenation_ambiguity_does_not_collide() {
        // "12" ++ "3" and "1" ++ "23" both read as 123 when concatenated in decimal.
        let twelve_three = TaggedValue::combine(12, 3).expect("Must be able to tag");
        let one_twenty_three = TaggedValue::combine(1, 23).expect("Must be able to tag");

        assert_ne!(twelve_three, one_twenty_three);

        assert_eq!(twelve_three.extract(3), Ok(12));
        assert_eq!(one_twenty_three.extract(23), Ok(1));

        assert_eq!(twelve_three.extract(23), Err(PackingError::AmbiguousTag(twelve_three.to_u128())));
        assert_eq!(one_twenty_three.extract(3), Err(PackingError::AmbiguousTag(one_twenty_three.to_u128())));
    }

    #[test]
    fn same_element_under_different_probes_never_collides() {
        for element in [-1_000_000, -1, 0, 7, 1_000_000] {
            let tagged = (1..=ProbeIndex::MAX).map(|probe_index| TaggedValue::combine(element, probe_index).unwrap()).collect::<std::collections::HashSet<_>>();
            assert_eq!(tagged.len(), ProbeIndex::MAX as usize);
        }
    }

    #[test_case(0 => matches Err(PackingError::AmbiguousTag(0)); "all zero word carries no probe index")]
    #[test_case(1u128 << 100 => matches Err(PackingError::AmbiguousTag(_)); "bits above element field must be zero")]
    #[test_case(u128::MAX => matches Err(PackingError::AmbiguousTag(_)); "all ones word is not a tagged value")]
    #[test_case((5u128 << 8) | 2 => matches Ok((5, 2)); "well formed word decodes")]
    fn decode_validates_layout(word: u128) -> Result<(Element, ProbeIndex), PackingError> {
        TaggedValue::from_u128(word).decode()
    }

    #[test]
    fn byte_layout_puts_probe_index_first() {
        let tagged = TaggedValue::combine(-2, 3).expect("Must be able to tag");
        let bytes = tagged.to_le_bytes();

        assert_eq!(bytes[0], 3);
        assert_eq!(bytes[1..9], (-2i64).to_le_bytes());
        assert!(bytes[9..].iter().all(|&byte| byte == 0));
    }

    #[test]
    fn zero_probe_index_is_rejected() {
        assert!(matches!(TaggedValue::combine(42, 0), Err(PackingError::InvalidProbeIndex { probe_index: 0, .. })));
    }
}
