use crate::{
    okvs::{BinaryFuseOkvs, Okvs, OkvsEncoding},
    packing_internals::{error::PackingError, tag_codec::TaggedValue},
};

/// Peer of the [`crate::sender::Sender`], evaluating a received OKVS encoding at keys of its choice.
///
/// Evaluating at a slot index the sender occupied yields that slot's tagged value, any other slot index yields a
/// pseudorandom looking word, so the receiver can't tell which slots were occupied.
#[derive(Clone, Debug)]
pub struct Receiver {
    okvs: BinaryFuseOkvs,
    encoding: OkvsEncoding,
}

impl Receiver {
    pub fn setup(encoding_bytes: &[u8]) -> Result<Receiver, PackingError> {
        let encoding = OkvsEncoding::from_bytes(encoding_bytes)?;
        Ok(Receiver {
            okvs: BinaryFuseOkvs::default(),
            encoding,
        })
    }

    pub fn encoding(&self) -> &OkvsEncoding {
        &self.encoding
    }

    /// Evaluates the encoding at each slot index.
    pub fn evaluate(&self, slots: &[u64]) -> Result<Vec<TaggedValue>, PackingError> {
        let words = self.okvs.decode(slots, &self.encoding)?;
        Ok(words.into_iter().map(TaggedValue::from_u128).collect())
    }
}
