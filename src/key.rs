use crate::coding::{decode_fixed64, encode_varint32_into, put_fixed64};
use crate::types::{
    pack_sequence_and_type, SequenceNumber, ValidTime, ValueType, VALUE_TYPE_FOR_SEEK,
};
use smallvec::SmallVec;

/// Trailing bytes of an encoded internal key: the packed sequence/type tag.
pub(crate) const SUFFIX_LEN: usize = 8;

/// Trailing bytes of an encoded multi-version internal key: the packed tag
/// plus the valid-time stamp.
pub(crate) const MV_SUFFIX_LEN: usize = 16;

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct ParsedInternalKey<'a> {
    pub user_key: &'a [u8],
    pub sequence: SequenceNumber,
    pub value_type: ValueType,
}

impl<'a> ParsedInternalKey<'a> {
    pub fn new(user_key: &'a [u8], sequence: SequenceNumber, value_type: ValueType) -> Self {
        Self {
            user_key,
            sequence,
            value_type,
        }
    }

    pub fn debug_string(&self) -> String {
        format!(
            "'{}' @ {} : {}",
            escape_bytes(self.user_key),
            self.sequence,
            self.value_type as u8
        )
    }
}

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct ParsedMvInternalKey<'a> {
    pub user_key: &'a [u8],
    pub sequence: SequenceNumber,
    pub value_type: ValueType,
    pub valid_time: ValidTime,
}

impl<'a> ParsedMvInternalKey<'a> {
    pub fn new(
        user_key: &'a [u8],
        sequence: SequenceNumber,
        value_type: ValueType,
        valid_time: ValidTime,
    ) -> Self {
        Self {
            user_key,
            sequence,
            value_type,
            valid_time,
        }
    }

    pub fn debug_string(&self) -> String {
        format!(
            "'{}' @ {} : {} vt {}",
            escape_bytes(self.user_key),
            self.sequence,
            self.value_type as u8,
            self.valid_time
        )
    }
}

pub fn append_internal_key(buf: &mut Vec<u8>, key: &ParsedInternalKey) {
    buf.extend_from_slice(key.user_key);
    put_fixed64(buf, pack_sequence_and_type(key.sequence, key.value_type));
}

pub fn append_mv_internal_key(buf: &mut Vec<u8>, key: &ParsedMvInternalKey) {
    buf.extend_from_slice(key.user_key);
    put_fixed64(buf, pack_sequence_and_type(key.sequence, key.value_type));
    put_fixed64(buf, key.valid_time);
}

pub fn parse_internal_key(data: &[u8]) -> Option<ParsedInternalKey<'_>> {
    if data.len() < SUFFIX_LEN {
        return None;
    }
    let packed = decode_fixed64(&data[data.len() - SUFFIX_LEN..]);
    let value_type = ValueType::from_u8((packed & 0xff) as u8)?;
    Some(ParsedInternalKey {
        user_key: &data[..data.len() - SUFFIX_LEN],
        sequence: packed >> 8,
        value_type,
    })
}

pub fn parse_mv_internal_key(data: &[u8]) -> Option<ParsedMvInternalKey<'_>> {
    if data.len() < MV_SUFFIX_LEN {
        return None;
    }
    let packed = decode_fixed64(&data[data.len() - MV_SUFFIX_LEN..]);
    let value_type = ValueType::from_u8((packed & 0xff) as u8)?;
    Some(ParsedMvInternalKey {
        user_key: &data[..data.len() - MV_SUFFIX_LEN],
        sequence: packed >> 8,
        value_type,
        valid_time: decode_fixed64(&data[data.len() - 8..]),
    })
}

/// Zero-copy view of the user key. The input must be a valid encoded
/// internal key (>= 8 bytes).
pub fn extract_user_key(internal_key: &[u8]) -> &[u8] {
    debug_assert!(internal_key.len() >= SUFFIX_LEN);
    &internal_key[..internal_key.len() - SUFFIX_LEN]
}

/// Zero-copy view of the user key of a multi-version internal key
/// (>= 16 bytes).
pub fn mv_extract_user_key(internal_key: &[u8]) -> &[u8] {
    debug_assert!(internal_key.len() >= MV_SUFFIX_LEN);
    &internal_key[..internal_key.len() - MV_SUFFIX_LEN]
}

pub(crate) fn escape_bytes(data: &[u8]) -> String {
    let mut out = String::with_capacity(data.len());
    for &b in data {
        if (0x20..0x7f).contains(&b) {
            out.push(b as char);
        } else {
            out.push_str(&format!("\\x{:02x}", b));
        }
    }
    out
}

/// Owned encoded internal key, as stored in index blocks and file metadata.
#[derive(Clone, PartialEq, Eq, Debug)]
pub struct InternalKey {
    rep: Vec<u8>,
}

impl InternalKey {
    pub fn new(user_key: &[u8], sequence: SequenceNumber, value_type: ValueType) -> Self {
        let mut rep = Vec::with_capacity(user_key.len() + SUFFIX_LEN);
        append_internal_key(
            &mut rep,
            &ParsedInternalKey::new(user_key, sequence, value_type),
        );
        Self { rep }
    }

    pub fn from_encoded(data: &[u8]) -> Self {
        Self { rep: data.to_vec() }
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.rep
    }

    pub fn user_key(&self) -> &[u8] {
        extract_user_key(&self.rep)
    }

    pub fn debug_string(&self) -> String {
        match parse_internal_key(&self.rep) {
            Some(parsed) => parsed.debug_string(),
            None => format!("(bad){}", escape_bytes(&self.rep)),
        }
    }
}

/// Memtable probe key: one buffer exposing the length-prefixed memtable
/// key, the encoded internal key, and the bare user key.
///
/// Short user keys stay in the inline buffer; longer ones spill to the heap.
pub struct LookupKey {
    data: SmallVec<[u8; 200]>,
    kstart: usize,
    user_key_len: usize,
}

impl LookupKey {
    pub fn new(user_key: &[u8], sequence: SequenceNumber) -> Self {
        let mut data = SmallVec::new();
        let mut scratch = [0u8; 5];
        let n = encode_varint32_into(&mut scratch, (user_key.len() + SUFFIX_LEN) as u32);
        data.extend_from_slice(&scratch[..n]);
        data.extend_from_slice(user_key);
        data.extend_from_slice(
            &pack_sequence_and_type(sequence, VALUE_TYPE_FOR_SEEK).to_le_bytes(),
        );
        Self {
            data,
            kstart: n,
            user_key_len: user_key.len(),
        }
    }

    /// The whole buffer, in the length-prefixed format memtable entries use.
    pub fn memtable_key(&self) -> &[u8] {
        &self.data
    }

    pub fn internal_key(&self) -> &[u8] {
        &self.data[self.kstart..]
    }

    pub fn user_key(&self) -> &[u8] {
        &self.data[self.kstart..self.kstart + self.user_key_len]
    }
}

/// Multi-version probe key: as [`LookupKey`] with a valid-time suffix.
pub struct MvLookupKey {
    data: SmallVec<[u8; 200]>,
    kstart: usize,
    user_key_len: usize,
}

impl MvLookupKey {
    pub fn new(user_key: &[u8], sequence: SequenceNumber, valid_time: ValidTime) -> Self {
        let mut data = SmallVec::new();
        let mut scratch = [0u8; 5];
        let n = encode_varint32_into(&mut scratch, (user_key.len() + MV_SUFFIX_LEN) as u32);
        data.extend_from_slice(&scratch[..n]);
        data.extend_from_slice(user_key);
        data.extend_from_slice(
            &pack_sequence_and_type(sequence, VALUE_TYPE_FOR_SEEK).to_le_bytes(),
        );
        data.extend_from_slice(&valid_time.to_le_bytes());
        Self {
            data,
            kstart: n,
            user_key_len: user_key.len(),
        }
    }

    pub fn memtable_key(&self) -> &[u8] {
        &self.data
    }

    pub fn internal_key(&self) -> &[u8] {
        &self.data[self.kstart..]
    }

    pub fn user_key(&self) -> &[u8] {
        &self.data[self.kstart..self.kstart + self.user_key_len]
    }
}
