use crate::coding::{decode_fixed64, get_varint32, put_fixed64, put_varint32};
use crate::key::{extract_user_key, mv_extract_user_key, LookupKey, MvLookupKey};
use crate::types::{pack_sequence_and_type, SequenceNumber, ValidTime, ValueType};
use bytes::{Bytes, BytesMut};
use crossbeam_skiplist::SkipMap;
use std::cmp::Ordering;
use std::ops::Bound;
use std::sync::atomic::{AtomicUsize, Ordering as AtomicOrdering};

/// Sink for single-version batch replay.
pub trait MemTable {
    fn add(&self, sequence: SequenceNumber, value_type: ValueType, key: &[u8], value: &[u8]);
}

/// Sink for multi-version batch replay.
pub trait MvMemTable {
    fn add_mv(
        &self,
        sequence: SequenceNumber,
        value_type: ValueType,
        key: &[u8],
        valid_time: ValidTime,
        value: &[u8],
    );
}

pub enum LookupResult {
    Found(Bytes),
    Deleted,
    NotFound,
}

/// Strips the varint32 length prefix of a memtable entry key.
fn entry_internal_key(data: &[u8]) -> &[u8] {
    let mut input = data;
    let len = get_varint32(&mut input).unwrap_or(0) as usize;
    &input[..len.min(input.len())]
}

fn compare_internal(a: &[u8], b: &[u8]) -> Ordering {
    match extract_user_key(a).cmp(extract_user_key(b)) {
        Ordering::Equal => {
            let a_tag = decode_fixed64(&a[a.len() - 8..]);
            let b_tag = decode_fixed64(&b[b.len() - 8..]);
            b_tag.cmp(&a_tag)
        }
        ord => ord,
    }
}

fn compare_mv_internal(a: &[u8], b: &[u8]) -> Ordering {
    match mv_extract_user_key(a).cmp(mv_extract_user_key(b)) {
        Ordering::Equal => {
            let a_tag = decode_fixed64(&a[a.len() - 16..]);
            let b_tag = decode_fixed64(&b[b.len() - 16..]);
            match b_tag.cmp(&a_tag) {
                Ordering::Equal => {
                    let a_vt = decode_fixed64(&a[a.len() - 8..]);
                    let b_vt = decode_fixed64(&b[b.len() - 8..]);
                    b_vt.cmp(&a_vt)
                }
                ord => ord,
            }
        }
        ord => ord,
    }
}

struct TableKey(Bytes);

impl Ord for TableKey {
    fn cmp(&self, other: &Self) -> Ordering {
        compare_internal(entry_internal_key(&self.0), entry_internal_key(&other.0))
    }
}

impl PartialOrd for TableKey {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for TableKey {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for TableKey {}

struct MvTableKey(Bytes);

impl Ord for MvTableKey {
    fn cmp(&self, other: &Self) -> Ordering {
        compare_mv_internal(entry_internal_key(&self.0), entry_internal_key(&other.0))
    }
}

impl PartialOrd for MvTableKey {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for MvTableKey {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for MvTableKey {}

/// Skiplist memtable keyed by length-prefixed internal keys, ordered by
/// user key ascending then sequence/type tag descending.
pub struct SkipListMemtable {
    table: SkipMap<TableKey, Bytes>,
    size: AtomicUsize,
}

impl SkipListMemtable {
    pub fn new() -> Self {
        Self {
            table: SkipMap::new(),
            size: AtomicUsize::new(0),
        }
    }

    /// Returns the newest record visible at the lookup key's sequence.
    pub fn get(&self, key: &LookupKey) -> LookupResult {
        let seek = TableKey(Bytes::copy_from_slice(key.memtable_key()));
        if let Some(entry) = self.table.lower_bound(Bound::Included(&seek)) {
            let internal = entry_internal_key(&entry.key().0);
            if internal.len() >= 8 && extract_user_key(internal) == key.user_key() {
                let tag = decode_fixed64(&internal[internal.len() - 8..]);
                return match ValueType::from_u8((tag & 0xff) as u8) {
                    Some(ValueType::Value) => LookupResult::Found(entry.value().clone()),
                    _ => LookupResult::Deleted,
                };
            }
        }
        LookupResult::NotFound
    }

    pub fn len(&self) -> usize {
        self.table.len()
    }

    pub fn is_empty(&self) -> bool {
        self.table.is_empty()
    }

    pub fn approximate_size(&self) -> usize {
        self.size.load(AtomicOrdering::Relaxed)
    }
}

impl Default for SkipListMemtable {
    fn default() -> Self {
        Self::new()
    }
}

impl MemTable for SkipListMemtable {
    fn add(&self, sequence: SequenceNumber, value_type: ValueType, key: &[u8], value: &[u8]) {
        let internal_len = key.len() + 8;
        let mut buf = BytesMut::with_capacity(5 + internal_len);
        put_varint32(&mut buf, internal_len as u32);
        buf.extend_from_slice(key);
        put_fixed64(&mut buf, pack_sequence_and_type(sequence, value_type));

        let entry_size = buf.len() + value.len();
        self.table
            .insert(TableKey(buf.freeze()), Bytes::copy_from_slice(value));
        self.size.fetch_add(entry_size, AtomicOrdering::Relaxed);
    }
}

/// Multi-version skiplist memtable; entries carry a valid-time suffix and
/// ties on the tag break by valid time descending.
pub struct MvSkipListMemtable {
    table: SkipMap<MvTableKey, Bytes>,
    size: AtomicUsize,
}

impl MvSkipListMemtable {
    pub fn new() -> Self {
        Self {
            table: SkipMap::new(),
            size: AtomicUsize::new(0),
        }
    }

    pub fn get(&self, key: &MvLookupKey) -> LookupResult {
        let seek = MvTableKey(Bytes::copy_from_slice(key.memtable_key()));
        if let Some(entry) = self.table.lower_bound(Bound::Included(&seek)) {
            let internal = entry_internal_key(&entry.key().0);
            if internal.len() >= 16 && mv_extract_user_key(internal) == key.user_key() {
                let tag = decode_fixed64(&internal[internal.len() - 16..]);
                return match ValueType::from_u8((tag & 0xff) as u8) {
                    Some(ValueType::Value) => LookupResult::Found(entry.value().clone()),
                    _ => LookupResult::Deleted,
                };
            }
        }
        LookupResult::NotFound
    }

    pub fn len(&self) -> usize {
        self.table.len()
    }

    pub fn is_empty(&self) -> bool {
        self.table.is_empty()
    }

    pub fn approximate_size(&self) -> usize {
        self.size.load(AtomicOrdering::Relaxed)
    }
}

impl Default for MvSkipListMemtable {
    fn default() -> Self {
        Self::new()
    }
}

impl MvMemTable for MvSkipListMemtable {
    fn add_mv(
        &self,
        sequence: SequenceNumber,
        value_type: ValueType,
        key: &[u8],
        valid_time: ValidTime,
        value: &[u8],
    ) {
        let internal_len = key.len() + 16;
        let mut buf = BytesMut::with_capacity(5 + internal_len);
        put_varint32(&mut buf, internal_len as u32);
        buf.extend_from_slice(key);
        put_fixed64(&mut buf, pack_sequence_and_type(sequence, value_type));
        put_fixed64(&mut buf, valid_time);

        let entry_size = buf.len() + value.len();
        self.table
            .insert(MvTableKey(buf.freeze()), Bytes::copy_from_slice(value));
        self.size.fetch_add(entry_size, AtomicOrdering::Relaxed);
    }
}
