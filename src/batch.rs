use crate::coding::{get_fixed64, get_length_prefixed_slice, put_fixed64, put_length_prefixed_slice};
use crate::error::{Error, Result};
use crate::memtable::{MemTable, MvMemTable};
use crate::types::{SequenceNumber, ValidTime, ValueType};
use bytes::{BufMut, BytesMut};

// rep layout:
//   sequence: fixed64
//   count: fixed32
//   data: record[count]
// record :=
//   Value varstring varstring |
//   Deletion varstring
// varstring :=
//   len: varint32
//   data: uint8[len]
const HEADER_SIZE: usize = 12;

pub trait Handler {
    fn put(&mut self, key: &[u8], value: &[u8]);
    fn delete(&mut self, key: &[u8]);
}

pub struct WriteBatch {
    rep: BytesMut,
}

impl WriteBatch {
    pub fn new() -> Self {
        let mut rep = BytesMut::with_capacity(4096);
        rep.resize(HEADER_SIZE, 0);
        Self { rep }
    }

    pub fn clear(&mut self) {
        self.rep.clear();
        self.rep.resize(HEADER_SIZE, 0);
    }

    pub fn put(&mut self, key: impl AsRef<[u8]>, value: impl AsRef<[u8]>) {
        self.set_count(self.count() + 1);
        self.rep.put_u8(ValueType::Value as u8);
        put_length_prefixed_slice(&mut self.rep, key.as_ref());
        put_length_prefixed_slice(&mut self.rep, value.as_ref());
    }

    pub fn delete(&mut self, key: impl AsRef<[u8]>) {
        self.set_count(self.count() + 1);
        self.rep.put_u8(ValueType::Deletion as u8);
        put_length_prefixed_slice(&mut self.rep, key.as_ref());
    }

    pub fn append(&mut self, source: &WriteBatch) {
        self.set_count(self.count() + source.count());
        debug_assert!(source.rep.len() >= HEADER_SIZE);
        self.rep.extend_from_slice(&source.rep[HEADER_SIZE..]);
    }

    pub fn approximate_size(&self) -> usize {
        self.rep.len()
    }

    pub fn is_empty(&self) -> bool {
        self.count() == 0
    }

    pub fn iterate<H: Handler + ?Sized>(&self, handler: &mut H) -> Result<()> {
        if self.rep.len() < HEADER_SIZE {
            return Err(Error::Corruption("malformed WriteBatch (too small)".to_string()));
        }
        let mut input = &self.rep[HEADER_SIZE..];
        let mut found = 0u32;
        while !input.is_empty() {
            found += 1;
            let tag = input[0];
            input = &input[1..];
            match ValueType::from_u8(tag) {
                Some(ValueType::Value) => {
                    let Some(key) = get_length_prefixed_slice(&mut input) else {
                        return Err(Error::Corruption("bad WriteBatch Put".to_string()));
                    };
                    let Some(value) = get_length_prefixed_slice(&mut input) else {
                        return Err(Error::Corruption("bad WriteBatch Put".to_string()));
                    };
                    handler.put(key, value);
                }
                Some(ValueType::Deletion) => {
                    let Some(key) = get_length_prefixed_slice(&mut input) else {
                        return Err(Error::Corruption("bad WriteBatch Delete".to_string()));
                    };
                    handler.delete(key);
                }
                None => {
                    return Err(Error::Corruption("unknown WriteBatch tag".to_string()));
                }
            }
        }
        if found != self.count() {
            return Err(Error::Corruption("WriteBatch has wrong count".to_string()));
        }
        Ok(())
    }

    pub fn count(&self) -> u32 {
        u32::from_le_bytes(self.rep[8..12].try_into().unwrap_or([0; 4]))
    }

    pub fn set_count(&mut self, n: u32) {
        self.rep[8..12].copy_from_slice(&n.to_le_bytes());
    }

    pub fn sequence(&self) -> SequenceNumber {
        u64::from_le_bytes(self.rep[0..8].try_into().unwrap_or([0; 8]))
    }

    pub fn set_sequence(&mut self, sequence: SequenceNumber) {
        self.rep[0..8].copy_from_slice(&sequence.to_le_bytes());
    }

    /// Raw batch bytes, written verbatim as the log record payload.
    pub fn contents(&self) -> &[u8] {
        &self.rep
    }

    pub fn set_contents(&mut self, contents: &[u8]) {
        assert!(contents.len() >= HEADER_SIZE);
        self.rep.clear();
        self.rep.extend_from_slice(contents);
    }
}

impl Default for WriteBatch {
    fn default() -> Self {
        Self::new()
    }
}

// rep layout differs from WriteBatch in the record grammar only:
// record :=
//   Value varstring valid_time:fixed64 varstring |
//   Deletion varstring valid_time:fixed64
pub trait MvHandler {
    fn put(&mut self, key: &[u8], valid_time: ValidTime, value: &[u8]);
    fn delete(&mut self, key: &[u8], valid_time: ValidTime);
}

pub struct WriteBatchMv {
    rep: BytesMut,
}

impl WriteBatchMv {
    pub fn new() -> Self {
        let mut rep = BytesMut::with_capacity(4096);
        rep.resize(HEADER_SIZE, 0);
        Self { rep }
    }

    pub fn clear(&mut self) {
        self.rep.clear();
        self.rep.resize(HEADER_SIZE, 0);
    }

    pub fn put(&mut self, key: impl AsRef<[u8]>, valid_time: ValidTime, value: impl AsRef<[u8]>) {
        self.set_count(self.count() + 1);
        self.rep.put_u8(ValueType::Value as u8);
        put_length_prefixed_slice(&mut self.rep, key.as_ref());
        put_fixed64(&mut self.rep, valid_time);
        put_length_prefixed_slice(&mut self.rep, value.as_ref());
    }

    pub fn delete(&mut self, key: impl AsRef<[u8]>, valid_time: ValidTime) {
        self.set_count(self.count() + 1);
        self.rep.put_u8(ValueType::Deletion as u8);
        put_length_prefixed_slice(&mut self.rep, key.as_ref());
        put_fixed64(&mut self.rep, valid_time);
    }

    pub fn append(&mut self, source: &WriteBatchMv) {
        self.set_count(self.count() + source.count());
        debug_assert!(source.rep.len() >= HEADER_SIZE);
        self.rep.extend_from_slice(&source.rep[HEADER_SIZE..]);
    }

    pub fn approximate_size(&self) -> usize {
        self.rep.len()
    }

    pub fn is_empty(&self) -> bool {
        self.count() == 0
    }

    pub fn iterate<H: MvHandler + ?Sized>(&self, handler: &mut H) -> Result<()> {
        if self.rep.len() < HEADER_SIZE {
            return Err(Error::Corruption("malformed WriteBatchMV (too small)".to_string()));
        }
        let mut input = &self.rep[HEADER_SIZE..];
        let mut found = 0u32;
        while !input.is_empty() {
            found += 1;
            let tag = input[0];
            input = &input[1..];
            match ValueType::from_u8(tag) {
                Some(ValueType::Value) => {
                    let Some(key) = get_length_prefixed_slice(&mut input) else {
                        return Err(Error::Corruption("bad WriteBatchMV Put".to_string()));
                    };
                    let Some(valid_time) = get_fixed64(&mut input) else {
                        return Err(Error::Corruption("bad WriteBatchMV Put".to_string()));
                    };
                    let Some(value) = get_length_prefixed_slice(&mut input) else {
                        return Err(Error::Corruption("bad WriteBatchMV Put".to_string()));
                    };
                    handler.put(key, valid_time, value);
                }
                Some(ValueType::Deletion) => {
                    let Some(key) = get_length_prefixed_slice(&mut input) else {
                        return Err(Error::Corruption("bad WriteBatchMV Delete".to_string()));
                    };
                    let Some(valid_time) = get_fixed64(&mut input) else {
                        return Err(Error::Corruption("bad WriteBatchMV Delete".to_string()));
                    };
                    handler.delete(key, valid_time);
                }
                None => {
                    return Err(Error::Corruption("unknown WriteBatchMV tag".to_string()));
                }
            }
        }
        if found != self.count() {
            return Err(Error::Corruption("WriteBatchMV has wrong count".to_string()));
        }
        Ok(())
    }

    pub fn count(&self) -> u32 {
        u32::from_le_bytes(self.rep[8..12].try_into().unwrap_or([0; 4]))
    }

    pub fn set_count(&mut self, n: u32) {
        self.rep[8..12].copy_from_slice(&n.to_le_bytes());
    }

    pub fn sequence(&self) -> SequenceNumber {
        u64::from_le_bytes(self.rep[0..8].try_into().unwrap_or([0; 8]))
    }

    pub fn set_sequence(&mut self, sequence: SequenceNumber) {
        self.rep[0..8].copy_from_slice(&sequence.to_le_bytes());
    }

    pub fn contents(&self) -> &[u8] {
        &self.rep
    }

    pub fn set_contents(&mut self, contents: &[u8]) {
        assert!(contents.len() >= HEADER_SIZE);
        self.rep.clear();
        self.rep.extend_from_slice(contents);
    }
}

impl Default for WriteBatchMv {
    fn default() -> Self {
        Self::new()
    }
}

struct MemTableInserter<'a, M: MemTable> {
    sequence: SequenceNumber,
    mem: &'a M,
}

impl<M: MemTable> Handler for MemTableInserter<'_, M> {
    fn put(&mut self, key: &[u8], value: &[u8]) {
        self.mem.add(self.sequence, ValueType::Value, key, value);
        self.sequence += 1;
    }

    fn delete(&mut self, key: &[u8]) {
        self.mem.add(self.sequence, ValueType::Deletion, key, b"");
        self.sequence += 1;
    }
}

struct MvMemTableInserter<'a, M: MvMemTable> {
    sequence: SequenceNumber,
    mem: &'a M,
}

impl<M: MvMemTable> MvHandler for MvMemTableInserter<'_, M> {
    fn put(&mut self, key: &[u8], valid_time: ValidTime, value: &[u8]) {
        self.mem
            .add_mv(self.sequence, ValueType::Value, key, valid_time, value);
        self.sequence += 1;
    }

    fn delete(&mut self, key: &[u8], valid_time: ValidTime) {
        self.mem
            .add_mv(self.sequence, ValueType::Deletion, key, valid_time, b"");
        self.sequence += 1;
    }
}

/// Replays `batch` into `memtable`, assigning each record a consecutive
/// sequence number starting at the batch's sequence.
pub fn insert_into<M: MemTable>(batch: &WriteBatch, memtable: &M) -> Result<()> {
    tracing::debug!(
        sequence = batch.sequence(),
        count = batch.count(),
        "Applying write batch"
    );
    let mut inserter = MemTableInserter {
        sequence: batch.sequence(),
        mem: memtable,
    };
    batch.iterate(&mut inserter)
}

pub fn insert_into_mv<M: MvMemTable>(batch: &WriteBatchMv, memtable: &M) -> Result<()> {
    tracing::debug!(
        sequence = batch.sequence(),
        count = batch.count(),
        "Applying multi-version write batch"
    );
    let mut inserter = MvMemTableInserter {
        sequence: batch.sequence(),
        mem: memtable,
    };
    batch.iterate(&mut inserter)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;

    #[derive(Debug, PartialEq, Eq)]
    enum Op {
        Put(Vec<u8>, Vec<u8>),
        Delete(Vec<u8>),
    }

    #[derive(Default)]
    struct RecordingHandler {
        ops: Vec<Op>,
    }

    impl Handler for RecordingHandler {
        fn put(&mut self, key: &[u8], value: &[u8]) {
            self.ops.push(Op::Put(key.to_vec(), value.to_vec()));
        }

        fn delete(&mut self, key: &[u8]) {
            self.ops.push(Op::Delete(key.to_vec()));
        }
    }

    #[derive(Debug, PartialEq, Eq)]
    struct MvOp {
        key: Vec<u8>,
        valid_time: ValidTime,
        value: Option<Vec<u8>>,
    }

    #[derive(Default)]
    struct MvRecordingHandler {
        ops: Vec<MvOp>,
    }

    impl MvHandler for MvRecordingHandler {
        fn put(&mut self, key: &[u8], valid_time: ValidTime, value: &[u8]) {
            self.ops.push(MvOp {
                key: key.to_vec(),
                valid_time,
                value: Some(value.to_vec()),
            });
        }

        fn delete(&mut self, key: &[u8], valid_time: ValidTime) {
            self.ops.push(MvOp {
                key: key.to_vec(),
                valid_time,
                value: None,
            });
        }
    }

    #[derive(Default)]
    struct RecordingMemtable {
        calls: RefCell<Vec<(SequenceNumber, ValueType, Vec<u8>, Vec<u8>)>>,
    }

    impl MemTable for RecordingMemtable {
        fn add(&self, sequence: SequenceNumber, value_type: ValueType, key: &[u8], value: &[u8]) {
            self.calls
                .borrow_mut()
                .push((sequence, value_type, key.to_vec(), value.to_vec()));
        }
    }

    #[derive(Default)]
    struct MvRecordingMemtable {
        calls: RefCell<Vec<(SequenceNumber, ValueType, Vec<u8>, ValidTime, Vec<u8>)>>,
    }

    impl MvMemTable for MvRecordingMemtable {
        fn add_mv(
            &self,
            sequence: SequenceNumber,
            value_type: ValueType,
            key: &[u8],
            valid_time: ValidTime,
            value: &[u8],
        ) {
            self.calls.borrow_mut().push((
                sequence,
                value_type,
                key.to_vec(),
                valid_time,
                value.to_vec(),
            ));
        }
    }

    #[test]
    fn test_empty_batch() {
        let batch = WriteBatch::new();
        assert!(batch.is_empty());
        assert_eq!(batch.count(), 0);
        assert_eq!(batch.sequence(), 0);
        assert_eq!(batch.approximate_size(), 12);

        let mut handler = RecordingHandler::default();
        batch.iterate(&mut handler).unwrap();
        assert!(handler.ops.is_empty());
    }

    #[test]
    fn test_batch_bytes() {
        let mut batch = WriteBatch::new();
        batch.set_sequence(100);
        batch.put(b"k1", b"v1");
        batch.delete(b"k2");

        assert_eq!(batch.count(), 2);
        let expected: &[u8] = &[
            0x64, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, // sequence = 100
            0x02, 0x00, 0x00, 0x00, // count = 2
            0x01, 0x02, b'k', b'1', 0x02, b'v', b'1', // Put k1 v1
            0x00, 0x02, b'k', b'2', // Delete k2
        ];
        assert_eq!(batch.contents(), expected);
    }

    #[test]
    fn test_iterate_in_insertion_order() {
        let mut batch = WriteBatch::new();
        batch.put(b"a", b"1");
        batch.delete(b"b");
        batch.put(b"c", b"3");

        let mut handler = RecordingHandler::default();
        batch.iterate(&mut handler).unwrap();
        assert_eq!(
            handler.ops,
            vec![
                Op::Put(b"a".to_vec(), b"1".to_vec()),
                Op::Delete(b"b".to_vec()),
                Op::Put(b"c".to_vec(), b"3".to_vec()),
            ]
        );
    }

    #[test]
    fn test_clear() {
        let mut batch = WriteBatch::new();
        batch.set_sequence(9);
        batch.put(b"k", b"v");
        batch.clear();
        assert_eq!(batch.count(), 0);
        assert_eq!(batch.sequence(), 0);
        assert_eq!(batch.approximate_size(), 12);
    }

    #[test]
    fn test_append_is_concatenation() {
        let mut a = WriteBatch::new();
        a.put(b"k1", b"v1");
        let mut b = WriteBatch::new();
        b.delete(b"k2");
        b.put(b"k3", b"v3");

        a.append(&b);
        assert_eq!(a.count(), 3);

        let mut handler = RecordingHandler::default();
        a.iterate(&mut handler).unwrap();
        assert_eq!(
            handler.ops,
            vec![
                Op::Put(b"k1".to_vec(), b"v1".to_vec()),
                Op::Delete(b"k2".to_vec()),
                Op::Put(b"k3".to_vec(), b"v3".to_vec()),
            ]
        );
    }

    #[test]
    fn test_set_contents_roundtrip() {
        let mut batch = WriteBatch::new();
        batch.set_sequence(7);
        batch.put(b"k", b"v");

        let mut copy = WriteBatch::new();
        copy.set_contents(batch.contents());
        assert_eq!(copy.sequence(), 7);
        assert_eq!(copy.count(), 1);
        assert_eq!(copy.contents(), batch.contents());
    }

    #[test]
    fn test_insert_into_assigns_sequences() {
        let mut batch = WriteBatch::new();
        batch.set_sequence(100);
        batch.put(b"k1", b"v1");
        batch.delete(b"k2");

        let mem = RecordingMemtable::default();
        insert_into(&batch, &mem).unwrap();

        let calls = mem.calls.into_inner();
        assert_eq!(
            calls,
            vec![
                (100, ValueType::Value, b"k1".to_vec(), b"v1".to_vec()),
                (101, ValueType::Deletion, b"k2".to_vec(), Vec::new()),
            ]
        );
    }

    #[test]
    fn test_corruption_wrong_count() {
        let mut batch = WriteBatch::new();
        batch.set_sequence(100);
        batch.put(b"k1", b"v1");
        batch.delete(b"k2");
        batch.set_count(3);

        let mut handler = RecordingHandler::default();
        let err = batch.iterate(&mut handler).unwrap_err();
        assert!(matches!(err, Error::Corruption(msg) if msg == "WriteBatch has wrong count"));
    }

    #[test]
    fn test_corruption_truncated_delete() {
        let mut batch = WriteBatch::new();
        batch.set_sequence(100);
        batch.put(b"k1", b"v1");
        batch.delete(b"k2");

        let mut truncated = batch.contents().to_vec();
        truncated.pop();
        let mut bad = WriteBatch::new();
        bad.set_contents(&truncated);

        let mut handler = RecordingHandler::default();
        let err = bad.iterate(&mut handler).unwrap_err();
        assert!(matches!(err, Error::Corruption(msg) if msg == "bad WriteBatch Delete"));
    }

    #[test]
    fn test_corruption_truncated_put() {
        let mut batch = WriteBatch::new();
        batch.put(b"key", b"value");
        let mut truncated = batch.contents().to_vec();
        truncated.truncate(truncated.len() - 3);
        let mut bad = WriteBatch::new();
        bad.set_contents(&truncated);

        let mut handler = RecordingHandler::default();
        let err = bad.iterate(&mut handler).unwrap_err();
        assert!(matches!(err, Error::Corruption(msg) if msg == "bad WriteBatch Put"));
    }

    #[test]
    fn test_corruption_unknown_tag() {
        let mut batch = WriteBatch::new();
        batch.put(b"k1", b"v1");
        let mut bytes = batch.contents().to_vec();
        bytes[12] = 0x7f;
        let mut bad = WriteBatch::new();
        bad.set_contents(&bytes);

        let mut handler = RecordingHandler::default();
        let err = bad.iterate(&mut handler).unwrap_err();
        assert!(matches!(err, Error::Corruption(msg) if msg == "unknown WriteBatch tag"));
    }

    #[test]
    fn test_mv_batch_bytes() {
        let mut batch = WriteBatchMv::new();
        batch.put(b"k", 42, b"v");

        let expected: &[u8] = &[
            0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, // sequence = 0
            0x01, 0x00, 0x00, 0x00, // count = 1
            0x01, 0x01, b'k', // Put, key
            0x2a, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, // valid time = 42
            0x01, b'v', // value
        ];
        assert_eq!(batch.contents(), expected);
    }

    #[test]
    fn test_mv_iterate() {
        let mut batch = WriteBatchMv::new();
        batch.put(b"k1", 10, b"v1");
        batch.delete(b"k2", 20);

        let mut handler = MvRecordingHandler::default();
        batch.iterate(&mut handler).unwrap();
        assert_eq!(
            handler.ops,
            vec![
                MvOp {
                    key: b"k1".to_vec(),
                    valid_time: 10,
                    value: Some(b"v1".to_vec()),
                },
                MvOp {
                    key: b"k2".to_vec(),
                    valid_time: 20,
                    value: None,
                },
            ]
        );
    }

    #[test]
    fn test_mv_insert_into_assigns_sequences() {
        let mut batch = WriteBatchMv::new();
        batch.set_sequence(5);
        batch.put(b"k", 42, b"v");
        batch.delete(b"k", 43);

        let mem = MvRecordingMemtable::default();
        insert_into_mv(&batch, &mem).unwrap();

        let calls = mem.calls.into_inner();
        assert_eq!(
            calls,
            vec![
                (5, ValueType::Value, b"k".to_vec(), 42, b"v".to_vec()),
                (6, ValueType::Deletion, b"k".to_vec(), 43, Vec::new()),
            ]
        );
    }

    #[test]
    fn test_mv_append() {
        let mut a = WriteBatchMv::new();
        a.put(b"k1", 1, b"v1");
        let mut b = WriteBatchMv::new();
        b.delete(b"k2", 2);
        a.append(&b);
        assert_eq!(a.count(), 2);

        let mut handler = MvRecordingHandler::default();
        a.iterate(&mut handler).unwrap();
        assert_eq!(handler.ops.len(), 2);
        assert_eq!(handler.ops[1].key, b"k2");
        assert_eq!(handler.ops[1].valid_time, 2);
    }

    #[test]
    fn test_mv_corruption_truncated_valid_time() {
        let mut batch = WriteBatchMv::new();
        batch.delete(b"k", 42);
        let mut truncated = batch.contents().to_vec();
        truncated.truncate(truncated.len() - 4);
        let mut bad = WriteBatchMv::new();
        bad.set_contents(&truncated);

        let mut handler = MvRecordingHandler::default();
        let err = bad.iterate(&mut handler).unwrap_err();
        assert!(matches!(err, Error::Corruption(msg) if msg == "bad WriteBatchMV Delete"));
    }

    #[test]
    fn test_mv_corruption_wrong_count() {
        let mut batch = WriteBatchMv::new();
        batch.put(b"k", 1, b"v");
        batch.set_count(2);

        let mut handler = MvRecordingHandler::default();
        let err = batch.iterate(&mut handler).unwrap_err();
        assert!(matches!(err, Error::Corruption(msg) if msg == "WriteBatchMV has wrong count"));
    }
}
