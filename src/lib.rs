mod batch;
mod coding;
mod comparator;
mod error;
mod filter;
mod key;
mod memtable;
mod types;

pub use batch::{insert_into, insert_into_mv, Handler, MvHandler, WriteBatch, WriteBatchMv};
pub use comparator::{BytewiseComparator, Comparator, InternalKeyComparator};
pub use error::{Error, Result};
pub use filter::{BloomFilterPolicy, FilterPolicy, InternalFilterPolicy};
pub use key::{
    append_internal_key, append_mv_internal_key, extract_user_key, mv_extract_user_key,
    parse_internal_key, parse_mv_internal_key, InternalKey, LookupKey, MvLookupKey,
    ParsedInternalKey, ParsedMvInternalKey,
};
pub use memtable::{
    LookupResult, MemTable, MvMemTable, MvSkipListMemtable, SkipListMemtable,
};
pub use types::{
    SequenceNumber, ValidTime, ValueType, MAX_SEQUENCE_NUMBER, MIN_VALID_TIME,
    VALUE_TYPE_FOR_SEEK,
};
