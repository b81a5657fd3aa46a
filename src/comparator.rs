use crate::coding::{decode_fixed64, put_fixed64};
use crate::key::{extract_user_key, mv_extract_user_key, MV_SUFFIX_LEN, SUFFIX_LEN};
use crate::types::{
    pack_sequence_and_type, MAX_SEQUENCE_NUMBER, MIN_VALID_TIME, VALUE_TYPE_FOR_SEEK,
};
use std::cmp::Ordering;
use std::sync::Arc;

/// Total order over byte strings, plus the key-shortening hooks the index
/// blocks use to keep separator keys small.
pub trait Comparator: Send + Sync {
    fn compare(&self, a: &[u8], b: &[u8]) -> Ordering;

    fn name(&self) -> &str;

    /// If possible, replaces `start` with a shorter key in
    /// `[start, limit)`. May leave `start` unchanged.
    fn find_shortest_separator(&self, start: &mut Vec<u8>, limit: &[u8]);

    /// If possible, replaces `key` with a shorter key >= `key`. May leave
    /// `key` unchanged.
    fn find_short_successor(&self, key: &mut Vec<u8>);
}

#[derive(Clone, Copy, Default, Debug)]
pub struct BytewiseComparator;

impl Comparator for BytewiseComparator {
    fn compare(&self, a: &[u8], b: &[u8]) -> Ordering {
        a.cmp(b)
    }

    fn name(&self) -> &str {
        "leveldb.BytewiseComparator"
    }

    fn find_shortest_separator(&self, start: &mut Vec<u8>, limit: &[u8]) {
        let min_len = start.len().min(limit.len());
        let mut diff = 0;
        while diff < min_len && start[diff] == limit[diff] {
            diff += 1;
        }
        if diff >= min_len {
            // One is a prefix of the other.
            return;
        }
        let byte = start[diff];
        // Bumping to the limit's byte is fine as long as the limit keeps
        // going afterwards: the result is then a strict prefix of the limit.
        let can_bump = byte < 0xff
            && (byte + 1 < limit[diff] || (byte + 1 == limit[diff] && limit.len() > diff + 1));
        if can_bump {
            start[diff] += 1;
            start.truncate(diff + 1);
            debug_assert_eq!(self.compare(start, limit), Ordering::Less);
        }
    }

    fn find_short_successor(&self, key: &mut Vec<u8>) {
        for i in 0..key.len() {
            if key[i] != 0xff {
                key[i] += 1;
                key.truncate(i + 1);
                return;
            }
        }
        // All 0xff: key is its own successor.
    }
}

/// Orders encoded internal keys by increasing user key, then decreasing
/// sequence/type tag, then (multi-version) decreasing valid time.
pub struct InternalKeyComparator {
    user_comparator: Arc<dyn Comparator>,
    multi_version: bool,
}

impl InternalKeyComparator {
    pub fn new(user_comparator: Arc<dyn Comparator>) -> Self {
        Self {
            user_comparator,
            multi_version: false,
        }
    }

    pub fn new_multi_version(user_comparator: Arc<dyn Comparator>) -> Self {
        Self {
            user_comparator,
            multi_version: true,
        }
    }

    pub fn user_comparator(&self) -> &dyn Comparator {
        self.user_comparator.as_ref()
    }

    fn suffix_len(&self) -> usize {
        if self.multi_version {
            MV_SUFFIX_LEN
        } else {
            SUFFIX_LEN
        }
    }

    fn user_portion<'a>(&self, key: &'a [u8]) -> &'a [u8] {
        if self.multi_version {
            mv_extract_user_key(key)
        } else {
            extract_user_key(key)
        }
    }

    fn append_seek_suffix(&self, key: &mut Vec<u8>) {
        put_fixed64(
            key,
            pack_sequence_and_type(MAX_SEQUENCE_NUMBER, VALUE_TYPE_FOR_SEEK),
        );
        if self.multi_version {
            put_fixed64(key, MIN_VALID_TIME);
        }
    }
}

impl Comparator for InternalKeyComparator {
    fn compare(&self, a: &[u8], b: &[u8]) -> Ordering {
        let r = self
            .user_comparator
            .compare(self.user_portion(a), self.user_portion(b));
        if r != Ordering::Equal {
            return r;
        }
        let s = self.suffix_len();
        let a_tag = decode_fixed64(&a[a.len() - s..]);
        let b_tag = decode_fixed64(&b[b.len() - s..]);
        match b_tag.cmp(&a_tag) {
            Ordering::Equal if self.multi_version => {
                // Equal packed tags: order by decreasing valid time.
                // Bytewise-equal keys compare equal.
                let a_vt = decode_fixed64(&a[a.len() - 8..]);
                let b_vt = decode_fixed64(&b[b.len() - 8..]);
                b_vt.cmp(&a_vt)
            }
            ord => ord,
        }
    }

    /// Identity persisted in the manifest; it must stay fixed across
    /// releases or existing databases refuse to open.
    fn name(&self) -> &str {
        "leveldb.InternalKeyComparator"
    }

    fn find_shortest_separator(&self, start: &mut Vec<u8>, limit: &[u8]) {
        // Attempt to shorten the user portion of the key.
        let user_len = start.len() - self.suffix_len();
        let user_limit = self.user_portion(limit);
        let mut tmp = start[..user_len].to_vec();
        self.user_comparator.find_shortest_separator(&mut tmp, user_limit);
        if tmp.len() < user_len
            && self.user_comparator.compare(&start[..user_len], &tmp) == Ordering::Less
        {
            // User key got shorter physically but larger logically. Tack on
            // the earliest possible tag so this is the smallest internal key
            // for the shortened user key.
            self.append_seek_suffix(&mut tmp);
            if self.compare(start, &tmp) == Ordering::Less
                && self.compare(&tmp, limit) == Ordering::Less
            {
                *start = tmp;
            }
        }
    }

    fn find_short_successor(&self, key: &mut Vec<u8>) {
        let user_len = key.len() - self.suffix_len();
        let mut tmp = key[..user_len].to_vec();
        self.user_comparator.find_short_successor(&mut tmp);
        if tmp.len() < user_len
            && self.user_comparator.compare(&key[..user_len], &tmp) == Ordering::Less
        {
            self.append_seek_suffix(&mut tmp);
            if self.compare(key, &tmp) == Ordering::Less {
                *key = tmp;
            }
        }
    }
}
