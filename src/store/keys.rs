//! Index key codec
//!
//! Composite keys are an ASCII prefix followed by either the raw bytes of a
//! string or an 8-byte big-endian signed integer. The encoding is part of the
//! on-disk format and must stay bit-exact.

use crate::error::{Error, Result};

/// Article number to content hash
pub const NUM_FILE_PREFIX: &str = "num-file.";
/// Article number to message-id
pub const NUM_MSGID_PREFIX: &str = "num-msgid.";
/// Message-id to article number
pub const MSGID_NUM_PREFIX: &str = "msgid-num.";
/// Message-id to content hash
pub const MSGID_FILE_PREFIX: &str = "msgid-file.";

/// E-mail address to outstanding token list
pub const EMAIL_TOKEN_PREFIX: &str = "email-token.";
/// Token to issuing e-mail address
pub const TOKEN_EMAIL_PREFIX: &str = "token-email.";
/// Token to issue timestamp
pub const TOKEN_EXPIRE_PREFIX: &str = "token-expire.";

/// Group metadata: lowest valid article number
pub const KEY_GROUP_FIRST: &[u8] = b"first";
/// Group metadata: last assigned article number
pub const KEY_GROUP_LAST: &[u8] = b"last";
/// Group metadata: number of articles ever posted
pub const KEY_GROUP_COUNT: &[u8] = b"count";
/// Group metadata: free-text description
pub const KEY_GROUP_DESCR: &[u8] = b"description";

/// Namespace prefix shared by every group
pub const GROUP_NS_PREFIX: &[u8] = b"groups.";

/// Separator between the group name and the entry key. Group names are
/// validated newsgroup names and can never contain NUL.
const GROUP_NS_SEP: u8 = 0;

/// Encode an i64 as 8 big-endian bytes
pub fn itob(num: i64) -> [u8; 8] {
    num.to_be_bytes()
}

/// Decode 8 big-endian bytes as an i64
///
/// Anything that is not exactly 8 bytes decodes as `None`; callers treat
/// that as an absent value and substitute their default.
pub fn btoi(data: &[u8]) -> Option<i64> {
    let bytes: [u8; 8] = data.try_into().ok()?;
    Some(i64::from_be_bytes(bytes))
}

/// Build `prefix ++ 8-byte big-endian integer`
pub fn encode_int_key(prefix: &str, num: i64) -> Vec<u8> {
    let mut key = Vec::with_capacity(prefix.len() + 8);
    key.extend_from_slice(prefix.as_bytes());
    key.extend_from_slice(&itob(num));
    key
}

/// Build `prefix ++ raw string bytes`
pub fn encode_str_key(prefix: &str, data: &str) -> Vec<u8> {
    let mut key = Vec::with_capacity(prefix.len() + data.len());
    key.extend_from_slice(prefix.as_bytes());
    key.extend_from_slice(data.as_bytes());
    key
}

/// Strip `prefix` and decode the remainder as a big-endian integer
///
/// # Errors
///
/// [`Error::PrefixMismatch`] when the key does not start with `prefix`;
/// [`Error::Storage`] when the remainder is not exactly 8 bytes.
pub fn decode_int_key(prefix: &str, data: &[u8]) -> Result<i64> {
    let rest = data
        .strip_prefix(prefix.as_bytes())
        .ok_or(Error::PrefixMismatch)?;
    btoi(rest).ok_or_else(|| Error::Storage("truncated integer key".to_string()))
}

/// Strip `prefix` and decode the remainder as a string
///
/// # Errors
///
/// [`Error::PrefixMismatch`] when the key does not start with `prefix`.
pub fn decode_str_key(prefix: &str, data: &[u8]) -> Result<String> {
    let rest = data
        .strip_prefix(prefix.as_bytes())
        .ok_or(Error::PrefixMismatch)?;
    Ok(String::from_utf8_lossy(rest).into_owned())
}

/// Key-prefix handle for one group's namespace
///
/// The original on-disk layout kept one nested bucket per group; this is the
/// flat-keyspace rendering: every key of the group is
/// `groups.<name>\0<entry>` with the entry key bit-exact per the prefixes
/// above. Handles are created on first write and there is no removal path.
#[derive(Debug, Clone)]
pub struct GroupNs {
    prefix: Vec<u8>,
}

impl GroupNs {
    /// Namespace handle for `name`
    pub fn new(name: &str) -> Self {
        let mut prefix = Vec::with_capacity(GROUP_NS_PREFIX.len() + name.len() + 1);
        prefix.extend_from_slice(GROUP_NS_PREFIX);
        prefix.extend_from_slice(name.as_bytes());
        prefix.push(GROUP_NS_SEP);
        Self { prefix }
    }

    /// Full key for an entry inside this namespace
    pub fn key(&self, entry: &[u8]) -> Vec<u8> {
        let mut key = Vec::with_capacity(self.prefix.len() + entry.len());
        key.extend_from_slice(&self.prefix);
        key.extend_from_slice(entry);
        key
    }

    /// First key strictly after every key of this namespace
    ///
    /// The separator byte is 0, so replacing it with 1 yields a seek target
    /// that skips the whole group during namespace-head scans.
    pub fn upper_bound(&self) -> Vec<u8> {
        let mut bound = self.prefix.clone();
        let last = bound.len() - 1;
        bound[last] = GROUP_NS_SEP + 1;
        bound
    }

    /// Split a full key into its group name and entry key
    ///
    /// Returns `None` for keys outside the group namespace or without a
    /// separator (corrupt or irrelevant records, skipped by callers).
    pub fn split(key: &[u8]) -> Option<(&str, &[u8])> {
        let rest = key.strip_prefix(GROUP_NS_PREFIX)?;
        let sep = rest.iter().position(|&b| b == GROUP_NS_SEP)?;
        let name = std::str::from_utf8(&rest[..sep]).ok()?;
        Some((name, &rest[sep + 1..]))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_itob_is_big_endian() {
        assert_eq!(itob(1), [0, 0, 0, 0, 0, 0, 0, 1]);
        assert_eq!(itob(0x0102030405060708), [1, 2, 3, 4, 5, 6, 7, 8]);
        assert_eq!(itob(-1), [0xff; 8]);
    }

    #[test]
    fn test_btoi_roundtrip() {
        for num in [0, 1, -1, 42, i64::MAX, i64::MIN] {
            assert_eq!(btoi(&itob(num)), Some(num));
        }
    }

    #[test]
    fn test_btoi_rejects_wrong_length() {
        assert_eq!(btoi(b""), None);
        assert_eq!(btoi(b"1234567"), None);
        assert_eq!(btoi(b"123456789"), None);
    }

    #[test]
    fn test_encode_int_key_layout() {
        let key = encode_int_key(NUM_FILE_PREFIX, 1);
        assert_eq!(&key[..9], b"num-file.");
        assert_eq!(&key[9..], &[0, 0, 0, 0, 0, 0, 0, 1]);
    }

    #[test]
    fn test_encode_str_key_layout() {
        let key = encode_str_key(MSGID_NUM_PREFIX, "<1@test>");
        assert_eq!(key, b"msgid-num.<1@test>");
    }

    #[test]
    fn test_decode_int_key() {
        let key = encode_int_key(NUM_MSGID_PREFIX, 77);
        assert_eq!(decode_int_key(NUM_MSGID_PREFIX, &key).unwrap(), 77);
    }

    #[test]
    fn test_decode_rejects_mismatched_prefix() {
        let key = encode_int_key(NUM_FILE_PREFIX, 1);
        assert!(matches!(
            decode_int_key(NUM_MSGID_PREFIX, &key),
            Err(Error::PrefixMismatch)
        ));
        assert!(matches!(
            decode_str_key(TOKEN_EMAIL_PREFIX, b"email-token.a@b"),
            Err(Error::PrefixMismatch)
        ));
    }

    #[test]
    fn test_decode_str_key() {
        let key = encode_str_key(TOKEN_EXPIRE_PREFIX, "abc");
        assert_eq!(decode_str_key(TOKEN_EXPIRE_PREFIX, &key).unwrap(), "abc");
    }

    #[test]
    fn test_group_ns_key_layout() {
        let ns = GroupNs::new("alt.test");
        let key = ns.key(KEY_GROUP_LAST);
        assert_eq!(key, b"groups.alt.test\0last");
    }

    #[test]
    fn test_group_ns_split() {
        let ns = GroupNs::new("comp.lang.rust");
        let key = ns.key(&encode_int_key(NUM_FILE_PREFIX, 3));
        let (name, entry) = GroupNs::split(&key).unwrap();
        assert_eq!(name, "comp.lang.rust");
        assert_eq!(entry, encode_int_key(NUM_FILE_PREFIX, 3).as_slice());

        assert!(GroupNs::split(b"validations.x").is_none());
        assert!(GroupNs::split(b"groups.no-separator").is_none());
    }

    #[test]
    fn test_group_ns_upper_bound_orders_after_entries() {
        let ns = GroupNs::new("a");
        let entry = ns.key(&encode_str_key(MSGID_FILE_PREFIX, "<zzz@x>"));
        let bound = ns.upper_bound();
        assert!(entry < bound);
        // The next group's keys sort after the bound
        let next = GroupNs::new("a.b").key(KEY_GROUP_LAST);
        assert!(bound <= next);
    }
}
