//! Article storage
//!
//! Owns the content-addressed blob hierarchy and the embedded RocksDB index
//! mapping `(group, number)` ⇄ `(message-id, content-hash)`. Groups are
//! created implicitly on first post and never deleted; article numbers are
//! assigned per group, strictly increasing, and never reused.

mod blobs;
pub mod keys;

pub use blobs::BlobStore;

use crate::error::{Error, Result};
use keys::{
    GroupNs, KEY_GROUP_COUNT, KEY_GROUP_DESCR, KEY_GROUP_FIRST, KEY_GROUP_LAST, MSGID_FILE_PREFIX,
    MSGID_NUM_PREFIX, NUM_FILE_PREFIX, NUM_MSGID_PREFIX, btoi, encode_int_key, encode_str_key,
    itob,
};
use rocksdb::{Options, TransactionDB, TransactionDBOptions};
use std::fs::File;
use std::path::Path;
use tracing::{debug, warn};

/// Index database name under the data directory
pub const INDEX_DB_NAME: &str = "index.db";

/// A newsgroup with its current counters
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Group {
    /// Newsgroup name (unique, case-sensitive)
    pub name: String,
    /// Free-text description; the name when none was stored
    pub description: String,
    /// Number of articles ever posted to the group
    pub count: i64,
    /// Lowest valid article number (fixed at 1 on first use)
    pub low: i64,
    /// Last assigned article number
    pub high: i64,
}

/// One committed `(group, number)` slot from a post
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PostedArticle {
    /// Group the article was committed to
    pub group: String,
    /// Article number assigned in that group
    pub number: i64,
}

/// Per-group result of a multi-group post
///
/// Groups commit independently: a failure in one group never rolls back
/// another group's already-committed update.
#[derive(Debug, Default)]
pub struct PostOutcome {
    /// Groups that committed, with their assigned numbers
    pub committed: Vec<PostedArticle>,
    /// Groups that failed, with the per-group error
    pub failed: Vec<(String, Error)>,
}

/// Content-addressed article store with a per-group secondary index
pub struct ArticleStore {
    db: TransactionDB,
    blobs: BlobStore,
}

impl ArticleStore {
    /// Open (or create) the store under `data_dir`
    ///
    /// # Errors
    ///
    /// Returns [`Error::Storage`] when the embedded index cannot be opened;
    /// this is the one failure that is fatal to the process at startup.
    pub fn open(data_dir: &Path) -> Result<Self> {
        std::fs::create_dir_all(data_dir)?;

        let mut opts = Options::default();
        opts.create_if_missing(true);
        let db = TransactionDB::open(
            &opts,
            &TransactionDBOptions::default(),
            data_dir.join(INDEX_DB_NAME),
        )?;

        debug!("opened article index at {}", data_dir.display());
        Ok(Self {
            db,
            blobs: BlobStore::new(data_dir),
        })
    }

    /// Enumerate all known groups with their current counters
    ///
    /// Walks the namespace heads with seek-skip rather than visiting every
    /// article entry.
    pub fn list_groups(&self) -> Result<Vec<Group>> {
        let mut groups = Vec::new();
        let mut iter = self.db.raw_iterator();
        iter.seek(keys::GROUP_NS_PREFIX);

        while iter.valid() {
            let Some(key) = iter.key() else { break };
            if !key.starts_with(keys::GROUP_NS_PREFIX) {
                break;
            }
            let Some((name, _)) = GroupNs::split(key) else {
                // Corrupt or irrelevant record inside the namespace range
                warn!("skipping malformed group key");
                iter.next();
                continue;
            };
            let name = name.to_string();
            if let Some(group) = self.read_group(&name)? {
                groups.push(group);
            }
            iter.seek(GroupNs::new(&name).upper_bound());
        }
        iter.status()?;

        Ok(groups)
    }

    /// Look up one group by name
    ///
    /// # Errors
    ///
    /// Returns [`Error::NoSuchGroup`] when the name was never posted to.
    pub fn get_group(&self, name: &str) -> Result<Group> {
        self.read_group(name)?
            .ok_or_else(|| Error::NoSuchGroup(name.to_string()))
    }

    /// Fetch an article by number
    ///
    /// Returns `Ok(None)` when the number has no entry: absence is a
    /// negative result, not a storage fault.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NoSuchGroup`] when the group is unknown.
    pub fn get_article_by_number(&self, group: &str, number: i64) -> Result<Option<(File, String)>> {
        let ns = self.known_group(group)?;
        let snapshot = self.db.snapshot();

        let Some(hash) = snapshot.get(ns.key(&encode_int_key(NUM_FILE_PREFIX, number)))? else {
            return Ok(None);
        };
        let Some(msgid) = snapshot.get(ns.key(&encode_int_key(NUM_MSGID_PREFIX, number)))? else {
            return Ok(None);
        };

        let hash = String::from_utf8_lossy(&hash);
        let Some(content) = self.blobs.open(&hash)? else {
            return Ok(None);
        };
        Ok(Some((content, String::from_utf8_lossy(&msgid).into_owned())))
    }

    /// Fetch an article by message-id
    ///
    /// Same absence convention as [`get_article_by_number`](Self::get_article_by_number).
    pub fn get_article_by_message_id(
        &self,
        group: &str,
        msgid: &str,
    ) -> Result<Option<(File, i64)>> {
        let ns = self.known_group(group)?;
        let snapshot = self.db.snapshot();

        let Some(hash) = snapshot.get(ns.key(&encode_str_key(MSGID_FILE_PREFIX, msgid)))? else {
            return Ok(None);
        };
        let Some(num_raw) = snapshot.get(ns.key(&encode_str_key(MSGID_NUM_PREFIX, msgid)))? else {
            return Ok(None);
        };
        let Some(number) = btoi(&num_raw) else {
            warn!("undecodable article number for {} in {}", msgid, group);
            return Ok(None);
        };

        let hash = String::from_utf8_lossy(&hash);
        let Some(content) = self.blobs.open(&hash)? else {
            return Ok(None);
        };
        Ok(Some((content, number)))
    }

    /// Post an article to one or more groups
    ///
    /// The blob is written once (idempotently); each group then commits its
    /// counter update and all four index relations in a single pessimistic
    /// transaction. Same-group posts serialize on the group's `last` key,
    /// different groups proceed concurrently. Partial success across groups
    /// is reported in the outcome rather than raised as an error.
    pub fn post(&self, groups: &[String], msgid: &str, data: &[u8]) -> Result<PostOutcome> {
        let hash = self.blobs.write(data)?;

        let mut outcome = PostOutcome::default();
        for name in groups {
            match self.post_to_group(name, msgid, &hash) {
                Ok(number) => {
                    debug!("posted {} to {} as article {}", msgid, name, number);
                    outcome.committed.push(PostedArticle {
                        group: name.clone(),
                        number,
                    });
                }
                Err(err) => {
                    warn!("posting {} to {} failed: {}", msgid, name, err);
                    outcome.failed.push((name.clone(), err));
                }
            }
        }
        Ok(outcome)
    }

    /// Commit one group's counter update and index relations atomically
    fn post_to_group(&self, name: &str, msgid: &str, hash: &str) -> Result<i64> {
        let ns = GroupNs::new(name);
        let txn = self.db.transaction();

        // Locking the counter serializes concurrent posts to this group
        let last_key = ns.key(KEY_GROUP_LAST);
        let last = match txn.get_for_update(&last_key, true)? {
            Some(raw) => btoi(&raw).unwrap_or_else(|| {
                warn!("group {}: undecodable last counter, treating as 0", name);
                0
            }),
            None => {
                // First post creates the group: low is fixed at 1
                txn.put(ns.key(KEY_GROUP_FIRST), itob(1))?;
                0
            }
        };
        let count = match txn.get(ns.key(KEY_GROUP_COUNT))? {
            Some(raw) => btoi(&raw).unwrap_or_else(|| {
                warn!("group {}: undecodable count, treating as 0", name);
                0
            }),
            None => 0,
        };

        let number = last + 1;
        txn.put(ns.key(KEY_GROUP_COUNT), itob(count + 1))?;
        txn.put(&last_key, itob(number))?;
        txn.put(ns.key(&encode_int_key(NUM_FILE_PREFIX, number)), hash)?;
        txn.put(ns.key(&encode_int_key(NUM_MSGID_PREFIX, number)), msgid)?;
        txn.put(ns.key(&encode_str_key(MSGID_FILE_PREFIX, msgid)), hash)?;
        txn.put(ns.key(&encode_str_key(MSGID_NUM_PREFIX, msgid)), itob(number))?;
        txn.commit()?;

        Ok(number)
    }

    /// Namespace handle for a group that must already exist
    fn known_group(&self, name: &str) -> Result<GroupNs> {
        let ns = GroupNs::new(name);
        if self.db.get(ns.key(KEY_GROUP_LAST))?.is_none() {
            return Err(Error::NoSuchGroup(name.to_string()));
        }
        Ok(ns)
    }

    /// Read a group's metadata; `None` when the group does not exist
    ///
    /// The counters are read from one snapshot so a concurrent post cannot
    /// produce a torn `count`/`high` pair. Counter values that fail to
    /// decode are treated as absent and defaulted, so one corrupt record
    /// cannot take the group offline.
    fn read_group(&self, name: &str) -> Result<Option<Group>> {
        let ns = GroupNs::new(name);
        let snapshot = self.db.snapshot();

        let Some(last_raw) = snapshot.get(ns.key(KEY_GROUP_LAST))? else {
            return Ok(None);
        };
        let high = btoi(&last_raw).unwrap_or_else(|| {
            warn!("group {}: undecodable last counter, defaulting to 0", name);
            0
        });
        let low = match snapshot.get(ns.key(KEY_GROUP_FIRST))? {
            Some(raw) => btoi(&raw).unwrap_or(1),
            None => 1,
        };
        let count = match snapshot.get(ns.key(KEY_GROUP_COUNT))? {
            Some(raw) => btoi(&raw).unwrap_or(0),
            None => 0,
        };
        let description = match snapshot.get(ns.key(KEY_GROUP_DESCR))? {
            Some(raw) if !raw.is_empty() => String::from_utf8_lossy(&raw).into_owned(),
            _ => name.to_string(),
        };

        Ok(Some(Group {
            name: name.to_string(),
            description,
            count,
            low,
            high,
        }))
    }
}

impl std::fmt::Debug for ArticleStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ArticleStore")
            .field("blobs", &self.blobs)
            .finish_non_exhaustive()
    }
}
