//! Article store integration tests
//!
//! Covers the storage properties the design guarantees: content
//! de-duplication, monotonic per-group numbering, four-way index symmetry,
//! idempotent blob writes, and the absence conventions.

use newsmill::{ArticleStore, Error};
use std::fs;
use std::io::Read;
use std::path::Path;
use tempfile::TempDir;

fn open_store() -> (TempDir, ArticleStore) {
    let dir = TempDir::new().unwrap();
    let store = ArticleStore::open(dir.path()).unwrap();
    (dir, store)
}

fn read_all(mut file: fs::File) -> Vec<u8> {
    let mut buf = Vec::new();
    file.read_to_end(&mut buf).unwrap();
    buf
}

/// Count regular files under `<data-dir>/data`
fn count_blobs(data_dir: &Path) -> usize {
    let mut blobs = 0;
    let root = data_dir.join("data");
    if !root.exists() {
        return 0;
    }
    for level1 in fs::read_dir(root).unwrap() {
        for level2 in fs::read_dir(level1.unwrap().path()).unwrap() {
            blobs += fs::read_dir(level2.unwrap().path()).unwrap().count();
        }
    }
    blobs
}

#[test]
fn test_post_to_two_groups_shares_one_blob() {
    let (dir, store) = open_store();

    let groups = vec!["a".to_string(), "b".to_string()];
    let outcome = store.post(&groups, "<1@test>", b"hello").unwrap();
    assert_eq!(outcome.committed.len(), 2);
    assert!(outcome.failed.is_empty());

    for name in ["a", "b"] {
        let group = store.get_group(name).unwrap();
        assert_eq!(group.high, 1, "high after first post to {}", name);
        assert_eq!(group.low, 1);
        assert_eq!(group.count, 1);

        let (content, msgid) = store.get_article_by_number(name, 1).unwrap().unwrap();
        assert_eq!(read_all(content), b"hello");
        assert_eq!(msgid, "<1@test>");
    }

    // Both groups reference one stored blob, keyed by sha256("hello")
    assert_eq!(count_blobs(dir.path()), 1);
    let blob = dir
        .path()
        .join("data/2c/f2")
        .join("2cf24dba5fb0a30e26e83b2ac5b9e29e1b161e5c1fa7425e73043362938b9824");
    assert!(blob.is_file());
}

#[test]
fn test_unknown_group_is_no_such_group() {
    let (_dir, store) = open_store();

    assert!(matches!(
        store.get_article_by_number("unknown-group", 1),
        Err(Error::NoSuchGroup(_))
    ));
    assert!(matches!(
        store.get_article_by_message_id("unknown-group", "<1@test>"),
        Err(Error::NoSuchGroup(_))
    ));
    assert!(matches!(
        store.get_group("unknown-group"),
        Err(Error::NoSuchGroup(_))
    ));
}

#[test]
fn test_absent_article_is_none_not_error() {
    let (_dir, store) = open_store();
    store
        .post(&["alt.test".to_string()], "<1@test>", b"body")
        .unwrap();

    assert!(store.get_article_by_number("alt.test", 2).unwrap().is_none());
    assert!(
        store
            .get_article_by_message_id("alt.test", "<nope@test>")
            .unwrap()
            .is_none()
    );
}

#[test]
fn test_monotonic_numbering() {
    let (_dir, store) = open_store();
    let group = vec!["alt.seq".to_string()];

    for i in 1..=5i64 {
        let payload = format!("article {}", i);
        let msgid = format!("<{}@seq>", i);
        let outcome = store.post(&group, &msgid, payload.as_bytes()).unwrap();
        assert_eq!(outcome.committed[0].number, i, "numbers increase by 1");
    }

    let info = store.get_group("alt.seq").unwrap();
    assert_eq!(info.low, 1);
    assert_eq!(info.high, 5);
    assert_eq!(info.count, 5);
}

#[test]
fn test_numbering_is_independent_per_group() {
    let (_dir, store) = open_store();

    store.post(&["one".to_string()], "<a@x>", b"a").unwrap();
    store.post(&["one".to_string()], "<b@x>", b"b").unwrap();
    let outcome = store.post(&["two".to_string()], "<c@x>", b"c").unwrap();

    assert_eq!(outcome.committed[0].number, 1, "fresh group starts at 1");
    assert_eq!(store.get_group("one").unwrap().high, 2);
}

#[test]
fn test_dedup_identical_content() {
    let (dir, store) = open_store();
    let group = vec!["alt.dup".to_string()];

    store.post(&group, "<first@dup>", b"same bytes").unwrap();
    store.post(&group, "<second@dup>", b"same bytes").unwrap();

    // Two distinct (group, number) entries, one blob on disk
    assert_eq!(count_blobs(dir.path()), 1);

    let (content1, _) = store.get_article_by_number("alt.dup", 1).unwrap().unwrap();
    let (content2, _) = store.get_article_by_number("alt.dup", 2).unwrap().unwrap();
    assert_eq!(read_all(content1), b"same bytes");
    assert_eq!(read_all(content2), b"same bytes");
}

#[test]
fn test_idempotent_blob_write() {
    let (dir, store) = open_store();

    for _ in 0..3 {
        store
            .post(&["alt.idem".to_string()], "<i@x>", b"payload")
            .unwrap();
    }
    assert_eq!(count_blobs(dir.path()), 1);

    let (content, _) = store.get_article_by_number("alt.idem", 3).unwrap().unwrap();
    assert_eq!(read_all(content), b"payload");
}

#[test]
fn test_index_symmetry() {
    let (_dir, store) = open_store();
    store
        .post(&["alt.sym".to_string()], "<sym@test>", b"symmetric")
        .unwrap();

    let (by_num, msgid) = store.get_article_by_number("alt.sym", 1).unwrap().unwrap();
    assert_eq!(msgid, "<sym@test>");

    let (by_id, number) = store
        .get_article_by_message_id("alt.sym", "<sym@test>")
        .unwrap()
        .unwrap();
    assert_eq!(number, 1);
    assert_eq!(read_all(by_num), read_all(by_id));
}

#[test]
fn test_list_groups() {
    let (_dir, store) = open_store();
    for name in ["charlie", "alpha", "bravo"] {
        store
            .post(&[name.to_string()], &format!("<{}@x>", name), name.as_bytes())
            .unwrap();
    }

    let mut groups = store.list_groups().unwrap();
    groups.sort_by(|a, b| a.name.cmp(&b.name));
    let names: Vec<&str> = groups.iter().map(|g| g.name.as_str()).collect();
    assert_eq!(names, vec!["alpha", "bravo", "charlie"]);

    for group in &groups {
        assert_eq!(group.count, 1);
        assert_eq!(group.low, 1);
        assert_eq!(group.high, 1);
        // Description defaults to the name when unset
        assert_eq!(group.description, group.name);
    }
}

#[test]
fn test_numbering_survives_reopen() {
    let dir = TempDir::new().unwrap();
    {
        let store = ArticleStore::open(dir.path()).unwrap();
        store
            .post(&["alt.reopen".to_string()], "<1@r>", b"one")
            .unwrap();
    }

    let store = ArticleStore::open(dir.path()).unwrap();
    let outcome = store
        .post(&["alt.reopen".to_string()], "<2@r>", b"two")
        .unwrap();
    assert_eq!(outcome.committed[0].number, 2);
    assert_eq!(store.get_group("alt.reopen").unwrap().count, 2);
}

#[test]
fn test_same_message_id_in_two_groups_is_independent() {
    let (_dir, store) = open_store();

    store.post(&["g.one".to_string()], "<x@y>", b"c1").unwrap();
    store.post(&["g.one".to_string()], "<z@y>", b"c2").unwrap();
    store.post(&["g.two".to_string()], "<x@y>", b"c1").unwrap();

    let (_, num_one) = store
        .get_article_by_message_id("g.one", "<x@y>")
        .unwrap()
        .unwrap();
    let (_, num_two) = store
        .get_article_by_message_id("g.two", "<x@y>")
        .unwrap()
        .unwrap();
    assert_eq!(num_one, 1);
    assert_eq!(num_two, 1, "number slots are per group");
}
