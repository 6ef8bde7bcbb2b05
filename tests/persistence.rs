//! Durability tests: reopen, seeding, encodings, corruption and concurrent writers.

use crossbeam_channel::{unbounded, Receiver, Sender};
use pollstore::{
    Identity, MemoryBackend, Result, SnapshotEncoding, StorageBackend, Store, StoreConfig,
    StoreError, StoredEntry,
};
use serde_json::json;
use std::fs;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use tempfile::TempDir;

fn config(dir: &TempDir) -> StoreConfig {
    StoreConfig {
        path: dir.path().join("store"),
        ..Default::default()
    }
}

// --- Reopen ---

#[test]
fn test_rows_survive_reopen() {
    let dir = TempDir::new().unwrap();

    let inserted = {
        let store = Store::create(config(&dir)).unwrap();
        store
            .from("activities")
            .insert(json!({"title": "X"}))
            .unwrap()
            .remove(0)
    };

    let store = Store::open(config(&dir)).unwrap();
    let found = store
        .from("activities")
        .eq("id", &inserted.id)
        .fetch_one()
        .unwrap();
    assert_eq!(found, inserted);
    assert_eq!(store.from("activities").count().unwrap(), 3);
}

#[test]
fn test_lock_released_on_drop() {
    let dir = TempDir::new().unwrap();
    let first = Store::create(config(&dir)).unwrap();
    assert!(matches!(Store::open(config(&dir)), Err(StoreError::Locked)));

    drop(first);
    assert!(Store::open(config(&dir)).is_ok());
}

// --- Seeding ---

#[test]
fn test_seed_installed_once() {
    let dir = TempDir::new().unwrap();

    {
        let store = Store::create(config(&dir)).unwrap();
        let seeded = store
            .from("activities")
            .order_by("created_at", false)
            .fetch()
            .unwrap();
        let titles: Vec<_> = seeded.iter().filter_map(|r| r.str_field("title")).collect();
        assert_eq!(titles, vec!["Morning Yoga", "Tech Talk"]);
        assert_eq!(store.from("polls").count().unwrap(), 1);

        assert_eq!(store.from("activities").delete().unwrap(), 2);
    }

    let store = Store::open(config(&dir)).unwrap();
    assert_eq!(store.from("activities").count().unwrap(), 0);
    assert_eq!(store.from("polls").count().unwrap(), 1);
}

#[test]
fn test_seeding_can_be_disabled() {
    let dir = TempDir::new().unwrap();
    let store = Store::create(StoreConfig {
        seed_tables: false,
        ..config(&dir)
    })
    .unwrap();
    assert_eq!(store.from("activities").count().unwrap(), 0);
    assert!(store.table_names().unwrap().is_empty());
}

#[test]
fn test_unseeded_tables_start_empty() {
    let store = Store::in_memory().unwrap();
    for table in ["votes", "poll_options", "participations", "profiles"] {
        assert_eq!(store.from(table).count().unwrap(), 0, "{table}");
    }
}

// --- Encodings ---

#[test]
fn test_message_pack_store() {
    let dir = TempDir::new().unwrap();
    let msgpack = StoreConfig {
        encoding: SnapshotEncoding::MessagePack,
        ..config(&dir)
    };

    {
        let store = Store::create(msgpack.clone()).unwrap();
        store
            .from("notes")
            .insert(json!({"text": "packed", "tags": ["a", "b"], "n": 3}))
            .unwrap();
    }

    let store = Store::open(msgpack).unwrap();
    let note = store.from("notes").fetch_one().unwrap();
    assert_eq!(note.str_field("text"), Some("packed"));
    assert_eq!(note.fields["tags"], json!(["a", "b"]));
    assert_eq!(note.fields["n"], json!(3));
}

#[test]
fn test_switching_encoding_reads_old_entries() {
    let dir = TempDir::new().unwrap();

    {
        let store = Store::create(config(&dir)).unwrap();
        store.from("notes").insert(json!({"text": "json"})).unwrap();
    }

    let store = Store::open(StoreConfig {
        encoding: SnapshotEncoding::MessagePack,
        ..config(&dir)
    })
    .unwrap();
    assert_eq!(store.from("notes").count().unwrap(), 1);

    // Rewritten in the new encoding, still readable after another reopen.
    store.from("notes").insert(json!({"text": "msgpack"})).unwrap();
    drop(store);

    let store = Store::open(config(&dir)).unwrap();
    assert_eq!(store.from("notes").count().unwrap(), 2);
}

// --- Session ---

#[test]
fn test_session_survives_reopen() {
    let dir = TempDir::new().unwrap();

    let session = {
        let store = Store::create(config(&dir)).unwrap();
        store
            .auth()
            .sign_in(Identity::new("user@example.com", "Mock User"))
            .unwrap()
    };

    {
        let store = Store::open(config(&dir)).unwrap();
        assert_eq!(store.auth().current_session(), Some(session));
        assert!(store.stats().unwrap().signed_in);
        store.auth().sign_out().unwrap();
    }

    let store = Store::open(config(&dir)).unwrap();
    assert!(store.auth().current_session().is_none());
}

// --- Corruption ---

#[test]
fn test_corrupted_table_is_reported() {
    let dir = TempDir::new().unwrap();

    {
        let store = Store::create(config(&dir)).unwrap();
        store.from("notes").insert(json!({"text": "fragile"})).unwrap();
    }

    let file = dir.path().join("store").join("data").join("table-notes.tbl");
    let mut bytes = fs::read(&file).unwrap();
    // Header is magic(4) + version(1) + encoding(1) + length(8).
    bytes[14] ^= 0xFF;
    fs::write(&file, bytes).unwrap();

    let store = Store::open(config(&dir)).unwrap();
    let err = store.from("notes").fetch().unwrap_err();
    assert!(matches!(err, StoreError::ChecksumMismatch { .. }));
    assert_eq!(err.code(), "STORAGE");
}

// --- Concurrent Writers ---

/// Memory backend that can stall one load of a key, announcing when it starts.
struct StallingBackend {
    inner: MemoryBackend,
    key: &'static str,
    stall_next: AtomicBool,
    started: Sender<()>,
}

impl StallingBackend {
    fn new(key: &'static str) -> (Arc<Self>, Receiver<()>) {
        let (started, receiver) = unbounded();
        let backend = Arc::new(Self {
            inner: MemoryBackend::new(),
            key,
            stall_next: AtomicBool::new(false),
            started,
        });
        (backend, receiver)
    }
}

impl StorageBackend for StallingBackend {
    fn load(&self, key: &str) -> Result<Option<StoredEntry>> {
        if key == self.key && self.stall_next.swap(false, Ordering::SeqCst) {
            let _ = self.started.send(());
            thread::sleep(Duration::from_millis(200));
        }
        self.inner.load(key)
    }

    fn save(&self, key: &str, entry: &StoredEntry) -> Result<()> {
        self.inner.save(key, entry)
    }

    fn remove(&self, key: &str) -> Result<()> {
        self.inner.remove(key)
    }

    fn keys(&self) -> Result<Vec<String>> {
        self.inner.keys()
    }
}

#[test]
fn test_slow_reader_does_not_lose_concurrent_insert() {
    let (backend, load_started) = StallingBackend::new("table-a");
    let store = Arc::new(
        Store::with_backend(
            StoreConfig {
                table_cache_size: 1,
                ..Default::default()
            },
            backend.clone(),
        )
        .unwrap(),
    );

    store.from("a").insert(json!({"n": 0})).unwrap();
    // Evict table a so the next read of it misses the cache.
    store.from("b").insert(json!({"n": 0})).unwrap();

    backend.stall_next.store(true, Ordering::SeqCst);
    let reader = {
        let store = Arc::clone(&store);
        thread::spawn(move || store.from("a").count().unwrap())
    };

    load_started.recv_timeout(Duration::from_secs(5)).unwrap();
    store.from("a").insert(json!({"n": 1})).unwrap();
    store.from("a").insert(json!({"n": 2})).unwrap();
    assert_eq!(reader.join().unwrap(), 1);

    let mut seen: Vec<i64> = store
        .from("a")
        .fetch()
        .unwrap()
        .iter()
        .map(|r| r.fields["n"].as_i64().unwrap())
        .collect();
    seen.sort();
    assert_eq!(seen, vec![0, 1, 2]);
}

#[test]
fn test_concurrent_inserts_on_one_table() {
    let dir = TempDir::new().unwrap();
    let store = Arc::new(
        Store::create(StoreConfig {
            table_cache_size: 1,
            ..config(&dir)
        })
        .unwrap(),
    );

    let writers: Vec<_> = (0..8)
        .map(|w| {
            let store = Arc::clone(&store);
            thread::spawn(move || {
                for i in 0..25 {
                    store
                        .from("votes")
                        .insert(json!({"poll_id": "1", "user_id": format!("u{w}-{i}"), "option_id": "a"}))
                        .unwrap();
                    // Reads of other tables keep evicting the one-slot cache.
                    store.from("polls").count().unwrap();
                }
            })
        })
        .collect();
    for writer in writers {
        writer.join().unwrap();
    }

    assert_eq!(store.from("votes").count().unwrap(), 200);
    drop(store);

    let reopened = Store::open(config(&dir)).unwrap();
    assert_eq!(reopened.from("votes").count().unwrap(), 200);
}
