#![cfg(feature = "fjall")]

use veld_storage::fjall::FjallStore;
use veld_storage::{Column, KeyValueStore, WriteBatch};

#[test]
fn put_get_delete_round_trip() {
    let dir = tempfile::tempdir().expect("tempdir");
    let store = FjallStore::open(dir.path()).expect("open store");

    store.put(Column::Utxo, b"key", b"value").expect("put");
    assert_eq!(
        store.get(Column::Utxo, b"key").expect("get"),
        Some(b"value".to_vec())
    );

    let mut batch = WriteBatch::new();
    batch.delete(Column::Utxo, b"key".as_slice());
    batch.put(Column::Meta, b"tip".as_slice(), b"hash".as_slice());
    store.write_batch(&batch).expect("write batch");

    assert_eq!(store.get(Column::Utxo, b"key").expect("get"), None);
    assert_eq!(
        store.get(Column::Meta, b"tip").expect("get"),
        Some(b"hash".to_vec())
    );
}
