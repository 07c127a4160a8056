use std::collections::BTreeMap;
use std::sync::RwLock;

use crate::{Column, KeyValueStore, StoreError, WriteBatch, WriteOp};

type ColumnMap = BTreeMap<Vec<u8>, Vec<u8>>;

#[derive(Default)]
pub struct MemoryStore {
    columns: RwLock<[ColumnMap; Column::COUNT]>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl KeyValueStore for MemoryStore {
    fn get(&self, column: Column, key: &[u8]) -> Result<Option<Vec<u8>>, StoreError> {
        let guard = self.columns.read().expect("memory store lock");
        Ok(guard[column.index()].get(key).cloned())
    }

    fn put(&self, column: Column, key: &[u8], value: &[u8]) -> Result<(), StoreError> {
        let mut guard = self.columns.write().expect("memory store lock");
        guard[column.index()].insert(key.to_vec(), value.to_vec());
        Ok(())
    }

    fn delete(&self, column: Column, key: &[u8]) -> Result<(), StoreError> {
        let mut guard = self.columns.write().expect("memory store lock");
        guard[column.index()].remove(key);
        Ok(())
    }

    fn write_batch(&self, batch: &WriteBatch) -> Result<(), StoreError> {
        let mut guard = self.columns.write().expect("memory store lock");
        for op in batch.iter() {
            match op {
                WriteOp::Put { column, key, value } => {
                    guard[column.index()]
                        .insert(key.as_slice().to_vec(), value.as_slice().to_vec());
                }
                WriteOp::Delete { column, key } => {
                    guard[column.index()].remove(key.as_slice());
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn batch_applies_all_operations() {
        let store = MemoryStore::new();
        store.put(Column::Utxo, b"a", b"1").expect("put");

        let mut batch = WriteBatch::new();
        batch.put(Column::Utxo, b"b".as_slice(), b"2".as_slice());
        batch.delete(Column::Utxo, b"a".as_slice());
        store.write_batch(&batch).expect("write batch");

        assert_eq!(store.get(Column::Utxo, b"a").expect("get"), None);
        assert_eq!(
            store.get(Column::Utxo, b"b").expect("get"),
            Some(b"2".to_vec())
        );
    }

    #[test]
    fn columns_are_isolated() {
        let store = MemoryStore::new();
        store.put(Column::Utxo, b"k", b"utxo").expect("put");
        store.put(Column::Meta, b"k", b"meta").expect("put");
        assert_eq!(
            store.get(Column::Utxo, b"k").expect("get"),
            Some(b"utxo".to_vec())
        );
        assert_eq!(
            store.get(Column::Meta, b"k").expect("get"),
            Some(b"meta".to_vec())
        );
    }
}
