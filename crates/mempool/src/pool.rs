use std::collections::{HashMap, HashSet};

use veld_consensus::Hash256;
use veld_primitives::outpoint::OutPoint;
use veld_primitives::transaction::Transaction;

#[derive(Clone, Debug, Eq, PartialEq)]
pub enum MempoolErrorKind {
    AlreadyInMempool,
    Conflict,
    MissingInput,
    InsufficientFee,
    MempoolFull,
    NonStandard,
    InvalidTransaction,
    InvalidScript,
    Internal,
}

#[derive(Clone, Debug)]
pub struct MempoolError {
    pub kind: MempoolErrorKind,
    pub message: String,
    pub missing_inputs: Vec<OutPoint>,
}

impl MempoolError {
    pub fn new(kind: MempoolErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            missing_inputs: Vec::new(),
        }
    }

    pub fn missing_inputs(missing_inputs: Vec<OutPoint>) -> Self {
        Self {
            kind: MempoolErrorKind::MissingInput,
            message: "missing inputs".to_string(),
            missing_inputs,
        }
    }
}

impl std::fmt::Display for MempoolError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for MempoolError {}

pub struct MempoolEntry {
    pub txid: Hash256,
    pub tx: Transaction,
    pub time: u64,
    pub height: i32,
    pub fee: i64,
    pub size: usize,
    pub spent_outpoints: Vec<OutPoint>,
    pub parents: Vec<Hash256>,
}

#[derive(Clone, Debug)]
pub struct MempoolPrevout {
    pub value: i64,
    pub script_pubkey: Vec<u8>,
}

/// Set of transactions this node considers valid and not yet confirmed.
///
/// The spent-outpoint index enforces the no-conflict invariant: no two
/// resident transactions ever spend the same output.
#[derive(Default)]
pub struct Mempool {
    entries: HashMap<Hash256, MempoolEntry>,
    spent: HashMap<OutPoint, Hash256>,
    children: HashMap<Hash256, Vec<Hash256>>,
    total_bytes: usize,
    max_bytes: usize,
}

impl Mempool {
    pub fn new(max_bytes: usize) -> Self {
        Self {
            max_bytes,
            ..Self::default()
        }
    }

    pub fn contains(&self, txid: &Hash256) -> bool {
        self.entries.contains_key(txid)
    }

    pub fn spender(&self, outpoint: &OutPoint) -> Option<Hash256> {
        self.spent.get(outpoint).copied()
    }

    pub fn size(&self) -> usize {
        self.entries.len()
    }

    pub fn bytes(&self) -> usize {
        self.total_bytes
    }

    pub fn get(&self, txid: &Hash256) -> Option<&MempoolEntry> {
        self.entries.get(txid)
    }

    pub fn txids(&self) -> Vec<Hash256> {
        let mut out: Vec<_> = self.entries.keys().copied().collect();
        out.sort();
        out
    }

    pub fn prevout(&self, outpoint: &OutPoint) -> Option<MempoolPrevout> {
        let entry = self.entries.get(&outpoint.txid)?;
        let index = usize::try_from(outpoint.vout).ok()?;
        let txout = entry.tx.vout.get(index)?;
        Some(MempoolPrevout {
            value: txout.value,
            script_pubkey: txout.script_pubkey.clone(),
        })
    }

    pub fn insert(&mut self, entry: MempoolEntry) -> Result<(), MempoolError> {
        if self.max_bytes > 0 && entry.size > self.max_bytes {
            return Err(MempoolError::new(
                MempoolErrorKind::MempoolFull,
                "transaction too large for mempool",
            ));
        }
        if self.entries.contains_key(&entry.txid) {
            return Err(MempoolError::new(
                MempoolErrorKind::AlreadyInMempool,
                "transaction already in mempool",
            ));
        }
        for outpoint in &entry.spent_outpoints {
            if self.spent.contains_key(outpoint) {
                return Err(MempoolError::new(
                    MempoolErrorKind::Conflict,
                    "input already spent by a mempool transaction",
                ));
            }
        }

        let inserted_txid = entry.txid;
        for outpoint in &entry.spent_outpoints {
            self.spent.insert(*outpoint, inserted_txid);
        }
        for parent in &entry.parents {
            let children = self.children.entry(*parent).or_default();
            if !children.contains(&inserted_txid) {
                children.push(inserted_txid);
            }
        }
        self.total_bytes = self.total_bytes.saturating_add(entry.size);
        self.entries.insert(inserted_txid, entry);

        if self.max_bytes > 0 && self.total_bytes > self.max_bytes {
            self.evict_to_fit();
        }
        if self.max_bytes > 0 && !self.entries.contains_key(&inserted_txid) {
            return Err(MempoolError::new(
                MempoolErrorKind::MempoolFull,
                "mempool full",
            ));
        }

        Ok(())
    }

    pub fn remove(&mut self, txid: &Hash256) -> Option<MempoolEntry> {
        let entry = self.entries.remove(txid)?;
        self.total_bytes = self.total_bytes.saturating_sub(entry.size);
        for outpoint in &entry.spent_outpoints {
            if self.spent.get(outpoint) == Some(txid) {
                self.spent.remove(outpoint);
            }
        }
        for parent in &entry.parents {
            let drop_parent = match self.children.get_mut(parent) {
                Some(children) => {
                    children.retain(|child| child != txid);
                    children.is_empty()
                }
                None => false,
            };
            if drop_parent {
                self.children.remove(parent);
            }
        }
        if let Some(children) = self.children.remove(txid) {
            for child in children {
                if let Some(child_entry) = self.entries.get_mut(&child) {
                    child_entry.parents.retain(|parent| parent != txid);
                }
            }
        }
        Some(entry)
    }

    pub fn remove_with_descendants(&mut self, txid: &Hash256) -> Vec<MempoolEntry> {
        let mut visited: HashSet<Hash256> = HashSet::new();
        let mut order: Vec<Hash256> = Vec::new();

        fn visit(
            mempool: &Mempool,
            txid: Hash256,
            visited: &mut HashSet<Hash256>,
            order: &mut Vec<Hash256>,
        ) {
            if !visited.insert(txid) {
                return;
            }
            if let Some(children) = mempool.children.get(&txid) {
                for child in children {
                    visit(mempool, *child, visited, order);
                }
            }
            order.push(txid);
        }

        visit(self, *txid, &mut visited, &mut order);

        let mut removed = Vec::new();
        for txid in order {
            if let Some(entry) = self.remove(&txid) {
                removed.push(entry);
            }
        }
        removed
    }

    /// Purge after a block connects: transactions included in the block
    /// leave the pool (their descendants stay, now backed by confirmed
    /// outputs), and transactions conflicting with a confirmed spend
    /// leave together with everything built on top of them.
    pub fn remove_for_block(&mut self, txs: &[Transaction]) -> Vec<Hash256> {
        let mut removed = Vec::new();
        for tx in txs {
            let txid = tx.txid();
            if self.remove(&txid).is_some() {
                removed.push(txid);
            }
            for input in &tx.vin {
                if let Some(conflict) = self.spender(&input.prevout) {
                    removed.extend(
                        self.remove_with_descendants(&conflict)
                            .into_iter()
                            .map(|entry| entry.txid),
                    );
                }
            }
        }
        removed
    }

    fn evict_to_fit(&mut self) {
        let mut candidates: Vec<(Hash256, i64, usize, u64)> = self
            .entries
            .values()
            .map(|entry| (entry.txid, entry.fee, entry.size.max(1), entry.time))
            .collect();

        // Lowest feerate first, oldest breaking ties.
        candidates.sort_by(|a, b| {
            let left = i128::from(a.1).saturating_mul(b.2 as i128);
            let right = i128::from(b.1).saturating_mul(a.2 as i128);
            match left.cmp(&right) {
                std::cmp::Ordering::Equal => match a.3.cmp(&b.3) {
                    std::cmp::Ordering::Equal => a.0.cmp(&b.0),
                    other => other,
                },
                other => other,
            }
        });

        for (txid, _, _, _) in candidates {
            if self.total_bytes <= self.max_bytes {
                break;
            }
            let removed = self.remove_with_descendants(&txid);
            if !removed.is_empty() {
                veld_log::log_debug!("evicted {} transaction(s) to fit mempool", removed.len());
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use veld_primitives::transaction::{TxIn, TxOut};

    fn hash(byte: u8) -> Hash256 {
        [byte; 32]
    }

    fn dummy_tx(vin: Vec<TxIn>, value: i64) -> Transaction {
        Transaction {
            version: 1,
            vin,
            vout: vec![TxOut {
                value,
                script_pubkey: vec![0x51],
            }],
            lock_time: 0,
        }
    }

    fn entry_for(tx: Transaction, fee: i64) -> MempoolEntry {
        let spent_outpoints = tx.vin.iter().map(|input| input.prevout).collect();
        MempoolEntry {
            txid: tx.txid(),
            tx,
            time: 0,
            height: 0,
            fee,
            size: 100,
            spent_outpoints,
            parents: Vec::new(),
        }
    }

    #[test]
    fn conflicting_insert_is_rejected() {
        let outpoint = OutPoint::new(hash(9), 0);
        let mut mempool = Mempool::new(0);
        let first = entry_for(dummy_tx(vec![TxIn::new(outpoint, Vec::new())], 1), 0);
        let first_txid = first.txid;
        mempool.insert(first).expect("insert first spend");

        let second = entry_for(dummy_tx(vec![TxIn::new(outpoint, Vec::new())], 2), 0);
        let err = mempool.insert(second).expect_err("second spend conflicts");
        assert_eq!(err.kind, MempoolErrorKind::Conflict);
        assert_eq!(mempool.spender(&outpoint), Some(first_txid));
    }

    #[test]
    fn remove_with_descendants_removes_entire_subtree() {
        let mut mempool = Mempool::new(0);
        let parent = entry_for(
            dummy_tx(vec![TxIn::new(OutPoint::new(hash(9), 0), Vec::new())], 50),
            0,
        );
        let parent_txid = parent.txid;
        mempool.insert(parent).expect("insert parent");

        let mut child = entry_for(
            dummy_tx(
                vec![TxIn::new(OutPoint::new(parent_txid, 0), Vec::new())],
                25,
            ),
            0,
        );
        child.parents = vec![parent_txid];
        let child_txid = child.txid;
        mempool.insert(child).expect("insert child");

        let removed = mempool.remove_with_descendants(&parent_txid);
        let removed_ids: HashSet<Hash256> = removed.into_iter().map(|entry| entry.txid).collect();
        assert!(removed_ids.contains(&parent_txid));
        assert!(removed_ids.contains(&child_txid));
        assert_eq!(mempool.size(), 0);
    }

    #[test]
    fn remove_for_block_purges_conflicts_but_keeps_descendants_of_included() {
        let confirmed_outpoint = OutPoint::new(hash(7), 0);
        let conflict_target = OutPoint::new(hash(8), 0);
        let mut mempool = Mempool::new(0);

        let included_tx = dummy_tx(vec![TxIn::new(confirmed_outpoint, Vec::new())], 10);
        let included_txid = included_tx.txid();
        mempool
            .insert(entry_for(included_tx.clone(), 0))
            .expect("insert included");

        let mut child = entry_for(
            dummy_tx(
                vec![TxIn::new(OutPoint::new(included_txid, 0), Vec::new())],
                5,
            ),
            0,
        );
        child.parents = vec![included_txid];
        let child_txid = child.txid;
        mempool.insert(child).expect("insert child");

        let conflict = entry_for(dummy_tx(vec![TxIn::new(conflict_target, Vec::new())], 20), 0);
        let conflict_txid = conflict.txid;
        mempool.insert(conflict).expect("insert conflict");

        // The connected block contains the included transaction and a
        // different spend of the conflict target.
        let conflicting_block_tx = dummy_tx(vec![TxIn::new(conflict_target, Vec::new())], 30);
        let removed = mempool.remove_for_block(&[included_tx, conflicting_block_tx]);

        assert!(removed.contains(&included_txid));
        assert!(removed.contains(&conflict_txid));
        assert!(!mempool.contains(&conflict_txid));
        assert!(
            mempool.contains(&child_txid),
            "descendant of an included transaction stays resident"
        );
    }

    #[test]
    fn eviction_keeps_pool_under_byte_limit() {
        let mut mempool = Mempool::new(250);
        let low = entry_for(
            dummy_tx(vec![TxIn::new(OutPoint::new(hash(9), 0), Vec::new())], 1),
            1,
        );
        let low_txid = low.txid;
        mempool.insert(low).expect("insert low fee");
        mempool
            .insert(entry_for(
                dummy_tx(vec![TxIn::new(OutPoint::new(hash(9), 1), Vec::new())], 2),
                1_000,
            ))
            .expect("insert mid fee");
        let _ = mempool.insert(entry_for(
            dummy_tx(vec![TxIn::new(OutPoint::new(hash(9), 2), Vec::new())], 3),
            10_000,
        ));
        assert!(mempool.bytes() <= 250);
        assert!(!mempool.contains(&low_txid), "lowest feerate evicted first");
    }
}
