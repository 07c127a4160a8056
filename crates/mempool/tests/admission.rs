use std::sync::Arc;

use secp256k1::{Message, PublicKey, Secp256k1, SecretKey};
use veld_chainstate::scriptcache::ScriptExecutionCache;
use veld_chainstate::state::{ChainState, ChainStateError, ConnectedBlock};
use veld_chainstate::validation::{merkle_root, script_push_int};
use veld_consensus::money::{CENT, COIN};
use veld_consensus::params::{consensus_params, ConsensusParams, Network};
use veld_consensus::rewards::block_subsidy;
use veld_consensus::Hash256;
use veld_mempool::{accept_to_mempool, Mempool, MempoolErrorKind, MempoolPolicy};
use veld_primitives::block::{Block, BlockHeader};
use veld_primitives::outpoint::OutPoint;
use veld_primitives::transaction::{Transaction, TxIn, TxOut};
use veld_script::sighash::{fork_value, signature_hash, SighashType, SIGHASH_ALL, SIGHASH_FORKID};
use veld_script::standard::p2pk_script;
use veld_storage::memory::MemoryStore;

const OP_1: u8 = 0x51;
const OP_IF: u8 = 0x63;
const OP_ENDIF: u8 = 0x68;
const OP_NOP10: u8 = 0xb9;

struct TestNode {
    chain: ChainState<Arc<MemoryStore>>,
    mempool: Mempool,
    policy: MempoolPolicy,
    cache: ScriptExecutionCache,
    params: ConsensusParams,
    secret: SecretKey,
    pubkey: Vec<u8>,
    coinbase_txids: Vec<Hash256>,
}

impl TestNode {
    fn new(blocks: usize) -> Self {
        let secp = Secp256k1::new();
        let secret = SecretKey::from_slice(&[0x42; 32]).expect("secret key");
        let pubkey = PublicKey::from_secret_key(&secp, &secret).serialize().to_vec();
        let mut this = Self {
            chain: ChainState::new(Arc::new(MemoryStore::new())),
            mempool: Mempool::new(0),
            policy: MempoolPolicy::standard(0, true),
            cache: ScriptExecutionCache::with_salt(1 << 12, [9u8; 32]),
            params: consensus_params(Network::Regtest),
            secret,
            pubkey,
            coinbase_txids: Vec::new(),
        };
        for _ in 0..blocks {
            this.mine(Vec::new()).expect("mine setup block");
        }
        this
    }

    fn tip_hash(&self) -> Hash256 {
        self.chain
            .best_block()
            .expect("tip")
            .map(|tip| tip.hash)
            .unwrap_or([0u8; 32])
    }

    fn build_block(&self, txs: Vec<Transaction>) -> Block {
        let height = self
            .chain
            .best_block()
            .expect("tip")
            .map(|tip| tip.height + 1)
            .unwrap_or(0);
        let mut script_sig = script_push_int(height as i64);
        script_sig.push(0x00);
        let coinbase = Transaction {
            version: 1,
            vin: vec![TxIn {
                prevout: OutPoint::null(),
                script_sig,
                sequence: u32::MAX,
            }],
            vout: vec![TxOut {
                value: block_subsidy(height, &self.params),
                script_pubkey: p2pk_script(&self.pubkey),
            }],
            lock_time: 0,
        };
        let mut transactions = vec![coinbase];
        transactions.extend(txs);
        let txids: Vec<Hash256> = transactions.iter().map(|tx| tx.txid()).collect();
        let (root, _) = merkle_root(&txids);
        Block {
            header: BlockHeader {
                version: 1,
                prev_block: self.tip_hash(),
                merkle_root: root,
                time: 1_700_000_000 + height as u32,
                bits: 0x207fffff,
                nonce: 0,
            },
            transactions,
        }
    }

    /// Connect a block and run the post-connection mempool purge the
    /// node loop performs.
    fn mine(&mut self, txs: Vec<Transaction>) -> Result<ConnectedBlock, ChainStateError> {
        let block = self.build_block(txs);
        let connected = self.chain.connect_block(&block, &self.params, &self.cache)?;
        self.mempool.remove_for_block(&block.transactions);
        self.coinbase_txids.push(connected.txids[0]);
        Ok(connected)
    }

    fn accept(&mut self, tx: Transaction) -> Result<Hash256, veld_mempool::MempoolError> {
        accept_to_mempool(
            &self.chain,
            &mut self.mempool,
            &self.policy,
            &self.cache,
            tx,
        )
    }

    fn signed_spend(&self, prevout: OutPoint, value: i64, outputs: Vec<TxOut>) -> Transaction {
        let lock = p2pk_script(&self.pubkey);
        let mut tx = Transaction {
            version: 1,
            vin: vec![TxIn {
                prevout,
                script_sig: Vec::new(),
                sequence: u32::MAX,
            }],
            vout: outputs,
            lock_time: 0,
        };
        let digest = signature_hash(
            &tx,
            0,
            &lock,
            value,
            SighashType(SIGHASH_ALL | SIGHASH_FORKID),
            fork_value(0),
            true,
            None,
        )
        .expect("signature hash");
        let secp = Secp256k1::new();
        let msg = Message::from_digest_slice(&digest).expect("digest");
        let sig = secp.sign_ecdsa(&msg, &self.secret);
        let mut bytes = sig.serialize_der().to_vec();
        bytes.push((SIGHASH_ALL | SIGHASH_FORKID) as u8);
        let mut script_sig = Vec::with_capacity(bytes.len() + 1);
        script_sig.push(bytes.len() as u8);
        script_sig.extend_from_slice(&bytes);
        tx.vin[0].script_sig = script_sig;
        tx
    }

    fn pay(&self, value: i64) -> Vec<TxOut> {
        vec![TxOut {
            value,
            script_pubkey: p2pk_script(&self.pubkey),
        }]
    }
}

/// Skipping validation of transactions that were validated going into
/// the pool must not let double-spends in blocks pass.
#[test]
fn tx_mempool_block_doublespend() {
    let mut node = TestNode::new(102);
    let funding = OutPoint::new(node.coinbase_txids[1], 0);
    let spend_1 = node.signed_spend(funding, 50 * COIN, node.pay(11 * CENT));
    let spend_2 = node.signed_spend(funding, 50 * COIN, node.pay(12 * CENT));

    // A block with both spends is rejected outright.
    let before = node.tip_hash();
    assert!(node.mine(vec![spend_1.clone(), spend_2.clone()]).is_err());
    assert_eq!(node.tip_hash(), before);

    // ... and still rejected when the first spend is pool-resident.
    node.accept(spend_1.clone()).expect("admit first spend");
    assert!(node.mine(vec![spend_1.clone(), spend_2.clone()]).is_err());
    assert_eq!(node.tip_hash(), before);
    node.mempool.remove_with_descendants(&spend_1.txid());

    // ... and when the second one is.
    node.accept(spend_2.clone()).expect("admit second spend");
    assert!(node.mine(vec![spend_1.clone(), spend_2.clone()]).is_err());
    assert_eq!(node.tip_hash(), before);
    node.mempool.remove_with_descendants(&spend_2.txid());

    // One spend in the pool, the other confirmed: fine, and the pool
    // loser is purged by the connection.
    node.accept(spend_2).expect("admit second spend again");
    node.mine(vec![spend_1]).expect("block with first spend connects");
    assert_eq!(node.mempool.size(), 0, "conflicting pool spend purged");
}

#[test]
fn conflicting_admission_is_rejected_before_scripts() {
    let mut node = TestNode::new(102);
    let funding = OutPoint::new(node.coinbase_txids[1], 0);
    let spend_1 = node.signed_spend(funding, 50 * COIN, node.pay(11 * CENT));
    // Deliberately unsigned: the conflict check must fire first.
    let mut spend_2 = node.signed_spend(funding, 50 * COIN, node.pay(12 * CENT));
    spend_2.vin[0].script_sig = vec![OP_1];

    node.accept(spend_1).expect("admit first spend");
    let err = node.accept(spend_2).expect_err("conflicting spend");
    assert_eq!(err.kind, MempoolErrorKind::Conflict);
}

#[test]
fn missing_input_reports_outpoint() {
    let mut node = TestNode::new(102);
    let phantom = OutPoint::new([0x55; 32], 3);
    let spend = node.signed_spend(phantom, 50 * COIN, node.pay(11 * CENT));

    let err = node.accept(spend).expect_err("no such output");
    assert_eq!(err.kind, MempoolErrorKind::MissingInput);
    assert_eq!(err.missing_inputs, vec![phantom]);
}

#[test]
fn premature_coinbase_spend_is_rejected() {
    let mut node = TestNode::new(50);
    let funding = OutPoint::new(node.coinbase_txids[49], 0);
    let spend = node.signed_spend(funding, 50 * COIN, node.pay(11 * CENT));
    let err = node.accept(spend).expect_err("immature coinbase");
    assert_eq!(err.kind, MempoolErrorKind::InvalidTransaction);
}

/// A script that is policy-invalid but consensus-valid stays out of the
/// pool yet still confirms in a block.
#[test]
fn upgradable_nop_rejected_by_policy_accepted_in_block() {
    let mut node = TestNode::new(102);
    let funding = OutPoint::new(node.coinbase_txids[1], 0);

    let noppy_lock = vec![OP_IF, OP_NOP10, OP_ENDIF, OP_1];
    let funding_tx = node.signed_spend(
        funding,
        50 * COIN,
        vec![TxOut {
            value: 20 * CENT,
            script_pubkey: noppy_lock,
        }],
    );
    let noppy_outpoint = OutPoint::new(funding_tx.txid(), 0);
    node.mine(vec![funding_tx]).expect("fund noppy output");

    let spend = Transaction {
        version: 1,
        vin: vec![TxIn {
            prevout: noppy_outpoint,
            script_sig: vec![OP_1],
            sequence: u32::MAX,
        }],
        vout: node.pay(11 * CENT),
        lock_time: 0,
    };

    let err = node.accept(spend.clone()).expect_err("policy discourages the nop");
    assert_eq!(err.kind, MempoolErrorKind::NonStandard);

    node.mine(vec![spend])
        .expect("block carrying the consensus-valid spend connects");
}

/// Pool admission records the transaction under the consensus flag
/// set, so connecting a block containing it skips script execution via
/// the cache and still succeeds.
#[test]
fn mempool_admission_prewarms_block_connection() {
    let mut node = TestNode::new(102);
    let funding = OutPoint::new(node.coinbase_txids[1], 0);
    let spend = node.signed_spend(funding, 50 * COIN, node.pay(11 * CENT));
    let txid = node.accept(spend.clone()).expect("admit spend");

    use veld_script::flags::{MANDATORY_SCRIPT_VERIFY_FLAGS, STANDARD_SCRIPT_VERIFY_FLAGS};
    assert!(node.cache.contains(&txid, STANDARD_SCRIPT_VERIFY_FLAGS));
    assert!(node.cache.contains(&txid, MANDATORY_SCRIPT_VERIFY_FLAGS));

    node.mine(vec![spend]).expect("cache-hit connection");
    assert_eq!(node.mempool.size(), 0, "included transaction purged");
}

#[test]
fn insufficient_fee_is_rejected() {
    let mut node = TestNode::new(102);
    node.policy = MempoolPolicy::standard(1_000, true);
    let funding = OutPoint::new(node.coinbase_txids[1], 0);
    // Pay the full input value: zero fee.
    let spend = node.signed_spend(funding, 50 * COIN, node.pay(50 * COIN));

    let err = node.accept(spend).expect_err("zero fee below relay minimum");
    assert_eq!(err.kind, MempoolErrorKind::InsufficientFee);
}

#[test]
fn unconfirmed_parent_chains_are_admitted() {
    let mut node = TestNode::new(102);
    let funding = OutPoint::new(node.coinbase_txids[1], 0);
    let parent = node.signed_spend(funding, 50 * COIN, node.pay(20 * CENT));
    let parent_txid = node.accept(parent).expect("admit parent");

    let child = node.signed_spend(OutPoint::new(parent_txid, 0), 20 * CENT, node.pay(11 * CENT));
    node.accept(child).expect("child spends unconfirmed parent");
    assert_eq!(node.mempool.size(), 2);
}
