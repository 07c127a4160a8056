use std::sync::Arc;

use secp256k1::{Message, PublicKey, Secp256k1, SecretKey};
use veld_chainstate::scriptcache::ScriptExecutionCache;
use veld_chainstate::state::{ChainState, ChainStateError, ConnectedBlock};
use veld_chainstate::validation::{merkle_root, script_push_int};
use veld_consensus::money::{CENT, COIN};
use veld_consensus::params::{consensus_params, ConsensusParams, Network};
use veld_consensus::rewards::block_subsidy;
use veld_consensus::Hash256;
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

struct TestChain {
    chain: ChainState<Arc<MemoryStore>>,
    cache: ScriptExecutionCache,
    params: ConsensusParams,
    secret: SecretKey,
    pubkey: Vec<u8>,
    coinbase_txids: Vec<Hash256>,
}

impl TestChain {
    /// Build a fresh chain with `blocks` connected blocks, every
    /// coinbase paying p2pk to the test key.
    fn new(blocks: usize) -> Self {
        let secp = Secp256k1::new();
        let secret = SecretKey::from_slice(&[0x42; 32]).expect("secret key");
        let pubkey = PublicKey::from_secret_key(&secp, &secret).serialize().to_vec();
        let mut this = Self {
            chain: ChainState::new(Arc::new(MemoryStore::new())),
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

    fn next_height(&self) -> i32 {
        self.chain
            .best_block()
            .expect("tip")
            .map(|tip| tip.height + 1)
            .unwrap_or(0)
    }

    fn tip_hash(&self) -> Hash256 {
        self.chain
            .best_block()
            .expect("tip")
            .map(|tip| tip.hash)
            .unwrap_or([0u8; 32])
    }

    fn build_block(&self, txs: Vec<Transaction>) -> Block {
        let height = self.next_height();
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

    fn mine(&mut self, txs: Vec<Transaction>) -> Result<ConnectedBlock, ChainStateError> {
        let block = self.build_block(txs);
        let connected = self.chain.connect_block(&block, &self.params, &self.cache)?;
        self.coinbase_txids.push(connected.txids[0]);
        Ok(connected)
    }

    /// Spend of a p2pk output, signed with the test key.
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

#[test]
fn spend_of_mature_coinbase_connects() {
    let mut chain = TestChain::new(102);
    let funding = OutPoint::new(chain.coinbase_txids[1], 0);
    let spend = chain.signed_spend(funding, 50 * COIN, chain.pay(11 * CENT));
    let spend_txid = spend.txid();

    let connected = chain.mine(vec![spend]).expect("block with spend connects");
    assert_eq!(connected.height, 102);
    assert_eq!(connected.fees, 50 * COIN - 11 * CENT);

    // The spent coin is gone, the new coin exists.
    assert!(chain.chain.coin(&funding).expect("lookup").is_none());
    let created = chain
        .chain
        .coin(&OutPoint::new(spend_txid, 0))
        .expect("lookup")
        .expect("created output");
    assert_eq!(created.value, 11 * CENT);
    assert!(!created.is_coinbase);
}

#[test]
fn block_with_double_spend_is_rejected() {
    let mut chain = TestChain::new(102);
    let funding = OutPoint::new(chain.coinbase_txids[1], 0);
    let spend_a = chain.signed_spend(funding, 50 * COIN, chain.pay(11 * CENT));
    let spend_b = chain.signed_spend(funding, 50 * COIN, chain.pay(12 * CENT));

    let before = chain.tip_hash();
    let err = chain
        .mine(vec![spend_a, spend_b])
        .expect_err("both spends of one output cannot confirm");
    assert!(matches!(
        err,
        ChainStateError::Inputs { .. } | ChainStateError::MissingInput
    ));
    assert_eq!(chain.tip_hash(), before, "tip unchanged on rejection");
    assert!(
        chain.chain.coin(&funding).expect("lookup").is_some(),
        "utxo intact on rejection"
    );
}

#[test]
fn immature_coinbase_spend_is_rejected() {
    let mut chain = TestChain::new(10);
    let funding = OutPoint::new(chain.coinbase_txids[9], 0);
    let spend = chain.signed_spend(funding, 50 * COIN, chain.pay(11 * CENT));

    let err = chain.mine(vec![spend]).expect_err("coinbase not yet mature");
    assert!(matches!(err, ChainStateError::Inputs { .. }));
}

#[test]
fn in_block_chained_spend_connects() {
    let mut chain = TestChain::new(102);
    let funding = OutPoint::new(chain.coinbase_txids[1], 0);
    let parent = chain.signed_spend(funding, 50 * COIN, chain.pay(20 * CENT));
    let child = chain.signed_spend(OutPoint::new(parent.txid(), 0), 20 * CENT, chain.pay(11 * CENT));

    chain
        .mine(vec![parent, child])
        .expect("child may spend parent created in the same block");
}

#[test]
fn consensus_only_script_connects_without_cache_entry() {
    let mut chain = TestChain::new(102);
    let funding = OutPoint::new(chain.coinbase_txids[1], 0);

    // Fund an output whose locking script trips the upgradable-nop
    // policy when spent.
    let noppy_lock = vec![OP_IF, OP_NOP10, OP_ENDIF, OP_1];
    let funding_tx = chain.signed_spend(
        funding,
        50 * COIN,
        vec![TxOut {
            value: 20 * CENT,
            script_pubkey: noppy_lock,
        }],
    );
    let noppy_outpoint = OutPoint::new(funding_tx.txid(), 0);
    chain.mine(vec![funding_tx]).expect("fund noppy output");

    let spend = Transaction {
        version: 1,
        vin: vec![TxIn {
            prevout: noppy_outpoint,
            script_sig: vec![OP_1],
            sequence: u32::MAX,
        }],
        vout: chain.pay(11 * CENT),
        lock_time: 0,
    };

    chain
        .mine(vec![spend])
        .expect("consensus flags accept the upgradable nop");
}

#[test]
fn coinbase_overpay_is_rejected() {
    let chain = TestChain::new(2);
    let mut block = chain.build_block(Vec::new());
    block.transactions[0].vout[0].value += 1;
    // Rebuild the merkle root so only the amount rule can fail.
    let txids: Vec<Hash256> = block.transactions.iter().map(|tx| tx.txid()).collect();
    let (root, _) = merkle_root(&txids);
    block.header.merkle_root = root;

    let err = chain
        .chain
        .connect_block(&block, &chain.params, &chain.cache)
        .expect_err("coinbase exceeds subsidy plus fees");
    assert!(matches!(err, ChainStateError::Validation(_)));
}

#[test]
fn stale_parent_is_rejected() {
    let chain = TestChain::new(3);
    let mut block = chain.build_block(Vec::new());
    block.header.prev_block = [0x77; 32];
    let err = chain
        .chain
        .connect_block(&block, &chain.params, &chain.cache)
        .expect_err("does not extend the tip");
    assert!(matches!(err, ChainStateError::UnknownParent));
}
