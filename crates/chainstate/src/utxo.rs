//! UTXO set logic backed by the storage trait.

use veld_consensus::Hash256;
use veld_primitives::encoding::{DecodeError, Decoder, Encoder};
use veld_primitives::outpoint::OutPoint;
use veld_storage::{Column, KeyValueStore, StoreError, WriteBatch};

pub const OUTPOINT_KEY_LEN: usize = 36;

/// A single unspent transaction output plus the metadata validation
/// needs: its value, locking script, creation height, and whether it
/// was created by a coinbase.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Coin {
    pub value: i64,
    pub script_pubkey: Vec<u8>,
    pub height: u32,
    pub is_coinbase: bool,
}

impl Coin {
    pub fn encode(&self) -> Vec<u8> {
        let mut encoder = Encoder::new();
        encoder.write_i64_le(self.value);
        encoder.write_var_bytes(&self.script_pubkey);
        encoder.write_u32_le(self.height);
        encoder.write_u8(if self.is_coinbase { 1 } else { 0 });
        encoder.into_inner()
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, DecodeError> {
        let mut decoder = Decoder::new(bytes);
        let value = decoder.read_i64_le()?;
        let script_pubkey = decoder.read_var_bytes()?;
        let height = decoder.read_u32_le()?;
        let is_coinbase = decoder.read_u8()? != 0;
        if !decoder.is_empty() {
            return Err(DecodeError::TrailingBytes);
        }
        Ok(Self {
            value,
            script_pubkey,
            height,
            is_coinbase,
        })
    }
}

/// Read-only view of some UTXO state: the confirmed tip, a
/// hypothetical tip-plus-mempool overlay, or a partially connected
/// block. Absent and already-spent outputs are indistinguishable
/// through this interface; both answer `None`.
pub trait CoinView {
    fn coin(&self, outpoint: &OutPoint) -> Result<Option<Coin>, StoreError>;

    /// Identifier of the chain state this view reflects.
    fn best_block_hash(&self) -> Hash256;
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub struct OutPointKey([u8; OUTPOINT_KEY_LEN]);

impl OutPointKey {
    pub fn new(outpoint: &OutPoint) -> Self {
        let mut bytes = [0u8; OUTPOINT_KEY_LEN];
        bytes[..32].copy_from_slice(&outpoint.txid);
        bytes[32..].copy_from_slice(&outpoint.vout.to_le_bytes());
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8] {
        self.0.as_slice()
    }
}

pub fn outpoint_key_bytes(outpoint: &OutPoint) -> OutPointKey {
    OutPointKey::new(outpoint)
}

pub struct UtxoSet<S> {
    store: S,
}

impl<S> UtxoSet<S> {
    pub fn new(store: S) -> Self {
        Self { store }
    }
}

impl<S: KeyValueStore> UtxoSet<S> {
    pub fn get(&self, outpoint: &OutPoint) -> Result<Option<Coin>, StoreError> {
        let key = outpoint_key_bytes(outpoint);
        match self.store.get(Column::Utxo, key.as_bytes())? {
            Some(bytes) => Ok(Some(
                Coin::decode(&bytes).map_err(|err| StoreError::Backend(err.to_string()))?,
            )),
            None => Ok(None),
        }
    }

    pub fn put(&self, batch: &mut WriteBatch, outpoint: &OutPoint, coin: &Coin) {
        let key = outpoint_key_bytes(outpoint);
        batch.put(Column::Utxo, key.as_bytes(), coin.encode());
    }

    pub fn delete(&self, batch: &mut WriteBatch, outpoint: &OutPoint) {
        let key = outpoint_key_bytes(outpoint);
        batch.delete(Column::Utxo, key.as_bytes());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn coin_round_trip() {
        let coin = Coin {
            value: 11 * 1_000_000,
            script_pubkey: vec![0x51, 0xac],
            height: 42,
            is_coinbase: true,
        };
        let decoded = Coin::decode(&coin.encode()).expect("decode coin");
        assert_eq!(decoded, coin);
    }

    #[test]
    fn coin_decode_rejects_trailing_bytes() {
        let coin = Coin {
            value: 1,
            script_pubkey: Vec::new(),
            height: 0,
            is_coinbase: false,
        };
        let mut bytes = coin.encode();
        bytes.push(0);
        assert!(Coin::decode(&bytes).is_err());
    }
}
