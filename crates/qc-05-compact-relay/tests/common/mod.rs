//! Shared fixtures for compact relay integration tests.

#![allow(dead_code)]

use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use qc_05_compact_relay::adapters::{InMemoryTransactionPools, ManualTimeSource};
use qc_05_compact_relay::ports::{
    BlockStore, ConsensusGateway, HeaderCheck, InFlightTracker, PeerNetwork,
};
use qc_05_compact_relay::{CompactRelayService, PeerId, RelayConfig, RelayError, RelayMessage};
use shared_types::{Block, BlockHeader, Hash, OutPoint, Transaction, TransactionRef, TxIn, TxOut};

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

// =============================================================================
// MOCK PORTS
// =============================================================================

#[derive(Default)]
pub struct MockStore {
    pub blocks: Mutex<HashMap<Hash, Block>>,
}

impl MockStore {
    pub fn store(&self, block: Block) {
        self.blocks.lock().insert(block.hash(), block);
    }
}

impl BlockStore for MockStore {
    fn has_block_index(&self, block_hash: &Hash) -> bool {
        self.blocks.lock().contains_key(block_hash)
    }

    fn read_block(&self, block_hash: &Hash) -> Option<Block> {
        self.blocks.lock().get(block_hash).cloned()
    }

    fn has_block_on_disk(&self, block_hash: &Hash) -> bool {
        self.blocks.lock().contains_key(block_hash)
    }
}

#[derive(Default)]
pub struct MockConsensus {
    pub processed: Mutex<Vec<(PeerId, Block)>>,
}

impl ConsensusGateway for MockConsensus {
    fn check_header(&self, _header: &BlockHeader) -> HeaderCheck {
        HeaderCheck::Valid
    }

    fn process_block(&self, peer: PeerId, block: Block) {
        self.processed.lock().push((peer, block));
    }
}

#[derive(Default)]
pub struct MockNetwork {
    pub sent: Mutex<Vec<(PeerId, RelayMessage)>>,
    pub blocks_sent: Mutex<Vec<(PeerId, Hash)>>,
    pub full_requests: Mutex<Vec<(PeerId, Hash)>>,
    pub disconnected: Mutex<Vec<PeerId>>,
    pub penalties: Mutex<Vec<(PeerId, u32)>>,
}

impl MockNetwork {
    /// Take everything sent so far.
    pub fn drain_sent(&self) -> Vec<(PeerId, RelayMessage)> {
        std::mem::take(&mut *self.sent.lock())
    }

    pub fn total_penalty(&self, peer: PeerId) -> u32 {
        self.penalties
            .lock()
            .iter()
            .filter(|(p, _)| *p == peer)
            .map(|(_, score)| score)
            .sum()
    }
}

impl PeerNetwork for MockNetwork {
    fn supports_compact_blocks(&self, _peer: PeerId) -> bool {
        true
    }

    fn is_trusted_upstream(&self, _peer: PeerId) -> bool {
        false
    }

    fn send(&self, peer: PeerId, message: RelayMessage) -> Result<(), RelayError> {
        self.sent.lock().push((peer, message));
        Ok(())
    }

    fn send_block(&self, peer: PeerId, block: &Block) -> Result<(), RelayError> {
        self.blocks_sent.lock().push((peer, block.hash()));
        Ok(())
    }

    fn request_full_block(&self, peer: PeerId, block_hash: Hash) {
        self.full_requests.lock().push((peer, block_hash));
    }

    fn disconnect(&self, peer: PeerId) {
        self.disconnected.lock().push(peer);
    }

    fn penalize(&self, peer: PeerId, score: u32, _reason: &str) {
        self.penalties.lock().push((peer, score));
    }
}

#[derive(Default)]
pub struct MockInFlight {
    pub requested: Mutex<HashSet<(PeerId, Hash)>>,
}

impl MockInFlight {
    pub fn request(&self, peer: PeerId, block_hash: Hash) {
        self.requested.lock().insert((peer, block_hash));
    }
}

impl InFlightTracker for MockInFlight {
    fn is_in_flight(&self, peer: PeerId, block_hash: &Hash) -> bool {
        self.requested.lock().contains(&(peer, *block_hash))
    }

    fn requested_at(&self, _peer: PeerId, _block_hash: &Hash) -> Option<u64> {
        None
    }

    fn clear(&self, block_hash: &Hash) {
        self.requested.lock().retain(|(_, hash)| hash != block_hash);
    }
}

// =============================================================================
// NODE HARNESS
// =============================================================================

pub type Service = CompactRelayService<
    InMemoryTransactionPools,
    MockStore,
    MockConsensus,
    MockNetwork,
    MockInFlight,
    ManualTimeSource,
>;

/// One node: a service plus handles on every port it talks to.
pub struct Node {
    pub service: Service,
    pub pools: Arc<InMemoryTransactionPools>,
    pub store: Arc<MockStore>,
    pub consensus: Arc<MockConsensus>,
    pub network: Arc<MockNetwork>,
    pub in_flight: Arc<MockInFlight>,
    pub clock: Arc<ManualTimeSource>,
}

impl Node {
    pub fn new(config: RelayConfig) -> Self {
        init_tracing();
        let pools = Arc::new(InMemoryTransactionPools::new());
        let store = Arc::new(MockStore::default());
        let consensus = Arc::new(MockConsensus::default());
        let network = Arc::new(MockNetwork::default());
        let in_flight = Arc::new(MockInFlight::default());
        let clock = Arc::new(ManualTimeSource::new(1_700_000_000_000));
        let service = CompactRelayService::new(
            config,
            pools.clone(),
            store.clone(),
            consensus.clone(),
            network.clone(),
            in_flight.clone(),
            clock.clone(),
        )
        .expect("valid config");
        Self {
            service,
            pools,
            store,
            consensus,
            network,
            in_flight,
            clock,
        }
    }
}

// =============================================================================
// CHAIN FIXTURES
// =============================================================================

pub fn peer(n: u8) -> PeerId {
    PeerId::new([n; 32])
}

pub fn payment(seed: u32) -> TransactionRef {
    let mut txid = [0u8; 32];
    txid[..4].copy_from_slice(&seed.to_le_bytes());
    Arc::new(Transaction {
        version: 2,
        inputs: vec![TxIn {
            prevout: OutPoint { txid, index: 0 },
            script_sig: vec![0x47; 72],
            sequence: 0xFFFF_FFFE,
        }],
        outputs: vec![
            TxOut {
                value: 10_000 + i64::from(seed),
                script_pubkey: vec![0x76, 0xA9, 0x14, 0x00, 0x88, 0xAC],
            },
            TxOut {
                value: 5_000,
                script_pubkey: vec![0x00, 0x14, 0x01],
            },
        ],
        lock_time: 0,
    })
}

/// Coinbase followed by `count` payments starting at `first_seed`.
pub fn block_of(first_seed: u32, count: u32) -> Block {
    let mut transactions = vec![Arc::new(Transaction::new_coinbase(
        &first_seed.to_le_bytes(),
        50_0000_0000,
        vec![0x51],
    ))];
    transactions.extend((first_seed..first_seed + count).map(payment));
    Block::new(
        BlockHeader {
            version: 0x2000_0000,
            prev_block: [0x11; 32],
            time: 1_700_000_000,
            bits: 0x1D00_FFFF,
            ..Default::default()
        },
        transactions,
    )
}
