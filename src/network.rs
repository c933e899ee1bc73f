//! In-process network orchestrator
//!
//! Owns every peer, the simulated clock and the seeded RNG that drives latency,
//! miner selection and random traffic. Peers never touch each other; the network
//! delivers owned copies of transactions and blocks into their entry points.

use crate::block::merkle_root_of;
use crate::config::{ChainParams, SimConfig};
use crate::constants::{BLOCK_VERSION, GENESIS_MESSAGE};
use crate::error::{LedgerError, Result};
use crate::mining::MiningOutcome;
use crate::peer::{Peer, Reception};
use crate::reorganization::BlockOutcome;
use crate::types::*;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use rayon::prelude::*;
use serde::Serialize;
use std::collections::BTreeSet;
use tracing::{debug, info};

/// Outcome of one consensus round
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RoundReport {
    pub winner: usize,
    pub miners: Vec<usize>,
    pub block_hash: String,
    pub height: Natural,
    pub nonce: Natural,
    pub attempts: u64,
    pub duration_ms: u64,
    pub accepted: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PeerSummary {
    pub id: usize,
    pub online: bool,
    pub height: Natural,
    pub balance: u64,
    pub confirmed_balance: u64,
    pub mempool: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NetworkSummary {
    pub height: Natural,
    pub tip: String,
    pub time_ms: u64,
    pub rounds: usize,
    pub peers: Vec<PeerSummary>,
}

pub struct Network {
    peers: Vec<Peer>,
    offline: BTreeSet<usize>,
    config: SimConfig,
    params: ChainParams,
    rng: StdRng,
    time_ms: u64,
    time_spent: Vec<u64>,
    winners: Vec<usize>,
    consensus_peers: Option<Vec<usize>>,
}

impl Network {
    /// Genesis: create `peer_count` peers and fund each with `initial_value`
    ///
    /// 1. Each peer gets a fresh key, a seed and a hash rate drawn from the network RNG
    /// 2. One funding transaction pays every peer's address
    /// 3. Block 0 wraps it with bits 0 and timestamp 0
    /// 4. Every peer installs block 0 directly, bypassing block verification
    pub fn genesis(config: SimConfig) -> Result<Self> {
        config.validate()?;
        let params = config.chain_params();
        let rng = StdRng::seed_from_u64(config.seed);

        let mut network = Self {
            peers: Vec::with_capacity(config.peer_count),
            offline: BTreeSet::new(),
            config,
            params,
            rng,
            time_ms: 0,
            time_spent: Vec::new(),
            winners: Vec::new(),
            consensus_peers: None,
        };

        for _ in 0..network.config.peer_count {
            let peer = network.spawn_peer();
            network.peers.push(peer);
        }

        let funding = Transaction {
            inputs: vec![TxInput::coinbase(GENESIS_MESSAGE.to_vec())],
            outputs: network
                .peers
                .iter()
                .map(|p| TxOutput::new(p.address(), network.config.initial_value))
                .collect(),
            fee: 0,
            lock_time: 0,
        };
        let transactions = vec![funding];
        let genesis = Block {
            header: BlockHeader {
                version: BLOCK_VERSION,
                prev_hash: [0u8; 32],
                merkle_root: merkle_root_of(&transactions),
                timestamp: 0,
                bits: 0,
                nonce: 0,
            },
            transactions,
        };

        for peer in network.peers.iter_mut() {
            peer.install_genesis(genesis.clone());
        }

        info!(
            peers = network.peers.len(),
            value = network.config.initial_value,
            "Created network with genesis block"
        );
        Ok(network)
    }

    fn spawn_peer(&mut self) -> Peer {
        let id = self.peers.len();
        let seed: u64 = self.rng.gen();
        let hash_rate = self
            .rng
            .gen_range(self.config.hash_rate_min..=self.config.hash_rate_max);
        Peer::new(id, self.params.clone(), seed, hash_rate)
    }

    // ============================================================================
    // ACCESSORS
    // ============================================================================

    pub fn peers(&self) -> &[Peer] {
        &self.peers
    }

    pub fn peer(&self, id: usize) -> Result<&Peer> {
        self.peers.get(id).ok_or(LedgerError::UnknownPeer(id))
    }

    pub fn peer_mut(&mut self, id: usize) -> Result<&mut Peer> {
        self.peers.get_mut(id).ok_or(LedgerError::UnknownPeer(id))
    }

    pub fn len(&self) -> usize {
        self.peers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.peers.is_empty()
    }

    pub fn is_online(&self, id: usize) -> bool {
        id < self.peers.len() && !self.offline.contains(&id)
    }

    pub fn online_peers(&self) -> Vec<usize> {
        (0..self.peers.len()).filter(|id| !self.offline.contains(id)).collect()
    }

    pub fn config(&self) -> &SimConfig {
        &self.config
    }

    pub fn params(&self) -> &ChainParams {
        &self.params
    }

    /// Simulated time elapsed, in milliseconds
    pub fn time_ms(&self) -> u64 {
        self.time_ms
    }

    /// Winning duration of every round so far
    pub fn time_spent(&self) -> &[u64] {
        &self.time_spent
    }

    pub fn winners(&self) -> &[usize] {
        &self.winners
    }

    // ============================================================================
    // TRANSACTIONS
    // ============================================================================

    /// Submit `tx` at `originator` and deliver it to every other online peer.
    /// Returns how many receivers pooled it. Nothing is delivered if the originator
    /// rejects the transaction itself.
    pub fn broadcast_transaction(&mut self, tx: &Transaction, originator: usize) -> Result<usize> {
        self.peer(originator)?;
        if !self.peers[originator].submit_transaction(tx) {
            return Err(LedgerError::TransactionRejected(hex::encode(tx.id())));
        }
        if !self.is_online(originator) {
            return Ok(0);
        }

        let receivers: Vec<usize> = self
            .online_peers()
            .into_iter()
            .filter(|&id| id != originator)
            .collect();

        let r: f64 = self.rng.gen();
        let delayed_count = if r < self.config.slower_peer_fraction {
            2
        } else if r < self.config.slow_peer_fraction {
            1
        } else {
            0
        };
        let delayed: BTreeSet<usize> = receivers
            .choose_multiple(&mut self.rng, delayed_count)
            .copied()
            .collect();

        let mut accepted = 0;
        for id in receivers {
            if self.peers[id].receive_transaction(tx.clone(), delayed.contains(&id)) == Reception::Accepted {
                accepted += 1;
            }
        }

        info!(
            originator,
            tx = %hex::encode(&tx.id()[..8]),
            accepted,
            delayed = delayed.len(),
            "Broadcast transaction"
        );
        Ok(accepted)
    }

    /// Create a payment from `from` to `to`'s address and broadcast it
    pub fn transfer(&mut self, from: usize, to: usize, value: u64) -> Result<Transaction> {
        let to_address = self.peer(to)?.address().to_string();
        let tx = self.peer(from)?.create_transaction(&to_address, value)?;
        self.broadcast_transaction(&tx, from)?;
        Ok(tx)
    }

    /// Between 1 and n random payments of 0..=100 among the peers other than peer 0.
    /// Returns how many were broadcast.
    pub fn make_random_transactions(&mut self) -> usize {
        let candidates: Vec<usize> = self.online_peers().into_iter().filter(|&id| id != 0).collect();
        if candidates.is_empty() {
            return 0;
        }

        let k = self.rng.gen_range(1..=self.peers.len());
        let mut sent = 0;
        for _ in 0..k {
            let sender = candidates[self.rng.gen_range(0..candidates.len())];
            let receiver = candidates[self.rng.gen_range(0..candidates.len())];
            let value = self.rng.gen_range(0..=100);

            match self.transfer(sender, receiver, value) {
                Ok(_) => sent += 1,
                Err(e) => debug!(sender, receiver, value, error = %e, "Skipped random transaction"),
            }
        }
        sent
    }

    // ============================================================================
    // CONSENSUS
    // ============================================================================

    /// Random subset of online peers, of size uniform in [⌈lower·n⌉, ⌈upper·n⌉]
    pub fn choose_consensus_peers(&mut self) -> Vec<usize> {
        let online = self.online_peers();
        let n = online.len();
        if n == 0 {
            return Vec::new();
        }

        let lower = ((self.config.consensus_lower_fraction * n as f64).ceil() as usize).clamp(1, n);
        let upper = ((self.config.consensus_upper_fraction * n as f64).ceil() as usize).clamp(lower, n);
        let k = self.rng.gen_range(lower..=upper);

        let mut chosen: Vec<usize> = online.choose_multiple(&mut self.rng, k).copied().collect();
        chosen.sort_unstable();
        chosen
    }

    /// Pin the miners of every following round
    pub fn set_consensus_peers(&mut self, ids: &[usize]) -> Result<()> {
        for &id in ids {
            self.peer(id)?;
        }
        self.consensus_peers = Some(ids.to_vec());
        Ok(())
    }

    pub fn clear_consensus_peers(&mut self) {
        self.consensus_peers = None;
    }

    /// RunConsensusRound
    ///
    /// 1. Every participating peer builds a candidate, one after another
    /// 2. Nonce searches run in parallel
    /// 3. Duration = attempts / hash_rate; the shortest wins, ties to the lower id
    /// 4. The winner accepts its own block and broadcasts it
    /// 5. The clock advances by the winning duration
    pub fn run_consensus_round(&mut self) -> Result<RoundReport> {
        let miners: Vec<usize> = match &self.consensus_peers {
            Some(pinned) => pinned.iter().copied().filter(|&id| self.is_online(id)).collect(),
            None => self.choose_consensus_peers(),
        };
        if miners.is_empty() {
            return Err(LedgerError::NoConsensusPeers);
        }
        info!(miners = miners.len(), "Peers are mining");

        // 1. Candidates
        let now = self.time_ms;
        for &id in &miners {
            self.peers[id].create_candidate_block(now);
        }

        // 2. Searches
        let peers = &self.peers;
        let outcomes: Vec<(usize, Result<MiningOutcome>)> = miners
            .par_iter()
            .map(|&id| (id, peers[id].mine_candidate()))
            .collect();

        // 3. Winner
        let mut best: Option<(usize, MiningOutcome, f64)> = None;
        for (id, outcome) in outcomes {
            let outcome = outcome?;
            let seconds = outcome.attempts as f64 / self.peers[id].hash_rate();
            let better = match &best {
                None => true,
                Some((best_id, _, best_seconds)) => {
                    seconds < *best_seconds || (seconds == *best_seconds && id < *best_id)
                }
            };
            if better {
                best = Some((id, outcome, seconds));
            }
        }
        let (winner, outcome, seconds) = best.ok_or(LedgerError::NoConsensusPeers)?;
        let duration_ms = (seconds * 1000.0).round() as u64;

        // 4. Publish
        let block = self.peers[winner].package_block(outcome.nonce)?;
        let block_hash = block.hash();
        match self.peers[winner].receive_block(block.clone()) {
            received if received.is_accepted() => {}
            BlockOutcome::Rejected(reason) => return Err(LedgerError::BlockRejected(reason)),
            received => return Err(LedgerError::BlockRejected(format!("{:?}", received))),
        }
        let accepted = self.broadcast_block(&block, winner);

        // 5. Clock
        self.time_ms = self.time_ms.saturating_add(duration_ms);
        self.time_spent.push(duration_ms);
        self.winners.push(winner);

        let height = self.peers[winner].height();
        info!(
            winner,
            height,
            nonce = outcome.nonce,
            duration_ms,
            accepted,
            "Round won"
        );

        Ok(RoundReport {
            winner,
            miners,
            block_hash: hex::encode(block_hash),
            height,
            nonce: outcome.nonce,
            attempts: outcome.attempts,
            duration_ms,
            accepted,
        })
    }

    /// Deliver `block` to every online peer except `originator`.
    /// Returns how many made it their tip.
    pub fn broadcast_block(&mut self, block: &Block, originator: usize) -> usize {
        let receivers: Vec<usize> = self
            .online_peers()
            .into_iter()
            .filter(|&id| id != originator)
            .collect();

        let accepted = receivers
            .into_iter()
            .filter(|&id| self.peers[id].receive_block(block.clone()).is_accepted())
            .count();

        info!(originator, block = %hex::encode(&block.hash()[..8]), accepted, "Broadcast block");
        accepted
    }

    // ============================================================================
    // MEMBERSHIP
    // ============================================================================

    /// A new peer joins with a fresh key and a copy of peer 0's ledger
    pub fn add_peer(&mut self) -> Result<usize> {
        let snapshot = self.peer(0)?.snapshot();
        let mut peer = self.spawn_peer();
        peer.restore(snapshot);
        let id = peer.id();
        self.peers.push(peer);
        info!(peer = id, "A new peer joined");
        Ok(id)
    }

    /// Take a peer offline: it neither receives nor mines
    pub fn logout(&mut self, id: usize) -> Result<()> {
        self.peer(id)?;
        self.offline.insert(id);
        info!(peer = id, "Peer went offline");
        Ok(())
    }

    /// Bring a peer back online. It resyncs from the online peer with the longest
    /// chain when that chain is longer than its own. Returns whether it resynced.
    pub fn login(&mut self, id: usize) -> Result<bool> {
        self.peer(id)?;
        self.offline.remove(&id);

        let own_height = self.peers[id].height();
        let source = self
            .online_peers()
            .into_iter()
            .filter(|&other| other != id)
            .max_by_key(|&other| (self.peers[other].height(), std::cmp::Reverse(other)));

        match source {
            Some(source) if self.peers[source].height() > own_height => {
                let snapshot = self.peers[source].snapshot();
                self.peers[id].restore(snapshot);
                info!(peer = id, source, height = self.peers[id].height(), "Peer resynced on login");
                Ok(true)
            }
            _ => {
                info!(peer = id, "Peer came back online");
                Ok(false)
            }
        }
    }

    pub fn summary(&self) -> NetworkSummary {
        let longest = self.peers.iter().max_by_key(|p| p.height());
        NetworkSummary {
            height: longest.map(|p| p.height()).unwrap_or(0),
            tip: longest
                .and_then(|p| p.tip_hash())
                .map(hex::encode)
                .unwrap_or_default(),
            time_ms: self.time_ms,
            rounds: self.winners.len(),
            peers: self
                .peers
                .iter()
                .map(|p| PeerSummary {
                    id: p.id(),
                    online: self.is_online(p.id()),
                    height: p.height(),
                    balance: p.balance(),
                    confirmed_balance: p.confirmed_balance(),
                    mempool: p.mempool().len(),
                })
                .collect(),
        }
    }
}
