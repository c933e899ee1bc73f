//! Transaction admission: pools, orphans, deferral and conflicts with blocks

use simchain::config::SimConfig;
use simchain::constants::*;
use simchain::network::Network;
use simchain::peer::Reception;
use simchain::reorganization::BlockOutcome;
use simchain::transaction::create_coinbase;
use simchain::*;

fn quiet_network(peers: usize) -> Network {
    let config = SimConfig {
        peer_count: peers,
        initial_bits: 6,
        seed: 23,
        ..SimConfig::default()
    };
    Network::genesis(config).unwrap()
}

fn payment(network: &Network, from: usize, to: usize, value: u64) -> Transaction {
    let to_address = network.peer(to).unwrap().address().to_string();
    network.peer(from).unwrap().create_transaction(&to_address, value).unwrap()
}

#[test]
fn test_duplicate_and_double_spend_rejected() {
    let mut network = quiet_network(3);
    let to_bob = payment(&network, 0, 1, 100);
    let to_carol = payment(&network, 0, 2, 100);
    assert_ne!(to_bob.id(), to_carol.id());
    assert_eq!(to_bob.inputs[0].spends, to_carol.inputs[0].spends);

    let observer = network.peer_mut(2).unwrap();
    assert_eq!(observer.receive_transaction(to_bob.clone(), false), Reception::Accepted);
    assert!(matches!(observer.receive_transaction(to_bob.clone(), false), Reception::Rejected(_)));
    assert!(matches!(observer.receive_transaction(to_carol.clone(), false), Reception::Rejected(_)));

    assert_eq!(observer.mempool().len(), 1);
    assert!(observer.mempool().contains(&to_bob.id()));
    assert!(!observer.mempool().contains(&to_carol.id()));
}

#[test]
fn test_orphan_adopted_when_parent_arrives() {
    let mut network = quiet_network(3);

    let parent = payment(&network, 0, 1, 100);
    assert!(network.peer_mut(0).unwrap().submit_transaction(&parent));

    // Only the parent's change is left to spend
    let child = payment(&network, 0, 1, 50);
    assert!(child.inputs.iter().all(|i| i.spends.map(|p| p.tx_id) == Some(parent.id())));

    let observer = network.peer_mut(2).unwrap();
    assert_eq!(observer.receive_transaction(child.clone(), false), Reception::Orphaned);
    assert!(observer.orphan_pool().contains(&child.id()));
    assert!(observer.mempool().is_empty());

    assert_eq!(observer.receive_transaction(parent.clone(), false), Reception::Accepted);
    assert!(observer.mempool().contains(&parent.id()));
    assert!(observer.mempool().contains(&child.id()));
    assert!(observer.orphan_pool().is_empty());
}

#[test]
fn test_parent_and_child_confirm_in_one_block() {
    let mut network = quiet_network(3);
    let parent = payment(&network, 0, 1, 100);
    for id in 0..3 {
        network.peer_mut(id).unwrap().submit_transaction(&parent);
    }
    let child = payment(&network, 0, 1, 50);
    for id in 0..3 {
        assert!(network.peer_mut(id).unwrap().submit_transaction(&child));
    }

    network.set_consensus_peers(&[2]).unwrap();
    network.run_consensus_round().unwrap();

    let bob = network.peer(1).unwrap();
    assert_eq!(bob.confirmed_balance(), INIT_COIN_PER_PEER + 150);
    let block = bob.chain().tip().unwrap();
    let ids = block.tx_ids();
    let parent_at = ids.iter().position(|id| *id == parent.id()).unwrap();
    let child_at = ids.iter().position(|id| *id == child.id()).unwrap();
    assert!(parent_at < child_at);
}

#[test]
fn test_tampered_output_fails_signature_check() {
    let mut network = quiet_network(2);
    let mut tx = payment(&network, 0, 1, 100);
    tx.outputs[0].value -= 1;

    let outcome = network.peer_mut(1).unwrap().receive_transaction(tx, false);
    assert!(matches!(outcome, Reception::Rejected(_)));
}

#[test]
fn test_underfunded_fee_rejected() {
    let mut network = quiet_network(2);
    let mut tx = payment(&network, 0, 1, 100);
    tx.fee = 1_000_000;

    let outcome = network.peer_mut(1).unwrap().receive_transaction(tx, false);
    assert!(matches!(outcome, Reception::Rejected(_)));
    assert!(network.peer(1).unwrap().mempool().is_empty());
}

#[test]
fn test_loose_coinbase_rejected() {
    let mut network = quiet_network(2);
    let address = network.peer(1).unwrap().address().to_string();
    let coinbase = create_coinbase(&address, 500, 1);

    let outcome = network.peer_mut(0).unwrap().receive_transaction(coinbase, false);
    assert!(matches!(outcome, Reception::Rejected(_)));
}

#[test]
fn test_deferred_transaction_pooled_on_next_delivery() {
    let mut network = quiet_network(3);
    let first = payment(&network, 0, 2, 10);
    let second = payment(&network, 1, 2, 20);

    let observer = network.peer_mut(2).unwrap();
    assert_eq!(observer.receive_transaction(first.clone(), true), Reception::Deferred);
    assert!(observer.deferred().contains(&first.id()));
    assert!(!observer.mempool().contains(&first.id()));

    assert_eq!(observer.receive_transaction(second.clone(), false), Reception::Accepted);
    assert!(observer.deferred().is_empty());
    assert!(observer.mempool().contains(&first.id()));
    assert!(observer.mempool().contains(&second.id()));
}

#[test]
fn test_block_evicts_conflicting_pool_transaction() {
    let mut network = quiet_network(3);
    let to_bob = payment(&network, 0, 1, 100);
    let to_carol = payment(&network, 0, 2, 100);

    assert!(network.peer_mut(1).unwrap().submit_transaction(&to_bob));
    assert!(network.peer_mut(2).unwrap().submit_transaction(&to_carol));
    let bob_pending = network.peer(1).unwrap().balance();
    assert_eq!(bob_pending, INIT_COIN_PER_PEER + 100);

    let miner = network.peer_mut(2).unwrap();
    miner.create_candidate_block(0);
    let nonce = miner.mine_candidate().unwrap().nonce;
    let block = miner.package_block(nonce).unwrap();

    let bob = network.peer_mut(1).unwrap();
    assert_eq!(bob.receive_block(block), BlockOutcome::Extended);
    assert!(!bob.mempool().contains(&to_bob.id()));
    assert_eq!(bob.balance(), INIT_COIN_PER_PEER);
    assert!(bob.utxo_set().contains(&SpendPointer::new(to_carol.id(), 0)));
    assert!(bob.utxo_set().records().all(|r| r.confirmed && r.unspent));
}
