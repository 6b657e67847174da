//! DHT lookups over a mesh, with routing-table snapshots surviving a
//! restart through the journal.

use async_trait::async_trait;
use cc_02_journal::{FileJournal, Journal};
use cc_04_peer_discovery::value::now_unix;
use cc_04_peer_discovery::{
    DhtAnswer, DhtClient, DhtConfig, DhtNetworkPort, DhtNodeInfo, DhtQuery, DhtValue,
};
use parking_lot::Mutex;
use shared_crypto::Ed25519KeyPair;
use shared_types::{CoreError, Hash, PeerAddress, PeerShortId};
use std::collections::BTreeMap;
use std::sync::Arc;

/// Loopback mesh: queries are served directly by the target client.
#[derive(Default)]
struct DhtNet {
    nodes: Mutex<BTreeMap<Hash, Arc<DhtClient>>>,
}

#[async_trait]
impl DhtNetworkPort for DhtNet {
    async fn query(&self, dst: &DhtNodeInfo, query: DhtQuery) -> Result<DhtAnswer, CoreError> {
        let target = self.nodes.lock().get(&dst.key_id()).cloned();
        let Some(target) = target else {
            return Err(CoreError::NotReady);
        };
        let src = target.local_info().clone();
        Box::pin(target.process_query(&src, query)).await
    }

    async fn push_reverse_ping(
        &self,
        _client: PeerShortId,
        _target: DhtNodeInfo,
        _signature: Vec<u8>,
    ) -> Result<(), CoreError> {
        Ok(())
    }
}

fn client(net: &Arc<DhtNet>, seed: u8) -> Arc<DhtClient> {
    let keypair = Ed25519KeyPair::from_seed([seed; 32]);
    let client = Arc::new(DhtClient::new(
        keypair,
        PeerAddress::default(),
        DhtConfig::default(),
        net.clone() as Arc<dyn DhtNetworkPort>,
    ));
    net.nodes
        .lock()
        .insert(client.local_info().key_id(), client.clone());
    client
}

fn mesh(net: &Arc<DhtNet>, n: u8) -> Vec<Arc<DhtClient>> {
    let clients: Vec<_> = (1..=n).map(|i| client(net, i)).collect();
    let bootstrap = clients[0].local_info().clone();
    for c in clients.iter().skip(1) {
        c.add_static_nodes(vec![bootstrap.clone()]);
        clients[0].add_static_nodes(vec![c.local_info().clone()]);
    }
    clients
}

#[tokio::test]
async fn test_value_survives_storage_maintenance() {
    let net = Arc::new(DhtNet::default());
    let clients = mesh(&net, 5);

    let owner = Ed25519KeyPair::from_seed([77; 32]);
    let value = DhtValue::signed(&owner, b"address", 0, b"addr-bytes".to_vec(), now_unix() + 600);
    let key = value.key.clone();
    clients[1].set_value(value).await.unwrap();

    for c in &clients {
        c.maintenance_tick().await;
    }
    let found = clients[3].get_value(&key).await.unwrap();
    assert_eq!(found.value, b"addr-bytes");
}

#[tokio::test]
async fn test_bucket_snapshots_restore_after_restart() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("dht.log");
    let net = Arc::new(DhtNet::default());
    let clients = mesh(&net, 5);

    // Let the restarting node fill its table, then snapshot it.
    clients[2].find_nodes(&Hash::new([0xaa; 32])).await;
    let known_before = clients[2].known_nodes();
    assert!(known_before >= 2);
    {
        let journal = FileJournal::open(&path).unwrap();
        clients[2].save_buckets(&journal).unwrap();
        journal.flush().unwrap();
    }

    // A fresh client with the same key and no bootstrap recovers its view
    // from the journal alone.
    let restarted = Arc::new(DhtClient::new(
        Ed25519KeyPair::from_seed([3; 32]),
        PeerAddress::default(),
        DhtConfig::default(),
        net.clone() as Arc<dyn DhtNetworkPort>,
    ));
    assert_eq!(restarted.known_nodes(), 0);
    let journal = FileJournal::open(&path).unwrap();
    let restored = restarted.load_buckets(&journal).unwrap();
    assert!(restored > 0);
    assert!(restarted.known_nodes() > 0);

    // The restored view is immediately useful for lookups.
    let owner = Ed25519KeyPair::from_seed([78; 32]);
    let value = DhtValue::signed(&owner, b"address", 1, vec![9], now_unix() + 600);
    let key = value.key.clone();
    clients[1].set_value(value).await.unwrap();
    net.nodes
        .lock()
        .insert(restarted.local_info().key_id(), restarted.clone());
    let found = restarted.get_value(&key).await.unwrap();
    assert_eq!(found.value, vec![9]);
}
