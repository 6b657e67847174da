//! # DHT Wire Surface
//!
//! Query/answer pairs exchanged between DHT nodes, bincode-encoded over the
//! overlay query channel.

use crate::domain::DhtNodeInfo;
use crate::value::DhtValue;
use serde::{Deserialize, Serialize};
use shared_types::Hash;

/// Queries a DHT node serves.
#[derive(Clone, PartialEq, Eq, Debug, Serialize, Deserialize)]
pub enum DhtQuery {
    Ping {
        random_id: u64,
    },
    FindNode {
        key: Hash,
        k: u32,
    },
    FindValue {
        key: Hash,
        k: u32,
    },
    Store {
        value: DhtValue,
    },
    GetSignedAddressList,
    RegisterReverseConnection {
        node: DhtNodeInfo,
        ttl: u64,
        signature: Vec<u8>,
    },
    RequestReversePing {
        target: DhtNodeInfo,
        signature: Vec<u8>,
        client: Hash,
        k: u32,
    },
}

/// Answers to [`DhtQuery`].
#[derive(Clone, PartialEq, Eq, Debug, Serialize, Deserialize)]
pub enum DhtAnswer {
    Pong { random_id: u64 },
    Nodes { nodes: Vec<DhtNodeInfo> },
    ValueFound { value: DhtValue },
    ValueNotFound { nodes: Vec<DhtNodeInfo> },
    Stored,
    AddressList { node: DhtNodeInfo },
    ReversePingOk,
    ClientNotFound { nodes: Vec<DhtNodeInfo> },
}

/// Payload signed when registering a reverse connection: binds the client
/// key to the holder node and a ttl.
#[derive(Clone, PartialEq, Eq, Debug, Serialize, Deserialize)]
pub struct ReverseConnectionToSign {
    pub client: Hash,
    pub dht_node: Hash,
    pub ttl: u64,
}
