//! Cross-subsystem integration scenarios.

mod catchain_flows;
mod consensus_flows;
mod dht_persistence;
mod fec_mtu;
mod rate_limiting;
