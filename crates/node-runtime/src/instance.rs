//! # Consensus Instance Wiring
//!
//! Builds the actors of one session and connects them: catchain receiver
//! (with its periodic sync ticker), block producer, state resolver, and
//! candidate store, all over one [`EventBus`].

use cc_01_actor_runtime::{spawn_actor, ActorRef};
use cc_02_journal::{FileJournal, Journal, MemoryJournal};
use cc_03_overlay_sender::OverlaySender;
use cc_06_catchain::{CatchainNode, CatchainOptions, Receiver, ReceiverEvent, ReceiverMessage};
use cc_07_consensus::{
    BlockProducer, CandidateStore, ManagerPort, ProducerConfig, StateResolver, StoreMessage,
};
use shared_bus::EventBus;
use shared_crypto::Ed25519KeyPair;
use shared_types::{BlockId, CoreError, SessionId, ShardId};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::info;

/// Everything needed to run one session on one validator.
pub struct SessionConfig {
    pub session_id: SessionId,
    pub shard: ShardId,
    pub min_masterchain_block_id: BlockId,
    /// Roster in source-index order; must contain the local key.
    pub nodes: Vec<CatchainNode>,
    pub keypair: Ed25519KeyPair,
    pub catchain: CatchainOptions,
    pub target_rate: std::time::Duration,
    /// Journal directory; `None` keeps state in memory (tests, dry runs).
    pub db_root: Option<PathBuf>,
}

/// A running consensus instance.
pub struct ConsensusInstance {
    pub bus: Arc<EventBus>,
    pub receiver: ActorRef<ReceiverMessage>,
    pub receiver_events: mpsc::UnboundedReceiver<ReceiverEvent>,
    pub store_certs: mpsc::UnboundedSender<StoreMessage>,
    tasks: Vec<JoinHandle<()>>,
}

impl ConsensusInstance {
    /// Construct and start every actor of the session.
    pub fn launch(
        config: SessionConfig,
        overlay: Arc<dyn OverlaySender>,
        manager: Arc<dyn ManagerPort>,
    ) -> Result<Self, CoreError> {
        let journal: Arc<dyn Journal> = match &config.db_root {
            Some(root) => {
                let path = root.join(format!("session-{}.log", config.session_id.short_tag()));
                Arc::new(
                    FileJournal::open(path)
                        .map_err(|e| CoreError::FatalCorruption(e.to_string()))?,
                )
            }
            None => Arc::new(MemoryJournal::new()),
        };
        let bus = Arc::new(EventBus::new());
        let mut tasks = Vec::new();

        // Candidate store and resolver claim their request channels first so
        // no caller ever races an unregistered handler.
        let (store, store_certs) = CandidateStore::new(bus.clone());
        tasks.push(tokio::spawn(store.run()));
        let resolver = StateResolver::new(
            bus.clone(),
            manager.clone(),
            journal.clone(),
            config.shard,
        )?;
        tasks.push(tokio::spawn(resolver.run()));

        // FinalizeBlock requests go straight to the validator manager.
        let mut finalize_rx = bus
            .finalize_block
            .register()
            .map_err(|e| CoreError::FatalCorruption(e.to_string()))?;
        let finalize_manager = manager.clone();
        tasks.push(tokio::spawn(async move {
            while let Some(envelope) = finalize_rx.recv().await {
                let request = &envelope.request;
                let result = finalize_manager
                    .finalize_block(request.candidate.clone(), request.sig_set.clone())
                    .await;
                envelope.respond(result);
            }
        }));

        let (events_tx, receiver_events) = mpsc::unbounded_channel();
        let receiver = Receiver::new(
            config.session_id,
            &config.nodes,
            config.keypair.clone(),
            config.catchain.clone(),
            journal,
            overlay,
            events_tx,
        )?;
        let local_idx = receiver.local_idx();
        let (receiver_ref, receiver_task) = spawn_actor(receiver);
        tasks.push(receiver_task);

        // Periodic sync ticks drive the receiver's neighbour protocol.
        let ticker_ref = receiver_ref.clone();
        let sync_interval = config.catchain.sync_interval;
        tasks.push(tokio::spawn(async move {
            let mut interval = cc_01_actor_runtime::interval_at(
                tokio::time::Instant::now() + sync_interval,
                sync_interval,
            );
            loop {
                interval.tick().await;
                if ticker_ref.send(ReceiverMessage::SyncTick).is_err() {
                    break;
                }
            }
        }));

        let producer = BlockProducer::new(
            bus.clone(),
            manager,
            Arc::new(config.keypair.clone()),
            ProducerConfig {
                session_id: config.session_id,
                shard: config.shard,
                local_idx,
                min_masterchain_block_id: config.min_masterchain_block_id,
                target_rate: config.target_rate,
            },
        );
        tasks.push(tokio::spawn(producer.run()));

        info!(session = %config.session_id, local_idx, "consensus instance launched");
        Ok(Self {
            bus,
            receiver: receiver_ref,
            receiver_events,
            store_certs,
            tasks,
        })
    }

    /// Orderly shutdown: stop the bus services and the receiver.
    pub async fn stop(mut self) {
        self.bus.publish(shared_bus::ConsensusEvent::StopRequested);
        let _ = self.receiver.send(ReceiverMessage::Stop);
        for task in self.tasks.drain(..) {
            task.abort();
        }
    }
}
