//! # Candidate Store
//!
//! Holds every candidate this node accepted and the notarization
//! certificates they gathered, and answers `ResolveCandidate`. A resolve for
//! a candidate whose certificate has not formed yet parks until it does;
//! callers never observe a half-resolved candidate.

use shared_bus::{ConsensusEvent, EventBus, EventFilter, EventTopic, RequestEnvelope, ResolvedCandidate};
use shared_types::{CandidateId, CoreError, NotarCert, RawCandidate};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, error};

type ResolveEnvelope = RequestEnvelope<CandidateId, Result<ResolvedCandidate, CoreError>>;

/// Out-of-bus inputs to the store.
#[derive(Debug)]
pub enum StoreMessage {
    /// A candidate gathered notarization weight.
    NotarCertFormed(NotarCert),
}

/// Bus-driven candidate store.
pub struct CandidateStore {
    bus: Arc<EventBus>,
    inbox: mpsc::UnboundedReceiver<StoreMessage>,
    candidates: HashMap<CandidateId, Arc<RawCandidate>>,
    certs: HashMap<CandidateId, Arc<NotarCert>>,
    /// Resolves waiting for their candidate or certificate.
    parked: HashMap<CandidateId, Vec<ResolveEnvelope>>,
}

impl CandidateStore {
    /// Build the store and the sender used to feed certificates in.
    #[must_use]
    pub fn new(bus: Arc<EventBus>) -> (Self, mpsc::UnboundedSender<StoreMessage>) {
        let (tx, inbox) = mpsc::unbounded_channel();
        (
            Self {
                bus,
                inbox,
                candidates: HashMap::new(),
                certs: HashMap::new(),
                parked: HashMap::new(),
            },
            tx,
        )
    }

    /// Event loop: runs until `StopRequested`.
    pub async fn run(mut self) {
        let mut sub = self.bus.subscribe(EventFilter::topics(vec![
            EventTopic::Lifecycle,
            EventTopic::Candidates,
        ]));
        let mut requests = match self.bus.resolve_candidate.register() {
            Ok(rx) => rx,
            Err(e) => {
                error!("candidate store could not register: {e}");
                return;
            }
        };
        loop {
            tokio::select! {
                event = sub.recv() => match event {
                    Some(ConsensusEvent::CandidateReceived { candidate }) => {
                        self.on_candidate(candidate);
                    }
                    Some(ConsensusEvent::StopRequested) | None => break,
                    Some(_) => {}
                },
                message = self.inbox.recv() => match message {
                    Some(StoreMessage::NotarCertFormed(cert)) => self.on_cert(cert),
                    None => break,
                },
                envelope = requests.recv() => {
                    let Some(envelope) = envelope else { break };
                    self.on_resolve(envelope);
                }
            }
        }
    }

    fn on_candidate(&mut self, candidate: Arc<RawCandidate>) {
        debug!(id = %candidate.id, "candidate stored");
        self.candidates.insert(candidate.id, candidate.clone());
        self.try_answer(candidate.id);
    }

    fn on_cert(&mut self, cert: NotarCert) {
        let id = cert.id;
        self.certs.insert(id, Arc::new(cert));
        self.try_answer(id);
    }

    fn on_resolve(&mut self, envelope: ResolveEnvelope) {
        let id = envelope.request;
        match self.lookup(&id) {
            Some(resolved) => envelope.respond(Ok(resolved)),
            None => self.parked.entry(id).or_default().push(envelope),
        }
    }

    fn lookup(&self, id: &CandidateId) -> Option<ResolvedCandidate> {
        let candidate = self.candidates.get(id)?;
        let notar_cert = self.certs.get(id)?;
        Some(ResolvedCandidate {
            candidate: candidate.clone(),
            notar_cert: notar_cert.clone(),
        })
    }

    fn try_answer(&mut self, id: CandidateId) {
        let Some(resolved) = self.lookup(&id) else {
            return;
        };
        for envelope in self.parked.remove(&id).unwrap_or_default() {
            envelope.respond(Ok(resolved.clone()));
        }
    }
}
