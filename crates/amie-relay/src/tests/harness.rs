//! Test harness for relay behavior tests.
//!
//! Provides:
//! - MockChannel: records acks and publishes, answers publishes from a script,
//!   optionally holding each confirm until released
//! - MockDeliveries: a delivery stream fed from an unbounded channel
//! - MockConnector: hands out prepared sessions and counts connects
//! - TestEnv: a temporary folder tree with relay settings rooted in it

use crate::broker::{
    BrokerChannel, BrokerConnector, BrokerSession, Confirm, Delivery, DeliveryStream,
    DeliveryTag, Publication,
};
use crate::config::RelayConfig;
use crate::error::{RelayError, RelayResult};
use amie_config::Folders;
use amie_packet::PacketRules;
use async_trait::async_trait;
use std::collections::{BTreeMap, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::TempDir;
use tokio::sync::{mpsc, Notify};

/// Scripted answer to one publish.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PublishResponse {
    Ack,
    Nack,
    /// The channel errors before a confirm arrives.
    Fail,
}

/// One recorded ack and the received files present when it happened.
#[derive(Debug, Clone)]
pub struct AckRecord {
    pub delivery_tag: DeliveryTag,
    pub received_files: Vec<String>,
}

/// A broker channel that records everything.
pub struct MockChannel {
    received_folder: PathBuf,
    acks: Mutex<Vec<AckRecord>>,
    publishes: Mutex<Vec<Publication>>,
    responses: Mutex<VecDeque<PublishResponse>>,
    default_response: Mutex<PublishResponse>,
    fail_acks: AtomicBool,
    closed: AtomicBool,
    publish_gate: Mutex<Option<Arc<Notify>>>,
}

impl MockChannel {
    pub fn new(received_folder: &Path) -> Arc<Self> {
        Arc::new(Self {
            received_folder: received_folder.to_path_buf(),
            acks: Mutex::new(Vec::new()),
            publishes: Mutex::new(Vec::new()),
            responses: Mutex::new(VecDeque::new()),
            default_response: Mutex::new(PublishResponse::Ack),
            fail_acks: AtomicBool::new(false),
            closed: AtomicBool::new(false),
            publish_gate: Mutex::new(None),
        })
    }

    /// Answer the next publish with `response`, then fall back to the default.
    pub fn queue_response(&self, response: PublishResponse) {
        self.responses.lock().unwrap().push_back(response);
    }

    pub fn set_default_response(&self, response: PublishResponse) {
        *self.default_response.lock().unwrap() = response;
    }

    /// Make every later publish wait for a notification before confirming.
    pub fn hold_publishes(&self) -> Arc<Notify> {
        let gate = Arc::new(Notify::new());
        *self.publish_gate.lock().unwrap() = Some(gate.clone());
        gate
    }

    pub fn fail_acks(&self) {
        self.fail_acks.store(true, Ordering::SeqCst);
    }

    pub fn acks(&self) -> Vec<AckRecord> {
        self.acks.lock().unwrap().clone()
    }

    pub fn ack_count(&self) -> usize {
        self.acks.lock().unwrap().len()
    }

    pub fn acked_tags(&self) -> Vec<DeliveryTag> {
        self.acks().iter().map(|ack| ack.delivery_tag).collect()
    }

    pub fn publishes(&self) -> Vec<Publication> {
        self.publishes.lock().unwrap().clone()
    }

    pub fn publish_count(&self) -> usize {
        self.publishes.lock().unwrap().len()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl BrokerChannel for MockChannel {
    async fn ack(&self, delivery_tag: DeliveryTag) -> RelayResult<()> {
        if self.fail_acks.load(Ordering::SeqCst) {
            return Err(RelayError::ConnectionLost("channel closed".to_string()));
        }
        let received_files = file_names(&self.received_folder);
        self.acks.lock().unwrap().push(AckRecord {
            delivery_tag,
            received_files,
        });
        Ok(())
    }

    async fn publish(&self, publication: Publication) -> RelayResult<Confirm> {
        self.publishes.lock().unwrap().push(publication);
        let gate = self.publish_gate.lock().unwrap().clone();
        if let Some(gate) = gate {
            gate.notified().await;
        }
        let response = self
            .responses
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(*self.default_response.lock().unwrap());
        match response {
            PublishResponse::Ack => Ok(Confirm::Ack),
            PublishResponse::Nack => Ok(Confirm::Nack),
            PublishResponse::Fail => Err(RelayError::ConnectionLost(
                "connection reset during publish".to_string(),
            )),
        }
    }

    async fn close(&self) -> RelayResult<()> {
        self.closed.store(true, Ordering::SeqCst);
        Ok(())
    }
}

/// Delivery stream fed by a [`DeliveryFeed`]. Ends when the feed is dropped.
pub struct MockDeliveries {
    rx: mpsc::UnboundedReceiver<RelayResult<Delivery>>,
}

#[async_trait]
impl DeliveryStream for MockDeliveries {
    async fn next_delivery(&mut self) -> Option<RelayResult<Delivery>> {
        self.rx.recv().await
    }
}

/// Sending side of a [`MockDeliveries`] stream.
#[derive(Clone)]
pub struct DeliveryFeed {
    tx: mpsc::UnboundedSender<RelayResult<Delivery>>,
    next_tag: Arc<AtomicUsize>,
}

impl DeliveryFeed {
    /// Deliver `payload` with the next tag; returns the tag.
    pub fn deliver(&self, payload: impl Into<Vec<u8>>) -> DeliveryTag {
        let delivery_tag = self.next_tag.fetch_add(1, Ordering::SeqCst) as DeliveryTag + 1;
        let _ = self.tx.send(Ok(Delivery {
            delivery_tag,
            payload: payload.into(),
            redelivered: false,
        }));
        delivery_tag
    }

    /// Push a stream-level error.
    pub fn fail(&self, reason: &str) {
        let _ = self.tx.send(Err(RelayError::ConnectionLost(reason.to_string())));
    }
}

/// A session plus the handles tests use to drive and inspect it.
pub struct MockSession {
    pub channel: Arc<MockChannel>,
    pub feed: DeliveryFeed,
    session: Option<BrokerSession>,
}

impl MockSession {
    pub fn new(received_folder: &Path) -> Self {
        let channel = MockChannel::new(received_folder);
        let (tx, rx) = mpsc::unbounded_channel();
        let session = BrokerSession {
            channel: channel.clone(),
            deliveries: Box::new(MockDeliveries { rx }),
        };
        Self {
            channel,
            feed: DeliveryFeed {
                tx,
                next_tag: Arc::new(AtomicUsize::new(0)),
            },
            session: Some(session),
        }
    }

    /// Take the broker-facing half.
    pub fn take(&mut self) -> BrokerSession {
        self.session.take().expect("session already taken")
    }
}

/// Connector returning queued sessions, then connect errors.
#[derive(Clone, Default)]
pub struct MockConnector {
    sessions: Arc<Mutex<VecDeque<BrokerSession>>>,
    connects: Arc<AtomicUsize>,
}

impl MockConnector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, session: BrokerSession) {
        self.sessions.lock().unwrap().push_back(session);
    }

    pub fn connect_count(&self) -> usize {
        self.connects.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl BrokerConnector for MockConnector {
    async fn connect(&self) -> RelayResult<BrokerSession> {
        self.connects.fetch_add(1, Ordering::SeqCst);
        self.sessions
            .lock()
            .unwrap()
            .pop_front()
            .ok_or_else(|| RelayError::ConnectionLost("connection refused".to_string()))
    }
}

/// Temporary folder tree and relay settings rooted in it.
pub struct TestEnv {
    pub config: Arc<RelayConfig>,
    _dir: TempDir,
}

impl TestEnv {
    pub fn new() -> Self {
        Self::with(|_| {})
    }

    /// Build with adjusted settings.
    pub fn with(adjust: impl FnOnce(&mut RelayConfig)) -> Self {
        let dir = TempDir::new().unwrap();
        let mut config = RelayConfig::under(dir.path(), rules());
        adjust(&mut config);
        config.folders.ensure(true).unwrap();
        Self {
            config: Arc::new(config),
            _dir: dir,
        }
    }

    pub fn folders(&self) -> &Folders {
        &self.config.folders
    }

    pub fn session(&self) -> MockSession {
        MockSession::new(&self.folders().received_folder)
    }

    /// Drop a file into the outbox.
    pub fn put_outbox(&self, name: &str, content: &str) -> PathBuf {
        let path = self.folders().out_folder.join(name);
        std::fs::write(&path, content).unwrap();
        path
    }

    pub fn received(&self) -> Vec<String> {
        file_names(&self.folders().received_folder)
    }

    pub fn staged(&self) -> Vec<String> {
        file_names(&self.folders().in_folder)
    }

    pub fn outbox(&self) -> Vec<String> {
        file_names(&self.folders().out_folder)
    }

    pub fn waiting(&self) -> Vec<String> {
        file_names(&self.folders().wait_folder)
    }

    pub fn done(&self) -> Vec<String> {
        file_names(&self.folders().done_folder)
    }

    pub fn failed(&self) -> Vec<String> {
        file_names(&self.folders().out_failed_folder)
    }
}

/// Validation rules for site pair PSC / TGCDB.
pub fn rules() -> PacketRules {
    let mut valid_packet_types = BTreeMap::new();
    valid_packet_types.insert("request_account_create".to_string(), Some(5));
    valid_packet_types.insert("request_project_create".to_string(), Some(3));
    valid_packet_types.insert("data_account_create".to_string(), None);
    valid_packet_types.insert("inform_transaction_complete".to_string(), Some(1));
    PacketRules {
        valid_packet_types,
        local_site: Some("PSC".to_string()),
        remote_site: Some("TGCDB".to_string()),
    }
}

/// A well-formed packet with the given header values.
pub fn packet(packet_type: &str, version: &str, transaction_id: &str, packet_id: &str) -> String {
    format!(
        r#"<?xml version="1.0" encoding="UTF-8"?>
<amie version="{version}">
  <{packet_type}>
    <header>
      <originating_site_name>TGCDB</originating_site_name>
      <transaction_id>{transaction_id}</transaction_id>
      <packet_id>{packet_id}</packet_id>
    </header>
    <body>
      <UserFirstName>Ada</UserFirstName>
    </body>
  </{packet_type}>
</amie>"#
    )
}

/// A packet whose header lacks `transaction_id`.
pub fn packet_without_transaction(packet_type: &str) -> String {
    format!(
        r#"<amie version="1.0"><{packet_type}><header><originating_site_name>TGCDB</originating_site_name><packet_id>1</packet_id></header></{packet_type}></amie>"#
    )
}

/// Poll `condition` every few milliseconds until it holds or `limit` passes.
pub async fn eventually(limit: Duration, mut condition: impl FnMut() -> bool) -> bool {
    let deadline = tokio::time::Instant::now() + limit;
    while tokio::time::Instant::now() < deadline {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    condition()
}

fn file_names(dir: &Path) -> Vec<String> {
    let mut names: Vec<String> = std::fs::read_dir(dir)
        .map(|entries| {
            entries
                .filter_map(Result::ok)
                .map(|entry| entry.file_name().to_string_lossy().into_owned())
                .collect()
        })
        .unwrap_or_default();
    names.sort();
    names
}
