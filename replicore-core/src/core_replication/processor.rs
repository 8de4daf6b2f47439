/*
    processor.rs - Incoming replication pipeline

    For every incoming version:
    1. validate (malformed items are reported, never fatal for the batch)
    2. take the stripe lock of the document id
    3. read local state: recorded conflict first, then storage
    4. run the detector
    5. apply, drop, or record and try to resolve the conflict

    Non-script policies are pure and resolve while the stripe lock is held.
    Script resolution records the set, releases the lock for the sandbox
    call, then re-locks and commits only if the recorded set is unchanged.
*/

use super::change_vector::{ChangeVector, NodeId};
use super::conflict_store::{ConflictSet, ConflictStore};
use super::detector::{ConflictDetector, Decision, LocalState, RejectReason};
use super::errors::{ConflictError, ReplicationError, ReplicationResult};
use super::item::{DocumentId, ReplicatedItem, Timestamp, VersionedItem};
use super::locks::{StripeGuard, StripedLocks};
use super::policy::ResolutionPolicy;
use super::resolver::{Resolution, ResolutionPolicyEngine, UnresolvedReason};
use super::sandbox::{NullSandbox, ScriptSandbox};
use super::status::{ResolutionOutcome, ResolverStatus, StatusTracker};
use super::storage::{DocumentStorage, MemoryStorage};
use crate::config::Config;
use crate::metrics::{
    init_metrics, MetricsFacade, NoopMetrics, ReplicationCounter, ReplicationHistogram, ReplicationMetrics, Timer,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, instrument, warn};

pub const DEFAULT_LOCK_STRIPES: usize = 64;
pub const DEFAULT_SCRIPT_TIMEOUT: Duration = Duration::from_secs(5);

/// What happened to one incoming item
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum ItemOutcome {
    /// Written to storage as-is
    Accepted { tombstone: bool },
    /// Stale or duplicate, nothing changed
    Rejected { reason: RejectReason },
    /// Conflict collapsed by the policy; the winner was written
    Resolved { tombstone: bool },
    /// Conflict recorded and left for later
    Conflicted { members: usize, reason: UnresolvedReason },
    /// Script result discarded because the set changed meanwhile
    Superseded,
    /// Failed validation
    Malformed { reason: String },
    /// Storage or internal failure; safe to redeliver
    Failed { error: String },
}

impl ItemOutcome {
    pub fn changed_storage(&self) -> bool {
        matches!(self, ItemOutcome::Accepted { .. } | ItemOutcome::Resolved { .. })
    }
}

/// Per-item outcomes of one batch, in delivery order
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchReport {
    pub source: NodeId,
    pub outcomes: Vec<(DocumentId, ItemOutcome)>,
}

impl BatchReport {
    fn count(&self, pred: impl Fn(&ItemOutcome) -> bool) -> usize {
        self.outcomes.iter().filter(|(_, o)| pred(o)).count()
    }

    pub fn accepted(&self) -> usize {
        self.count(|o| matches!(o, ItemOutcome::Accepted { .. }))
    }

    pub fn rejected(&self) -> usize {
        self.count(|o| matches!(o, ItemOutcome::Rejected { .. }))
    }

    pub fn resolved(&self) -> usize {
        self.count(|o| matches!(o, ItemOutcome::Resolved { .. }))
    }

    pub fn conflicted(&self) -> usize {
        self.count(|o| matches!(o, ItemOutcome::Conflicted { .. }))
    }

    pub fn malformed(&self) -> usize {
        self.count(|o| matches!(o, ItemOutcome::Malformed { .. }))
    }

    pub fn failed(&self) -> usize {
        self.count(|o| matches!(o, ItemOutcome::Failed { .. }))
    }

    pub fn len(&self) -> usize {
        self.outcomes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.outcomes.is_empty()
    }
}

/// Delivered item whose transport encoding could not be decoded
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Undecodable {
    /// Best-effort id; empty when the id itself was unreadable
    pub id: DocumentId,
    pub reason: String,
}

/// Builder for [`IncomingReplicationProcessor`]
pub struct ProcessorBuilder {
    node_id: NodeId,
    storage: Option<Arc<dyn DocumentStorage>>,
    sandbox: Option<Arc<dyn ScriptSandbox>>,
    metrics: Option<Arc<dyn ReplicationMetrics>>,
    policy: ResolutionPolicy,
    script_timeout: Duration,
    lock_stripes: usize,
}

impl ProcessorBuilder {
    pub fn new(node_id: NodeId) -> Self {
        Self {
            node_id,
            storage: None,
            sandbox: None,
            metrics: None,
            policy: ResolutionPolicy::default(),
            script_timeout: DEFAULT_SCRIPT_TIMEOUT,
            lock_stripes: DEFAULT_LOCK_STRIPES,
        }
    }

    /// Node identity, policy, timeout and stripe count from `config`.
    /// With `metrics.enabled` counters go to the `metrics` facade.
    pub fn from_config(config: &Config) -> Self {
        let builder = Self::new(config.node.node_id)
            .policy(config.resolution.policy.clone())
            .script_timeout(config.replication.script_timeout)
            .lock_stripes(config.replication.lock_stripes);
        if config.metrics.enabled {
            init_metrics();
            builder.metrics(Arc::new(MetricsFacade))
        } else {
            builder
        }
    }

    pub fn storage(mut self, storage: Arc<dyn DocumentStorage>) -> Self {
        self.storage = Some(storage);
        self
    }

    pub fn sandbox(mut self, sandbox: Arc<dyn ScriptSandbox>) -> Self {
        self.sandbox = Some(sandbox);
        self
    }

    pub fn metrics(mut self, metrics: Arc<dyn ReplicationMetrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn policy(mut self, policy: ResolutionPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn script_timeout(mut self, timeout: Duration) -> Self {
        self.script_timeout = timeout;
        self
    }

    pub fn lock_stripes(mut self, stripes: usize) -> Self {
        self.lock_stripes = stripes;
        self
    }

    pub fn build(self) -> IncomingReplicationProcessor {
        let storage = self.storage.unwrap_or_else(|| Arc::new(MemoryStorage::new()));
        let sandbox = self.sandbox.unwrap_or_else(|| Arc::new(NullSandbox));
        let metrics = self.metrics.unwrap_or_else(|| Arc::new(NoopMetrics));

        IncomingReplicationProcessor {
            node_id: self.node_id,
            storage,
            conflicts: ConflictStore::new(),
            engine: ResolutionPolicyEngine::new(self.policy, sandbox, self.script_timeout),
            detector: ConflictDetector::new(),
            locks: StripedLocks::new(self.lock_stripes),
            status: StatusTracker::new(),
            metrics,
        }
    }
}

/// Orchestrates detection, conflict recording and resolution per document
pub struct IncomingReplicationProcessor {
    node_id: NodeId,
    storage: Arc<dyn DocumentStorage>,
    conflicts: ConflictStore,
    engine: ResolutionPolicyEngine,
    detector: ConflictDetector,
    locks: StripedLocks,
    status: StatusTracker,
    metrics: Arc<dyn ReplicationMetrics>,
}

impl IncomingReplicationProcessor {
    pub fn builder(node_id: NodeId) -> ProcessorBuilder {
        ProcessorBuilder::new(node_id)
    }

    pub fn node_id(&self) -> NodeId {
        self.node_id
    }

    pub fn policy(&self) -> ResolutionPolicy {
        self.engine.policy()
    }

    /// Replace the policy; call [`Self::resolve_all_pending`] to revisit
    /// conflicts recorded under the old one
    pub fn set_policy(&self, policy: ResolutionPolicy) {
        self.engine.set_policy(policy);
    }

    /// Process one validated-shape item from `source`
    pub async fn process_item(&self, item: VersionedItem, source: NodeId) -> ReplicationResult<ItemOutcome> {
        self.metrics.increment(ReplicationCounter::ItemsReceived);
        if let Err(err) = item.validate() {
            return Ok(self.malformed(&item.id, source, err.to_string()));
        }
        self.handle(item, source).await
    }

    /// Validate a transport item and process it
    pub async fn process_replicated(&self, raw: ReplicatedItem, source: NodeId) -> ReplicationResult<ItemOutcome> {
        self.metrics.increment(ReplicationCounter::ItemsReceived);
        let id = raw.id.clone();
        match VersionedItem::try_from(raw) {
            Ok(item) => self.handle(item, source).await,
            Err(err) => Ok(self.malformed(&id, source, err.to_string())),
        }
    }

    /// Process a source's items in delivery order. Failures are reported per
    /// item and never stop the batch.
    pub async fn process_batch(&self, items: Vec<ReplicatedItem>, source: NodeId) -> BatchReport {
        self.process_deliveries(items.into_iter().map(Ok).collect(), source).await
    }

    /// [`Self::process_batch`] for a transport that decodes item by item.
    /// Items that failed to decode are reported as malformed in their slot.
    pub async fn process_deliveries(
        &self,
        items: Vec<Result<ReplicatedItem, Undecodable>>,
        source: NodeId,
    ) -> BatchReport {
        let mut outcomes = Vec::with_capacity(items.len());
        for delivery in items {
            let (id, outcome) = match delivery {
                Ok(raw) => {
                    let id = raw.id.clone();
                    match self.process_replicated(raw, source).await {
                        Ok(outcome) => (id, outcome),
                        Err(err) => (id, ItemOutcome::Failed { error: err.to_string() }),
                    }
                }
                Err(Undecodable { id, reason }) => {
                    self.metrics.increment(ReplicationCounter::ItemsReceived);
                    let outcome = self.malformed(&id, source, reason);
                    (id, outcome)
                }
            };
            outcomes.push((id, outcome));
        }

        let report = BatchReport { source, outcomes };
        info!(
            source = %source,
            items = report.len(),
            accepted = report.accepted(),
            conflicted = report.conflicted(),
            malformed = report.malformed(),
            failed = report.failed(),
            "Replication batch processed"
        );
        report
    }

    fn malformed(&self, id: &str, source: NodeId, reason: String) -> ItemOutcome {
        warn!(doc_id = id, source = %source, reason = %reason, "Rejected malformed item");
        self.metrics.increment(ReplicationCounter::ItemsMalformed);
        ItemOutcome::Malformed { reason }
    }

    #[instrument(skip(self, item, source), fields(doc_id = %item.id, source = %source))]
    async fn handle(&self, item: VersionedItem, source: NodeId) -> ReplicationResult<ItemOutcome> {
        let guard = self.locks.lock(&item.id).await;
        let id = item.id.clone();
        let local = self.local_state(&id).await?;

        match self.detector.process(item, local)? {
            Decision::Accept(winner) => {
                let tombstone = winner.is_tombstone();
                self.apply(&winner).await?;
                if self.conflicts.clear(&id)?.is_some() {
                    info!(doc_id = %id, "Dominating version collapsed conflict");
                }
                self.metrics.increment(ReplicationCounter::ItemsAccepted);
                debug!(doc_id = %id, tombstone, "Accepted");
                Ok(ItemOutcome::Accepted { tombstone })
            }
            Decision::Reject(reason) => {
                self.metrics.increment(ReplicationCounter::ItemsRejected);
                debug!(doc_id = %id, %reason, "Rejected");
                Ok(ItemOutcome::Rejected { reason })
            }
            Decision::Conflict(set) => {
                self.metrics.increment(ReplicationCounter::ConflictsDetected);
                debug!(doc_id = %id, members = set.len(), "Conflict detected");
                self.settle(set, guard).await
            }
        }
    }

    async fn local_state(&self, id: &str) -> ReplicationResult<LocalState> {
        if let Some(set) = self.conflicts.get(id)? {
            return Ok(LocalState::Conflicted(set));
        }
        Ok(LocalState::Clean(self.storage.get(id).await?))
    }

    async fn apply(&self, item: &VersionedItem) -> ReplicationResult<()> {
        let result = if item.is_tombstone() {
            self.storage.delete(item.clone()).await
        } else {
            self.storage.put(item.clone()).await
        };
        result.map_err(|err| {
            error!(doc_id = %item.id, error = %err, "Storage write failed");
            ReplicationError::from(err)
        })
    }

    /// Record or resolve `set`. Consumes the stripe guard of its id.
    async fn settle(&self, set: ConflictSet, guard: StripeGuard<'_>) -> ReplicationResult<ItemOutcome> {
        let policy = self.engine.policy();

        if !policy.requires_sandbox() {
            let resolution = self.timed_resolve(&set, &policy).await;
            let outcome = self.finish(&set, resolution).await;
            drop(guard);
            return outcome;
        }

        // Readers must see the conflict while the script runs
        self.conflicts.put(set.clone())?;
        let fingerprint = set.fingerprint();
        drop(guard);

        let resolution = self.timed_resolve(&set, &policy).await;

        let _guard = self.locks.lock(set.id()).await;
        match self.conflicts.get(set.id())? {
            Some(current) if current.fingerprint() == fingerprint && current.same_members(&set) => {
                self.finish(&set, resolution).await
            }
            _ => {
                warn!(doc_id = set.id(), "Conflict changed during script resolution, result discarded");
                self.metrics.increment(ReplicationCounter::StaleScriptResults);
                Ok(ItemOutcome::Superseded)
            }
        }
    }

    async fn timed_resolve(&self, set: &ConflictSet, policy: &ResolutionPolicy) -> Resolution {
        let timer = Timer::new(ReplicationHistogram::ResolutionDurationMs);
        let resolution = self.engine.resolve_with(set, policy).await;
        timer.stop(self.metrics.as_ref());
        resolution
    }

    /// Apply a resolution. Caller holds the stripe lock of the set's id.
    async fn finish(&self, set: &ConflictSet, resolution: Resolution) -> ReplicationResult<ItemOutcome> {
        let collection = set.collection().unwrap_or_default().to_string();
        match resolution {
            Resolution::Resolved(winner) => {
                let tombstone = winner.is_tombstone();
                self.apply(&winner).await?;
                self.conflicts.clear(set.id())?;
                self.metrics.increment(ReplicationCounter::ConflictsResolved);
                self.status.record(
                    &collection,
                    ResolutionOutcome::Resolved { document_id: set.id().to_string(), tombstone, at: Timestamp::now() },
                );
                info!(doc_id = set.id(), collection = %collection, tombstone, members = set.len(), "Conflict resolved");
                Ok(ItemOutcome::Resolved { tombstone })
            }
            Resolution::Unresolved(reason) => {
                self.conflicts.put(set.clone())?;
                self.metrics.increment(ReplicationCounter::ConflictsUnresolved);
                if reason.is_script_failure() {
                    self.metrics.increment(ReplicationCounter::ScriptFailures);
                }
                self.status.record(
                    &collection,
                    ResolutionOutcome::Unresolved {
                        document_id: set.id().to_string(),
                        reason: reason.to_string(),
                        at: Timestamp::now(),
                    },
                );
                debug!(doc_id = set.id(), %reason, "Conflict left unresolved");
                Ok(ItemOutcome::Conflicted { members: set.len(), reason })
            }
        }
    }

    /// Reader path. A recorded conflict is reported with all its versions;
    /// a tombstone reads as absent.
    pub async fn get_document(&self, id: &str) -> ReplicationResult<Option<VersionedItem>> {
        let _guard = self.locks.lock(id).await;
        if let Some(set) = self.conflicts.get(id)? {
            return Err(ConflictError { id: id.to_string(), members: set.into_members() }.into());
        }
        Ok(self.storage.get(id).await?.filter(|item| !item.is_tombstone()))
    }

    /// Local write on this node. Dominates every known version of `id`, so
    /// it also resolves a recorded conflict by hand.
    pub async fn put_local(
        &self,
        id: &str,
        collection: &str,
        payload: Vec<u8>,
    ) -> ReplicationResult<VersionedItem> {
        self.write_local(id, collection, Some(payload)).await
    }

    /// Local deletion on this node
    pub async fn delete_local(&self, id: &str, collection: &str) -> ReplicationResult<VersionedItem> {
        self.write_local(id, collection, None).await
    }

    async fn write_local(
        &self,
        id: &str,
        collection: &str,
        payload: Option<Vec<u8>>,
    ) -> ReplicationResult<VersionedItem> {
        let _guard = self.locks.lock(id).await;

        let recorded = self.conflicts.get(id)?;
        let base = match &recorded {
            Some(set) => set.merged_vector(),
            None => self
                .storage
                .get(id)
                .await?
                .map(|item| item.change_vector)
                .unwrap_or_else(ChangeVector::default),
        };
        let vector = base.increment(self.node_id)?;

        let item = match payload {
            Some(payload) => VersionedItem::document(id, collection, payload, vector, Timestamp::now()),
            None => VersionedItem::tombstone(id, collection, vector, Timestamp::now()),
        };
        item.validate()?;

        self.apply(&item).await?;
        if let Some(set) = recorded {
            self.conflicts.clear(id)?;
            self.status.record(
                set.collection().unwrap_or(collection),
                ResolutionOutcome::Resolved {
                    document_id: id.to_string(),
                    tombstone: item.is_tombstone(),
                    at: item.last_modified,
                },
            );
            info!(doc_id = id, members = set.len(), "Conflict resolved by local write");
        }
        Ok(item)
    }

    /// Re-run resolution for `id` under the current policy
    pub async fn resolve_pending(&self, id: &str) -> ReplicationResult<Option<ItemOutcome>> {
        let guard = self.locks.lock(id).await;
        match self.conflicts.get(id)? {
            Some(set) => self.settle(set, guard).await.map(Some),
            None => Ok(None),
        }
    }

    /// Re-run resolution for every recorded conflict
    pub async fn resolve_all_pending(&self) -> ReplicationResult<Vec<(DocumentId, ItemOutcome)>> {
        let mut outcomes = Vec::new();
        for id in self.conflicts.ids()? {
            if let Some(outcome) = self.resolve_pending(&id).await? {
                outcomes.push((id, outcome));
            }
        }
        Ok(outcomes)
    }

    /// Change vectors of the versions currently in conflict for `id`
    pub fn conflicts(&self, id: &str) -> ReplicationResult<Vec<ChangeVector>> {
        Ok(self.conflicts.get(id)?.map(|set| set.change_vectors()).unwrap_or_default())
    }

    /// Every recorded conflict set
    pub fn conflict_sets(&self) -> ReplicationResult<Vec<ConflictSet>> {
        self.conflicts.snapshot()
    }

    /// Ids whose current version is a tombstone
    pub async fn tombstones(&self) -> ReplicationResult<Vec<DocumentId>> {
        Ok(self.storage.tombstones().await?)
    }

    pub fn status(&self) -> ReplicationResult<ResolverStatus> {
        Ok(self.status.build(&self.conflicts.snapshot()?))
    }
}
