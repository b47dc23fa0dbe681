//! Local-first sync coordinator.
//!
//! Startup:
//! 1. load every collection from the [`LocalCache`] (first run persists defaults)
//! 2. probe the remote store (bounded by `probe_timeout`); on failure the
//!    session is local-only for its whole lifetime
//! 3. cloud-active: start the background writer, queue the seed batch (empty
//!    remote store only) and the outbox replay ahead of any new write, then
//!    attach one subscription per collection
//!
//! Write path, per mutation: cache, observers and sibling contexts are
//! updated synchronously; the matching remote write is recorded in the outbox
//! and handed to the background writer, which never blocks the caller. The
//! writer is the only task that talks to the remote store after startup, so
//! batches land in the order they were issued.

use std::collections::HashSet;
use std::sync::{Arc, Mutex, RwLock, Weak};

use chrono::Utc;
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

use smartmaint_core::personnel::normalize_area_name;
use smartmaint_core::{
    AppConfig, Area, AreaId, DomainError, Employee, EmployeeId, Entity, Product, ProductId, Role, StockWithdrawal,
    Transaction, apply_withdrawals, cascade_area_delete, cascade_area_rename, remove_by_id, seed, upsert_by_id,
};
use smartmaint_events::{
    Collection, ContextId, CrossContextBroadcaster, EventBus, ObserverBus, ObserverHandle, Subscription, SyncEvent,
};

use crate::cache::{CacheError, LocalCache};
use crate::outbox::PendingWrites;
use crate::remote::{CONFIG_DOCUMENT, RemoteError, RemoteStore, RemoteSubscription, WriteOp, batch_merge, batch_set};
use crate::session::{SessionError, SessionState};
use crate::settings::SyncSettings;
use crate::types::{DrainReport, Snapshot, SyncMode};

/// Remote field decremented by stock withdrawals.
const STOCK_FIELD: &str = "stock_actual";

#[derive(Debug, Error)]
pub enum SyncError {
    #[error(transparent)]
    Cache(#[from] CacheError),
    #[error(transparent)]
    Domain(#[from] DomainError),
    #[error(transparent)]
    Remote(#[from] RemoteError),
    #[error(transparent)]
    Session(#[from] SessionError),
    #[error("failed to encode remote document: {0}")]
    Encode(#[from] serde_json::Error),
    #[error("no async runtime available")]
    NoRuntime,
    #[error("remote writer not running")]
    WriterStopped,
    #[error("session state lock poisoned")]
    Poisoned,
}

enum WriterMsg {
    Seed(Vec<WriteOp>),
    Write { seq: Option<i64>, ops: Vec<WriteOp> },
    Drain(oneshot::Sender<Result<DrainReport, SyncError>>),
    Flush(oneshot::Sender<()>),
}

struct Inner {
    cache: LocalCache,
    outbox: PendingWrites,
    remote: Arc<dyn RemoteStore>,
    observers: ObserverBus<SyncEvent>,
    broadcaster: CrossContextBroadcaster,
    context: ContextId,
    settings: SyncSettings,
    session: RwLock<SessionState>,
    /// Serialises cache write, observer publish and outbox dispatch so all three see one order.
    apply_lock: Mutex<()>,
    subscriptions: Mutex<Vec<RemoteSubscription>>,
    writer: Mutex<Option<mpsc::UnboundedSender<WriterMsg>>>,
    writer_task: Mutex<Option<JoinHandle<()>>>,
    listener: Mutex<Option<JoinHandle<()>>>,
    /// Outbox entries queued on the writer and not yet settled.
    in_flight: Mutex<HashSet<i64>>,
}

/// One sync session per running client.
///
/// Constructed explicitly by the composition root; clones share the session.
#[derive(Clone)]
pub struct SyncCoordinator {
    inner: Arc<Inner>,
}

impl core::fmt::Debug for SyncCoordinator {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("SyncCoordinator")
            .field("context", &self.inner.context)
            .field("mode", &self.mode())
            .finish()
    }
}

impl SyncCoordinator {
    pub fn new(
        cache: LocalCache,
        remote: Arc<dyn RemoteStore>,
        broadcaster: CrossContextBroadcaster,
        settings: SyncSettings,
    ) -> Result<Self, SyncError> {
        let outbox = PendingWrites::attach(&cache)?;
        Ok(Self {
            inner: Arc::new(Inner {
                cache,
                outbox,
                remote,
                observers: ObserverBus::new(),
                broadcaster,
                context: ContextId::new(),
                settings,
                session: RwLock::new(SessionState::new()),
                apply_lock: Mutex::new(()),
                subscriptions: Mutex::new(Vec::new()),
                writer: Mutex::new(None),
                writer_task: Mutex::new(None),
                listener: Mutex::new(None),
                in_flight: Mutex::new(HashSet::new()),
            }),
        })
    }

    /// Open the device cache under `settings.data_dir` with a relay channel of
    /// `settings.broadcast_capacity`.
    ///
    /// Sibling instances that should hear each other are built with [`new`](Self::new)
    /// around a clone of [`broadcaster`](Self::broadcaster).
    pub fn open(settings: SyncSettings, remote: Arc<dyn RemoteStore>) -> Result<Self, SyncError> {
        let cache = LocalCache::open(settings.database_path())?;
        let broadcaster = CrossContextBroadcaster::new(settings.broadcast_capacity);
        Self::new(cache, remote, broadcaster, settings)
    }

    pub fn broadcaster(&self) -> &CrossContextBroadcaster {
        &self.inner.broadcaster
    }

    pub fn context_id(&self) -> ContextId {
        self.inner.context
    }

    pub fn mode(&self) -> SyncMode {
        self.inner
            .session
            .read()
            .map(|s| s.mode())
            .unwrap_or(SyncMode::LocalOnly)
    }

    pub fn is_cloud_active(&self) -> bool {
        self.mode() == SyncMode::CloudActive
    }

    pub fn outbox(&self) -> &PendingWrites {
        &self.inner.outbox
    }

    /// Start the session. Must be called once, from within a Tokio runtime.
    pub async fn initialize(&self) -> Result<Snapshot, SyncError> {
        if self.mode() != SyncMode::Uninitialized {
            return Err(SessionError::AlreadyDecided(self.mode()).into());
        }

        let local = self.snapshot()?;
        self.listen_cross_context()?;

        let reachable = self.inner.remote.probe(self.inner.settings.probe_timeout).await;
        if !reachable {
            self.decide(SyncMode::LocalOnly)?;
            tracing::warn!(
                timeout_ms = self.inner.settings.probe_timeout.as_millis() as u64,
                "remote store unreachable; running local-only"
            );
            return Ok(local);
        }

        let remote_empty = match self.inner.remote.is_empty(Collection::Products).await {
            Ok(empty) => empty,
            Err(err) => {
                tracing::warn!(error = %err, "could not check remote store for seeding");
                false
            }
        };

        // Writes issued before the decision are in the seed snapshot and never
        // dispatched; writes issued after it queue behind the seed and replay.
        let replay = {
            let _guard = self.inner.apply_lock.lock().map_err(|_| CacheError::Poisoned)?;
            self.start_writer();
            if remote_empty {
                self.queue_seed()?;
            }
            let replay = self.inner.request_drain();
            self.decide(SyncMode::CloudActive)?;
            replay
        };
        tracing::info!("remote store reachable; cloud sync active");

        if let Some(replay) = replay {
            match replay.await {
                Ok(report) => {
                    let report = report?;
                    if !report.drained.is_empty() || !report.dead.is_empty() || report.stopped_at.is_some() {
                        tracing::info!(
                            drained = report.drained.len(),
                            dead = report.dead.len(),
                            remaining = report.remaining,
                            stopped_at = ?report.stopped_at,
                            "replayed pending remote writes"
                        );
                    }
                }
                Err(_) => tracing::warn!("remote writer stopped before replaying pending writes"),
            }
        }

        self.flush().await;
        self.attach_subscriptions();

        self.snapshot()
    }

    fn decide(&self, mode: SyncMode) -> Result<(), SyncError> {
        let mut session = self
            .inner
            .session
            .write()
            .map_err(|_| SyncError::Poisoned)?;
        session.decide(mode)?;
        Ok(())
    }

    /// First device wins: copy every local collection and the config into the
    /// empty remote store as whole documents.
    fn queue_seed(&self) -> Result<(), SyncError> {
        let ops = seed_ops(&self.snapshot()?)?;
        tracing::debug!(documents = ops.len(), "queueing seed batch for empty remote store");
        if !self.inner.send(WriterMsg::Seed(ops)) {
            tracing::error!("remote writer not running; remote store left unseeded");
        }
        Ok(())
    }

    /// Replay outbox entries in sequence order on the background writer.
    ///
    /// Transient failures stop the replay; batches the store refuses for good
    /// are parked as dead and the replay moves on. Entries already queued on
    /// the writer are skipped.
    pub async fn drain_pending(&self) -> Result<DrainReport, SyncError> {
        self.inner.session.read().map_err(|_| SyncError::Poisoned)?.require_cloud()?;

        let reply = self.inner.request_drain().ok_or(SyncError::WriterStopped)?;
        reply.await.map_err(|_| SyncError::WriterStopped)?
    }

    fn attach_subscriptions(&self) {
        let mut subs = Vec::with_capacity(Collection::ALL.len());

        for collection in Collection::ALL.into_iter().filter(|c| !c.is_singleton()) {
            let weak = Arc::downgrade(&self.inner);
            subs.push(self.inner.remote.subscribe(
                collection,
                Arc::new(move |docs: Vec<Value>| {
                    if let Some(inner) = weak.upgrade() {
                        inner.apply_remote(collection, Value::Array(docs));
                    }
                }),
            ));
        }

        let weak = Arc::downgrade(&self.inner);
        subs.push(self.inner.remote.subscribe_singleton(
            Collection::Config,
            CONFIG_DOCUMENT,
            Arc::new(move |doc: Option<Value>| {
                if let (Some(inner), Some(doc)) = (weak.upgrade(), doc) {
                    inner.apply_remote(Collection::Config, doc);
                }
            }),
        ));

        tracing::debug!(count = subs.len(), "remote subscriptions attached");
        match self.inner.subscriptions.lock() {
            Ok(mut slot) => slot.extend(subs),
            Err(_) => tracing::error!("subscription registry poisoned; subscriptions dropped"),
        }
    }

    fn start_writer(&self) {
        let (tx, mut rx) = mpsc::unbounded_channel::<WriterMsg>();
        let weak: Weak<Inner> = Arc::downgrade(&self.inner);

        let task = tokio::spawn(async move {
            while let Some(msg) = rx.recv().await {
                let Some(inner) = weak.upgrade() else { break };
                match msg {
                    WriterMsg::Seed(ops) => match inner.remote.commit(&ops).await {
                        Ok(()) => tracing::info!(documents = ops.len(), "seeded empty remote store"),
                        Err(err) => tracing::error!(error = %err, "failed to seed remote store"),
                    },
                    WriterMsg::Write { seq, ops } => {
                        let result = inner.remote.commit(&ops).await;
                        inner.settle(seq, result);
                    }
                    WriterMsg::Drain(reply) => {
                        let _ = reply.send(inner.replay().await);
                    }
                    WriterMsg::Flush(done) => {
                        let _ = done.send(());
                    }
                }
            }
            tracing::debug!("remote writer stopped");
        });

        if let Ok(mut slot) = self.inner.writer.lock() {
            *slot = Some(tx);
        }
        if let Ok(mut slot) = self.inner.writer_task.lock() {
            *slot = Some(task);
        }
    }

    /// Wait until every remote write queued so far has been attempted.
    pub async fn flush(&self) {
        let (tx, rx) = oneshot::channel();
        if self.inner.send(WriterMsg::Flush(tx)) {
            let _ = rx.await;
        }
    }

    /// Relay sibling contexts' changes to this instance's observers.
    ///
    /// Idempotent; requires a Tokio runtime.
    pub fn listen_cross_context(&self) -> Result<(), SyncError> {
        let mut slot = match self.inner.listener.lock() {
            Ok(slot) => slot,
            Err(_) => return Ok(()),
        };
        if slot.as_ref().is_some_and(|h| !h.is_finished()) {
            return Ok(());
        }

        let handle = tokio::runtime::Handle::try_current().map_err(|_| SyncError::NoRuntime)?;
        let mut listener = self.inner.broadcaster.listen(self.inner.context);
        let weak = Arc::downgrade(&self.inner);

        *slot = Some(handle.spawn(async move {
            while let Some(event) = listener.recv().await {
                let Some(inner) = weak.upgrade() else { break };
                tracing::debug!(collection = %event.collection(), "change relayed from sibling context");
                if let Err(err) = inner.observers.publish(event) {
                    tracing::error!(error = ?err, "failed to notify observers of relayed change");
                }
            }
        }));
        Ok(())
    }

    /// Detach remote subscriptions, stop the relay listener and the writer.
    ///
    /// Queued remote writes are attempted first.
    pub async fn shutdown(&self) {
        self.flush().await;

        if let Ok(mut subs) = self.inner.subscriptions.lock() {
            subs.clear();
        }
        if let Ok(mut writer) = self.inner.writer.lock() {
            writer.take();
        }
        let task = self.inner.writer_task.lock().ok().and_then(|mut t| t.take());
        if let Some(task) = task {
            let _ = task.await;
        }
        if let Some(listener) = self.inner.listener.lock().ok().and_then(|mut l| l.take()) {
            listener.abort();
        }
        tracing::info!(context = %self.inner.context, "sync session shut down");
    }

    // --- observers -------------------------------------------------------

    pub fn subscribe(&self) -> Subscription<SyncEvent> {
        self.inner.observers.subscribe()
    }

    /// Callback observer; unsubscribed when the handle drops.
    ///
    /// Callbacks run while the write that triggered them still holds the
    /// apply lock and must not write through the coordinator themselves.
    pub fn subscribe_with<F>(&self, callback: F) -> ObserverHandle<SyncEvent>
    where
        F: Fn(&SyncEvent) + Send + Sync + 'static,
    {
        self.inner.observers.subscribe_with(callback)
    }

    // --- reads -----------------------------------------------------------

    pub fn snapshot(&self) -> Result<Snapshot, SyncError> {
        Ok(Snapshot {
            products: self.products()?,
            employees: self.employees()?,
            areas: self.areas()?,
            transactions: self.transactions()?,
            config: self.config()?,
        })
    }

    pub fn products(&self) -> Result<Vec<Product>, SyncError> {
        self.inner.read(Collection::Products, seed::products)
    }

    pub fn employees(&self) -> Result<Vec<Employee>, SyncError> {
        self.inner.read(Collection::Employees, seed::employees)
    }

    pub fn areas(&self) -> Result<Vec<Area>, SyncError> {
        self.inner.read(Collection::Areas, seed::areas)
    }

    pub fn transactions(&self) -> Result<Vec<Transaction>, SyncError> {
        self.inner.read(Collection::Transactions, || seed::transactions(Utc::now()))
    }

    pub fn config(&self) -> Result<AppConfig, SyncError> {
        self.inner.read(Collection::Config, AppConfig::default)
    }

    /// Role unlocked by `password` under the current security settings.
    pub fn authorize(&self, password: &str) -> Result<Role, SyncError> {
        Ok(self.config()?.authorize(password)?)
    }

    // --- writes ----------------------------------------------------------

    /// Replace the product list. Products missing from `products` are deleted remotely.
    pub fn save_products(&self, products: Vec<Product>) -> Result<(), SyncError> {
        let mut ops = removed_ops(Collection::Products, &self.products()?, &products);
        ops.extend(batch_merge(Collection::Products, &products, |p| p.id.to_string())?);
        self.inner.commit_local(SyncEvent::Products(products), ops)
    }

    pub fn save_employees(&self, employees: Vec<Employee>) -> Result<(), SyncError> {
        for e in &employees {
            e.validate()?;
        }
        let mut ops = removed_ops(Collection::Employees, &self.employees()?, &employees);
        ops.extend(batch_merge(Collection::Employees, &employees, |e| e.id.to_string())?);
        self.inner.commit_local(SyncEvent::Employees(employees), ops)
    }

    pub fn save_areas(&self, areas: Vec<Area>) -> Result<(), SyncError> {
        for a in &areas {
            normalize_area_name(&a.name)?;
        }
        let mut ops = removed_ops(Collection::Areas, &self.areas()?, &areas);
        ops.extend(batch_merge(Collection::Areas, &areas, |a| a.id.to_string())?);
        self.inner.commit_local(SyncEvent::Areas(areas), ops)
    }

    pub fn save_config(&self, config: AppConfig) -> Result<(), SyncError> {
        config.validate()?;
        let ops = vec![WriteOp::set(Collection::Config, CONFIG_DOCUMENT, serde_json::to_value(&config)?)];
        self.inner.commit_local(SyncEvent::Config(config), ops)
    }

    /// Append a transaction (newest first). Transactions are never edited.
    pub fn add_transaction(&self, transaction: Transaction) -> Result<(), SyncError> {
        let ops = vec![WriteOp::set(
            Collection::Transactions,
            transaction.id.to_string(),
            serde_json::to_value(&transaction)?,
        )];

        let mut transactions = self.transactions()?;
        transactions.insert(0, transaction);
        self.inner.commit_local(SyncEvent::Transactions(transactions), ops)
    }

    /// Decrement stock, clamped at zero locally and as atomic increments remotely.
    pub fn update_stock(&self, withdrawals: &[StockWithdrawal]) -> Result<(), SyncError> {
        let mut products = self.products()?;
        apply_withdrawals(&mut products, withdrawals);

        let ops = withdrawals
            .iter()
            .filter(|w| w.qty > 0 && products.iter().any(|p| p.id == w.product_id))
            .map(|w| WriteOp::increment(Collection::Products, w.product_id.to_string(), STOCK_FIELD, -(w.qty as i64)))
            .collect();

        self.inner.commit_local(SyncEvent::Products(products), ops)
    }

    pub fn upsert_product(&self, product: Product) -> Result<(), SyncError> {
        let ops = vec![WriteOp::merge(
            Collection::Products,
            product.id.to_string(),
            serde_json::to_value(&product)?,
        )];
        let mut products = self.products()?;
        upsert_by_id(&mut products, product);
        self.inner.commit_local(SyncEvent::Products(products), ops)
    }

    pub fn delete_product(&self, id: &ProductId) -> Result<Product, SyncError> {
        let mut products = self.products()?;
        let removed = remove_by_id(&mut products, id).ok_or_else(|| DomainError::not_found("product", id.as_str()))?;
        let ops = vec![WriteOp::delete(Collection::Products, id.to_string())];
        self.inner.commit_local(SyncEvent::Products(products), ops)?;
        Ok(removed)
    }

    pub fn upsert_employee(&self, employee: Employee) -> Result<(), SyncError> {
        employee.validate()?;
        let ops = vec![WriteOp::merge(
            Collection::Employees,
            employee.id.to_string(),
            serde_json::to_value(&employee)?,
        )];
        let mut employees = self.employees()?;
        upsert_by_id(&mut employees, employee);
        self.inner.commit_local(SyncEvent::Employees(employees), ops)
    }

    pub fn delete_employee(&self, id: &EmployeeId) -> Result<Employee, SyncError> {
        let mut employees = self.employees()?;
        let removed =
            remove_by_id(&mut employees, id).ok_or_else(|| DomainError::not_found("employee", id.as_str()))?;
        let ops = vec![WriteOp::delete(Collection::Employees, id.to_string())];
        self.inner.commit_local(SyncEvent::Employees(employees), ops)?;
        Ok(removed)
    }

    pub fn add_area(&self, name: &str) -> Result<Area, SyncError> {
        let area = Area::new(name)?;
        let mut areas = self.areas()?;
        if areas.iter().any(|a| a.name == area.name) {
            return Err(DomainError::invariant(format!("area {:?} already exists", area.name)).into());
        }

        let ops = vec![WriteOp::merge(Collection::Areas, area.id.to_string(), serde_json::to_value(&area)?)];
        areas.push(area.clone());
        self.inner.commit_local(SyncEvent::Areas(areas), ops)?;
        Ok(area)
    }

    /// Rename an area and every employee assignment that names it.
    pub fn rename_area(&self, id: &AreaId, new_name: &str) -> Result<(), SyncError> {
        let new_name = normalize_area_name(new_name)?;
        let mut areas = self.areas()?;

        if areas.iter().any(|a| a.name == new_name && a.id != *id) {
            return Err(DomainError::invariant(format!("area {new_name:?} already exists")).into());
        }
        let area = areas
            .iter_mut()
            .find(|a| a.id == *id)
            .ok_or_else(|| DomainError::not_found("area", id.as_str()))?;
        if area.name == new_name {
            return Ok(());
        }

        let old_name = std::mem::replace(&mut area.name, new_name.clone());
        let area_ops = vec![WriteOp::merge(Collection::Areas, id.to_string(), serde_json::to_value(&*area)?)];
        self.inner.commit_local(SyncEvent::Areas(areas), area_ops)?;

        let mut employees = self.employees()?;
        let before = employees.clone();
        let touched = cascade_area_rename(&mut employees, &old_name, &new_name);
        tracing::info!(from = %old_name, to = %new_name, employees = touched, "area renamed");
        if touched > 0 {
            let ops = changed_ops(Collection::Employees, &before, &employees)?;
            self.inner.commit_local(SyncEvent::Employees(employees), ops)?;
        }
        Ok(())
    }

    /// Delete an area and drop it from every employee assignment.
    pub fn delete_area(&self, id: &AreaId) -> Result<Area, SyncError> {
        let mut areas = self.areas()?;
        let removed = remove_by_id(&mut areas, id).ok_or_else(|| DomainError::not_found("area", id.as_str()))?;
        self.inner
            .commit_local(SyncEvent::Areas(areas), vec![WriteOp::delete(Collection::Areas, id.to_string())])?;

        let mut employees = self.employees()?;
        let before = employees.clone();
        let touched = cascade_area_delete(&mut employees, &removed.name);
        tracing::info!(area = %removed.name, employees = touched, "area deleted");
        if touched > 0 {
            let ops = changed_ops(Collection::Employees, &before, &employees)?;
            self.inner.commit_local(SyncEvent::Employees(employees), ops)?;
        }
        Ok(removed)
    }
}

impl Inner {
    fn read<T, F>(&self, collection: Collection, default: F) -> Result<T, SyncError>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce() -> T,
    {
        let key = collection.cache_key();
        if let Some(value) = self.cache.get(key)? {
            return Ok(value);
        }
        Ok(self.cache.load(key, default())?)
    }

    fn cloud_active(&self) -> bool {
        self.session.read().map(|s| s.is_cloud_active()).unwrap_or(false)
    }

    /// Cache, then observers, then siblings, then (cloud-active only) the remote store.
    fn commit_local(&self, event: SyncEvent, ops: Vec<WriteOp>) -> Result<(), SyncError> {
        let collection = event.collection();
        let _guard = self.apply_lock.lock().map_err(|_| CacheError::Poisoned)?;

        persist(&self.cache, &event)?;
        if let Err(err) = self.observers.publish(event.clone()) {
            tracing::error!(%collection, error = ?err, "failed to notify observers");
        }

        let reached = self.broadcaster.post(self.context, event);
        tracing::debug!(%collection, siblings = reached, "local write applied");

        if self.cloud_active() && !ops.is_empty() {
            self.dispatch(collection, ops);
        }
        Ok(())
    }

    fn send(&self, msg: WriterMsg) -> bool {
        self.writer
            .lock()
            .ok()
            .and_then(|w| w.as_ref().map(|w| w.send(msg).is_ok()))
            .unwrap_or(false)
    }

    fn request_drain(&self) -> Option<oneshot::Receiver<Result<DrainReport, SyncError>>> {
        let (tx, rx) = oneshot::channel();
        self.send(WriterMsg::Drain(tx)).then_some(rx)
    }

    fn dispatch(&self, collection: Collection, ops: Vec<WriteOp>) {
        // Enqueue and mark in flight atomically, so a concurrent replay never
        // sees the entry unmarked.
        let seq = {
            let mut in_flight = self.in_flight.lock().ok();
            match self.outbox.enqueue(collection, &ops) {
                Ok(seq) => {
                    if let Some(in_flight) = in_flight.as_mut() {
                        in_flight.insert(seq);
                    }
                    Some(seq)
                }
                Err(err) => {
                    tracing::error!(%collection, error = %err, "failed to record pending write; sending without outbox entry");
                    None
                }
            }
        };

        if !self.send(WriterMsg::Write { seq, ops }) {
            tracing::warn!(%collection, ?seq, "remote writer not running; write left in outbox");
            if let Some(seq) = seq {
                self.release(seq);
            }
        }
    }

    /// Runs on the writer task only.
    async fn replay(&self) -> Result<DrainReport, SyncError> {
        let mut report = DrainReport::default();

        for write in self.outbox.list_pending()? {
            if self.is_in_flight(write.seq) {
                continue;
            }
            match self.remote.commit(&write.ops).await {
                Ok(()) => {
                    self.outbox.mark_done(write.seq)?;
                    report.drained.push(write.seq);
                }
                Err(err) if err.is_permanent() => {
                    tracing::error!(seq = write.seq, collection = %write.collection, error = %err, "pending write can never apply; parked");
                    self.outbox.mark_dead(write.seq, &err.to_string())?;
                    report.dead.push(write.seq);
                }
                Err(err) => {
                    tracing::warn!(seq = write.seq, collection = %write.collection, error = %err, "pending write still failing");
                    self.outbox.mark_failed(write.seq, &err.to_string())?;
                    report.stopped_at = Some(write.seq);
                    break;
                }
            }
        }

        report.remaining = self.outbox.len()?;
        Ok(report)
    }

    fn settle(&self, seq: Option<i64>, result: Result<(), RemoteError>) {
        match (seq, result) {
            (Some(seq), Ok(())) => {
                if let Err(err) = self.outbox.mark_done(seq) {
                    tracing::error!(seq, error = %err, "failed to clear pending write");
                }
            }
            (Some(seq), Err(err)) if err.is_permanent() => {
                tracing::error!(seq, error = %err, "remote write refused; parked");
                if let Err(err) = self.outbox.mark_dead(seq, &err.to_string()) {
                    tracing::error!(seq, error = %err, "failed to park refused write");
                }
            }
            (Some(seq), Err(err)) => {
                tracing::warn!(seq, error = %err, "remote write failed; kept for next session");
                if let Err(err) = self.outbox.mark_failed(seq, &err.to_string()) {
                    tracing::error!(seq, error = %err, "failed to record write failure");
                }
            }
            (None, Ok(())) => {}
            (None, Err(err)) => tracing::warn!(error = %err, "remote write failed"),
        }
        if let Some(seq) = seq {
            self.release(seq);
        }
    }

    /// A poisoned registry counts as in flight so nothing is sent twice.
    fn is_in_flight(&self, seq: i64) -> bool {
        self.in_flight.lock().map(|s| s.contains(&seq)).unwrap_or(true)
    }

    fn release(&self, seq: i64) {
        if let Ok(mut in_flight) = self.in_flight.lock() {
            in_flight.remove(&seq);
        }
    }

    /// Subscription push: overwrite the cache for `collection`, then notify.
    fn apply_remote(&self, collection: Collection, value: Value) {
        let event = match SyncEvent::from_value(collection, value) {
            Ok(event) => event,
            Err(err) => {
                tracing::warn!(%collection, error = %err, "ignoring malformed remote snapshot");
                return;
            }
        };

        let Ok(_guard) = self.apply_lock.lock() else {
            tracing::error!(%collection, "apply lock poisoned; remote snapshot dropped");
            return;
        };
        if let Err(err) = persist(&self.cache, &event) {
            tracing::error!(%collection, error = %err, "failed to cache remote snapshot");
            return;
        }
        tracing::debug!(%collection, "remote snapshot applied");
        if let Err(err) = self.observers.publish(event) {
            tracing::error!(%collection, error = ?err, "failed to notify observers");
        }
    }
}

impl Drop for Inner {
    fn drop(&mut self) {
        if let Some(listener) = self.listener.get_mut().ok().and_then(|l| l.take()) {
            listener.abort();
        }
    }
}

fn persist(cache: &LocalCache, event: &SyncEvent) -> Result<(), CacheError> {
    let key = event.collection().cache_key();
    match event {
        SyncEvent::Products(v) => cache.save(key, v),
        SyncEvent::Employees(v) => cache.save(key, v),
        SyncEvent::Areas(v) => cache.save(key, v),
        SyncEvent::Transactions(v) => cache.save(key, v),
        SyncEvent::Config(v) => cache.save(key, v),
    }
}

fn seed_ops(local: &Snapshot) -> Result<Vec<WriteOp>, serde_json::Error> {
    let mut ops = batch_set(Collection::Products, &local.products, |p| p.id.to_string())?;
    ops.extend(batch_set(Collection::Employees, &local.employees, |e| e.id.to_string())?);
    ops.extend(batch_set(Collection::Areas, &local.areas, |a| a.id.to_string())?);
    ops.extend(batch_set(Collection::Transactions, &local.transactions, |t| t.id.to_string())?);
    ops.push(WriteOp::set(Collection::Config, CONFIG_DOCUMENT, serde_json::to_value(&local.config)?));
    Ok(ops)
}

/// Deletes for entities present in `before` but not in `after`.
fn removed_ops<T: Entity>(collection: Collection, before: &[T], after: &[T]) -> Vec<WriteOp>
where
    T::Id: core::fmt::Display,
{
    before
        .iter()
        .filter(|old| !after.iter().any(|new| new.id() == old.id()))
        .map(|old| WriteOp::delete(collection, old.id().to_string()))
        .collect()
}

/// Merges for entities that differ between `before` and `after` (same order).
fn changed_ops<T>(collection: Collection, before: &[T], after: &[T]) -> Result<Vec<WriteOp>, serde_json::Error>
where
    T: Entity + Serialize + PartialEq,
    T::Id: core::fmt::Display,
{
    after
        .iter()
        .zip(before)
        .filter(|(new, old)| new != old)
        .map(|(new, _)| Ok(WriteOp::merge(collection, new.id().to_string(), serde_json::to_value(new)?)))
        .collect()
}
