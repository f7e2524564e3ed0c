//! Opens locking stores and begins checking transactions over one backend.

use crate::core::config::Config;
use crate::core::error::{BackendError, LockResult, LockingError};
use crate::core::time::TimestampProvider;
use crate::locking::cleaner::{LockCleanerService, StandardLockCleanerService};
use crate::locking::locker::{generate_rid, ConsistentKeyLocker};
use crate::locking::mediator::{LocalLockMediator, LocalLockMediators};
use crate::locking::status::TxId;
use crate::store::{StoreManager, TxConfig};
use crate::txn::store::ExpectedValueCheckingStore;
use crate::txn::transaction::ExpectedValueCheckingTransaction;
use bytes::Bytes;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;

/// Suffix of the companion store holding a data store's lock claims.
pub const LOCK_STORE_SUFFIX: &str = "_lock_";

/// Wraps a [`StoreManager`] so its stores take consistent-key locks.
///
/// One manager stands for one process: every locker it creates writes claims
/// under the same rid and shares its local mediators.
pub struct ExpectedValueCheckingStoreManager {
    manager: Arc<dyn StoreManager>,
    config: Config,
    times: Arc<dyn TimestampProvider>,
    rid: Bytes,
    mediators: LocalLockMediators<TxId>,
    stores: Mutex<HashMap<String, Arc<ExpectedValueCheckingStore>>>,
}

impl ExpectedValueCheckingStoreManager {
    pub fn new(
        manager: Arc<dyn StoreManager>,
        config: Config,
        times: Arc<dyn TimestampProvider>,
    ) -> Self {
        let rid = match config.locking.instance_id {
            Some(ref id) => Bytes::from(id.clone().into_bytes()),
            None => generate_rid(),
        };
        tracing::info!(
            backend = %manager.name(),
            rid = %crate::locking::claim::display_rid(&rid),
            wait = ?config.locking.lock_wait(),
            expire = ?config.locking.lock_expire(),
            "locking store manager ready"
        );
        Self {
            mediators: LocalLockMediators::new(times.clone()),
            manager,
            config,
            times,
            rid,
            stores: Mutex::new(HashMap::new()),
        }
    }

    /// Requester id written into every claim from this manager.
    pub fn rid(&self) -> &Bytes {
        &self.rid
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn times(&self) -> &Arc<dyn TimestampProvider> {
        &self.times
    }

    /// Local mediator shared by every transaction of this process that locks
    /// in store `name`.
    pub fn mediator(&self, name: &str) -> Arc<LocalLockMediator<TxId>> {
        self.mediators.get(&format!(
            "{}:{}",
            self.config.locking.local_mediator_prefix, name
        ))
    }

    /// Open `name` guarded by a consistent-key locker whose claims live in
    /// the companion store `<name>_lock_`. Repeated calls return the same
    /// store.
    pub fn open_locking(&self, name: &str) -> LockResult<Arc<ExpectedValueCheckingStore>> {
        let mut stores = self.stores.lock();
        if let Some(store) = stores.get(name) {
            return Ok(store.clone());
        }

        let data = self
            .manager
            .open_store(name)
            .map_err(|e| LockingError::backend(name, e))?;
        let lock_name = format!("{name}{LOCK_STORE_SUFFIX}");
        let lock_store = self
            .manager
            .open_store(&lock_name)
            .map_err(|e| LockingError::backend(lock_name.as_str(), e))?;

        let mediator = self.mediator(name);

        let mut builder = ConsistentKeyLocker::builder(lock_store.clone(), self.times.clone())
            .from_config(&self.config)
            .rid(self.rid.clone())
            .mediator(mediator);

        if self.config.locking.clean_expired {
            let cleaner = StandardLockCleanerService::new(
                lock_store,
                self.times.clone(),
                self.config.locking.cleaner_cooldown(),
            )
            .map_err(|e| {
                LockingError::backend(
                    lock_name.as_str(),
                    BackendError::permanent(format!("failed to start lock cleaner: {e}")),
                )
            })?;
            builder = builder.cleaner(Arc::new(cleaner) as Arc<dyn LockCleanerService>);
        }

        let store = Arc::new(ExpectedValueCheckingStore::new(
            data,
            Some(Arc::new(builder.build())),
        ));
        tracing::debug!(store = %name, lock_store = %lock_name, "opened locking store");
        stores.insert(name.to_string(), store.clone());
        Ok(store)
    }

    /// Open `name` without a locker. Lock requests on it are ignored.
    pub fn open_store(&self, name: &str) -> LockResult<Arc<ExpectedValueCheckingStore>> {
        let data = self
            .manager
            .open_store(name)
            .map_err(|e| LockingError::backend(name, e))?;
        Ok(Arc::new(ExpectedValueCheckingStore::new(data, None)))
    }

    /// Begin a data transaction with `config` alongside a key-consistent one.
    pub fn begin_transaction(&self, config: TxConfig) -> LockResult<ExpectedValueCheckingTransaction> {
        let backend = self.manager.name();
        let mut strong_config = TxConfig::key_consistent();
        strong_config.group_name = config.group_name.clone();

        let data = self
            .manager
            .begin_transaction(config)
            .map_err(|e| LockingError::backend(backend, e))?;
        let strong = match self.manager.begin_transaction(strong_config) {
            Ok(tx) => tx,
            Err(e) => {
                if let Err(rollback) = data.rollback() {
                    tracing::warn!(error = %rollback, "failed to roll back data transaction");
                }
                return Err(LockingError::backend(backend, e));
            }
        };

        Ok(ExpectedValueCheckingTransaction::new(
            backend,
            data,
            strong,
            self.times.clone(),
            &self.config.storage,
        ))
    }
}
