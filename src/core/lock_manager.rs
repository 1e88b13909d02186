//! Lock manager: the single authority over resource ownership
//!
//! All ownership and wait-registration state lives in one [`LockTable`] behind
//! one `parking_lot::Mutex`. Every write acquisition, release and snapshot runs
//! inside that mutex, so a snapshot always reflects a state the table actually
//! held. Suspended clients sleep on a condition variable tied to the same mutex
//! and are woken by `release`.
//!
//! Write locks are exclusive and not reentrant: a client asking again for a
//! resource it already holds gets [`LockError::AlreadyHeld`].

use crate::core::error::LockError;
use crate::core::shutdown::ShutdownSignal;
use crate::core::snapshot::{ClientSnapshot, GlobalSnapshot};
use crate::core::types::{ClientId, ClientStatus, Resource, ResourceId, SnapshotId};
use chrono::Utc;
use fxhash::{FxHashMap, FxHashSet};
use parking_lot::{Condvar, Mutex};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tracing::{debug, trace};

/// Upper bound on a single condition-variable wait; shutdown is re-checked
/// after every slice.
const WAIT_SLICE: Duration = Duration::from_millis(100);

/// Result of a non-blocking write attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteOutcome {
    /// The caller now owns the resource
    Acquired,
    /// Another client owns it; the caller is registered as waiting
    Blocked { owner: ClientId },
}

/// Result of a suspended wait
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitOutcome {
    /// A release made the client runnable; retry the acquisition
    Woken,
    /// Shutdown fired; the wait registration was withdrawn
    Interrupted,
}

/// Result of the full acquire / wait / retry loop
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Acquisition {
    Acquired,
    Interrupted,
}

/// Live per-client bookkeeping
#[derive(Debug, Default)]
struct ClientState {
    owned: FxHashSet<ResourceId>,
    status: ClientStatus,
}

/// The authoritative ownership and wait-for state
struct LockTable {
    resources: Vec<Resource>,
    clients: FxHashMap<ClientId, ClientState>,
    next_client_id: ClientId,
    last_snapshot_id: SnapshotId,
}

impl LockTable {
    fn resource(&self, id: ResourceId) -> Result<&Resource, LockError> {
        self.resources.get(id).ok_or(LockError::UnknownResource(id))
    }

    fn client_mut(&mut self, id: ClientId) -> Result<&mut ClientState, LockError> {
        self.clients.get_mut(&id).ok_or(LockError::UnknownClient(id))
    }

    fn status(&self, id: ClientId) -> Result<ClientStatus, LockError> {
        self.clients
            .get(&id)
            .map(|c| c.status)
            .ok_or(LockError::UnknownClient(id))
    }

    fn try_acquire(
        &mut self,
        resource: ResourceId,
        client: ClientId,
    ) -> Result<WriteOutcome, LockError> {
        let owner = self.resource(resource)?.owner;
        let state = self.client_mut(client)?;

        match owner {
            None => {
                state.owned.insert(resource);
                state.status = ClientStatus::Runnable;
                self.resources[resource].owner = Some(client);
                Ok(WriteOutcome::Acquired)
            }
            Some(owner) if owner == client => Err(LockError::AlreadyHeld { client, resource }),
            Some(owner) => {
                state.status = ClientStatus::Waiting(resource);
                Ok(WriteOutcome::Blocked { owner })
            }
        }
    }

    /// Clear ownership and mark every waiter on the resource runnable
    ///
    /// # Returns
    /// Number of clients made runnable
    fn release(&mut self, resource: ResourceId, client: ClientId) -> Result<usize, LockError> {
        let owner = self.resource(resource)?.owner;
        if owner != Some(client) {
            // Distinguish a missing client from a plain ownership violation
            self.client_mut(client)?;
            return Err(LockError::NotOwner {
                client,
                resource,
                owner,
            });
        }

        self.client_mut(client)?.owned.remove(&resource);
        self.resources[resource].owner = None;

        let mut woken = 0;
        for state in self.clients.values_mut() {
            if state.status == ClientStatus::Waiting(resource) {
                state.status = ClientStatus::Runnable;
                woken += 1;
            }
        }
        Ok(woken)
    }

    fn capture(&mut self, taken_at: String) -> GlobalSnapshot {
        self.last_snapshot_id += 1;
        let mut clients: Vec<ClientSnapshot> = self
            .clients
            .iter()
            .map(|(&id, state)| {
                ClientSnapshot::new(
                    id,
                    state.owned.iter().copied().collect(),
                    state.status.waiting_for(),
                )
            })
            .collect();
        clients.sort_by_key(|c| c.id);

        GlobalSnapshot {
            id: self.last_snapshot_id,
            taken_at,
            clients,
            resources: self.resources.clone(),
        }
    }
}

/// Sole arbiter of resource ownership and wait registration
pub struct LockManager {
    table: Mutex<LockTable>,
    released: Condvar,
    resource_count: usize,
    shutdown: ShutdownSignal,
}

impl LockManager {
    /// Create a manager for `resource_count` resources
    ///
    /// The manager subscribes to `shutdown` so that suspended clients are woken
    /// as soon as it fires.
    pub fn new(resource_count: usize, shutdown: ShutdownSignal) -> Arc<Self> {
        let manager = Arc::new(LockManager {
            table: Mutex::new(LockTable {
                resources: (0..resource_count).map(Resource::new).collect(),
                clients: FxHashMap::default(),
                next_client_id: 1,
                last_snapshot_id: 0,
            }),
            released: Condvar::new(),
            resource_count,
            shutdown: shutdown.clone(),
        });

        let weak: Weak<LockManager> = Arc::downgrade(&manager);
        shutdown.on_trigger(move || {
            if let Some(manager) = weak.upgrade() {
                manager.wake_all();
            }
        });
        manager
    }

    pub fn resource_count(&self) -> usize {
        self.resource_count
    }

    /// Register a new client and return its id
    pub fn register_client(&self) -> ClientId {
        let mut table = self.table.lock();
        let id = table.next_client_id;
        table.next_client_id += 1;
        table.clients.insert(id, ClientState::default());
        id
    }

    /// Current owner of a resource
    pub fn owner_of(&self, resource: ResourceId) -> Result<Option<ClientId>, LockError> {
        Ok(self.table.lock().resource(resource)?.owner)
    }

    /// Lock-free read
    ///
    /// Reads take no lock in this model: the call never blocks and never
    /// touches ownership state.
    pub fn acquire_read(&self, resource: ResourceId) -> Result<(), LockError> {
        if resource >= self.resource_count {
            return Err(LockError::UnknownResource(resource));
        }
        Ok(())
    }

    /// Try to take the write lock on a resource
    ///
    /// # Returns
    /// * `Acquired` - the resource was free and now belongs to `client`
    /// * `Blocked` - another client owns it; `client` is now registered as
    ///   waiting and must call [`LockManager::wait_until_runnable`] before
    ///   retrying
    ///
    /// # Errors
    /// `AlreadyHeld` if `client` already owns the resource, or an unknown-id
    /// error.
    pub fn acquire_write(
        &self,
        resource: ResourceId,
        client: ClientId,
    ) -> Result<WriteOutcome, LockError> {
        let outcome = self.table.lock().try_acquire(resource, client)?;
        trace!(client, resource, ?outcome, "write attempt");
        Ok(outcome)
    }

    /// Release a write lock and wake the clients waiting for it
    ///
    /// # Errors
    /// `NotOwner` if `client` does not hold the resource.
    pub fn release(&self, resource: ResourceId, client: ClientId) -> Result<(), LockError> {
        let woken = self.table.lock().release(resource, client)?;
        if woken > 0 {
            self.released.notify_all();
        }
        trace!(client, resource, woken, "released");
        Ok(())
    }

    /// Suspend until a release marks `client` runnable or shutdown fires
    ///
    /// Returns immediately with `Woken` if the client is not waiting.
    pub fn wait_until_runnable(&self, client: ClientId) -> Result<WaitOutcome, LockError> {
        let mut table = self.table.lock();
        loop {
            if table.status(client)? == ClientStatus::Runnable {
                return Ok(WaitOutcome::Woken);
            }
            if self.shutdown.is_triggered() {
                table.client_mut(client)?.status = ClientStatus::Runnable;
                return Ok(WaitOutcome::Interrupted);
            }
            self.released.wait_for(&mut table, WAIT_SLICE);
        }
    }

    /// Acquire a write lock, suspending and retrying while it is contended
    ///
    /// # Returns
    /// `Interrupted` if shutdown fired before the lock could be taken; the
    /// client is then left runnable and not holding `resource`.
    pub fn acquire_write_blocking(
        &self,
        resource: ResourceId,
        client: ClientId,
    ) -> Result<Acquisition, LockError> {
        self.acquire_write_blocking_with(resource, client, |_| {})
    }

    /// Like [`LockManager::acquire_write_blocking`], calling `on_blocked` with
    /// the current owner each time the attempt has to wait
    pub fn acquire_write_blocking_with<F>(
        &self,
        resource: ResourceId,
        client: ClientId,
        mut on_blocked: F,
    ) -> Result<Acquisition, LockError>
    where
        F: FnMut(ClientId),
    {
        loop {
            if self.shutdown.is_triggered() {
                return Ok(Acquisition::Interrupted);
            }
            match self.acquire_write(resource, client)? {
                WriteOutcome::Acquired => return Ok(Acquisition::Acquired),
                WriteOutcome::Blocked { owner } => {
                    debug!(client, resource, owner, "blocked, waiting for release");
                    on_blocked(owner);
                    if self.wait_until_runnable(client)? == WaitOutcome::Interrupted {
                        return Ok(Acquisition::Interrupted);
                    }
                }
            }
        }
    }

    /// Release everything `client` holds and withdraw any pending wait
    ///
    /// # Returns
    /// The resources that were released, ascending
    pub fn release_all(&self, client: ClientId) -> Result<Vec<ResourceId>, LockError> {
        let mut table = self.table.lock();
        let state = table.client_mut(client)?;
        state.status = ClientStatus::Runnable;
        let mut held: Vec<ResourceId> = state.owned.iter().copied().collect();
        held.sort_unstable();

        let mut woken = 0;
        for &resource in &held {
            woken += table.release(resource, client)?;
        }
        drop(table);

        if woken > 0 {
            self.released.notify_all();
        }
        Ok(held)
    }

    /// Capture a consistent global snapshot
    ///
    /// The table is copied in one critical section; the mutex is held only for
    /// the duration of the copy.
    pub fn snapshot(&self) -> GlobalSnapshot {
        let taken_at = Utc::now().to_rfc3339();
        self.table.lock().capture(taken_at)
    }

    /// Wake every suspended client so it re-checks its state and shutdown
    pub fn wake_all(&self) {
        let _table = self.table.lock();
        self.released.notify_all();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::thread;
    use std::time::Instant;

    fn manager(resources: usize) -> (Arc<LockManager>, ShutdownSignal) {
        let shutdown = ShutdownSignal::new();
        (LockManager::new(resources, shutdown.clone()), shutdown)
    }

    #[test]
    fn test_acquire_free_resource() {
        let (lm, _) = manager(2);
        let c = lm.register_client();
        assert_eq!(lm.acquire_write(0, c).unwrap(), WriteOutcome::Acquired);
        assert_eq!(lm.owner_of(0).unwrap(), Some(c));
        assert_eq!(lm.owner_of(1).unwrap(), None);
    }

    #[test]
    fn test_write_is_not_reentrant() {
        let (lm, _) = manager(1);
        let c = lm.register_client();
        lm.acquire_write(0, c).unwrap();
        assert_eq!(
            lm.acquire_write(0, c),
            Err(LockError::AlreadyHeld {
                client: c,
                resource: 0
            })
        );
        // The failed attempt must not register a self-wait
        let snapshot = lm.snapshot();
        assert_eq!(snapshot.client(c).unwrap().waiting_for, None);
    }

    #[test]
    fn test_contended_write_registers_wait() {
        let (lm, _) = manager(1);
        let a = lm.register_client();
        let b = lm.register_client();
        lm.acquire_write(0, a).unwrap();
        assert_eq!(
            lm.acquire_write(0, b).unwrap(),
            WriteOutcome::Blocked { owner: a }
        );

        let snapshot = lm.snapshot();
        assert_eq!(snapshot.client(b).unwrap().waiting_for, Some(0));
        assert_eq!(snapshot.client(a).unwrap().owned, vec![0]);
        assert!(snapshot.is_coherent());
    }

    #[test]
    fn test_release_by_non_owner_fails() {
        let (lm, _) = manager(1);
        let a = lm.register_client();
        let b = lm.register_client();
        lm.acquire_write(0, a).unwrap();
        assert_eq!(
            lm.release(0, b),
            Err(LockError::NotOwner {
                client: b,
                resource: 0,
                owner: Some(a)
            })
        );
        assert_eq!(lm.owner_of(0).unwrap(), Some(a));
    }

    #[test]
    fn test_unknown_ids() {
        let (lm, _) = manager(1);
        let a = lm.register_client();
        assert_eq!(lm.acquire_read(3), Err(LockError::UnknownResource(3)));
        assert_eq!(lm.acquire_write(9, a), Err(LockError::UnknownResource(9)));
        assert_eq!(lm.acquire_write(0, 42), Err(LockError::UnknownClient(42)));
        assert!(lm.acquire_read(0).is_ok());
    }

    #[test]
    fn test_release_makes_waiter_runnable() {
        let (lm, _) = manager(1);
        let a = lm.register_client();
        let b = lm.register_client();
        lm.acquire_write(0, a).unwrap();

        let lm2 = Arc::clone(&lm);
        let waiter = thread::spawn(move || lm2.acquire_write_blocking(0, b).unwrap());

        // Wait until b is registered as waiting
        let deadline = Instant::now() + Duration::from_secs(5);
        while lm.snapshot().client(b).unwrap().waiting_for.is_none() {
            assert!(Instant::now() < deadline, "waiter never registered");
            thread::sleep(Duration::from_millis(5));
        }

        lm.release(0, a).unwrap();
        assert_eq!(waiter.join().unwrap(), Acquisition::Acquired);
        assert_eq!(lm.owner_of(0).unwrap(), Some(b));
        assert_eq!(lm.snapshot().client(b).unwrap().waiting_for, None);
    }

    #[test]
    fn test_release_clears_wait_before_it_can_be_observed() {
        let (lm, _) = manager(1);
        let a = lm.register_client();
        let b = lm.register_client();
        lm.acquire_write(0, a).unwrap();
        lm.acquire_write(0, b).unwrap();
        lm.release(0, a).unwrap();

        // b is runnable again and the resource is free: no orphan wait
        let snapshot = lm.snapshot();
        assert_eq!(snapshot.client(b).unwrap().waiting_for, None);
        assert!(snapshot.is_coherent());
        assert_eq!(lm.wait_until_runnable(b).unwrap(), WaitOutcome::Woken);
    }

    #[test]
    fn test_shutdown_interrupts_waiter() {
        let (lm, shutdown) = manager(1);
        let a = lm.register_client();
        let b = lm.register_client();
        lm.acquire_write(0, a).unwrap();

        let lm2 = Arc::clone(&lm);
        let waiter = thread::spawn(move || lm2.acquire_write_blocking(0, b).unwrap());
        thread::sleep(Duration::from_millis(50));
        shutdown.trigger();

        assert_eq!(waiter.join().unwrap(), Acquisition::Interrupted);
        let snapshot = lm.snapshot();
        assert_eq!(snapshot.client(b).unwrap().waiting_for, None);
        assert_eq!(snapshot.client(b).unwrap().owned, Vec::<ResourceId>::new());
    }

    #[test]
    fn test_release_all() {
        let (lm, _) = manager(3);
        let a = lm.register_client();
        let b = lm.register_client();
        lm.acquire_write(2, a).unwrap();
        lm.acquire_write(0, a).unwrap();
        lm.acquire_write(0, b).unwrap();

        assert_eq!(lm.release_all(a).unwrap(), vec![0, 2]);
        assert_eq!(lm.owner_of(0).unwrap(), None);
        assert_eq!(lm.owner_of(2).unwrap(), None);
        assert_eq!(lm.snapshot().client(b).unwrap().waiting_for, None);
    }

    #[test]
    fn test_snapshot_ids_increase() {
        let (lm, _) = manager(1);
        let first = lm.snapshot();
        let second = lm.snapshot();
        assert!(second.id > first.id);
    }

    #[test]
    fn test_mutual_exclusion_under_stress() {
        const CLIENTS: usize = 8;
        const RESOURCES: usize = 3;
        const ROUNDS: usize = 200;

        let (lm, _) = manager(RESOURCES);
        let inside: Arc<Vec<AtomicUsize>> =
            Arc::new((0..RESOURCES).map(|_| AtomicUsize::new(0)).collect());
        let violations = Arc::new(AtomicUsize::new(0));

        let handles: Vec<_> = (0..CLIENTS)
            .map(|i| {
                let lm = Arc::clone(&lm);
                let inside = Arc::clone(&inside);
                let violations = Arc::clone(&violations);
                let client = lm.register_client();
                thread::spawn(move || {
                    for round in 0..ROUNDS {
                        let r = (i + round) % RESOURCES;
                        assert_eq!(
                            lm.acquire_write_blocking(r, client).unwrap(),
                            Acquisition::Acquired
                        );
                        if inside[r].fetch_add(1, Ordering::SeqCst) != 0 {
                            violations.fetch_add(1, Ordering::SeqCst);
                        }
                        thread::yield_now();
                        inside[r].fetch_sub(1, Ordering::SeqCst);
                        lm.release(r, client).unwrap();
                    }
                })
            })
            .collect();

        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(violations.load(Ordering::SeqCst), 0);
        assert!(lm.snapshot().clients.iter().all(|c| c.owned.is_empty()));
    }
}
