//! MR registry implementation
//!
//! Tracks live memory registrations for one domain, issues the keys remote
//! peers quote in RMA and atomic requests, and validates every remote access
//! before the native handle is released to the caller.

use crate::access::{check_access, AccessViolation};
use crate::errors::*;
use crate::policy::KeyPolicy;
use crate::settings::{ClosePolicy, RegistryConfig};
use crate::types::*;
use fabric_mr_store::{AvlStore, RegistrationStore};
use std::marker::PhantomData;
use tracing::{debug, trace, warn};

/// Store used when none is supplied.
pub type DefaultStore<H> = AvlStore<RegistrationEntry<H>>;

/// Memory region registry
///
/// Holds no lock of its own. Mutating calls take `&mut self`; an owner that
/// shares the registry between threads wraps it in
/// [`SharedMrRegistry`](crate::SharedMrRegistry) or its own exclusive lock.
///
/// Native handles are moved in by [`insert`](Self::insert), lent out by
/// [`retrieve`](Self::retrieve) and moved back out by
/// [`erase`](Self::erase). Releasing the provider resource behind a handle is
/// always the caller's job.
pub struct MrRegistry<H, S = DefaultStore<H>> {
    policy: KeyPolicy,
    close_policy: ClosePolicy,
    store: S,
    _handle: PhantomData<H>,
}

impl<H> MrRegistry<H> {
    /// Open an empty registry with the default close policy.
    pub fn open(mode: MrMode) -> Self {
        Self::with_config(RegistryConfig::new(mode))
    }

    pub fn with_config(config: RegistryConfig) -> Self {
        Self::with_store(config, AvlStore::new())
    }
}

impl<H, S> MrRegistry<H, S>
where
    S: RegistrationStore<RegistrationEntry<H>>,
{
    /// Open a registry over a caller-chosen store, expected to be empty.
    pub fn with_store(config: RegistryConfig, store: S) -> Self {
        debug!(mode = ?config.mode, close_policy = ?config.close_policy, "opened memory region registry");
        Self {
            policy: KeyPolicy::for_mode(config.mode),
            close_policy: config.close_policy,
            store,
            _handle: PhantomData,
        }
    }

    pub fn mode(&self) -> MrMode {
        self.policy.mode()
    }

    pub fn close_policy(&self) -> ClosePolicy {
        self.close_policy
    }

    /// Next key assigned mode will issue; `None` in caller-supplied mode or
    /// once the key space is exhausted.
    pub fn next_assigned_key(&self) -> Option<MrKey> {
        self.policy.next_key()
    }

    pub fn len(&self) -> usize {
        self.store.len()
    }

    pub fn is_empty(&self) -> bool {
        self.store.is_empty()
    }

    pub fn contains_key(&self, key: MrKey) -> bool {
        self.store.contains_key(key)
    }

    /// Look up a registration without access validation.
    pub fn entry(&self, key: MrKey) -> Option<&RegistrationEntry<H>> {
        self.store.get(key)
    }

    /// Live keys in store order.
    pub fn keys(&self) -> impl Iterator<Item = MrKey> + '_ {
        self.store.iter().map(|(key, _)| key)
    }

    /// Live registrations in store order.
    pub fn entries(&self) -> impl Iterator<Item = &RegistrationEntry<H>> + '_ {
        self.store.iter().map(|(_, entry)| entry)
    }

    /// Register `attr`, taking ownership of `handle`, and return its key.
    ///
    /// Iovec ranges are stored as given; they are only checked against
    /// incoming requests in [`retrieve`](Self::retrieve). On failure nothing
    /// is registered and the handle comes back inside the error.
    pub fn insert(
        &mut self,
        attr: &MrAttr,
        handle: H,
    ) -> std::result::Result<MrKey, InsertError<H>> {
        if attr.iovecs.is_empty() {
            return Err(InsertError::new(
                MrError::invalid("registration needs at least one iovec"),
                handle,
            ));
        }

        let placement = match self.policy.place(attr) {
            Ok(placement) => placement,
            Err(error) => return Err(InsertError::new(error, handle)),
        };

        let entry = RegistrationEntry {
            key: placement.key,
            iovecs: attr.iovecs.clone().into_boxed_slice(),
            access: attr.access,
            offset: placement.offset,
            handle,
        };

        if let Err(rejected) = self.store.insert(placement.key, entry) {
            let key = rejected.key();
            debug!(key, "registration key already in use");
            return Err(InsertError::new(
                MrError::AlreadyExists { key },
                rejected.into_value().handle,
            ));
        }
        self.policy.commit(placement.key);

        debug!(
            key = placement.key,
            mode = ?self.mode(),
            iovecs = attr.iovecs.len(),
            access = ?attr.access,
            "registered memory region"
        );
        Ok(placement.key)
    }

    /// Validate a remote access against registration `key` and lend out its
    /// handle.
    ///
    /// In caller-supplied mode `address` is relative to the registration and
    /// is translated by the stored offset first. The translated range must
    /// fall inside a single iovec and `access` must be a subset of the
    /// granted rights.
    pub fn retrieve(
        &self,
        key: MrKey,
        address: u64,
        length: u64,
        access: AccessFlags,
    ) -> Result<&H> {
        let entry = self.store.get(key).ok_or(MrError::NotFound { key })?;
        let target = self.policy.translate(address, entry.offset)?;

        check_access(&entry.iovecs, entry.access, target, length, access)
            .map_err(|violation| denied(key, violation))?;

        trace!(key, address = target, length, "remote access validated");
        Ok(&entry.handle)
    }

    /// Remove registration `key` and hand its native handle back.
    pub fn erase(&mut self, key: MrKey) -> Result<H> {
        let cursor = self.store.find(key).ok_or(MrError::NotFound { key })?;
        let (_, entry) = self
            .store
            .erase(cursor)
            .ok_or(MrError::NotFound { key })?;

        debug!(key, "deregistered memory region");
        Ok(entry.handle)
    }

    /// Remove every registration, returning the handles in store order.
    pub fn drain(&mut self) -> Vec<(MrKey, H)> {
        let keys: Vec<MrKey> = self.keys().collect();
        keys.into_iter()
            .filter_map(|key| self.store.remove(key).map(|entry| (key, entry.handle)))
            .collect()
    }

    /// Close the registry.
    ///
    /// With live registrations the configured [`ClosePolicy`] decides:
    /// `Reject` returns the registry inside the error, `Drain` drops every
    /// remaining handle (logged) and closes.
    pub fn close(mut self) -> std::result::Result<(), CloseError<H, S>> {
        if !self.store.is_empty() {
            let policy = self.close_policy;
            match policy {
                ClosePolicy::Reject => {
                    let live = self.store.len();
                    warn!(live, "refusing to close registry with live registrations");
                    return Err(CloseError::new(live, self));
                }
                ClosePolicy::Drain => {
                    let dropped = self.drain();
                    warn!(
                        count = dropped.len(),
                        "closing registry with live registrations; their native handles are dropped without deregistration"
                    );
                }
            }
        }

        let Self { store, .. } = self;
        store.destroy();
        debug!("closed memory region registry");
        Ok(())
    }
}

fn denied(key: MrKey, violation: AccessViolation) -> MrError {
    match violation {
        AccessViolation::NullAddress => MrError::invalid(violation.to_string()),
        _ => {
            warn!(key, %violation, "remote access denied");
            MrError::PermissionDenied {
                key,
                reason: violation.to_string(),
            }
        }
    }
}
