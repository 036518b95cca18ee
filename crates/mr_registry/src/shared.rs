//! Lock-owning wrapper for registries shared between threads.

use crate::errors::*;
use crate::registry::{DefaultStore, MrRegistry};
use crate::types::{AccessFlags, MrAttr, MrKey, RegistrationEntry};
use fabric_mr_store::RegistrationStore;
use parking_lot::{MappedMutexGuard, Mutex, MutexGuard};
use std::sync::Arc;

/// A registry behind one exclusive lock.
///
/// Every call holds the lock for its whole duration and releases it on
/// return, including error returns. [`with_retrieved`](Self::with_retrieved)
/// keeps the lock across the use of a retrieved handle, so an `erase` on
/// another thread cannot invalidate it mid-use.
pub struct SharedMrRegistry<H, S = DefaultStore<H>> {
    inner: Arc<Mutex<Option<MrRegistry<H, S>>>>,
}

impl<H, S> Clone for SharedMrRegistry<H, S> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<H, S> SharedMrRegistry<H, S>
where
    S: RegistrationStore<RegistrationEntry<H>>,
{
    pub fn new(registry: MrRegistry<H, S>) -> Self {
        Self {
            inner: Arc::new(Mutex::new(Some(registry))),
        }
    }

    /// Hold the lock for a multi-step critical section.
    pub fn lock(&self) -> Result<MappedMutexGuard<'_, MrRegistry<H, S>>> {
        MutexGuard::try_map(self.inner.lock(), Option::as_mut)
            .map_err(|_| MrError::state("registry is closed"))
    }

    pub fn insert(
        &self,
        attr: &MrAttr,
        handle: H,
    ) -> std::result::Result<MrKey, InsertError<H>> {
        match self.lock() {
            Ok(mut registry) => registry.insert(attr, handle),
            Err(error) => Err(InsertError::new(error, handle)),
        }
    }

    /// Validate a remote access and run `f` on the handle under the lock.
    pub fn with_retrieved<R>(
        &self,
        key: MrKey,
        address: u64,
        length: u64,
        access: AccessFlags,
        f: impl FnOnce(&H) -> R,
    ) -> Result<R> {
        let registry = self.lock()?;
        let handle = registry.retrieve(key, address, length, access)?;
        Ok(f(handle))
    }

    pub fn erase(&self, key: MrKey) -> Result<H> {
        self.lock()?.erase(key)
    }

    /// Number of live registrations; zero once closed.
    pub fn len(&self) -> usize {
        self.inner.lock().as_ref().map_or(0, |registry| registry.len())
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_closed(&self) -> bool {
        self.inner.lock().is_none()
    }

    /// Close the shared registry. A refused close leaves it open.
    pub fn close(&self) -> Result<()> {
        let mut slot = self.inner.lock();
        let registry = slot
            .take()
            .ok_or_else(|| MrError::state("registry is already closed"))?;

        registry.close().map_err(|refused| {
            let error = MrError::state(refused.to_string());
            *slot = Some(refused.into_registry());
            error
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Iovec, MrMode};
    use std::thread;

    fn attr(base: u64) -> MrAttr {
        MrAttr::new(
            vec![Iovec::new(base, 0x1000)],
            AccessFlags::REMOTE_READ | AccessFlags::REMOTE_WRITE,
        )
    }

    #[test]
    fn test_concurrent_inserts_get_distinct_keys() {
        let shared = SharedMrRegistry::new(MrRegistry::open(MrMode::Assigned));

        let workers: Vec<_> = (0..4u64)
            .map(|worker| {
                let shared = shared.clone();
                thread::spawn(move || {
                    (0..64u64)
                        .map(|i| {
                            let base = 0x10_0000 * (worker + 1) + i * 0x1000;
                            shared.insert(&attr(base), i).unwrap()
                        })
                        .collect::<Vec<_>>()
                })
            })
            .collect();

        let mut keys: Vec<MrKey> = workers
            .into_iter()
            .flat_map(|worker| worker.join().unwrap())
            .collect();
        keys.sort_unstable();
        keys.dedup();
        assert_eq!(keys.len(), 256);
        assert_eq!(shared.len(), 256);
    }

    #[test]
    fn test_with_retrieved_runs_under_lock() {
        let shared = SharedMrRegistry::new(MrRegistry::open(MrMode::Assigned));
        let key = shared.insert(&attr(0x4000), String::from("mr")).unwrap();

        let len = shared
            .with_retrieved(key, 0x4100, 0x10, AccessFlags::REMOTE_READ, |h| h.len())
            .unwrap();
        assert_eq!(len, 2);

        assert!(shared
            .with_retrieved(key, 0x4100, 0x10, AccessFlags::REMOTE_ATOMIC, |_| ())
            .is_err());
    }

    #[test]
    fn test_refused_close_keeps_registry_open() {
        let shared = SharedMrRegistry::new(MrRegistry::open(MrMode::Assigned));
        let key = shared.insert(&attr(0x4000), 1u8).unwrap();

        assert!(matches!(shared.close(), Err(MrError::State { .. })));
        assert!(!shared.is_closed());

        assert_eq!(shared.erase(key).unwrap(), 1);
        shared.close().unwrap();
        assert!(shared.is_closed());
        assert!(matches!(shared.erase(key), Err(MrError::State { .. })));
        assert!(matches!(shared.close(), Err(MrError::State { .. })));
        assert_eq!(shared.insert(&attr(0x4000), 2u8).unwrap_err().into_handle(), 2);
    }
}
