//! Mode-dependent key issuance and address translation.

use crate::errors::{MrError, Result};
use crate::types::{MrAttr, MrKey, MrMode};
use tracing::error;

/// Reserved counter value. Assigned mode never issues it; reaching it means
/// the key space is used up for the lifetime of the registry.
pub const EXHAUSTED_KEY: MrKey = MrKey::MAX;

/// Where a new registration lands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Placement {
    pub key: MrKey,
    pub offset: u64,
}

/// Per-registry addressing strategy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum KeyPolicy {
    Assigned { next_key: MrKey },
    CallerSupplied,
}

impl KeyPolicy {
    pub fn for_mode(mode: MrMode) -> Self {
        match mode {
            MrMode::Assigned => Self::Assigned { next_key: 0 },
            MrMode::CallerSupplied => Self::CallerSupplied,
        }
    }

    pub fn mode(&self) -> MrMode {
        match self {
            Self::Assigned { .. } => MrMode::Assigned,
            Self::CallerSupplied => MrMode::CallerSupplied,
        }
    }

    /// Decide key and translation offset for `attr` without changing state.
    /// `attr.iovecs` must be non-empty.
    pub fn place(&self, attr: &MrAttr) -> Result<Placement> {
        match self {
            Self::Assigned { next_key } => {
                if *next_key == EXHAUSTED_KEY {
                    error!("assigned-mode key counter exhausted; registration refused");
                    return Err(MrError::ResourceExhausted);
                }
                Ok(Placement {
                    key: *next_key,
                    offset: 0,
                })
            }
            Self::CallerSupplied => {
                let first = attr
                    .iovecs
                    .first()
                    .ok_or_else(|| MrError::invalid("registration has no iovecs"))?;
                let offset = first
                    .base
                    .checked_add(attr.offset)
                    .ok_or_else(|| MrError::invalid("translation offset overflows"))?;
                Ok(Placement {
                    key: attr.requested_key,
                    offset,
                })
            }
        }
    }

    /// Advance past a key that has been committed to the store.
    pub fn commit(&mut self, key: MrKey) {
        if let Self::Assigned { next_key } = self {
            debug_assert_eq!(*next_key, key);
            *next_key = key + 1;
        }
    }

    /// Map a remote address onto the registration's address space.
    pub fn translate(&self, address: u64, offset: u64) -> Result<u64> {
        match self {
            Self::Assigned { .. } => Ok(address),
            Self::CallerSupplied => address
                .checked_add(offset)
                .ok_or_else(|| MrError::invalid("translated address overflows")),
        }
    }

    /// Next key assigned mode would issue.
    pub fn next_key(&self) -> Option<MrKey> {
        match self {
            Self::Assigned { next_key } if *next_key != EXHAUSTED_KEY => Some(*next_key),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{AccessFlags, Iovec};

    fn attr() -> MrAttr {
        MrAttr::new(vec![Iovec::new(0x2000, 0x200)], AccessFlags::REMOTE_READ)
            .with_offset(0x10)
            .with_requested_key(0x2000)
    }

    #[test]
    fn test_assigned_ignores_requested_key_and_offset() {
        let policy = KeyPolicy::for_mode(MrMode::Assigned);
        assert_eq!(
            policy.place(&attr()).unwrap(),
            Placement { key: 0, offset: 0 }
        );
        assert_eq!(policy.translate(0x30, 0x2010).unwrap(), 0x30);
    }

    #[test]
    fn test_caller_supplied_offset_from_first_iovec() {
        let policy = KeyPolicy::for_mode(MrMode::CallerSupplied);
        assert_eq!(
            policy.place(&attr()).unwrap(),
            Placement {
                key: 0x2000,
                offset: 0x2010
            }
        );
        assert_eq!(policy.translate(0x30, 0x2010).unwrap(), 0x2040);
        assert!(policy.translate(u64::MAX, 1).is_err());
        assert_eq!(policy.next_key(), None);
    }

    #[test]
    fn test_commit_advances_counter() {
        let mut policy = KeyPolicy::for_mode(MrMode::Assigned);
        policy.commit(0);
        policy.commit(1);
        assert_eq!(policy.next_key(), Some(2));
    }

    #[test]
    fn test_exhausted_counter_is_reported() {
        let policy = KeyPolicy::Assigned {
            next_key: EXHAUSTED_KEY,
        };
        assert!(matches!(
            policy.place(&attr()),
            Err(MrError::ResourceExhausted)
        ));
        assert_eq!(policy.next_key(), None);
    }
}
