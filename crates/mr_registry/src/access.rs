//! Remote access validation.
//!
//! Pure checks over a registration's ranges and granted rights. The registry
//! runs these on every `retrieve` after any address translation.

use crate::types::{AccessFlags, Iovec};
use thiserror::Error;

/// Why an access attempt was refused.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccessViolation {
    #[error("null target address")]
    NullAddress,

    #[error("requested access {requested:?} not within granted {granted:?}")]
    NotGranted {
        requested: AccessFlags,
        granted: AccessFlags,
    },

    #[error("range {address:#x}+{length:#x} not contained in a single registered iovec")]
    OutOfRange { address: u64, length: u64 },
}

/// Check that `requested` is a subset of `granted` and that
/// `[address, address + length)` lies inside one of `iovecs`.
///
/// A range straddling two adjacent iovecs is refused even when their union
/// covers it.
pub fn check_access(
    iovecs: &[Iovec],
    granted: AccessFlags,
    address: u64,
    length: u64,
    requested: AccessFlags,
) -> Result<(), AccessViolation> {
    if address == 0 {
        return Err(AccessViolation::NullAddress);
    }

    if !granted.contains(requested) {
        return Err(AccessViolation::NotGranted { requested, granted });
    }

    if iovecs.iter().any(|iov| iov.contains(address, length)) {
        Ok(())
    } else {
        Err(AccessViolation::OutOfRange { address, length })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const RW: AccessFlags = AccessFlags::REMOTE_READ.union(AccessFlags::REMOTE_WRITE);

    #[test]
    fn test_null_address_checked_first() {
        let iovecs = [Iovec::new(0, 0x100)];
        assert_eq!(
            check_access(&iovecs, AccessFlags::empty(), 0, 1, AccessFlags::REMOTE_ATOMIC),
            Err(AccessViolation::NullAddress)
        );
    }

    #[test]
    fn test_subset_access_allowed() {
        let iovecs = [Iovec::new(0x1000, 0x100)];
        assert!(check_access(&iovecs, RW, 0x1050, 0x20, AccessFlags::REMOTE_READ).is_ok());
        assert!(check_access(&iovecs, RW, 0x1050, 0x20, RW).is_ok());
        assert!(check_access(&iovecs, RW, 0x1050, 0x20, AccessFlags::empty()).is_ok());
    }

    #[test]
    fn test_partial_overlap_of_rights_denied() {
        let iovecs = [Iovec::new(0x1000, 0x100)];
        let requested = AccessFlags::REMOTE_READ | AccessFlags::REMOTE_ATOMIC;
        assert_eq!(
            check_access(&iovecs, RW, 0x1050, 0x20, requested),
            Err(AccessViolation::NotGranted {
                requested,
                granted: RW
            })
        );
    }

    #[test]
    fn test_adjacent_iovecs_do_not_merge() {
        let iovecs = [Iovec::new(0x1000, 0x100), Iovec::new(0x1100, 0x100)];
        assert!(check_access(&iovecs, RW, 0x10f0, 0x10, RW).is_ok());
        assert!(check_access(&iovecs, RW, 0x1100, 0x10, RW).is_ok());
        assert_eq!(
            check_access(&iovecs, RW, 0x10f0, 0x20, RW),
            Err(AccessViolation::OutOfRange {
                address: 0x10f0,
                length: 0x20
            })
        );
    }

    #[test]
    fn test_overflowing_request_denied() {
        let iovecs = [Iovec::new(0x1000, 0x100)];
        assert!(matches!(
            check_access(&iovecs, RW, 0x1000, u64::MAX, RW),
            Err(AccessViolation::OutOfRange { .. })
        ));
    }
}
