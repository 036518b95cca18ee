//! Types for the MR registry

use serde::{Deserialize, Serialize};

/// Key a remote peer quotes to address a registration.
pub type MrKey = u64;

/// One contiguous range of a registration: `[base, base + len)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Iovec {
    pub base: u64,
    pub len: u64,
}

impl Iovec {
    pub const fn new(base: u64, len: u64) -> Self {
        Self { base, len }
    }

    /// Describe a local buffer by its address and length.
    pub fn from_slice(buf: &[u8]) -> Self {
        Self::new(buf.as_ptr() as u64, buf.len() as u64)
    }

    /// One past the last byte, or `None` if the range wraps the address space.
    pub fn end(&self) -> Option<u64> {
        self.base.checked_add(self.len)
    }

    /// Whether `[address, address + length)` lies entirely inside this range.
    pub fn contains(&self, address: u64, length: u64) -> bool {
        let (Some(end), Some(request_end)) = (self.end(), address.checked_add(length)) else {
            return false;
        };
        self.base <= address && request_end <= end
    }
}

bitflags::bitflags! {
    /// Operations a registration grants.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct AccessFlags: u64 {
        const READ = 1 << 8;
        const WRITE = 1 << 9;
        const RECV = 1 << 10;
        const SEND = 1 << 11;
        const REMOTE_READ = 1 << 12;
        const REMOTE_WRITE = 1 << 13;
        const REMOTE_ATOMIC = 1 << 14;
    }
}

/// Addressing discipline, fixed when the registry is opened.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MrMode {
    /// The registry issues keys from a monotonic counter. Remote addresses
    /// are absolute.
    #[default]
    Assigned,
    /// The caller picks the key. Remote addresses are relative to the
    /// registration and translated by a stored offset.
    CallerSupplied,
}

/// Registration descriptor handed to [`insert`](crate::MrRegistry::insert).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MrAttr {
    pub iovecs: Vec<Iovec>,
    pub access: AccessFlags,
    /// Added to `iovecs[0].base` to form the translation offset
    /// (caller-supplied mode only).
    pub offset: u64,
    /// Key to register under (caller-supplied mode only).
    pub requested_key: MrKey,
}

impl MrAttr {
    pub fn new(iovecs: impl Into<Vec<Iovec>>, access: AccessFlags) -> Self {
        Self {
            iovecs: iovecs.into(),
            access,
            offset: 0,
            requested_key: 0,
        }
    }

    pub fn with_requested_key(mut self, key: MrKey) -> Self {
        self.requested_key = key;
        self
    }

    pub fn with_offset(mut self, offset: u64) -> Self {
        self.offset = offset;
        self
    }
}

/// A live registration.
#[derive(Debug)]
pub struct RegistrationEntry<H> {
    pub(crate) key: MrKey,
    pub(crate) iovecs: Box<[Iovec]>,
    pub(crate) access: AccessFlags,
    pub(crate) offset: u64,
    pub(crate) handle: H,
}

impl<H> RegistrationEntry<H> {
    pub fn key(&self) -> MrKey {
        self.key
    }

    pub fn iovecs(&self) -> &[Iovec] {
        &self.iovecs
    }

    pub fn access(&self) -> AccessFlags {
        self.access
    }

    /// Translation offset; zero in assigned mode.
    pub fn offset(&self) -> u64 {
        self.offset
    }

    pub fn handle(&self) -> &H {
        &self.handle
    }
}
