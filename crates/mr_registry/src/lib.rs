//! Memory Region Registration Registry
//!
//! Tracks application buffers registered for remote memory access (RMA) and
//! atomics, issues the key a remote peer quotes to address them, and checks
//! every incoming access (range and rights) before handing out the native
//! registration handle.
//!
//! Two addressing modes share one validation path:
//! - **Assigned**: the registry issues keys from a per-instance counter and
//!   remote addresses are absolute.
//! - **Caller-supplied**: the caller picks the key and remote addresses are
//!   relative to the registration.

pub mod access;
pub mod errors;
mod policy;
pub mod registry;
pub mod settings;
pub mod shared;
pub mod types;

pub use access::{check_access, AccessViolation};
pub use errors::*;
pub use policy::EXHAUSTED_KEY;
pub use registry::{DefaultStore, MrRegistry};
pub use settings::{ClosePolicy, RegistryConfig};
pub use shared::SharedMrRegistry;
pub use types::*;

pub use fabric_mr_store::{
    AvlStore, BTreeStore, KeyComparator, NaturalOrder, RegistrationStore, ReverseOrder,
};
