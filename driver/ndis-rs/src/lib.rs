//! NDIS vocabulary shared between the class extension and its clients
//!
//! Covers status codes, OID request identifiers, and the power management
//! wire descriptors exchanged through `OID_PM_*` requests.
#![no_std]

// During tests, allow importing std
#[cfg(any(test))]
extern crate std;

pub mod oid;
pub mod pm;
pub mod status;

pub use oid::{NdisRequestType, Oid, PortNumber, RequestId};
pub use status::{Error, NdisStatus, STATUS};

/// Reads a `T` from the start of `buffer`, without any alignment requirements
///
/// Returns `None` if `buffer` is too short to hold a `T`.
/// Any trailing bytes past `T` are ignored.
pub fn read_unaligned<T: bytemuck::AnyBitPattern>(buffer: &[u8]) -> Option<T> {
    let bytes = buffer.get(..core::mem::size_of::<T>())?;
    bytemuck::try_pod_read_unaligned(bytes).ok()
}
