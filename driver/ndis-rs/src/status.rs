//! `NDIS_STATUS` values and the [`Error`] wrapper

/// An `NDIS_STATUS` value
///
/// Shares the `NTSTATUS` severity layout, so anything with the top bit set
/// is a failure.
#[derive(Default, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(transparent)]
pub struct NdisStatus(u32);

impl NdisStatus {
    pub const fn from_u32(value: u32) -> Self {
        Self(value)
    }

    pub const fn to_u32(self) -> u32 {
        self.0
    }

    /// Equivalent of `NT_SUCCESS`, so informational and warning statuses
    /// (e.g. [`STATUS::PENDING`]) count as success
    pub const fn is_success(self) -> bool {
        (self.0 as i32) >= 0
    }

    /// Name of the status, if it's one we know about
    pub fn name(self) -> Option<&'static str> {
        STATUS::NAMES
            .iter()
            .find(|(status, _)| *status == self)
            .map(|(_, name)| *name)
    }
}

impl From<u32> for NdisStatus {
    fn from(value: u32) -> Self {
        Self(value)
    }
}

impl From<NdisStatus> for u32 {
    fn from(value: NdisStatus) -> Self {
        value.0
    }
}

impl core::fmt::Debug for NdisStatus {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self.name() {
            Some(name) => write!(f, "{name}"),
            None => write!(f, "NdisStatus({:#010x})", self.0),
        }
    }
}

/// Known `NDIS_STATUS` values
#[allow(non_snake_case)]
pub mod STATUS {
    use super::NdisStatus;

    pub const SUCCESS: NdisStatus = NdisStatus(0x0000_0000);
    pub const PENDING: NdisStatus = NdisStatus(0x0000_0103);
    pub const FAILURE: NdisStatus = NdisStatus(0xC000_0001);
    pub const INVALID_PARAMETER: NdisStatus = NdisStatus(0xC000_000D);
    pub const BUFFER_TOO_SMALL: NdisStatus = NdisStatus(0xC000_0023);
    pub const INSUFFICIENT_RESOURCES: NdisStatus = NdisStatus(0xC000_009A);
    pub const NOT_SUPPORTED: NdisStatus = NdisStatus(0xC000_00BB);
    pub const CANCELLED: NdisStatus = NdisStatus(0xC000_0120);
    pub const INVALID_DEVICE_STATE: NdisStatus = NdisStatus(0xC000_0184);
    pub const NOT_FOUND: NdisStatus = NdisStatus(0xC000_0225);
    pub const REQUEST_ABORTED: NdisStatus = NdisStatus(0xC001_000C);
    pub const INVALID_LENGTH: NdisStatus = NdisStatus(0xC001_0014);
    pub const INVALID_DATA: NdisStatus = NdisStatus(0xC001_0015);
    pub const BUFFER_TOO_SHORT: NdisStatus = NdisStatus(0xC001_0016);
    pub const INVALID_OID: NdisStatus = NdisStatus(0xC001_0017);
    pub const FILE_NOT_FOUND: NdisStatus = NdisStatus(0xC001_001B);
    pub const PM_WOL_PATTERN_LIST_FULL: NdisStatus = NdisStatus(0xC023_000F);
    pub const PM_PROTOCOL_OFFLOAD_LIST_FULL: NdisStatus = NdisStatus(0xC023_0010);

    pub(super) const NAMES: &[(NdisStatus, &str)] = &[
        (SUCCESS, "SUCCESS"),
        (PENDING, "PENDING"),
        (FAILURE, "FAILURE"),
        (INVALID_PARAMETER, "INVALID_PARAMETER"),
        (BUFFER_TOO_SMALL, "BUFFER_TOO_SMALL"),
        (INSUFFICIENT_RESOURCES, "INSUFFICIENT_RESOURCES"),
        (NOT_SUPPORTED, "NOT_SUPPORTED"),
        (CANCELLED, "CANCELLED"),
        (INVALID_DEVICE_STATE, "INVALID_DEVICE_STATE"),
        (NOT_FOUND, "NOT_FOUND"),
        (REQUEST_ABORTED, "REQUEST_ABORTED"),
        (INVALID_LENGTH, "INVALID_LENGTH"),
        (INVALID_DATA, "INVALID_DATA"),
        (BUFFER_TOO_SHORT, "BUFFER_TOO_SHORT"),
        (INVALID_OID, "INVALID_OID"),
        (FILE_NOT_FOUND, "FILE_NOT_FOUND"),
        (PM_WOL_PATTERN_LIST_FULL, "PM_WOL_PATTERN_LIST_FULL"),
        (PM_PROTOCOL_OFFLOAD_LIST_FULL, "PM_PROTOCOL_OFFLOAD_LIST_FULL"),
    ];
}

/// A failed `NDIS_STATUS`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Error(pub NdisStatus);

impl Error {
    /// Converts an [`NdisStatus`] into an `Error`.
    ///
    /// Note that this treats anything that isn't [`STATUS::SUCCESS`] as an error
    pub fn to_err(status: NdisStatus) -> Result<(), Error> {
        if status == STATUS::SUCCESS {
            Ok(())
        } else {
            Err(Error(status))
        }
    }

    /// Collapses a result back into the status reported to NDIS
    pub fn to_status(result: Result<(), Error>) -> NdisStatus {
        match result {
            Ok(()) => STATUS::SUCCESS,
            Err(Error(status)) => status,
        }
    }

    pub fn status(self) -> NdisStatus {
        self.0
    }
}

impl From<NdisStatus> for Error {
    fn from(status: NdisStatus) -> Self {
        Self(status)
    }
}

#[cfg(test)]
mod test {
    use std::format;

    use super::{Error, NdisStatus, STATUS};

    #[test]
    fn success_is_not_an_error() {
        assert_eq!(Error::to_err(STATUS::SUCCESS), Ok(()));
        assert_eq!(
            Error::to_err(STATUS::NOT_SUPPORTED),
            Err(Error(STATUS::NOT_SUPPORTED))
        );
    }

    #[test]
    fn pending_is_nt_success() {
        assert!(STATUS::PENDING.is_success());
        assert!(!STATUS::FAILURE.is_success());
        // ...but still isn't plain success
        assert!(Error::to_err(STATUS::PENDING).is_err());
    }

    #[test]
    fn to_status_round_trips_result() {
        assert_eq!(Error::to_status(Ok(())), STATUS::SUCCESS);
        assert_eq!(
            Error::to_status(Err(Error(STATUS::FILE_NOT_FOUND))),
            STATUS::FILE_NOT_FOUND
        );
    }

    #[test]
    fn debug_names_known_statuses() {
        assert_eq!(format!("{:?}", STATUS::BUFFER_TOO_SMALL), "BUFFER_TOO_SMALL");
        assert_eq!(
            format!("{:?}", NdisStatus::from_u32(0xC0DE_0001)),
            "NdisStatus(0xc0de0001)"
        );
    }
}
