//! OID request identifiers

/// An NDIS object identifier
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(transparent)]
pub struct Oid(pub u32);

pub const OID_GEN_SUPPORTED_LIST: Oid = Oid(0x0001_0101);
pub const OID_GEN_MAXIMUM_FRAME_SIZE: Oid = Oid(0x0001_0106);
pub const OID_GEN_CURRENT_PACKET_FILTER: Oid = Oid(0x0001_010E);
pub const OID_GEN_CURRENT_LOOKAHEAD: Oid = Oid(0x0001_010F);
pub const OID_GEN_STATISTICS: Oid = Oid(0x0002_0106);
pub const OID_802_3_CURRENT_ADDRESS: Oid = Oid(0x0101_0102);
pub const OID_802_3_MULTICAST_LIST: Oid = Oid(0x0101_0103);

pub const OID_PM_CURRENT_CAPABILITIES: Oid = Oid(0xFD01_0107);
pub const OID_PM_PARAMETERS: Oid = Oid(0xFD01_0109);
pub const OID_PM_HARDWARE_CAPABILITIES: Oid = Oid(0xFD01_0108);
pub const OID_PM_ADD_WOL_PATTERN: Oid = Oid(0xFD01_010A);
pub const OID_PM_REMOVE_WOL_PATTERN: Oid = Oid(0xFD01_010B);
pub const OID_PM_ADD_PROTOCOL_OFFLOAD: Oid = Oid(0xFD01_010D);
pub const OID_PM_REMOVE_PROTOCOL_OFFLOAD: Oid = Oid(0xFD01_010F);

/// `NDIS_REQUEST_TYPE`
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(transparent)]
pub struct NdisRequestType(pub u32);

impl NdisRequestType {
    pub const QUERY_INFORMATION: Self = Self(0);
    pub const SET_INFORMATION: Self = Self(1);
    pub const QUERY_STATISTICS: Self = Self(2);
    pub const METHOD: Self = Self(12);

    /// If this request type only reads adapter state
    pub fn is_query(self) -> bool {
        matches!(self, Self::QUERY_INFORMATION | Self::QUERY_STATISTICS)
    }
}

/// Opaque key NDIS uses to cancel a request
///
/// Several in-flight requests may share the same id.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(transparent)]
pub struct RequestId(pub usize);

/// `NDIS_PORT_NUMBER`
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(transparent)]
pub struct PortNumber(pub u32);

#[cfg(test)]
mod test {
    use super::{
        NdisRequestType, Oid, OID_PM_CURRENT_CAPABILITIES, OID_PM_HARDWARE_CAPABILITIES,
        OID_PM_PARAMETERS,
    };

    #[test]
    fn pm_oid_wire_values() {
        assert_eq!(OID_PM_CURRENT_CAPABILITIES, Oid(0xFD01_0107));
        assert_eq!(OID_PM_HARDWARE_CAPABILITIES, Oid(0xFD01_0108));
        assert_eq!(OID_PM_PARAMETERS, Oid(0xFD01_0109));
    }

    #[test]
    fn query_classification() {
        assert!(NdisRequestType::QUERY_INFORMATION.is_query());
        assert!(NdisRequestType::QUERY_STATISTICS.is_query());
        assert!(!NdisRequestType::SET_INFORMATION.is_query());
        assert!(!NdisRequestType::METHOD.is_query());
    }
}
