//! `NDIS_PM_PROTOCOL_OFFLOAD`, sent with `OID_PM_ADD_PROTOCOL_OFFLOAD`

use bytemuck_derive::{Pod, Zeroable};
use static_assertions::const_assert_eq;

use super::{NdisObjectHeader, NdisPmCountedString};

/// `NDIS_PM_PROTOCOL_OFFLOAD_TYPE`
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash, Zeroable, Pod)]
#[repr(transparent)]
pub struct ProtocolOffloadType(pub u32);

impl ProtocolOffloadType {
    pub const UNSPECIFIED: Self = Self(0);
    pub const IPV4_ARP: Self = Self(1);
    pub const IPV6_NS: Self = Self(2);
    pub const DOT11_RSN_REKEY: Self = Self(3);
}

/// `IPv4ARPParameters`
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Zeroable, Pod)]
#[repr(C)]
pub struct ArpOffloadParameters {
    pub flags: u32,
    pub remote_ipv4_address: [u8; 4],
    pub host_ipv4_address: [u8; 4],
    pub mac_address: [u8; 6],
    pub reserved: [u8; 2],
}

const_assert_eq!(core::mem::size_of::<ArpOffloadParameters>(), 20);

/// `IPv6NSParameters`
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Zeroable, Pod)]
#[repr(C)]
pub struct NsOffloadParameters {
    pub flags: u32,
    pub remote_ipv6_address: [u8; 16],
    pub solicited_node_ipv6_address: [u8; 16],
    pub mac_address: [u8; 6],
    pub target_ipv6_addresses: [[u8; 16]; 2],
    pub reserved: [u8; 2],
}

const_assert_eq!(core::mem::size_of::<NsOffloadParameters>(), 76);

const PROTOCOL_OFFLOAD_PARAMETERS_SIZE: usize = 76;

/// `NDIS_PM_PROTOCOL_OFFLOAD`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Zeroable, Pod)]
#[repr(C)]
pub struct NdisPmProtocolOffload {
    pub header: NdisObjectHeader,
    pub flags: u32,
    pub priority: u32,
    pub protocol_offload_type: ProtocolOffloadType,
    pub friendly_name: NdisPmCountedString,
    pub protocol_offload_id: u32,
    pub next_protocol_offload_offset: u32,
    /// Per-offload-type parameters
    pub protocol_offload_parameters: [u8; PROTOCOL_OFFLOAD_PARAMETERS_SIZE],
}

const_assert_eq!(core::mem::size_of::<NdisPmProtocolOffload>(), 616);

impl NdisPmProtocolOffload {
    pub const REVISION_2: u8 = 2;

    pub fn new(protocol_offload_type: ProtocolOffloadType, protocol_offload_id: u32) -> Self {
        let mut offload: Self = bytemuck::Zeroable::zeroed();
        offload.header = NdisObjectHeader::default_for::<Self>(Self::REVISION_2);
        offload.protocol_offload_type = protocol_offload_type;
        offload.protocol_offload_id = protocol_offload_id;
        offload
    }

    /// Reads the descriptor from an `OID_PM_ADD_PROTOCOL_OFFLOAD` information buffer
    pub fn parse(buffer: &[u8]) -> Option<Self> {
        crate::read_unaligned(buffer)
    }

    pub fn arp_parameters(&self) -> ArpOffloadParameters {
        self.read_parameters()
    }

    pub fn set_arp_parameters(&mut self, params: ArpOffloadParameters) {
        self.write_parameters(&params);
    }

    pub fn ns_parameters(&self) -> NsOffloadParameters {
        self.read_parameters()
    }

    pub fn set_ns_parameters(&mut self, params: NsOffloadParameters) {
        self.write_parameters(&params);
    }

    fn read_parameters<T: bytemuck::Pod>(&self) -> T {
        bytemuck::pod_read_unaligned(&self.protocol_offload_parameters[..core::mem::size_of::<T>()])
    }

    fn write_parameters<T: bytemuck::Pod>(&mut self, params: &T) {
        let bytes = bytemuck::bytes_of(params);
        self.protocol_offload_parameters[..bytes.len()].copy_from_slice(bytes);
    }
}

impl Default for NdisPmProtocolOffload {
    fn default() -> Self {
        bytemuck::Zeroable::zeroed()
    }
}
