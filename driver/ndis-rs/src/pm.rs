//! Power management flags and the `OID_PM_*` wire descriptors
//!
//! All descriptors are size-prefixed with an [`NdisObjectHeader`], and are laid
//! out exactly as NDIS lays them out so they can be read straight from an
//! information buffer.

use bitflags::bitflags;
use bytemuck_derive::{Pod, Zeroable};
use static_assertions::const_assert_eq;

pub mod protocol_offload;
pub mod wol_pattern;

pub use protocol_offload::{
    ArpOffloadParameters, NdisPmProtocolOffload, NsOffloadParameters, ProtocolOffloadType,
};
pub use wol_pattern::{NdisPmWolPattern, WolBitmapPatternParameters, WolPacketType};

/// `NDIS_OBJECT_TYPE_DEFAULT`
pub const NDIS_OBJECT_TYPE_DEFAULT: u8 = 0x80;

/// Longest friendly name, in UTF-16 code units
pub const NDIS_PM_MAX_STRING_SIZE: usize = 256;

bitflags! {
    /// `NDIS_PM_WOL_*_SUPPORTED` / `NDIS_PM_WOL_*_ENABLED`
    ///
    /// The supported and enabled bits share the same values.
    #[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct WolPacketPatterns: u32 {
        const BITMAP_PATTERN = 0x0000_0001;
        const MAGIC_PACKET = 0x0000_0002;
        const IPV4_TCP_SYN = 0x0000_0004;
        const IPV6_TCP_SYN = 0x0000_0008;
        const IPV4_DEST_ADDR_WILDCARD = 0x0000_0200;
        const IPV6_DEST_ADDR_WILDCARD = 0x0000_0800;
        const EAPOL_REQUEST_ID_MESSAGE = 0x0001_0000;
    }

    /// `NDIS_PM_PROTOCOL_OFFLOAD_*_SUPPORTED` / `NDIS_PM_PROTOCOL_OFFLOAD_*_ENABLED`
    #[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct ProtocolOffloads: u32 {
        const ARP = 0x0000_0001;
        const NS = 0x0000_0002;
        const DOT11_RSN_REKEY = 0x0000_0080;
    }

    /// `NDIS_PM_*_ENABLED` bits of `NDIS_PM_PARAMETERS::WakeUpFlags`
    #[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct WakeUpFlags: u32 {
        const WAKE_ON_LINK_CHANGE = 0x0000_0001;
        const WAKE_ON_MEDIA_DISCONNECT = 0x0000_0002;
        const SELECTIVE_SUSPEND = 0x0000_0010;
        const AOAC_NAPS = 0x0000_0020;
    }

    /// `NDIS_PM_WAKE_ON_*_SUPPORTED`
    #[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct WakeUpEvents: u32 {
        const MEDIA_CONNECT = 0x0000_0001;
        const MEDIA_DISCONNECT = 0x0000_0002;
    }

    /// `NDIS_PM_CAPABILITIES::Flags`
    #[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct PmCapabilityFlags: u32 {
        const WAKE_PACKET_INDICATION = 0x0000_0001;
        const SELECTIVE_SUSPEND = 0x0000_0002;
        const AOAC_NAPS = 0x0000_0004;
    }

    /// `NDIS_WLAN_WAKE_ON_*` and `NDIS_WWAN_WAKE_ON_*`
    #[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct MediaSpecificWakeUpEvents: u32 {
        const WLAN_NLO_DISCOVERY = 0x0000_0001;
        const WLAN_AP_ASSOCIATION_LOST = 0x0000_0002;
        const WLAN_GTK_HANDSHAKE_ERROR = 0x0000_0004;
        const WLAN_4WAY_HANDSHAKE_REQUEST = 0x0000_0008;
        const WWAN_REGISTER_STATE = 0x0001_0000;
        const WWAN_SMS_RECEIVE = 0x0002_0000;
        const WWAN_USSD_RECEIVE = 0x0004_0000;
        const WWAN_PACKET_STATE = 0x0008_0000;
        const WWAN_UICC_CHANGE = 0x0010_0000;
    }
}

/// `NDIS_DEVICE_POWER_STATE`
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Zeroable, Pod)]
#[repr(transparent)]
pub struct NdisDevicePowerState(pub u32);

impl NdisDevicePowerState {
    pub const UNSPECIFIED: Self = Self(0);
    pub const D0: Self = Self(1);
    pub const D1: Self = Self(2);
    pub const D2: Self = Self(3);
    pub const D3: Self = Self(4);
}

/// `NDIS_OBJECT_HEADER`
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Zeroable, Pod)]
#[repr(C)]
pub struct NdisObjectHeader {
    pub object_type: u8,
    pub revision: u8,
    pub size: u16,
}

const_assert_eq!(core::mem::size_of::<NdisObjectHeader>(), 4);

impl NdisObjectHeader {
    pub const fn new(object_type: u8, revision: u8, size: u16) -> Self {
        Self {
            object_type,
            revision,
            size,
        }
    }

    /// Header describing the full current revision of `T`
    pub const fn default_for<T>(revision: u8) -> Self {
        Self::new(
            NDIS_OBJECT_TYPE_DEFAULT,
            revision,
            core::mem::size_of::<T>() as u16,
        )
    }

    /// If this header is an `NDIS_OBJECT_TYPE_DEFAULT` header at least `min_size` bytes long
    pub fn is_default_at_least(&self, min_size: usize) -> bool {
        self.object_type == NDIS_OBJECT_TYPE_DEFAULT && usize::from(self.size) >= min_size
    }
}

/// `NDIS_PM_COUNTED_STRING`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Zeroable, Pod)]
#[repr(C)]
pub struct NdisPmCountedString {
    /// Length of the string, in bytes
    pub length: u16,
    pub string: [u16; NDIS_PM_MAX_STRING_SIZE + 1],
}

const_assert_eq!(core::mem::size_of::<NdisPmCountedString>(), 516);

impl NdisPmCountedString {
    /// Encodes `name`, truncating to [`NDIS_PM_MAX_STRING_SIZE`] code units
    pub fn new(name: &str) -> Self {
        let mut counted: Self = bytemuck::Zeroable::zeroed();
        let mut len = 0;

        for (slot, unit) in counted.string[..NDIS_PM_MAX_STRING_SIZE]
            .iter_mut()
            .zip(name.encode_utf16())
        {
            *slot = unit;
            len += 1;
        }

        counted.length = (len * core::mem::size_of::<u16>()) as u16;
        counted
    }

    /// The UTF-16 code units of the string, without the terminator
    pub fn as_slice(&self) -> &[u16] {
        let len = (usize::from(self.length) / core::mem::size_of::<u16>())
            .min(NDIS_PM_MAX_STRING_SIZE);
        &self.string[..len]
    }
}

impl Default for NdisPmCountedString {
    fn default() -> Self {
        bytemuck::Zeroable::zeroed()
    }
}

/// `NDIS_PM_PARAMETERS`, as sent with `OID_PM_PARAMETERS`
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Zeroable, Pod)]
#[repr(C)]
pub struct NdisPmParameters {
    pub header: NdisObjectHeader,
    pub enabled_wol_packet_patterns: u32,
    pub enabled_protocol_offloads: u32,
    pub wake_up_flags: u32,
    pub media_specific_wake_up_events: u32,
}

const_assert_eq!(core::mem::size_of::<NdisPmParameters>(), 20);

impl NdisPmParameters {
    pub const REVISION_2: u8 = 2;

    pub fn new(
        enabled_wol_packet_patterns: WolPacketPatterns,
        enabled_protocol_offloads: ProtocolOffloads,
        wake_up_flags: WakeUpFlags,
    ) -> Self {
        Self {
            header: NdisObjectHeader::default_for::<Self>(Self::REVISION_2),
            enabled_wol_packet_patterns: enabled_wol_packet_patterns.bits(),
            enabled_protocol_offloads: enabled_protocol_offloads.bits(),
            wake_up_flags: wake_up_flags.bits(),
            media_specific_wake_up_events: 0,
        }
    }

    pub fn enabled_wol_packet_patterns(&self) -> WolPacketPatterns {
        WolPacketPatterns::from_bits_retain(self.enabled_wol_packet_patterns)
    }

    pub fn enabled_protocol_offloads(&self) -> ProtocolOffloads {
        ProtocolOffloads::from_bits_retain(self.enabled_protocol_offloads)
    }

    pub fn wake_up_flags(&self) -> WakeUpFlags {
        WakeUpFlags::from_bits_retain(self.wake_up_flags)
    }

    pub fn media_specific_wake_up_events(&self) -> MediaSpecificWakeUpEvents {
        MediaSpecificWakeUpEvents::from_bits_retain(self.media_specific_wake_up_events)
    }

    /// Reads the parameters from an `OID_PM_PARAMETERS` information buffer
    pub fn parse(buffer: &[u8]) -> Option<Self> {
        crate::read_unaligned(buffer)
    }
}

/// `NDIS_PM_CAPABILITIES`, revision 2
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Zeroable, Pod)]
#[repr(C)]
pub struct NdisPmCapabilities {
    pub header: NdisObjectHeader,
    pub flags: u32,
    pub supported_wol_packet_patterns: u32,
    pub num_total_wol_patterns: u32,
    pub max_wol_pattern_size: u32,
    pub max_wol_pattern_offset: u32,
    pub max_wol_packet_save_buffer: u32,
    pub supported_protocol_offloads: u32,
    pub num_arp_offload_ipv4_addresses: u32,
    pub num_ns_offload_ipv6_addresses: u32,
    pub min_magic_packet_wake_up: NdisDevicePowerState,
    pub min_pattern_wake_up: NdisDevicePowerState,
    pub min_link_change_wake_up: NdisDevicePowerState,
    pub supported_wake_up_events: u32,
    pub media_specific_wake_up_events: u32,
}

const_assert_eq!(core::mem::size_of::<NdisPmCapabilities>(), 60);

impl NdisPmCapabilities {
    pub const REVISION_2: u8 = 2;

    pub fn flags(&self) -> PmCapabilityFlags {
        PmCapabilityFlags::from_bits_retain(self.flags)
    }

    pub fn supported_wol_packet_patterns(&self) -> WolPacketPatterns {
        WolPacketPatterns::from_bits_retain(self.supported_wol_packet_patterns)
    }

    pub fn supported_protocol_offloads(&self) -> ProtocolOffloads {
        ProtocolOffloads::from_bits_retain(self.supported_protocol_offloads)
    }

    pub fn supported_wake_up_events(&self) -> WakeUpEvents {
        WakeUpEvents::from_bits_retain(self.supported_wake_up_events)
    }
}

#[cfg(test)]
mod test {
    use super::{
        NdisObjectHeader, NdisPmCountedString, NdisPmParameters, ProtocolOffloads, WakeUpFlags,
        WolPacketPatterns, NDIS_OBJECT_TYPE_DEFAULT, NDIS_PM_MAX_STRING_SIZE,
    };

    #[test]
    fn parameters_header() {
        let params = NdisPmParameters::new(
            WolPacketPatterns::BITMAP_PATTERN,
            ProtocolOffloads::empty(),
            WakeUpFlags::empty(),
        );

        assert_eq!(
            params.header,
            NdisObjectHeader::new(NDIS_OBJECT_TYPE_DEFAULT, 2, 20)
        );
    }

    #[test]
    fn parse_parameters_from_bytes() {
        let params = NdisPmParameters::new(
            WolPacketPatterns::MAGIC_PACKET,
            ProtocolOffloads::ARP | ProtocolOffloads::NS,
            WakeUpFlags::SELECTIVE_SUSPEND,
        );
        let bytes = bytemuck::bytes_of(&params);

        assert_eq!(NdisPmParameters::parse(bytes), Some(params));
        assert_eq!(NdisPmParameters::parse(&bytes[..19]), None);
    }

    #[test]
    fn unknown_bits_are_retained() {
        let mut params = NdisPmParameters::default();
        params.wake_up_flags = 0x8000_0001;

        assert!(params
            .wake_up_flags()
            .contains(WakeUpFlags::WAKE_ON_LINK_CHANGE));
        assert_eq!(params.wake_up_flags().bits(), 0x8000_0001);
    }

    #[test]
    fn counted_string_encoding() {
        let name = NdisPmCountedString::new("wake");
        assert_eq!(name.length, 8);
        assert_eq!(name.as_slice(), &[b'w' as u16, b'a' as u16, b'k' as u16, b'e' as u16]);
    }

    #[test]
    fn counted_string_truncates() {
        let long = "x".repeat(NDIS_PM_MAX_STRING_SIZE + 10);
        let name = NdisPmCountedString::new(&long);

        assert_eq!(name.as_slice().len(), NDIS_PM_MAX_STRING_SIZE);
        // Terminator is left in place
        assert_eq!(name.string[NDIS_PM_MAX_STRING_SIZE], 0);
    }
}
