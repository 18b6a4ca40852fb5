//! Power capabilities declared by the client driver
//!
//! Each descriptor starts with its own size, so that descriptors from newer
//! clients with extra trailing fields are still accepted.

use core::mem::size_of;

use ndis_rs::pm::{
    MediaSpecificWakeUpEvents, NdisDevicePowerState, NdisObjectHeader, NdisPmCapabilities,
    PmCapabilityFlags, ProtocolOffloads, WakeUpEvents, WakeUpFlags, WolPacketPatterns,
};

const fn descriptor_size<T>() -> u32 {
    size_of::<T>() as u32
}

/// ARP (IPv4) offload support
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
#[repr(C)]
pub struct PowerOffloadArpCapabilities {
    pub size: u32,
    pub arp_offload: bool,
    pub maximum_offload_count: u32,
}

impl PowerOffloadArpCapabilities {
    pub const fn new(maximum_offload_count: u32) -> Self {
        Self {
            size: descriptor_size::<Self>(),
            arp_offload: true,
            maximum_offload_count,
        }
    }
}

/// NS (IPv6) offload support
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
#[repr(C)]
pub struct PowerOffloadNsCapabilities {
    pub size: u32,
    pub ns_offload: bool,
    pub maximum_offload_count: u32,
}

impl PowerOffloadNsCapabilities {
    pub const fn new(maximum_offload_count: u32) -> Self {
        Self {
            size: descriptor_size::<Self>(),
            ns_offload: true,
            maximum_offload_count,
        }
    }
}

/// Wake on bitmap pattern support
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
#[repr(C)]
pub struct WakeBitmapCapabilities {
    pub size: u32,
    pub bitmap_pattern: bool,
    pub maximum_pattern_count: u32,
    pub maximum_pattern_size: u32,
}

impl WakeBitmapCapabilities {
    pub const fn new(maximum_pattern_count: u32, maximum_pattern_size: u32) -> Self {
        Self {
            size: descriptor_size::<Self>(),
            bitmap_pattern: true,
            maximum_pattern_count,
            maximum_pattern_size,
        }
    }
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
#[repr(C)]
pub struct WakeMagicPacketCapabilities {
    pub size: u32,
    pub magic_packet: bool,
}

impl WakeMagicPacketCapabilities {
    pub const fn new() -> Self {
        Self {
            size: descriptor_size::<Self>(),
            magic_packet: true,
        }
    }
}

/// Wake on link state changes
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
#[repr(C)]
pub struct WakeMediaChangeCapabilities {
    pub size: u32,
    pub media_connect: bool,
    pub media_disconnect: bool,
}

impl WakeMediaChangeCapabilities {
    pub const fn new(media_connect: bool, media_disconnect: bool) -> Self {
        Self {
            size: descriptor_size::<Self>(),
            media_connect,
            media_disconnect,
        }
    }

    pub const fn is_supported(&self) -> bool {
        self.media_connect || self.media_disconnect
    }
}

/// Wake on packets matching the receive filter, used for selective suspend
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
#[repr(C)]
pub struct WakePacketFilterCapabilities {
    pub size: u32,
    pub packet_filter_match: bool,
}

impl WakePacketFilterCapabilities {
    pub const fn new() -> Self {
        Self {
            size: descriptor_size::<Self>(),
            packet_filter_match: true,
        }
    }
}

/// Everything the client declared, one descriptor per category
///
/// Undeclared categories are left at their zeroed default.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct PowerCapabilities {
    pub arp: PowerOffloadArpCapabilities,
    pub ns: PowerOffloadNsCapabilities,
    pub bitmap: WakeBitmapCapabilities,
    pub magic_packet: WakeMagicPacketCapabilities,
    pub media_change: WakeMediaChangeCapabilities,
    pub packet_filter: WakePacketFilterCapabilities,
}

impl PowerCapabilities {
    /// Wake-up flags the built-in wake sources can honor
    pub fn supported_wake_up_flags(&self) -> WakeUpFlags {
        let mut flags = WakeUpFlags::empty();

        if self.media_change.media_connect {
            flags |= WakeUpFlags::WAKE_ON_LINK_CHANGE;
        }

        if self.media_change.media_disconnect {
            flags |= WakeUpFlags::WAKE_ON_MEDIA_DISCONNECT;
        }

        if self.packet_filter.packet_filter_match {
            flags |= WakeUpFlags::SELECTIVE_SUSPEND | WakeUpFlags::AOAC_NAPS;
        }

        flags
    }

    /// Derives the capabilities reported to NDIS
    ///
    /// Only depends on the declared descriptors, so it can be derived again at
    /// any time.
    pub fn ndis_capabilities(
        &self,
        media_specific_wake_up_events: MediaSpecificWakeUpEvents,
    ) -> NdisPmCapabilities {
        let mut wake_up_events = WakeUpEvents::empty();
        let mut wol_packet_patterns = WolPacketPatterns::empty();
        let mut protocol_offloads = ProtocolOffloads::empty();
        let mut flags = PmCapabilityFlags::empty();

        if self.media_change.media_connect {
            wake_up_events |= WakeUpEvents::MEDIA_CONNECT;
        }

        if self.media_change.media_disconnect {
            wake_up_events |= WakeUpEvents::MEDIA_DISCONNECT;
        }

        if self.magic_packet.magic_packet {
            wol_packet_patterns |= WolPacketPatterns::MAGIC_PACKET;
        }

        if self.bitmap.bitmap_pattern {
            wol_packet_patterns |= WolPacketPatterns::BITMAP_PATTERN;
        }

        if self.packet_filter.packet_filter_match {
            flags |= PmCapabilityFlags::SELECTIVE_SUSPEND;
        }

        let mut capabilities = NdisPmCapabilities {
            header: NdisObjectHeader::default_for::<NdisPmCapabilities>(
                NdisPmCapabilities::REVISION_2,
            ),
            media_specific_wake_up_events: media_specific_wake_up_events.bits(),
            max_wol_pattern_size: self.bitmap.maximum_pattern_size,
            num_total_wol_patterns: self.bitmap.maximum_pattern_count,
            ..Default::default()
        };

        if self.arp.arp_offload {
            protocol_offloads |= ProtocolOffloads::ARP;
            capabilities.num_arp_offload_ipv4_addresses = self.arp.maximum_offload_count;
        }

        if self.ns.ns_offload {
            protocol_offloads |= ProtocolOffloads::NS;
            capabilities.num_ns_offload_ipv6_addresses = self.ns.maximum_offload_count;
        }

        // Any supported wake source makes NDIS treat the device as wake capable
        if wol_packet_patterns.contains(WolPacketPatterns::BITMAP_PATTERN) {
            capabilities.min_pattern_wake_up = NdisDevicePowerState::D2;
        }

        if wol_packet_patterns.contains(WolPacketPatterns::MAGIC_PACKET) {
            capabilities.min_magic_packet_wake_up = NdisDevicePowerState::D2;
        }

        if wake_up_events.contains(WakeUpEvents::MEDIA_CONNECT) {
            capabilities.min_link_change_wake_up = NdisDevicePowerState::D2;
        }

        capabilities.flags = flags.bits();
        capabilities.supported_wol_packet_patterns = wol_packet_patterns.bits();
        capabilities.supported_protocol_offloads = protocol_offloads.bits();
        capabilities.supported_wake_up_events = wake_up_events.bits();
        capabilities
    }
}

#[cfg(test)]
mod test {
    use ndis_rs::pm::{
        MediaSpecificWakeUpEvents, NdisDevicePowerState, NdisObjectHeader, PmCapabilityFlags,
        ProtocolOffloads, WakeUpEvents, WakeUpFlags, WolPacketPatterns, NDIS_OBJECT_TYPE_DEFAULT,
    };

    use super::{
        PowerCapabilities, PowerOffloadArpCapabilities, PowerOffloadNsCapabilities,
        WakeBitmapCapabilities, WakeMagicPacketCapabilities, WakeMediaChangeCapabilities,
        WakePacketFilterCapabilities,
    };

    #[test]
    fn nothing_declared() {
        let ndis = PowerCapabilities::default().ndis_capabilities(MediaSpecificWakeUpEvents::empty());

        assert_eq!(ndis.header, NdisObjectHeader::new(NDIS_OBJECT_TYPE_DEFAULT, 2, 60));
        assert_eq!(ndis.flags, 0);
        assert_eq!(ndis.supported_wol_packet_patterns, 0);
        assert_eq!(ndis.supported_protocol_offloads, 0);
        assert_eq!(ndis.supported_wake_up_events, 0);
        assert_eq!(ndis.min_pattern_wake_up, NdisDevicePowerState::UNSPECIFIED);
        assert_eq!(ndis.min_magic_packet_wake_up, NdisDevicePowerState::UNSPECIFIED);
        assert_eq!(ndis.min_link_change_wake_up, NdisDevicePowerState::UNSPECIFIED);
    }

    #[test]
    fn everything_declared() {
        let capabilities = PowerCapabilities {
            arp: PowerOffloadArpCapabilities::new(2),
            ns: PowerOffloadNsCapabilities::new(3),
            bitmap: WakeBitmapCapabilities::new(8, 128),
            magic_packet: WakeMagicPacketCapabilities::new(),
            media_change: WakeMediaChangeCapabilities::new(true, true),
            packet_filter: WakePacketFilterCapabilities::new(),
        };

        let ndis =
            capabilities.ndis_capabilities(MediaSpecificWakeUpEvents::WLAN_NLO_DISCOVERY);

        assert_eq!(ndis.flags(), PmCapabilityFlags::SELECTIVE_SUSPEND);
        assert_eq!(
            ndis.supported_wol_packet_patterns(),
            WolPacketPatterns::BITMAP_PATTERN | WolPacketPatterns::MAGIC_PACKET
        );
        assert_eq!(
            ndis.supported_protocol_offloads(),
            ProtocolOffloads::ARP | ProtocolOffloads::NS
        );
        assert_eq!(
            ndis.supported_wake_up_events(),
            WakeUpEvents::MEDIA_CONNECT | WakeUpEvents::MEDIA_DISCONNECT
        );
        assert_eq!(ndis.num_total_wol_patterns, 8);
        assert_eq!(ndis.max_wol_pattern_size, 128);
        assert_eq!(ndis.num_arp_offload_ipv4_addresses, 2);
        assert_eq!(ndis.num_ns_offload_ipv6_addresses, 3);
        assert_eq!(ndis.min_pattern_wake_up, NdisDevicePowerState::D2);
        assert_eq!(ndis.min_magic_packet_wake_up, NdisDevicePowerState::D2);
        assert_eq!(ndis.min_link_change_wake_up, NdisDevicePowerState::D2);
        assert_eq!(
            ndis.media_specific_wake_up_events,
            MediaSpecificWakeUpEvents::WLAN_NLO_DISCOVERY.bits()
        );
    }

    #[test]
    fn disconnect_only_has_no_link_change_state() {
        let capabilities = PowerCapabilities {
            media_change: WakeMediaChangeCapabilities::new(false, true),
            ..Default::default()
        };

        let ndis = capabilities.ndis_capabilities(MediaSpecificWakeUpEvents::empty());

        assert_eq!(ndis.supported_wake_up_events(), WakeUpEvents::MEDIA_DISCONNECT);
        assert_eq!(ndis.min_link_change_wake_up, NdisDevicePowerState::UNSPECIFIED);
    }

    #[test]
    fn derivation_is_repeatable() {
        let capabilities = PowerCapabilities {
            bitmap: WakeBitmapCapabilities::new(4, 64),
            ..Default::default()
        };

        assert_eq!(
            capabilities.ndis_capabilities(MediaSpecificWakeUpEvents::empty()),
            capabilities.ndis_capabilities(MediaSpecificWakeUpEvents::empty())
        );
    }

    #[test]
    fn supported_wake_up_flags() {
        let capabilities = PowerCapabilities {
            media_change: WakeMediaChangeCapabilities::new(true, false),
            packet_filter: WakePacketFilterCapabilities::new(),
            ..Default::default()
        };

        assert_eq!(
            capabilities.supported_wake_up_flags(),
            WakeUpFlags::WAKE_ON_LINK_CHANGE
                | WakeUpFlags::SELECTIVE_SUSPEND
                | WakeUpFlags::AOAC_NAPS
        );
        assert_eq!(
            PowerCapabilities::default().supported_wake_up_flags(),
            WakeUpFlags::empty()
        );
    }
}
