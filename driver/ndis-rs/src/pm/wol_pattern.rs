//! `NDIS_PM_WOL_PATTERN`, sent with `OID_PM_ADD_WOL_PATTERN`

use bytemuck_derive::{Pod, Zeroable};
use static_assertions::const_assert_eq;

use super::{NdisObjectHeader, NdisPmCountedString};

/// `NDIS_PM_WOL_PACKET`
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash, Zeroable, Pod)]
#[repr(transparent)]
pub struct WolPacketType(pub u32);

impl WolPacketType {
    pub const UNSPECIFIED: Self = Self(0);
    pub const BITMAP_PATTERN: Self = Self(1);
    pub const MAGIC_PACKET: Self = Self(2);
    pub const IPV4_TCP_SYN: Self = Self(3);
    pub const IPV6_TCP_SYN: Self = Self(4);
    pub const EAPOL_REQUEST_ID_MESSAGE: Self = Self(5);
}

/// `WoLBitmapPattern` parameters
///
/// Offsets are relative to the start of the owning [`NdisPmWolPattern`].
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Zeroable, Pod)]
#[repr(C)]
pub struct WolBitmapPatternParameters {
    pub mask_offset: u32,
    pub mask_size: u32,
    pub pattern_offset: u32,
    pub pattern_size: u32,
}

const WOL_PATTERN_PARAMETERS_SIZE: usize = 40;

/// `NDIS_PM_WOL_PATTERN`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Zeroable, Pod)]
#[repr(C)]
pub struct NdisPmWolPattern {
    pub header: NdisObjectHeader,
    pub flags: u32,
    pub priority: u32,
    pub wol_packet_type: WolPacketType,
    pub friendly_name: NdisPmCountedString,
    pub pattern_id: u32,
    pub next_wol_pattern_offset: u32,
    /// Per-packet-type parameters
    pub wol_pattern: [u8; WOL_PATTERN_PARAMETERS_SIZE],
}

const_assert_eq!(core::mem::size_of::<NdisPmWolPattern>(), 580);

impl NdisPmWolPattern {
    pub const REVISION_2: u8 = 2;

    pub fn new(wol_packet_type: WolPacketType, pattern_id: u32) -> Self {
        let mut pattern: Self = bytemuck::Zeroable::zeroed();
        pattern.header = NdisObjectHeader::default_for::<Self>(Self::REVISION_2);
        pattern.wol_packet_type = wol_packet_type;
        pattern.pattern_id = pattern_id;
        pattern
    }

    /// Reads the descriptor from an `OID_PM_ADD_WOL_PATTERN` information buffer
    pub fn parse(buffer: &[u8]) -> Option<Self> {
        crate::read_unaligned(buffer)
    }

    /// Interprets the parameters as [`WolBitmapPatternParameters`]
    ///
    /// Only meaningful if `wol_packet_type` is [`WolPacketType::BITMAP_PATTERN`]
    pub fn bitmap_pattern(&self) -> WolBitmapPatternParameters {
        bytemuck::pod_read_unaligned(
            &self.wol_pattern[..core::mem::size_of::<WolBitmapPatternParameters>()],
        )
    }

    pub fn set_bitmap_pattern(&mut self, params: WolBitmapPatternParameters) {
        let bytes = bytemuck::bytes_of(&params);
        self.wol_pattern[..bytes.len()].copy_from_slice(bytes);
    }
}

impl Default for NdisPmWolPattern {
    fn default() -> Self {
        bytemuck::Zeroable::zeroed()
    }
}

#[cfg(test)]
mod test {
    use core::mem::{offset_of, size_of};

    use super::{NdisPmWolPattern, WolBitmapPatternParameters, WolPacketType};
    use crate::pm::NDIS_OBJECT_TYPE_DEFAULT;

    #[test]
    fn layout() {
        assert_eq!(offset_of!(NdisPmWolPattern, friendly_name), 16);
        assert_eq!(offset_of!(NdisPmWolPattern, pattern_id), 532);
        assert_eq!(offset_of!(NdisPmWolPattern, wol_pattern), 540);
    }

    #[test]
    fn new_fills_header() {
        let pattern = NdisPmWolPattern::new(WolPacketType::MAGIC_PACKET, 7);

        assert_eq!(pattern.header.object_type, NDIS_OBJECT_TYPE_DEFAULT);
        assert_eq!(usize::from(pattern.header.size), size_of::<NdisPmWolPattern>());
        assert_eq!(pattern.pattern_id, 7);
    }

    #[test]
    fn bitmap_parameters_live_at_union_start() {
        let mut pattern = NdisPmWolPattern::new(WolPacketType::BITMAP_PATTERN, 1);
        let params = WolBitmapPatternParameters {
            mask_offset: 580,
            mask_size: 1,
            pattern_offset: 581,
            pattern_size: 8,
        };
        pattern.set_bitmap_pattern(params);

        let bytes = bytemuck::bytes_of(&pattern);
        assert_eq!(&bytes[540..544], &580u32.to_le_bytes());
        assert_eq!(pattern.bitmap_pattern(), params);
    }

    #[test]
    fn parse_needs_full_descriptor() {
        let pattern = NdisPmWolPattern::new(WolPacketType::BITMAP_PATTERN, 3);
        let bytes = bytemuck::bytes_of(&pattern);

        assert_eq!(NdisPmWolPattern::parse(&bytes[..100]), None);
        assert_eq!(NdisPmWolPattern::parse(bytes), Some(pattern));
    }
}
