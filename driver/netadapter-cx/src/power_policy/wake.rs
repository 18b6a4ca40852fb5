//! Wake sources

use alloc::vec::Vec;

use crossbeam_utils::atomic::AtomicCell;
use log::error;
use ndis_rs::{
    pm::{NdisPmWolPattern, WakeUpFlags},
    Error, STATUS,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WakeSourceKind {
    BitmapPattern,
    MagicPacket,
    /// Built-in, covers both media connect and media disconnect
    MediaChange,
    /// Built-in, used for selective suspend
    PacketFilterMatch,
}

/// Mask and pattern bytes of a bitmap wake pattern
///
/// Bit `n` of the mask selects whether byte `n` of the pattern must match.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BitmapPattern {
    pub mask: Vec<u8>,
    pub pattern: Vec<u8>,
}

/// Something that can wake the device
pub struct WakeSource {
    id: u32,
    kind: WakeSourceKind,
    wol_pattern: Option<NdisPmWolPattern>,
    bitmap: Option<BitmapPattern>,
    enabled: AtomicCell<bool>,
    /// Effective wake-up flags, only used by the built-in sources
    wake_up_flags: AtomicCell<u32>,
}

impl WakeSource {
    fn new(kind: WakeSourceKind, wol_pattern: Option<NdisPmWolPattern>) -> Self {
        Self {
            id: wol_pattern.map_or(0, |pattern| pattern.pattern_id),
            kind,
            wol_pattern,
            bitmap: None,
            enabled: AtomicCell::new(false),
            wake_up_flags: AtomicCell::new(0),
        }
    }

    pub(crate) fn media_change() -> Self {
        Self::new(WakeSourceKind::MediaChange, None)
    }

    pub(crate) fn packet_filter_match() -> Self {
        Self::new(WakeSourceKind::PacketFilterMatch, None)
    }

    /// Builds a bitmap pattern wake source from an `OID_PM_ADD_WOL_PATTERN` buffer
    ///
    /// ## Errors
    ///
    /// - [`STATUS::INVALID_PARAMETER`] if `buffer` can't hold the descriptor
    /// - [`STATUS::INVALID_DATA`] if the descriptor header is malformed, the mask
    ///   or pattern lie outside of `buffer`, or the mask doesn't cover every
    ///   pattern byte
    pub(crate) fn bitmap_pattern_from_ndis(buffer: &[u8]) -> Result<Self, Error> {
        let descriptor = parse_descriptor(buffer)?;
        let params = descriptor.bitmap_pattern();

        let mask = slice_at(buffer, params.mask_offset, params.mask_size)?;
        let pattern = slice_at(buffer, params.pattern_offset, params.pattern_size)?;

        if u64::from(params.mask_size) * 8 < u64::from(params.pattern_size) {
            error!(
                "Bitmap pattern {} has {} mask bytes for {} pattern bytes",
                descriptor.pattern_id, params.mask_size, params.pattern_size
            );
            return Err(Error(STATUS::INVALID_DATA));
        }

        let mut source = Self::new(WakeSourceKind::BitmapPattern, Some(descriptor));
        source.bitmap = Some(BitmapPattern {
            mask: mask.to_vec(),
            pattern: pattern.to_vec(),
        });
        Ok(source)
    }

    /// Builds a magic packet wake source from an `OID_PM_ADD_WOL_PATTERN` buffer
    ///
    /// ## Errors
    ///
    /// - [`STATUS::INVALID_PARAMETER`] if `buffer` can't hold the descriptor
    /// - [`STATUS::INVALID_DATA`] if the descriptor header is malformed
    pub(crate) fn magic_packet_from_ndis(buffer: &[u8]) -> Result<Self, Error> {
        let descriptor = parse_descriptor(buffer)?;
        Ok(Self::new(WakeSourceKind::MagicPacket, Some(descriptor)))
    }

    /// Pattern id assigned by NDIS, 0 for the built-in sources
    pub fn id(&self) -> u32 {
        self.id
    }

    pub fn kind(&self) -> WakeSourceKind {
        self.kind
    }

    pub fn is_built_in(&self) -> bool {
        self.wol_pattern.is_none()
    }

    /// The descriptor this source was built from
    pub fn wol_pattern(&self) -> Option<&NdisPmWolPattern> {
        self.wol_pattern.as_ref()
    }

    pub fn bitmap(&self) -> Option<&BitmapPattern> {
        self.bitmap.as_ref()
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled.load()
    }

    pub fn wake_up_flags(&self) -> WakeUpFlags {
        WakeUpFlags::from_bits_retain(self.wake_up_flags.load())
    }

    /// If waking on media connect is enabled
    pub fn media_connect_enabled(&self) -> bool {
        self.kind == WakeSourceKind::MediaChange
            && self.wake_up_flags().contains(WakeUpFlags::WAKE_ON_LINK_CHANGE)
    }

    /// If waking on media disconnect is enabled
    pub fn media_disconnect_enabled(&self) -> bool {
        self.kind == WakeSourceKind::MediaChange
            && self
                .wake_up_flags()
                .contains(WakeUpFlags::WAKE_ON_MEDIA_DISCONNECT)
    }

    pub(crate) fn set_enabled(&self, enabled: bool) {
        self.enabled.store(enabled);
    }

    /// Stores the effective wake-up flags of a built-in source, which also
    /// decide if it's enabled
    pub(crate) fn set_wake_up_flags(&self, flags: WakeUpFlags) {
        let relevant = match self.kind {
            WakeSourceKind::MediaChange => {
                WakeUpFlags::WAKE_ON_LINK_CHANGE | WakeUpFlags::WAKE_ON_MEDIA_DISCONNECT
            }
            WakeSourceKind::PacketFilterMatch => {
                WakeUpFlags::SELECTIVE_SUSPEND | WakeUpFlags::AOAC_NAPS
            }
            _ => WakeUpFlags::empty(),
        };

        self.wake_up_flags.store(flags.bits());
        self.enabled.store(flags.intersects(relevant));
    }
}

impl core::fmt::Debug for WakeSource {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("WakeSource")
            .field("id", &self.id)
            .field("kind", &self.kind)
            .field("enabled", &self.is_enabled())
            .field("wake_up_flags", &self.wake_up_flags())
            .finish_non_exhaustive()
    }
}

fn parse_descriptor(buffer: &[u8]) -> Result<NdisPmWolPattern, Error> {
    let descriptor =
        NdisPmWolPattern::parse(buffer).ok_or(Error(STATUS::INVALID_PARAMETER))?;

    if !descriptor
        .header
        .is_default_at_least(core::mem::size_of::<NdisPmWolPattern>())
    {
        error!(
            "Wake pattern {} has header {:?}",
            descriptor.pattern_id, descriptor.header
        );
        return Err(Error(STATUS::INVALID_DATA));
    }

    Ok(descriptor)
}

/// `len` bytes at `offset` in `buffer`
fn slice_at(buffer: &[u8], offset: u32, len: u32) -> Result<&[u8], Error> {
    let start = usize::try_from(offset).map_err(|_| Error(STATUS::INVALID_DATA))?;
    let len = usize::try_from(len).map_err(|_| Error(STATUS::INVALID_DATA))?;

    start
        .checked_add(len)
        .and_then(|end| buffer.get(start..end))
        .ok_or_else(|| {
            error!(
                "Bitmap pattern data at {start}..+{len} is outside of the {} byte buffer",
                buffer.len()
            );
            Error(STATUS::INVALID_DATA)
        })
}

#[cfg(test)]
mod test {
    use ndis_rs::{
        pm::{WakeUpFlags, WolBitmapPatternParameters},
        Error, STATUS,
    };

    use super::{WakeSource, WakeSourceKind};
    use crate::test::{bitmap_pattern_buffer, magic_packet_buffer};

    #[test]
    fn bitmap_pattern_copies_mask_and_pattern() {
        let buffer = bitmap_pattern_buffer(3, &[0x0F], &[1, 2, 3, 4]);
        let source = WakeSource::bitmap_pattern_from_ndis(&buffer).unwrap();

        assert_eq!(source.id(), 3);
        assert_eq!(source.kind(), WakeSourceKind::BitmapPattern);
        assert!(!source.is_enabled());
        assert!(!source.is_built_in());

        let bitmap = source.bitmap().unwrap();
        assert_eq!(bitmap.mask, [0x0F]);
        assert_eq!(bitmap.pattern, [1, 2, 3, 4]);
    }

    #[test]
    fn bitmap_pattern_out_of_bounds() {
        let mut buffer = bitmap_pattern_buffer(3, &[0xFF], &[1, 2, 3, 4]);
        // Cut off the last pattern byte
        buffer.pop();

        assert_eq!(
            WakeSource::bitmap_pattern_from_ndis(&buffer).unwrap_err(),
            Error(STATUS::INVALID_DATA)
        );
    }

    #[test]
    fn bitmap_pattern_offset_past_buffer() {
        let mut buffer = bitmap_pattern_buffer(3, &[0xFF], &[1, 2, 3, 4]);
        let mut descriptor = ndis_rs::pm::NdisPmWolPattern::parse(&buffer).unwrap();
        descriptor.set_bitmap_pattern(WolBitmapPatternParameters {
            mask_offset: u32::MAX,
            mask_size: 2,
            ..descriptor.bitmap_pattern()
        });
        buffer[..core::mem::size_of_val(&descriptor)]
            .copy_from_slice(bytemuck::bytes_of(&descriptor));

        assert_eq!(
            WakeSource::bitmap_pattern_from_ndis(&buffer).unwrap_err(),
            Error(STATUS::INVALID_DATA)
        );
    }

    #[test]
    fn bitmap_mask_must_cover_pattern() {
        // 9 pattern bytes need at least 2 mask bytes
        let buffer = bitmap_pattern_buffer(3, &[0xFF], &[0; 9]);

        assert_eq!(
            WakeSource::bitmap_pattern_from_ndis(&buffer).unwrap_err(),
            Error(STATUS::INVALID_DATA)
        );
    }

    #[test]
    fn wrong_object_type() {
        let mut buffer = magic_packet_buffer(1);
        buffer[0] = 0;

        assert_eq!(
            WakeSource::magic_packet_from_ndis(&buffer).unwrap_err(),
            Error(STATUS::INVALID_DATA)
        );
    }

    #[test]
    fn header_size_too_small() {
        let mut buffer = magic_packet_buffer(1);
        buffer[2..4].copy_from_slice(&100u16.to_le_bytes());

        assert_eq!(
            WakeSource::magic_packet_from_ndis(&buffer).unwrap_err(),
            Error(STATUS::INVALID_DATA)
        );
    }

    #[test]
    fn magic_packet() {
        let source = WakeSource::magic_packet_from_ndis(&magic_packet_buffer(9)).unwrap();

        assert_eq!(source.id(), 9);
        assert_eq!(source.kind(), WakeSourceKind::MagicPacket);
        assert!(source.bitmap().is_none());
        assert_eq!(source.wol_pattern().unwrap().pattern_id, 9);
    }

    #[test]
    fn built_in_enabled_by_relevant_flags() {
        let media_change = WakeSource::media_change();
        let packet_filter = WakeSource::packet_filter_match();

        media_change.set_wake_up_flags(WakeUpFlags::SELECTIVE_SUSPEND);
        packet_filter.set_wake_up_flags(WakeUpFlags::SELECTIVE_SUSPEND);
        assert!(!media_change.is_enabled());
        assert!(packet_filter.is_enabled());

        media_change.set_wake_up_flags(WakeUpFlags::WAKE_ON_MEDIA_DISCONNECT);
        packet_filter.set_wake_up_flags(WakeUpFlags::WAKE_ON_MEDIA_DISCONNECT);
        assert!(media_change.is_enabled());
        assert!(media_change.media_disconnect_enabled());
        assert!(!media_change.media_connect_enabled());
        assert!(!packet_filter.is_enabled());
    }
}
