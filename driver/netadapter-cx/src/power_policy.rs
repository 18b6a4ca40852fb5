//! Wake and protocol offload negotiation with NDIS
//!
//! The client declares what it supports once, before the adapter starts. NDIS
//! then adds and removes wake patterns and protocol offloads, and picks which
//! ones are enabled through `OID_PM_PARAMETERS`. The client reads the result
//! through [`PowerSettings`] while the device transitions to low power.
//!
//! All lists, the negotiated parameters and the capabilities live behind one
//! lock, so that list changes and the recomputation of enabled states happen
//! as one step. Client callbacks are always invoked with the lock released.

use core::mem::size_of;

use alloc::{boxed::Box, collections::VecDeque, sync::Arc};

use crossbeam_utils::atomic::AtomicCell;
use log::{debug, error, info};
use ndis_rs::{
    pm::{
        MediaSpecificWakeUpEvents, NdisPmCapabilities, NdisPmParameters, NdisPmProtocolOffload,
        NdisPmWolPattern, ProtocolOffloadType, ProtocolOffloads, WakeUpFlags, WolPacketPatterns,
        WolPacketType,
    },
    Error, NdisStatus, STATUS,
};

use crate::{
    capabilities::{
        PowerCapabilities, PowerOffloadArpCapabilities, PowerOffloadNsCapabilities,
        WakeBitmapCapabilities, WakeMagicPacketCapabilities, WakeMediaChangeCapabilities,
        WakePacketFilterCapabilities,
    },
    power_settings::PowerSettings,
    sync::SpinMutex,
    verifier::{self, DriverGlobals},
};

pub mod list;
pub mod offload;
pub mod wake;

pub use list::{PowerList, PowerOffloadList, WakeSourceList};
pub use offload::{PowerOffload, PowerOffloadKind};
pub use wake::{BitmapPattern, WakeSource, WakeSourceKind};

/// Lets the client vet a new wake source before it's accepted
///
/// Returning [`STATUS::PM_WOL_PATTERN_LIST_FULL`] rejects it because the
/// hardware has no room left. Any other failure rejects it outright.
pub type PreviewWakeSource =
    Box<dyn Fn(&WakeSource, &PowerSettings<'_>) -> NdisStatus + Send + Sync>;

/// Lets the client vet a new protocol offload before it's accepted
///
/// Returning [`STATUS::PM_PROTOCOL_OFFLOAD_LIST_FULL`] rejects it because the
/// hardware has no room left. Any other failure rejects it outright.
pub type PreviewPowerOffload =
    Box<dyn Fn(&PowerOffload, &PowerSettings<'_>) -> NdisStatus + Send + Sync>;

/// Client callbacks invoked while negotiating with NDIS
///
/// Magic packets are always accepted, so there's no preview for them.
#[derive(Default)]
pub struct PowerPolicyEventCallbacks {
    preview_bitmap_pattern: Option<PreviewWakeSource>,
    preview_arp_offload: Option<PreviewPowerOffload>,
    preview_ns_offload: Option<PreviewPowerOffload>,
}

impl PowerPolicyEventCallbacks {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_preview_bitmap_pattern(
        mut self,
        preview: impl Fn(&WakeSource, &PowerSettings<'_>) -> NdisStatus + Send + Sync + 'static,
    ) -> Self {
        self.preview_bitmap_pattern = Some(Box::new(preview));
        self
    }

    pub fn with_preview_arp_offload(
        mut self,
        preview: impl Fn(&PowerOffload, &PowerSettings<'_>) -> NdisStatus + Send + Sync + 'static,
    ) -> Self {
        self.preview_arp_offload = Some(Box::new(preview));
        self
    }

    pub fn with_preview_ns_offload(
        mut self,
        preview: impl Fn(&PowerOffload, &PowerSettings<'_>) -> NdisStatus + Send + Sync + 'static,
    ) -> Self {
        self.preview_ns_offload = Some(Box::new(preview));
        self
    }
}

impl core::fmt::Debug for PowerPolicyEventCallbacks {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("PowerPolicyEventCallbacks")
            .field("preview_bitmap_pattern", &self.preview_bitmap_pattern.is_some())
            .field("preview_arp_offload", &self.preview_arp_offload.is_some())
            .field("preview_ns_offload", &self.preview_ns_offload.is_some())
            .finish()
    }
}

pub(crate) struct PolicyState {
    pub(crate) parameters: NdisPmParameters,
    pub(crate) capabilities: PowerCapabilities,
    /// Most recently added first
    pub(crate) wake_patterns: VecDeque<Arc<WakeSource>>,
    /// Most recently added first
    pub(crate) offloads: VecDeque<Arc<PowerOffload>>,
    sealed: bool,
}

pub struct PowerPolicy {
    globals: Arc<DriverGlobals>,
    callbacks: PowerPolicyEventCallbacks,
    state: SpinMutex<PolicyState>,
    media_change: Arc<WakeSource>,
    packet_filter_match: Arc<WakeSource>,
    in_power_transition: AtomicCell<bool>,
    preview_in_progress: AtomicCell<bool>,
}

static_assertions::assert_impl_all!(PowerPolicy: Send, Sync);

impl PowerPolicy {
    pub fn new(globals: Arc<DriverGlobals>, callbacks: PowerPolicyEventCallbacks) -> Self {
        Self {
            globals,
            callbacks,
            state: SpinMutex::new(PolicyState {
                parameters: NdisPmParameters::default(),
                capabilities: PowerCapabilities::default(),
                wake_patterns: VecDeque::new(),
                offloads: VecDeque::new(),
                sealed: false,
            }),
            media_change: Arc::new(WakeSource::media_change()),
            packet_filter_match: Arc::new(WakeSource::packet_filter_match()),
            in_power_transition: AtomicCell::new(false),
            preview_in_progress: AtomicCell::new(false),
        }
    }

    pub(crate) fn globals(&self) -> &DriverGlobals {
        &self.globals
    }

    pub(crate) fn with_state<R>(&self, f: impl FnOnce(&PolicyState) -> R) -> R {
        f(&self.state.lock())
    }

    fn declare_capabilities<T>(
        &self,
        declared_size: u32,
        update: impl FnOnce(&mut PowerCapabilities),
    ) {
        verifier::verify_private_globals(&self.globals);
        verifier::verify_irql_passive(&self.globals);
        verifier::verify_type_size(&self.globals, declared_size, size_of::<T>());

        let sealed = self.state.lock().sealed;
        verifier::verify_set_capabilities_in_progress(&self.globals, sealed);

        update(&mut self.state.lock().capabilities);
    }

    pub fn set_power_offload_arp_capabilities(&self, capabilities: &PowerOffloadArpCapabilities) {
        self.declare_capabilities::<PowerOffloadArpCapabilities>(capabilities.size, |declared| {
            declared.arp = *capabilities
        });
    }

    pub fn set_power_offload_ns_capabilities(&self, capabilities: &PowerOffloadNsCapabilities) {
        self.declare_capabilities::<PowerOffloadNsCapabilities>(capabilities.size, |declared| {
            declared.ns = *capabilities
        });
    }

    pub fn set_wake_bitmap_capabilities(&self, capabilities: &WakeBitmapCapabilities) {
        self.declare_capabilities::<WakeBitmapCapabilities>(capabilities.size, |declared| {
            declared.bitmap = *capabilities
        });
    }

    pub fn set_magic_packet_capabilities(&self, capabilities: &WakeMagicPacketCapabilities) {
        self.declare_capabilities::<WakeMagicPacketCapabilities>(capabilities.size, |declared| {
            declared.magic_packet = *capabilities
        });
    }

    pub fn set_wake_media_change_capabilities(&self, capabilities: &WakeMediaChangeCapabilities) {
        self.declare_capabilities::<WakeMediaChangeCapabilities>(capabilities.size, |declared| {
            declared.media_change = *capabilities
        });
    }

    pub fn set_wake_packet_filter_capabilities(
        &self,
        capabilities: &WakePacketFilterCapabilities,
    ) {
        self.declare_capabilities::<WakePacketFilterCapabilities>(capabilities.size, |declared| {
            declared.packet_filter = *capabilities
        });
    }

    /// Stops accepting capability declarations
    pub fn seal_capabilities(&self) {
        self.state.lock().sealed = true;
    }

    pub fn capabilities(&self) -> PowerCapabilities {
        self.state.lock().capabilities
    }

    /// Derives the capabilities reported to NDIS from the declared ones
    ///
    /// ## Errors
    ///
    /// - [`STATUS::INVALID_PARAMETER`] if `media_specific_wake_up_events` has
    ///   unknown events
    pub fn initialize_ndis_capabilities(
        &self,
        media_specific_wake_up_events: MediaSpecificWakeUpEvents,
    ) -> Result<NdisPmCapabilities, Error> {
        verifier::verify_media_specific_wake_up_events(
            &self.globals,
            media_specific_wake_up_events,
        )?;

        Ok(self
            .capabilities()
            .ndis_capabilities(media_specific_wake_up_events))
    }

    /// Handles `OID_PM_ADD_WOL_PATTERN`
    ///
    /// ## Errors
    ///
    /// - [`STATUS::INVALID_PARAMETER`] if `buffer` can't hold a pattern descriptor
    /// - [`STATUS::NOT_SUPPORTED`] if the pattern type wasn't declared as supported
    /// - [`STATUS::INVALID_DATA`] if the descriptor is malformed
    /// - [`STATUS::PM_WOL_PATTERN_LIST_FULL`] if the client has no room for it
    /// - [`STATUS::FAILURE`] if the client rejected it for any other reason
    pub fn add_wake_pattern(&self, buffer: &[u8]) -> Result<(), Error> {
        let Some(descriptor) = NdisPmWolPattern::parse(buffer) else {
            error!(
                "Invalid InformationBufferLength ({}) for OID_PM_ADD_WOL_PATTERN",
                buffer.len()
            );
            return Err(Error(STATUS::INVALID_PARAMETER));
        };

        debug!(
            "==> add_wake_pattern: id {}, type {:?}",
            descriptor.pattern_id, descriptor.wol_packet_type
        );

        let capabilities = self.capabilities();

        let (source, preview) = match descriptor.wol_packet_type {
            WolPacketType::BITMAP_PATTERN if capabilities.bitmap.bitmap_pattern => (
                WakeSource::bitmap_pattern_from_ndis(buffer)?,
                self.callbacks.preview_bitmap_pattern.as_ref(),
            ),
            WolPacketType::MAGIC_PACKET if capabilities.magic_packet.magic_packet => {
                (WakeSource::magic_packet_from_ndis(buffer)?, None)
            }
            _ => return Err(Error(STATUS::NOT_SUPPORTED)),
        };

        if let Some(preview) = preview {
            self.preview(
                |settings| preview(&source, settings),
                STATUS::PM_WOL_PATTERN_LIST_FULL,
            )?;
        }

        let source = Arc::new(source);
        let mut state = self.state.lock();
        source.set_enabled(wake_pattern_enabled(
            source.kind(),
            state.parameters.enabled_wol_packet_patterns(),
        ));
        state.wake_patterns.push_front(source);

        debug!("<== add_wake_pattern: {} patterns", state.wake_patterns.len());
        Ok(())
    }

    /// Handles `OID_PM_REMOVE_WOL_PATTERN`
    ///
    /// ## Errors
    ///
    /// - [`STATUS::INVALID_PARAMETER`] if `buffer` can't hold a pattern id
    /// - [`STATUS::FILE_NOT_FOUND`] if there's no pattern with that id
    pub fn remove_wake_pattern(&self, buffer: &[u8]) -> Result<(), Error> {
        let Some(pattern_id) = ndis_rs::read_unaligned::<u32>(buffer) else {
            error!(
                "Invalid InformationBufferLength ({}) for OID_PM_REMOVE_WOL_PATTERN",
                buffer.len()
            );
            return Err(Error(STATUS::INVALID_PARAMETER));
        };

        let removed = {
            let mut state = self.state.lock();
            state
                .wake_patterns
                .iter()
                .position(|source| source.id() == pattern_id)
                .and_then(|index| state.wake_patterns.remove(index))
        };

        match removed {
            Some(source) => {
                debug!("Removed wake pattern {source:?}");
                Ok(())
            }
            None => Err(Error(STATUS::FILE_NOT_FOUND)),
        }
    }

    /// Handles `OID_PM_ADD_PROTOCOL_OFFLOAD`
    ///
    /// ## Errors
    ///
    /// - [`STATUS::INVALID_PARAMETER`] if `buffer` can't hold an offload descriptor
    /// - [`STATUS::NOT_SUPPORTED`] if the offload type wasn't declared as supported
    /// - [`STATUS::INVALID_DATA`] if the descriptor is malformed
    /// - [`STATUS::PM_PROTOCOL_OFFLOAD_LIST_FULL`] if the client has no room for it
    /// - [`STATUS::FAILURE`] if the client rejected it for any other reason
    pub fn add_protocol_offload(&self, buffer: &[u8]) -> Result<(), Error> {
        let Some(descriptor) = NdisPmProtocolOffload::parse(buffer) else {
            error!(
                "Invalid InformationBufferLength ({}) for OID_PM_ADD_PROTOCOL_OFFLOAD",
                buffer.len()
            );
            return Err(Error(STATUS::INVALID_PARAMETER));
        };

        debug!(
            "==> add_protocol_offload: id {}, type {:?}",
            descriptor.protocol_offload_id, descriptor.protocol_offload_type
        );

        let capabilities = self.capabilities();

        let (offload, preview) = match descriptor.protocol_offload_type {
            ProtocolOffloadType::IPV4_ARP if capabilities.arp.arp_offload => (
                PowerOffload::arp_from_ndis(buffer)?,
                self.callbacks.preview_arp_offload.as_ref(),
            ),
            ProtocolOffloadType::IPV6_NS if capabilities.ns.ns_offload => (
                PowerOffload::ns_from_ndis(buffer)?,
                self.callbacks.preview_ns_offload.as_ref(),
            ),
            _ => return Err(Error(STATUS::NOT_SUPPORTED)),
        };

        if let Some(preview) = preview {
            self.preview(
                |settings| preview(&offload, settings),
                STATUS::PM_PROTOCOL_OFFLOAD_LIST_FULL,
            )?;
        }

        let offload = Arc::new(offload);
        let mut state = self.state.lock();
        offload.set_enabled(protocol_offload_enabled(
            offload.kind(),
            state.parameters.enabled_protocol_offloads(),
        ));
        state.offloads.push_front(offload);

        debug!("<== add_protocol_offload: {} offloads", state.offloads.len());
        Ok(())
    }

    /// Handles `OID_PM_REMOVE_PROTOCOL_OFFLOAD`
    ///
    /// ## Errors
    ///
    /// - [`STATUS::INVALID_PARAMETER`] if `buffer` can't hold an offload id
    /// - [`STATUS::FILE_NOT_FOUND`] if there's no offload with that id
    pub fn remove_protocol_offload(&self, buffer: &[u8]) -> Result<(), Error> {
        let Some(offload_id) = ndis_rs::read_unaligned::<u32>(buffer) else {
            error!(
                "Invalid InformationBufferLength ({}) for OID_PM_REMOVE_PROTOCOL_OFFLOAD",
                buffer.len()
            );
            return Err(Error(STATUS::INVALID_PARAMETER));
        };

        let removed = {
            let mut state = self.state.lock();
            state
                .offloads
                .iter()
                .position(|offload| offload.id() == offload_id)
                .and_then(|index| state.offloads.remove(index))
        };

        match removed {
            Some(offload) => {
                debug!("Removed protocol offload {offload:?}");
                Ok(())
            }
            None => Err(Error(STATUS::FILE_NOT_FOUND)),
        }
    }

    /// Handles `OID_PM_PARAMETERS`
    ///
    /// ## Errors
    ///
    /// - [`STATUS::INVALID_PARAMETER`] if `buffer` can't hold the parameters
    pub fn set_parameters(&self, buffer: &[u8]) -> Result<(), Error> {
        let Some(mut parameters) = NdisPmParameters::parse(buffer) else {
            error!(
                "Invalid InformationBufferLength ({}) for OID_PM_PARAMETERS",
                buffer.len()
            );
            return Err(Error(STATUS::INVALID_PARAMETER));
        };

        info!(
            "Received NDIS_PM_PARAMETERS: EnabledWoLPacketPatterns={:#010x}, EnabledProtocolOffloads={:#010x}, WakeUpFlags={:#010x}",
            parameters.enabled_wol_packet_patterns,
            parameters.enabled_protocol_offloads,
            parameters.wake_up_flags
        );

        let mut state = self.state.lock();
        let capabilities = state.capabilities;

        let mut wake_up_flags = parameters.wake_up_flags();
        if wake_up_flags.intersects(WakeUpFlags::SELECTIVE_SUSPEND | WakeUpFlags::AOAC_NAPS) {
            // Selective suspend wakes on every supported media change, and never on patterns
            if capabilities.media_change.media_connect {
                wake_up_flags |= WakeUpFlags::WAKE_ON_LINK_CHANGE;
            }

            if capabilities.media_change.media_disconnect {
                wake_up_flags |= WakeUpFlags::WAKE_ON_MEDIA_DISCONNECT;
            }

            parameters.wake_up_flags = wake_up_flags.bits();
            parameters.enabled_wol_packet_patterns = 0;
        }

        let update_wake_up_flags = state.parameters.wake_up_flags != parameters.wake_up_flags;
        let update_wake_patterns =
            state.parameters.enabled_wol_packet_patterns != parameters.enabled_wol_packet_patterns;
        let update_protocol_offloads =
            state.parameters.enabled_protocol_offloads != parameters.enabled_protocol_offloads;

        state.parameters = parameters;

        info!(
            "Saved NDIS_PM_PARAMETERS: EnabledWoLPacketPatterns={:#010x}, EnabledProtocolOffloads={:#010x}, WakeUpFlags={:#010x}",
            parameters.enabled_wol_packet_patterns,
            parameters.enabled_protocol_offloads,
            parameters.wake_up_flags
        );

        if update_wake_up_flags {
            let effective = wake_up_flags & capabilities.supported_wake_up_flags();
            info!("Effective WakeUpFlags={:#010x}", effective.bits());

            self.media_change.set_wake_up_flags(effective);
            self.packet_filter_match.set_wake_up_flags(effective);
        }

        if update_wake_patterns {
            let enabled_patterns = parameters.enabled_wol_packet_patterns();
            for source in &state.wake_patterns {
                source.set_enabled(wake_pattern_enabled(source.kind(), enabled_patterns));
            }
        }

        if update_protocol_offloads {
            let enabled_offloads = parameters.enabled_protocol_offloads();
            for offload in &state.offloads {
                offload.set_enabled(protocol_offload_enabled(offload.kind(), enabled_offloads));
            }
        }

        Ok(())
    }

    /// Fills `list` with the wake sources relevant right now
    ///
    /// During a power transition only enabled sources are relevant. Otherwise,
    /// every declared source is.
    pub fn update_wake_source_list(&self, in_power_transition: bool, list: &mut WakeSourceList) {
        list.clear();

        let state = self.state.lock();

        for source in &state.wake_patterns {
            if !in_power_transition || source.is_enabled() {
                list.push(source.clone());
            }
        }

        let capabilities = state.capabilities;
        drop(state);

        if (!in_power_transition && capabilities.media_change.is_supported())
            || self.media_change.is_enabled()
        {
            list.push(self.media_change.clone());
        }

        if (!in_power_transition && capabilities.packet_filter.packet_filter_match)
            || self.packet_filter_match.is_enabled()
        {
            list.push(self.packet_filter_match.clone());
        }
    }

    /// Fills `list` with the protocol offloads relevant right now
    ///
    /// During a power transition only enabled offloads are relevant. Otherwise,
    /// every offload is.
    pub fn update_power_offload_list(&self, in_power_transition: bool, list: &mut PowerOffloadList) {
        list.clear();

        let state = self.state.lock();

        for offload in &state.offloads {
            if !in_power_transition || offload.is_enabled() {
                list.push(offload.clone());
            }
        }
    }

    /// The media change wake source, which always exists
    pub fn media_change(&self) -> &Arc<WakeSource> {
        &self.media_change
    }

    /// The packet filter match wake source, which always exists
    pub fn packet_filter_match(&self) -> &Arc<WakeSource> {
        &self.packet_filter_match
    }

    pub fn begin_power_transition(&self) {
        debug!("Entering power transition");
        self.in_power_transition.store(true);
    }

    pub fn end_power_transition(&self) {
        debug!("Leaving power transition");
        self.in_power_transition.store(false);
    }

    pub fn is_in_power_transition(&self) -> bool {
        self.in_power_transition.load()
    }

    /// If [`PowerSettings`] may be read right now
    pub(crate) fn power_settings_accessible(&self) -> bool {
        self.in_power_transition.load() || self.preview_in_progress.load()
    }

    /// View of the negotiated settings
    ///
    /// Only readable during a power transition.
    pub fn power_settings(&self) -> PowerSettings<'_> {
        PowerSettings::new(self)
    }

    fn preview(
        &self,
        preview: impl FnOnce(&PowerSettings<'_>) -> NdisStatus,
        list_full: NdisStatus,
    ) -> Result<(), Error> {
        let previous = self.preview_in_progress.swap(true);
        let status = {
            let _window = scopeguard::guard(&self.preview_in_progress, |flag| {
                flag.store(previous)
            });
            preview(&PowerSettings::new(self))
        };

        if status == STATUS::SUCCESS {
            Ok(())
        } else if status == list_full {
            debug!("Client has no room for more entries");
            Err(Error(list_full))
        } else {
            debug!("Client rejected entry with {status:?}");
            Err(Error(STATUS::FAILURE))
        }
    }
}

impl core::fmt::Debug for PowerPolicy {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("PowerPolicy")
            .field("callbacks", &self.callbacks)
            .field("in_power_transition", &self.is_in_power_transition())
            .finish_non_exhaustive()
    }
}

fn wake_pattern_enabled(kind: WakeSourceKind, enabled: WolPacketPatterns) -> bool {
    match kind {
        WakeSourceKind::BitmapPattern => enabled.contains(WolPacketPatterns::BITMAP_PATTERN),
        WakeSourceKind::MagicPacket => enabled.contains(WolPacketPatterns::MAGIC_PACKET),
        WakeSourceKind::MediaChange | WakeSourceKind::PacketFilterMatch => false,
    }
}

fn protocol_offload_enabled(kind: PowerOffloadKind, enabled: ProtocolOffloads) -> bool {
    match kind {
        PowerOffloadKind::Arp => enabled.contains(ProtocolOffloads::ARP),
        PowerOffloadKind::Ns => enabled.contains(ProtocolOffloads::NS),
    }
}
