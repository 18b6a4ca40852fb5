//! Read-only view of the negotiated power settings
//!
//! Readable during a power transition, or from within a preview callback.
//! Reading them at any other time brings the system down.

use alloc::sync::Arc;

use ndis_rs::pm::{MediaSpecificWakeUpEvents, ProtocolOffloads, WakeUpFlags, WolPacketPatterns};

use crate::{
    power_policy::{PowerOffload, PowerOffloadKind, PowerPolicy, WakeSource, WakeSourceKind},
    verifier,
};

#[derive(Debug, Clone, Copy)]
pub struct PowerSettings<'a> {
    policy: &'a PowerPolicy,
}

impl<'a> PowerSettings<'a> {
    pub(crate) fn new(policy: &'a PowerPolicy) -> Self {
        Self { policy }
    }

    fn verify_accessible(&self) {
        let globals = self.policy.globals();

        verifier::verify_private_globals(globals);
        verifier::verify_irql_less_or_equal_dispatch(globals);
        verifier::verify_power_settings_accessible(
            globals,
            self.policy.power_settings_accessible(),
        );
    }

    pub fn enabled_wake_patterns(&self) -> WolPacketPatterns {
        self.verify_accessible();
        self.policy
            .with_state(|state| state.parameters.enabled_wol_packet_patterns())
    }

    pub fn enabled_protocol_offloads(&self) -> ProtocolOffloads {
        self.verify_accessible();
        self.policy
            .with_state(|state| state.parameters.enabled_protocol_offloads())
    }

    pub fn enabled_media_specific_wake_up_events(&self) -> MediaSpecificWakeUpEvents {
        self.verify_accessible();
        self.policy
            .with_state(|state| state.parameters.media_specific_wake_up_events())
    }

    /// Wake-up flags as negotiated with NDIS, before masking to what's supported
    pub fn enabled_wake_up_flags(&self) -> WakeUpFlags {
        self.verify_accessible();
        self.policy
            .with_state(|state| state.parameters.wake_up_flags())
    }

    /// The wake pattern at `index`, counting disabled ones too
    ///
    /// An `index` past the end is reported as a violation, and gives `None`.
    pub fn wake_pattern(&self, index: usize) -> Option<Arc<WakeSource>> {
        self.verify_accessible();
        let source = self
            .policy
            .with_state(|state| state.wake_patterns.get(index).cloned());

        verifier::verify_not_null(self.policy.globals(), source).ok()
    }

    /// Number of wake patterns, enabled or not
    pub fn wake_pattern_count(&self) -> usize {
        self.verify_accessible();
        self.policy.with_state(|state| state.wake_patterns.len())
    }

    pub fn wake_pattern_count_for_type(&self, kind: WakeSourceKind) -> usize {
        self.verify_accessible();
        self.policy.with_state(|state| {
            state
                .wake_patterns
                .iter()
                .filter(|source| source.kind() == kind)
                .count()
        })
    }

    pub fn is_wake_pattern_enabled(&self, source: &WakeSource) -> bool {
        self.verify_accessible();
        source.is_enabled()
    }

    /// The protocol offload at `index`, counting disabled ones too
    ///
    /// An `index` past the end is reported as a violation, and gives `None`.
    pub fn protocol_offload(&self, index: usize) -> Option<Arc<PowerOffload>> {
        self.verify_accessible();
        let offload = self
            .policy
            .with_state(|state| state.offloads.get(index).cloned());

        verifier::verify_not_null(self.policy.globals(), offload).ok()
    }

    /// Number of protocol offloads, enabled or not
    pub fn protocol_offload_count(&self) -> usize {
        self.verify_accessible();
        self.policy.with_state(|state| state.offloads.len())
    }

    pub fn protocol_offload_count_for_type(&self, kind: PowerOffloadKind) -> usize {
        self.verify_accessible();
        self.policy.with_state(|state| {
            state
                .offloads
                .iter()
                .filter(|offload| offload.kind() == kind)
                .count()
        })
    }

    pub fn is_protocol_offload_enabled(&self, offload: &PowerOffload) -> bool {
        self.verify_accessible();
        offload.is_enabled()
    }
}
