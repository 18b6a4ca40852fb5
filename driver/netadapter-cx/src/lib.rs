//! NetAdapterCx OID request dispatch and power policy
//!
//! Routes OID requests from NDIS to per-adapter request queues, and keeps
//! track of the wake sources and protocol offloads NDIS asks the adapter to
//! arm while it sleeps.
#![no_std]

extern crate alloc;
#[cfg(test)]
extern crate std;

pub mod adapter;
pub mod capabilities;
pub mod handler_chain;
pub mod power_policy;
pub mod power_settings;
pub mod recorder;
pub mod request;
pub mod request_queue;
pub mod sync;
pub mod verifier;

pub use adapter::NetAdapter;
pub use capabilities::PowerCapabilities;
pub use power_policy::{
    PowerOffload, PowerOffloadKind, PowerOffloadList, PowerPolicy, PowerPolicyEventCallbacks,
    WakeSource, WakeSourceKind, WakeSourceList,
};
pub use power_settings::PowerSettings;
pub use request::{NdisOidRequest, OidRequestCompletion, Request};
pub use request_queue::{Dispatch, RequestQueue, RequestQueueConfig, RequestQueueType};
pub use verifier::DriverGlobals;

#[cfg(test)]
pub(crate) mod test {
    //! Shared fixtures

    use std::{sync::Arc, vec::Vec};

    use ndis_rs::{
        pm::{
            ArpOffloadParameters, NdisPmParameters, NdisPmProtocolOffload, NdisPmWolPattern,
            NsOffloadParameters, ProtocolOffloadType, ProtocolOffloads, WakeUpFlags,
            WolBitmapPatternParameters, WolPacketPatterns, WolPacketType,
        },
        NdisStatus,
    };

    use crate::{
        request::{NdisOidRequest, OidRequestCompletion},
        sync::SpinMutex,
        verifier::DriverGlobals,
    };

    pub fn globals() -> Arc<DriverGlobals> {
        Arc::new(DriverGlobals::new())
    }

    /// Keeps every completed request around for inspection
    pub struct RecordingCompletion {
        completed: SpinMutex<Vec<(NdisOidRequest, NdisStatus)>>,
    }

    impl RecordingCompletion {
        pub fn new() -> Arc<Self> {
            Arc::new(Self {
                completed: SpinMutex::new(Vec::new()),
            })
        }

        /// Drains the completed requests, in completion order
        pub fn take(&self) -> Vec<(NdisOidRequest, NdisStatus)> {
            core::mem::take(&mut *self.completed.lock())
        }

        /// Drains the completed requests, keeping only their status
        pub fn statuses(&self) -> Vec<NdisStatus> {
            self.take().into_iter().map(|(_, status)| status).collect()
        }
    }

    impl OidRequestCompletion for RecordingCompletion {
        fn oid_request_complete(&self, request: NdisOidRequest, status: NdisStatus) {
            self.completed.lock().push((request, status));
        }
    }

    /// An `OID_PM_ADD_WOL_PATTERN` buffer, with the mask and then the pattern
    /// placed right after the descriptor
    pub fn bitmap_pattern_buffer(id: u32, mask: &[u8], pattern: &[u8]) -> Vec<u8> {
        let descriptor_size = core::mem::size_of::<NdisPmWolPattern>();

        let mut descriptor = NdisPmWolPattern::new(WolPacketType::BITMAP_PATTERN, id);
        descriptor.set_bitmap_pattern(WolBitmapPatternParameters {
            mask_offset: descriptor_size as u32,
            mask_size: mask.len() as u32,
            pattern_offset: (descriptor_size + mask.len()) as u32,
            pattern_size: pattern.len() as u32,
        });

        let mut buffer = Vec::from(bytemuck::bytes_of(&descriptor));
        buffer.extend_from_slice(mask);
        buffer.extend_from_slice(pattern);
        buffer
    }

    pub fn magic_packet_buffer(id: u32) -> Vec<u8> {
        let descriptor = NdisPmWolPattern::new(WolPacketType::MAGIC_PACKET, id);
        Vec::from(bytemuck::bytes_of(&descriptor))
    }

    pub fn arp_offload_buffer(id: u32) -> Vec<u8> {
        let mut descriptor = NdisPmProtocolOffload::new(ProtocolOffloadType::IPV4_ARP, id);
        descriptor.set_arp_parameters(ArpOffloadParameters {
            host_ipv4_address: [192, 168, 0, 2],
            ..Default::default()
        });
        Vec::from(bytemuck::bytes_of(&descriptor))
    }

    pub fn ns_offload_buffer(id: u32) -> Vec<u8> {
        let mut target_ipv6_addresses = [[0; 16]; 2];
        target_ipv6_addresses[0][0] = 0xFE;

        let mut descriptor = NdisPmProtocolOffload::new(ProtocolOffloadType::IPV6_NS, id);
        descriptor.set_ns_parameters(NsOffloadParameters {
            target_ipv6_addresses,
            ..Default::default()
        });
        Vec::from(bytemuck::bytes_of(&descriptor))
    }

    /// An `OID_PM_PARAMETERS` buffer
    pub fn parameters_buffer(
        patterns: WolPacketPatterns,
        offloads: ProtocolOffloads,
        flags: WakeUpFlags,
    ) -> Vec<u8> {
        let parameters = NdisPmParameters::new(patterns, offloads, flags);
        Vec::from(bytemuck::bytes_of(&parameters))
    }

    #[test]
    fn recorder_log_installs_once() {
        let first = crate::init_recorder_log!(64, log::LevelFilter::Info);
        let second = crate::init_recorder_log!(64, log::LevelFilter::Info);

        // Other tests may have installed a logger already, but never two
        assert!(first.is_none() || second.is_none());

        if let Some(recorder) = first {
            recorder.clear();
            log::info!("recorded");

            let mut found = false;
            recorder.for_each_line(|line| found |= line.ends_with("recorded"));
            assert!(found);
        }
    }
}
