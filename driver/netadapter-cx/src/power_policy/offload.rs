//! Protocol offloads

use crossbeam_utils::atomic::AtomicCell;
use log::error;
use ndis_rs::{
    pm::{ArpOffloadParameters, NdisPmProtocolOffload, NsOffloadParameters},
    Error, STATUS,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PowerOffloadKind {
    /// IPv4 ARP replies
    Arp,
    /// IPv6 neighbor solicitation replies
    Ns,
}

/// A protocol the hardware answers on the host's behalf while asleep
pub struct PowerOffload {
    kind: PowerOffloadKind,
    descriptor: NdisPmProtocolOffload,
    enabled: AtomicCell<bool>,
}

impl PowerOffload {
    /// Builds an ARP offload from an `OID_PM_ADD_PROTOCOL_OFFLOAD` buffer
    ///
    /// ## Errors
    ///
    /// - [`STATUS::INVALID_PARAMETER`] if `buffer` can't hold the descriptor
    /// - [`STATUS::INVALID_DATA`] if the descriptor header isn't a default
    ///   header covering the whole descriptor
    pub(crate) fn arp_from_ndis(buffer: &[u8]) -> Result<Self, Error> {
        Self::from_ndis(PowerOffloadKind::Arp, buffer)
    }

    /// Builds an NS offload from an `OID_PM_ADD_PROTOCOL_OFFLOAD` buffer
    ///
    /// ## Errors
    ///
    /// Same as [`PowerOffload::arp_from_ndis`]
    pub(crate) fn ns_from_ndis(buffer: &[u8]) -> Result<Self, Error> {
        Self::from_ndis(PowerOffloadKind::Ns, buffer)
    }

    fn from_ndis(kind: PowerOffloadKind, buffer: &[u8]) -> Result<Self, Error> {
        let descriptor =
            NdisPmProtocolOffload::parse(buffer).ok_or(Error(STATUS::INVALID_PARAMETER))?;

        if !descriptor
            .header
            .is_default_at_least(core::mem::size_of::<NdisPmProtocolOffload>())
        {
            error!(
                "Protocol offload {} has header {:?}",
                descriptor.protocol_offload_id, descriptor.header
            );
            return Err(Error(STATUS::INVALID_DATA));
        }

        Ok(Self {
            kind,
            descriptor,
            enabled: AtomicCell::new(false),
        })
    }

    /// Offload id assigned by NDIS
    pub fn id(&self) -> u32 {
        self.descriptor.protocol_offload_id
    }

    pub fn kind(&self) -> PowerOffloadKind {
        self.kind
    }

    pub fn descriptor(&self) -> &NdisPmProtocolOffload {
        &self.descriptor
    }

    pub fn arp_parameters(&self) -> Option<ArpOffloadParameters> {
        (self.kind == PowerOffloadKind::Arp).then(|| self.descriptor.arp_parameters())
    }

    pub fn ns_parameters(&self) -> Option<NsOffloadParameters> {
        (self.kind == PowerOffloadKind::Ns).then(|| self.descriptor.ns_parameters())
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled.load()
    }

    pub(crate) fn set_enabled(&self, enabled: bool) {
        self.enabled.store(enabled);
    }
}

impl core::fmt::Debug for PowerOffload {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("PowerOffload")
            .field("id", &self.id())
            .field("kind", &self.kind)
            .field("enabled", &self.is_enabled())
            .finish_non_exhaustive()
    }
}
