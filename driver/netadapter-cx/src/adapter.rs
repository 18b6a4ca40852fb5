//! Adapter-level entry points called by NDIS

use alloc::sync::Arc;

use log::{debug, info, warn};
use ndis_rs::{
    oid::{
        OID_PM_ADD_PROTOCOL_OFFLOAD, OID_PM_ADD_WOL_PATTERN, OID_PM_PARAMETERS,
        OID_PM_REMOVE_PROTOCOL_OFFLOAD, OID_PM_REMOVE_WOL_PATTERN,
    },
    pm::{MediaSpecificWakeUpEvents, NdisPmCapabilities},
    Error, NdisRequestType, NdisStatus, RequestId, STATUS,
};

use crate::{
    power_policy::{PowerPolicy, PowerPolicyEventCallbacks},
    request::{NdisOidRequest, OidRequestCompletion},
    request_queue::{RequestQueue, RequestQueueConfig, RequestQueueType},
    sync::SpinMutex,
    verifier::{self, DriverGlobals},
};

/// Power policy entry point for a power management set request
type PowerRequestHandler = fn(&PowerPolicy, &[u8]) -> Result<(), Error>;

/// A network adapter, as seen by NDIS
pub struct NetAdapter {
    globals: Arc<DriverGlobals>,
    completion: Arc<dyn OidRequestCompletion>,
    default_sequential_queue: SpinMutex<Option<Arc<RequestQueue>>>,
    default_parallel_queue: SpinMutex<Option<Arc<RequestQueue>>>,
    power_policy: PowerPolicy,
    ndis_capabilities: SpinMutex<Option<NdisPmCapabilities>>,
}

static_assertions::assert_impl_all!(NetAdapter: Send, Sync);

impl NetAdapter {
    pub fn new(
        globals: Arc<DriverGlobals>,
        completion: Arc<dyn OidRequestCompletion>,
        power_callbacks: PowerPolicyEventCallbacks,
    ) -> Self {
        verifier::verify_private_globals(&globals);

        Self {
            power_policy: PowerPolicy::new(globals.clone(), power_callbacks),
            globals,
            completion,
            default_sequential_queue: SpinMutex::new(None),
            default_parallel_queue: SpinMutex::new(None),
            ndis_capabilities: SpinMutex::new(None),
        }
    }

    pub fn power_policy(&self) -> &PowerPolicy {
        &self.power_policy
    }

    /// Creates the default queue of the configured type
    ///
    /// ## Errors
    ///
    /// - [`STATUS::INVALID_DEVICE_STATE`] if the adapter already has a queue of that type
    /// - [`STATUS::INVALID_PARAMETER`] if `config` can't handle any request
    pub fn create_request_queue(
        &self,
        config: RequestQueueConfig,
    ) -> Result<Arc<RequestQueue>, Error> {
        verifier::verify_private_globals(&self.globals);
        verifier::verify_irql_passive(&self.globals);

        let slot = match config.queue_type() {
            RequestQueueType::DefaultSequential => &self.default_sequential_queue,
            RequestQueueType::DefaultParallel => &self.default_parallel_queue,
        };

        let mut slot = slot.lock();
        verifier::verify_default_queue_slot_free(&self.globals, slot.is_some())?;

        let queue = RequestQueue::create(self.globals.clone(), self.completion.clone(), config)?;
        *slot = Some(queue.clone());

        Ok(queue)
    }

    /// Finishes capability declaration, giving the capabilities to report to NDIS
    ///
    /// ## Errors
    ///
    /// - [`STATUS::INVALID_PARAMETER`] if `media_specific_wake_up_events` has
    ///   unknown events
    pub fn start(
        &self,
        media_specific_wake_up_events: MediaSpecificWakeUpEvents,
    ) -> Result<NdisPmCapabilities, Error> {
        debug!("==> start");

        self.power_policy.seal_capabilities();
        let capabilities = self
            .power_policy
            .initialize_ndis_capabilities(media_specific_wake_up_events)?;
        *self.ndis_capabilities.lock() = Some(capabilities);

        info!(
            "Power capabilities: flags {:#x}, wol {:#x}, offloads {:#x}, events {:#x}",
            capabilities.flags,
            capabilities.supported_wol_packet_patterns,
            capabilities.supported_protocol_offloads,
            capabilities.supported_wake_up_events
        );

        debug!("<== start");
        Ok(capabilities)
    }

    /// Capabilities reported to NDIS on start, if started
    pub fn ndis_capabilities(&self) -> Option<NdisPmCapabilities> {
        *self.ndis_capabilities.lock()
    }

    /// Handles a regular OID request
    ///
    /// Power management requests are handled on the spot. Everything else goes
    /// through the default sequential queue. Every request is completed through
    /// the completion sink, so this always gives [`STATUS::PENDING`].
    pub fn ndis_oid_request(&self, request: NdisOidRequest) -> NdisStatus {
        if request.request_type == NdisRequestType::SET_INFORMATION {
            let handler: Option<PowerRequestHandler> = match request.oid {
                OID_PM_PARAMETERS => Some(PowerPolicy::set_parameters),
                OID_PM_ADD_WOL_PATTERN => Some(PowerPolicy::add_wake_pattern),
                OID_PM_REMOVE_WOL_PATTERN => Some(PowerPolicy::remove_wake_pattern),
                OID_PM_ADD_PROTOCOL_OFFLOAD => Some(PowerPolicy::add_protocol_offload),
                OID_PM_REMOVE_PROTOCOL_OFFLOAD => Some(PowerPolicy::remove_protocol_offload),
                _ => None,
            };

            if let Some(handler) = handler {
                self.complete_power_request(request, handler);
                return STATUS::PENDING;
            }
        }

        let queue = self.default_sequential_queue.lock().clone();
        self.queue_or_reject(queue, request);
        STATUS::PENDING
    }

    /// Handles a direct OID request through the default parallel queue
    pub fn ndis_direct_oid_request(&self, request: NdisOidRequest) -> NdisStatus {
        let queue = self.default_parallel_queue.lock().clone();
        self.queue_or_reject(queue, request);
        STATUS::PENDING
    }

    /// Cancels regular OID requests with `request_id`, giving how many were canceled
    pub fn ndis_cancel_oid_request(&self, request_id: RequestId) -> usize {
        let queue = self.default_sequential_queue.lock().clone();
        queue.map_or(0, |queue| queue.cancel_requests(request_id))
    }

    /// Cancels direct OID requests with `request_id`, giving how many were canceled
    pub fn ndis_cancel_direct_oid_request(&self, request_id: RequestId) -> usize {
        let queue = self.default_parallel_queue.lock().clone();
        queue.map_or(0, |queue| queue.cancel_requests(request_id))
    }

    pub fn begin_power_transition(&self) {
        self.power_policy.begin_power_transition();
    }

    pub fn end_power_transition(&self) {
        self.power_policy.end_power_transition();
    }

    fn queue_or_reject(&self, queue: Option<Arc<RequestQueue>>, request: NdisOidRequest) {
        match queue {
            Some(queue) => {
                queue.queue_ndis_oid_request(request);
            }
            None => {
                warn!("No queue for {:x?}, rejecting it", request.oid);
                self.completion
                    .oid_request_complete(request, STATUS::NOT_SUPPORTED);
            }
        }
    }

    fn complete_power_request(&self, mut request: NdisOidRequest, handler: PowerRequestHandler) {
        let input_length =
            (request.input_buffer_length as usize).min(request.information_buffer.len());
        let result = handler(&self.power_policy, &request.information_buffer[..input_length]);

        let status = match result {
            Ok(()) => {
                request.bytes_read = input_length as u32;
                STATUS::SUCCESS
            }
            Err(Error(status)) => status,
        };

        debug!("Power request {:x?} completed with {status:?}", request.oid);
        self.completion.oid_request_complete(request, status);
    }
}

impl core::fmt::Debug for NetAdapter {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("NetAdapter")
            .field("power_policy", &self.power_policy)
            .finish_non_exhaustive()
    }
}
