//! OID request queues
//!
//! A queue routes each request to the first registered handler for its OID,
//! falling back to the per-category default, then the global default. It also
//! tracks every request it admitted until completion, so that NDIS can cancel
//! them.

use alloc::{
    boxed::Box,
    sync::{Arc, Weak},
    vec::Vec,
};

use log::{debug, error};
use ndis_rs::{Error, NdisRequestType, NdisStatus, Oid, RequestId, STATUS};

use crate::{
    handler_chain::{HandlerChain, Lookup},
    request::{NdisOidRequest, OidRequestCompletion, Request},
    sync::SpinMutex,
    verifier::{self, DriverGlobals},
};

/// How the adapter feeds requests into a queue
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestQueueType {
    /// Receives regular OID requests, one at a time
    DefaultSequential,
    /// Receives direct OID requests, which may overlap
    DefaultParallel,
}

/// Called with the input buffer length
pub type SetDataHandler = Box<dyn Fn(&RequestQueue, &Arc<Request>, u32) + Send + Sync>;
/// Called with the output buffer length
pub type QueryDataHandler = Box<dyn Fn(&RequestQueue, &Arc<Request>, u32) + Send + Sync>;
/// Called with the input and output buffer lengths
pub type MethodHandler = Box<dyn Fn(&RequestQueue, &Arc<Request>, u32, u32) + Send + Sync>;

pub type DefaultSetDataHandler =
    Box<dyn Fn(&RequestQueue, &Arc<Request>, Oid, u32) + Send + Sync>;
pub type DefaultQueryDataHandler =
    Box<dyn Fn(&RequestQueue, &Arc<Request>, Oid, u32) + Send + Sync>;
pub type DefaultMethodHandler =
    Box<dyn Fn(&RequestQueue, &Arc<Request>, Oid, u32, u32) + Send + Sync>;
/// Catch-all, called with the request type, OID, and input and output buffer lengths
pub type DefaultHandler =
    Box<dyn Fn(&RequestQueue, &Arc<Request>, NdisRequestType, Oid, u32, u32) + Send + Sync>;

/// Handlers to create a [`RequestQueue`] with
pub struct RequestQueueConfig {
    queue_type: RequestQueueType,
    set_data_handlers: HandlerChain<SetDataHandler>,
    query_data_handlers: HandlerChain<QueryDataHandler>,
    method_handlers: HandlerChain<MethodHandler>,
    default_set_data_handler: Option<DefaultSetDataHandler>,
    default_query_data_handler: Option<DefaultQueryDataHandler>,
    default_method_handler: Option<DefaultMethodHandler>,
    default_handler: Option<DefaultHandler>,
}

impl RequestQueueConfig {
    pub fn new(queue_type: RequestQueueType) -> Self {
        Self {
            queue_type,
            set_data_handlers: HandlerChain::new(),
            query_data_handlers: HandlerChain::new(),
            method_handlers: HandlerChain::new(),
            default_set_data_handler: None,
            default_query_data_handler: None,
            default_method_handler: None,
            default_handler: None,
        }
    }

    pub fn queue_type(&self) -> RequestQueueType {
        self.queue_type
    }

    /// Handles set-information requests for `oid` carrying at least `min_input_length` bytes
    pub fn add_set_data_handler(
        mut self,
        oid: Oid,
        min_input_length: u32,
        handler: impl Fn(&RequestQueue, &Arc<Request>, u32) + Send + Sync + 'static,
    ) -> Self {
        self.set_data_handlers
            .push(oid, min_input_length, 0, Box::new(handler));
        self
    }

    /// Handles query requests for `oid` with room for at least `min_output_length` bytes
    pub fn add_query_data_handler(
        mut self,
        oid: Oid,
        min_output_length: u32,
        handler: impl Fn(&RequestQueue, &Arc<Request>, u32) + Send + Sync + 'static,
    ) -> Self {
        self.query_data_handlers
            .push(oid, 0, min_output_length, Box::new(handler));
        self
    }

    pub fn add_method_handler(
        mut self,
        oid: Oid,
        min_input_length: u32,
        min_output_length: u32,
        handler: impl Fn(&RequestQueue, &Arc<Request>, u32, u32) + Send + Sync + 'static,
    ) -> Self {
        self.method_handlers.push(
            oid,
            min_input_length,
            min_output_length,
            Box::new(handler),
        );
        self
    }

    pub fn set_default_set_data_handler(
        mut self,
        handler: impl Fn(&RequestQueue, &Arc<Request>, Oid, u32) + Send + Sync + 'static,
    ) -> Self {
        self.default_set_data_handler = Some(Box::new(handler));
        self
    }

    pub fn set_default_query_data_handler(
        mut self,
        handler: impl Fn(&RequestQueue, &Arc<Request>, Oid, u32) + Send + Sync + 'static,
    ) -> Self {
        self.default_query_data_handler = Some(Box::new(handler));
        self
    }

    pub fn set_default_method_handler(
        mut self,
        handler: impl Fn(&RequestQueue, &Arc<Request>, Oid, u32, u32) + Send + Sync + 'static,
    ) -> Self {
        self.default_method_handler = Some(Box::new(handler));
        self
    }

    pub fn set_default_handler(
        mut self,
        handler: impl Fn(&RequestQueue, &Arc<Request>, NdisRequestType, Oid, u32, u32)
            + Send
            + Sync
            + 'static,
    ) -> Self {
        self.default_handler = Some(Box::new(handler));
        self
    }

    fn has_handlers(&self) -> bool {
        !self.set_data_handlers.is_empty()
            || !self.query_data_handlers.is_empty()
            || !self.method_handlers.is_empty()
            || self.default_set_data_handler.is_some()
            || self.default_query_data_handler.is_some()
            || self.default_method_handler.is_some()
            || self.default_handler.is_some()
    }
}

/// Which path a dispatched request took
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dispatch {
    /// A registered handler now owns the request
    Handler,
    /// The per-category default now owns the request
    CategoryDefault,
    /// The global default now owns the request
    GlobalDefault,
    /// The request was completed on the spot
    Completed(NdisStatus),
}

pub struct RequestQueue {
    globals: Arc<DriverGlobals>,
    completion: Arc<dyn OidRequestCompletion>,
    this: Weak<RequestQueue>,
    queue_type: RequestQueueType,
    set_data_handlers: HandlerChain<SetDataHandler>,
    query_data_handlers: HandlerChain<QueryDataHandler>,
    method_handlers: HandlerChain<MethodHandler>,
    default_set_data_handler: Option<DefaultSetDataHandler>,
    default_query_data_handler: Option<DefaultQueryDataHandler>,
    default_method_handler: Option<DefaultMethodHandler>,
    default_handler: Option<DefaultHandler>,
    /// Admitted requests that haven't been completed yet
    in_flight: SpinMutex<Vec<Arc<Request>>>,
}

static_assertions::assert_impl_all!(RequestQueue: Send, Sync);

impl RequestQueue {
    /// Creates a queue that completes requests through `completion`
    ///
    /// ## Errors
    ///
    /// - [`STATUS::INVALID_PARAMETER`] if `config` can't handle any request
    pub fn create(
        globals: Arc<DriverGlobals>,
        completion: Arc<dyn OidRequestCompletion>,
        config: RequestQueueConfig,
    ) -> Result<Arc<Self>, Error> {
        verifier::verify_private_globals(&globals);
        verifier::verify_queue_configuration(&globals, config.has_handlers())?;

        let RequestQueueConfig {
            queue_type,
            set_data_handlers,
            query_data_handlers,
            method_handlers,
            default_set_data_handler,
            default_query_data_handler,
            default_method_handler,
            default_handler,
        } = config;

        debug!(
            "Creating {queue_type:?} queue with {} set, {} query, {} method handlers",
            set_data_handlers.len(),
            query_data_handlers.len(),
            method_handlers.len()
        );

        Ok(Arc::new_cyclic(|this| Self {
            globals,
            completion,
            this: this.clone(),
            queue_type,
            set_data_handlers,
            query_data_handlers,
            method_handlers,
            default_set_data_handler,
            default_query_data_handler,
            default_method_handler,
            default_handler,
            in_flight: SpinMutex::new(Vec::new()),
        }))
    }

    pub fn queue_type(&self) -> RequestQueueType {
        self.queue_type
    }

    /// Number of admitted requests that haven't been completed yet
    pub fn in_flight_count(&self) -> usize {
        self.in_flight.lock().len()
    }

    /// Admits a raw request and dispatches it
    ///
    /// Callers must not dispatch requests for the same adapter concurrently.
    /// A raw request that can't be wrapped is completed right away, without
    /// ever being tracked.
    pub fn queue_ndis_oid_request(&self, raw: NdisOidRequest) -> Dispatch {
        let request = match Request::wrap(self.globals.clone(), self.completion.clone(), raw) {
            Ok(request) => request,
            Err((raw, Error(status))) => {
                self.completion.oid_request_complete(raw, status);
                return Dispatch::Completed(status);
            }
        };

        request.attach(self.this.clone());
        self.in_flight.lock().push(request.clone());

        self.dispatch_request(&request)
    }

    /// Hands the request to exactly one handler, or completes it
    pub fn dispatch_request(&self, request: &Arc<Request>) -> Dispatch {
        let oid = request.oid();
        let request_type = request.request_type();
        let input_length = request.input_length();
        let output_length = request.output_length();

        debug!("==> dispatch_request: {oid:x?} {request_type:?}, in {input_length}, out {output_length}");

        let dispatch = match request_type {
            NdisRequestType::SET_INFORMATION => {
                match self.set_data_handlers.find(oid, input_length, output_length) {
                    Lookup::Found(entry) => {
                        (entry.handler)(self, request, input_length);
                        Dispatch::Handler
                    }
                    Lookup::NotFound => match &self.default_set_data_handler {
                        Some(handler) => {
                            handler(self, request, oid, input_length);
                            Dispatch::CategoryDefault
                        }
                        None => self.dispatch_default(request),
                    },
                    Lookup::BufferTooSmall { bytes_needed } => {
                        self.fail_buffer_too_small(request, bytes_needed)
                    }
                }
            }
            NdisRequestType::QUERY_INFORMATION | NdisRequestType::QUERY_STATISTICS => {
                match self.query_data_handlers.find(oid, input_length, output_length) {
                    Lookup::Found(entry) => {
                        (entry.handler)(self, request, output_length);
                        Dispatch::Handler
                    }
                    Lookup::NotFound => match &self.default_query_data_handler {
                        Some(handler) => {
                            handler(self, request, oid, output_length);
                            Dispatch::CategoryDefault
                        }
                        None => self.dispatch_default(request),
                    },
                    Lookup::BufferTooSmall { bytes_needed } => {
                        self.fail_buffer_too_small(request, bytes_needed)
                    }
                }
            }
            NdisRequestType::METHOD => {
                match self.method_handlers.find(oid, input_length, output_length) {
                    Lookup::Found(entry) => {
                        (entry.handler)(self, request, input_length, output_length);
                        Dispatch::Handler
                    }
                    Lookup::NotFound => match &self.default_method_handler {
                        Some(handler) => {
                            handler(self, request, oid, input_length, output_length);
                            Dispatch::CategoryDefault
                        }
                        None => self.dispatch_default(request),
                    },
                    Lookup::BufferTooSmall { bytes_needed } => {
                        self.fail_buffer_too_small(request, bytes_needed)
                    }
                }
            }
            _ => self.fail(request, STATUS::NOT_SUPPORTED),
        };

        debug!("<== dispatch_request: {oid:x?} {dispatch:?}");
        dispatch
    }

    fn dispatch_default(&self, request: &Arc<Request>) -> Dispatch {
        match &self.default_handler {
            Some(handler) => {
                handler(
                    self,
                    request,
                    request.request_type(),
                    request.oid(),
                    request.input_length(),
                    request.output_length(),
                );
                Dispatch::GlobalDefault
            }
            None => self.fail(request, STATUS::NOT_SUPPORTED),
        }
    }

    fn fail(&self, request: &Request, status: NdisStatus) -> Dispatch {
        request.complete(status);
        Dispatch::Completed(status)
    }

    fn fail_buffer_too_small(&self, request: &Request, bytes_needed: u32) -> Dispatch {
        request.complete_buffer_too_small(bytes_needed);
        Dispatch::Completed(STATUS::BUFFER_TOO_SMALL)
    }

    /// Stops tracking a request that is about to be completed
    pub fn disconnect_request(&self, request: &Request) {
        let removed = {
            let mut in_flight = self.in_flight.lock();
            in_flight
                .iter()
                .position(|tracked| core::ptr::eq(Arc::as_ptr(tracked), request))
                .map(|index| in_flight.swap_remove(index))
        };

        request.detach();

        if removed.is_none() {
            debug!("Request {:x?} wasn't in flight on this queue", request.oid());
        }
    }

    /// Cancels every in-flight request with `request_id`
    ///
    /// Requests that are already being canceled are skipped. Returns how many
    /// requests were canceled by this call.
    pub fn cancel_requests(&self, request_id: RequestId) -> usize {
        let to_cancel = {
            let in_flight = self.in_flight.lock();
            in_flight
                .iter()
                .filter(|request| {
                    request.request_id() == request_id && request.start_cancellation()
                })
                .cloned()
                .collect::<Vec<_>>()
        };

        debug!(
            "Canceling {} requests with id {request_id:x?}",
            to_cancel.len()
        );

        for request in &to_cancel {
            request.cancel();
        }

        to_cancel.len()
    }
}

impl core::fmt::Debug for RequestQueue {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("RequestQueue")
            .field("queue_type", &self.queue_type)
            .finish_non_exhaustive()
    }
}

impl Drop for RequestQueue {
    fn drop(&mut self) {
        let in_flight = core::mem::take(self.in_flight.get_mut());

        if verifier::verify_request_queue_empty(&self.globals, in_flight.len()).is_err() {
            error!(
                "{:?} queue destroyed with {} requests in flight",
                self.queue_type,
                in_flight.len()
            );
        }

        // Leftovers still complete straight to NDIS
        for request in &in_flight {
            request.detach();
        }
    }
}
