//! In-flight OID requests

use alloc::{
    boxed::Box,
    sync::{Arc, Weak},
    vec,
    vec::Vec,
};

use crossbeam_utils::atomic::AtomicCell;
use log::{debug, error};
use ndis_rs::{Error, NdisRequestType, NdisStatus, Oid, PortNumber, RequestId, STATUS};

use crate::{
    request_queue::RequestQueue,
    sync::SpinMutex,
    verifier::{self, DriverGlobals},
};

/// An OID request, as handed over by NDIS
///
/// The information buffer is shared between input and output, and must be at
/// least as large as both declared lengths.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct NdisOidRequest {
    pub request_type: NdisRequestType,
    pub request_id: RequestId,
    pub port_number: PortNumber,
    pub oid: Oid,
    pub information_buffer: Vec<u8>,
    pub input_buffer_length: u32,
    pub output_buffer_length: u32,
    pub bytes_read: u32,
    pub bytes_written: u32,
    pub bytes_needed: u32,
}

impl NdisOidRequest {
    /// A set-information request carrying `data`
    pub fn set(oid: Oid, data: Vec<u8>) -> Self {
        Self {
            request_type: NdisRequestType::SET_INFORMATION,
            oid,
            input_buffer_length: data.len() as u32,
            information_buffer: data,
            ..Default::default()
        }
    }

    /// A query-information request with room for `output_length` bytes
    pub fn query(oid: Oid, output_length: u32) -> Self {
        Self {
            request_type: NdisRequestType::QUERY_INFORMATION,
            oid,
            information_buffer: vec![0; output_length as usize],
            output_buffer_length: output_length,
            ..Default::default()
        }
    }

    /// A method request carrying `input`, with room for `output_length` bytes
    pub fn method(oid: Oid, mut input: Vec<u8>, output_length: u32) -> Self {
        let input_length = input.len() as u32;
        input.resize(input.len().max(output_length as usize), 0);

        Self {
            request_type: NdisRequestType::METHOD,
            oid,
            information_buffer: input,
            input_buffer_length: input_length,
            output_buffer_length: output_length,
            ..Default::default()
        }
    }

    pub fn with_request_id(mut self, request_id: RequestId) -> Self {
        self.request_id = request_id;
        self
    }

    pub fn with_request_type(mut self, request_type: NdisRequestType) -> Self {
        self.request_type = request_type;
        self
    }

    pub fn with_port_number(mut self, port_number: PortNumber) -> Self {
        self.port_number = port_number;
        self
    }
}

/// Hands completed requests back to NDIS
pub trait OidRequestCompletion: Send + Sync {
    fn oid_request_complete(&self, request: NdisOidRequest, status: NdisStatus);
}

/// Client routine called once a request is canceled
pub type CancelRoutine = Box<dyn FnOnce(&Arc<Request>) + Send>;

enum CancelState {
    NotCancelable,
    Cancelable(CancelRoutine),
    Cancelling,
}

/// One in-flight OID transaction
///
/// Completed exactly once, through one of the `*_complete` methods.
pub struct Request {
    globals: Arc<DriverGlobals>,
    completion: Arc<dyn OidRequestCompletion>,
    oid: Oid,
    request_type: NdisRequestType,
    request_id: RequestId,
    port_number: PortNumber,
    input_length: u32,
    output_length: u32,
    /// Taken on completion
    raw: SpinMutex<Option<NdisOidRequest>>,
    /// Queue whose in-flight list this request is on
    queue: SpinMutex<Option<Weak<RequestQueue>>>,
    cancellation_started: AtomicCell<bool>,
    cancel: SpinMutex<CancelState>,
}

static_assertions::assert_impl_all!(Request: Send, Sync);

impl Request {
    /// Wraps a raw request, taking ownership of its information buffer
    ///
    /// ## Errors
    ///
    /// Hands the raw request back along with:
    ///
    /// - [`STATUS::INVALID_LENGTH`] if the information buffer is shorter than
    ///   either declared length
    pub fn wrap(
        globals: Arc<DriverGlobals>,
        completion: Arc<dyn OidRequestCompletion>,
        raw: NdisOidRequest,
    ) -> Result<Arc<Request>, (NdisOidRequest, Error)> {
        let buffer_length = raw.information_buffer.len();

        if buffer_length < raw.input_buffer_length as usize
            || buffer_length < raw.output_buffer_length as usize
        {
            error!(
                "Information buffer ({buffer_length} bytes) shorter than declared lengths (in {}, out {}) for {:x?}",
                raw.input_buffer_length, raw.output_buffer_length, raw.oid
            );
            return Err((raw, Error(STATUS::INVALID_LENGTH)));
        }

        Ok(Arc::new(Self {
            globals,
            completion,
            oid: raw.oid,
            request_type: raw.request_type,
            request_id: raw.request_id,
            port_number: raw.port_number,
            input_length: raw.input_buffer_length,
            output_length: raw.output_buffer_length,
            raw: SpinMutex::new(Some(raw)),
            queue: SpinMutex::new(None),
            cancellation_started: AtomicCell::new(false),
            cancel: SpinMutex::new(CancelState::NotCancelable),
        }))
    }

    pub fn oid(&self) -> Oid {
        self.oid
    }

    pub fn request_type(&self) -> NdisRequestType {
        self.request_type
    }

    pub fn request_id(&self) -> RequestId {
        self.request_id
    }

    pub fn port_number(&self) -> PortNumber {
        self.port_number
    }

    pub fn input_length(&self) -> u32 {
        self.input_length
    }

    pub fn output_length(&self) -> u32 {
        self.output_length
    }

    pub fn is_cancellation_started(&self) -> bool {
        self.cancellation_started.load()
    }

    pub fn is_completed(&self) -> bool {
        self.raw.lock().is_none()
    }

    /// Copy of the first `input_length` bytes of the information buffer
    ///
    /// Returns `None` once the request has been completed.
    pub fn input(&self) -> Option<Vec<u8>> {
        let raw = self.raw.lock();
        let raw = raw.as_ref()?;
        Some(raw.information_buffer[..self.input_length as usize].to_vec())
    }

    /// Reads a `T` from the start of the input buffer
    pub fn read_input<T: bytemuck::AnyBitPattern>(&self) -> Option<T> {
        let raw = self.raw.lock();
        let raw = raw.as_ref()?;
        ndis_rs::read_unaligned(&raw.information_buffer[..self.input_length as usize])
    }

    /// Copies `data` to the start of the output buffer
    ///
    /// Gives the number of bytes written, which is cut short at
    /// `output_length`, or `None` once the request has been completed.
    pub fn write_output(&self, data: &[u8]) -> Option<u32> {
        let mut raw = self.raw.lock();
        let raw = raw.as_mut()?;
        let written = data.len().min(self.output_length as usize);
        raw.information_buffer[..written].copy_from_slice(&data[..written]);
        Some(written as u32)
    }

    /// Completes the request without touching the byte counts
    pub fn complete(&self, status: NdisStatus) {
        self.complete_with(status, |_| {});
    }

    /// Completes a set-information request
    pub fn set_data_complete(&self, status: NdisStatus, bytes_read: u32) {
        verifier::verify_request_type(
            &self.globals,
            self.request_type,
            &[NdisRequestType::SET_INFORMATION],
        );

        self.complete_with(status, |raw| raw.bytes_read = bytes_read);
    }

    /// Completes a query-information or query-statistics request
    pub fn query_data_complete(&self, status: NdisStatus, bytes_written: u32) {
        verifier::verify_request_type(
            &self.globals,
            self.request_type,
            &[
                NdisRequestType::QUERY_INFORMATION,
                NdisRequestType::QUERY_STATISTICS,
            ],
        );

        self.complete_with(status, |raw| raw.bytes_written = bytes_written);
    }

    /// Completes a method request
    pub fn method_complete(&self, status: NdisStatus, bytes_read: u32, bytes_written: u32) {
        verifier::verify_request_type(
            &self.globals,
            self.request_type,
            &[NdisRequestType::METHOD],
        );

        self.complete_with(status, |raw| {
            raw.bytes_read = bytes_read;
            raw.bytes_written = bytes_written;
        });
    }

    pub(crate) fn complete_buffer_too_small(&self, bytes_needed: u32) {
        self.complete_with(STATUS::BUFFER_TOO_SMALL, |raw| {
            raw.bytes_needed = bytes_needed
        });
    }

    fn complete_with(&self, status: NdisStatus, update: impl FnOnce(&mut NdisOidRequest)) {
        verifier::verify_completion_status_not_pending(&self.globals, status);

        let raw = self.raw.lock().take();
        verifier::verify_not_completed(&self.globals, raw.is_none());
        let Some(mut raw) = raw else {
            return;
        };
        update(&mut raw);

        // Must leave the in-flight list before NDIS sees the completion
        let queue = self.queue.lock().clone();
        if let Some(queue) = queue.and_then(|queue| queue.upgrade()) {
            queue.disconnect_request(self);
        }

        // Dropped outside of the lock, since the routine may own client state
        let routine = core::mem::replace(&mut *self.cancel.lock(), CancelState::NotCancelable);
        drop(routine);

        debug!(
            "Completing request {:x?} ({:?}) with {status:?}",
            self.oid, self.request_type
        );
        self.completion.oid_request_complete(raw, status);
    }

    /// Installs `routine` to be called if the request gets canceled
    ///
    /// ## Errors
    ///
    /// - [`STATUS::CANCELLED`] if cancellation already started. `routine` isn't
    ///   called, and the request should be completed right away.
    pub fn mark_cancelable(
        &self,
        routine: impl FnOnce(&Arc<Request>) + Send + 'static,
    ) -> Result<(), Error> {
        let previous = {
            let mut state = self.cancel.lock();

            if matches!(*state, CancelState::Cancelling) {
                return Err(Error(STATUS::CANCELLED));
            }

            core::mem::replace(&mut *state, CancelState::Cancelable(Box::new(routine)))
        };
        drop(previous);

        Ok(())
    }

    /// Removes the cancel routine installed by [`Request::mark_cancelable`]
    ///
    /// ## Errors
    ///
    /// - [`STATUS::CANCELLED`] if the cancel routine already ran or is about to
    pub fn unmark_cancelable(&self) -> Result<(), Error> {
        let previous = {
            let mut state = self.cancel.lock();

            match core::mem::replace(&mut *state, CancelState::NotCancelable) {
                CancelState::Cancelling => {
                    *state = CancelState::Cancelling;
                    return Err(Error(STATUS::CANCELLED));
                }
                previous => previous,
            }
        };

        verifier::verify_cancelable(
            &self.globals,
            matches!(previous, CancelState::Cancelable(_)),
        );
        drop(previous);

        Ok(())
    }

    /// Runs the cancel routine, if there is one
    ///
    /// Requests that aren't cancelable yet will refuse to become cancelable.
    pub fn cancel(self: &Arc<Self>) {
        let routine = match core::mem::replace(&mut *self.cancel.lock(), CancelState::Cancelling) {
            CancelState::Cancelable(routine) => Some(routine),
            _ => None,
        };

        match routine {
            Some(routine) => routine(self),
            None => debug!("Request {:x?} has no cancel routine", self.oid),
        }
    }

    /// Marks cancellation as started, returning `false` if it already was
    pub(crate) fn start_cancellation(&self) -> bool {
        !self.cancellation_started.swap(true)
    }

    pub(crate) fn attach(&self, queue: Weak<RequestQueue>) {
        *self.queue.lock() = Some(queue);
    }

    pub(crate) fn detach(&self) {
        self.queue.lock().take();
    }
}

impl core::fmt::Debug for Request {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Request")
            .field("oid", &self.oid)
            .field("request_type", &self.request_type)
            .field("request_id", &self.request_id)
            .field("input_length", &self.input_length)
            .field("output_length", &self.output_length)
            .field("cancellation_started", &self.cancellation_started.load())
            .finish_non_exhaustive()
    }
}

impl Drop for Request {
    fn drop(&mut self) {
        if self.raw.get_mut().is_some() {
            error!("Request {:x?} dropped without being completed", self.oid);
        }
    }
}

#[cfg(test)]
mod test {
    use std::{
        sync::{
            atomic::{AtomicUsize, Ordering},
            Arc,
        },
        vec,
    };

    use ndis_rs::{oid::OID_GEN_CURRENT_PACKET_FILTER, Error, NdisRequestType, STATUS};

    use super::{NdisOidRequest, Request};
    use crate::test::{globals, RecordingCompletion};

    fn wrap(raw: NdisOidRequest) -> (Arc<Request>, Arc<RecordingCompletion>) {
        let completion = RecordingCompletion::new();
        let request = Request::wrap(globals(), completion.clone(), raw).unwrap();
        (request, completion)
    }

    #[test]
    fn wrap_rejects_short_buffer() {
        let mut raw = NdisOidRequest::set(OID_GEN_CURRENT_PACKET_FILTER, vec![0; 4]);
        raw.input_buffer_length = 8;

        let (raw, err) = Request::wrap(globals(), RecordingCompletion::new(), raw).unwrap_err();
        assert_eq!(err, Error(STATUS::INVALID_LENGTH));
        assert_eq!(raw.information_buffer.len(), 4);
    }

    #[test]
    fn set_completion_reports_bytes_read() {
        let (request, completion) =
            wrap(NdisOidRequest::set(OID_GEN_CURRENT_PACKET_FILTER, vec![1, 0, 0, 0]));

        assert_eq!(request.read_input::<u32>(), Some(1));
        request.set_data_complete(STATUS::SUCCESS, 4);

        let completed = completion.take();
        assert_eq!(completed.len(), 1);
        assert_eq!(completed[0].0.bytes_read, 4);
        assert_eq!(completed[0].1, STATUS::SUCCESS);
        assert!(request.is_completed());
        assert_eq!(request.read_input::<u32>(), None);
    }

    #[test]
    fn query_completion_writes_output() {
        let (request, completion) = wrap(NdisOidRequest::query(OID_GEN_CURRENT_PACKET_FILTER, 4));

        assert_eq!(request.write_output(&[0xB, 0, 0, 0]), Some(4));
        request.query_data_complete(STATUS::SUCCESS, 4);

        let completed = completion.take();
        assert_eq!(completed[0].0.information_buffer, [0xB, 0, 0, 0]);
        assert_eq!(completed[0].0.bytes_written, 4);
    }

    #[test]
    fn method_buffers_overlap() {
        let raw = NdisOidRequest::method(OID_GEN_CURRENT_PACKET_FILTER, vec![1, 2], 4);
        assert_eq!(raw.information_buffer.len(), 4);

        let (request, completion) = wrap(raw);
        assert_eq!(request.input(), Some(vec![1, 2]));
        // Cut short at the output length
        assert_eq!(request.write_output(&[9; 6]), Some(4));

        request.method_complete(STATUS::SUCCESS, 2, 4);
        let completed = completion.take();
        assert_eq!(completed[0].0.information_buffer, [9; 4]);
        assert_eq!(completed[0].1, STATUS::SUCCESS);
        assert_eq!(request.input(), None);
        assert_eq!(request.write_output(&[1]), None);
    }

    #[test]
    fn completes_while_holding_input() {
        let (request, completion) =
            wrap(NdisOidRequest::set(OID_GEN_CURRENT_PACKET_FILTER, vec![1, 0, 0, 0]));

        for byte in request.input().unwrap() {
            if byte != 0 {
                // The request isn't locked while its input is being looked at
                request.set_data_complete(STATUS::SUCCESS, 4);
            }
        }

        assert_eq!(completion.statuses(), [STATUS::SUCCESS]);
        assert!(request.is_completed());
    }

    #[test]
    #[should_panic(expected = "NetRequestAlreadyCompleted")]
    fn double_completion_bugchecks() {
        let (request, _completion) = wrap(NdisOidRequest::query(OID_GEN_CURRENT_PACKET_FILTER, 4));

        request.complete(STATUS::FAILURE);
        request.complete(STATUS::FAILURE);
    }

    #[test]
    #[should_panic(expected = "CompletingNetRequestWithPendingStatus")]
    fn pending_completion_bugchecks() {
        let (request, _completion) = wrap(NdisOidRequest::query(OID_GEN_CURRENT_PACKET_FILTER, 4));
        request.complete(STATUS::PENDING);
    }

    #[test]
    #[should_panic(expected = "InvalidNetRequestType")]
    fn mismatched_completion_bugchecks() {
        let (request, _completion) = wrap(NdisOidRequest::query(OID_GEN_CURRENT_PACKET_FILTER, 4));
        request.set_data_complete(STATUS::SUCCESS, 0);
    }

    #[test]
    fn query_statistics_completes_as_query() {
        let raw = NdisOidRequest::query(OID_GEN_CURRENT_PACKET_FILTER, 4)
            .with_request_type(NdisRequestType::QUERY_STATISTICS);
        let (request, completion) = wrap(raw);

        request.query_data_complete(STATUS::SUCCESS, 0);
        assert_eq!(completion.statuses(), [STATUS::SUCCESS]);
    }

    #[test]
    fn cancel_runs_routine_once() {
        static CANCELS: AtomicUsize = AtomicUsize::new(0);
        let (request, completion) = wrap(NdisOidRequest::query(OID_GEN_CURRENT_PACKET_FILTER, 4));

        request
            .mark_cancelable(|request| {
                CANCELS.fetch_add(1, Ordering::SeqCst);
                request.complete(STATUS::REQUEST_ABORTED);
            })
            .unwrap();

        request.cancel();
        request.cancel();

        assert_eq!(CANCELS.load(Ordering::SeqCst), 1);
        assert_eq!(completion.statuses(), [STATUS::REQUEST_ABORTED]);
    }

    #[test]
    fn cancelled_request_refuses_routine() {
        let (request, _completion) = wrap(NdisOidRequest::query(OID_GEN_CURRENT_PACKET_FILTER, 4));

        // Cancellation found nothing to call yet
        request.cancel();

        assert_eq!(
            request.mark_cancelable(|_| unreachable!()),
            Err(Error(STATUS::CANCELLED))
        );
        request.complete(STATUS::REQUEST_ABORTED);
    }

    #[test]
    fn unmark_before_and_after_cancel() {
        let (request, _completion) = wrap(NdisOidRequest::query(OID_GEN_CURRENT_PACKET_FILTER, 4));

        request.mark_cancelable(|_| unreachable!()).unwrap();
        assert_eq!(request.unmark_cancelable(), Ok(()));

        request.mark_cancelable(|_| {}).unwrap();
        request.cancel();
        assert_eq!(request.unmark_cancelable(), Err(Error(STATUS::CANCELLED)));

        request.complete(STATUS::SUCCESS);
    }

    #[test]
    #[should_panic(expected = "ObjectIsNotCancelable")]
    fn unmark_without_mark_bugchecks() {
        let (request, _completion) = wrap(NdisOidRequest::query(OID_GEN_CURRENT_PACKET_FILTER, 4));
        let _ = request.unmark_cancelable();
    }
}
