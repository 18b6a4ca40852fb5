//! Client contract verification
//!
//! Violations come in two severities. Some can never be continued past and
//! always bring the system down, while others are reported to an attached
//! debugger and otherwise fail the call that triggered them.

use log::error;
use ndis_rs::{
    pm::MediaSpecificWakeUpEvents, Error, NdisRequestType, NdisStatus, STATUS,
};

/// Media-specific wake-up events a client may report
pub const WAKEUP_MEDIA_SPECIFIC_SUPPORTED_FLAGS: MediaSpecificWakeUpEvents =
    MediaSpecificWakeUpEvents::all();

/// If `flags` only has bits that are in `supported`
pub const fn check_flags(flags: u32, supported: u32) -> bool {
    flags & !supported == 0
}

/// Stable identifier of a violation, passed along to the debugger
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(usize)]
pub enum FailureCode {
    CorruptedPrivateGlobals = 0,
    IrqlIsNotPassive,
    IrqlNotLessOrEqualDispatch,
    EvtSetCapabilitiesNotInProgress,
    EvtArmDisarmWakeNotInProgress,
    CompletingNetRequestWithPendingStatus,
    InvalidNetRequestType,
    DefaultRequestQueueAlreadyExists,
    InvalidStructTypeSize,
    InvalidQueueConfiguration,
    InvalidPowerCapabilities,
    ObjectIsNotCancelable,
    ParameterCantBeNull,
    NetRequestAlreadyCompleted,
    RequestQueueNotEmpty,
}

/// What to do once a violation is found
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VerifierAction {
    BugcheckAlways,
    DbgBreakIfDebuggerPresent,
}

/// A reported break-class violation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Violation(pub FailureCode);

impl From<Violation> for Error {
    fn from(violation: Violation) -> Self {
        match violation.0 {
            FailureCode::DefaultRequestQueueAlreadyExists => Error(STATUS::INVALID_DEVICE_STATE),
            _ => Error(STATUS::INVALID_PARAMETER),
        }
    }
}

/// Interrupt request level of the calling context
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct Irql(pub u8);

impl Irql {
    pub const PASSIVE_LEVEL: Irql = Irql(0);
    pub const APC_LEVEL: Irql = Irql(1);
    pub const DISPATCH_LEVEL: Irql = Irql(2);
}

/// Called with the failure code and up to two extra parameters describing it
pub type DebugBreakHook = fn(FailureCode, usize, usize);

/// Per-client-driver state shared by everything created on its behalf
pub struct DriverGlobals {
    signature: u32,
    debugger_present: bool,
    debug_break: Option<DebugBreakHook>,
    current_irql: fn() -> Irql,
}

impl DriverGlobals {
    pub const SIGNATURE: u32 = u32::from_be_bytes(*b"NxGl");

    /// Globals for a context that always runs at `PASSIVE_LEVEL`, with no debugger attached
    pub fn new() -> Self {
        Self {
            signature: Self::SIGNATURE,
            debugger_present: false,
            debug_break: None,
            current_irql: || Irql::PASSIVE_LEVEL,
        }
    }

    /// Breaks into `hook` on break-class violations
    pub fn with_debugger(mut self, hook: DebugBreakHook) -> Self {
        self.debugger_present = true;
        self.debug_break = Some(hook);
        self
    }

    /// Uses `provider` to find out the IRQL of the calling context
    pub fn with_irql_provider(mut self, provider: fn() -> Irql) -> Self {
        self.current_irql = provider;
        self
    }

    pub fn current_irql(&self) -> Irql {
        (self.current_irql)()
    }

    pub fn debugger_present(&self) -> bool {
        self.debugger_present
    }

    #[cfg(test)]
    pub(crate) fn corrupt(mut self) -> Self {
        self.signature = !Self::SIGNATURE;
        self
    }
}

impl Default for DriverGlobals {
    fn default() -> Self {
        Self::new()
    }
}

impl core::fmt::Debug for DriverGlobals {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("DriverGlobals")
            .field("signature", &format_args!("{:#010x}", self.signature))
            .field("debugger_present", &self.debugger_present)
            .finish_non_exhaustive()
    }
}

/// Reports a violation
///
/// Never returns for [`VerifierAction::BugcheckAlways`].
pub fn report_violation(
    globals: &DriverGlobals,
    action: VerifierAction,
    code: FailureCode,
    parameter2: usize,
    parameter3: usize,
) -> Result<(), Violation> {
    error!("Verifier violation {code:?} ({parameter2:#x}, {parameter3:#x}), action {action:?}");

    match action {
        VerifierAction::BugcheckAlways => {
            panic!("netadapter-cx verifier bugcheck: {code:?} ({parameter2:#x}, {parameter3:#x})")
        }
        VerifierAction::DbgBreakIfDebuggerPresent => {
            if let (true, Some(hook)) = (globals.debugger_present, globals.debug_break) {
                hook(code, parameter2, parameter3);
            }

            Err(Violation(code))
        }
    }
}

fn bugcheck(globals: &DriverGlobals, code: FailureCode, parameter2: usize, parameter3: usize) {
    // Bugchecks never come back
    let _ = report_violation(
        globals,
        VerifierAction::BugcheckAlways,
        code,
        parameter2,
        parameter3,
    );
}

fn dbg_break(
    globals: &DriverGlobals,
    code: FailureCode,
    parameter2: usize,
    parameter3: usize,
) -> Result<(), Violation> {
    report_violation(
        globals,
        VerifierAction::DbgBreakIfDebuggerPresent,
        code,
        parameter2,
        parameter3,
    )
}

pub fn verify_private_globals(globals: &DriverGlobals) {
    if globals.signature != DriverGlobals::SIGNATURE {
        bugcheck(
            globals,
            FailureCode::CorruptedPrivateGlobals,
            globals.signature as usize,
            0,
        );
    }
}

pub fn verify_irql_passive(globals: &DriverGlobals) {
    let irql = globals.current_irql();

    if irql != Irql::PASSIVE_LEVEL {
        bugcheck(globals, FailureCode::IrqlIsNotPassive, irql.0.into(), 0);
    }
}

pub fn verify_irql_less_or_equal_dispatch(globals: &DriverGlobals) {
    let irql = globals.current_irql();

    if irql > Irql::DISPATCH_LEVEL {
        bugcheck(
            globals,
            FailureCode::IrqlNotLessOrEqualDispatch,
            irql.0.into(),
            0,
        );
    }
}

/// Size-prefixed structures must be at least as large as the layout we know about
pub fn verify_type_size(globals: &DriverGlobals, declared_size: u32, expected_size: usize) {
    if (declared_size as usize) < expected_size {
        bugcheck(
            globals,
            FailureCode::InvalidStructTypeSize,
            declared_size as usize,
            expected_size,
        );
    }
}

pub fn verify_set_capabilities_in_progress(globals: &DriverGlobals, sealed: bool) {
    if sealed {
        bugcheck(globals, FailureCode::EvtSetCapabilitiesNotInProgress, 0, 0);
    }
}

pub fn verify_power_settings_accessible(globals: &DriverGlobals, accessible: bool) {
    if !accessible {
        bugcheck(globals, FailureCode::EvtArmDisarmWakeNotInProgress, 0, 0);
    }
}

pub fn verify_completion_status_not_pending(globals: &DriverGlobals, status: NdisStatus) {
    if status == STATUS::PENDING {
        bugcheck(
            globals,
            FailureCode::CompletingNetRequestWithPendingStatus,
            status.to_u32() as usize,
            0,
        );
    }
}

/// The request must have one of the `expected` types
pub fn verify_request_type(
    globals: &DriverGlobals,
    actual: NdisRequestType,
    expected: &[NdisRequestType],
) {
    if !expected.contains(&actual) {
        bugcheck(
            globals,
            FailureCode::InvalidNetRequestType,
            actual.0 as usize,
            0,
        );
    }
}

pub fn verify_not_completed(globals: &DriverGlobals, completed: bool) {
    if completed {
        bugcheck(globals, FailureCode::NetRequestAlreadyCompleted, 0, 0);
    }
}

pub fn verify_cancelable(globals: &DriverGlobals, cancelable: bool) {
    if !cancelable {
        bugcheck(globals, FailureCode::ObjectIsNotCancelable, 0, 0);
    }
}

pub fn verify_not_null<T>(globals: &DriverGlobals, value: Option<T>) -> Result<T, Violation> {
    match value {
        Some(value) => Ok(value),
        None => {
            dbg_break(globals, FailureCode::ParameterCantBeNull, 0, 0)?;
            Err(Violation(FailureCode::ParameterCantBeNull))
        }
    }
}

pub fn verify_default_queue_slot_free(
    globals: &DriverGlobals,
    occupied: bool,
) -> Result<(), Violation> {
    if occupied {
        dbg_break(globals, FailureCode::DefaultRequestQueueAlreadyExists, 0, 0)
    } else {
        Ok(())
    }
}

/// A queue must have completed every request it admitted before going away
pub fn verify_request_queue_empty(
    globals: &DriverGlobals,
    in_flight: usize,
) -> Result<(), Violation> {
    if in_flight == 0 {
        Ok(())
    } else {
        dbg_break(globals, FailureCode::RequestQueueNotEmpty, in_flight, 0)
    }
}

/// A queue must have at least one way to handle a request
pub fn verify_queue_configuration(
    globals: &DriverGlobals,
    has_handlers: bool,
) -> Result<(), Violation> {
    if has_handlers {
        Ok(())
    } else {
        dbg_break(globals, FailureCode::InvalidQueueConfiguration, 0, 0)
    }
}

pub fn verify_media_specific_wake_up_events(
    globals: &DriverGlobals,
    events: MediaSpecificWakeUpEvents,
) -> Result<(), Violation> {
    if check_flags(events.bits(), WAKEUP_MEDIA_SPECIFIC_SUPPORTED_FLAGS.bits()) {
        Ok(())
    } else {
        dbg_break(
            globals,
            FailureCode::InvalidPowerCapabilities,
            events.bits() as usize,
            0,
        )
    }
}
