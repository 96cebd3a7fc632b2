use choreo_core::workflow::Step;

/// Fire-and-forget delivery of an invocation payload to the next step.
///
/// Implementations return once the transport accepted the request; they never
/// wait for the next step's result.
pub trait StepDispatcher: Send + Sync {
    fn dispatch_next(&self, next: &Step, payload: &[u8]) -> Result<(), String>;
}

impl<F> StepDispatcher for F
where
    F: Fn(&Step, &[u8]) -> Result<(), String> + Send + Sync,
{
    fn dispatch_next(&self, next: &Step, payload: &[u8]) -> Result<(), String> {
        self(next, payload)
    }
}

/// Refuses every dispatch; for deployments whose steps are all terminal.
pub struct NoopDispatcher;

impl StepDispatcher for NoopDispatcher {
    fn dispatch_next(&self, next: &Step, _payload: &[u8]) -> Result<(), String> {
        Err(format!(
            "no dispatcher configured; cannot invoke step {} ({})",
            next.id, next.function_name
        ))
    }
}
