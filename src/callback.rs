use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use uuid::Uuid;

pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Side effect run with the analysis text of a session
pub type AnalysisCallback = Arc<dyn Fn(&str) -> Result<(), BoxError> + Send + Sync>;

/// Run `callback`, containing both returned errors and panics.
///
/// Returns whether the callback completed successfully; failures are only
/// logged.
pub fn invoke(callback: &AnalysisCallback, session_id: Uuid, analysis: &str) -> bool {
    match panic::catch_unwind(AssertUnwindSafe(|| callback(analysis))) {
        Ok(Ok(())) => true,
        Ok(Err(e)) => {
            crate::metrics::record_callback_failure("error");
            tracing::warn!(
                session_id = %session_id,
                error = %e,
                "Analysis callback failed"
            );
            false
        }
        Err(payload) => {
            crate::metrics::record_callback_failure("panic");
            tracing::warn!(
                session_id = %session_id,
                panic = panic_message(payload.as_ref()),
                "Analysis callback panicked"
            );
            false
        }
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> &str {
    if let Some(msg) = payload.downcast_ref::<&'static str>() {
        msg
    } else if let Some(msg) = payload.downcast_ref::<String>() {
        msg.as_str()
    } else {
        "non-string panic payload"
    }
}
