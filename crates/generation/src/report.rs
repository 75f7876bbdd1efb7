//! Error boundary for background work.
//!
//! Every task the generation core spawns runs inside [`report_errors`]:
//! errors and panics are classified, logged and turned into a single
//! user-facing message on an [`ErrorSink`]. Nothing escapes to the
//! runtime.

use std::any::Any;
use std::backtrace::Backtrace;
use std::future::Future;
use std::panic::AssertUnwindSafe;

use easel_comfyui::TransportError;
use futures::FutureExt;

use crate::error::GenerationError;

/// Message shown when a job is interrupted on request.
pub const INTERRUPTED_MESSAGE: &str = "Generation was cancelled";

/// Receiver of user-facing error messages.
pub trait ErrorSink: Send + Sync {
    /// Replace the current error message.
    fn report_error(&self, message: String, details: Option<String>);
}

/// Await `fut`, reporting any error or panic to `sink`.
///
/// Returns the value on success and `None` otherwise.
pub async fn report_errors<T, F>(sink: &dyn ErrorSink, fut: F) -> Option<T>
where
    F: Future<Output = Result<T, GenerationError>>,
{
    match AssertUnwindSafe(fut).catch_unwind().await {
        Ok(Ok(value)) => Some(value),
        Ok(Err(e)) => {
            report(sink, &e);
            None
        }
        Err(panic) => {
            let message = panic_message(panic.as_ref());
            tracing::error!(panic = %message, "Background task panicked");
            sink.report_error(format!("Error: Internal assertion failed [{message}]"), None);
            None
        }
    }
}

/// Classify `error`, log it and hand the user-facing message to `sink`.
pub fn report(sink: &dyn ErrorSink, error: &GenerationError) {
    match error {
        GenerationError::Transport(TransportError::Network { message, url, code }) => {
            tracing::warn!(url = %url, code = ?code, "{message}");
            let code = code.map_or_else(|| "none".to_string(), |c| c.to_string());
            sink.report_error(message.clone(), Some(format!("[url={url}, code={code}]")));
        }
        GenerationError::Transport(TransportError::Interrupted) => {
            tracing::info!("Generation interrupted");
            sink.report_error(INTERRUPTED_MESSAGE.to_string(), None);
        }
        e if e.is_internal() => {
            tracing::error!(error = %e, backtrace = %Backtrace::force_capture(), "Internal error");
            sink.report_error(format!("Error: Internal assertion failed [{e}]"), None);
        }
        e => {
            tracing::error!(error = %e, "Generation failed");
            sink.report_error(format!("Error: {e}"), None);
        }
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use easel_core::CoreError;

    use super::*;

    #[derive(Default)]
    struct Recorder {
        reports: Mutex<Vec<(String, Option<String>)>>,
    }

    impl ErrorSink for Recorder {
        fn report_error(&self, message: String, details: Option<String>) {
            self.reports.lock().unwrap().push((message, details));
        }
    }

    impl Recorder {
        fn last(&self) -> (String, Option<String>) {
            self.reports.lock().unwrap().last().cloned().unwrap()
        }
    }

    #[tokio::test]
    async fn success_reports_nothing() {
        let sink = Recorder::default();
        let value = report_errors(&sink, async { Ok::<_, GenerationError>(7) }).await;
        assert_eq!(value, Some(7));
        assert!(sink.reports.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn network_error_carries_details() {
        let sink = Recorder::default();
        let result = report_errors(&sink, async {
            Err::<(), _>(GenerationError::from(TransportError::Network {
                message: "Server unreachable".into(),
                url: "http://gpu:8188/prompt".into(),
                code: Some(502),
            }))
        })
        .await;

        assert!(result.is_none());
        let (message, details) = sink.last();
        assert_eq!(message, "Server unreachable");
        assert_eq!(details.as_deref(), Some("[url=http://gpu:8188/prompt, code=502]"));
    }

    #[tokio::test]
    async fn interruption_is_informational() {
        let sink = Recorder::default();
        report_errors(&sink, async {
            Err::<(), _>(GenerationError::from(TransportError::Interrupted))
        })
        .await;
        assert_eq!(sink.last(), (INTERRUPTED_MESSAGE.to_string(), None));
    }

    #[tokio::test]
    async fn internal_error_is_generic() {
        let sink = Recorder::default();
        report_errors(&sink, async {
            Err::<(), _>(GenerationError::UnknownJob("j9".into()))
        })
        .await;
        let (message, _) = sink.last();
        assert!(message.starts_with("Error: Internal assertion failed"));
        assert!(message.contains("j9"));
    }

    #[tokio::test]
    async fn other_errors_are_prefixed() {
        let sink = Recorder::default();
        report_errors(&sink, async {
            Err::<(), _>(GenerationError::from(CoreError::Validation("bad".into())))
        })
        .await;
        assert_eq!(sink.last().0, "Error: Validation failed: bad");
    }

    async fn explode() -> Result<(), GenerationError> {
        panic!("boom")
    }

    #[tokio::test]
    async fn panics_are_caught() {
        let sink = Recorder::default();
        let result = report_errors(&sink, explode()).await;
        assert!(result.is_none());
        assert_eq!(sink.last().0, "Error: Internal assertion failed [boom]");
    }
}
