//! Hand-off of verdicts to an outside notification channel.

mod webhook;

use std::future::Future;

use serde::Serialize;

use crate::error::AlertError;
use crate::inference::Verdict;

pub use webhook::WebhookNotifier;

/// What a notifier receives: the verdict untouched plus an optional JPEG of
/// the first fallen frame.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FallAlert {
    /// Where the video came from, typically its path.
    pub source: String,
    pub verdict: Verdict,
    #[serde(skip)]
    pub frame_jpeg: Option<Vec<u8>>,
}

pub trait Notifier {
    fn name(&self) -> &str;

    fn notify(&self, alert: &FallAlert) -> impl Future<Output = Result<(), AlertError>> + Send;
}

/// Decides whether a verdict warrants a notification and forwards it.
pub struct AlertDispatcher<N> {
    notifier: N,
    notify_on_negative: bool,
}

impl<N: Notifier> AlertDispatcher<N> {
    pub fn new(notifier: N, notify_on_negative: bool) -> Self {
        Self {
            notifier,
            notify_on_negative,
        }
    }

    pub fn notifier(&self) -> &N {
        &self.notifier
    }

    /// Returns whether the notifier was called. Notifier errors are passed
    /// through without retry.
    pub async fn dispatch(&self, alert: &FallAlert) -> Result<bool, AlertError> {
        if !alert.verdict.fall_detected() && !self.notify_on_negative {
            tracing::debug!(source = %alert.source, "no fall, alert skipped");
            return Ok(false);
        }

        tracing::info!(
            source = %alert.source,
            notifier = %self.notifier.name(),
            fall_detected = alert.verdict.fall_detected(),
            first_fall = ?alert.verdict.first_fall(),
            with_frame = alert.frame_jpeg.is_some(),
            "dispatching alert"
        );
        self.notifier.notify(alert).await?;
        Ok(true)
    }
}
