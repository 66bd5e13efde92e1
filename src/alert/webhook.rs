use reqwest::multipart::{Form, Part};

use super::{FallAlert, Notifier};
use crate::error::AlertError;

/// POSTs a multipart form to a fixed URL: a `verdict` JSON part and, when
/// available, a `frame` JPEG part.
pub struct WebhookNotifier {
    client: reqwest::Client,
    url: String,
}

impl WebhookNotifier {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            url: url.into(),
        }
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    fn form(alert: &FallAlert) -> Result<Form, AlertError> {
        let payload = serde_json::to_string(alert)?;
        let mut form = Form::new().part(
            "verdict",
            Part::text(payload).mime_str("application/json")?,
        );
        if let Some(jpeg) = &alert.frame_jpeg {
            form = form.part(
                "frame",
                Part::bytes(jpeg.clone())
                    .file_name("frame.jpg")
                    .mime_str("image/jpeg")?,
            );
        }
        Ok(form)
    }
}

impl Notifier for WebhookNotifier {
    fn name(&self) -> &str {
        "webhook"
    }

    async fn notify(&self, alert: &FallAlert) -> Result<(), AlertError> {
        let form = Self::form(alert)?;
        let current_version = env!("CARGO_PKG_VERSION");
        self.client
            .post(&self.url)
            .header("User-Agent", format!("fallwatch/{current_version}"))
            .multipart(form)
            .send()
            .await?
            .error_for_status()?;

        tracing::info!(url = %self.url, source = %alert.source, "alert delivered");
        Ok(())
    }
}
