use std::{sync::Arc, time::Duration};

use crate::{
    domain::ChatId,
    errors::Error,
    formatting::{code, escape_html},
    messaging::port::MessagingPort,
    source::SourceMessage,
    Result,
};

/// Formats SMS and hands them to the chat transport, one attempt each.
#[derive(Clone)]
pub struct Forwarder {
    messenger: Arc<dyn MessagingPort>,
    timeout: Duration,
}

impl Forwarder {
    pub fn new(messenger: Arc<dyn MessagingPort>, timeout: Duration) -> Self {
        Self { messenger, timeout }
    }

    pub async fn forward(&self, message: &SourceMessage, destination: ChatId) -> Result<()> {
        let text = format_sms(message);
        match tokio::time::timeout(self.timeout, self.messenger.send_html(destination, &text)).await
        {
            Ok(Ok(_)) => Ok(()),
            Ok(Err(e)) => Err(Error::DeliveryFailed(e.to_string())),
            Err(_) => Err(Error::DeliveryFailed(format!(
                "send timed out after {}s",
                self.timeout.as_secs()
            ))),
        }
    }
}

pub fn format_sms(m: &SourceMessage) -> String {
    let id = m.id.map(|id| id.to_string()).unwrap_or_default();
    let field = |v: &Option<String>| escape_html(v.as_deref().unwrap_or("-"));
    format!(
        "📲 <b>New SMS</b>\n\
ID: {}\n\
From: {}\n\
To: {}\n\
Time: {}\n\
Content: {}",
        code(&id),
        field(&m.number),
        field(&m.simnum),
        field(&m.time),
        escape_html(&m.content)
    )
}
