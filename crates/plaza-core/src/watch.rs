//! Disposable realtime watches
//!
//! A [`Watch`] owns the task forwarding a backend change feed to a callback.
//! Stopping or dropping it aborts the task, which drops the subscription and
//! leaves the channel.

use plaza_backend::{ChangeEvent, ChangeSubscription};
use serde::de::DeserializeOwned;
use std::future::Future;
use tokio::task::JoinHandle;

/// Live registration of a realtime callback
#[must_use = "dropping the watch stops it"]
pub struct Watch {
    channel: String,
    task: Option<JoinHandle<()>>,
}

impl Watch {
    /// Forward every event of `subscription` to `handler`, one at a time
    pub(crate) fn spawn<F, Fut>(mut subscription: ChangeSubscription, mut handler: F) -> Self
    where
        F: FnMut(ChangeEvent) -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let channel = subscription.channel().to_string();
        let name = channel.clone();
        let task = tokio::spawn(async move {
            while let Some(event) = subscription.recv().await {
                handler(event).await;
            }
            tracing::debug!(channel = %name, "change feed ended");
        });
        Self {
            channel,
            task: Some(task),
        }
    }

    /// Channel name
    #[inline]
    #[must_use]
    pub fn channel(&self) -> &str {
        &self.channel
    }

    /// Whether events are still being forwarded
    #[must_use]
    pub fn is_active(&self) -> bool {
        self.task.as_ref().is_some_and(|task| !task.is_finished())
    }

    /// Stop forwarding and wait until the channel has been left
    pub async fn stop(mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
            let _ = task.await;
            tracing::debug!(channel = %self.channel, "watch stopped");
        }
    }
}

impl Drop for Watch {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

impl std::fmt::Debug for Watch {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Watch")
            .field("channel", &self.channel)
            .field("active", &self.is_active())
            .finish()
    }
}

/// Decode the new row of an event, logging rows that do not fit
pub(crate) fn decode_record<T: DeserializeOwned>(event: &ChangeEvent) -> Option<T> {
    match serde_json::from_value(event.record.clone()) {
        Ok(row) => Some(row),
        Err(e) => {
            tracing::warn!(table = %event.table, error = %e, "skipping undecodable change row");
            None
        }
    }
}
