//! Continuation-style front end for callers without an async context.
//!
//! Every operation returns immediately and later invokes the supplied
//! continuation exactly once, on a runtime worker, with the outcome.

use std::time::Duration;

use tokio::runtime::Handle;
use tokio::task::JoinHandle;

use crate::error::Result;
use crate::sensor::SensorDescriptor;
use crate::session::{ConnectResult, SessionManager};

/// Runs [`SessionManager`] operations on a runtime and reports through
/// continuations.
#[derive(Debug, Clone)]
pub struct CallbackClient {
    manager: SessionManager,
    handle: Handle,
}

impl CallbackClient {
    /// Wraps `manager`; operations are spawned on `handle`.
    #[must_use]
    pub const fn new(manager: SessionManager, handle: Handle) -> Self {
        Self { manager, handle }
    }

    /// The wrapped manager, for sinks and state inspection.
    #[must_use]
    pub const fn manager(&self) -> &SessionManager {
        &self.manager
    }

    /// See [`SessionManager::search`].
    pub fn search<F>(&self, search_time: Duration, done: F) -> JoinHandle<()>
    where
        F: FnOnce(Result<Vec<SensorDescriptor>>) + Send + 'static,
    {
        let manager = self.manager.clone();
        self.handle
            .spawn(async move { done(manager.search(search_time).await) })
    }

    /// See [`SessionManager::connect`].
    pub fn connect<F>(
        &self,
        sensor: SensorDescriptor,
        pincode: String,
        timeout: Duration,
        done: F,
    ) -> JoinHandle<()>
    where
        F: FnOnce(Result<ConnectResult>) + Send + 'static,
    {
        let manager = self.manager.clone();
        self.handle.spawn(async move {
            done(manager.connect(&sensor, &pincode, timeout).await);
        })
    }

    /// See [`SessionManager::disconnect`].
    pub fn disconnect<F>(&self, done: F) -> JoinHandle<()>
    where
        F: FnOnce(Result<()>) + Send + 'static,
    {
        let manager = self.manager.clone();
        self.handle.spawn(async move { done(manager.disconnect()) })
    }

    /// See [`SessionManager::get_status`].
    pub fn get_status<F>(&self, done: F) -> JoinHandle<()>
    where
        F: FnOnce(Result<Option<String>>) + Send + 'static,
    {
        let manager = self.manager.clone();
        self.handle
            .spawn(async move { done(manager.get_status().await) })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CoreConfig;
    use crate::protocol::{Request, RequestKind, ResponseCode};
    use crate::transport::mock::{MockResponse, MockTransport};
    use std::sync::mpsc;
    use std::sync::Arc;

    fn client(transport: &Arc<MockTransport>, handle: Handle) -> CallbackClient {
        CallbackClient::new(
            SessionManager::new(transport.clone(), CoreConfig::default()),
            handle,
        )
    }

    #[test]
    fn test_continuations_run_off_the_calling_thread() {
        let runtime = tokio::runtime::Runtime::new().unwrap();
        let transport = Arc::new(MockTransport::new());
        transport.respond_with(|request| match request {
            Request::GetAvailableSensor { .. } => vec![MockResponse::new(
                RequestKind::GetAvailableSensor,
                ResponseCode::Success,
                "hitoe D01,S1,00:11:22,realtime,raw.hr",
            )],
            _ => Vec::new(),
        });
        let client = client(&transport, runtime.handle().clone());

        let (tx, rx) = mpsc::channel();
        client.search(Duration::from_millis(100), move |result| {
            tx.send(result.map(|sensors| sensors.len())).unwrap();
        });

        let found = rx.recv_timeout(Duration::from_secs(2)).unwrap();
        assert_eq!(found.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_disconnect_reports_through_continuation() {
        let transport = Arc::new(MockTransport::new());
        let client = client(&transport, Handle::current());
        let (tx, rx) = tokio::sync::oneshot::channel();

        client
            .disconnect(move |result| {
                let _ = tx.send(result.is_ok());
            })
            .await
            .unwrap();

        assert!(rx.await.unwrap());
    }

    #[tokio::test]
    async fn test_get_status_without_reply_is_none() {
        let transport = Arc::new(MockTransport::new());
        let client = CallbackClient::new(
            SessionManager::new(
                transport.clone(),
                CoreConfig {
                    status_timeout_ms: 50,
                    ..CoreConfig::default()
                },
            ),
            Handle::current(),
        );
        let (tx, rx) = tokio::sync::oneshot::channel();

        client.get_status(move |result| {
            let _ = tx.send(result.unwrap());
        });

        assert_eq!(rx.await.unwrap(), None);
        assert_eq!(transport.count(RequestKind::GetStatus), 1);
    }
}
