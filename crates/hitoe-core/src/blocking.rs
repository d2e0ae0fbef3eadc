//! Blocking front end: each call parks the calling thread until the
//! operation finishes or times out.
//!
//! Must not be used from inside an async context; `block_on` panics there.

use std::time::Duration;

use tokio::runtime::{Builder, Runtime};

use crate::error::Result;
use crate::sensor::SensorDescriptor;
use crate::session::{ConnectResult, SessionManager};

/// Runs [`SessionManager`] operations on a private current-thread runtime.
#[derive(Debug)]
pub struct BlockingClient {
    manager: SessionManager,
    runtime: Runtime,
}

impl BlockingClient {
    /// Wraps `manager` with its own runtime.
    ///
    /// # Errors
    ///
    /// Returns an I/O error if the runtime cannot be built.
    pub fn new(manager: SessionManager) -> Result<Self> {
        let runtime = Builder::new_current_thread().enable_all().build()?;
        Ok(Self { manager, runtime })
    }

    /// The wrapped manager, for sinks and state inspection.
    #[must_use]
    pub const fn manager(&self) -> &SessionManager {
        &self.manager
    }

    /// See [`SessionManager::search`].
    ///
    /// # Errors
    ///
    /// As [`SessionManager::search`].
    pub fn search(&self, search_time: Duration) -> Result<Vec<SensorDescriptor>> {
        self.runtime.block_on(self.manager.search(search_time))
    }

    /// See [`SessionManager::connect`].
    ///
    /// # Errors
    ///
    /// As [`SessionManager::connect`].
    pub fn connect(
        &self,
        sensor: &SensorDescriptor,
        pincode: &str,
        timeout: Duration,
    ) -> Result<ConnectResult> {
        self.runtime
            .block_on(self.manager.connect(sensor, pincode, timeout))
    }

    /// See [`SessionManager::disconnect`].
    ///
    /// # Errors
    ///
    /// As [`SessionManager::disconnect`].
    pub fn disconnect(&self) -> Result<()> {
        self.manager.disconnect()
    }

    /// See [`SessionManager::get_status`].
    ///
    /// # Errors
    ///
    /// As [`SessionManager::get_status`].
    pub fn get_status(&self) -> Result<Option<String>> {
        self.runtime.block_on(self.manager.get_status())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CoreConfig;
    use crate::protocol::{Request, RequestKind, ResponseCode};
    use crate::transport::mock::{MockResponse, MockTransport};
    use std::sync::Arc;

    fn sensor() -> SensorDescriptor {
        SensorDescriptor::new("hitoe D01", "S1", "00:11:22", "realtime", ["raw.hr"])
    }

    #[test]
    fn test_blocking_connect_and_disconnect() {
        let transport = Arc::new(MockTransport::new());
        transport.respond_with(|request| match request {
            Request::Connect { .. } => vec![MockResponse::new(
                RequestKind::Connect,
                ResponseCode::SensorConnect,
                "session-1",
            )],
            Request::AddReceiver { .. } => vec![MockResponse::new(
                RequestKind::AddReceiver,
                ResponseCode::Success,
                "receiver-1",
            )],
            _ => Vec::new(),
        });
        let client = BlockingClient::new(SessionManager::new(
            transport.clone(),
            CoreConfig::default(),
        ))
        .unwrap();

        let result = client
            .connect(&sensor(), "0000", Duration::from_secs(1))
            .unwrap();
        assert_eq!(result, ConnectResult::Ok);
        assert_eq!(client.manager().session().receiver_handle(), Some("receiver-1"));

        client.disconnect().unwrap();
        assert_eq!(
            transport.request_kinds(),
            vec![
                RequestKind::Connect,
                RequestKind::AddReceiver,
                RequestKind::RemoveReceiver,
                RequestKind::Disconnect,
            ]
        );
        assert!(client.manager().session().is_empty());
    }

    #[test]
    fn test_blocking_connect_times_out() {
        let transport = Arc::new(MockTransport::new());
        let client =
            BlockingClient::new(SessionManager::new(transport, CoreConfig::default())).unwrap();

        let started = std::time::Instant::now();
        let result = client
            .connect(&sensor(), "0000", Duration::from_millis(100))
            .unwrap();

        assert_eq!(result, ConnectResult::NotFound);
        assert!(started.elapsed() < Duration::from_secs(1));
    }
}
