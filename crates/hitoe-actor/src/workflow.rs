//! Connection workflow and its retry policy.
//!
//! ```text
//! status ─ already streaming here? ─yes─▶ done
//!    │ no
//! search ─ nothing found ─▶ back off ─▶ search
//!    │
//! pick preferred or first ─▶ connect
//!    ├─ OK              ─▶ ready
//!    ├─ NOT_FOUND       ─▶ disconnect, back off, search again
//!    ├─ INVALID_PINCODE ─▶ give up on this pincode
//!    └─ RECEIVER_ERROR  ─▶ retry registration, else treat as NOT_FOUND
//! ```
//!
//! [`Workflow::supervise`] repeats the workflow whenever the sensor is lost.

use hitoe_core::{ConnectResult, SensorDescriptor, SessionManager};
use tracing::{error, info, instrument, warn};

use crate::config::ActorConfig;
use crate::state::ActorState;

/// How [`Workflow::establish`] ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    /// Heartrate is streaming from this sensor.
    Streaming(SensorDescriptor),
    /// The sensor refused the configured pincode.
    PincodeRejected(SensorDescriptor),
}

/// Drives a [`SessionManager`] until heartrate streams.
#[derive(Debug, Clone)]
pub struct Workflow {
    manager: SessionManager,
    config: ActorConfig,
    state: ActorState,
}

impl Workflow {
    /// Creates the workflow and installs the heartrate and disconnect sinks.
    #[must_use]
    pub fn new(manager: SessionManager, config: ActorConfig, state: ActorState) -> Self {
        let sink_state = state.clone();
        manager.set_heartrate_sink(move |timestamp_ms, bpm| sink_state.record(timestamp_ms, bpm));
        let sink_state = state.clone();
        manager.set_disconnect_sink(move || sink_state.set_ready(false));
        Self {
            manager,
            config,
            state,
        }
    }

    /// The managed session.
    #[must_use]
    pub const fn manager(&self) -> &SessionManager {
        &self.manager
    }

    /// Connects to a sensor, retrying until it streams or rejects the pincode.
    ///
    /// # Errors
    ///
    /// Returns an error if the driver refuses a request; that is not retried.
    #[instrument(skip(self))]
    pub async fn establish(&self) -> hitoe_core::Result<Outcome> {
        loop {
            if let Some(sensor) = self.already_streaming().await? {
                info!(%sensor, "Already streaming; skipping discovery");
                self.state.set_ready(true);
                return Ok(Outcome::Streaming(sensor));
            }

            let sensors = self.manager.search(self.config.core.search_time()).await?;
            let Some(sensor) = self.config.sensor.pick(&sensors) else {
                warn!("No sensors found");
                self.back_off().await;
                continue;
            };

            let pincode = self.config.sensor.pincode_for(sensor);
            let timeout = self.config.core.connect_timeout();
            let mut result = self.manager.connect(sensor, pincode, timeout).await?;

            let mut attempts = 0;
            while result == ConnectResult::ReceiverError
                && attempts < self.config.retry.receiver_attempts
            {
                attempts += 1;
                warn!(%sensor, attempts, "Retrying heartrate receiver registration");
                result = self.manager.register_receiver(timeout).await?;
            }

            match result {
                ConnectResult::Ok => {
                    info!(%sensor, "Heartrate streaming");
                    self.state.set_ready(true);
                    return Ok(Outcome::Streaming(sensor.clone()));
                }
                ConnectResult::InvalidPincode => {
                    error!(%sensor, "Pincode rejected; configure the right one for this sensor");
                    return Ok(Outcome::PincodeRejected(sensor.clone()));
                }
                ConnectResult::NotFound | ConnectResult::ReceiverError => {
                    info!(%sensor, %result, "Sensor unavailable; searching again");
                    self.manager.disconnect()?;
                    self.back_off().await;
                }
            }
        }
    }

    /// Keeps heartrate streaming: re-establishes the session whenever it is
    /// lost. Returns once a pincode is rejected.
    ///
    /// # Errors
    ///
    /// Returns an error if the driver refuses a request.
    pub async fn supervise(&self) -> hitoe_core::Result<()> {
        let mut ready = self.state.subscribe_ready();
        loop {
            match self.establish().await? {
                Outcome::Streaming(_) => {
                    if ready.wait_for(|ready| !*ready).await.is_err() {
                        return Ok(());
                    }
                    warn!("Sensor lost; reconnecting");
                }
                Outcome::PincodeRejected(_) => return Ok(()),
            }
        }
    }

    async fn already_streaming(&self) -> hitoe_core::Result<Option<SensorDescriptor>> {
        let Some(sensor_id) = self.manager.get_status().await? else {
            return Ok(None);
        };
        let session = self.manager.session();
        match session.sensor() {
            Some(sensor) if sensor.id() == sensor_id && session.receiver_handle().is_some() => {
                Ok(Some(sensor.clone()))
            }
            _ => {
                info!(sensor_id, "Sensor streams for another client");
                Ok(None)
            }
        }
    }

    async fn back_off(&self) {
        tokio::time::sleep(self.config.retry.backoff()).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{PincodeEntry, SimulatorConfig};
    use crate::simulator::SimulatedTransport;
    use hitoe_core::protocol::{Request, RequestKind, ResponseCode};
    use hitoe_core::{CoreConfig, MockResponse, MockTransport};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    fn fast_config() -> ActorConfig {
        let mut config = ActorConfig::default();
        config.core = CoreConfig {
            search_time_ms: 50,
            connect_timeout_ms: 300,
            status_timeout_ms: 100,
            ..CoreConfig::default()
        };
        config.retry.backoff_ms = 10;
        config.simulator = SimulatorConfig {
            latency_ms: 5,
            stream_interval_ms: 20,
            ..SimulatorConfig::default()
        };
        config
    }

    fn simulated(config: &ActorConfig) -> (Arc<SimulatedTransport>, Workflow, ActorState) {
        let transport = Arc::new(SimulatedTransport::new(config.simulator.clone()));
        let manager = SessionManager::new(transport.clone(), config.core.clone());
        let state = ActorState::new();
        let workflow = Workflow::new(manager, config.clone(), state.clone());
        (transport, workflow, state)
    }

    #[tokio::test]
    async fn test_establish_streams_and_records_samples() {
        let config = fast_config();
        let (_transport, workflow, state) = simulated(&config);

        let outcome = workflow.establish().await.unwrap();

        assert_eq!(
            outcome,
            Outcome::Streaming(config.simulator.sensors[0].clone())
        );
        assert!(state.is_ready());
        tokio::time::timeout(Duration::from_secs(1), async {
            while state.latest().is_none() {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .unwrap();
    }

    #[tokio::test]
    async fn test_establish_skips_discovery_when_already_streaming() {
        let config = fast_config();
        let (_transport, workflow, _state) = simulated(&config);
        workflow.establish().await.unwrap();

        let outcome = workflow.establish().await.unwrap();

        assert_eq!(
            outcome,
            Outcome::Streaming(config.simulator.sensors[0].clone())
        );
    }

    #[tokio::test]
    async fn test_rejected_pincode_stops_the_workflow() {
        let mut config = fast_config();
        config.sensor.pincodes = vec![PincodeEntry {
            sensor: config.simulator.sensors[0].clone(),
            pincode: "9999".into(),
        }];
        let (_transport, workflow, state) = simulated(&config);

        let outcome = workflow.establish().await.unwrap();

        assert!(matches!(outcome, Outcome::PincodeRejected(_)));
        assert!(!state.is_ready());
    }

    #[tokio::test]
    async fn test_not_found_searches_again() {
        let config = fast_config();
        let transport = Arc::new(MockTransport::new());
        let connects = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&connects);
        transport.respond_with(move |request| match request {
            Request::GetAvailableSensor { .. } => vec![MockResponse::new(
                RequestKind::GetAvailableSensor,
                ResponseCode::Success,
                "hitoe D01,S1,00:11:22,realtime,raw.hr",
            )],
            Request::Connect { .. } => {
                let code = if counter.fetch_add(1, Ordering::SeqCst) == 0 {
                    ResponseCode::SensorConnectFailure
                } else {
                    ResponseCode::SensorConnect
                };
                vec![MockResponse::new(RequestKind::Connect, code, "session-1")]
            }
            Request::AddReceiver { .. } => vec![MockResponse::new(
                RequestKind::AddReceiver,
                ResponseCode::Success,
                "receiver-1",
            )],
            _ => Vec::new(),
        });
        let manager = SessionManager::new(transport.clone(), config.core.clone());
        let workflow = Workflow::new(manager, config, ActorState::new());

        let outcome = workflow.establish().await.unwrap();

        assert!(matches!(outcome, Outcome::Streaming(ref s) if s.id() == "S1"));
        assert_eq!(transport.count(RequestKind::GetAvailableSensor), 2);
        assert_eq!(transport.count(RequestKind::Connect), 2);
    }

    #[tokio::test]
    async fn test_receiver_error_retries_registration_only() {
        let config = fast_config();
        let transport = Arc::new(MockTransport::new());
        let registrations = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&registrations);
        transport.respond_with(move |request| match request {
            Request::GetAvailableSensor { .. } => vec![MockResponse::new(
                RequestKind::GetAvailableSensor,
                ResponseCode::Success,
                "hitoe D01,S1,00:11:22,realtime,raw.hr",
            )],
            Request::Connect { .. } => vec![MockResponse::new(
                RequestKind::Connect,
                ResponseCode::SensorConnect,
                "session-1",
            )],
            Request::AddReceiver { .. } => {
                let code = if counter.fetch_add(1, Ordering::SeqCst) < 2 {
                    ResponseCode::Failure
                } else {
                    ResponseCode::Success
                };
                vec![MockResponse::new(RequestKind::AddReceiver, code, "receiver-1")]
            }
            _ => Vec::new(),
        });
        let manager = SessionManager::new(transport.clone(), config.core.clone());
        let workflow = Workflow::new(manager, config, ActorState::new());

        let outcome = workflow.establish().await.unwrap();

        assert!(matches!(outcome, Outcome::Streaming(_)));
        assert_eq!(transport.count(RequestKind::Connect), 1);
        assert_eq!(transport.count(RequestKind::AddReceiver), 3);
    }

    #[tokio::test]
    async fn test_supervise_reconnects_after_loss() {
        let config = fast_config();
        let (transport, workflow, state) = simulated(&config);
        let supervisor = {
            let workflow = workflow.clone();
            tokio::spawn(async move { workflow.supervise().await })
        };

        let mut ready = state.subscribe_ready();
        tokio::time::timeout(Duration::from_secs(2), ready.wait_for(|r| *r))
            .await
            .unwrap()
            .unwrap();
        let first = workflow.manager().session().session_id().map(str::to_owned);

        transport.lose_connection();

        tokio::time::timeout(Duration::from_secs(2), async {
            loop {
                let current = workflow.manager().session().session_id().map(str::to_owned);
                if current.is_some() && current != first && state.is_ready() {
                    break;
                }
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .unwrap();

        supervisor.abort();
    }
}
