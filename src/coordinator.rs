//! Connection coordinator: drives the central role from scan to subscription.
//!
//! One task owns all mutable state. Adapter callbacks, control commands and
//! operation timeouts are serialized through a single `select!` loop, so a
//! new operation is only ever issued from the state that is its sole
//! precondition and there is never more than one discovery or connect
//! attempt in flight.

use std::time::Duration;

use tokio::sync::mpsc::{Receiver, Sender};
use tokio::time::Instant;
use tracing::{debug, info, trace, warn};
use uuid::Uuid;

use crate::adapter::{AdapterEvent, BleAdapter, CharacteristicHandle, PeripheralId};
use crate::error::CoordinatorError;
use crate::measurement::{self, BodySensorLocation};
use crate::signal::{Command, ConnectionStatus, MonitorEvent};
use crate::uuids;

/// Where the coordinator sits in the discovery sequence.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ConnectionState {
    Idle,
    Scanning,
    Discovered,
    Connecting,
    ServiceDiscovery,
    CharacteristicDiscovery,
    Subscribed,
}

/// Timeouts for the bounded async operations. Expiry is handled exactly
/// like an adapter-reported failure.
#[derive(Debug, Clone)]
pub struct CoordinatorConfig {
    pub connect_timeout: Duration,
    /// Applies to service discovery, characteristic discovery and the
    /// notification-enable write.
    pub discovery_timeout: Duration,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(15),
            discovery_timeout: Duration::from_secs(10),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PendingOp {
    Connect,
    DiscoverServices,
    DiscoverCharacteristics,
    EnableNotify,
}

impl PendingOp {
    fn describe(self) -> &'static str {
        match self {
            PendingOp::Connect => "connect",
            PendingOp::DiscoverServices => "service discovery",
            PendingOp::DiscoverCharacteristics => "characteristic discovery",
            PendingOp::EnableNotify => "notification setup",
        }
    }
}

/// The one connection cycle currently being pursued. Replaced wholesale on
/// every reconnect so handles from a previous cycle can never leak in.
struct Session {
    peripheral: PeripheralId,
    hr_measurement: Option<CharacteristicHandle>,
}

pub struct ConnectionCoordinator<A: BleAdapter> {
    adapter: A,
    events: Receiver<AdapterEvent>,
    commands: Receiver<Command>,
    output: Sender<MonitorEvent>,
    config: CoordinatorConfig,
    state: ConnectionState,
    /// Radio readiness is a level: scan requests made while the radio is
    /// down are deferred and re-issued on the powered-on report.
    adapter_ready: bool,
    session: Option<Session>,
    deadline: Option<(PendingOp, Instant)>,
}

impl<A: BleAdapter> ConnectionCoordinator<A> {
    pub fn new(
        adapter: A,
        events: Receiver<AdapterEvent>,
        commands: Receiver<Command>,
        output: Sender<MonitorEvent>,
        config: CoordinatorConfig,
    ) -> Self {
        Self {
            adapter,
            events,
            commands,
            output,
            config,
            state: ConnectionState::Idle,
            adapter_ready: true,
            session: None,
            deadline: None,
        }
    }

    /// Process commands, adapter events and timeouts until the command
    /// channel closes.
    pub async fn run(mut self) {
        loop {
            let deadline = self.deadline.map(|(_, at)| at);
            let turn = tokio::select! {
                biased;
                cmd = self.commands.recv() => Turn::Command(cmd),
                _ = sleep_until_opt(deadline) => Turn::Timeout,
                ev = self.events.recv() => Turn::Adapter(ev),
            };
            match turn {
                Turn::Command(Some(cmd)) => self.handle_command(cmd).await,
                Turn::Command(None) => {
                    self.stop().await;
                    break;
                }
                Turn::Timeout => self.handle_timeout().await,
                Turn::Adapter(Some(ev)) => self.handle_event(ev).await,
                Turn::Adapter(None) => {
                    warn!("adapter event channel closed; coordinator exiting");
                    break;
                }
            }
        }
    }

    async fn handle_command(&mut self, cmd: Command) {
        match cmd {
            Command::Start => {
                if self.state == ConnectionState::Idle {
                    info!("starting heart rate monitor");
                    self.enter_scanning().await;
                } else {
                    debug!(state = ?self.state, "start ignored; already running");
                }
            }
            Command::Stop => self.stop().await,
        }
    }

    async fn stop(&mut self) {
        if self.state == ConnectionState::Idle {
            return;
        }
        info!("stopping; cancelling in-flight work");
        if self.state == ConnectionState::Scanning {
            if let Err(e) = self.adapter.stop_scan().await {
                warn!(error = %e, "stop scan failed");
            }
        }
        if let Some(session) = self.session.take() {
            if let Err(e) = self.adapter.disconnect(&session.peripheral).await {
                warn!(error = %e, peripheral = %session.peripheral, "disconnect failed");
            }
        }
        self.deadline = None;
        self.state = ConnectionState::Idle;
        self.emit(MonitorEvent::Status(ConnectionStatus::Idle)).await;
    }

    async fn enter_scanning(&mut self) {
        self.state = ConnectionState::Scanning;
        self.session = None;
        self.deadline = None;
        self.emit(MonitorEvent::Status(ConnectionStatus::Scanning)).await;
        self.try_start_scan().await;
    }

    async fn try_start_scan(&mut self) {
        if !self.adapter_ready {
            debug!("radio not ready; scan deferred until powered on");
            return;
        }
        if let Err(e) = self.adapter.start_scan(uuids::HEART_RATE_SERVICE).await {
            warn!(error = %e, "scan start failed; waiting for the adapter to come back");
            self.adapter_ready = false;
            self.emit(MonitorEvent::Status(ConnectionStatus::Error(
                CoordinatorError::AdapterUnavailable,
            )))
            .await;
        }
    }

    /// Give up on the current peripheral and resume scanning for another.
    async fn abandon_session(&mut self, error: CoordinatorError) {
        warn!(%error, "abandoning current peripheral");
        self.emit(MonitorEvent::Status(ConnectionStatus::Error(error))).await;
        if let Some(session) = self.session.take() {
            if let Err(e) = self.adapter.disconnect(&session.peripheral).await {
                warn!(error = %e, peripheral = %session.peripheral, "disconnect failed");
            }
        }
        self.enter_scanning().await;
    }

    fn session_matches(&self, peripheral: &PeripheralId) -> bool {
        self.session
            .as_ref()
            .is_some_and(|s| s.peripheral == *peripheral)
    }

    fn is_hr_measurement(&self, characteristic: Uuid) -> bool {
        self.session
            .as_ref()
            .and_then(|s| s.hr_measurement.as_ref())
            .is_some_and(|c| c.uuid == characteristic)
    }

    fn arm(&mut self, op: PendingOp, timeout: Duration) {
        self.deadline = Some((op, Instant::now() + timeout));
    }

    async fn handle_timeout(&mut self) {
        let Some((op, _)) = self.deadline.take() else {
            return;
        };
        warn!(op = op.describe(), "operation timed out");
        let error = match op {
            PendingOp::Connect => CoordinatorError::ConnectFailed("timed out".into()),
            other => {
                CoordinatorError::ProtocolViolation(format!("{} timed out", other.describe()))
            }
        };
        self.abandon_session(error).await;
    }

    async fn handle_event(&mut self, event: AdapterEvent) {
        match event {
            AdapterEvent::StateChanged(state) => {
                let ready = state.is_ready();
                if ready == self.adapter_ready {
                    return;
                }
                self.adapter_ready = ready;
                if ready {
                    info!("adapter powered on");
                    if self.state == ConnectionState::Scanning {
                        self.try_start_scan().await;
                    }
                } else {
                    warn!(?state, "adapter no longer ready");
                    if self.state != ConnectionState::Idle {
                        self.emit(MonitorEvent::Status(ConnectionStatus::Error(
                            CoordinatorError::AdapterUnavailable,
                        )))
                        .await;
                    }
                }
            }

            AdapterEvent::PeripheralDiscovered {
                peripheral,
                local_name,
            } => {
                if self.state != ConnectionState::Scanning {
                    // First discovered peripheral wins; later reports are
                    // dropped while an attempt is outstanding.
                    trace!(%peripheral, "ignoring discovery outside of scanning");
                    return;
                }
                info!(
                    %peripheral,
                    name = local_name.as_deref().unwrap_or("<unnamed>"),
                    "heart rate peripheral found"
                );
                self.state = ConnectionState::Discovered;
                if let Err(e) = self.adapter.stop_scan().await {
                    warn!(error = %e, "stop scan failed");
                }
                match self.adapter.connect(&peripheral).await {
                    Ok(()) => {
                        self.session = Some(Session {
                            peripheral,
                            hr_measurement: None,
                        });
                        self.state = ConnectionState::Connecting;
                        self.arm(PendingOp::Connect, self.config.connect_timeout);
                    }
                    Err(e) => {
                        self.emit(MonitorEvent::Status(ConnectionStatus::Error(
                            CoordinatorError::ConnectFailed(e.to_string()),
                        )))
                        .await;
                        self.enter_scanning().await;
                    }
                }
            }

            AdapterEvent::Connected(peripheral) => {
                if self.state != ConnectionState::Connecting || !self.session_matches(&peripheral)
                {
                    debug!(%peripheral, "ignoring stale connect report");
                    return;
                }
                info!(%peripheral, "link established; discovering services");
                self.deadline = None;
                self.state = ConnectionState::ServiceDiscovery;
                match self
                    .adapter
                    .discover_services(&peripheral, uuids::HEART_RATE_SERVICE)
                    .await
                {
                    Ok(()) => self.arm(PendingOp::DiscoverServices, self.config.discovery_timeout),
                    Err(e) => {
                        self.abandon_session(CoordinatorError::ProtocolViolation(format!(
                            "service discovery could not start: {e}"
                        )))
                        .await;
                    }
                }
            }

            AdapterEvent::ConnectFailed { peripheral, error } => {
                if self.state != ConnectionState::Connecting || !self.session_matches(&peripheral)
                {
                    debug!(%peripheral, "ignoring stale connect failure");
                    return;
                }
                // BLE connects are flaky; go straight back to scanning.
                warn!(%peripheral, %error, "connect failed; resuming scan");
                self.session = None;
                self.deadline = None;
                self.emit(MonitorEvent::Status(ConnectionStatus::Error(
                    CoordinatorError::ConnectFailed(error),
                )))
                .await;
                self.enter_scanning().await;
            }

            AdapterEvent::Disconnected { peripheral, reason } => {
                if !self.session_matches(&peripheral) {
                    debug!(%peripheral, "ignoring disconnect for unknown peripheral");
                    return;
                }
                warn!(
                    %peripheral,
                    reason = reason.as_deref().unwrap_or("unknown"),
                    "link dropped; resuming scan"
                );
                // Service and characteristic handles die with the link.
                self.session = None;
                self.deadline = None;
                self.emit(MonitorEvent::Status(ConnectionStatus::Disconnected))
                    .await;
                self.enter_scanning().await;
            }

            AdapterEvent::ServicesDiscovered {
                peripheral,
                services,
            } => {
                if self.state != ConnectionState::ServiceDiscovery
                    || !self.session_matches(&peripheral)
                {
                    debug!(%peripheral, "ignoring stale service discovery result");
                    return;
                }
                self.deadline = None;
                let Some(service) = services
                    .into_iter()
                    .find(|s| s.uuid == uuids::HEART_RATE_SERVICE)
                else {
                    self.abandon_session(CoordinatorError::ProtocolViolation(
                        "advertised heart rate service missing from GATT table".into(),
                    ))
                    .await;
                    return;
                };
                self.state = ConnectionState::CharacteristicDiscovery;
                match self
                    .adapter
                    .discover_characteristics(&peripheral, &service)
                    .await
                {
                    Ok(()) => {
                        self.arm(PendingOp::DiscoverCharacteristics, self.config.discovery_timeout)
                    }
                    Err(e) => {
                        self.abandon_session(CoordinatorError::ProtocolViolation(format!(
                            "characteristic discovery could not start: {e}"
                        )))
                        .await;
                    }
                }
            }

            AdapterEvent::ServiceDiscoveryFailed { peripheral, error } => {
                if self.state != ConnectionState::ServiceDiscovery
                    || !self.session_matches(&peripheral)
                {
                    return;
                }
                self.deadline = None;
                self.abandon_session(CoordinatorError::ProtocolViolation(format!(
                    "service discovery failed: {error}"
                )))
                .await;
            }

            AdapterEvent::CharacteristicsDiscovered {
                peripheral,
                characteristics,
            } => {
                if self.state != ConnectionState::CharacteristicDiscovery
                    || !self.session_matches(&peripheral)
                {
                    debug!(%peripheral, "ignoring stale characteristic discovery result");
                    return;
                }
                self.deadline = None;
                self.dispatch_characteristics(peripheral, characteristics).await;
            }

            AdapterEvent::CharacteristicDiscoveryFailed { peripheral, error } => {
                if self.state != ConnectionState::CharacteristicDiscovery
                    || !self.session_matches(&peripheral)
                {
                    return;
                }
                self.deadline = None;
                self.abandon_session(CoordinatorError::ProtocolViolation(format!(
                    "characteristic discovery failed: {error}"
                )))
                .await;
            }

            AdapterEvent::NotifyCompleted {
                peripheral,
                characteristic,
                enabled,
                result,
            } => {
                if self.state != ConnectionState::CharacteristicDiscovery
                    || !self.session_matches(&peripheral)
                    || !enabled
                    || !self.is_hr_measurement(characteristic)
                {
                    debug!(%characteristic, "ignoring notification state report");
                    return;
                }
                self.deadline = None;
                match result {
                    Ok(()) => {
                        info!("subscribed to heart rate notifications");
                        self.state = ConnectionState::Subscribed;
                        self.emit(MonitorEvent::Status(ConnectionStatus::Connected))
                            .await;
                    }
                    Err(error) => {
                        self.abandon_session(CoordinatorError::ProtocolViolation(format!(
                            "enabling notifications failed: {error}"
                        )))
                        .await;
                    }
                }
            }

            AdapterEvent::ValueRead {
                peripheral,
                characteristic,
                result,
            } => {
                if !self.session_matches(&peripheral)
                    || characteristic != uuids::BODY_SENSOR_LOCATION
                {
                    debug!(%characteristic, "ignoring stale read completion");
                    return;
                }
                match result {
                    Ok(value) => match value.first() {
                        Some(&raw) => {
                            let location = BodySensorLocation::from(raw);
                            info!(?location, "body sensor location");
                            self.emit(MonitorEvent::SensorLocation(location)).await;
                        }
                        None => warn!("empty body sensor location value"),
                    },
                    // Informational read; never gates a transition.
                    Err(error) => debug!(%error, "body sensor location read failed"),
                }
            }

            AdapterEvent::WriteCompleted {
                peripheral,
                characteristic,
                result,
            } => {
                if !self.session_matches(&peripheral)
                    || characteristic != uuids::HEART_RATE_CONTROL_POINT
                {
                    return;
                }
                if let Err(error) = result {
                    // Non-fatal: many sensors reject the reset command.
                    warn!(%error, "energy expended reset write failed");
                    self.emit(MonitorEvent::Status(ConnectionStatus::Error(
                        CoordinatorError::WriteFailed(error),
                    )))
                    .await;
                }
            }

            AdapterEvent::Notification {
                peripheral,
                characteristic,
                value,
            } => {
                if self.state != ConnectionState::Subscribed
                    || !self.session_matches(&peripheral)
                    || !self.is_hr_measurement(characteristic)
                {
                    trace!(%characteristic, "ignoring notification");
                    return;
                }
                match measurement::decode(&value) {
                    Ok(decoded) => {
                        if let Some(warning) = decoded.warning {
                            warn!(%warning, raw = ?value, "malformed tail in measurement");
                            self.emit(MonitorEvent::DecodeFailed(warning)).await;
                        }
                        trace!(bpm = decoded.reading.bpm, "heart rate reading");
                        self.emit(MonitorEvent::Reading(decoded.reading)).await;
                    }
                    Err(error) => {
                        // A single bad notification must not drop the
                        // subscription.
                        warn!(%error, raw = ?value, "undecodable measurement");
                        self.emit(MonitorEvent::DecodeFailed(error)).await;
                    }
                }
            }
        }
    }

    /// Dispatch the discovered characteristics by UUID: subscribe to the
    /// measurement, read the sensor location, reset the energy counter.
    /// Only the measurement subscription gates reaching `Subscribed`.
    async fn dispatch_characteristics(
        &mut self,
        peripheral: PeripheralId,
        characteristics: Vec<CharacteristicHandle>,
    ) {
        let Some(hr) = characteristics
            .iter()
            .find(|c| c.uuid == uuids::HEART_RATE_MEASUREMENT)
        else {
            self.abandon_session(CoordinatorError::MandatoryCharacteristicMissing)
                .await;
            return;
        };
        if !hr.can_notify {
            warn!("measurement characteristic does not advertise NOTIFY; subscribing anyway");
        }
        match self.adapter.set_notify(&peripheral, hr, true).await {
            Ok(()) => {
                self.arm(PendingOp::EnableNotify, self.config.discovery_timeout);
                if let Some(session) = &mut self.session {
                    session.hr_measurement = Some(hr.clone());
                }
            }
            Err(e) => {
                self.abandon_session(CoordinatorError::ProtocolViolation(format!(
                    "could not request notifications: {e}"
                )))
                .await;
                return;
            }
        }

        if let Some(location) = characteristics
            .iter()
            .find(|c| c.uuid == uuids::BODY_SENSOR_LOCATION)
        {
            if let Err(e) = self.adapter.read_value(&peripheral, location).await {
                debug!(error = %e, "body sensor location read could not start");
            }
        }

        if let Some(control_point) = characteristics
            .iter()
            .find(|c| c.uuid == uuids::HEART_RATE_CONTROL_POINT)
        {
            if let Err(e) = self
                .adapter
                .write_value(
                    &peripheral,
                    control_point,
                    &[uuids::RESET_ENERGY_EXPENDED],
                    true,
                )
                .await
            {
                warn!(error = %e, "energy expended reset could not start");
            }
        }
    }

    async fn emit(&self, event: MonitorEvent) {
        let _ = self.output.send(event).await;
    }
}

/// One iteration's worth of input for the run loop.
enum Turn {
    Command(Option<Command>),
    Timeout,
    Adapter(Option<AdapterEvent>),
}

async fn sleep_until_opt(deadline: Option<Instant>) {
    match deadline {
        Some(at) => tokio::time::sleep_until(at).await,
        None => std::future::pending().await,
    }
}
