//! Abstract BLE adapter capability.
//!
//! The coordinator never talks to a platform BLE stack directly. It issues
//! commands through [`BleAdapter`] and receives every completion and
//! unsolicited callback as an [`AdapterEvent`] on a single ordered channel.
//! That keeps the state machine testable with a scripted adapter and keeps
//! all platform quirks inside one backend module.

use async_trait::async_trait;
use thiserror::Error;
use uuid::Uuid;

/// Opaque identifier for a discovered peripheral, owned by the adapter.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PeripheralId(String);

impl PeripheralId {
    pub fn new(id: impl Into<String>) -> Self {
        PeripheralId(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for PeripheralId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// A GATT service on a connected peripheral. Valid only while that
/// peripheral stays connected.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceHandle {
    pub uuid: Uuid,
}

/// A GATT characteristic on a connected peripheral. Valid only while that
/// peripheral stays connected.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CharacteristicHandle {
    pub uuid: Uuid,
    /// Whether the peripheral advertises the NOTIFY property for it.
    pub can_notify: bool,
}

/// Radio readiness as reported by the platform stack.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdapterState {
    PoweredOn,
    PoweredOff,
    Unauthorized,
    Unknown,
}

impl AdapterState {
    pub fn is_ready(self) -> bool {
        matches!(self, AdapterState::PoweredOn)
    }
}

/// Immediate failure of a command initiation. Completion failures arrive
/// as [`AdapterEvent`]s instead.
#[derive(Debug, Error)]
pub enum AdapterError {
    #[error("bluetooth adapter unavailable: {0}")]
    Unavailable(String),
    #[error("unknown peripheral {0}")]
    UnknownPeripheral(PeripheralId),
    #[error("characteristic {0} not present on connected peripheral")]
    UnknownCharacteristic(Uuid),
    #[error("bluetooth backend error: {0}")]
    Backend(String),
}

/// Everything the platform stack reports back, in delivery order.
///
/// Value-level completions carry the originating peripheral plus the
/// characteristic UUID rather than a full handle: GATT dispatch is by UUID,
/// and the peripheral lets the coordinator drop completions that straggle
/// in from a previous connection cycle.
#[derive(Debug, Clone)]
pub enum AdapterEvent {
    StateChanged(AdapterState),
    PeripheralDiscovered {
        peripheral: PeripheralId,
        local_name: Option<String>,
    },
    Connected(PeripheralId),
    ConnectFailed {
        peripheral: PeripheralId,
        error: String,
    },
    Disconnected {
        peripheral: PeripheralId,
        reason: Option<String>,
    },
    ServicesDiscovered {
        peripheral: PeripheralId,
        services: Vec<ServiceHandle>,
    },
    ServiceDiscoveryFailed {
        peripheral: PeripheralId,
        error: String,
    },
    CharacteristicsDiscovered {
        peripheral: PeripheralId,
        characteristics: Vec<CharacteristicHandle>,
    },
    CharacteristicDiscoveryFailed {
        peripheral: PeripheralId,
        error: String,
    },
    NotifyCompleted {
        peripheral: PeripheralId,
        characteristic: Uuid,
        enabled: bool,
        result: Result<(), String>,
    },
    ValueRead {
        peripheral: PeripheralId,
        characteristic: Uuid,
        result: Result<Vec<u8>, String>,
    },
    WriteCompleted {
        peripheral: PeripheralId,
        characteristic: Uuid,
        result: Result<(), String>,
    },
    Notification {
        peripheral: PeripheralId,
        characteristic: Uuid,
        value: Vec<u8>,
    },
}

/// Command side of the adapter capability.
///
/// Methods return quickly; anything that takes radio time completes through
/// the event channel handed to the adapter at construction.
#[async_trait]
pub trait BleAdapter: Send + Sync + 'static {
    /// Start scanning for peripherals advertising `service`.
    async fn start_scan(&self, service: Uuid) -> Result<(), AdapterError>;

    async fn stop_scan(&self) -> Result<(), AdapterError>;

    /// Initiate a connection. Completes with `Connected` or `ConnectFailed`.
    async fn connect(&self, peripheral: &PeripheralId) -> Result<(), AdapterError>;

    /// Tear down the link. A `Disconnected` event follows.
    async fn disconnect(&self, peripheral: &PeripheralId) -> Result<(), AdapterError>;

    /// Discover services matching `filter`. Completes with
    /// `ServicesDiscovered` (possibly empty) or `ServiceDiscoveryFailed`.
    async fn discover_services(
        &self,
        peripheral: &PeripheralId,
        filter: Uuid,
    ) -> Result<(), AdapterError>;

    /// Discover the characteristics of `service`. Completes with
    /// `CharacteristicsDiscovered` or `CharacteristicDiscoveryFailed`.
    async fn discover_characteristics(
        &self,
        peripheral: &PeripheralId,
        service: &ServiceHandle,
    ) -> Result<(), AdapterError>;

    /// Enable or disable notifications. Completes with `NotifyCompleted`.
    async fn set_notify(
        &self,
        peripheral: &PeripheralId,
        characteristic: &CharacteristicHandle,
        enabled: bool,
    ) -> Result<(), AdapterError>;

    /// One-shot read. Completes with `ValueRead`.
    async fn read_value(
        &self,
        peripheral: &PeripheralId,
        characteristic: &CharacteristicHandle,
    ) -> Result<(), AdapterError>;

    /// Write `value`. Completes with `WriteCompleted`.
    async fn write_value(
        &self,
        peripheral: &PeripheralId,
        characteristic: &CharacteristicHandle,
        value: &[u8],
        with_response: bool,
    ) -> Result<(), AdapterError>;
}
