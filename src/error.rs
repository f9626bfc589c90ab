//! Connection-lifecycle error kinds.
//!
//! None of these is fatal: the coordinator recovers by returning to the
//! scan, and only an explicit `stop()` settles it. They are surfaced on
//! the status stream so a consumer can show what went wrong.

use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CoordinatorError {
    /// The radio is powered off or unauthorized. Scanning resumes once
    /// the adapter reports powered-on again.
    #[error("bluetooth adapter unavailable")]
    AdapterUnavailable,

    /// A connection attempt failed or timed out.
    #[error("connection failed: {0}")]
    ConnectFailed(String),

    /// The peripheral's GATT table does not match its advertisement, or a
    /// discovery step failed outright.
    #[error("protocol violation: {0}")]
    ProtocolViolation(String),

    /// The peripheral lacks the Heart Rate Measurement characteristic.
    #[error("peripheral is missing the heart rate measurement characteristic")]
    MandatoryCharacteristicMissing,

    /// The control point write failed. Logged only; never changes state.
    #[error("control point write failed: {0}")]
    WriteFailed(String),
}
