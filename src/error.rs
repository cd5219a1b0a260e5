//! Error types and result definitions for the zigtuya crate.
//! Every variant maps onto a numeric code so failures can be reported to the
//! host runtime without carrying Rust types across the boundary.

use thiserror::Error;

use crate::cluster::{ClusterId, ZdoStatus};

/// Represents all possible errors raised by the datapoint bridge.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum BridgeError {
    /// Standard IO error surfaced by a host transport
    #[error("IO error: {0}")]
    Io(String),

    /// JSON serialization or deserialization error (settings, host values)
    #[error("JSON error: {0}")]
    Json(String),

    /// A Tuya datapoint frame could not be parsed
    #[error("Decode error: {0}")]
    DecodeError(String),

    /// No write-path handler exists for the capability
    #[error("Capability '{0}' has no write handler")]
    UnsupportedCapability(String),

    /// The capability is not declared by the device class
    #[error("Capability '{0}' is not registered")]
    UnknownCapability(String),

    /// The value does not fit the capability or datapoint
    #[error("Invalid value for '{capability}': {reason}")]
    InvalidValue { capability: String, reason: String },

    /// A ZDO bind request was rejected
    #[error("Bind of cluster {cluster} failed: {status}")]
    BindFailed { cluster: ClusterId, status: ZdoStatus },

    /// The endpoint does not expose the cluster
    #[error("Cluster {0} not available on endpoint")]
    ClusterUnavailable(ClusterId),

    /// A cluster command or read failed during normal operation
    #[error("Command failed: {0}")]
    CommandFailed(String),

    /// Request timed out
    #[error("Timeout waiting for device")]
    Timeout,

    /// The device was deleted while the operation was pending
    #[error("Device '{0}' has been removed")]
    DeviceRemoved(String),

    /// The device has not finished initialization
    #[error("Device '{0}' is not ready")]
    NotReady(String),

    /// Device ID already exists in the driver
    #[error("Device ID '{0}' already exists")]
    DuplicateDevice(String),

    /// Device ID not found in the driver
    #[error("Device ID '{0}' not found")]
    DeviceNotFound(String),

    /// Device class name not present in the catalog
    #[error("Device class '{0}' not found")]
    UnknownDeviceClass(String),
}

/// A specialized Result type for bridge operations.
pub type Result<T> = std::result::Result<T, BridgeError>;

impl From<std::io::Error> for BridgeError {
    fn from(err: std::io::Error) -> Self {
        BridgeError::Io(err.to_string())
    }
}

impl From<serde_json::Error> for BridgeError {
    fn from(err: serde_json::Error) -> Self {
        BridgeError::Json(err.to_string())
    }
}

impl BridgeError {
    pub fn code(&self) -> u32 {
        match self {
            BridgeError::Io(_) => ERR_IO,
            BridgeError::Json(_) => ERR_JSON,
            BridgeError::DecodeError(_) => ERR_DECODE,
            BridgeError::UnsupportedCapability(_) => ERR_UNSUPPORTED,
            BridgeError::UnknownCapability(_) => ERR_UNSUPPORTED,
            BridgeError::InvalidValue { .. } => ERR_RANGE,
            BridgeError::BindFailed { .. } => ERR_BIND,
            BridgeError::ClusterUnavailable(_) => ERR_BIND,
            BridgeError::CommandFailed(_) => ERR_COMMAND,
            BridgeError::Timeout => ERR_TIMEOUT,
            BridgeError::DeviceRemoved(_) => ERR_REMOVED,
            BridgeError::NotReady(_) => ERR_NOT_READY,
            BridgeError::DuplicateDevice(_) => ERR_DUPLICATE,
            BridgeError::DeviceNotFound(_) => ERR_NOT_FOUND,
            BridgeError::UnknownDeviceClass(_) => ERR_NOT_FOUND,
        }
    }

    pub fn from_code(code: u32) -> Self {
        match code {
            ERR_JSON => BridgeError::Json("Generic JSON error".to_string()),
            ERR_DECODE => BridgeError::DecodeError("Generic decode error".to_string()),
            ERR_UNSUPPORTED => BridgeError::UnsupportedCapability("unknown".to_string()),
            ERR_COMMAND => BridgeError::CommandFailed("Generic command error".to_string()),
            ERR_TIMEOUT => BridgeError::Timeout,
            ERR_REMOVED => BridgeError::DeviceRemoved("unknown".to_string()),
            ERR_NOT_READY => BridgeError::NotReady("unknown".to_string()),
            ERR_DUPLICATE => BridgeError::DuplicateDevice("Unknown ID".to_string()),
            ERR_NOT_FOUND => BridgeError::DeviceNotFound("Unknown ID".to_string()),
            _ => BridgeError::Io(format!("Unknown error code: {}", code)),
        }
    }

    /// Failures worth retrying: the device may answer a second attempt.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            BridgeError::Io(_) | BridgeError::CommandFailed(_) | BridgeError::Timeout
        )
    }

    /// Bind rejections that the zone fallback layer recovers from.
    pub fn is_bind_failure(&self) -> bool {
        matches!(
            self,
            BridgeError::BindFailed { .. } | BridgeError::ClusterUnavailable(_)
        )
    }
}

define_error_codes! {
    ERR_SUCCESS = 0 => "Success",
    ERR_JSON = 900 => "Invalid JSON Settings or Value",
    ERR_IO = 901 => "Transport Error",
    ERR_TIMEOUT = 902 => "Timeout Waiting for Device",
    ERR_RANGE = 903 => "Specified Value Out of Range",
    ERR_DECODE = 904 => "Malformed Datapoint Frame",
    ERR_REMOVED = 905 => "Device Removed",
    ERR_COMMAND = 906 => "Device Rejected Command",
    ERR_UNSUPPORTED = 907 => "Function Not Supported by Device",
    ERR_BIND = 908 => "Cluster Bind Failed",
    ERR_NOT_READY = 909 => "Device Not Initialized",
    ERR_DUPLICATE = 915 => "Device ID already exists",
    ERR_NOT_FOUND = 916 => "Device ID not found",
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes_map_to_messages() {
        let err = BridgeError::UnsupportedCapability("dim".into());
        assert_eq!(err.code(), ERR_UNSUPPORTED);
        assert_eq!(
            get_error_message(err.code()),
            "Function Not Supported by Device"
        );
        assert_eq!(get_error_message(12345), "Unknown Error");
    }

    #[test]
    fn from_code_restores_kind() {
        assert_eq!(BridgeError::from_code(ERR_TIMEOUT), BridgeError::Timeout);
        assert!(matches!(
            BridgeError::from_code(ERR_DECODE),
            BridgeError::DecodeError(_)
        ));
        let err = BridgeError::from_code(ERR_NOT_READY);
        assert_eq!(err.code(), ERR_NOT_READY);
        assert_eq!(get_error_message(err.code()), "Device Not Initialized");
    }

    #[test]
    fn transient_and_bind_classification() {
        assert!(BridgeError::Timeout.is_transient());
        assert!(!BridgeError::UnsupportedCapability("x".into()).is_transient());
        let bind = BridgeError::BindFailed {
            cluster: ClusterId::IAS_ZONE,
            status: ZdoStatus::InvalidEp,
        };
        assert!(bind.is_bind_failure());
        assert!(bind.to_string().contains("INVALID_EP"));
    }
}
