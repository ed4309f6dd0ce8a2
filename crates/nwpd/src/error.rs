//! Error types for nwpd
//!
//! # NIST 800-53 Rev 5 Control Mappings
//! - SI-11: Error Handling - Structured error types with contextual information
//! - AU-3: Content of Audit Records - Errors include sufficient detail for audit

use crate::wire::{DecodeError, EncodeError};
use thiserror::Error;

/// Errors that can occur in nwpd
///
/// # NIST Controls
/// - SI-11(a): Generate error messages providing information necessary for corrective actions
/// - SI-11(b): Reveal only information necessary for error handling (no sensitive data exposure)
#[derive(Debug, Error)]
pub enum NwpdError {
    /// Raw link-layer socket error
    /// NIST: SC-7 (Boundary Protection) - Link interface errors
    #[error("Socket error: {0}")]
    Socket(String),

    /// Interface lookup failed
    /// NIST: CM-8 (System Component Inventory) - Interface tracking
    #[error("Interface error for {name}: {reason}")]
    Interface { name: String, reason: String },

    /// Netlink socket error
    #[error("Netlink error: {0}")]
    Netlink(String),

    /// The routing subsystem rejected a route request
    #[error("Route error: {0}")]
    Route(String),

    /// Principal map lookup or load failure
    #[error("Principal error: {0}")]
    Principal(String),

    /// Configuration error
    /// NIST: CM-6 (Configuration Settings) - Configuration validation
    #[error("Configuration error: {0}")]
    Config(String),

    /// Frame could not be decoded
    /// NIST: SI-10 (Information Input Validation)
    #[error("Decode error: {0}")]
    Decode(#[from] DecodeError),

    /// Frame could not be encoded
    #[error("Encode error: {0}")]
    Encode(#[from] EncodeError),

    /// Well-formed packet whose content is rejected by the protocol rules
    /// NIST: SI-10 (Information Input Validation)
    #[error("Rejected packet: {0}")]
    Rejected(&'static str),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl NwpdError {
    /// Whether the error describes bad input from a peer rather than a local failure
    pub fn is_malformed_packet(&self) -> bool {
        matches!(self, Self::Decode(_) | Self::Rejected(_))
    }
}

/// Result type alias for nwpd operations
pub type Result<T> = std::result::Result<T, NwpdError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = NwpdError::Route("file exists".to_string());
        assert_eq!(err.to_string(), "Route error: file exists");
    }

    #[test]
    fn test_malformed_classification() {
        assert!(NwpdError::Rejected("duplicate hardware address").is_malformed_packet());
        assert!(NwpdError::Decode(DecodeError::UnknownType(9)).is_malformed_packet());
        assert!(!NwpdError::Netlink("timeout".to_string()).is_malformed_packet());
    }
}
