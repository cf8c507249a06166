//! Value Objects - Immutable domain primitives
//!
//! Value objects are identified by their value rather than identity.
//! They are immutable and can be freely shared.

use serde::{Deserialize, Serialize};

/// Lifecycle status of an externally hosted server.
///
/// The hosting control plane reports statuses as numeric codes; the
/// serde representation uses the same codes so API payloads deserialize
/// directly into this type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub enum ServerStatus {
    Offline,
    Online,
    Starting,
    Stopping,
    Restarting,
    Saving,
    Loading,
    Crashed,
    Preparing,
}

impl ServerStatus {
    /// All statuses, in code order.
    pub const ALL: [ServerStatus; 9] = [
        Self::Offline,
        Self::Online,
        Self::Starting,
        Self::Stopping,
        Self::Restarting,
        Self::Saving,
        Self::Loading,
        Self::Crashed,
        Self::Preparing,
    ];

    /// Numeric code used by the hosting API.
    pub fn code(&self) -> u8 {
        match self {
            Self::Offline => 0,
            Self::Online => 1,
            Self::Starting => 2,
            Self::Stopping => 3,
            Self::Restarting => 4,
            Self::Saving => 5,
            Self::Loading => 6,
            Self::Crashed => 7,
            Self::Preparing => 10,
        }
    }

    /// Convert to string representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Offline => "offline",
            Self::Online => "online",
            Self::Starting => "starting",
            Self::Stopping => "stopping",
            Self::Restarting => "restarting",
            Self::Saving => "saving",
            Self::Loading => "loading",
            Self::Crashed => "crashed",
            Self::Preparing => "preparing",
        }
    }

    /// Parse a status from its name (case-insensitive) or numeric code.
    pub fn parse(s: &str) -> Option<Self> {
        if let Ok(code) = s.parse::<u8>() {
            return Self::try_from(code).ok();
        }
        let lower = s.to_lowercase();
        Self::ALL.into_iter().find(|status| status.as_str() == lower)
    }

    /// The server is down and may be started.
    pub fn is_stopped(&self) -> bool {
        matches!(self, Self::Offline | Self::Crashed)
    }

    /// The server is on its way to ONLINE.
    pub fn is_starting(&self) -> bool {
        matches!(
            self,
            Self::Starting | Self::Loading | Self::Preparing | Self::Restarting
        )
    }

    /// The server is on its way to OFFLINE.
    pub fn is_stopping(&self) -> bool {
        matches!(self, Self::Saving | Self::Stopping)
    }
}

impl TryFrom<u8> for ServerStatus {
    type Error = String;

    fn try_from(code: u8) -> Result<Self, Self::Error> {
        Self::ALL
            .into_iter()
            .find(|status| status.code() == code)
            .ok_or_else(|| format!("unknown server status code {}", code))
    }
}

impl From<ServerStatus> for u8 {
    fn from(status: ServerStatus) -> Self {
        status.code()
    }
}

impl std::fmt::Display for ServerStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str().to_uppercase())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_codes_round_trip_through_try_from() {
        for status in ServerStatus::ALL {
            assert_eq!(ServerStatus::try_from(status.code()), Ok(status));
        }
    }

    #[test]
    fn test_unknown_code_rejected() {
        assert!(ServerStatus::try_from(8).is_err());
        assert!(ServerStatus::try_from(42).is_err());
    }

    #[test]
    fn test_parse_by_name_and_code() {
        assert_eq!(ServerStatus::parse("online"), Some(ServerStatus::Online));
        assert_eq!(ServerStatus::parse("OFFLINE"), Some(ServerStatus::Offline));
        assert_eq!(ServerStatus::parse("10"), Some(ServerStatus::Preparing));
        assert_eq!(ServerStatus::parse("sleeping"), None);
    }

    #[test]
    fn test_status_groups() {
        assert!(ServerStatus::Crashed.is_stopped());
        assert!(ServerStatus::Offline.is_stopped());
        assert!(!ServerStatus::Online.is_stopped());

        assert!(ServerStatus::Restarting.is_starting());
        assert!(ServerStatus::Preparing.is_starting());
        assert!(!ServerStatus::Stopping.is_starting());

        assert!(ServerStatus::Saving.is_stopping());
        assert!(!ServerStatus::Online.is_stopping());
    }

    #[test]
    fn test_serde_uses_numeric_codes() {
        let json = serde_json::to_string(&ServerStatus::Preparing).unwrap();
        assert_eq!(json, "10");

        let status: ServerStatus = serde_json::from_str("1").unwrap();
        assert_eq!(status, ServerStatus::Online);

        assert!(serde_json::from_str::<ServerStatus>("9").is_err());
    }

    #[test]
    fn test_display_is_uppercase() {
        assert_eq!(ServerStatus::Online.to_string(), "ONLINE");
        assert_eq!(ServerStatus::Crashed.to_string(), "CRASHED");
    }
}
