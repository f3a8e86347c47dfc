use serde::{Deserialize, Serialize};
use std::fmt;

/// A transport protocol named by a port or a policy clause.
///
/// Kubernetes treats an unset protocol as TCP, which is what `Default` yields. An explicitly set
/// but unrecognized protocol is an error: it must never fall back to TCP.
#[derive(
    Copy, Clone, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Deserialize, Serialize,
)]
#[serde(rename_all = "UPPERCASE")]
pub enum Protocol {
    #[default]
    Tcp,
    Udp,
    Sctp,
}

#[derive(Debug, thiserror::Error)]
#[error("invalid protocol: {0:?}")]
pub struct InvalidProtocol(pub String);

// === impl Protocol ===

impl Protocol {
    /// Parses an optional protocol field, defaulting to TCP only when the field is absent.
    pub fn parse_or_default(s: Option<&str>) -> Result<Self, InvalidProtocol> {
        s.map(str::parse).transpose().map(Option::unwrap_or_default)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Tcp => "TCP",
            Self::Udp => "UDP",
            Self::Sctp => "SCTP",
        }
    }
}

impl std::str::FromStr for Protocol {
    type Err = InvalidProtocol;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.eq_ignore_ascii_case("TCP") {
            Ok(Self::Tcp)
        } else if s.eq_ignore_ascii_case("UDP") {
            Ok(Self::Udp)
        } else if s.eq_ignore_ascii_case("SCTP") {
            Ok(Self::Sctp)
        } else {
            Err(InvalidProtocol(s.to_string()))
        }
    }
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.as_str().fmt(f)
    }
}
