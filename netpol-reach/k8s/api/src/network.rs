use ipnet::IpNet;
use serde::{Deserialize, Serialize};
use std::{collections::BTreeSet, fmt, net::IpAddr, str::FromStr};

/// An address block with optional exceptions.
///
/// Blocks are canonicalized when parsed: host bits are truncated, so
/// `10.1.2.3/8` and `10.0.0.0/8` denote the same block, and a bare address is
/// a single-host network.
#[derive(Clone, Debug, Eq, PartialEq, PartialOrd, Ord, Hash, Deserialize, Serialize)]
pub struct Network {
    pub cidr: IpNet,
    #[serde(default, skip_serializing_if = "BTreeSet::is_empty")]
    pub except: BTreeSet<IpNet>,
}

#[derive(Debug, thiserror::Error)]
#[error("not a valid CIDR or IP address: {0}")]
pub struct CidrParseError(String);

// === impl Network ===

impl Network {
    pub fn parse<S: AsRef<str>>(
        cidr: &str,
        except: impl IntoIterator<Item = S>,
    ) -> Result<Self, CidrParseError> {
        Ok(Self {
            cidr: parse_cidr(cidr)?,
            except: except
                .into_iter()
                .map(|s| parse_cidr(s.as_ref()))
                .collect::<Result<_, _>>()?,
        })
    }
}

impl From<IpNet> for Network {
    fn from(net: IpNet) -> Self {
        Self {
            cidr: net.trunc(),
            except: BTreeSet::new(),
        }
    }
}

impl FromStr for Network {
    type Err = CidrParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        parse_cidr(s).map(Into::into)
    }
}

impl fmt::Display for Network {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.cidr.fmt(f)?;
        if !self.except.is_empty() {
            let except = self
                .except
                .iter()
                .map(ToString::to_string)
                .collect::<Vec<_>>();
            write!(f, " except {}", except.join(","))?;
        }
        Ok(())
    }
}

fn parse_cidr(s: &str) -> Result<IpNet, CidrParseError> {
    let s = s.trim();
    if let Ok(net) = s.parse::<IpNet>() {
        return Ok(net.trunc());
    }

    if let Ok(addr) = s.parse::<IpAddr>() {
        return Ok(IpNet::from(addr));
    }

    Err(CidrParseError(s.to_string()))
}
