use crate::{Error, Result};

use std::fmt;
use std::str::FromStr;

/// Identifier of a membership service provider, i.e. the organisation an
/// identity or a peer belongs to (`"Org1MSP"`).
#[derive(Clone, Debug, Eq, PartialEq, Ord, PartialOrd, Hash, Serialize, Deserialize)]
pub struct MspId(String);

impl MspId {
    pub fn new(id: &str) -> Self {
        MspId(id.to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for MspId {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for MspId {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        if s.is_empty() {
            return Err(Error::PeerParseError);
        }
        Ok(MspId(s.to_string()))
    }
}

impl From<&str> for MspId {
    fn from(s: &str) -> Self {
        MspId(s.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn msp_id_roundtrips_through_display() {
        let id = MspId::new("Org1MSP");
        let parsed: MspId = id.to_string().parse().unwrap();
        assert_eq!(id, parsed);
    }

    #[test]
    fn empty_msp_id_is_rejected() {
        assert!("".parse::<MspId>().is_err());
    }
}
