use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Access levels granted to authenticated users, weakest first.
///
/// Ordering is meaningful: a user holding `Read` satisfies any check that
/// requires `StateTotals` or lower.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Privilege {
    Identity,
    Description,
    StateTotals,
    Read,
    Shutdown,
    Control,
}

impl Privilege {
    pub const ALL: [Privilege; 6] = [
        Privilege::Identity,
        Privilege::Description,
        Privilege::StateTotals,
        Privilege::Read,
        Privilege::Shutdown,
        Privilege::Control,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Privilege::Identity => "identity",
            Privilege::Description => "description",
            Privilege::StateTotals => "state-totals",
            Privilege::Read => "read",
            Privilege::Shutdown => "shutdown",
            Privilege::Control => "control",
        }
    }

    pub fn satisfies(&self, required: Privilege) -> bool {
        *self >= required
    }
}

impl fmt::Display for Privilege {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, thiserror::Error)]
#[error("unknown privilege level '{0}'")]
pub struct UnknownPrivilege(pub String);

impl FromStr for Privilege {
    type Err = UnknownPrivilege;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        let normalized = raw.trim().to_ascii_lowercase().replace(['_', ' '], "-");
        Privilege::ALL
            .into_iter()
            .find(|level| level.as_str() == normalized)
            .ok_or_else(|| UnknownPrivilege(raw.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ordering_follows_rank() {
        assert!(Privilege::Control.satisfies(Privilege::Shutdown));
        assert!(Privilege::Read.satisfies(Privilege::Identity));
        assert!(!Privilege::Read.satisfies(Privilege::Shutdown));
        assert!(!Privilege::Identity.satisfies(Privilege::Description));
    }

    #[test]
    fn parses_loose_spellings() {
        assert_eq!("state-totals".parse::<Privilege>().unwrap(), Privilege::StateTotals);
        assert_eq!("STATE_TOTALS".parse::<Privilege>().unwrap(), Privilege::StateTotals);
        assert_eq!(" control ".parse::<Privilege>().unwrap(), Privilege::Control);
        assert!("full-control".parse::<Privilege>().is_err());
    }
}
