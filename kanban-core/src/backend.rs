use serde::{Deserialize, Serialize};

/// Identity of one of the three backing stores behind the gateway.
///
/// The derived ordering is only used for stable output (stats, health
/// reports). Acquisition order always comes from the operation descriptor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackendId {
    /// The ERP system (item master).
    Erp,
    /// The secondary relational store (purchase orders).
    Secondary,
    /// The general-purpose relational database (articles, tags, stock).
    General,
}

impl BackendId {
    pub const ALL: [BackendId; 3] = [BackendId::Erp, BackendId::Secondary, BackendId::General];

    pub fn as_str(&self) -> &'static str {
        match self {
            BackendId::Erp => "erp",
            BackendId::Secondary => "secondary",
            BackendId::General => "general",
        }
    }
}

impl std::fmt::Display for BackendId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for BackendId {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "erp" => Ok(BackendId::Erp),
            "secondary" => Ok(BackendId::Secondary),
            "general" => Ok(BackendId::General),
            other => Err(format!("unknown backend '{other}'")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_and_display_round_trip() {
        for id in BackendId::ALL {
            assert_eq!(id.to_string().parse::<BackendId>().unwrap(), id);
        }
        assert!("mainframe".parse::<BackendId>().is_err());
    }

    #[test]
    fn serializes_snake_case() {
        assert_eq!(serde_json::to_string(&BackendId::General).unwrap(), "\"general\"");
    }
}
