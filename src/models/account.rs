//! Seller account types
//!
//! The marketplace exposes two seller accounts per merchant: MAIN
//! (self-fulfilled) and FBE (fulfilled by the marketplace). Each has its
//! own credentials and its own request-rate ceilings.

use serde::{Deserialize, Serialize};

/// Marketplace seller account type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AccountType {
    /// Self-fulfilled seller account
    Main,
    /// Fulfilled-by-marketplace seller account
    Fbe,
}

impl AccountType {
    /// All known account types
    pub fn all() -> [AccountType; 2] {
        [AccountType::Main, AccountType::Fbe]
    }
}

impl std::fmt::Display for AccountType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AccountType::Main => write!(f, "main"),
            AccountType::Fbe => write!(f, "fbe"),
        }
    }
}

impl std::str::FromStr for AccountType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "main" => Ok(AccountType::Main),
            "fbe" => Ok(AccountType::Fbe),
            _ => Err(format!("Invalid account type: {}", s)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_account_type_display_and_parse() {
        assert_eq!(AccountType::Main.to_string(), "main");
        assert_eq!(AccountType::Fbe.to_string(), "fbe");

        assert_eq!("main".parse::<AccountType>().unwrap(), AccountType::Main);
        assert_eq!("FBE".parse::<AccountType>().unwrap(), AccountType::Fbe);
        assert!("other".parse::<AccountType>().is_err());
    }

    #[test]
    fn test_account_type_serialization() {
        let json = serde_json::to_string(&AccountType::Main).unwrap();
        assert_eq!(json, r#""main""#);

        let parsed: AccountType = serde_json::from_str(r#""fbe""#).unwrap();
        assert_eq!(parsed, AccountType::Fbe);
    }
}
