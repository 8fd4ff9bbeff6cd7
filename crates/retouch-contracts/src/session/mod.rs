mod ledger;
mod store;

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use ledger::{LedgerEntry, TransactionKind, TransactionLedger};
pub use store::{
    AccountError, CreditPackage, Debit, JsonSessionStore, MemorySessionStore, SessionStore,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Standard,
    Admin,
}

impl Role {
    pub fn is_privileged(self) -> bool {
        matches!(self, Self::Admin)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Standard => "standard",
            Self::Admin => "admin",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Role {
    type Err = String;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "standard" | "user" => Ok(Self::Standard),
            "admin" => Ok(Self::Admin),
            other => Err(format!("unknown role '{other}'")),
        }
    }
}

/// The acting principal as seen by the editor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserSession {
    pub user_id: String,
    pub email: String,
    pub name: String,
    pub role: Role,
    pub enabled: bool,
    pub credits: i64,
}

impl UserSession {
    /// Takes one credit from non-privileged sessions, never going below zero.
    /// Returns true when the balance changed.
    pub fn debit_one(&mut self) -> bool {
        if self.role.is_privileged() || self.credits <= 0 {
            return false;
        }
        self.credits -= 1;
        true
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Error)]
#[serde(rename_all = "snake_case")]
pub enum GateDenial {
    #[error("please sign in to generate images")]
    NotLoggedIn,
    #[error("this account has been disabled; contact an administrator")]
    Disabled,
    #[error("you are out of credits")]
    OutOfCredits,
}

impl GateDenial {
    /// Out-of-credits routes the user to the purchase flow instead of a plain error.
    pub fn is_paywall(self) -> bool {
        matches!(self, Self::OutOfCredits)
    }
}

pub fn check_gate(session: Option<&UserSession>) -> Result<(), GateDenial> {
    let Some(session) = session else {
        return Err(GateDenial::NotLoggedIn);
    };
    if !session.enabled {
        return Err(GateDenial::Disabled);
    }
    if !session.role.is_privileged() && session.credits <= 0 {
        return Err(GateDenial::OutOfCredits);
    }
    Ok(())
}

pub fn can_generate(session: Option<&UserSession>) -> bool {
    check_gate(session).is_ok()
}

#[cfg(test)]
pub(crate) fn session_for_test(role: Role, credits: i64) -> UserSession {
    UserSession {
        user_id: "u-1".to_string(),
        email: "ada@example.com".to_string(),
        name: "Ada".to_string(),
        role,
        enabled: true,
        credits,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn gate_denies_missing_session() {
        assert_eq!(check_gate(None), Err(GateDenial::NotLoggedIn));
        assert!(!can_generate(None));
    }

    #[test]
    fn gate_denies_disabled_before_checking_credits() {
        let mut session = session_for_test(Role::Standard, 0);
        session.enabled = false;
        assert_eq!(check_gate(Some(&session)), Err(GateDenial::Disabled));

        let mut admin = session_for_test(Role::Admin, 100);
        admin.enabled = false;
        assert_eq!(check_gate(Some(&admin)), Err(GateDenial::Disabled));
    }

    #[test]
    fn standard_session_without_credits_hits_paywall() {
        let session = session_for_test(Role::Standard, 0);
        let denial = check_gate(Some(&session)).err();
        assert_eq!(denial, Some(GateDenial::OutOfCredits));
        assert!(denial.map(GateDenial::is_paywall).unwrap_or(false));

        let negative = session_for_test(Role::Standard, -3);
        assert_eq!(check_gate(Some(&negative)), Err(GateDenial::OutOfCredits));
    }

    #[test]
    fn admin_bypasses_balance_check() {
        let admin = session_for_test(Role::Admin, 0);
        assert!(can_generate(Some(&admin)));
        let broke_admin = session_for_test(Role::Admin, -5);
        assert!(can_generate(Some(&broke_admin)));
    }

    #[test]
    fn debit_clamps_at_zero_and_skips_admins() {
        let mut session = session_for_test(Role::Standard, 1);
        assert!(session.debit_one());
        assert_eq!(session.credits, 0);
        assert!(!session.debit_one());
        assert_eq!(session.credits, 0);

        let mut admin = session_for_test(Role::Admin, 4);
        assert!(!admin.debit_one());
        assert_eq!(admin.credits, 4);
    }

    #[test]
    fn role_parses_aliases() {
        assert_eq!("Admin".parse::<Role>(), Ok(Role::Admin));
        assert_eq!("user".parse::<Role>(), Ok(Role::Standard));
        assert!("root".parse::<Role>().is_err());
    }
}
