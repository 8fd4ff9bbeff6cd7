use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Mutex;

use chrono::{SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use thiserror::Error;
use uuid::Uuid;

use super::ledger::{TransactionKind, TransactionLedger};
use super::{Role, UserSession};

pub const DEFAULT_SIGNUP_CREDITS: i64 = 3;

/// Supplies the acting session and accepts the one write the editor makes.
pub trait SessionStore: Send + Sync {
    fn current(&self) -> anyhow::Result<Option<UserSession>>;

    /// Debits one credit for a committed generation. Either the balance and
    /// its ledger entry are both written or neither is.
    fn debit(&self, user_id: &str, reason: &str) -> anyhow::Result<Debit>;
}

/// Result of a debit: the session after it, and whether a credit was taken.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Debit {
    pub session: UserSession,
    pub charged: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AccountError {
    #[error("an account for '{0}' already exists")]
    EmailTaken(String),
    #[error("'{0}' is not a valid email address")]
    InvalidEmail(String),
    #[error("password must not be empty")]
    EmptyPassword,
    #[error("invalid email or password")]
    InvalidCredentials,
    #[error("no account matches '{0}'")]
    UnknownUser(String),
    #[error("administrator privileges required")]
    NotAdmin,
    #[error("administrators cannot disable their own account")]
    SelfLockout,
    #[error("unknown credit package '{0}' (expected starter, pro or studio)")]
    UnknownPackage(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CreditPackage {
    Starter,
    Pro,
    Studio,
}

impl CreditPackage {
    pub const ALL: [CreditPackage; 3] = [Self::Starter, Self::Pro, Self::Studio];

    pub fn credits(self) -> i64 {
        match self {
            Self::Starter => 10,
            Self::Pro => 50,
            Self::Studio => 200,
        }
    }

    pub fn price_cents(self) -> u64 {
        match self {
            Self::Starter => 499,
            Self::Pro => 1999,
            Self::Studio => 4999,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Starter => "starter",
            Self::Pro => "pro",
            Self::Studio => "studio",
        }
    }
}

impl fmt::Display for CreditPackage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CreditPackage {
    type Err = AccountError;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        let normalized = raw.trim().to_ascii_lowercase();
        Self::ALL
            .into_iter()
            .find(|package| package.as_str() == normalized)
            .ok_or(AccountError::UnknownPackage(normalized))
    }
}

/// Single-session store held in memory; the embedding application swaps the
/// session in and out.
#[derive(Debug, Default)]
pub struct MemorySessionStore {
    session: Mutex<Option<UserSession>>,
}

impl MemorySessionStore {
    pub fn new(session: Option<UserSession>) -> Self {
        Self {
            session: Mutex::new(session),
        }
    }

    pub fn set(&self, session: Option<UserSession>) -> anyhow::Result<()> {
        let mut guard = self
            .session
            .lock()
            .map_err(|_| anyhow::anyhow!("session lock poisoned"))?;
        *guard = session;
        Ok(())
    }
}

impl SessionStore for MemorySessionStore {
    fn current(&self) -> anyhow::Result<Option<UserSession>> {
        let guard = self
            .session
            .lock()
            .map_err(|_| anyhow::anyhow!("session lock poisoned"))?;
        Ok(guard.clone())
    }

    fn debit(&self, user_id: &str, _reason: &str) -> anyhow::Result<Debit> {
        let mut guard = self
            .session
            .lock()
            .map_err(|_| anyhow::anyhow!("session lock poisoned"))?;
        match guard.as_mut() {
            Some(session) if session.user_id == user_id => {
                let charged = session.debit_one();
                Ok(Debit {
                    session: session.clone(),
                    charged,
                })
            }
            _ => Err(AccountError::UnknownUser(user_id.to_string()).into()),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct AccountsFile {
    #[serde(default)]
    users: Vec<AccountRecord>,
    #[serde(default)]
    current_user_id: Option<String>,
}

impl AccountsFile {
    fn find(&self, key: &str) -> Option<&AccountRecord> {
        self.users.iter().find(|record| record.matches(key))
    }

    fn find_mut(&mut self, key: &str) -> Option<&mut AccountRecord> {
        self.users.iter_mut().find(|record| record.matches(key))
    }

    fn require_admin(&self, actor: &UserSession) -> Result<(), AccountError> {
        match self.find(&actor.user_id) {
            Some(record) if record.role.is_privileged() && record.enabled => Ok(()),
            _ => Err(AccountError::NotAdmin),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct AccountRecord {
    id: String,
    email: String,
    name: String,
    password_sha256: String,
    role: Role,
    enabled: bool,
    credits: i64,
    created_at: String,
}

impl AccountRecord {
    fn matches(&self, key: &str) -> bool {
        self.id == key || self.email.eq_ignore_ascii_case(key.trim())
    }

    fn session(&self) -> UserSession {
        UserSession {
            user_id: self.id.clone(),
            email: self.email.clone(),
            name: self.name.clone(),
            role: self.role,
            enabled: self.enabled,
            credits: self.credits,
        }
    }
}

/// Accounts, credits and the signed-in user, persisted as `accounts.json`
/// next to a `transactions.jsonl` ledger.
#[derive(Debug)]
pub struct JsonSessionStore {
    path: PathBuf,
    ledger: TransactionLedger,
    signup_credits: i64,
    lock: Mutex<()>,
}

impl JsonSessionStore {
    pub fn open(dir: impl AsRef<Path>) -> Self {
        let dir = dir.as_ref();
        Self {
            path: dir.join("accounts.json"),
            ledger: TransactionLedger::new(dir.join("transactions.jsonl")),
            signup_credits: DEFAULT_SIGNUP_CREDITS,
            lock: Mutex::new(()),
        }
    }

    pub fn with_signup_credits(mut self, credits: i64) -> Self {
        self.signup_credits = credits.max(0);
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn ledger(&self) -> &TransactionLedger {
        &self.ledger
    }

    /// Creates an account and signs it in. The first account becomes admin.
    pub fn register(&self, email: &str, name: &str, password: &str) -> anyhow::Result<UserSession> {
        let email = email.trim().to_ascii_lowercase();
        if !is_plausible_email(&email) {
            return Err(AccountError::InvalidEmail(email).into());
        }
        if password.is_empty() {
            return Err(AccountError::EmptyPassword.into());
        }
        let signup_credits = self.signup_credits;
        let session = self.update(|accounts| {
            if accounts.find(&email).is_some() {
                return Err(AccountError::EmailTaken(email.clone()).into());
            }
            let role = if accounts.users.is_empty() {
                Role::Admin
            } else {
                Role::Standard
            };
            let display_name = if name.trim().is_empty() {
                email.split('@').next().unwrap_or_default().to_string()
            } else {
                name.trim().to_string()
            };
            let record = AccountRecord {
                id: Uuid::new_v4().to_string(),
                email: email.clone(),
                name: display_name,
                password_sha256: password_digest(&email, password),
                role,
                enabled: true,
                credits: signup_credits,
                created_at: now_utc_iso(),
            };
            let session = record.session();
            self.ledger.record(
                TransactionKind::Signup,
                &session.user_id,
                signup_credits,
                session.credits,
                None,
            )?;
            accounts.current_user_id = Some(record.id.clone());
            accounts.users.push(record);
            Ok(session)
        })?;
        Ok(session)
    }

    pub fn login(&self, email: &str, password: &str) -> anyhow::Result<UserSession> {
        let email = email.trim().to_ascii_lowercase();
        self.update(|accounts| {
            let session = match accounts.find(&email) {
                Some(record) if record.password_sha256 == password_digest(&email, password) => {
                    record.session()
                }
                _ => return Err(AccountError::InvalidCredentials.into()),
            };
            accounts.current_user_id = Some(session.user_id.clone());
            Ok(session)
        })
    }

    pub fn logout(&self) -> anyhow::Result<()> {
        self.update(|accounts| {
            accounts.current_user_id = None;
            Ok(())
        })
    }

    pub fn purchase(&self, user_id: &str, package: CreditPackage) -> anyhow::Result<UserSession> {
        self.update(|accounts| {
            let record = accounts
                .find_mut(user_id)
                .ok_or_else(|| AccountError::UnknownUser(user_id.to_string()))?;
            let balance = record.credits.max(0) + package.credits();
            self.ledger.record(
                TransactionKind::Purchase,
                &record.id,
                package.credits(),
                balance,
                Some(package.as_str()),
            )?;
            record.credits = balance;
            Ok(record.session())
        })
    }

    pub fn list_users(&self, actor: &UserSession) -> anyhow::Result<Vec<UserSession>> {
        let accounts = self.read()?;
        accounts.require_admin(actor)?;
        Ok(accounts.users.iter().map(AccountRecord::session).collect())
    }

    pub fn set_enabled(
        &self,
        actor: &UserSession,
        target: &str,
        enabled: bool,
    ) -> anyhow::Result<UserSession> {
        self.update(|accounts| {
            accounts.require_admin(actor)?;
            let record = accounts
                .find_mut(target)
                .ok_or_else(|| AccountError::UnknownUser(target.to_string()))?;
            if !enabled && record.id == actor.user_id {
                return Err(AccountError::SelfLockout.into());
            }
            record.enabled = enabled;
            Ok(record.session())
        })
    }

    /// Adds (or with a negative amount, removes) credits; the balance never drops below zero.
    pub fn grant_credits(
        &self,
        actor: &UserSession,
        target: &str,
        amount: i64,
    ) -> anyhow::Result<UserSession> {
        self.update(|accounts| {
            accounts.require_admin(actor)?;
            let record = accounts
                .find_mut(target)
                .ok_or_else(|| AccountError::UnknownUser(target.to_string()))?;
            let balance = (record.credits + amount).max(0);
            self.ledger.record(
                TransactionKind::Grant,
                &record.id,
                balance - record.credits,
                balance,
                Some(&format!("granted by {}", actor.email)),
            )?;
            record.credits = balance;
            Ok(record.session())
        })
    }

    fn read(&self) -> anyhow::Result<AccountsFile> {
        let _guard = self
            .lock
            .lock()
            .map_err(|_| anyhow::anyhow!("account store lock poisoned"))?;
        read_accounts(&self.path)
    }

    /// Read, mutate, write under the store lock. `apply` failing leaves
    /// `accounts.json` untouched, so ledger appends made inside it gate the write.
    fn update<T>(
        &self,
        apply: impl FnOnce(&mut AccountsFile) -> anyhow::Result<T>,
    ) -> anyhow::Result<T> {
        let _guard = self
            .lock
            .lock()
            .map_err(|_| anyhow::anyhow!("account store lock poisoned"))?;
        let mut accounts = read_accounts(&self.path)?;
        let out = apply(&mut accounts)?;
        write_accounts(&self.path, &accounts)?;
        Ok(out)
    }
}

impl SessionStore for JsonSessionStore {
    fn current(&self) -> anyhow::Result<Option<UserSession>> {
        let accounts = self.read()?;
        Ok(accounts
            .current_user_id
            .as_deref()
            .and_then(|id| accounts.find(id))
            .map(AccountRecord::session))
    }

    fn debit(&self, user_id: &str, reason: &str) -> anyhow::Result<Debit> {
        self.update(|accounts| {
            let record = accounts
                .find_mut(user_id)
                .ok_or_else(|| AccountError::UnknownUser(user_id.to_string()))?;
            let mut session = record.session();
            let charged = session.debit_one();
            if charged {
                self.ledger.record(
                    TransactionKind::Debit,
                    &session.user_id,
                    -1,
                    session.credits,
                    Some(reason),
                )?;
            }
            record.credits = session.credits;
            Ok(Debit { session, charged })
        })
    }
}

fn is_plausible_email(email: &str) -> bool {
    let Some((local, domain)) = email.split_once('@') else {
        return false;
    };
    !local.is_empty() && domain.contains('.') && !domain.starts_with('.') && !domain.ends_with('.')
}

fn password_digest(email: &str, password: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(email.as_bytes());
    hasher.update([0u8]);
    hasher.update(password.as_bytes());
    hex::encode(hasher.finalize())
}

fn read_accounts(path: &Path) -> anyhow::Result<AccountsFile> {
    let raw = match std::fs::read_to_string(path) {
        Ok(raw) => raw,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
            return Ok(AccountsFile::default())
        }
        Err(err) => return Err(err.into()),
    };
    Ok(serde_json::from_str(&raw)?)
}

fn write_accounts(path: &Path, accounts: &AccountsFile) -> anyhow::Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(path, serde_json::to_string_pretty(accounts)?)?;
    Ok(())
}

fn now_utc_iso() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Micros, false)
}
