use std::io::Write;
use std::path::{Path, PathBuf};

use chrono::{SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransactionKind {
    Signup,
    Purchase,
    Grant,
    Debit,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerEntry {
    pub transaction_id: String,
    pub ts: String,
    pub kind: TransactionKind,
    pub user_id: String,
    pub credits_delta: i64,
    pub balance_after: i64,
    pub detail: Option<String>,
}

/// Append-only `transactions.jsonl` of every credit movement.
#[derive(Debug, Clone)]
pub struct TransactionLedger {
    path: PathBuf,
}

impl TransactionLedger {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn record(
        &self,
        kind: TransactionKind,
        user_id: &str,
        credits_delta: i64,
        balance_after: i64,
        detail: Option<&str>,
    ) -> anyhow::Result<LedgerEntry> {
        let entry = LedgerEntry {
            transaction_id: Uuid::new_v4().to_string(),
            ts: now_utc_iso(),
            kind,
            user_id: user_id.to_string(),
            credits_delta,
            balance_after,
            detail: detail.map(str::to_string),
        };
        append_jsonl(&self.path, &entry)?;
        Ok(entry)
    }

    /// All entries, oldest first. A missing file is an empty ledger.
    pub fn entries(&self) -> anyhow::Result<Vec<LedgerEntry>> {
        let raw = match std::fs::read_to_string(&self.path) {
            Ok(raw) => raw,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(err) => return Err(err.into()),
        };
        Ok(raw
            .lines()
            .filter_map(|line| serde_json::from_str::<LedgerEntry>(line).ok())
            .collect())
    }

    pub fn entries_for(&self, user_id: &str) -> anyhow::Result<Vec<LedgerEntry>> {
        Ok(self
            .entries()?
            .into_iter()
            .filter(|entry| entry.user_id == user_id)
            .collect())
    }
}

fn append_jsonl(path: &Path, entry: &LedgerEntry) -> anyhow::Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let mut file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)?;
    file.write_all(serde_json::to_string(entry)?.as_bytes())?;
    file.write_all(b"\n")?;
    Ok(())
}

fn now_utc_iso() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Micros, false)
}

#[cfg(test)]
mod tests {
    use serde_json::Value;

    use super::{TransactionKind, TransactionLedger};

    #[test]
    fn ledger_appends_jsonl_record() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let path = temp.path().join("transactions.jsonl");
        let ledger = TransactionLedger::new(&path);

        let entry = ledger.record(TransactionKind::Purchase, "u-1", 10, 13, Some("starter"))?;
        assert_eq!(entry.credits_delta, 10);
        assert_eq!(entry.balance_after, 13);

        let raw = std::fs::read_to_string(&path)?;
        let line = raw.lines().next().unwrap_or("");
        let parsed: Value = serde_json::from_str(line)?;
        assert_eq!(parsed["kind"], Value::String("purchase".to_string()));
        assert_eq!(parsed["user_id"], Value::String("u-1".to_string()));
        assert_eq!(parsed["detail"], Value::String("starter".to_string()));
        assert!(parsed.get("ts").and_then(Value::as_str).is_some());
        Ok(())
    }

    #[test]
    fn entries_filter_by_user_and_tolerate_missing_file() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let ledger = TransactionLedger::new(temp.path().join("transactions.jsonl"));
        assert!(ledger.entries()?.is_empty());

        ledger.record(TransactionKind::Signup, "u-1", 3, 3, None)?;
        ledger.record(TransactionKind::Signup, "u-2", 3, 3, None)?;
        ledger.record(TransactionKind::Debit, "u-1", -1, 2, Some("edit"))?;

        let mine = ledger.entries_for("u-1")?;
        assert_eq!(mine.len(), 2);
        assert_eq!(mine[1].kind, TransactionKind::Debit);
        assert_eq!(ledger.entries()?.len(), 3);
        Ok(())
    }
}
