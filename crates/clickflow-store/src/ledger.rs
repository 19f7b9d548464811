//! Token ledger — per-user quota balances.
//!
//! The consume path is a single conditional UPDATE, so the floor-at-zero
//! guarantee holds under concurrent consumers without any application lock.

use std::path::Path;

use chrono::Utc;
use clickflow_core::error::{ClickflowError, Result};

/// Result of a balance pre-check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BalanceCheck {
    pub sufficient: bool,
    pub balance: u32,
}

/// SQLite-backed per-user token balances with a consumption audit trail.
pub struct TokenLedger {
    conn: rusqlite::Connection,
}

impl TokenLedger {
    /// Open or create the ledger database. Safe to point at the same file
    /// as the plan store — the tables are disjoint.
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let conn = rusqlite::Connection::open(path)
            .map_err(|e| ClickflowError::Ledger(format!("DB open: {e}")))?;
        conn.busy_timeout(std::time::Duration::from_secs(5))
            .map_err(|e| ClickflowError::Ledger(format!("DB busy timeout: {e}")))?;
        let ledger = Self { conn };
        ledger.migrate()?;
        Ok(ledger)
    }

    fn migrate(&self) -> Result<()> {
        self.conn
            .execute_batch(
                "
            CREATE TABLE IF NOT EXISTS token_balances (
                user_id TEXT PRIMARY KEY,
                balance INTEGER NOT NULL DEFAULT 0,
                updated_at TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS token_audit (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                user_id TEXT NOT NULL,
                delta INTEGER NOT NULL,          -- negative = consumed
                context TEXT NOT NULL DEFAULT '',
                created_at TEXT NOT NULL
            );
         ",
            )
            .map_err(|e| ClickflowError::Ledger(format!("Migration: {e}")))?;
        Ok(())
    }

    /// Current balance; unknown users read as zero.
    pub fn balance(&self, user_id: &str) -> Result<u32> {
        let result = self.conn.query_row(
            "SELECT balance FROM token_balances WHERE user_id = ?1",
            [user_id],
            |row| row.get::<_, u32>(0),
        );
        match result {
            Ok(balance) => Ok(balance),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(0),
            Err(e) => Err(ClickflowError::Ledger(format!("Balance lookup: {e}"))),
        }
    }

    /// Check whether `required` tokens are available.
    pub fn check_balance(&self, user_id: &str, required: u32) -> Result<BalanceCheck> {
        let balance = self.balance(user_id)?;
        Ok(BalanceCheck {
            sufficient: balance >= required,
            balance,
        })
    }

    /// Consume `amount` tokens. Returns `false` (consuming nothing) when the
    /// balance is insufficient — atomic, never drives a balance negative.
    pub fn consume(&self, user_id: &str, amount: u32, context: &str) -> Result<bool> {
        let changed = self
            .conn
            .execute(
                "UPDATE token_balances
                 SET balance = balance - ?1, updated_at = ?2
                 WHERE user_id = ?3 AND balance >= ?1",
                rusqlite::params![amount, Utc::now().to_rfc3339(), user_id],
            )
            .map_err(|e| ClickflowError::Ledger(format!("Consume: {e}")))?;

        if changed == 0 {
            return Ok(false);
        }
        self.audit(user_id, -(amount as i64), context)?;
        Ok(true)
    }

    /// Grant tokens to a user, creating the account on first grant.
    /// Returns the new balance.
    pub fn grant(&self, user_id: &str, amount: u32, context: &str) -> Result<u32> {
        self.conn
            .execute(
                "INSERT INTO token_balances (user_id, balance, updated_at)
                 VALUES (?1, ?2, ?3)
                 ON CONFLICT(user_id) DO UPDATE SET
                     balance = balance + excluded.balance,
                     updated_at = excluded.updated_at",
                rusqlite::params![user_id, amount, Utc::now().to_rfc3339()],
            )
            .map_err(|e| ClickflowError::Ledger(format!("Grant: {e}")))?;
        self.audit(user_id, amount as i64, context)?;
        self.balance(user_id)
    }

    fn audit(&self, user_id: &str, delta: i64, context: &str) -> Result<()> {
        self.conn
            .execute(
                "INSERT INTO token_audit (user_id, delta, context, created_at)
                 VALUES (?1, ?2, ?3, ?4)",
                rusqlite::params![user_id, delta, context, Utc::now().to_rfc3339()],
            )
            .map_err(|e| ClickflowError::Ledger(format!("Audit: {e}")))?;
        Ok(())
    }

    /// Recent audit entries for a user: `(delta, context)`, newest first.
    pub fn audit_trail(&self, user_id: &str, limit: usize) -> Vec<(i64, String)> {
        let mut stmt = match self.conn.prepare(
            "SELECT delta, context FROM token_audit
             WHERE user_id = ?1 ORDER BY id DESC LIMIT ?2",
        ) {
            Ok(s) => s,
            Err(_) => return Vec::new(),
        };
        let rows = stmt
            .query_map(rusqlite::params![user_id, limit as i64], |row| {
                Ok((row.get::<_, i64>(0)?, row.get::<_, String>(1)?))
            })
            .ok();
        rows.map(|r| r.filter_map(|x| x.ok()).collect())
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_ledger(name: &str) -> (TokenLedger, std::path::PathBuf) {
        let dir = std::env::temp_dir().join(format!("clickflow-ledger-{name}"));
        std::fs::remove_dir_all(&dir).ok();
        std::fs::create_dir_all(&dir).ok();
        (TokenLedger::open(&dir.join("ledger.db")).unwrap(), dir)
    }

    #[test]
    fn test_unknown_user_reads_zero() {
        let (ledger, dir) = temp_ledger("zero");
        assert_eq!(ledger.balance("nobody").unwrap(), 0);
        let check = ledger.check_balance("nobody", 1).unwrap();
        assert!(!check.sufficient);
        assert_eq!(check.balance, 0);
        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_grant_and_consume() {
        let (ledger, dir) = temp_ledger("grant");
        assert_eq!(ledger.grant("u1", 10, "topup").unwrap(), 10);
        assert_eq!(ledger.grant("u1", 5, "topup").unwrap(), 15);

        assert!(ledger.consume("u1", 4, "visit").unwrap());
        assert_eq!(ledger.balance("u1").unwrap(), 11);

        let trail = ledger.audit_trail("u1", 10);
        assert_eq!(trail.len(), 3);
        assert_eq!(trail[0].0, -4);
        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_balance_never_negative() {
        let (ledger, dir) = temp_ledger("floor");
        ledger.grant("u1", 3, "topup").unwrap();

        // Over-consume attempts fail without partial deduction
        assert!(!ledger.consume("u1", 4, "visit").unwrap());
        assert_eq!(ledger.balance("u1").unwrap(), 3);

        // Drain exactly to zero, one unit at a time
        for _ in 0..3 {
            assert!(ledger.consume("u1", 1, "visit").unwrap());
        }
        assert_eq!(ledger.balance("u1").unwrap(), 0);
        assert!(!ledger.consume("u1", 1, "visit").unwrap());
        assert_eq!(ledger.balance("u1").unwrap(), 0);
        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_concurrent_consumers_respect_floor() {
        let dir = std::env::temp_dir().join("clickflow-ledger-concurrent");
        std::fs::remove_dir_all(&dir).ok();
        std::fs::create_dir_all(&dir).ok();
        let path = dir.join("ledger.db");

        let ledger = TokenLedger::open(&path).unwrap();
        ledger.grant("u1", 50, "topup").unwrap();

        // Two handles on the same file race to drain one account; the
        // conditional UPDATE must hand out exactly the granted amount.
        let mut workers = Vec::new();
        for _ in 0..2 {
            let path = path.clone();
            workers.push(std::thread::spawn(move || {
                let ledger = TokenLedger::open(&path).unwrap();
                let mut consumed = 0u32;
                for _ in 0..40 {
                    if ledger.consume("u1", 1, "visit").unwrap() {
                        consumed += 1;
                    }
                }
                consumed
            }));
        }
        let total: u32 = workers.into_iter().map(|w| w.join().unwrap()).sum();

        assert_eq!(total, 50);
        assert_eq!(ledger.balance("u1").unwrap(), 0);
        assert!(!ledger.consume("u1", 1, "visit").unwrap());
        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_consume_for_unknown_user_fails() {
        let (ledger, dir) = temp_ledger("unknown");
        assert!(!ledger.consume("ghost", 1, "visit").unwrap());
        std::fs::remove_dir_all(&dir).ok();
    }
}
