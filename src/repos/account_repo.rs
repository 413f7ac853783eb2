//! Read-only lookup against the chart of accounts
//!
//! The chart of accounts belongs to the accounting domain; the governance
//! core only resolves codes and asserts postability.

use chrono::{DateTime, Utc};
use sqlx::{FromRow, Sqlite, SqlitePool, Transaction};
use thiserror::Error;
use uuid::Uuid;

/// Account type enum matching the account_type column
#[derive(Debug, Clone, sqlx::Type, PartialEq, Eq)]
#[sqlx(rename_all = "lowercase")]
pub enum AccountType {
    Asset,
    Liability,
    Equity,
    Revenue,
    Expense,
}

/// Chart of Accounts entry as the gateway sees it
#[derive(Debug, Clone, FromRow)]
pub struct Account {
    pub id: Uuid,
    pub code: String,
    pub name: String,
    pub account_type: AccountType,
    pub is_active: bool,
    pub is_leaf: bool,
    pub is_postable: bool,
    pub created_at: DateTime<Utc>,
}

/// Errors that can occur during account resolution
#[derive(Debug, Error)]
pub enum AccountError {
    #[error("Account not found: code={code}")]
    NotFound { code: String },

    #[error("Account is inactive: code={code}")]
    Inactive { code: String },

    #[error("Account is a group account, not a leaf: code={code}")]
    NotLeaf { code: String },

    #[error("Account does not accept postings: code={code}")]
    NotPostable { code: String },

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),
}

const SELECT_ACCOUNT: &str = r#"
    SELECT id, code, name, account_type, is_active, is_leaf, is_postable, created_at
    FROM accounts
    WHERE code = $1
"#;

/// Look up an account by code, None if absent
pub async fn lookup_by_code(pool: &SqlitePool, code: &str) -> Result<Option<Account>, AccountError> {
    let account = sqlx::query_as::<_, Account>(SELECT_ACCOUNT)
        .bind(code)
        .fetch_optional(pool)
        .await?;

    Ok(account)
}

/// Look up an account by code within a transaction
pub async fn lookup_by_code_tx(
    tx: &mut Transaction<'_, Sqlite>,
    code: &str,
) -> Result<Option<Account>, AccountError> {
    let account = sqlx::query_as::<_, Account>(SELECT_ACCOUNT)
        .bind(code)
        .fetch_optional(&mut **tx)
        .await?;

    Ok(account)
}

fn assert_postable(account: Account) -> Result<Account, AccountError> {
    if !account.is_active {
        return Err(AccountError::Inactive { code: account.code });
    }
    if !account.is_leaf {
        return Err(AccountError::NotLeaf { code: account.code });
    }
    if !account.is_postable {
        return Err(AccountError::NotPostable { code: account.code });
    }
    Ok(account)
}

/// Resolve an account that lines may post against: active, leaf, postable
pub async fn find_postable_by_code_tx(
    tx: &mut Transaction<'_, Sqlite>,
    code: &str,
) -> Result<Account, AccountError> {
    let account = lookup_by_code_tx(tx, code)
        .await?
        .ok_or_else(|| AccountError::NotFound {
            code: code.to_string(),
        })?;

    assert_postable(account)
}
