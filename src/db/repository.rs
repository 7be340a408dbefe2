//! Database repository for snapshots and correction proposals.
//!
//! Uses prepared statements and transactions for data integrity.

use chrono::{DateTime, Utc};
use sqlx::{Row, SqlitePool};

use crate::errors::AppError;
use crate::models::{CorrectionProposal, ProposalStatus, ProposedChange, Snapshot};

/// Database repository for all persisted data.
#[derive(Clone)]
pub struct Repository {
    pool: SqlitePool,
}

impl Repository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Get the current persisted revision.
    pub async fn get_revision(&self) -> Result<i64, AppError> {
        let row = sqlx::query("SELECT revision FROM meta WHERE id = 1")
            .fetch_one(&self.pool)
            .await?;
        Ok(row.get("revision"))
    }

    // ==================== SNAPSHOT OPERATIONS ====================

    /// Load the snapshot with the highest revision, if any was ever stored.
    pub async fn latest_snapshot(&self) -> Result<Option<Snapshot>, AppError> {
        let row = sqlx::query("SELECT body FROM snapshots ORDER BY revision DESC LIMIT 1")
            .fetch_optional(&self.pool)
            .await?;

        match row {
            Some(row) => {
                let body: String = row.get("body");
                let snapshot = serde_json::from_str(&body).map_err(|e| {
                    AppError::invariant(format!("Stored snapshot is unreadable: {}", e))
                })?;
                Ok(Some(snapshot))
            }
            None => Ok(None),
        }
    }

    /// Store the initial snapshot of an empty database.
    pub async fn seed_snapshot(&self, snapshot: &Snapshot) -> Result<(), AppError> {
        let body = serde_json::to_string(snapshot)?;
        let generated_at = snapshot.generated_at.to_rfc3339();

        let mut tx = self.pool.begin().await?;

        sqlx::query("INSERT INTO snapshots (revision, body, created_at) VALUES (?, ?, ?)")
            .bind(snapshot.revision)
            .bind(&body)
            .bind(&generated_at)
            .execute(&mut *tx)
            .await?;

        sqlx::query("UPDATE meta SET revision = ?, generated_at = ? WHERE id = 1")
            .bind(snapshot.revision)
            .bind(&generated_at)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(())
    }

    // ==================== PROPOSAL OPERATIONS ====================

    /// Insert a new pending proposal.
    pub async fn insert_proposal(&self, proposal: &CorrectionProposal) -> Result<(), AppError> {
        let change_json = serde_json::to_string(&proposal.proposed_change)?;

        sqlx::query(
            "INSERT INTO proposals (id, target_kind, target_id, change_json, reporter_token, description, submitted_at, status) VALUES (?, ?, ?, ?, ?, ?, ?, ?)"
        )
        .bind(&proposal.id)
        .bind(proposal.target.kind.as_str())
        .bind(&proposal.target.id)
        .bind(&change_json)
        .bind(&proposal.reporter_token)
        .bind(&proposal.description)
        .bind(proposal.submitted_at.to_rfc3339())
        .bind(proposal.status.as_str())
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Get a proposal by ID.
    pub async fn get_proposal(&self, id: &str) -> Result<Option<CorrectionProposal>, AppError> {
        let row = sqlx::query(
            "SELECT id, change_json, reporter_token, description, submitted_at, status, resolved_at, resolved_revision FROM proposals WHERE id = ?"
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(proposal_from_row).transpose()
    }

    /// List proposals, oldest first, optionally filtered by status.
    pub async fn list_proposals(
        &self,
        status: Option<ProposalStatus>,
    ) -> Result<Vec<CorrectionProposal>, AppError> {
        let rows = match status {
            Some(status) => {
                sqlx::query(
                    "SELECT id, change_json, reporter_token, description, submitted_at, status, resolved_at, resolved_revision FROM proposals WHERE status = ? ORDER BY submitted_at"
                )
                .bind(status.as_str())
                .fetch_all(&self.pool)
                .await?
            }
            None => {
                sqlx::query(
                    "SELECT id, change_json, reporter_token, description, submitted_at, status, resolved_at, resolved_revision FROM proposals ORDER BY submitted_at"
                )
                .fetch_all(&self.pool)
                .await?
            }
        };

        rows.iter().map(proposal_from_row).collect()
    }

    /// Persist an accepted proposal together with the revision it produced.
    ///
    /// Everything happens in one transaction; any failure rolls back and the
    /// previous revision stays current.
    pub async fn commit_accepted(
        &self,
        proposal_id: &str,
        snapshot: &Snapshot,
        resolved_at: DateTime<Utc>,
    ) -> Result<(), AppError> {
        let body = serde_json::to_string(snapshot)?;
        let now = resolved_at.to_rfc3339();

        let mut tx = self.pool.begin().await?;

        // Guard against a concurrent writer that bypassed the store's apply lock.
        let bumped = sqlx::query(
            "UPDATE meta SET revision = ?, generated_at = ? WHERE id = 1 AND revision = ?",
        )
        .bind(snapshot.revision)
        .bind(&now)
        .bind(snapshot.revision - 1)
        .execute(&mut *tx)
        .await?;

        if bumped.rows_affected() == 0 {
            return Err(AppError::invariant(format!(
                "Revision {} is not the successor of the stored revision",
                snapshot.revision
            )));
        }

        sqlx::query("INSERT INTO snapshots (revision, body, created_at) VALUES (?, ?, ?)")
            .bind(snapshot.revision)
            .bind(&body)
            .bind(&now)
            .execute(&mut *tx)
            .await?;

        let resolved = sqlx::query(
            "UPDATE proposals SET status = 'accepted', resolved_at = ?, resolved_revision = ? WHERE id = ? AND status = 'pending'",
        )
        .bind(&now)
        .bind(snapshot.revision)
        .bind(proposal_id)
        .execute(&mut *tx)
        .await?;

        if resolved.rows_affected() == 0 {
            return Err(AppError::InvalidState(format!(
                "Proposal {} is no longer pending",
                proposal_id
            )));
        }

        tx.commit().await?;
        Ok(())
    }

    /// Mark a pending proposal rejected.
    pub async fn commit_rejected(
        &self,
        proposal_id: &str,
        resolved_at: DateTime<Utc>,
    ) -> Result<(), AppError> {
        let result = sqlx::query(
            "UPDATE proposals SET status = 'rejected', resolved_at = ? WHERE id = ? AND status = 'pending'",
        )
        .bind(resolved_at.to_rfc3339())
        .bind(proposal_id)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(AppError::InvalidState(format!(
                "Proposal {} is no longer pending",
                proposal_id
            )));
        }
        Ok(())
    }
}

// Helper functions for row conversion

fn proposal_from_row(row: &sqlx::sqlite::SqliteRow) -> Result<CorrectionProposal, AppError> {
    let id: String = row.get("id");
    let change_json: String = row.get("change_json");
    let status_str: String = row.get("status");
    let submitted_at: String = row.get("submitted_at");
    let resolved_at: Option<String> = row.get("resolved_at");

    let proposed_change: ProposedChange = serde_json::from_str(&change_json)
        .map_err(|e| AppError::invariant(format!("Proposal {} has unreadable change: {}", id, e)))?;
    let status = ProposalStatus::parse(&status_str).ok_or_else(|| {
        AppError::invariant(format!("Proposal {} has unknown status {}", id, status_str))
    })?;

    Ok(CorrectionProposal {
        target: proposed_change.target(),
        proposed_change,
        reporter_token: row.get("reporter_token"),
        description: row.get("description"),
        submitted_at: parse_timestamp(&submitted_at)?,
        status,
        resolved_at: resolved_at.as_deref().map(parse_timestamp).transpose()?,
        resolved_revision: row.get("resolved_revision"),
        id,
    })
}

fn parse_timestamp(s: &str) -> Result<DateTime<Utc>, AppError> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| AppError::invariant(format!("Stored timestamp '{}' is invalid: {}", s, e)))
}
