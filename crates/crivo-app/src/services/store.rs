//! Postgres persistence: `Document` status transitions and checklist rows.

use strum::{AsRefStr, Display, EnumString};
use thiserror::Error;
use tokio_postgres::NoTls;
use tokio_postgres::error::SqlState;
use tokio_postgres::types::Json;
use uuid::Uuid;

use crate::pipeline::Checklist;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error(transparent)]
    Postgres(#[from] tokio_postgres::Error),
    #[error(transparent)]
    Json(#[from] serde_json::Error),
    #[error("checklist already exists for document `{0}`")]
    DuplicateChecklist(String),
}

/// Document lifecycle; transitions are strictly
/// `pending → processing → (done | failed)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, EnumString, AsRefStr, Display)]
#[strum(serialize_all = "lowercase")]
pub enum DocumentStatus {
    Pending,
    Processing,
    Done,
    Failed,
}

/// Outcome of claiming a document for processing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessingClaim {
    Claimed,
    Absent,
    AlreadyDone,
}

pub struct DocumentStore {
    client: tokio_postgres::Client,
}

impl DocumentStore {
    pub async fn connect(database_url: &str) -> Result<Self, StoreError> {
        debug_assert!(!database_url.is_empty());
        let (client, connection) = tokio_postgres::connect(database_url, NoTls).await?;
        tokio::spawn(async move {
            if let Err(err) = connection.await {
                tracing::error!(error = %err, "postgres connection task ended");
            }
        });
        Ok(Self { client })
    }

    pub async fn status(&self, document_id: &str) -> Result<Option<DocumentStatus>, StoreError> {
        let row = self
            .client
            .query_opt(r#"SELECT status FROM "Document" WHERE id = $1"#, &[&document_id])
            .await?;
        Ok(row.and_then(|row| row.get::<_, String>(0).parse().ok()))
    }

    /// Moves the document into `processing`. A `done` document is never
    /// touched again; `pending`, `failed`, or a stale `processing` (crashed
    /// runner, redelivered message) are all claimable.
    pub async fn claim_processing(&self, document_id: &str) -> Result<ProcessingClaim, StoreError> {
        let updated = self
            .client
            .execute(
                r#"UPDATE "Document" SET status = 'processing' WHERE id = $1 AND status <> 'done'"#,
                &[&document_id],
            )
            .await?;
        if updated == 1 {
            return Ok(ProcessingClaim::Claimed);
        }
        match self.status(document_id).await? {
            None => Ok(ProcessingClaim::Absent),
            Some(_) => Ok(ProcessingClaim::AlreadyDone),
        }
    }

    pub async fn mark_done(&self, document_id: &str) -> Result<(), StoreError> {
        self.set_status(document_id, DocumentStatus::Done).await
    }

    pub async fn mark_failed(&self, document_id: &str) -> Result<(), StoreError> {
        self.set_status(document_id, DocumentStatus::Failed).await
    }

    async fn set_status(&self, document_id: &str, status: DocumentStatus) -> Result<(), StoreError> {
        self.client
            .execute(
                r#"UPDATE "Document" SET status = $2 WHERE id = $1"#,
                &[&document_id, &status.as_ref()],
            )
            .await?;
        Ok(())
    }

    /// Inserts the checklist row for a done document. The scalar columns are
    /// extracted from the checklist data; `Checklist.documentId UNIQUE` is
    /// the duplicate-delivery guard and surfaces as a typed error.
    pub async fn insert_checklist(
        &self,
        user_id: &str,
        file_name: &str,
        document_id: &str,
        checklist: &Checklist,
    ) -> Result<(), StoreError> {
        debug_assert!(!document_id.is_empty());

        let id = Uuid::new_v4().to_string();
        let data = serde_json::to_value(checklist)?;
        let orgao = non_empty(&checklist.edital.orgao);
        let objeto = non_empty(&checklist.edital.objeto);
        let valor_total = non_empty(&checklist.edital.total_reais);
        let pontuacao = i32::try_from(checklist.pontuacao).unwrap_or(0);

        let result = self
            .client
            .execute(
                r#"INSERT INTO "Checklist"
                       (id, "userId", file_name, data, pontuacao, orgao, objeto, valor_total, "documentId")
                   VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)"#,
                &[
                    &id,
                    &user_id,
                    &file_name,
                    &Json(&data),
                    &pontuacao,
                    &orgao,
                    &objeto,
                    &valor_total,
                    &document_id,
                ],
            )
            .await;

        match result {
            Ok(_) => {
                tracing::info!(document_id, checklist_id = %id, "checklist inserted");
                Ok(())
            }
            Err(err) if err.code() == Some(&SqlState::UNIQUE_VIOLATION) => {
                Err(StoreError::DuplicateChecklist(document_id.to_string()))
            }
            Err(err) => Err(err.into()),
        }
    }
}

fn non_empty(value: &str) -> Option<&str> {
    let trimmed = value.trim();
    (!trimmed.is_empty()).then_some(trimmed)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_strings_round_trip() {
        for status in [
            DocumentStatus::Pending,
            DocumentStatus::Processing,
            DocumentStatus::Done,
            DocumentStatus::Failed,
        ] {
            let text = status.as_ref();
            let parsed: DocumentStatus = text.parse().expect("status parses back");
            assert_eq!(parsed, status);
        }
        assert_eq!(DocumentStatus::Processing.as_ref(), "processing");
    }

    #[test]
    fn scalar_extraction_skips_blank_values() {
        assert_eq!(non_empty("  "), None);
        assert_eq!(non_empty("Prefeitura"), Some("Prefeitura"));
    }
}
