//! Repository for the `inputs` table and calculation input links.

use chrono::Utc;
use hazrisk_core::hashing::ContentDigest;
use hazrisk_core::inputs::InputKind;
use hazrisk_core::types::DbId;

use crate::models::input::{Input, NewInput};
use crate::DbPool;

/// Column list for `inputs` queries. Content is fetched separately.
const COLUMNS: &str = "id, kind, digest, path, size, owner, last_update";

/// Content-addressed registry of uploaded model inputs.
pub struct InputRepo;

impl InputRepo {
    /// Store an input, or return the existing record with the same
    /// `(kind, digest)`.
    ///
    /// The existence check and insert are one statement, so two concurrent
    /// ingestions of the same content cannot both insert. With `force`
    /// a new record is always created.
    pub async fn ingest(pool: &DbPool, input: &NewInput, force: bool) -> Result<Input, sqlx::Error> {
        let digest = ContentDigest::of(&input.content);
        let kind = input.kind.as_str();

        let guard = if force {
            ""
        } else {
            "WHERE NOT EXISTS (SELECT 1 FROM inputs WHERE kind = $1 AND digest = $2)"
        };
        let query = format!(
            "INSERT INTO inputs (kind, digest, path, size, content, owner, last_update) \
             SELECT $1, $2, $3, $4, $5, $6, $7 {guard} \
             RETURNING {COLUMNS}"
        );
        let inserted = sqlx::query_as::<_, Input>(&query)
            .bind(kind)
            .bind(digest.as_str())
            .bind(&input.path)
            .bind(input.content.len() as i64)
            .bind(&input.content)
            .bind(&input.owner)
            .bind(Utc::now())
            .fetch_optional(pool)
            .await?;

        if let Some(row) = inserted {
            tracing::debug!(input_id = row.id, kind, path = %input.path, "Stored new input");
            return Ok(row);
        }

        let existing = Self::find_by_digest(pool, input.kind, digest.as_str())
            .await?
            .ok_or(sqlx::Error::RowNotFound)?;
        tracing::debug!(input_id = existing.id, kind, path = %input.path, "Reusing existing input");
        Ok(existing)
    }

    /// Most recent input with the given kind and digest.
    pub async fn find_by_digest(
        pool: &DbPool,
        kind: InputKind,
        digest: &str,
    ) -> Result<Option<Input>, sqlx::Error> {
        let query = format!(
            "SELECT {COLUMNS} FROM inputs WHERE kind = $1 AND digest = $2 \
             ORDER BY id DESC LIMIT 1"
        );
        sqlx::query_as::<_, Input>(&query)
            .bind(kind.as_str())
            .bind(digest)
            .fetch_optional(pool)
            .await
    }

    pub async fn find_by_id(pool: &DbPool, id: DbId) -> Result<Option<Input>, sqlx::Error> {
        let query = format!("SELECT {COLUMNS} FROM inputs WHERE id = $1");
        sqlx::query_as::<_, Input>(&query)
            .bind(id)
            .fetch_optional(pool)
            .await
    }

    /// Raw content of an input.
    pub async fn content(pool: &DbPool, id: DbId) -> Result<Option<Vec<u8>>, sqlx::Error> {
        sqlx::query_scalar::<_, Vec<u8>>("SELECT content FROM inputs WHERE id = $1")
            .bind(id)
            .fetch_optional(pool)
            .await
    }

    /// Link inputs to a calculation. Already-linked inputs are ignored.
    pub async fn link(
        pool: &DbPool,
        calculation_id: DbId,
        input_ids: &[DbId],
    ) -> Result<(), sqlx::Error> {
        let mut tx = pool.begin().await?;
        for input_id in input_ids {
            sqlx::query(
                "INSERT OR IGNORE INTO calculation_inputs (calculation_id, input_id) \
                 VALUES ($1, $2)",
            )
            .bind(calculation_id)
            .bind(input_id)
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;
        Ok(())
    }

    /// Inputs linked to a calculation, in ingestion order.
    pub async fn list_for_calculation(
        pool: &DbPool,
        calculation_id: DbId,
    ) -> Result<Vec<Input>, sqlx::Error> {
        let query = format!(
            "SELECT {COLUMNS} FROM inputs \
             WHERE id IN (SELECT input_id FROM calculation_inputs WHERE calculation_id = $1) \
             ORDER BY id"
        );
        sqlx::query_as::<_, Input>(&query)
            .bind(calculation_id)
            .fetch_all(pool)
            .await
    }
}
