use std::str::FromStr;

use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::{QueryBuilder, Sqlite, SqlitePool};
use tracing::{debug, info};

use crate::config::INSERT_CHUNK_SIZE;
use crate::db::models::{ItemRow, StoredItemRow};
use crate::error::{AppError, Result};
use crate::types::Cell;

const COLUMNS: &str = "item_id, title, listing_url, category_id, price, item_condition, \
                       listing_time, item_specifics, seller_id, country, zip_code, image_url, \
                       sku, fetched_at";

/// Append-only SQLite destination for merged rows.
/// Held open for one cycle and closed explicitly at the end of it.
pub struct SqliteSink {
    pool: SqlitePool,
}

impl SqliteSink {
    /// Open (creating if needed) the database at `db_path` and apply migrations.
    /// `":memory:"` gives a private in-memory database.
    pub async fn open(db_path: &str) -> Result<Self> {
        let options =
            SqliteConnectOptions::from_str(&format!("sqlite:{db_path}"))?.create_if_missing(true);
        // One connection: the cycle is sequential, and an in-memory database
        // only lives as long as its connection.
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(options)
            .await?;
        sqlx::migrate!("./migrations").run(&pool).await?;
        info!("Database ready at {db_path}");
        Ok(Self { pool })
    }

    #[cfg(test)]
    pub(crate) fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Append `rows` to `table` in one transaction, committed before returning.
    pub async fn append(&self, table: &str, rows: &[ItemRow]) -> Result<u64> {
        validate_table_name(table)?;
        if rows.is_empty() {
            return Ok(0);
        }

        let mut tx = self.pool.begin().await?;
        let mut written = 0u64;

        for chunk in rows.chunks(INSERT_CHUNK_SIZE) {
            let mut qb: QueryBuilder<Sqlite> =
                QueryBuilder::new(format!("INSERT INTO {table} ({COLUMNS}) "));
            qb.push_values(chunk, |mut b, row| {
                b.push_bind(row.item_id.clone())
                    .push_bind(row.title.to_string())
                    .push_bind(row.listing_url.to_string())
                    .push_bind(row.category_id.clone());
                match &row.price {
                    Cell::Number(n) => b.push_bind(*n),
                    other => b.push_bind(other.to_string()),
                };
                b.push_bind(row.item_condition.to_string())
                    .push_bind(row.listing_time.to_string())
                    .push_bind(row.item_specifics.to_string())
                    .push_bind(row.seller_id.to_string())
                    .push_bind(row.country.to_string())
                    .push_bind(row.zip_code.to_string())
                    .push_bind(row.image_url.to_string())
                    .push_bind(row.sku.clone())
                    .push_bind(row.fetched_at.clone());
            });
            let result = qb.build().execute(&mut *tx).await?;
            written += result.rows_affected();
            debug!(table, rows = chunk.len(), "inserted chunk");
        }

        tx.commit().await?;
        Ok(written)
    }

    /// Read-back API for inspecting what earlier cycles committed: rows
    /// currently in `table`, oldest first.
    pub async fn stored_items(&self, table: &str) -> Result<Vec<StoredItemRow>> {
        validate_table_name(table)?;
        let rows = sqlx::query_as::<_, StoredItemRow>(&format!(
            "SELECT item_id, title, category_id, seller_id, image_url, sku, fetched_at \
             FROM {table} ORDER BY id"
        ))
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    pub async fn close(self) {
        self.pool.close().await;
    }
}

/// Table names are interpolated into SQL, so only plain identifiers pass.
fn validate_table_name(table: &str) -> Result<()> {
    let valid = !table.is_empty()
        && !table.starts_with(|c: char| c.is_ascii_digit())
        && table.chars().all(|c| c.is_ascii_alphanumeric() || c == '_');
    if valid {
        Ok(())
    } else {
        Err(AppError::Config(format!("invalid table name `{table}`")))
    }
}
