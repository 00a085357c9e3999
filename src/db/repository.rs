//! Record repository
//!
//! All reads and writes against the dns_records table. Lookups case-fold the
//! owner name before comparison; writes store it lower-cased.

use chrono::Utc;
use sqlx::SqlitePool;
use tracing::debug;

use super::models::{NewRecord, RecordRow, StoredRecord};
use super::StoreError;
use crate::dns::message::{RecordData, RecordKind};

const SELECT_COLUMNS: &str = "id, kind, fqdn, alias, address, priority, ttl, updated_at";

pub struct RecordRepository {
    pool: SqlitePool,
}

impl RecordRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Search records by owner name, optionally restricted to `kinds`.
    ///
    /// When the search includes kind A and a CNAME row matches, the A rows of
    /// the CNAME target are appended to the result. Only one level of chasing
    /// is performed; the inner search is restricted to A and cannot recurse.
    pub async fn name_search(
        &self,
        hostname: &str,
        kinds: &[RecordKind],
    ) -> Result<Vec<StoredRecord>, StoreError> {
        let hostname = hostname.to_lowercase();

        let sql = if kinds.is_empty() {
            format!("SELECT {SELECT_COLUMNS} FROM dns_records WHERE fqdn = ? ORDER BY id")
        } else {
            let placeholders = vec!["?"; kinds.len()].join(", ");
            format!(
                "SELECT {SELECT_COLUMNS} FROM dns_records WHERE fqdn = ? AND kind IN ({placeholders}) ORDER BY id"
            )
        };

        let mut query = sqlx::query_as::<_, RecordRow>(&sql).bind(hostname.clone());
        for kind in kinds {
            query = query.bind(kind.to_string());
        }

        let rows = query.fetch_all(&self.pool).await?;
        let mut records = rows
            .into_iter()
            .map(StoredRecord::try_from)
            .collect::<Result<Vec<_>, _>>()?;

        if kinds.contains(&RecordKind::A) {
            let targets: Vec<String> = records
                .iter()
                .filter_map(|r| match &r.data {
                    RecordData::CNAME(target) => Some(target.clone()),
                    _ => None,
                })
                .collect();

            for target in targets {
                debug!("chasing CNAME {} -> {}", hostname, target);
                let chased = self.fetch_by_name(&target, &[RecordKind::A]).await?;
                records.extend(chased);
            }
        }

        Ok(records)
    }

    /// Single-level lookup without CNAME chasing
    async fn fetch_by_name(
        &self,
        hostname: &str,
        kinds: &[RecordKind],
    ) -> Result<Vec<StoredRecord>, StoreError> {
        let placeholders = vec!["?"; kinds.len()].join(", ");
        let sql = format!(
            "SELECT {SELECT_COLUMNS} FROM dns_records WHERE fqdn = ? AND kind IN ({placeholders}) ORDER BY id"
        );

        let mut query = sqlx::query_as::<_, RecordRow>(&sql).bind(hostname.to_lowercase());
        for kind in kinds {
            query = query.bind(kind.to_string());
        }

        let rows = query.fetch_all(&self.pool).await?;
        rows.into_iter().map(StoredRecord::try_from).collect()
    }

    /// Search records whose address column equals `address` (A/AAAA rows)
    pub async fn address_search(&self, address: &str) -> Result<Vec<StoredRecord>, StoreError> {
        let sql =
            format!("SELECT {SELECT_COLUMNS} FROM dns_records WHERE address = ? ORDER BY id");
        let rows = sqlx::query_as::<_, RecordRow>(&sql)
            .bind(address)
            .fetch_all(&self.pool)
            .await?;
        rows.into_iter().map(StoredRecord::try_from).collect()
    }

    /// Retrieve records of one kind by owner name
    pub async fn get_record_by_hostname(
        &self,
        fqdn: &str,
        kind: RecordKind,
    ) -> Result<Vec<StoredRecord>, StoreError> {
        self.name_search(fqdn, &[kind]).await
    }

    /// Insert a new row, never touching existing rows with the same key.
    /// Multiple rows per (kind, fqdn) are allowed (round-robin A).
    pub async fn create_record(&self, record: &NewRecord, fqdn: &str) -> Result<(), StoreError> {
        let fqdn = valid_owner_name(fqdn)?;
        let now = Utc::now();

        match &record.data {
            RecordData::A(ip) => {
                sqlx::query(
                    "INSERT INTO dns_records (kind, fqdn, address, ttl, updated_at) VALUES (?, ?, ?, ?, ?)",
                )
                .bind(RecordKind::A.to_string())
                .bind(&fqdn)
                .bind(ip.to_string())
                .bind(record.ttl as i64)
                .bind(now)
                .execute(&self.pool)
                .await?;
            }
            RecordData::AAAA(ip) => {
                sqlx::query(
                    "INSERT INTO dns_records (kind, fqdn, address, ttl, updated_at) VALUES (?, ?, ?, ?, ?)",
                )
                .bind(RecordKind::AAAA.to_string())
                .bind(&fqdn)
                .bind(ip.to_string())
                .bind(record.ttl as i64)
                .bind(now)
                .execute(&self.pool)
                .await?;
            }
            RecordData::CNAME(target) => {
                let target = valid_owner_name(target)?;
                sqlx::query(
                    "INSERT INTO dns_records (kind, fqdn, alias, ttl, updated_at) VALUES (?, ?, ?, ?, ?)",
                )
                .bind(RecordKind::CNAME.to_string())
                .bind(&fqdn)
                .bind(target)
                .bind(record.ttl as i64)
                .bind(now)
                .execute(&self.pool)
                .await?;
            }
            RecordData::MX { exchange, priority } => {
                let exchange = valid_owner_name(exchange)?;
                sqlx::query(
                    "INSERT INTO dns_records (kind, fqdn, alias, priority, ttl, updated_at) VALUES (?, ?, ?, ?, ?, ?)",
                )
                .bind(RecordKind::MX.to_string())
                .bind(&fqdn)
                .bind(exchange)
                .bind(*priority as i64)
                .bind(record.ttl as i64)
                .bind(now)
                .execute(&self.pool)
                .await?;
            }
            RecordData::NS(nameserver) => {
                let nameserver = valid_owner_name(nameserver)?;
                sqlx::query(
                    "INSERT INTO dns_records (kind, fqdn, alias, ttl, updated_at) VALUES (?, ?, ?, ?, ?)",
                )
                .bind(RecordKind::NS.to_string())
                .bind(&fqdn)
                .bind(nameserver)
                .bind(record.ttl as i64)
                .bind(now)
                .execute(&self.pool)
                .await?;
            }
            RecordData::SOA(_) => {
                return Err(StoreError::InvalidValue(
                    "SOA records cannot be created, they are synthesized".into(),
                ))
            }
        }

        Ok(())
    }

    /// Update rows in place. For A/AAAA every row matching (kind, fqdn) gets
    /// the new address and TTL. For CNAME/MX/NS the match key is the alias
    /// column and the owner name and TTL (and MX priority) are updated.
    ///
    /// Returns the number of rows modified; zero matches is not an error.
    pub async fn update_record(&self, record: &NewRecord, fqdn: &str) -> Result<u64, StoreError> {
        let fqdn = valid_owner_name(fqdn)?;
        let now = Utc::now();

        let result = match &record.data {
            RecordData::A(ip) => {
                sqlx::query(
                    "UPDATE dns_records SET address = ?, ttl = ?, updated_at = ? WHERE kind = ? AND fqdn = ?",
                )
                .bind(ip.to_string())
                .bind(record.ttl as i64)
                .bind(now)
                .bind(RecordKind::A.to_string())
                .bind(&fqdn)
                .execute(&self.pool)
                .await?
            }
            RecordData::AAAA(ip) => {
                sqlx::query(
                    "UPDATE dns_records SET address = ?, ttl = ?, updated_at = ? WHERE kind = ? AND fqdn = ?",
                )
                .bind(ip.to_string())
                .bind(record.ttl as i64)
                .bind(now)
                .bind(RecordKind::AAAA.to_string())
                .bind(&fqdn)
                .execute(&self.pool)
                .await?
            }
            RecordData::CNAME(target) => {
                let target = valid_owner_name(target)?;
                sqlx::query(
                    "UPDATE dns_records SET fqdn = ?, ttl = ?, updated_at = ? WHERE kind = ? AND alias = ?",
                )
                .bind(&fqdn)
                .bind(record.ttl as i64)
                .bind(now)
                .bind(RecordKind::CNAME.to_string())
                .bind(target)
                .execute(&self.pool)
                .await?
            }
            RecordData::MX { exchange, priority } => {
                let exchange = valid_owner_name(exchange)?;
                sqlx::query(
                    "UPDATE dns_records SET fqdn = ?, ttl = ?, priority = ?, updated_at = ? WHERE kind = ? AND alias = ?",
                )
                .bind(&fqdn)
                .bind(record.ttl as i64)
                .bind(*priority as i64)
                .bind(now)
                .bind(RecordKind::MX.to_string())
                .bind(exchange)
                .execute(&self.pool)
                .await?
            }
            RecordData::NS(nameserver) => {
                let nameserver = valid_owner_name(nameserver)?;
                sqlx::query(
                    "UPDATE dns_records SET fqdn = ?, ttl = ?, updated_at = ? WHERE kind = ? AND alias = ?",
                )
                .bind(&fqdn)
                .bind(record.ttl as i64)
                .bind(now)
                .bind(RecordKind::NS.to_string())
                .bind(nameserver)
                .execute(&self.pool)
                .await?
            }
            RecordData::SOA(_) => {
                return Err(StoreError::InvalidValue(
                    "SOA records cannot be updated, they are synthesized".into(),
                ))
            }
        };

        Ok(result.rows_affected())
    }

    /// Delete all rows of one kind matching the owner name.
    /// Returns the number of rows removed.
    pub async fn delete_record_by_hostname(
        &self,
        fqdn: &str,
        kind: RecordKind,
    ) -> Result<u64, StoreError> {
        let result = sqlx::query("DELETE FROM dns_records WHERE kind = ? AND fqdn = ?")
            .bind(kind.to_string())
            .bind(fqdn.to_lowercase())
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected())
    }

    /// All records in store order
    pub async fn list(&self) -> Result<Vec<StoredRecord>, StoreError> {
        let sql = format!("SELECT {SELECT_COLUMNS} FROM dns_records ORDER BY id");
        let rows = sqlx::query_as::<_, RecordRow>(&sql)
            .fetch_all(&self.pool)
            .await?;
        rows.into_iter().map(StoredRecord::try_from).collect()
    }
}

/// Owner names and alias targets are stored lower-cased; they must be
/// non-empty and contain only hostname characters.
fn valid_owner_name(name: &str) -> Result<String, StoreError> {
    if name.is_empty() || name.len() > 255 {
        return Err(StoreError::InvalidValue(format!(
            "invalid domain name: {name:?}"
        )));
    }
    let ok = name
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '.' || c == '_');
    if !ok {
        return Err(StoreError::InvalidValue(format!(
            "invalid domain name: {name:?}"
        )));
    }
    Ok(name.to_lowercase())
}
