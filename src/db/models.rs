//! Record store models
//!
//! Row-level and typed views of the dns_records table.

use chrono::{DateTime, Utc};
use sqlx::FromRow;

use super::StoreError;
use crate::dns::message::{RecordData, RecordKind};

/// Raw database row for a DNS record
#[derive(Debug, Clone, FromRow)]
pub struct RecordRow {
    pub id: i64,
    pub kind: String,
    pub fqdn: String,
    pub alias: Option<String>,
    pub address: Option<String>,
    pub priority: Option<i64>,
    pub ttl: i64,
    pub updated_at: DateTime<Utc>,
}

/// A typed record as read back from the store
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredRecord {
    /// Owner name, always lower-case
    pub fqdn: String,
    pub data: RecordData,
    /// 0 means "use the server default at answer time"
    pub ttl: u32,
    pub updated_at: DateTime<Utc>,
}

impl StoredRecord {
    pub fn kind(&self) -> RecordKind {
        self.data.kind()
    }
}

impl TryFrom<RecordRow> for StoredRecord {
    type Error = StoreError;

    fn try_from(row: RecordRow) -> Result<Self, Self::Error> {
        let kind: RecordKind = row
            .kind
            .parse()
            .map_err(|_| StoreError::InvalidKind(row.kind.clone()))?;

        let data = match kind {
            RecordKind::A => {
                let address = row
                    .address
                    .as_deref()
                    .ok_or_else(|| StoreError::InvalidValue("A row without address".into()))?;
                RecordData::A(address.parse().map_err(|_| {
                    StoreError::InvalidValue(format!("not an IPv4 address: {address}"))
                })?)
            }
            RecordKind::AAAA => {
                let address = row
                    .address
                    .as_deref()
                    .ok_or_else(|| StoreError::InvalidValue("AAAA row without address".into()))?;
                RecordData::AAAA(address.parse().map_err(|_| {
                    StoreError::InvalidValue(format!("not an IPv6 address: {address}"))
                })?)
            }
            RecordKind::CNAME => RecordData::CNAME(
                row.alias
                    .clone()
                    .ok_or_else(|| StoreError::InvalidValue("CNAME row without alias".into()))?,
            ),
            RecordKind::MX => RecordData::MX {
                exchange: row
                    .alias
                    .clone()
                    .ok_or_else(|| StoreError::InvalidValue("MX row without alias".into()))?,
                priority: row.priority.unwrap_or(0) as u16,
            },
            RecordKind::NS => RecordData::NS(
                row.alias
                    .clone()
                    .ok_or_else(|| StoreError::InvalidValue("NS row without alias".into()))?,
            ),
            // SOA answers are synthesized by the resolver, never stored
            RecordKind::SOA => {
                return Err(StoreError::InvalidValue(
                    "SOA records are not representable as rows".into(),
                ))
            }
        };

        Ok(StoredRecord {
            fqdn: row.fqdn,
            data,
            ttl: row.ttl.max(0) as u32,
            updated_at: row.updated_at,
        })
    }
}

/// A record to write, paired with an owner name at the call site
#[derive(Debug, Clone)]
pub struct NewRecord {
    pub data: RecordData,
    pub ttl: u32,
}

impl NewRecord {
    pub fn new(data: RecordData, ttl: u32) -> Self {
        Self { data, ttl }
    }
}
