//! Authoritative resolver
//!
//! Answers queries for owner names under the configured SOA domains and
//! signals "not mine" for everything else so the chain can forward. The
//! decision procedure is state-free; all record state lives in the store.

use std::collections::{BTreeSet, HashSet};
use std::sync::Arc;

use thiserror::Error;
use tracing::{debug, info, warn};

use crate::db::Database;
use crate::dns::message::{AnswerRecord, DnsQuery, RecordData, RecordKind, SoaData};

/// SOA record defaults used when synthesizing the zone apex record
const SOA_REFRESH: i32 = 46800;
const SOA_RETRY: i32 = 6200;
const SOA_EXPIRE: i32 = 3000000;
const SOA_MINIMUM: u32 = 300;

/// Resolver outcome that terminates or defers the chain
#[derive(Error, Debug)]
pub enum ResolveError {
    /// Not our zone; the chain should try the next resolver
    #[error("not authoritative for this name")]
    NotAuthoritative,

    /// Unsupported query type; the client gets NOTIMP
    #[error("unsupported query type")]
    NotImplemented,

    /// Our zone, but no matching record; the client gets NXDOMAIN
    #[error("authoritative, no matching record")]
    NoData,

    /// Store or synthesis failure in our zone; the client gets SERVFAIL
    #[error("authoritative lookup failed: {0}")]
    Failure(String),
}

/// The three response sections produced by one resolution
#[derive(Debug, Default)]
pub struct Sections {
    pub answers: Vec<AnswerRecord>,
    pub authority: Vec<AnswerRecord>,
    pub additional: Vec<AnswerRecord>,
}

/// The set of owner suffixes this server answers for.
///
/// Membership is tested against label suffixes. Every configured suffix
/// length is recorded at startup and probed longest-first, so nested zones
/// (`example.com` and `sub.example.com`) resolve to the most specific one.
#[derive(Debug, Clone)]
pub struct SoaSet {
    suffixes: HashSet<Vec<String>>,
    sizes: BTreeSet<usize>,
}

impl SoaSet {
    pub fn new<S: AsRef<str>>(domains: &[S]) -> Self {
        let mut suffixes = HashSet::new();
        let mut sizes = BTreeSet::new();

        for domain in domains {
            let labels: Vec<String> = domain
                .as_ref()
                .to_lowercase()
                .split('.')
                .filter(|l| !l.is_empty())
                .map(str::to_string)
                .collect();
            if labels.len() < 2 {
                warn!("ignoring SOA domain with fewer than two labels: {:?}", domain.as_ref());
                continue;
            }
            sizes.insert(labels.len());
            suffixes.insert(labels);
        }

        Self { suffixes, sizes }
    }

    /// The longest configured suffix matching `name`, joined with dots
    pub fn matching_suffix(&self, name: &str) -> Option<String> {
        let labels: Vec<String> = name
            .to_lowercase()
            .split('.')
            .filter(|l| !l.is_empty())
            .map(str::to_string)
            .collect();

        for size in self.sizes.iter().rev() {
            if labels.len() < *size {
                continue;
            }
            let suffix = labels[labels.len() - size..].to_vec();
            if self.suffixes.contains(&suffix) {
                return Some(suffix.join("."));
            }
        }

        None
    }

    pub fn contains_name(&self, name: &str) -> bool {
        self.matching_suffix(name).is_some()
    }

    pub fn is_empty(&self) -> bool {
        self.suffixes.is_empty()
    }
}

/// Authoritative resolver over the record store
pub struct AuthorityResolver {
    db: Arc<Database>,
    soa: Arc<SoaSet>,
    name_servers: Vec<String>,
    default_ttl: u32,
}

impl AuthorityResolver {
    pub fn new(
        db: Arc<Database>,
        soa: Arc<SoaSet>,
        name_servers: Vec<String>,
        default_ttl: u32,
    ) -> Self {
        Self {
            db,
            soa,
            name_servers,
            default_ttl,
        }
    }

    pub fn soa_set(&self) -> &Arc<SoaSet> {
        &self.soa
    }

    /// Resolve one query authoritatively.
    ///
    /// All three sections come from a single store read, so a concurrent
    /// write cannot tear the response.
    pub async fn resolve(&self, query: &DnsQuery) -> Result<Sections, ResolveError> {
        let name = query.name.to_lowercase();

        info!("looking up \"{}\" <{}>", name, query.query_type);

        let Some(soa_domain) = self.soa.matching_suffix(&name) else {
            debug!("not authoritative: \"{}\"", name);
            return Err(ResolveError::NotAuthoritative);
        };

        let Some(kind) = query.kind() else {
            // modern clients routinely ask for HTTPS (type 65); answer NOTIMP
            debug!("unsupported query type {} for \"{}\"", query.query_type, name);
            return Err(ResolveError::NotImplemented);
        };

        let mut sections = Sections::default();

        // an A search also surfaces CNAMEs so the chase is visible
        let query_kinds: Vec<RecordKind> = if kind == RecordKind::A {
            vec![RecordKind::A, RecordKind::CNAME]
        } else {
            vec![kind]
        };

        let mut synthesized = false;

        if kind == RecordKind::SOA {
            sections.answers.push(self.soa_record(&soa_domain));
            synthesized = true;
        }

        if kind == RecordKind::NS {
            for ns in &self.name_servers {
                sections.answers.push(self.ns_record(&soa_domain, ns));
            }
            synthesized = !self.name_servers.is_empty();
        }

        let records = self
            .db
            .records()
            .name_search(&name, &query_kinds)
            .await
            .map_err(|e| {
                warn!("storage engine error while looking up \"{}\": {}", name, e);
                ResolveError::Failure(e.to_string())
            })?;

        info!("matched [{}] records for \"{}\"", records.len(), name);

        for record in records {
            let ttl = if record.ttl > 0 {
                record.ttl
            } else {
                self.default_ttl
            };
            sections
                .answers
                .push(AnswerRecord::new(record.fqdn, record.data, ttl));
        }

        if sections.answers.is_empty() && !synthesized {
            debug!("no matching records in store for \"{}\"", name);
            return Err(ResolveError::NoData);
        }

        Ok(sections)
    }

    /// Synthesized start-of-authority record for the matched zone.
    /// The serial is fixed at zero; no secondary consumes it.
    fn soa_record(&self, soa_domain: &str) -> AnswerRecord {
        let mname = self
            .name_servers
            .first()
            .cloned()
            .unwrap_or_else(|| soa_domain.to_string());

        AnswerRecord::new(
            soa_domain,
            RecordData::SOA(SoaData {
                mname,
                rname: String::new(),
                serial: 0,
                refresh: SOA_REFRESH,
                retry: SOA_RETRY,
                expire: SOA_EXPIRE,
                minimum: SOA_MINIMUM,
            }),
            self.default_ttl,
        )
    }

    /// example.com. IN NS ns1.example.com. tells clients which server to ask
    fn ns_record(&self, soa_domain: &str, name_server: &str) -> AnswerRecord {
        AnswerRecord::new(
            soa_domain,
            RecordData::NS(name_server.to_string()),
            self.default_ttl,
        )
    }
}


#[cfg(test)]
mod property_tests {
    use super::*;
    use proptest::prelude::*;

    fn label() -> impl Strategy<Value = String> {
        "[a-z][a-z0-9]{0,8}"
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(100))]

        /// Any name ending in a configured suffix matches it; any name under
        /// a different apex does not.
        #[test]
        fn prop_suffix_matching(host in label(), apex in label(), other in label()) {
            prop_assume!(apex != other);

            let domain = format!("{apex}.com");
            let set = SoaSet::new(&[domain.as_str()]);

            let inside = format!("{host}.{apex}.com");
            prop_assert_eq!(set.matching_suffix(&inside), Some(domain.clone()));

            let outside = format!("{host}.{other}.com");
            prop_assert_eq!(set.matching_suffix(&outside), None);
        }

        /// Matching is insensitive to the case of the queried name.
        #[test]
        fn prop_suffix_matching_case_insensitive(host in label(), apex in label()) {
            let domain = format!("{apex}.com");
            let set = SoaSet::new(&[domain.as_str()]);

            let upper = format!("{}.{}.COM", host.to_uppercase(), apex.to_uppercase());
            prop_assert_eq!(set.matching_suffix(&upper), Some(domain));
        }
    }
}
