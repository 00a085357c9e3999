//! Resolver chain
//!
//! Ordered stages: authority, then cache, then forwarder. Each stage either
//! answers, defers to the next stage, or terminates the query with a
//! client-facing response code. A stage defers only when the authority is
//! not responsible for the name; every other outcome is final.

use std::sync::Arc;

use tracing::{debug, info, warn};

use super::authority::{AuthorityResolver, ResolveError};
use super::cache::{CacheKey, DnsCache};
use super::forwarder::Forwarder;
use super::message::{DnsQuery, DnsResponse};

/// One stage of the chain
pub enum Stage {
    Authority(Arc<AuthorityResolver>),
    Cache(Arc<DnsCache>),
    Forwarder(Arc<Forwarder>),
}

/// What a stage decided about a query
enum StageOutcome {
    /// Final answer, stop the fold
    Answered(DnsResponse),
    /// Not this stage's query, try the next one
    Forward,
}

/// The resolver chain owned by the DNS listeners
pub struct ResolverChain {
    stages: Vec<Stage>,
    /// RA flag on every response: true when a forwarder stage exists
    recursion_available: bool,
}

impl ResolverChain {
    pub fn new(stages: Vec<Stage>) -> Self {
        let recursion_available = stages
            .iter()
            .any(|s| matches!(s, Stage::Forwarder(_)));
        Self {
            stages,
            recursion_available,
        }
    }

    /// Resolve a query to a complete response. Never fails; every error kind
    /// maps to a response code.
    pub async fn resolve(&self, query: &DnsQuery) -> DnsResponse {
        for stage in &self.stages {
            match self.run_stage(stage, query).await {
                StageOutcome::Answered(mut response) => {
                    response.id = query.id;
                    response.recursion_available = self.recursion_available;
                    return response;
                }
                StageOutcome::Forward => continue,
            }
        }

        // nobody could answer: not our zone and no forwarder configured
        debug!("no stage answered \"{}\"", query.name);
        let mut response = DnsResponse::nxdomain(query.id);
        response.recursion_available = self.recursion_available;
        response
    }

    async fn run_stage(&self, stage: &Stage, query: &DnsQuery) -> StageOutcome {
        match stage {
            Stage::Authority(authority) => match authority.resolve(query).await {
                Ok(sections) => {
                    let mut response = DnsResponse::new(query.id);
                    response.authoritative = true;
                    response.answers = sections.answers;
                    response.authority = sections.authority;
                    response.additional = sections.additional;
                    StageOutcome::Answered(response)
                }
                Err(ResolveError::NotAuthoritative) => StageOutcome::Forward,
                Err(ResolveError::NotImplemented) => {
                    StageOutcome::Answered(DnsResponse::notimp(query.id))
                }
                Err(ResolveError::NoData) => {
                    let mut response = DnsResponse::nxdomain(query.id);
                    response.authoritative = true;
                    StageOutcome::Answered(response)
                }
                Err(ResolveError::Failure(reason)) => {
                    warn!("authoritative failure for \"{}\": {}", query.name, reason);
                    StageOutcome::Answered(DnsResponse::servfail(query.id))
                }
            },
            Stage::Cache(cache) => {
                let key = CacheKey::from_query(query);
                match cache.get(&key).await {
                    Some(response) => {
                        info!("cache hit for \"{}\" <{}>", query.name, query.query_type);
                        StageOutcome::Answered(response)
                    }
                    None => StageOutcome::Forward,
                }
            }
            Stage::Forwarder(forwarder) => match forwarder.query(query).await {
                Ok(response) => {
                    let values: Vec<String> =
                        response.answers.iter().map(|a| a.data.value()).collect();
                    info!(
                        "forwarded \"{}\" <{}>: {}",
                        query.name,
                        query.query_type,
                        if values.is_empty() {
                            response.response_code.to_string()
                        } else {
                            values.join(", ")
                        }
                    );
                    self.cache_forwarded(query, &response).await;
                    StageOutcome::Answered(response)
                }
                Err(e) => {
                    warn!("forwarding failed for \"{}\": {}", query.name, e);
                    StageOutcome::Answered(DnsResponse::servfail(query.id))
                }
            },
        }
    }

    /// Remember a forwarded answer in the cache stage, if one is configured
    async fn cache_forwarded(&self, query: &DnsQuery, response: &DnsResponse) {
        for stage in &self.stages {
            if let Stage::Cache(cache) = stage {
                cache
                    .insert(CacheKey::from_query(query), response.clone())
                    .await;
                return;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{Database, NewRecord};
    use crate::dns::authority::SoaSet;
    use crate::dns::message::{AnswerRecord, RecordData};
    use hickory_proto::op::ResponseCode;
    use hickory_proto::rr::RecordType;
    use tempfile::tempdir;

    async fn authority_stage(soa_domains: &[&str]) -> (Stage, Arc<Database>, tempfile::TempDir) {
        let dir = tempdir().unwrap();
        let db = Arc::new(Database::open(&dir.path().join("test.sqlite")).await.unwrap());
        let soa = Arc::new(SoaSet::new(soa_domains));
        let authority = Arc::new(AuthorityResolver::new(
            db.clone(),
            soa,
            vec!["ns1.example.com".to_string()],
            300,
        ));
        (Stage::Authority(authority), db, dir)
    }

    #[tokio::test]
    async fn test_authoritative_answer_sets_aa() {
        let (stage, db, _dir) = authority_stage(&["example.com"]).await;
        db.records()
            .create_record(
                &NewRecord::new(RecordData::A("10.0.0.5".parse().unwrap()), 300),
                "host.example.com",
            )
            .await
            .unwrap();

        let chain = ResolverChain::new(vec![stage]);
        let query = DnsQuery::new(11, "host.example.com", RecordType::A);
        let response = chain.resolve(&query).await;

        assert_eq!(response.id, 11);
        assert!(response.authoritative);
        assert!(!response.recursion_available);
        assert_eq!(response.answers.len(), 1);
    }

    #[tokio::test]
    async fn test_authoritative_no_data_is_nxdomain() {
        let (stage, _db, _dir) = authority_stage(&["example.com"]).await;
        let chain = ResolverChain::new(vec![stage]);

        let query = DnsQuery::new(1, "missing.example.com", RecordType::A);
        let response = chain.resolve(&query).await;
        assert_eq!(response.response_code, ResponseCode::NXDomain);
        assert!(response.authoritative);
    }

    #[tokio::test]
    async fn test_unknown_type_is_notimp() {
        let (stage, _db, _dir) = authority_stage(&["example.com"]).await;
        let chain = ResolverChain::new(vec![stage]);

        let query = DnsQuery::new(1, "host.example.com", RecordType::HTTPS);
        let response = chain.resolve(&query).await;
        assert_eq!(response.response_code, ResponseCode::NotImp);
    }

    #[tokio::test]
    async fn test_foreign_name_without_forwarder_is_nxdomain() {
        let (stage, _db, _dir) = authority_stage(&["example.com"]).await;
        let chain = ResolverChain::new(vec![stage]);

        let query = DnsQuery::new(1, "something.other.net", RecordType::A);
        let response = chain.resolve(&query).await;
        assert_eq!(response.response_code, ResponseCode::NXDomain);
        assert!(!response.authoritative);
    }

    #[tokio::test]
    async fn test_cache_stage_answers_after_authority_defers() {
        let (stage, _db, _dir) = authority_stage(&["example.com"]).await;
        let cache = Arc::new(DnsCache::new());

        let mut cached = DnsResponse::new(0);
        cached.add_answer(AnswerRecord::new(
            "hit.other.net",
            RecordData::A("9.9.9.9".parse().unwrap()),
            60,
        ));
        cache
            .insert(CacheKey::new("hit.other.net", RecordType::A), cached)
            .await;

        let chain = ResolverChain::new(vec![stage, Stage::Cache(cache)]);
        let query = DnsQuery::new(31, "hit.other.net", RecordType::A);
        let response = chain.resolve(&query).await;

        assert_eq!(response.id, 31);
        assert_eq!(response.answers.len(), 1);
        assert_eq!(response.answers[0].data.value(), "9.9.9.9");
    }

    #[tokio::test]
    async fn test_authority_short_circuits_before_cache() {
        let (stage, db, _dir) = authority_stage(&["example.com"]).await;
        db.records()
            .create_record(
                &NewRecord::new(RecordData::A("10.0.0.1".parse().unwrap()), 300),
                "host.example.com",
            )
            .await
            .unwrap();

        // poison the cache with a different answer for the same key
        let cache = Arc::new(DnsCache::new());
        let mut stale = DnsResponse::new(0);
        stale.add_answer(AnswerRecord::new(
            "host.example.com",
            RecordData::A("6.6.6.6".parse().unwrap()),
            60,
        ));
        cache
            .insert(CacheKey::new("host.example.com", RecordType::A), stale)
            .await;

        let chain = ResolverChain::new(vec![stage, Stage::Cache(cache)]);
        let query = DnsQuery::new(1, "host.example.com", RecordType::A);
        let response = chain.resolve(&query).await;

        assert_eq!(response.answers[0].data.value(), "10.0.0.1");
        assert!(response.authoritative);
    }

    #[tokio::test]
    async fn test_ra_set_when_forwarder_configured() {
        let (stage, db, _dir) = authority_stage(&["example.com"]).await;
        db.records()
            .create_record(
                &NewRecord::new(RecordData::A("10.0.0.1".parse().unwrap()), 300),
                "host.example.com",
            )
            .await
            .unwrap();

        // forwarder pointed at a dead address; never consulted for our zone
        let forwarder = Arc::new(Forwarder::new(&["127.0.0.1:1"], &[1]).unwrap());
        let chain = ResolverChain::new(vec![stage, Stage::Forwarder(forwarder)]);

        let query = DnsQuery::new(1, "host.example.com", RecordType::A);
        let response = chain.resolve(&query).await;
        assert!(response.recursion_available);
        assert!(response.authoritative);
        assert_eq!(response.response_code, ResponseCode::NoError);
    }

    #[tokio::test]
    async fn test_forwarder_exhaustion_is_servfail() {
        let (stage, _db, _dir) = authority_stage(&["example.com"]).await;
        let forwarder = Arc::new(Forwarder::new(&["127.0.0.1:1"], &[1]).unwrap());
        let chain = ResolverChain::new(vec![stage, Stage::Forwarder(forwarder)]);

        let query = DnsQuery::new(1, "unreachable.other.net", RecordType::A);
        let response = chain.resolve(&query).await;
        assert_eq!(response.response_code, ResponseCode::ServFail);
    }
}
