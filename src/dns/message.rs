//! DNS message model
//!
//! Thin typed layer over the wire codec: queries, responses, and the record
//! payloads this server knows how to store and serve (A, AAAA, CNAME, MX,
//! NS, SOA).

use std::fmt;
use std::net::{Ipv4Addr, Ipv6Addr};
use std::str::FromStr;

use hickory_proto::op::{Message, MessageType, OpCode, ResponseCode};
use hickory_proto::rr::{Name, RData, Record, RecordType};
use hickory_proto::serialize::binary::{BinDecodable, BinEncodable};
use thiserror::Error;

/// Wire-level errors
#[derive(Error, Debug)]
pub enum DnsError {
    #[error("failed to parse DNS message: {0}")]
    ParseError(String),

    #[error("failed to encode DNS message: {0}")]
    EncodeError(String),

    #[error("invalid record kind: {0}")]
    InvalidKind(String),

    #[error("invalid domain name: {0}")]
    InvalidDomainName(String),
}

/// Record kinds the server is authoritative for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RecordKind {
    A,
    AAAA,
    CNAME,
    MX,
    NS,
    SOA,
}

impl RecordKind {
    /// Convert to the wire-level record type
    pub fn to_wire(self) -> RecordType {
        match self {
            RecordKind::A => RecordType::A,
            RecordKind::AAAA => RecordType::AAAA,
            RecordKind::CNAME => RecordType::CNAME,
            RecordKind::MX => RecordType::MX,
            RecordKind::NS => RecordType::NS,
            RecordKind::SOA => RecordType::SOA,
        }
    }

    /// Convert from the wire-level record type; `None` for anything the
    /// server does not implement (HTTPS, SRV, TXT, ...).
    pub fn from_wire(rt: RecordType) -> Option<Self> {
        match rt {
            RecordType::A => Some(RecordKind::A),
            RecordType::AAAA => Some(RecordKind::AAAA),
            RecordType::CNAME => Some(RecordKind::CNAME),
            RecordType::MX => Some(RecordKind::MX),
            RecordType::NS => Some(RecordKind::NS),
            RecordType::SOA => Some(RecordKind::SOA),
            _ => None,
        }
    }

    pub fn all() -> &'static [RecordKind] {
        &[
            RecordKind::A,
            RecordKind::AAAA,
            RecordKind::CNAME,
            RecordKind::MX,
            RecordKind::NS,
            RecordKind::SOA,
        ]
    }
}

impl fmt::Display for RecordKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RecordKind::A => write!(f, "A"),
            RecordKind::AAAA => write!(f, "AAAA"),
            RecordKind::CNAME => write!(f, "CNAME"),
            RecordKind::MX => write!(f, "MX"),
            RecordKind::NS => write!(f, "NS"),
            RecordKind::SOA => write!(f, "SOA"),
        }
    }
}

impl FromStr for RecordKind {
    type Err = DnsError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_uppercase().as_str() {
            "A" => Ok(RecordKind::A),
            "AAAA" => Ok(RecordKind::AAAA),
            "CNAME" => Ok(RecordKind::CNAME),
            "MX" => Ok(RecordKind::MX),
            "NS" => Ok(RecordKind::NS),
            "SOA" => Ok(RecordKind::SOA),
            _ => Err(DnsError::InvalidKind(s.to_string())),
        }
    }
}

/// SOA payload fields
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SoaData {
    pub mname: String,
    pub rname: String,
    pub serial: u32,
    pub refresh: i32,
    pub retry: i32,
    pub expire: i32,
    pub minimum: u32,
}

/// Typed record payload
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecordData {
    A(Ipv4Addr),
    AAAA(Ipv6Addr),
    CNAME(String),
    MX { exchange: String, priority: u16 },
    NS(String),
    SOA(SoaData),
}

impl RecordData {
    pub fn kind(&self) -> RecordKind {
        match self {
            RecordData::A(_) => RecordKind::A,
            RecordData::AAAA(_) => RecordKind::AAAA,
            RecordData::CNAME(_) => RecordKind::CNAME,
            RecordData::MX { .. } => RecordKind::MX,
            RecordData::NS(_) => RecordKind::NS,
            RecordData::SOA(_) => RecordKind::SOA,
        }
    }

    /// Human-readable payload value, as shown in logs and REST responses
    pub fn value(&self) -> String {
        match self {
            RecordData::A(ip) => ip.to_string(),
            RecordData::AAAA(ip) => ip.to_string(),
            RecordData::CNAME(target) => target.clone(),
            RecordData::MX { exchange, .. } => exchange.clone(),
            RecordData::NS(ns) => ns.clone(),
            RecordData::SOA(soa) => format!(
                "{} {} {} {} {} {} {}",
                soa.mname, soa.rname, soa.serial, soa.refresh, soa.retry, soa.expire, soa.minimum
            ),
        }
    }
}

/// A single resource record in a response section
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AnswerRecord {
    /// Owner name
    pub name: String,
    /// Payload
    pub data: RecordData,
    /// Time to live in seconds
    pub ttl: u32,
}

impl AnswerRecord {
    pub fn new(name: impl Into<String>, data: RecordData, ttl: u32) -> Self {
        Self {
            name: name.into(),
            data,
            ttl,
        }
    }

    pub fn kind(&self) -> RecordKind {
        self.data.kind()
    }
}

/// A parsed DNS question
#[derive(Debug, Clone)]
pub struct DnsQuery {
    /// Transaction ID, echoed in the response
    pub id: u16,
    /// Queried owner name (no trailing dot)
    pub name: String,
    /// Wire-level query type; may be a type the server does not implement
    pub query_type: RecordType,
    /// Whether the client asked for recursion
    pub recursion_desired: bool,
}

impl DnsQuery {
    pub fn new(id: u16, name: impl Into<String>, query_type: RecordType) -> Self {
        Self {
            id,
            name: name.into(),
            query_type,
            recursion_desired: true,
        }
    }

    /// The supported record kind for this query, if any
    pub fn kind(&self) -> Option<RecordKind> {
        RecordKind::from_wire(self.query_type)
    }

    /// Parse a DNS query from raw wire bytes
    pub fn from_bytes(data: &[u8]) -> Result<Self, DnsError> {
        let message = Message::from_bytes(data).map_err(|e| DnsError::ParseError(e.to_string()))?;

        let query = message
            .queries()
            .first()
            .ok_or_else(|| DnsError::ParseError("no question in message".to_string()))?;

        Ok(Self {
            id: message.id(),
            name: query.name().to_string().trim_end_matches('.').to_string(),
            query_type: query.query_type(),
            recursion_desired: message.recursion_desired(),
        })
    }

    /// Encode the query to raw wire bytes
    pub fn to_bytes(&self) -> Result<Vec<u8>, DnsError> {
        let name =
            Name::from_str(&self.name).map_err(|e| DnsError::InvalidDomainName(e.to_string()))?;

        let mut message = Message::new();
        message.set_id(self.id);
        message.set_message_type(MessageType::Query);
        message.set_op_code(OpCode::Query);
        message.set_recursion_desired(self.recursion_desired);
        message.add_query(hickory_proto::op::Query::query(name, self.query_type));

        message
            .to_bytes()
            .map_err(|e| DnsError::EncodeError(e.to_string()))
    }
}

/// A DNS response with its three record sections
#[derive(Debug, Clone)]
pub struct DnsResponse {
    /// Matches the query ID
    pub id: u16,
    pub response_code: ResponseCode,
    /// AA flag
    pub authoritative: bool,
    /// RA flag
    pub recursion_available: bool,
    pub answers: Vec<AnswerRecord>,
    pub authority: Vec<AnswerRecord>,
    pub additional: Vec<AnswerRecord>,
}

impl DnsResponse {
    pub fn new(id: u16) -> Self {
        Self {
            id,
            response_code: ResponseCode::NoError,
            authoritative: false,
            recursion_available: false,
            answers: Vec::new(),
            authority: Vec::new(),
            additional: Vec::new(),
        }
    }

    fn with_code(id: u16, code: ResponseCode) -> Self {
        let mut response = Self::new(id);
        response.response_code = code;
        response
    }

    pub fn nxdomain(id: u16) -> Self {
        Self::with_code(id, ResponseCode::NXDomain)
    }

    pub fn servfail(id: u16) -> Self {
        Self::with_code(id, ResponseCode::ServFail)
    }

    pub fn notimp(id: u16) -> Self {
        Self::with_code(id, ResponseCode::NotImp)
    }

    pub fn add_answer(&mut self, record: AnswerRecord) {
        self.answers.push(record);
    }

    /// Parse a DNS response from raw wire bytes
    pub fn from_bytes(data: &[u8]) -> Result<Self, DnsError> {
        let message = Message::from_bytes(data).map_err(|e| DnsError::ParseError(e.to_string()))?;

        let answers = message.answers().iter().filter_map(record_to_answer).collect();
        let authority = message
            .name_servers()
            .iter()
            .filter_map(record_to_answer)
            .collect();
        let additional = message
            .additionals()
            .iter()
            .filter_map(record_to_answer)
            .collect();

        Ok(Self {
            id: message.id(),
            response_code: message.response_code(),
            authoritative: message.authoritative(),
            recursion_available: message.recursion_available(),
            answers,
            authority,
            additional,
        })
    }

    /// Encode the response to raw wire bytes, echoing the question
    pub fn to_bytes(&self, query: &DnsQuery) -> Result<Vec<u8>, DnsError> {
        let query_name =
            Name::from_str(&query.name).map_err(|e| DnsError::InvalidDomainName(e.to_string()))?;

        let mut message = Message::new();
        message.set_id(self.id);
        message.set_message_type(MessageType::Response);
        message.set_op_code(OpCode::Query);
        message.set_authoritative(self.authoritative);
        message.set_recursion_desired(query.recursion_desired);
        message.set_recursion_available(self.recursion_available);
        message.set_response_code(self.response_code);
        message.add_query(hickory_proto::op::Query::query(query_name, query.query_type));

        for answer in &self.answers {
            if let Some(record) = answer_to_record(answer) {
                message.add_answer(record);
            }
        }
        for auth in &self.authority {
            if let Some(record) = answer_to_record(auth) {
                message.add_name_server(record);
            }
        }
        for add in &self.additional {
            if let Some(record) = answer_to_record(add) {
                message.add_additional(record);
            }
        }

        message
            .to_bytes()
            .map_err(|e| DnsError::EncodeError(e.to_string()))
    }
}

/// Convert a wire record into the typed model; unsupported types are skipped
fn record_to_answer(record: &Record) -> Option<AnswerRecord> {
    let name = record.name().to_string().trim_end_matches('.').to_string();
    let ttl = record.ttl();

    let data = match record.data() {
        RData::A(ip) => RecordData::A(ip.0),
        RData::AAAA(ip) => RecordData::AAAA(ip.0),
        RData::CNAME(cname) => {
            RecordData::CNAME(cname.to_string().trim_end_matches('.').to_string())
        }
        RData::MX(mx) => RecordData::MX {
            exchange: mx.exchange().to_string().trim_end_matches('.').to_string(),
            priority: mx.preference(),
        },
        RData::NS(ns) => RecordData::NS(ns.to_string().trim_end_matches('.').to_string()),
        RData::SOA(soa) => RecordData::SOA(SoaData {
            mname: soa.mname().to_string().trim_end_matches('.').to_string(),
            rname: soa.rname().to_string().trim_end_matches('.').to_string(),
            serial: soa.serial(),
            refresh: soa.refresh(),
            retry: soa.retry(),
            expire: soa.expire(),
            minimum: soa.minimum(),
        }),
        _ => return None,
    };

    Some(AnswerRecord { name, data, ttl })
}

/// Convert a typed record back into a wire record
fn answer_to_record(answer: &AnswerRecord) -> Option<Record> {
    let name = Name::from_str(&answer.name).ok()?;

    let rdata = match &answer.data {
        RecordData::A(ip) => RData::A((*ip).into()),
        RecordData::AAAA(ip) => RData::AAAA((*ip).into()),
        RecordData::CNAME(target) => {
            let target = Name::from_str(target).ok()?;
            RData::CNAME(hickory_proto::rr::rdata::CNAME(target))
        }
        RecordData::MX { exchange, priority } => {
            let exchange = Name::from_str(exchange).ok()?;
            RData::MX(hickory_proto::rr::rdata::MX::new(*priority, exchange))
        }
        RecordData::NS(ns) => {
            let ns = Name::from_str(ns).ok()?;
            RData::NS(hickory_proto::rr::rdata::NS(ns))
        }
        RecordData::SOA(soa) => {
            let mname = Name::from_str(&soa.mname).ok()?;
            // an unset responsible mailbox encodes as the root name
            let rname = if soa.rname.is_empty() {
                Name::root()
            } else {
                Name::from_str(&soa.rname).ok()?
            };
            RData::SOA(hickory_proto::rr::rdata::SOA::new(
                mname,
                rname,
                soa.serial,
                soa.refresh,
                soa.retry,
                soa.expire,
                soa.minimum,
            ))
        }
    };

    Some(Record::from_rdata(name, answer.ttl, rdata))
}
