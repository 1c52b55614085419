//! The resolver engine: one decoded request in, one response message out.
//!
//! Per query: host-table shortcut for IN A/AAAA, then the response cache,
//! then the upstream race, caching the winner. Every failure path degrades
//! to SERVFAIL for that client alone.

use std::sync::Arc;

use arc_swap::ArcSwap;
use async_trait::async_trait;
use hickory_proto::op::{Message, MessageType, ResponseCode};
use hickory_proto::rr::rdata::{A, AAAA};
use hickory_proto::rr::{DNSClass, Name, RData, Record, RecordType};
use tracing::debug;

use marten_cache::{canonical_name, question_key, MessageCache};
use marten_config::Snapshot;
use marten_resolver::{race, Exchanger};
use marten_server::{QueryContext, QueryHandler};

/// TTL of synthesized host-table answers.
const HOST_ANSWER_TTL: u32 = 0;

/// The forwarder's query handler.
///
/// Holds the configuration snapshot behind an atomic reference: every
/// request loads the snapshot once and uses it to completion, and reload
/// swaps in a replacement without touching in-flight queries or the cache.
pub struct ForwardHandler {
    snapshot: ArcSwap<Snapshot>,
    cache: MessageCache,
    exchanger: Exchanger,
}

impl ForwardHandler {
    /// Creates a handler around an initial snapshot.
    pub fn new(snapshot: Snapshot, cache: MessageCache, exchanger: Exchanger) -> Self {
        Self {
            snapshot: ArcSwap::from_pointee(snapshot),
            cache,
            exchanger,
        }
    }

    /// Atomically installs a freshly built snapshot. Queries that already
    /// captured the prior snapshot finish against it.
    pub fn install(&self, snapshot: Snapshot) {
        self.snapshot.store(Arc::new(snapshot));
    }

    /// The response cache. Entries survive reloads and age out on their
    /// own.
    pub fn cache(&self) -> &MessageCache {
        &self.cache
    }

    fn host_addresses(snapshot: &Snapshot, name: &str, rtype: RecordType) -> Option<Vec<RData>> {
        match rtype {
            RecordType::A => snapshot
                .hosts
                .v4
                .get(name)
                .filter(|ips| !ips.is_empty())
                .map(|ips| ips.iter().map(|ip| RData::A(A(*ip))).collect()),
            RecordType::AAAA => snapshot
                .hosts
                .v6
                .get(name)
                .filter(|ips| !ips.is_empty())
                .map(|ips| ips.iter().map(|ip| RData::AAAA(AAAA(*ip))).collect()),
            _ => None,
        }
    }
}

#[async_trait]
impl QueryHandler for ForwardHandler {
    async fn handle(&self, query: Message, context: QueryContext) -> Message {
        let Some(question) = query.queries().first().cloned() else {
            debug!(client = %context.client, "query without a question");
            return servfail(&query);
        };

        let name = canonical_name(question.name());
        let snapshot = self.snapshot.load_full();

        if question.query_class() == DNSClass::IN {
            if let Some(rdata) = Self::host_addresses(&snapshot, &name, question.query_type()) {
                debug!(name = %name, qtype = %question.query_type(), "answered from host table");
                return host_reply(&query, &question.name().to_lowercase(), rdata);
            }
        }

        let key = question_key(&question);
        if let Some(mut cached) = self.cache.get(&key) {
            debug!(name = %name, "answered from cache");
            cached.set_id(query.id());
            return cached;
        }

        match race(&self.exchanger, &snapshot.upstreams, snapshot.timeout, &query).await {
            Some(mut reply) => {
                // A full ring just means this reply is not memoized.
                let _ = self.cache.insert(&key, reply.clone());
                reply.set_id(query.id());
                reply
            }
            None => {
                debug!(name = %name, "no upstream produced a usable reply");
                servfail(&query)
            }
        }
    }
}

/// Starts a reply from the query header: id, opcode and RD copied, QR and
/// RA set, question echoed.
fn reply_template(request: &Message) -> Message {
    let mut response = Message::new();
    response
        .set_id(request.id())
        .set_message_type(MessageType::Response)
        .set_op_code(request.op_code())
        .set_recursion_desired(request.recursion_desired())
        .set_recursion_available(true);
    response.add_queries(request.queries().to_vec());
    response
}

fn servfail(request: &Message) -> Message {
    let mut response = reply_template(request);
    response.set_response_code(ResponseCode::ServFail);
    response
}

/// Synthesizes a host-table reply: one record per address, in table order,
/// owned by the canonical query name.
fn host_reply(request: &Message, owner: &Name, rdata: Vec<RData>) -> Message {
    let mut response = reply_template(request);
    for data in rdata {
        let mut record = Record::from_rdata(owner.clone(), HOST_ANSWER_TTL, data);
        record.set_dns_class(DNSClass::IN);
        response.add_answer(record);
    }
    response
}
