//! Cache key derivation.

use hickory_proto::op::Query;
use hickory_proto::rr::Name;

/// Returns the canonical form of a DNS name: lower-cased, dot-terminated.
///
/// Host-table lookups and cache keys consume this form, so any spelling of
/// the same name maps to the same entry.
pub fn canonical_name(name: &Name) -> String {
    let mut canonical = name.to_string().to_ascii_lowercase();
    if !canonical.ends_with('.') {
        canonical.push('.');
    }
    canonical
}

/// Derives the cache fingerprint for a single question.
///
/// Deterministic and case-insensitive in the name: two questions that should
/// share a cached answer produce identical fingerprints.
pub fn question_key(query: &Query) -> String {
    format!(
        "{} {} {}",
        canonical_name(query.name()),
        query.query_class(),
        query.query_type()
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use hickory_proto::rr::{DNSClass, RecordType};
    use std::str::FromStr;

    fn query(name: &str, rtype: RecordType) -> Query {
        let mut q = Query::query(Name::from_str(name).unwrap(), rtype);
        q.set_query_class(DNSClass::IN);
        q
    }

    #[test]
    fn canonical_is_lowercase_and_dot_terminated() {
        let name = Name::from_str("EXAMPLE.Com").unwrap();
        assert_eq!(canonical_name(&name), "example.com.");

        let fqdn = Name::from_str("example.com.").unwrap();
        assert_eq!(canonical_name(&fqdn), "example.com.");
    }

    #[test]
    fn key_is_case_insensitive() {
        let a = question_key(&query("example.com.", RecordType::A));
        let b = question_key(&query("EXAMPLE.COM.", RecordType::A));
        assert_eq!(a, b);
    }

    #[test]
    fn key_separates_record_types() {
        let a = question_key(&query("example.com.", RecordType::A));
        let aaaa = question_key(&query("example.com.", RecordType::AAAA));
        assert_ne!(a, aaaa);
    }
}
