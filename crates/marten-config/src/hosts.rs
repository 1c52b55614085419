//! Hosts-file parsing and host-table construction.

use std::collections::HashMap;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};

use super::{ConfigError, Result};

/// Static host tables split by address family. Keys are canonical names
/// (lower-cased, dot-terminated); per-key address order is the order the
/// addresses appeared in the configuration input.
#[derive(Debug, Default, Clone)]
pub struct HostTables {
    pub v4: HashMap<String, Vec<Ipv4Addr>>,
    pub v6: HashMap<String, Vec<Ipv6Addr>>,
}

impl HostTables {
    /// Total number of names with at least one address.
    pub fn len(&self) -> usize {
        self.v4.len() + self.v6.len()
    }

    pub fn is_empty(&self) -> bool {
        self.v4.is_empty() && self.v6.is_empty()
    }
}

/// Canonicalizes a host name: lower-cased with a trailing dot.
pub fn fqdn(name: &str) -> String {
    let mut canonical = name.to_ascii_lowercase();
    if !canonical.ends_with('.') {
        canonical.push('.');
    }
    canonical
}

/// Builds host tables from hosts-format lines.
///
/// Each entry is one IP literal followed by one or more names; `#` starts a
/// comment and blank lines are skipped. Duplicate addresses for a name
/// append to its list. Line numbers in errors are 1-based over the merged
/// input (files first, then inline entries).
pub fn build_tables(lines: &[String]) -> Result<HostTables> {
    let mut tables = HostTables::default();
    for (idx, raw) in lines.iter().enumerate() {
        let line = raw.split('#').next().unwrap_or("").trim();
        if line.is_empty() {
            continue;
        }

        let mut fields = line.split_whitespace();
        let ip_text = fields.next().unwrap_or("");
        let names: Vec<&str> = fields.collect();
        if names.is_empty() {
            return Err(ConfigError::InvalidHostsLine {
                line: idx + 1,
                text: line.to_owned(),
            });
        }
        let ip: IpAddr = ip_text.parse().map_err(|_| ConfigError::InvalidHostsLine {
            line: idx + 1,
            text: line.to_owned(),
        })?;

        for name in names {
            match ip {
                IpAddr::V4(v4) => tables.v4.entry(fqdn(name)).or_default().push(v4),
                IpAddr::V6(v6) => tables.v6.entry(fqdn(name)).or_default().push(v6),
            }
        }
    }
    Ok(tables)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lines(input: &[&str]) -> Vec<String> {
        input.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn parses_entries_and_canonicalizes_names() {
        let tables = build_tables(&lines(&[
            "# local overrides",
            "",
            "1.2.3.4   Example  example.org.",
            "2001:db8::1 example",
        ]))
        .unwrap();

        assert_eq!(tables.v4["example."], vec![Ipv4Addr::new(1, 2, 3, 4)]);
        assert_eq!(tables.v4["example.org."], vec![Ipv4Addr::new(1, 2, 3, 4)]);
        assert_eq!(
            tables.v6["example."],
            vec!["2001:db8::1".parse::<Ipv6Addr>().unwrap()]
        );
    }

    #[test]
    fn duplicate_ips_append_in_input_order() {
        let tables = build_tables(&lines(&[
            "1.1.1.1 multi",
            "2.2.2.2 multi",
            "1.1.1.1 multi",
        ]))
        .unwrap();

        assert_eq!(
            tables.v4["multi."],
            vec![
                Ipv4Addr::new(1, 1, 1, 1),
                Ipv4Addr::new(2, 2, 2, 2),
                Ipv4Addr::new(1, 1, 1, 1),
            ]
        );
    }

    #[test]
    fn whitespace_runs_collapse() {
        let tables = build_tables(&lines(&["  10.0.0.1\t\t host-a \t host-b  "])).unwrap();
        assert_eq!(tables.v4["host-a."], vec![Ipv4Addr::new(10, 0, 0, 1)]);
        assert_eq!(tables.v4["host-b."], vec![Ipv4Addr::new(10, 0, 0, 1)]);
    }

    #[test]
    fn trailing_comments_are_stripped() {
        let tables = build_tables(&lines(&["10.0.0.2 gateway # router"])).unwrap();
        assert_eq!(tables.v4.len(), 1);
        assert_eq!(tables.v4["gateway."], vec![Ipv4Addr::new(10, 0, 0, 2)]);
    }

    #[test]
    fn entry_without_names_errors_with_line_number() {
        let err = build_tables(&lines(&["# ok", "10.0.0.1"])).unwrap_err();
        match err {
            ConfigError::InvalidHostsLine { line, .. } => assert_eq!(line, 2),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn bad_ip_literal_errors() {
        assert!(build_tables(&lines(&["not-an-ip host"])).is_err());
    }
}
