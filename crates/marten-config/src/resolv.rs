//! resolv.conf nameserver extraction.

/// Extracts the `nameserver` entries from resolv.conf-format content, in
/// file order. Unknown directives, comments (`#` or `;`) and malformed
/// lines are skipped; endpoint validation happens later, when the upstream
/// set is assembled.
pub fn parse_resolv(content: &str) -> Vec<String> {
    let mut servers = Vec::new();
    for raw in content.lines() {
        let line = raw.split(['#', ';']).next().unwrap_or("").trim();
        if line.is_empty() {
            continue;
        }
        let mut fields = line.split_whitespace();
        if fields.next() == Some("nameserver") {
            if let Some(addr) = fields.next() {
                servers.push(addr.to_owned());
            }
        }
    }
    servers
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracts_nameservers_in_order() {
        let content = "\
# generated by resolvconf
domain example.net
nameserver 1.1.1.1
nameserver 9.9.9.9 ; quad9
options edns0
";
        assert_eq!(parse_resolv(content), vec!["1.1.1.1", "9.9.9.9"]);
    }

    #[test]
    fn skips_bare_directive() {
        assert_eq!(parse_resolv("nameserver\nsearch lan\n"), Vec::<String>::new());
    }
}
