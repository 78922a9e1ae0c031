//! Element registry.
//!
//! The core's view of the loaded element libraries: for each component type,
//! the legal port names and the statistics it can produce. The dynamic
//! library loader that populates this at startup is an external collaborator;
//! the graph only consults the registry during validation.
//!
//! Port declarations may use `%d` number wildcards (with optional
//! `%(documentation)d` inserts), matching any run of digits at that
//! position.

use std::collections::HashMap;

/// Declared interface of one component type.
#[derive(Debug, Clone, Default)]
pub struct ElementInfo {
    /// Legal port names, possibly containing `%d` wildcards.
    pub ports: Vec<String>,
    /// Statistic name → enable level.
    pub statistics: HashMap<String, u8>,
}

/// Registry of component types known to the core.
///
/// Types that were never registered are treated permissively (their ports
/// and statistics cannot be checked); registered types are validated
/// strictly.
#[derive(Debug, Clone, Default)]
pub struct ElementRegistry {
    types: HashMap<String, ElementInfo>,
}

impl ElementRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a component type with its ports and statistics.
    pub fn register_component(
        &mut self,
        kind: &str,
        ports: impl IntoIterator<Item = String>,
        statistics: impl IntoIterator<Item = (String, u8)>,
    ) {
        self.types.insert(
            kind.to_string(),
            ElementInfo {
                ports: ports.into_iter().collect(),
                statistics: statistics.into_iter().collect(),
            },
        );
    }

    /// Returns `true` if the type has been registered.
    #[must_use]
    pub fn knows(&self, kind: &str) -> bool {
        self.types.contains_key(kind)
    }

    /// Returns `true` if `port` is a legal port of `kind`. Unregistered
    /// types accept any port.
    #[must_use]
    pub fn is_port_valid(&self, kind: &str, port: &str) -> bool {
        match self.types.get(kind) {
            None => true,
            Some(info) => info.ports.iter().any(|p| port_matches(p, port)),
        }
    }

    /// The enable level of a statistic on `kind`, or `None` if the type does
    /// not declare it. Unregistered types report level 0 for any name.
    #[must_use]
    pub fn statistic_enable_level(&self, kind: &str, statistic: &str) -> Option<u8> {
        match self.types.get(kind) {
            None => Some(0),
            Some(info) => info.statistics.get(statistic).copied(),
        }
    }
}

/// Match a port name against a declaration that may contain `%d` or
/// `%(doc)d` wildcards; each wildcard consumes one nonempty run of digits.
#[must_use]
pub fn port_matches(pattern: &str, name: &str) -> bool {
    let pat: Vec<char> = pattern.chars().collect();
    let nam: Vec<char> = name.chars().collect();
    match_from(&pat, &nam)
}

fn match_from(pat: &[char], nam: &[char]) -> bool {
    let mut pi = 0;
    let mut ni = 0;
    while pi < pat.len() {
        if pat[pi] == '%' {
            // Skip optional (documentation), then require 'd'.
            let mut pj = pi + 1;
            if pj < pat.len() && pat[pj] == '(' {
                while pj < pat.len() && pat[pj] != ')' {
                    pj += 1;
                }
                pj += 1;
            }
            if pj >= pat.len() || pat[pj] != 'd' {
                return false;
            }
            // Consume at least one digit, then try the remainder after each
            // additional digit.
            if ni >= nam.len() || !nam[ni].is_ascii_digit() {
                return false;
            }
            let rest = &pat[pj + 1..];
            let mut nk = ni + 1;
            loop {
                if match_from(rest, &nam[nk..]) {
                    return true;
                }
                if nk < nam.len() && nam[nk].is_ascii_digit() {
                    nk += 1;
                } else {
                    return false;
                }
            }
        }
        if ni >= nam.len() || pat[pi] != nam[ni] {
            return false;
        }
        pi += 1;
        ni += 1;
    }
    ni == nam.len()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_literal_port_match() {
        assert!(port_matches("north", "north"));
        assert!(!port_matches("north", "south"));
        assert!(!port_matches("north", "north0"));
    }

    #[test]
    fn test_wildcard_port_match() {
        assert!(port_matches("port_%d", "port_0"));
        assert!(port_matches("port_%d", "port_123"));
        assert!(!port_matches("port_%d", "port_"));
        assert!(!port_matches("port_%d", "port_x"));
        assert!(port_matches("lane%(lane number)d_rx", "lane7_rx"));
    }

    #[test]
    fn test_registry_strict_for_known_types() {
        let mut reg = ElementRegistry::new();
        reg.register_component(
            "net.router",
            vec!["port_%d".to_string()],
            vec![("packets".to_string(), 1u8)],
        );
        assert!(reg.is_port_valid("net.router", "port_4"));
        assert!(!reg.is_port_valid("net.router", "uplink"));
        assert_eq!(reg.statistic_enable_level("net.router", "packets"), Some(1));
        assert_eq!(reg.statistic_enable_level("net.router", "drops"), None);

        // Unknown types are permissive.
        assert!(reg.is_port_valid("not.registered", "anything"));
        assert_eq!(reg.statistic_enable_level("not.registered", "x"), Some(0));
    }
}
