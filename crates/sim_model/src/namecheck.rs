//! Name grammar for model entities.
//!
//! Names are ASCII letters, digits, and underscores. Dots are permitted as
//! hierarchy separators in some positions, and `%d` / `%(documentation)d`
//! number wildcards are permitted in parameter and port names. Invalid names
//! are reported as warnings by the graph builder, never as fatal errors.

/// Validate a name against the grammar.
///
/// The check is a five-state machine:
///
/// - State 0: start of the name (or the position after a dot). An
///   underscore moves to state 1; a letter moves to state 2.
/// - State 1: after an opening underscore; a letter or digit is required.
/// - State 2: middle of a word. Letters, digits, and underscores continue;
///   a dot (when allowed) returns to state 0.
/// - State 3: inside a `%` wildcard; `d` closes it, `(` opens documentation.
/// - State 4: wildcard documentation; runs to the closing parenthesis.
///
/// The name is invalid if it ends in any state where a character is still
/// required (after `_`, after `.`, inside a wildcard).
#[must_use]
pub fn is_name_valid(name: &str, allow_wildcard: bool, allow_dot: bool) -> bool {
    let mut state = 0u8;
    let mut valid = false;

    for c in name.chars() {
        match state {
            0 => {
                if c == '_' {
                    state = 1;
                    valid = false;
                } else if c.is_ascii_alphabetic() {
                    state = 2;
                    valid = true;
                } else {
                    return false;
                }
            }
            1 => {
                if allow_wildcard && c == '%' {
                    state = 3;
                    valid = false;
                } else if c.is_ascii_alphanumeric() {
                    state = 2;
                    valid = true;
                } else {
                    return false;
                }
            }
            2 => {
                if allow_dot && c == '.' {
                    state = 0;
                    valid = false;
                } else if allow_wildcard && c == '%' {
                    state = 3;
                    valid = false;
                } else if c.is_ascii_alphanumeric() || c == '_' {
                    valid = true;
                } else {
                    return false;
                }
            }
            3 => {
                if c == 'd' {
                    state = 2;
                    valid = true;
                } else if c == '(' {
                    state = 4;
                    valid = false;
                } else {
                    return false;
                }
            }
            _ => {
                valid = false;
                if c == ')' {
                    state = 3;
                }
            }
        }
    }
    valid
}

/// Component names: dotted hierarchy allowed, no wildcards.
#[must_use]
pub fn is_component_name_valid(name: &str) -> bool {
    is_name_valid(name, false, true)
}

/// Link names: dotted hierarchy allowed, no wildcards.
#[must_use]
pub fn is_link_name_valid(name: &str) -> bool {
    is_name_valid(name, false, true)
}

/// Parameter names: wildcards and dots allowed.
#[must_use]
pub fn is_param_name_valid(name: &str) -> bool {
    is_name_valid(name, true, true)
}

/// Port names: wildcards allowed, no dots.
#[must_use]
pub fn is_port_name_valid(name: &str) -> bool {
    is_name_valid(name, true, false)
}

/// Slot names: neither wildcards nor dots.
#[must_use]
pub fn is_slot_name_valid(name: &str) -> bool {
    is_name_valid(name, false, false)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plain_names() {
        assert!(is_name_valid("core0", false, false));
        assert!(is_name_valid("_hidden", false, false));
        assert!(is_name_valid("a_b_c", false, false));
        assert!(!is_name_valid("", false, false));
        assert!(!is_name_valid("0core", false, false));
        assert!(!is_name_valid("_", false, false));
        assert!(!is_name_valid("has space", false, false));
        assert!(!is_name_valid("has-dash", false, false));
    }

    #[test]
    fn test_dotted_names() {
        assert!(is_name_valid("node.cpu.cache", false, true));
        assert!(!is_name_valid("node..cpu", false, true));
        assert!(!is_name_valid("node.", false, true));
        assert!(!is_name_valid("node.cpu", false, false));
    }

    #[test]
    fn test_wildcards() {
        assert!(is_name_valid("port_%d", true, false));
        assert!(is_name_valid("port_%(lane number)d", true, false));
        assert!(!is_name_valid("port_%d", false, false));
        assert!(!is_name_valid("port_%", true, false));
        assert!(!is_name_valid("port_%(open", true, false));
        assert!(!is_name_valid("port_%x", true, false));
    }
}
