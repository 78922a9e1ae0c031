//! Hierarchical string parameter store.
//!
//! Conceptually a string → string map, but keys are interned to integers in
//! a process-wide table so repeated comparisons are cheap. A `Params` holds a
//! local map plus the names of zero or more subscribed *shared sets*; lookup
//! walks the local map first, then each shared set in subscription order.
//!
//! Shared sets live in a process-wide registry and are resolved by name, so
//! a deserialized `Params` reconnects to them without any pointer fixup.

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::sync::{LazyLock, Mutex};

use dashmap::{DashMap, DashSet};
use serde::{Deserialize, Serialize};

use crate::time::UnitValue;

/// Errors produced by parameter lookup and parsing.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ParamsError {
    /// A typed find matched a value that could not be parsed as the
    /// requested type.
    #[error("parameter '{key}' = '{value}' is not a valid {target}")]
    InvalidConversion {
        /// Key that matched.
        key: String,
        /// The offending value.
        value: String,
        /// Human-readable target type.
        target: &'static str,
    },

    /// An array token opened with a quote that never closed.
    #[error("array token starts with a quote but does not end with the same quote: {token}")]
    UnterminatedQuote {
        /// The malformed token.
        token: String,
    },
}

// ---------------------------------------------------------------------------
// Process-wide key interning and shared-set registry
// ---------------------------------------------------------------------------

struct KeyTable {
    map: HashMap<String, u32>,
    reverse: Vec<String>,
}

/// Key id 0 is reserved for set-name metadata inside shared sets.
static KEY_TABLE: LazyLock<Mutex<KeyTable>> = LazyLock::new(|| {
    Mutex::new(KeyTable {
        map: HashMap::new(),
        reverse: vec!["<set_name>".to_string()],
    })
});

/// Shared parameter sets, keyed by set name. Entry 0 of each set holds the
/// set's own name.
static SHARED_SETS: LazyLock<DashMap<String, BTreeMap<u32, String>>> = LazyLock::new(DashMap::new);

/// Keys already reported as undocumented; each key warns once per process.
static WARNED_KEYS: LazyLock<DashSet<String>> = LazyLock::new(DashSet::new);

fn intern(key: &str) -> u32 {
    let mut table = KEY_TABLE.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
    if let Some(&id) = table.map.get(key) {
        return id;
    }
    let id = table.reverse.len() as u32;
    table.map.insert(key.to_string(), id);
    table.reverse.push(key.to_string());
    id
}

fn key_name(id: u32) -> String {
    let table = KEY_TABLE.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
    table.reverse[id as usize].clone()
}

/// Publish a key/value pair into the process-wide shared set `set`.
///
/// The set is created on first use; its zero-key sentinel entry stores the
/// set's own name. When `overwrite` is false an existing value is kept.
pub fn insert_shared(set: &str, key: &str, value: &str, overwrite: bool) {
    let mut entry = SHARED_SETS.entry(set.to_string()).or_default();
    entry.entry(0).or_insert_with(|| set.to_string());
    let id = intern(key);
    if overwrite {
        entry.insert(id, value.to_string());
    } else {
        entry.entry(id).or_insert_with(|| value.to_string());
    }
}

/// Names of all shared sets currently registered.
#[must_use]
pub fn shared_set_names() -> Vec<String> {
    SHARED_SETS.iter().map(|e| e.key().clone()).collect()
}

// ---------------------------------------------------------------------------
// Params
// ---------------------------------------------------------------------------

/// A layered parameter store: a local map plus subscribed shared sets.
#[derive(Debug, Clone)]
pub struct Params {
    local: BTreeMap<u32, String>,
    shared: Vec<String>,
    allowed_keys: Vec<HashSet<String>>,
    verify_enabled: bool,
}

impl Default for Params {
    fn default() -> Self {
        Self::new()
    }
}

impl Params {
    /// Create an empty store with verification enabled.
    #[must_use]
    pub fn new() -> Self {
        Self {
            local: BTreeMap::new(),
            shared: Vec::new(),
            allowed_keys: Vec::new(),
            verify_enabled: true,
        }
    }

    /// Build a store from key/value pairs, overwriting duplicates.
    #[must_use]
    pub fn from_pairs<'a>(pairs: impl IntoIterator<Item = (&'a str, &'a str)>) -> Self {
        let mut p = Self::new();
        for (k, v) in pairs {
            p.insert(k, v, true);
        }
        p
    }

    /// Insert a key/value pair into the local map.
    ///
    /// When `overwrite` is false and the key already exists locally, the
    /// original value is kept.
    pub fn insert(&mut self, key: &str, value: &str, overwrite: bool) {
        let id = intern(key);
        if overwrite {
            self.local.insert(id, value.to_string());
        } else {
            self.local.entry(id).or_insert_with(|| value.to_string());
        }
    }

    /// Merge another store into this one.
    ///
    /// Local entries are inserted without overwriting; shared-set
    /// subscriptions not already present are appended in order.
    pub fn merge(&mut self, other: &Params) {
        for (&id, value) in &other.local {
            self.local.entry(id).or_insert_with(|| value.clone());
        }
        for set in &other.shared {
            if !self.shared.contains(set) {
                self.shared.push(set.clone());
            }
        }
    }

    /// Subscribe to a shared set by name. The set is created (empty, with
    /// its name sentinel) if it does not exist yet.
    pub fn subscribe_shared_set(&mut self, set: &str) {
        SHARED_SETS
            .entry(set.to_string())
            .or_default()
            .entry(0)
            .or_insert_with(|| set.to_string());
        if !self.shared.iter().any(|s| s == set) {
            self.shared.push(set.to_string());
        }
    }

    /// Names of the shared sets this store subscribes to, in order.
    #[must_use]
    pub fn subscribed_shared_sets(&self) -> &[String] {
        &self.shared
    }

    /// Raw lookup walking the local map, then each shared set in
    /// subscription order.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<String> {
        let id = intern(key);
        if let Some(v) = self.local.get(&id) {
            return Some(v.clone());
        }
        for set in &self.shared {
            if let Some(map) = SHARED_SETS.get(set) {
                if let Some(v) = map.get(&id) {
                    return Some(v.clone());
                }
            }
        }
        None
    }

    /// Returns `true` if the key is present in any layer.
    #[must_use]
    pub fn contains(&self, key: &str) -> bool {
        self.get(key).is_some()
    }

    /// All visible keys across layers (the zero-key sentinel excluded).
    #[must_use]
    pub fn keys(&self) -> BTreeSet<String> {
        let mut out: BTreeSet<String> = self.local.keys().map(|&id| key_name(id)).collect();
        for set in &self.shared {
            if let Some(map) = SHARED_SETS.get(set) {
                out.extend(map.keys().filter(|&&id| id != 0).map(|&id| key_name(id)));
            }
        }
        out
    }

    /// Keys of the local map only.
    #[must_use]
    pub fn local_keys(&self) -> Vec<String> {
        self.local.keys().map(|&id| key_name(id)).collect()
    }

    /// Number of visible keys.
    #[must_use]
    pub fn len(&self) -> usize {
        self.keys().len()
    }

    /// Returns `true` if no keys are visible.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.keys().is_empty()
    }

    /// Typed find: parse the matched value as `T`, or return `default` when
    /// the key is absent.
    ///
    /// # Errors
    ///
    /// [`ParamsError::InvalidConversion`] when a value matched but did not
    /// parse as `T`. Absence is not an error.
    pub fn find<T: ParamValue>(&self, key: &str, default: T) -> Result<T, ParamsError> {
        Ok(self.find_opt(key)?.unwrap_or(default))
    }

    /// Typed find returning `None` when the key is absent.
    ///
    /// # Errors
    ///
    /// [`ParamsError::InvalidConversion`] when a value matched but did not
    /// parse as `T`.
    pub fn find_opt<T: ParamValue>(&self, key: &str) -> Result<Option<T>, ParamsError> {
        self.verify_param(key);
        match self.get(key) {
            None => Ok(None),
            Some(value) => match T::parse_param(&value) {
                Ok(v) => Ok(Some(v)),
                Err(ParamError::Array(e)) => Err(e),
                Err(ParamError::Mismatch) => Err(ParamsError::InvalidConversion {
                    key: key.to_string(),
                    value,
                    target: T::TARGET,
                }),
            },
        }
    }

    /// Extract a new store holding the keys (from all layers) that begin
    /// with `prefix`, with the prefix stripped. Verification is disabled on
    /// the extracted copy.
    #[must_use]
    pub fn find_prefix_params(&self, prefix: &str) -> Params {
        let mut out = Params::new();
        out.verify_enabled = false;
        for key in self.keys() {
            if let Some(stripped) = key.strip_prefix(prefix) {
                if let Some(value) = self.get(&key) {
                    out.insert(stripped, &value, true);
                }
            }
        }
        out
    }

    /// Extract the keys under the dotted namespace `scope` (i.e. starting
    /// with `scope.`), with the scope stripped.
    #[must_use]
    pub fn scoped_params(&self, scope: &str) -> Params {
        self.find_prefix_params(&format!("{scope}."))
    }

    /// Push a set of documented keys onto the allowed-keys stack.
    pub fn push_allowed_keys(&mut self, keys: HashSet<String>) {
        self.allowed_keys.push(keys);
    }

    /// Pop the most recent set of documented keys.
    pub fn pop_allowed_keys(&mut self) {
        self.allowed_keys.pop();
    }

    /// Enable or disable undocumented-parameter verification. Returns the
    /// previous setting.
    pub fn enable_verify(&mut self, enable: bool) -> bool {
        std::mem::replace(&mut self.verify_enabled, enable)
    }

    /// Warn (once per key, process-wide) when a key is looked up that is not
    /// documented by any set on the allowed-keys stack.
    fn verify_param(&self, key: &str) {
        if !self.verify_enabled || self.allowed_keys.is_empty() {
            return;
        }
        if self.allowed_keys.iter().rev().any(|set| set.contains(key)) {
            return;
        }
        if WARNED_KEYS.insert(key.to_string()) {
            tracing::warn!(key, "parameter is undocumented");
        }
    }

    /// Render every visible key/value pair, one per line, for status output.
    #[must_use]
    pub fn format_all(&self, prefix: &str) -> String {
        use std::fmt::Write as _;
        let mut out = String::new();
        for key in self.keys() {
            let value = self.get(&key).unwrap_or_default();
            let _ = writeln!(out, "{prefix}{key} = {value}");
        }
        out
    }
}

impl PartialEq for Params {
    fn eq(&self, other: &Self) -> bool {
        self.local == other.local && self.shared == other.shared
    }
}

// Serialization carries only the local map (reverse-resolved to string keys)
// and the names of subscribed shared sets; sets are reconnected by name on
// restore.
#[derive(Serialize, Deserialize)]
struct PackedParams {
    local: BTreeMap<String, String>,
    shared_sets: Vec<String>,
}

impl Serialize for Params {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let packed = PackedParams {
            local: self
                .local
                .iter()
                .map(|(&id, v)| (key_name(id), v.clone()))
                .collect(),
            shared_sets: self.shared.clone(),
        };
        packed.serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for Params {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let packed = PackedParams::deserialize(deserializer)?;
        let mut params = Params::new();
        for (k, v) in &packed.local {
            params.insert(k, v, true);
        }
        params.shared = packed.shared_sets;
        Ok(params)
    }
}

// ---------------------------------------------------------------------------
// Typed value parsing
// ---------------------------------------------------------------------------

/// Types a parameter value can be parsed into.
pub trait ParamValue: Sized {
    /// Human-readable target type name used in conversion errors.
    const TARGET: &'static str;

    /// Parse from the raw parameter string.
    ///
    /// # Errors
    ///
    /// Returns an error when the string is not a valid rendering of `Self`.
    fn parse_param(s: &str) -> Result<Self, ParamError>;
}

/// Internal parse failure: either a simple mismatch (mapped to
/// [`ParamsError::InvalidConversion`] with the lookup context) or a
/// structured array-grammar error carried through as-is.
pub enum ParamError {
    /// The value is not a valid rendering of the target type.
    Mismatch,
    /// A structured error from the array-token grammar.
    Array(ParamsError),
}

impl ParamValue for String {
    const TARGET: &'static str = "string";
    fn parse_param(s: &str) -> Result<Self, ParamError> {
        Ok(s.to_string())
    }
}

impl ParamValue for bool {
    const TARGET: &'static str = "bool";
    fn parse_param(s: &str) -> Result<Self, ParamError> {
        match s.trim().to_ascii_lowercase().as_str() {
            "true" | "t" | "yes" | "y" | "on" | "1" => Ok(true),
            "false" | "f" | "no" | "n" | "off" | "0" => Ok(false),
            _ => Err(ParamError::Mismatch),
        }
    }
}

fn parse_signed(s: &str) -> Option<i128> {
    let t = s.trim();
    let (neg, t) = match t.strip_prefix('-') {
        Some(rest) => (true, rest),
        None => (false, t.strip_prefix('+').unwrap_or(t)),
    };
    let value = if let Some(hex) = t.strip_prefix("0x").or_else(|| t.strip_prefix("0X")) {
        i128::from_str_radix(hex, 16).ok()?
    } else {
        t.parse::<i128>().ok()?
    };
    Some(if neg { -value } else { value })
}

macro_rules! impl_param_int {
    ($($ty:ty => $name:literal),* $(,)?) => {
        $(impl ParamValue for $ty {
            const TARGET: &'static str = $name;
            fn parse_param(s: &str) -> Result<Self, ParamError> {
                parse_signed(s)
                    .and_then(|v| <$ty>::try_from(v).ok())
                    .ok_or(ParamError::Mismatch)
            }
        })*
    };
}

impl_param_int!(
    i8 => "i8", i16 => "i16", i32 => "i32", i64 => "i64",
    u8 => "u8", u16 => "u16", u32 => "u32", u64 => "u64",
    usize => "usize",
);

impl ParamValue for f64 {
    const TARGET: &'static str = "f64";
    fn parse_param(s: &str) -> Result<Self, ParamError> {
        s.trim().parse().map_err(|_| ParamError::Mismatch)
    }
}

impl ParamValue for f32 {
    const TARGET: &'static str = "f32";
    fn parse_param(s: &str) -> Result<Self, ParamError> {
        s.trim().parse().map_err(|_| ParamError::Mismatch)
    }
}

impl ParamValue for UnitValue {
    const TARGET: &'static str = "unit value";
    fn parse_param(s: &str) -> Result<Self, ParamError> {
        s.parse().map_err(|_| ParamError::Mismatch)
    }
}

impl<T: ParamValue> ParamValue for Vec<T> {
    const TARGET: &'static str = "array";
    fn parse_param(s: &str) -> Result<Self, ParamError> {
        let trimmed = s.trim();
        let inner = trimmed
            .strip_prefix('[')
            .and_then(|t| t.strip_suffix(']'))
            .unwrap_or(trimmed);
        let tokens = array_tokens(inner).map_err(ParamError::Array)?;
        tokens.iter().map(|t| T::parse_param(t)).collect()
    }
}

// ---------------------------------------------------------------------------
// Array token grammar
// ---------------------------------------------------------------------------

/// Split an array value (outer brackets already removed) into tokens.
///
/// Tokens are separated by commas that are not inside quotes. Whitespace
/// around unquoted tokens is stripped. A token may be quoted with `'` or
/// `"`; inside a quoted token the matching quote may be escaped with `\`.
///
/// # Errors
///
/// [`ParamsError::UnterminatedQuote`] when a token opens with a quote
/// character but does not close with the same one.
pub fn array_tokens(value: &str) -> Result<Vec<String>, ParamsError> {
    let chars: Vec<char> = value.chars().collect();
    let mut raw: Vec<String> = Vec::new();

    let mut in_quote = false;
    let mut quote_char = '"';
    let mut ignore_next = false;
    let mut start: Option<usize> = None;

    for (i, &c) in chars.iter().enumerate() {
        if ignore_next {
            ignore_next = false;
            continue;
        }
        if start.is_none() {
            // Between tokens: skip whitespace before starting the next one.
            if c.is_whitespace() {
                continue;
            }
            start = Some(i);
        }

        if in_quote {
            if c == '\\' {
                ignore_next = true;
                continue;
            }
            if c == quote_char {
                in_quote = false;
            }
        } else if c == ',' {
            let s = start.take().unwrap_or(i);
            raw.push(chars[s..i].iter().collect());
        } else if c == '"' || c == '\'' {
            in_quote = true;
            quote_char = c;
        }
    }
    if let Some(s) = start {
        raw.push(chars[s..].iter().collect());
    }

    // Clean up: strip trailing whitespace, remove matching outer quotes, and
    // unescape quotes of the outer kind.
    let mut tokens = Vec::with_capacity(raw.len());
    for tok in raw {
        let mut t: Vec<char> = tok.chars().collect();
        while t.last().is_some_and(|c| c.is_whitespace()) {
            t.pop();
        }
        let first = match t.first() {
            Some(&c) => c,
            None => {
                tokens.push(String::new());
                continue;
            }
        };
        if first != '"' && first != '\'' {
            tokens.push(t.into_iter().collect());
            continue;
        }
        if t.len() < 2 || t[t.len() - 1] != first {
            return Err(ParamsError::UnterminatedQuote {
                token: t.into_iter().collect(),
            });
        }
        let inner = &t[1..t.len() - 1];
        let mut cleaned = String::with_capacity(inner.len());
        let mut iter = inner.iter().peekable();
        while let Some(&c) = iter.next() {
            if c == '\\' && iter.peek() == Some(&&first) {
                continue;
            }
            cleaned.push(c);
        }
        tokens.push(cleaned);
    }
    Ok(tokens)
}
