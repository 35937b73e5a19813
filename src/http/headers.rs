//! Ordered, case-insensitive header storage.
//!
//! Header names compare ASCII case-insensitively. Each name holds exactly one
//! value: setting a name that is already present replaces its value in place
//! (last write wins) and keeps the spelling and position of the first insert,
//! so serialization order follows arrival order.

/// `X-Real-Ip`: the client address as seen by the first trusted proxy.
pub const X_REAL_IP: &str = "X-Real-Ip";
/// `X-Forwarded-For`: the chain of client addresses.
pub const X_FORWARDED_FOR: &str = "X-Forwarded-For";
/// `X-Forwarded-Proto`: the protocol the client used to reach the proxy.
pub const X_FORWARDED_PROTO: &str = "X-Forwarded-Proto";
/// `X-Forwarded-Port`: the port the client connected to.
pub const X_FORWARDED_PORT: &str = "X-Forwarded-Port";
/// `Forwarded`: simplified RFC 7239 forwarding record.
pub const FORWARDED: &str = "Forwarded";
/// Request header carrying an optional routing trace token.
pub const TRACE: &str = "trace";

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HeaderMap {
    entries: Vec<(String, String)>,
}

impl HeaderMap {
    pub fn new() -> Self {
        Self::default()
    }

    fn position(&self, name: &str) -> Option<usize> {
        self.entries
            .iter()
            .position(|(key, _)| key.eq_ignore_ascii_case(name))
    }

    /// Returns the value stored under `name`, if any.
    pub fn get(&self, name: &str) -> Option<&str> {
        self.position(name).map(|i| self.entries[i].1.as_str())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.position(name).is_some()
    }

    /// True when `name` is missing or carries an empty value.
    ///
    /// The forwarding rules treat both cases the same way: an empty value is
    /// never worth preserving.
    pub fn is_absent(&self, name: &str) -> bool {
        self.get(name).is_none_or(str::is_empty)
    }

    /// Sets `name` to `value`, returning the value it replaced.
    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<String>) -> Option<String> {
        let name = name.into();
        let value = value.into();
        match self.position(&name) {
            Some(i) => Some(std::mem::replace(&mut self.entries[i].1, value)),
            None => {
                self.entries.push((name, value));
                None
            }
        }
    }

    /// Removes `name`, returning its value if it was present.
    pub fn remove(&mut self, name: &str) -> Option<String> {
        self.position(name).map(|i| self.entries.remove(i).1)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Iterates over `(name, value)` pairs in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries
            .iter()
            .map(|(key, value)| (key.as_str(), value.as_str()))
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for HeaderMap {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut headers = HeaderMap::new();
        for (key, value) in iter {
            headers.insert(key, value);
        }
        headers
    }
}
