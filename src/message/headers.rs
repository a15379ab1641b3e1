/*
 * Copyright Stalwart Labs Ltd. See the COPYING
 * file at the top-level directory of this distribution.
 *
 * Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
 * https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
 * <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
 * option. This file may not be copied, modified, or distributed
 * except according to those terms.
 */

/// Ordered header storage. Names keep the casing they were inserted with,
/// lookups ignore ASCII case.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Headers {
    entries: Vec<(String, String)>,
}

impl Headers {
    pub fn new() -> Self {
        Headers::default()
    }

    /// Sets a header. An existing header with the same name (in any case)
    /// is replaced in place, otherwise the header is appended.
    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<String>) {
        let name = name.into();
        let value = value.into();
        match self.position(&name) {
            Some(pos) => self.entries[pos] = (name, value),
            None => self.entries.push((name, value)),
        }
    }

    /// Sets a header as the first one in the block.
    pub fn insert_first(&mut self, name: impl Into<String>, value: impl Into<String>) {
        let name = name.into();
        if let Some(pos) = self.position(&name) {
            self.entries.remove(pos);
        }
        self.entries.insert(0, (name, value.into()));
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.get_entry(name).map(|(_, value)| value)
    }

    /// Returns the stored name and value of a header.
    pub fn get_entry(&self, name: &str) -> Option<(&str, &str)> {
        self.position(name).map(|pos| {
            let (name, value) = &self.entries[pos];
            (name.as_str(), value.as_str())
        })
    }

    pub fn contains(&self, name: &str) -> bool {
        self.position(name).is_some()
    }

    pub fn remove(&mut self, name: &str) -> Option<String> {
        self.position(name)
            .map(|pos| self.entries.remove(pos).1)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries
            .iter()
            .map(|(name, value)| (name.as_str(), value.as_str()))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn position(&self, name: &str) -> Option<usize> {
        self.entries
            .iter()
            .position(|(key, _)| key.eq_ignore_ascii_case(name))
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for Headers {
    fn from_iter<T: IntoIterator<Item = (K, V)>>(iter: T) -> Self {
        let mut headers = Headers::new();
        for (name, value) in iter {
            headers.insert(name, value);
        }
        headers
    }
}
