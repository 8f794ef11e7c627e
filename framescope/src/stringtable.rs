//! Interned event names.
//!
//! Recording an event must not copy its name, so events carry a [`Name`]: a
//! `Copy` handle to a string that lives for the rest of the process.
//!
//! Names are interned in two levels:
//!
//!   1. Every [`LocalRecorder`](crate::LocalRecorder) owns a [`NameTable`].
//!      It is only ever touched by the thread that owns the recorder, so a
//!      lookup in it takes no lock.
//!   2. On a miss, the process-wide backing store is consulted under a lock.
//!      Each distinct string is copied into the store exactly once, no matter
//!      how many threads intern it.
//!
//! String literals skip both levels: [`Name::from_static`] just wraps the
//! literal.

use parking_lot::Mutex;
use rustc_hash::FxHashSet;
use serde::{Serialize, Serializer};
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::OnceLock;

/// A handle to an interned string.
///
/// Two names compare equal iff their strings are equal; handles obtained
/// through the same table are additionally pointer-equal, which makes the
/// common comparison a single pointer check.
#[derive(Clone, Copy)]
pub struct Name(&'static str);

impl Name {
    #[inline]
    pub const fn from_static(s: &'static str) -> Name {
        Name(s)
    }

    /// Interns `s` in the process-wide store. Prefer [`NameTable::map`] on
    /// hot paths since this always takes a lock.
    pub fn intern(s: &str) -> Name {
        let mut store = global_store().lock();

        if let Some(&existing) = store.get(s) {
            return Name(existing);
        }

        let leaked: &'static str = Box::leak(s.to_owned().into_boxed_str());
        store.insert(leaked);
        Name(leaked)
    }

    #[inline]
    pub fn as_str(self) -> &'static str {
        self.0
    }
}

impl PartialEq for Name {
    #[inline]
    fn eq(&self, other: &Name) -> bool {
        std::ptr::eq(self.0, other.0) || self.0 == other.0
    }
}

impl Eq for Name {}

impl Hash for Name {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.0.hash(state)
    }
}

impl PartialEq<str> for Name {
    fn eq(&self, other: &str) -> bool {
        self.0 == other
    }
}

impl PartialEq<&str> for Name {
    fn eq(&self, other: &&str) -> bool {
        self.0 == *other
    }
}

impl fmt::Debug for Name {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self.0, f)
    }
}

impl fmt::Display for Name {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.0)
    }
}

impl Serialize for Name {
    fn serialize<S: Serializer>(&self, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(self.0)
    }
}

fn global_store() -> &'static Mutex<FxHashSet<&'static str>> {
    static STORE: OnceLock<Mutex<FxHashSet<&'static str>>> = OnceLock::new();
    STORE.get_or_init(|| Mutex::new(FxHashSet::default()))
}

/// Recorder-local interning table.
#[derive(Debug, Default)]
pub struct NameTable {
    names: FxHashSet<&'static str>,
}

impl NameTable {
    pub fn new() -> NameTable {
        NameTable::default()
    }

    /// Maps `s` to its handle; only the first lookup of a given string in
    /// this table reaches the process-wide store.
    #[inline]
    pub fn map(&mut self, s: &str) -> Name {
        if let Some(&existing) = self.names.get(s) {
            return Name(existing);
        }

        let name = Name::intern(s);
        self.names.insert(name.0);
        name
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn interning_deduplicates() {
        let a = Name::intern("stringtable::interning_deduplicates");
        let b = Name::intern(&String::from("stringtable::interning_deduplicates"));

        assert!(std::ptr::eq(a.as_str(), b.as_str()));
        assert_eq!(a, b);
    }

    #[test]
    fn static_and_interned_compare_equal() {
        let s = Name::from_static("render");
        let i = Name::intern("render");

        assert_eq!(s, i);
        assert_eq!(s, "render");
        assert_ne!(s, Name::from_static("update"));
    }

    #[test]
    fn local_table_only_grows_on_new_strings() {
        let mut table = NameTable::new();

        let first = table.map("a");
        let second = table.map("a");
        table.map("b");

        assert_eq!(table.len(), 2);
        assert!(std::ptr::eq(first.as_str(), second.as_str()));
    }
}
