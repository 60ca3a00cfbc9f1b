//! Interning table for file names and procedure names.
//!
//! Every tree node, statement and loop record stores small integer indexes into this table rather
//! than owned strings, so that FLP keys are three-word values with cheap equality and ordering.
//! Source text is never interned, only file and procedure names.
//!
//! Not thread-safe; callers that parallelize across procedures must wrap it in a lock (or
//! partition and remap afterwards).

use crate::containers::unordered::UnorderedMap;

/// Index into a [`StringTable`].
pub type StringIndex = usize;

/// The canonical index of the empty string. The table inserts `""` first, so this is always `0`.
pub const EMPTY_INDEX: StringIndex = 0;

/// A deduplicating string table with stable, insertion-ordered indexes.
pub struct StringTable {
    data: Vec<String>,
    revmap: UnorderedMap<String, StringIndex>,
}

impl StringTable {
    /// A new table, pre-seeded with the empty string at index [`EMPTY_INDEX`].
    pub fn new() -> Self {
        let mut table = Self {
            data: vec![],
            revmap: Default::default(),
        };
        let empty = table.intern("");
        assert_eq!(empty, EMPTY_INDEX);
        table
    }

    /// Intern `s`, returning its index. Equal strings always return the same index.
    pub fn intern(&mut self, s: &str) -> StringIndex {
        if let Some(idx) = self.revmap.get(s) {
            *idx
        } else {
            let idx = self.data.len();
            self.data.push(s.to_owned());
            self.revmap.insert(s.to_owned(), idx);
            idx
        }
    }

    /// Look up the string for `idx`. Indexes come only from [`Self::intern`], so an out-of-range
    /// index is a programming error.
    pub fn resolve(&self, idx: StringIndex) -> &str {
        &self.data[idx]
    }

    /// Number of interned strings (including the empty string).
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Intern the basename of a path: the part after the last `/`, or the whole string if there is
    /// no separator. Loop-header file matching compares basenames, since the line map and the
    /// inline info do not always agree on directory prefixes.
    pub fn intern_basename(&mut self, path: &str) -> StringIndex {
        match path.rsplit_once('/') {
            Some((_, base)) => {
                let base = base.to_owned();
                self.intern(&base)
            }
            None => self.intern(path),
        }
    }
}

impl Default for StringTable {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn empty_string_is_index_zero() {
        let mut t = StringTable::new();
        assert_eq!(t.intern(""), EMPTY_INDEX);
        assert_eq!(t.resolve(EMPTY_INDEX), "");
    }

    #[test]
    fn interning_is_stable() {
        let mut t = StringTable::new();
        let a = t.intern("zip.c");
        let b = t.intern("unzip.c");
        assert_ne!(a, b);
        assert_eq!(t.intern("zip.c"), a);
        assert_eq!(t.intern("unzip.c"), b);
        assert_eq!(t.resolve(a), "zip.c");
        assert_eq!(t.len(), 3);
    }

    #[test]
    fn basenames() {
        let mut t = StringTable::new();
        let a = t.intern_basename("/home/user/src/zip.c");
        assert_eq!(t.resolve(a), "zip.c");
        assert_eq!(t.intern_basename("zip.c"), a);
    }
}
