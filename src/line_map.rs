//! The line-map view of a load module, and the address locator that queries it.
//!
//! The line map is the debug-info side of the provider boundary: per-module statement ranges
//! (address range -> file/line of the *innermost* physical location) and the per-address inline
//! call sequences used by the inline tree builder.

use crate::intervals::Vma;
use crate::log::*;

/// One line-map record: instructions in `[start, end)` come from `file:line`.
#[derive(Debug, Clone)]
pub struct StatementRange {
    pub start: Vma,
    pub end: Vma,
    pub file: String,
    pub line: u32,
}

/// One source module (compilation unit) with its statement ranges.
#[derive(Debug, Default)]
pub struct Module {
    pub name: String,
    /// Sorted by `start`.
    ranges: Vec<StatementRange>,
}

impl Module {
    pub fn new(name: String, mut ranges: Vec<StatementRange>) -> Self {
        ranges.sort_by_key(|r| r.start);
        Self { name, ranges }
    }

    fn range_covering(&self, vma: Vma) -> Option<&StatementRange> {
        let idx = self.ranges.partition_point(|r| r.start <= vma);
        self.ranges[..idx]
            .iter()
            .rev()
            .find(|r| vma < r.end)
    }
}

/// One frame of an inline call sequence: where the call was made from, and what got inlined.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InlineFrame {
    pub file: String,
    pub line: u32,
    pub proc: String,
}

/// The line map for one load module.
#[derive(Debug, Default)]
pub struct LineMap {
    modules: Vec<Module>,
    /// (start, end, frames outermost-to-innermost), sorted by start.
    inline_ranges: Vec<(Vma, Vma, Vec<InlineFrame>)>,
}

impl LineMap {
    pub fn new(modules: Vec<Module>, mut inline_ranges: Vec<(Vma, Vma, Vec<InlineFrame>)>) -> Self {
        inline_ranges.sort_by_key(|&(start, _, _)| start);
        Self {
            modules,
            inline_ranges,
        }
    }

    pub fn modules(&self) -> &[Module] {
        &self.modules
    }

    /// Index of the module named `name`, if present.
    pub fn module_index(&self, name: &str) -> Option<usize> {
        self.modules.iter().position(|m| m.name == name)
    }

    /// The statement range covering `vma`, trying `hint_module` first and falling back to a
    /// full-table search across all modules.
    ///
    /// A record with one of (file, line) unknown and the other known is inconsistent and is
    /// discarded; callers always see file and line either both known or both unknown.
    pub fn statement_covering(&self, vma: Vma, hint_module: Option<usize>) -> Option<&StatementRange> {
        let found = hint_module
            .and_then(|m| self.modules.get(m))
            .and_then(|m| m.range_covering(vma))
            .or_else(|| {
                self.modules
                    .iter()
                    .find_map(|m| m.range_covering(vma))
            });

        match found {
            Some(r) if r.file.is_empty() || r.line == 0 => None,
            other => other,
        }
    }

    /// The inline call sequence for `vma`, outermost to innermost. Empty when the address has no
    /// inlining (or no debug info).
    pub fn inline_sequence(&self, vma: Vma) -> &[InlineFrame] {
        let idx = self.inline_ranges.partition_point(|&(start, _, _)| start <= vma);
        self.inline_ranges[..idx]
            .iter()
            .rev()
            .find(|&&(_, end, _)| vma < end)
            .map(|(_, _, frames)| frames.as_slice())
            .unwrap_or(&[])
    }
}

/// The resolved (file, line) for one address.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceLoc {
    pub file: String,
    pub line: u32,
}

/// Address-to-source resolution with a one-entry cache.
///
/// Consecutive instructions overwhelmingly fall into the same statement range, so the locator
/// remembers the last resolved half-open range and answers from it until a query falls outside.
/// Scoped to one load module's processing; there is no global lookup state.
pub struct Locator<'a> {
    line_map: &'a LineMap,
    cache: Option<CachedRange>,
}

struct CachedRange {
    low: Vma,
    high: Vma,
    file: String,
    line: u32,
}

impl<'a> Locator<'a> {
    pub fn new(line_map: &'a LineMap) -> Self {
        Self {
            line_map,
            cache: None,
        }
    }

    /// Resolve `vma` to (file, line), or `None` when the line map has no consistent answer.
    /// `hint_module` is tried before the full-table search.
    pub fn resolve(&mut self, vma: Vma, hint_module: Option<usize>) -> Option<SourceLoc> {
        if let Some(c) = &self.cache {
            if c.low <= vma && vma < c.high {
                return Some(SourceLoc {
                    file: c.file.clone(),
                    line: c.line,
                });
            }
        }

        match self.line_map.statement_covering(vma, hint_module) {
            Some(r) => {
                self.cache = Some(CachedRange {
                    low: r.start,
                    high: r.end,
                    file: r.file.clone(),
                    line: r.line,
                });
                Some(SourceLoc {
                    file: r.file.clone(),
                    line: r.line,
                })
            }
            None => {
                trace!("no line info"; "vma" => format!("{:#x}", vma));
                self.cache = None;
                None
            }
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn one_module_map() -> LineMap {
        LineMap::new(
            vec![Module::new(
                "zip.c".into(),
                vec![
                    StatementRange {
                        start: 0x100,
                        end: 0x110,
                        file: "zip.c".into(),
                        line: 10,
                    },
                    StatementRange {
                        start: 0x110,
                        end: 0x118,
                        file: "zip.c".into(),
                        line: 12,
                    },
                    // inconsistent: line known, file unknown
                    StatementRange {
                        start: 0x118,
                        end: 0x120,
                        file: "".into(),
                        line: 13,
                    },
                ],
            )],
            vec![],
        )
    }

    #[test]
    fn cache_hits_within_range() {
        let map = one_module_map();
        let mut loc = Locator::new(&map);
        let a = loc.resolve(0x100, Some(0)).unwrap();
        assert_eq!((a.file.as_str(), a.line), ("zip.c", 10));
        // consecutive addresses in the same range are served from cache
        for vma in 0x101..0x110 {
            let r = loc.resolve(vma, Some(0)).unwrap();
            assert_eq!(r.line, 10);
        }
        // crossing the range boundary invalidates and re-resolves
        assert_eq!(loc.resolve(0x110, Some(0)).unwrap().line, 12);
    }

    #[test]
    fn inconsistent_record_is_absent() {
        let map = one_module_map();
        let mut loc = Locator::new(&map);
        assert!(loc.resolve(0x118, Some(0)).is_none());
        assert!(loc.resolve(0x200, Some(0)).is_none());
    }

    #[test]
    fn fallback_to_other_modules() {
        let map = LineMap::new(
            vec![
                Module::new("a.c".into(), vec![]),
                Module::new(
                    "b.c".into(),
                    vec![StatementRange {
                        start: 0x40,
                        end: 0x48,
                        file: "b.c".into(),
                        line: 7,
                    }],
                ),
            ],
            vec![],
        );
        let mut loc = Locator::new(&map);
        // hint module has nothing at 0x40; the full-table search finds b.c
        let r = loc.resolve(0x40, Some(0)).unwrap();
        assert_eq!((r.file.as_str(), r.line), ("b.c", 7));
    }

    #[test]
    fn inline_sequences() {
        let map = LineMap::new(
            vec![],
            vec![(
                0x100,
                0x120,
                vec![
                    InlineFrame {
                        file: "zip.c".into(),
                        line: 20,
                        proc: "compress".into(),
                    },
                    InlineFrame {
                        file: "deflate.c".into(),
                        line: 5,
                        proc: "deflate".into(),
                    },
                ],
            )],
        );
        assert_eq!(map.inline_sequence(0x100).len(), 2);
        assert_eq!(map.inline_sequence(0x11f)[0].proc, "compress");
        assert!(map.inline_sequence(0x120).is_empty());
    }
}
