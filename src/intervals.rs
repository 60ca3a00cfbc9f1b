//! Half-open address intervals and the gap computation.
//!
//! A procedure group declares a symbol range `[start, end)`; the analysis records every basic
//! block it managed to parse as a covered interval. The leftover ranges are "gaps", code inside
//! the symbol that no block claims (padding, data in text, or parse failures).

/// Virtual memory address.
pub type Vma = u64;

/// A half-open address interval `[begin, end)`.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct VmaInterval {
    pub begin: Vma,
    pub end: Vma,
}

impl VmaInterval {
    pub fn new(begin: Vma, end: Vma) -> Self {
        Self { begin, end }
    }

    pub fn contains(&self, vma: Vma) -> bool {
        self.begin <= vma && vma < self.end
    }
}

impl std::fmt::Debug for VmaInterval {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(f, "[{:#x}, {:#x})", self.begin, self.end)
    }
}

/// A set of intervals, ordered by beginning address.
///
/// Inserted intervals are *not* merged; overlapping or adjacent members are allowed. Everything
/// that consumes the set ([`compute_gaps`] in particular) only relies on the ordering by `begin`.
#[derive(Default, Clone, Debug)]
pub struct VmaIntervalSet {
    set: std::collections::BTreeSet<VmaInterval>,
}

impl VmaIntervalSet {
    pub fn new() -> Self {
        Default::default()
    }

    /// Insert `[begin, end)`. Empty intervals are ignored.
    pub fn insert(&mut self, begin: Vma, end: Vma) {
        if begin < end {
            self.set.insert(VmaInterval::new(begin, end));
        }
    }

    /// Iterate in ascending order of beginning address.
    pub fn iter(&self) -> impl Iterator<Item = &VmaInterval> {
        self.set.iter()
    }

    pub fn len(&self) -> usize {
        self.set.len()
    }

    pub fn is_empty(&self) -> bool {
        self.set.is_empty()
    }

    /// Does any member interval contain `vma`?
    pub fn covers(&self, vma: Vma) -> bool {
        // Members are ordered by begin; candidates are those beginning at or before vma. Input
        // need not be merged, so scan backwards until the begins drop too far.
        self.set
            .range(..=VmaInterval::new(vma, Vma::MAX))
            .rev()
            .any(|iv| iv.contains(vma))
    }
}

/// Compute the set of intervals in `[start, end)` not covered by `covered`.
///
/// The scan walks covered intervals left to right, advancing `start` past each one and emitting
/// the uncovered span before it. Covered intervals may overlap; an interval entirely behind the
/// advanced `start` is simply skipped.
pub fn compute_gaps(covered: &VmaIntervalSet, start: Vma, end: Vma) -> VmaIntervalSet {
    let mut gaps = VmaIntervalSet::new();
    let mut start = start;
    let mut it = covered.iter();
    let mut cur = it.next();

    while start < end {
        match cur {
            None => {
                gaps.insert(start, end);
                break;
            }
            Some(iv) if iv.end <= start => {
                // entirely left of start
                cur = it.next();
            }
            Some(iv) if iv.begin <= start => {
                // contains start
                start = iv.end;
                cur = it.next();
            }
            Some(iv) => {
                // entirely right of start
                gaps.insert(start, std::cmp::min(iv.begin, end));
                start = iv.end;
                cur = it.next();
            }
        }
    }
    gaps
}

#[cfg(test)]
mod test {
    use super::*;

    fn set(ivs: &[(Vma, Vma)]) -> VmaIntervalSet {
        let mut s = VmaIntervalSet::new();
        for &(b, e) in ivs {
            s.insert(b, e);
        }
        s
    }

    fn as_pairs(s: &VmaIntervalSet) -> Vec<(Vma, Vma)> {
        s.iter().map(|iv| (iv.begin, iv.end)).collect()
    }

    #[test]
    fn gap_between_two_blocks() {
        // Scenario: two covered blocks with a hole between them.
        let covered = set(&[(0x10, 0x20), (0x25, 0x30)]);
        let gaps = compute_gaps(&covered, 0x10, 0x30);
        assert_eq!(as_pairs(&gaps), vec![(0x20, 0x25)]);
    }

    #[test]
    fn empty_coverage_is_one_gap() {
        let gaps = compute_gaps(&VmaIntervalSet::new(), 0x100, 0x180);
        assert_eq!(as_pairs(&gaps), vec![(0x100, 0x180)]);
    }

    #[test]
    fn full_coverage_has_no_gaps() {
        let covered = set(&[(0x100, 0x140), (0x140, 0x180)]);
        let gaps = compute_gaps(&covered, 0x100, 0x180);
        assert!(gaps.is_empty());
    }

    #[test]
    fn coverage_outside_bounds() {
        // Intervals left of start and right of end contribute nothing.
        let covered = set(&[(0x0, 0x8), (0x20, 0x28), (0x50, 0x60)]);
        let gaps = compute_gaps(&covered, 0x10, 0x40);
        assert_eq!(as_pairs(&gaps), vec![(0x10, 0x20), (0x28, 0x40)]);
    }

    #[test]
    fn overlapping_input_tolerated() {
        let covered = set(&[(0x10, 0x20), (0x18, 0x22), (0x30, 0x38)]);
        let gaps = compute_gaps(&covered, 0x10, 0x40);
        assert_eq!(as_pairs(&gaps), vec![(0x22, 0x30), (0x38, 0x40)]);
    }

    #[test]
    fn gaps_and_coverage_are_disjoint() {
        let covered = set(&[(0x12, 0x16), (0x20, 0x24), (0x24, 0x2c)]);
        let gaps = compute_gaps(&covered, 0x10, 0x30);
        for g in gaps.iter() {
            for vma in g.begin..g.end {
                assert!(!covered.covers(vma), "{:#x} both gap and covered", vma);
            }
        }
        // gaps ∪ covered ⊇ bounds
        for vma in 0x10..0x30u64 {
            assert!(covered.covers(vma) || gaps.covers(vma));
        }
    }
}
