//! The inline tree: nested inline call sites with statements and loops attached.
//!
//! Internal nodes are keyed by FLP (file, line, procedure) triples identifying one inline call
//! site; leaves are per-instruction statements; reconciled loops hang off the node they belong
//! to. Two statements from different basic blocks land in the same subtree exactly when their
//! inline ancestries agree FLP-by-FLP, which is what collapses a loop body scattered across
//! blocks back into one textual unit.
//!
//! The tree is strictly owning: a node is never referenced from two parents, and every reparent
//! is a move out of the old parent's child map. All splicing goes through the merge operations
//! here.

use crate::containers::unordered::{UnorderedMap, UnorderedMapEntry};
use crate::intervals::Vma;
use crate::string_table::{StringIndex, StringTable};
use std::collections::BTreeMap;

/// An interned (file, line, procedure) triple identifying one inline call site.
///
/// `base_index` is the interned basename of the file and is derived from `file_index`; equality
/// and ordering use only the (file, line, proc) triple.
#[derive(Clone, Copy, Debug)]
pub struct FlpIndex {
    pub file_index: StringIndex,
    pub base_index: StringIndex,
    pub line_num: u32,
    pub proc_index: StringIndex,
}

impl FlpIndex {
    pub fn new(strtab: &mut StringTable, file: &str, line: u32, proc: &str) -> Self {
        Self {
            file_index: strtab.intern(file),
            base_index: strtab.intern_basename(file),
            line_num: line,
            proc_index: strtab.intern(proc),
        }
    }

    fn key(&self) -> (StringIndex, u32, StringIndex) {
        (self.file_index, self.line_num, self.proc_index)
    }
}

impl PartialEq for FlpIndex {
    fn eq(&self, other: &Self) -> bool {
        self.key() == other.key()
    }
}
impl Eq for FlpIndex {}
impl PartialOrd for FlpIndex {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}
impl Ord for FlpIndex {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.key().cmp(&other.key())
    }
}
impl std::hash::Hash for FlpIndex {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.key().hash(state)
    }
}

/// An ordered inline call chain, outermost to innermost.
pub type FlpSeqn = Vec<FlpIndex>;

/// One source statement: an instruction range attributed to a (file, line).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct StmtInfo {
    pub vma: Vma,
    pub len: u32,
    pub file_index: StringIndex,
    pub base_index: StringIndex,
    pub line_num: u32,
}

impl StmtInfo {
    /// Does this statement's instruction range contain `vma`?
    pub fn member(&self, vma: Vma) -> bool {
        self.vma <= vma && vma < self.vma + self.len as Vma
    }
}

/// Statements within one tree node, keyed by address. Ordered, so scans over statements are
/// deterministic (the reconciler's tie-breaks depend on ascending-vma order).
pub type StmtMap = BTreeMap<Vma, StmtInfo>;

/// Find the statement in `stmts` whose instruction range contains `vma`, if any.
pub fn find_stmt(stmts: &StmtMap, vma: Vma) -> Option<&StmtInfo> {
    stmts
        .range(..=vma)
        .next_back()
        .map(|(_, s)| s)
        .filter(|s| s.member(vma))
}

/// One node of the inline tree.
#[derive(Default, Debug)]
pub struct TreeNode {
    /// One child per distinct inline call site at this level.
    pub nodes: UnorderedMap<FlpIndex, TreeNode>,
    /// Statements attributed directly to this level.
    pub stmts: StmtMap,
    /// Reconciled loops attached at this level.
    pub loops: Vec<LoopInfo>,
}

impl TreeNode {
    pub fn new() -> Self {
        Default::default()
    }

    /// Insert one statement at the end of the inline `path`, creating intermediate nodes as
    /// needed. Inserting the same statement twice leaves a single leaf.
    pub fn insert_statement(&mut self, path: &[FlpIndex], stmt: StmtInfo) {
        let mut node = self;
        for flp in path {
            node = node.nodes.entry(*flp).or_insert_with(TreeNode::new);
        }
        node.stmts.insert(stmt.vma, stmt);
    }

    /// Does any statement at this level contain `vma`?
    pub fn covers_stmt(&self, vma: Vma) -> bool {
        find_stmt(&self.stmts, vma).is_some()
    }

    /// Merge `other` into `self`: statements and loops are carried over, children with equal FLP
    /// keys are merged recursively.
    pub fn merge_tree(&mut self, other: TreeNode) {
        let TreeNode {
            nodes,
            stmts,
            loops,
        } = other;
        self.stmts.extend(stmts);
        self.loops.extend(loops);
        for (flp, child) in nodes {
            self.merge_edge(flp, child);
        }
    }

    /// Attach `subtree` under the call site `flp`, merging if a child with that key already
    /// exists.
    pub fn merge_edge(&mut self, flp: FlpIndex, subtree: TreeNode) {
        match self.nodes.entry(flp) {
            UnorderedMapEntry::Occupied(e) => e.into_mut().merge_tree(subtree),
            UnorderedMapEntry::Vacant(e) => {
                e.insert(subtree);
            }
        }
    }

    /// Attach a finished loop at the end of the inline `path` below this node, creating
    /// intermediate nodes as needed. Ownership of the loop transfers here; a loop record is
    /// attached into exactly one node.
    pub fn merge_loop(&mut self, path: &[FlpIndex], info: LoopInfo) {
        let mut node = self;
        for flp in path {
            node = node.nodes.entry(*flp).or_insert_with(TreeNode::new);
        }
        node.loops.push(info);
    }

    /// Total number of statements and loop records in this subtree, loop bodies included.
    /// Reparenting operations conserve this count.
    pub fn total_count(&self) -> usize {
        let own = self.stmts.len() + self.loops.len();
        let in_loops: usize = self.loops.iter().map(|l| l.node.total_count()).sum();
        let in_children: usize = self.nodes.values().map(|n| n.total_count()).sum();
        own + in_loops + in_children
    }
}

/// One reconciled loop, detached from the CFG: its body as an inline tree, the inline chain it
/// was found under, and the chosen header location.
#[derive(Debug)]
pub struct LoopInfo {
    /// The loop body.
    pub node: TreeNode,
    /// Inline chain from the enclosing node down to where the body begins. Diagnostic only.
    pub path: FlpSeqn,
    /// Provider-generated display name.
    pub name: String,
    /// Representative entry address (first entry block of the CFG loop).
    pub entry_vma: Vma,
    pub file_index: StringIndex,
    pub base_index: StringIndex,
    pub line_num: u32,
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::string_table::StringTable;

    fn stmt(strtab: &mut StringTable, vma: Vma, len: u32, file: &str, line: u32) -> StmtInfo {
        StmtInfo {
            vma,
            len,
            file_index: strtab.intern(file),
            base_index: strtab.intern_basename(file),
            line_num: line,
        }
    }

    #[test]
    fn insert_is_idempotent() {
        let mut strtab = StringTable::new();
        let path = vec![FlpIndex::new(&mut strtab, "a.c", 10, "callee")];
        let s = stmt(&mut strtab, 0x100, 4, "b.c", 3);

        let mut root = TreeNode::new();
        root.insert_statement(&path, s);
        root.insert_statement(&path, s);

        assert_eq!(root.total_count(), 1);
        let child = root.nodes.get(&path[0]).unwrap();
        assert_eq!(child.stmts.len(), 1);
    }

    #[test]
    fn equal_flp_keys_share_a_node() {
        let mut strtab = StringTable::new();
        let flp_a = FlpIndex::new(&mut strtab, "a.c", 10, "callee");
        let flp_b = FlpIndex::new(&mut strtab, "a.c", 10, "callee");
        assert_eq!(flp_a, flp_b);

        let mut root = TreeNode::new();
        root.insert_statement(&[flp_a], stmt(&mut strtab, 0x100, 4, "x.c", 1));
        root.insert_statement(&[flp_b], stmt(&mut strtab, 0x104, 4, "x.c", 2));

        assert_eq!(root.nodes.len(), 1);
        assert_eq!(root.nodes.get(&flp_a).unwrap().stmts.len(), 2);
    }

    #[test]
    fn merge_tree_merges_children_recursively() {
        let mut strtab = StringTable::new();
        let outer = FlpIndex::new(&mut strtab, "a.c", 10, "f");
        let inner = FlpIndex::new(&mut strtab, "a.c", 20, "g");

        let mut left = TreeNode::new();
        left.insert_statement(&[outer, inner], stmt(&mut strtab, 0x100, 4, "g.c", 5));
        let mut right = TreeNode::new();
        right.insert_statement(&[outer, inner], stmt(&mut strtab, 0x110, 4, "g.c", 6));
        right.insert_statement(&[], stmt(&mut strtab, 0x120, 4, "a.c", 11));

        left.merge_tree(right);
        assert_eq!(left.total_count(), 3);
        assert_eq!(left.nodes.len(), 1);
        let mid = left.nodes.get(&outer).unwrap();
        assert_eq!(mid.nodes.get(&inner).unwrap().stmts.len(), 2);
    }

    #[test]
    fn find_stmt_respects_ranges() {
        let mut strtab = StringTable::new();
        let mut stmts = StmtMap::new();
        let s = stmt(&mut strtab, 0x100, 8, "a.c", 1);
        stmts.insert(s.vma, s);

        assert!(find_stmt(&stmts, 0x100).is_some());
        assert!(find_stmt(&stmts, 0x107).is_some());
        assert!(find_stmt(&stmts, 0x108).is_none());
        assert!(find_stmt(&stmts, 0xff).is_none());
    }
}
