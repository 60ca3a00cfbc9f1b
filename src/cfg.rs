//! The control-flow-graph view of a load module, as delivered by the external CFG provider.
//!
//! This crate does not parse binaries; it consumes an already-built CFG (functions, basic blocks,
//! a Tarjan loop tree with back edges, and call edges) and reconciles it with the line map. See
//! [`crate::export_lifter`] for how these structures get populated from a `.cfg-exported` file.

use crate::containers::unordered::UnorderedMap;
use crate::intervals::Vma;

/// Index of a [`Block`] within its owning [`CfgFunction`].
pub type BlockId = usize;

/// One basic block: a contiguous instruction range plus its successor edges.
#[derive(Debug)]
pub struct Block {
    pub start: Vma,
    pub end: Vma,
    /// Per-instruction (address, length), in ascending address order.
    pub insns: Vec<(Vma, u32)>,
    /// Successor blocks, within the owning function.
    pub targets: Vec<BlockId>,
}

impl Block {
    /// Address of the final instruction, where conditional-branch statements live. `None` for a
    /// degenerate empty block.
    pub fn last_insn_vma(&self) -> Option<Vma> {
        self.insns.last().map(|&(vma, _)| vma)
    }
}

/// CFG-level facts about one natural (or irreducible) loop.
#[derive(Debug)]
pub struct CfgLoop {
    /// All blocks inclusively in the loop, subloop blocks included.
    pub blocks: Vec<BlockId>,
    /// Source blocks of back edges into the loop head(s).
    pub back_edge_sources: Vec<BlockId>,
    /// Entry blocks. Exactly one for a reducible loop; more for an irreducible one. Order is
    /// preserved from the provider, and the first entry is used as the loop's representative vma.
    pub entries: Vec<BlockId>,
}

/// One node of the loop nesting tree. The root of a function's tree carries no loop; every
/// other node carries exactly one.
#[derive(Debug)]
pub struct LoopTreeNode {
    pub cfg_loop: Option<CfgLoop>,
    /// Provider-generated name, e.g. `loop_0x4007c0`. Diagnostic only.
    pub name: String,
    pub children: Vec<LoopTreeNode>,
}

impl LoopTreeNode {
    /// An empty tree root (function with no loops).
    pub fn empty() -> Self {
        Self {
            cfg_loop: None,
            name: String::new(),
            children: vec![],
        }
    }
}

/// One function as the CFG provider sees it: a machine-level entry point and a block list. This
/// is distinct from a symbol-table function; several `CfgFunction`s can live inside one symbol
/// (outlining), and the skeleton indexer groups them.
#[derive(Debug)]
pub struct CfgFunction {
    pub name: String,
    pub entry_vma: Vma,
    pub blocks: Vec<Block>,
    pub loop_tree: LoopTreeNode,
    /// Call edges originating in this function: (call-site address, callee entry address). The
    /// call-site address is the last instruction of the calling block.
    pub call_edges: Vec<(Vma, Vma)>,
}

impl CfgFunction {
    /// Write this function's CFG in dot (graphviz) format.
    pub fn write_dot<W: std::io::Write>(&self, w: &mut W) -> std::io::Result<()> {
        type Node = usize;
        type Edge = (usize, usize);

        struct Graph<'a> {
            func: &'a CfgFunction,
        }

        impl<'a> dot::Labeller<'a, Node, Edge> for Graph<'a> {
            fn graph_id(&'a self) -> dot::Id<'a> {
                dot::Id::new(format!("cfg_{:x}", self.func.entry_vma)).unwrap()
            }
            fn node_id(&'a self, n: &Node) -> dot::Id<'a> {
                dot::Id::new(format!("b{}", n)).unwrap()
            }
            fn node_label<'b>(&'b self, n: &Node) -> dot::LabelText<'b> {
                let b = &self.func.blocks[*n];
                dot::LabelText::label(format!("{:#x}..{:#x}", b.start, b.end))
            }
        }

        impl<'a> dot::GraphWalk<'a, Node, Edge> for Graph<'a> {
            fn nodes(&self) -> dot::Nodes<'a, Node> {
                (0..self.func.blocks.len()).collect::<Vec<_>>().into()
            }
            fn edges(&'a self) -> dot::Edges<'a, Edge> {
                self.func
                    .blocks
                    .iter()
                    .enumerate()
                    .flat_map(|(src, b)| b.targets.iter().map(move |&trg| (src, trg)))
                    .collect::<Vec<_>>()
                    .into()
            }
            fn source(&self, e: &Edge) -> Node {
                e.0
            }
            fn target(&self, e: &Edge) -> Node {
                e.1
            }
        }

        dot::render(&Graph { func: self }, w)
    }

    /// Render this function's CFG in dot (graphviz) format.
    pub fn generate_dot(&self) -> String {
        let mut s: Vec<u8> = vec![];
        self.write_dot(&mut s).unwrap();
        String::from_utf8(s).unwrap()
    }
}

/// The CFG view of one load module.
#[derive(Debug, Default)]
pub struct Cfg {
    /// Load module name.
    pub name: String,
    pub functions: Vec<CfgFunction>,
}

impl Cfg {
    /// How many functions claim a block starting at `block_start`? Outlined or shared code can
    /// make the same block a member of several functions; a function whose *entry* block is
    /// claimed more than once is already represented via its other owner and gets skipped by the
    /// skeleton pass.
    pub fn block_claim_counts(&self) -> UnorderedMap<Vma, usize> {
        let mut counts: UnorderedMap<Vma, usize> = Default::default();
        for func in &self.functions {
            for block in &func.blocks {
                *counts.entry(block.start).or_insert(0) += 1;
            }
        }
        counts
    }
}
