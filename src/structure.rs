//! The structure pass: reconcile the CFG's loop nesting with the line map's inlining info.
//!
//! Three independent hierarchies disagree with each other here: the loop nesting recovered from
//! CFG back edges, the compiler's inlining decisions (visible only as per-address FLP sequences),
//! and the discrete per-instruction line map. This module walks each procedure's loop tree
//! bottom-up, builds raw inline trees per loop from its exclusive blocks, decides at which inline
//! depth each loop header belongs, and merges everything into one tree per procedure.

use crate::analysis_config::CONFIG;
use crate::cfg::{BlockId, Cfg, CfgFunction, CfgLoop, LoopTreeNode};
use crate::containers::unordered::{UnorderedMap, UnorderedSet};
use crate::inline_tree::{find_stmt, FlpIndex, FlpSeqn, LoopInfo, StmtInfo, StmtMap, TreeNode};
use crate::intervals::{compute_gaps, Vma, VmaIntervalSet};
use crate::line_map::{LineMap, Locator};
use crate::log::*;
use crate::skeleton::{make_skeleton, FileMap, GroupInfo};
use crate::string_table::{StringIndex, StringTable, EMPTY_INDEX};
use crate::symtab::Symtab;
use std::collections::BTreeMap;

/// Build the full structure for one load module: skeleton, per-procedure inline trees with
/// reconciled loops, and per-group gaps.
pub fn make_structure(
    cfg: &Cfg,
    symtab: &Symtab,
    line_map: &LineMap,
    strtab: &mut StringTable,
) -> FileMap {
    let mut file_map = make_skeleton(cfg, symtab, line_map);
    let claim_counts = cfg.block_claim_counts();

    for finfo in file_map.values_mut() {
        let file_name = finfo.file_name.clone();
        for ginfo in finfo.groups.values_mut() {
            do_function_list(cfg, symtab, line_map, &claim_counts, &file_name, ginfo, strtab);
        }
    }

    file_map
}

/// Info on candidates for loop header.
struct HeaderInfo {
    block: BlockId,
    is_src: bool,
    is_cond: bool,
    score: i32,
}

/// Build the inline tree for every procedure in one group.
///
/// One symbol-table proc may contain multiple embedded CFG functions (outlined parallel regions
/// and the like). For those, record the call edge from the enclosing function and strip the
/// inline prefix at the call source from the embedded function's tree.
fn do_function_list(
    cfg: &Cfg,
    symtab: &Symtab,
    line_map: &LineMap,
    claim_counts: &UnorderedMap<Vma, usize>,
    file_name: &str,
    ginfo: &mut GroupInfo,
    strtab: &mut StringTable,
) {
    let num_funcs = ginfo.proc_map.len();
    let file_base_index = strtab.intern_basename(file_name);
    let hint_module = ginfo
        .sym_func
        .and_then(|id| symtab.function(id).module);

    // map of internal call edges (target entry -> call site) across all funcs in this group,
    // used to strip the inline seqn at the call source from the target func
    let mut call_map: BTreeMap<Vma, Vma> = BTreeMap::new();
    if num_funcs > 1 {
        for pinfo in ginfo.proc_map.values() {
            for &(src, targ) in &cfg.functions[pinfo.func].call_edges {
                call_map.insert(targ, src);
            }
        }
    }

    let mut covered = VmaIntervalSet::new();
    let mut locator = Locator::new(line_map);
    let link_name = ginfo.link_name.clone();

    let mut num = 0;
    for pinfo in ginfo.proc_map.values_mut() {
        let func = &cfg.functions[pinfo.func];
        num += 1;
        if num == 1 {
            pinfo.leader = true;
        }

        debug!("structure proc";
            "entry" => format!("{:#x}", func.entry_vma),
            "which" => format!("{}/{}", num, num_funcs),
            "link" => &link_name,
            "parse" => &func.name);

        // inline seqn of the call site reaching this func, if there is one
        let prefix: FlpSeqn = match call_map.get(&func.entry_vma) {
            Some(&src) => line_map
                .inline_sequence(src)
                .iter()
                .map(|fr| FlpIndex::new(strtab, &fr.file, fr.line, &fr.proc))
                .collect(),
            None => vec![],
        };

        // if this function's entry block also belongs to another function, its code is already
        // represented there
        if CONFIG.skip_duplicated_functions
            && num_funcs > 1
            && claim_counts.get(&func.entry_vma).copied().unwrap_or(0) > 1
        {
            debug!("skipping duplicated function"; "parse" => &func.name);
            continue;
        }

        if CONFIG.enable_gap_analysis {
            for block in &func.blocks {
                covered.insert(block.start, block.end);
            }
        }

        let mut visited = vec![false; func.blocks.len()];
        let mut root = TreeNode::new();

        // traverse the loop (Tarjan) tree
        let loops = do_loop_tree(
            func,
            &mut visited,
            &func.loop_tree,
            file_base_index,
            strtab,
            &mut locator,
            hint_module,
            line_map,
        );

        // process any blocks not in a loop
        for bid in 0..func.blocks.len() {
            if !visited[bid] {
                do_block(
                    func,
                    &mut visited,
                    bid,
                    &mut root,
                    strtab,
                    &mut locator,
                    hint_module,
                    line_map,
                );
            }
        }

        // merge the loops into the proc's inline tree
        for info in loops {
            root.merge_loop(&[], info);
        }

        // delete the inline prefix from this func, if non-empty
        if !prefix.is_empty() && CONFIG.enable_prefix_stripping {
            root = delete_inline_prefix(root, &prefix);
        }

        if CONFIG.debug_dump_inline_trees {
            debug!("final inline tree";
                "entry" => format!("{:#x}", func.entry_vma),
                "stmts_and_loops" => root.total_count());
        }

        pinfo.root = root;
    }

    if CONFIG.enable_gap_analysis {
        ginfo.gaps = compute_gaps(&covered, ginfo.start, ginfo.end);
    }
}

/// Walk the loop tree below `ltnode`, returning the finished loops.
///
/// If the loop at this node is non-null (internal node), the list contains one element for that
/// loop. If the loop is null (root), it contains one element for each subtree.
#[allow(clippy::too_many_arguments)]
fn do_loop_tree(
    func: &CfgFunction,
    visited: &mut Vec<bool>,
    ltnode: &LoopTreeNode,
    file_base_index: StringIndex,
    strtab: &mut StringTable,
    locator: &mut Locator,
    hint_module: Option<usize>,
    line_map: &LineMap,
) -> Vec<LoopInfo> {
    let mut my_list: Vec<LoopInfo> = vec![];

    for child in &ltnode.children {
        my_list.extend(do_loop_tree(
            func,
            visited,
            child,
            file_base_index,
            strtab,
            locator,
            hint_module,
            line_map,
        ));
    }

    let cfg_loop = match &ltnode.cfg_loop {
        Some(l) => l,
        // no loop at this node (root node): pass the children through
        None => return my_list,
    };

    // otherwise finish this loop: add the leftover blocks, attach the subloops at the raw root
    // (subloops are strictly nested, so they never need a deeper insertion), and reparent
    let mut my_loop = do_loop_late(
        func, visited, cfg_loop, &ltnode.name, strtab, locator, hint_module, line_map,
    );

    for sub in my_list {
        my_loop.merge_loop(&[], sub);
    }

    let info = find_loop_header(func, my_loop, cfg_loop, &ltnode.name, file_base_index, strtab);

    vec![info]
}

/// Post-order step for one loop, after its subloops: build the raw inline tree over the blocks
/// exclusive to this loop (everything inclusively in the loop but not already visited).
#[allow(clippy::too_many_arguments)]
fn do_loop_late(
    func: &CfgFunction,
    visited: &mut Vec<bool>,
    cfg_loop: &CfgLoop,
    loop_name: &str,
    strtab: &mut StringTable,
    locator: &mut Locator,
    hint_module: Option<usize>,
    line_map: &LineMap,
) -> TreeNode {
    let mut root = TreeNode::new();

    trace!("begin loop"; "name" => loop_name, "parse" => &func.name);

    for &bid in &cfg_loop.blocks {
        if !visited[bid] {
            do_block(
                func, visited, bid, &mut root, strtab, locator, hint_module, line_map,
            );
        }
    }

    root
}

/// Process one basic block: resolve each instruction to (file, line), compute its inline
/// sequence, and insert the statement at the innermost level of the tree.
#[allow(clippy::too_many_arguments)]
fn do_block(
    func: &CfgFunction,
    visited: &mut Vec<bool>,
    bid: BlockId,
    root: &mut TreeNode,
    strtab: &mut StringTable,
    locator: &mut Locator,
    hint_module: Option<usize>,
    line_map: &LineMap,
) {
    if visited[bid] {
        return;
    }
    visited[bid] = true;

    let block = &func.blocks[bid];
    for &(vma, len) in &block.insns {
        let (file, line) = match locator.resolve(vma, hint_module) {
            Some(loc) => (loc.file, loc.line),
            None => (String::new(), 0),
        };

        let path: FlpSeqn = line_map
            .inline_sequence(vma)
            .iter()
            .map(|fr| FlpIndex::new(strtab, &fr.file, fr.line, &fr.proc))
            .collect();

        let stmt = StmtInfo {
            vma,
            len,
            file_index: strtab.intern(&file),
            base_index: strtab.intern_basename(&file),
            line_num: line,
        };
        root.insert_statement(&path, stmt);
    }
}

/// Decide the inlining depth and (file, line) of one loop's header, and package the loop.
///
/// Loop headers are file/line facts, not VMA facts: the right depth is the shallowest level at
/// which the CFG's own notion of "loop condition" still corresponds to a statement physically
/// present at that level. Start at the raw root and descend; an inline branch or a subloop is an
/// absolute stopping point. The hard case is one inline subtree plus statements: stop if a loop
/// condition statement lives here, else reparent the statements and continue down.
fn find_loop_header(
    func: &CfgFunction,
    mut root: TreeNode,
    cfg_loop: &CfgLoop,
    loop_name: &str,
    file_base_index: StringIndex,
    strtab: &StringTable,
) -> LoopInfo {
    // Step 1 -- build the list of loop exit conditions.
    //
    // A stmt is a loop exit condition if its block has outgoing edges both inside and outside
    // the loop; back-edge sources among them get a tie-break bonus. Both checks count entries
    // the same way whether the loop is reducible or not.
    let bset: UnorderedSet<BlockId> = cfg_loop.blocks.iter().copied().collect();
    let mut clist: BTreeMap<Vma, HeaderInfo> = BTreeMap::new();

    for &bid in &cfg_loop.blocks {
        let block = &func.blocks[bid];
        let src_vma = match block.last_insn_vma() {
            Some(v) => v,
            None => continue,
        };
        let mut in_loop = false;
        let mut out_loop = false;
        for &t in &block.targets {
            if bset.contains(&t) {
                in_loop = true;
            } else {
                out_loop = true;
            }
        }
        if in_loop && out_loop {
            clist.insert(
                src_vma,
                HeaderInfo {
                    block: bid,
                    is_src: false,
                    is_cond: true,
                    score: 2,
                },
            );
        }
    }

    for &bid in &cfg_loop.back_edge_sources {
        if let Some(src_vma) = func.blocks[bid].last_insn_vma() {
            if let Some(hi) = clist.get_mut(&src_vma) {
                hi.is_src = true;
                hi.score += 1;
            }
        }
    }

    // Step 2 -- find the right inline depth.
    //
    // base_index is the file context used to accept reparented statements and to prefer header
    // files: the enclosing source file at the top level, none once we have descended (an inline
    // call site only shows where a function was called from, not where it is defined).
    let mut path: FlpSeqn = vec![];
    let mut pending: StmtMap = StmtMap::new();
    let mut base_index: Option<StringIndex> = Some(file_base_index);

    'descend: while root.nodes.len() == 1 && root.loops.is_empty() {
        let flp = *root.nodes.keys().next().unwrap();

        // look for a loop cond at this level
        for (&vma, hi) in &clist {
            if !hi.is_cond {
                continue;
            }
            if root.covers_stmt(vma) {
                break 'descend;
            }
            // reparented stmts must also match the file name of the call site
            if let Some(sinfo) = find_stmt(&pending, vma) {
                if sinfo.base_index == flp.base_index {
                    break 'descend;
                }
            }
        }

        // reparent the stmts and proceed to the next level
        pending.append(&mut root.stmts);
        let subtree = root
            .nodes
            .remove(&flp)
            .expect("sole child must exist during header descent");
        root = subtree;
        path.push(flp);
        base_index = None;

        trace!("header descent";
            "line" => flp.line_num,
            "file" => strtab.resolve(flp.file_index),
            "proc" => strtab.resolve(flp.proc_index));
    }

    // Step 3 -- reattach the pending stmts at this level (they are never discarded, even when no
    // exit candidate ever matched).
    root.stmts.append(&mut pending);

    // Step 4 -- choose a loop header file/line at this level.
    let mut file_ans = EMPTY_INDEX;
    let mut base_ans = EMPTY_INDEX;
    let mut line_ans = 0u32;

    if !root.nodes.is_empty() || !root.loops.is_empty() {
        // There is an inline callsite or subloop: use its file name and the minimum line number
        // among all callsites, subloops and loop conditions with the same file. With an
        // inconsistent choice of files, prefer the file matching the enclosing function, but only
        // at top-level (no inline steps taken).
        let candidates: Vec<(StringIndex, StringIndex, u32)> = root
            .nodes
            .keys()
            .map(|flp| (flp.file_index, flp.base_index, flp.line_num))
            .chain(
                root.loops
                    .iter()
                    .map(|l| (l.file_index, l.base_index, l.line_num)),
            )
            .collect();
        let chosen = candidates
            .iter()
            .copied()
            .find(|c| base_index.map_or(true, |b| c.1 == b))
            .unwrap_or(candidates[0]);
        file_ans = chosen.0;
        base_ans = chosen.1;
        line_ans = chosen.2;

        // min of inline callsites
        for flp in root.nodes.keys() {
            if flp.base_index == base_ans && flp.line_num < line_ans {
                line_ans = flp.line_num;
            }
        }
        // min of subloops
        for linfo in &root.loops {
            if linfo.base_index == base_ans && linfo.line_num < line_ans {
                line_ans = linfo.line_num;
            }
        }
        // min of loop cond stmts
        for (&vma, hi) in &clist {
            if !hi.is_cond {
                continue;
            }
            if let Some(sinfo) = find_stmt(&root.stmts, vma) {
                if sinfo.base_index == base_ans && sinfo.line_num < line_ans {
                    line_ans = sinfo.line_num;
                }
            }
        }
    } else {
        // Only terminal stmts: select the file of the best-scoring candidate (loop cond plus
        // back-edge source, then loop cond, then any stmt) and the min line within that file.
        // The ascending-vma scan makes the lowest address win among equal scores.
        let mut max_score = -1i32;
        for (&vma, sinfo) in &root.stmts {
            let score = clist
                .range(vma..)
                .next()
                .filter(|(&cvma, _)| sinfo.member(cvma))
                .map(|(_, hi)| hi.score)
                .unwrap_or(0);

            if score > max_score {
                max_score = score;
                file_ans = sinfo.file_index;
                base_ans = sinfo.base_index;
                line_ans = sinfo.line_num;
            } else if score == max_score
                && sinfo.base_index == base_ans
                && sinfo.line_num < line_ans
            {
                line_ans = sinfo.line_num;
            }
        }
    }

    debug!("loop header";
        "name" => loop_name,
        "line" => line_ans,
        "file" => strtab.resolve(file_ans));

    // Entry selection is arbitrary-but-consistent for irreducible loops: the first entry block.
    let entry_vma = cfg_loop
        .entries
        .first()
        .map(|&bid| func.blocks[bid].start)
        .unwrap_or(0);

    LoopInfo {
        node: root,
        path,
        name: loop_name.to_owned(),
        entry_vma,
        file_index: file_ans,
        base_index: base_ans,
        line_num: line_ans,
    }
}

/// Delete the inline sequence `prefix` from the top of `root`'s tree, returning the subtree at
/// the end of the prefix.
///
/// There should be no statements, loops or sibling subtrees along the deleted spine, but when
/// there are, they are hoisted into the final node rather than dropped (statement and loop counts
/// are conserved). A prefix entry with no matching child stops the walk at the last matching
/// level.
pub fn delete_inline_prefix(mut root: TreeNode, prefix: &[FlpIndex]) -> TreeNode {
    let mut stmts = StmtMap::new();
    let mut loops: Vec<LoopInfo> = vec![];

    for flp in prefix {
        if !root.nodes.contains_key(flp) {
            break;
        }
        let mut subtree = root
            .nodes
            .remove(flp)
            .expect("checked by contains_key above");

        // hoist statements and loops found along the spine
        stmts.append(&mut root.stmts);
        loops.append(&mut root.loops);

        // reparent sibling subtrees into the kept spine child
        for (k, node) in std::mem::take(&mut root.nodes) {
            subtree.merge_edge(k, node);
        }

        root = subtree;
    }

    // reattach the stmts and loops
    root.stmts.append(&mut stmts);
    root.loops.extend(loops);

    root
}
