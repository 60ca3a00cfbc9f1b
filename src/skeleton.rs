//! The skeleton: File -> Group -> Proc records that the structure pass populates.
//!
//! CFG functions are matched to symbol-table functions by entry address. Several CFG functions
//! may land in one symbol (outlined regions get their own CFG function but stay inside the parent
//! symbol's range), so each symbol becomes a *group* of procedures.

use crate::cfg::Cfg;
use crate::inline_tree::TreeNode;
use crate::intervals::{Vma, VmaIntervalSet};
use crate::line_map::{LineMap, Locator};
use crate::log::*;
use crate::symtab::{SymFuncId, Symtab};
use std::collections::BTreeMap;

pub const UNKNOWN_FILE: &str = "<unknown file>";
pub const UNKNOWN_PROC: &str = "<unknown proc>";
pub const UNKNOWN_LINK: &str = "_unknown_proc_";

/// One binary procedure: a CFG function plus its finished inline tree.
#[derive(Debug)]
pub struct ProcInfo {
    /// Index into [`Cfg::functions`].
    pub func: usize,
    pub entry_vma: Vma,
    /// Line of the enclosing symbol's first statement, 0 when unknown.
    pub line_num: u32,
    /// The first procedure of its group.
    pub leader: bool,
    /// Filled in by the structure pass.
    pub root: TreeNode,
}

/// One symbol-table procedure, grouping the CFG functions whose entries fall inside its range.
#[derive(Debug)]
pub struct GroupInfo {
    pub sym_func: Option<SymFuncId>,
    pub link_name: String,
    pub pretty_name: String,
    pub start: Vma,
    pub end: Vma,
    /// Entry address -> procedure, in address order.
    pub proc_map: BTreeMap<Vma, ProcInfo>,
    /// Address ranges inside `[start, end)` not covered by any analyzed block. Filled in by the
    /// structure pass.
    pub gaps: VmaIntervalSet,
}

/// One source file and its procedure groups, keyed by enclosing symbol (`None` collects CFG
/// functions with no symbol at all).
#[derive(Debug)]
pub struct FileInfo {
    pub file_name: String,
    pub groups: BTreeMap<Option<SymFuncId>, GroupInfo>,
}

/// All files of one load module, keyed by file name. Built once per load module and torn down
/// after emission.
pub type FileMap = BTreeMap<String, FileInfo>;

/// Index the CFG functions into File -> Group -> Proc records.
pub fn make_skeleton(cfg: &Cfg, symtab: &Symtab, line_map: &LineMap) -> FileMap {
    let mut file_map = FileMap::new();
    let mut locator = Locator::new(line_map);

    for (fid, func) in cfg.functions.iter().enumerate() {
        let sym_id = symtab.containing_function(func.entry_vma);

        let mut link_name = UNKNOWN_LINK.to_owned();
        let mut pretty_name = UNKNOWN_PROC.to_owned();
        let mut file_name = String::new();
        let mut line_num = 0;
        let (mut group_start, mut group_end) = (func.entry_vma, func.entry_vma);

        if let Some(sym_id) = sym_id {
            let sym = symtab.function(sym_id);
            link_name = sym.mangled_name.clone();
            if let Some(typed) = &sym.typed_name {
                pretty_name = typed.clone();
            }
            group_start = sym.start;
            group_end = sym.end;

            // the file owning the group is wherever the symbol's first statement points
            if let Some(loc) = locator.resolve(sym.start, sym.module) {
                file_name = loc.file;
                line_num = loc.line;
            }
        }

        if file_name.is_empty() {
            file_name = UNKNOWN_FILE.to_owned();
        }

        trace!("skeleton proc";
            "entry" => format!("{:#x}", func.entry_vma),
            "file" => &file_name,
            "link" => &link_name);

        let finfo = file_map.entry(file_name.clone()).or_insert_with(|| FileInfo {
            file_name,
            groups: BTreeMap::new(),
        });
        let ginfo = finfo.groups.entry(sym_id).or_insert_with(|| GroupInfo {
            sym_func: sym_id,
            link_name,
            pretty_name,
            start: group_start,
            end: group_end,
            proc_map: BTreeMap::new(),
            gaps: VmaIntervalSet::new(),
        });
        ginfo.proc_map.insert(
            func.entry_vma,
            ProcInfo {
                func: fid,
                entry_vma: func.entry_vma,
                line_num,
                leader: false,
                root: TreeNode::new(),
            },
        );
    }

    file_map
}
