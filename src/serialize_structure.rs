//! Serialize a finished structure tree to a machine-readable form.
//!
//! The emitter only reads the tree through its public traversal surface; nothing downstream
//! needs the in-memory tree once this text form exists.

use crate::cfg::Cfg;
use crate::inline_tree::{FlpIndex, LoopInfo, TreeNode};
use crate::skeleton::FileMap;
use crate::string_table::StringTable;
use std::collections::BTreeMap;

/// A borrow of everything needed to print one load module's structure.
pub struct SerializableStructure<'a> {
    file_map: &'a FileMap,
    cfg: &'a Cfg,
    strtab: &'a StringTable,
}

impl<'a> SerializableStructure<'a> {
    pub fn new(file_map: &'a FileMap, cfg: &'a Cfg, strtab: &'a StringTable) -> Self {
        Self {
            file_map,
            cfg,
            strtab,
        }
    }

    /// Serialize the structure
    pub fn serialize(&self) -> String {
        let mut res = String::new();
        self.serialize_to(&mut res).unwrap();
        res
    }

    /// Serialize to the given string
    fn serialize_to(&self, f: &mut String) -> std::fmt::Result {
        use std::fmt::Write;

        writeln!(f, "LOAD_MODULE\t{}", self.cfg.name)?;
        writeln!(f)?;

        for finfo in self.file_map.values() {
            writeln!(f, "FILE\t{}", finfo.file_name)?;

            for ginfo in finfo.groups.values() {
                writeln!(
                    f,
                    "\tGROUP\t{}\t{:#x}\t{:#x}",
                    ginfo.link_name, ginfo.start, ginfo.end
                )?;

                for pinfo in ginfo.proc_map.values() {
                    let func = &self.cfg.functions[pinfo.func];
                    writeln!(
                        f,
                        "\t\tPROC\t{:#x}\t{}\tl={}{}",
                        pinfo.entry_vma,
                        func.name,
                        pinfo.line_num,
                        if pinfo.leader { "\tleader" } else { "" }
                    )?;
                    self.write_node(f, &pinfo.root, 3)?;
                }

                for gap in ginfo.gaps.iter() {
                    writeln!(f, "\t\tGAP\t{:#x}\t{:#x}", gap.begin, gap.end)?;
                }
            }
            writeln!(f)?;
        }

        Ok(())
    }

    fn write_node(&self, f: &mut String, node: &TreeNode, depth: usize) -> std::fmt::Result {
        use std::fmt::Write;
        let indent = "\t".repeat(depth);

        for stmt in node.stmts.values() {
            writeln!(
                f,
                "{}STMT\t{:#x}\t{}\t{}:{}",
                indent,
                stmt.vma,
                stmt.len,
                self.strtab.resolve(stmt.file_index),
                stmt.line_num
            )?;
        }

        for linfo in &node.loops {
            self.write_loop(f, linfo, depth)?;
        }

        // independent of the container feature, emit children in key order
        let ordered: BTreeMap<&FlpIndex, &TreeNode> = node.nodes.iter().collect();
        for (flp, child) in ordered {
            writeln!(
                f,
                "{}INLINE\t{}:{}\t{}",
                indent,
                self.strtab.resolve(flp.file_index),
                flp.line_num,
                self.strtab.resolve(flp.proc_index)
            )?;
            self.write_node(f, child, depth + 1)?;
        }

        Ok(())
    }

    fn write_loop(&self, f: &mut String, linfo: &LoopInfo, depth: usize) -> std::fmt::Result {
        use std::fmt::Write;
        let indent = "\t".repeat(depth);

        writeln!(
            f,
            "{}LOOP\t{}\t{}:{}\tentry={:#x}",
            indent,
            linfo.name,
            self.strtab.resolve(linfo.file_index),
            linfo.line_num,
            linfo.entry_vma
        )?;
        // the inline path the loop was found under, for diagnostics
        for flp in &linfo.path {
            writeln!(
                f,
                "{}\tPATH\t{}:{}\t{}",
                indent,
                self.strtab.resolve(flp.file_index),
                flp.line_num,
                self.strtab.resolve(flp.proc_index)
            )?;
        }
        self.write_node(f, &linfo.node, depth + 1)
    }
}
