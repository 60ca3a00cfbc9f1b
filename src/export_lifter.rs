//! A lifter from `.cfg-exported` files.
//!
//! Binary parsing, symbol lookup and CFG construction are external to this crate; an exporter
//! script runs over the load module and dumps everything the structure analysis needs into a
//! plain-text `.cfg-exported` file. This module lifts that file into the [`Cfg`], [`Symtab`] and
//! [`LineMap`] structures the analysis consumes.
//!
//! Malformed input is a hard error: the exporter and this lifter version together, so a parse
//! failure means a broken export, not a data-quality problem.

use crate::cfg::{Block, Cfg, CfgFunction, CfgLoop, LoopTreeNode};
use crate::intervals::Vma;
use crate::line_map::{InlineFrame, LineMap, Module, StatementRange};
use crate::symtab::{SymFunction, Symtab};

use itertools::Itertools;

/// Lift a `.cfg-exported` file into the provider structures.
pub fn lift_from(cfg_exported: &str) -> (Cfg, Symtab, LineMap) {
    // Sanity check that we have a lift-able `.cfg-exported` file
    assert!(cfg_exported.starts_with("PROGRAM\n"));
    assert!(cfg_exported.contains("MODULES\n"));
    assert!(cfg_exported.contains("CFG_LISTING"));

    // Grab the sections
    let mut sections = cfg_exported.trim().split("\n\n");
    let program_section = strip_header(sections.next().unwrap(), "PROGRAM");
    let modules_section = strip_header(sections.next().unwrap(), "MODULES");
    let symbols_section = strip_header(sections.next().unwrap(), "SYMBOLS");
    let linemap_section = strip_header(sections.next().unwrap(), "LINEMAP");
    let inlines_section = strip_header(sections.next().unwrap(), "INLINES");
    let cfg_listing_section = {
        let mut s: Vec<&str> = sections.map(|x| x.trim()).collect();
        assert!(!s.is_empty());
        s[0] = s[0].strip_prefix("CFG_LISTING").unwrap().trim();
        if s[0].is_empty() {
            s.into_iter().skip(1).collect()
        } else {
            s
        }
    };

    // Parse the program section
    let program_name = match &*program_section
        .lines()
        .next()
        .unwrap()
        .trim()
        .split(' ')
        .collect::<Vec<_>>()
    {
        ["name", n] => n.to_string(),
        l => panic!("Expected `name`, got {:?}", l),
    };

    // Parse the modules section: `<idx> <name>`
    let module_names: Vec<String> = modules_section
        .lines()
        .enumerate()
        .map(|(i, l)| {
            let (idx, name) = l.trim().split_once(' ').unwrap();
            assert_eq!(idx.parse::<usize>().unwrap(), i, "modules out of order");
            name.to_string()
        })
        .collect();

    // Parse the symbols section: `<start> <end> <module|-> <mangled> [typed...]`
    let sym_functions: Vec<SymFunction> = symbols_section
        .lines()
        .filter(|l| !l.trim().is_empty())
        .map(|l| {
            let mut it = l.trim().split_whitespace();
            let start = parse_vma(it.next().unwrap());
            let end = parse_vma(it.next().unwrap());
            let module = match it.next().unwrap() {
                "-" => None,
                m => Some(m.parse::<usize>().unwrap()),
            };
            let mangled_name = it.next().unwrap().to_string();
            let rest = it.join(" ");
            let typed_name = (!rest.is_empty()).then(|| rest);
            SymFunction {
                mangled_name,
                typed_name,
                start,
                end,
                module,
            }
        })
        .collect();

    // Parse the linemap section: `<module> <start> <end> <line> <file>`
    let mut ranges_per_module: Vec<Vec<StatementRange>> = vec![vec![]; module_names.len()];
    for l in linemap_section.lines().filter(|l| !l.trim().is_empty()) {
        let f: Vec<&str> = l.trim().split_whitespace().collect();
        assert_eq!(f.len(), 5, "bad linemap line: {:?}", l);
        let module: usize = f[0].parse().unwrap();
        ranges_per_module[module].push(StatementRange {
            start: parse_vma(f[1]),
            end: parse_vma(f[2]),
            line: f[3].parse().unwrap(),
            file: f[4].to_string(),
        });
    }
    let modules = module_names
        .into_iter()
        .zip(ranges_per_module)
        .map(|(name, ranges)| Module::new(name, ranges))
        .collect();

    // Parse the inlines section: `<start> <end>` followed by (file, line, proc) triples
    let inline_ranges = inlines_section
        .lines()
        .filter(|l| !l.trim().is_empty())
        .map(|l| {
            let mut it = l.trim().split_whitespace();
            let start = parse_vma(it.next().unwrap());
            let end = parse_vma(it.next().unwrap());
            let frames: Vec<InlineFrame> = it
                .tuples()
                .map(|(file, line, proc)| InlineFrame {
                    file: file.to_string(),
                    line: line.parse().unwrap(),
                    proc: proc.to_string(),
                })
                .collect();
            assert!(!frames.is_empty(), "inline range with no frames: {:?}", l);
            (start, end, frames)
        })
        .collect();

    let functions = cfg_listing_section
        .iter()
        .map(|listing| parse_function_listing(listing))
        .collect();

    (
        Cfg {
            name: program_name,
            functions,
        },
        Symtab::new(sym_functions),
        LineMap::new(modules, inline_ranges),
    )
}

fn strip_header<'a>(section: &'a str, header: &str) -> &'a str {
    section
        .strip_prefix(header)
        .unwrap_or_else(|| panic!("Expected `{}` section", header))
        .trim()
}

fn parse_vma(s: &str) -> Vma {
    let s = s.strip_prefix("0x").unwrap_or(s);
    Vma::from_str_radix(s, 16).unwrap_or_else(|_| panic!("bad vma {:?}", s))
}

// Raw loop record before the nesting tree is assembled.
struct LoopRec {
    parent: Option<usize>,
    name: String,
    blocks: Vec<usize>,
    back_edge_sources: Vec<usize>,
    entries: Vec<usize>,
}

/// Parse one function paragraph of the CFG listing.
///
/// ```text
/// function <entry> <name>
/// block <start> <end>
/// insns <vma>:<len> ...
/// targets <block-id> ...
/// loop <parent|-> <name>
/// lblocks <block-id> ...
/// lback <block-id> ...
/// lentries <block-id> ...
/// call <src> <targ>
/// ```
///
/// Blocks and loops are numbered implicitly in order of appearance; `insns`/`targets` attach to
/// the latest `block`, the `l*` lines to the latest `loop`. Loop parents must precede children.
fn parse_function_listing(listing: &str) -> CfgFunction {
    let mut lines = listing.lines().map(|l| l.trim()).filter(|l| !l.is_empty());

    let header = lines.next().unwrap();
    let (entry_vma, name) = match &*header.split_whitespace().collect::<Vec<_>>() {
        ["function", entry, name] => (parse_vma(entry), name.to_string()),
        l => panic!("Expected `function`, got {:?}", l),
    };

    let mut blocks: Vec<Block> = vec![];
    let mut loops: Vec<LoopRec> = vec![];
    let mut call_edges: Vec<(Vma, Vma)> = vec![];

    for l in lines {
        let mut it = l.split_whitespace();
        let tag = it.next().unwrap();
        match tag {
            "block" => {
                let start = parse_vma(it.next().unwrap());
                let end = parse_vma(it.next().unwrap());
                blocks.push(Block {
                    start,
                    end,
                    insns: vec![],
                    targets: vec![],
                });
            }
            "insns" => {
                let block = blocks.last_mut().expect("insns before any block");
                for tok in it {
                    let (vma, len) = tok.split_once(':').unwrap();
                    block.insns.push((parse_vma(vma), len.parse().unwrap()));
                }
            }
            "targets" => {
                let block = blocks.last_mut().expect("targets before any block");
                block.targets = it.map(|t| t.parse().unwrap()).collect();
            }
            "loop" => {
                let parent = match it.next().unwrap() {
                    "-" => None,
                    p => Some(p.parse::<usize>().unwrap()),
                };
                let name = it.next().unwrap_or("loop").to_string();
                if let Some(p) = parent {
                    assert!(p < loops.len(), "loop parent must precede child");
                }
                loops.push(LoopRec {
                    parent,
                    name,
                    blocks: vec![],
                    back_edge_sources: vec![],
                    entries: vec![],
                });
            }
            "lblocks" => {
                let lp = loops.last_mut().expect("lblocks before any loop");
                lp.blocks = it.map(|t| t.parse().unwrap()).collect();
            }
            "lback" => {
                let lp = loops.last_mut().expect("lback before any loop");
                lp.back_edge_sources = it.map(|t| t.parse().unwrap()).collect();
            }
            "lentries" => {
                let lp = loops.last_mut().expect("lentries before any loop");
                lp.entries = it.map(|t| t.parse().unwrap()).collect();
            }
            "call" => {
                let src = parse_vma(it.next().unwrap());
                let targ = parse_vma(it.next().unwrap());
                call_edges.push((src, targ));
            }
            t => panic!("unknown CFG listing tag {:?} in {:?}", t, l),
        }
    }

    for block in &blocks {
        for &t in &block.targets {
            assert!(t < blocks.len(), "target block out of range");
        }
    }

    CfgFunction {
        name,
        entry_vma,
        blocks,
        loop_tree: assemble_loop_tree(loops),
        call_edges,
    }
}

/// Assemble flat loop records (parent-before-child) into the nesting tree.
fn assemble_loop_tree(recs: Vec<LoopRec>) -> LoopTreeNode {
    let mut slots: Vec<Option<LoopTreeNode>> = recs
        .iter()
        .map(|r| {
            Some(LoopTreeNode {
                cfg_loop: Some(CfgLoop {
                    blocks: r.blocks.clone(),
                    back_edge_sources: r.back_edge_sources.clone(),
                    entries: r.entries.clone(),
                }),
                name: r.name.clone(),
                children: vec![],
            })
        })
        .collect();

    // children carry higher indexes than their parents, so moving in reverse attaches complete
    // subtrees
    let mut root = LoopTreeNode::empty();
    for i in (0..recs.len()).rev() {
        let node = slots[i].take().expect("each slot is taken exactly once");
        match recs[i].parent {
            Some(p) => slots[p]
                .as_mut()
                .expect("parent still present, it has a smaller index")
                .children
                .push(node),
            None => root.children.push(node),
        }
    }
    root.children.reverse();

    root
}
