//! The symbol-table view of a load module: function boundaries and names.

use crate::intervals::Vma;

/// Index of a [`SymFunction`] within its [`Symtab`].
pub type SymFuncId = usize;

/// One symbol-table function. Its `[start, end)` range may contain several CFG functions when the
/// compiler outlined lexical regions (OpenMP parallel pragmas and the like).
#[derive(Debug)]
pub struct SymFunction {
    /// Mangled (link) name.
    pub mangled_name: String,
    /// Demangled/typed name, when the symbol table has one.
    pub typed_name: Option<String>,
    pub start: Vma,
    pub end: Vma,
    /// Index of the source module this symbol belongs to, into the line map's module list. Used
    /// as the lookup hint by the [`Locator`](crate::line_map::Locator).
    pub module: Option<usize>,
}

/// Symbol table for one load module, ordered by function start address.
#[derive(Debug, Default)]
pub struct Symtab {
    functions: Vec<SymFunction>,
}

impl Symtab {
    pub fn new(mut functions: Vec<SymFunction>) -> Self {
        functions.sort_by_key(|f| f.start);
        Self { functions }
    }

    pub fn function(&self, id: SymFuncId) -> &SymFunction {
        &self.functions[id]
    }

    pub fn functions(&self) -> impl Iterator<Item = &SymFunction> {
        self.functions.iter()
    }

    /// The symbol function whose `[start, end)` range contains `vma`, if any. With nested or
    /// overlapping symbols the innermost (latest-starting) one wins.
    pub fn containing_function(&self, vma: Vma) -> Option<SymFuncId> {
        let idx = self.functions.partition_point(|f| f.start <= vma);
        self.functions[..idx]
            .iter()
            .enumerate()
            .rev()
            .find(|(_, f)| vma < f.end)
            .map(|(id, _)| id)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn sym(name: &str, start: Vma, end: Vma) -> SymFunction {
        SymFunction {
            mangled_name: name.into(),
            typed_name: None,
            start,
            end,
            module: None,
        }
    }

    #[test]
    fn containing_function_lookup() {
        let st = Symtab::new(vec![sym("a", 0x100, 0x200), sym("b", 0x200, 0x280)]);
        assert_eq!(st.containing_function(0x100), Some(0));
        assert_eq!(st.containing_function(0x1ff), Some(0));
        assert_eq!(st.containing_function(0x200), Some(1));
        assert_eq!(st.containing_function(0x280), None);
        assert_eq!(st.containing_function(0x0), None);
    }

    #[test]
    fn outlined_region_inside_symbol() {
        // An outlined CFG function's entry lands inside the enclosing symbol's range.
        let st = Symtab::new(vec![sym("main", 0x400, 0x600)]);
        assert_eq!(st.containing_function(0x4f0), Some(0));
    }
}
