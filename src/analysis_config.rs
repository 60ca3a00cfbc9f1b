//! A global store of flags that can impact the structure analysis.
//!
//! WARNING: Currently only supports a single consistent configuration amongst threads (i.e., cannot
//! have different configurations for different analysis executions in the same process).

/// The global configuration store. Its fields are expected to be accessed across the program via
/// the global [`CONFIG`](static@CONFIG).
pub struct AnalysisConfig {
    /// Record per-block coverage and report uncovered ranges ("gaps") within each procedure
    /// group's symbol bounds.
    pub enable_gap_analysis: bool,
    /// Skip a CFG function whose entry block is claimed by more than one CFG function; its code is
    /// assumed to already be represented via its other owner.
    pub skip_duplicated_functions: bool,
    /// Strip the inline prefix at the call source from an embedded (outlined) procedure's tree.
    pub enable_prefix_stripping: bool,
    /// Log a summary of each procedure's finished inline tree at debug level.
    pub debug_dump_inline_trees: bool,
}

impl AnalysisConfig {
    /// Internal method: sets up initialization
    #[allow(static_mut_refs)]
    fn from_initialized() -> Self {
        let init = unsafe {
            INTERNAL_CONFIG_INITIALIZER
                .take()
                .expect("Should be initialized only once")
        };
        init.unwrap_or_default()
    }

    /// Initialize with the given command line configuration. Should only be called once, and should
    /// only be called from `main`.
    #[allow(static_mut_refs)]
    pub fn initialize(command_line_config: Vec<CommandLineAnalysisConfig>) {
        let prev = unsafe { INTERNAL_CONFIG_INITIALIZER.replace(Some(command_line_config.into())) };
        assert!(prev.is_some(), "Performed double initialization");
        lazy_static::initialize(&CONFIG);
    }
}

/// Internal initialization detail.
static mut INTERNAL_CONFIG_INITIALIZER: Option<Option<AnalysisConfig>> = Some(None);

lazy_static::lazy_static! {
    /// The global configuration store
    pub static ref CONFIG: AnalysisConfig = AnalysisConfig::from_initialized();
}

#[derive(clap::ArgEnum, Clone, Debug)]
/// Analysis configuration parameters
pub enum CommandLineAnalysisConfig {
    DisableGapAnalysis,
    DisableDuplicateFunctionSkipping,
    DisablePrefixStripping,
    EnableDebugDumpInlineTrees,
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        AnalysisConfig {
            enable_gap_analysis: true,
            skip_duplicated_functions: true,
            enable_prefix_stripping: true,
            debug_dump_inline_trees: false,
        }
    }
}

impl From<Vec<CommandLineAnalysisConfig>> for AnalysisConfig {
    fn from(v: Vec<CommandLineAnalysisConfig>) -> Self {
        use CommandLineAnalysisConfig::*;
        let mut r = AnalysisConfig::default();
        for v in v {
            match v {
                DisableGapAnalysis => {
                    r.enable_gap_analysis = false;
                }
                DisableDuplicateFunctionSkipping => {
                    r.skip_duplicated_functions = false;
                }
                DisablePrefixStripping => {
                    r.enable_prefix_stripping = false;
                }
                EnableDebugDumpInlineTrees => {
                    r.debug_dump_inline_trees = true;
                }
            }
        }
        r
    }
}
