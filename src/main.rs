use structrec::*;

use std::path::PathBuf;

use clap::Parser;

/// Reconstruct program structure from binary CFGs
#[derive(Parser, Debug)]
#[clap(about, version, author)]
enum Args {
    /// Reconstruct structure from an exported CFG
    FromExport {
        /// Path to an exported CFG file, produced by the CFG exporter script
        exported_cfg: PathBuf,
        /// Path to output file for the structure dump
        #[clap(long)]
        output_structure: Option<PathBuf>,
        /// Output the CFG of every analyzed function as a GraphViz `.dot` file to the given path
        #[clap(long)]
        debug_output_graphviz: Option<PathBuf>,
        /// Disable terminal logging, even for high severity alerts. Strongly discouraged for normal
        /// use.
        #[clap(long)]
        debug_disable_terminal_logging: bool,
        /// Force blocking for terminal logging. If too many messages are being spewed the logger,
        /// by default, does not block, but instead dumps a dropped-messages alert. This option
        /// forces it to block and dump even if too many are being sent.
        #[clap(long)]
        debug_forced_blocking_terminal_logging: bool,
        /// Path to send log (as JSON) to
        ///
        /// Error or higher severity alerts will still continue being shown at stderr (in addition
        /// to being added to the log)
        #[clap(long = "--log")]
        log_file: Option<PathBuf>,
        /// Debug level (repeat for more: 0-warn, 1-info, 2-debug, 3-trace)
        #[clap(short, long, parse(from_occurrences))]
        debug: usize,
        /// Advanced configuration options to tweak the analysis behavior
        #[clap(short = 'Z', long, arg_enum)]
        advanced_config: Vec<analysis_config::CommandLineAnalysisConfig>,
    },
}

fn main() {
    let args = Args::parse();

    match args {
        Args::FromExport {
            exported_cfg,
            output_structure,
            debug_output_graphviz,
            debug_disable_terminal_logging,
            debug_forced_blocking_terminal_logging,
            log_file,
            debug,
            advanced_config,
        } => {
            let _log_guard = slog_scope::set_global_logger(crate::log::FileAndTermDrain::new(
                debug,
                debug_disable_terminal_logging,
                debug_forced_blocking_terminal_logging,
                log_file,
            ));

            analysis_config::AnalysisConfig::initialize(advanced_config);

            let (cfg, symtab, line_map) = export_lifter::lift_from(
                &std::fs::read_to_string(exported_cfg).expect("CFG export could not be read"),
            );

            let mut strtab = string_table::StringTable::new();
            let file_map = structure::make_structure(&cfg, &symtab, &line_map, &mut strtab);

            if let Some(path) = debug_output_graphviz {
                use std::io::Write;
                let mut f = std::fs::File::create(path).unwrap();
                for func in &cfg.functions {
                    write!(f, "{}", func.generate_dot()).unwrap();
                }
            }

            let serializable = serialize_structure::SerializableStructure::new(
                &file_map,
                &cfg,
                &strtab,
            );

            if let Some(path) = output_structure {
                use std::io::Write;
                write!(
                    std::fs::File::create(path).unwrap(),
                    "{}",
                    serializable.serialize()
                )
                .unwrap();
            } else {
                println!("{}", serializable.serialize());
            }

            log::trace!("Done");
        }
    }
}
