use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum, builder::{Styles, styling::{AnsiColor, Effects}}, crate_description, crate_name, crate_version};
use clap_complete::Shell;

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum DecompileModeCli {
    Pseudo,
    Structure,
    Disasm,
}

#[derive(Parser)]
#[command(name = crate_name!(),
    version = crate_version!(),
    about = crate_description!(),
    styles = Styles::styled()
        .header(AnsiColor::BrightGreen.on_default() | Effects::BOLD | Effects::UNDERLINE)
        .usage(AnsiColor::Cyan.on_default() | Effects::BOLD)
        .literal(AnsiColor::BrightCyan.on_default() | Effects::BOLD)
        .placeholder(AnsiColor::Cyan.on_default()))]
pub struct Cli {
    /// Log structuring and reconstruction details to stderr
    #[arg(short, long, global = true, default_value_t = false)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Option<TopLevel>,
}

#[derive(Subcommand)]
pub enum TopLevel {
    /// Decompiles an ActionScript 2 program description
    Decompile {
        #[command(subcommand)]
        command: DecompileCommand,
    },
    /// Generate shell completion
    Completion {
        #[arg(value_enum)]
        shell: Shell,
    },
}

#[derive(Subcommand)]
pub enum DecompileCommand {
    /// Decompiles a JSON program description file
    File {
        /// Path to the JSON program description
        path: PathBuf,

        /// Output mode
        #[arg(long, value_enum, default_value_t = DecompileModeCli::Pseudo)]
        mode: DecompileModeCli,

        /// Spaces per indentation level
        #[arg(long, default_value_t = 4)]
        indent: usize,

        /// Let function literals reuse the enclosing function's register names
        #[arg(long, default_value_t = false)]
        inherit_register_names: bool,

        /// Reject multi-entry loops before structuring
        #[arg(long, default_value_t = false)]
        check_reducibility: bool,
    }
}
