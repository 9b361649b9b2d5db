use clap::{CommandFactory, Parser};

use crate::cli::{Cli, DecompileCommand, DecompileModeCli, TopLevel};

mod cli;

fn main() {
    let cli = Cli::parse();

    let level = if cli.verbose { log::LevelFilter::Debug } else { log::LevelFilter::Info };
    env_logger::Builder::new()
        .filter_module("deas_lib", level)
        .parse_default_env()
        .target(env_logger::Target::Stderr)
        .format_timestamp(None)
        .format_target(false)
        .init();

    match cli.command {
        Some(TopLevel::Decompile { command }) => match command {
            DecompileCommand::File {
                path,
                mode,
                indent,
                inherit_register_names,
                check_reducibility,
            } => {
                let mode = match mode {
                    DecompileModeCli::Pseudo => deas_lib::DecompileMode::Pseudo,
                    DecompileModeCli::Structure => deas_lib::DecompileMode::Structure,
                    DecompileModeCli::Disasm => deas_lib::DecompileMode::Disasm,
                };
                log::debug!("decompiling {path:?} ({mode:?})");
                match std::fs::read(&path) {
                    Ok(bytes) => match deas_lib::decompile_json(
                        &bytes,
                        deas_lib::DecompileOptions {
                            mode,
                            indent_width: indent,
                            inherit_register_names,
                            check_reducibility,
                        },
                    ) {
                        Ok(out) => {
                            print!("{out}");
                        }
                        Err(e) => {
                            eprintln!("decompile error: {e}");
                            std::process::exit(1);
                        }
                    },
                    Err(e) => {
                        eprintln!("failed to read {path:?}: {e}");
                        std::process::exit(1);
                    }
                }
            }
        },
        Some(TopLevel::Completion { shell }) => {
            let mut cmd = Cli::command();
            let bin_name = cmd.get_name().to_string();
            clap_complete::generate(shell, &mut cmd, bin_name, &mut std::io::stdout());
        }
        None => {
            if let Err(e) = Cli::command().print_help() {
                eprintln!("{e}");
            }
        }
    }
}
