//! Shell completion generation for the tether CLI.

use std::io::{self, Write};

use anyhow::Result;
use clap::CommandFactory;
use clap_complete::{Shell, generate};

use crate::cli::{Cli, CompletionShell};

fn shell(shell: CompletionShell) -> Shell {
    match shell {
        CompletionShell::Bash => Shell::Bash,
        CompletionShell::Zsh => Shell::Zsh,
        CompletionShell::Fish => Shell::Fish,
    }
}

pub fn write(target: CompletionShell, out: &mut dyn Write) -> Result<()> {
    let mut cmd = Cli::command();
    generate(shell(target), &mut cmd, "tether", out);
    Ok(())
}

pub fn print(target: CompletionShell) -> Result<()> {
    write(target, &mut io::stdout())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn maps_all_supported_shell_variants() {
        assert_eq!(shell(CompletionShell::Bash), Shell::Bash);
        assert_eq!(shell(CompletionShell::Zsh), Shell::Zsh);
        assert_eq!(shell(CompletionShell::Fish), Shell::Fish);
    }

    #[test]
    fn bash_script_names_the_binary_and_subcommands() {
        let mut out = Vec::new();
        write(CompletionShell::Bash, &mut out).unwrap();
        let script = String::from_utf8(out).unwrap();
        assert!(script.contains("tether"));
        assert!(script.contains("attach"));
        assert!(script.contains("completions"));
    }
}
