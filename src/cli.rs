use clap::{Parser, Subcommand, ValueEnum};

#[derive(Parser, Debug)]
#[command(
    name = "tether",
    about = "Run a server in the background and relay commands into it",
    version
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    /// Verbosity level (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Run the host in the foreground: supervisor plus socket listener
    Serve,

    /// Start the server, spawning a background host if none is listening
    Start {
        /// Stay bound after starting and forward stdin lines as commands
        #[arg(long)]
        attach: bool,

        /// Arguments passed to the server (defaults to `server.args`)
        #[arg(last = true)]
        args: Vec<String>,
    },

    /// Send one command to the running server
    Exec {
        /// Command text, e.g. "status"
        command: String,
    },

    /// Trigger a notification action
    Action {
        #[command(subcommand)]
        action: ActionCommand,
    },

    /// Bind to the host and forward stdin lines as commands; detaching stops the server
    Attach,

    /// Show whether the server is running
    Status,

    /// Show project configuration
    Config {
        /// Emit machine-readable JSON output
        #[arg(long, default_value_t = false)]
        json: bool,
    },

    /// Print shell completion script
    Completions {
        #[arg(value_enum)]
        shell: CompletionShell,
    },
}

#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum ActionCommand {
    /// The notification's stop button
    Stop,
    /// The notification's "Run command" quick reply
    Run {
        /// Reply text
        text: Option<String>,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum CompletionShell {
    Bash,
    Zsh,
    Fish,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn start_passes_trailing_args_through() {
        let cli = Cli::try_parse_from(["tether", "start", "--attach", "--", "--port", "8303"]).unwrap();
        match cli.command {
            Command::Start { attach, args } => {
                assert!(attach);
                assert_eq!(args, vec!["--port", "8303"]);
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn start_without_args() {
        let cli = Cli::try_parse_from(["tether", "start"]).unwrap();
        assert!(matches!(
            cli.command,
            Command::Start { attach: false, ref args } if args.is_empty()
        ));
    }

    #[test]
    fn action_subcommands() {
        let cli = Cli::try_parse_from(["tether", "action", "stop"]).unwrap();
        assert!(matches!(
            cli.command,
            Command::Action {
                action: ActionCommand::Stop
            }
        ));

        let cli = Cli::try_parse_from(["tether", "action", "run", "echo hi"]).unwrap();
        match cli.command {
            Command::Action {
                action: ActionCommand::Run { text },
            } => assert_eq!(text.as_deref(), Some("echo hi")),
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn verbose_is_global() {
        let cli = Cli::try_parse_from(["tether", "status", "-vv"]).unwrap();
        assert_eq!(cli.verbose, 2);
    }

    #[test]
    fn exec_requires_command() {
        assert!(Cli::try_parse_from(["tether", "exec"]).is_err());
    }

    #[test]
    fn completions_parse_shell() {
        let cli = Cli::try_parse_from(["tether", "completions", "zsh"]).unwrap();
        assert!(matches!(
            cli.command,
            Command::Completions {
                shell: CompletionShell::Zsh
            }
        ));
    }
}
