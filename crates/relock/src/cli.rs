//! CLI definition and parsing using `clap`.

use clap::{Arg, ArgAction, ArgMatches, Command};
use relock_core::{Options, DEFAULT_ADDRESS, DEFAULT_EXPIRES_SECS, EXIT_CODE_ERROR};

/// Everything one invocation needs: the run options plus the lock key and
/// the command to guard.
#[derive(Debug)]
pub struct Invocation {
    /// Parsed run options.
    pub options: Options,
    /// Name of the lock to hold.
    pub key: String,
    /// Program to run while holding it.
    pub program: String,
    /// Arguments handed to the program.
    pub args: Vec<String>,
}

pub fn build_cli() -> Command {
    Command::new("relock")
        .about("Run a command while holding a named, expiring lock in Redis")
        .version(env!("CARGO_PKG_VERSION"))
        .arg(
            Arg::new("redis")
                .long("redis")
                .value_name("HOST:PORT")
                .default_value(DEFAULT_ADDRESS)
                .help("redis-server address"),
        )
        .arg(
            Arg::new("expires")
                .long("expires")
                .value_name("SECONDS")
                .default_value("86400")
                .value_parser(clap::value_parser!(u64).range(1..))
                .help("Auto-release the lock after this many seconds"),
        )
        .arg(
            Arg::new("keep")
                .long("keep")
                .action(ArgAction::SetTrue)
                .help("Keep the lock after the invoked command exits"),
        )
        .arg(
            Arg::new("no_delay")
                .short('n')
                .action(ArgAction::SetTrue)
                .overrides_with("delay")
                .help("No delay: if KEY is locked by another process, give up"),
        )
        .arg(
            Arg::new("delay")
                .short('N')
                .action(ArgAction::SetTrue)
                .overrides_with("no_delay")
                .help("(Default.) Delay: wait until a new lock on KEY can be obtained"),
        )
        .arg(
            Arg::new("exit_zero")
                .short('x')
                .action(ArgAction::SetTrue)
                .overrides_with("exit_nonzero")
                .help("If KEY is locked, exit zero"),
        )
        .arg(
            Arg::new("exit_nonzero")
                .short('X')
                .action(ArgAction::SetTrue)
                .overrides_with("exit_zero")
                .help("(Default.) If KEY is locked, print an error and exit nonzero"),
        )
        .arg(
            Arg::new("key")
                .value_name("KEY")
                .required(true)
                .help("Name of the lock"),
        )
        .arg(
            Arg::new("command")
                .value_name("PROGRAM [ARG...]")
                .required(true)
                .num_args(1..)
                .trailing_var_arg(true)
                .allow_hyphen_values(true)
                .help("Command to run while holding the lock"),
        )
}

/// Parse the process arguments, exiting with clap's usage error on bad
/// input.
pub fn parse() -> Invocation {
    invocation_from(&build_cli().get_matches())
}

fn invocation_from(matches: &ArgMatches) -> Invocation {
    let options = Options {
        address: matches
            .get_one::<String>("redis")
            .cloned()
            .unwrap_or_else(|| DEFAULT_ADDRESS.to_string()),
        expires_secs: matches
            .get_one::<u64>("expires")
            .copied()
            .unwrap_or(DEFAULT_EXPIRES_SECS),
        wait: !matches.get_flag("no_delay"),
        keep: matches.get_flag("keep"),
        lock_exit_code: if matches.get_flag("exit_zero") {
            0
        } else {
            EXIT_CODE_ERROR
        },
    };

    let key = matches.get_one::<String>("key").cloned().unwrap_or_default();
    let mut command = matches
        .get_many::<String>("command")
        .into_iter()
        .flatten()
        .cloned();
    let program = command.next().unwrap_or_default();
    let args: Vec<String> = command.collect();

    Invocation {
        options,
        key,
        program,
        args,
    }
}
