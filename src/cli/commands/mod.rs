pub mod logging;
pub mod pool;
pub mod storage;

use clap::{
    Arg, ColorChoice, Command,
    builder::{
        PossibleValuesParser,
        styling::{AnsiColor, Effects, Styles},
    },
};

use crate::hasher::{MAX_COST, MIN_COST};

pub const ARG_PORT: &str = "port";
pub const ARG_DSN: &str = "dsn";
pub const ARG_LOGIN_RESPONSE: &str = "login-response";
pub const ARG_TOKEN_SECRET: &str = "token-secret";
pub const ARG_BCRYPT_COST: &str = "bcrypt-cost";

pub const CMD_SETUP_DATABASE: &str = "setup-database";

fn dsn_arg() -> Arg {
    Arg::new(ARG_DSN)
        .short('d')
        .long(ARG_DSN)
        .help("Database connection string")
        .long_help(
            "Database connection string. Holds accounts in direct mode and profiles in delegated mode.",
        )
        .env("AUTHGATE_DSN")
        .required(true)
}

fn setup_database() -> Command {
    let command = Command::new(CMD_SETUP_DATABASE)
        .about("Create the account schema through the connection pool, then exit")
        .arg(dsn_arg());
    pool::with_args(command)
}

#[must_use]
pub fn new() -> Command {
    let styles = Styles::styled()
        .header(AnsiColor::Yellow.on_default() | Effects::BOLD)
        .usage(AnsiColor::Green.on_default() | Effects::BOLD)
        .literal(AnsiColor::Blue.on_default() | Effects::BOLD)
        .placeholder(AnsiColor::Green.on_default());

    let long_version: &'static str = Box::leak(
        format!("{} - {}", env!("CARGO_PKG_VERSION"), crate::GIT_COMMIT_HASH).into_boxed_str(),
    );

    let command = Command::new("authgate")
        .about(env!("CARGO_PKG_DESCRIPTION"))
        .version(env!("CARGO_PKG_VERSION"))
        .long_version(long_version)
        .color(ColorChoice::Auto)
        .styles(styles)
        .arg(
            Arg::new(ARG_PORT)
                .short('p')
                .long(ARG_PORT)
                .help("Port to listen on")
                .default_value("8080")
                .env("AUTHGATE_PORT")
                .value_parser(clap::value_parser!(u16)),
        )
        .subcommand_negates_reqs(true)
        .subcommand(setup_database())
        .arg(dsn_arg())
        .arg(
            Arg::new(ARG_LOGIN_RESPONSE)
                .long(ARG_LOGIN_RESPONSE)
                .help("What a successful login returns: a session token or the account summary")
                .env("AUTHGATE_LOGIN_RESPONSE")
                .required(true)
                .value_parser(PossibleValuesParser::new(["token", "summary"])),
        )
        .arg(
            Arg::new(ARG_TOKEN_SECRET)
                .long(ARG_TOKEN_SECRET)
                .help("HMAC secret used to sign session tokens (at least 32 bytes)")
                .env("AUTHGATE_TOKEN_SECRET")
                .hide_env_values(true)
                .required(true),
        )
        .arg(
            Arg::new(ARG_BCRYPT_COST)
                .long(ARG_BCRYPT_COST)
                .help("bcrypt cost factor")
                .env("AUTHGATE_BCRYPT_COST")
                .default_value("10")
                .value_parser(clap::value_parser!(u32).range(i64::from(MIN_COST)..=i64::from(MAX_COST))),
        );

    let command = pool::with_args(command);
    let command = storage::with_args(command);
    logging::with_args(command)
}
