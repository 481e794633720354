use clap::{Arg, ArgAction, Command};

use crate::pool::MAX_SIZE_CEILING;

pub const ARG_POOL_MAX_SIZE: &str = "pool-max-size";
pub const ARG_POOL_QUEUE_LIMIT: &str = "pool-queue-limit";
pub const ARG_POOL_NO_WAIT: &str = "pool-no-wait";
pub const ARG_POOL_ACQUIRE_TIMEOUT: &str = "pool-acquire-timeout-seconds";
pub const ARG_POOL_IDLE_TIMEOUT: &str = "pool-idle-timeout-seconds";

#[must_use]
pub fn with_args(command: Command) -> Command {
    command
        .arg(
            Arg::new(ARG_POOL_MAX_SIZE)
                .long(ARG_POOL_MAX_SIZE)
                .help("Maximum number of storage connections (default: 10, at most 115)")
                .env("AUTHGATE_POOL_MAX_SIZE")
                .value_parser(clap::value_parser!(u64).range(1..=MAX_SIZE_CEILING as u64)),
        )
        .arg(
            Arg::new(ARG_POOL_QUEUE_LIMIT)
                .long(ARG_POOL_QUEUE_LIMIT)
                .help("Maximum number of requests waiting for a connection (0 = unbounded)")
                .env("AUTHGATE_POOL_QUEUE_LIMIT")
                .default_value("0")
                .value_parser(clap::value_parser!(usize)),
        )
        .arg(
            Arg::new(ARG_POOL_NO_WAIT)
                .long(ARG_POOL_NO_WAIT)
                .help("Fail immediately instead of queueing when every connection is busy")
                .env("AUTHGATE_POOL_NO_WAIT")
                .action(ArgAction::SetTrue),
        )
        .arg(
            Arg::new(ARG_POOL_ACQUIRE_TIMEOUT)
                .long(ARG_POOL_ACQUIRE_TIMEOUT)
                .help("Give up waiting for a connection after this many seconds")
                .env("AUTHGATE_POOL_ACQUIRE_TIMEOUT_SECONDS")
                .value_parser(clap::value_parser!(u64).range(1..)),
        )
        .arg(
            Arg::new(ARG_POOL_IDLE_TIMEOUT)
                .long(ARG_POOL_IDLE_TIMEOUT)
                .help("Close connections idle for this many seconds")
                .env("AUTHGATE_POOL_IDLE_TIMEOUT_SECONDS")
                .value_parser(clap::value_parser!(u64).range(1..)),
        )
}
