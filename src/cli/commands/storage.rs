use clap::{Arg, Command, builder::PossibleValuesParser};

pub const ARG_STORAGE: &str = "storage";
pub const ARG_PROVIDER_URL: &str = "provider-url";
pub const ARG_PROVIDER_KEY: &str = "provider-key";

#[must_use]
pub fn with_args(command: Command) -> Command {
    command
        .arg(
            Arg::new(ARG_STORAGE)
                .long(ARG_STORAGE)
                .help("Where credentials live")
                .long_help(
                    "Where credentials live. `direct` keeps accounts and password hashes in the database; `delegated` verifies credentials at the identity provider and keeps only profiles in the database.",
                )
                .env("AUTHGATE_STORAGE")
                .default_value("direct")
                .value_parser(PossibleValuesParser::new(["direct", "delegated"])),
        )
        .arg(
            Arg::new(ARG_PROVIDER_URL)
                .long(ARG_PROVIDER_URL)
                .help("Identity provider base URL, e.g. https://project.supabase.co")
                .env("AUTHGATE_PROVIDER_URL")
                .required_if_eq(ARG_STORAGE, "delegated"),
        )
        .arg(
            Arg::new(ARG_PROVIDER_KEY)
                .long(ARG_PROVIDER_KEY)
                .help("Identity provider API key")
                .env("AUTHGATE_PROVIDER_KEY")
                .hide_env_values(true)
                .required_if_eq(ARG_STORAGE, "delegated"),
        )
}
