use clap::{Parser, Subcommand};

/// CLI surface definition.
#[derive(Parser, Debug)]
#[command(
    name = "picvault",
    about = "Private, encrypted list of your favourite image URLs",
    version,
    propagate_version = true
)]
pub struct Cli {
    /// User id owning the collection (overrides PICVAULT_USER_ID and the config file).
    #[arg(long, global = true)]
    pub user: Option<String>,

    /// Optional subcommand; defaults to `list` when absent.
    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Reload the collection from the store and print it.
    List,
    /// Validate and add one or more image URLs.
    Add {
        #[arg(required = true)]
        urls: Vec<String>,
    },
    /// Replace the tags of an image (no tags clears them).
    Tag { url: String, tags: Vec<String> },
    /// Toggle the liked flag of one or more images.
    Like {
        #[arg(required = true)]
        urls: Vec<String>,
    },
    /// Remove one or more images.
    Remove {
        #[arg(required = true)]
        urls: Vec<String>,
    },
    /// Check the cipher and the document store for the current user.
    Health,
    /// Print version and exit.
    Version,
    /// Manage CLI configuration.
    #[command(subcommand)]
    Config(ConfigCommand),
}

#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum ConfigCommand {
    /// Create a default config file if one does not exist.
    Init,
}
