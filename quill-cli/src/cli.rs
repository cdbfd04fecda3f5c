use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// Define CLI arguments
#[derive(Parser)]
#[command(
    version,
    about = "Quill agent file distribution tool",
    long_about = "Fetch files, directory trees, and URLs from a quill master (or from\n\
                  locally mounted file roots in masterless mode) into the agent cache.\n\
                  \n\
                  Locators use the quill:// scheme and resolve against the master's\n\
                  per-environment file roots; http:// and https:// URLs are fetched\n\
                  into the external-files cache instead."
)]
pub struct CliArgs {
    /// Path to the agent configuration file (JSON)
    #[arg(
        short,
        long,
        default_value = "/etc/quill/agent.json",
        help = "Agent configuration file; missing default falls back to built-in defaults"
    )]
    pub config: PathBuf,

    /// Path to the hex-encoded session key for the master channel
    #[arg(
        short,
        long,
        help = "File holding the hex-encoded AES session key (required for the remote backend)"
    )]
    pub key_file: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, help = "Enable detailed debug logging")]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// Fetch a single file into the cache or to an explicit destination
    Get {
        /// quill:// locator of the file
        path: String,
        /// Explicit destination path (defaults to the agent cache)
        dest: Option<PathBuf>,
        #[arg(long, help = "Create missing parent directories of the destination")]
        makedirs: bool,
        #[arg(short, long, default_value = "base")]
        env: String,
    },
    /// Fetch a quill:// locator or an http/https URL
    GetUrl {
        url: String,
        /// Explicit destination path (defaults to the agent cache)
        dest: Option<PathBuf>,
        #[arg(long, help = "Create missing parent directories of the destination")]
        makedirs: bool,
        #[arg(short, long, default_value = "base")]
        env: String,
    },
    /// Replicate a server-side directory tree under a destination
    GetDir {
        /// quill:// locator of the directory
        path: String,
        /// Local directory the tree is recreated under
        dest: PathBuf,
        #[arg(short, long, default_value = "base")]
        env: String,
    },
    /// Cache a single file without printing its content
    CacheFile {
        path: String,
        #[arg(short, long, default_value = "base")]
        env: String,
    },
    /// Cache every server file under a path prefix
    CacheDir {
        path: String,
        #[arg(short, long, default_value = "base")]
        env: String,
    },
    /// Cache every file the server exposes for an environment
    CacheMaster {
        #[arg(short, long, default_value = "base")]
        env: String,
    },
    /// Print the server-side hash of a file
    Hash {
        path: String,
        #[arg(short, long, default_value = "base")]
        env: String,
    },
    /// List every file the server exposes for an environment
    List {
        #[arg(short, long, default_value = "base")]
        env: String,
    },
    /// List server-side directories that contain no files
    ListEmptyDirs {
        #[arg(short, long, default_value = "base")]
        env: String,
    },
    /// Print the cached location of a file, if it is cached
    IsCached {
        path: String,
        #[arg(short, long, default_value = "base")]
        env: String,
    },
    /// Resolve a dotted manifest name and cache the state file
    Manifest {
        /// Dotted name, e.g. `web.nginx`
        name: String,
        #[arg(short, long, default_value = "base")]
        env: String,
    },
    /// Print the master's configuration as JSON
    MasterOpts,
    /// Print this node's external classifier assignments as JSON
    ExtNodes,
}
