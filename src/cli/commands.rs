//! CLI command definitions

use clap::{Parser, Subcommand, ValueEnum};
use std::net::SocketAddr;

#[derive(Parser)]
#[command(name = "carelink")]
#[command(about = "Session layer and guardian event fan-out", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Database URL; in-memory stores are used when unset
    #[arg(long, env = "DATABASE_URL", global = true)]
    pub database_url: Option<String>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Start the Carelink server
    Serve {
        /// Address to bind to
        #[arg(short, long, env = "CARELINK_BIND", default_value = "0.0.0.0:8080")]
        bind: SocketAddr,

        /// Token signing secret (at least 32 bytes)
        #[arg(long, env = "CARELINK_SECRET", hide_env_values = true)]
        secret: String,

        /// Access token lifetime in seconds
        #[arg(long, env = "CARELINK_ACCESS_TTL_SECS", default_value_t = 900)]
        access_ttl_secs: u64,

        /// Refresh token lifetime in seconds
        #[arg(long, env = "CARELINK_REFRESH_TTL_SECS", default_value_t = 604_800)]
        refresh_ttl_secs: u64,

        /// Seconds a channel may stay unauthenticated
        #[arg(long, env = "CARELINK_AUTH_TIMEOUT_SECS", default_value_t = 10)]
        auth_timeout_secs: u64,

        /// Per-connection outbound queue capacity
        #[arg(long, env = "CARELINK_OUTBOUND_BUFFER", default_value_t = 256)]
        outbound_buffer: usize,
    },

    /// Initialize the database schema
    Init,

    /// Store a guardian grant
    ///
    /// Examples:
    ///   carelink grant 7 42 -p all --primary
    ///   carelink grant 8 42 -p location,alerts --status pending
    Grant {
        /// Guardian principal id
        guardian: i64,

        /// Id of the user being cared for
        subject: i64,

        /// Permissions to grant (comma-separated or repeated)
        #[arg(short, long = "permission", value_enum, value_delimiter = ',', required = true)]
        permissions: Vec<PermissionArg>,

        /// Mark as a primary guardian (escalated to first)
        #[arg(long)]
        primary: bool,

        /// PENDING, APPROVED or REVOKED
        #[arg(long, default_value = "approved")]
        status: String,
    },

    /// Hash a password for seeding principals (reads stdin when omitted)
    HashPassword {
        password: Option<String>,
    },

    /// Mint a token for a principal
    ///
    /// Examples:
    ///   carelink issue-token 42
    ///   carelink issue-token 42 --kind refresh --ttl-secs 3600
    IssueToken {
        /// Principal id
        principal: i64,

        #[arg(long, value_enum, default_value_t = KindArg::Access)]
        kind: KindArg,

        /// Lifetime in seconds
        #[arg(long, default_value_t = 900)]
        ttl_secs: u64,

        /// Token signing secret
        #[arg(long, env = "CARELINK_SECRET", hide_env_values = true)]
        secret: String,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum PermissionArg {
    Location,
    Activity,
    Alerts,
    Settings,
    All,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum KindArg {
    Access,
    Refresh,
}
