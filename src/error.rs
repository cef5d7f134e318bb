//! Crate-wide error type, composed from one `snafu` enum per subsystem.

use snafu::Snafu;

/// Numeric error codes returned to management clients, grouped by subsystem.
/// Values are fixed by the wire contract in [`crate::management`] and must
/// never be renumbered once shipped.
pub mod code {
    pub const BAD_PAYLOAD: i32 = 1;
    pub const UNKNOWN_COMMAND: i32 = 2;
    pub const ALLOCATION: i32 = 3;

    pub const METRICS_NOFORK: i32 = 100;
    pub const METRICS_NETWORK: i32 = 101;

    pub const STATUS_NOFORK: i32 = 700;
    pub const STATUS_NETWORK: i32 = 701;
    pub const STATUS_DETAILS_NOFORK: i32 = 800;
    pub const STATUS_DETAILS_NETWORK: i32 = 801;

    pub const BRIDGE_NOFORK: i32 = 900;
    pub const BRIDGE_NETWORK: i32 = 901;
    pub const BRIDGE_JSON_NOFORK: i32 = 902;
    pub const BRIDGE_JSON_NETWORK: i32 = 903;

    pub const CONF_GET_NO_REQUEST: i32 = 1000;
    pub const CONF_GET_UNKNOWN_KEY: i32 = 1001;
    pub const CONF_GET_NETWORK: i32 = 1002;

    pub const CONF_SET_NO_REQUEST: i32 = 1100;
    pub const CONF_SET_MISSING_KEY: i32 = 1101;
    pub const CONF_SET_MISSING_VALUE: i32 = 1102;
    pub const CONF_SET_UNKNOWN_KEY: i32 = 1103;
    pub const CONF_SET_UNKNOWN_SERVER: i32 = 1104;
    pub const CONF_SET_NETWORK: i32 = 1105;
    pub const CONF_SET_GENERIC: i32 = 1107;

    // User/master-key administration and `reload`. These sit past
    // the conf-set range since the wire contract in spec.md enumerates
    // command codes but not a dedicated error range for them.
    pub const RELOAD_FAILED: i32 = 1200;
    pub const USER_MANAGEMENT_NO_MASTER_KEY: i32 = 1300;
    pub const USER_MANAGEMENT_IO: i32 = 1301;
    pub const USER_MANAGEMENT_UNKNOWN_USER: i32 = 1302;
    pub const USER_MANAGEMENT_DUPLICATE_USER: i32 = 1303;
    pub const USER_MANAGEMENT_NO_REQUEST: i32 = 1304;
}

#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum Error {
    #[snafu(display("wire protocol error: {}", source), context(false))]
    Wire { source: crate::wire::WireError },

    #[snafu(display("postgresql client error: {}", source), context(false))]
    Pg { source: crate::pg::PgError },

    #[snafu(display("query catalog error: {}", source), context(false))]
    Catalog { source: crate::catalog::CatalogError },

    #[snafu(display("cache error: {}", source), context(false))]
    Cache { source: crate::cache::CacheError },

    #[snafu(display("bridge parser error: {}", source), context(false))]
    Bridge {
        source: pgexporter_prometheus::ParserError,
    },

    #[snafu(display("management protocol error: {}", source), context(false))]
    Management {
        source: crate::management::ManagementError,
    },

    #[snafu(display("configuration error: {}", source), context(false))]
    Config { source: crate::config::ConfigError },
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
