// -
// Versions

/// Version value accepted by `delete` to skip the version check
pub const ANY_VERSION: i32 = -1;

// -
// Session defaults

/// Session timeout handed to the transport when none is configured
pub(crate) const DEFAULT_SESSION_TIMEOUT_MS: u64 = 5000;

/// Upper bound for a single node operation round trip
pub(crate) const DEFAULT_REQUEST_TIMEOUT_MS: u64 = 10_000;

pub(crate) const DEFAULT_HOST: &str = "127.0.0.1:2181";

// -
// Configuration

/// Environment prefix for configuration overrides, e.g. `ZKCONN__SESSION__HOSTS`
pub(crate) const CONFIG_ENV_PREFIX: &str = "ZKCONN";

pub(crate) const CONFIG_ENV_SEPARATOR: &str = "__";

// -
// Node naming

/// Width of the zero padded counter appended to sequential nodes
pub(crate) const SEQUENTIAL_SUFFIX_WIDTH: usize = 10;

pub(crate) const ROOT_PATH: &str = "/";
