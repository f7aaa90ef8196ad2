/// Path to /proc/stat for CPU counters
pub const PROC_STAT_PATH: &str = "/proc/stat";

/// Default datagram destination
pub const DEFAULT_DESTINATION: &str = "127.0.0.1:1234";

/// Default tick interval in milliseconds
pub const DEFAULT_INTERVAL_MS: u64 = 1000;

/// Number of attempts for the first counter read before giving up
pub const DEFAULT_STARTUP_ATTEMPTS: u32 = 5;

/// Fixed delay between startup read attempts in milliseconds
pub const DEFAULT_STARTUP_RETRY_MS: u64 = 500;

/// Smallest table capacity: the aggregate row plus one core
pub const MIN_TABLE_CAPACITY: usize = 2;

/// Tag shared by the aggregate row and every per-core row
pub const ENTITY_TAG_PREFIX: &str = "cpu";

/// Number of counter fields read from each row
pub const COUNTER_FIELDS: usize = 8;

/// Payload bytes reserved per rendered line ("Core 1023: 100.0%\n" fits)
pub const PAYLOAD_BYTES_PER_LINE: usize = 24;

/// Largest payload a single UDP/IPv4 datagram can carry
pub const MAX_DATAGRAM_BYTES: usize = 65_507;
