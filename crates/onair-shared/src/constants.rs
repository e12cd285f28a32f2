/// Application name
pub const APP_NAME: &str = "On Air";

/// Milliseconds per minute, the unit of timer adjustments
pub const MS_PER_MINUTE: i64 = 60_000;

/// Longest accepted channel name (Twitch login limit)
pub const MAX_CHANNEL_NAME_LEN: usize = 25;

/// Default HTTP API port (server)
pub const DEFAULT_HTTP_PORT: u16 = 8080;

/// Upper bound on a single store round-trip, in milliseconds
pub const DEFAULT_STORE_TIMEOUT_MS: u64 = 2_000;

/// How many times a schedule read is retried when a concurrent write moves
/// the revision between its first and last read
pub const SCHEDULE_READ_ATTEMPTS: usize = 5;
