/// All timestamps are UTC.
pub type Timestamp = chrono::DateTime<chrono::Utc>;

/// Accounts and delegates are external parties; their ids are opaque
/// strings supplied at connect/submit time, never foreign keys into our
/// own tables. Tasks, perpetual tasks, and wait correlation keys use
/// UUIDv7 so ids generated on any manager replica sort by creation time.
pub type AccountId = String;
