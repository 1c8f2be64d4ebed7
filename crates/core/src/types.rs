/// All timestamps are UTC.
pub type Timestamp = chrono::DateTime<chrono::Utc>;

/// Identifier of a live client connection.
pub type ConnId = String;
