use chrono::{DateTime, Utc};

/// A persisted record carrying an optimistic version counter and timestamps.
pub trait VersionedEntity {
    fn version(&self) -> i64;

    fn created_at(&self) -> DateTime<Utc>;

    fn updated_at(&self) -> DateTime<Utc>;

    /// True when both records were captured at the same version.
    fn is_current_with<O: VersionedEntity + ?Sized>(&self, other: &O) -> bool {
        self.version() == other.version()
    }
}

// Serialize DateTime as RFC 3339 / ISO 8601 string
pub(crate) fn serialize_datetime<S>(
    dt: &DateTime<Utc>,
    serializer: S,
) -> std::result::Result<S::Ok, S::Error>
where
    S: serde::Serializer,
{
    serializer.serialize_str(&dt.to_rfc3339())
}

pub(crate) fn serialize_optional_datetime<S>(
    dt: &Option<DateTime<Utc>>,
    serializer: S,
) -> std::result::Result<S::Ok, S::Error>
where
    S: serde::Serializer,
{
    match dt {
        Some(dt) => serializer.serialize_str(&dt.to_rfc3339()),
        None => serializer.serialize_none(),
    }
}
