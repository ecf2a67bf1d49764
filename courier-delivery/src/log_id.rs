use std::sync::Arc;

/// Produces identifiers that tie a log line to the DSN report it explains.
#[derive(Debug, Clone, Default)]
pub struct LogIdFactory {
    prefix: Option<Arc<str>>,
}

impl LogIdFactory {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Ids will start with `prefix` and a dash, e.g. the host name of this
    /// node when several share a log sink.
    #[must_use]
    pub fn with_prefix(prefix: impl Into<Arc<str>>) -> Self {
        Self {
            prefix: Some(prefix.into()),
        }
    }

    #[must_use]
    pub fn next(&self) -> String {
        let id = ulid::Ulid::new();

        match &self.prefix {
            Some(prefix) => format!("{prefix}-{id}"),
            None => id.to_string(),
        }
    }
}
