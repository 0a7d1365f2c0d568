use thiserror::Error;

/// Per-file failure classes. Every variant is recoverable at the pipeline
/// level: the offending file is logged and skipped, the run continues.
///
/// A filename that does not match the catalog pattern is *not* an error;
/// the classifier simply returns `None` and the entry never reaches the
/// selector output.
#[derive(Debug, Error)]
pub enum FeedError {
    /// Corrupt or truncated payload (gzip failure, invalid UTF-8).
    #[error("payload decode failed: {0}")]
    Decode(String),

    /// The XML document itself is malformed. Missing optional nodes are
    /// tolerated by the parsers and never produce this.
    #[error("malformed XML: {0}")]
    Parse(String),

    /// Fetching the file bytes from the portal failed.
    #[error("portal fetch failed: {0}")]
    Transport(#[source] anyhow::Error),

    /// The sink rejected a write. Should not occur under upsert semantics.
    #[error("sink write failed: {0}")]
    Sink(#[source] anyhow::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transport_and_sink_display_carry_the_cause() {
        // These strings end up in skip-file warn logs; the cause has to be
        // in the message, not just the source chain.
        let e = FeedError::Transport(anyhow::anyhow!("connection reset by peer"));
        assert!(e.to_string().contains("connection reset by peer"));

        let e = FeedError::Sink(anyhow::anyhow!("pool timed out"));
        assert!(e.to_string().contains("pool timed out"));
    }
}
