/// Catalog of known log streams.
///
/// Log readers address their backing stores by internal name; every API
/// surface uses the display name. The mapping is a fixed bijection and both
/// translation functions pass unknown inputs through unchanged.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LogSource {
    pub internal_name: &'static str,
    pub display_name: &'static str,
    /// Short token handed to the backing-store reader.
    pub token: &'static str,
}

const LOG_SOURCES: &[LogSource] = &[
    LogSource {
        internal_name: "cloudflare.logs.prod",
        display_name: "insforge.logs",
        token: "insforge",
    },
    LogSource {
        internal_name: "postgres.logs.prod",
        display_name: "postgres.logs",
        token: "postgres",
    },
    LogSource {
        internal_name: "deno-relay-logs",
        display_name: "function.logs",
        token: "function",
    },
    LogSource {
        internal_name: "postgrest.logs.prod",
        display_name: "database.logs",
        token: "database",
    },
];

pub fn sources() -> &'static [LogSource] {
    LOG_SOURCES
}

/// Translate an internal stream name to its display name.
pub fn to_display(internal: &str) -> &str {
    LOG_SOURCES
        .iter()
        .find(|source| source.internal_name == internal)
        .map(|source| source.display_name)
        .unwrap_or(internal)
}

/// Translate a display name back to the internal stream name.
pub fn to_internal(display: &str) -> &str {
    LOG_SOURCES
        .iter()
        .find(|source| source.display_name == display)
        .map(|source| source.internal_name)
        .unwrap_or(display)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn mapping_is_a_bijection() {
        let internals: HashSet<_> = LOG_SOURCES.iter().map(|s| s.internal_name).collect();
        let displays: HashSet<_> = LOG_SOURCES.iter().map(|s| s.display_name).collect();
        assert_eq!(internals.len(), LOG_SOURCES.len());
        assert_eq!(displays.len(), LOG_SOURCES.len());
    }

    #[test]
    fn round_trips_over_the_known_set() {
        for source in LOG_SOURCES {
            assert_eq!(to_display(to_internal(source.display_name)), source.display_name);
            assert_eq!(to_internal(to_display(source.internal_name)), source.internal_name);
        }
        assert_eq!(to_display("cloudflare.logs.prod"), "insforge.logs");
        assert_eq!(to_internal("insforge.logs"), "cloudflare.logs.prod");
    }

    #[test]
    fn unknown_names_pass_through() {
        assert_eq!(to_display("no.such.stream"), "no.such.stream");
        assert_eq!(to_internal("no.such.display"), "no.such.display");
    }
}
