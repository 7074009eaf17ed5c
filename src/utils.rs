use std::time::{SystemTime, UNIX_EPOCH};

pub fn now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap()
        .as_secs()
}

/// Wall-clock formatting used by normalized transaction records.
pub fn format_timestamp(unix_secs: i64) -> String {
    chrono::DateTime::from_timestamp(unix_secs, 0)
        .unwrap_or_default()
        .format("%Y-%m-%d %H:%M:%S")
        .to_string()
}

pub mod tracing {
    use tracing_subscriber::{EnvFilter, FmtSubscriber};

    pub fn init() {
        let subscriber = FmtSubscriber::builder()
            .compact()
            .with_env_filter(
                EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
            )
            .finish();

        tracing::subscriber::set_global_default(subscriber)
            .expect("setting default subscriber failed");
    }

    pub fn init_test(level: &str) {
        let subscriber = FmtSubscriber::builder()
            .without_time()
            .compact()
            .with_env_filter(EnvFilter::new(level))
            .finish();

        let _ = tracing::subscriber::set_global_default(subscriber);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_timestamp() {
        assert_eq!(format_timestamp(0), "1970-01-01 00:00:00");
        assert_eq!(format_timestamp(1500000000), "2017-07-14 02:40:00");
    }
}
