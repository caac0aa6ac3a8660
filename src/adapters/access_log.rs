//! Access log sinks: structured tracing output for production, an in-memory buffer for
//! tests, and a tee for forwarding records to an additional extract sink.
use std::sync::{Arc, Mutex, PoisonError};

use crate::{core::access::AccessRecord, ports::access_log::AccessLogSink};

/// Emits each record as a structured `tracing` event on the `access` target, so the
/// subscriber decides the output format (text or JSON).
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingAccessLog;

impl TracingAccessLog {
    pub fn new() -> Self {
        Self
    }
}

impl AccessLogSink for TracingAccessLog {
    fn log(&self, record: &AccessRecord) {
        tracing::info!(
            target: "access",
            traffic = record.traffic,
            start = %record.start.to_rfc3339(),
            duration_ms = record.duration_ms(),
            route = %record.route,
            request_id = %record.request_id,
            protocol = %record.protocol,
            method = %record.method,
            url = %record.url,
            host = %record.host,
            path = %record.path,
            status_code = record.status_code,
            bytes_written = record.bytes_written,
            timeout_ms = record.timeout_ms,
            rate_limit = record.rate_limit,
            rate_burst = record.rate_burst,
            retry = record.retry,
            proxy = record.proxy,
            failover = record.failover,
            status_flag = record.status_flag_str(),
        );
    }
}

/// Keeps every record in memory, in arrival order.
#[derive(Debug, Default)]
pub struct MemoryAccessLog {
    records: Mutex<Vec<AccessRecord>>,
}

impl MemoryAccessLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of the records logged so far.
    pub fn records(&self) -> Vec<AccessRecord> {
        self.records
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn len(&self) -> usize {
        self.records
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&self) {
        self.records
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }
}

impl AccessLogSink for MemoryAccessLog {
    fn log(&self, record: &AccessRecord) {
        self.records
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(record.clone());
    }
}

/// Forwards every record to a primary sink and then to an extract sink.
pub struct TeeAccessLog {
    primary: Arc<dyn AccessLogSink>,
    extract: Arc<dyn AccessLogSink>,
}

impl TeeAccessLog {
    pub fn new(primary: Arc<dyn AccessLogSink>, extract: Arc<dyn AccessLogSink>) -> Self {
        Self { primary, extract }
    }
}

impl AccessLogSink for TeeAccessLog {
    fn log(&self, record: &AccessRecord) {
        self.primary.log(record);
        self.extract.log(record);
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use chrono::Utc;

    use super::*;
    use crate::core::access::{EGRESS_TRAFFIC, StatusFlag};

    fn record(route: &str) -> AccessRecord {
        AccessRecord {
            traffic: EGRESS_TRAFFIC,
            start: Utc::now(),
            duration: Duration::from_millis(12),
            route: route.to_string(),
            request_id: "req-1".to_string(),
            protocol: "HTTP/1.1".to_string(),
            method: "GET".to_string(),
            url: "http://localhost:8080/search".to_string(),
            host: "localhost:8080".to_string(),
            path: "/search".to_string(),
            status_code: 503,
            bytes_written: None,
            timeout_ms: -1,
            rate_limit: 1.0,
            rate_burst: 1,
            retry: None,
            proxy: false,
            failover: false,
            status_flag: Some(StatusFlag::RateLimited),
        }
    }

    #[test]
    fn test_memory_log_keeps_order() {
        let log = MemoryAccessLog::new();
        assert!(log.is_empty());
        log.log(&record("a"));
        log.log(&record("b"));
        let routes: Vec<_> = log.records().into_iter().map(|r| r.route).collect();
        assert_eq!(routes, vec!["a", "b"]);
        log.clear();
        assert_eq!(log.len(), 0);
    }

    #[test]
    fn test_tee_forwards_to_both() {
        let primary = Arc::new(MemoryAccessLog::new());
        let extract = Arc::new(MemoryAccessLog::new());
        let tee = TeeAccessLog::new(primary.clone(), extract.clone());
        tee.log(&record("search"));
        assert_eq!(primary.len(), 1);
        assert_eq!(extract.records()[0].route, "search");
    }

    #[test]
    fn test_tracing_log_does_not_panic_without_subscriber() {
        TracingAccessLog::new().log(&record("search"));
    }

    #[test]
    fn test_record_serializes_flag_and_millis() {
        let json = serde_json::to_value(record("search")).unwrap();
        assert_eq!(json["status_flag"], "RL");
        assert_eq!(json["duration"], 12);
        assert_eq!(json["timeout_ms"], -1);
    }
}
