use crate::core::access::AccessRecord;

/// Destination of access records. Invoked once per request, or once per attempt for
/// retried egress requests, in execution order.
pub trait AccessLogSink: Send + Sync {
    fn log(&self, record: &AccessRecord);
}
