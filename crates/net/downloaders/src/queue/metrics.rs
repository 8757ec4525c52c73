use chainsync_interfaces::p2p::error::DownloadError;
use metrics::{register_counter, register_histogram, Counter, Histogram};

/// Download queue metrics, registered under the `downloaders.queue` scope.
#[derive(Clone)]
pub struct QueueMetrics {
    /// Header batches accepted into the skeleton.
    pub(crate) headers_in: Counter,
    /// Header batches rejected by the skeleton check.
    pub(crate) headers_dropped: Counter,
    /// Header requests that timed out.
    pub(crate) header_timeouts: Counter,
    /// Time between a header request and its delivery, in seconds.
    pub(crate) header_request_duration: Histogram,
    /// Bodies accepted into the result window.
    pub(crate) bodies_in: Counter,
    /// Delivered bodies that were not accepted.
    pub(crate) bodies_dropped: Counter,
    /// Body requests that timed out.
    pub(crate) body_timeouts: Counter,
    /// Time between a body request and its delivery, in seconds.
    pub(crate) body_request_duration: Histogram,
    /// Receipt lists accepted into the result window.
    pub(crate) receipts_in: Counter,
    /// Delivered receipt lists that were not accepted.
    pub(crate) receipts_dropped: Counter,
    /// Receipt requests that timed out.
    pub(crate) receipt_timeouts: Counter,
    /// Time between a receipt request and its delivery, in seconds.
    pub(crate) receipt_request_duration: Histogram,
    /// Deliveries that stopped on a reconstruction error.
    pub(crate) delivery_errors: Counter,
    /// Deliveries without any usable item.
    pub(crate) stale_deliveries: Counter,
}

impl Default for QueueMetrics {
    fn default() -> Self {
        Self {
            headers_in: register_counter!("downloaders.queue.headers_in"),
            headers_dropped: register_counter!("downloaders.queue.headers_dropped"),
            header_timeouts: register_counter!("downloaders.queue.header_timeouts"),
            header_request_duration: register_histogram!(
                "downloaders.queue.header_request_duration"
            ),
            bodies_in: register_counter!("downloaders.queue.bodies_in"),
            bodies_dropped: register_counter!("downloaders.queue.bodies_dropped"),
            body_timeouts: register_counter!("downloaders.queue.body_timeouts"),
            body_request_duration: register_histogram!("downloaders.queue.body_request_duration"),
            receipts_in: register_counter!("downloaders.queue.receipts_in"),
            receipts_dropped: register_counter!("downloaders.queue.receipts_dropped"),
            receipt_timeouts: register_counter!("downloaders.queue.receipt_timeouts"),
            receipt_request_duration: register_histogram!(
                "downloaders.queue.receipt_request_duration"
            ),
            delivery_errors: register_counter!("downloaders.queue.delivery_errors"),
            stale_deliveries: register_counter!("downloaders.queue.stale_deliveries"),
        }
    }
}

impl std::fmt::Debug for QueueMetrics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QueueMetrics").finish_non_exhaustive()
    }
}

impl QueueMetrics {
    /// Increment the counter matching the outcome of a failed body or receipt delivery.
    pub(crate) fn increment_errors(&self, error: &DownloadError) {
        match error {
            DownloadError::StaleDelivery => self.stale_deliveries.increment(1),
            DownloadError::NoFetchesPending { .. } => {}
            _error => self.delivery_errors.increment(1),
        }
    }
}
