//! Metric names and labels emitted by coordination components.
//!
//! Conduit only records through the [`metrics`] facade. Installing a recorder (and an exporter)
//! is left to the embedding application.

/// Label for the component that emitted the metric.
pub const COMPONENT_LABEL: &str = "component";

/// Label for the outcome of a job or request.
pub const OUTCOME_LABEL: &str = "outcome";

// Worker pool metrics

/// Counter for jobs processed by pool workers, labeled by outcome.
pub const CONDUIT_JOBS_PROCESSED_TOTAL: &str = "conduit_jobs_processed_total";

/// Histogram for the time a worker spent on a single job.
pub const CONDUIT_JOB_DURATION_SECONDS: &str = "conduit_job_duration_seconds";

// Pipeline metrics

/// Counter for items forwarded by pipeline stages, fan-out and fan-in.
pub const CONDUIT_PIPELINE_ITEMS_TOTAL: &str = "conduit_pipeline_items_total";

// Service metrics

/// Counter for requests handled by serialized state services, labeled by outcome.
pub const CONDUIT_SERVICE_REQUESTS_TOTAL: &str = "conduit_service_requests_total";

/// Histogram for the time a service spent handling a single request.
pub const CONDUIT_SERVICE_REQUEST_DURATION_SECONDS: &str =
    "conduit_service_request_duration_seconds";
