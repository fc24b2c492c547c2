pub mod logging;
pub mod trace_context;

pub use logging::{TelemetryGuard, init_tracing};
pub use trace_context::{
    REQUEST_ID_HEADER, TRACEPARENT_HEADER, TRACESTATE_HEADER, TracedClientExt, TracedRequest,
    current_request_id, extract_request_id, inject_trace_context, is_acceptable_request_id,
    outbound_headers, with_request_id,
};
