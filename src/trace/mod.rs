pub mod clock;
pub mod record;
pub mod tracer;

pub use clock::{Clock, SystemClock};
pub use record::{Stats, TraceRecord, TraceSet};
pub use tracer::{attach, AcquiredConn, ClientTrace, NoopTrace, RequestTracer, TracedRequest};
