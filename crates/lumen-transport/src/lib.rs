pub mod decoder;
pub mod http;
pub mod reliable;

pub mod mock;

pub use decoder::{DecodedStream, ErrorReporter, FrameDecoder, TracingReporter};
pub use http::HttpTransport;
pub use mock::{MockResponse, MockTransport};
pub use reliable::ReliableTransport;
