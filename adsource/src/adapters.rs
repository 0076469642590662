pub mod http;
pub mod mock;
pub mod ws;

pub use http::HttpAdSource;
pub use mock::{sample_ads, MockAdSource, MockChangeHandle, MockChangeStream};
pub use ws::WsChangeStream;
