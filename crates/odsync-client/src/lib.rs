//! odsync client - HTTP clients for the two ends of the sync.
//!
//! - [`dotstat`] - .Stat Data Explorer search service and SDMX REST API
//!   (implements [`odsync_core::UpstreamSource`])
//! - [`udata`] - udata catalog API (implements [`odsync_core::DestinationCatalog`])
//! - [`http`] - the throttled, retrying executor both clients send through
//!
//! Both clients share one [`HttpExecutor`], hence one call budget.

pub mod dotstat;
pub mod http;
pub mod udata;

pub use dotstat::{DotStatClient, DotStatConfig};
pub use http::HttpExecutor;
pub use udata::{UdataClient, UdataConfig};
