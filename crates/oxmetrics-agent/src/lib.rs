//! The oxmetrics agent: samples runtime and host gauges, batches them with a
//! poll counter, and reports them to the server over HTTP or gRPC through a
//! bounded worker pool.

pub mod agent;
pub mod config;
pub mod dispatcher;
pub mod error;
pub mod pool;
pub mod sampler;
pub mod transport;
