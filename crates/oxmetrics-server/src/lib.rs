//! The oxmetrics ingest server: HTTP and gRPC endpoints in front of an
//! in-memory metric store with periodic durable snapshots.

pub mod api;
pub mod app;
pub mod config;
pub mod error;
pub mod grpc;
pub mod ingest;
pub mod logging;
pub mod middleware;
pub mod server;
pub mod state;
