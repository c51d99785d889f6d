//! API Module
//!
//! Operator HTTP surface over the cache and the circuit breakers.
//!
//! # Endpoints
//! - `GET /cache/:namespace/:key` - Read a cached value
//! - `PUT /cache/:namespace/:key` - Store a value
//! - `DELETE /cache/:namespace/:key` - Delete a value
//! - `DELETE /cache/:namespace` - Flush a namespace
//! - `GET /stats` - Cache statistics
//! - `GET /breakers` - Circuit breaker snapshots
//! - `POST /breakers/reset` - Force every breaker closed
//! - `POST /breakers/:name/reset` - Force a breaker closed
//! - `GET /health` - Health check endpoint

pub mod handlers;
pub mod routes;

pub use handlers::*;
pub use routes::create_router;
