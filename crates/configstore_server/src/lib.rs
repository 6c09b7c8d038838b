//! # Configstore Server
//!
//! Request/response surface of the Configstore meta service.
//!
//! This crate provides:
//! - Typed calls for schema, partition, entity and transaction requests
//! - Watch stream start, resume and cancel
//! - A CBOR frame dispatcher for transports
//! - Error mapping to client-facing status categories
//!
//! # Protocol
//!
//! Each request frame is one CBOR-encoded [`MetaRequest`]; the reply is one
//! CBOR-encoded [`MetaResponse`]. Watch streams are not framed here: a
//! transport forwards the messages of a [`Subscription`](configstore_core::Subscription)
//! obtained from [`MetaServer::watch_transactions`].
//!
//! ```rust,ignore
//! use configstore_server::{MetaServer, ServerConfig};
//!
//! let server = MetaServer::new(ServerConfig::default(), store);
//! let reply = server.handle_frame(&frame)?;
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]
// Production code MUST NOT use panic!/unwrap()/expect()
#![warn(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

mod config;
mod error;
mod handler;
mod messages;
mod server;

pub use config::{ServerConfig, DEFAULT_GRPC_PORT};
pub use error::{ErrorStatus, ServerError, ServerResult};
pub use handler::{HandlerContext, RequestHandler};
pub use messages::{
    ErrorResponse, GetDefaultPartitionIdResponse, GetSchemaResponse,
    GetTransactionQueueCountResponse, MetaRequest, MetaResponse,
};
pub use server::MetaServer;
