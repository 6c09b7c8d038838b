//! Server configuration.

use std::net::SocketAddr;

/// Default port of the meta service.
pub const DEFAULT_GRPC_PORT: u16 = 13389;

/// Configuration for the meta server.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Address the meta service is announced on.
    pub grpc_addr: SocketAddr,
    /// Address of the HTTP surface, if one is served.
    pub http_addr: Option<SocketAddr>,
    /// Largest page a list request may ask for.
    pub max_list_limit: u32,
    /// Largest number of operations in one transaction.
    pub max_transaction_operations: usize,
}

impl ServerConfig {
    /// Creates a configuration announcing the service on `grpc_addr`.
    pub fn new(grpc_addr: SocketAddr) -> Self {
        Self {
            grpc_addr,
            http_addr: None,
            max_list_limit: 1000,
            max_transaction_operations: 500,
        }
    }

    /// Sets the HTTP address.
    #[must_use]
    pub fn with_http_addr(mut self, addr: SocketAddr) -> Self {
        self.http_addr = Some(addr);
        self
    }

    /// Sets the largest list page.
    #[must_use]
    pub fn with_max_list_limit(mut self, limit: u32) -> Self {
        self.max_list_limit = limit;
        self
    }

    /// Sets the largest transaction.
    #[must_use]
    pub fn with_max_transaction_operations(mut self, max: usize) -> Self {
        self.max_transaction_operations = max;
        self
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self::new(SocketAddr::from(([127, 0, 0, 1], DEFAULT_GRPC_PORT)))
    }
}
