//! Host variant - runs in the host's own process namespace.

mod executor;
mod provider;

pub use executor::HostExecutor;
pub use provider::HostProvider;
