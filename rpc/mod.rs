// ============================================================================
// RPC Module - Remote Ledger Communication
// ============================================================================
//
// Plumbing between the market core and the remote ledger's JSON-RPC
// endpoints. Everything above this layer talks in domain types; everything
// in here talks in hex words and JSON values.
//
// Components:
//   - transport: RpcTransport trait, HTTP implementation, error classes
//   - retry: ranked endpoint list driven by a single RetryPolicy
//   - abi: selectors and word encoding for contract calls
//
// ============================================================================

pub mod abi;
pub mod retry;
pub mod transport;

pub use abi::{AbiError, Decoder, Token};
pub use retry::{EndpointSet, RetryPolicy};
pub use transport::{HttpTransport, RpcTransport, TransportError};
