// ============================================================================
// Market Resolve Module - Core Market & Pricing Logic
// ============================================================================
//
// This module contains the binary-market core:
//   - cpmm: constant-product pricing over two integer pools
//   - markets: Market/Position records, trading window, resolution, claims
//
// ============================================================================

pub mod cpmm;
pub mod markets;

pub use cpmm::*;
pub use markets::*;
