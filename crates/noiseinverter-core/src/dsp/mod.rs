//! Sample-level signal processing
//!
//! - Second-order IIR filter stage ([`filter`])
//! - Fixed-capacity circular delay line ([`delay_line`])

pub mod delay_line;
pub mod filter;
