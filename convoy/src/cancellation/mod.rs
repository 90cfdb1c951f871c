//! Cooperative cancellation.
//!
//! A fatal stage outcome is the only in-band cancellation signal; the token
//! here lets a caller abort a stuck readiness wait or backoff sleep.

mod token;

pub use token::CancellationToken;
