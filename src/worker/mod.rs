//! Background workers that talk to the external platform.
//!
//! Outbound calls go through `RateLimitedApi`, so every worker process
//! shares one ceiling.

mod platform;
mod sweep;

pub use platform::{HttpPlatformApi, PLATFORM_RATE_KEY, PlatformApi, RateLimitedApi};
pub use sweep::{BanSweep, DEFAULT_SWEEP_BATCH, DEFAULT_SWEEP_INTERVAL, SweepReport};
