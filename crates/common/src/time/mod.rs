//! Time abstraction used by every stateful Vigil component.
//!
//! Circuit breakers, the error monitor and the recovery orchestrator never
//! read the system clock directly; they are generic over [`Clock`] so tests
//! can drive time with a [`MockClock`] instead of sleeping.
//!
//! ```rust
//! use std::time::Duration;
//!
//! use vigil_common::time::{Clock, MockClock};
//!
//! let clock = MockClock::new();
//! let start = clock.now();
//! clock.advance(Duration::from_secs(5));
//! assert_eq!(clock.now().duration_since(start), Duration::from_secs(5));
//! ```

pub mod clock;

pub use clock::{Clock, MockClock, SystemClock};
