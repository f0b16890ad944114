//! Stream combinators for relay state observers

mod throttle;

pub use throttle::{Throttle, ThrottleExt};
