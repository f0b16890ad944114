//! Core value types shared by the relay components.
//!
//! - [`PositionSample`] is one location reading and doubles as the JSON wire body
//! - [`RawFix`] is the unsanitized reading a positioning service hands over
//! - [`PositionHistory`] is the bounded, newest-first sample log
//! - [`EncounterId`] and [`Role`] identify an encounter and the local side of it
//! - [`UpdateRate`] controls how often state snapshots reach observers
//!
//! ```rust
//! use encounter_relay::types::{PositionHistory, PositionSample, RawFix};
//!
//! let mut history = PositionHistory::default();
//! history.push(PositionSample::from_fix(RawFix::new(-33.45, -70.66, 1_700_000_000_000))?);
//! assert_eq!(history.len(), 1);
//! # Ok::<(), encounter_relay::RelayError>(())
//! ```

mod encounter;
mod history;
mod position;
mod update_rate;

pub use encounter::{EncounterId, Role};
pub use history::{DEFAULT_HISTORY_CAPACITY, PositionHistory};
pub use position::{PositionSample, RawFix};
pub use update_rate::UpdateRate;
