//! Pure text-processing entry points: cleanse, atomize, fingerprint, distance.
//!
//! Nothing in here touches the database or holds state; every function is
//! deterministic and safe to call from any thread.

pub mod atomize;
pub mod cleanse;
pub mod fingerprint;

pub use atomize::{atomize, Strategy};
pub use cleanse::cleanse;
pub use fingerprint::{distance, fingerprint};
