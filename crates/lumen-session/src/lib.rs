//! Chat session state and the controller that drives it.
//!
//! `reduce` holds every state transition, `SessionStore` publishes snapshots
//! and `SessionController` turns transport output into actions.

pub mod controller;
pub mod reducer;
pub mod state;
pub mod store;

pub use controller::{SessionController, SessionError, TurnOutcome};
pub use reducer::{reduce, Action};
pub use state::{SessionPhase, SessionState};
pub use store::SessionStore;
