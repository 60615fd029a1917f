pub mod controller;
pub mod state;

pub use controller::{DeliveryController, DeliveryPolicy};
pub use state::DeliveryOutcome;
