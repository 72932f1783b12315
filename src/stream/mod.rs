pub mod controller;
pub mod upstream;

pub use controller::{ControlCommand, ControllerSettings, StreamController, StreamState};
