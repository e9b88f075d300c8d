//! Kernel de la passerelle : paramètres ubus, télémétrie, self-heal et cycle
//! de vie des Software Modules, exposés en HTTP.

pub mod config;
pub mod error;
pub mod http;
pub mod lcm;
pub mod params;
pub mod selfheal;
pub mod state;
pub mod summary;
pub mod telemetry;
pub mod transport;

pub use error::{GatewayError, GatewayResult};
pub use state::AppState;
