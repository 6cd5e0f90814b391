pub mod env;
pub mod io;
pub mod os;
pub mod telemetry;
