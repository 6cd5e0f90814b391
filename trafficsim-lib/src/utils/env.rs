pub const fn project_name() -> &'static str {
    env!("CARGO_PKG_NAME")
}

/// Value used for the `server` header of every HTTP surface.
pub const fn network_service_identifier() -> &'static str {
    concat!("trafficsim/", env!("CARGO_PKG_VERSION"))
}

/// Unix milliseconds, used for request identifiers.
pub fn unix_millis() -> u128 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis()
}
