/// Build version reported by `GET /version`.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// `GET /version` - plain-text build version. Not throttled.
pub async fn version() -> &'static str {
    VERSION
}
