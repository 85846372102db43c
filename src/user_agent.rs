//! Default User-Agent string for download requests.

/// Product token sent in the User-Agent header.
const PRODUCT: &str = "download-manager";

/// Default User-Agent for download requests (identifies the tool and its version).
#[must_use]
pub fn default_user_agent() -> String {
    let version = env!("CARGO_PKG_VERSION");
    format!("{PRODUCT}/{version}")
}
