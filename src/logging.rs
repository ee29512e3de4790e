//! Installs a tracing subscriber at startup when debug logging is requested.
//!
//! Logging is controlled by the `IKD_TREE_DEBUG` environment variable. If it
//! is unset or set to a falsy value ("0", "false", or empty), logging stays
//! disabled. Otherwise a subscriber at `DEBUG` level is installed.

use ctor::ctor;
use tracing::Level;

#[ctor]
fn set_debug_level() {
    if std::env::var("IKD_TREE_DEBUG").map_or(true, |v| v == "0" || v == "false" || v.is_empty())
    {
        // Leave logging disabled.
    } else {
        tracing_subscriber::fmt()
            .with_max_level(Level::DEBUG)
            .init();
    }
}
