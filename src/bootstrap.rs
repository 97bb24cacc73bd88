//! Process-wide logging bootstrap
//!
//! Connection setup drags in chatty HTTP/2 internals, so the default
//! filter keeps transport crates quiet while kiln's own output stays at
//! info. Installing the subscriber is an explicit step owned by the
//! embedding process, never a side effect of connecting.

use std::sync::OnceLock;

use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter};

/// Default filter directives: kiln at info, transport internals quiet.
pub const DEFAULT_DIRECTIVES: &str = "kiln=info,kiln_client=info,h2=off,hyper=warn,tower=warn";

static INIT: OnceLock<()> = OnceLock::new();

/// Install the global subscriber with [`DEFAULT_DIRECTIVES`].
///
/// `RUST_LOG` overrides the defaults wholesale. Calling this more than
/// once is harmless; only the first call installs anything.
pub fn init_logging() {
    init_logging_with(DEFAULT_DIRECTIVES);
}

/// Install the global subscriber with custom filter directives.
pub fn init_logging_with(directives: &str) {
    INIT.get_or_init(|| {
        let filter =
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(directives));

        let fmt_layer = fmt::layer().with_target(true).compact();

        tracing_subscriber::registry()
            .with(filter)
            .with(fmt_layer)
            .try_init()
            .ok();
    });
}
