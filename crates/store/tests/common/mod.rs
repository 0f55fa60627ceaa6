//! Common test utilities.

pub mod backend;
pub mod mocks;

#[allow(unused_imports)]
pub use backend::*;
#[allow(unused_imports)]
pub use mocks::*;

/// Route library logs through the test harness; `RUST_LOG` selects the level.
#[allow(dead_code)]
pub fn init_test_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}
