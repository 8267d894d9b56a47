//! Test utilities for whanau crates.

pub mod cluster;
pub mod graph;

/// Enable tracing with the RUST_LOG environment variable.
///
/// This is intended to be used in tests, so it defaults to DEBUG level.
pub fn enable_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::builder()
                .with_default_directive(tracing::Level::DEBUG.into())
                .from_env_lossy(),
        )
        .try_init();
}

/// Create a Vec of `count` random bytes.
pub fn random_bytes(count: usize) -> Vec<u8> {
    use rand::Rng;
    rand::thread_rng()
        .sample_iter(rand::distributions::Standard)
        .take(count)
        .collect()
}

/// Poll a check until it breaks out of the loop or the timeout
/// elapses.
///
/// The body runs once per iteration and is expected to `break` when
/// its condition is met; on timeout the macro panics.
#[macro_export]
macro_rules! iter_check {
    ($timeout_ms:expr, $sleep_ms:expr, $code:block) => {{
        let deadline = std::time::Instant::now()
            + std::time::Duration::from_millis($timeout_ms);
        loop {
            $code

            if std::time::Instant::now() > deadline {
                panic!("iter_check timed out after {} ms", $timeout_ms);
            }
            tokio::time::sleep(std::time::Duration::from_millis(
                $sleep_ms,
            ))
            .await;
        }
    }};
}
