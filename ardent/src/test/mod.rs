
/// Send library logs to the test harness, filtered by `RUST_LOG`.
fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

#[test]
fn test_logging_installs_once() {
    init_tracing();
    init_tracing();
    assert!(tracing::dispatcher::has_been_set());
}
