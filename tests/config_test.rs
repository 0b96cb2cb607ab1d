use instructpad::config::{Config, DEFAULT_INDEX, ExposeSecret};

// One test function on purpose: the harness runs tests in parallel and
// these assertions share the process environment.
#[test]
fn config_reads_the_environment() {
    unsafe {
        std::env::remove_var("ES_URL");
        std::env::remove_var("ES_API_KEY");
        std::env::remove_var("ES_INDEX");
    }

    // Missing required vars fail fast.
    let result = Config::from_env();
    assert!(result.is_err());

    unsafe {
        std::env::set_var("ES_URL", "https://search.example.com:9200");
        std::env::set_var("ES_API_KEY", "test-api-key");
    }

    // The index falls back to the default when unset.
    let config = Config::from_env().unwrap();
    assert_eq!(config.store_url, "https://search.example.com:9200");
    assert_eq!(config.api_key.expose_secret(), "test-api-key");
    assert_eq!(config.index, DEFAULT_INDEX);
    assert!(!config.log_level.is_empty());

    // Debug output must not leak the key.
    let printed = format!("{config:?}");
    assert!(!printed.contains("test-api-key"));

    unsafe {
        std::env::set_var("ES_INDEX", "instructions-staging");
    }
    let config = Config::from_env().unwrap();
    assert_eq!(config.index, "instructions-staging");

    // Clean up
    unsafe {
        std::env::remove_var("ES_URL");
        std::env::remove_var("ES_API_KEY");
        std::env::remove_var("ES_INDEX");
    }
}
