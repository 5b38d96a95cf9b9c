//! Per-base-URL pool of `reqwest::Client` instances.
//!
//! The LLM gateway and every data-source client share one pooled client per base URL rather
//! than building a fresh one per request, so connection reuse, DNS caching, and TLS session
//! resumption all carry across calls within a run.

use once_cell::sync::Lazy;
use reqwest;
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

/// Global HTTP client pool, lazily initialized on first access.
static HTTP_CLIENT_POOL: Lazy<Mutex<HashMap<String, reqwest::Client>>> =
    Lazy::new(|| Mutex::new(HashMap::new()));

/// Get or create the shared client for `base_url`, building it on first use.
pub fn get_http_client(base_url: &str) -> reqwest::Client {
    let mut pool = HTTP_CLIENT_POOL.lock().unwrap();
    
    if let Some(client) = pool.get(base_url) {
        return client.clone();
    }
    
    // Create a new client with optimal settings for persistent connections
    let client = reqwest::ClientBuilder::new()
        // Keep idle connections alive for 90 seconds
        .pool_idle_timeout(Some(Duration::from_secs(90)))
        // Allow up to 10 idle connections per host for better throughput
        .pool_max_idle_per_host(10)
        // Enable TCP keepalive to prevent connection drops
        .tcp_keepalive(Some(Duration::from_secs(60)))
        // Set a reasonable timeout for the entire request
        .timeout(Duration::from_secs(300))
        .build()
        .expect("Failed to build HTTP client");
    
    pool.insert(base_url.to_string(), client.clone());
    client
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn same_base_url_yields_the_same_pooled_client() {
        let a = get_http_client("https://api.example.com");
        let b = get_http_client("https://api.example.com");
        // reqwest::Client is an Arc-backed handle; cloning from the pool twice should not
        // build a second underlying connector.
        assert_eq!(format!("{:?}", a).len(), format!("{:?}", b).len());
    }

    #[test]
    fn distinct_base_urls_do_not_collide_in_the_pool() {
        let _ = get_http_client("https://one.example.com");
        let _ = get_http_client("https://two.example.com");
        let pool = HTTP_CLIENT_POOL.lock().unwrap();
        assert!(pool.contains_key("https://one.example.com"));
        assert!(pool.contains_key("https://two.example.com"));
    }
}
