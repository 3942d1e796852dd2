//! # Cache Demo
//!
//! Purpose: Store a short-lived value on a Redis-compatible server and read
//! it back through a cache handle.
//!
//! Usage: `SFN_CACHE_URL=redis://127.0.0.1:6379 cache_demo`
//! (defaults to the local server). Set `RUST_LOG=debug` to see registry and
//! client activity.

use std::env;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use sfn_cache::{Cache, CacheInput, ConnectionRegistry};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let registry = Arc::new(ConnectionRegistry::new());
    let input = match env::var("SFN_CACHE_URL") {
        Ok(url) => CacheInput::Url(url),
        Err(_) => CacheInput::Default,
    };
    let cache = Cache::new(&registry, input).context("failed to build cache handle")?;

    let result = async {
        let stored = cache
            .set("a", vec![1, 2, 3], Some(Duration::from_secs(10)))
            .await
            .context("set failed")?;
        let fetched: Option<Vec<i32>> = cache.get("a").await.context("get failed")?;
        println!("Initial data: {:?}\n", stored);
        println!("Data retrieved from cache: {:?}", fetched);
        anyhow::Ok(())
    }
    .await;

    cache.close();
    result
}
