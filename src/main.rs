#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

use std::sync::Arc;

use ice_transport::config::Config;

fn main() -> anyhow::Result<()> {
    let config = Arc::new(Config::load()?);
    simple_logger::init_with_level(config.log.level.as_level())?;

    build_runtime(&config)?.block_on(ice_transport::run(config))
}

/// Builds the I/O worker pool, sized to `config.runtime.io_threads`. With
/// the `udp` feature enabled each worker thread is pinned to a distinct
/// core, round-robining `core_affinity`'s topology; when the core list is
/// shorter than the thread count, or unavailable on this platform, threads
/// past the end of the list fall back to the normal unpinned group instead
/// of failing startup.
fn build_runtime(config: &Config) -> std::io::Result<tokio::runtime::Runtime> {
    let mut builder = tokio::runtime::Builder::new_multi_thread();
    builder.worker_threads(config.runtime.io_threads.max(1)).enable_all();

    #[cfg(feature = "udp")]
    {
        let core_ids: Vec<Option<core_affinity::CoreId>> = core_affinity::get_core_ids()
            .map(|ids| ids.into_iter().take(config.runtime.io_threads).map(Some).collect())
            .unwrap_or_else(|| (0..config.runtime.io_threads).map(|_| None).collect());

        if !core_ids.is_empty() {
            let next = std::sync::atomic::AtomicUsize::new(0);
            builder.on_thread_start(move || {
                let index = next.fetch_add(1, std::sync::atomic::Ordering::Relaxed);
                if let Some(Some(core_id)) = core_ids.get(index % core_ids.len()) {
                    let _ = core_affinity::set_for_current(*core_id);
                }
            });
        }
    }

    builder.build()
}
