//! The I/O and demultiplexing core of an ICE agent's transport layer
//! (spec.md §1). This crate owns host-candidate gathering, session
//! multiplexing on a single 5-tuple, and the STUN/DTLS/opaque split of
//! inbound bytes; full ICE pair prioritization, TURN allocation, and DTLS
//! cryptography stay external collaborators (see [`harvester`], [`socket`]).
//!
//! [`run`] assembles one [`acceptor::Acceptor`] per enabled transport
//! feature behind a shared [`service::EventDispatcher`] and is what
//! `main.rs` drives; library consumers embedding this crate inside a larger
//! ICE agent should build their own `Acceptor`/`SocketWrapper` graph instead
//! and call [`harvester::harvest`] per `Component` directly.

pub mod acceptor;
pub mod address_filter;
pub mod config;
pub mod error;
pub mod filters;
pub mod harvester;
pub mod io_handler;
pub mod socket;

use config::Config;
use harvester::HarvestStatistics;

use std::sync::Arc;

use service::{EventDispatcher, Transport};

/// Builds the transport core from `config` and keeps it running: harvests
/// one demo set of host candidates per enabled transport (spec.md §4.6,
/// driven by the `[harvest]` config section) and then idles, since the
/// acceptors' I/O workers run as independent background tasks that outlive
/// this future. A real ICE agent would instead hold on to the `Acceptor`s
/// (or the `TransportCore` returned by library callers) and drive harvests
/// per-`Component` as connectivity checks require them.
pub async fn run(config: Arc<Config>) -> anyhow::Result<()> {
    let dispatcher = Arc::new(EventDispatcher::new());
    let address_filter = address_filter::AddressFilter::get(&config.runtime)?;
    let stats = HarvestStatistics::new();

    #[cfg(feature = "udp")]
    harvest_transport(Transport::Udp, &config, &dispatcher, &address_filter, &stats).await;

    #[cfg(feature = "tcp")]
    harvest_transport(Transport::Tcp, &config, &dispatcher, &address_filter, &stats).await;

    log::info!(
        "ice transport core running: io_threads={}, candidates={}",
        config.runtime.io_threads,
        stats.candidate_count(),
    );

    std::future::pending::<()>().await;
    Ok(())
}

#[cfg(any(feature = "udp", feature = "tcp"))]
async fn harvest_transport(
    transport: Transport,
    config: &Arc<Config>,
    dispatcher: &Arc<EventDispatcher>,
    address_filter: &address_filter::AddressFilter,
    stats: &HarvestStatistics,
) {
    let acceptor = acceptor::Acceptor::new(transport, dispatcher.clone(), config.runtime.clone(), config.acceptor.clone());

    let result = harvester::harvest(
        Arc::from(config.harvest.component.as_str()),
        config.harvest.preferred_port,
        config.harvest.min_port,
        config.harvest.max_port,
        transport,
        &acceptor,
        address_filter,
        &config.runtime,
        None,
        stats,
    )
    .await;

    match result {
        Ok(candidates) => {
            for candidate in &candidates {
                log::info!(
                    "harvested {:?} host candidate on {} (virtual={})",
                    candidate.transport,
                    candidate.socket.local,
                    candidate.virtual_interface,
                );
            }
        }
        Err(e) => log::warn!("{transport:?} candidate harvest failed: {e}"),
    }
}

