//! CueSync node
//!
//! Usage: cuesync-node [config.json]
//!
//! Joins the show multicast group and follows the controller until Ctrl-C.
//! Cues are logged rather than rendered.

use std::path::PathBuf;

use cuesync_runtime::{init_tracing, Agent, LoggingApplier, NodeConfig, Reactor};
use cuesync_time::MonotonicClock;
use cuesync_transport::UdpTransport;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let path = std::env::args_os().nth(1).map(PathBuf::from);
    let config = NodeConfig::load(path.as_deref())?;
    init_tracing(config.log_json)?;

    let transport = UdpTransport::join_multicast(&config.multicast()).await?;
    let agent = Agent::start(&config, MonotonicClock::new(), LoggingApplier)?;
    let (reactor, handle) = Reactor::new(transport, agent);
    let mut task = tokio::spawn(reactor.run());

    tokio::select! {
        result = tokio::signal::ctrl_c() => {
            result?;
            tracing::info!("ctrl-c, stopping");
            handle.stop();
            let agent = task.await?;
            tracing::info!(stats = ?agent.stats(), "final counters");
        }
        result = &mut task => {
            result?;
        }
    }

    Ok(())
}
