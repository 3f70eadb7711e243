//! Gateway connection used by rebalancer commands.

use log::info;
use stratbook_broker::ibkr::ClientPortal;

use crate::config::Config;
use crate::error::Result;

/// Build the Client Portal client for the configured gateway.
pub fn connect_gateway(config: &Config) -> Result<ClientPortal> {
    let ctx = config.request_context();
    let client = ClientPortal::new(&ctx)?;
    info!("Gateway client ready for {}", ctx.base_url);
    Ok(client)
}
