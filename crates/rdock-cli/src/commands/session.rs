//! Session command implementation

use anyhow::{Context, Result};

use rdock_core::ConnectionKey;

use crate::output::print_success;
use crate::runtime::Runtime;

/// Close the SSH session kept open for `target`, tunnels included
pub async fn disconnect(runtime: &Runtime, target: &str) -> Result<()> {
    let key = ConnectionKey::parse(target).with_context(|| format!("Invalid target: {}", target))?;
    runtime.pool().close(&key).await;
    print_success(&format!("Closed SSH session for {}", key));
    Ok(())
}
