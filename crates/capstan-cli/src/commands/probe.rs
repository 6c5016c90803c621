//! The `probe` subcommand: report which candidate roots exist
//!
//! Read-only reconnaissance for hosts whose filesystem layout is not
//! known in advance; nothing is uploaded or executed.

use anyhow::{bail, Result};

use capstan_core::config::DeployConfig;
use capstan_engine::{resolve_root, PathProbe, Session};

use crate::output::{print_error, print_info, print_success, print_warning};

/// Probe the given candidate paths (or the configured ones) over SFTP.
pub async fn probe_command(config: &DeployConfig, paths: Vec<String>) -> Result<()> {
    let candidates = if paths.is_empty() {
        config.target.candidate_roots.clone()
    } else {
        paths
    };
    if candidates.is_empty() {
        bail!("No candidate paths given and none configured");
    }

    print_info(&format!(
        "Connecting to {}@{}",
        config.target.user,
        config.target.address()
    ));
    let mut session = match Session::open(&config.target).await {
        Ok(session) => session,
        Err(e) => {
            print_error(&format!("Connection failed: {}", e));
            return Err(e.into());
        }
    };
    print_success("Connected");

    for path in &candidates {
        if session.exists(path).await {
            print_success(path);
        } else {
            println!("   ✗ {}", path);
        }
    }

    // Same resolution the deploy pipeline performs, including the
    // diagnostic listing when nothing matches
    match resolve_root(&session, &candidates).await {
        Ok(resolution) => {
            println!();
            print_success(&format!(
                "Deployment root: {} (after {} probes)",
                resolution.root, resolution.probes
            ));
        }
        Err(e) => {
            println!();
            print_warning("No candidate root exists on this host");
            if !e.listing.is_empty() {
                print_info("Nearby directory contains:");
                for entry in &e.listing {
                    println!("   {}", entry);
                }
            }
        }
    }

    session.close().await;
    Ok(())
}
