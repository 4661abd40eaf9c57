// Copyright (c) 2025 Relay Team
// SPDX-License-Identifier: Apache-2.0

//! Graceful child termination.

use std::time::Duration;
use tokio::process::Child;
use tracing::{debug, warn};

/// Grace period between SIGTERM and SIGKILL.
pub const KILL_GRACE: Duration = Duration::from_secs(5);

/// Terminate a child process: SIGTERM first, SIGKILL after [`KILL_GRACE`]
/// if it has not exited.
pub async fn terminate_gracefully(child: &mut Child) {
    let Some(pid) = child.id() else {
        // Already reaped.
        return;
    };

    #[cfg(unix)]
    {
        use nix::sys::signal::{kill, Signal};
        use nix::unistd::Pid;

        if let Err(e) = kill(Pid::from_raw(pid as i32), Signal::SIGTERM) {
            debug!(pid, error = %e, "SIGTERM failed, process likely gone");
            return;
        }
    }
    #[cfg(not(unix))]
    {
        let _ = child.start_kill();
    }

    match tokio::time::timeout(KILL_GRACE, child.wait()).await {
        Ok(_) => {}
        Err(_) => {
            warn!(pid, "Process ignored SIGTERM, sending SIGKILL");
            if let Err(e) = child.start_kill() {
                debug!(pid, error = %e, "SIGKILL failed");
            }
            let _ = child.wait().await;
        }
    }
}
