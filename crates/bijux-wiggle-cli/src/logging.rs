// SPDX-License-Identifier: Apache-2.0

use bijux_wiggle_core::ENV_BIJUX_LOG_LEVEL;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[derive(Clone, Copy)]
pub(crate) struct LogFlags {
    pub quiet: bool,
    pub verbose: u8,
    pub json: bool,
}

impl LogFlags {
    fn default_directive(self) -> &'static str {
        if self.quiet {
            return "error";
        }
        match self.verbose {
            0 => "warn",
            1 => "info",
            2 => "debug",
            _ => "trace",
        }
    }
}

/// Installs the process subscriber. Logs go to stderr; stdout carries payloads.
pub(crate) fn init_tracing(flags: LogFlags) {
    let filter = EnvFilter::try_from_env(ENV_BIJUX_LOG_LEVEL)
        .unwrap_or_else(|_| EnvFilter::new(flags.default_directive()));
    let installed = if flags.json {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().json().with_writer(std::io::stderr))
            .try_init()
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
            .try_init()
    };
    if let Err(e) = installed {
        eprintln!("tracing already initialised: {e}");
    }
}
