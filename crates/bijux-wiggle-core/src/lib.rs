// SPDX-License-Identifier: Apache-2.0

#![forbid(unsafe_code)]

pub mod canonical;
mod config;
mod errors;
mod time;

pub use canonical::sha256_hex;
pub use config::{resolve_bijux_cache_dir, resolve_bijux_config_path, ConfigPathScope};
pub use errors::{ExitCode, MachineError};
pub use time::{Clock, FixedClock, SystemClock, SECONDS_PER_DAY};

pub const CRATE_NAME: &str = "bijux-wiggle-core";

pub const ENV_BIJUX_LOG_LEVEL: &str = "BIJUX_LOG_LEVEL";
pub const ENV_BIJUX_CACHE_DIR: &str = "BIJUX_CACHE_DIR";
pub const ENV_BIJUX_WIGGLE_CONFIG: &str = "BIJUX_WIGGLE_CONFIG";
