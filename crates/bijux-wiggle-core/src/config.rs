// SPDX-License-Identifier: Apache-2.0

use std::path::PathBuf;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[non_exhaustive]
pub enum ConfigPathScope {
    User,
    Workspace,
}

const CONFIG_FILE_NAME: &str = "wiggle.toml";

fn non_empty_env(name: &str) -> Option<String> {
    std::env::var(name)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

#[must_use]
pub fn resolve_bijux_cache_dir() -> PathBuf {
    if let Some(explicit) = non_empty_env(crate::ENV_BIJUX_CACHE_DIR) {
        return PathBuf::from(explicit);
    }
    if let Some(xdg_cache_home) = non_empty_env("XDG_CACHE_HOME") {
        return PathBuf::from(xdg_cache_home).join("bijux");
    }
    if let Some(home) = non_empty_env("HOME") {
        return PathBuf::from(home).join(".cache").join("bijux");
    }
    PathBuf::from(".bijux").join("cache")
}

/// Location of `wiggle.toml`; `BIJUX_WIGGLE_CONFIG` wins over both scopes.
#[must_use]
pub fn resolve_bijux_config_path(scope: ConfigPathScope) -> PathBuf {
    if let Some(explicit) = non_empty_env(crate::ENV_BIJUX_WIGGLE_CONFIG) {
        return PathBuf::from(explicit);
    }
    match scope {
        ConfigPathScope::User => {
            if let Some(xdg_config_home) = non_empty_env("XDG_CONFIG_HOME") {
                return PathBuf::from(xdg_config_home)
                    .join("bijux")
                    .join(CONFIG_FILE_NAME);
            }
            if let Some(home) = non_empty_env("HOME") {
                return PathBuf::from(home)
                    .join(".config")
                    .join("bijux")
                    .join(CONFIG_FILE_NAME);
            }
            PathBuf::from(".bijux").join(CONFIG_FILE_NAME)
        }
        ConfigPathScope::Workspace => PathBuf::from(".bijux").join(CONFIG_FILE_NAME),
    }
}
