//! XDG-compliant path resolution for dtou.
//!
//! The configuration file lives at `$XDG_CONFIG_HOME/dtou/config.toml`
//! (overridable with `DTOU_CONFIG`) and the durable resource store under
//! `$XDG_DATA_HOME/dtou/`.

use std::path::PathBuf;

use miette::Diagnostic;
use thiserror::Error;

/// Environment variable naming an explicit configuration file.
pub const CONFIG_ENV: &str = "DTOU_CONFIG";

const APP_DIR: &str = "dtou";

/// Errors from path resolution.
#[derive(Debug, Error, Diagnostic)]
pub enum PathError {
    #[error("cannot determine home directory")]
    #[diagnostic(
        code(dtou::paths::no_home),
        help("Set the HOME environment variable or ensure a valid user profile exists.")
    )]
    NoHome,
}

pub type PathResult<T> = std::result::Result<T, PathError>;

/// Global XDG directories for dtou.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DtouPaths {
    /// `$XDG_CONFIG_HOME/dtou/`
    pub config_dir: PathBuf,
    /// `$XDG_DATA_HOME/dtou/`
    pub data_dir: PathBuf,
}

impl DtouPaths {
    /// Resolve XDG directories from environment variables with standard fallbacks.
    pub fn resolve() -> PathResult<Self> {
        let home = std::env::var("HOME")
            .map(PathBuf::from)
            .map_err(|_| PathError::NoHome)?;

        let config_dir = std::env::var("XDG_CONFIG_HOME")
            .map(PathBuf::from)
            .unwrap_or_else(|_| home.join(".config"))
            .join(APP_DIR);

        let data_dir = std::env::var("XDG_DATA_HOME")
            .map(PathBuf::from)
            .unwrap_or_else(|_| home.join(".local/share"))
            .join(APP_DIR);

        Ok(Self {
            config_dir,
            data_dir,
        })
    }

    /// The configuration file: `DTOU_CONFIG` if set, else `config.toml`
    /// in the config directory.
    pub fn config_file(&self) -> PathBuf {
        std::env::var(CONFIG_ENV)
            .map(PathBuf::from)
            .unwrap_or_else(|_| self.config_dir.join("config.toml"))
    }

    /// Directory of the durable resource store.
    pub fn store_dir(&self) -> PathBuf {
        self.data_dir.join("store")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn store_dir_is_under_data_dir() {
        let paths = DtouPaths {
            config_dir: PathBuf::from("/c/dtou"),
            data_dir: PathBuf::from("/d/dtou"),
        };
        assert_eq!(paths.store_dir(), PathBuf::from("/d/dtou/store"));
        assert!(paths.store_dir().starts_with(&paths.data_dir));
    }

    #[test]
    fn resolved_dirs_end_in_app_dir() {
        // HOME is set in every test environment we run in.
        if let Ok(paths) = DtouPaths::resolve() {
            assert!(paths.config_dir.ends_with(APP_DIR));
            assert!(paths.data_dir.ends_with(APP_DIR));
        }
    }
}
