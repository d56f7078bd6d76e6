//! Shared vocabulary for trellis plugin backends.
//!
//! Every backend reports failures with [`LoadError`] when a plugin cannot be loaded and [`CallError`] when a call or
//! global access fails. Hosts can additionally use the [`config`] manifest and the [`logging`] subscriber setup.

pub mod config;
pub mod error;
pub mod logging;

pub use config::{Config, ConfigError, PluginEntry, PluginKind};
pub use error::{CallError, CallErrorCode, CallResult, CallResultExt, Error, LoadError, LoadResult, Result};
