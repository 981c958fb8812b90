//! Composition root for the dispatch service: settings, default handlers and
//! the running worker pools.

pub mod app;
pub mod handlers;
pub mod settings;

pub use app::Dispatcher;
pub use settings::{Settings, SettingsError, StoreBackend};
