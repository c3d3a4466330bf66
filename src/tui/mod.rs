//! Terminal setup form that launches `triggersync-record` and shows its output.

pub mod app;
pub mod events;
pub mod file_browser;
pub mod form;
pub mod process;
pub mod setup;
pub mod ui;

pub use app::App;
