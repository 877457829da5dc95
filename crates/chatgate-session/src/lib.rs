//! Browser-session persistence and acquisition.
//!
//! The store owns every bundle on disk; adapters only ever see borrowed
//! copies. Acquisition drives a real headless browser because the upstream
//! services gate their login endpoints behind challenges no plain HTTP
//! client passes.

pub mod acquirer;
pub mod browser;
pub mod bundle;
pub mod crypto;
pub mod flows;
pub mod human;
pub mod solver;
pub mod store;

pub use acquirer::{AcquireError, AcquireHints, SessionAcquirer};
pub use browser::{BrowserContext, BrowserDriver, BrowserError, ChromiumDriver};
pub use bundle::SessionBundle;
pub use flows::BrowserAcquirer;
pub use store::{SessionStore, StoreError};
