//! Automation client interface and its Chrome DevTools Protocol backend.
//!
//! The harness only talks to the [`Automation`] trait, so tests can swap
//! in a scripted implementation and the CDP details stay in one place.
//!
//! ```text
//! AppProcessHarness
//!     |
//!     v
//! Automation::connect(endpoint) --> Arc<dyn AutomationConnection>
//!     |                                   |
//!     |   contexts() ---------------------+--> [BrowsingContext { pages }]
//!     |   attach(page) -------------------+--> page session id
//!     |   evaluate(session, expr) --------+--> serde_json::Value
//!     |   close()
//! ```

pub mod cdp;
pub mod trait_def;
pub mod types;

pub use cdp::CdpAutomation;
pub use trait_def::{Automation, AutomationConnection};
pub use types::{BrowsingContext, PageInfo, VersionInfo};
