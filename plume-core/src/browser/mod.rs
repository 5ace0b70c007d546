mod error;
mod fingerprint;
mod human;
mod stealth;
mod supervisor;

pub use error::{BrowserError, BrowserResult};
pub use fingerprint::FingerprintMasker;
pub use human::HumanPacer;
pub use supervisor::{BrowserSupervisor, ViewportSpec};
