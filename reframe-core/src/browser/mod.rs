mod automation;
mod error;
mod profile;
mod session;

pub use automation::{ChromiumSession, ChromiumSessionFactory};
pub use error::{BrowserError, BrowserResult};
pub use profile::{BrowserProfile, ProfileManager};
pub use session::{Session, SessionFactory};
