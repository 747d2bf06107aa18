pub mod holidays;
pub mod market;
pub mod session;

pub use holidays::*;
pub use market::*;
pub use session::*;
