pub mod error;
pub mod retry;
pub mod symbol;
pub mod traits;
pub mod types;

pub use error::*;
pub use retry::*;
pub use symbol::*;
pub use traits::*;
pub use types::*;
