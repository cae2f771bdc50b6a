pub mod element;
pub mod error;
pub mod rule;
pub mod stream;
pub mod unit;

pub use element::Element;
pub use error::{CoreError, CoreReason, CoreResult};
