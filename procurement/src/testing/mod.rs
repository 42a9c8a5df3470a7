//! Testing utilities.
//!
//! - [`generators`]: `proptest` strategies for domain types
//! - [`builders`]: fluent builders for order and delivery inputs
//!
//! Enabled for this crate's own tests and, for downstream crates, with the
//! `testing` feature.
//!
//! ```rust,ignore
//! use procurement::testing::prelude::*;
//!
//! let input = OrderBuilder::new().line("widget", "W-1", 10, dec!(2.50)).build();
//! ```

pub mod builders;
pub mod generators;

/// Everything needed for testing:
/// ```rust,ignore
/// use procurement::testing::prelude::*;
/// ```
pub mod prelude {
    pub use super::builders::*;
    pub use super::generators::*;
}
