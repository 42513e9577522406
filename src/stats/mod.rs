//! Statistics and bitrate-adaptation feedback
//!
//! Provides observability into a publish session and the seam an external
//! ABR controller plugs into.

pub mod abr;
pub mod metrics;

pub use abr::AbrFeedback;
pub use metrics::{PublishStats, PublisherSnapshot};
