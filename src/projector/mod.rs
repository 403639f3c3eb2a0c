pub mod canonical;
pub mod metrics;

pub use canonical::CanonicalProjector;
