/// Typed message router - split into registration, dispatch and statistics
mod core;
mod dispatch;
mod registration;
mod stats;

pub use self::core::TypedMessageRouter;
pub use dispatch::DispatchOutcome;
pub use registration::Unregisterer;
pub use stats::RouterStats;
