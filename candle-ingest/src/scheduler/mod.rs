//! Scheduling of recurring backfill ticks

mod tick;

pub use tick::TickScheduler;
