//! Background processors.
//!
//! - `SchedulingService`: receives `SweepTick`, fires scheduled orders
//! - `IdleReaper`: drops event subscriptions whose clients went quiet
//!
//! Both run until the shared shutdown signal fires.

pub mod idle_reaper;
pub mod scheduler;

pub use idle_reaper::IdleReaper;
pub use scheduler::{SchedulingService, SweepReport, SweepTick};
