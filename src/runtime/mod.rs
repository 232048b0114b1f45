// SPDX-License-Identifier: GPL-2.0-or-later

//! Process wide execution resources.
//!
//! The [`Dialer`] and [`RateLimiter`] are constructed once at program
//! start and passed by reference to every executor; the [`WorkerPool`]
//! bounds payload concurrency within one template execution.

mod conn;
mod dialer;
mod limiter;
mod pool;

pub use conn::Connection;
pub use dialer::{DialError, Dialer};
pub use limiter::RateLimiter;
pub use pool::WorkerPool;

/// Default timeout applied to reads that the template does not override.
pub const DEFAULT_READ_TIMEOUT: std::time::Duration = std::time::Duration::from_secs(5);
