// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Executor route registry, capacity reservation and selection.

pub mod error;
pub mod registry;
pub mod reservation;
pub mod selection;

pub use error::SchedulerError;
pub use registry::RouteRegistry;
pub use reservation::{ReserveOutcome, Reservations};
pub use selection::{Scheduler, SelectionRequest};
