//! Pipeline stages for one job run.
//!
//! Each submodule implements exactly one stage and knows nothing about the
//! others; [`crate::controller`] wires them together and owns all state.
//!
//! ## Data Flow
//!
//! ```text
//! admission ──▶ (queue)* ──▶ upload ──▶ poll ──▶ retrieve
//!  (check)     (backoff)    (stream)   (1 s)    (save + cleanup)
//!                  ▲            │
//!                  └── 503 ─────┘
//! ```
//!
//! 1. [`admission`] : ask whether a file of this size may start now
//! 2. [`queue`]     : two-tier backoff re-checks until admitted or refused
//! 3. [`upload`]    : stream the file with byte progress; 503 loops back
//! 4. [`poll`]      : sequential status polls until `finished` / `error`
//! 5. [`retrieve`]  : download with progress, save, fire-and-forget cleanup
//!
//! Stages return plain outcome enums rather than `Err` for anything the
//! lifecycle has a transition for. Cancellation is the caller's business:
//! stages that sleep take a `CancellationToken`; the rest are raced against
//! it in the controller.

pub mod admission;
pub mod poll;
pub mod queue;
pub mod retrieve;
pub mod upload;
