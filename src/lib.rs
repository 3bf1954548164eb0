//! procsight — a live process introspection engine for reverse engineering
//! and exploit development.
//!
//! The engine sits on top of an existing debugging session (a gdb bridge, a
//! ptrace supervisor, a remote stub) reached through the [`backend::Backend`]
//! trait, and answers the questions an exploit developer keeps re-asking:
//! what does this value point at, what does the address space look like,
//! which way will this branch go, what arguments is this call about to
//! receive, how hardened is the binary.
//!
//! # Module overview
//!
//! ## Foundation
//!
//! - [`error`] — Error types used throughout the crate.
//! - [`types`] — Core types: `Architecture`, `ValueKind`, `ClassifiedValue`.
//! - [`backend`] — The debugging-backend trait the engine is driven through.
//! - [`cache`] — Per-command query memoization with wholesale invalidation.
//! - [`inspector`] — The engine facade; also process snapshots.
//!
//! ## Address space and binary model
//!
//! - [`maps`] — Address-space reconstruction (`/proc/maps`, remote section
//!   listings, static section extents).
//! - [`elf`] — Section model, PIE rebasing, PLT symbol resolution.
//! - [`checksec`] — Security mechanism analysis (RELRO, NX, PIE, canary,
//!   FORTIFY).
//!
//! ## Value analysis
//!
//! - [`classify`] — Raw-integer classification (immediate / code / rodata /
//!   data / heap) with payload rendering.
//! - [`chain`] — Cycle-safe, depth-bounded reference-chain walking.
//!
//! ## Execution analysis
//!
//! - [`flags`] — Condition-flag decoding from status registers.
//! - [`cfeval`] — Branch taken/target evaluation without stepping.
//! - [`args`] — Call-argument inference at a call site.

pub mod args;
pub mod backend;
pub mod cache;
pub mod cfeval;
pub mod chain;
pub mod checksec;
pub mod classify;
pub mod elf;
pub mod error;
pub mod flags;
pub mod inspector;
pub mod maps;
pub mod types;

pub use backend::{Backend, DecodedInst};
pub use error::{Error, Result};
pub use inspector::{Inspector, Snapshot};
pub use types::{Architecture, ClassifiedValue, ValueKind};
