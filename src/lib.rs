#![cfg_attr(docsrs, feature(doc_auto_cfg))]
#![warn(missing_docs, missing_debug_implementations, rust_2018_idioms)]

//! # planeswap: presentation scheduling for display drivers
//!
//! This crate decides, for every buffer swap of a rendering client, how and when the newly
//! rendered contents become visible: by copying them into the displayed buffer, by flipping
//! the buffer onto the screen or onto a hardware overlay plane in sync with the vertical
//! retrace, or by merely waiting for a retrace. It also arbitrates the small pool of overlay
//! planes a display engine offers between surfaces on several outputs.
//!
//! ## Structure of the crate
//!
//! - [`backend`] contains the interfaces to the display hardware: buffers and their
//!   allocation, the modesetting device and its overlay planes.
//! - [`present`] contains the [`PresentScheduler`](present::PresentScheduler), tracking
//!   in-flight swaps until the hardware reports their completion.
//! - [`utils`] contains geometry types and retrace sequence arithmetic.
//!
//! ## General principles
//!
//! ### The event loop and state handling
//!
//! The scheduler is built for [`calloop`], a callback-oriented event loop. Retrace and page-flip
//! events of the device are fed through a [`PresentEventSource`](present::PresentEventSource)
//! and dispatched into the scheduler together with a mutable handler providing access to the
//! surfaces and clients. All entry points run to completion, nothing ever blocks on the
//! hardware.
//!
//! ### Logging
//!
//! planeswap makes extensive use of [`tracing`] for its internal logging. Every scheduler
//! logs inside a `backend_present` span.
//!
//! For release builds it is recommended to limit the log level during compile time.
//! This can be done by adding a dependency to [`tracing`] and enabling the corresponding features.
//! For example to enable `trace` messages for debug builds, but limit release builds to `debug` add
//! the following in your binary crate `Cargo.toml`:
//!
//! ```toml
//! [dependencies]
//! tracing = { version = "0.1", features = ["max_level_trace", "release_max_level_debug"] }
//! ```

pub mod backend;
pub mod present;
pub mod utils;

pub mod reexports;
