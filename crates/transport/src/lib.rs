//! Delivery transport for relayed files.
//!
//! This crate provides:
//! - `DeliveryTransport` trait for pluggable delivery channels
//! - Telegram Bot API transport (`sendDocument` with streamed upload)
//! - Caption rendering for `{filename}` / `{filesize_mb}` templates
//! - Upload progress tracking at integer-percent granularity
//! - `Deliverer`, the bounded-retry wrapper used by the ingest pipeline

pub mod caption;
pub mod deliverer;
pub mod progress;
pub mod telegram;
pub mod traits;

pub use caption::{render_caption, CaptionContext};
pub use deliverer::{DeliveryReport, Deliverer};
pub use progress::{Progress, ProgressTracker};
pub use telegram::TelegramTransport;
pub use traits::{DeliveryError, DeliveryTransport, Upload};
