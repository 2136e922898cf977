//! Pipeline stages for storybook generation and export.
//!
//! ## Data Flow
//!
//! ```text
//! request ──▶ transport ──▶ normalize ──▶ (script) ──▶ wrap ──▶ compose
//! (parts)     (HTTP)        (image/text)  (JSON)       (lines)  (JPEG)
//! ```
//!
//! 1. [`transport`]: request types, the [`transport::ChatProvider`] seam and
//!    the `reqwest` provider; the only stage with network I/O
//! 2. [`normalize`]: find the image or text in a reply of uncertain shape
//! 3. [`script`]: parse an LLM-authored story script
//! 4. [`wrap`]: greedy character-granularity caption wrapping
//! 5. [`compose`]: two-pass layout and drawing of the final picture

pub mod compose;
pub mod normalize;
pub mod script;
pub mod transport;
pub mod wrap;
