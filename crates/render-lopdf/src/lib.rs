//! Default renderer engine for the quire pipeline.
//!
//! [`LopdfLauncher`] starts an in-process [`LopdfEngine`] that behaves like an
//! external renderer process: it can be shut down or die, after which its sessions
//! fail with `RenderError::Disconnected`. Sessions turn an HTML document into an A4
//! text PDF:
//!
//! - visible text of block elements, word-wrapped in Helvetica 10pt
//! - elements with class `page-break` start a new page
//! - `<img src>` and `<link rel="stylesheet" href>` are requested through the
//!   session's sub-resource loader; image `alt` text is drawn in brackets
//! - header/footer snippets with `pageNumber`/`totalPages` spans are drawn on
//!   every page

mod document;
mod engine;
pub mod markup;

pub use document::{A4_HEIGHT, A4_WIDTH, PageMetrics};
pub use engine::{LopdfEngine, LopdfLauncher, LopdfSession};
