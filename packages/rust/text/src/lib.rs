//! Visible-text extraction and overlapping text segmentation.
//!
//! Turns a fetched HTML page into the segments stored in the chunk table:
//! 1. [`visible_text`] drops `script`/`style` and joins the remaining text nodes
//! 2. [`TextSplitter`] cuts the text into fixed-size, overlapping segments

mod extract;
mod splitter;

pub use extract::visible_text;
pub use splitter::TextSplitter;
