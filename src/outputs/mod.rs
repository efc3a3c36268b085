//! Output generation for newsletters and subscriber logs.
//!
//! # Submodules
//!
//! - [`html`]: Renders a [`Newsletter`](crate::models::Newsletter) to HTML and
//!   optionally writes it to disk
//! - [`json`]: Keeps the `subscriber_preferences.json` log of who was sent what
//!
//! # Output Structure
//!
//! ```text
//! html_output_dir/
//! ├── 2025-05-06/
//! │   ├── basketball.html
//! │   └── tennis.html
//! └── subscriber_preferences.json
//! ```

pub mod html;
pub mod json;
