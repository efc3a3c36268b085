//! HTML newsletter rendering.
//!
//! The template is fixed: a title and heading naming the sport, an intro line,
//! one block per article (title, summary, optional topics), and a dated footer.
//! Every interpolated string is HTML-escaped.
//!
//! # Output Structure
//!
//! When an output directory is given, each rendered newsletter is also written
//! to disk:
//! ```text
//! html_output_dir/
//! └── 2025-05-06/
//!     ├── basketball.html
//!     └── sports-betting.html
//! ```

use crate::models::Newsletter;
use crate::utils::slugify_title;
use html_escape::{encode_double_quoted_attribute, encode_text};
use std::error::Error;
use std::fmt::Write;
use tokio::fs;
use tracing::{info, instrument};

/// Render `newsletter` as a complete HTML document.
pub fn render_newsletter(newsletter: &Newsletter) -> String {
    let sport = encode_text(&newsletter.sport);
    let mut html = String::new();

    writeln!(html, "<!DOCTYPE html>").unwrap();
    writeln!(html, "<html lang=\"en\">").unwrap();
    writeln!(html, "<head>").unwrap();
    writeln!(html, "    <meta charset=\"utf-8\">").unwrap();
    writeln!(html, "    <title>{sport} Newsletter</title>").unwrap();
    writeln!(html, "</head>").unwrap();
    writeln!(html, "<body>").unwrap();
    writeln!(html, "    <h1>{sport} News Update</h1>").unwrap();
    writeln!(html, "    <p>Here are the latest updates in {sport}:</p>").unwrap();

    for article in &newsletter.articles {
        writeln!(
            html,
            "    <div class=\"article\" data-title=\"{}\">",
            encode_double_quoted_attribute(&article.title)
        ).unwrap();
        writeln!(html, "        <h2>{}</h2>", encode_text(&article.title)).unwrap();
        writeln!(html, "        <p>{}</p>", encode_text(&article.summary)).unwrap();
        if !article.keywords.is_empty() {
            writeln!(
                html,
                "        <p>Topics: {}</p>",
                encode_text(&article.keywords.join(", "))
            ).unwrap();
        }
        writeln!(html, "    </div>").unwrap();
    }

    writeln!(
        html,
        "    <footer><p>Sent {}</p></footer>",
        encode_text(&newsletter.date)
    ).unwrap();
    writeln!(html, "</body>").unwrap();
    writeln!(html, "</html>").unwrap();
    html
}

/// Write a rendered newsletter under `{dir}/{date}/{sport-slug}.html`.
///
/// # Returns
///
/// The written path.
///
/// # Errors
///
/// Returns an error if the dated directory cannot be created or the file
/// cannot be written.
#[instrument(level = "info", skip_all, fields(%dir, sport = %newsletter.sport))]
pub async fn write_newsletter(
    dir: &str,
    newsletter: &Newsletter,
    html: &str,
) -> Result<String, Box<dyn Error>> {
    let date_dir = format!("{}/{}", dir.trim_end_matches('/'), newsletter.date);
    fs::create_dir_all(&date_dir).await?;
    let path = format!("{}/{}.html", date_dir, slugify_title(&newsletter.sport));
    fs::write(&path, html).await?;
    info!(%path, "Wrote newsletter HTML");
    Ok(path)
}
