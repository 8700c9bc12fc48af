//! Renders a deterministic HTML listing for a directory: subdirectories
//! first, then files, each group in ordinal order, with an icon class per
//! extension and a parent link when the directory is not the root.

use std::fmt::Write as _;
use std::io;
use std::path::Path;

use percent_encoding::{AsciiSet, NON_ALPHANUMERIC, utf8_percent_encode};

use crate::dispatch::STYLE_ASSET;

// Percent-encode everything except unreserved characters and literal '/'.
const HREF_ENCODE: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'/')
    .remove(b'.')
    .remove(b'-')
    .remove(b'_')
    .remove(b'~');

struct DirectoryEntry {
    name: String,
    is_directory: bool,
}

impl DirectoryEntry {
    fn icon_class(&self) -> &'static str {
        if self.is_directory {
            return "ico_folder";
        }
        let ext = match self.name.rsplit_once('.') {
            Some((_, ext)) => ext.to_ascii_lowercase(),
            None => String::new(),
        };
        match ext.as_str() {
            "html" | "htm" => "ico_html",
            "css" => "ico_css",
            "svg" | "jpg" | "tif" | "tiff" | "dng" | "png" | "bmp" => "ico_img",
            _ => "ico_file",
        }
    }
}

/// Pure function of `(root, directory)`; errors bubble to the dispatcher,
/// which degrades them to 404.
pub fn render(root: &Path, directory: &Path) -> io::Result<String> {
    let mut dirs = Vec::new();
    let mut files = Vec::new();

    for entry in directory.read_dir()? {
        let entry = entry?;
        let name = entry.file_name().to_string_lossy().into_owned();
        if entry.file_type()?.is_dir() {
            dirs.push(DirectoryEntry { name, is_directory: true });
        } else {
            files.push(DirectoryEntry { name, is_directory: false });
        }
    }
    dirs.sort_by(|a, b| a.name.cmp(&b.name));
    files.sort_by(|a, b| a.name.cmp(&b.name));

    let mut sb = String::new();
    sb.push_str("<html>\n<head>\n");
    let _ = writeln!(
        sb,
        "<link rel=\"stylesheet\" type=\"text/css\" href=\"/{}\" />",
        STYLE_ASSET
    );
    sb.push_str("</head>\n<body>\n");
    sb.push_str("<div class=\"page\">\n<div class=\"pageinner\">\n");
    sb.push_str("<div class=\"head1\">gomi local web server</div>\n");

    sb.push_str("<div class=\"head2\">\n");
    let _ = writeln!(sb, "<div>{}</div>", html_escape::encode_text(&directory.to_string_lossy()));
    sb.push_str("</div>\n");

    sb.push_str("<div class=\"listingcontainer\">\n<table class=\"listing\">\n");

    if let Some(parent) = parent_url(root, directory) {
        push_row(&mut sb, "ico_back", &encode_href(&parent), "..");
    }

    for dir in &dirs {
        let href = format!("{}/", encode_href(&dir.name));
        push_row(&mut sb, dir.icon_class(), &href, &dir.name);
    }

    for file in &files {
        push_row(&mut sb, file.icon_class(), &encode_href(&file.name), &file.name);
    }

    sb.push_str("</table>\n</div>\n</div>\n</div>\n</body>\n</html>\n");
    Ok(sb)
}

fn push_row(sb: &mut String, icon: &str, href: &str, display: &str) {
    sb.push_str("<tr>\n");
    sb.push_str("<td class=\"td_icon\">\n");
    let _ = writeln!(sb, "<div class=\"icon {}\"/>", icon);
    sb.push_str("</td>\n");
    sb.push_str("<td class=\"td_name\">\n");
    let _ = writeln!(sb, "<a href=\"{}\">{}</a>", href, html_escape::encode_text(display));
    sb.push_str("</td>\n");
    sb.push_str("</tr>\n");
}

/// Root-relative URL of the parent directory, with a trailing slash.
/// `None` when the directory is the document root itself.
fn parent_url(root: &Path, directory: &Path) -> Option<String> {
    let rel = directory.strip_prefix(root).ok()?;
    let segments: Vec<String> = rel
        .components()
        .map(|c| c.as_os_str().to_string_lossy().into_owned())
        .collect();
    if segments.is_empty() {
        return None;
    }
    let mut parent = String::from("/");
    for segment in &segments[..segments.len() - 1] {
        parent.push_str(segment);
        parent.push('/');
    }
    Some(parent)
}

fn encode_href(s: &str) -> String {
    utf8_percent_encode(s, HREF_ENCODE).to_string()
}
