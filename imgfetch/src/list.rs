//! Work-list reader.
//!
//! A work list is a text file holding one `<destination> <url>` pair per line:
//!
//! ```text
//! n01440764/n01440764_10026.JPEG "http://farm1.static.flickr.com/69/199829146_d1bd6c6d2f.jpg"
//! n01440764/n01440764_10027.JPEG http://farm3.static.flickr.com/2162/2211364005_a9ae7bd3b2.jpg
//! ```
//!
//! Only the final component of the destination is kept, every file lands flat in the target directory.

use std::path::Path;

use thiserror::Error;
use tokio::{fs, io};
use url::Url;

#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Io(#[from] io::Error),
    #[error("line {line}: expected `<destination> <url>`")]
    Malformed { line: usize },
    #[error("line {line}: invalid URL: {source}")]
    Url { line: usize, source: url::ParseError },
}

/// One work-list entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Entry {
    /// Destination file name.
    pub name: String,
    /// Source locator.
    pub url: Url,
}

/// Read the work list stored at `path`.
pub async fn read(path: impl AsRef<Path>) -> Result<Vec<Entry>, Error> {
    let text = fs::read_to_string(path).await?;

    parse(&text)
}

/// Parse a work list, ignoring blank lines.
pub fn parse(text: &str) -> Result<Vec<Entry>, Error> {
    text.lines()
        .enumerate()
        .filter(|(_, line)| !line.trim().is_empty())
        .map(|(i, line)| parse_line(i + 1, line))
        .collect()
}

fn parse_line(line: usize, text: &str) -> Result<Entry, Error> {
    let mut fields = text.split_whitespace();

    let (Some(destination), Some(url)) = (fields.next(), fields.next()) else {
        return Err(Error::Malformed { line });
    };

    let name = Path::new(destination)
        .file_name()
        .and_then(|name| name.to_str())
        .ok_or(Error::Malformed { line })?;

    let url = Url::parse(&url.replace('"', "")).map_err(|source| Error::Url { line, source })?;

    Ok(Entry {
        name: name.to_owned(),
        url,
    })
}
