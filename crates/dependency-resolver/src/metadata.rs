//! `maven-metadata.xml` version index

use std::cmp::Ordering;

use quick_xml::events::Event;
use quick_xml::Reader;

use crate::ResolveError;

/// Versions published for one `group:artifact`
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct VersionIndex {
    pub latest: Option<String>,
    pub release: Option<String>,
    pub versions: Vec<String>,
}

impl VersionIndex {
    pub fn parse(xml: &str) -> Result<Self, ResolveError> {
        let mut reader = Reader::from_str(xml.trim_start_matches('\u{feff}'));
        reader.trim_text(true);

        let mut index = VersionIndex::default();
        let mut current: Option<String> = None;

        loop {
            match reader.read_event()? {
                Event::Start(e) => {
                    current = Some(String::from_utf8_lossy(e.local_name().as_ref()).into_owned());
                }
                Event::End(_) => current = None,
                Event::Text(e) => {
                    let text = e.unescape()?.trim().to_string();
                    match current.as_deref() {
                        Some("latest") => index.latest = Some(text),
                        Some("release") => index.release = Some(text),
                        Some("version") => index.versions.push(text),
                        _ => {}
                    }
                }
                Event::Eof => break,
                _ => {}
            }
        }

        Ok(index)
    }

    /// Newest version: `<release>`, else `<latest>`, else the highest listed
    pub fn newest(&self) -> Option<&str> {
        self.release
            .as_deref()
            .or(self.latest.as_deref())
            .or_else(|| self.versions.iter().max_by(|a, b| compare_versions(a, b)).map(String::as_str))
    }
}

/// Compare versions segment by segment, numerically where both sides are numbers
pub fn compare_versions(a: &str, b: &str) -> Ordering {
    let left: Vec<&str> = a.split(['.', '-', '_']).collect();
    let right: Vec<&str> = b.split(['.', '-', '_']).collect();

    for i in 0..left.len().max(right.len()) {
        let ordering = match (left.get(i), right.get(i)) {
            (Some(l), Some(r)) => match (l.parse::<u64>(), r.parse::<u64>()) {
                (Ok(l), Ok(r)) => l.cmp(&r),
                (Ok(_), Err(_)) => Ordering::Greater,
                (Err(_), Ok(_)) => Ordering::Less,
                (Err(_), Err(_)) => l.cmp(r),
            },
            // 1.0 < 1.0.1, but 1.0-alpha < 1.0
            (Some(l), None) => {
                if l.parse::<u64>().is_ok() {
                    Ordering::Greater
                } else {
                    Ordering::Less
                }
            }
            (None, Some(r)) => {
                if r.parse::<u64>().is_ok() {
                    Ordering::Less
                } else {
                    Ordering::Greater
                }
            }
            (None, None) => Ordering::Equal,
        };
        if ordering != Ordering::Equal {
            return ordering;
        }
    }
    Ordering::Equal
}
