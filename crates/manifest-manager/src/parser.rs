//! AndroidManifest.xml Parser
//!
//! Reads a manifest into a [`Document`] without dropping comments or
//! whitespace, so that an unchanged document writes back byte for byte.

use std::path::Path;

use quick_xml::events::{BytesDecl, BytesStart, Event};
use quick_xml::Reader;
use tracing::debug;

use crate::document::{Declaration, Document, Element, Node};
use crate::ManifestError;

/// Manifest parser
pub struct ManifestParser;

impl ManifestParser {
    /// Parse a manifest file from path
    pub async fn parse_file(path: impl AsRef<Path>) -> Result<Document, ManifestError> {
        let content = tokio::fs::read_to_string(path.as_ref()).await?;
        debug!("Parsing manifest {:?}", path.as_ref());
        Self::parse_string(&content)
    }

    /// Parse a manifest from a string
    pub fn parse_string(xml: &str) -> Result<Document, ManifestError> {
        let xml = xml.trim_start_matches('\u{feff}');
        let mut reader = Reader::from_str(xml);
        reader.trim_text(false);

        let mut declaration = None;
        let mut prolog = Vec::new();
        let mut epilog = Vec::new();
        let mut root: Option<Element> = None;
        let mut stack: Vec<Element> = Vec::new();

        loop {
            let node = match reader.read_event()? {
                Event::Decl(ref d) => {
                    declaration = Some(Self::parse_declaration(d)?);
                    continue;
                }
                Event::Start(ref e) => {
                    stack.push(Self::parse_element(e)?);
                    continue;
                }
                Event::Empty(ref e) => Node::Element(Self::parse_element(e)?),
                Event::End(_) => {
                    let element = stack.pop().ok_or_else(|| {
                        ManifestError::InvalidStructure("unexpected closing tag".into())
                    })?;
                    Node::Element(element)
                }
                Event::Text(e) => Node::Text(utf8(&e)?),
                Event::CData(e) => Node::CData(utf8(&e)?),
                Event::Comment(e) => Node::Comment(utf8(&e)?),
                Event::PI(e) => Node::ProcessingInstruction(utf8(&e)?),
                Event::DocType(e) => Node::DocType(utf8(&e)?),
                Event::Eof => break,
            };

            if let Some(parent) = stack.last_mut() {
                parent.children.push(node);
                continue;
            }

            match node {
                Node::Element(element) => {
                    if root.is_some() {
                        return Err(ManifestError::InvalidStructure(format!(
                            "multiple root elements (found <{}>)",
                            element.name
                        )));
                    }
                    root = Some(element);
                }
                other if root.is_none() => prolog.push(other),
                other => epilog.push(other),
            }
        }

        if let Some(open) = stack.last() {
            return Err(ManifestError::InvalidStructure(format!(
                "unclosed element <{}>",
                open.name
            )));
        }

        let root = root.ok_or_else(|| ManifestError::InvalidStructure("no root element".into()))?;

        Ok(Document {
            declaration,
            prolog,
            root,
            epilog,
        })
    }

    fn parse_element(e: &BytesStart) -> Result<Element, ManifestError> {
        let mut element = Element::new(utf8(e.name().as_ref())?);
        for attr in e.attributes() {
            let attr = attr.map_err(quick_xml::Error::from)?;
            let key = utf8(attr.key.as_ref())?;
            let value = attr.unescape_value()?.into_owned();
            element.attributes.insert(key, value);
        }
        Ok(element)
    }

    fn parse_declaration(d: &BytesDecl) -> Result<Declaration, ManifestError> {
        let version = utf8(&d.version()?)?;
        let encoding = match d.encoding() {
            Some(encoding) => Some(utf8(&encoding?)?),
            None => None,
        };
        let standalone = match d.standalone() {
            Some(standalone) => Some(utf8(&standalone?)?),
            None => None,
        };
        Ok(Declaration {
            version,
            encoding,
            standalone,
        })
    }
}

fn utf8(bytes: &[u8]) -> Result<String, ManifestError> {
    Ok(std::str::from_utf8(bytes)?.to_string())
}
