//! Manifest Writer
//!
//! Serializes a [`Document`] back to XML. Whitespace is taken from the tree
//! as-is, so the writer itself never indents.

use std::path::Path;

use quick_xml::events::{BytesCData, BytesDecl, BytesEnd, BytesStart, BytesText, Event};
use quick_xml::Writer;
use tracing::info;

use crate::document::{Document, Element, Node};
use crate::ManifestError;

/// Manifest writer
pub struct ManifestWriter;

impl ManifestWriter {
    /// Write a document to a string
    pub fn write_to_string(document: &Document) -> Result<String, ManifestError> {
        let mut writer = Writer::new(Vec::new());

        if let Some(decl) = &document.declaration {
            writer.write_event(Event::Decl(BytesDecl::new(
                &decl.version,
                decl.encoding.as_deref(),
                decl.standalone.as_deref(),
            )))?;
        }
        for node in &document.prolog {
            Self::write_node(&mut writer, node)?;
        }
        Self::write_element(&mut writer, &document.root)?;
        for node in &document.epilog {
            Self::write_node(&mut writer, node)?;
        }

        Ok(String::from_utf8(writer.into_inner())?)
    }

    /// Write a document to a file, replacing it atomically
    pub async fn write_file(document: &Document, path: &Path) -> Result<(), ManifestError> {
        let content = Self::write_to_string(document)?;

        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await?;
        }

        let file_name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "AndroidManifest.xml".to_string());
        let temp = path.with_file_name(format!(".{}.tmp", file_name));

        tokio::fs::write(&temp, content.as_bytes()).await?;
        if let Err(e) = tokio::fs::rename(&temp, path).await {
            let _ = tokio::fs::remove_file(&temp).await;
            return Err(e.into());
        }

        info!("Wrote manifest to {:?}", path);
        Ok(())
    }

    fn write_node(writer: &mut Writer<Vec<u8>>, node: &Node) -> Result<(), ManifestError> {
        match node {
            Node::Element(element) => Self::write_element(writer, element)?,
            Node::Text(text) => writer.write_event(Event::Text(BytesText::from_escaped(text.as_str())))?,
            Node::Comment(text) => {
                writer.write_event(Event::Comment(BytesText::from_escaped(text.as_str())))?
            }
            Node::CData(text) => writer.write_event(Event::CData(BytesCData::new(text.as_str())))?,
            Node::ProcessingInstruction(text) => {
                writer.write_event(Event::PI(BytesText::from_escaped(text.as_str())))?
            }
            Node::DocType(text) => {
                writer.write_event(Event::DocType(BytesText::from_escaped(text.as_str())))?
            }
        }
        Ok(())
    }

    fn write_element(writer: &mut Writer<Vec<u8>>, element: &Element) -> Result<(), ManifestError> {
        let mut start = BytesStart::new(element.name.as_str());
        for (key, value) in &element.attributes {
            start.push_attribute((key.as_str(), value.as_str()));
        }

        if element.children.is_empty() {
            writer.write_event(Event::Empty(start))?;
            return Ok(());
        }

        writer.write_event(Event::Start(start))?;
        for child in &element.children {
            Self::write_node(writer, child)?;
        }
        writer.write_event(Event::End(BytesEnd::new(element.name.as_str())))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::ManifestParser;
    use tempfile::TempDir;

    #[test]
    fn test_unchanged_document_round_trips() {
        let xml = "<?xml version=\"1.0\" encoding=\"utf-8\"?>\n\
                   <!-- keep me -->\n\
                   <manifest package=\"com.example\">\n    \
                   <application android:label=\"A &amp; B\"/>\n\
                   </manifest>\n";
        let doc = ManifestParser::parse_string(xml).unwrap();
        assert_eq!(ManifestWriter::write_to_string(&doc).unwrap(), xml);
    }

    #[test]
    fn test_empty_element_written_self_closing() {
        let doc = Document::new(Element::new("manifest").with_attr("package", "com.example"));
        let out = ManifestWriter::write_to_string(&doc).unwrap();
        assert!(out.contains("<manifest package=\"com.example\"/>"));
        assert!(out.starts_with("<?xml version=\"1.0\" encoding=\"utf-8\"?>"));
    }

    #[tokio::test]
    async fn test_write_file_leaves_no_temp_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("out").join("AndroidManifest.xml");
        let doc = Document::new(Element::new("manifest"));

        ManifestWriter::write_file(&doc, &path).await.unwrap();

        assert!(path.exists());
        let entries: Vec<_> = std::fs::read_dir(path.parent().unwrap())
            .unwrap()
            .filter_map(|e| e.ok())
            .collect();
        assert_eq!(entries.len(), 1);
    }
}
