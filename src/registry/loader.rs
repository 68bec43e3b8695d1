//! Event list file formats.

use crate::error::{AsebaError, Result};
use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;
use serde::Deserialize;
use std::path::Path;

/// Something that can read an ordered list of event names from a file.
pub trait EventListLoader {
    /// Parse event names, in document order, from the file's text.
    fn parse(&self, text: &str) -> std::result::Result<Vec<String>, String>;

    /// Read and parse the file at `path`.
    fn load(&self, path: &Path) -> Result<Vec<String>> {
        let text = std::fs::read_to_string(path).map_err(|e| AsebaError::RegistryLoad {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;
        self.parse(&text).map_err(|reason| AsebaError::RegistryLoad {
            path: path.to_path_buf(),
            reason,
        })
    }
}

/// Supported event list formats.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EventListFormat {
    /// Aseba Studio project file: `<event name="..."/>` children of the root.
    Aesl,
    /// JSON array of `{"name": "..."}` records.
    Json,
}

impl EventListFormat {
    /// Pick the format from a file extension. Anything but `.json` is XML.
    pub fn from_path(path: &Path) -> Self {
        match path.extension().and_then(|ext| ext.to_str()) {
            Some(ext) if ext.eq_ignore_ascii_case("json") => EventListFormat::Json,
            _ => EventListFormat::Aesl,
        }
    }

    pub fn loader(self) -> Box<dyn EventListLoader> {
        match self {
            EventListFormat::Aesl => Box::new(AeslLoader),
            EventListFormat::Json => Box::new(JsonLoader),
        }
    }
}

/// Reads `<event>` elements that are direct children of the document root.
#[derive(Clone, Copy, Debug, Default)]
pub struct AeslLoader;

impl AeslLoader {
    fn event_name(element: &BytesStart<'_>) -> std::result::Result<String, String> {
        let attr = element
            .try_get_attribute("name")
            .map_err(|e| e.to_string())?
            .ok_or_else(|| "event element without a name attribute".to_string())?;
        let value = attr.unescape_value().map_err(|e| e.to_string())?;
        Ok(value.into_owned())
    }
}

impl EventListLoader for AeslLoader {
    fn parse(&self, text: &str) -> std::result::Result<Vec<String>, String> {
        let mut reader = Reader::from_str(text);
        reader.trim_text(true);

        let mut names = Vec::new();
        let mut depth = 0usize;
        let mut saw_root = false;

        loop {
            match reader.read_event() {
                Ok(Event::Start(element)) => {
                    if depth == 1 && element.name().as_ref() == b"event" {
                        names.push(Self::event_name(&element)?);
                    }
                    saw_root = true;
                    depth += 1;
                }
                Ok(Event::Empty(element)) => {
                    if depth == 1 && element.name().as_ref() == b"event" {
                        names.push(Self::event_name(&element)?);
                    }
                    saw_root = true;
                }
                Ok(Event::End(_)) => depth = depth.saturating_sub(1),
                Ok(Event::Eof) => break,
                Ok(_) => {}
                Err(e) => {
                    return Err(format!("at byte {}: {}", reader.buffer_position(), e));
                }
            }
        }

        if !saw_root {
            return Err("document has no root element".to_string());
        }
        if depth != 0 {
            return Err("unexpected end of document".to_string());
        }
        Ok(names)
    }
}

#[derive(Deserialize)]
struct EventRecord {
    name: String,
}

/// Reads a JSON array of `{"name": ...}` records.
#[derive(Clone, Copy, Debug, Default)]
pub struct JsonLoader;

impl EventListLoader for JsonLoader {
    fn parse(&self, text: &str) -> std::result::Result<Vec<String>, String> {
        let records: Vec<EventRecord> = serde_json::from_str(text).map_err(|e| e.to_string())?;
        Ok(records.into_iter().map(|record| record.name).collect())
    }
}
