//! Minimal extraction of records from XML listings (WebDAV multistatus,
//! Azure List Blobs)

use anyhow::{Context, Result};
use quick_xml::events::Event;
use quick_xml::Reader;
use std::collections::HashMap;

/// Collect one map per `record` element holding the text of the wanted fields
///
/// Element names are compared without namespace prefix. Fields may be nested
/// at any depth below the record; an empty element yields an empty string.
pub fn collect_records(xml: &str, record: &str, fields: &[&str]) -> Result<Vec<HashMap<String, String>>> {
    let mut reader = Reader::from_str(xml);
    reader.trim_text(true);

    let mut records = Vec::new();
    let mut current: Option<HashMap<String, String>> = None;
    let mut field: Option<String> = None;

    loop {
        match reader.read_event().context("Failed to parse XML response")? {
            Event::Start(element) => {
                let name = local_name(element.local_name().as_ref());
                if name == record {
                    current = Some(HashMap::new());
                } else if current.is_some() && fields.contains(&name.as_str()) {
                    field = Some(name);
                }
            }
            Event::Empty(element) => {
                let name = local_name(element.local_name().as_ref());
                if let Some(ref mut values) = current {
                    if fields.contains(&name.as_str()) {
                        values.entry(name).or_default();
                    }
                }
            }
            Event::Text(text) => {
                if let (Some(values), Some(name)) = (&mut current, &field) {
                    let text = text.unescape().context("Invalid XML text")?;
                    values.entry(name.clone()).or_default().push_str(&text);
                }
            }
            Event::CData(data) => {
                if let (Some(values), Some(name)) = (&mut current, &field) {
                    let text = String::from_utf8_lossy(&data.into_inner()).to_string();
                    values.entry(name.clone()).or_default().push_str(&text);
                }
            }
            Event::End(element) => {
                let name = local_name(element.local_name().as_ref());
                if name == record {
                    if let Some(values) = current.take() {
                        records.push(values);
                    }
                } else if field.as_deref() == Some(name.as_str()) {
                    if let Some(ref mut values) = current {
                        values.entry(name).or_default();
                    }
                    field = None;
                }
            }
            Event::Eof => break,
            _ => {}
        }
    }

    Ok(records)
}

fn local_name(raw: &[u8]) -> String {
    String::from_utf8_lossy(raw).to_string()
}
