//! Shared PresentationML package helpers.
//!
//! Both the parser and the artifact writer walk the same shape tree, so
//! the shape-tag table and relationship resolution live here.

use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;
use std::collections::HashMap;
use std::io::{Read, Seek};
use zip::ZipArchive;

use crate::parser::ParseError;

pub const PRESENTATION_PART: &str = "ppt/presentation.xml";
pub const PRESENTATION_RELS: &str = "ppt/_rels/presentation.xml.rels";

const REL_SLIDE_LAYOUT: &str = "/slideLayout";

/// Top-level shape kinds inside `p:spTree`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShapeKind {
    Shape,
    Picture,
    GraphicFrame,
    Group,
    Connector,
}

pub fn shape_kind(local_name: &[u8]) -> Option<ShapeKind> {
    match local_name {
        b"sp" => Some(ShapeKind::Shape),
        b"pic" => Some(ShapeKind::Picture),
        b"graphicFrame" => Some(ShapeKind::GraphicFrame),
        b"grpSp" => Some(ShapeKind::Group),
        b"cxnSp" => Some(ShapeKind::Connector),
        _ => None,
    }
}

/// Placeholder kinds that never take generated text.
const STATIC_PLACEHOLDERS: &[&str] = &["dt", "ftr", "sldNum", "hdr"];
const NON_TEXT_PLACEHOLDERS: &[&str] = &["pic", "chart", "tbl", "clipArt", "dgm", "media"];

pub fn is_editable_placeholder(ph_type: &str) -> bool {
    !STATIC_PLACEHOLDERS.contains(&ph_type) && !NON_TEXT_PLACEHOLDERS.contains(&ph_type)
}

#[derive(Debug, Clone)]
pub struct Relationship {
    pub id: String,
    pub rel_type: String,
    pub target: String,
}

impl Relationship {
    pub fn is_slide_layout(&self) -> bool {
        self.rel_type.ends_with(REL_SLIDE_LAYOUT)
    }
}

/// Read a part as UTF-8, `None` if the package lacks it.
pub fn read_part<R: Read + Seek>(
    archive: &mut ZipArchive<R>,
    name: &str,
) -> Result<Option<String>, ParseError> {
    let mut file = match archive.by_name(name) {
        Ok(file) => file,
        Err(zip::result::ZipError::FileNotFound) => return Ok(None),
        Err(e) => return Err(ParseError::Container(e.to_string())),
    };
    let mut xml = String::new();
    file.read_to_string(&mut xml).map_err(|e| ParseError::Xml {
        part: name.to_string(),
        message: e.to_string(),
    })?;
    Ok(Some(xml))
}

pub fn require_part<R: Read + Seek>(
    archive: &mut ZipArchive<R>,
    name: &str,
) -> Result<String, ParseError> {
    read_part(archive, name)?.ok_or_else(|| ParseError::MissingPart(name.to_string()))
}

/// `ppt/slides/slide1.xml` -> `ppt/slides/_rels/slide1.xml.rels`
pub fn rels_part_for(part: &str) -> String {
    match part.rsplit_once('/') {
        Some((dir, file)) => format!("{}/_rels/{}.rels", dir, file),
        None => format!("_rels/{}.rels", part),
    }
}

/// Resolve a relationship target against the directory of `source_part`.
pub fn resolve_target(source_part: &str, target: &str) -> String {
    if let Some(absolute) = target.strip_prefix('/') {
        return absolute.to_string();
    }
    let mut segments: Vec<&str> = match source_part.rsplit_once('/') {
        Some((dir, _)) => dir.split('/').collect(),
        None => Vec::new(),
    };
    for segment in target.split('/') {
        match segment {
            "." | "" => {}
            ".." => {
                segments.pop();
            }
            other => segments.push(other),
        }
    }
    segments.join("/")
}

pub fn parse_relationships(xml: &str, part: &str) -> Result<Vec<Relationship>, ParseError> {
    let mut reader = Reader::from_str(xml);
    reader.config_mut().trim_text(true);

    let mut rels = Vec::new();
    loop {
        match reader.read_event() {
            Ok(Event::Start(e)) | Ok(Event::Empty(e)) => {
                if e.local_name().as_ref() == b"Relationship" {
                    let id = attr(&e, b"Id");
                    let target = attr(&e, b"Target");
                    if let (Some(id), Some(target)) = (id, target) {
                        rels.push(Relationship {
                            id,
                            rel_type: attr(&e, b"Type").unwrap_or_default(),
                            target,
                        });
                    }
                }
            }
            Ok(Event::Eof) => break,
            Err(e) => return Err(xml_error(part, e)),
            _ => {}
        }
    }
    Ok(rels)
}

pub fn relationship_map(rels: &[Relationship]) -> HashMap<&str, &str> {
    rels.iter().map(|r| (r.id.as_str(), r.target.as_str())).collect()
}

/// Attribute by exact qualified key, unescaped.
pub fn attr(e: &BytesStart, key: &[u8]) -> Option<String> {
    e.attributes()
        .flatten()
        .find(|a| a.key.as_ref() == key)
        .and_then(|a| a.unescape_value().ok().map(|v| v.into_owned()))
}

/// The relationship-id attribute (`r:id`) regardless of the prefix in use.
pub fn rel_id_attr(e: &BytesStart) -> Option<String> {
    e.attributes()
        .flatten()
        .find(|a| a.key.prefix().is_some() && a.key.local_name().as_ref() == b"id")
        .and_then(|a| a.unescape_value().ok().map(|v| v.into_owned()))
}

pub fn attr_i64(e: &BytesStart, key: &[u8]) -> Option<i64> {
    attr(e, key).and_then(|v| v.parse().ok())
}

/// Bound of `ST_Coordinate`; offsets outside it are not valid DrawingML.
pub const MAX_COORDINATE: i64 = 27_273_042_316_900;
/// `ST_SlideSizeCoordinate` range for `p:sldSz`.
pub const MIN_SLIDE_SIZE: i64 = 914_400;
pub const MAX_SLIDE_SIZE: i64 = 51_206_400;

/// Shape offset, held to the coordinate range.
pub fn attr_offset(e: &BytesStart, key: &[u8]) -> i64 {
    attr_i64(e, key).unwrap_or(0).clamp(-MAX_COORDINATE, MAX_COORDINATE)
}

/// Shape extent; negative sizes read as empty.
pub fn attr_extent(e: &BytesStart, key: &[u8]) -> i64 {
    attr_i64(e, key).unwrap_or(0).clamp(0, MAX_COORDINATE)
}

pub fn attr_slide_size(e: &BytesStart, key: &[u8]) -> Option<i64> {
    attr_i64(e, key).map(|v| v.clamp(MIN_SLIDE_SIZE, MAX_SLIDE_SIZE))
}

pub fn xml_error(part: &str, e: impl std::fmt::Display) -> ParseError {
    ParseError::Xml {
        part: part.to_string(),
        message: e.to_string(),
    }
}
