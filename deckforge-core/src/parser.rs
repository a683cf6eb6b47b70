//! Template Parser - PPTX Package to Template Model
//!
//! Slides are read in presentation order, shapes in shape-tree order.
//! Ids are positional, so two parses of the same file agree on every
//! slide and element id and differ only in `template_id`.

use chrono::Utc;
use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;
use std::fs::File;
use std::io::{BufReader, Read, Seek};
use std::path::{Path, PathBuf};
use thiserror::Error;
use uuid::Uuid;
use zip::ZipArchive;

use crate::ooxml::{
    self, attr, attr_extent, attr_offset, attr_slide_size, is_editable_placeholder, rel_id_attr,
    shape_kind, xml_error, ShapeKind, PRESENTATION_PART, PRESENTATION_RELS,
};
use crate::style::{from_ooxml_color, from_ooxml_flag, from_ooxml_size, TextStyle};
use crate::templates::{
    element_id_for, slide_id_for, Element, ElementType, Frame, Slide, SlideType, Template,
    DEFAULT_SLIDE_HEIGHT, DEFAULT_SLIDE_WIDTH,
};

#[derive(Debug, Error)]
pub enum ParseError {
    #[error("Cannot read template file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Unreadable package container: {0}")]
    Container(String),

    #[error("Package is missing required part {0}")]
    MissingPart(String),

    #[error("Corrupt XML in {part}: {message}")]
    Xml { part: String, message: String },

    #[error("Broken relationship {rel_id} in {part}")]
    BrokenRelationship { part: String, rel_id: String },

    #[error("Presentation has no slides")]
    NoSlides,
}

/// Generate a fresh template id (`template_<32 hex>`).
pub fn new_template_id() -> String {
    format!("template_{}", Uuid::new_v4().simple())
}

pub struct TemplateParser {
    path: PathBuf,
    name: Option<String>,
    template_id: Option<String>,
}

impl TemplateParser {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into(), name: None, template_id: None }
    }

    /// Display name; defaults to the file stem.
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Reuse a known id instead of minting one (restoring stored uploads).
    pub fn with_template_id(mut self, template_id: impl Into<String>) -> Self {
        self.template_id = Some(template_id.into());
        self
    }

    pub fn parse(&self) -> Result<Template, ParseError> {
        let file = File::open(&self.path)?;
        let mut archive = ZipArchive::new(BufReader::new(file))
            .map_err(|e| ParseError::Container(e.to_string()))?;

        let (slide_width, slide_height, slide_parts) = read_presentation(&mut archive)?;
        if slide_parts.is_empty() {
            return Err(ParseError::NoSlides);
        }

        let mut slides = Vec::with_capacity(slide_parts.len());
        for (index, part_name) in slide_parts.into_iter().enumerate() {
            slides.push(parse_slide(&mut archive, index, part_name)?);
        }

        let template = Template {
            template_id: self.template_id.clone().unwrap_or_else(new_template_id),
            name: self.name.clone().unwrap_or_else(|| file_stem(&self.path)),
            slide_width,
            slide_height,
            created_at: Utc::now(),
            source_path: self.path.clone(),
            slides,
        };

        tracing::debug!(
            template_id = %template.template_id,
            slides = template.slides.len(),
            "Template parsed"
        );
        Ok(template)
    }
}

fn file_stem(path: &Path) -> String {
    path.file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default()
}

/// Slide size and slide part names in presentation order.
fn read_presentation<R: Read + Seek>(
    archive: &mut ZipArchive<R>,
) -> Result<(i64, i64, Vec<String>), ParseError> {
    let xml = ooxml::require_part(archive, PRESENTATION_PART)?;
    let rels_xml = ooxml::require_part(archive, PRESENTATION_RELS)?;
    let rels = ooxml::parse_relationships(&rels_xml, PRESENTATION_RELS)?;
    let targets = ooxml::relationship_map(&rels);

    let mut reader = Reader::from_str(&xml);
    reader.config_mut().trim_text(true);

    let mut width = DEFAULT_SLIDE_WIDTH;
    let mut height = DEFAULT_SLIDE_HEIGHT;
    let mut parts = Vec::new();

    loop {
        match reader.read_event() {
            Ok(Event::Start(e)) | Ok(Event::Empty(e)) => match e.local_name().as_ref() {
                b"sldSz" => {
                    width = attr_slide_size(&e, b"cx").unwrap_or(width);
                    height = attr_slide_size(&e, b"cy").unwrap_or(height);
                }
                b"sldId" => {
                    let rel_id = rel_id_attr(&e).ok_or_else(|| {
                        xml_error(PRESENTATION_PART, "sldId without relationship id")
                    })?;
                    let target = targets.get(rel_id.as_str()).ok_or_else(|| {
                        ParseError::BrokenRelationship {
                            part: PRESENTATION_PART.to_string(),
                            rel_id: rel_id.clone(),
                        }
                    })?;
                    parts.push(ooxml::resolve_target(PRESENTATION_PART, target));
                }
                _ => {}
            },
            Ok(Event::Eof) => break,
            Err(e) => return Err(xml_error(PRESENTATION_PART, e)),
            _ => {}
        }
    }

    Ok((width, height, parts))
}

fn parse_slide<R: Read + Seek>(
    archive: &mut ZipArchive<R>,
    index: usize,
    part_name: String,
) -> Result<Slide, ParseError> {
    let xml = ooxml::require_part(archive, &part_name)?;
    let elements = parse_shapes(&xml, &part_name)?;

    let layout_type = read_layout_type(archive, &part_name).unwrap_or_else(|e| {
        tracing::debug!(part = %part_name, error = %e, "Slide layout unreadable, inferring type");
        None
    });
    let slide_type = layout_type
        .as_deref()
        .and_then(slide_type_from_layout)
        .unwrap_or_else(|| infer_slide_type(&elements));

    Ok(Slide {
        slide_id: slide_id_for(index),
        slide_type,
        part_name,
        elements,
    })
}

fn read_layout_type<R: Read + Seek>(
    archive: &mut ZipArchive<R>,
    slide_part: &str,
) -> Result<Option<String>, ParseError> {
    let rels_part = ooxml::rels_part_for(slide_part);
    let rels_xml = match ooxml::read_part(archive, &rels_part)? {
        Some(xml) => xml,
        None => return Ok(None),
    };
    let rels = ooxml::parse_relationships(&rels_xml, &rels_part)?;
    let layout_part = match rels.iter().find(|r| r.is_slide_layout()) {
        Some(rel) => ooxml::resolve_target(slide_part, &rel.target),
        None => return Ok(None),
    };
    let layout_xml = match ooxml::read_part(archive, &layout_part)? {
        Some(xml) => xml,
        None => return Ok(None),
    };

    let mut reader = Reader::from_str(&layout_xml);
    loop {
        match reader.read_event() {
            Ok(Event::Start(e)) | Ok(Event::Empty(e)) if e.local_name().as_ref() == b"sldLayout" => {
                return Ok(attr(&e, b"type"));
            }
            Ok(Event::Eof) => return Ok(None),
            Err(e) => return Err(xml_error(&layout_part, e)),
            _ => {}
        }
    }
}

fn slide_type_from_layout(layout_type: &str) -> Option<SlideType> {
    match layout_type {
        "title" => Some(SlideType::Title),
        "secHead" => Some(SlideType::SectionHeader),
        "titleOnly" => Some(SlideType::TitleOnly),
        "blank" => Some(SlideType::Blank),
        "obj" | "tx" | "twoObj" | "twoColTx" | "objTx" | "txAndObj" | "objAndTx" | "twoTxTwoObj"
        | "objOnly" | "txOverObj" | "objOverTx" | "picTx" => Some(SlideType::Content),
        // `cust` and unknown kinds carry no meaning on their own.
        _ => None,
    }
}

fn infer_slide_type(elements: &[Element]) -> SlideType {
    let kinds: Vec<&str> = elements
        .iter()
        .filter_map(|e| e.placeholder_type.as_deref())
        .collect();
    let has = |k: &str| kinds.contains(&k);

    if has("ctrTitle") {
        SlideType::Title
    } else if has("title") && (has("body") || has("obj")) {
        SlideType::Content
    } else if has("title") {
        SlideType::TitleOnly
    } else if kinds.is_empty() {
        SlideType::Blank
    } else {
        SlideType::Custom
    }
}

/// Parse the top-level shapes of one slide's shape tree.
pub(crate) fn parse_shapes(xml: &str, part: &str) -> Result<Vec<Element>, ParseError> {
    let mut reader = Reader::from_str(xml);

    let mut stack: Vec<Vec<u8>> = Vec::new();
    let mut tree_depth: Option<usize> = None;
    let mut current: Option<ShapeScan> = None;
    let mut elements = Vec::new();

    loop {
        match reader.read_event() {
            Ok(Event::Start(e)) => {
                let local = e.local_name().as_ref().to_vec();
                let parent = stack.last().cloned();
                stack.push(local.clone());
                let depth = stack.len();

                match current.as_mut() {
                    Some(scan) => scan.on_open(&e, parent.as_deref(), false),
                    None => {
                        if tree_depth.is_none() && local == b"spTree" {
                            tree_depth = Some(depth);
                        } else if tree_depth.map_or(false, |d| depth == d + 1) {
                            if let Some(kind) = shape_kind(&local) {
                                current = Some(ShapeScan::new(kind, depth));
                            }
                        }
                    }
                }
            }
            Ok(Event::Empty(e)) => {
                let parent = stack.last().cloned();
                match current.as_mut() {
                    Some(scan) => scan.on_open(&e, parent.as_deref(), true),
                    None => {
                        let top_level = tree_depth.map_or(false, |d| stack.len() == d);
                        if let (true, Some(kind)) = (top_level, shape_kind(e.local_name().as_ref())) {
                            let ordinal = elements.len() + 1;
                            elements.push(ShapeScan::new(kind, 0).finish(ordinal));
                        }
                    }
                }
            }
            Ok(Event::Text(t)) => {
                if let Some(scan) = current.as_mut() {
                    if scan.in_text {
                        let text = t.unescape().map_err(|e| xml_error(part, e))?;
                        scan.paragraph.push_str(&text);
                    }
                }
            }
            Ok(Event::End(e)) => {
                let depth = stack.len();
                if let Some(scan) = current.as_mut() {
                    if depth == scan.depth {
                        let ordinal = elements.len() + 1;
                        if let Some(scan) = current.take() {
                            elements.push(scan.finish(ordinal));
                        }
                    } else {
                        scan.on_close(e.local_name().as_ref());
                    }
                }
                stack.pop();
            }
            Ok(Event::Eof) => {
                if !stack.is_empty() {
                    return Err(xml_error(part, "unexpected end of document"));
                }
                break;
            }
            Err(e) => return Err(xml_error(part, e)),
            _ => {}
        }
    }

    if tree_depth.is_none() {
        return Err(xml_error(part, "slide has no shape tree"));
    }
    Ok(elements)
}

/// Accumulates one shape while its subtree streams by.
struct ShapeScan {
    kind: ShapeKind,
    depth: usize,
    name: String,
    placeholder: Option<String>,
    in_body: bool,
    in_text: bool,
    paragraph: String,
    paragraphs: Vec<String>,
    run_style: Option<TextStyle>,
    end_style: Option<TextStyle>,
    /// Which run-properties element is open: `true` for `rPr`.
    open_props: Option<bool>,
    offset: Option<(i64, i64)>,
    extent: Option<(i64, i64)>,
}

impl ShapeScan {
    fn new(kind: ShapeKind, depth: usize) -> Self {
        Self {
            kind,
            depth,
            name: String::new(),
            placeholder: None,
            in_body: false,
            in_text: false,
            paragraph: String::new(),
            paragraphs: Vec::new(),
            run_style: None,
            end_style: None,
            open_props: None,
            offset: None,
            extent: None,
        }
    }

    fn on_open(&mut self, e: &BytesStart, parent: Option<&[u8]>, empty: bool) {
        match e.local_name().as_ref() {
            b"cNvPr" if self.name.is_empty() => {
                self.name = attr(e, b"name").unwrap_or_default();
            }
            b"ph" => {
                self.placeholder = Some(attr(e, b"type").unwrap_or_else(|| "body".to_string()));
            }
            b"txBody" if !empty => self.in_body = true,
            b"p" if self.in_body => {
                self.paragraph.clear();
                if empty {
                    self.paragraphs.push(String::new());
                }
            }
            b"t" if self.in_body && !empty => self.in_text = true,
            b"br" if self.in_body => self.paragraph.push('\n'),
            b"rPr" if self.in_body && self.run_style.is_none() => {
                self.run_style = Some(run_properties(e));
                if !empty {
                    self.open_props = Some(true);
                }
            }
            b"endParaRPr" if self.in_body && self.end_style.is_none() => {
                self.end_style = Some(run_properties(e));
                if !empty {
                    self.open_props = Some(false);
                }
            }
            b"srgbClr" => {
                let target = match self.open_props {
                    Some(true) => self.run_style.as_mut(),
                    Some(false) => self.end_style.as_mut(),
                    None => None,
                };
                if let Some(style) = target {
                    if style.color.is_none() {
                        style.color = attr(e, b"val").as_deref().and_then(from_ooxml_color);
                    }
                }
            }
            b"off" if parent == Some(b"xfrm".as_slice()) && self.offset.is_none() => {
                self.offset = Some((attr_offset(e, b"x"), attr_offset(e, b"y")));
            }
            b"ext" if parent == Some(b"xfrm".as_slice()) && self.extent.is_none() => {
                self.extent = Some((attr_extent(e, b"cx"), attr_extent(e, b"cy")));
            }
            _ => {}
        }
    }

    fn on_close(&mut self, local: &[u8]) {
        match local {
            b"t" => self.in_text = false,
            b"p" if self.in_body => self.paragraphs.push(std::mem::take(&mut self.paragraph)),
            b"txBody" => self.in_body = false,
            b"rPr" | b"endParaRPr" => self.open_props = None,
            _ => {}
        }
    }

    fn finish(self, ordinal: usize) -> Element {
        let editable = self.kind == ShapeKind::Shape
            && self.placeholder.as_deref().map_or(false, is_editable_placeholder);
        let element_type = match self.kind {
            ShapeKind::Shape if self.placeholder.is_some() => ElementType::Placeholder,
            ShapeKind::Shape if self.paragraphs.is_empty() => ElementType::AutoShape,
            ShapeKind::Shape => ElementType::TextBox,
            ShapeKind::Picture => ElementType::Picture,
            ShapeKind::GraphicFrame => ElementType::GraphicFrame,
            ShapeKind::Group => ElementType::Group,
            ShapeKind::Connector => ElementType::Connector,
        };
        let frame = match (self.offset, self.extent) {
            (Some((x, y)), Some((cx, cy))) => Some(Frame { x, y, cx, cy }),
            _ => None,
        };
        Element {
            element_id: element_id_for(ordinal),
            element_type,
            is_placeholder: editable,
            placeholder_type: self.placeholder,
            name: self.name,
            content: self.paragraphs.join("\n"),
            style: self.run_style.or(self.end_style).unwrap_or_default(),
            frame,
        }
    }
}

fn run_properties(e: &BytesStart) -> TextStyle {
    TextStyle {
        size: attr(e, b"sz").as_deref().and_then(from_ooxml_size),
        color: None,
        bold: attr(e, b"b").as_deref().and_then(from_ooxml_flag),
        italic: attr(e, b"i").as_deref().and_then(from_ooxml_flag),
    }
}
