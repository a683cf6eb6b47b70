//! Artifact Writer - Template Package Plus Mappings to a New Deck
//!
//! Only the text bodies of mapped shapes are rewritten. Every other part
//! of the source package is copied without recompression, and the
//! rewritten slides keep all markup outside the replaced paragraphs.

use quick_xml::escape::escape;
use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;
use std::borrow::Cow;
use std::collections::{HashMap, HashSet};
use std::fmt::Write as _;
use std::fs::{self, File};
use std::io::{BufReader, Read, Write};
use std::path::{Path, PathBuf};
use thiserror::Error;
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipArchive, ZipWriter};

use crate::mapping::ContentMapping;
use crate::ooxml::{shape_kind, ShapeKind};
use crate::style::TextStyle;
use crate::templates::{Element, Template};

#[derive(Debug, Error)]
pub enum WriteError {
    #[error("I/O error writing artifact: {0}")]
    Io(#[from] std::io::Error),

    #[error("Package error: {0}")]
    Package(#[from] zip::result::ZipError),

    #[error("Cannot rewrite {part}: {message}")]
    Xml { part: String, message: String },
}

/// Text fill kinds replaced when an explicit color is written.
const FILL_KINDS: &[&[u8]] = &[b"solidFill", b"noFill", b"gradFill", b"blipFill", b"pattFill", b"grpFill"];

/// Serialize `working` (a template with mappings applied) to `dest`.
///
/// The package is assembled in a sibling temporary file and renamed into
/// place, so `dest` either holds a complete deck or does not exist.
pub fn write_artifact(working: &Template, mappings: &[ContentMapping], dest: &Path) -> Result<(), WriteError> {
    let edits = plan_edits(working, mappings);
    let temp = temp_path(dest);

    let result = assemble(&working.source_path, &edits, &temp);
    match result {
        Ok(()) => {
            fs::rename(&temp, dest)?;
            Ok(())
        }
        Err(e) => {
            let _ = fs::remove_file(&temp);
            Err(e)
        }
    }
}

fn temp_path(dest: &Path) -> PathBuf {
    let name = dest
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "artifact".to_string());
    dest.with_file_name(format!(".{}.tmp", name))
}

/// Slide part -> (shape ordinal -> edited element).
fn plan_edits<'t>(working: &'t Template, mappings: &[ContentMapping]) -> HashMap<&'t str, HashMap<usize, &'t Element>> {
    let targets: HashSet<(&str, &str)> = mappings.iter().map(|m| m.target()).collect();
    let mut edits: HashMap<&str, HashMap<usize, &Element>> = HashMap::new();
    for slide in &working.slides {
        for (position, element) in slide.elements.iter().enumerate() {
            if targets.contains(&(slide.slide_id.as_str(), element.element_id.as_str())) {
                edits
                    .entry(slide.part_name.as_str())
                    .or_default()
                    .insert(position + 1, element);
            }
        }
    }
    edits
}

fn assemble(
    source: &Path,
    edits: &HashMap<&str, HashMap<usize, &Element>>,
    temp: &Path,
) -> Result<(), WriteError> {
    let mut archive = ZipArchive::new(BufReader::new(File::open(source)?))?;
    let mut zip = ZipWriter::new(File::create(temp)?);
    let options = SimpleFileOptions::default().compression_method(CompressionMethod::Deflated);

    for index in 0..archive.len() {
        let name = archive.by_index_raw(index)?.name().to_string();
        match edits.get(name.as_str()) {
            Some(shape_edits) => {
                let mut xml = String::new();
                archive.by_index(index)?.read_to_string(&mut xml)?;
                let rewritten = rewrite_slide(&xml, &name, shape_edits)?;
                zip.start_file(name.as_str(), options)?;
                zip.write_all(rewritten.as_bytes())?;
            }
            None => zip.raw_copy_file(archive.by_index_raw(index)?)?,
        }
    }

    let file = zip.finish()?;
    file.sync_all()?;
    Ok(())
}

/// Rewrite the text bodies of the shapes at `edits` ordinals.
pub(crate) fn rewrite_slide(xml: &str, part: &str, edits: &HashMap<usize, &Element>) -> Result<String, WriteError> {
    let mut reader = Reader::from_str(xml);
    let mut out = String::with_capacity(xml.len() + 512);

    let mut depth = 0usize;
    let mut tree_depth: Option<usize> = None;
    let mut ordinal = 0usize;
    let mut shape: Option<ShapeRewrite> = None;

    loop {
        let event = reader.read_event().map_err(|e| WriteError::Xml {
            part: part.to_string(),
            message: e.to_string(),
        })?;

        match &event {
            Event::Eof => break,
            Event::Start(e) => {
                depth += 1;
                if shape.is_none() {
                    let local = e.local_name();
                    if tree_depth.is_none() && local.as_ref() == b"spTree" {
                        tree_depth = Some(depth);
                    } else if tree_depth.map_or(false, |d| depth == d + 1) {
                        if let Some(kind) = shape_kind(local.as_ref()) {
                            ordinal += 1;
                            if let (ShapeKind::Shape, Some(element)) = (kind, edits.get(&ordinal)) {
                                shape = Some(ShapeRewrite::new(element, depth, prefix_of(e)));
                            }
                        }
                    }
                }
            }
            Event::Empty(e) => {
                let top_level = shape.is_none() && tree_depth == Some(depth);
                if top_level && shape_kind(e.local_name().as_ref()).is_some() {
                    ordinal += 1;
                }
            }
            _ => {}
        }

        let consumed = match shape.as_mut() {
            Some(rewrite) => rewrite.handle(&event, depth, &mut out),
            None => false,
        };
        if !consumed {
            push_event(&mut out, &event);
        }

        if let Event::End(_) = event {
            if shape.as_ref().map_or(false, |s| s.depth == depth) {
                shape = None;
            }
            depth = depth.saturating_sub(1);
        }
    }

    if depth != 0 {
        return Err(WriteError::Xml {
            part: part.to_string(),
            message: "unexpected end of document".to_string(),
        });
    }
    Ok(out)
}

fn raw(bytes: &[u8]) -> Cow<'_, str> {
    String::from_utf8_lossy(bytes)
}

fn prefix_of(e: &BytesStart) -> Option<String> {
    e.name().prefix().map(|p| raw(p.as_ref()).into_owned())
}

fn qualified(prefix: Option<&str>, local: &str) -> String {
    match prefix {
        Some(prefix) => format!("{}:{}", prefix, local),
        None => local.to_string(),
    }
}

/// Re-emit an event exactly as read.
fn push_event(out: &mut String, event: &Event) {
    match event {
        Event::Start(e) => {
            let _ = write!(out, "<{}>", raw(e));
        }
        Event::Empty(e) => {
            let _ = write!(out, "<{}/>", raw(e));
        }
        Event::End(e) => {
            let _ = write!(out, "</{}>", raw(e));
        }
        Event::Text(t) => out.push_str(&raw(t)),
        Event::CData(c) => {
            let _ = write!(out, "<![CDATA[{}]]>", raw(c));
        }
        Event::Comment(c) => {
            let _ = write!(out, "<!--{}-->", raw(c));
        }
        Event::Decl(d) => {
            let _ = write!(out, "<?{}?>", raw(d));
        }
        Event::PI(p) => {
            let _ = write!(out, "<?{}?>", raw(p));
        }
        Event::DocType(d) => {
            let _ = write!(out, "<!DOCTYPE {}>", raw(d));
        }
        Event::Eof => {}
    }
}

/// Attributes and children of an authored run-properties element.
#[derive(Debug, Default, Clone)]
struct RunProps {
    attrs: Vec<(String, String)>,
    /// Top-level children as (local name, serialized markup).
    children: Vec<(Vec<u8>, String)>,
}

impl RunProps {
    fn from_start(e: &BytesStart) -> Self {
        let attrs = e
            .attributes()
            .flatten()
            .filter_map(|a| {
                let value = a.unescape_value().ok()?.into_owned();
                Some((raw(a.key.as_ref()).into_owned(), value))
            })
            .collect();
        Self { attrs, children: Vec::new() }
    }

    fn set(&mut self, key: &str, value: Option<String>) {
        let Some(value) = value else { return };
        match self.attrs.iter_mut().find(|(k, _)| k == key) {
            Some(slot) => slot.1 = value,
            None => self.attrs.push((key.to_string(), value)),
        }
    }

    /// Render as `<prefix:tag>` carrying `style` over the authored values.
    fn render(&self, prefix: &str, tag: &str, style: &TextStyle) -> String {
        let mut props = self.clone();
        props.set("sz", style.ooxml_size());
        props.set("b", style.bold.map(|b| u8::from(b).to_string()));
        props.set("i", style.italic.map(|i| u8::from(i).to_string()));

        let mut children: Vec<String> = Vec::new();
        let color = style.ooxml_color();
        let mut fill_pending = color.is_some();
        for (local, markup) in &props.children {
            if color.is_some() && FILL_KINDS.contains(&local.as_slice()) {
                continue;
            }
            if fill_pending && local.as_slice() != b"ln" {
                children.push(solid_fill(prefix, color.as_deref().unwrap_or_default()));
                fill_pending = false;
            }
            children.push(markup.clone());
        }
        if fill_pending {
            children.push(solid_fill(prefix, color.as_deref().unwrap_or_default()));
        }

        let mut out = format!("<{}:{}", prefix, tag);
        for (key, value) in &props.attrs {
            let _ = write!(out, r#" {}="{}""#, key, escape(value.as_str()));
        }
        if children.is_empty() {
            out.push_str("/>");
        } else {
            let _ = write!(out, ">{}</{}:{}>", children.concat(), prefix, tag);
        }
        out
    }
}

fn solid_fill(prefix: &str, hex: &str) -> String {
    format!(r#"<{p}:solidFill><{p}:srgbClr val="{hex}"/></{p}:solidFill>"#, p = prefix)
}

/// Collects a run-properties subtree while its paragraph is being dropped.
struct Capture {
    depth: usize,
    is_run: bool,
    props: RunProps,
}

impl Capture {
    /// Returns `true` once the captured element closes.
    fn feed(&mut self, event: &Event, depth: usize) -> bool {
        match event {
            Event::Start(e) => {
                if depth == self.depth + 1 {
                    self.props
                        .children
                        .push((e.local_name().as_ref().to_vec(), format!("<{}>", raw(e))));
                } else {
                    self.append(&format!("<{}>", raw(e)));
                }
            }
            Event::Empty(e) => {
                if depth == self.depth {
                    self.props
                        .children
                        .push((e.local_name().as_ref().to_vec(), format!("<{}/>", raw(e))));
                } else {
                    self.append(&format!("<{}/>", raw(e)));
                }
            }
            Event::End(e) => {
                if depth == self.depth {
                    return true;
                }
                self.append(&format!("</{}>", raw(e)));
            }
            other => {
                let mut text = String::new();
                push_event(&mut text, other);
                self.append(&text);
            }
        }
        false
    }

    fn append(&mut self, markup: &str) {
        if let Some((_, last)) = self.props.children.last_mut() {
            last.push_str(markup);
        }
    }
}

/// Streaming state for one mapped `sp` shape.
struct ShapeRewrite<'e> {
    element: &'e Element,
    depth: usize,
    shape_prefix: Option<String>,
    body_depth: Option<usize>,
    saw_body: bool,
    /// Depth of the authored paragraph currently being dropped.
    skip_depth: Option<usize>,
    para_prefix: Option<String>,
    capture: Option<Capture>,
    run_props: Option<RunProps>,
    end_props: Option<RunProps>,
    emitted: bool,
}

impl<'e> ShapeRewrite<'e> {
    fn new(element: &'e Element, depth: usize, shape_prefix: Option<String>) -> Self {
        Self {
            element,
            depth,
            shape_prefix,
            body_depth: None,
            saw_body: false,
            skip_depth: None,
            para_prefix: None,
            capture: None,
            run_props: None,
            end_props: None,
            emitted: false,
        }
    }

    /// Returns `true` when the event was consumed (dropped or replaced).
    fn handle(&mut self, event: &Event, depth: usize, out: &mut String) -> bool {
        if let Some(skip) = self.skip_depth {
            self.observe_dropped(event, depth);
            if matches!(event, Event::End(_)) && depth == skip {
                self.skip_depth = None;
            }
            return true;
        }

        match event {
            Event::Start(e) => match e.local_name().as_ref() {
                b"txBody" if depth == self.depth + 1 => {
                    self.body_depth = Some(depth);
                    self.saw_body = true;
                    false
                }
                b"p" if self.body_depth.map_or(false, |b| depth == b + 1) => {
                    self.para_prefix.get_or_insert_with(|| prefix_of(e).unwrap_or_else(|| "a".into()));
                    self.skip_depth = Some(depth);
                    true
                }
                _ => false,
            },
            Event::Empty(e) => match e.local_name().as_ref() {
                b"txBody" if depth == self.depth => {
                    self.saw_body = true;
                    let name = raw(e.name().as_ref()).into_owned();
                    let a = self.drawing_prefix();
                    let _ = write!(out, "<{}><{a}:bodyPr/><{a}:lstStyle/>", raw(e));
                    self.write_paragraphs(out);
                    let _ = write!(out, "</{}>", name);
                    true
                }
                b"p" if self.body_depth == Some(depth) => {
                    self.para_prefix.get_or_insert_with(|| prefix_of(e).unwrap_or_else(|| "a".into()));
                    true
                }
                _ => false,
            },
            Event::End(_) => {
                if self.body_depth == Some(depth) {
                    self.write_paragraphs(out);
                    self.body_depth = None;
                } else if depth == self.depth && !self.saw_body {
                    let body = qualified(self.shape_prefix.as_deref(), "txBody");
                    let a = self.drawing_prefix();
                    let _ = write!(out, "<{body}><{a}:bodyPr/><{a}:lstStyle/>");
                    self.write_paragraphs(out);
                    let _ = write!(out, "</{body}>");
                    self.saw_body = true;
                }
                false
            }
            _ => false,
        }
    }

    /// Keep the first authored run properties of the dropped paragraphs.
    fn observe_dropped(&mut self, event: &Event, depth: usize) {
        if let Some(capture) = self.capture.as_mut() {
            if capture.feed(event, depth) {
                if let Some(done) = self.capture.take() {
                    if done.is_run {
                        self.run_props = Some(done.props);
                    } else {
                        self.end_props = Some(done.props);
                    }
                }
            }
            return;
        }
        let (e, empty) = match event {
            Event::Start(e) => (e, false),
            Event::Empty(e) => (e, true),
            _ => return,
        };
        let is_run = match e.local_name().as_ref() {
            b"rPr" if self.run_props.is_none() => true,
            b"endParaRPr" if self.end_props.is_none() => false,
            _ => return,
        };
        let props = RunProps::from_start(e);
        if empty {
            if is_run {
                self.run_props = Some(props);
            } else {
                self.end_props = Some(props);
            }
        } else {
            self.capture = Some(Capture { depth, is_run, props });
        }
    }

    fn drawing_prefix(&self) -> String {
        self.para_prefix.clone().unwrap_or_else(|| "a".to_string())
    }

    fn write_paragraphs(&mut self, out: &mut String) {
        if self.emitted {
            return;
        }
        self.emitted = true;

        let a = self.drawing_prefix();
        let base = self.run_props.as_ref().or(self.end_props.as_ref()).cloned().unwrap_or_else(|| RunProps {
            attrs: vec![("lang".to_string(), "en-US".to_string())],
            children: Vec::new(),
        });
        let style = &self.element.style;

        for line in self.element.content.split('\n') {
            if line.is_empty() {
                let _ = write!(out, "<{a}:p>{}</{a}:p>", base.render(&a, "endParaRPr", style));
            } else {
                let _ = write!(
                    out,
                    "<{a}:p><{a}:r>{}<{a}:t>{}</{a}:t></{a}:r></{a}:p>",
                    base.render(&a, "rPr", style),
                    escape(line)
                );
            }
        }
    }
}
