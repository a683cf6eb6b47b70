//! Sample Deck Builder
//!
//! Writes small but well-formed PPTX packages: a master, a theme and
//! three layouts (title, title+content, blank) plus whatever slides
//! were added. Used by the CLI `sample` command and by tests.

use quick_xml::escape::escape;
use std::fmt::Write as _;
use std::io::{Cursor, Write};
use std::path::Path;
use zip::result::ZipResult;
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipWriter};

use crate::style::TextStyle;

const NS_A: &str = "http://schemas.openxmlformats.org/drawingml/2006/main";
const NS_R: &str = "http://schemas.openxmlformats.org/officeDocument/2006/relationships";
const NS_P: &str = "http://schemas.openxmlformats.org/presentationml/2006/main";
const REL_BASE: &str = "http://schemas.openxmlformats.org/officeDocument/2006/relationships";
const XML_DECL: &str = r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>"#;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SampleLayout {
    Title,
    Content,
    Blank,
}

impl SampleLayout {
    fn part_index(self) -> usize {
        match self {
            SampleLayout::Title => 1,
            SampleLayout::Content => 2,
            SampleLayout::Blank => 3,
        }
    }
}

#[derive(Debug, Clone)]
pub enum SampleShape {
    Placeholder { ph_type: String, text: String, style: Option<TextStyle> },
    TextBox { text: String, style: Option<TextStyle> },
    Picture,
}

impl SampleShape {
    pub fn placeholder(ph_type: &str, text: &str) -> Self {
        SampleShape::Placeholder { ph_type: ph_type.to_string(), text: text.to_string(), style: None }
    }

    pub fn text_box(text: &str) -> Self {
        SampleShape::TextBox { text: text.to_string(), style: None }
    }

    pub fn picture() -> Self {
        SampleShape::Picture
    }

    pub fn with_style(self, style: TextStyle) -> Self {
        match self {
            SampleShape::Placeholder { ph_type, text, .. } => {
                SampleShape::Placeholder { ph_type, text, style: Some(style) }
            }
            SampleShape::TextBox { text, .. } => SampleShape::TextBox { text, style: Some(style) },
            SampleShape::Picture => SampleShape::Picture,
        }
    }
}

#[derive(Debug, Clone)]
pub struct SampleSlide {
    pub layout: SampleLayout,
    pub shapes: Vec<SampleShape>,
}

impl SampleSlide {
    pub fn title(title: &str, subtitle: &str) -> Self {
        Self {
            layout: SampleLayout::Title,
            shapes: vec![
                SampleShape::placeholder("ctrTitle", title),
                SampleShape::placeholder("subTitle", subtitle),
            ],
        }
    }

    pub fn content(title: &str, body: &str) -> Self {
        Self {
            layout: SampleLayout::Content,
            shapes: vec![SampleShape::placeholder("title", title), SampleShape::placeholder("body", body)],
        }
    }

    pub fn blank(shapes: Vec<SampleShape>) -> Self {
        Self { layout: SampleLayout::Blank, shapes }
    }

    pub fn with_shape(mut self, shape: SampleShape) -> Self {
        self.shapes.push(shape);
        self
    }
}

#[derive(Debug, Clone, Default)]
pub struct DeckBuilder {
    slides: Vec<SampleSlide>,
}

impl DeckBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Title slide plus a bulleted content slide.
    pub fn starter() -> Self {
        Self::new()
            .slide(SampleSlide::title("Quarterly Review", "Prepared by the strategy team"))
            .slide(SampleSlide::content("Agenda", "• Results\n• Outlook\n• Next steps"))
    }

    pub fn slide(mut self, slide: SampleSlide) -> Self {
        self.slides.push(slide);
        self
    }

    pub fn write_to(&self, path: &Path) -> ZipResult<()> {
        let bytes = self.build()?;
        std::fs::write(path, bytes)?;
        Ok(())
    }

    pub fn build(&self) -> ZipResult<Vec<u8>> {
        let mut zip = ZipWriter::new(Cursor::new(Vec::new()));
        let options = SimpleFileOptions::default().compression_method(CompressionMethod::Deflated);

        let mut put = |name: &str, body: String| -> ZipResult<()> {
            zip.start_file(name, options)?;
            zip.write_all(body.as_bytes())?;
            Ok(())
        };

        put("[Content_Types].xml", self.content_types())?;
        put("_rels/.rels", rels(&[("rId1", "officeDocument", "ppt/presentation.xml")]))?;
        put("ppt/presentation.xml", self.presentation())?;
        put("ppt/_rels/presentation.xml.rels", self.presentation_rels())?;
        put("ppt/slideMasters/slideMaster1.xml", master())?;
        put(
            "ppt/slideMasters/_rels/slideMaster1.xml.rels",
            rels(&[
                ("rId1", "slideLayout", "../slideLayouts/slideLayout1.xml"),
                ("rId2", "slideLayout", "../slideLayouts/slideLayout2.xml"),
                ("rId3", "slideLayout", "../slideLayouts/slideLayout3.xml"),
                ("rId4", "theme", "../theme/theme1.xml"),
            ]),
        )?;
        put("ppt/theme/theme1.xml", theme())?;
        for (index, (kind, name)) in [("title", "Title Slide"), ("obj", "Title and Content"), ("blank", "Blank")]
            .iter()
            .enumerate()
        {
            put(&format!("ppt/slideLayouts/slideLayout{}.xml", index + 1), layout(kind, name))?;
            put(
                &format!("ppt/slideLayouts/_rels/slideLayout{}.xml.rels", index + 1),
                rels(&[("rId1", "slideMaster", "../slideMasters/slideMaster1.xml")]),
            )?;
        }
        for (index, slide) in self.slides.iter().enumerate() {
            put(&format!("ppt/slides/slide{}.xml", index + 1), slide_xml(slide))?;
            put(
                &format!("ppt/slides/_rels/slide{}.xml.rels", index + 1),
                rels(&[(
                    "rId1",
                    "slideLayout",
                    &format!("../slideLayouts/slideLayout{}.xml", slide.layout.part_index()),
                )]),
            )?;
        }

        Ok(zip.finish()?.into_inner())
    }

    fn content_types(&self) -> String {
        let pml = "application/vnd.openxmlformats-officedocument.presentationml";
        let mut xml = format!(
            r#"{XML_DECL}<Types xmlns="http://schemas.openxmlformats.org/package/2006/content-types"><Default Extension="rels" ContentType="application/vnd.openxmlformats-package.relationships+xml"/><Default Extension="xml" ContentType="application/xml"/><Override PartName="/ppt/presentation.xml" ContentType="{pml}.presentation.main+xml"/><Override PartName="/ppt/slideMasters/slideMaster1.xml" ContentType="{pml}.slideMaster+xml"/><Override PartName="/ppt/theme/theme1.xml" ContentType="application/vnd.openxmlformats-officedocument.theme+xml"/>"#
        );
        for i in 1..=3 {
            let _ = write!(
                xml,
                r#"<Override PartName="/ppt/slideLayouts/slideLayout{i}.xml" ContentType="{pml}.slideLayout+xml"/>"#
            );
        }
        for i in 1..=self.slides.len() {
            let _ = write!(
                xml,
                r#"<Override PartName="/ppt/slides/slide{i}.xml" ContentType="{pml}.slide+xml"/>"#
            );
        }
        xml.push_str("</Types>");
        xml
    }

    fn presentation(&self) -> String {
        let mut ids = String::new();
        for i in 0..self.slides.len() {
            let _ = write!(ids, r#"<p:sldId id="{}" r:id="rId{}"/>"#, 256 + i, i + 2);
        }
        format!(
            r#"{XML_DECL}<p:presentation xmlns:a="{NS_A}" xmlns:r="{NS_R}" xmlns:p="{NS_P}"><p:sldMasterIdLst><p:sldMasterId id="2147483648" r:id="rId1"/></p:sldMasterIdLst><p:sldIdLst>{ids}</p:sldIdLst><p:sldSz cx="9144000" cy="6858000" type="screen4x3"/><p:notesSz cx="6858000" cy="9144000"/></p:presentation>"#
        )
    }

    fn presentation_rels(&self) -> String {
        let mut entries = vec![("rId1".to_string(), "slideMaster", "slideMasters/slideMaster1.xml".to_string())];
        for i in 0..self.slides.len() {
            entries.push((format!("rId{}", i + 2), "slide", format!("slides/slide{}.xml", i + 1)));
        }
        let borrowed: Vec<(&str, &str, &str)> =
            entries.iter().map(|(id, kind, target)| (id.as_str(), *kind, target.as_str())).collect();
        rels(&borrowed)
    }
}

fn rels(entries: &[(&str, &str, &str)]) -> String {
    let mut xml = format!(
        r#"{XML_DECL}<Relationships xmlns="http://schemas.openxmlformats.org/package/2006/relationships">"#
    );
    for (id, kind, target) in entries {
        let _ = write!(xml, r#"<Relationship Id="{id}" Type="{REL_BASE}/{kind}" Target="{target}"/>"#);
    }
    xml.push_str("</Relationships>");
    xml
}

fn empty_tree() -> &'static str {
    r#"<p:nvGrpSpPr><p:cNvPr id="1" name=""/><p:cNvGrpSpPr/><p:nvPr/></p:nvGrpSpPr><p:grpSpPr/>"#
}

fn master() -> String {
    format!(
        r#"{XML_DECL}<p:sldMaster xmlns:a="{NS_A}" xmlns:r="{NS_R}" xmlns:p="{NS_P}"><p:cSld><p:spTree>{}</p:spTree></p:cSld><p:clrMap bg1="lt1" tx1="dk1" bg2="lt2" tx2="dk2" accent1="accent1" accent2="accent2" accent3="accent3" accent4="accent4" accent5="accent5" accent6="accent6" hlink="hlink" folHlink="folHlink"/><p:sldLayoutIdLst><p:sldLayoutId id="2147483649" r:id="rId1"/><p:sldLayoutId id="2147483650" r:id="rId2"/><p:sldLayoutId id="2147483651" r:id="rId3"/></p:sldLayoutIdLst></p:sldMaster>"#,
        empty_tree()
    )
}

fn layout(kind: &str, name: &str) -> String {
    format!(
        r#"{XML_DECL}<p:sldLayout xmlns:a="{NS_A}" xmlns:r="{NS_R}" xmlns:p="{NS_P}" type="{kind}" preserve="1"><p:cSld name="{name}"><p:spTree>{}</p:spTree></p:cSld><p:clrMapOvr><a:masterClrMapping/></p:clrMapOvr></p:sldLayout>"#,
        empty_tree()
    )
}

fn theme() -> String {
    let solid = r#"<a:solidFill><a:schemeClr val="phClr"/></a:solidFill>"#;
    let line = r#"<a:ln w="9525"><a:solidFill><a:schemeClr val="phClr"/></a:solidFill></a:ln>"#;
    format!(
        r#"{XML_DECL}<a:theme xmlns:a="{NS_A}" name="Sample"><a:themeElements><a:clrScheme name="Sample"><a:dk1><a:srgbClr val="000000"/></a:dk1><a:lt1><a:srgbClr val="FFFFFF"/></a:lt1><a:dk2><a:srgbClr val="1F497D"/></a:dk2><a:lt2><a:srgbClr val="EEECE1"/></a:lt2><a:accent1><a:srgbClr val="4F81BD"/></a:accent1><a:accent2><a:srgbClr val="C0504D"/></a:accent2><a:accent3><a:srgbClr val="9BBB59"/></a:accent3><a:accent4><a:srgbClr val="8064A2"/></a:accent4><a:accent5><a:srgbClr val="4BACC6"/></a:accent5><a:accent6><a:srgbClr val="F79646"/></a:accent6><a:hlink><a:srgbClr val="0000FF"/></a:hlink><a:folHlink><a:srgbClr val="800080"/></a:folHlink></a:clrScheme><a:fontScheme name="Sample"><a:majorFont><a:latin typeface="Calibri"/><a:ea typeface=""/><a:cs typeface=""/></a:majorFont><a:minorFont><a:latin typeface="Calibri"/><a:ea typeface=""/><a:cs typeface=""/></a:minorFont></a:fontScheme><a:fmtScheme name="Sample"><a:fillStyleLst>{solid}{solid}{solid}</a:fillStyleLst><a:lnStyleLst>{line}{line}{line}</a:lnStyleLst><a:effectStyleLst><a:effectStyle><a:effectLst/></a:effectStyle><a:effectStyle><a:effectLst/></a:effectStyle><a:effectStyle><a:effectLst/></a:effectStyle></a:effectStyleLst><a:bgFillStyleLst>{solid}{solid}{solid}</a:bgFillStyleLst></a:fmtScheme></a:themeElements></a:theme>"#
    )
}

fn slide_xml(slide: &SampleSlide) -> String {
    let mut shapes = String::new();
    let mut free_row = 0i64;
    for (index, shape) in slide.shapes.iter().enumerate() {
        // cNvPr id 1 belongs to the tree itself.
        let id = index + 2;
        match shape {
            SampleShape::Placeholder { ph_type, text, style } => {
                let ph = match ph_type.as_str() {
                    "title" | "ctrTitle" => format!(r#"<p:ph type="{ph_type}"/>"#),
                    _ => format!(r#"<p:ph type="{ph_type}" idx="{index}"/>"#),
                };
                let _ = write!(
                    shapes,
                    r#"<p:sp><p:nvSpPr><p:cNvPr id="{id}" name="Placeholder {}"/><p:cNvSpPr><a:spLocks noGrp="1"/></p:cNvSpPr><p:nvPr>{ph}</p:nvPr></p:nvSpPr><p:spPr/><p:txBody><a:bodyPr/><a:lstStyle/>{}</p:txBody></p:sp>"#,
                    id - 1,
                    paragraphs(text, style.as_ref())
                );
            }
            SampleShape::TextBox { text, style } => {
                let _ = write!(
                    shapes,
                    r#"<p:sp><p:nvSpPr><p:cNvPr id="{id}" name="TextBox {}"/><p:cNvSpPr txBox="1"/><p:nvPr/></p:nvSpPr><p:spPr>{}<a:prstGeom prst="rect"><a:avLst/></a:prstGeom></p:spPr><p:txBody><a:bodyPr wrap="square"/><a:lstStyle/>{}</p:txBody></p:sp>"#,
                    id - 1,
                    free_frame(free_row),
                    paragraphs(text, style.as_ref())
                );
                free_row += 1;
            }
            SampleShape::Picture => {
                let _ = write!(
                    shapes,
                    r#"<p:pic><p:nvPicPr><p:cNvPr id="{id}" name="Picture {}"/><p:cNvPicPr/><p:nvPr/></p:nvPicPr><p:blipFill><a:blip/><a:stretch><a:fillRect/></a:stretch></p:blipFill><p:spPr>{}<a:prstGeom prst="rect"><a:avLst/></a:prstGeom></p:spPr></p:pic>"#,
                    id - 1,
                    free_frame(free_row)
                );
                free_row += 1;
            }
        }
    }
    format!(
        r#"{XML_DECL}<p:sld xmlns:a="{NS_A}" xmlns:r="{NS_R}" xmlns:p="{NS_P}"><p:cSld><p:spTree>{}{shapes}</p:spTree></p:cSld><p:clrMapOvr><a:masterClrMapping/></p:clrMapOvr></p:sld>"#,
        empty_tree()
    )
}

fn free_frame(row: i64) -> String {
    format!(
        r#"<a:xfrm><a:off x="457200" y="{}"/><a:ext cx="8229600" cy="685800"/></a:xfrm>"#,
        1_600_200 + row * 914_400
    )
}

fn run_props(tag: &str, style: Option<&TextStyle>) -> String {
    let mut attrs = String::from(r#" lang="en-US""#);
    let mut fill = String::new();
    if let Some(style) = style {
        if let Some(sz) = style.ooxml_size() {
            let _ = write!(attrs, r#" sz="{sz}""#);
        }
        if let Some(b) = style.bold {
            let _ = write!(attrs, r#" b="{}""#, u8::from(b));
        }
        if let Some(i) = style.italic {
            let _ = write!(attrs, r#" i="{}""#, u8::from(i));
        }
        if let Some(color) = style.ooxml_color() {
            fill = format!(r#"<a:solidFill><a:srgbClr val="{color}"/></a:solidFill>"#);
        }
    }
    if fill.is_empty() {
        format!("<a:{tag}{attrs}/>")
    } else {
        format!("<a:{tag}{attrs}>{fill}</a:{tag}>")
    }
}

fn paragraphs(text: &str, style: Option<&TextStyle>) -> String {
    if text.is_empty() {
        return format!("<a:p>{}</a:p>", run_props("endParaRPr", style));
    }
    text.split('\n')
        .map(|line| {
            format!(
                "<a:p><a:r>{}<a:t>{}</a:t></a:r></a:p>",
                run_props("rPr", style),
                escape(line)
            )
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Read;

    #[test]
    fn test_starter_deck_contains_slides() {
        let bytes = DeckBuilder::starter().build().unwrap();
        let mut archive = zip::ZipArchive::new(Cursor::new(bytes)).unwrap();
        let mut xml = String::new();
        archive.by_name("ppt/slides/slide2.xml").unwrap().read_to_string(&mut xml).unwrap();
        assert!(xml.contains("• Outlook"));
        assert!(archive.by_name("ppt/slides/slide3.xml").is_err());
    }

    #[test]
    fn test_text_is_escaped() {
        let xml = paragraphs("R&D <2025>", None);
        assert!(xml.contains("R&amp;D &lt;2025&gt;"));
    }
}
