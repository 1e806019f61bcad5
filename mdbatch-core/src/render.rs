//! Default rendering engine: Markdown to templated HTML through comrak, and a
//! plain paginated PDF of the document text through printpdf.
//!
//! While started, the engine keeps an index of the images directory and points
//! image references that start with the configured import prefix at the
//! indexed files.

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use comrak::nodes::{AstNode, NodeValue};
use comrak::{format_html, parse_document, Arena, Options};
use printpdf::{BuiltinFont, Mm, Op, PdfDocument, PdfPage, PdfSaveOptions, Point, Pt, TextItem};
use regex::{Captures, Regex};
use tracing::{debug, info, warn};

use crate::contract::{ConversionResult, EngineError, EngineOptions, RenderEngine};

const PAGE_WIDTH_MM: f32 = 210.0;
const PAGE_HEIGHT_MM: f32 = 297.0;
const MARGIN_MM: f32 = 20.0;
const BODY_FONT_SIZE: f32 = 10.0;
const TITLE_FONT_SIZE: f32 = 16.0;
const LINE_HEIGHT_PT: f32 = 12.0;
const LINES_PER_PAGE: usize = 60;
const CHARS_PER_LINE: usize = 80;

#[derive(Debug)]
enum EngineState {
    Idle,
    Running(ImageIndex),
    Closed,
}

/// Files available under the images directory, relative to it, `/`-separated.
#[derive(Debug, Default)]
struct ImageIndex {
    base: PathBuf,
    files: HashSet<String>,
}

impl ImageIndex {
    /// Walks `dir` recursively. Unreadable entries are logged and skipped.
    async fn build(dir: &Path) -> Self {
        let base = match tokio::fs::canonicalize(dir).await {
            Ok(base) => base,
            Err(e) => {
                warn!(dir = %dir.display(), error = ?e, "Images directory not available; image references left untouched");
                return Self::default();
            }
        };

        let mut files = HashSet::new();
        let mut pending = vec![base.clone()];
        while let Some(current) = pending.pop() {
            let mut entries = match tokio::fs::read_dir(&current).await {
                Ok(entries) => entries,
                Err(e) => {
                    warn!(dir = %current.display(), error = ?e, "Skipping unreadable images directory");
                    continue;
                }
            };
            loop {
                let entry = match entries.next_entry().await {
                    Ok(Some(entry)) => entry,
                    Ok(None) => break,
                    Err(e) => {
                        warn!(dir = %current.display(), error = ?e, "Stopped listing images directory");
                        break;
                    }
                };
                let path = entry.path();
                match entry.file_type().await {
                    Ok(file_type) if file_type.is_dir() => pending.push(path),
                    Ok(_) => {
                        if let Ok(relative) = path.strip_prefix(&base) {
                            let key = relative
                                .components()
                                .map(|c| c.as_os_str().to_string_lossy())
                                .collect::<Vec<_>>()
                                .join("/");
                            files.insert(key);
                        }
                    }
                    Err(e) => warn!(path = %path.display(), error = ?e, "Skipping unreadable image entry"),
                }
            }
        }

        debug!(dir = %base.display(), count = files.len(), "Indexed images directory");
        Self { base, files }
    }

    fn url_for(&self, relative: &str) -> Option<String> {
        self.files
            .contains(relative)
            .then(|| format!("file://{}", self.base.join(relative).display()))
    }
}

/// The engine shipped with mdbatch.
pub struct HtmlPdfEngine {
    options: EngineOptions,
    state: EngineState,
    img_src: Regex,
    placeholder: Regex,
}

impl HtmlPdfEngine {
    pub fn new(options: EngineOptions) -> Self {
        Self {
            options,
            state: EngineState::Idle,
            img_src: Regex::new(r#"(<img\b[^>]*?\ssrc=")([^"]*)(")"#).expect("valid image regex"),
            placeholder: Regex::new(r"\{\{(title|style|content)\}\}").expect("valid placeholder regex"),
        }
    }

    fn markdown_options() -> Options<'static> {
        let mut options = Options::default();
        let ext = &mut options.extension;
        ext.strikethrough = true;
        ext.table = true;
        ext.autolink = true;
        ext.tasklist = true;
        ext.footnotes = true;
        options
    }

    fn rewrite_images(&self, html: &str, index: &ImageIndex) -> String {
        let Some(prefix) = self.options.image_import.as_deref() else {
            return html.to_string();
        };
        self.img_src
            .replace_all(html, |caps: &Captures| {
                let src = &caps[2];
                let target = src
                    .strip_prefix(prefix)
                    .map(|rest| rest.trim_start_matches('/'))
                    .and_then(|rest| index.url_for(rest));
                match target {
                    Some(url) => format!("{}{}{}", &caps[1], url, &caps[3]),
                    None => caps[0].to_string(),
                }
            })
            .into_owned()
    }
}

#[async_trait]
impl RenderEngine for HtmlPdfEngine {
    async fn start(&mut self) -> Result<(), EngineError> {
        match self.state {
            EngineState::Idle => {}
            EngineState::Running(_) => return Err(EngineError::AlreadyStarted),
            EngineState::Closed => return Err(EngineError::Closed),
        }
        // Without an import no reference is rewritten.
        let index = match self.options.image_import {
            Some(_) => ImageIndex::build(&self.options.image_dir).await,
            None => ImageIndex::default(),
        };
        info!(images = index.files.len(), "Rendering engine started");
        self.state = EngineState::Running(index);
        Ok(())
    }

    async fn convert(
        &self,
        markdown: &str,
        name: &str,
    ) -> Result<Box<dyn ConversionResult>, EngineError> {
        let EngineState::Running(index) = &self.state else {
            return Err(EngineError::NotStarted);
        };

        let options = Self::markdown_options();
        let arena = Arena::new();
        let root = parse_document(&arena, markdown, &options);

        let headings = if self.options.table_of_contents {
            collect_headings(root)
        } else {
            Vec::new()
        };

        let mut body = String::new();
        format_html(root, &options, &mut body).map_err(|e| EngineError::Render(e.to_string()))?;

        let body = self.rewrite_images(&body, index);
        let body = if headings.is_empty() {
            body
        } else {
            format!("{}{}", table_of_contents(&headings), anchor_headings(&body, &headings))
        };

        let title = escape_html(name);
        // Single pass: placeholders inside the style or the body stay literal.
        let html = self
            .placeholder
            .replace_all(&self.options.template, |caps: &Captures| match &caps[1] {
                "title" => title.clone(),
                "style" => self.options.style.clone(),
                _ => body.clone(),
            })
            .into_owned();

        debug!(name, html_bytes = html.len(), headings = headings.len(), "Converted document");
        Ok(Box::new(RenderedDocument {
            title: name.to_string(),
            html,
            text: markdown.to_string(),
        }))
    }

    async fn close(&mut self) -> Result<(), EngineError> {
        match std::mem::replace(&mut self.state, EngineState::Closed) {
            EngineState::Running(_) => {
                info!("Rendering engine closed");
                Ok(())
            }
            EngineState::Closed => Err(EngineError::Closed),
            EngineState::Idle => {
                self.state = EngineState::Idle;
                Err(EngineError::NotStarted)
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct Heading {
    level: u8,
    text: String,
    slug: String,
}

fn collect_headings<'a>(root: &'a AstNode<'a>) -> Vec<Heading> {
    fn walk<'a>(node: &'a AstNode<'a>, out: &mut Vec<Heading>) {
        let level = match &node.data.borrow().value {
            NodeValue::Heading(heading) => Some(heading.level),
            _ => None,
        };
        if let Some(level) = level {
            let text = inline_text(node);
            out.push(Heading {
                level,
                slug: slug::slugify(&text),
                text,
            });
        }
        let mut child = node.first_child();
        while let Some(next) = child {
            walk(next, out);
            child = next.next_sibling();
        }
    }

    let mut headings = Vec::new();
    walk(root, &mut headings);

    // Repeated titles get numbered slugs so every anchor stays unique.
    let mut seen: HashSet<String> = HashSet::new();
    for heading in &mut headings {
        let base = heading.slug.clone();
        let mut n = 1;
        while !seen.insert(heading.slug.clone()) {
            heading.slug = format!("{base}-{n}");
            n += 1;
        }
    }
    headings
}

fn inline_text<'a>(node: &'a AstNode<'a>) -> String {
    let mut text = String::new();
    let mut child = node.first_child();
    while let Some(next) = child {
        match &next.data.borrow().value {
            NodeValue::Text(t) => text.push_str(t),
            NodeValue::Code(code) => text.push_str(&code.literal),
            NodeValue::SoftBreak | NodeValue::LineBreak => text.push(' '),
            _ => text.push_str(&inline_text(next)),
        }
        child = next.next_sibling();
    }
    text
}

fn table_of_contents(headings: &[Heading]) -> String {
    let mut out = String::from("<nav class=\"table-of-contents\"><ul>\n");
    for heading in headings {
        out.push_str(&format!(
            "<li class=\"toc-level-{}\"><a href=\"#{}\">{}</a></li>\n",
            heading.level,
            heading.slug,
            escape_html(&heading.text)
        ));
    }
    out.push_str("</ul></nav>\n");
    out
}

/// Adds `id` attributes to the rendered headings, in document order.
fn anchor_headings(html: &str, headings: &[Heading]) -> String {
    let mut out = String::with_capacity(html.len() + headings.len() * 16);
    let mut rest = html;
    for heading in headings {
        let open = format!("<h{}>", heading.level);
        let Some(pos) = rest.find(&open) else {
            break;
        };
        out.push_str(&rest[..pos]);
        out.push_str(&format!("<h{} id=\"{}\">", heading.level, heading.slug));
        rest = &rest[pos + open.len()..];
    }
    out.push_str(rest);
    out
}

fn escape_html(input: &str) -> String {
    let mut escaped = String::with_capacity(input.len());
    for ch in input.chars() {
        match ch {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' => escaped.push_str("&quot;"),
            _ => escaped.push(ch),
        }
    }
    escaped
}

/// Output of [`HtmlPdfEngine::convert`].
struct RenderedDocument {
    title: String,
    html: String,
    text: String,
}

impl RenderedDocument {
    fn pdf_bytes(&self) -> Vec<u8> {
        let lines = wrap_lines(&self.text, CHARS_PER_LINE);
        let mut pages = Vec::new();
        let mut chunks = lines.chunks(LINES_PER_PAGE).peekable();
        let mut first = true;

        // A document with no text still gets one page carrying its title.
        if chunks.peek().is_none() {
            pages.push(self.page(&[], true));
        }
        for chunk in chunks {
            pages.push(self.page(chunk, first));
            first = false;
        }

        let mut doc = PdfDocument::new(&self.title);
        doc.with_pages(pages);
        let mut warnings = Vec::new();
        let bytes = doc.save(&PdfSaveOptions::default(), &mut warnings);
        if !warnings.is_empty() {
            debug!(count = warnings.len(), "PDF writer reported warnings");
        }
        bytes
    }

    fn page(&self, lines: &[String], with_title: bool) -> PdfPage {
        let top = Point {
            x: Mm(MARGIN_MM).into(),
            y: Mm(PAGE_HEIGHT_MM - MARGIN_MM).into(),
        };
        let mut ops = vec![
            Op::StartTextSection,
            Op::SetTextCursor { pos: top },
            Op::SetLineHeight { lh: Pt(LINE_HEIGHT_PT) },
        ];
        if with_title {
            ops.push(Op::SetFontSizeBuiltinFont {
                size: Pt(TITLE_FONT_SIZE),
                font: BuiltinFont::HelveticaBold,
            });
            ops.push(Op::WriteTextBuiltinFont {
                items: vec![TextItem::Text(self.title.clone())],
                font: BuiltinFont::HelveticaBold,
            });
            ops.push(Op::AddLineBreak);
            ops.push(Op::AddLineBreak);
        }
        ops.push(Op::SetFontSizeBuiltinFont {
            size: Pt(BODY_FONT_SIZE),
            font: BuiltinFont::Courier,
        });
        for line in lines {
            ops.push(Op::WriteTextBuiltinFont {
                items: vec![TextItem::Text(line.clone())],
                font: BuiltinFont::Courier,
            });
            ops.push(Op::AddLineBreak);
        }
        ops.push(Op::EndTextSection);
        PdfPage::new(Mm(PAGE_WIDTH_MM), Mm(PAGE_HEIGHT_MM), ops)
    }
}

/// Hard-wraps text at `width` characters, keeping blank lines.
fn wrap_lines(text: &str, width: usize) -> Vec<String> {
    let mut out = Vec::new();
    for line in text.lines() {
        let chars: Vec<char> = line.trim_end().chars().collect();
        if chars.is_empty() {
            out.push(String::new());
            continue;
        }
        for chunk in chars.chunks(width) {
            out.push(chunk.iter().collect());
        }
    }
    out
}

#[async_trait]
impl ConversionResult for RenderedDocument {
    async fn write_html(&self, path: &Path) -> Result<(), EngineError> {
        tokio::fs::write(path, self.html.as_bytes()).await?;
        Ok(())
    }

    async fn write_pdf(&self, path: &Path) -> Result<(), EngineError> {
        tokio::fs::write(path, self.pdf_bytes()).await?;
        Ok(())
    }
}
