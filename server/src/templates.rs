//! HTML templates for the `view` and `edit` pages.
//!
//! Syntax is deliberately small:
//!
//! - `{{title}}`, `{{body}}`: escaped page fields
//! - `{{html}}`: the stored body as trusted HTML, inserted verbatim
//! - `{{markdown}}`: the body rendered as CommonMark
//! - `{{> name}}`: a part defined in `parts.html` as `{{#part name}}...{{/part}}`
//!
//! Tags are checked when a file is parsed; field and part names are only
//! resolved at render time.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, PoisonError, RwLock};

use pulldown_cmark::escape::escape_html;

use crate::page::Page;

pub const EDIT: &str = "edit";
pub const VIEW: &str = "view";
pub const PARTS: &str = "parts";

const PART_OPEN: &str = "{{#part";
const PART_CLOSE: &str = "{{/part}}";

#[derive(Debug, thiserror::Error)]
pub enum TemplateError {
	#[error("reading template {}: {source}", .path.display())]
	Read { path: PathBuf, #[source] source: std::io::Error },
	#[error("template {name}: {message}")]
	Parse { name: String, message: String },
	#[error("template {0:?} is not defined")]
	UnknownTemplate(String),
	#[error("template {template}: unknown field {field:?}")]
	UnknownField { template: String, field: String },
	#[error("template {template}: part {part:?} is not defined")]
	UnknownPart { template: String, part: String },
	#[error("writing template output: {0}")]
	Write(#[from] std::io::Error),
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
	Text(String),
	Field(String),
	Part(String),
}

/// An immutable, fully parsed set of page templates and parts.
#[derive(Debug)]
pub struct TemplateSet {
	pages: HashMap<&'static str, Vec<Segment>>,
	parts: HashMap<String, Vec<Segment>>,
}

impl TemplateSet {
	/// Reads `edit.html`, `view.html` and `parts.html` from `dir`.
	pub fn load(dir: &Path) -> Result<Self, TemplateError> {
		let read = |name: &str| {
			let path = dir.join(format!("{}.html", name));
			std::fs::read_to_string(&path).map_err(|source| TemplateError::Read { path, source })
		};
		Self::from_sources(&read(EDIT)?, &read(VIEW)?, &read(PARTS)?)
	}

	pub fn from_sources(edit: &str, view: &str, parts: &str) -> Result<Self, TemplateError> {
		let mut pages = HashMap::new();
		pages.insert(EDIT, parse_segments(EDIT, edit)?);
		pages.insert(VIEW, parse_segments(VIEW, view)?);
		Ok(Self { pages, parts: parse_parts(parts)? })
	}

	pub fn render(&self, name: &str, page: &Page) -> Result<String, TemplateError> {
		let segments = self.pages.get(name).ok_or_else(|| TemplateError::UnknownTemplate(name.to_string()))?;
		let mut out = String::with_capacity(1024 + page.body.len() * 2);
		let mut markdown: Option<String> = None;
		for seg in segments {
			match seg {
				Segment::Part(part) => {
					let inner = self.parts.get(part).ok_or_else(|| TemplateError::UnknownPart {
						template: name.to_string(),
						part: part.clone(),
					})?;
					for s in inner {
						write_segment(&mut out, name, s, page, &mut markdown)?;
					}
				}
				other => write_segment(&mut out, name, other, page, &mut markdown)?,
			}
		}
		Ok(out)
	}
}

fn write_segment(out: &mut String, template: &str, seg: &Segment, page: &Page, markdown: &mut Option<String>) -> Result<(), TemplateError> {
	match seg {
		Segment::Text(t) => out.push_str(t),
		Segment::Field(f) => match f.as_str() {
			"title" => escape_html(&mut *out, &page.title)?,
			"body" => escape_html(&mut *out, &page.body)?,
			"html" => out.push_str(page.trusted_html()),
			"markdown" => out.push_str(markdown.get_or_insert_with(|| page.markdown_html())),
			_ => return Err(TemplateError::UnknownField { template: template.to_string(), field: f.clone() }),
		},
		// Parts are flat; nested includes are rejected at parse time.
		Segment::Part(p) => return Err(TemplateError::UnknownPart { template: template.to_string(), part: p.clone() }),
	}
	Ok(())
}

fn parse_segments(name: &str, src: &str) -> Result<Vec<Segment>, TemplateError> {
	let parse_err = |message: String| TemplateError::Parse { name: name.to_string(), message };
	let mut segments = Vec::new();
	let mut pos = 0;
	while let Some(rel) = src[pos..].find("{{") {
		let open = pos + rel;
		if open > pos {
			segments.push(Segment::Text(src[pos..open].to_string()));
		}
		let close = src[open + 2..]
			.find("}}")
			.map(|c| open + 2 + c)
			.ok_or_else(|| parse_err(format!("unterminated tag at byte {}", open)))?;
		let tag = src[open + 2..close].trim();
		if tag.is_empty() {
			return Err(parse_err(format!("empty tag at byte {}", open)));
		}
		if let Some(part) = tag.strip_prefix('>') {
			let part = part.trim();
			if part.is_empty() {
				return Err(parse_err(format!("include without a part name at byte {}", open)));
			}
			segments.push(Segment::Part(part.to_string()));
		} else if tag.starts_with('#') || tag.starts_with('/') {
			return Err(parse_err(format!("unexpected block tag {{{{{}}}}} at byte {}", tag, open)));
		} else {
			segments.push(Segment::Field(tag.to_string()));
		}
		pos = close + 2;
	}
	if pos < src.len() {
		segments.push(Segment::Text(src[pos..].to_string()));
	}
	Ok(segments)
}

fn parse_parts(src: &str) -> Result<HashMap<String, Vec<Segment>>, TemplateError> {
	let parse_err = |message: String| TemplateError::Parse { name: PARTS.to_string(), message };
	let mut parts = HashMap::new();
	let mut pos = 0;
	while let Some(rel) = src[pos..].find(PART_OPEN) {
		let open = pos + rel;
		let head_end = src[open..]
			.find("}}")
			.map(|c| open + c)
			.ok_or_else(|| parse_err(format!("unterminated part tag at byte {}", open)))?;
		let part_name = src[open + PART_OPEN.len()..head_end].trim();
		if part_name.is_empty() {
			return Err(parse_err(format!("part without a name at byte {}", open)));
		}
		let body_start = head_end + 2;
		let body_end = src[body_start..]
			.find(PART_CLOSE)
			.map(|c| body_start + c)
			.ok_or_else(|| parse_err(format!("part {:?} is missing {}", part_name, PART_CLOSE)))?;
		let segments = parse_segments(&format!("{}/{}", PARTS, part_name), &src[body_start..body_end])?;
		if segments.iter().any(|s| matches!(s, Segment::Part(_))) {
			return Err(parse_err(format!("part {:?} includes another part", part_name)));
		}
		if parts.insert(part_name.to_string(), segments).is_some() {
			return Err(parse_err(format!("part {:?} defined twice", part_name)));
		}
		pos = body_end + PART_CLOSE.len();
	}
	Ok(parts)
}

/// Shared holder for the active [`TemplateSet`].
///
/// Readers clone the inner `Arc` and render against that snapshot, so a
/// concurrent [`reload`](TemplateStore::reload) never shows them a mix of old
/// and new templates.
pub struct TemplateStore {
	dir: PathBuf,
	current: RwLock<Arc<TemplateSet>>,
}

impl TemplateStore {
	pub fn load(dir: impl Into<PathBuf>) -> Result<Self, TemplateError> {
		let dir = dir.into();
		let set = TemplateSet::load(&dir)?;
		Ok(Self { dir, current: RwLock::new(Arc::new(set)) })
	}

	pub fn dir(&self) -> &Path {
		&self.dir
	}

	pub fn snapshot(&self) -> Arc<TemplateSet> {
		self.current.read().unwrap_or_else(PoisonError::into_inner).clone()
	}

	/// Re-parses the template files. On error the active set is kept.
	pub fn reload(&self) -> Result<(), TemplateError> {
		let fresh = Arc::new(TemplateSet::load(&self.dir)?);
		*self.current.write().unwrap_or_else(PoisonError::into_inner) = fresh;
		Ok(())
	}
}
