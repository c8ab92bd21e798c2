use pulldown_cmark::{html, Options as MdOptions, Parser as MdParser};

/// A wiki page. `body` is the canonical text; every view is derived from it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Page {
	pub title: String,
	pub body: String,
}

impl Page {
	pub fn new(title: impl Into<String>, body: impl Into<String>) -> Self {
		Self { title: title.into(), body: body.into() }
	}

	/// Empty page used to pre-fill the editor for titles not stored yet.
	pub fn blank(title: impl Into<String>) -> Self {
		Self::new(title, String::new())
	}

	/// The body as trusted HTML, exactly as stored.
	pub fn trusted_html(&self) -> &str {
		&self.body
	}

	/// Body rendered as CommonMark. Inline HTML passes through untouched.
	pub fn markdown_html(&self) -> String {
		let mut opts = MdOptions::empty();
		opts.insert(MdOptions::ENABLE_TABLES);
		opts.insert(MdOptions::ENABLE_STRIKETHROUGH);
		opts.insert(MdOptions::ENABLE_TASKLISTS);
		let parser = MdParser::new_ext(&self.body, opts);
		let mut out = String::with_capacity(self.body.len() * 3 / 2);
		html::push_html(&mut out, parser);
		out
	}
}
