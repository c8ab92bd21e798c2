use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use sled::{Db, Tree};
use tracing::{debug, warn};

use crate::page::Page;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
	#[error("page {0:?} not found")]
	NotFound(String),
	#[error("page {title:?} is not valid UTF-8: {source}")]
	Decode { title: String, #[source] source: std::string::FromUtf8Error },
	#[error("store error: {0}")]
	Db(#[from] sled::Error),
	#[error("failed to mirror page to {}: {source}", .path.display())]
	Mirror { path: PathBuf, #[source] source: std::io::Error },
}

impl StoreError {
	pub fn is_not_found(&self) -> bool {
		matches!(self, StoreError::NotFound(_))
	}
}

/// Page bodies keyed by title in sled, with a flat-file copy per page.
///
/// sled is the source of truth. The mirror is written after every successful
/// store write and never read back, so the two may diverge if it fails.
pub struct PageStore {
	db: Db,
	pages: Tree,
	mirror_dir: PathBuf,
}

impl PageStore {
	/// Opens `<data_dir>/kv` and mirrors pages into `data_dir` itself.
	pub fn open(data_dir: &Path) -> Result<Self, StoreError> {
		fs::create_dir_all(data_dir).map_err(|source| StoreError::Mirror { path: data_dir.to_path_buf(), source })?;
		let db = sled::open(data_dir.join("kv"))?;
		let pages = db.open_tree("pages")?;
		Ok(Self { db, pages, mirror_dir: data_dir.to_path_buf() })
	}

	pub fn mirror_path(&self, title: &str) -> PathBuf {
		self.mirror_dir.join(format!("{}.html", title))
	}

	pub fn save(&self, page: &Page) -> Result<(), StoreError> {
		self.pages.insert(page.title.as_bytes(), page.body.as_bytes())?;
		self.db.flush()?;

		// Read-back check; only logged.
		match self.pages.get(page.title.as_bytes()) {
			Ok(Some(v)) if v.as_ref() == page.body.as_bytes() => {
				debug!(title = %page.title, body = %String::from_utf8_lossy(&v), "page stored");
			}
			Ok(Some(_)) => warn!(title = %page.title, "read-back differs from written body"),
			Ok(None) => warn!(title = %page.title, "page missing right after write"),
			Err(err) => warn!(title = %page.title, %err, "read-back failed"),
		}

		self.write_mirror(page)
	}

	pub fn load(&self, title: &str) -> Result<Page, StoreError> {
		let raw = self.pages.get(title.as_bytes())?.ok_or_else(|| StoreError::NotFound(title.to_string()))?;
		let body = String::from_utf8(raw.to_vec()).map_err(|source| StoreError::Decode { title: title.to_string(), source })?;
		Ok(Page::new(title, body))
	}

	/// Stored titles in key order.
	pub fn titles(&self) -> Result<Vec<String>, StoreError> {
		let mut out = Vec::new();
		for kv in self.pages.iter() {
			let (k, _) = kv?;
			out.push(String::from_utf8_lossy(&k).into_owned());
		}
		Ok(out)
	}

	fn write_mirror(&self, page: &Page) -> Result<(), StoreError> {
		let path = self.mirror_path(&page.title);
		let mut opts = fs::OpenOptions::new();
		opts.write(true).create(true).truncate(true);
		#[cfg(unix)]
		{
			use std::os::unix::fs::OpenOptionsExt;
			opts.mode(0o600);
		}
		opts.open(&path)
			.and_then(|mut f| f.write_all(page.body.as_bytes()))
			.map_err(|source| StoreError::Mirror { path, source })
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	fn make_store() -> (tempfile::TempDir, PageStore) {
		let dir = tempfile::tempdir().unwrap();
		let store = PageStore::open(dir.path()).unwrap();
		(dir, store)
	}

	#[test]
	fn save_then_load_restores_body() {
		let (_dir, store) = make_store();
		store.save(&Page::new("demo", "Hello")).unwrap();
		let page = store.load("demo").unwrap();
		assert_eq!(page, Page::new("demo", "Hello"));
	}

	#[test]
	fn save_overwrites_previous_body() {
		let (_dir, store) = make_store();
		store.save(&Page::new("demo", "first")).unwrap();
		store.save(&Page::new("demo", "second")).unwrap();
		assert_eq!(store.load("demo").unwrap().body, "second");
		assert_eq!(fs::read_to_string(store.mirror_path("demo")).unwrap(), "second");
	}

	#[test]
	fn missing_page_is_not_found() {
		let (_dir, store) = make_store();
		let err = store.load("absent").unwrap_err();
		assert!(err.is_not_found());
	}

	#[test]
	fn invalid_utf8_is_a_decode_error() {
		let (_dir, store) = make_store();
		store.pages.insert(b"broken", &[0xff, 0xfe][..]).unwrap();
		let err = store.load("broken").unwrap_err();
		assert!(matches!(err, StoreError::Decode { .. }));
		assert!(!err.is_not_found());
	}

	#[cfg(unix)]
	#[test]
	fn mirror_file_is_owner_only() {
		use std::os::unix::fs::PermissionsExt;
		let (_dir, store) = make_store();
		store.save(&Page::new("secret", "shh")).unwrap();
		let mode = fs::metadata(store.mirror_path("secret")).unwrap().permissions().mode();
		assert_eq!(mode & 0o777, 0o600);
	}

	#[test]
	fn mirror_failure_is_reported_after_store_write() {
		let (dir, store) = make_store();
		// A directory where the mirror file should go makes the open fail.
		fs::create_dir_all(dir.path().join("blocked.html")).unwrap();
		let err = store.save(&Page::new("blocked", "body")).unwrap_err();
		assert!(matches!(err, StoreError::Mirror { .. }));
		assert_eq!(store.load("blocked").unwrap().body, "body");
	}

	#[test]
	fn titles_are_listed_in_key_order() {
		let (_dir, store) = make_store();
		for t in ["zeta", "alpha", "Mid"] { store.save(&Page::new(t, "x")).unwrap(); }
		assert_eq!(store.titles().unwrap(), vec!["Mid", "alpha", "zeta"]);
	}
}
