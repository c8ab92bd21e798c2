use std::sync::{Arc, OnceLock};

use axum::extract::{Path, State};
use axum::http::{header, Method, StatusCode};
use axum::response::{Html, IntoResponse, Response};
use axum::routing::any;
use axum::{Form, Router};
use regex::Regex;
use serde::Deserialize;
use tower_http::trace::TraceLayer;
use tracing::error;

use crate::page::Page;
use crate::store::{PageStore, StoreError};
use crate::templates::{TemplateStore, EDIT, VIEW};

pub struct AppState {
	pub store: PageStore,
	pub templates: Arc<TemplateStore>,
}

#[derive(Deserialize)]
pub struct SaveForm {
	#[serde(default)]
	pub body: String,
}

/// Page routes accept any method so that the title is checked first:
/// an invalid title is always 404, whatever the method or body.
pub fn build_router(state: Arc<AppState>) -> Router {
	Router::new()
		.route("/view/:title", any(view_page))
		.route("/edit/:title", any(edit_page))
		.route("/save/:title", any(save_page))
		.fallback(not_found)
		.layer(TraceLayer::new_for_http())
		.with_state(state)
}

fn valid_path() -> &'static Regex {
	static RE: OnceLock<Regex> = OnceLock::new();
	RE.get_or_init(|| Regex::new(r"^/(edit|save|view)/([a-zA-Z0-9]+)$").expect("static regex"))
}

/// Title from a decoded request path, if the whole path is a valid page route.
pub fn page_title(path: &str) -> Option<&str> {
	valid_path().captures(path).and_then(|c| c.get(2)).map(|m| m.as_str())
}

/// `Path` has already percent-decoded the segment, so `/view/%61bc` is `abc`.
/// Undecodable segments arrive as `None`.
fn route_title(action: &str, segment: Option<Path<String>>) -> Option<String> {
	let Path(segment) = segment?;
	page_title(&format!("/{}/{}", action, segment)).map(str::to_string)
}

async fn not_found() -> StatusCode {
	StatusCode::NOT_FOUND
}

fn method_not_allowed(allow: &'static str) -> Response {
	(StatusCode::METHOD_NOT_ALLOWED, [(header::ALLOW, allow)]).into_response()
}

fn is_read(method: &Method) -> bool {
	*method == Method::GET || *method == Method::HEAD
}

fn found(location: String) -> Response {
	(StatusCode::FOUND, [(header::LOCATION, location)]).into_response()
}

fn internal_error(message: impl Into<String>) -> Response {
	(StatusCode::INTERNAL_SERVER_ERROR, message.into()).into_response()
}

fn render(state: &AppState, template: &str, page: &Page) -> Response {
	match state.templates.snapshot().render(template, page) {
		Ok(html) => Html(html).into_response(),
		Err(err) => {
			error!(%err, title = %page.title, template, "template execution failed");
			internal_error(err.to_string())
		}
	}
}

fn store_failure(err: StoreError) -> Response {
	error!(%err, "page store failure");
	internal_error(err.to_string())
}

async fn view_page(State(state): State<Arc<AppState>>, method: Method, segment: Option<Path<String>>) -> Response {
	let Some(title) = route_title("view", segment) else { return StatusCode::NOT_FOUND.into_response() };
	if !is_read(&method) {
		return method_not_allowed("GET,HEAD");
	}
	match state.store.load(&title) {
		Ok(page) => render(&state, VIEW, &page),
		Err(StoreError::NotFound(_)) => found(format!("/edit/{}", title)),
		Err(err) => store_failure(err),
	}
}

async fn edit_page(State(state): State<Arc<AppState>>, method: Method, segment: Option<Path<String>>) -> Response {
	let Some(title) = route_title("edit", segment) else { return StatusCode::NOT_FOUND.into_response() };
	if !is_read(&method) {
		return method_not_allowed("GET,HEAD");
	}
	let page = match state.store.load(&title) {
		Ok(page) => page,
		Err(StoreError::NotFound(_)) => Page::blank(title),
		Err(err) => return store_failure(err),
	};
	render(&state, EDIT, &page)
}

/// A missing or non-form body saves an empty page.
async fn save_page(
	State(state): State<Arc<AppState>>,
	method: Method,
	segment: Option<Path<String>>,
	form: Option<Form<SaveForm>>,
) -> Response {
	let Some(title) = route_title("save", segment) else { return StatusCode::NOT_FOUND.into_response() };
	if method != Method::POST {
		return method_not_allowed("POST");
	}
	let body = form.map(|Form(f)| f.body).unwrap_or_default();
	let page = Page::new(title, body);
	if let Err(err) = state.store.save(&page) {
		return store_failure(err);
	}
	found(format!("/view/{}", page.title))
}
