//! `file://` URI handling. Grounded in `uri-util.h`/`.cc`: no percent-
//! encoding, no query, no user-info; a Windows-style path gets its leading
//! `/` dropped when converting a URI back to a native path.

use std::path::{Path, PathBuf};

use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum UriError {
	#[error("URI has a user-info part but that is not supported")]
	HasUserInfo,

	#[error("URI does not begin with `file://`")]
	NotFileScheme,

	#[error("URI uses percent-encoding but that is not supported")]
	HasPercentEncoding,

	#[error("URI has a query part but that is not supported")]
	HasQuery,

	#[error("path does not begin with `/`")]
	NotAbsolute,
}

/// Whether to additionally apply a cygwin-to-Windows conversion at the
/// URI boundary. Selected per-language by `EnvConfig::uri_path_semantics`
/// (via `SM_EDITOR_PYLSP_IS_CYGWIN`); the `Cygwin` variant only matters on
/// a host that understands cygwin path conventions, and choosing it is
/// additive over `Normal`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum UriPathSemantics {
	#[default]
	Normal,
	Cygwin,
}

/// Build a `file://` URI for an absolute, normalized path. A Windows-style
/// drive path (`C:/foo`) becomes `/C:/foo` in the URI, as `file://` URIs
/// require a leading slash before the authority-less path.
pub fn make_file_uri(path: &Path, semantics: UriPathSemantics) -> String {
	let mut s = path.to_string_lossy().replace('\\', "/");

	if semantics == UriPathSemantics::Cygwin {
		s = windows_to_cygdrive(&s);
	}

	if !s.starts_with('/') {
		s = format!("/{s}");
	}

	format!("file://{s}")
}

/// Invert `make_file_uri`. Grounded verbatim on `getFileURIPath`: rejects
/// user-info, percent-encoding, and queries; a `/C:/foo` path has its
/// leading slash dropped.
pub fn get_file_uri_path(uri: &str, semantics: UriPathSemantics) -> Result<PathBuf, UriError> {
	if uri.contains('@') {
		return Err(UriError::HasUserInfo);
	}
	if !uri.starts_with("file://") {
		return Err(UriError::NotFileScheme);
	}

	let path = &uri[7..];

	if path.contains('%') {
		return Err(UriError::HasPercentEncoding);
	}
	if path.contains('?') {
		return Err(UriError::HasQuery);
	}
	if !path.starts_with('/') {
		return Err(UriError::NotAbsolute);
	}

	let native = if is_windows_drive_path(path) {
		path[1..].to_string()
	} else {
		path.to_string()
	};

	let native = if semantics == UriPathSemantics::Cygwin {
		cygdrive_to_windows(&native)
	} else {
		native
	};

	Ok(PathBuf::from(native))
}

/// `path[2] == ':' && path[3] == '/'` after the leading slash, i.e. the
/// uri-path looks like `/C:/...`.
fn is_windows_drive_path(path: &str) -> bool {
	let bytes = path.as_bytes();
	bytes.len() >= 4 && bytes[2] == b':' && bytes[3] == b'/'
}

/// `/cygdrive/c/foo` -> `C:/foo`. Not present in the upstream source (only
/// the `Normal` path is); this is a minimal, additive implementation of
/// the cygwin half of spec.md §6's path-semantics switch.
fn cygdrive_to_windows(path: &str) -> String {
	let rest = match path.strip_prefix("/cygdrive/") {
		Some(r) => r,
		None => return path.to_string(),
	};
	let mut chars = rest.chars();
	let drive = match chars.next() {
		Some(c) if c.is_ascii_alphabetic() => c.to_ascii_uppercase(),
		_ => return path.to_string(),
	};
	let remainder = chars.as_str();
	if let Some(tail) = remainder.strip_prefix('/') {
		format!("{drive}:/{tail}")
	} else if remainder.is_empty() {
		format!("{drive}:/")
	} else {
		path.to_string()
	}
}

/// `C:/foo` -> `/cygdrive/c/foo`, the inverse used when composing a URI
/// under cygwin semantics.
fn windows_to_cygdrive(path: &str) -> String {
	let bytes = path.as_bytes();
	if bytes.len() >= 2 && bytes[0].is_ascii_alphabetic() && bytes[1] == b':' {
		let drive = (bytes[0] as char).to_ascii_lowercase();
		let rest = &path[2..];
		let rest = rest.strip_prefix('/').unwrap_or(rest);
		format!("/cygdrive/{drive}/{rest}")
	} else {
		path.to_string()
	}
}

/// Require `path` to be absolute with forward-slash separators, as
/// invariant I1 requires of every `DocumentRecord` path.
pub fn is_valid_lsp_path(path: &Path) -> bool {
	let s = path.to_string_lossy();
	path.is_absolute() && !s.contains('\\')
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn roundtrip_normal_absolute_path() {
		let p = Path::new("/a/b/c.rs");
		let uri = make_file_uri(p, UriPathSemantics::Normal);
		assert_eq!(uri, "file:///a/b/c.rs");
		let back = get_file_uri_path(&uri, UriPathSemantics::Normal).unwrap();
		assert_eq!(back, p);
	}

	#[test]
	fn windows_drive_path_roundtrip() {
		let uri = "file:///C:/Windows/system32";
		let path = get_file_uri_path(uri, UriPathSemantics::Normal).unwrap();
		assert_eq!(path, PathBuf::from("C:/Windows/system32"));
	}

	#[test]
	fn rejects_percent_encoding_and_query_and_userinfo() {
		assert_eq!(get_file_uri_path("file:///a%20b", UriPathSemantics::Normal), Err(UriError::HasPercentEncoding));
		assert_eq!(get_file_uri_path("file:///a?x=1", UriPathSemantics::Normal), Err(UriError::HasQuery));
		assert_eq!(get_file_uri_path("file://user@host/a", UriPathSemantics::Normal), Err(UriError::HasUserInfo));
	}

	#[test]
	fn cygwin_conversion_both_ways() {
		assert_eq!(cygdrive_to_windows("/cygdrive/c/foo"), "C:/foo");
		assert_eq!(windows_to_cygdrive("C:/foo"), "/cygdrive/c/foo");
	}
}
