//! Per-document bookkeeping (`DocumentRecord`, grounded in
//! `LSPDocumentInfo`/`lsp-client.h`) and a minimal `Rope`-backed document
//! core that fires the five-method observer callback described in
//! `td-obs-recorder.h`, plus the LSP <-> model-coordinate conversions
//! ("lsp-conv" in the original) and the incremental `didChange` encoder.

use std::path::PathBuf;

use lsp_types::{Position, Range as LspRange, TextDocumentContentChangeEvent};
use ropey::Rope;

use crate::changerecorder::{ChangeObservation, TextDocumentObserver};
use crate::coord::{TextMCoord, TextMCoordRange};
use crate::primitives::{ByteCount, ByteIndex, DocumentVersion, LineIndex, PositiveLineCount};
use crate::rangemap::DocumentShape;

/// A minimal in-memory text buffer good enough to drive tests and the
/// incremental-`didChange` path. Not a production text-buffer (that
/// remains an external collaborator per the purpose/scope section); it
/// exists so this crate can exercise "replay equivalence" end-to-end
/// without depending on the editor's real buffer type.
pub struct TextDocumentCore {
	rope: Rope,
	observer: Option<Box<dyn TextDocumentObserver + Send>>,
}

impl TextDocumentCore {
	pub fn from_str(text: &str) -> Self {
		Self { rope: Rope::from_str(text), observer: None }
	}

	/// Register the sole observer for this document. The document does
	/// not own the observer (it outlives no one in particular here), but
	/// per the ownership note in the design notes, a real implementation
	/// would have the *document* own the recorder and only hand out a
	/// non-owning reference back to itself; this in-memory core inverts
	/// that for simplicity (see DESIGN.md).
	pub fn set_observer(&mut self, observer: Box<dyn TextDocumentObserver + Send>) {
		self.observer = Some(observer);
	}

	pub fn text(&self) -> String {
		self.rope.to_string()
	}

	pub fn num_lines(&self) -> PositiveLineCount {
		PositiveLineCount::new(self.rope.len_lines().max(1) as u32)
	}

	pub fn line_len_bytes(&self, line: LineIndex) -> ByteCount {
		let idx = line.get() as usize;
		if idx >= self.rope.len_lines() {
			return ByteCount(0);
		}
		let slice = self.rope.line(idx);
		// Exclude the line terminator itself from the reported length,
		// matching a model coordinate's "byte length of that line" sense.
		let s = slice.to_string();
		let trimmed = s.trim_end_matches(['\n', '\r']);
		ByteCount(trimmed.len() as u32)
	}

	fn char_idx_of(&self, tc: TextMCoord) -> usize {
		let line_char = self.rope.line_to_char(tc.line.get() as usize);
		let line_slice = self.rope.line(tc.line.get() as usize);
		let byte_off = tc.byte_index.get() as usize;
		line_char + line_slice.byte_to_char(byte_off)
	}

	pub fn insert_line(&mut self, line: LineIndex) {
		let char_idx = self.rope.line_to_char(line.get() as usize);
		self.rope.insert(char_idx, "\n");
		if let Some(o) = &mut self.observer {
			o.observe_insert_line(line);
		}
	}

	pub fn delete_line(&mut self, line: LineIndex) {
		let start = self.rope.line_to_char(line.get() as usize);
		let end = self.rope.line_to_char(line.get() as usize + 1);
		self.rope.remove(start..end);
		if let Some(o) = &mut self.observer {
			o.observe_delete_line(line);
		}
	}

	pub fn insert_text(&mut self, at: TextMCoord, text: &[u8]) {
		let char_idx = self.char_idx_of(at);
		let s = std::str::from_utf8(text).expect("inserted text must be valid UTF-8");
		self.rope.insert(char_idx, s);
		if let Some(o) = &mut self.observer {
			o.observe_insert_text(at, text);
		}
	}

	pub fn delete_text(&mut self, at: TextMCoord, len_bytes: u32) {
		let start = self.char_idx_of(at);
		let line_slice = self.rope.line(at.line.get() as usize);
		let end_byte = at.byte_index.get() as usize + len_bytes as usize;
		let end = self.rope.line_to_char(at.line.get() as usize) + line_slice.byte_to_char(end_byte.min(line_slice.len_bytes()));
		self.rope.remove(start..end);
		if let Some(o) = &mut self.observer {
			o.observe_delete_text(at, len_bytes);
		}
	}

	pub fn replace_all(&mut self, new_text: &str) {
		self.rope = Rope::from_str(new_text);
		if let Some(o) = &mut self.observer {
			o.observe_total_change(self.num_lines());
		}
	}
}

impl DocumentShape for TextDocumentCore {
	fn num_lines(&self) -> PositiveLineCount {
		TextDocumentCore::num_lines(self)
	}

	fn line_len_bytes(&self, line: LineIndex) -> ByteCount {
		TextDocumentCore::line_len_bytes(self, line)
	}
}

/// Convert an LSP `Position` (UTF-16 code units) to a model coordinate
/// (byte offset), given the document text it refers to.
pub fn lsp_position_to_coord(rope: &Rope, pos: Position) -> TextMCoord {
	let line_idx = pos.line as usize;
	let line = rope.line(line_idx.min(rope.len_lines().saturating_sub(1)));
	let char_off = line.utf16_cu_to_char(pos.character as usize);
	let byte_off = line.char_to_byte(char_off);
	TextMCoord::new(LineIndex(pos.line), ByteIndex(byte_off as u32))
}

pub fn coord_to_lsp_position(rope: &Rope, tc: TextMCoord) -> Position {
	let line = rope.line(tc.line.get() as usize);
	let char_off = line.byte_to_char(tc.byte_index.get() as usize);
	let utf16 = line.char_to_utf16_cu(char_off);
	Position::new(tc.line.get(), utf16 as u32)
}

pub fn lsp_range_to_coord_range(rope: &Rope, range: LspRange) -> TextMCoordRange {
	TextMCoordRange::new(lsp_position_to_coord(rope, range.start), lsp_position_to_coord(rope, range.end))
}

/// Translate one recorded `ChangeObservation` into the LSP incremental
/// `didChange` wire representation, against `rope` reflecting the
/// document state *before* the change (the state the observation's
/// coordinates are expressed in). Grounded in spec.md §8's "Replay
/// equivalence" testable property, which presupposes this encoder exists.
pub fn change_observation_to_lsp(rope: &Rope, change: &ChangeObservation) -> TextDocumentContentChangeEvent {
	match change {
		ChangeObservation::InsertLine { line } => {
			let at = Position::new(line.get(), 0);
			TextDocumentContentChangeEvent {
				range: Some(LspRange::new(at, at)),
				range_length: None,
				text: "\n".to_string(),
			}
		}
		ChangeObservation::DeleteLine { line } => {
			let start = Position::new(line.get(), 0);
			let end = Position::new(line.get() + 1, 0);
			TextDocumentContentChangeEvent { range: Some(LspRange::new(start, end)), range_length: None, text: String::new() }
		}
		ChangeObservation::InsertText { at, text } => {
			let pos = coord_to_lsp_position(rope, *at);
			TextDocumentContentChangeEvent {
				range: Some(LspRange::new(pos, pos)),
				range_length: None,
				text: String::from_utf8_lossy(text).into_owned(),
			}
		}
		ChangeObservation::DeleteText { at, len_bytes } => {
			let start = coord_to_lsp_position(rope, *at);
			let end_tc = TextMCoord::new(at.line, ByteIndex(at.byte_index.get() + len_bytes));
			let end = coord_to_lsp_position(rope, end_tc);
			TextDocumentContentChangeEvent { range: Some(LspRange::new(start, end)), range_length: None, text: String::new() }
		}
		ChangeObservation::TotalChange { .. } => {
			TextDocumentContentChangeEvent { range: None, range_length: None, text: String::new() }
		}
	}
}

/// One open document's server-facing state. Grounded in `LSPDocumentInfo`.
pub struct DocumentRecord {
	/// Invariant I1: always equal to the key this record is stored under.
	pub path: PathBuf,
	pub language_id: String,
	pub last_sent_version: DocumentVersion,
	pub last_sent_contents: TextDocumentCore,
	pub waiting_for_diagnostics: bool,
	pub pending_diagnostics: Option<lsp_types::PublishDiagnosticsParams>,
}

impl DocumentRecord {
	pub fn new(path: PathBuf, language_id: String, version: DocumentVersion, contents: &str) -> Self {
		Self {
			path,
			language_id,
			last_sent_version: version,
			last_sent_contents: TextDocumentCore::from_str(contents),
			waiting_for_diagnostics: true,
			pending_diagnostics: None,
		}
	}

	pub fn has_pending_diagnostics(&self) -> bool {
		self.pending_diagnostics.is_some()
	}

	pub fn last_sent_contents_string(&self) -> String {
		self.last_sent_contents.text()
	}

	pub fn last_contents_equals(&self, other: &str) -> bool {
		self.last_sent_contents_string() == other
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn insert_and_delete_line_updates_text() {
		let mut doc = TextDocumentCore::from_str("a\nb\nc\n");
		doc.insert_line(LineIndex(1));
		assert_eq!(doc.text(), "a\n\nb\nc\n");
		doc.delete_line(LineIndex(1));
		assert_eq!(doc.text(), "a\nb\nc\n");
	}

	#[test]
	fn insert_text_updates_byte_offsets() {
		let mut doc = TextDocumentCore::from_str("hello\n");
		doc.insert_text(TextMCoord::new(LineIndex(0), ByteIndex(5)), b"!");
		assert_eq!(doc.text(), "hello!\n");
	}

	#[test]
	fn lsp_position_roundtrips_through_byte_coordinate() {
		let rope = Rope::from_str("héllo\n");
		let pos = Position::new(0, 2);
		let tc = lsp_position_to_coord(&rope, pos);
		let back = coord_to_lsp_position(&rope, tc);
		assert_eq!(back, pos);
	}
}
