//! Component F: the diagnostic store. Wraps the range map (component B)
//! with a parallel, append-only vector of diagnostics.
//!
//! Grounded in `td-diagnostics.h`.

use std::path::PathBuf;

use crate::coord::{TextMCoord, TextMCoordRange};
use crate::primitives::{ByteCount, DocumentVersion, LineIndex, LineNumber, PositiveLineCount};
use crate::rangemap::{DocumentShape, LineEntry, TextMCoordMap, Value};

/// A related location attached to a diagnostic, e.g. "see also" pointing
/// at a macro definition. Grounded in `TDD_Related`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelatedLocation {
	pub file: PathBuf,
	pub line: LineNumber,
	pub message: String,
}

/// One diagnostic's payload (its range lives in the range map, keyed by
/// the vector index). Grounded in `TDD_Diagnostic`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiagnosticRecord {
	pub message: String,
	pub related: Vec<RelatedLocation>,
}

/// Which direction to search in `get_adjacent_diagnostic_location`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdjacentDirection {
	Next,
	Previous,
}

/// A `(range, diagnostic)` view produced by `get_line_entries`, keeping
/// the same start/end-absent convention as the underlying `LineEntry`.
#[derive(Debug, Clone)]
pub struct DiagnosticLineEntry<'a> {
	pub start_byte: Option<crate::primitives::ByteIndex>,
	pub end_byte: Option<crate::primitives::ByteIndex>,
	pub diagnostic: &'a DiagnosticRecord,
}

/// Holds diagnostics for one document version, backed by a range map whose
/// values are indices into `diagnostics`.
#[derive(Debug)]
pub struct TextDocumentDiagnostics {
	origin_version: DocumentVersion,
	diagnostics: Vec<DiagnosticRecord>,
	range_to_diag_index: TextMCoordMap,
}

impl TextDocumentDiagnostics {
	pub fn new(origin_version: DocumentVersion) -> Self {
		Self { origin_version, diagnostics: Vec::new(), range_to_diag_index: TextMCoordMap::new() }
	}

	pub fn origin_version(&self) -> DocumentVersion {
		self.origin_version
	}

	pub fn num_lines_opt(&self) -> Option<PositiveLineCount> {
		self.range_to_diag_index.known_shape()
	}

	pub fn is_empty(&self) -> bool {
		self.diagnostics.is_empty()
	}

	pub fn len(&self) -> usize {
		self.diagnostics.len()
	}

	/// Drop everything and reset the known shape.
	pub fn clear_everything(&mut self, num_lines: PositiveLineCount) {
		self.diagnostics.clear();
		self.range_to_diag_index.clear_everything(Some(num_lines));
	}

	/// Append `diag` and register `(range, new-index)` in the map.
	pub fn insert(&mut self, range: TextMCoordRange, diag: DiagnosticRecord) {
		let idx = self.diagnostics.len();
		self.diagnostics.push(diag);
		self.range_to_diag_index.insert(range, Value(idx as u32));
	}

	pub fn get_line_entries(&self, line: LineIndex) -> Vec<DiagnosticLineEntry<'_>> {
		self.range_to_diag_index
			.get_line_entries(line)
			.into_iter()
			.map(|e: LineEntry| DiagnosticLineEntry {
				start_byte: e.start_byte,
				end_byte: e.end_byte,
				diagnostic: &self.diagnostics[e.value.0 as usize],
			})
			.collect()
	}

	pub fn get_all_entries(&self) -> Vec<(TextMCoordRange, &DiagnosticRecord)> {
		self.range_to_diag_index
			.get_all_entries()
			.into_iter()
			.map(|(range, v)| (range, &self.diagnostics[v.0 as usize]))
			.collect()
	}

	/// Pick one diagnostic whose range contains `tc`; tie-break by smaller
	/// distance-from-start, then smaller distance-to-end, then arbitrary
	/// (first found).
	pub fn get_diagnostic_at(&self, tc: TextMCoord) -> Option<(TextMCoordRange, &DiagnosticRecord)> {
		self.get_all_entries()
			.into_iter()
			.filter(|(range, _)| range.contains_or_at_collapsed(tc))
			.min_by(|(a, _), (b, _)| {
				let da = distance(a.start, tc);
				let db = distance(b.start, tc);
				da.cmp(&db).then_with(|| distance(tc, a.end).cmp(&distance(tc, b.end)))
			})
	}

	/// Walk the set of start coordinates and return the nearest one
	/// after/before `tc`.
	pub fn get_adjacent_diagnostic_location(
		&self,
		direction: AdjacentDirection,
		tc: TextMCoord,
	) -> Option<TextMCoord> {
		let mut starts: Vec<TextMCoord> = self.get_all_entries().into_iter().map(|(r, _)| r.start).collect();
		starts.sort();
		starts.dedup();

		match direction {
			AdjacentDirection::Next => starts.into_iter().find(|s| *s > tc),
			AdjacentDirection::Previous => starts.into_iter().rev().find(|s| *s < tc),
		}
	}

	/// Set the line count, clamping any existing range line indices into
	/// the new shape. Used by the change recorder to prime a diagnostic
	/// set for a specific origin version before replaying changes.
	pub fn set_num_lines_and_adjust_accordingly(&mut self, num_lines: PositiveLineCount) {
		self.range_to_diag_index.set_num_lines_and_confine(num_lines);
	}

	/// Forcibly confine every range so both endpoints are valid
	/// coordinates in `doc`.
	pub fn adjust_for_document<D: DocumentShape>(&mut self, doc: &D) {
		self.range_to_diag_index.adjust_for_document(doc);
	}

	pub fn insert_lines(&mut self, line: LineIndex, count: u32) {
		self.range_to_diag_index.insert_lines(line, count);
	}

	pub fn delete_lines(&mut self, line: LineIndex, count: u32) {
		self.range_to_diag_index.delete_lines(line, count);
	}

	pub fn insert_line_bytes(&mut self, tc: TextMCoord, n: u32) {
		self.range_to_diag_index.insert_line_bytes(tc, n);
	}

	pub fn delete_line_bytes(&mut self, tc: TextMCoord, n: u32) {
		self.range_to_diag_index.delete_line_bytes(tc, n);
	}
}

fn distance(a: TextMCoord, b: TextMCoord) -> (u32, u32) {
	let line_diff = a.line.get().abs_diff(b.line.get());
	let byte_diff = if a.line == b.line { a.byte_index.get().abs_diff(b.byte_index.get()) } else { u32::MAX };
	(line_diff, byte_diff)
}

/// Satisfies `rangemap::DocumentShape` for any caller that only knows a
/// flat list of per-line byte lengths (e.g. a test fixture).
pub struct FlatDocumentShape {
	pub line_lengths: Vec<ByteCount>,
}

impl DocumentShape for FlatDocumentShape {
	fn num_lines(&self) -> PositiveLineCount {
		PositiveLineCount::new(self.line_lengths.len().max(1) as u32)
	}

	fn line_len_bytes(&self, line: LineIndex) -> ByteCount {
		self.line_lengths.get(line.get() as usize).copied().unwrap_or(ByteCount(0))
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::primitives::ByteIndex;

	fn tc(l: u32, b: u32) -> TextMCoord {
		TextMCoord::new(LineIndex(l), ByteIndex(b))
	}

	#[test]
	fn insert_and_lookup() {
		let mut d = TextDocumentDiagnostics::new(DocumentVersion(1));
		d.insert(
			TextMCoordRange::new(tc(0, 0), tc(0, 3)),
			DiagnosticRecord { message: "boom".into(), related: Vec::new() },
		);
		let (range, diag) = d.get_diagnostic_at(tc(0, 1)).unwrap();
		assert_eq!(range, TextMCoordRange::new(tc(0, 0), tc(0, 3)));
		assert_eq!(diag.message, "boom");
	}

	#[test]
	fn delete_lines_collapses_diagnostic_onto_surviving_line() {
		let mut d = TextDocumentDiagnostics::new(DocumentVersion(1));
		d.insert(
			TextMCoordRange::new(tc(1, 0), tc(1, 5)),
			DiagnosticRecord { message: "gone-line".into(), related: Vec::new() },
		);
		d.delete_lines(LineIndex(0), 2);
		let (range, _) = d.get_all_entries().into_iter().next().unwrap();
		assert_eq!(range, TextMCoordRange::new(tc(0, 0), tc(0, 0)));
	}

	#[test]
	fn adjacent_diagnostic_location_walks_start_coordinates() {
		let mut d = TextDocumentDiagnostics::new(DocumentVersion(1));
		d.insert(TextMCoordRange::new(tc(0, 0), tc(0, 1)), DiagnosticRecord { message: "a".into(), related: Vec::new() });
		d.insert(TextMCoordRange::new(tc(5, 0), tc(5, 1)), DiagnosticRecord { message: "b".into(), related: Vec::new() });
		assert_eq!(d.get_adjacent_diagnostic_location(AdjacentDirection::Next, tc(2, 0)), Some(tc(5, 0)));
		assert_eq!(d.get_adjacent_diagnostic_location(AdjacentDirection::Previous, tc(2, 0)), Some(tc(0, 0)));
	}
}
