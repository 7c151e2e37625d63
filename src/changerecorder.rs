//! Component C: observes document mutations and replays them onto a
//! diagnostic store so diagnostics computed against an older version still
//! describe the right text after later edits.
//!
//! Grounded in `td-obs-recorder.h`/`.cc`. The five-method observer
//! interface there is represented here as a sum type, per spec.md §9's
//! explicit allowance for that encoding.

use std::collections::BTreeMap;

use tracing::{debug, trace};

use crate::coord::TextMCoord;
use crate::diagnostics::TextDocumentDiagnostics;
use crate::primitives::{DocumentVersion, LineIndex, PositiveLineCount};

/// One recorded mutation. `InsertText` keeps the inserted bytes even though
/// replay onto a diagnostic store only needs the length -- matching the
/// original, which keeps the text "in case I want to use this for
/// something else" (here: the incremental `didChange` encoder in
/// `client::document`).
#[derive(Debug, Clone)]
pub enum ChangeObservation {
	InsertLine { line: LineIndex },
	DeleteLine { line: LineIndex },
	InsertText { at: TextMCoord, text: Vec<u8> },
	DeleteText { at: TextMCoord, len_bytes: u32 },
	TotalChange { num_lines: PositiveLineCount },
}

impl ChangeObservation {
	fn apply_to_diagnostics(&self, diagnostics: &mut TextDocumentDiagnostics) {
		match self {
			ChangeObservation::InsertLine { line } => diagnostics.insert_lines(*line, 1),
			ChangeObservation::DeleteLine { line } => diagnostics.delete_lines(*line, 1),
			ChangeObservation::InsertText { at, text } => {
				diagnostics.insert_line_bytes(*at, text.len() as u32)
			}
			ChangeObservation::DeleteText { at, len_bytes } => {
				diagnostics.delete_line_bytes(*at, *len_bytes)
			}
			ChangeObservation::TotalChange { num_lines } => {
				diagnostics.clear_everything(*num_lines)
			}
		}
	}
}

/// The callback interface a text-document implementation invokes on every
/// mutation. Object-safe so a real text buffer can hold a `dyn` list of
/// observers; this crate's own `client::document::TextDocumentCore` is one
/// implementer, and `TextDocumentObservationRecorder` is another consumer
/// of the same events via direct calls (not a second observer
/// registration -- see DESIGN.md).
pub trait TextDocumentObserver {
	fn observe_insert_line(&mut self, line: LineIndex);
	fn observe_delete_line(&mut self, line: LineIndex);
	fn observe_insert_text(&mut self, at: TextMCoord, text: &[u8]);
	fn observe_delete_text(&mut self, at: TextMCoord, len_bytes: u32);
	fn observe_total_change(&mut self, num_lines: PositiveLineCount);
}

#[derive(Debug, Clone)]
struct AwaitingDiagnostics {
	num_lines: PositiveLineCount,
	change_sequence: Vec<ChangeObservation>,
}

/// Records the sequence of changes observed since each of several tracked
/// versions, so late-arriving diagnostics for any of them can be replayed
/// forward to the current document state.
#[derive(Debug, Default)]
pub struct TextDocumentObservationRecorder {
	awaiting: BTreeMap<DocumentVersion, AwaitingDiagnostics>,
}

impl TextDocumentObservationRecorder {
	pub fn new() -> Self {
		Self::default()
	}

	pub fn tracking_something(&self) -> bool {
		!self.awaiting.is_empty()
	}

	pub fn earliest_version(&self) -> Option<DocumentVersion> {
		self.awaiting.keys().next().copied()
	}

	pub fn is_tracking(&self, version: DocumentVersion) -> bool {
		self.awaiting.contains_key(&version)
	}

	pub fn tracked_versions(&self) -> Vec<DocumentVersion> {
		self.awaiting.keys().copied().collect()
	}

	/// Track all future changes as applying on top of `version`, which has
	/// `num_lines` lines. A no-op (with a trace log) if already tracking.
	pub fn begin_tracking(&mut self, version: DocumentVersion, num_lines: PositiveLineCount) {
		if self.awaiting.contains_key(&version) {
			trace!(?version, "already tracking this version; ignoring begin_tracking");
			return;
		}
		self.awaiting.insert(version, AwaitingDiagnostics { num_lines, change_sequence: Vec::new() });
	}

	/// Append `observation` to the most-recently-begun tracked version.
	/// No-op if nothing is being tracked.
	fn add_observation(&mut self, observation: ChangeObservation) {
		if let Some((_, details)) = self.awaiting.iter_mut().next_back() {
			details.change_sequence.push(observation);
		}
	}

	/// Apply the recorded changes to `diagnostics`, which carries the
	/// version it was produced for. Discards tracked versions strictly
	/// older than that origin version, confines the store to the
	/// origin's line count, replays every change from every remaining
	/// tracked version in ascending order, then discards the entry for
	/// the origin version specifically (later ones remain).
	///
	/// Requires: `is_tracking(diagnostics.origin_version())`.
	pub fn apply_changes_to_diagnostics(&mut self, diagnostics: &mut TextDocumentDiagnostics) {
		let origin = diagnostics.origin_version();
		assert!(self.is_tracking(origin), "not tracking the diagnostics' origin version {:?}", origin);

		let stale: Vec<DocumentVersion> =
			self.awaiting.range(..origin).map(|(v, _)| *v).collect();
		for v in stale {
			self.awaiting.remove(&v);
		}

		let origin_details = self.awaiting.get(&origin).expect("checked above");
		diagnostics.set_num_lines_and_adjust_accordingly(origin_details.num_lines);

		for (version, details) in self.awaiting.iter() {
			debug!(?version, changes = details.change_sequence.len(), "replaying changes onto diagnostics");
			for change in &details.change_sequence {
				change.apply_to_diagnostics(diagnostics);
			}
		}

		self.awaiting.remove(&origin);
	}
}

impl TextDocumentObserver for TextDocumentObservationRecorder {
	fn observe_insert_line(&mut self, line: LineIndex) {
		if self.tracking_something() {
			self.add_observation(ChangeObservation::InsertLine { line });
		}
	}

	fn observe_delete_line(&mut self, line: LineIndex) {
		if self.tracking_something() {
			self.add_observation(ChangeObservation::DeleteLine { line });
		}
	}

	fn observe_insert_text(&mut self, at: TextMCoord, text: &[u8]) {
		if self.tracking_something() {
			self.add_observation(ChangeObservation::InsertText { at, text: text.to_vec() });
		}
	}

	fn observe_delete_text(&mut self, at: TextMCoord, len_bytes: u32) {
		if self.tracking_something() {
			self.add_observation(ChangeObservation::DeleteText { at, len_bytes });
		}
	}

	fn observe_total_change(&mut self, num_lines: PositiveLineCount) {
		if self.tracking_something() {
			self.add_observation(ChangeObservation::TotalChange { num_lines });
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::primitives::ByteIndex;

	fn v(n: u64) -> DocumentVersion {
		DocumentVersion(n)
	}

	#[test]
	fn replays_changes_in_order_and_discards_origin() {
		let mut rec = TextDocumentObservationRecorder::new();
		rec.begin_tracking(v(1), PositiveLineCount::new(3));

		rec.observe_insert_line(LineIndex(0));
		rec.observe_insert_text(TextMCoord::new(LineIndex(1), ByteIndex(0)), b"hi");

		let mut diags = TextDocumentDiagnostics::new(v(1));
		diags.insert(
			crate::coord::TextMCoordRange::new(
				TextMCoord::new(LineIndex(1), ByteIndex(0)),
				TextMCoord::new(LineIndex(1), ByteIndex(3)),
			),
			crate::diagnostics::DiagnosticRecord { message: "x".into(), related: Vec::new() },
		);

		rec.apply_changes_to_diagnostics(&mut diags);
		assert!(!rec.is_tracking(v(1)));

		// insert_line(0) shifted the diagnostic from line1 to line2, then
		// insert_text at (1,0) with len 2 is irrelevant to the now-shifted
		// line2 entry.
		let entries = diags.get_line_entries(LineIndex(2));
		assert_eq!(entries.len(), 1);
	}

	#[test]
	fn begin_tracking_twice_is_a_noop() {
		let mut rec = TextDocumentObservationRecorder::new();
		rec.begin_tracking(v(1), PositiveLineCount::new(1));
		rec.observe_insert_line(LineIndex(0));
		rec.begin_tracking(v(1), PositiveLineCount::new(99));
		// still only tracking one version, with the original line count
		assert_eq!(rec.tracked_versions(), vec![v(1)]);
	}

	#[test]
	fn later_tracked_versions_survive_consuming_an_earlier_one() {
		let mut rec = TextDocumentObservationRecorder::new();
		rec.begin_tracking(v(1), PositiveLineCount::new(1));
		rec.begin_tracking(v(2), PositiveLineCount::new(1));

		let mut diags = TextDocumentDiagnostics::new(v(1));
		rec.apply_changes_to_diagnostics(&mut diags);

		assert!(!rec.is_tracking(v(1)));
		assert!(rec.is_tracking(v(2)));
	}
}
