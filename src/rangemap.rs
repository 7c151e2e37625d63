//! Component B: a coordinate-indexed range map. Stores `(Range, Value)`
//! associations and rewrites them as line/byte edits occur.
//!
//! Grounded directly on `textmcoord-map.h`/`.cc`: per-line storage split
//! into single-line spans, start-boundaries, continuation markers, and
//! end-boundaries, so that the common case (single-line ranges) never
//! touches more than one line's data on insert, and byte-level edits only
//! touch the edited line(s).

use std::collections::{BTreeSet, HashSet};

use tracing::trace;

use crate::coord::{TextMCoord, TextMCoordRange};
use crate::primitives::{ByteDifference, ByteIndex, LineIndex, PositiveLineCount};

/// An opaque, caller-assigned index. The map never interprets this value;
/// callers use it as an index into their own parallel array (see
/// `diagnostics::TextDocumentDiagnostics`, which uses it as a diagnostic
/// index).
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Value(pub u32);

/// A dereferenced entry returned by `get_line_entries`/`get_all_entries`:
/// a `(range, value)` pair for a fully-reconstructed range, or the partial
/// view of a multi-line range as it crosses one line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LineEntry {
	/// Absent when the range enters this line from above (a continuation
	/// or an end-only boundary): the visible portion starts at byte 0.
	pub start_byte: Option<ByteIndex>,
	/// Absent when the range leaves this line below (a continuation or a
	/// start-only boundary): the visible portion runs to end of line.
	pub end_byte: Option<ByteIndex>,
	pub value: Value,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
struct SingleLineSpan {
	start: ByteIndex,
	end: ByteIndex,
	value: Value,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
struct Boundary {
	byte_index: ByteIndex,
	value: Value,
}

#[derive(Debug, Clone, Default)]
struct LineData {
	single_line_spans: Vec<SingleLineSpan>,
	starts_here: Vec<Boundary>,
	continues_here: HashSet<Value>,
	ends_here: Vec<Boundary>,
}

impl LineData {
	fn is_empty(&self) -> bool {
		self.single_line_spans.is_empty()
			&& self.starts_here.is_empty()
			&& self.continues_here.is_empty()
			&& self.ends_here.is_empty()
	}

	/// See `textmcoord-map.cc`'s `insertBytes_spans`: a span wholly at or
	/// after the insertion point shifts right; a span straddling it grows
	/// on its right edge; a span wholly before it is untouched.
	fn insert_bytes_spans(&mut self, ins_start: u32, len: u32) {
		let delta = ByteDifference(len as i32);
		for span in &mut self.single_line_spans {
			if ins_start <= span.start.get() {
				span.start = span.start.shifted(delta);
				span.end = span.end.shifted(delta);
			} else if ins_start > span.end.get() {
				// insertion strictly beyond the span; untouched
			} else {
				span.end = span.end.shifted(delta);
			}
		}
	}

	/// See `insertBytes_boundaries`. Both start- and end-boundaries at or
	/// after the insertion point shift right. This is the spot spec.md
	/// §4.B and the original source both flag as possibly counterintuitive
	/// for end-boundaries (`insStart == b.byteIndex` would arguably "feel"
	/// more natural if an end boundary did *not* shift, so that newly
	/// inserted text is excluded from the range) -- kept as-is verbatim,
	/// per the preserved Open Question.
	fn insert_bytes_boundaries(boundaries: &mut [Boundary], ins_start: u32, len: u32) {
		let delta = ByteDifference(len as i32);
		for b in boundaries {
			if ins_start <= b.byte_index.get() {
				b.byte_index = b.byte_index.shifted(delta);
			}
		}
	}

	fn insert_bytes(&mut self, ins_start: ByteIndex, len: u32) {
		self.insert_bytes_spans(ins_start.get(), len);
		Self::insert_bytes_boundaries(&mut self.starts_here, ins_start.get(), len);
		Self::insert_bytes_boundaries(&mut self.ends_here, ins_start.get(), len);
	}

	/// See `deleteBytes_spans`: the exhaustive case analysis for a span
	/// relative to a `[delStart, delEnd)` deletion window.
	fn delete_bytes_spans(&mut self, del_start: u32, len: u32) {
		let del_end = del_start + len;
		for span in &mut self.single_line_spans {
			let (s, e) = (span.start.get(), span.end.get());
			if del_start <= s {
				if del_end <= s {
					span.start = ByteIndex(s - len);
					span.end = ByteIndex(e - len);
				} else if del_end >= e {
					span.start = ByteIndex(del_start);
					span.end = ByteIndex(del_start);
				} else {
					let overhang = e - del_end;
					span.start = ByteIndex(del_start);
					span.end = ByteIndex(del_start + overhang);
				}
			} else if del_start >= e {
				// deletion strictly beyond the span; untouched
			} else if del_end < e {
				span.end = ByteIndex(e - len);
			} else {
				span.end = ByteIndex(del_start);
			}
		}
	}

	/// See `deleteBytes_boundaries`: a boundary strictly inside the
	/// deletion window collapses to the deletion start; one at or beyond
	/// the deletion end shifts left; one strictly before is untouched.
	fn delete_bytes_boundaries(boundaries: &mut [Boundary], del_start: u32, len: u32) {
		let del_end = del_start + len;
		for b in boundaries {
			let bi = b.byte_index.get();
			if del_start <= bi {
				if del_end <= bi {
					b.byte_index = ByteIndex(bi - len);
				} else {
					b.byte_index = ByteIndex(del_start);
				}
			}
			// else: strictly before the deletion, untouched
		}
	}

	fn delete_bytes(&mut self, del_start: ByteIndex, len: u32) {
		self.delete_bytes_spans(del_start.get(), len);
		Self::delete_bytes_boundaries(&mut self.starts_here, del_start.get(), len);
		Self::delete_bytes_boundaries(&mut self.ends_here, del_start.get(), len);
	}

	fn remove_end_get_byte_index(&mut self, v: Value) -> ByteIndex {
		let pos = self
			.ends_here
			.iter()
			.position(|b| b.value == v)
			.expect("no endpoint with specified value");
		self.ends_here.remove(pos).byte_index
	}

	fn single_line_span_entries(&self, line: LineIndex) -> Vec<(TextMCoordRange, Value)> {
		self.single_line_spans
			.iter()
			.map(|s| {
				(
					TextMCoordRange::new(
						TextMCoord::new(line, s.start),
						TextMCoord::new(line, s.end),
					),
					s.value,
				)
			})
			.collect()
	}

	fn line_entries(&self) -> Vec<LineEntry> {
		let mut out = Vec::new();
		for s in &self.single_line_spans {
			out.push(LineEntry { start_byte: Some(s.start), end_byte: Some(s.end), value: s.value });
		}
		for b in &self.starts_here {
			out.push(LineEntry { start_byte: Some(b.byte_index), end_byte: None, value: b.value });
		}
		for v in &self.continues_here {
			out.push(LineEntry { start_byte: None, end_byte: None, value: *v });
		}
		for b in &self.ends_here {
			out.push(LineEntry { start_byte: None, end_byte: Some(b.byte_index), value: b.value });
		}
		out
	}
}

/// A document shape, as needed by `adjust_for_document`: the minimal
/// information required to confine stale ranges to something valid.
pub trait DocumentShape {
	fn num_lines(&self) -> PositiveLineCount;
	fn line_len_bytes(&self, line: LineIndex) -> crate::primitives::ByteCount;
}

/// The range map itself. See the module documentation and spec.md §4.B.
#[derive(Debug, Clone, Default)]
pub struct TextMCoordMap {
	values: HashSet<Value>,
	line_data: Vec<LineData>,
	num_lines: Option<PositiveLineCount>,
}

impl TextMCoordMap {
	pub fn new() -> Self {
		Self::default()
	}

	pub fn is_empty(&self) -> bool {
		self.values.is_empty()
	}

	pub fn num_entries(&self) -> usize {
		self.values.len()
	}

	pub fn num_lines(&self) -> usize {
		self.line_data.len()
	}

	pub fn known_shape(&self) -> Option<PositiveLineCount> {
		self.num_lines
	}

	fn get_or_create(&mut self, line: LineIndex) -> &mut LineData {
		let idx = line.get() as usize;
		if idx >= self.line_data.len() {
			self.line_data.resize_with(idx + 1, LineData::default);
		}
		&mut self.line_data[idx]
	}

	fn get(&self, line: LineIndex) -> Option<&LineData> {
		self.line_data.get(line.get() as usize)
	}

	fn get_mut(&mut self, line: LineIndex) -> Option<&mut LineData> {
		self.line_data.get_mut(line.get() as usize)
	}

	/// `value` must not already be mapped. `range` need not be rectified;
	/// it is normalized before insertion (matching the original's
	/// `TextMCoordMap::insert`, which accepts a non-normalized range but
	/// stores it normalized).
	pub fn insert(&mut self, range: TextMCoordRange, value: Value) {
		assert!(!self.values.contains(&value), "value {:?} already mapped", value);
		self.values.insert(value);

		let range = range.normalized();
		trace!(?range, ?value, "rangemap insert");

		if range.start.line == range.end.line {
			self.get_or_create(range.start.line).single_line_spans.push(SingleLineSpan {
				start: range.start.byte_index,
				end: range.end.byte_index,
				value,
			});
		} else {
			self.get_or_create(range.start.line).starts_here.push(Boundary {
				byte_index: range.start.byte_index,
				value,
			});

			let mut l = range.start.line.get() + 1;
			while l < range.end.line.get() {
				self.get_or_create(LineIndex(l)).continues_here.insert(value);
				l += 1;
			}

			self.get_or_create(range.end.line).ends_here.push(Boundary {
				byte_index: range.end.byte_index,
				value,
			});
		}
	}

	/// Drop all entries; preserve the known document shape.
	pub fn clear_entries(&mut self) {
		self.values.clear();
		for ld in &mut self.line_data {
			*ld = LineData::default();
		}
	}

	/// Drop all entries and set a new shape.
	pub fn clear_everything(&mut self, num_lines: Option<PositiveLineCount>) {
		self.values.clear();
		self.line_data.clear();
		self.num_lines = num_lines;
	}

	/// Set the line count and clamp any existing range line indices to
	/// `[0, n-1]`, merging anything beyond the new last line onto it (same
	/// deposit logic as `delete_lines`, with the "deleted" region being
	/// everything from `n` to the old length).
	pub fn set_num_lines_and_confine(&mut self, n: PositiveLineCount) {
		self.num_lines = Some(n);
		let keep = n.get() as usize;
		if self.line_data.len() > keep {
			let overflow = self.line_data.len() - keep;
			// Reuse the deletion-and-deposit machinery: delete the
			// overflow lines starting at `keep`, which deposits their
			// contents onto the (possibly newly created) line `keep - 1`
			// ... but `delete_lines` deposits onto the line that *ends up*
			// at the deletion point, i.e. here there is no such line
			// (keep is the new end). Instead, deposit directly onto
			// `keep - 1`, the new last line.
			if keep == 0 {
				self.line_data.clear();
				return;
			}
			let target = LineIndex((keep - 1) as u32);
			self.merge_overflow_onto(keep, overflow, target);
			self.line_data.truncate(keep);
		}
	}

	/// Shared tail of `delete_lines` and `set_num_lines_and_confine`:
	/// collect every entry touching lines `[from, from+count)` and deposit
	/// it onto `target`, following the exact case analysis of the
	/// original's `deleteLines`.
	fn merge_overflow_onto(&mut self, from: usize, count: usize, target: LineIndex) {
		let mut single_line: Vec<Value> = Vec::new();
		let mut starts: BTreeSet<Value> = BTreeSet::new();
		let mut ends: BTreeSet<Value> = BTreeSet::new();

		for i in from..(from + count).min(self.line_data.len()) {
			let ld = &self.line_data[i];
			single_line.extend(ld.single_line_spans.iter().map(|s| s.value));
			starts.extend(ld.starts_here.iter().map(|b| b.value));
			ends.extend(ld.ends_here.iter().map(|b| b.value));
		}

		if single_line.is_empty() && starts.is_empty() && ends.is_empty() {
			return;
		}

		let below = self.get_or_create(target);

		for v in single_line {
			below.single_line_spans.push(SingleLineSpan { start: ByteIndex(0), end: ByteIndex(0), value: v });
		}

		for v in starts.iter().copied() {
			if ends.contains(&v) {
				below.single_line_spans.push(SingleLineSpan { start: ByteIndex(0), end: ByteIndex(0), value: v });
			} else if below.continues_here.remove(&v) {
				below.starts_here.push(Boundary { byte_index: ByteIndex(0), value: v });
			} else {
				let end_byte = below.remove_end_get_byte_index(v);
				below.single_line_spans.push(SingleLineSpan { start: ByteIndex(0), end: end_byte, value: v });
			}
		}

		for v in ends {
			if !starts.contains(&v) {
				below.ends_here.push(Boundary { byte_index: ByteIndex(0), value: v });
			}
		}
	}

	/// Forcibly confine every range so both endpoints are valid
	/// coordinates in `doc` and start <= end. Implemented by
	/// reconstructing all entries, clamping each endpoint independently,
	/// and reinserting -- acceptable since this is not a hot-path
	/// operation (only used when ranges may refer to a stale shape).
	pub fn adjust_for_document<D: DocumentShape>(&mut self, doc: &D) {
		let shape = doc.num_lines();
		let entries = self.get_all_entries();
		self.clear_everything(Some(shape));

		let clamp = |tc: TextMCoord| -> TextMCoord {
			let last = shape.last_line();
			let line = if tc.line > last { last } else { tc.line };
			let len = doc.line_len_bytes(line);
			let byte = if tc.byte_index.get() > len.get() { ByteIndex(len.get()) } else { tc.byte_index };
			TextMCoord::new(line, byte)
		};

		for (range, value) in entries {
			let start = clamp(range.start);
			let end = clamp(range.end);
			let range = TextMCoordRange::new(start, end).normalized();
			self.insert(range, value);
		}
	}

	/// `count` lines are inserted starting at `line`. See
	/// `textmcoord-map.cc`'s `insertLines`: the line immediately *above*
	/// the insertion point (`line - 1`) is consulted, and any span that
	/// starts there or continues through it gets spread as a continuation
	/// into every newly-opened line. Nothing below `line` needs touching
	/// since `LineData` is addressed by index and the vector splice itself
	/// does the shifting.
	pub fn insert_lines(&mut self, line: LineIndex, count: u32) {
		if count == 0 {
			return;
		}
		let idx = line.get() as usize;
		if idx >= self.line_data.len() {
			// No entries recorded this far down; nothing to shift or spread.
			return;
		}

		let above: Option<LineData> = idx.checked_sub(1).and_then(|i| self.line_data.get(i).cloned());

		let mut new_lines = vec![LineData::default(); count as usize];
		self.line_data.splice(idx..idx, new_lines.drain(..));

		if let Some(above) = above {
			let mut spread: HashSet<Value> = HashSet::new();
			spread.extend(above.starts_here.iter().map(|b| b.value));
			spread.extend(above.continues_here.iter().copied());
			if !spread.is_empty() {
				for i in idx..idx + count as usize {
					self.line_data[i].continues_here.extend(spread.iter().copied());
				}
			}
		}

		if let Some(n) = self.num_lines {
			self.num_lines = Some(PositiveLineCount::new(n.get() + count));
		}
	}

	/// `count` lines starting at `line` are removed. See `deleteLines`.
	pub fn delete_lines(&mut self, line: LineIndex, count: u32) {
		if count == 0 {
			return;
		}
		let idx = line.get() as usize;
		let mut single_line: Vec<Value> = Vec::new();
		let mut starts: BTreeSet<Value> = BTreeSet::new();
		let mut ends: BTreeSet<Value> = BTreeSet::new();

		for _ in 0..count {
			if idx >= self.line_data.len() {
				break;
			}
			let removed = self.line_data.remove(idx);
			single_line.extend(removed.single_line_spans.iter().map(|s| s.value));
			starts.extend(removed.starts_here.iter().map(|b| b.value));
			ends.extend(removed.ends_here.iter().map(|b| b.value));
		}

		if let Some(n) = self.num_lines {
			self.num_lines = Some(PositiveLineCount::new(n.get().saturating_sub(count)));
		}

		if single_line.is_empty() && starts.is_empty() && ends.is_empty() {
			return;
		}

		let below = self.get_or_create(line);

		for v in single_line {
			below.single_line_spans.push(SingleLineSpan { start: ByteIndex(0), end: ByteIndex(0), value: v });
		}

		for v in starts.iter().copied() {
			if ends.contains(&v) {
				below.single_line_spans.push(SingleLineSpan { start: ByteIndex(0), end: ByteIndex(0), value: v });
			} else if below.continues_here.remove(&v) {
				below.starts_here.push(Boundary { byte_index: ByteIndex(0), value: v });
			} else {
				let end_byte = below.remove_end_get_byte_index(v);
				below.single_line_spans.push(SingleLineSpan { start: ByteIndex(0), end: end_byte, value: v });
			}
		}

		for v in ends {
			if !starts.contains(&v) {
				below.ends_here.push(Boundary { byte_index: ByteIndex(0), value: v });
			}
		}
	}

	pub fn insert_line_bytes(&mut self, tc: TextMCoord, n: u32) {
		if n == 0 {
			return;
		}
		if let Some(ld) = self.get_mut(tc.line) {
			ld.insert_bytes(tc.byte_index, n);
		}
	}

	pub fn delete_line_bytes(&mut self, tc: TextMCoord, n: u32) {
		if n == 0 {
			return;
		}
		if let Some(ld) = self.get_mut(tc.line) {
			ld.delete_bytes(tc.byte_index, n);
		}
	}

	/// Every entry intersecting `line`.
	pub fn get_line_entries(&self, line: LineIndex) -> Vec<LineEntry> {
		match self.get(line) {
			Some(ld) => ld.line_entries(),
			None => Vec::new(),
		}
	}

	/// Reconstruct the full set of `(Range, Value)` pairs.
	pub fn get_all_entries(&self) -> Vec<(TextMCoordRange, Value)> {
		let mut ret = Vec::new();
		let mut open: std::collections::HashMap<Value, TextMCoord> = std::collections::HashMap::new();

		for (i, ld) in self.line_data.iter().enumerate() {
			let line = LineIndex(i as u32);
			for (range, value) in ld.single_line_span_entries(line) {
				ret.push((range, value));
			}
			for b in &ld.starts_here {
				open.insert(b.value, TextMCoord::new(line, b.byte_index));
			}
			for b in &ld.ends_here {
				let start = open.remove(&b.value).expect("end boundary with no matching start");
				ret.push((TextMCoordRange::new(start, TextMCoord::new(line, b.byte_index)), b.value));
			}
		}

		debug_assert!(open.is_empty(), "unterminated multi-line range(s)");
		ret
	}

	/// Verify invariant I3 by a linear scan, mirroring the original's
	/// `selfCheck`. Intended for test/debug use, not the hot path.
	pub fn self_check(&self) {
		let mut seen: HashSet<Value> = HashSet::new();
		let mut active: HashSet<Value> = HashSet::new();

		for ld in &self.line_data {
			for s in &ld.single_line_spans {
				assert!(seen.insert(s.value), "value {:?} seen twice", s.value);
			}

			let mut started: HashSet<Value> = HashSet::new();
			for b in &ld.starts_here {
				assert!(seen.insert(b.value), "value {:?} started twice", b.value);
				started.insert(b.value);
			}

			let mut continued: HashSet<Value> = HashSet::new();
			for v in &ld.continues_here {
				assert!(seen.contains(v));
				assert!(active.contains(v));
				assert!(!started.contains(v));
				continued.insert(*v);
			}

			let mut ended: HashSet<Value> = HashSet::new();
			for b in &ld.ends_here {
				assert!(seen.contains(&b.value));
				assert!(active.contains(&b.value));
				assert!(!started.contains(&b.value));
				assert!(!continued.contains(&b.value));
				ended.insert(b.value);
			}

			let union: HashSet<Value> = continued.union(&ended).copied().collect();
			assert_eq!(&union, &active, "every active value must be continued or ended");

			for v in ended {
				active.remove(&v);
			}
			active.extend(started);
		}

		assert_eq!(seen, self.values);
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	fn tc(l: u32, b: u32) -> TextMCoord {
		TextMCoord::new(LineIndex(l), ByteIndex(b))
	}

	fn r(sl: u32, sb: u32, el: u32, eb: u32) -> TextMCoordRange {
		TextMCoordRange::new(tc(sl, sb), tc(el, eb))
	}

	#[test]
	fn single_line_insert_and_get() {
		let mut m = TextMCoordMap::new();
		m.insert(r(0, 1, 0, 3), Value(0));
		m.self_check();
		let entries = m.get_line_entries(LineIndex(0));
		assert_eq!(entries.len(), 1);
		assert_eq!(entries[0].start_byte, Some(ByteIndex(1)));
		assert_eq!(entries[0].end_byte, Some(ByteIndex(3)));
	}

	#[test]
	fn multi_line_insert_all_entries_roundtrip() {
		let mut m = TextMCoordMap::new();
		m.insert(r(0, 2, 3, 1), Value(0));
		m.self_check();
		let all = m.get_all_entries();
		assert_eq!(all, vec![(r(0, 2, 3, 1), Value(0))]);
	}

	#[test]
	fn insert_lines_shifts_below_and_spreads_continuation() {
		let mut m = TextMCoordMap::new();
		// value spans lines 0..3 (continuation on line 1, end on 2)
		m.insert(r(0, 0, 2, 0), Value(0));
		m.insert_lines(LineIndex(1), 2);
		m.self_check();
		let all = m.get_all_entries();
		assert_eq!(all, vec![(r(0, 0, 4, 0), Value(0))]);
	}

	#[test]
	fn delete_lines_collapses_fully_contained_range_to_zero_length() {
		let mut m = TextMCoordMap::new();
		m.insert(r(1, 0, 1, 5), Value(0));
		m.delete_lines(LineIndex(0), 2);
		m.self_check();
		let all = m.get_all_entries();
		assert_eq!(all, vec![(r(0, 0, 0, 0), Value(0))]);
	}

	#[test]
	fn delete_lines_converts_straddling_start_into_start_at_zero() {
		let mut m = TextMCoordMap::new();
		// range from line 1 to line 3; delete lines 0..2 (removes the start
		// line); the value should now start at byte 0 of the line that
		// ends up at index 0.
		m.insert(r(1, 4, 3, 0), Value(0));
		m.delete_lines(LineIndex(0), 2);
		m.self_check();
		let all = m.get_all_entries();
		assert_eq!(all, vec![(r(0, 0, 1, 0), Value(0))]);
	}

	#[test]
	fn insert_line_bytes_shifts_boundary_at_insertion_point_right() {
		// Exercises the documented, intentionally-kept asymmetry: an
		// end-boundary exactly at the insertion point shifts right too.
		let mut m = TextMCoordMap::new();
		m.insert(r(0, 0, 0, 5), Value(0));
		m.insert_line_bytes(tc(0, 5), 3);
		m.self_check();
		let all = m.get_all_entries();
		assert_eq!(all, vec![(r(0, 0, 0, 8), Value(0))]);
	}

	#[test]
	fn delete_line_bytes_collapses_interior_boundary_to_start() {
		let mut m = TextMCoordMap::new();
		m.insert(r(0, 2, 0, 8), Value(0));
		m.delete_line_bytes(tc(0, 1), 4);
		m.self_check();
		let all = m.get_all_entries();
		assert_eq!(all, vec![(r(0, 1, 0, 4), Value(0))]);
	}
}
