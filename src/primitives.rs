//! Newtype wrappers enforcing the 0-based/1-based, index/count distinctions
//! called out in the design notes. None of this is an algorithmic idea; it
//! exists purely so the "index vs. number" bug class is caught at compile
//! time rather than at a debugger breakpoint.

use std::fmt;

macro_rules! index_newtype {
	($name:ident, $repr:ty) => {
		#[derive(Copy, Clone, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
		pub struct $name(pub $repr);

		impl $name {
			pub const ZERO: Self = Self(0);

			pub fn new(v: $repr) -> Self {
				Self(v)
			}

			pub fn get(self) -> $repr {
				self.0
			}

			pub fn checked_add(self, rhs: $repr) -> Option<Self> {
				self.0.checked_add(rhs).map(Self)
			}

			pub fn checked_sub(self, rhs: $repr) -> Option<Self> {
				self.0.checked_sub(rhs).map(Self)
			}
		}

		impl fmt::Debug for $name {
			fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
				write!(f, "{}({})", stringify!($name), self.0)
			}
		}

		impl From<$repr> for $name {
			fn from(v: $repr) -> Self {
				Self(v)
			}
		}
	};
}

// 0-based byte offset within a line.
index_newtype!(ByteIndex, u32);
// A count of bytes (a length, or a displacement).
index_newtype!(ByteCount, u32);
// A signed difference between two byte indices.
index_newtype!(ByteDifference, i32);

// 0-based line index within a document.
index_newtype!(LineIndex, u32);
// A count of lines.
index_newtype!(LineCount, u32);
// A signed difference between two line indices (or line numbers).
index_newtype!(LineDifference, i32);

impl ByteIndex {
	/// Shift this index by a signed displacement, never producing a
	/// negative result. Used by the range map when boundaries move under
	/// an edit.
	pub fn shifted(self, delta: ByteDifference) -> Self {
		let v = self.0 as i64 + delta.get() as i64;
		debug_assert!(v >= 0, "byte index underflow");
		Self(v.max(0) as u32)
	}
}

impl LineIndex {
	pub fn shifted(self, delta: LineDifference) -> Self {
		let v = self.0 as i64 + delta.get() as i64;
		debug_assert!(v >= 0, "line index underflow");
		Self(v.max(0) as u32)
	}
}

/// A 1-based line number, as surfaced in diagnostics and related-location
/// messages. `LineNumber::from(LineIndex(0)) == LineNumber(1)`.
#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct LineNumber(pub u32);

impl From<LineIndex> for LineNumber {
	fn from(i: LineIndex) -> Self {
		LineNumber(i.0 + 1)
	}
}

/// A document must always have at least one line (an empty file is "one
/// empty line"), so the known document shape is carried as this type
/// rather than a plain `LineCount`.
#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct PositiveLineCount(u32);

impl PositiveLineCount {
	pub fn new(n: u32) -> Self {
		assert!(n >= 1, "a document has at least one line");
		Self(n)
	}

	pub fn get(self) -> u32 {
		self.0
	}

	/// The valid line-index range for a document of this shape, `[0, n)`.
	pub fn last_line(self) -> LineIndex {
		LineIndex(self.0 - 1)
	}
}

/// A document-mutation version number, monotonically increasing,
/// maintained internally as 64-bit but required to fit in a signed 32-bit
/// integer when serialized to the wire (the LSP `version` field).
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct DocumentVersion(pub u64);

impl DocumentVersion {
	pub fn next(self) -> Self {
		Self(self.0 + 1)
	}

	/// Convert to the wire representation, failing if the version has
	/// grown beyond what an `i32` can hold.
	pub fn to_lsp(self) -> Result<i32, crate::error::Error> {
		i32::try_from(self.0).map_err(|_| crate::error::Error::Misuse(format!(
			"document version {} does not fit in the LSP wire representation",
			self.0
		)))
	}
}
