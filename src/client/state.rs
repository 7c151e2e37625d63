//! The LSP client's protocol state machine. Grounded verbatim in
//! `lsp-protocol-state.h`.

use std::fmt;

/// Status of the client's protocol. Two "broken" states
/// (`ProtocolObjectMissing`, `ServerNotRunning`) are detectable via
/// `checkStatus`-style consistency checks but are never actively entered;
/// they represent an inconsistency between the process runner and
/// transport that should not occur.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProtocolState {
	/// Inactive; if previously active, the old server process has
	/// terminated.
	Inactive,
	/// Sent `initialize`, awaiting its reply.
	Initializing,
	/// Received the `initialize` reply and sent `initialized`; the server
	/// can service requests.
	Normal,
	/// Sent `shutdown`, awaiting its reply.
	Shutdown1,
	/// Sent `exit`, awaiting process termination.
	Shutdown2,
	/// The JSON-RPC transport detected a protocol error. Terminal.
	JsonRpcProtocolError,
	/// A protocol failure occurred in the LSP layer. Terminal.
	LspProtocolError,
	/// Broken: the transport object is missing while the client believes
	/// it is active.
	ProtocolObjectMissing,
	/// Broken: the process runner reports the server is not running
	/// despite the client believing otherwise.
	ServerNotRunning,
}

impl ProtocolState {
	pub fn is_terminal_error(self) -> bool {
		matches!(self, ProtocolState::JsonRpcProtocolError | ProtocolState::LspProtocolError)
	}

	pub fn is_broken(self) -> bool {
		matches!(self, ProtocolState::ProtocolObjectMissing | ProtocolState::ServerNotRunning)
	}

	pub fn is_normal(self) -> bool {
		matches!(self, ProtocolState::Normal)
	}

	fn describe(self) -> &'static str {
		match self {
			ProtocolState::Inactive => "no server process is running",
			ProtocolState::Initializing => "waiting for the server's `initialize` reply",
			ProtocolState::Normal => "the server is running and ready",
			ProtocolState::Shutdown1 => "waiting for the server's `shutdown` reply",
			ProtocolState::Shutdown2 => "sent `exit`, waiting for the process to terminate",
			ProtocolState::JsonRpcProtocolError => "a JSON-RPC protocol error occurred; the server must be restarted",
			ProtocolState::LspProtocolError => "an LSP protocol error occurred; the server must be restarted",
			ProtocolState::ProtocolObjectMissing => "internal inconsistency: the transport object is missing",
			ProtocolState::ServerNotRunning => "internal inconsistency: the process runner reports no server",
		}
	}
}

impl fmt::Display for ProtocolState {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "{:?}", self)
	}
}

/// Protocol state plus a human-readable description, possibly carrying
/// information beyond the bare enum (e.g. an attached error message).
#[derive(Debug, Clone)]
pub struct AnnotatedProtocolState {
	pub state: ProtocolState,
	pub description: String,
}

impl AnnotatedProtocolState {
	pub fn new(state: ProtocolState) -> Self {
		Self { state, description: state.describe().to_string() }
	}

	pub fn with_detail(state: ProtocolState, detail: impl Into<String>) -> Self {
		Self { state, description: format!("{}: {}", state.describe(), detail.into()) }
	}
}
