//! Crate-wide error composition, following the single-typed-enum-per-domain
//! pattern the rest of the workspace uses for configuration errors.

use thiserror::Error;

use crate::jsonrpc::ProtocolError;
use crate::process::ProcessError;

/// Top-level crate error. Each variant wraps a component's own error
/// domain; callers that only care about one component can match on
/// `ProcessError`/`ProtocolError`/`LspError` directly via `#[from]`.
#[derive(Debug, Error)]
pub enum Error {
	#[error(transparent)]
	Process(#[from] ProcessError),

	#[error(transparent)]
	Protocol(#[from] ProtocolError),

	#[error(transparent)]
	Lsp(#[from] LspError),

	#[error(transparent)]
	StartServer(#[from] StartServerError),

	/// A precondition was violated by the caller (e.g. `didChange` for a
	/// file that was never opened). Debug builds additionally assert;
	/// release builds return this variant.
	#[error("misuse: {0}")]
	Misuse(String),
}

/// The outcome of `LspClient::start_server`. Grounded in `fail-reason-opt.h`'s
/// `FailReasonOpt` (an optional human-readable failure string): starting the
/// server is synchronous up to the point the `initialize` request is
/// enqueued, so only spawn-time and transport-latched failures are reported
/// here. A failed or timed-out `initialize` *reply* arrives later, through
/// `pump_once`, and surfaces via `LspClient::status_line`/`pop_pending_error`
/// instead.
#[derive(Debug, Error)]
pub enum StartServerError {
	#[error("failed to start the server process: {0}")]
	Spawn(#[from] ProcessError),

	#[error("cannot start: {0}")]
	Transport(#[from] ProtocolError),

	#[error("start_server called while in state {0}")]
	WrongState(String),
}

/// Errors latched by the LSP client state machine (component E). Once one
/// of these occurs the client is in a terminal error state; the only
/// recovery is `forcibly_shut_down`.
#[derive(Debug, Error)]
pub enum LspError {
	#[error("server replied to `initialize` with an error: {0}")]
	InitializeFailed(String),

	#[error("server replied to `shutdown` with an error: {0}")]
	ShutdownFailed(String),

	#[error("received a reply with unexpected shape for method `{method}`: {detail}")]
	UnexpectedReplyShape { method: String, detail: String },
}

pub type Result<T> = std::result::Result<T, Error>;
