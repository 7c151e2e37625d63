//! Component E: the `LspClient` itself, tying together process
//! supervision (A), JSON-RPC transport (D), the range map (B) and
//! diagnostic store (F), the change recorder (C), and URI/config (the
//! "lsp-manager" glue). Grounded in `lsp-client.h`/`.cc`.

pub mod document;
pub mod manager;
pub mod state;

use std::collections::{HashMap, VecDeque};
use std::path::{Path, PathBuf};

use bytes::BytesMut;
use serde_json::Value as JsonValue;
use tracing::{info, warn};

use crate::changerecorder::{ChangeObservation, TextDocumentObservationRecorder, TextDocumentObserver};
use crate::diagnostics::{DiagnosticRecord, RelatedLocation, TextDocumentDiagnostics};
use crate::error::{Error, LspError, StartServerError};
use crate::jsonrpc::{FramedJsonRpcCodec, JsonRpcClient, MessageParseResult, ProtocolError, RequestId};
use crate::primitives::{DocumentVersion, LineNumber};
use crate::process::{self, ChildSpec, OutputMode, ProcessEvent, ProcessHandle};
use crate::uri::{self, UriPathSemantics};

pub use document::DocumentRecord;
pub use manager::LspManager;
pub use state::{AnnotatedProtocolState, ProtocolState};

/// Configuration fixed for the lifetime of one `LspClient`: which program
/// to launch and how URIs/paths for this language are interpreted.
#[derive(Debug, Clone)]
pub struct LspClientOptions {
	pub program: String,
	pub args: Vec<String>,
	pub uri_semantics: UriPathSemantics,
	pub verbose_log: bool,
	pub send_log_dir: Option<PathBuf>,
}

/// The LSP client for a single server process, tracking its protocol
/// state, outstanding requests, and the set of open documents.
pub struct LspClient {
	options: LspClientOptions,
	state: AnnotatedProtocolState,
	process: Option<ProcessHandle>,
	events: Option<tokio::sync::mpsc::UnboundedReceiver<ProcessEvent>>,
	recv_buf: BytesMut,
	rpc: JsonRpcClient,
	initialize_id: Option<RequestId>,
	shutdown_id: Option<RequestId>,
	documents: HashMap<PathBuf, DocumentRecord>,
	recorders: HashMap<PathBuf, TextDocumentObservationRecorder>,
	diagnostics: HashMap<PathBuf, TextDocumentDiagnostics>,
	pending_errors: VecDeque<String>,
	stderr_log_path: Option<PathBuf>,
}

impl LspClient {
	pub fn new(options: LspClientOptions) -> Self {
		let send_log_dir = options.send_log_dir.clone();
		Self {
			options,
			state: AnnotatedProtocolState::new(ProtocolState::Inactive),
			process: None,
			events: None,
			recv_buf: BytesMut::new(),
			rpc: JsonRpcClient::new(send_log_dir),
			initialize_id: None,
			shutdown_id: None,
			documents: HashMap::new(),
			recorders: HashMap::new(),
			diagnostics: HashMap::new(),
			pending_errors: VecDeque::new(),
			stderr_log_path: None,
		}
	}

	pub fn options(&self) -> &LspClientOptions {
		&self.options
	}

	pub fn protocol_state(&self) -> ProtocolState {
		self.state.state
	}

	pub fn stderr_log_path(&self) -> Option<&PathBuf> {
		self.stderr_log_path.as_ref()
	}

	/// A one-line human-readable summary, analogous to `lsp-client.cc`'s
	/// status-bar text: protocol state, description, pending-error count,
	/// and the outstanding/pending-reply ID sets.
	pub fn status_line(&self) -> String {
		let mut s = format!("{}: {}", self.state.state, self.state.description);
		if !self.pending_errors.is_empty() {
			s.push_str(&format!(" ({} pending error message(s))", self.pending_errors.len()));
		}
		s.push_str(&format!(
			" [outstanding={}, pendingReplies={}, cancelled={}]",
			self.rpc.outstanding_ids().len(),
			self.rpc.pending_reply_ids().len(),
			self.rpc.cancelled_ids().len(),
		));
		s
	}

	pub fn pop_pending_error(&mut self) -> Option<String> {
		self.pending_errors.pop_front()
	}

	fn fail(&mut self, err: LspError) {
		warn!(%err, "LSP client entering terminal error state");
		self.pending_errors.push_back(err.to_string());
		self.state = AnnotatedProtocolState::with_detail(ProtocolState::LspProtocolError, err.to_string());
	}

	/// Like `fail`, but for an error latched by the JSON-RPC transport
	/// itself (component D) rather than an LSP-level reply failure.
	fn fail_transport(&mut self, err: ProtocolError) {
		warn!(%err, "LSP client entering terminal error state (transport)");
		self.pending_errors.push_back(err.to_string());
		self.state = AnnotatedProtocolState::with_detail(ProtocolState::JsonRpcProtocolError, err.to_string());
	}

	/// Spawn the server process and send `initialize`. Requires the client
	/// to currently be `Inactive`. Grounded in `lsp-client.h`'s
	/// `startServer`, which returns a `FailReasonOpt` -- only the
	/// synchronous spawn/enqueue failure is reported here; an `initialize`
	/// error or timeout arrives later through `pump_once`.
	pub async fn start_server(&mut self, workspace_root: &Path) -> Result<(), StartServerError> {
		if self.state.state != ProtocolState::Inactive {
			debug_assert!(false, "start_server called while in state {}", self.state.state);
			return Err(StartServerError::WrongState(self.state.state.to_string()));
		}

		let mut spec = ChildSpec::new(self.options.program.clone()).with_args(self.options.args.clone());
		spec.output_mode = OutputMode::Separate;
		let (handle, events) = process::spawn_async(spec)?;

		let root_uri = uri::make_file_uri(workspace_root, self.options.uri_semantics);
		let params = serde_json::json!({
			"processId": std::process::id(),
			"rootUri": root_uri,
			"capabilities": {},
		});
		let id = self.rpc.send_request("initialize", params)?;
		self.initialize_id = Some(id);
		self.flush_outbound(&handle);

		self.process = Some(handle);
		self.events = Some(events);
		self.state = AnnotatedProtocolState::new(ProtocolState::Initializing);
		Ok(())
	}

	fn flush_outbound(&mut self, handle: &ProcessHandle) {
		while let Some(frame) = self.rpc.take_outbound() {
			if let Err(e) = handle.write(frame) {
				warn!(error = %e, "failed writing to server stdin");
			}
		}
	}

	/// Drain exactly one event from the process (stdout/stderr chunk, or
	/// termination), feeding any complete JSON-RPC messages to the
	/// transport and updating the protocol state as needed. Returns
	/// `Ok(false)` once the event channel has closed.
	pub async fn pump_once(&mut self) -> Result<bool, Error> {
		let event = match &mut self.events {
			Some(rx) => rx.recv().await,
			None => return Ok(false),
		};

		let event = match event {
			Some(e) => e,
			None => {
				self.state = AnnotatedProtocolState::new(ProtocolState::Inactive);
				return Ok(false);
			}
		};

		match event {
			ProcessEvent::Stdout(chunk) => {
				self.recv_buf.extend_from_slice(&chunk);
				self.drain_inbound();
			}
			ProcessEvent::Stderr(chunk) => {
				if let Ok(s) = std::str::from_utf8(&chunk) {
					if self.options.verbose_log {
						info!(server_stderr = %s.trim_end(), "server stderr");
					}
				}
			}
			ProcessEvent::Terminated(kind) => {
				self.rpc.on_process_terminated(&self.recv_buf);
				let latched = self.rpc.protocol_error().cloned();
				if let Some(err) = latched {
					if !self.state.state.is_terminal_error() {
						self.fail_transport(err);
					}
				} else if !self.state.state.is_terminal_error() {
					self.state = AnnotatedProtocolState::with_detail(ProtocolState::Inactive, format!("{kind:?}"));
				}
			}
		}

		self.dispatch_replies_and_notifications();
		self.flush_if_running();

		Ok(true)
	}

	/// Repeatedly extract complete messages from `recv_buf`, feeding each to
	/// the transport. A structural parse error latches into `self.rpc` and
	/// drives the client into `JsonRpcProtocolError`; once latched, further
	/// calls stop attempting to parse (`MessageParseResult::PriorError`)
	/// rather than re-raising against trailing garbage.
	fn drain_inbound(&mut self) {
		let mut codec = FramedJsonRpcCodec;
		loop {
			let prior_error = self.rpc.protocol_error().is_some();
			match codec.decode_checked(&mut self.recv_buf, prior_error) {
				Ok(MessageParseResult::OneMessage(value)) => self.rpc.on_inbound_value(value),
				Ok(MessageParseResult::PriorError) => break,
				Ok(MessageParseResult::Empty | MessageParseResult::UnterminatedHeaders | MessageParseResult::IncompleteBody) => break,
				Err(e) => {
					self.rpc.latch_protocol_error(e);
					break;
				}
			}
		}
		if let Some(err) = self.rpc.protocol_error() {
			if !self.state.state.is_terminal_error() {
				let err = err.clone();
				self.fail_transport(err);
			}
		}
	}

	fn dispatch_replies_and_notifications(&mut self) {
		if let Some(id) = self.initialize_id {
			if self.rpc.has_reply(id) {
				self.initialize_id = None;
				match self.rpc.take_reply(id).expect("just checked") {
					Ok(result) if result.is_object() || result.is_null() => {
						let _ = self.rpc.send_notification("initialized", serde_json::json!({}));
						self.state = AnnotatedProtocolState::new(ProtocolState::Normal);
					}
					Ok(result) => self.fail(LspError::UnexpectedReplyShape {
						method: "initialize".to_string(),
						detail: format!("expected an `InitializeResult` object, got {result}"),
					}),
					Err(e) => self.fail(LspError::InitializeFailed(e.message)),
				}
			}
		}

		if let Some(id) = self.shutdown_id {
			if self.rpc.has_reply(id) {
				self.shutdown_id = None;
				match self.rpc.take_reply(id).expect("just checked") {
					Ok(_) => {
						let _ = self.rpc.send_notification("exit", JsonValue::Null);
						self.state = AnnotatedProtocolState::new(ProtocolState::Shutdown2);
					}
					Err(e) => self.fail(LspError::ShutdownFailed(e.message)),
				}
			}
		}

		while let Some((method, payload)) = self.rpc.take_next_notification() {
			if method == "textDocument/publishDiagnostics" {
				self.handle_publish_diagnostics(payload);
			}
		}
	}

	/// Accept (or silently drop) a `publishDiagnostics` notification: the
	/// URI must resolve to a currently-open path and carry a non-negative
	/// version. If that version is the document's current last-sent
	/// version the diagnostics apply directly; if it is an older version
	/// still tracked by the recorder, they are replayed forward through
	/// every change recorded since. Anything else (untracked, or newer
	/// than last-sent) is dropped -- see DESIGN.md's resolution of
	/// spec.md's diagnostic-version-filtering Open Question.
	fn handle_publish_diagnostics(&mut self, payload: JsonValue) {
		let params = payload.get("params").cloned().unwrap_or(payload);
		let uri_str = match params.get("uri").and_then(|u| u.as_str()) {
			Some(u) => u,
			None => return,
		};
		let path = match uri::get_file_uri_path(uri_str, self.options.uri_semantics) {
			Ok(p) => p,
			Err(e) => {
				warn!(%e, uri = uri_str, "publishDiagnostics with unparseable URI; dropping");
				return;
			}
		};

		let version = match params.get("version").and_then(|v| v.as_i64()) {
			Some(v) if v >= 0 => DocumentVersion(v as u64),
			_ => {
				warn!(path = %path.display(), "publishDiagnostics missing a usable version; dropping");
				return;
			}
		};
		let doc = match self.documents.get(&path) {
			Some(d) => d,
			None => {
				warn!(path = %path.display(), "publishDiagnostics for a document that is not open; dropping");
				return;
			}
		};

		let is_current = version == doc.last_sent_version;
		let is_tracked = self.recorders.get(&path).is_some_and(|r| r.is_tracking(version));
		if !is_current && !is_tracked {
			warn!(path = %path.display(), ?version, "publishDiagnostics for an unknown or stale version; dropping");
			return;
		}

		let diags = params.get("diagnostics").and_then(|d| d.as_array()).cloned().unwrap_or_default();
		let rope_text = doc.last_sent_contents_string();
		let rope = ropey::Rope::from_str(&rope_text);

		let mut store = TextDocumentDiagnostics::new(version);
		// For a tracked-but-stale version, `apply_changes_to_diagnostics`
		// below re-derives and overwrites this from the recorder's own
		// memory of that version's line count; this value only matters for
		// the `is_current` case.
		store.set_num_lines_and_adjust_accordingly(doc.last_sent_contents.num_lines());
		for d in diags {
			let Some(range_val) = d.get("range") else { continue };
			let Ok(lsp_range) = serde_json::from_value::<lsp_types::Range>(range_val.clone()) else { continue };
			let range = document::lsp_range_to_coord_range(&rope, lsp_range);
			let message = d.get("message").and_then(|m| m.as_str()).unwrap_or_default().to_string();
			let related = d
				.get("relatedInformation")
				.and_then(|r| r.as_array())
				.map(|arr| {
					arr.iter()
						.filter_map(|ri| {
							let loc = ri.get("location")?;
							let uri = loc.get("uri")?.as_str()?;
							let path = uri::get_file_uri_path(uri, self.options.uri_semantics).ok()?;
							let line = loc.get("range")?.get("start")?.get("line")?.as_u64()? as u32;
							let message = ri.get("message")?.as_str()?.to_string();
							Some(RelatedLocation { file: path, line: LineNumber(line + 1), message })
						})
						.collect()
				})
				.unwrap_or_default();
			store.insert(range, DiagnosticRecord { message, related });
		}

		if !is_current {
			if let Some(recorder) = self.recorders.get_mut(&path) {
				recorder.apply_changes_to_diagnostics(&mut store);
			}
		}

		if let Some(doc) = self.documents.get_mut(&path) {
			doc.waiting_for_diagnostics = false;
			doc.pending_diagnostics = None;
		}
		self.diagnostics.insert(path, store);
	}

	pub fn diagnostics_for(&self, path: &Path) -> Option<&TextDocumentDiagnostics> {
		self.diagnostics.get(path)
	}

	/// `textDocument/didOpen`. Requires `Normal` state and the path not
	/// already open.
	pub fn notify_did_open(&mut self, path: PathBuf, language_id: &str, text: &str) -> Result<(), Error> {
		self.require_normal()?;
		if self.documents.contains_key(&path) {
			debug_assert!(false, "{} is already open", path.display());
			return Err(Error::Misuse(format!("{} is already open", path.display())));
		}

		let version = DocumentVersion(1);
		let uri_str = uri::make_file_uri(&path, self.options.uri_semantics);
		let params = serde_json::json!({
			"textDocument": {
				"uri": uri_str,
				"languageId": language_id,
				"version": version.to_lsp()?,
				"text": text,
			}
		});
		self.rpc.send_notification("textDocument/didOpen", params).map_err(Error::Protocol)?;
		self.flush_if_running();

		self.documents.insert(path.clone(), DocumentRecord::new(path.clone(), language_id.to_string(), version, text));
		self.recorders.insert(path, TextDocumentObservationRecorder::new());
		Ok(())
	}

	/// `textDocument/didChange`, sent incrementally as one content-change
	/// event per observation. `observations` must be expressed against the
	/// document state as it existed before any of them were applied
	/// (i.e. `pre_edit_text`).
	pub fn notify_did_change(
		&mut self,
		path: &Path,
		pre_edit_text: &str,
		observations: &[ChangeObservation],
		post_edit_text: &str,
	) -> Result<(), Error> {
		self.require_normal()?;
		let doc = match self.documents.get(path) {
			Some(d) => d,
			None => {
				debug_assert!(false, "{} is not open", path.display());
				return Err(Error::Misuse(format!("{} is not open", path.display())));
			}
		};
		let current_version = doc.last_sent_version;
		let current_num_lines = doc.last_sent_contents.num_lines();

		let rope = ropey::Rope::from_str(pre_edit_text);
		let changes: Vec<lsp_types::TextDocumentContentChangeEvent> =
			observations.iter().map(|o| document::change_observation_to_lsp(&rope, o)).collect();

		let new_version = current_version.next();
		let uri_str = uri::make_file_uri(path, self.options.uri_semantics);
		let params = serde_json::json!({
			"textDocument": { "uri": uri_str, "version": new_version.to_lsp()? },
			"contentChanges": changes,
		});
		self.rpc.send_notification("textDocument/didChange", params).map_err(Error::Protocol)?;
		self.flush_if_running();

		if let Some(recorder) = self.recorders.get_mut(path) {
			if !recorder.is_tracking(current_version) {
				recorder.begin_tracking(current_version, current_num_lines);
			}
			for obs in observations {
				apply_observation(recorder, obs);
			}
		}

		let doc = self.documents.get_mut(path).expect("checked present above");
		doc.last_sent_version = new_version;
		doc.last_sent_contents = document::TextDocumentCore::from_str(post_edit_text);
		doc.waiting_for_diagnostics = true;
		Ok(())
	}

	/// `textDocument/didClose`.
	pub fn notify_did_close(&mut self, path: &Path) -> Result<(), Error> {
		self.require_normal()?;
		if self.documents.remove(path).is_none() {
			debug_assert!(false, "{} is not open", path.display());
			return Err(Error::Misuse(format!("{} is not open", path.display())));
		}
		self.recorders.remove(path);
		self.diagnostics.remove(path);

		let uri_str = uri::make_file_uri(path, self.options.uri_semantics);
		let params = serde_json::json!({ "textDocument": { "uri": uri_str } });
		self.rpc.send_notification("textDocument/didClose", params).map_err(Error::Protocol)?;
		self.flush_if_running();
		Ok(())
	}

	pub fn send_request(&mut self, method: &str, params: JsonValue) -> Result<RequestId, Error> {
		self.require_normal()?;
		let id = self.rpc.send_request(method, params).map_err(Error::Protocol)?;
		self.flush_if_running();
		Ok(id)
	}

	pub fn cancel_request(&mut self, id: RequestId) {
		self.rpc.cancel(id);
	}

	pub fn take_reply(&mut self, id: RequestId) -> Option<Result<JsonValue, ProtocolError>> {
		self.rpc.take_reply(id).map(|r| r.map_err(|e| ProtocolError::JsonParse(e.message)))
	}

	fn flush_if_running(&mut self) {
		if let Some(handle) = self.process.take() {
			self.flush_outbound(&handle);
			self.process = Some(handle);
		}
	}

	fn require_normal(&self) -> Result<(), Error> {
		if !self.state.state.is_normal() {
			debug_assert!(false, "operation requires Normal state, currently {}", self.state.state);
			return Err(Error::Misuse(format!("operation requires Normal state, currently {}", self.state.state)));
		}
		Ok(())
	}

	/// Begin the two-phase graceful shutdown (`shutdown` request, then
	/// `exit` notification once its reply arrives).
	pub fn begin_shutdown(&mut self) -> Result<(), Error> {
		self.require_normal()?;
		let id = self.rpc.send_request("shutdown", JsonValue::Null).map_err(Error::Protocol)?;
		self.shutdown_id = Some(id);
		self.flush_if_running();
		self.state = AnnotatedProtocolState::new(ProtocolState::Shutdown1);
		Ok(())
	}

	/// Skip the graceful handshake and kill the process outright; valid
	/// from any state, including the terminal error states.
	pub fn begin_forcible_shutdown(&mut self) {
		if let Some(mut handle) = self.process.take() {
			let _ = handle.kill();
		}
		self.state = AnnotatedProtocolState::new(ProtocolState::Inactive);
	}
}

fn apply_observation(observer: &mut impl TextDocumentObserver, obs: &ChangeObservation) {
	match obs.clone() {
		ChangeObservation::InsertLine { line } => observer.observe_insert_line(line),
		ChangeObservation::DeleteLine { line } => observer.observe_delete_line(line),
		ChangeObservation::InsertText { at, text } => observer.observe_insert_text(at, &text),
		ChangeObservation::DeleteText { at, len_bytes } => observer.observe_delete_text(at, len_bytes),
		ChangeObservation::TotalChange { num_lines } => observer.observe_total_change(num_lines),
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	fn opts() -> LspClientOptions {
		LspClientOptions { program: "clangd".into(), args: Vec::new(), uri_semantics: UriPathSemantics::Normal, verbose_log: false, send_log_dir: None }
	}

	/// S1: a synthesized `initialize` reply drives INITIALIZING -> NORMAL
	/// and sends `initialized`, without spawning a real child process.
	#[test]
	fn initialize_handshake_transitions_to_normal() {
		let mut client = LspClient::new(opts());
		let id = client.rpc.send_request("initialize", serde_json::json!({})).unwrap();
		client.initialize_id = Some(id);
		client.state = AnnotatedProtocolState::new(ProtocolState::Initializing);

		client.rpc.on_inbound_value(serde_json::json!({"jsonrpc":"2.0","id":id,"result":{}}));
		client.dispatch_replies_and_notifications();

		assert_eq!(client.protocol_state(), ProtocolState::Normal);
		assert!(client.initialize_id.is_none());
	}

	/// S6: a synthesized `shutdown` reply drives SHUTDOWN1 -> SHUTDOWN2 and
	/// sends `exit`.
	#[test]
	fn shutdown_handshake_transitions_to_shutdown2() {
		let mut client = LspClient::new(opts());
		client.state = AnnotatedProtocolState::new(ProtocolState::Shutdown1);
		let id = client.rpc.send_request("shutdown", JsonValue::Null).unwrap();
		client.shutdown_id = Some(id);

		client.rpc.on_inbound_value(serde_json::json!({"jsonrpc":"2.0","id":id,"result":null}));
		client.dispatch_replies_and_notifications();

		assert_eq!(client.protocol_state(), ProtocolState::Shutdown2);
		assert!(client.shutdown_id.is_none());
	}

	/// An initialize error reply latches a terminal error state instead.
	#[test]
	fn initialize_failure_is_terminal() {
		let mut client = LspClient::new(opts());
		let id = client.rpc.send_request("initialize", serde_json::json!({})).unwrap();
		client.initialize_id = Some(id);
		client.state = AnnotatedProtocolState::new(ProtocolState::Initializing);

		client.rpc.on_inbound_value(serde_json::json!({"jsonrpc":"2.0","id":id,"error":{"code":-1,"message":"nope"}}));
		client.dispatch_replies_and_notifications();

		assert_eq!(client.protocol_state(), ProtocolState::LspProtocolError);
		assert!(client.pop_pending_error().unwrap().contains("nope"));
	}

	/// S2: `publishDiagnostics` for a document's current version is stored
	/// and retrievable.
	#[test]
	fn publish_diagnostics_for_current_version_is_stored() {
		let mut client = LspClient::new(opts());
		client.state = AnnotatedProtocolState::new(ProtocolState::Normal);
		let path = PathBuf::from("/a/b.c");
		client.notify_did_open(path.clone(), "cpp", "line one\nline two\n").unwrap();

		let uri_str = uri::make_file_uri(&path, UriPathSemantics::Normal);
		let payload = serde_json::json!({
			"uri": uri_str,
			"version": 1,
			"diagnostics": [{
				"range": {"start": {"line": 0, "character": 0}, "end": {"line": 0, "character": 4}},
				"message": "unused variable",
			}],
		});
		client.handle_publish_diagnostics(payload);

		let diags = client.diagnostics_for(&path).unwrap();
		assert_eq!(diags.len(), 1);
	}

	/// `publishDiagnostics` for a version newer than anything sent is
	/// dropped rather than stored.
	#[test]
	fn publish_diagnostics_for_unknown_version_is_dropped() {
		let mut client = LspClient::new(opts());
		client.state = AnnotatedProtocolState::new(ProtocolState::Normal);
		let path = PathBuf::from("/a/b.c");
		client.notify_did_open(path.clone(), "cpp", "x\n").unwrap();

		let uri_str = uri::make_file_uri(&path, UriPathSemantics::Normal);
		let payload = serde_json::json!({ "uri": uri_str, "version": 99, "diagnostics": [] });
		client.handle_publish_diagnostics(payload);

		assert!(client.diagnostics_for(&path).is_none());
	}
}
