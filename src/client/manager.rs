//! Multi-server registry: resolves a server program per language from
//! `EnvConfig` and owns one `LspClient` per language, starting it lazily.
//! Grounded in `lsp-manager.h`'s role of owning one `LSPClient` per
//! language and dispatching editor requests to the right one.

use std::collections::HashMap;
use std::path::PathBuf;

use crate::config::EnvConfig;
use crate::error::{Error, LspError};

use super::{LspClient, LspClientOptions};

/// Owns zero or more running `LspClient`s, one per language, created on
/// first use.
pub struct LspManager {
	env: EnvConfig,
	clients: HashMap<String, LspClient>,
}

impl LspManager {
	pub fn new(env: EnvConfig) -> Self {
		Self { env, clients: HashMap::new() }
	}

	/// Whether a client for `language` is currently running (in any state
	/// other than `Inactive`).
	pub fn has_client(&self, language: &str) -> bool {
		self.clients.contains_key(language)
	}

	pub fn client(&self, language: &str) -> Option<&LspClient> {
		self.clients.get(language)
	}

	pub fn client_mut(&mut self, language: &str) -> Option<&mut LspClient> {
		self.clients.get_mut(language)
	}

	/// Get or lazily create the client for `language`, resolving its
	/// server program from the environment.
	pub fn ensure_client(&mut self, language: &str) -> Result<&mut LspClient, Error> {
		if !self.clients.contains_key(language) {
			let program = self
				.env
				.resolve_program(language)
				.ok_or_else(|| Error::Lsp(LspError::InitializeFailed(format!("no known server program for language `{language}`"))))?;
			let semantics = self.env.uri_path_semantics(language);
			let verbose_log = match language {
				"cpp" | "c" => self.env.clangd_verbose_log,
				"python" => self.env.pylsp_verbose_log,
				_ => false,
			};
			let send_log_dir = self.env.json_rpc_client_send_log_dir.clone();
			let opts = LspClientOptions { program, args: Vec::new(), uri_semantics: semantics, verbose_log, send_log_dir };
			self.clients.insert(language.to_string(), LspClient::new(opts));
		}
		Ok(self.clients.get_mut(language).expect("just inserted"))
	}

	/// Shut down and drop every running client; used at editor exit.
	pub fn shut_down_all(&mut self) -> Vec<(String, PathBuf)> {
		let mut stderr_logs = Vec::new();
		for (lang, client) in self.clients.iter_mut() {
			if let Some(path) = client.stderr_log_path() {
				stderr_logs.push((lang.clone(), path.clone()));
			}
			client.begin_forcible_shutdown();
		}
		stderr_logs
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn ensure_client_resolves_default_program() {
		let env = EnvConfig::default();
		let mut mgr = LspManager::new(env);
		let client = mgr.ensure_client("cpp").unwrap();
		assert_eq!(client.options().program, "clangd");
		assert!(mgr.has_client("cpp"));
	}

	#[test]
	fn unknown_language_is_an_error() {
		let env = EnvConfig::default();
		let mut mgr = LspManager::new(env);
		assert!(mgr.ensure_client("haskell").is_err());
	}
}
