//! Environment/configuration: reads the environment variables listed in
//! spec.md §6 exactly once, into a typed config struct, following the
//! teacher's `crates/config` pattern of a single config type rather than
//! scattered `std::env::var` calls.

use std::collections::HashMap;
use std::env;
use std::path::PathBuf;

use crate::uri::UriPathSemantics;

/// One entry of the env-var-driven program resolution table (the
/// "lsp-manager" equivalent described in SPEC_FULL.md §4.E): for a given
/// language, which env var overrides the server program, and what the
/// default program name is if unset.
#[derive(Debug, Clone)]
pub struct ServerProgramDefault {
	pub env_var: &'static str,
	pub default_program: &'static str,
}

/// Known language -> server program mappings. `cpp`/`c` use clangd;
/// `python` uses pylsp (itself needing a python3 interpreter); `test` is
/// the in-repo test double.
pub fn known_server_programs() -> HashMap<&'static str, ServerProgramDefault> {
	let mut m = HashMap::new();
	m.insert("cpp", ServerProgramDefault { env_var: "SM_EDITOR_CLANGD_PROGRAM", default_program: "clangd" });
	m.insert("c", ServerProgramDefault { env_var: "SM_EDITOR_CLANGD_PROGRAM", default_program: "clangd" });
	m.insert("python", ServerProgramDefault { env_var: "SM_EDITOR_PYLSP_PROGRAM", default_program: "pylsp" });
	m.insert("test", ServerProgramDefault { env_var: "SM_EDITOR_LSP_TEST_SERVER_PROGRAM", default_program: "lsp-test-server" });
	m
}

/// The full set of environment variables this crate observes, read once
/// at construction time.
#[derive(Debug, Clone, Default)]
pub struct EnvConfig {
	pub clangd_program: Option<String>,
	pub pylsp_program: Option<String>,
	pub env_program: Option<String>,
	pub python3_program: Option<String>,
	pub lsp_test_server_program: Option<String>,
	pub pylsp_is_cygwin: bool,
	pub clangd_verbose_log: bool,
	pub pylsp_verbose_log: bool,
	pub json_rpc_client_send_log_dir: Option<PathBuf>,
}

impl EnvConfig {
	pub fn from_env() -> Self {
		Self {
			clangd_program: env::var("SM_EDITOR_CLANGD_PROGRAM").ok(),
			pylsp_program: env::var("SM_EDITOR_PYLSP_PROGRAM").ok(),
			env_program: env::var("SM_EDITOR_ENV_PROGRAM").ok(),
			python3_program: env::var("SM_EDITOR_PYTHON3_PROGRAM").ok(),
			lsp_test_server_program: env::var("SM_EDITOR_LSP_TEST_SERVER_PROGRAM").ok(),
			pylsp_is_cygwin: is_truthy_env("SM_EDITOR_PYLSP_IS_CYGWIN"),
			clangd_verbose_log: is_truthy_env("CLANGD_VERBOSE_LOG"),
			pylsp_verbose_log: is_truthy_env("PYLSP_VERBOSE_LOG"),
			json_rpc_client_send_log_dir: env::var("JSON_RPC_CLIENT_SEND_LOG_DIR").ok().map(PathBuf::from),
		}
	}

	/// Resolve the program to launch for `language`, honoring the env-var
	/// override, falling back to the documented default.
	pub fn resolve_program(&self, language: &str) -> Option<String> {
		let table = known_server_programs();
		let entry = table.get(language)?;
		let overridden = match entry.env_var {
			"SM_EDITOR_CLANGD_PROGRAM" => self.clangd_program.clone(),
			"SM_EDITOR_PYLSP_PROGRAM" => self.pylsp_program.clone(),
			"SM_EDITOR_LSP_TEST_SERVER_PROGRAM" => self.lsp_test_server_program.clone(),
			_ => None,
		};
		Some(overridden.unwrap_or_else(|| entry.default_program.to_string()))
	}

	pub fn uri_path_semantics(&self, language: &str) -> UriPathSemantics {
		if language == "python" && self.pylsp_is_cygwin {
			UriPathSemantics::Cygwin
		} else {
			UriPathSemantics::Normal
		}
	}
}

fn is_truthy_env(name: &str) -> bool {
	match env::var(name) {
		Ok(v) => !v.is_empty() && v != "0",
		Err(_) => false,
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn resolves_default_program_when_env_unset() {
		// SAFETY: test-local, and nothing else reads this var concurrently
		// within this process during this test.
		unsafe { env::remove_var("SM_EDITOR_CLANGD_PROGRAM") };
		let cfg = EnvConfig::from_env();
		assert_eq!(cfg.resolve_program("cpp"), Some("clangd".to_string()));
	}
}
