//! §6 "Configuration file": a JSON document with three top-level sections —
//! `configs` (one entry per alias used on the command line), `transfers`
//! and `bar` (lookup tables in the original tool that selected a Python
//! module/class pair at runtime). There is no dynamic class loading
//! equivalent in Rust, so `transfers`/`bar` are parsed for config-file
//! compatibility but [`crate::backend_factory`] dispatches on the alias's
//! `transfer` string directly against a fixed set of backend kinds
//! (`filesystem`, `gd`, `od`, `ods`, `http`) instead of an import table.

use std::collections::HashMap;

use anyhow::Context;
use serde::Deserialize;

#[derive(Debug, Deserialize)]
pub struct Config {
	#[serde(default)]
	pub configs: HashMap<String, AliasConfig>,
	#[serde(default)]
	pub transfers: HashMap<String, TransferDescriptor>,
	#[serde(default)]
	pub bar: HashMap<String, TransferDescriptor>,
}

#[derive(Debug, Deserialize)]
pub struct TransferDescriptor {
	#[serde(rename = "mod")]
	#[allow(dead_code)]
	pub module: String,
	#[allow(dead_code)]
	pub cls: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ClientCreds {
	pub client_id: String,
	pub client_secret: String,
}

fn default_verify() -> bool {
	true
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct HttpOptions {
	#[serde(default)]
	pub proxies: HashMap<String, String>,
	#[serde(default)]
	pub headers: HashMap<String, String>,
	#[serde(default = "default_verify")]
	pub verify: bool,
}

/// One `configs.<alias>` entry (§6). Every field beyond `transfer` is
/// backend-specific; which ones are required depends on which backend
/// `transfer` names.
#[derive(Debug, Clone, Deserialize)]
pub struct AliasConfig {
	pub transfer: String,
	#[serde(default)]
	pub token_path: Option<String>,
	#[serde(default)]
	pub service_account: bool,
	#[serde(default)]
	pub client: Option<ClientCreds>,
	#[serde(default)]
	pub root: Option<String>,
	#[serde(default)]
	pub drive_id: Option<String>,
	#[serde(default)]
	pub use_root_in_path: bool,
	#[serde(default)]
	pub is_folder: bool,
	#[serde(default)]
	pub http: HttpOptions,
}

impl Config {
	pub async fn load(path: &str) -> anyhow::Result<Config> {
		let contents = tokio::fs::read_to_string(path)
			.await
			.with_context(|| format!("failed to read config file at `{path}`"))?;
		let config: Config =
			serde_json::from_str(&contents).with_context(|| format!("failed to parse config JSON at `{path}`"))?;
		Ok(config)
	}

	pub fn alias(&self, name: &str) -> anyhow::Result<&AliasConfig> {
		self.configs.get(name).ok_or_else(|| anyhow::anyhow!("no config named '{name}'"))
	}
}

/// Splits a CLI `ALIAS:/PATH` argument into its two halves. Mirrors the
/// original tool's `rest.split(":/")`: everything up to the first `:/` is
/// the alias, the rest (including any further `:/`) is the path.
pub fn split_alias_path(arg: &str) -> anyhow::Result<(&str, &str)> {
	match arg.split_once(":/") {
		Some((alias, path)) => Ok((alias, path)),
		None => Err(anyhow::anyhow!("'{arg}' is not of the form ALIAS:/PATH")),
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn splits_alias_and_path() {
		assert_eq!(split_alias_path("gdalias:/a/b.txt").unwrap(), ("gdalias", "a/b.txt"));
	}

	#[test]
	fn path_may_itself_contain_colon_slash() {
		assert_eq!(split_alias_path("local:/C:/Users/x").unwrap(), ("local", "C:/Users/x"));
	}

	#[test]
	fn rejects_argument_without_separator() {
		assert!(split_alias_path("not-a-valid-arg").is_err());
	}
}
