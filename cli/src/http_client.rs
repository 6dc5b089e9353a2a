//! §11 supplemented feature: `http: {proxies?, headers?, verify?}` passthrough.
//! Every remote backend client takes a pre-built `reqwest::Client`
//! constructor argument; this is where a config alias's `http` section
//! becomes one.

use reqwest::header::{HeaderMap, HeaderName, HeaderValue};

use crate::config::HttpOptions;

pub fn build(opts: &HttpOptions) -> anyhow::Result<reqwest::Client> {
	let mut builder = reqwest::Client::builder();
	if !opts.verify {
		builder = builder.danger_accept_invalid_certs(true);
	}
	for proxy_url in opts.proxies.values() {
		builder = builder.proxy(reqwest::Proxy::all(proxy_url)?);
	}
	if !opts.headers.is_empty() {
		let mut headers = HeaderMap::new();
		for (name, value) in &opts.headers {
			headers.insert(HeaderName::from_bytes(name.as_bytes())?, HeaderValue::from_str(value)?);
		}
		builder = builder.default_headers(headers);
	}
	Ok(builder.build()?)
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn builds_a_client_from_default_options() {
		assert!(build(&HttpOptions::default()).is_ok());
	}

	#[test]
	fn rejects_an_invalid_header_name() {
		let mut opts = HttpOptions::default();
		opts.headers.insert("bad header".to_string(), "v".to_string());
		assert!(build(&opts).is_err());
	}
}
