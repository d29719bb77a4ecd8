/// Build metadata baked in at compile time, surfaced on `initialize` and `/status`.
#[derive(Debug, Clone)]
pub struct BuildInfo {
	pub version: &'static str,
	pub name: &'static str,
}

impl BuildInfo {
	pub fn new() -> Self {
		Self {
			version: env!("CARGO_PKG_VERSION"),
			name: "aip-gateway",
		}
	}
}

impl Default for BuildInfo {
	fn default() -> Self {
		Self::new()
	}
}
