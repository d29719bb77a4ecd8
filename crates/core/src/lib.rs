pub mod telemetry;
pub mod version;

pub mod prelude {
	pub use crate::telemetry::init_tracing;
	pub use crate::version::BuildInfo;
}
