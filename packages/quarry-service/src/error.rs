pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
	#[error("Invalid request: {message}")]
	InvalidRequest { message: String },
	#[error("Provider error: {message}")]
	Provider { message: String },
	#[error("Store error: {message}")]
	Store { message: String },
	#[error("Store query timed out after {elapsed_ms} ms.")]
	StoreTimeout { elapsed_ms: u64 },
}

impl Error {
	/// Stable machine codes: callers tell an unavailable store apart from an
	/// empty result list, which is a successful outcome and never an error.
	pub fn code(&self) -> &'static str {
		match self {
			Self::InvalidRequest { .. } => "INVALID_REQUEST",
			Self::Provider { .. } => "PROVIDER_FAILED",
			Self::Store { .. } | Self::StoreTimeout { .. } => "STORE_UNAVAILABLE",
		}
	}
}

impl From<quarry_storage::Error> for Error {
	fn from(err: quarry_storage::Error) -> Self {
		match err {
			quarry_storage::Error::InvalidArgument(message) => Self::InvalidRequest { message },
			quarry_storage::Error::Qdrant(inner) => Self::Store { message: inner.to_string() },
		}
	}
}

impl From<quarry_providers::Error> for Error {
	fn from(err: quarry_providers::Error) -> Self {
		Self::Provider { message: err.to_string() }
	}
}
