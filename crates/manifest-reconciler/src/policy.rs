//! Which remote failures a pass may shrug off.
//!
//! Classification is by the server's message text, not by status code: the
//! same "not found" can surface through several error shapes depending on
//! the client and the resource kind. A failure without a message is always
//! fatal.

use tracing::warn;

use crate::cluster::ApiError;

const NOT_FOUND_MARKER: &str = "not found";
const UNAUTHORIZED_MARKER: &str = "unauthorized";

/// Why a failure was tolerated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IgnoreReason {
	NotFound,
	/// Seen while controller ownership is being handed over.
	Unauthorized,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
	Ignorable(IgnoreReason),
	Fatal,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DeletionPolicy {
	pub ignore_not_found: bool,
	pub ignore_unauthorized: bool,
}

impl DeletionPolicy {
	/// Tolerates nothing; used for apply.
	pub const STRICT: Self = Self {
		ignore_not_found: false,
		ignore_unauthorized: false,
	};

	pub fn new(ignore_not_found: bool, ignore_unauthorized: bool) -> Self {
		Self {
			ignore_not_found,
			ignore_unauthorized,
		}
	}

	pub fn classify(&self, err: &ApiError) -> Verdict {
		let Some(message) = err.message() else {
			return Verdict::Fatal;
		};
		let message = message.to_lowercase();
		if self.ignore_not_found && message.contains(NOT_FOUND_MARKER) {
			Verdict::Ignorable(IgnoreReason::NotFound)
		} else if self.ignore_unauthorized && message.contains(UNAUTHORIZED_MARKER) {
			Verdict::Ignorable(IgnoreReason::Unauthorized)
		} else {
			Verdict::Fatal
		}
	}

	/// Swallow `result`'s error if tolerated, logging it; otherwise hand it
	/// back.
	pub fn check<T>(&self, result: Result<T, ApiError>) -> Result<Option<T>, ApiError> {
		match result {
			Ok(value) => Ok(Some(value)),
			Err(err) => match self.classify(&err) {
				Verdict::Ignorable(IgnoreReason::NotFound) => {
					warn!(error = %err, "ignoring not found error");
					Ok(None)
				}
				Verdict::Ignorable(IgnoreReason::Unauthorized) => {
					warn!(error = %err, "ignoring unauthorized error");
					Ok(None)
				}
				Verdict::Fatal => Err(err),
			},
		}
	}
}
