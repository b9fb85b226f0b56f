// Copyright 2023 The Otnode Developers
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Error types for the chain crate
use failure::{Backtrace, Context, Fail};
use std::fmt::{self, Display};
use std::io;

use crate::core::hash::Hash;
use crate::core::ser;
use crate::store;

/// Error definition
#[derive(Debug)]
pub struct Error {
	inner: Context<ErrorKind>,
}

/// Chain error definitions
#[derive(Clone, Eq, PartialEq, Debug, Fail)]
pub enum ErrorKind {
	/// The header's parent is not in the header DAG. Recoverable, the caller
	/// may supply the parent later and retry.
	#[fail(display = "Parent unknown: {}", _0)]
	ParentUnknown(Hash),
	/// The header at checkpoint height doesn't match the required hash, or
	/// descends from one that doesn't
	#[fail(display = "Checkpoint violation at height {}: {}", _0, _1)]
	CheckpointViolation(i64, Hash),
	/// The proof of work is invalid. Permanent.
	#[fail(display = "Invalid PoW: {}", _0)]
	PowInvalid(Hash),
	/// Header bytes don't parse or carry impossible fields
	#[fail(display = "Malformed header: {}", _0)]
	MalformedHeader(String),
	/// A query referenced a header we don't have
	#[fail(display = "Unknown header: {}", _0)]
	UnknownHeader(Hash),
	/// Block bytes failed validation and the block must be re-downloaded
	#[fail(display = "Bad block: {}", _0)]
	BadBlock(Hash),
	/// A reorg is in progress and the operation cannot proceed
	#[fail(display = "Reorg in progress")]
	ReorgInProgress,
	/// Internal issue when trying to save or load data from store
	#[fail(display = "Store Error: {}", _1)]
	StoreErr(store::Error, String),
	/// Error serializing or deserializing a type
	#[fail(display = "Serialization Error: {}", _0)]
	SerErr(String),
	/// Anything else
	#[fail(display = "Other Error: {}", _0)]
	Other(String),
}

impl Display for Error {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		Display::fmt(&self.inner, f)
	}
}

impl Error {
	/// get kind
	pub fn kind(&self) -> ErrorKind {
		self.inner.get_context().clone()
	}
	/// get cause
	pub fn cause(&self) -> Option<&dyn Fail> {
		self.inner.cause()
	}
	/// get backtrace
	pub fn backtrace(&self) -> Option<&Backtrace> {
		self.inner.backtrace()
	}

	/// Whether the error is recoverable by supplying more data later, as
	/// opposed to permanent rejection or a fatal storage problem
	pub fn is_recoverable(&self) -> bool {
		match self.kind() {
			ErrorKind::ParentUnknown(_) | ErrorKind::ReorgInProgress => true,
			_ => false,
		}
	}
}

impl From<ErrorKind> for Error {
	fn from(kind: ErrorKind) -> Error {
		Error {
			inner: Context::new(kind),
		}
	}
}

impl From<Context<ErrorKind>> for Error {
	fn from(inner: Context<ErrorKind>) -> Error {
		Error { inner }
	}
}

impl From<store::Error> for Error {
	fn from(error: store::Error) -> Error {
		let ec = error.clone();
		Error {
			inner: error.context(ErrorKind::StoreErr(ec.clone(), format!("{}", ec))),
		}
	}
}

impl From<ser::Error> for Error {
	fn from(error: ser::Error) -> Error {
		Error {
			inner: Context::new(ErrorKind::SerErr(format!("{}", error))),
		}
	}
}

impl From<io::Error> for Error {
	fn from(e: io::Error) -> Error {
		Error {
			inner: Context::new(ErrorKind::Other(e.to_string())),
		}
	}
}
