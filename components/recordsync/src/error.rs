/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at http://mozilla.org/MPL/2.0/. */

use crate::remote::RemoteError;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Invalid schema: {0}")]
    SchemaInvalid(String),

    #[error("Invalid identifier: {0}")]
    InvalidIdentifier(String),

    #[error("Error executing SQL: {0}")]
    SqlError(#[from] rusqlite::Error),

    #[error("Error opening database: {0}")]
    OpenDatabaseError(#[from] sqlite_support::open_database::Error),

    #[error("Error parsing JSON data: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("Malformed envelope: {0}")]
    MalformedEnvelope(String),

    #[error("Error parsing URL: {0}")]
    UrlParseError(#[from] url::ParseError),

    #[error("Remote store error: {0}")]
    RemoteError(#[from] RemoteError),

    #[error("Missing configuration: {0}")]
    ConfigMissing(&'static str),

    #[error("Error starting sync worker: {0}")]
    WorkerError(#[from] std::io::Error),

    #[error("The operation was interrupted")]
    Interrupted,
}

impl Error {
    /// True for errors that should abort an entire sync pass rather than be
    /// retried per record.
    pub(crate) fn is_unauthorized(&self) -> bool {
        matches!(self, Error::RemoteError(RemoteError::Unauthorized))
    }
}

pub type Result<T> = std::result::Result<T, Error>;
