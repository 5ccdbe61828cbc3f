//! Relay event types.
//!
//! Every event is an [`EventKind`] plus a CBOR payload. Payload structs use
//! camelCase field names and default every field, so an event with missing
//! fields still decodes, with empty strings and zeros where data was absent.
//! Handlers treat those defaults as "no match".

use std::fmt;
use std::str::FromStr;

use bytes::Bytes;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use dropline_core::{FileId, PeerId};

use crate::error::{Result, SyncError};

/// Names of the events exchanged through the relay.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    ListFile,
    RequestListedFiles,
    DeleteFile,
    DeleteAllFiles,
    ClientDisconnect,
    ChangePassword,
    RemovePassword,
    UpdateDeviceName,
    UpdateTotalDownloads,
    DownloadFile,
    RequestFileChunk,
    UploadFileChunk,
    Connect,
    Disconnect,
    Close,
}

impl EventKind {
    /// Every kind a connected peer subscribes a handler for.
    pub const HANDLED: [EventKind; 12] = [
        EventKind::ChangePassword,
        EventKind::ClientDisconnect,
        EventKind::DeleteAllFiles,
        EventKind::DeleteFile,
        EventKind::DownloadFile,
        EventKind::ListFile,
        EventKind::RemovePassword,
        EventKind::RequestFileChunk,
        EventKind::RequestListedFiles,
        EventKind::UpdateDeviceName,
        EventKind::UpdateTotalDownloads,
        EventKind::UploadFileChunk,
    ];

    /// Wire name.
    pub const fn as_str(&self) -> &'static str {
        match self {
            EventKind::ListFile => "list-file",
            EventKind::RequestListedFiles => "request-listed-files",
            EventKind::DeleteFile => "delete-file",
            EventKind::DeleteAllFiles => "delete-all-files",
            EventKind::ClientDisconnect => "client-disconnect",
            EventKind::ChangePassword => "change-password",
            EventKind::RemovePassword => "remove-password",
            EventKind::UpdateDeviceName => "update-device-name",
            EventKind::UpdateTotalDownloads => "update-total-downloads",
            EventKind::DownloadFile => "download-file",
            EventKind::RequestFileChunk => "request-file-chunk",
            EventKind::UploadFileChunk => "upload-file-chunk",
            EventKind::Connect => "connect",
            EventKind::Disconnect => "disconnect",
            EventKind::Close => "close",
        }
    }

    /// Events that mutate the catalog.
    pub const fn is_catalog(&self) -> bool {
        matches!(
            self,
            EventKind::ListFile
                | EventKind::RequestListedFiles
                | EventKind::DeleteFile
                | EventKind::DeleteAllFiles
                | EventKind::ClientDisconnect
                | EventKind::ChangePassword
                | EventKind::RemovePassword
                | EventKind::UpdateDeviceName
                | EventKind::UpdateTotalDownloads
        )
    }

    /// Events that drive a transfer.
    pub const fn is_transfer(&self) -> bool {
        matches!(
            self,
            EventKind::DownloadFile | EventKind::RequestFileChunk | EventKind::UploadFileChunk
        )
    }

    /// Connection bookkeeping; delivered regardless of subscriptions.
    pub const fn is_lifecycle(&self) -> bool {
        matches!(
            self,
            EventKind::Connect | EventKind::Disconnect | EventKind::Close
        )
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EventKind {
    type Err = SyncError;

    fn from_str(s: &str) -> Result<Self> {
        EventKind::HANDLED
            .iter()
            .chain(&[EventKind::Connect, EventKind::Disconnect, EventKind::Close])
            .find(|k| k.as_str() == s)
            .copied()
            .ok_or_else(|| SyncError::Codec(format!("unknown event {:?}", s)))
    }
}

/// One event on the channel.
#[derive(Debug, Clone, PartialEq)]
pub struct Event {
    pub kind: EventKind,
    /// CBOR-encoded payload; empty for events without one.
    pub payload: Bytes,
}

impl Event {
    /// Encode `payload` as the body of a `kind` event.
    pub fn encode<T: Serialize>(kind: EventKind, payload: &T) -> Result<Self> {
        let mut buf = Vec::new();
        ciborium::into_writer(payload, &mut buf)
            .map_err(|e| SyncError::Codec(format!("encoding {}: {}", kind, e)))?;
        Ok(Self {
            kind,
            payload: Bytes::from(buf),
        })
    }

    /// An event with no payload.
    pub fn empty(kind: EventKind) -> Self {
        Self {
            kind,
            payload: Bytes::new(),
        }
    }

    /// Decode the payload.
    pub fn decode<T: DeserializeOwned>(&self) -> Result<T> {
        ciborium::from_reader(&self.payload[..])
            .map_err(|e| SyncError::Codec(format!("decoding {}: {}", self.kind, e)))
    }
}

/// `delete-file`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct FileRef {
    pub file_id: FileId,
}

/// `delete-all-files`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct OwnerRef {
    pub owner_id: PeerId,
}

/// `client-disconnect`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientGone {
    pub id: PeerId,
}

/// `change-password` / `remove-password`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct PasswordChange {
    pub file_id: FileId,
    pub owner_id: PeerId,
}

/// `update-device-name`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct DeviceRename {
    pub new_device_name: String,
    pub owner_id: PeerId,
}

/// `update-total-downloads`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct TotalDownloads {
    pub file_id: FileId,
    pub total_downloads: u64,
}

/// `download-file`: ask the owner to start sending.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct DownloadRequest {
    pub file_id: FileId,
    /// Routing: the peer the request goes to.
    pub owner_id: PeerId,
    /// The requester; chunks are addressed back to it.
    pub target_id: PeerId,
}

/// `request-file-chunk`: ask the owner for one chunk.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ChunkRequest {
    pub file_id: FileId,
    pub owner_id: PeerId,
    pub target_id: PeerId,
    /// 1-based.
    pub chunk_index: u32,
}

/// `upload-file-chunk`: one chunk of a file, owner to requester.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ChunkEnvelope {
    pub chunk: Bytes,
    /// 1-based.
    pub current_chunk: u32,
    pub total_chunks: u32,
    pub file_id: FileId,
    pub file_name: String,
    pub file_size: u64,
    pub owner_id: PeerId,
    pub target_id: PeerId,
    #[serde(rename = "type")]
    pub file_type: String,
}

impl ChunkEnvelope {
    /// Whether this is the last chunk of its file.
    pub fn is_final(&self) -> bool {
        self.total_chunks > 0 && self.current_chunk == self.total_chunks
    }
}
