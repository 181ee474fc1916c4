// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Durable buffer for messages awaiting upload.
//!
//! The store is a single-consumer service owning the SQLite connection;
//! every other component talks to it through a cloneable [`StoreHandle`].
//! The command loop serializes all access, so appends from the ingestion
//! listener and scans/deletes from the flush engine never interleave
//! mid-operation.

use std::path::Path;

use rusqlite::{params, Connection};
use serde::Serialize;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, error};

use crate::error::StoreError;

/// One buffered message, as persisted and as uploaded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PendingMessage {
    pub id: i64,
    pub topic: String,
    pub message: String,
    /// Epoch seconds assigned when the message was appended.
    #[serde(rename = "timestamp")]
    pub received_at: i64,
}

#[derive(Debug)]
pub enum StoreCommand {
    Append {
        topic: String,
        message: String,
        received_at: i64,
        response_tx: oneshot::Sender<Result<i64, StoreError>>,
    },
    ListPending {
        response_tx: oneshot::Sender<Result<Vec<PendingMessage>, StoreError>>,
    },
    DeleteByIds {
        ids: Vec<i64>,
        response_tx: oneshot::Sender<Result<(), StoreError>>,
    },
    Shutdown,
}

#[derive(Clone)]
pub struct StoreHandle {
    tx: mpsc::UnboundedSender<StoreCommand>,
}

impl StoreHandle {
    /// Persist one message and return the id the store assigned to it.
    pub async fn append(
        &self,
        topic: String,
        message: String,
        received_at: i64,
    ) -> Result<i64, StoreError> {
        let (response_tx, response_rx) = oneshot::channel();
        self.tx
            .send(StoreCommand::Append {
                topic,
                message,
                received_at,
                response_tx,
            })
            .map_err(|_| StoreError::ServiceUnavailable)?;
        response_rx.await.map_err(|_| StoreError::ServiceUnavailable)?
    }

    /// Every buffered message, oldest first, with no limit.
    pub async fn list_pending(&self) -> Result<Vec<PendingMessage>, StoreError> {
        let (response_tx, response_rx) = oneshot::channel();
        self.tx
            .send(StoreCommand::ListPending { response_tx })
            .map_err(|_| StoreError::ServiceUnavailable)?;
        response_rx.await.map_err(|_| StoreError::ServiceUnavailable)?
    }

    /// Remove exactly the given ids. Ids that are no longer present are
    /// ignored, so a repeated delete is a no-op.
    pub async fn delete_by_ids(&self, ids: Vec<i64>) -> Result<(), StoreError> {
        let (response_tx, response_rx) = oneshot::channel();
        self.tx
            .send(StoreCommand::DeleteByIds { ids, response_tx })
            .map_err(|_| StoreError::ServiceUnavailable)?;
        response_rx.await.map_err(|_| StoreError::ServiceUnavailable)?
    }

    pub fn shutdown(&self) -> Result<(), StoreError> {
        self.tx
            .send(StoreCommand::Shutdown)
            .map_err(|_| StoreError::ServiceUnavailable)
    }
}

pub struct StoreService {
    conn: Connection,
    rx: mpsc::UnboundedReceiver<StoreCommand>,
}

impl StoreService {
    /// Open (or create) the store at the given path and initialize its
    /// schema if absent.
    pub fn open(path: &Path) -> Result<(Self, StoreHandle), StoreError> {
        let conn = Connection::open(path).map_err(StoreError::Open)?;
        Self::from_connection(conn)
    }

    /// In-memory store, used by tests.
    pub fn open_memory() -> Result<(Self, StoreHandle), StoreError> {
        let conn = Connection::open_in_memory().map_err(StoreError::Open)?;
        Self::from_connection(conn)
    }

    fn from_connection(conn: Connection) -> Result<(Self, StoreHandle), StoreError> {
        init_schema(&conn).map_err(StoreError::Open)?;
        let (tx, rx) = mpsc::unbounded_channel();
        Ok((StoreService { conn, rx }, StoreHandle { tx }))
    }

    pub async fn run(mut self) {
        debug!("Message store service started");

        while let Some(command) = self.rx.recv().await {
            match command {
                StoreCommand::Append {
                    topic,
                    message,
                    received_at,
                    response_tx,
                } => {
                    let result = self.append(&topic, &message, received_at);
                    if response_tx.send(result).is_err() {
                        error!("Failed to send append response - receiver dropped");
                    }
                }

                StoreCommand::ListPending { response_tx } => {
                    let result = self.list_pending();
                    if response_tx.send(result).is_err() {
                        error!("Failed to send list response - receiver dropped");
                    }
                }

                StoreCommand::DeleteByIds { ids, response_tx } => {
                    let result = self.delete_by_ids(&ids);
                    if response_tx.send(result).is_err() {
                        error!("Failed to send delete response - receiver dropped");
                    }
                }

                StoreCommand::Shutdown => {
                    debug!("Message store service shutting down");
                    break;
                }
            }
        }

        debug!("Message store service stopped");
    }

    fn append(&self, topic: &str, message: &str, received_at: i64) -> Result<i64, StoreError> {
        self.conn
            .execute(
                "INSERT INTO messages (topic, message, timestamp) VALUES (?1, ?2, ?3)",
                params![topic, message, received_at],
            )
            .map_err(StoreError::Write)?;
        Ok(self.conn.last_insert_rowid())
    }

    fn list_pending(&self) -> Result<Vec<PendingMessage>, StoreError> {
        let mut stmt = self
            .conn
            .prepare("SELECT id, topic, message, timestamp FROM messages ORDER BY id")
            .map_err(StoreError::Read)?;
        let rows = stmt
            .query_map([], |row| {
                Ok(PendingMessage {
                    id: row.get(0)?,
                    topic: row.get(1)?,
                    message: row.get(2)?,
                    received_at: row.get(3)?,
                })
            })
            .map_err(StoreError::Read)?;
        rows.collect::<Result<Vec<_>, _>>().map_err(StoreError::Read)
    }

    fn delete_by_ids(&mut self, ids: &[i64]) -> Result<(), StoreError> {
        let tx = self.conn.transaction().map_err(StoreError::Write)?;
        for id in ids {
            tx.execute("DELETE FROM messages WHERE id = ?1", params![id])
                .map_err(StoreError::Write)?;
        }
        tx.commit().map_err(StoreError::Write)
    }
}

fn init_schema(conn: &Connection) -> Result<(), rusqlite::Error> {
    conn.execute_batch(
        r#"
        CREATE TABLE IF NOT EXISTS messages (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            topic TEXT NOT NULL,
            message TEXT NOT NULL,
            timestamp INTEGER NOT NULL
        );
        "#,
    )
}
