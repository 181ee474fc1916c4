// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Prints every buffered message as one JSON line. Inspection only; never
//! uploads or deletes anything.

use std::env;
use std::path::PathBuf;

use edge_relay::store::StoreService;

#[tokio::main]
async fn main() {
    let db_path = env::var("RELAY_DB_PATH")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("history.db"));

    let (service, store) = match StoreService::open(&db_path) {
        Ok(pair) => pair,
        Err(e) => {
            eprintln!("unable to open {}: {e}", db_path.display());
            std::process::exit(1);
        }
    };
    let service_task = tokio::spawn(service.run());

    match store.list_pending().await {
        Ok(rows) => {
            eprintln!("{} pending messages in {}", rows.len(), db_path.display());
            for row in rows {
                match serde_json::to_string(&row) {
                    Ok(line) => println!("{line}"),
                    Err(e) => eprintln!("unable to encode row {}: {e}", row.id),
                }
            }
        }
        Err(e) => {
            eprintln!("unable to read pending messages: {e}");
            std::process::exit(1);
        }
    }

    let _ = store.shutdown();
    let _ = service_task.await;
}
