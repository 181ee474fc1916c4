// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Self-update supervisor.
//!
//! Polls a source-control hosting API for the latest commit of the deployed
//! branch. On a change it persists the new token, pulls the revision, and
//! launches a replacement process. The caller terminates the current process
//! only after the replacement was launched successfully, so there is never a
//! window with no running agent.

use std::path::PathBuf;

use serde::Deserialize;
use tracing::{debug, error, info, warn};

use crate::config::UpdaterConfig;
use crate::error::{CreationError, UpdateError};

const USER_AGENT: &str = "edge-relay-agent";

#[derive(Debug, Deserialize)]
struct CommitResponse {
    sha: String,
}

pub struct UpdateSupervisor {
    client: reqwest::Client,
    commits_url: String,
    version_file: PathBuf,
    repo_dir: PathBuf,
}

impl UpdateSupervisor {
    pub fn new(config: &UpdaterConfig) -> Result<UpdateSupervisor, CreationError> {
        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .user_agent(USER_AGENT)
            .build()
            .map_err(CreationError::Client)?;

        Ok(UpdateSupervisor {
            client,
            commits_url: config.commits_url.clone(),
            version_file: config.version_file.clone(),
            repo_dir: config.repo_dir.clone(),
        })
    }

    /// Compare the remote revision against the persisted token. Any fetch
    /// failure counts as up to date. On a mismatch the new token is persisted
    /// before the update runs, so a broken update does not re-trigger on
    /// every cycle.
    pub async fn check_for_update(&self) -> bool {
        let remote = match self.fetch_remote_token().await {
            Ok(sha) => sha,
            Err(e) => {
                warn!("Version check failed, assuming the current revision is latest: {e}");
                return false;
            }
        };

        let local = match tokio::fs::read_to_string(&self.version_file).await {
            Ok(contents) => contents.trim().to_string(),
            Err(_) => String::new(),
        };

        if remote == local {
            debug!("Already on revision {remote}");
            return false;
        }

        info!("New revision {remote} available");
        if let Err(e) = tokio::fs::write(&self.version_file, &remote).await {
            error!("Failed to persist the version token, skipping this update: {e}");
            return false;
        }
        true
    }

    async fn fetch_remote_token(&self) -> Result<String, reqwest::Error> {
        let response = self
            .client
            .get(&self.commits_url)
            .send()
            .await?
            .error_for_status()?;
        Ok(response.json::<CommitResponse>().await?.sha)
    }

    /// Pull the new revision and launch a replacement process with the same
    /// arguments. Returns Ok only once the replacement is running.
    pub async fn update_and_restart(&self) -> Result<(), UpdateError> {
        info!("Pulling the latest revision into {}", self.repo_dir.display());
        let output = tokio::process::Command::new("git")
            .arg("pull")
            .current_dir(&self.repo_dir)
            .output()
            .await
            .map_err(|e| UpdateError::ActionFailed(e.to_string()))?;
        if !output.status.success() {
            return Err(UpdateError::ActionFailed(
                String::from_utf8_lossy(&output.stderr).into_owned(),
            ));
        }

        let exe =
            std::env::current_exe().map_err(|e| UpdateError::RestartFailed(e.to_string()))?;
        let args: Vec<String> = std::env::args().skip(1).collect();
        std::process::Command::new(exe)
            .args(&args)
            .spawn()
            .map_err(|e| UpdateError::RestartFailed(e.to_string()))?;

        info!("Replacement process launched");
        Ok(())
    }
}
