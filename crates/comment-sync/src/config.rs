//! Runtime configuration shared by the `post` and `clear` commands.
//!
//! Every flag falls back to an environment variable so the binary can run
//! unattended from a workflow step.

use clap::Args;
use std::fmt;

use crate::error::{Result, SyncError};
use crate::github::{GitHubClient, DEFAULT_API_URL};
use crate::retract::{RetractConfig, DEFAULT_AUTOMATION_ACCOUNT, DEFAULT_MAX_OWNED};

/// Connection and target settings.
#[derive(Clone, Args)]
pub struct Config {
    /// GitHub token used for every API call
    #[arg(long, env = "GITHUB_TOKEN", hide_env_values = true)]
    pub token: String,

    /// GitHub API base URL
    #[arg(long, env = "GITHUB_API_URL", default_value = DEFAULT_API_URL)]
    pub api_url: String,

    /// Repository in owner/repo form
    #[arg(long, env = "GITHUB_REPOSITORY")]
    pub repository: String,

    /// Pull request number
    #[arg(long, env = "PR_NUMBER")]
    pub pr_number: u64,

    /// Accounts whose unmarked comments count as automation-owned
    #[arg(
        long,
        env = "COMMENT_SYNC_BOT_ACCOUNTS",
        value_delimiter = ',',
        default_value = DEFAULT_AUTOMATION_ACCOUNT
    )]
    pub bot_accounts: Vec<String>,
}

impl fmt::Debug for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Config")
            .field("token", &"<redacted>")
            .field("api_url", &self.api_url)
            .field("repository", &self.repository)
            .field("pr_number", &self.pr_number)
            .field("bot_accounts", &self.bot_accounts)
            .finish()
    }
}

/// Validated `owner/repo` pair.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RepoTarget {
    pub owner: String,
    pub repo: String,
}

impl Config {
    /// Reject malformed settings before any remote call.
    pub fn validate(&self) -> Result<RepoTarget> {
        if self.token.trim().is_empty() {
            return Err(SyncError::Validation("GitHub token is empty".to_string()));
        }
        if self.pr_number == 0 {
            return Err(SyncError::Validation(
                "pull request number must be positive".to_string(),
            ));
        }
        if !self.api_url.starts_with("http://") && !self.api_url.starts_with("https://") {
            return Err(SyncError::Validation(format!(
                "API URL must be http(s): {}",
                self.api_url
            )));
        }

        match self.repository.trim().split_once('/') {
            Some((owner, repo))
                if !owner.is_empty() && !repo.is_empty() && !repo.contains('/') =>
            {
                Ok(RepoTarget {
                    owner: owner.to_string(),
                    repo: repo.to_string(),
                })
            }
            _ => Err(SyncError::Validation(format!(
                "repository must be owner/repo, got '{}'",
                self.repository
            ))),
        }
    }

    /// Build the GitHub client for the configured pull request.
    pub fn github_client(&self) -> Result<GitHubClient> {
        let target = self.validate()?;
        GitHubClient::new(
            &self.api_url,
            &self.token,
            target.owner,
            target.repo,
            self.pr_number,
        )
    }

    pub fn retract_config(&self) -> RetractConfig {
        let automation_accounts: Vec<String> = self
            .bot_accounts
            .iter()
            .map(|account| account.trim().to_string())
            .filter(|account| !account.is_empty())
            .collect();
        RetractConfig {
            automation_accounts,
            max_owned: DEFAULT_MAX_OWNED,
        }
    }
}
