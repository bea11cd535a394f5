//! Repository management on the git host's HTTP API.
use crate::config::runtime::Config;
use log::{debug, info};
use serde::Serialize;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("git host request: {0}")]
    Http(#[from] reqwest::Error),

    #[error("git host {method} {url} failed with status {status}: {body}")]
    Rejected {
        method: &'static str,
        url: String,
        status: u16,
        body: String,
    },
}

/// Body of the repository creation call.
#[derive(Serialize, Debug, Clone, PartialEq)]
pub struct CreateRepository {
    pub name: String,
    pub default_branch: String,
    pub private: bool,
    pub auto_init: bool,
    pub template: bool,
    pub description: String,
}

impl CreateRepository {
    /// An empty public repository; the first push brings the content.
    pub fn new(name: impl Into<String>, default_branch: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            default_branch: default_branch.into(),
            private: false,
            auto_init: false,
            template: true,
            description: String::new(),
        }
    }
}

pub struct GitHost {
    client: reqwest::Client,
    base_url: String,
    user_api_endpoint: String,
    repo_api_endpoint: String,
    access_token: String,
}

fn join(base: &str, segments: &[&str]) -> String {
    std::iter::once(base.trim_end_matches('/'))
        .chain(segments.iter().map(|s| s.trim_matches('/')))
        .filter(|s| !s.is_empty())
        .collect::<Vec<_>>()
        .join("/")
}

impl GitHost {
    pub fn new(cfg: &Config) -> Result<Self, crate::Error> {
        Ok(Self {
            client: reqwest::Client::new(),
            base_url: cfg.git_api_base()?.to_string(),
            user_api_endpoint: cfg.git.user_api_endpoint.clone(),
            repo_api_endpoint: cfg.git.repo_api_endpoint.clone(),
            access_token: cfg.git_access_token()?.to_string(),
        })
    }

    async fn send(
        &self,
        method: &'static str,
        request: reqwest::RequestBuilder,
        url: String,
    ) -> Result<(), Error> {
        debug!("{method} {url}");
        let response = request
            .header("Authorization", format!("token {}", self.access_token))
            .send()
            .await?;
        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        debug!("Git host response {status}: {body}");
        if !status.is_success() {
            return Err(Error::Rejected {
                method,
                url,
                status: status.as_u16(),
                body,
            });
        }
        Ok(())
    }

    /// `POST <base>/<user-api>` creating a repository owned by the authenticated user.
    pub async fn create_repository(&self, repository: &CreateRepository) -> Result<(), Error> {
        let url = join(&self.base_url, &[&self.user_api_endpoint]);
        self.send("POST", self.client.post(&url).json(repository), url.clone())
            .await?;
        info!("Created repository {}", repository.name);
        Ok(())
    }

    /// `DELETE <base>/<repo-api>/<owner>/<name>`
    pub async fn delete_repository(&self, owner: &str, name: &str) -> Result<(), Error> {
        let url = join(&self.base_url, &[&self.repo_api_endpoint, owner, name]);
        self.send("DELETE", self.client.delete(&url), url.clone())
            .await?;
        info!("Deleted repository {owner}/{name}");
        Ok(())
    }
}
