//! Gist-backed profile store driven through the GitHub CLI.
//!
//! Every call shells out to `gh`, so authentication, host selection and
//! proxies follow the user's existing `gh` setup.

use super::error::{classify_diagnostic, classify_status};
use super::{blob_name, profile_from_blob, CollectionId, RemoteError, RemoteStore};
use crate::config::RemoteConfig;
use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::Deserialize;
use serde_json::json;
use std::collections::HashMap;
use std::process::Stdio;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::{debug, info, warn};

/// Canonical URL of a gist, printed by `gh gist create`.
static GIST_URL: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"https://gist\.github\.com/(?:[\w-]+/)?([0-9a-fA-F]+)\b").expect("Invalid gist URL pattern")
});

#[derive(Debug, Deserialize)]
struct GistDocument {
    #[serde(default)]
    files: HashMap<String, Option<GistFile>>,
}

#[derive(Debug, Deserialize)]
struct GistFile {
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    truncated: bool,
    #[serde(default)]
    raw_url: Option<String>,
}

struct CommandOutput {
    success: bool,
    stdout: String,
    stderr: String,
}

impl CommandOutput {
    fn combined(&self) -> String {
        format!("{}\n{}", self.stdout, self.stderr)
    }
}

pub struct GhCliStore {
    binary: String,
    description: String,
    extension: String,
    placeholder_name: String,
    http: reqwest::Client,
}

impl GhCliStore {
    pub fn new(config: &RemoteConfig) -> Self {
        Self {
            binary: config.gh_binary.clone(),
            description: config.collection_description.clone(),
            extension: config.blob_extension.clone(),
            placeholder_name: config.placeholder_name.clone(),
            http: reqwest::Client::new(),
        }
    }

    async fn run(&self, args: &[&str], stdin: Option<&[u8]>) -> Result<CommandOutput, RemoteError> {
        debug!("Running {} {}", self.binary, args.first().copied().unwrap_or_default());

        let mut child = Command::new(&self.binary)
            .args(args)
            .stdin(if stdin.is_some() { Stdio::piped() } else { Stdio::null() })
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| RemoteError::Other(format!("failed to run {}: {}", self.binary, e)))?;

        if let (Some(input), Some(mut pipe)) = (stdin, child.stdin.take()) {
            pipe.write_all(input)
                .await
                .map_err(|e| RemoteError::Other(format!("failed to send request body: {}", e)))?;
            // closing stdin lets gh see end of input
            drop(pipe);
        }

        let output = child
            .wait_with_output()
            .await
            .map_err(|e| RemoteError::Other(format!("{} did not finish: {}", self.binary, e)))?;

        Ok(CommandOutput {
            success: output.status.success(),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        })
    }

    /// Run and require success, classifying failures.
    async fn run_checked(&self, args: &[&str], stdin: Option<&[u8]>) -> Result<String, RemoteError> {
        let output = self.run(args, stdin).await?;
        if output.success {
            Ok(output.stdout)
        } else {
            Err(classify_diagnostic(&output.stderr))
        }
    }

    async fn fetch_gist(&self, id: &CollectionId) -> Result<GistDocument, RemoteError> {
        let path = format!("/gists/{}", id);
        let body = self.run_checked(&["api", &path], None).await?;
        serde_json::from_str(&body)
            .map_err(|e| RemoteError::Other(format!("unexpected gist response: {}", e)))
    }

    async fn patch_files(&self, id: &CollectionId, files: serde_json::Value) -> Result<(), RemoteError> {
        let path = format!("/gists/{}", id);
        let body = json!({ "files": files }).to_string();
        self.run_checked(
            &["api", "--method", "PATCH", &path, "--input", "-"],
            Some(body.as_bytes()),
        )
        .await
        .map(|_| ())
    }

    async fn fetch_raw(&self, url: &str) -> Result<String, RemoteError> {
        debug!("Fetching truncated content from {}", url);
        let response = self
            .http
            .get(url)
            .send()
            .await
            .map_err(|e| RemoteError::Other(format!("raw download failed: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(classify_status(status.as_u16(), &body));
        }

        response
            .text()
            .await
            .map_err(|e| RemoteError::Other(format!("raw download failed: {}", e)))
    }

    fn placeholder_text(&self) -> String {
        let host = hostname::get()
            .ok()
            .and_then(|h| h.into_string().ok())
            .unwrap_or_else(|| "unknown host".to_string());
        format!(
            "# {}\n\nConfiguration profiles, one `*.{}` file each.\nCreated from {} on {}.\n",
            self.description,
            self.extension,
            host,
            chrono::Utc::now().format("%Y-%m-%d")
        )
    }
}

/// Pull the collection id out of `gh gist create` output.
pub fn extract_gist_id(output: &str) -> Option<String> {
    GIST_URL
        .captures(output)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str().to_string())
}

/// Where the content of a downloaded blob comes from.
#[derive(Debug, PartialEq, Eq)]
enum BlobSource {
    Inline(String),
    /// Content was truncated or omitted; fetch it from this URL
    Raw(String),
}

fn blob_source(blob: &str, file: GistFile) -> Result<BlobSource, RemoteError> {
    match (file.truncated, file.content, file.raw_url) {
        (false, Some(content), _) => Ok(BlobSource::Inline(content)),
        (_, _, Some(raw_url)) => Ok(BlobSource::Raw(raw_url)),
        (true, Some(_), None) | (_, None, None) => Err(RemoteError::Other(format!(
            "{} has no retrievable content",
            blob
        ))),
    }
}

/// Interpret `gh gist create` output.
///
/// gh can exit non-zero after the gist was created; the URL is the proof.
fn created_collection(output: &CommandOutput) -> Result<CollectionId, RemoteError> {
    match extract_gist_id(&output.combined()) {
        Some(id) => {
            if !output.success {
                warn!("gh reported an error but the collection was created");
            }
            Ok(CollectionId(id))
        }
        None if output.success => Err(RemoteError::Other(
            "collection created but its id was not reported".to_string(),
        )),
        None => Err(classify_diagnostic(&output.stderr)),
    }
}

/// Find the id whose description matches in `id<TAB>description` lines.
fn find_in_listing(listing: &str, description: &str) -> Option<CollectionId> {
    listing.lines().find_map(|line| {
        let (id, desc) = line.split_once('\t')?;
        (desc.trim() == description).then(|| CollectionId(id.trim().to_string()))
    })
}

#[async_trait]
impl RemoteStore for GhCliStore {
    async fn find_collection(&self) -> Result<Option<CollectionId>, RemoteError> {
        let listing = self
            .run_checked(
                &[
                    "api",
                    "--paginate",
                    "/gists?per_page=100",
                    "--jq",
                    r#".[] | [.id, (.description // "")] | @tsv"#,
                ],
                None,
            )
            .await?;
        Ok(find_in_listing(&listing, &self.description))
    }

    async fn create_collection(&self) -> Result<CollectionId, RemoteError> {
        let staging = tempfile::tempdir()
            .map_err(|e| RemoteError::Other(format!("cannot stage placeholder: {}", e)))?;
        let placeholder = staging.path().join(&self.placeholder_name);
        std::fs::write(&placeholder, self.placeholder_text())
            .map_err(|e| RemoteError::Other(format!("cannot stage placeholder: {}", e)))?;
        let placeholder = placeholder.to_string_lossy().into_owned();

        let output = self
            .run(&["gist", "create", &placeholder, "--desc", &self.description], None)
            .await?;

        let id = created_collection(&output)?;
        info!("Created profile collection {}", id);
        Ok(id)
    }

    async fn list_profiles(&self, id: &CollectionId) -> Result<Vec<String>, RemoteError> {
        let gist = self.fetch_gist(id).await?;
        let mut names: Vec<String> = gist
            .files
            .keys()
            .filter_map(|blob| profile_from_blob(blob, &self.extension))
            .map(str::to_string)
            .collect();
        names.sort();
        Ok(names)
    }

    async fn upload(&self, id: &CollectionId, profile: &str, content: &str) -> Result<(), RemoteError> {
        let blob = blob_name(profile, &self.extension);
        self.patch_files(id, json!({ blob: { "content": content } })).await
    }

    async fn download(&self, id: &CollectionId, profile: &str) -> Result<String, RemoteError> {
        let blob = blob_name(profile, &self.extension);
        let mut gist = self.fetch_gist(id).await?;
        let file = gist
            .files
            .remove(&blob)
            .flatten()
            .ok_or(RemoteError::NotFound)?;

        match blob_source(&blob, file)? {
            BlobSource::Inline(content) => Ok(content),
            BlobSource::Raw(url) => self.fetch_raw(&url).await,
        }
    }

    async fn delete(&self, id: &CollectionId, profile: &str) -> Result<(), RemoteError> {
        let blob = blob_name(profile, &self.extension);
        let gist = self.fetch_gist(id).await?;
        if !gist.files.contains_key(&blob) {
            return Err(RemoteError::NotFound);
        }
        self.patch_files(id, json!({ blob: null })).await
    }

    async fn auth_diagnostics(&self) -> Option<String> {
        let output = self.run(&["auth", "status"], None).await.ok()?;
        let text = output.combined().trim().to_string();
        (!text.is_empty()).then_some(text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extract_gist_id_with_user_segment() {
        let output = "- Creating gist README.md\n✓ Created secret gist README.md\nhttps://gist.github.com/octocat/aa5a315d61ae9438b18d\n";
        assert_eq!(extract_gist_id(output), Some("aa5a315d61ae9438b18d".to_string()));
    }

    #[test]
    fn test_extract_gist_id_without_user_segment() {
        assert_eq!(
            extract_gist_id("https://gist.github.com/0123abcd\n"),
            Some("0123abcd".to_string())
        );
        assert_eq!(extract_gist_id("error: HTTP 401"), None);
    }

    #[test]
    fn test_find_in_listing() {
        let listing = "111\tsomething else\n222\tprofile-vault: configuration profiles\n333\t\n";
        assert_eq!(
            find_in_listing(listing, "profile-vault: configuration profiles"),
            Some(CollectionId("222".to_string()))
        );
        assert_eq!(find_in_listing(listing, "missing"), None);
        assert_eq!(find_in_listing("", "x"), None);
    }

    #[test]
    fn test_gist_document_parsing() {
        let body = r#"{
            "id": "abc",
            "files": {
                "work.tar.zst.b64": {"content": "AAAA", "truncated": false, "raw_url": "https://x"},
                "big.tar.zst.b64": {"content": "AA", "truncated": true, "raw_url": "https://y"},
                "README.md": {"content": "hi"}
            }
        }"#;
        let gist: GistDocument = serde_json::from_str(body).unwrap();
        assert_eq!(gist.files.len(), 3);
        let big = gist.files["big.tar.zst.b64"].as_ref().unwrap();
        assert!(big.truncated);
        assert_eq!(big.raw_url.as_deref(), Some("https://y"));
    }

    fn file(truncated: bool, content: Option<&str>, raw_url: Option<&str>) -> GistFile {
        GistFile {
            content: content.map(str::to_string),
            truncated,
            raw_url: raw_url.map(str::to_string),
        }
    }

    #[test]
    fn test_blob_source_inline_when_complete() {
        assert_eq!(
            blob_source("work.tar.zst.b64", file(false, Some("AAAA"), Some("https://raw"))).unwrap(),
            BlobSource::Inline("AAAA".to_string())
        );
    }

    #[test]
    fn test_blob_source_truncated_content_is_refetched() {
        assert_eq!(
            blob_source("work.tar.zst.b64", file(true, Some("AA"), Some("https://raw"))).unwrap(),
            BlobSource::Raw("https://raw".to_string())
        );
    }

    #[test]
    fn test_blob_source_missing_content_is_refetched() {
        assert_eq!(
            blob_source("work.tar.zst.b64", file(false, None, Some("https://raw"))).unwrap(),
            BlobSource::Raw("https://raw".to_string())
        );
    }

    #[test]
    fn test_blob_source_without_any_content() {
        for f in [file(true, Some("AA"), None), file(false, None, None), file(true, None, None)] {
            match blob_source("work.tar.zst.b64", f) {
                Err(RemoteError::Other(msg)) => assert!(msg.contains("work.tar.zst.b64")),
                other => panic!("unexpected {:?}", other),
            }
        }
    }

    fn create_output(success: bool, stdout: &str, stderr: &str) -> CommandOutput {
        CommandOutput {
            success,
            stdout: stdout.to_string(),
            stderr: stderr.to_string(),
        }
    }

    #[test]
    fn test_created_collection_on_success() {
        let output = create_output(true, "https://gist.github.com/octocat/abc123\n", "");
        assert_eq!(created_collection(&output).unwrap(), CollectionId("abc123".to_string()));
    }

    #[test]
    fn test_created_collection_despite_failed_exit() {
        let output = create_output(
            false,
            "",
            "- Creating gist README.md\nhttps://gist.github.com/def456\nfailed to open browser\n",
        );
        assert_eq!(created_collection(&output).unwrap(), CollectionId("def456".to_string()));
    }

    #[test]
    fn test_created_collection_without_url() {
        let silent = create_output(true, "done\n", "");
        assert!(matches!(created_collection(&silent), Err(RemoteError::Other(_))));

        let denied = create_output(false, "", "gh: Bad credentials (HTTP 401)\n");
        assert!(matches!(created_collection(&denied), Err(RemoteError::Auth(_))));
    }
}
