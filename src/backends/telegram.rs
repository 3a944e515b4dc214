//! Delivery of messages and files through the [Telegram] bot API.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;

use derive_more::{Display, Error, From};
use reqwest::blocking::multipart::Form;
use reqwest::blocking::{Client, Response};

use super::Notifier;

const DEFAULT_API_URL: &str = "https://api.telegram.org";

/// Largest document a bot may upload.
pub const MAX_UPLOAD_BYTES: u64 = 50 * 1024 * 1024;

/// Longest text a single message may carry.
pub const MAX_MESSAGE_CHARS: usize = 4096;

/// Errors on talking to the bot API.
#[derive(Debug, Display, Error, From)]
pub enum NotifyError {
    /// The request could not be sent.
    #[display("Telegram request failed: {_0}")]
    #[from]
    Http(reqwest::Error),
    /// The file to send could not be read.
    #[display("Reading {} failed: {source}", path.display())]
    Io { path: PathBuf, source: io::Error },
    /// The file exceeds [MAX_UPLOAD_BYTES].
    #[display("{} is too large for Telegram ({size} bytes)", path.display())]
    TooLarge { path: PathBuf, size: u64 },
    /// The API answered with an error.
    #[display("Telegram API error ({status}): {description}")]
    Api { status: u16, description: String },
}

#[derive(serde::Deserialize)]
struct ApiResponse {
    ok: bool,
    #[serde(default)]
    description: Option<String>,
}

/// A bot posting into a single chat.
#[derive(Clone)]
pub struct Telegram {
    client: Client,
    api_url: String,
    token: String,
    chat_id: i64,
}

impl Telegram {
    pub fn new(token: String, chat_id: i64) -> Result<Self, NotifyError> {
        Self::with_api_url(DEFAULT_API_URL.to_string(), token, chat_id)
    }

    /// Bot talking to a self-hosted bot API server.
    pub fn with_api_url(api_url: String, token: String, chat_id: i64) -> Result<Self, NotifyError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(300))
            .build()?;
        log::debug!(target: "backend::telegram", "BOT_TOKEN length: {}", token.len());

        Ok(Self {
            client,
            api_url,
            token,
            chat_id,
        })
    }

    fn endpoint(&self, method: &str) -> String {
        format!("{}/bot{}/{method}", self.api_url.trim_end_matches('/'), self.token)
    }

    fn check(response: Response) -> Result<(), NotifyError> {
        let status = response.status();
        let body: ApiResponse = match response.json() {
            Ok(body) => body,
            Err(_) if status.is_success() => return Ok(()),
            Err(e) => {
                return Err(NotifyError::Api {
                    status: status.as_u16(),
                    description: e.to_string(),
                })
            }
        };

        if status.is_success() && body.ok {
            Ok(())
        } else {
            Err(NotifyError::Api {
                status: status.as_u16(),
                description: body.description.unwrap_or_default(),
            })
        }
    }
}

impl Notifier for Telegram {
    fn send_message(&self, text: &str) -> Result<(), NotifyError> {
        for chunk in split_message(text, MAX_MESSAGE_CHARS) {
            let response = self
                .client
                .post(self.endpoint("sendMessage"))
                .json(&serde_json::json!({ "chat_id": self.chat_id, "text": chunk }))
                .send()?;
            Self::check(response)?;
        }
        log::trace!(target: "backend::telegram", "Sent message to {}", self.chat_id);

        Ok(())
    }

    fn send_file(&self, path: &Path) -> Result<(), NotifyError> {
        let io_err = |source| NotifyError::Io {
            path: path.to_path_buf(),
            source,
        };
        let size = fs::metadata(path).map_err(io_err)?.len();
        if size > MAX_UPLOAD_BYTES {
            return Err(NotifyError::TooLarge {
                path: path.to_path_buf(),
                size,
            });
        }

        let form = Form::new()
            .text("chat_id", self.chat_id.to_string())
            .file("document", path)
            .map_err(io_err)?;
        let response = self
            .client
            .post(self.endpoint("sendDocument"))
            .multipart(form)
            .send()?;
        Self::check(response)?;
        log::debug!(target: "backend::telegram", "Document {} was sent", path.display());

        Ok(())
    }
}

/// Splits `text` into pieces of at most `limit` characters, preferring line breaks.
pub fn split_message(text: &str, limit: usize) -> Vec<&str> {
    let limit = limit.max(1);
    let mut chunks = Vec::new();
    let mut rest = text;

    while rest.chars().count() > limit {
        let hard_end = rest
            .char_indices()
            .nth(limit)
            .map(|(i, _)| i)
            .unwrap_or(rest.len());
        let end = match rest[..hard_end].rfind('\n') {
            Some(newline) if newline > 0 => newline + 1,
            _ => hard_end,
        };
        chunks.push(&rest[..end]);
        rest = &rest[end..];
    }
    if !rest.is_empty() || chunks.is_empty() {
        chunks.push(rest);
    }

    chunks
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn short_messages_stay_whole() {
        assert_eq!(split_message("Backup at 20240101_000000", 4096), ["Backup at 20240101_000000"]);
        assert_eq!(split_message("", 10), [""]);
    }

    #[test]
    fn long_messages_split_on_lines() {
        let text = "aaaa\nbbbb\ncccc";
        assert_eq!(split_message(text, 10), ["aaaa\nbbbb\n", "cccc"]);
    }

    #[test]
    fn long_lines_split_hard() {
        assert_eq!(split_message("abcdefgh", 3), ["abc", "def", "gh"]);
        assert_eq!(split_message("äöüß", 2), ["äö", "üß"]);
    }

    #[test]
    fn zero_limit_splits_per_char() {
        assert_eq!(split_message("abc", 0), ["a", "b", "c"]);
    }

    #[test]
    fn oversized_files_are_rejected_before_upload() {
        let file = tempfile::NamedTempFile::new().unwrap();
        file.as_file().set_len(MAX_UPLOAD_BYTES + 1).unwrap();
        let bot = Telegram::with_api_url("http://127.0.0.1:9".into(), "token".into(), 1).unwrap();

        let err = bot.send_file(file.path()).unwrap_err();
        assert!(matches!(err, NotifyError::TooLarge { size, .. } if size == MAX_UPLOAD_BYTES + 1));
    }

    #[test]
    fn endpoint_includes_token() {
        let bot = Telegram::with_api_url("http://localhost/".into(), "123:abc".into(), 1).unwrap();
        assert_eq!(bot.endpoint("sendMessage"), "http://localhost/bot123:abc/sendMessage");
    }
}
