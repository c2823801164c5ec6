//! Discord webhook notification manager
//!
//! Sends a notification to Discord via webhooks when a backup run fails or,
//! with `level = "info"`, when it succeeds.

use anyhow::{Context, Result};
use serde::Serialize;
use std::time::Duration;
use tracing::{debug, error, info};

use crate::config::NotificationConfig;
use crate::managers::stats::Stats;

/// Something that reports the outcome of a backup run
pub trait Notifier: Send + Sync {
    fn notify_failure(&self, stats: &Stats, error: &anyhow::Error) -> Result<()>;

    fn notify_success(&self, stats: &Stats) -> Result<()>;
}

/// Notification manager for sending Discord webhooks
pub struct NotificationManager {
    config: NotificationConfig,
}

/// Discord embed color codes (decimal)
#[derive(Debug, Clone, Copy)]
pub enum NotificationColor {
    /// Red - for failures
    Failure = 15158332, // #E74C3C
    /// Green - for success
    Success = 3066993, // #2ECC71
}

impl NotificationColor {
    fn as_decimal(&self) -> u32 {
        *self as u32
    }
}

/// Discord webhook payload
#[derive(Debug, Serialize)]
struct DiscordPayload {
    #[serde(skip_serializing_if = "Option::is_none")]
    username: Option<String>,
    embeds: Vec<DiscordEmbed>,
}

#[derive(Debug, Serialize)]
struct DiscordEmbed {
    title: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    description: Option<String>,
    color: u32,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    fields: Vec<DiscordField>,
    #[serde(skip_serializing_if = "Option::is_none")]
    footer: Option<DiscordFooter>,
    #[serde(skip_serializing_if = "Option::is_none")]
    timestamp: Option<String>,
}

#[derive(Debug, Serialize)]
struct DiscordField {
    name: String,
    value: String,
    inline: bool,
}

#[derive(Debug, Serialize)]
struct DiscordFooter {
    text: String,
}

impl NotificationManager {
    /// Create a new notification manager
    pub fn new(config: NotificationConfig) -> Self {
        Self { config }
    }

    pub fn is_enabled(&self) -> bool {
        !self.config.discord_webhook_url.is_empty()
    }

    fn send(&self, payload: &DiscordPayload) -> Result<()> {
        if !self.is_enabled() {
            debug!("No webhook configured, skipping notification");
            return Ok(());
        }

        let client = reqwest::blocking::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .context("Failed to create HTTP client")?;

        let response = client
            .post(&self.config.discord_webhook_url)
            .header("Content-Type", "application/json")
            .json(payload)
            .send()
            .context("Failed to send Discord webhook")?;

        let status = response.status();
        if status.is_success() {
            debug!("Discord webhook sent successfully");
            Ok(())
        } else {
            let body = response.text().unwrap_or_default();
            error!("Discord webhook failed with status {}: {}", status, body);
            anyhow::bail!("Discord webhook failed with status {}: {}", status, body)
        }
    }

    fn build_payload(&self, stats: &Stats, error: Option<&anyhow::Error>) -> DiscordPayload {
        let (color, title, description) = match error {
            Some(_) => (
                NotificationColor::Failure,
                "\u{274C} Docker Volume Backup: Failure",
                "Running the backup failed",
            ),
            None => (
                NotificationColor::Success,
                "\u{2705} Docker Volume Backup: Success",
                "Backup completed successfully",
            ),
        };

        let mut fields = Vec::new();

        if !stats.backup_file.name.is_empty() {
            fields.push(DiscordField {
                name: "File".to_string(),
                value: stats.backup_file.name.clone(),
                inline: true,
            });
            fields.push(DiscordField {
                name: "Size".to_string(),
                value: format_size(stats.backup_file.size),
                inline: true,
            });
        }

        fields.push(DiscordField {
            name: "Duration".to_string(),
            value: format_duration(stats.took.as_secs()),
            inline: true,
        });

        if stats.containers.to_stop > 0 || stats.services.to_scale_down > 0 {
            fields.push(DiscordField {
                name: "Stopped".to_string(),
                value: format!(
                    "{}/{} container(s), {}/{} service(s)",
                    stats.containers.stopped,
                    stats.containers.to_stop,
                    stats.services.scaled_down,
                    stats.services.to_scale_down
                ),
                inline: false,
            });
        }

        if !stats.storages.is_empty() {
            let summary = stats
                .storages
                .iter()
                .map(|(name, prune)| {
                    format!("{}: pruned {} of {} backup(s)", name, prune.pruned, prune.total)
                })
                .collect::<Vec<_>>()
                .join("\n");
            fields.push(DiscordField {
                name: "Storages".to_string(),
                value: summary,
                inline: false,
            });
        }

        if let Some(error) = error {
            fields.push(DiscordField {
                name: "Error".to_string(),
                value: format!("```\n{}\n```", truncate(&format!("{:#}", error), 500)),
                inline: false,
            });
            if !stats.log_output.is_empty() {
                fields.push(DiscordField {
                    name: "Log".to_string(),
                    value: format!("```\n{}\n```", tail(&stats.log_output, 900)),
                    inline: false,
                });
            }
        }

        let timestamp = stats
            .end_time
            .map(|end| end.format("%Y-%m-%dT%H:%M:%SZ").to_string());

        DiscordPayload {
            username: Some("Docker Volume Backup".to_string()),
            embeds: vec![DiscordEmbed {
                title: title.to_string(),
                description: Some(description.to_string()),
                color: color.as_decimal(),
                fields,
                footer: Some(DiscordFooter {
                    text: "docker-volume-backup".to_string(),
                }),
                timestamp,
            }],
        }
    }
}

impl Notifier for NotificationManager {
    fn notify_failure(&self, stats: &Stats, error: &anyhow::Error) -> Result<()> {
        self.send(&self.build_payload(stats, Some(error)))?;
        if self.is_enabled() {
            info!("Sent failure notification");
        }
        Ok(())
    }

    fn notify_success(&self, stats: &Stats) -> Result<()> {
        self.send(&self.build_payload(stats, None))?;
        if self.is_enabled() {
            info!("Sent success notification");
        }
        Ok(())
    }
}

/// Keep at most `max` bytes, cutting on a char boundary
fn truncate(text: &str, max: usize) -> String {
    if text.len() <= max {
        return text.to_string();
    }
    let mut end = max.saturating_sub(3);
    while !text.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}...", &text[..end])
}

/// Keep the last `max` bytes, the end of a log is the interesting part
fn tail(text: &str, max: usize) -> &str {
    if text.len() <= max {
        return text;
    }
    let mut start = text.len() - max;
    while !text.is_char_boundary(start) {
        start += 1;
    }
    &text[start..]
}

/// Format duration in human-readable form
fn format_duration(seconds: u64) -> String {
    if seconds < 60 {
        format!("{}s", seconds)
    } else if seconds < 3600 {
        let minutes = seconds / 60;
        let secs = seconds % 60;
        if secs == 0 {
            format!("{}m", minutes)
        } else {
            format!("{}m {}s", minutes, secs)
        }
    } else {
        let hours = seconds / 3600;
        let minutes = (seconds % 3600) / 60;
        if minutes == 0 {
            format!("{}h", hours)
        } else {
            format!("{}h {}m", hours, minutes)
        }
    }
}

fn format_size(bytes: u64) -> String {
    const UNITS: [&str; 5] = ["B", "KiB", "MiB", "GiB", "TiB"];
    let mut size = bytes as f64;
    let mut unit = 0;
    while size >= 1024.0 && unit < UNITS.len() - 1 {
        size /= 1024.0;
        unit += 1;
    }
    if unit == 0 {
        format!("{} B", bytes)
    } else {
        format!("{:.1} {}", size, UNITS[unit])
    }
}

/// Recording notifier for tests
/// Available for use in external test crates
pub mod mock {
    use super::*;
    use std::sync::{Arc, Mutex};

    #[derive(Clone, Debug, PartialEq, Eq)]
    pub enum SentNotification {
        Failure { error: String },
        Success,
    }

    #[derive(Clone, Default)]
    pub struct MockNotifier {
        pub sent: Arc<Mutex<Vec<SentNotification>>>,
        fail: bool,
    }

    impl MockNotifier {
        pub fn new() -> Self {
            Self::default()
        }

        /// Every notification attempt fails
        pub fn failing() -> Self {
            Self {
                fail: true,
                ..Self::default()
            }
        }

        pub fn sent(&self) -> Vec<SentNotification> {
            self.sent.lock().unwrap().clone()
        }
    }

    impl Notifier for MockNotifier {
        fn notify_failure(&self, _stats: &Stats, error: &anyhow::Error) -> Result<()> {
            self.sent.lock().unwrap().push(SentNotification::Failure {
                error: format!("{:#}", error),
            });
            if self.fail {
                anyhow::bail!("Mock notification failure");
            }
            Ok(())
        }

        fn notify_success(&self, _stats: &Stats) -> Result<()> {
            self.sent.lock().unwrap().push(SentNotification::Success);
            if self.fail {
                anyhow::bail!("Mock notification failure");
            }
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::managers::stats::PruneStats;

    fn manager() -> NotificationManager {
        NotificationManager::new(NotificationConfig {
            discord_webhook_url: "https://discord.com/api/webhooks/test".to_string(),
            level: "error".to_string(),
        })
    }

    #[test]
    fn test_format_duration() {
        assert_eq!(format_duration(45), "45s");
        assert_eq!(format_duration(125), "2m 5s");
        assert_eq!(format_duration(3720), "1h 2m");
    }

    #[test]
    fn test_format_size() {
        assert_eq!(format_size(512), "512 B");
        assert_eq!(format_size(1536), "1.5 KiB");
        assert_eq!(format_size(3 * 1024 * 1024 * 1024), "3.0 GiB");
    }

    #[test]
    fn test_truncate_and_tail_respect_char_boundaries() {
        let text = "é".repeat(400);
        assert!(truncate(&text, 500).ends_with("..."));
        assert!(truncate(&text, 500).len() <= 500);
        assert!(tail(&text, 101).len() <= 101);
        assert_eq!(tail("short", 100), "short");
    }

    #[test]
    fn test_disabled_without_webhook_url() {
        let manager = NotificationManager::new(NotificationConfig::default());
        assert!(!manager.is_enabled());
        assert!(manager.notify_success(&Stats::default()).is_ok());
    }

    #[test]
    fn test_build_failure_payload() {
        let mut stats = Stats::default();
        stats.backup_file.name = "backup-2024-03-09.tar.gz".to_string();
        stats.backup_file.size = 2048;
        stats.took = Duration::from_secs(120);
        stats.log_output = "level=error msg=boom\n".to_string();
        stats.storages.insert(
            "S3".to_string(),
            PruneStats {
                total: 4,
                pruned: 1,
                prune_errors: 0,
            },
        );

        let error = anyhow::anyhow!("access denied").context("S3 copy failed");
        let payload = manager().build_payload(&stats, Some(&error));
        let embed = &payload.embeds[0];

        assert!(embed.title.contains("Failure"));
        assert_eq!(embed.color, NotificationColor::Failure.as_decimal());
        assert!(embed.fields.iter().any(|f| f.name == "Duration" && f.value == "2m"));
        assert!(embed.fields.iter().any(|f| f.name == "Size" && f.value == "2.0 KiB"));
        assert!(embed
            .fields
            .iter()
            .any(|f| f.name == "Error" && f.value.contains("S3 copy failed: access denied")));
        assert!(embed.fields.iter().any(|f| f.name == "Log" && f.value.contains("boom")));
        assert!(embed
            .fields
            .iter()
            .any(|f| f.name == "Storages" && f.value.contains("S3: pruned 1 of 4")));
    }

    #[test]
    fn test_build_success_payload_has_no_error_field() {
        let payload = manager().build_payload(&Stats::default(), None);
        let embed = &payload.embeds[0];

        assert!(embed.title.contains("Success"));
        assert_eq!(embed.color, NotificationColor::Success.as_decimal());
        assert!(!embed.fields.iter().any(|f| f.name == "Error"));
    }
}
